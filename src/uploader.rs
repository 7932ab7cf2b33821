use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;

use crate::error::EngineResult;
use crate::transport::ChatTransport;

/// Platform single-file ceiling, 1.95 GiB — kept a hair under the real 2
/// GiB bot-upload limit. Shared with the Fetcher's pre-download size gate
/// (`fetch::MAX_DELIVERABLE_BYTES`); grounded on `split_upload.py`'s
/// `TG_MAX_SIZE = int(1.95 * 1024 * 1024 * 1024)`.
pub const MAX_SINGLE_FILE_BYTES: u64 = (1.95 * 1024.0 * 1024.0 * 1024.0) as u64;

const SPLIT_CHUNK_READ_SIZE: usize = 8 * 1024 * 1024;

/// Uploader / Splitter (4.H): uploads `path` to `chat` with `caption`,
/// splitting into ordered parts first if it's over the ceiling. Each part
/// is deleted from disk once its upload succeeds. Grounded on
/// `split_upload.py::upload_file_or_split`.
pub async fn upload<T: ChatTransport>(transport: &T, chat: teloxide::types::ChatId, path: &Path, caption: &str) -> EngineResult<()> {
    let size = tokio::fs::metadata(path).await?.len();
    if size <= MAX_SINGLE_FILE_BYTES {
        transport.upload_file(chat, path, caption).await?;
        return Ok(());
    }

    let parts = split_file(path, MAX_SINGLE_FILE_BYTES).await?;
    let total = parts.len();
    for (i, part) in parts.iter().enumerate() {
        let part_size = tokio::fs::metadata(part).await?.len();
        let part_caption = if i == 0 {
            format!("{caption}\n\npart {}/{total} ({} bytes)", i + 1, part_size)
        } else {
            format!("part {}/{total} ({} bytes)", i + 1, part_size)
        };
        transport.upload_file(chat, part, &part_caption).await?;
        tokio::fs::remove_file(part).await?;
    }

    if let Some(first) = parts.first() {
        if let Some(split_dir) = first.parent() {
            let _ = tokio::fs::remove_dir(split_dir).await;
        }
    }
    Ok(())
}

/// Splits `path` into `max_bytes`-sized parts under a sibling
/// `<name>_parts/` directory, named `<name>.partNN` (1-indexed, 2-digit),
/// in order, so a receiver can reassemble them byte-for-byte by
/// concatenation. Returns `[path]` unchanged if it's already small enough.
pub async fn split_file(path: &Path, max_bytes: u64) -> EngineResult<Vec<PathBuf>> {
    let size = tokio::fs::metadata(path).await?.len();
    if size <= max_bytes {
        return Ok(vec![path.to_path_buf()]);
    }

    let base_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "file".to_string());
    let split_dir = path.with_file_name(format!("{base_name}_parts"));
    tokio::fs::create_dir_all(&split_dir).await?;

    let num_parts = size.div_ceil(max_bytes);
    info!("splitting {base_name} ({size} bytes) into {num_parts} parts");

    let mut source = tokio::fs::File::open(path).await?;
    let mut parts = Vec::new();
    let mut buf = vec![0u8; SPLIT_CHUNK_READ_SIZE];

    for part_index in 0..num_parts {
        let part_path = split_dir.join(format!("{base_name}.part{:02}", part_index + 1));
        let mut part_file = tokio::fs::File::create(&part_path).await?;
        let mut remaining = max_bytes;
        let mut written = 0u64;

        while remaining > 0 {
            let to_read = remaining.min(buf.len() as u64) as usize;
            let n = source.read(&mut buf[..to_read]).await?;
            if n == 0 {
                break;
            }
            part_file.write_all(&buf[..n]).await?;
            remaining -= n as u64;
            written += n as u64;
        }

        if written > 0 {
            parts.push(part_path);
        }
    }

    Ok(parts)
}

/// Coarse media bucket for a non-split upload, inferred from extension
/// (§4.H "media type of a non-split upload is inferred from extension").
/// Grounded on `split_upload.py::upload_file_or_split`'s extension match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaBucket {
    Video,
    Audio,
    Document,
}

pub fn infer_media_bucket(path: &Path) -> MediaBucket {
    const VIDEO_EXTS: &[&str] = &["mp4", "mkv", "avi", "webm", "mov", "flv", "ts"];
    const AUDIO_EXTS: &[&str] = &["mp3", "aac", "ogg", "flac", "wav", "m4a", "opus", "mka"];

    let ext = path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).unwrap_or_default();
    if VIDEO_EXTS.contains(&ext.as_str()) {
        MediaBucket::Video
    } else if AUDIO_EXTS.contains(&ext.as_str()) {
        MediaBucket::Audio
    } else {
        MediaBucket::Document
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FakeChatTransport;

    #[test]
    fn infers_video_audio_and_document_buckets() {
        assert_eq!(infer_media_bucket(Path::new("clip.mkv")), MediaBucket::Video);
        assert_eq!(infer_media_bucket(Path::new("song.flac")), MediaBucket::Audio);
        assert_eq!(infer_media_bucket(Path::new("report.pdf")), MediaBucket::Document);
    }

    #[tokio::test]
    async fn small_file_is_returned_unsplit() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mp4");
        tokio::fs::write(&file, b"small").await.unwrap();
        let parts = split_file(&file, 1024).await.unwrap();
        assert_eq!(parts, vec![file]);
    }

    #[tokio::test]
    async fn large_file_splits_into_ordered_numbered_parts_that_reassemble_byte_for_byte() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("big.bin");
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
        tokio::fs::write(&file, &data).await.unwrap();

        let parts = split_file(&file, 4000).await.unwrap();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].file_name().unwrap().to_string_lossy().ends_with("part01"));
        assert!(parts[1].file_name().unwrap().to_string_lossy().ends_with("part02"));

        let mut reassembled = Vec::new();
        for part in &parts {
            reassembled.extend(tokio::fs::read(part).await.unwrap());
        }
        assert_eq!(reassembled, data);
    }

    #[tokio::test]
    async fn upload_under_ceiling_sends_a_single_file_and_keeps_it_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mp4");
        tokio::fs::write(&file, b"small").await.unwrap();
        let transport = FakeChatTransport::new();

        upload(&transport, teloxide::types::ChatId(1), &file, "caption").await.unwrap();

        assert_eq!(transport.uploaded.lock().unwrap().len(), 1);
        assert!(file.exists());
    }
}
