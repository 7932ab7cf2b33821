use std::path::Path;

use tracing::{error, trace, warn};

/// Logs a fatal configuration error and exits. Used at boot, before any task
/// exists to clean up after, so an immediate exit is correct rather than a
/// propagated `Result`.
pub fn die(message: impl std::fmt::Display) -> ! {
    error!("{message}");
    std::process::exit(1);
}

/// Verifies an external binary this engine shells out to is on PATH. Absence
/// is Fatal per §4.E: the bot cannot recover from it.
pub fn check_external_binary(dep: &str) {
    trace!("Checking dependency {dep} ...");
    match std::process::Command::new(dep).arg("--help").output() {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            die(format!("{dep} is not found. Please install {dep} first."))
        }
        Err(e) => warn!("Could not probe {dep}: {e}"),
    }
}

/// Best-effort recursive delete of a task's scratch directory. Idempotent:
/// a missing directory is not an error (§4.A `remove` / §8 property 3).
pub async fn cleanup_dir(path: impl AsRef<Path>) {
    let path = path.as_ref();
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

pub fn url_is_valid(candidate: &str) -> bool {
    match url::Url::parse(candidate) {
        Ok(u) => u.scheme() == "http" || u.scheme() == "https",
        Err(_) => false,
    }
}

pub async fn directory_size(path: impl AsRef<Path>) -> std::io::Result<u64> {
    let path = path.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut total = 0u64;
        for entry in walkdir::WalkDir::new(&path) {
            let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
            if entry.file_type().is_file() {
                total += entry.metadata().map_err(|e| std::io::Error::other(e.to_string()))?.len();
            }
        }
        Ok(total)
    })
    .await
    .unwrap_or(Ok(0))
}

/// Telegram limits message length to 4096 chars; used by every chat-facing
/// component that formats a long status or error message.
pub fn split_text(text: &str) -> Vec<String> {
    const LIMIT: usize = 4096;
    if text.len() <= LIMIT {
        return vec![text.to_string()];
    }
    text.as_bytes()
        .chunks(LIMIT)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect()
}

pub fn humanbytes(size: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = size as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.2} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_text_keeps_short_text_whole() {
        assert_eq!(split_text("hello"), vec!["hello".to_string()]);
    }

    #[test]
    fn split_text_chunks_long_text() {
        let text = "a".repeat(9000);
        let chunks = split_text(&text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[2].len(), 9000 - 2 * 4096);
    }

    #[test]
    fn humanbytes_formats_common_sizes() {
        assert_eq!(humanbytes(0), "0.00 B");
        assert_eq!(humanbytes(1024), "1.00 KiB");
        assert_eq!(humanbytes(1024 * 1024 * 5), "5.00 MiB");
    }

    #[test]
    fn url_is_valid_rejects_non_http_schemes() {
        assert!(url_is_valid("https://example.com/video.mp4"));
        assert!(!url_is_valid("ftp://example.com/video.mp4"));
        assert!(!url_is_valid("not a url"));
    }
}
