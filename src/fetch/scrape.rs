use std::path::{Path, PathBuf};

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::subprocess;

use super::{reject_if_too_large, FetchStrategy};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Regex fallbacks tried in order when no `<video>`/`<source>` tag is
/// found, per §4.G item 2. Grounded on `jl_downloader.py::extract_media_url`,
/// widened from its single JSON-key patterns to the fuller list §4.G names
/// (`file`, `src`, `url`, `source`, `video_url`, `stream_url`, `hls`, `mp4`)
/// plus an `og:video` meta fallback.
fn candidate_patterns() -> Vec<Regex> {
    let keys = ["file", "src", "url", "source", "video_url", "stream_url", "hls", "mp4"];
    let mut patterns: Vec<Regex> = keys
        .iter()
        .map(|key| Regex::new(&format!(r#""{key}"\s*:\s*"([^"]+\.(?:mp4|m3u8|webm|mkv)[^"]*)""#)).expect("static pattern"))
        .collect();
    patterns.push(Regex::new(r#"<meta[^>]+property=["']og:video["'][^>]+content=["']([^"']+)["']"#).expect("static pattern"));
    patterns.push(Regex::new(r#"https?://[^\s"'<>]+\.(?:mp4|mkv|webm|m3u8)[^\s"'<>]*"#).expect("static pattern"));
    patterns
}

/// HTML scrape strategy (§4.G item 2): fetch with browser headers and the
/// page as `Referer`, look for a `<video>`/`<source>` tag first, then fall
/// back to regex patterns over the raw HTML. Up to the first 5 candidates
/// are tried; HLS candidates re-encode through ffmpeg, direct candidates
/// download by chunked HTTP.
pub struct ScrapeStrategy {
    pub client: reqwest::Client,
}

impl FetchStrategy for ScrapeStrategy {
    async fn fetch(&self, url: &url::Url, dest_dir: &Path, cancel: CancellationToken) -> EngineResult<Vec<PathBuf>> {
        let html = match self
            .client
            .get(url.clone())
            .header("User-Agent", USER_AGENT)
            .header("Referer", url.as_str())
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => body,
                Err(e) => return Err(EngineError::transient("scrape fetch", e)),
            },
            Ok(_non_2xx) => return Ok(vec![]),
            Err(e) => return Err(EngineError::transient("scrape fetch", e)),
        };

        let mut candidates = find_video_tag_src(&html);
        if candidates.is_empty() {
            candidates = find_regex_candidates(&html);
        }
        sort_candidates(&mut candidates);
        candidates.truncate(5);

        tokio::fs::create_dir_all(dest_dir).await?;
        for candidate in candidates {
            let Ok(resolved) = url.join(&candidate) else { continue };
            reject_if_too_large(&self.client, &resolved).await?;

            let result = if resolved.as_str().contains(".m3u8") {
                fetch_hls(&resolved, dest_dir, cancel.clone()).await
            } else {
                fetch_direct_chunked(&self.client, &resolved, dest_dir).await
            };
            match result {
                Ok(path) => return Ok(vec![path]),
                Err(err) if err.is_transient() => {
                    debug!("scrape candidate {resolved} failed transiently, trying next");
                    continue;
                }
                // A bad transcode of one candidate doesn't mean the next 4
                // are bad too (§4.G "try up to the first 5 candidates") —
                // only a missing binary (EngineError::Fatal) aborts early.
                Err(err @ EngineError::MediaFormat { .. }) => {
                    debug!("scrape candidate {resolved} failed to transcode, trying next: {err}");
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(vec![])
    }
}

fn find_video_tag_src(html: &str) -> Vec<String> {
    let video_tag = Regex::new(r#"(?is)<video[^>]*>.*?</video>"#).expect("static pattern");
    let src_attr = Regex::new(r#"src\s*=\s*["']([^"']+)["']"#).expect("static pattern");
    let mut found = Vec::new();
    for video in video_tag.find_iter(html) {
        if let Some(m) = src_attr.captures(video.as_str()) {
            found.push(m[1].to_string());
        }
    }
    found
}

fn find_regex_candidates(html: &str) -> Vec<String> {
    let mut found = Vec::new();
    for pattern in candidate_patterns() {
        if let Some(m) = pattern.captures(html) {
            let matched = m.get(1).or_else(|| m.get(0)).map(|g| g.as_str().to_string());
            if let Some(url) = matched {
                found.push(url);
            }
        }
    }
    found
}

/// `.mp4` first, then `.m3u8`, then `.webm`, then everything else — the
/// ordering §4.G specifies for candidate preference.
fn sort_candidates(candidates: &mut [String]) {
    fn rank(c: &str) -> u8 {
        let lower = c.to_ascii_lowercase();
        if lower.contains(".mp4") {
            0
        } else if lower.contains(".m3u8") {
            1
        } else if lower.contains(".webm") {
            2
        } else {
            3
        }
    }
    candidates.sort_by_key(|c| rank(c));
}

async fn fetch_hls(stream_url: &url::Url, dest_dir: &Path, cancel: CancellationToken) -> EngineResult<PathBuf> {
    let out = dest_dir.join("stream.mp4");
    let headers = format!("User-Agent: {USER_AGENT}\r\nReferer: {stream_url}\r\n");
    let args = vec![
        "-y".to_string(),
        "-headers".to_string(),
        headers,
        "-i".to_string(),
        stream_url.to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "128k".to_string(),
        "-crf".to_string(),
        "23".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        out.display().to_string(),
    ];
    let output = subprocess::run("ffmpeg", &args, None, cancel, None, |_| {}).await?;
    if !output.success() {
        return Err(EngineError::media_format("ffmpeg", &output.stderr));
    }
    Ok(out)
}

async fn fetch_direct_chunked(client: &reqwest::Client, url: &url::Url, dest_dir: &Path) -> EngineResult<PathBuf> {
    use tokio::io::AsyncWriteExt;

    let resp = client.get(url.clone()).header("User-Agent", USER_AGENT).send().await.map_err(|e| EngineError::transient("direct download", e))?;
    if !resp.status().is_success() {
        return Err(EngineError::transient("direct download", std::io::Error::other(format!("HTTP {}", resp.status()))));
    }

    let file_name = url.path_segments().and_then(|s| s.last()).filter(|s| !s.is_empty()).unwrap_or("video.mp4");
    let dest = dest_dir.join(file_name);
    let mut file = tokio::fs::File::create(&dest).await?;
    let mut stream = resp.bytes_stream();
    use futures::StreamExt;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| EngineError::transient("direct download", e))?;
        file.write_all(&chunk).await?;
    }
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_candidates_prefers_mp4_then_m3u8_then_webm_then_other() {
        let mut candidates = vec!["a.webm".to_string(), "b.other".to_string(), "c.m3u8".to_string(), "d.mp4".to_string()];
        sort_candidates(&mut candidates);
        assert_eq!(candidates, vec!["d.mp4".to_string(), "c.m3u8".to_string(), "a.webm".to_string(), "b.other".to_string()]);
    }

    #[test]
    fn finds_source_inside_a_video_tag() {
        let html = r#"<div><video controls><source src="https://cdn.example.com/v.mp4" type="video/mp4"></video></div>"#;
        let found = find_video_tag_src(html);
        assert_eq!(found, vec!["https://cdn.example.com/v.mp4".to_string()]);
    }

    #[test]
    fn falls_back_to_json_key_regex_when_no_video_tag_present() {
        let html = r#"{"file": "https://cdn.example.com/stream.m3u8"}"#;
        let found = find_regex_candidates(html);
        assert!(found.iter().any(|c| c.contains("stream.m3u8")));
    }
}
