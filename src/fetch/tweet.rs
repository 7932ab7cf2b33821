use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, EngineResult};

use super::{reject_if_too_large, FetchStrategy};

/// One media item a tweet-proxy API returns: a video, GIF, or still image,
/// each with a direct URL and optional thumbnail. Each item becomes a
/// separate downloaded output (§4.G "each item becomes a separate output"),
/// unlike every other strategy in this module, which yields at most one
/// file.
#[derive(Debug, Deserialize)]
struct TweetMediaItem {
    url: String,
    #[serde(default)]
    #[allow(dead_code)]
    thumbnail_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TweetProxyResponse {
    #[serde(default)]
    media: Vec<TweetMediaItem>,
}

/// Tweet strategy (§4.G "dedicated adapter"): not part of the yt-dlp →
/// scrape → direct fallback chain — it only runs for URLs the caller has
/// already identified as tweet/x.com links, and calls a proxy API that
/// resolves the tweet's attached media list instead of scraping the page
/// itself, since tweet pages are a JS-rendered SPA that plain HTML scraping
/// can't see into.
pub struct TweetStrategy {
    pub client: reqwest::Client,
    pub proxy_base_url: url::Url,
}

impl FetchStrategy for TweetStrategy {
    async fn fetch(&self, url: &url::Url, dest_dir: &Path, _cancel: CancellationToken) -> EngineResult<Vec<PathBuf>> {
        let mut endpoint = self.proxy_base_url.clone();
        endpoint.query_pairs_mut().append_pair("url", url.as_str());

        let resp = self.client.get(endpoint).send().await.map_err(|e| EngineError::transient("tweet proxy", e))?;
        if !resp.status().is_success() {
            return Ok(vec![]);
        }
        let parsed: TweetProxyResponse = resp.json().await.map_err(|e| EngineError::transient("tweet proxy", e))?;
        if parsed.media.is_empty() {
            return Ok(vec![]);
        }

        tokio::fs::create_dir_all(dest_dir).await?;
        let mut outputs = Vec::with_capacity(parsed.media.len());
        for (index, item) in parsed.media.iter().enumerate() {
            let item_url = url::Url::parse(&item.url).map_err(|e| EngineError::transient("tweet proxy", e))?;
            reject_if_too_large(&self.client, &item_url).await?;
            outputs.push(download_item(&self.client, &item_url, dest_dir, index).await?);
        }
        Ok(outputs)
    }
}

async fn download_item(client: &reqwest::Client, url: &url::Url, dest_dir: &Path, index: usize) -> EngineResult<PathBuf> {
    let resp = client.get(url.clone()).send().await.map_err(|e| EngineError::transient("tweet media download", e))?;
    if !resp.status().is_success() {
        return Err(EngineError::transient("tweet media download", std::io::Error::other(format!("HTTP {}", resp.status()))));
    }
    let ext = url.path().rsplit('.').next().filter(|e| e.len() <= 4).unwrap_or("mp4");
    let dest = dest_dir.join(format!("tweet_{index}.{ext}"));
    let mut file = tokio::fs::File::create(&dest).await?;
    let mut stream = resp.bytes_stream();
    use futures::StreamExt;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| EngineError::transient("tweet media download", e))?;
        file.write_all(&chunk).await?;
    }
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialises_a_mixed_media_list() {
        let body = r#"{"media": [{"url": "https://cdn.example.com/a.mp4"}, {"url": "https://cdn.example.com/b.jpg", "thumbnail_url": null}]}"#;
        let parsed: TweetProxyResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.media.len(), 2);
        assert_eq!(parsed.media[0].url, "https://cdn.example.com/a.mp4");
    }

    #[test]
    fn missing_media_key_defaults_to_empty() {
        let parsed: TweetProxyResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.media.is_empty());
    }
}
