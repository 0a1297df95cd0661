//! Content-addressed media downloads.
//!
//! Files are cached under the preprocessor directory keyed by the CRC32
//! of their URL, so two concurrent consumers of the same source collapse
//! onto one fetch via a per-key lock. A HEAD probe verifies the MIME
//! type before the body is pulled.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;

use super::PreprocessError;

/// MIME types accepted for media sources.
const MIME_WHITELIST: &[&str] = &["video/", "audio/", "application/octet-stream"];

/// Downloader with a shared cache directory and bounded concurrency.
pub struct Downloader {
    client: Client,
    cache_dir: PathBuf,
    locks: DashMap<u32, Arc<tokio::sync::Mutex<()>>>,
    slots: Arc<Semaphore>,
    retries: u32,
    retry_delay: Duration,
}

impl Downloader {
    /// Creates a downloader writing into `cache_dir`.
    pub fn new(cache_dir: PathBuf, slots: usize, retries: u32, retry_delay: Duration) -> Self {
        Self {
            client: Client::new(),
            cache_dir,
            locks: DashMap::new(),
            slots: Arc::new(Semaphore::new(slots.max(1))),
            retries,
            retry_delay,
        }
    }

    /// The cache directory this downloader writes into.
    pub fn cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }

    /// Cache path for a URL: `<crc32 hex><original extension>`.
    pub fn cache_path(&self, url: &str) -> PathBuf {
        let crc = crc32fast::hash(url.as_bytes());
        let ext = url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .and_then(|name| name.rsplit_once('.').map(|(_, e)| e))
            .filter(|e| e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()));
        match ext {
            Some(ext) => self.cache_dir.join(format!("{crc:08x}.{ext}")),
            None => self.cache_dir.join(format!("{crc:08x}")),
        }
    }

    /// Fetches a media URL with MIME verification.
    ///
    /// Returns `Ok(None)` on a 4xx response (the caller decides whether
    /// to skip the media); 5xx and transport failures are retried, then
    /// surfaced as errors.
    pub async fn fetch(&self, url: &str, ignore_cache: bool) -> Result<Option<PathBuf>, PreprocessError> {
        self.fetch_inner(url, ignore_cache, true, None).await
    }

    /// Like [`Downloader::fetch`], with a per-source retry override.
    pub async fn fetch_with_retries(
        &self,
        url: &str,
        ignore_cache: bool,
        retries: Option<u32>,
    ) -> Result<Option<PathBuf>, PreprocessError> {
        self.fetch_inner(url, ignore_cache, true, retries).await
    }

    /// Fetches without MIME verification (vendor scripts, fonts).
    pub async fn fetch_any(
        &self,
        url: &str,
        ignore_cache: bool,
    ) -> Result<Option<PathBuf>, PreprocessError> {
        self.fetch_inner(url, ignore_cache, false, None).await
    }

    async fn fetch_inner(
        &self,
        url: &str,
        ignore_cache: bool,
        check_mime: bool,
        retries: Option<u32>,
    ) -> Result<Option<PathBuf>, PreprocessError> {
        let crc = crc32fast::hash(url.as_bytes());
        let lock = self
            .locks
            .entry(crc)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _key_guard = lock.lock().await;

        let target = self.cache_path(url);
        if !ignore_cache && tokio::fs::try_exists(&target).await.unwrap_or(false) {
            log::debug!("[Download] Cache hit for {}", url);
            return Ok(Some(target));
        }

        let _slot = self
            .slots
            .acquire()
            .await
            .map_err(|_| PreprocessError::Download("download slots closed".to_string()))?;

        let retries = retries.unwrap_or(self.retries);
        let mut last_error = None;
        for attempt in 0..=retries {
            if attempt > 0 {
                log::info!(
                    "[Download] Retrying {} (attempt {}/{})",
                    url,
                    attempt + 1,
                    retries + 1
                );
                tokio::time::sleep(self.retry_delay).await;
            }
            match self.try_download(url, &target, check_mime).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient() => {
                    log::warn!("[Download] {} transient failure: {}", url, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| PreprocessError::Download("download failed".to_string())))
    }

    async fn try_download(
        &self,
        url: &str,
        target: &PathBuf,
        check_mime: bool,
    ) -> Result<Option<PathBuf>, PreprocessError> {
        if check_mime {
            let head = self
                .client
                .head(url)
                .send()
                .await
                .map_err(|e| PreprocessError::Download(format!("HEAD {url} failed: {e}")))?;
            let status = head.status();
            if status.is_client_error() {
                return Ok(None);
            }
            if status.is_server_error() {
                return Err(PreprocessError::Download(format!("HEAD {url} -> {status}")));
            }
            if let Some(mime) = head
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
            {
                if !MIME_WHITELIST.iter().any(|allowed| mime.starts_with(allowed)) {
                    return Err(PreprocessError::UnsupportedMime(mime.to_string()));
                }
            }
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PreprocessError::Download(format!("GET {url} failed: {e}")))?;
        let status = response.status();
        if status.is_client_error() {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(PreprocessError::Download(format!("GET {url} -> {status}")));
        }

        // Stream into a sibling temp file, then rename so a cache entry is
        // only ever observed complete.
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = target.with_extension("part");
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| PreprocessError::Download(format!("stream {url}: {e}")))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&partial, target).await?;

        log::debug!("[Download] Cached {} -> {}", url, target.display());
        Ok(Some(target.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn downloader() -> Downloader {
        Downloader::new(PathBuf::from("tmp/preprocessor"), 4, 1, Duration::from_millis(1))
    }

    #[test]
    fn cache_path_is_crc_keyed_and_keeps_extension() {
        let d = downloader();
        let a = d.cache_path("https://example.com/media/clip.mp4?token=1");
        let b = d.cache_path("https://example.com/media/clip.mp4?token=1");
        let c = d.cache_path("https://example.com/media/clip.mp4?token=2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.extension().unwrap(), "mp4");
    }

    #[test]
    fn cache_path_tolerates_extensionless_urls() {
        let d = downloader();
        let p = d.cache_path("https://example.com/stream");
        assert!(p.extension().is_none());
    }

    #[test]
    fn mime_whitelist_covers_video_audio_octet() {
        assert!(MIME_WHITELIST.iter().any(|m| "video/webm".starts_with(m)));
        assert!(MIME_WHITELIST.iter().any(|m| "audio/mpeg".starts_with(m)));
        assert!(MIME_WHITELIST
            .iter()
            .any(|m| "application/octet-stream".starts_with(m)));
        assert!(!MIME_WHITELIST.iter().any(|m| "text/html".starts_with(m)));
    }
}
