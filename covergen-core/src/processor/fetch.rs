//! Remote image downloads for known cover URLs and CDN guesses.

use std::fmt;
use std::time::Duration;

use futures::future::select_ok;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;
use url::Url;

use crate::config::FetchConfig;
use crate::error::{CoverError, Result};

#[derive(Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub format: image::ImageFormat,
}

impl fmt::Debug for FetchedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchedImage")
            .field("len", &self.bytes.len())
            .field("format", &self.format)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct RemoteImageFetcher {
    http_client: reqwest::Client,
    max_bytes: usize,
}

impl RemoteImageFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.timeout());
        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(Self {
            http_client: builder.build()?,
            max_bytes: config.max_bytes,
        })
    }

    /// Download `url` and make sure the body is an image we can decode.
    pub async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedImage> {
        let mut response = self
            .http_client
            .get(url)
            .timeout(timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CoverError::InvalidImage(format!(
                "GET {url} returned HTTP {}",
                response.status()
            )));
        }

        if let Some(content_type) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            && (content_type.starts_with("text/") || content_type.contains("json"))
        {
            return Err(CoverError::InvalidImage(format!(
                "GET {url} returned {content_type}"
            )));
        }

        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            return Err(CoverError::InvalidImage(format!(
                "GET {url} exceeds {} bytes",
                self.max_bytes
            )));
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() + chunk.len() > self.max_bytes {
                return Err(CoverError::InvalidImage(format!(
                    "GET {url} exceeds {} bytes",
                    self.max_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        if bytes.is_empty() {
            return Err(CoverError::InvalidImage(format!("GET {url} returned an empty body")));
        }

        let format = image::guess_format(&bytes).map_err(|e| {
            CoverError::InvalidImage(format!("GET {url} is not a recognised image: {e}"))
        })?;

        debug!(url, len = bytes.len(), ?format, "fetched remote image");
        Ok(FetchedImage { bytes, format })
    }

    /// Race every candidate; the first valid image wins.
    pub async fn fetch_first(
        &self,
        candidates: &[Url],
        timeout: Duration,
    ) -> Result<(Url, FetchedImage)> {
        if candidates.is_empty() {
            return Err(CoverError::NotFound("no candidate URLs".into()));
        }

        let attempts = candidates.iter().map(|candidate| {
            Box::pin(async move {
                let image = self.fetch(candidate.as_str(), timeout).await?;
                Ok::<_, CoverError>((candidate.clone(), image))
            })
        });

        let (winner, _pending) = select_ok(attempts).await?;
        Ok(winner)
    }
}
