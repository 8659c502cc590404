use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{header, Client};
use std::time::Duration;
use thiserror::Error;
use url::Url;

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Response {
    pub code: u16,
    pub body: String,
}

#[derive(Debug, Error)]
#[error("fetch {url} failed: {message}")]
pub struct FetchError {
    pub url: String,
    pub message: String,
}

/// Source of page bodies. The HTTP implementation is [`HttpFetcher`].
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Any HTTP response, including non-2xx, is `Ok`; only transport failures are `Err`.
    async fn fetch(&self, url: &Url) -> Result<Response, FetchError>;
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub user_agent: String,
    pub referrer: Option<String>,
    pub timeout: Duration,
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(settings: &FetchSettings) -> Result<Self, FetchError> {
        let mut headers = header::HeaderMap::new();
        if let Some(referrer) = &settings.referrer {
            let value = header::HeaderValue::from_str(referrer).map_err(|e| FetchError {
                url: referrer.clone(),
                message: format!("invalid referrer header: {e}"),
            })?;
            headers.insert(header::REFERER, value);
        }
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(settings.timeout)
            .build()
            .map_err(|e| FetchError { url: String::new(), message: e.to_string() })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Response, FetchError> {
        let failed = |e: reqwest::Error| FetchError { url: url.to_string(), message: e.to_string() };
        let resp = self.client.get(url.clone()).send().await.map_err(failed)?;
        let code = resp.status().as_u16();
        let is_html = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .map_or(true, |v| v.starts_with("text/html") || v.starts_with("text/plain"));
        if !is_html {
            return Ok(Response { code, body: String::new() });
        }
        if let Some(size) = resp.content_length().filter(|n| *n > MAX_BODY_BYTES as u64) {
            tracing::debug!(%url, size, "body too large, skipped");
            return Ok(Response { code, body: String::new() });
        }
        match read_capped(resp.bytes_stream(), MAX_BODY_BYTES).await.map_err(failed)? {
            Some(bytes) => Ok(Response { code, body: String::from_utf8_lossy(&bytes).into_owned() }),
            None => {
                tracing::debug!(%url, "body too large, dropped");
                Ok(Response { code, body: String::new() })
            }
        }
    }
}

/// Collects a chunked body, giving up with `None` once it grows past `limit`.
async fn read_capped<S, B, E>(chunks: S, limit: usize) -> Result<Option<Vec<u8>>, E>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    let mut chunks = std::pin::pin!(chunks);
    let mut body = Vec::new();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        if body.len() + chunk.as_ref().len() > limit {
            return Ok(None);
        }
        body.extend_from_slice(chunk.as_ref());
    }
    Ok(Some(body))
}
