//! reqwest-backed network access.

use crate::assets::{AssetFetcher, Credentials, FetchRequest, FetchedAsset, RequestMode};
use crate::page::LivePage;
use crate::{EngineConfig, Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE, COOKIE, ORIGIN, SET_COOKIE};
use reqwest::Client;
use std::time::Duration;

/// Fetches pages and subresources over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (k, v) in &config.headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| Error::ConfigError(format!("Invalid header name {}: {}", k, e)))?;
            let value = HeaderValue::from_str(v)
                .map_err(|e| Error::ConfigError(format!("Invalid value for header {}: {}", k, e)))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.fetch_timeout_ms))
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| Error::NetworkError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Load a top-level document into a `LivePage`.
    ///
    /// Cookies set by the response are kept on the page and sent with its
    /// same-origin subresource loads.
    pub async fn load_page(&self, url: &str) -> Result<LivePage> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::LoadError(format!("Failed to fetch {}: {}", url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::LoadError(format!("{} returned {}", url, status)));
        }

        // redirects may have moved us
        let final_url = resp.url().to_string();
        let cookies = cookie_header(resp.headers());

        let body = resp
            .text()
            .await
            .map_err(|e| Error::LoadError(format!("Failed to read response body: {}", e)))?;

        let mut page = LivePage::new(&final_url, body)?;
        if let Some(cookies) = cookies {
            page = page.with_cookies(&cookies);
        }
        debug!("loaded {} ({} bytes of markup)", final_url, page.markup().len());
        Ok(page)
    }

    async fn fetch_asset(&self, request: FetchRequest) -> Result<FetchedAsset> {
        let mut builder = self.client.get(request.url.clone());
        if request.mode == RequestMode::Cors {
            builder = builder.header(ORIGIN, request.initiator_origin.as_str());
        }
        if request.credentials == Credentials::SameOrigin && request.is_same_origin() {
            if let Some(cookies) = &request.cookie_header {
                builder = builder.header(COOKIE, cookies.as_str());
            }
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| Error::NetworkError(format!("Failed to fetch {}: {}", request.url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::NetworkError(format!("{} returned {}", request.url, status)));
        }

        if request.mode == RequestMode::Cors && !request.is_same_origin() {
            let allowed = resp
                .headers()
                .get(ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string());
            match allowed.as_deref() {
                Some("*") => {}
                Some(o) if o == request.initiator_origin => {}
                other => {
                    warn!("CORS check failed for {} (allow-origin {:?})", request.url, other);
                    return Err(Error::NetworkError(format!(
                        "CORS request to {} not allowed for origin {}",
                        request.url, request.initiator_origin
                    )));
                }
            }
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::NetworkError(format!("Failed to read body of {}: {}", request.url, e)))?;

        Ok(FetchedAsset {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

impl AssetFetcher for HttpFetcher {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, Result<FetchedAsset>> {
        self.fetch_asset(request).boxed()
    }
}

/// Fold `Set-Cookie` headers into a `Cookie` request header value.
fn cookie_header(headers: &HeaderMap) -> Option<String> {
    let pairs: Vec<String> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(|p| p.trim().to_string())
        .filter(|p| p.contains('='))
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_set_cookie_headers() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("sid=abc; Path=/; HttpOnly"));
        headers.append(SET_COOKIE, HeaderValue::from_static("theme=dark"));
        assert_eq!(cookie_header(&headers).as_deref(), Some("sid=abc; theme=dark"));
        assert_eq!(cookie_header(&HeaderMap::new()), None);
    }

    #[test]
    fn rejects_bad_header_config() {
        let mut cfg = EngineConfig::default();
        cfg.headers.insert("bad header".into(), "x".into());
        assert!(matches!(HttpFetcher::new(&cfg), Err(Error::ConfigError(_))));
    }
}
