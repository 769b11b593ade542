//! # HTTP Retrieval Utilities
//!
//! Small asynchronous API client around `reqwest` for plain request/response calls:
//! base URL joining, bearer authentication and JSON bodies. Calls are issued once;
//! callers decide what a failure means.

use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde::{de::DeserializeOwned, Serialize};

/// A standardized container for API responses.
///
/// Wraps the deserialized data along with metadata about the HTTP transaction.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The deserialized response body, if the request succeeded.
    pub data: Option<T>,
    /// The raw body returned by the server if the request failed.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The headers returned by the server.
    pub headers: HeaderMap,
}

/// A bearer-authenticated asynchronous HTTP client.
pub struct ApiClient {
    inner: reqwest::Client,
    /// The base URL to which all relative paths are joined.
    base_url: Url,
    /// An optional Bearer token used for authorization.
    auth_token: Option<String>,
}

impl ApiClient {
    /// Creates a new `ApiClient`.
    ///
    /// # Arguments
    /// * `base_url` - Absolute base URL (e.g. "https://api.example.com/2/rules").
    /// * `auth_token` - Optional bearer token.
    ///
    /// # Errors
    /// Fails when `base_url` is not an absolute URL or the client cannot be built.
    pub fn new(base_url: &str, auth_token: Option<String>) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)?;
        let inner = reqwest::Client::builder()
            .user_agent(concat!("lib_stream/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            inner,
            base_url,
            auth_token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs one HTTP request and decodes the answer.
    ///
    /// # Arguments
    /// * `method` - The HTTP verb.
    /// * `path` - Relative path joined to the base URL; `""` targets the base itself.
    /// * `headers` - Optional additional headers.
    /// * `body` - Optional serializable object sent as the JSON body.
    ///
    /// # Errors
    /// URL joining, network failures and undecodable 2xx bodies. Non-2xx answers
    /// are returned as `ApiResponse { success: false, .. }`.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        headers: Option<HeaderMap>,
        body: Option<B>,
    ) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        let full_url = self.base_url.join(path)?;
        log::debug!("{} {}", method, full_url);
        let mut req = self.inner.request(method, full_url);

        if let Some(h) = headers {
            req = req.headers(h);
        }

        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }

        if let Some(b) = body {
            let json_body = serde_json::to_string(&b)?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        let response = req.send().await?;
        let status = response.status();
        let resp_headers = response.headers().clone();

        if status.is_success() {
            let data = response.json::<T>().await?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers: resp_headers,
            })
        } else {
            let error_text = response.text().await.ok();
            log::warn!("Request answered with status {}", status);
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
                headers: resp_headers,
            })
        }
    }
}
