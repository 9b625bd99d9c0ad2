//! HTTP implementation of [`UploadSession`].
//!
//! Async client using `reqwest`, with optional Bearer token authentication.

use std::time::Duration;

use bytes::Bytes;
use filedrop_protocol::constants::{
    CHUNK_CONTENT_TYPE, INIT_PATH, chunk_path, merge_path, status_path,
};
use filedrop_protocol::{
    ChunkAck, FileDescriptor, InitUploadRequest, InitUploadResponse, MergeRequest, StatusResponse,
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::RequestBuilder;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::error::UploadError;
use crate::session::{SessionFuture, UploadSession};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything but RFC 3986 unreserved characters is escaped in path segments.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Talks to the storage service over HTTP.
///
/// Clones share one connection pool.
#[derive(Debug, Clone)]
pub struct HttpSession {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSession {
    /// Creates a session for the service at `base_url`.
    ///
    /// `token`, when given, is sent as a Bearer token on every request.
    pub fn new(base_url: impl Into<String>, token: Option<&str>) -> Result<Self, UploadError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| UploadError::Config("invalid access token".into()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| UploadError::Config(e.to_string()))?;

        Ok(Self::with_client(http, base_url))
    }

    /// Creates a session on an existing client.
    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends a request and decodes its JSON response.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, UploadError> {
        let resp = request.send().await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(UploadError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.bytes().await?;
        trace!(status = status.as_u16(), len = body.len(), "response received");
        Ok(serde_json::from_slice(&body)?)
    }
}

fn encode(upload_id: &str) -> String {
    utf8_percent_encode(upload_id, PATH_SEGMENT).to_string()
}

impl UploadSession for HttpSession {
    fn init<'a>(&'a self, request: &'a InitUploadRequest) -> SessionFuture<'a, InitUploadResponse> {
        Box::pin(async move {
            self.send(self.http.post(self.url(INIT_PATH)).json(request))
                .await
        })
    }

    fn put_chunk<'a>(
        &'a self,
        upload_id: &'a str,
        index: u32,
        data: Bytes,
    ) -> SessionFuture<'a, ChunkAck> {
        Box::pin(async move {
            let url = self.url(&chunk_path(&encode(upload_id), index));
            let request = self
                .http
                .put(url)
                .header(CONTENT_TYPE, CHUNK_CONTENT_TYPE)
                .body(data);
            self.send(request).await
        })
    }

    fn merge<'a>(&'a self, request: &'a MergeRequest) -> SessionFuture<'a, FileDescriptor> {
        Box::pin(async move {
            let url = self.url(&merge_path(&encode(&request.upload_id)));
            self.send(self.http.post(url).json(request)).await
        })
    }

    fn status<'a>(&'a self, upload_id: &'a str) -> SessionFuture<'a, StatusResponse> {
        Box::pin(async move {
            let url = self.url(&status_path(&encode(upload_id)));
            self.send(self.http.get(url)).await
        })
    }
}
