//! Vault API client.
//!
//! Async HTTP client using `reqwest`, speaking the multipart upload subset of
//! the vault REST API.

use std::time::Duration;

use glacierup_transfer::linear_hash;
use glacierup_upload::{
    ArchiveService, CompletedArchive, PartAck, PartUpload, ServiceError, ServiceFuture,
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{
    AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, LOCATION,
};
use tracing::debug;

use crate::GLACIER_API_VERSION;
use crate::types::ErrorBody;

const VERSION_HEADER: &str = "x-amz-glacier-version";
const DESCRIPTION_HEADER: &str = "x-amz-archive-description";
const PART_SIZE_HEADER: &str = "x-amz-part-size";
const UPLOAD_ID_HEADER: &str = "x-amz-multipart-upload-id";
const TREE_HASH_HEADER: &str = "x-amz-sha256-tree-hash";
const CONTENT_SHA256_HEADER: &str = "x-amz-content-sha256";
const ARCHIVE_SIZE_HEADER: &str = "x-amz-archive-size";
const ARCHIVE_ID_HEADER: &str = "x-amz-archive-id";

/// Longest archive description the service stores.
const MAX_DESCRIPTION_LEN: usize = 1024;

/// Characters left unescaped in path segments (RFC 3986 unreserved).
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Errors building a [`VaultClient`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid token")]
    InvalidToken,

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Connection settings for [`VaultClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL, e.g. `https://glacier.us-west-1.amazonaws.com`.
    pub endpoint: String,
    /// Account id path segment; `-` means the caller's own account.
    pub account_id: String,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    /// Per-request timeout. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

/// Vault API client.
pub struct VaultClient {
    http: reqwest::Client,
    endpoint: String,
    account_id: String,
}

impl VaultClient {
    /// Creates a new client.
    pub fn new(config: &ClientConfig) -> Result<Self, Error> {
        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(Error::InvalidEndpoint(config.endpoint.clone()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(VERSION_HEADER),
            HeaderValue::from_static(GLACIER_API_VERSION),
        );
        if let Some(token) = &config.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| Error::InvalidToken)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            endpoint,
            account_id: config.account_id.clone(),
        })
    }

    fn uploads_url(&self, vault: &str) -> String {
        format!(
            "{}/{}/vaults/{}/multipart-uploads",
            self.endpoint,
            encode_segment(&self.account_id),
            encode_segment(vault)
        )
    }

    fn upload_url(&self, vault: &str, upload_id: &str) -> String {
        format!("{}/{}", self.uploads_url(vault), encode_segment(upload_id))
    }

    async fn initiate(
        &self,
        vault: &str,
        description: &str,
        part_size: u64,
    ) -> Result<String, ServiceError> {
        let resp = self
            .http
            .post(self.uploads_url(vault))
            .header(DESCRIPTION_HEADER, archive_description(description))
            .header(PART_SIZE_HEADER, part_size.to_string())
            .send()
            .await
            .map_err(transport)?;
        let resp = check_status(resp).await?;

        let upload_id = required_header(resp.headers(), UPLOAD_ID_HEADER)?;
        debug!(vault, upload_id = %upload_id, "multipart upload created");
        Ok(upload_id)
    }

    async fn put_part(&self, part: PartUpload) -> Result<PartAck, ServiceError> {
        let url = self.upload_url(&part.target_id, &part.session_id);
        let range = part.content_range();
        let PartUpload {
            index,
            tree_hash,
            data,
            ..
        } = part;

        let (data, content_hash) = tokio::task::spawn_blocking(move || {
            let hash = linear_hash(&data);
            (data, hash)
        })
        .await
        .map_err(|e| ServiceError::Transport(format!("hash task failed: {e}")))?;

        let resp = self
            .http
            .put(url)
            .header(CONTENT_RANGE, range)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(TREE_HASH_HEADER, tree_hash.as_str())
            .header(CONTENT_SHA256_HEADER, content_hash)
            .body(data)
            .send()
            .await
            .map_err(transport)?;
        let resp = check_status(resp).await?;

        let checksum = optional_header(resp.headers(), TREE_HASH_HEADER);
        if let Some(acked) = &checksum
            && !acked.eq_ignore_ascii_case(&tree_hash)
        {
            return Err(ServiceError::Protocol(format!(
                "part {index} acknowledged with checksum {acked}, expected {tree_hash}"
            )));
        }
        debug!(part = index, "part accepted");
        Ok(PartAck { checksum })
    }

    async fn complete(
        &self,
        vault: &str,
        upload_id: &str,
        total_size: u64,
        tree_hash: &str,
    ) -> Result<CompletedArchive, ServiceError> {
        let resp = self
            .http
            .post(self.upload_url(vault, upload_id))
            .header(ARCHIVE_SIZE_HEADER, total_size.to_string())
            .header(TREE_HASH_HEADER, tree_hash)
            .send()
            .await
            .map_err(transport)?;
        let resp = check_status(resp).await?;

        let headers = resp.headers();
        Ok(CompletedArchive {
            archive_id: required_header(headers, ARCHIVE_ID_HEADER)?,
            location: optional_header(headers, LOCATION.as_str()).unwrap_or_default(),
            checksum: optional_header(headers, TREE_HASH_HEADER),
        })
    }
}

impl ArchiveService for VaultClient {
    fn initiate_upload<'a>(
        &'a self,
        target_id: &'a str,
        description: &'a str,
        part_size: u64,
    ) -> ServiceFuture<'a, String> {
        Box::pin(self.initiate(target_id, description, part_size))
    }

    fn upload_part(&self, part: PartUpload) -> ServiceFuture<'_, PartAck> {
        Box::pin(self.put_part(part))
    }

    fn complete_upload<'a>(
        &'a self,
        target_id: &'a str,
        session_id: &'a str,
        total_size: u64,
        tree_hash: &'a str,
    ) -> ServiceFuture<'a, CompletedArchive> {
        Box::pin(self.complete(target_id, session_id, total_size, tree_hash))
    }
}

/// Makes `description` acceptable as an archive description header: printable
/// ASCII only, at most 1024 characters. Other characters become `?`.
pub fn archive_description(description: &str) -> String {
    description
        .chars()
        .take(MAX_DESCRIPTION_LEN)
        .map(|c| if (' '..='~').contains(&c) { c } else { '?' })
        .collect()
}

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

fn transport(e: reqwest::Error) -> ServiceError {
    ServiceError::Transport(e.to_string())
}

/// Turns a non-2xx response into [`ServiceError::Rejected`].
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let parsed: ErrorBody = serde_json::from_str(&body).unwrap_or_default();
    let code = if parsed.code.is_empty() {
        status.canonical_reason().unwrap_or("Unknown").to_string()
    } else {
        parsed.code
    };
    let message = if parsed.message.is_empty() {
        body
    } else {
        parsed.message
    };

    Err(ServiceError::Rejected {
        status: status.as_u16(),
        code,
        message,
    })
}

fn optional_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn required_header(headers: &HeaderMap, name: &str) -> Result<String, ServiceError> {
    optional_header(headers, name)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ServiceError::Protocol(format!("response missing {name} header")))
}
