//! The server API the client depends on.
//!
//! [`ApiClient`] is the seam between the push/clone logic and the wire;
//! [`HttpApiClient`] is the real JSON-over-HTTP implementation with
//! bearer-token auth and per-request timeouts.

use std::io::Read;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use varasto_types::{BlobRef, Collection, CollectionChangeset, DigestVerifyingReader};

use crate::config::ClientConfig;
use crate::{ClientError, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Reading a chunk back can hit cold storage.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(15);
/// 10 seconds can be too fast waiting for an HDD to spin up plus the blob
/// write itself.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Cheap existence probe for one blob.
    async fn blob_exists(&self, blob_ref: &BlobRef) -> Result<bool>;

    /// Uploads one chunk. The bytes are digest-verified against the ref
    /// before they go on the wire.
    async fn upload_blob(
        &self,
        blob_ref: &BlobRef,
        collection_id: &str,
        chunk: Vec<u8>,
    ) -> Result<()>;

    /// Downloads one chunk's plaintext, digest-verified on arrival.
    async fn download_blob(&self, blob_ref: &BlobRef) -> Result<Vec<u8>>;

    async fn get_collection(&self, id: &str) -> Result<Collection>;

    /// Submits the changeset; the response is the updated collection with
    /// its advanced head.
    async fn submit_changeset(
        &self,
        collection_id: &str,
        changeset: &CollectionChangeset,
    ) -> Result<Collection>;
}

pub struct HttpApiClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: String,
}

impl HttpApiClient {
    pub fn new(config: &ClientConfig) -> Result<HttpApiClient> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()?;
        Ok(HttpApiClient {
            http,
            base_url: config.server_addr.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }
}

fn unexpected(status: StatusCode, url: &str) -> ClientError {
    ClientError::UnexpectedStatus {
        status: status.as_u16(),
        url: url.to_string(),
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn blob_exists(&self, blob_ref: &BlobRef) -> Result<bool> {
        let url = self.api_url(&format!("/blobs/{}", blob_ref.as_hex()));
        let response = self
            .http
            .head(&url)
            .bearer_auth(&self.auth_token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(unexpected(status, &url)),
        }
    }

    async fn upload_blob(
        &self,
        blob_ref: &BlobRef,
        collection_id: &str,
        chunk: Vec<u8>,
    ) -> Result<()> {
        // tamper check on the way out: the body is exactly what the
        // verifier read
        let mut verified = Vec::with_capacity(chunk.len());
        DigestVerifyingReader::new(&chunk[..], *blob_ref).read_to_end(&mut verified)?;

        let url = self.api_url(&format!(
            "/blobs/{}?collection={}",
            blob_ref.as_hex(),
            collection_id
        ));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.auth_token)
            .timeout(UPLOAD_TIMEOUT)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(verified)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(unexpected(status, &url));
        }
        debug!(blob = %blob_ref, bytes = chunk.len(), "chunk uploaded");
        Ok(())
    }

    async fn download_blob(&self, blob_ref: &BlobRef) -> Result<Vec<u8>> {
        let url = self.api_url(&format!("/blobs/{}", blob_ref.as_hex()));
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.auth_token)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(unexpected(status, &url));
        }

        let body = response.bytes().await?;
        let mut plaintext = Vec::with_capacity(body.len());
        DigestVerifyingReader::new(&body[..], *blob_ref).read_to_end(&mut plaintext)?;
        Ok(plaintext)
    }

    async fn get_collection(&self, id: &str) -> Result<Collection> {
        let url = self.api_url(&format!("/collections/{}", id));
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.auth_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(unexpected(status, &url));
        }
        Ok(response.json().await?)
    }

    async fn submit_changeset(
        &self,
        collection_id: &str,
        changeset: &CollectionChangeset,
    ) -> Result<Collection> {
        let url = self.api_url(&format!("/collections/{}/changesets", collection_id));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.auth_token)
            .json(changeset)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(unexpected(status, &url));
        }
        Ok(response.json().await?)
    }
}
