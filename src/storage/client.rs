//! Object store client factory and operations

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::crd::StorageLocation;
use crate::error::{Error, Result};

/// Workshop default credentials, used when the spec leaves either field empty
const DEFAULT_ACCESS_KEY: &str = "minioadmin";
const DEFAULT_SECRET_KEY: &str = "minioadmin123";

/// Region placeholder; MinIO and friends ignore it but the SDK requires one
const DEFAULT_REGION: &str = "us-east-1";

/// Narrow object-store surface consumed by the reconcilers
pub struct StoreClient {
    client: Client,
    bucket: String,
}

/// Build a store client for a spec-carried location.
///
/// The endpoint scheme is stripped and plaintext transport is used; the
/// workshop target runs against a local MinIO without TLS.
pub fn client_for(location: &StorageLocation) -> StoreClient {
    let endpoint = location
        .endpoint
        .strip_prefix("https://")
        .or_else(|| location.endpoint.strip_prefix("http://"))
        .unwrap_or(&location.endpoint);

    let (access_key, secret_key) =
        if location.access_key.is_empty() || location.secret_key.is_empty() {
            (DEFAULT_ACCESS_KEY.to_string(), DEFAULT_SECRET_KEY.to_string())
        } else {
            (location.access_key.clone(), location.secret_key.clone())
        };

    let credentials = Credentials::new(access_key, secret_key, None, None, "backup-spec");

    let config = aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(DEFAULT_REGION))
        .endpoint_url(format!("http://{}", endpoint))
        .credentials_provider(credentials)
        .force_path_style(true)
        .build();

    StoreClient {
        client: Client::from_conf(config),
        bucket: location.bucket.clone(),
    }
}

impl StoreClient {
    /// Whether the bucket is reachable and exists
    pub async fn bucket_exists(&self) -> bool {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok()
    }

    /// Create the bucket if it does not exist yet
    pub async fn ensure_bucket(&self) -> Result<()> {
        if self.bucket_exists().await {
            return Ok(());
        }

        match self.client.create_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                info!(bucket = %self.bucket, "Created bucket");
                Ok(())
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_bucket_already_owned_by_you() {
                    Ok(())
                } else {
                    Err(Error::storage(format!(
                        "failed to create bucket '{}': {}",
                        self.bucket, service_err
                    )))
                }
            }
        }
    }

    /// Write an object as JSON
    pub async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<()> {
        debug!(bucket = %self.bucket, key = %key, bytes = body.len(), "Writing object");
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| Error::storage(format!("failed to write '{}': {}", key, e)))?;
        Ok(())
    }

    /// Read an object's full contents
    pub async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Error::storage(format!("failed to read '{}': {}", key, e)))?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| Error::storage(format!("failed to read '{}': {}", key, e)))?;

        Ok(data.into_bytes().to_vec())
    }

    /// List every key under a prefix
    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| Error::storage(format!("failed to list '{}': {}", prefix, e)))?;

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(String::from)),
            );

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(keys)
    }
}
