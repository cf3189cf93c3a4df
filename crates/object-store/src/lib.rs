//! Versioned blob storage for bot artifacts. [`ObjectStore::fetch_artifact`]
//! is the entry point `bot-loader` uses: S3 first, falling back to a local
//! directory of pre-approved artifacts when the bucket is unreachable or
//! the key isn't there, then verifying the SHA-256 hash either path
//! produced against the `BotFile` row before handing bytes back.

pub mod error;

use std::path::PathBuf;

use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use sha2::{Digest, Sha256};

pub use error::StoreError;

pub struct ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    local_fallback_dir: Option<PathBuf>,
}

impl ObjectStore {
    pub async fn connect(bucket: &str, endpoint: Option<&str>, region: &str, local_fallback_dir: Option<PathBuf>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest()).region(aws_sdk_s3::config::Region::new(region.to_string()));
        if let Some(url) = endpoint {
            loader = loader.endpoint_url(url);
        }
        let shared_config = loader.load().await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&shared_config);
        if endpoint.is_some() {
            // Custom endpoints (MinIO, etc.) need path-style addressing.
            s3_config = s3_config.force_path_style(true);
        }

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config.build()),
            bucket: bucket.to_string(),
            local_fallback_dir,
        }
    }

    pub async fn get_object(&self, key: &str) -> Result<Bytes, StoreError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        let data = output.body.collect().await.map_err(|e| StoreError::Request(e.to_string()))?;
        Ok(data.into_bytes())
    }

    pub async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        Ok(())
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        Ok(output.contents().iter().filter_map(|obj| obj.key().map(str::to_string)).collect())
    }

    /// Fetches `key` from the bucket; on any failure, tries
    /// `local_fallback_dir/key` if one is configured. Either way, the
    /// returned bytes are verified against `expected_sha256_hex` before
    /// being handed back — a stale or corrupted local copy fails loudly
    /// rather than silently loading the wrong bot version.
    pub async fn fetch_artifact(&self, key: &str, expected_sha256_hex: &str) -> Result<Bytes, StoreError> {
        let bytes = match self.get_object(key).await {
            Ok(bytes) => bytes,
            Err(remote_err) => match &self.local_fallback_dir {
                Some(dir) => {
                    let path = dir.join(key);
                    tracing::warn!(key, error = %remote_err, path = %path.display(), "object store fetch failed, trying local fallback");
                    let raw = tokio::fs::read(&path).await.map_err(|source| StoreError::LocalIo {
                        path: path.display().to_string(),
                        source,
                    })?;
                    Bytes::from(raw)
                }
                None => return Err(remote_err),
            },
        };

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let actual = hex::encode(hasher.finalize());

        if actual != expected_sha256_hex.to_lowercase() {
            return Err(StoreError::HashMismatch {
                key: key.to_string(),
                expected: expected_sha256_hex.to_string(),
                actual,
            });
        }

        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use sha2::{Digest, Sha256};

    #[test]
    fn sha256_hex_matches_known_vector() {
        let mut hasher = Sha256::new();
        hasher.update(b"hello world");
        let digest = hex::encode(hasher.finalize());
        assert_eq!(digest, "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9");
    }
}
