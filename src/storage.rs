use async_trait::async_trait;
use log::{error, info, warn};
use rand::Rng;
use thiserror::Error;

use crate::settings::S3Config;

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("already exists")]
    Exists,
    #[error("other: {0}")]
    Other(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key` and return the public URL.
    async fn put(&self, key: &str, content_type: &str, bytes: Vec<u8>) -> Result<String, BlobStoreError>;
}

/// Object key for an upload: `job-requests/<unix-millis>-<suffix>.<ext>`.
pub fn upload_key(original_name: &str, bytes: &[u8]) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    let millis = chrono::Utc::now().timestamp_millis();
    format!("job-requests/{millis}-{suffix}.{}", extension_for(original_name, bytes))
}

fn extension_for(original_name: &str, bytes: &[u8]) -> String {
    let from_name = original_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));
    match from_name {
        Some(ext) => ext.to_ascii_lowercase(),
        None => infer::get(bytes)
            .map(|t| t.extension().to_string())
            .unwrap_or_else(|| "bin".into()),
    }
}

// ---------------- S3 Implementation (MinIO compatible) ----------------
pub struct S3BlobStore {
    bucket: String,
    client: aws_sdk_s3::Client,
    public_base_url: String,
}

impl S3BlobStore {
    pub async fn new(cfg: &S3Config) -> anyhow::Result<Self> {
        use aws_credential_types::provider::SharedCredentialsProvider;
        use aws_credential_types::Credentials;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(cfg.region.clone()));
        loader = loader.endpoint_url(&cfg.endpoint);
        if let (Some(access), Some(secret)) = (&cfg.access_key, &cfg.secret_key) {
            let creds = Credentials::new(access, secret, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(creds));
        }
        let conf = loader.load().await;
        // path-style addressing: MinIO / local endpoints have no wildcard DNS
        let s3_conf = aws_sdk_s3::config::Builder::from(&conf)
            .force_path_style(true)
            .build();
        let client = aws_sdk_s3::Client::from_conf(s3_conf);
        info!("initialized S3 client for bucket '{}' at {}", cfg.bucket, cfg.endpoint);

        if let Err(e) = client.head_bucket().bucket(&cfg.bucket).send().await {
            warn!("head_bucket failed for '{}' (will attempt create): {e:?}", cfg.bucket);
            client
                .create_bucket()
                .bucket(&cfg.bucket)
                .send()
                .await
                .map_err(|e2| anyhow::anyhow!("failed to ensure bucket '{}': {e2}", cfg.bucket))?;
            info!("created bucket '{}'", cfg.bucket);
        }

        Ok(Self {
            bucket: cfg.bucket.clone(),
            client,
            public_base_url: cfg.public_base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, content_type: &str, bytes: Vec<u8>) -> Result<String, BlobStoreError> {
        use aws_sdk_s3::primitives::ByteStream;
        // no upsert: keys are unique per upload, a hit means a collision
        if self.client.head_object().bucket(&self.bucket).key(key).send().await.is_ok() {
            return Err(BlobStoreError::Exists);
        }
        let put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type);
        if let Err(e) = put.send().await {
            error!("put_object failed key={key} bucket={} err={:?}", self.bucket, e);
            let hint = if e.to_string().contains("AccessDenied") {
                " (check S3_ACCESS_KEY/S3_SECRET_KEY permissions)"
            } else {
                ""
            };
            return Err(BlobStoreError::Other(format!("{e}{hint}")));
        }
        Ok(format!("{}/{}", self.public_base_url, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_keeps_original_extension() {
        let key = upload_key("bracket.PNG", b"anything");
        assert!(key.starts_with("job-requests/"));
        assert!(key.ends_with(".png"));
        let stem = key.trim_start_matches("job-requests/").trim_end_matches(".png");
        let (millis, suffix) = stem.split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), 6);
    }

    #[test]
    fn key_falls_back_to_sniffed_type() {
        let png_magic = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
        assert!(upload_key("scan", &png_magic).ends_with(".png"));
        assert!(upload_key("notes", b"plain words").ends_with(".bin"));
    }

    #[test]
    fn keys_are_unique_per_upload() {
        let a = upload_key("a.jpg", b"");
        let b = upload_key("a.jpg", b"");
        assert_ne!(a, b);
    }
}
