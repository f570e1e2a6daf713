use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};

pub const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub public_base_url: String,
}

/// Process configuration, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: Option<String>,
    /// Snapshot file for the in-memory store (only used without `DATABASE_URL`).
    pub data_dir: Option<PathBuf>,
    pub frontend_url: Option<String>,
    pub s3: S3Config,
    pub report_image_timeout: Option<Duration>,
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let secret = var("JWT_SECRET").context("JWT_SECRET must be set")?;
        if secret.len() < MIN_JWT_SECRET_LEN {
            bail!("JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} characters long");
        }

        let endpoint = var("S3_ENDPOINT").context("S3_ENDPOINT must be set (MinIO / S3 endpoint)")?;
        let bucket = var("S3_BUCKET").unwrap_or_else(|| "job-request-images".into());
        let public_base_url = var("S3_PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("{}/{}", endpoint.trim_end_matches('/'), bucket));
        let s3 = S3Config {
            endpoint,
            bucket,
            region: var("S3_REGION").unwrap_or_else(|| "us-east-1".into()),
            access_key: var("S3_ACCESS_KEY"),
            secret_key: var("S3_SECRET_KEY"),
            public_base_url,
        };

        let report_image_timeout = match var("REPORT_IMAGE_TIMEOUT_SECS") {
            Some(v) => Some(Duration::from_secs(
                v.parse().with_context(|| format!("REPORT_IMAGE_TIMEOUT_SECS is not a number: {v}"))?,
            )),
            None => None,
        };

        Ok(Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".into()),
            database_url: var("DATABASE_URL"),
            data_dir: var("JOBTRACK_DATA_DIR").map(PathBuf::from),
            frontend_url: var("FRONTEND_URL"),
            s3,
            report_image_timeout,
        })
    }
}
