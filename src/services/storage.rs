use s3::creds::Credentials;
use s3::{Bucket, Region};

use crate::config::AppConfig;

/// Connection settings for an S3-compatible bucket.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    /// Endpoint override for R2, B2, MinIO and friends.
    pub endpoint: Option<String>,
    pub region: String,
}

impl StorageSettings {
    /// Settings from config, or `None` when any of access key, secret key or
    /// bucket is missing.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let non_empty = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);

        Some(Self {
            access_key: non_empty(&config.s3_access_key_id)?,
            secret_key: non_empty(&config.s3_secret_access_key)?,
            bucket: non_empty(&config.s3_bucket_name)?,
            endpoint: non_empty(&config.s3_endpoint_url),
            region: config.s3_region.clone(),
        })
    }
}

/// Client for the bucket that receives generated assets.
pub struct ObjectStore {
    bucket: Box<Bucket>,
    bucket_name: String,
    endpoint: Option<String>,
    region: String,
}

impl ObjectStore {
    pub fn new(settings: &StorageSettings) -> Result<Self, StorageError> {
        let region = match &settings.endpoint {
            Some(endpoint) => Region::Custom {
                region: settings.region.clone(),
                endpoint: endpoint.trim_end_matches('/').to_string(),
            },
            None => settings
                .region
                .parse::<Region>()
                .map_err(|e| StorageError::Config(e.to_string()))?,
        };

        let credentials = Credentials::new(
            Some(&settings.access_key),
            Some(&settings.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::Config(e.to_string()))?;

        let mut bucket = Bucket::new(&settings.bucket, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;
        if settings.endpoint.is_some() {
            bucket = bucket.with_path_style();
        }

        Ok(Self {
            bucket,
            bucket_name: settings.bucket.clone(),
            endpoint: settings.endpoint.clone(),
            region: settings.region.clone(),
        })
    }

    /// Upload bytes and return the object's public URL.
    pub async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<String, StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(StorageError::S3)?;

        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(StorageError::Status(status));
        }

        Ok(self.public_url(key))
    }

    /// `{endpoint}/{bucket}/{key}` with an endpoint override, otherwise the
    /// virtual-hosted AWS form.
    pub fn public_url(&self, key: &str) -> String {
        object_url(self.endpoint.as_deref(), &self.bucket_name, &self.region, key)
    }
}

fn object_url(endpoint: Option<&str>, bucket: &str, region: &str, key: &str) -> String {
    match endpoint {
        Some(endpoint) => format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key),
        None => format!("https://{bucket}.s3.{region}.amazonaws.com/{key}"),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("S3 upload returned HTTP {0}")]
    Status(u16),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
