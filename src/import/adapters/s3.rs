//! S3 object storage adapter
//!
//! Works against AWS S3 or any S3-compatible endpoint (MinIO etc., hence
//! path-style addressing).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use s3::creds::Credentials;
use s3::{Bucket, Region};

use crate::import::adapters::traits::ObjectStorage;

pub struct S3ObjectStorage {
    bucket: Bucket,
}

impl S3ObjectStorage {
    pub fn new(
        bucket_name: &str,
        region: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self> {
        let region = Region::Custom {
            region: region.to_owned(),
            endpoint: endpoint.to_owned(),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .context("invalid object store credentials")?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .context("failed to configure object store bucket")?
            .with_path_style();

        Ok(S3ObjectStorage { bucket })
    }
}

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
    async fn presign_put(&self, key: &str, expires_in: u32) -> Result<String> {
        self.bucket
            .presign_put(key, expires_in, None)
            .await
            .with_context(|| format!("failed to presign upload grant for {}", key))
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let response = self
            .bucket
            .get_object(key)
            .await
            .with_context(|| format!("failed to fetch object {}", key))?;

        match response.status_code() {
            200 => Ok(Some(response.bytes().clone())),
            404 => Ok(None),
            code => bail!("object fetch for {} returned status {}", key, code),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let response = self
            .bucket
            .delete_object(key)
            .await
            .with_context(|| format!("failed to delete object {}", key))?;

        match response.status_code() {
            200 | 204 | 404 => Ok(()),
            code => bail!("object delete for {} returned status {}", key, code),
        }
    }
}
