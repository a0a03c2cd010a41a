// bucketrestore/src/source/s3.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3 as s3;
use s3::config::Region;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt; // For write_all

use super::object_store::{ObjectStore, ObjectSummary};
use crate::config::ObjectStoreConfig;

const FALLBACK_REGION: &str = "us-east-1";

/// Parses an S3 URI (s3://bucket/prefix) into bucket and optional prefix.
pub fn parse_s3_uri(s3_uri: &str) -> Result<(String, Option<String>)> {
    let uri = url::Url::parse(s3_uri)
        .with_context(|| format!("Invalid S3 URI format: {}", s3_uri))?;
    if uri.scheme() != "s3" {
        return Err(anyhow::anyhow!("S3 URI must start with s3://"));
    }
    let bucket = uri
        .host_str()
        .filter(|h| !h.is_empty())
        .context("S3 URI missing bucket name")?
        .to_string();
    let prefix = uri.path().trim_matches('/').to_string();
    Ok((bucket, (!prefix.is_empty()).then_some(prefix)))
}

/// S3 (or S3-compatible) object store client bound to one bucket.
pub struct S3ObjectStore {
    client: s3::Client,
    bucket: String,
    endpoint: Option<String>,
}

impl S3ObjectStore {
    /// Builds the client and confirms the bucket is reachable, so that a bad
    /// endpoint or missing permission fails the run before any bucket work.
    pub async fn connect(config: &ObjectStoreConfig) -> Result<Self> {
        if config.bucket_name.is_empty() {
            anyhow::bail!("Object store bucket name is empty");
        }

        let region = RegionProviderChain::first_try(config.region.clone().map(Region::new))
            .or_default_provider()
            .or_else(Region::new(FALLBACK_REGION));

        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest()).region(region);
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        if let Some(credentials) = &config.credentials {
            loader = loader.credentials_provider(s3::config::Credentials::new(
                &credentials.access_key_id,
                &credentials.secret_access_key,
                None, // session_token
                None, // expiry
                "Static", // provider_name
            ));
        }
        let sdk_config = loader.load().await;

        // Custom endpoints (LocalStack, MinIO, Spaces) generally need
        // path-style addressing.
        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint_url.is_some())
            .build();
        let client = s3::Client::from_conf(s3_config);

        client
            .head_bucket()
            .bucket(&config.bucket_name)
            .send()
            .await
            .with_context(|| {
                format!(
                    "Could not access bucket '{}' (endpoint: {})",
                    config.bucket_name,
                    config.endpoint_url.as_deref().unwrap_or("default AWS")
                )
            })?;
        tracing::info!(bucket = %config.bucket_name, "Object store bucket is accessible");

        Ok(S3ObjectStore {
            client,
            bucket: config.bucket_name.clone(),
            endpoint: config.endpoint_url.clone(),
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn describe(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("s3://{} ({})", self.bucket, endpoint),
            None => format!("s3://{}", self.bucket),
        }
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectSummary>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut objects = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.with_context(|| format!("Failed to list s3://{}/{}", self.bucket, prefix))?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    objects.push(ObjectSummary {
                        key: key.to_string(),
                        size: object.size().unwrap_or(0).max(0) as u64,
                    });
                }
            }
        }
        tracing::debug!(prefix = %prefix, count = objects.len(), "Listed objects");
        Ok(objects)
    }

    async fn download_object(&self, key: &str, destination_path: &Path) -> Result<u64> {
        let mut object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to get object s3://{}/{}", self.bucket, key))?;

        let mut output_file = File::create(destination_path)
            .await
            .with_context(|| format!("Failed to create destination file: {}", destination_path.display()))?;

        let mut total_bytes_downloaded = 0u64;
        while let Some(bytes_chunk) = object
            .body
            .try_next()
            .await
            .with_context(|| format!("Failed to read body of s3://{}/{}", self.bucket, key))?
        {
            output_file
                .write_all(&bytes_chunk)
                .await
                .with_context(|| format!("Failed to write to destination file: {}", destination_path.display()))?;
            total_bytes_downloaded += bytes_chunk.len() as u64;
        }
        output_file
            .flush()
            .await
            .with_context(|| format!("Failed to flush destination file: {}", destination_path.display()))?;

        tracing::debug!(key = %key, bytes = total_bytes_downloaded, "Downloaded object");
        Ok(total_bytes_downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_uri_with_prefix() -> anyhow::Result<()> {
        let (bucket, prefix) = parse_s3_uri("s3://frozen-archive/indexes/wineventlog/")?;
        assert_eq!(bucket, "frozen-archive");
        assert_eq!(prefix.as_deref(), Some("indexes/wineventlog"));
        Ok(())
    }

    #[test]
    fn test_parse_s3_uri_bucket_only() -> anyhow::Result<()> {
        let (bucket, prefix) = parse_s3_uri("s3://frozen-archive")?;
        assert_eq!(bucket, "frozen-archive");
        assert_eq!(prefix, None);
        Ok(())
    }

    #[test]
    fn test_parse_s3_uri_rejects_other_schemes() {
        assert!(parse_s3_uri("https://frozen-archive/x").is_err());
        assert!(parse_s3_uri("not a uri").is_err());
    }
}
