//! S3-compatible blob store (AWS, MinIO)
//!
//! Containers map to buckets; keys map to object keys unchanged.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    types::{BucketLocationConstraint, CreateBucketConfiguration},
    Client,
};
use tracing::{debug, info, instrument};

use super::{config::S3Config, display_location, BlobReader, BlobStore};
use crate::error::{IngestError, IngestResult};

#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    region: String,
}

impl S3BlobStore {
    pub fn new(config: &S3Config) -> Self {
        debug!(endpoint = ?config.endpoint, region = %config.region, "Initializing S3 client");

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "chunkflow-storage",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
            region: config.region.clone(),
        }
    }

    async fn create_bucket(&self, bucket: &str) -> IngestResult<()> {
        let mut request = self.client.create_bucket().bucket(bucket);

        // us-east-1 rejects an explicit location constraint
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                info!(bucket, "Created bucket");
                Ok(())
            },
            Err(e) => {
                let already_there = e.as_service_error().is_some_and(|se| {
                    se.is_bucket_already_owned_by_you() || se.is_bucket_already_exists()
                });
                if already_there {
                    Ok(())
                } else {
                    Err(IngestError::write(bucket, DisplayErrorContext(&e)))
                }
            },
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn backend(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self))]
    async fn ensure_container(&self, container: &str) -> IngestResult<()> {
        if self.client.head_bucket().bucket(container).send().await.is_ok() {
            return Ok(());
        }
        self.create_bucket(container).await
    }

    #[instrument(skip(self, data), fields(bytes = data.len()))]
    async fn put(&self, container: &str, key: &str, data: Vec<u8>) -> IngestResult<()> {
        debug!("Uploading to s3://{}/{}", container, key);

        self.client
            .put_object()
            .bucket(container)
            .key(key)
            .content_type("application/json")
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| IngestError::write(display_location(container, key), DisplayErrorContext(&e)))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, container: &str, key: &str) -> IngestResult<Vec<u8>> {
        let reader = self.open_object(container, key).await?;
        let data = reader
            .collect()
            .await
            .map_err(|e| IngestError::read(display_location(container, key), e))?
            .into_bytes()
            .to_vec();

        debug!("Downloaded {} bytes from s3://{}/{}", data.len(), container, key);
        Ok(data)
    }

    async fn open_read(&self, container: &str, key: &str) -> IngestResult<BlobReader> {
        let body = self.open_object(container, key).await?;
        Ok(Box::pin(body.into_async_read()))
    }
}

impl S3BlobStore {
    async fn open_object(&self, container: &str, key: &str) -> IngestResult<ByteStream> {
        let location = display_location(container, key);
        match self.client.get_object().bucket(container).key(key).send().await {
            Ok(response) => Ok(response.body),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                Err(IngestError::NotFound { location })
            },
            Err(e) => Err(IngestError::read(location, DisplayErrorContext(&e))),
        }
    }
}
