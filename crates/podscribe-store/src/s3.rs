use crate::retry::with_backoff;
use crate::ObjectStore;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use podscribe_core::StoreError;
use std::path::Path;
use tokio::io::AsyncWriteExt;

const MAX_ATTEMPTS: u32 = 5;

/// S3-compatible object store, configured with an explicit region/endpoint
/// rather than ambient AWS profile discovery, mirroring the Python
/// source's `S3_ENDPOINT_URL`/`S3_REGION` env-driven client construction.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub async fn new(bucket: impl Into<String>, region: Option<String>, endpoint_url: Option<String>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let mut config = loader.load().await;
        if let Some(endpoint) = endpoint_url {
            let mut builder = aws_sdk_s3::config::Builder::from(&config);
            builder = builder.endpoint_url(endpoint).force_path_style(true);
            config = builder.build().into();
        }
        Self {
            client: Client::new(&config),
            bucket: bucket.into(),
        }
    }

    fn fatal(&self, key: &str, err: impl std::fmt::Display) -> StoreError {
        StoreError::Failed {
            key: key.to_string(),
            kind: err.to_string(),
        }
    }

    /// Classifies an AWS SDK error into the retryable/permanent split
    /// spec.md:73 requires: a request that never reached the service
    /// (connection timeout, dispatch failure, malformed response) is
    /// network-transient and worth retrying; a request the service actually
    /// answered (`ServiceError` — access-denied, no-such-bucket,
    /// no-such-key, ...) is a persistent failure and must bubble up
    /// immediately, not be retried.
    fn classify_sdk_error<E>(&self, key: &str, err: aws_sdk_s3::error::SdkError<E>) -> StoreError
    where
        aws_sdk_s3::error::SdkError<E>: std::fmt::Display,
    {
        use aws_sdk_s3::error::SdkError;
        let transient = matches!(
            err,
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_)
        );
        if transient {
            StoreError::Timeout { key: key.to_string() }
        } else {
            self.fatal(key, err)
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut request = self.client.list_objects_v2().bucket(&self.bucket);
            if let Some(prefix) = prefix {
                request = request.prefix(prefix);
            }
            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }
            let page = request
                .send()
                .await
                .map_err(|e| self.fatal(prefix.unwrap_or(""), e))?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }
            if page.is_truncated().unwrap_or(false) {
                continuation = page.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }
        Ok(keys)
    }

    async fn head(&self, key: &str) -> Result<bool, StoreError> {
        with_backoff(
            MAX_ATTEMPTS,
            |e: &StoreError| matches!(e, StoreError::Timeout { .. }),
            || async {
                match self.client.head_object().bucket(&self.bucket).key(key).send().await {
                    Ok(_) => Ok(true),
                    Err(err) => {
                        if is_not_found(&err) {
                            Ok(false)
                        } else {
                            Err(self.classify_sdk_error(key, err))
                        }
                    }
                }
            },
        )
        .await
    }

    async fn get(&self, key: &str, local_path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.fatal(key, e))?;
        }
        let part_path = std::path::PathBuf::from(format!("{}.part", local_path.display()));

        with_backoff(
            MAX_ATTEMPTS,
            |e: &StoreError| matches!(e, StoreError::Timeout { .. }),
            || async {
                let mut object = self
                    .client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| self.classify_sdk_error(key, e))?;

                let mut file = tokio::fs::File::create(&part_path)
                    .await
                    .map_err(|e| self.fatal(key, e))?;
                while let Some(chunk) = object.body.try_next().await.map_err(|e| self.fatal(key, e))? {
                    file.write_all(&chunk).await.map_err(|e| self.fatal(key, e))?;
                }
                file.flush().await.map_err(|e| self.fatal(key, e))?;
                Ok(())
            },
        )
        .await?;

        tokio::fs::rename(&part_path, local_path)
            .await
            .map_err(|e| self.fatal(key, e))?;
        Ok(())
    }

    async fn put(&self, key: &str, local_path: &Path) -> Result<(), StoreError> {
        with_backoff(
            MAX_ATTEMPTS,
            |e: &StoreError| matches!(e, StoreError::Timeout { .. }),
            || async {
                let body = aws_sdk_s3::primitives::ByteStream::from_path(local_path)
                    .await
                    .map_err(|e| self.fatal(key, e))?;
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| self.classify_sdk_error(key, e))?;
                Ok(())
            },
        )
        .await
    }
}

fn is_not_found(err: &aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::head_object::HeadObjectError>) -> bool {
    matches!(
        err,
        aws_sdk_s3::error::SdkError::ServiceError(service_err)
            if service_err.err().is_not_found()
    )
}
