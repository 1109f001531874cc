use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt, TryStreamExt};
use http::{StatusCode, Uri};
use serde::Deserialize;

pub(crate) mod logging;
use super::errors::{Error, Result};
use super::s3::logging::LoggingInterceptor;
use super::{Key, ObjectBody, ObjectStore, ObjectWriter};

/// S3 rejects multipart parts smaller than this, except for the last one.
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

fn default_part_size() -> usize {
    8 * 1024 * 1024
}

fn default_scheme() -> String {
    "https".to_string()
}

#[derive(Clone, Deserialize)]
pub struct S3Config {
    secret_key: String,
    access_key: String,
    hostname: String,
    bucket_name: String,
    region: String,
    #[serde(default = "default_scheme")]
    scheme: String,
    /// Bytes buffered per multipart upload part.
    #[serde(default = "default_part_size")]
    part_size: usize,
}

impl S3Config {
    pub async fn new_objects(&self) -> Result<S3> {
        let scp = SharedCredentialsProvider::new(
            Credentials::new(
                self.access_key.clone(),
                self.secret_key.clone(),
                None,
                None,
                "depot",
            )
            .provide_credentials()
            .await?,
        );

        let uri = Uri::builder()
            .scheme(self.scheme.as_str())
            .authority(self.hostname.as_str())
            .path_and_query("/")
            .build()?;

        let sdk_config = aws_config::load_from_env().await;

        let config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .region(Region::new(self.region.clone()))
            .credentials_provider(scp)
            .endpoint_url(uri.to_string())
            .force_path_style(true)
            .interceptor(LoggingInterceptor)
            .build();

        let s3_client = aws_sdk_s3::Client::from_conf(config);

        Ok(S3 {
            bucket_name: self.bucket_name.clone(),
            client: s3_client,
            part_size: self.part_size.max(MIN_PART_SIZE),
        })
    }
}

#[derive(Clone)]
pub struct S3 {
    bucket_name: String,
    client: Client,
    part_size: usize,
}

#[async_trait]
impl ObjectStore for S3 {
    async fn get(&self, key: &Key) -> Result<ObjectBody> {
        let get_object_output = match self
            .client
            .get_object()
            .key(String::from(key))
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            Err(SdkError::ServiceError(e)) if e.err().is_no_such_key() => {
                return Err(Error::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
            Ok(output) => output,
        };

        let body = stream::try_unfold(get_object_output.body, |mut body| async move {
            match body.try_next().await? {
                Some(bytes) => Ok::<_, Error>(Some((bytes, body))),
                None => Ok(None),
            }
        });
        Ok(body.boxed())
    }

    async fn exists(&self, key: &Key) -> Result<bool> {
        match self
            .client
            .head_object()
            .key(String::from(key))
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            Err(SdkError::ServiceError(e)) => {
                let http = e.raw();
                match http.status() {
                    StatusCode::NOT_FOUND => Ok(false),
                    _ => Err(SdkError::ServiceError(e).into()),
                }
            }
            Err(e) => Err(Error::AWSSDKHeadObjectError(e)),
            Ok(_) => Ok(true),
        }
    }

    async fn put(&self, key: &Key, bytes: Bytes) -> Result<()> {
        let content_length = bytes.len() as i64;
        let _put_object_output = self
            .client
            .put_object()
            .key(String::from(key))
            .body(ByteStream::from(bytes))
            .content_length(content_length)
            .bucket(&self.bucket_name)
            .send()
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        self.client
            .delete_object()
            .key(String::from(key))
            .bucket(&self.bucket_name)
            .send()
            .await?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &Key) -> Result<()> {
        let prefix = format!("{prefix}/");
        let mut continuation_token: Option<String> = None;
        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket_name)
                .prefix(&prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await?;

            for object in output.contents().unwrap_or_default() {
                if let Some(key) = object.key() {
                    self.client
                        .delete_object()
                        .key(key)
                        .bucket(&self.bucket_name)
                        .send()
                        .await?;
                }
            }

            match output.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(())
    }

    async fn writer(&self, key: &Key) -> Result<Box<dyn ObjectWriter>> {
        Ok(Box::new(S3Writer {
            client: self.client.clone(),
            bucket_name: self.bucket_name.clone(),
            key: String::from(key),
            part_size: self.part_size,
            buf: BytesMut::new(),
            upload_id: None,
            parts: Vec::new(),
            finished: false,
        }))
    }
}

/// Buffers writes into `part_size` multipart upload parts.
///
/// Objects that never fill a single part are sent with one `PutObject` on commit.
struct S3Writer {
    client: Client,
    bucket_name: String,
    key: String,
    part_size: usize,
    buf: BytesMut,
    upload_id: Option<String>,
    parts: Vec<CompletedPart>,
    finished: bool,
}

impl S3Writer {
    async fn initiate(&mut self) -> Result<String> {
        if let Some(upload_id) = &self.upload_id {
            return Ok(upload_id.clone());
        }
        let create_multipart_upload_output = self
            .client
            .create_multipart_upload()
            .key(&self.key)
            .bucket(&self.bucket_name)
            .send()
            .await?;

        let upload_id = create_multipart_upload_output.upload_id.ok_or(
            Error::ObjectsFailedToInitiateChunkedUpload("missing upload id"),
        )?;
        self.upload_id = Some(upload_id.clone());
        Ok(upload_id)
    }

    async fn upload_part(&mut self, bytes: Bytes) -> Result<()> {
        let upload_id = self.initiate().await?;
        let part_number = self.parts.len() as i32 + 1;
        let content_length = bytes.len() as i64;
        let upload_part_output = self
            .client
            .upload_part()
            .upload_id(upload_id)
            .part_number(part_number)
            .key(&self.key)
            .body(ByteStream::from(bytes))
            .content_length(content_length)
            .bucket(&self.bucket_name)
            .send()
            .await?;

        let mut pb = CompletedPart::builder().part_number(part_number);
        if let Some(e_tag) = upload_part_output.e_tag {
            pb = pb.e_tag(e_tag);
        }
        self.parts.push(pb.build());
        tracing::trace!(key = %self.key, part_number, "uploaded part");
        Ok(())
    }

    async fn abort(&mut self) -> Result<()> {
        if let Some(upload_id) = self.upload_id.take() {
            self.client
                .abort_multipart_upload()
                .upload_id(upload_id)
                .key(&self.key)
                .bucket(&self.bucket_name)
                .send()
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectWriter for S3Writer {
    async fn write(&mut self, bytes: Bytes) -> Result<()> {
        if self.finished {
            return Err(Error::WriterFinished(self.key.clone()));
        }
        self.buf.extend_from_slice(&bytes);
        while self.buf.len() >= self.part_size {
            let part = self.buf.split_to(self.part_size).freeze();
            self.upload_part(part).await?;
        }
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        if self.upload_id.is_none() {
            let bytes = self.buf.split().freeze();
            let content_length = bytes.len() as i64;
            self.client
                .put_object()
                .key(&self.key)
                .body(ByteStream::from(bytes))
                .content_length(content_length)
                .bucket(&self.bucket_name)
                .send()
                .await?;
            self.finished = true;
            return Ok(());
        }

        if !self.buf.is_empty() {
            let part = self.buf.split().freeze();
            self.upload_part(part).await?;
        }

        let upload_id = self.upload_id.clone().unwrap_or_default();
        let mpu = CompletedMultipartUpload::builder()
            .set_parts(Some(std::mem::take(&mut self.parts)))
            .build();
        self.client
            .complete_multipart_upload()
            .multipart_upload(mpu)
            .upload_id(upload_id)
            .key(&self.key)
            .bucket(&self.bucket_name)
            .send()
            .await?;
        self.upload_id = None;
        self.finished = true;
        Ok(())
    }

    async fn discard(mut self: Box<Self>) -> Result<()> {
        self.finished = true;
        self.abort().await
    }
}

impl Drop for S3Writer {
    fn drop(&mut self) {
        let Some(upload_id) = self.upload_id.take() else {
            return;
        };
        let client = self.client.clone();
        let bucket_name = self.bucket_name.clone();
        let key = self.key.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = client
                        .abort_multipart_upload()
                        .upload_id(upload_id)
                        .key(&key)
                        .bucket(bucket_name)
                        .send()
                        .await
                    {
                        tracing::warn!(%key, error = %e, "failed to abort dropped multipart upload");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(%key, %upload_id, "multipart upload left open, no runtime to abort it");
            }
        }
    }
}
