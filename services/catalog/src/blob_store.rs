use crate::config::S3Config;
use crate::error::MediaError;
use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

/// Write-only blob storage returning public-resolvable URLs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `key` and return its URL
    async fn write(&self, key: &str, data: Bytes, content_type: &str) -> Result<String, MediaError>;
}

fn public_url(base_url: &str, bucket: &str, key: &str) -> String {
    format!("{}/{}/{}", base_url.trim_end_matches('/'), bucket, key)
}

/// Get content type for a blob key extension
pub fn content_type_for(key: &str) -> &'static str {
    let extension = key.rsplit_once('.').map(|(_, ext)| ext.to_lowercase());
    match extension.as_deref() {
        Some("jpeg") | Some("jpg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

/// S3 blob store for catalog images
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
    config: S3Config,
}

impl S3BlobStore {
    /// Create a new S3 blob store
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 blob store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            config: config.clone(),
        })
    }

    /// Simple single-part upload for small files
    async fn simple_upload(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        Ok(())
    }

    /// Multipart upload for large files. A failed upload is aborted so no
    /// incomplete parts stay behind in the bucket.
    async fn multipart_upload(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), String> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| "no upload ID in response".to_string())?;

        let session = S3MultipartSession {
            client: &self.client,
            bucket: &self.bucket,
            key,
            upload_id,
        };
        upload_in_parts(&session, data, self.config.part_size_bytes).await
    }
}

/// One open multipart upload
#[cfg_attr(test, mockall::automock)]
#[async_trait]
trait MultipartSession: Send + Sync {
    /// Upload one part and return its ETag
    async fn upload_part(&self, part_number: i32, body: Bytes) -> Result<String, String>;

    async fn complete(&self, parts: Vec<(i32, String)>) -> Result<(), String>;

    async fn abort(&self) -> Result<(), String>;
}

/// Upload `data` in `part_size` chunks, aborting the session on any failure
async fn upload_in_parts<S: MultipartSession + ?Sized>(
    session: &S,
    data: Bytes,
    part_size: usize,
) -> Result<(), String> {
    let uploaded = async {
        let part_size = part_size.max(1);
        let mut parts = Vec::new();

        for (index, start) in (0..data.len()).step_by(part_size).enumerate() {
            let end = (start + part_size).min(data.len());
            let part_number = i32::try_from(index + 1).map_err(|e| e.to_string())?;
            let e_tag = session
                .upload_part(part_number, data.slice(start..end))
                .await?;
            parts.push((part_number, e_tag));
        }

        session.complete(parts).await
    }
    .await;

    if let Err(ref message) = uploaded {
        warn!(error = %message, "Multipart upload failed; aborting");
        if let Err(abort_error) = session.abort().await {
            warn!(error = %abort_error, "Multipart abort failed; parts may remain");
        }
    }

    uploaded
}

struct S3MultipartSession<'a> {
    client: &'a S3Client,
    bucket: &'a str,
    key: &'a str,
    upload_id: &'a str,
}

#[async_trait]
impl<'a> MultipartSession for S3MultipartSession<'a> {
    async fn upload_part(&self, part_number: i32, body: Bytes) -> Result<String, String> {
        let response = self
            .client
            .upload_part()
            .bucket(self.bucket)
            .key(self.key)
            .upload_id(self.upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        Ok(response.e_tag().unwrap_or_default().to_string())
    }

    async fn complete(&self, parts: Vec<(i32, String)>) -> Result<(), String> {
        let parts = parts
            .into_iter()
            .map(|(part_number, e_tag)| {
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(e_tag)
                    .build()
            })
            .collect();

        self.client
            .complete_multipart_upload()
            .bucket(self.bucket)
            .key(self.key)
            .upload_id(self.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| e.to_string())?;

        Ok(())
    }

    async fn abort(&self) -> Result<(), String> {
        self.client
            .abort_multipart_upload()
            .bucket(self.bucket)
            .key(self.key)
            .upload_id(self.upload_id)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        Ok(())
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self, data), fields(size_bytes = data.len()))]
    async fn write(&self, key: &str, data: Bytes, content_type: &str) -> Result<String, MediaError> {
        let size = data.len();

        let uploaded = if size > self.config.multipart_threshold_bytes {
            self.multipart_upload(key, data, content_type).await
        } else {
            self.simple_upload(key, data, content_type).await
        };

        uploaded.map_err(|message| MediaError::Upload {
            key: key.to_string(),
            message,
        })?;

        debug!(key = %key, size_bytes = size, "Blob uploaded");

        Ok(public_url(&self.config.public_base_url, &self.bucket, key))
    }
}

/// In-memory blob store for local runs and tests
pub struct MemoryBlobStore {
    base_url: String,
    bucket: String,
    blobs: RwLock<HashMap<String, (Bytes, String)>>,
}

impl MemoryBlobStore {
    pub fn new(base_url: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            bucket: bucket.into(),
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Stored bytes for `key`, if any
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.blobs.read().await.get(key).map(|(data, _)| data.clone())
    }

    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.blobs.read().await.get(key).map(|(_, ct)| ct.clone())
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.blobs.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn write(&self, key: &str, data: Bytes, content_type: &str) -> Result<String, MediaError> {
        self.blobs
            .write()
            .await
            .insert(key.to_string(), (data, content_type.to_string()));
        Ok(public_url(&self.base_url, &self.bucket, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_url() {
        assert_eq!(
            public_url("https://storage.example.com/", "media", "images/Milk_1.jpg"),
            "https://storage.example.com/media/images/Milk_1.jpg"
        );
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("images/a.jpg"), "image/jpeg");
        assert_eq!(content_type_for("images/a.JPEG"), "image/jpeg");
        assert_eq!(content_type_for("thumbs/a.png"), "image/png");
        assert_eq!(content_type_for("no-extension"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_memory_blob_store_round_trip() {
        let store = MemoryBlobStore::new("http://localhost:9000", "catalog");
        let url = store
            .write("images/a.jpg", Bytes::from_static(b"jpeg"), "image/jpeg")
            .await
            .unwrap();

        assert_eq!(url, "http://localhost:9000/catalog/images/a.jpg");
        assert_eq!(store.get("images/a.jpg").await.unwrap(), Bytes::from_static(b"jpeg"));
        assert_eq!(store.content_type("images/a.jpg").await.as_deref(), Some("image/jpeg"));
        assert_eq!(store.keys().await, vec!["images/a.jpg".to_string()]);
    }

    #[tokio::test]
    async fn test_multipart_uploads_every_part_then_completes() {
        let mut session = MockMultipartSession::new();
        session
            .expect_upload_part()
            .times(3)
            .returning(|part_number, body| {
                assert!(body.len() <= 4);
                Ok(format!("etag-{part_number}"))
            });
        session
            .expect_complete()
            .withf(|parts| {
                parts.iter().map(|(n, _)| *n).collect::<Vec<_>>() == vec![1, 2, 3]
                    && parts[2].1 == "etag-3"
            })
            .times(1)
            .returning(|_| Ok(()));
        session.expect_abort().never();

        upload_in_parts(&session, Bytes::from_static(b"0123456789"), 4)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_part_aborts_upload() {
        let mut session = MockMultipartSession::new();
        session
            .expect_upload_part()
            .returning(|part_number, _| match part_number {
                1 => Ok("etag-1".to_string()),
                _ => Err("connection reset".to_string()),
            });
        session.expect_complete().never();
        session.expect_abort().times(1).returning(|| Ok(()));

        let err = upload_in_parts(&session, Bytes::from_static(b"0123456789"), 4)
            .await
            .unwrap_err();
        assert_eq!(err, "connection reset");
    }

    #[tokio::test]
    async fn test_failed_completion_aborts_upload() {
        let mut session = MockMultipartSession::new();
        session
            .expect_upload_part()
            .returning(|part_number, _| Ok(format!("etag-{part_number}")));
        session
            .expect_complete()
            .times(1)
            .returning(|_| Err("InvalidPart".to_string()));
        session
            .expect_abort()
            .times(1)
            .returning(|| Err("NoSuchUpload".to_string()));

        let err = upload_in_parts(&session, Bytes::from_static(b"01234567"), 4)
            .await
            .unwrap_err();
        assert_eq!(err, "InvalidPart");
    }
}
