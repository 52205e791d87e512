//! Media publishing: original image plus derived thumbnail.
//!
//! Blob keys are deterministic per product:
//!
//! ```text
//! images/<product_name>_<weight>.jpg
//! thumbnails/<product_name>_<weight>_thumbnail.jpg
//! ```
//!
//! A publish writes the original first and the thumbnail second. If the
//! thumbnail write fails the original stays in the bucket with no record
//! pointing at it; that orphan is logged and not cleaned up.
//!
//! [`MediaPublisher::publish_with_deadline`] runs the publish as a detached
//! task and waits for it at most a fixed time. On timeout the caller moves on
//! without media while the task keeps running to completion; its result is
//! then dropped.

use crate::blob_store::{content_type_for, BlobStore};
use crate::error::MediaError;
use crate::thumbnail::ThumbnailDeriver;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Deterministic blob key stem for an item's media
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaKey {
    stem: String,
}

impl MediaKey {
    /// Key stem `<sanitized product name>_<weight>`
    pub fn for_item(product_name: &str, weight: f64) -> Self {
        Self {
            stem: format!("{}_{}", sanitize_name(product_name), weight),
        }
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn image_key(&self) -> String {
        format!("images/{}.jpg", self.stem)
    }

    pub fn thumbnail_key(&self) -> String {
        format!("thumbnails/{}_thumbnail.jpg", self.stem)
    }
}

/// Replace whitespace and path separators so a name is one key segment
fn sanitize_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            c if c.is_whitespace() => '_',
            '/' | '\\' => '_',
            _ => c,
        })
        .collect()
}

/// Content type of an uploaded original, sniffed from its bytes
fn sniff_content_type(data: &[u8]) -> &'static str {
    match image::guess_format(data) {
        Ok(image::ImageFormat::Png) => "image/png",
        Ok(image::ImageFormat::Gif) => "image/gif",
        Ok(image::ImageFormat::WebP) => "image/webp",
        Ok(image::ImageFormat::Bmp) => "image/bmp",
        _ => "image/jpeg",
    }
}

/// Public references to a published original and its thumbnail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMedia {
    pub image_url: String,
    pub thumbnail_url: String,
}

/// What the caller saw of a deadline-bounded publish
#[derive(Debug)]
pub enum PublishOutcome {
    Published(PublishedMedia),
    Failed(MediaError),
    /// The deadline passed first; the publish continues detached
    TimedOut,
}

/// Writes originals and thumbnails to blob storage
pub struct MediaPublisher {
    blobs: Arc<dyn BlobStore>,
    deriver: Arc<ThumbnailDeriver>,
}

impl MediaPublisher {
    pub fn new(blobs: Arc<dyn BlobStore>, deriver: ThumbnailDeriver) -> Self {
        Self {
            blobs,
            deriver: Arc::new(deriver),
        }
    }

    /// Derive the thumbnail, then write the original and the thumbnail
    #[instrument(skip(self, original), fields(key = %key.stem(), size_bytes = original.len()))]
    pub async fn publish(
        &self,
        original: Bytes,
        key: &MediaKey,
    ) -> Result<PublishedMedia, MediaError> {
        let thumbnail = self.deriver.clone().derive_async(original.clone()).await?;

        let image_key = key.image_key();
        let image_url = self
            .blobs
            .write(&image_key, original.clone(), sniff_content_type(&original))
            .await?;

        let thumbnail_key = key.thumbnail_key();
        let thumbnail_url = match self
            .blobs
            .write(&thumbnail_key, thumbnail.data, content_type_for(&thumbnail_key))
            .await
        {
            Ok(url) => url,
            Err(e) => {
                warn!(
                    image_key = %image_key,
                    error = %e,
                    "Thumbnail upload failed; original image left orphaned"
                );
                return Err(e);
            }
        };

        info!(
            image_key = %image_key,
            thumbnail_key = %thumbnail_key,
            thumbnail_width = thumbnail.width,
            thumbnail_height = thumbnail.height,
            "Media published"
        );

        Ok(PublishedMedia {
            image_url,
            thumbnail_url,
        })
    }

    /// Publish on a detached task and wait at most `deadline` for it.
    ///
    /// Timing out stops only the wait. The task is never cancelled and its
    /// late result is discarded.
    pub async fn publish_with_deadline(
        self: &Arc<Self>,
        original: Bytes,
        key: MediaKey,
        deadline: Duration,
    ) -> PublishOutcome {
        let (tx, rx) = oneshot::channel();
        let publisher = Arc::clone(self);

        tokio::spawn(async move {
            let started = Instant::now();
            let result = publisher.publish(original, &key).await;

            metrics::histogram!("catalog.media.publish_duration_seconds")
                .record(started.elapsed().as_secs_f64());
            match &result {
                Ok(_) => metrics::counter!("catalog.media.published").increment(1),
                Err(_) => metrics::counter!("catalog.media.failures").increment(1),
            }

            if tx.send(result).is_err() {
                debug!(key = %key.stem(), "Publish finished after the caller stopped waiting; result dropped");
            }
        });

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(Ok(media))) => PublishOutcome::Published(media),
            Ok(Ok(Err(e))) => PublishOutcome::Failed(e),
            Ok(Err(_)) => PublishOutcome::Failed(MediaError::Task(
                "publish task ended without a result".to_string(),
            )),
            Err(_) => {
                metrics::counter!("catalog.media.timeouts").increment(1);
                warn!(
                    deadline_secs = deadline.as_secs(),
                    "Media publish exceeded deadline; continuing without media"
                );
                PublishOutcome::TimedOut
            }
        }
    }
}
