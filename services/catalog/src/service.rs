//! Item use cases: create, update, delete, fetch, list and bulk upload.
//!
//! Create and update bound their wait on media publishing; see
//! [`MediaPublisher::publish_with_deadline`]. A mutation that outlives its
//! publish deadline is stored without media references.

use crate::audit::AuditEmitter;
use crate::blob_store::BlobStore;
use crate::bulk::{self, BatchSummary, FileType, RowFailure};
use crate::config::{Config, ThumbnailBounds};
use crate::duplicate::DuplicateDetector;
use crate::error::{MediaError, ServiceError, ServiceResult};
use crate::hasher::hash_reader;
use crate::identity::next_id;
use crate::item::{Item, ItemSummary, MediaRefs};
use crate::media::{MediaKey, MediaPublisher, PublishOutcome};
use crate::record_store::{DocumentQuery, Filter, FilterOp, FilterValue, ItemCollection, RecordStore};
use crate::thumbnail::ThumbnailDeriver;
use bytes::Bytes;
use catalog_audit::{AuditAction, AuditRecord};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use validator::Validate;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

/// Tunables the item service is built with
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub collection: String,
    pub publish_timeout: Duration,
    pub create_thumbnail: ThumbnailBounds,
    pub update_thumbnail: ThumbnailBounds,
    pub jpeg_quality: u8,
    pub bulk_write_concurrency: usize,
}

impl From<&Config> for ServiceSettings {
    fn from(config: &Config) -> Self {
        Self {
            collection: config.store.collection.clone(),
            publish_timeout: config.publish_timeout(),
            create_thumbnail: config.media.create_thumbnail,
            update_thumbnail: config.media.update_thumbnail,
            jpeg_quality: config.media.jpeg_quality,
            bulk_write_concurrency: config.store.bulk_write_concurrency,
        }
    }
}

/// Orchestrates the catalog's item use cases
pub struct ItemService {
    items: ItemCollection,
    duplicates: DuplicateDetector,
    create_media: Arc<MediaPublisher>,
    update_media: Arc<MediaPublisher>,
    audit: Arc<dyn AuditEmitter>,
    publish_timeout: Duration,
    bulk_write_concurrency: usize,
}

impl ItemService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        audit: Arc<dyn AuditEmitter>,
        settings: ServiceSettings,
    ) -> Self {
        let items = ItemCollection::new(store, settings.collection);
        let deriver = |bounds| ThumbnailDeriver::new(bounds, settings.jpeg_quality);

        Self {
            duplicates: DuplicateDetector::new(items.clone()),
            items,
            create_media: Arc::new(MediaPublisher::new(
                blobs.clone(),
                deriver(settings.create_thumbnail),
            )),
            update_media: Arc::new(MediaPublisher::new(blobs, deriver(settings.update_thumbnail))),
            audit,
            publish_timeout: settings.publish_timeout,
            bulk_write_concurrency: settings.bulk_write_concurrency.max(1),
        }
    }

    /// Record store connectivity, for the readiness endpoint
    pub async fn ready(&self) -> ServiceResult<()> {
        self.items.store().ping().await?;
        Ok(())
    }

    /// Create an item, optionally with an image
    #[instrument(skip(self, item, image), fields(product_name = %item.product_name, has_image = image.is_some()))]
    pub async fn create(&self, mut item: Item, image: Option<Bytes>) -> ServiceResult<Item> {
        item.clear_media();
        item.validate()?;

        let media = match image {
            Some(image) => {
                let hash = hash_reader(&mut &image[..]).map_err(MediaError::from)?;
                if self.duplicates.is_duplicate(&hash).await {
                    return Err(ServiceError::DuplicateImage);
                }
                self.publish(&self.create_media, &item, image, hash).await
            }
            None => None,
        };

        // Read after the publish wait so the allocation sees the latest state
        let existing = self.items.all_items().await?;
        item.id = next_id(&existing);
        if let Some(media) = media {
            item.attach_media(media);
        }

        self.items.add(&item).await?;

        metrics::counter!("catalog.items.created").increment(1);
        info!(item_id = item.id, "Item created");

        self.emit(AuditAction::Create, item.id).await;
        Ok(item)
    }

    /// Replace every field of item `id` except its identity.
    ///
    /// Without an image the stored media references are kept. With an image
    /// that fails or outlives the publish deadline the item is stored without
    /// media, since the detached publish may still overwrite the old blobs.
    #[instrument(skip(self, item, image), fields(item_id = %id, has_image = image.is_some()))]
    pub async fn update(&self, id: &str, mut item: Item, image: Option<Bytes>) -> ServiceResult<Item> {
        let id = parse_id(id)?;
        item.clear_media();
        item.validate()?;

        // Outer None: no image sent. Inner None: sent but not published.
        let published = match image {
            Some(image) => {
                let hash = hash_reader(&mut &image[..]).map_err(MediaError::from)?;
                Some(self.publish(&self.update_media, &item, image, hash).await)
            }
            None => None,
        };

        let existing = self
            .items
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))?;

        item.id = id;
        match published {
            Some(Some(media)) => item.attach_media(media),
            Some(None) => {}
            None => item.attach_media(existing.item.media()),
        }

        self.items.set(&existing.key, &item).await?;

        metrics::counter!("catalog.items.updated").increment(1);
        info!(item_id = id, key = %existing.key, "Item updated");

        self.emit(AuditAction::Update, id).await;
        Ok(item)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> ServiceResult<()> {
        let id = parse_id(id)?;
        let existing = self
            .items
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))?;

        self.items.delete(&existing.key).await?;

        metrics::counter!("catalog.items.deleted").increment(1);
        info!(item_id = id, key = %existing.key, "Item deleted");

        self.emit(AuditAction::Delete, id).await;
        Ok(())
    }

    pub async fn fetch_by_id(&self, id: &str) -> ServiceResult<Item> {
        let id = parse_id(id)?;
        self.items
            .find_by_id(id)
            .await?
            .map(|stored| stored.item)
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }

    /// Filtered, paginated public views
    pub async fn list(&self, params: &HashMap<String, String>) -> ServiceResult<Vec<ItemSummary>> {
        let query = build_list_query(params)?;
        let items = self.items.page(&query).await?;
        Ok(items.into_iter().map(ItemSummary::from).collect())
    }

    /// Store every parsable row of a bulk file.
    ///
    /// Rows are isolated: parse and write failures land in the summary and
    /// never fail the batch. Ids continue from the catalog's maximum at the
    /// start of the batch. Items are keyed by product name, so a row replaces
    /// any item already stored under the same name.
    #[instrument(skip(self, data), fields(size_bytes = data.len()))]
    pub async fn bulk_upload(
        &self,
        data: Bytes,
        declared: Option<FileType>,
    ) -> ServiceResult<BatchSummary> {
        let parsed = bulk::parse(&data, declared)?;
        let mut summary = BatchSummary {
            stored: Vec::new(),
            failures: parsed.failures,
        };

        // Within one file the last row for a product name wins
        let mut latest: BTreeMap<String, usize> = BTreeMap::new();
        for (index, candidate) in parsed.candidates.iter().enumerate() {
            latest.insert(bulk_key(&candidate.item), index);
        }
        let mut candidates = Vec::with_capacity(latest.len());
        for (index, candidate) in parsed.candidates.into_iter().enumerate() {
            let key = bulk_key(&candidate.item);
            match latest.get(&key) {
                Some(&winner) if winner != index => summary.failures.push(RowFailure {
                    row: candidate.row,
                    reason: format!("superseded by a later row for {key}"),
                }),
                _ => candidates.push((key, candidate)),
            }
        }

        let existing = self.items.all_items().await?;
        let base = next_id(&existing);

        let writes = candidates.into_iter().enumerate().map(|(offset, (key, mut candidate))| {
            candidate.item.id = base + offset as i64;
            candidate.item.clear_media();
            let items = self.items.clone();
            async move {
                let result = items.set(&key, &candidate.item).await;
                (candidate.row, candidate.item.id, result)
            }
        });

        let mut results = stream::iter(writes).buffer_unordered(self.bulk_write_concurrency);
        while let Some((row, id, result)) = results.next().await {
            match result {
                Ok(()) => summary.stored.push(id),
                Err(e) => {
                    warn!(row, item_id = id, error = %e, "Failed to store bulk upload row");
                    summary.failures.push(RowFailure {
                        row,
                        reason: e.to_string(),
                    });
                }
            }
        }

        summary.stored.sort_unstable();
        summary.failures.sort_by_key(|f| f.row);

        metrics::counter!("catalog.bulk.rows.stored").increment(summary.stored.len() as u64);
        metrics::counter!("catalog.bulk.rows.failed").increment(summary.failures.len() as u64);
        info!(
            stored = summary.stored.len(),
            failed = summary.failures.len(),
            "Bulk upload finished"
        );

        Ok(summary)
    }

    /// Publish under the deadline. Any outcome other than success leaves the
    /// item without media.
    async fn publish(
        &self,
        publisher: &Arc<MediaPublisher>,
        item: &Item,
        image: Bytes,
        hash: String,
    ) -> Option<MediaRefs> {
        let key = MediaKey::for_item(&item.product_name, item.weight);

        match publisher
            .publish_with_deadline(image, key, self.publish_timeout)
            .await
        {
            PublishOutcome::Published(published) => Some(MediaRefs {
                image_url: published.image_url,
                thumbnail_url: published.thumbnail_url,
                image_hash: hash,
            }),
            PublishOutcome::Failed(e) => {
                warn!(error = %e, "Media publish failed; storing item without media");
                None
            }
            PublishOutcome::TimedOut => None,
        }
    }

    /// Audit failures are reported but never fail the mutation
    async fn emit(&self, action: AuditAction, id: i64) {
        let record = AuditRecord::new(action, id.to_string());
        if let Err(e) = self.audit.publish(record).await {
            metrics::counter!("catalog.audit.failures").increment(1);
            warn!(action = %action, item_id = id, error = %e, "Audit publish failed");
        }
    }
}

fn parse_id(raw: &str) -> ServiceResult<i64> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| ServiceError::Validation(format!("invalid item id: {raw}")))
}

fn bulk_key(item: &Item) -> String {
    item.product_name.trim().to_string()
}

/// Build the list query from request parameters.
///
/// `pageNumber` and `pageSize` paginate; other parameters filter. `price`
/// parameters are numeric: `price_min` is a lower bound, `price_max` an
/// upper bound and a bare `price` must match exactly. Every other parameter
/// is an equality filter on the field of the same name.
fn build_list_query(params: &HashMap<String, String>) -> ServiceResult<DocumentQuery> {
    let page_size = params
        .get("pageSize")
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|size| *size > 0)
        .map(|size| size.min(MAX_PAGE_SIZE))
        .unwrap_or(DEFAULT_PAGE_SIZE);
    let page_number = params
        .get("pageNumber")
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|page| *page > 0)
        .unwrap_or(1);

    let mut filters = Vec::new();
    let sorted: BTreeMap<&String, &String> = params.iter().collect();

    for (name, value) in sorted {
        if name == "pageSize" || name == "pageNumber" || name.is_empty() {
            continue;
        }

        if name.starts_with("price") {
            let op = if name == "price" {
                Some(FilterOp::Eq)
            } else if name.ends_with("_min") {
                Some(FilterOp::Gte)
            } else if name.ends_with("_max") {
                Some(FilterOp::Lte)
            } else {
                None
            };

            if let Some(op) = op {
                let bound = value
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| {
                        ServiceError::Validation(format!("{name} must be a number, got {value}"))
                    })?;
                filters.push(Filter::new("price", op, FilterValue::Number(bound)));
                continue;
            }
        }

        filters.push(Filter::eq(name.as_str(), FilterValue::infer(value)));
    }

    Ok(DocumentQuery {
        filters,
        offset: (page_number - 1).saturating_mul(page_size),
        limit: Some(page_size),
    })
}
