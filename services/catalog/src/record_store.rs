//! Document store facade and the typed item collection built on it.
//!
//! Documents are JSON bodies addressed by `(collection, key)`. Queries are a
//! conjunction of [`Filter`]s plus offset/limit, ordered by the numeric `id`
//! field of the body.

use crate::error::StoreError;
use crate::item::Item;
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::warn;

/// A stored document
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub key: String,
    pub body: Value,
}

/// Comparison applied by a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    /// Field value is less than or equal to the operand
    Lte,
    /// Field value is greater than or equal to the operand
    Gte,
}

impl FilterOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Lte => "<=",
            FilterOp::Gte => ">=",
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            FilterOp::Eq => ordering == Ordering::Equal,
            FilterOp::Lte => ordering != Ordering::Greater,
            FilterOp::Gte => ordering != Ordering::Less,
        }
    }
}

/// Typed filter operand
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Number(f64),
    Bool(bool),
}

impl FilterValue {
    /// Infer the operand type from a raw request parameter
    pub fn infer(raw: &str) -> Self {
        match raw {
            "true" => FilterValue::Bool(true),
            "false" => FilterValue::Bool(false),
            _ => match raw.parse::<f64>() {
                Ok(n) if n.is_finite() => FilterValue::Number(n),
                _ => FilterValue::Text(raw.to_string()),
            },
        }
    }
}

/// One predicate on a top-level body field
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: FilterValue,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: FilterValue) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    pub fn eq(field: impl Into<String>, value: FilterValue) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    /// Evaluate against a document body. A field whose JSON type does not
    /// match the operand never matches.
    pub fn matches(&self, body: &Value) -> bool {
        let Some(field) = body.get(&self.field) else {
            return false;
        };

        let ordering = match (&self.value, field) {
            (FilterValue::Number(n), Value::Number(v)) => {
                v.as_f64().and_then(|v| v.partial_cmp(n))
            }
            (FilterValue::Text(t), Value::String(v)) => Some(v.as_str().cmp(t.as_str())),
            (FilterValue::Bool(b), Value::Bool(v)) => Some(v.cmp(b)),
            _ => None,
        };

        ordering.map(|o| self.op.accepts(o)).unwrap_or(false)
    }
}

/// Filters plus pagination
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentQuery {
    pub filters: Vec<Filter>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl DocumentQuery {
    pub fn matches(&self, body: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(body))
    }
}

/// Order documents by their numeric `id`, falling back to key order
pub fn compare_by_id(a: &Document, b: &Document) -> Ordering {
    let id = |d: &Document| d.body.get("id").and_then(Value::as_i64).unwrap_or(0);
    id(a).cmp(&id(b)).then_with(|| a.key.cmp(&b.key))
}

/// Key/value document store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Every document in the collection
    async fn list_all(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    /// Documents matching all filters, ordered by id, paginated
    async fn query(
        &self,
        collection: &str,
        query: &DocumentQuery,
    ) -> Result<Vec<Document>, StoreError>;

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>, StoreError>;

    /// Create or replace the document at `key`
    async fn set(&self, collection: &str, key: &str, body: Value) -> Result<(), StoreError>;

    /// Insert under a generated key and return it
    async fn add(&self, collection: &str, body: Value) -> Result<String, StoreError>;

    /// Remove the document at `key`. Removing a missing key is not an error.
    async fn delete(&self, collection: &str, key: &str) -> Result<(), StoreError>;

    /// Connectivity check used by readiness
    async fn ping(&self) -> Result<(), StoreError>;
}

/// An item together with the key of the document holding it
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    pub key: String,
    pub item: Item,
}

/// Typed access to the catalog's item collection
#[derive(Clone)]
pub struct ItemCollection {
    store: Arc<dyn RecordStore>,
    collection: String,
}

impl ItemCollection {
    pub fn new(store: Arc<dyn RecordStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Every decodable item. Undecodable documents are skipped with a warning.
    pub async fn all_items(&self) -> Result<Vec<Item>, StoreError> {
        let docs = self.store.list_all(&self.collection).await?;
        Ok(docs
            .into_iter()
            .filter_map(|doc| decode(doc).map(|stored| stored.item))
            .collect())
    }

    /// Look up the item whose `id` field equals `id`
    pub async fn find_by_id(&self, id: i64) -> Result<Option<StoredItem>, StoreError> {
        let query = DocumentQuery {
            filters: vec![Filter::eq("id", FilterValue::Number(id as f64))],
            offset: 0,
            limit: Some(1),
        };
        let docs = self.store.query(&self.collection, &query).await?;
        Ok(docs.into_iter().find_map(decode))
    }

    /// Filtered, paginated items
    pub async fn page(&self, query: &DocumentQuery) -> Result<Vec<Item>, StoreError> {
        let docs = self.store.query(&self.collection, query).await?;
        Ok(docs
            .into_iter()
            .filter_map(|doc| decode(doc).map(|stored| stored.item))
            .collect())
    }

    /// Insert under a generated key
    pub async fn add(&self, item: &Item) -> Result<String, StoreError> {
        let body = serde_json::to_value(item)?;
        self.store.add(&self.collection, body).await
    }

    /// Write under an explicit key
    pub async fn set(&self, key: &str, item: &Item) -> Result<(), StoreError> {
        let body = serde_json::to_value(item)?;
        self.store.set(&self.collection, key, body).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.store.delete(&self.collection, key).await
    }
}

fn decode(doc: Document) -> Option<StoredItem> {
    match serde_json::from_value::<Item>(doc.body) {
        Ok(item) => Some(StoredItem { key: doc.key, item }),
        Err(e) => {
            warn!(key = %doc.key, error = %e, "Skipping undecodable item document");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_infer_filter_value() {
        assert_eq!(FilterValue::infer("3.5"), FilterValue::Number(3.5));
        assert_eq!(FilterValue::infer("true"), FilterValue::Bool(true));
        assert_eq!(FilterValue::infer("Dairy"), FilterValue::Text("Dairy".to_string()));
        assert_eq!(FilterValue::infer("NaN"), FilterValue::Text("NaN".to_string()));
    }

    #[test]
    fn test_numeric_range_filters() {
        let body = json!({"price": 7.0});
        assert!(Filter::new("price", FilterOp::Gte, FilterValue::Number(5.0)).matches(&body));
        assert!(Filter::new("price", FilterOp::Lte, FilterValue::Number(7.0)).matches(&body));
        assert!(!Filter::new("price", FilterOp::Lte, FilterValue::Number(6.0)).matches(&body));
        assert!(Filter::eq("price", FilterValue::Number(7.0)).matches(&body));
    }

    #[test]
    fn test_type_mismatch_never_matches() {
        let body = json!({"category": "Dairy", "vegetarian": true});
        assert!(!Filter::eq("category", FilterValue::Number(1.0)).matches(&body));
        assert!(!Filter::eq("missing", FilterValue::Text("x".into())).matches(&body));
        assert!(Filter::eq("vegetarian", FilterValue::Bool(true)).matches(&body));
        assert!(!Filter::eq("vegetarian", FilterValue::Text("true".into())).matches(&body));
    }

    #[test]
    fn test_query_is_conjunction() {
        let query = DocumentQuery {
            filters: vec![
                Filter::eq("category", FilterValue::Text("Dairy".into())),
                Filter::new("price", FilterOp::Lte, FilterValue::Number(10.0)),
            ],
            ..Default::default()
        };
        assert!(query.matches(&json!({"category": "Dairy", "price": 4})));
        assert!(!query.matches(&json!({"category": "Dairy", "price": 14})));
        assert!(!query.matches(&json!({"category": "Bakery", "price": 4})));
    }

    #[test]
    fn test_compare_by_id() {
        let a = Document {
            key: "b".into(),
            body: json!({"id": 2}),
        };
        let b = Document {
            key: "a".into(),
            body: json!({"id": 10}),
        };
        assert_eq!(compare_by_id(&a, &b), Ordering::Less);
    }

    #[tokio::test]
    async fn test_find_by_id_queries_with_limit_one() {
        let mut store = MockRecordStore::new();
        store
            .expect_query()
            .withf(|collection, query| {
                collection == "groceryItems"
                    && query.limit == Some(1)
                    && query.filters == vec![Filter::eq("id", FilterValue::Number(3.0))]
            })
            .returning(|_, _| {
                Ok(vec![Document {
                    key: "doc-3".to_string(),
                    body: json!({"id": 3, "productName": "Bread"}),
                }])
            });

        let items = ItemCollection::new(Arc::new(store), "groceryItems");
        let found = items.find_by_id(3).await.unwrap().unwrap();
        assert_eq!(found.key, "doc-3");
        assert_eq!(found.item.product_name, "Bread");
    }

    #[tokio::test]
    async fn test_all_items_skips_undecodable() {
        let mut store = MockRecordStore::new();
        store.expect_list_all().returning(|_| {
            Ok(vec![
                Document {
                    key: "ok".into(),
                    body: json!({"id": 1}),
                },
                Document {
                    key: "bad".into(),
                    body: json!({"id": "not a number"}),
                },
            ])
        });

        let items = ItemCollection::new(Arc::new(store), "groceryItems");
        let all = items.all_items().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, 1);
    }
}
