//! Catalog item model.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Weight units accepted on an item
pub const WEIGHT_UNITS: [&str; 4] = ["gm", "kg", "ml", "l"];

/// Month and year pair used for manufacturing and expiry dates.
/// A zero month means the date is not set.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonthYear {
    pub month: u32,
    pub year: i32,
}

/// A grocery catalog record
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct Item {
    /// Allocated identity, unique and positive once stored
    pub id: i64,
    #[validate(custom(function = "required_text"))]
    pub product_name: String,
    #[validate(custom(function = "required_text"))]
    pub category: String,
    #[validate(range(min = 0.0))]
    pub price: f64,
    #[validate(range(exclusive_min = 0.0))]
    pub weight: f64,
    #[validate(custom(function = "weight_unit"))]
    pub weight_unit: String,
    pub vegetarian: bool,
    #[serde(rename = "imageURL")]
    pub image_url: String,
    /// Content fingerprint of the stored image, empty when there is none
    pub image_hash: String,
    #[serde(rename = "thumbnailURL")]
    pub thumbnail_url: String,
    #[validate(custom(function = "required_text"))]
    pub manufacturer: String,
    #[validate(custom(function = "required_text"))]
    pub brand: String,
    #[validate(range(min = 1))]
    pub item_package_quantity: i64,
    pub package_information: String,
    #[validate(custom(function = "month_year"))]
    pub mfg_date: MonthYear,
    #[validate(custom(function = "month_year"))]
    pub exp_date: MonthYear,
    pub country_of_origin: String,
}

/// Media references attached to an item after a successful publish
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaRefs {
    pub image_url: String,
    pub thumbnail_url: String,
    pub image_hash: String,
}

impl Item {
    /// Drop client-supplied media fields; they are server-managed
    pub fn clear_media(&mut self) {
        self.image_url.clear();
        self.thumbnail_url.clear();
        self.image_hash.clear();
    }

    pub fn attach_media(&mut self, media: MediaRefs) {
        self.image_url = media.image_url;
        self.thumbnail_url = media.thumbnail_url;
        self.image_hash = media.image_hash;
    }

    pub fn media(&self) -> MediaRefs {
        MediaRefs {
            image_url: self.image_url.clone(),
            thumbnail_url: self.thumbnail_url.clone(),
            image_hash: self.image_hash.clone(),
        }
    }
}

/// Reduced public view returned by list queries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemSummary {
    pub id: i64,
    pub product_name: String,
    pub price: f64,
    pub category: String,
    #[serde(rename = "thumbnailURL")]
    pub thumbnail_url: String,
}

impl From<Item> for ItemSummary {
    fn from(item: Item) -> Self {
        Self {
            id: item.id,
            product_name: item.product_name,
            price: item.price,
            category: item.category,
            thumbnail_url: item.thumbnail_url,
        }
    }
}

fn required_text(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("required").with_message("must not be empty".into()));
    }
    Ok(())
}

fn weight_unit(value: &str) -> Result<(), ValidationError> {
    if WEIGHT_UNITS.contains(&value) {
        return Ok(());
    }
    Err(ValidationError::new("weight_unit")
        .with_message(format!("must be one of {}", WEIGHT_UNITS.join(", ")).into()))
}

fn month_year(value: &MonthYear) -> Result<(), ValidationError> {
    if value.month == 0 && value.year == 0 {
        return Ok(());
    }
    if !(1..=12).contains(&value.month) {
        return Err(ValidationError::new("month").with_message("month must be 1-12".into()));
    }
    if value.year <= 0 {
        return Err(ValidationError::new("year").with_message("year must be positive".into()));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn milk() -> Item {
        Item {
            product_name: "Milk".to_string(),
            category: "Dairy".to_string(),
            price: 3.5,
            weight: 1.0,
            weight_unit: "l".to_string(),
            vegetarian: true,
            manufacturer: "Amul".to_string(),
            brand: "Amul Gold".to_string(),
            item_package_quantity: 1,
            package_information: "Tetra pack".to_string(),
            mfg_date: MonthYear { month: 1, year: 2024 },
            exp_date: MonthYear { month: 3, year: 2024 },
            country_of_origin: "India".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_wire_names() {
        let mut item = milk();
        item.id = 4;
        item.image_url = "https://cdn/images/Milk_1.jpg".to_string();
        let json = serde_json::to_value(&item).unwrap();

        assert_eq!(json["id"], 4);
        assert_eq!(json["productName"], "Milk");
        assert_eq!(json["imageURL"], "https://cdn/images/Milk_1.jpg");
        assert_eq!(json["thumbnailURL"], "");
        assert_eq!(json["itemPackageQuantity"], 1);
        assert_eq!(json["mfgDate"]["month"], 1);
        assert_eq!(json["countryOfOrigin"], "India");
    }

    #[test]
    fn test_missing_fields_default() {
        let item: Item = serde_json::from_str(r#"{"productName": "Eggs", "price": 2}"#).unwrap();
        assert_eq!(item.product_name, "Eggs");
        assert_eq!(item.price, 2.0);
        assert_eq!(item.id, 0);
        assert!(item.image_hash.is_empty());
    }

    #[test]
    fn test_valid_item_passes() {
        assert!(milk().validate().is_ok());
    }

    #[test]
    fn test_blank_product_name_rejected() {
        let mut item = milk();
        item.product_name = "   ".to_string();
        let errors = item.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("product_name"));
    }

    #[test]
    fn test_numeric_bounds() {
        let mut item = milk();
        item.price = -1.0;
        item.weight = 0.0;
        item.item_package_quantity = 0;
        let errors = item.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("price"));
        assert!(fields.contains_key("weight"));
        assert!(fields.contains_key("item_package_quantity"));
    }

    #[test]
    fn test_free_price_allowed() {
        let mut item = milk();
        item.price = 0.0;
        assert!(item.validate().is_ok());
    }

    #[test]
    fn test_weight_unit_enumerated() {
        let mut item = milk();
        item.weight_unit = "lbs".to_string();
        assert!(item.validate().is_err());
    }

    #[test]
    fn test_month_year_rules() {
        assert!(month_year(&MonthYear::default()).is_ok());
        assert!(month_year(&MonthYear { month: 12, year: 2025 }).is_ok());
        assert!(month_year(&MonthYear { month: 13, year: 2025 }).is_err());
        assert!(month_year(&MonthYear { month: 5, year: 0 }).is_err());
    }

    #[test]
    fn test_summary_projection() {
        let mut item = milk();
        item.id = 9;
        item.thumbnail_url = "thumb".to_string();
        let summary = ItemSummary::from(item);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["id"], 9);
        assert_eq!(json["thumbnailURL"], "thumb");
        assert!(json.get("brand").is_none());
    }

    #[test]
    fn test_clear_and_attach_media() {
        let mut item = milk();
        item.image_hash = "client-value".to_string();
        item.clear_media();
        assert_eq!(item.media(), MediaRefs::default());

        let refs = MediaRefs {
            image_url: "a".to_string(),
            thumbnail_url: "b".to_string(),
            image_hash: "c".to_string(),
        };
        item.attach_media(refs.clone());
        assert_eq!(item.media(), refs);
    }
}
