//! Bulk upload parsing.
//!
//! Turns an uploaded CSV or JSON file into candidate items. Failures are
//! isolated per row: a row that cannot become an item is reported in the
//! batch and the rest carry on. Only a file that cannot be read at all is an
//! error.
//!
//! CSV files carry a header of lowerCamelCase field names. Unknown columns
//! are ignored and a cell that does not parse as its field's type leaves the
//! field at its default. `mfgDate.month`, `mfgDate.year`, `expDate.month` and
//! `expDate.year` address the date pairs. A leading UTF-8 BOM and an Excel
//! style `sep=<c>` first line are understood.
//!
//! JSON files are either one top-level array of item objects or a stream of
//! item objects one after another.

use crate::error::IngestError;
use crate::item::Item;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Bytes inspected when sniffing an undeclared file type
const SNIFF_LEN: usize = 512;

/// Supported bulk file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Csv,
    Json,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Csv => "csv",
            FileType::Json => "json",
        }
    }

    /// Guess the format from the leading bytes.
    ///
    /// Lossy: a BOM, a `sep=` line or any comma means CSV unless the content
    /// opens like a JSON document. Prefer an explicit type.
    pub fn sniff(data: &[u8]) -> Result<Self, IngestError> {
        let head = &data[..data.len().min(SNIFF_LEN)];

        if head.starts_with(UTF8_BOM) || head.starts_with(b"sep=") {
            return Ok(FileType::Csv);
        }

        let opens_like_json = head
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|b| *b == b'{' || *b == b'[');
        if opens_like_json {
            return Ok(FileType::Json);
        }

        if head.contains(&b',') {
            return Ok(FileType::Csv);
        }

        Err(IngestError::UnknownFileType)
    }
}

impl FromStr for FileType {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(FileType::Csv),
            "json" => Ok(FileType::Json),
            other => Err(IngestError::UnsupportedFileType(other.to_string())),
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed item and the 1-based data row it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub row: usize,
    pub item: Item,
}

/// A row that was not stored, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFailure {
    pub row: usize,
    pub reason: String,
}

/// Output of parsing one bulk file
#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub candidates: Vec<Candidate>,
    pub failures: Vec<RowFailure>,
}

impl ParsedBatch {
    fn accept(&mut self, row: usize, item: Item) {
        if item.product_name.trim().is_empty() {
            self.reject(row, "missing productName");
            return;
        }
        self.candidates.push(Candidate { row, item });
    }

    fn reject(&mut self, row: usize, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(row, reason = %reason, "Skipping bulk upload row");
        self.failures.push(RowFailure { row, reason });
    }
}

/// Outcome of a whole bulk upload
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    /// Ids of the items written
    pub stored: Vec<i64>,
    pub failures: Vec<RowFailure>,
}

/// Parse a bulk file. With no declared type the format is sniffed.
pub fn parse(data: &[u8], declared: Option<FileType>) -> Result<ParsedBatch, IngestError> {
    let file_type = match declared {
        Some(file_type) => file_type,
        None => FileType::sniff(data)?,
    };
    debug!(file_type = %file_type, size_bytes = data.len(), "Parsing bulk upload");

    match file_type {
        FileType::Csv => parse_csv(data),
        FileType::Json => parse_json(data),
    }
}

fn parse_json(data: &[u8]) -> Result<ParsedBatch, IngestError> {
    let data = data.strip_prefix(UTF8_BOM).unwrap_or(data);
    let mut values = Vec::new();

    for value in serde_json::Deserializer::from_slice(data).into_iter::<Value>() {
        match value? {
            Value::Array(elements) => values.extend(elements),
            other => values.push(other),
        }
    }

    let mut batch = ParsedBatch::default();
    for (index, value) in values.into_iter().enumerate() {
        let row = index + 1;
        match serde_json::from_value::<Item>(value) {
            Ok(item) => batch.accept(row, item),
            Err(e) => batch.reject(row, e.to_string()),
        }
    }
    Ok(batch)
}

fn parse_csv(data: &[u8]) -> Result<ParsedBatch, IngestError> {
    let mut data = data.strip_prefix(UTF8_BOM).unwrap_or(data);
    let mut delimiter = b',';

    if let Some(rest) = data.strip_prefix(b"sep=") {
        let line_end = rest.iter().position(|b| *b == b'\n').unwrap_or(rest.len());
        if let Some(&sep) = rest[..line_end].first().filter(|b| !b.is_ascii_whitespace()) {
            delimiter = sep;
        }
        data = rest.get(line_end + 1..).unwrap_or_default();
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data);

    let headers = reader.headers()?.clone();
    let mut batch = ParsedBatch::default();

    for (index, record) in reader.records().enumerate() {
        let row = index + 1;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                batch.reject(row, e.to_string());
                continue;
            }
        };

        let mut item = Item::default();
        for (column, cell) in headers.iter().zip(record.iter()) {
            set_column(&mut item, column, cell);
        }
        batch.accept(row, item);
    }

    Ok(batch)
}

/// Assign one CSV cell to the field its column names. Unknown columns and
/// unparsable cells leave the item unchanged.
fn set_column(item: &mut Item, column: &str, cell: &str) {
    fn assign<T: FromStr>(field: &mut T, column: &str, cell: &str) {
        match cell.parse() {
            Ok(value) => *field = value,
            Err(_) => debug!(column, cell, "Unparsable cell left at default"),
        }
    }

    match column {
        "productName" => item.product_name = cell.to_string(),
        "category" => item.category = cell.to_string(),
        "price" => assign(&mut item.price, column, cell),
        "weight" => assign(&mut item.weight, column, cell),
        "weightUnit" => item.weight_unit = cell.to_string(),
        "vegetarian" => match parse_bool(cell) {
            Some(value) => item.vegetarian = value,
            None => debug!(column, cell, "Unparsable cell left at default"),
        },
        "manufacturer" => item.manufacturer = cell.to_string(),
        "brand" => item.brand = cell.to_string(),
        "itemPackageQuantity" => assign(&mut item.item_package_quantity, column, cell),
        "packageInformation" => item.package_information = cell.to_string(),
        "mfgDate.month" => assign(&mut item.mfg_date.month, column, cell),
        "mfgDate.year" => assign(&mut item.mfg_date.year, column, cell),
        "expDate.month" => assign(&mut item.exp_date.month, column, cell),
        "expDate.year" => assign(&mut item.exp_date.year, column, cell),
        "countryOfOrigin" => item.country_of_origin = cell.to_string(),
        _ => {}
    }
}

fn parse_bool(cell: &str) -> Option<bool> {
    match cell {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_type_parsing() {
        assert_eq!("csv".parse::<FileType>().unwrap(), FileType::Csv);
        assert_eq!(" JSON ".parse::<FileType>().unwrap(), FileType::Json);
        assert!(matches!(
            "xlsx".parse::<FileType>(),
            Err(IngestError::UnsupportedFileType(t)) if t == "xlsx"
        ));
    }

    #[test]
    fn test_sniff() {
        assert_eq!(FileType::sniff(b"\xEF\xBB\xBFproductName\nMilk").unwrap(), FileType::Csv);
        assert_eq!(FileType::sniff(b"sep=;\nproductName;price").unwrap(), FileType::Csv);
        assert_eq!(FileType::sniff(b"productName,price\nMilk,3").unwrap(), FileType::Csv);
        assert_eq!(
            FileType::sniff(b"  [{\"productName\": \"Milk\", \"price\": 3}]").unwrap(),
            FileType::Json
        );
        assert_eq!(FileType::sniff(b"{\"productName\": \"Milk\"}").unwrap(), FileType::Json);
        assert!(matches!(FileType::sniff(b"just words"), Err(IngestError::UnknownFileType)));
    }

    #[test]
    fn test_csv_malformed_cell_defaults() {
        let batch = parse(b"productName,price\nMilk,abc\nBread,2.25\n", Some(FileType::Csv)).unwrap();

        assert!(batch.failures.is_empty());
        assert_eq!(batch.candidates.len(), 2);
        assert_eq!(batch.candidates[0].item.product_name, "Milk");
        assert_eq!(batch.candidates[0].item.price, 0.0);
        assert_eq!(batch.candidates[1].item.price, 2.25);
    }

    #[test]
    fn test_csv_typed_columns() {
        let csv = "productName,category,weight,weightUnit,vegetarian,itemPackageQuantity,mfgDate.month,mfgDate.year,expDate.month,unknownColumn\n\
                   Paneer,Dairy,200,gm,true,2,4,2024,yes,ignored\n";
        let batch = parse(csv.as_bytes(), Some(FileType::Csv)).unwrap();
        let item = &batch.candidates[0].item;

        assert_eq!(item.category, "Dairy");
        assert_eq!(item.weight, 200.0);
        assert_eq!(item.weight_unit, "gm");
        assert!(item.vegetarian);
        assert_eq!(item.item_package_quantity, 2);
        assert_eq!(item.mfg_date.month, 4);
        assert_eq!(item.mfg_date.year, 2024);
        assert_eq!(item.exp_date.month, 0);
    }

    #[test]
    fn test_csv_bom_and_separator_line() {
        let data = b"\xEF\xBB\xBFsep=;\nproductName;price\nRice;1.5\n";
        let batch = parse(data, None).unwrap();

        assert_eq!(batch.candidates.len(), 1);
        assert_eq!(batch.candidates[0].item.product_name, "Rice");
        assert_eq!(batch.candidates[0].item.price, 1.5);
    }

    #[test]
    fn test_csv_row_without_name_fails_alone() {
        let batch = parse(b"productName,price\n,4\nEggs,5\n", Some(FileType::Csv)).unwrap();

        assert_eq!(batch.candidates.len(), 1);
        assert_eq!(batch.candidates[0].row, 2);
        assert_eq!(
            batch.failures,
            vec![RowFailure {
                row: 1,
                reason: "missing productName".to_string()
            }]
        );
    }

    #[test]
    fn test_csv_short_row_keeps_defaults() {
        let batch = parse(b"productName,price,brand\nTea\n", Some(FileType::Csv)).unwrap();
        assert_eq!(batch.candidates[0].item.product_name, "Tea");
        assert!(batch.candidates[0].item.brand.is_empty());
    }

    #[test]
    fn test_json_array() {
        let data = br#"[{"productName": "Milk", "price": 3.5}, {"productName": "Bread"}]"#;
        let batch = parse(data, Some(FileType::Json)).unwrap();

        let names: Vec<_> = batch
            .candidates
            .iter()
            .map(|c| c.item.product_name.as_str())
            .collect();
        assert_eq!(names, vec!["Milk", "Bread"]);
    }

    #[test]
    fn test_json_object_stream() {
        let data = b"{\"productName\": \"Milk\"}\n{\"productName\": \"Eggs\"}\n";
        let batch = parse(data, None).unwrap();
        assert_eq!(batch.candidates.len(), 2);
        assert_eq!(batch.candidates[1].row, 2);
    }

    #[test]
    fn test_json_bad_element_fails_alone() {
        let data = br#"[{"productName": "Milk", "price": "cheap"}, {"productName": "Eggs"}]"#;
        let batch = parse(data, Some(FileType::Json)).unwrap();

        assert_eq!(batch.candidates.len(), 1);
        assert_eq!(batch.candidates[0].item.product_name, "Eggs");
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].row, 1);
    }

    #[test]
    fn test_json_syntax_error_fails_file() {
        let result = parse(b"[{\"productName\": ", Some(FileType::Json));
        assert!(matches!(result, Err(IngestError::Json(_))));
    }

    #[test]
    fn test_empty_json_is_empty_batch() {
        let batch = parse(b"[]", Some(FileType::Json)).unwrap();
        assert!(batch.candidates.is_empty());
        assert!(batch.failures.is_empty());
    }
}
