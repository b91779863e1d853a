//! Feed parser
//!
//! Turns a delimited-text inventory feed into [`CandidateItem`]s. Header
//! spellings vary between point-of-sale exports, so columns are matched
//! through an alias table after folding case and punctuation. Bad rows come
//! back as [`RowError`]s; only an unreadable feed fails the whole parse.

use crate::error::{AppError, Result, RowError};
use crate::inventory::{CandidateItem, CaratBands, FeedStatus, Location};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::collections::HashMap;

/// Logical feed columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    SerialNumber,
    ItemNumber,
    Type,
    Code,
    CaratRange,
    Quality,
    MetalType,
    MetalCode,
    CaratCode,
    TotalCaratWeight,
    UnitPrice,
    Description,
    DateCreated,
    ShipmentDate,
    LocationCode,
    SalespersonCode,
    Status,
}

/// Accepted header spellings, already folded (lowercase, alphanumerics only)
const ALIASES: &[(Column, &[&str])] = &[
    (
        Column::SerialNumber,
        &["serialno", "serialnumber", "serial", "stockno", "stocknumber", "jobno", "jobnumber"],
    ),
    (Column::ItemNumber, &["itemno", "itemnumber", "item"]),
    (Column::Type, &["type", "category", "itemtype"]),
    (Column::Code, &["code", "styleno", "stylecode", "style", "stylenumber"]),
    (Column::CaratRange, &["caratrange"]),
    (Column::Quality, &["quality"]),
    (Column::MetalType, &["metaltype", "goldcolor", "metal"]),
    (Column::MetalCode, &["metalcode"]),
    (Column::CaratCode, &["caratcode"]),
    (
        Column::TotalCaratWeight,
        &["totalcaratweight", "caratweight", "tcw", "totalweight"],
    ),
    (Column::UnitPrice, &["unitprice", "price", "retailprice"]),
    (Column::Description, &["description", "desc"]),
    (Column::DateCreated, &["datecreated", "createddate", "createdate"]),
    (Column::ShipmentDate, &["shipmentdate", "shipdate", "memodate"]),
    (Column::LocationCode, &["locationcode", "location", "memostatus"]),
    (Column::SalespersonCode, &["salespersoncode", "salesperson", "salesrep"]),
    (Column::Status, &["status", "itemstatus", "jobstatus"]),
];

const DELIMITERS: [u8; 4] = [b',', b'\t', b';', b'|'];

fn fold_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Resolve a header row into column positions; the first matching header wins
fn resolve_columns(headers: &[String]) -> HashMap<Column, usize> {
    let mut columns = HashMap::new();
    for (index, header) in headers.iter().enumerate() {
        let folded = fold_header(header);
        if let Some((column, _)) = ALIASES
            .iter()
            .find(|(_, aliases)| aliases.contains(&folded.as_str()))
        {
            columns.entry(*column).or_insert(index);
        }
    }
    columns
}

/// Pick the delimiter that splits the header line into the most fields
fn sniff_delimiter(first_line: &[u8]) -> u8 {
    let mut best = (b',', 0usize);
    for delimiter in DELIMITERS {
        let mut in_quotes = false;
        let mut count = 0;
        for byte in first_line {
            match *byte {
                b'"' => in_quotes = !in_quotes,
                b if b == delimiter && !in_quotes => count += 1,
                _ => {}
            }
        }
        if count > best.1 {
            best = (delimiter, count);
        }
    }
    best.0
}

/// Strip currency symbols, separators and whitespace, then parse.
/// Unparsable input yields `0.0` rather than an error.
pub fn parse_price(raw: &str) -> f64 {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// `MM/DD/YYYY`, ISO dates and ISO date-times; anything else is `None`
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    const DATE_FORMATS: [&str; 5] = ["%m/%d/%Y", "%Y-%m-%d", "%m/%d/%y", "%m-%d-%Y", "%Y/%m/%d"];
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date);
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.date_naive());
    }

    const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%m/%d/%Y %H:%M"];
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|dt| dt.date())
}

/// Spreadsheet exports turn numeric serials into `1234.0`
fn normalize_serial(raw: &str) -> String {
    let serial = raw.trim();
    match serial.strip_suffix(".0") {
        Some(stem) if !stem.is_empty() && stem.chars().all(|c| c.is_ascii_digit()) => {
            stem.to_string()
        }
        _ => serial.to_string(),
    }
}

/// A parsed feed whose rows are produced lazily
pub struct FeedRows<'a> {
    records: csv::ByteRecordsIntoIter<&'a [u8]>,
    columns: HashMap<Column, usize>,
    bands: &'a CaratBands,
    last_line: u64,
}

/// Open a feed. Fails only if the payload is empty, binary, or lacks the
/// serial-number and price columns.
pub fn parse_feed<'a>(bytes: &'a [u8], bands: &'a CaratBands) -> Result<FeedRows<'a>> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(AppError::FeedUnreadable("feed is empty".to_string()));
    }
    if bytes.iter().take(4096).any(|b| *b == 0) {
        return Err(AppError::FeedUnreadable(
            "feed is not delimited text (binary content)".to_string(),
        ));
    }

    let first_line = bytes.split(|b| *b == b'\n').next().unwrap_or_default();
    let delimiter = sniff_delimiter(first_line);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .byte_headers()
        .map_err(|e| AppError::FeedUnreadable(format!("cannot read header row: {}", e)))?
        .iter()
        .map(|h| String::from_utf8_lossy(h).into_owned())
        .collect();

    let columns = resolve_columns(&headers);
    for (required, name) in [
        (Column::SerialNumber, "serial number"),
        (Column::UnitPrice, "price"),
    ] {
        if !columns.contains_key(&required) {
            return Err(AppError::FeedUnreadable(format!(
                "no {} column in header [{}]",
                name,
                headers.join(", ")
            )));
        }
    }

    tracing::debug!(
        "Feed header resolved {} of {} columns (delimiter {:?})",
        columns.len(),
        headers.len(),
        delimiter as char
    );

    Ok(FeedRows {
        records: reader.into_byte_records(),
        columns,
        bands,
        last_line: 1,
    })
}

impl<'a> FeedRows<'a> {
    pub fn has_column(&self, column: Column) -> bool {
        self.columns.contains_key(&column)
    }

    fn cell(&self, record: &csv::ByteRecord, column: Column) -> Option<String> {
        let index = *self.columns.get(&column)?;
        let raw = record.get(index)?;
        let value = String::from_utf8_lossy(raw).trim().to_string();
        (!value.is_empty()).then_some(value)
    }

    /// `Ok(None)` for a row whose cells are all blank
    fn build(
        &self,
        line: u64,
        record: &csv::ByteRecord,
    ) -> std::result::Result<Option<CandidateItem>, RowError> {
        if record.iter().all(|field| field.iter().all(u8::is_ascii_whitespace)) {
            return Ok(None);
        }

        let serial = self
            .cell(record, Column::SerialNumber)
            .map(|s| normalize_serial(&s))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| RowError::new(line, None, "missing serial number"))?;

        let mut item = CandidateItem::new(line, &serial);
        item.item_number = self.cell(record, Column::ItemNumber);
        item.item_type = self.cell(record, Column::Type);
        item.code = self.cell(record, Column::Code);
        item.quality = self.cell(record, Column::Quality);
        item.metal_type = self.cell(record, Column::MetalType);
        item.metal_code = self.cell(record, Column::MetalCode);
        item.description = self.cell(record, Column::Description);
        item.salesperson_code = self.cell(record, Column::SalespersonCode);

        item.carat_code = self
            .cell(record, Column::CaratCode)
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .map(|v| v.trunc() as i64);
        item.total_carat_weight = self
            .cell(record, Column::TotalCaratWeight)
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite());
        item.unit_price = self.cell(record, Column::UnitPrice).map(|v| parse_price(&v));

        item.date_created = self.cell(record, Column::DateCreated).and_then(|v| parse_date(&v));
        item.shipment_date = self.cell(record, Column::ShipmentDate).and_then(|v| parse_date(&v));
        item.location_code = self
            .cell(record, Column::LocationCode)
            .and_then(|v| Location::normalize(&v));
        item.status = FeedStatus::classify(self.cell(record, Column::Status).as_deref());

        // Weight is authoritative; an explicit range column is the fallback
        item.carat_range = match item.total_carat_weight {
            Some(weight) => Some(self.bands.bucket(weight)),
            None => self.cell(record, Column::CaratRange),
        };

        Ok(Some(item))
    }
}

impl<'a> Iterator for FeedRows<'a> {
    type Item = std::result::Result<CandidateItem, RowError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = self.records.next()?;
            let line = match &record {
                Ok(r) => r.position().map(|p| p.line()),
                Err(e) => e.position().map(|p| p.line()),
            }
            .unwrap_or(self.last_line + 1);
            self.last_line = line;

            return Some(match record {
                Ok(record) => match self.build(line, &record) {
                    // Trailing/blank lines are noise, not errors
                    Ok(None) => continue,
                    Ok(Some(item)) => Ok(item),
                    Err(err) => Err(err),
                },
                Err(e) => Err(RowError::new(line, None, format!("malformed row: {}", e))),
            });
        }
    }
}
