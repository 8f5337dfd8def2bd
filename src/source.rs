//! Reading and validating the flat, tab-separated sales extract.

use crate::constants::*;
use crate::error::{EtlError, Result};
use crate::types::Price;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument};

static DATE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{8}$").expect("valid date regex"));

/// One line of the source: a customer plus every order line placed in that context.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    /// 1-based line number in the source file, header included.
    pub line: usize,
    pub customer_name: String,
    pub address: String,
    pub city: String,
    pub country: String,
    pub region: String,
    pub items: Vec<OrderLine>,
}

/// A single position of the record's parallel list columns.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderLine {
    pub product: String,
    pub category: String,
    pub category_description: String,
    pub unit_price: Price,
    pub quantity: u32,
    pub order_date: NaiveDate,
}

/// Reads the whole source file, skipping the header row and blank lines.
///
/// Every record is parsed before returning, so a malformed line fails the run
/// before any table is touched.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn read_source<P: AsRef<Path>>(path: P) -> Result<Vec<SourceRecord>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| EtlError::Source {
        path: path.to_path_buf(),
        source,
    })?;
    let records = parse_source(&content)?;
    info!("Read {} source records", records.len());
    Ok(records)
}

/// Parses the full text of a source file. The first line is the header.
pub fn parse_source(content: &str) -> Result<Vec<SourceRecord>> {
    content
        .lines()
        .enumerate()
        .skip(1)
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(idx, text)| parse_line(idx + 1, text))
        .collect()
}

/// Parses one data line into a [`SourceRecord`].
pub fn parse_line(line: usize, text: &str) -> Result<SourceRecord> {
    let text = text.trim_end_matches(['\r', '\n']);
    let cols: Vec<&str> = text.split(FIELD_DELIMITER).collect();
    if cols.len() != COLUMN_COUNT {
        return Err(EtlError::malformed(
            line,
            format!("expected {} columns, found {}", COLUMN_COUNT, cols.len()),
        ));
    }

    split_full_name(cols[COL_CUSTOMER_NAME])?;
    for (col, label) in [(COL_COUNTRY, "country"), (COL_REGION, "region")] {
        if cols[col].trim().is_empty() {
            return Err(EtlError::malformed(line, format!("empty {label}")));
        }
    }

    let products = split_list(cols[COL_PRODUCT_NAMES]);
    let categories = split_list(cols[COL_CATEGORY_NAMES]);
    let descriptions = split_list(cols[COL_CATEGORY_DESCRIPTIONS]);
    let prices = split_list(cols[COL_UNIT_PRICES]);
    let quantities = split_list(cols[COL_QUANTITIES]);
    let dates = split_list(cols[COL_ORDER_DATES]);

    let len = products.len();
    let lengths = [
        categories.len(),
        descriptions.len(),
        prices.len(),
        quantities.len(),
        dates.len(),
    ];
    if lengths.iter().any(|&l| l != len) {
        return Err(EtlError::malformed(
            line,
            format!(
                "list columns differ in length (products={}, categories={}, descriptions={}, prices={}, quantities={}, dates={})",
                len, lengths[0], lengths[1], lengths[2], lengths[3], lengths[4]
            ),
        ));
    }

    let mut items = Vec::with_capacity(len);
    for i in 0..len {
        if products[i].is_empty() {
            return Err(EtlError::malformed(line, format!("empty product name at position {i}")));
        }
        if categories[i].is_empty() {
            return Err(EtlError::malformed(line, format!("empty category at position {i}")));
        }
        items.push(OrderLine {
            product: products[i].to_string(),
            category: categories[i].to_string(),
            category_description: descriptions[i].to_string(),
            unit_price: parse_price(line, prices[i])?,
            quantity: parse_quantity(line, quantities[i])?,
            order_date: parse_order_date(line, dates[i])?,
        });
    }

    debug!(line, items = items.len(), "Parsed source record");

    Ok(SourceRecord {
        line,
        customer_name: cols[COL_CUSTOMER_NAME].to_string(),
        address: cols[COL_ADDRESS].to_string(),
        city: cols[COL_CITY].to_string(),
        country: cols[COL_COUNTRY].to_string(),
        region: cols[COL_REGION].to_string(),
        items,
    })
}

fn split_list(field: &str) -> Vec<&str> {
    field.split(LIST_DELIMITER).collect()
}

fn parse_price(line: usize, token: &str) -> Result<Price> {
    token
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(Price::new)
        .ok_or_else(|| EtlError::malformed(line, format!("invalid unit price '{token}'")))
}

fn parse_quantity(line: usize, token: &str) -> Result<u32> {
    token
        .trim()
        .parse::<u32>()
        .map_err(|_| EtlError::malformed(line, format!("invalid quantity '{token}'")))
}

/// Parses an 8-digit `YYYYMMDD` token.
pub fn parse_order_date(line: usize, token: &str) -> Result<NaiveDate> {
    let token = token.trim();
    if !DATE_TOKEN.is_match(token) {
        return Err(EtlError::malformed(
            line,
            format!("order date '{token}' is not an 8-digit YYYYMMDD token"),
        ));
    }
    NaiveDate::parse_from_str(token, SOURCE_DATE_FORMAT)
        .map_err(|e| EtlError::malformed(line, format!("invalid order date '{token}': {e}")))
}

/// Splits a full name into (first name, last name).
///
/// The first whitespace-delimited token is the first name; the remaining tokens,
/// joined with single spaces, are the last name. Names without a last name are
/// rejected.
pub fn split_full_name(name: &str) -> Result<(String, String)> {
    let mut parts = name.split_whitespace();
    let first = parts.next().ok_or_else(|| EtlError::InvalidName {
        name: name.to_string(),
        reason: "name is empty",
    })?;
    let last = parts.collect::<Vec<_>>().join(" ");
    if last.is_empty() {
        return Err(EtlError::InvalidName {
            name: name.to_string(),
            reason: "name has no last name",
        });
    }
    Ok((first.to_string(), last))
}

/// Collapses runs of whitespace so a name matches its stored `FirstName || ' ' || LastName` form.
pub fn normalize_full_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}
