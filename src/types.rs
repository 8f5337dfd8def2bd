use crate::error::{EtlError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Surrogate key type shared by every table.
pub type RowId = i64;

/// Unit price. Always finite, totally ordered so it can take part in a natural key.
///
/// Negative zero is stored as `0.0`: SQLite keeps only one zero, so the key
/// must not tell them apart either.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(f64);

impl Price {
    pub fn new(value: f64) -> Option<Self> {
        value.is_finite().then_some(Self(value + 0.0))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl PartialEq for Price {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Price {}

impl PartialOrd for Price {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Price {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for Price {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Natural key of a customer. Field order drives sorting: full name first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CustomerKey {
    pub full_name: String,
    pub address: String,
    pub city: String,
    pub country: String,
}

/// Natural key of a product: (name, price, category name).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProductKey {
    pub name: String,
    pub unit_price: Price,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
    pub id: RowId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Country {
    pub id: RowId,
    pub name: String,
    pub region_id: RowId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Customer {
    pub id: RowId,
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub city: String,
    pub country_id: RowId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductCategory {
    pub id: RowId,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub id: RowId,
    pub name: String,
    pub unit_price: Price,
    pub category_id: RowId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderDetail {
    pub id: RowId,
    pub customer_id: RowId,
    pub product_id: RowId,
    pub order_date: NaiveDate,
    pub quantity: u32,
}

/// Immutable natural key → surrogate id mapping read back from a loaded table.
#[derive(Debug, Clone)]
pub struct IdMap<K> {
    table: &'static str,
    ids: HashMap<K, RowId>,
}

impl<K: Hash + Eq> IdMap<K> {
    pub fn new(table: &'static str, ids: HashMap<K, RowId>) -> Self {
        Self { table, ids }
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Resolves a natural key, failing with a referential error when it is absent.
    pub fn resolve<Q>(&self, key: &Q) -> Result<RowId>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
    {
        self.ids.get(key).copied().ok_or_else(|| EtlError::UnknownKey {
            table: self.table,
            key: format!("{key:?}"),
        })
    }
}

impl<K: Hash + Eq> FromIterator<(K, RowId)> for IdMap<K> {
    /// Builds an untitled map; mostly useful in tests.
    fn from_iter<I: IntoIterator<Item = (K, RowId)>>(iter: I) -> Self {
        Self::new("?", iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_rejects_non_finite() {
        assert!(Price::new(f64::NAN).is_none());
        assert!(Price::new(f64::INFINITY).is_none());
        assert_eq!(Price::new(9.99).unwrap().value(), 9.99);
    }

    #[test]
    fn test_price_folds_negative_zero() {
        let negative = Price::new(-0.0).unwrap();
        let zero = Price::new(0.0).unwrap();

        assert_eq!(negative, zero);
        assert_eq!(negative.value().to_bits(), 0.0f64.to_bits());

        let ids: IdMap<Price> = [(zero, 1)].into_iter().collect();
        assert_eq!(ids.resolve(&negative).unwrap(), 1);
    }

    #[test]
    fn test_product_key_sorts_by_name_then_price() {
        let mut keys = vec![
            ProductKey {
                name: "Widget".into(),
                unit_price: Price::new(9.99).unwrap(),
                category: "Tools".into(),
            },
            ProductKey {
                name: "Gadget".into(),
                unit_price: Price::new(19.99).unwrap(),
                category: "Tools".into(),
            },
            ProductKey {
                name: "Gadget".into(),
                unit_price: Price::new(5.0).unwrap(),
                category: "Tools".into(),
            },
        ];
        keys.sort();

        let order: Vec<(&str, f64)> = keys
            .iter()
            .map(|k| (k.name.as_str(), k.unit_price.value()))
            .collect();
        assert_eq!(order, vec![("Gadget", 5.0), ("Gadget", 19.99), ("Widget", 9.99)]);
    }

    #[test]
    fn test_id_map_reports_missing_key() {
        let map = IdMap::new("Region", HashMap::from([("NA".to_string(), 1)]));
        assert_eq!(map.resolve("NA").unwrap(), 1);

        match map.resolve("EU") {
            Err(EtlError::UnknownKey { table, key }) => {
                assert_eq!(table, "Region");
                assert!(key.contains("EU"));
            }
            other => panic!("expected UnknownKey, got {other:?}"),
        }
    }
}
