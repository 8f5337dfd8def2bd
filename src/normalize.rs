//! Dedupe and key assignment.
//!
//! Every function here is pure: it takes the parsed source (and, for child
//! tables, the parent id mappings) and returns rows with surrogate ids already
//! assigned. Ids are dense, start at 1 and follow ascending natural key order.

use crate::constants::{COUNTRY_TABLE, PRODUCT_CATEGORY_TABLE};
use crate::error::{EtlError, Result};
use crate::source::{normalize_full_name, split_full_name, OrderLine, SourceRecord};
use crate::types::*;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

/// Assigns sequential ids starting at 1 to already-ordered natural keys.
pub fn assign_ids<K, R>(
    keys: impl IntoIterator<Item = K>,
    mut build: impl FnMut(RowId, K) -> Result<R>,
) -> Result<Vec<R>> {
    keys.into_iter()
        .zip(1..)
        .map(|(key, id)| build(id, key))
        .collect()
}

pub fn customer_key(record: &SourceRecord) -> CustomerKey {
    CustomerKey {
        full_name: normalize_full_name(&record.customer_name),
        address: record.address.clone(),
        city: record.city.clone(),
        country: record.country.clone(),
    }
}

pub fn product_key(item: &OrderLine) -> ProductKey {
    ProductKey {
        name: item.product.clone(),
        unit_price: item.unit_price,
        category: item.category.clone(),
    }
}

pub fn regions(records: &[SourceRecord]) -> Result<Vec<Region>> {
    let names: BTreeSet<&str> = records.iter().map(|r| r.region.as_str()).collect();
    assign_ids(names, |id, name| {
        Ok(Region {
            id,
            name: name.to_string(),
        })
    })
}

pub fn countries(records: &[SourceRecord], region_ids: &IdMap<String>) -> Result<Vec<Country>> {
    let mut by_name: BTreeMap<&str, &str> = BTreeMap::new();
    for record in records {
        insert_consistent(
            &mut by_name,
            COUNTRY_TABLE,
            &record.country,
            &record.region,
            "listed under more than one region",
        )?;
    }

    assign_ids(by_name, |id, (name, region)| {
        Ok(Country {
            id,
            name: name.to_string(),
            region_id: region_ids.resolve(region)?,
        })
    })
}

pub fn customers(
    records: &[SourceRecord],
    country_ids: &IdMap<String>,
) -> Result<Vec<Customer>> {
    let keys: BTreeSet<CustomerKey> = records.iter().map(customer_key).collect();

    assign_ids(keys, |id, key| {
        let (first_name, last_name) = split_full_name(&key.full_name)?;
        Ok(Customer {
            id,
            first_name,
            last_name,
            country_id: country_ids.resolve(&key.country)?,
            address: key.address,
            city: key.city,
        })
    })
}

pub fn categories(records: &[SourceRecord]) -> Result<Vec<ProductCategory>> {
    let mut by_name: BTreeMap<&str, &str> = BTreeMap::new();
    for item in records.iter().flat_map(|r| &r.items) {
        insert_consistent(
            &mut by_name,
            PRODUCT_CATEGORY_TABLE,
            &item.category,
            &item.category_description,
            "has more than one description",
        )?;
    }

    assign_ids(by_name, |id, (name, description)| {
        Ok(ProductCategory {
            id,
            name: name.to_string(),
            description: description.to_string(),
        })
    })
}

pub fn products(
    records: &[SourceRecord],
    category_ids: &IdMap<String>,
) -> Result<Vec<Product>> {
    let keys: BTreeSet<ProductKey> = records
        .iter()
        .flat_map(|r| &r.items)
        .map(product_key)
        .collect();

    assign_ids(keys, |id, key| {
        Ok(Product {
            id,
            category_id: category_ids.resolve(&key.category)?,
            name: key.name,
            unit_price: key.unit_price,
        })
    })
}

/// One row per order line, numbered in source order.
pub fn order_details(
    records: &[SourceRecord],
    customer_ids: &IdMap<CustomerKey>,
    product_ids: &IdMap<ProductKey>,
) -> Result<Vec<OrderDetail>> {
    let mut rows = Vec::new();
    for record in records {
        let customer_id = customer_ids.resolve(&customer_key(record))?;
        for item in &record.items {
            rows.push(OrderDetail {
                id: rows.len() as RowId + 1,
                customer_id,
                product_id: product_ids.resolve(&product_key(item))?,
                order_date: item.order_date,
                quantity: item.quantity,
            });
        }
    }
    Ok(rows)
}

/// Records `key → value`, failing when the key was already seen with a different value.
fn insert_consistent<'a>(
    map: &mut BTreeMap<&'a str, &'a str>,
    table: &'static str,
    key: &'a str,
    value: &'a str,
    reason: &str,
) -> Result<()> {
    match map.entry(key) {
        Entry::Vacant(slot) => {
            slot.insert(value);
            Ok(())
        }
        Entry::Occupied(existing) if *existing.get() == value => Ok(()),
        Entry::Occupied(existing) => Err(EtlError::Conflict {
            table,
            key: key.to_string(),
            reason: format!("{reason} ('{}' and '{}')", existing.get(), value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::parse_line;

    fn record(text: &str) -> SourceRecord {
        parse_line(2, text).unwrap()
    }

    fn row(name: &str, region: &str, products: &str, categories: &str) -> SourceRecord {
        let n = products.split(';').count();
        let fill = |v: &str| vec![v; n].join(";");
        record(&format!(
            "{name}\t1 Main St\tSeattle\tUSA-{region}\t{region}\t{products}\t{categories}\t{}\t{}\t{}\t{}",
            fill("desc"),
            fill("1.5"),
            fill("1"),
            fill("20230101"),
        ))
    }

    #[test]
    fn test_regions_sorted_and_deduped() {
        let records: Vec<_> = ["NA", "EU", "NA", "APAC"]
            .iter()
            .map(|r| row("John Smith", r, "Widget", "Tools"))
            .collect();

        let regions = regions(&records).unwrap();
        let pairs: Vec<(RowId, &str)> = regions.iter().map(|r| (r.id, r.name.as_str())).collect();
        assert_eq!(pairs, vec![(1, "APAC"), (2, "EU"), (3, "NA")]);
    }

    #[test]
    fn test_country_in_two_regions_conflicts() {
        let mut records = vec![row("John Smith", "NA", "Widget", "Tools")];
        let mut moved = records[0].clone();
        moved.region = "EU".to_string();
        records.push(moved);

        let region_ids: IdMap<String> =
            [("NA".to_string(), 1), ("EU".to_string(), 2)].into_iter().collect();
        let err = countries(&records, &region_ids).unwrap_err();
        assert!(matches!(err, EtlError::Conflict { table: "Country", .. }));
    }

    #[test]
    fn test_customers_sort_by_full_name() {
        let records = vec![
            row("Zoe Adams", "NA", "Widget", "Tools"),
            row("Adam  Young", "NA", "Widget", "Tools"),
            row("Zoe Adams", "NA", "Gadget", "Tools"),
        ];
        let country_ids: IdMap<String> = [("USA-NA".to_string(), 1)].into_iter().collect();

        let customers = customers(&records, &country_ids).unwrap();
        assert_eq!(customers.len(), 2);
        assert_eq!(customers[0].id, 1);
        assert_eq!(customers[0].first_name, "Adam");
        assert_eq!(customers[0].last_name, "Young");
        assert_eq!(customers[1].last_name, "Adams");
    }

    #[test]
    fn test_category_with_two_descriptions_conflicts() {
        let mut r = row("John Smith", "NA", "Widget;Gadget", "Tools;Tools");
        r.items[1].category_description = "other".to_string();
        let err = categories(&[r]).unwrap_err();
        assert!(matches!(err, EtlError::Conflict { table: "ProductCategory", .. }));
    }

    #[test]
    fn test_products_keep_distinct_prices() {
        let mut r = row("John Smith", "NA", "Widget;Widget;Widget", "Tools;Tools;Tools");
        r.items[1].unit_price = Price::new(2.0).unwrap();
        let category_ids: IdMap<String> = [("Tools".to_string(), 1)].into_iter().collect();

        let products = products(&[r], &category_ids).unwrap();
        let prices: Vec<f64> = products.iter().map(|p| p.unit_price.value()).collect();
        assert_eq!(prices, vec![1.5, 2.0]);
        assert_eq!(products[1].id, 2);
    }

    #[test]
    fn test_order_details_fail_on_unknown_product() {
        let r = row("John Smith", "NA", "Widget", "Tools");
        let customer_ids: IdMap<CustomerKey> = [(customer_key(&r), 1)].into_iter().collect();
        let product_ids: IdMap<ProductKey> = IdMap::new("Product", Default::default());

        let err = order_details(&[r], &customer_ids, &product_ids).unwrap_err();
        assert!(matches!(err, EtlError::UnknownKey { table: "Product", .. }));
    }
}
