//! The relational store: schema catalog, table rebuilds and id mappings.

use crate::constants::*;
use crate::error::{EtlError, Result};
use crate::types::*;
use rusqlite::types::{Type, ValueRef};
use rusqlite::{params, Connection, OpenFlags, Row, Statement, ToSql};
use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;
use std::path::Path;
use tracing::{debug, info};

/// Static description of one table. Every statement the store issues against a
/// table comes from here; row data is always bound as parameters.
#[derive(Debug)]
pub struct TableSchema {
    pub name: &'static str,
    pub create: &'static str,
    pub drop: &'static str,
    pub insert: &'static str,
    /// All rows, ordered by primary key.
    pub select: &'static str,
    pub count: &'static str,
}

pub static REGION: TableSchema = TableSchema {
    name: REGION_TABLE,
    create: "CREATE TABLE Region (
        RegionID INTEGER NOT NULL PRIMARY KEY,
        Region   TEXT    NOT NULL UNIQUE
    )",
    drop: "DROP TABLE IF EXISTS Region",
    insert: "INSERT INTO Region (RegionID, Region) VALUES (?1, ?2)",
    select: "SELECT RegionID, Region FROM Region ORDER BY RegionID",
    count: "SELECT COUNT(*) FROM Region",
};

pub static COUNTRY: TableSchema = TableSchema {
    name: COUNTRY_TABLE,
    create: "CREATE TABLE Country (
        CountryID INTEGER NOT NULL PRIMARY KEY,
        Country   TEXT    NOT NULL UNIQUE,
        RegionID  INTEGER NOT NULL REFERENCES Region (RegionID)
    )",
    drop: "DROP TABLE IF EXISTS Country",
    insert: "INSERT INTO Country (CountryID, Country, RegionID) VALUES (?1, ?2, ?3)",
    select: "SELECT CountryID, Country, RegionID FROM Country ORDER BY CountryID",
    count: "SELECT COUNT(*) FROM Country",
};

pub static CUSTOMER: TableSchema = TableSchema {
    name: CUSTOMER_TABLE,
    create: "CREATE TABLE Customer (
        CustomerID INTEGER NOT NULL PRIMARY KEY,
        FirstName  TEXT    NOT NULL,
        LastName   TEXT    NOT NULL,
        Address    TEXT    NOT NULL,
        City       TEXT    NOT NULL,
        CountryID  INTEGER NOT NULL REFERENCES Country (CountryID)
    )",
    drop: "DROP TABLE IF EXISTS Customer",
    insert: "INSERT INTO Customer (CustomerID, FirstName, LastName, Address, City, CountryID)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    select: "SELECT CustomerID, FirstName, LastName, Address, City, CountryID
             FROM Customer ORDER BY CustomerID",
    count: "SELECT COUNT(*) FROM Customer",
};

pub static PRODUCT_CATEGORY: TableSchema = TableSchema {
    name: PRODUCT_CATEGORY_TABLE,
    create: "CREATE TABLE ProductCategory (
        ProductCategoryID          INTEGER NOT NULL PRIMARY KEY,
        ProductCategory            TEXT    NOT NULL UNIQUE,
        ProductCategoryDescription TEXT    NOT NULL
    )",
    drop: "DROP TABLE IF EXISTS ProductCategory",
    insert: "INSERT INTO ProductCategory (ProductCategoryID, ProductCategory, ProductCategoryDescription)
             VALUES (?1, ?2, ?3)",
    select: "SELECT ProductCategoryID, ProductCategory, ProductCategoryDescription
             FROM ProductCategory ORDER BY ProductCategoryID",
    count: "SELECT COUNT(*) FROM ProductCategory",
};

pub static PRODUCT: TableSchema = TableSchema {
    name: PRODUCT_TABLE,
    create: "CREATE TABLE Product (
        ProductID         INTEGER NOT NULL PRIMARY KEY,
        ProductName       TEXT    NOT NULL,
        ProductUnitPrice  REAL    NOT NULL,
        ProductCategoryID INTEGER NOT NULL REFERENCES ProductCategory (ProductCategoryID),
        UNIQUE (ProductName, ProductUnitPrice, ProductCategoryID)
    )",
    drop: "DROP TABLE IF EXISTS Product",
    insert: "INSERT INTO Product (ProductID, ProductName, ProductUnitPrice, ProductCategoryID)
             VALUES (?1, ?2, ?3, ?4)",
    select: "SELECT ProductID, ProductName, ProductUnitPrice, ProductCategoryID
             FROM Product ORDER BY ProductID",
    count: "SELECT COUNT(*) FROM Product",
};

pub static ORDER_DETAIL: TableSchema = TableSchema {
    name: ORDER_DETAIL_TABLE,
    create: "CREATE TABLE OrderDetail (
        OrderID         INTEGER NOT NULL PRIMARY KEY,
        CustomerID      INTEGER NOT NULL REFERENCES Customer (CustomerID),
        ProductID       INTEGER NOT NULL REFERENCES Product (ProductID),
        OrderDate       TEXT    NOT NULL,
        QuantityOrdered INTEGER NOT NULL
    )",
    drop: "DROP TABLE IF EXISTS OrderDetail",
    insert: "INSERT INTO OrderDetail (OrderID, CustomerID, ProductID, OrderDate, QuantityOrdered)
             VALUES (?1, ?2, ?3, ?4, ?5)",
    select: "SELECT OrderID, CustomerID, ProductID, OrderDate, QuantityOrdered
             FROM OrderDetail ORDER BY OrderID",
    count: "SELECT COUNT(*) FROM OrderDetail",
};

/// Every table in load order.
pub static TABLES: [&TableSchema; 6] = [
    &REGION,
    &COUNTRY,
    &CUSTOMER,
    &PRODUCT_CATEGORY,
    &PRODUCT,
    &ORDER_DETAIL,
];

pub fn schema_for(table: &str) -> Option<&'static TableSchema> {
    TABLES.iter().copied().find(|t| t.name.eq_ignore_ascii_case(table))
}

/// Column names plus rows of an arbitrary read query, values already in JSON form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// Owns the single connection used for a pipeline run or a read session.
/// The connection is closed when the store is dropped.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        debug!("Opening store at {}", path.display());
        Self::init(Connection::open(path)?)
    }

    /// Opens an existing database for read-only consumers.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    /// Drops every table, children first, in a single transaction.
    pub fn reset(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        for table in TABLES.iter().rev() {
            tx.execute(table.drop, [])?;
        }
        tx.commit()?;
        info!("Dropped all tables");
        Ok(())
    }

    /// Creates `schema` and inserts every row in one transaction.
    /// Any failure rolls the whole table back.
    fn load<T>(
        &mut self,
        schema: &TableSchema,
        rows: &[T],
        mut insert: impl FnMut(&mut Statement<'_>, &T) -> rusqlite::Result<usize>,
    ) -> Result<usize> {
        let tx = self.conn.transaction()?;
        tx.execute(schema.create, [])?;
        {
            let mut stmt = tx.prepare(schema.insert)?;
            for row in rows {
                insert(&mut stmt, row)?;
            }
        }
        tx.commit()?;
        info!(table = schema.name, rows = rows.len(), "Loaded table");
        Ok(rows.len())
    }

    pub fn load_regions(&mut self, rows: &[Region]) -> Result<usize> {
        self.load(&REGION, rows, |stmt, r| stmt.execute(params![r.id, r.name]))
    }

    pub fn load_countries(&mut self, rows: &[Country]) -> Result<usize> {
        self.load(&COUNTRY, rows, |stmt, c| {
            stmt.execute(params![c.id, c.name, c.region_id])
        })
    }

    pub fn load_customers(&mut self, rows: &[Customer]) -> Result<usize> {
        self.load(&CUSTOMER, rows, |stmt, c| {
            stmt.execute(params![
                c.id,
                c.first_name,
                c.last_name,
                c.address,
                c.city,
                c.country_id
            ])
        })
    }

    pub fn load_categories(&mut self, rows: &[ProductCategory]) -> Result<usize> {
        self.load(&PRODUCT_CATEGORY, rows, |stmt, c| {
            stmt.execute(params![c.id, c.name, c.description])
        })
    }

    pub fn load_products(&mut self, rows: &[Product]) -> Result<usize> {
        self.load(&PRODUCT, rows, |stmt, p| {
            stmt.execute(params![p.id, p.name, p.unit_price.value(), p.category_id])
        })
    }

    pub fn load_order_details(&mut self, rows: &[OrderDetail]) -> Result<usize> {
        self.load(&ORDER_DETAIL, rows, |stmt, o| {
            stmt.execute(params![
                o.id,
                o.customer_id,
                o.product_id,
                o.order_date.format(ISO_DATE_FORMAT).to_string(),
                o.quantity
            ])
        })
    }

    fn id_map<K: Hash + Eq + std::fmt::Debug>(
        &self,
        table: &'static str,
        sql: &str,
        mut entry: impl FnMut(&Row<'_>) -> rusqlite::Result<(K, RowId)>,
    ) -> Result<IdMap<K>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        let mut ids = HashMap::new();
        while let Some(row) = rows.next()? {
            let (key, id) = entry(row)?;
            if let Some(previous) = ids.insert(key, id) {
                return Err(EtlError::Conflict {
                    table,
                    key: format!("id {id}"),
                    reason: format!("natural key also held by id {previous}"),
                });
            }
        }
        debug!(table, entries = ids.len(), "Built id mapping");
        Ok(IdMap::new(table, ids))
    }

    pub fn region_ids(&self) -> Result<IdMap<String>> {
        self.id_map(REGION_TABLE, "SELECT Region, RegionID FROM Region", |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
    }

    pub fn country_ids(&self) -> Result<IdMap<String>> {
        self.id_map(COUNTRY_TABLE, "SELECT Country, CountryID FROM Country", |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
    }

    /// Customers keyed by their full natural key, country name included.
    pub fn customer_ids(&self) -> Result<IdMap<CustomerKey>> {
        self.id_map(
            CUSTOMER_TABLE,
            "SELECT c.FirstName || ' ' || c.LastName, c.Address, c.City, n.Country, c.CustomerID
             FROM Customer c
             JOIN Country n ON c.CountryID = n.CountryID",
            |row| {
                let key = CustomerKey {
                    full_name: row.get(0)?,
                    address: row.get(1)?,
                    city: row.get(2)?,
                    country: row.get(3)?,
                };
                Ok((key, row.get(4)?))
            },
        )
    }

    pub fn category_ids(&self) -> Result<IdMap<String>> {
        self.id_map(
            PRODUCT_CATEGORY_TABLE,
            "SELECT ProductCategory, ProductCategoryID FROM ProductCategory",
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
    }

    /// Products keyed by (name, price, category name).
    pub fn product_ids(&self) -> Result<IdMap<ProductKey>> {
        self.id_map(
            PRODUCT_TABLE,
            "SELECT p.ProductName, p.ProductUnitPrice, c.ProductCategory, p.ProductID
             FROM Product p
             JOIN ProductCategory c ON p.ProductCategoryID = c.ProductCategoryID",
            |row| {
                let price: f64 = row.get(1)?;
                let unit_price = Price::new(price).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        1,
                        Type::Real,
                        format!("non-finite unit price {price}").into(),
                    )
                })?;
                let key = ProductKey {
                    name: row.get(0)?,
                    unit_price,
                    category: row.get(2)?,
                };
                Ok((key, row.get(3)?))
            },
        )
    }

    pub fn row_count(&self, table: &str) -> Result<i64> {
        let schema = schema_for(table).ok_or_else(|| EtlError::UnknownKey {
            table: "table catalog",
            key: table.to_string(),
        })?;
        Ok(self.conn.query_row(schema.count, [], |row| row.get(0))?)
    }

    /// Runs a read query and collects every row.
    pub fn select(&self, sql: &str, params: &[&dyn ToSql]) -> Result<QueryResult> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let width = columns.len();

        let mut rows = stmt.query(params)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(json_value(row.get_ref(i)?));
            }
            out.push(values);
        }
        Ok(QueryResult { columns, rows: out })
    }
}

fn json_value(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::String(hex::encode(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn seeded() -> Store {
        let mut store = Store::open_in_memory().unwrap();
        store.reset().unwrap();
        store
            .load_regions(&[Region { id: 1, name: "NA".into() }])
            .unwrap();
        store
            .load_countries(&[Country { id: 1, name: "USA".into(), region_id: 1 }])
            .unwrap();
        store
    }

    #[test]
    fn test_region_mapping_reads_back_loaded_rows() {
        let store = seeded();
        let ids = store.region_ids().unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids.resolve("NA").unwrap(), 1);
        assert_eq!(store.row_count("Country").unwrap(), 1);
    }

    #[test]
    fn test_failed_insert_rolls_back_whole_table() {
        let mut store = seeded();
        let customers = vec![
            Customer {
                id: 1,
                first_name: "John".into(),
                last_name: "Smith".into(),
                address: "1 Main St".into(),
                city: "Seattle".into(),
                country_id: 1,
            },
            Customer {
                id: 2,
                first_name: "Jane".into(),
                last_name: "Doe".into(),
                address: "2 Main St".into(),
                city: "Seattle".into(),
                // no such country
                country_id: 99,
            },
        ];

        let result = store.load_customers(&customers);
        assert!(matches!(result, Err(EtlError::Database(_))));

        // Table creation was part of the same transaction
        assert!(store.row_count("Customer").is_err());
    }

    #[test]
    fn test_customer_mapping_uses_full_natural_key() {
        let mut store = seeded();
        store
            .load_customers(&[Customer {
                id: 1,
                first_name: "Mary".into(),
                last_name: "Ann Lee".into(),
                address: "5 Elm".into(),
                city: "Portland".into(),
                country_id: 1,
            }])
            .unwrap();

        let ids = store.customer_ids().unwrap();
        let key = CustomerKey {
            full_name: "Mary Ann Lee".into(),
            address: "5 Elm".into(),
            city: "Portland".into(),
            country: "USA".into(),
        };
        assert_eq!(ids.resolve(&key).unwrap(), 1);
    }

    #[test]
    fn test_order_dates_stored_as_iso_text() {
        let mut store = seeded();
        store
            .load_customers(&[Customer {
                id: 1,
                first_name: "John".into(),
                last_name: "Smith".into(),
                address: "1 Main St".into(),
                city: "Seattle".into(),
                country_id: 1,
            }])
            .unwrap();
        store
            .load_categories(&[ProductCategory {
                id: 1,
                name: "Tools".into(),
                description: "T desc".into(),
            }])
            .unwrap();
        store
            .load_products(&[Product {
                id: 1,
                name: "Widget".into(),
                unit_price: Price::new(9.99).unwrap(),
                category_id: 1,
            }])
            .unwrap();
        store
            .load_order_details(&[OrderDetail {
                id: 1,
                customer_id: 1,
                product_id: 1,
                order_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
                quantity: 2,
            }])
            .unwrap();

        let result = store.select(ORDER_DETAIL.select, &[]).unwrap();
        assert_eq!(result.rows[0][3], serde_json::json!("2023-01-01"));
        assert_eq!(result.rows[0][4], serde_json::json!(2));

        let products = store.product_ids().unwrap();
        let key = ProductKey {
            name: "Widget".into(),
            unit_price: Price::new(9.99).unwrap(),
            category: "Tools".into(),
        };
        assert_eq!(products.resolve(&key).unwrap(), 1);
    }

    #[test]
    fn test_reset_on_empty_store_is_a_no_op() {
        let mut store = Store::open_in_memory().unwrap();
        store.reset().unwrap();
        store.reset().unwrap();
    }
}
