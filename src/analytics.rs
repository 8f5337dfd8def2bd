//! Read-only analytical queries over the normalized schema.
//!
//! Every query is a static SQLite statement. The two per-customer queries take
//! the customer's full name as a bound parameter.

use crate::db::{QueryResult, Store};
use crate::error::{EtlError, Result};
use serde::Serialize;
use std::fmt::Write as _;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Query {
    CustomerOrders,
    CustomerTotal,
    CustomerTotals,
    RegionTotals,
    CountryTotals,
    CountryRankInRegion,
    TopCountryPerRegion,
    QuarterlyCustomerTotals,
    TopCustomersPerQuarter,
    MonthlyTotals,
    OrderGaps,
}

impl Query {
    pub const ALL: [Query; 11] = [
        Query::CustomerOrders,
        Query::CustomerTotal,
        Query::CustomerTotals,
        Query::RegionTotals,
        Query::CountryTotals,
        Query::CountryRankInRegion,
        Query::TopCountryPerRegion,
        Query::QuarterlyCustomerTotals,
        Query::TopCustomersPerQuarter,
        Query::MonthlyTotals,
        Query::OrderGaps,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Query::CustomerOrders => "customer-orders",
            Query::CustomerTotal => "customer-total",
            Query::CustomerTotals => "customer-totals",
            Query::RegionTotals => "region-totals",
            Query::CountryTotals => "country-totals",
            Query::CountryRankInRegion => "country-rank-in-region",
            Query::TopCountryPerRegion => "top-country-per-region",
            Query::QuarterlyCustomerTotals => "quarterly-customer-totals",
            Query::TopCustomersPerQuarter => "top-customers-per-quarter",
            Query::MonthlyTotals => "monthly-totals",
            Query::OrderGaps => "order-gaps",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|q| q.name() == name)
            .ok_or_else(|| EtlError::UnknownQuery(name.to_string()))
    }

    pub fn description(self) -> &'static str {
        match self {
            Query::CustomerOrders => "Every order line of one customer with its total",
            Query::CustomerTotal => "Total spent by one customer",
            Query::CustomerTotals => "Total spent by every customer, largest first",
            Query::RegionTotals => "Sales total per region",
            Query::CountryTotals => "Sales total per country",
            Query::CountryRankInRegion => "Countries ranked by sales within their region",
            Query::TopCountryPerRegion => "Best selling country of each region",
            Query::QuarterlyCustomerTotals => "Per-customer totals for every quarter",
            Query::TopCustomersPerQuarter => "Five best customers of every quarter",
            Query::MonthlyTotals => "Sales per calendar month, ranked",
            Query::OrderGaps => "Days between consecutive order dates per customer",
        }
    }

    /// Whether the query needs a customer name.
    pub fn takes_customer(self) -> bool {
        matches!(self, Query::CustomerOrders | Query::CustomerTotal)
    }

    pub fn sql(self) -> &'static str {
        match self {
            Query::CustomerOrders => {
                "SELECT
                    c.FirstName || ' ' || c.LastName AS Name,
                    p.ProductName,
                    o.OrderDate,
                    p.ProductUnitPrice,
                    o.QuantityOrdered,
                    ROUND(p.ProductUnitPrice * o.QuantityOrdered, 2) AS Total
                FROM OrderDetail o
                JOIN Customer c ON o.CustomerID = c.CustomerID
                JOIN Product p ON o.ProductID = p.ProductID
                WHERE c.FirstName || ' ' || c.LastName = ?1
                ORDER BY o.OrderID"
            }
            Query::CustomerTotal => {
                "SELECT
                    c.FirstName || ' ' || c.LastName AS Name,
                    ROUND(SUM(p.ProductUnitPrice * o.QuantityOrdered), 2) AS Total
                FROM OrderDetail o
                JOIN Customer c ON o.CustomerID = c.CustomerID
                JOIN Product p ON o.ProductID = p.ProductID
                WHERE c.FirstName || ' ' || c.LastName = ?1
                GROUP BY Name"
            }
            Query::CustomerTotals => {
                "SELECT
                    c.FirstName || ' ' || c.LastName AS Name,
                    ROUND(SUM(p.ProductUnitPrice * o.QuantityOrdered), 2) AS Total
                FROM OrderDetail o
                JOIN Customer c ON o.CustomerID = c.CustomerID
                JOIN Product p ON o.ProductID = p.ProductID
                GROUP BY c.CustomerID, Name
                ORDER BY Total DESC, Name ASC, c.CustomerID ASC"
            }
            Query::RegionTotals => {
                "SELECT
                    r.Region,
                    ROUND(SUM(p.ProductUnitPrice * o.QuantityOrdered), 2) AS Total
                FROM OrderDetail o
                JOIN Customer c ON o.CustomerID = c.CustomerID
                JOIN Country n ON c.CountryID = n.CountryID
                JOIN Region r ON n.RegionID = r.RegionID
                JOIN Product p ON o.ProductID = p.ProductID
                GROUP BY r.Region
                ORDER BY Total DESC, r.Region ASC"
            }
            Query::CountryTotals => {
                "SELECT
                    n.Country,
                    ROUND(SUM(p.ProductUnitPrice * o.QuantityOrdered), 2) AS Total
                FROM OrderDetail o
                JOIN Customer c ON o.CustomerID = c.CustomerID
                JOIN Country n ON c.CountryID = n.CountryID
                JOIN Product p ON o.ProductID = p.ProductID
                GROUP BY n.Country
                ORDER BY Total DESC, n.Country ASC"
            }
            Query::CountryRankInRegion => {
                "SELECT
                    r.Region,
                    n.Country,
                    ROUND(SUM(p.ProductUnitPrice * o.QuantityOrdered), 2) AS CountryTotal,
                    RANK() OVER (
                        PARTITION BY r.Region
                        ORDER BY SUM(p.ProductUnitPrice * o.QuantityOrdered) DESC
                    ) AS CountryRegionalRank
                FROM OrderDetail o
                JOIN Customer c ON o.CustomerID = c.CustomerID
                JOIN Country n ON c.CountryID = n.CountryID
                JOIN Region r ON n.RegionID = r.RegionID
                JOIN Product p ON o.ProductID = p.ProductID
                GROUP BY r.Region, n.Country
                ORDER BY r.Region ASC, CountryRegionalRank ASC, n.Country ASC"
            }
            Query::TopCountryPerRegion => {
                "WITH RankedCountries AS (
                    SELECT
                        r.Region,
                        n.Country,
                        ROUND(SUM(p.ProductUnitPrice * o.QuantityOrdered), 2) AS Total,
                        RANK() OVER (
                            PARTITION BY r.Region
                            ORDER BY SUM(p.ProductUnitPrice * o.QuantityOrdered) DESC
                        ) AS TotalRank
                    FROM OrderDetail o
                    JOIN Customer c ON o.CustomerID = c.CustomerID
                    JOIN Country n ON c.CountryID = n.CountryID
                    JOIN Region r ON n.RegionID = r.RegionID
                    JOIN Product p ON o.ProductID = p.ProductID
                    GROUP BY r.Region, n.Country
                )
                SELECT Region, Country, Total, TotalRank
                FROM RankedCountries
                WHERE TotalRank = 1
                ORDER BY Region ASC, Country ASC"
            }
            Query::QuarterlyCustomerTotals => {
                "SELECT
                    'Q' || ((CAST(strftime('%m', o.OrderDate) AS INTEGER) + 2) / 3) AS Quarter,
                    CAST(strftime('%Y', o.OrderDate) AS INTEGER) AS Year,
                    o.CustomerID,
                    ROUND(SUM(p.ProductUnitPrice * o.QuantityOrdered), 2) AS Total
                FROM OrderDetail o
                JOIN Product p ON o.ProductID = p.ProductID
                GROUP BY Quarter, Year, o.CustomerID
                ORDER BY Year ASC, Quarter ASC, o.CustomerID ASC"
            }
            Query::TopCustomersPerQuarter => {
                "WITH CustomerSales AS (
                    SELECT
                        'Q' || ((CAST(strftime('%m', o.OrderDate) AS INTEGER) + 2) / 3) AS Quarter,
                        CAST(strftime('%Y', o.OrderDate) AS INTEGER) AS Year,
                        o.CustomerID,
                        ROUND(SUM(p.ProductUnitPrice * o.QuantityOrdered), 2) AS Total
                    FROM OrderDetail o
                    JOIN Product p ON o.ProductID = p.ProductID
                    GROUP BY Quarter, Year, o.CustomerID
                ),
                RankedSales AS (
                    SELECT
                        Quarter, Year, CustomerID, Total,
                        RANK() OVER (PARTITION BY Quarter, Year ORDER BY Total DESC) AS CustomerRank
                    FROM CustomerSales
                )
                SELECT Quarter, Year, CustomerID, Total, CustomerRank
                FROM RankedSales
                WHERE CustomerRank <= 5
                ORDER BY Year ASC, Quarter ASC, CustomerRank ASC, CustomerID ASC"
            }
            Query::MonthlyTotals => {
                "SELECT
                    CASE strftime('%m', o.OrderDate)
                        WHEN '01' THEN 'January'
                        WHEN '02' THEN 'February'
                        WHEN '03' THEN 'March'
                        WHEN '04' THEN 'April'
                        WHEN '05' THEN 'May'
                        WHEN '06' THEN 'June'
                        WHEN '07' THEN 'July'
                        WHEN '08' THEN 'August'
                        WHEN '09' THEN 'September'
                        WHEN '10' THEN 'October'
                        WHEN '11' THEN 'November'
                        WHEN '12' THEN 'December'
                    END AS Month,
                    ROUND(SUM(p.ProductUnitPrice * o.QuantityOrdered), 2) AS Total,
                    RANK() OVER (ORDER BY SUM(p.ProductUnitPrice * o.QuantityOrdered) DESC) AS TotalRank
                FROM OrderDetail o
                JOIN Product p ON o.ProductID = p.ProductID
                GROUP BY Month
                ORDER BY TotalRank ASC, Month ASC"
            }
            Query::OrderGaps => {
                "WITH OrderedDates AS (
                    SELECT DISTINCT CustomerID, OrderDate
                    FROM OrderDetail
                ),
                LaggedDates AS (
                    SELECT
                        CustomerID,
                        OrderDate,
                        LAG(OrderDate, 1) OVER (PARTITION BY CustomerID ORDER BY OrderDate) AS PreviousOrderDate
                    FROM OrderedDates
                )
                SELECT
                    c.CustomerID,
                    c.FirstName,
                    c.LastName,
                    n.Country,
                    ld.OrderDate,
                    ld.PreviousOrderDate,
                    CAST(julianday(ld.OrderDate) - julianday(ld.PreviousOrderDate) AS INTEGER) AS MaxDaysWithoutOrder
                FROM LaggedDates ld
                JOIN Customer c ON ld.CustomerID = c.CustomerID
                JOIN Country n ON c.CountryID = n.CountryID
                WHERE ld.PreviousOrderDate IS NOT NULL
                ORDER BY MaxDaysWithoutOrder DESC, c.CustomerID ASC, ld.OrderDate ASC"
            }
        }
    }
}

impl Store {
    /// Runs one catalog query. `customer` is required by the per-customer queries
    /// and ignored by the rest.
    #[instrument(skip(self, query), fields(query = query.name()))]
    pub fn run_query(&self, query: Query, customer: Option<&str>) -> Result<QueryResult> {
        let result = if query.takes_customer() {
            let name = customer.ok_or(EtlError::MissingParameter {
                query: query.name(),
                param: "customer",
            })?;
            self.select(query.sql(), &[&name])?
        } else {
            self.select(query.sql(), &[])?
        };
        debug!(rows = result.rows.len(), "Query finished");
        Ok(result)
    }
}

/// Renders a result as a left-aligned text table.
pub fn render_table(result: &QueryResult) -> String {
    let cells: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| row.iter().map(cell_text).collect())
        .collect();

    let mut widths: Vec<usize> = result.columns.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    write_row(&mut out, &result.columns, &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    write_row(&mut out, &rule, &widths);
    for row in &cells {
        write_row(&mut out, row, &widths);
    }
    let _ = writeln!(out, "({} rows)", result.rows.len());
    out
}

fn write_row(out: &mut String, cells: &[String], widths: &[usize]) {
    let line: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect();
    let _ = writeln!(out, "{}", line.join(" | ").trim_end());
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_names_round_trip() {
        for query in Query::ALL {
            assert_eq!(Query::from_name(query.name()).unwrap(), query);
        }
        assert!(matches!(
            Query::from_name("drop-everything"),
            Err(EtlError::UnknownQuery(_))
        ));
    }

    #[test]
    fn test_only_customer_queries_bind_a_parameter() {
        for query in Query::ALL {
            assert_eq!(query.sql().contains("?1"), query.takes_customer(), "{}", query.name());
        }
    }

    #[test]
    fn test_render_table_aligns_columns() {
        let result = QueryResult {
            columns: vec!["Region".into(), "Total".into()],
            rows: vec![vec![json!("NA"), json!(39.97)], vec![json!("APAC"), json!(null)]],
        };
        let text = render_table(&result);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Region | Total");
        assert_eq!(lines[1], "------ | -----");
        assert_eq!(lines[2], "NA     | 39.97");
        assert_eq!(lines[3], "APAC   | NULL");
        assert_eq!(lines[4], "(2 rows)");
    }

    #[test]
    fn test_customer_query_requires_name() {
        let store = Store::open_in_memory().unwrap();
        let err = store.run_query(Query::CustomerTotal, None).unwrap_err();
        assert!(matches!(err, EtlError::MissingParameter { param: "customer", .. }));
    }
}
