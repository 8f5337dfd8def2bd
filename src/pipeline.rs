use crate::constants::*;
use crate::db::Store;
use crate::error::Result;
use crate::normalize;
use crate::source::{read_source, SourceRecord};
use metrics::{counter, histogram};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing::{error, info, instrument};

/// Rows loaded into one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableReport {
    pub table: &'static str,
    pub rows: usize,
}

/// Result of a complete pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub source_records: usize,
    pub tables: Vec<TableReport>,
    pub duration_secs: f64,
}

impl RunReport {
    pub fn rows(&self, table: &str) -> Option<usize> {
        self.tables.iter().find(|t| t.table == table).map(|t| t.rows)
    }
}

pub struct Pipeline;

impl Pipeline {
    /// Reads `source` in full, then rebuilds the store at `database` from it.
    pub fn run_file(source: &Path, database: &Path) -> Result<RunReport> {
        let records = read_source(source)?;
        let mut store = Store::open(database)?;
        Self::run(&mut store, &records)
    }

    /// Drops every table and rebuilds them in dependency order.
    ///
    /// Each child stage resolves its foreign keys through a mapping read back
    /// from the parent table it depends on. The first failure aborts the run.
    #[instrument(skip_all, fields(records = records.len()))]
    pub fn run(store: &mut Store, records: &[SourceRecord]) -> Result<RunReport> {
        info!("🚀 Starting normalization pipeline");
        counter!("sales_etl_pipeline_runs_total").increment(1);
        let started = Instant::now();
        let mut tables = Vec::with_capacity(LOAD_ORDER.len());

        store.reset()?;

        let rows = stage(REGION_TABLE, || {
            store.load_regions(&normalize::regions(records)?)
        })?;
        tables.push(TableReport { table: REGION_TABLE, rows });

        let region_ids = store.region_ids()?;
        let rows = stage(COUNTRY_TABLE, || {
            store.load_countries(&normalize::countries(records, &region_ids)?)
        })?;
        tables.push(TableReport { table: COUNTRY_TABLE, rows });

        let country_ids = store.country_ids()?;
        let rows = stage(CUSTOMER_TABLE, || {
            store.load_customers(&normalize::customers(records, &country_ids)?)
        })?;
        tables.push(TableReport { table: CUSTOMER_TABLE, rows });

        let rows = stage(PRODUCT_CATEGORY_TABLE, || {
            store.load_categories(&normalize::categories(records)?)
        })?;
        tables.push(TableReport { table: PRODUCT_CATEGORY_TABLE, rows });

        let category_ids = store.category_ids()?;
        let rows = stage(PRODUCT_TABLE, || {
            store.load_products(&normalize::products(records, &category_ids)?)
        })?;
        tables.push(TableReport { table: PRODUCT_TABLE, rows });

        let customer_ids = store.customer_ids()?;
        let product_ids = store.product_ids()?;
        let rows = stage(ORDER_DETAIL_TABLE, || {
            store.load_order_details(&normalize::order_details(
                records,
                &customer_ids,
                &product_ids,
            )?)
        })?;
        tables.push(TableReport { table: ORDER_DETAIL_TABLE, rows });

        let duration_secs = started.elapsed().as_secs_f64();
        histogram!("sales_etl_pipeline_duration_seconds").record(duration_secs);
        info!("✅ Pipeline finished in {:.3}s", duration_secs);

        Ok(RunReport {
            source_records: records.len(),
            tables,
            duration_secs,
        })
    }
}

/// Runs one derive + load stage inside its own span, recording timing and row counts.
fn stage(table: &'static str, run: impl FnOnce() -> Result<usize>) -> Result<usize> {
    let span = tracing::info_span!("stage", table);
    let _enter = span.enter();

    let t_stage = Instant::now();
    match run() {
        Ok(rows) => {
            histogram!("sales_etl_stage_duration_seconds", "table" => table)
                .record(t_stage.elapsed().as_secs_f64());
            counter!("sales_etl_rows_loaded_total", "table" => table).increment(rows as u64);
            info!("Loaded {} rows", rows);
            Ok(rows)
        }
        Err(e) => {
            counter!("sales_etl_stage_failures_total", "table" => table).increment(1);
            error!("Stage failed: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EtlError;
    use crate::source::parse_source;

    const HEADER: &str = "Name\tAddress\tCity\tCountry\tRegion\tProductName\tProductCategory\tProductCategoryDescription\tProductUnitPrice\tQuantityOrderded\tOrderDate";

    #[test]
    fn test_run_reports_rows_per_table() {
        let content = format!(
            "{HEADER}\nJohn Smith\t1 Main St\tSeattle\tUSA\tNA\tWidget;Gadget\tTools;Tools\tT desc;T desc\t9.99;19.99\t2;1\t20230101;20230105\n"
        );
        let records = parse_source(&content).unwrap();
        let mut store = Store::open_in_memory().unwrap();

        let report = Pipeline::run(&mut store, &records).unwrap();
        assert_eq!(report.source_records, 1);
        assert_eq!(report.rows(REGION_TABLE), Some(1));
        assert_eq!(report.rows(PRODUCT_TABLE), Some(2));
        assert_eq!(report.rows(ORDER_DETAIL_TABLE), Some(2));

        let order: Vec<&str> = report.tables.iter().map(|t| t.table).collect();
        assert_eq!(order, LOAD_ORDER.to_vec());
    }

    #[test]
    fn test_conflict_aborts_remaining_stages() {
        let content = format!(
            "{HEADER}\n\
             John Smith\t1 Main St\tSeattle\tUSA\tNA\tWidget\tTools\tT desc\t9.99\t2\t20230101\n\
             Jane Doe\t2 Main St\tSeattle\tUSA\tEU\tWidget\tTools\tT desc\t9.99\t1\t20230102\n"
        );
        let records = parse_source(&content).unwrap();
        let mut store = Store::open_in_memory().unwrap();

        let err = Pipeline::run(&mut store, &records).unwrap_err();
        assert!(matches!(err, EtlError::Conflict { table: "Country", .. }));

        // Region committed; Country and everything after it never created
        assert_eq!(store.row_count(REGION_TABLE).unwrap(), 2);
        assert!(store.row_count(COUNTRY_TABLE).is_err());
        assert!(store.row_count(ORDER_DETAIL_TABLE).is_err());
    }
}
