/// Source file layout. Column positions are fixed; the header row is skipped.
pub const FIELD_DELIMITER: char = '\t';
pub const LIST_DELIMITER: char = ';';
pub const COLUMN_COUNT: usize = 11;

pub const COL_CUSTOMER_NAME: usize = 0;
pub const COL_ADDRESS: usize = 1;
pub const COL_CITY: usize = 2;
pub const COL_COUNTRY: usize = 3;
pub const COL_REGION: usize = 4;
pub const COL_PRODUCT_NAMES: usize = 5;
pub const COL_CATEGORY_NAMES: usize = 6;
pub const COL_CATEGORY_DESCRIPTIONS: usize = 7;
pub const COL_UNIT_PRICES: usize = 8;
pub const COL_QUANTITIES: usize = 9;
pub const COL_ORDER_DATES: usize = 10;

/// Date format carried in the source and the ISO format stored in OrderDetail.
pub const SOURCE_DATE_FORMAT: &str = "%Y%m%d";
pub const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

// Table names, in load order
pub const REGION_TABLE: &str = "Region";
pub const COUNTRY_TABLE: &str = "Country";
pub const CUSTOMER_TABLE: &str = "Customer";
pub const PRODUCT_CATEGORY_TABLE: &str = "ProductCategory";
pub const PRODUCT_TABLE: &str = "Product";
pub const ORDER_DETAIL_TABLE: &str = "OrderDetail";

/// All tables in dependency order. Parents always precede children.
pub const LOAD_ORDER: [&str; 6] = [
    REGION_TABLE,
    COUNTRY_TABLE,
    CUSTOMER_TABLE,
    PRODUCT_CATEGORY_TABLE,
    PRODUCT_TABLE,
    ORDER_DETAIL_TABLE,
];

// Defaults used when neither the config file nor the environment say otherwise
pub const DEFAULT_CONFIG_PATH: &str = "sales-etl.toml";
pub const DEFAULT_SOURCE_PATH: &str = "data/data.tsv";
pub const DEFAULT_DATABASE_PATH: &str = "normalized.db";
pub const DEFAULT_LOG_DIRECTORY: &str = "logs";
pub const DEFAULT_LOG_FILTER: &str = "sales_etl=info";

pub const ENV_SOURCE_PATH: &str = "SALES_ETL_SOURCE";
pub const ENV_DATABASE_PATH: &str = "SALES_ETL_DATABASE";
