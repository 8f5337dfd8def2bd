use anyhow::Context;
use clap::{Parser, Subcommand};
use sales_etl::analytics::{render_table, Query};
use sales_etl::config::Config;
use sales_etl::{logging, Pipeline, Store};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "sales-etl")]
#[command(about = "Normalize a flat sales extract into a relational store and query it")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./sales-etl.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding config and environment
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drop and rebuild every table from the source file
    Load {
        /// Tab-separated source file, overriding config and environment
        #[arg(long)]
        source: Option<PathBuf>,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one of the analytical queries
    Query {
        /// Query name, see `list-queries`
        name: String,
        /// Full customer name for customer-orders and customer-total
        #[arg(long)]
        customer: Option<String>,
        /// Print rows as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the available analytical queries
    ListQueries,
    /// Write every table as JSON
    Dump {
        /// Output file; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the SHA-256 digest of the loaded table contents
    Digest,
}

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(database) = cli.database {
        config.database.path = database;
    }

    let _log_guard = logging::init_logging(&config.logging);

    let result = run(cli.command, config);
    if let Err(e) = &result {
        error!("Command failed: {:#}", e);
    }
    result
}

fn run(command: Commands, mut config: Config) -> anyhow::Result<()> {
    match command {
        Commands::Load { source, json } => {
            if let Some(source) = source {
                config.source.path = source;
            }
            info!(
                source = %config.source.path.display(),
                database = %config.database.path.display(),
                "Running load"
            );

            let report = Pipeline::run_file(&config.source.path, &config.database.path)
                .with_context(|| format!("loading {}", config.source.path.display()))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("📊 Load results ({} source records):", report.source_records);
                for table in &report.tables {
                    println!("   {:<16} {}", table.table, table.rows);
                }
                println!("   Took {:.3}s", report.duration_secs);
            }
        }
        Commands::Query {
            name,
            customer,
            json,
        } => {
            let query = Query::from_name(&name)?;
            let store = open_read_only(&config)?;
            let result = store.run_query(query, customer.as_deref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print!("{}", render_table(&result));
            }
        }
        Commands::ListQueries => {
            for query in Query::ALL {
                let marker = if query.takes_customer() { " (--customer)" } else { "" };
                println!("{:<28} {}{}", query.name(), query.description(), marker);
            }
        }
        Commands::Dump { output } => {
            let snapshot = open_read_only(&config)?.snapshot()?;
            match output {
                Some(path) => snapshot.write_to(&path)?,
                None => println!("{}", snapshot.to_json()?),
            }
        }
        Commands::Digest => {
            let snapshot = open_read_only(&config)?.snapshot()?;
            println!("{}", snapshot.digest()?);
        }
    }
    Ok(())
}

fn open_read_only(config: &Config) -> anyhow::Result<Store> {
    Store::open_read_only(&config.database.path)
        .with_context(|| format!("opening database {}", config.database.path.display()))
}
