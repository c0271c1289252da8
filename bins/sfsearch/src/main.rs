//! sfsearch - storefront product search
//!
//! Runs searches, suggestions and filter queries against a catalog file, or
//! serves them over HTTP.

use anyhow::Context;
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use storefront_core::config::Config;
use storefront_core::error::exit_codes;
use storefront_core::{Error, ErrorCode};
use storefront_search::{FilterRequest, SearchEngine, SearchRequest, StaticCatalog};
use storefront_telemetry::{metrics, TelemetryConfig};

mod output;
mod server;

use output::Status;

/// Product keyword search over a storefront catalog
#[derive(Parser)]
#[command(name = "sfsearch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Catalog JSON file with `categories` and `products`
    #[arg(short, long, global = true, env = "SFSEARCH_CATALOG", default_value = "catalog.json")]
    catalog: PathBuf,

    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the catalog
    Search {
        /// Query text
        query: String,

        /// Page number, starting at 1
        #[arg(short, long, default_value = "1")]
        page: usize,

        /// Results per page (defaults to the configured page size)
        #[arg(short = 'n', long)]
        page_size: Option<usize>,

        /// relevance, price_asc, price_desc, newest or popularity
        #[arg(short, long)]
        sort: Option<String>,

        /// Lowest price to include
        #[arg(long)]
        min_price: Option<f64>,

        /// Highest price to include
        #[arg(long)]
        max_price: Option<f64>,

        /// Restrict to one category id
        #[arg(long)]
        category: Option<String>,

        /// Restrict to one availability value
        #[arg(long)]
        availability: Option<String>,
    },

    /// Autocomplete a prefix from previously executed queries
    Suggest {
        /// Prefix to complete
        prefix: String,

        /// Maximum suggestions
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// File of past queries, one per line, replayed before suggesting
        #[arg(long)]
        history: Option<PathBuf>,
    },

    /// Show filter values and counts
    Filters {
        /// Scope price and availability counts to a category id
        #[arg(long)]
        category: Option<String>,
    },

    /// Load the catalog and print index statistics
    Stats,

    /// Serve the search API over HTTP
    Serve {
        /// Listen address (defaults to general.bind_addr from the config)
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let Some(err) = err.downcast_ref::<Error>() else {
        return exit_codes::FAILURE;
    };
    match err.code {
        ErrorCode::InvalidQuery | ErrorCode::InvalidFilter => exit_codes::INVALID_INPUT,
        ErrorCode::ConfigError
        | ErrorCode::ConfigNotFound
        | ErrorCode::ConfigParseError
        | ErrorCode::ConfigValidationError => exit_codes::CONFIG_ERROR,
        ErrorCode::DependencyUnavailable | ErrorCode::CatalogError | ErrorCode::CatalogParseError => {
            exit_codes::UNAVAILABLE
        }
        ErrorCode::SearchTimeout => exit_codes::TIMEOUT,
        _ => exit_codes::FAILURE,
    }
}

fn load_catalog(path: &Path) -> Result<StaticCatalog, Error> {
    StaticCatalog::from_json_file(path).map_err(|e| {
        Error::catalog(e.to_string())
            .with_context(format!("loading {}", path.display()))
            .with_suggestion("Pass --catalog with a JSON file containing `categories` and `products`")
    })
}

async fn build_engine(cli: &Cli, config: &Config) -> anyhow::Result<Arc<SearchEngine>> {
    let catalog = Arc::new(load_catalog(&cli.catalog)?);
    let engine = SearchEngine::builder(config.schema.clone())
        .catalog(catalog)
        .build()
        .await
        .map_err(Error::from)?;
    Ok(Arc::new(engine))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    let engine = build_engine(&cli, &config).await?;

    match &cli.command {
        Commands::Search {
            query,
            page,
            page_size,
            sort,
            min_price,
            max_price,
            category,
            availability,
        } => {
            let request = SearchRequest {
                query: query.clone(),
                filters: FilterRequest {
                    price_min: *min_price,
                    price_max: *max_price,
                    category_id: category.clone(),
                    availability: availability.clone(),
                },
                sort_by: sort.clone(),
                page: Some(*page),
                page_size: *page_size,
                ..SearchRequest::default()
            };
            let response = engine.search(request).await.map_err(Error::from)?;
            if cli.json {
                print_json(&response)?;
            } else {
                output::print_search(&response);
            }
        }

        Commands::Suggest { prefix, limit, history } => {
            if let Some(path) = history {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading history file {}", path.display()))?;
                for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
                    if let Err(err) = engine.search(SearchRequest::new(line)).await {
                        Status::warning(&format!("Skipped history entry \"{line}\": {err}"));
                    }
                }
                engine.flush_analytics().await;
            }
            let suggestions = engine.suggestions(prefix, *limit);
            if cli.json {
                print_json(&suggestions)?;
            } else {
                output::print_suggestions(prefix, &suggestions);
            }
        }

        Commands::Filters { category } => {
            let options = engine.filter_options(category.as_deref()).map_err(Error::from)?;
            if cli.json {
                print_json(&options)?;
            } else {
                output::print_filter_options(&options);
            }
        }

        Commands::Stats => {
            let stats = engine.stats();
            let snapshot = metrics().snapshot();
            if cli.json {
                print_json(&serde_json::json!({ "engine": stats, "metrics": snapshot }))?;
            } else {
                output::print_stats(&stats, &snapshot);
            }
        }

        Commands::Serve { bind } => {
            let addr = match bind {
                Some(addr) => *addr,
                None => config.schema.general.bind_addr.parse::<SocketAddr>().map_err(|e| {
                    Error::config_invalid(format!(
                        "general.bind_addr '{}' is not a socket address: {e}",
                        config.schema.general.bind_addr
                    ))
                })?,
            };
            if !cli.json {
                Status::info(&format!("Serving on http://{addr}"));
            }
            server::serve(engine, addr).await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            Status::error(&err.to_string());
            return ExitCode::from(exit_codes::CONFIG_ERROR as u8);
        }
    };

    let logging = &config.schema.logging;
    let serving = matches!(cli.command, Commands::Serve { .. });
    let telemetry = TelemetryConfig {
        log_level: if cli.verbose {
            "debug".to_string()
        } else if serving {
            logging.level.clone()
        } else {
            "warn".to_string()
        },
        json: logging.json,
        log_file: logging.file.clone(),
        ..TelemetryConfig::default()
    };
    let _guard = match storefront_telemetry::init_with_config(&telemetry) {
        Ok(guard) => guard,
        Err(err) => {
            Status::error(&format!("Failed to initialize logging: {err}"));
            return ExitCode::FAILURE;
        }
    };

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {}", "Error:".red().bold(), err);
            ExitCode::from(exit_code_for(&err) as u8)
        }
    }
}
