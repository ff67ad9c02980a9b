//! # dsdb - Dataset Catalog
//!
//! The main binary for the dsdb content-addressed dataset catalog.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 apps/dsdb (THE BINARY)                  │
//! │                                                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌────────────────┐   │
//! │  │    CLI      │  │   Config    │  │  JSON input /  │   │
//! │  │   (clap)    │  │   (toml)    │  │    export      │   │
//! │  └──────┬──────┘  └──────┬──────┘  └───────┬────────┘   │
//! │         └────────────────┼─────────────────┘            │
//! │                          ▼                              │
//! │                  ┌───────────────┐                      │
//! │                  │   dsdb-core   │                      │
//! │                  │ (THE ENGINE)  │                      │
//! │                  └───────────────┘                      │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! dsdb init
//! dsdb ingest -f cells.json -n cells -t n=int --coerce
//! dsdb run -a normalize --algorithm-version 1.0 -i cells -f normalized.json -p scale=2
//! dsdb lineage normalized --json-mode
//! ```

use clap::Parser;
use dsdb::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // DSDB_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("DSDB_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "dsdb=debug,dsdb_core=debug"
    } else {
        "dsdb=info,dsdb_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    // Logs go to stderr so that stdout stays parseable in --json-mode.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the dsdb startup banner.
fn print_banner() {
    println!(
        r#"
     _         _ _
  __| |___  __| | |__
 / _` / __|/ _` | '_ \
| (_| \__ \ (_| | |_) |
 \__,_|___/\__,_|_.__/

  Dataset Catalog v{}

  Content-addressed • Deduplicated • Traceable
"#,
        env!("CARGO_PKG_VERSION")
    );
}
