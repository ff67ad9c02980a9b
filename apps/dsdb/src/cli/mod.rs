//! # dsdb CLI Module
//!
//! This module implements the CLI interface for dsdb.
//!
//! ## Available Commands
//!
//! - `init` - Create an empty catalog database
//! - `status` - Show row counts of every catalog table
//! - `ingest` - Catalog a JSON file or an opaque file as a Dataset
//! - `list` - List datasets
//! - `show` - Show one dataset with its sources and runs
//! - `export` - Reconstruct a dataset and write it as JSON
//! - `run` - Record an algorithm run and its output dataset
//! - `lineage` - Walk a dataset's provenance upstream or downstream

mod commands;

use crate::config::{self, Overrides};
use clap::{Parser, Subcommand};
use dsdb_core::{DsdbError, IntrospectorKind};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// dsdb - content-addressed dataset catalog
///
/// Identical content is stored once; every derived dataset remembers the
/// run and the inputs it came from.
#[derive(Parser, Debug)]
#[command(name = "dsdb")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a TOML config file (default: ./dsdb.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the catalog database
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Directory of the blob store (default: <database>.blobs)
    #[arg(long, global = true)]
    pub blobs: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new empty catalog
    Init {
        /// Remove an existing database first
        #[arg(short, long)]
        force: bool,
    },

    /// Show catalog status
    Status,

    /// Catalog a file as a dataset
    Ingest {
        /// Input file: JSON array of objects, JSON object, or any file with --kind object
        #[arg(short, long)]
        file: PathBuf,

        /// Introspector (table, mapping, object); inferred from JSON when omitted
        #[arg(short, long)]
        kind: Option<IntrospectorKind>,

        /// Dataset name (default: content hash)
        #[arg(short, long)]
        name: Option<String>,

        /// Dataset description
        #[arg(long)]
        description: Option<String>,

        /// Expected field type, as field=type (repeatable)
        #[arg(short = 't', long = "type")]
        types: Vec<String>,

        /// Coerce values to their expected type instead of failing
        #[arg(long)]
        coerce: bool,

        /// Field holding filesystem paths (repeatable)
        #[arg(long = "path-column")]
        path_columns: Vec<String>,

        /// Rewrite path prefixes in path columns, as from=to (repeatable)
        #[arg(long = "replace")]
        replacements: Vec<String>,

        /// Require every referenced file to exist
        #[arg(long)]
        check_files: bool,

        /// Copy referenced files into the blob store and point path columns at the copies
        #[arg(long)]
        store_files: bool,

        /// Pick name@v2, name@v3, ... when the name is taken
        #[arg(long)]
        version_name: bool,
    },

    /// List all datasets
    List,

    /// Show one dataset (id, name or content hash)
    Show {
        dataset: String,
    },

    /// Reconstruct a dataset and write it as JSON
    Export {
        /// Dataset id, name or content hash
        dataset: String,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also list the files referenced by path columns
        #[arg(long)]
        files: bool,
    },

    /// Record a run of an algorithm and catalog its output
    Run {
        /// Algorithm name
        #[arg(short, long)]
        algorithm: String,

        /// Algorithm version
        #[arg(long = "algorithm-version", default_value = "0")]
        algorithm_version: String,

        /// Input dataset id, name or content hash (repeatable)
        #[arg(short, long = "input")]
        inputs: Vec<String>,

        /// Output file
        #[arg(short, long)]
        file: PathBuf,

        /// Output introspector (table, mapping, object)
        #[arg(short, long)]
        kind: Option<IntrospectorKind>,

        /// Run parameter, as key=value (repeatable)
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Run name
        #[arg(short, long)]
        name: Option<String>,

        /// Output dataset name (default: content hash)
        #[arg(short, long)]
        output_name: Option<String>,

        /// Run description
        #[arg(long)]
        description: Option<String>,
    },

    /// Show the provenance of a dataset
    Lineage {
        /// Dataset id, name or content hash
        dataset: String,

        /// Walk towards derived datasets instead of inputs
        #[arg(long)]
        descendants: bool,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), DsdbError> {
    let overrides = Overrides {
        config: cli.config,
        database: cli.database,
        blobs: cli.blobs,
    };
    let config = config::resolve(&overrides, |key| std::env::var(key).ok())?;
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Init { force }) => cmd_init(&config, force),
        Some(Commands::Status) => cmd_status(&config, json_mode),
        Some(Commands::Ingest {
            file,
            kind,
            name,
            description,
            types,
            coerce,
            path_columns,
            replacements,
            check_files,
            store_files,
            version_name,
        }) => cmd_ingest(
            &config,
            json_mode,
            &IngestArgs {
                file,
                kind,
                name,
                description,
                types,
                coerce,
                path_columns,
                replacements,
                check_files,
                store_files,
                version_name,
            },
        ),
        Some(Commands::List) => cmd_list(&config, json_mode),
        Some(Commands::Show { dataset }) => cmd_show(&config, json_mode, &dataset),
        Some(Commands::Export {
            dataset,
            output,
            files,
        }) => cmd_export(&config, &dataset, output.as_deref(), files),
        Some(Commands::Run {
            algorithm,
            algorithm_version,
            inputs,
            file,
            kind,
            params,
            name,
            output_name,
            description,
        }) => cmd_run(
            &config,
            json_mode,
            &RunArgs {
                algorithm,
                algorithm_version,
                inputs,
                file,
                kind,
                params,
                name,
                output_name,
                description,
            },
        ),
        Some(Commands::Lineage {
            dataset,
            descendants,
        }) => cmd_lineage(&config, json_mode, &dataset, descendants),
        None => {
            // No subcommand - show status by default
            cmd_status(&config, json_mode)
        }
    }
}
