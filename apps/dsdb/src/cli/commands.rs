//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::input::{object_to_json, parse_parameter, parse_replacement, parse_type_rule, read_object};
use dsdb_core::{
    AlgorithmSpec, Catalog, CatalogConfig, Dataset, DatasetId, DsdbError, IngestRequest,
    IntrospectorKind, Lineage, NameConflictPolicy, RunRequest, SourceKind, ValidationRules,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// =============================================================================
// ARGUMENTS
// =============================================================================

/// Arguments of `dsdb ingest`.
#[derive(Debug, Clone, Default)]
pub struct IngestArgs {
    pub file: PathBuf,
    pub kind: Option<IntrospectorKind>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub types: Vec<String>,
    pub coerce: bool,
    pub path_columns: Vec<String>,
    pub replacements: Vec<String>,
    pub check_files: bool,
    pub store_files: bool,
    pub version_name: bool,
}

/// Arguments of `dsdb run`.
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub algorithm: String,
    pub algorithm_version: String,
    pub inputs: Vec<String>,
    pub file: PathBuf,
    pub kind: Option<IntrospectorKind>,
    pub params: Vec<String>,
    pub name: Option<String>,
    pub output_name: Option<String>,
    pub description: Option<String>,
}

// =============================================================================
// PATH VALIDATION
// =============================================================================

/// Resolve an input path, rejecting anything that is not a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, DsdbError> {
    let canonical = path.canonicalize().map_err(|e| {
        DsdbError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(DsdbError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Resolve an output path through its parent directory, which must exist.
fn validate_output_path(path: &Path) -> Result<PathBuf, DsdbError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        DsdbError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(DsdbError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| DsdbError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Create an empty catalog database.
pub fn cmd_init(config: &CatalogConfig, force: bool) -> Result<(), DsdbError> {
    let db_path = config
        .database
        .as_deref()
        .ok_or_else(|| DsdbError::IoError("No database path configured".to_string()))?;

    if db_path.exists() {
        if !force {
            return Err(DsdbError::IoError(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(db_path)
            .map_err(|e| DsdbError::IoError(format!("Remove old database: {}", e)))?;
        tracing::warn!("Removed existing database at {:?}", db_path);
    }

    let _catalog = Catalog::open(config)?;
    println!("Initialized new catalog at {:?}", db_path);
    if let Some(blobs) = config.blob_config() {
        println!("Blob store:  {:?}", blobs.root);
    }

    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show row counts of every catalog table.
pub fn cmd_status(config: &CatalogConfig, json_mode: bool) -> Result<(), DsdbError> {
    let catalog = Catalog::open(config)?;
    let counts = catalog.counts()?;

    if json_mode {
        let tables: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(table, count)| (table.name().to_string(), json!(count)))
            .collect();
        let output = json!({
            "database": config.database.as_ref().map(|p| p.to_string_lossy().to_string()),
            "user": catalog.user(),
            "tables": tables,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("dsdb Catalog Status");
    println!("===================");
    match &config.database {
        Some(path) => println!("Database: {:?}", path),
        None => println!("Database: (in memory)"),
    }
    println!("User:     {}", catalog.user());
    println!();
    for (table, count) in &counts {
        println!("{:<14}{}", table.name(), count);
    }

    Ok(())
}

// =============================================================================
// INGEST COMMAND
// =============================================================================

/// Translate the command-line validation flags into rules.
pub fn validation_rules(args: &IngestArgs) -> Result<ValidationRules, DsdbError> {
    let mut rules = ValidationRules::new()
        .coerce_types(args.coerce)
        .require_files(args.check_files)
        .store_files(args.store_files);
    for rule in &args.types {
        let (field, ty) = parse_type_rule(rule)?;
        rules = rules.expect_type(field, ty);
    }
    for column in &args.path_columns {
        rules = rules.path_column(column.clone());
    }
    for replacement in &args.replacements {
        let (from, to) = parse_replacement(replacement)?;
        rules = rules.rewrite_path(from, to);
    }
    Ok(rules)
}

fn conflict_policy(version_name: bool) -> NameConflictPolicy {
    if version_name {
        NameConflictPolicy::Version
    } else {
        NameConflictPolicy::Reject
    }
}

/// Catalog a file.
pub fn cmd_ingest(config: &CatalogConfig, json_mode: bool, args: &IngestArgs) -> Result<(), DsdbError> {
    tracing::info!("Ingesting from {:?} (kind: {:?})", args.file, args.kind);

    let validated_path = validate_file_path(&args.file)?;
    let object = read_object(&validated_path, args.kind)?;
    let request = IngestRequest {
        name: args.name.clone(),
        description: args.description.clone(),
        rules: validation_rules(args)?,
        source: SourceKind::File {
            path: validated_path.to_string_lossy().to_string(),
        },
        on_name_conflict: conflict_policy(args.version_name),
    };

    let catalog = Catalog::open(config)?;
    let report = catalog.ingest(object, request)?;

    if json_mode {
        let output = json!({
            "created": report.created,
            "dataset": dataset_json(&report.dataset),
            "units_created": report.units_created,
            "units_reused": report.units_reused,
            "groups_created": report.groups_created,
            "groups_reused": report.groups_reused,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    if report.created {
        println!(
            "Cataloged dataset {} '{}'",
            report.dataset.id, report.dataset.name
        );
        println!(
            "  units:  {} new, {} reused",
            report.units_created, report.units_reused
        );
        println!(
            "  groups: {} new, {} reused",
            report.groups_created, report.groups_reused
        );
    } else {
        println!(
            "Identical content already cataloged as dataset {} '{}'",
            report.dataset.id, report.dataset.name
        );
    }
    println!("  hash:   {}", report.dataset.content_hash);

    Ok(())
}

// =============================================================================
// LIST / SHOW COMMANDS
// =============================================================================

/// JSON view of a dataset record.
pub fn dataset_json(dataset: &Dataset) -> serde_json::Value {
    json!({
        "id": dataset.id.0,
        "name": dataset.name,
        "description": dataset.description,
        "introspector": dataset.introspector.as_str(),
        "content_hash": dataset.content_hash.to_hex(),
        "path_columns": dataset.path_columns,
        "created": dataset.created.to_rfc3339(),
    })
}

/// List every dataset.
pub fn cmd_list(config: &CatalogConfig, json_mode: bool) -> Result<(), DsdbError> {
    let catalog = Catalog::open(config)?;
    let datasets = catalog.datasets()?;

    if json_mode {
        let output: Vec<_> = datasets.iter().map(dataset_json).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    if datasets.is_empty() {
        println!("No datasets.");
        return Ok(());
    }
    println!("{:>6}  {:<8}  {:<16}  NAME", "ID", "KIND", "HASH");
    for dataset in &datasets {
        let hex = dataset.content_hash.to_hex();
        println!(
            "{:>6}  {:<8}  {:<16}  {}",
            dataset.id,
            dataset.introspector.as_str(),
            &hex[..16],
            dataset.name
        );
    }

    Ok(())
}

fn source_label(kind: &SourceKind) -> String {
    match kind {
        SourceKind::File { path } => format!("file {}", path),
        SourceKind::Blob { address } => format!("blob {}", address),
        other => other.as_str().to_string(),
    }
}

/// Show a dataset with its sources and the runs around it.
pub fn cmd_show(config: &CatalogConfig, json_mode: bool, ident: &str) -> Result<(), DsdbError> {
    let catalog = Catalog::open(config)?;
    let dataset = catalog.find(ident)?;
    let sources = catalog.sources(dataset.id)?;
    let runs = catalog.runs_for(dataset.id)?;

    if json_mode {
        let output = json!({
            "dataset": dataset_json(&dataset),
            "sources": sources.iter().map(|s| json!({
                "id": s.id.0,
                "kind": source_label(&s.kind),
                "created": s.created.to_rfc3339(),
            })).collect::<Vec<_>>(),
            "produced_by": runs.produced_by.iter().map(|r| r.0).collect::<Vec<_>>(),
            "consumed_by": runs.consumed_by.iter().map(|r| r.0).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Dataset {}", dataset.id);
    println!("  Name:        {}", dataset.name);
    if let Some(description) = &dataset.description {
        println!("  Description: {}", description);
    }
    println!("  Kind:        {}", dataset.introspector);
    println!("  Hash:        {}", dataset.content_hash);
    println!("  Created:     {}", dataset.created.to_rfc3339());
    if !dataset.path_columns.is_empty() {
        println!("  Paths:       {}", dataset.path_columns.join(", "));
    }
    for source in &sources {
        println!("  Source:      {}", source_label(&source.kind));
    }
    for run in &runs.produced_by {
        let details = catalog.run_details(*run)?;
        println!(
            "  Produced by: run {} ({} {}, user {})",
            run, details.algorithm.name, details.algorithm.version, details.user.name
        );
    }
    for run in &runs.consumed_by {
        println!("  Consumed by: run {}", run);
    }

    Ok(())
}

// =============================================================================
// EXPORT COMMAND
// =============================================================================

/// Reconstruct a dataset and write it as JSON.
pub fn cmd_export(
    config: &CatalogConfig,
    ident: &str,
    output: Option<&Path>,
    files: bool,
) -> Result<(), DsdbError> {
    let catalog = Catalog::open(config)?;
    let dataset = catalog.find(ident)?;

    let document = if files {
        let package = catalog.package(dataset.id)?;
        json!({
            "data": object_to_json(&package.data),
            "files": package.files.iter().map(|f| f.to_string_lossy().to_string()).collect::<Vec<_>>(),
        })
    } else {
        object_to_json(&catalog.load(dataset.id)?)
    };
    let text = serde_json::to_string_pretty(&document)
        .map_err(|e| DsdbError::SerializationError(e.to_string()))?;

    match output {
        Some(path) => {
            let validated = validate_output_path(path)?;
            std::fs::write(&validated, text)
                .map_err(|e| DsdbError::IoError(format!("Write file: {}", e)))?;
            tracing::info!(dataset = %dataset.id, "Exported to {:?}", validated);
        }
        None => println!("{}", text),
    }

    Ok(())
}

// =============================================================================
// RUN COMMAND
// =============================================================================

/// Resolve dataset identifiers to ids, in argument order.
pub fn resolve_inputs(catalog: &Catalog, idents: &[String]) -> Result<Vec<DatasetId>, DsdbError> {
    idents
        .iter()
        .map(|ident| catalog.find(ident).map(|d| d.id))
        .collect()
}

/// Record a run and catalog its output.
pub fn cmd_run(config: &CatalogConfig, json_mode: bool, args: &RunArgs) -> Result<(), DsdbError> {
    let validated_path = validate_file_path(&args.file)?;
    let object = read_object(&validated_path, args.kind)?;

    let catalog = Catalog::open(config)?;
    let inputs = resolve_inputs(&catalog, &args.inputs)?;
    let parameters = args
        .params
        .iter()
        .map(|p| parse_parameter(p))
        .collect::<Result<BTreeMap<_, _>, _>>()?;

    let spec = AlgorithmSpec::new(args.algorithm.clone(), args.algorithm_version.clone());
    let request = RunRequest {
        inputs,
        parameters,
        name: args.name.clone(),
        description: args.description.clone(),
        output_name: args.output_name.clone(),
        ..RunRequest::new(spec, object)
    };
    let recorded = catalog.record_run(request)?;

    if json_mode {
        let output = json!({
            "run": recorded.run.id.0,
            "algorithm": recorded.run.algorithm.0,
            "output": dataset_json(&recorded.output),
            "output_created": recorded.output_created,
            "begin": recorded.run.begin.to_rfc3339(),
            "end": recorded.run.end.to_rfc3339(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!(
        "Recorded run {} of {} {}",
        recorded.run.id, args.algorithm, args.algorithm_version
    );
    println!(
        "  output: dataset {} '{}'{}",
        recorded.output.id,
        recorded.output.name,
        if recorded.output_created {
            ""
        } else {
            " (existing)"
        }
    );

    Ok(())
}

// =============================================================================
// LINEAGE COMMAND
// =============================================================================

/// Print the datasets and runs reachable from a dataset.
pub fn cmd_lineage(
    config: &CatalogConfig,
    json_mode: bool,
    ident: &str,
    descendants: bool,
) -> Result<(), DsdbError> {
    let catalog = Catalog::open(config)?;
    let root = catalog.find(ident)?;
    let lineage: Lineage = if descendants {
        catalog.descendants(root.id)?
    } else {
        catalog.ancestors(root.id)?
    };
    let related = lineage
        .datasets
        .iter()
        .map(|id| catalog.dataset(*id))
        .collect::<Result<Vec<_>, _>>()?;

    if json_mode {
        let output = json!({
            "root": dataset_json(&root),
            "direction": if descendants { "downstream" } else { "upstream" },
            "datasets": related.iter().map(dataset_json).collect::<Vec<_>>(),
            "runs": lineage.runs.iter().map(|r| r.0).collect::<Vec<_>>(),
            "truncated": lineage.truncated,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    let heading = if descendants { "Descendants" } else { "Ancestors" };
    println!("{} of dataset {} '{}'", heading, root.id, root.name);
    if related.is_empty() {
        println!("  (none)");
    }
    for dataset in &related {
        println!("  {:>6}  {}", dataset.id, dataset.name);
    }
    if !lineage.runs.is_empty() {
        let runs: Vec<String> = lineage.runs.iter().map(|r| r.to_string()).collect();
        println!("  via runs: {}", runs.join(", "));
    }
    if lineage.truncated {
        tracing::warn!("Lineage walk stopped at the depth limit");
    }

    Ok(())
}
