//! Integration tests for the dsdb command line.
//!
//! Commands run against a redb catalog in a temporary directory. Results are
//! checked by reopening the catalog through dsdb-core.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use clap::Parser;
use dsdb::cli::{self, Cli, IngestArgs, RunArgs, cmd_export, cmd_ingest, cmd_init, cmd_run};
use dsdb::input::object_to_json;
use dsdb_core::{
    Catalog, CatalogConfig, CatalogObject, CatalogTable, DsdbError, IntrospectorKind, SourceKind,
    Value,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// A temporary directory with a catalog config pointing into it.
fn workspace() -> (TempDir, CatalogConfig) {
    let dir = tempfile::tempdir().unwrap();
    let config = CatalogConfig::persistent(dir.path().join("catalog.redb"));
    (dir, config)
}

fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn ingest_args(file: PathBuf, name: &str) -> IngestArgs {
    IngestArgs {
        file,
        name: Some(name.to_string()),
        ..IngestArgs::default()
    }
}

const CELLS: &str = r#"[
    {"cell": "A", "n": 1},
    {"cell": "B", "n": 2},
    {"cell": "A", "n": 1}
]"#;

// =============================================================================
// INIT
// =============================================================================

#[test]
fn test_init_refuses_existing_database() {
    let (_dir, config) = workspace();

    cmd_init(&config, false).unwrap();
    assert!(config.database.as_ref().unwrap().exists());

    let err = cmd_init(&config, false).unwrap_err();
    assert!(matches!(err, DsdbError::IoError(_)));

    cmd_init(&config, true).unwrap();
}

#[test]
fn test_init_force_starts_empty() {
    let (dir, config) = workspace();
    let file = write_file(dir.path(), "cells.json", CELLS);
    cmd_ingest(&config, true, &ingest_args(file, "cells")).unwrap();

    cmd_init(&config, true).unwrap();

    let catalog = Catalog::open(&config).unwrap();
    assert!(catalog.datasets().unwrap().is_empty());
}

// =============================================================================
// INGEST
// =============================================================================

#[test]
fn test_ingest_json_table() {
    let (dir, config) = workspace();
    let file = write_file(dir.path(), "cells.json", CELLS);

    cmd_ingest(&config, true, &ingest_args(file.clone(), "cells")).unwrap();

    let catalog = Catalog::open(&config).unwrap();
    let dataset = catalog.find("cells").unwrap();
    assert_eq!(dataset.introspector, IntrospectorKind::Tabular);

    let counts = catalog.counts().unwrap();
    assert_eq!(counts[&CatalogTable::Iota], 4);
    assert_eq!(counts[&CatalogTable::Group], 2);
    assert_eq!(counts[&CatalogTable::GroupDataset], 3);

    let sources = catalog.sources(dataset.id).unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(
        sources[0].kind,
        SourceKind::File {
            path: file.canonicalize().unwrap().to_string_lossy().to_string()
        }
    );
}

#[test]
fn test_reingest_is_deduplicated() {
    let (dir, config) = workspace();
    let file = write_file(dir.path(), "cells.json", CELLS);

    cmd_ingest(&config, true, &ingest_args(file.clone(), "cells")).unwrap();
    cmd_ingest(&config, true, &ingest_args(file, "cells")).unwrap();

    let catalog = Catalog::open(&config).unwrap();
    assert_eq!(catalog.datasets().unwrap().len(), 1);
}

#[test]
fn test_ingest_name_conflict_and_versioning() {
    let (dir, config) = workspace();
    let first = write_file(dir.path(), "a.json", CELLS);
    let second = write_file(dir.path(), "b.json", r#"[{"cell": "C", "n": 3}]"#);

    cmd_ingest(&config, true, &ingest_args(first, "cells")).unwrap();

    let err = cmd_ingest(&config, true, &ingest_args(second.clone(), "cells")).unwrap_err();
    assert!(matches!(err, DsdbError::DuplicateNameConflict { .. }));

    let versioned = IngestArgs {
        version_name: true,
        ..ingest_args(second, "cells")
    };
    cmd_ingest(&config, true, &versioned).unwrap();

    let catalog = Catalog::open(&config).unwrap();
    assert!(catalog.dataset_by_name("cells@v2").unwrap().is_some());
}

#[test]
fn test_ingest_with_type_coercion() {
    let (dir, config) = workspace();
    let file = write_file(dir.path(), "n.json", r#"[{"n": "1"}, {"n": "2"}]"#);

    let strict = IngestArgs {
        types: vec!["n=int".to_string()],
        ..ingest_args(file.clone(), "numbers")
    };
    let err = cmd_ingest(&config, true, &strict).unwrap_err();
    assert!(matches!(err, DsdbError::Validation(_)));

    let coerced = IngestArgs {
        coerce: true,
        ..strict
    };
    cmd_ingest(&config, true, &coerced).unwrap();

    let catalog = Catalog::open(&config).unwrap();
    let id = catalog.find("numbers").unwrap().id;
    let CatalogObject::Table(table) = catalog.load(id).unwrap() else {
        panic!("expected a table");
    };
    assert_eq!(table.cell(1, "n"), Some(&Value::Int(2)));
}

#[test]
fn test_ingest_opaque_file() {
    let (dir, config) = workspace();
    let file = dir.path().join("model.bin");
    std::fs::write(&file, [0u8, 1, 2, 3, 255]).unwrap();

    let args = IngestArgs {
        kind: Some(IntrospectorKind::Opaque),
        ..ingest_args(file, "model")
    };
    cmd_ingest(&config, true, &args).unwrap();

    let catalog = Catalog::open(&config).unwrap();
    let id = catalog.find("model").unwrap().id;
    let CatalogObject::Opaque(object) = catalog.load(id).unwrap() else {
        panic!("expected an opaque object");
    };
    assert_eq!(object.payload, vec![0u8, 1, 2, 3, 255]);
}

#[test]
fn test_ingest_missing_file() {
    let (dir, config) = workspace();
    let args = ingest_args(dir.path().join("absent.json"), "x");
    assert!(matches!(
        cmd_ingest(&config, true, &args),
        Err(DsdbError::IoError(_))
    ));
}

// =============================================================================
// EXPORT
// =============================================================================

#[test]
fn test_export_writes_reconstructed_json() {
    let (dir, config) = workspace();
    let file = write_file(dir.path(), "cells.json", CELLS);
    cmd_ingest(&config, true, &ingest_args(file, "cells")).unwrap();

    let out = dir.path().join("out.json");
    cmd_export(&config, "cells", Some(out.as_path()), false).unwrap();

    let exported: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    let original: serde_json::Value = serde_json::from_str(CELLS).unwrap();
    assert_eq!(exported, original);
}

#[test]
fn test_export_with_rewritten_paths() {
    let (dir, config) = workspace();
    let file = write_file(
        dir.path(),
        "images.json",
        r#"[{"path": "/old/a.tif"}, {"path": "/old/b.tif"}]"#,
    );
    let args = IngestArgs {
        path_columns: vec!["path".to_string()],
        replacements: vec!["/old=/new".to_string()],
        ..ingest_args(file, "images")
    };
    cmd_ingest(&config, true, &args).unwrap();

    let out = dir.path().join("package.json");
    cmd_export(&config, "images", Some(out.as_path()), true).unwrap();

    let exported: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(
        exported["files"],
        serde_json::json!(["/new/a.tif", "/new/b.tif"])
    );
    assert_eq!(exported["data"][0]["path"], "/new/a.tif");
}

#[test]
fn test_ingest_stores_referenced_files() {
    let (dir, config) = workspace();
    let scan = write_file(dir.path(), "scan.tif", "pixels");
    let file = write_file(
        dir.path(),
        "scans.json",
        &serde_json::json!([{ "path": scan.to_string_lossy() }]).to_string(),
    );
    let args = IngestArgs {
        path_columns: vec!["path".to_string()],
        check_files: true,
        store_files: true,
        ..ingest_args(file, "scans")
    };
    cmd_ingest(&config, true, &args).unwrap();
    std::fs::remove_file(&scan).unwrap();

    let out = dir.path().join("package.json");
    cmd_export(&config, "scans", Some(out.as_path()), true).unwrap();
    let exported: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    let stored = exported["files"][0].as_str().unwrap();
    assert_ne!(Path::new(stored), scan.as_path());
    assert_eq!(std::fs::read_to_string(stored).unwrap(), "pixels");
}

#[test]
fn test_export_unknown_dataset() {
    let (_dir, config) = workspace();
    assert!(matches!(
        cmd_export(&config, "nothing-here", None, false),
        Err(DsdbError::UnknownDataset(_))
    ));
}

// =============================================================================
// RUNS AND LINEAGE
// =============================================================================

#[test]
fn test_run_records_provenance() {
    let (dir, config) = workspace();
    let raw = write_file(dir.path(), "raw.json", CELLS);
    cmd_ingest(&config, true, &ingest_args(raw, "raw")).unwrap();

    let clean = write_file(dir.path(), "clean.json", r#"[{"cell": "A", "n": 1}]"#);
    let args = RunArgs {
        algorithm: "dedup".to_string(),
        algorithm_version: "1.0".to_string(),
        inputs: vec!["raw".to_string()],
        file: clean,
        params: vec!["keep=first".to_string(), "limit=10".to_string()],
        output_name: Some("clean".to_string()),
        ..RunArgs::default()
    };
    cmd_run(&config, true, &args).unwrap();

    let catalog = Catalog::open(&config).unwrap();
    let raw = catalog.find("raw").unwrap();
    let clean = catalog.find("clean").unwrap();

    let lineage = catalog.ancestors(clean.id).unwrap();
    assert_eq!(lineage.datasets, vec![raw.id]);
    assert_eq!(lineage.runs.len(), 1);

    let details = catalog.run_details(lineage.runs[0]).unwrap();
    assert_eq!(details.algorithm.name, "dedup");
    assert_eq!(details.inputs, vec![raw.id]);
    assert_eq!(details.outputs, vec![clean.id]);
    assert_eq!(details.run.parameters["limit"], Value::Int(10));
    assert_eq!(details.run.parameters["keep"], Value::from("first"));
}

#[test]
fn test_run_with_unknown_input_writes_nothing() {
    let (dir, config) = workspace();
    cmd_init(&config, false).unwrap();
    let out = write_file(dir.path(), "out.json", r#"{"k": 1}"#);

    let args = RunArgs {
        algorithm: "noop".to_string(),
        algorithm_version: "0".to_string(),
        inputs: vec!["missing".to_string()],
        file: out,
        ..RunArgs::default()
    };
    assert!(cmd_run(&config, true, &args).is_err());

    let catalog = Catalog::open(&config).unwrap();
    let counts = catalog.counts().unwrap();
    assert!(counts.values().all(|&n| n == 0));
}

// =============================================================================
// ARGUMENT PARSING
// =============================================================================

#[test]
fn test_parse_ingest_command_line() {
    let cli = Cli::try_parse_from([
        "dsdb", "-q", "-D", "c.redb", "ingest", "-f", "x.json", "-k", "table", "-t", "n=int",
        "-t", "s=text", "--coerce",
    ])
    .unwrap();
    assert!(cli.quiet);
    assert_eq!(cli.database, Some(PathBuf::from("c.redb")));
    let Some(cli::Commands::Ingest {
        kind, types, coerce, ..
    }) = cli.command
    else {
        panic!("expected ingest");
    };
    assert_eq!(kind, Some(IntrospectorKind::Tabular));
    assert_eq!(types, vec!["n=int", "s=text"]);
    assert!(coerce);
}

#[test]
fn test_parse_rejects_unknown_kind() {
    assert!(Cli::try_parse_from(["dsdb", "ingest", "-f", "x", "-k", "matrix"]).is_err());
}

#[test]
fn test_execute_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("e2e.redb");
    let file = write_file(dir.path(), "m.json", r#"{"alpha": 0.5, "blob": {"$bytes": "AAE="}}"#);

    let cli = Cli::try_parse_from([
        "dsdb",
        "--json-mode",
        "-D",
        db.to_str().unwrap(),
        "ingest",
        "-f",
        file.to_str().unwrap(),
        "-n",
        "params",
    ])
    .unwrap();
    cli::execute(cli).unwrap();

    let catalog = Catalog::open(&CatalogConfig::persistent(&db)).unwrap();
    let id = catalog.find("params").unwrap().id;
    let object = catalog.load(id).unwrap();
    assert_eq!(object.kind(), IntrospectorKind::Mapping);
    assert_eq!(
        object_to_json(&object),
        serde_json::json!({"alpha": 0.5, "blob": {"$bytes": "AAE="}})
    );
}
