//! # Catalog Tier Tests (T0-T3)
//!
//! If ANY tier fails, the catalog is INVALID.
//!
//! ## Tiers
//! - T0: Unit Deduplication
//! - T1: Hash Sensitivity
//! - T2: Lossless Reconstruction
//! - T3: Provenance Integrity

use dsdb_core::{
    AlgorithmSpec, Catalog, CatalogConfig, CatalogObject, CatalogTable, DsdbError, IngestRequest,
    Mapping, OpaqueObject, RunRequest, Table, ValidationKind, ValidationRules, Value, ValueType,
};

fn table(rows: &[(i64, &str)]) -> Table {
    let mut table = Table::new(["a", "b"]).expect("columns");
    for &(a, b) in rows {
        table
            .push_row(vec![Value::Int(a), Value::from(b)])
            .expect("row");
    }
    table
}

fn mapping(entries: &[(&str, i64)]) -> Mapping {
    entries
        .iter()
        .map(|&(k, v)| (k.to_string(), Value::Int(v)))
        .collect()
}

// =============================================================================
// TIER T0: UNIT DEDUPLICATION
// =============================================================================

mod t0_unit_dedup {
    use super::*;

    /// T0.1: Duplicate rows share their units and their group.
    #[test]
    fn duplicate_row_collapses() {
        let catalog = Catalog::in_memory();
        let report = catalog
            .ingest(
                table(&[(1, "x"), (2, "y"), (1, "x")]).into(),
                IngestRequest::default(),
            )
            .expect("ingest");

        assert_eq!(report.units_created, 4);
        assert_eq!(report.groups_created, 2);
        let counts = catalog.counts().expect("counts");
        assert_eq!(counts[&CatalogTable::Iota], 4);
        assert_eq!(counts[&CatalogTable::Group], 2);
        assert_eq!(counts[&CatalogTable::GroupDataset], 3);
    }

    /// T0.2: Re-ingesting identical content is a no-op.
    #[test]
    fn ingest_is_idempotent() {
        let catalog = Catalog::in_memory();
        let first = catalog
            .ingest(table(&[(1, "x")]).into(), IngestRequest::named("t"))
            .expect("first");
        let before = catalog.counts().expect("counts");
        let second = catalog
            .ingest(table(&[(1, "x")]).into(), IngestRequest::named("t"))
            .expect("second");

        assert_eq!(first.dataset, second.dataset);
        assert!(!second.created);
        assert_eq!(before, catalog.counts().expect("counts"));
    }

    /// T0.3: Units are shared across datasets of different variants.
    #[test]
    fn units_shared_across_variants() {
        let catalog = Catalog::in_memory();
        catalog
            .ingest(table(&[(1, "x")]).into(), IngestRequest::default())
            .expect("table");
        let mut m = Mapping::new();
        m.insert("a".into(), Value::Int(1));
        let report = catalog
            .ingest(m.into(), IngestRequest::default())
            .expect("mapping");

        assert_eq!(report.units_created, 0);
        assert_eq!(report.units_reused, 1);
        assert_eq!(report.groups_created, 1);
    }

    /// T0.4: Concurrent identical ingests converge on one dataset.
    #[test]
    fn concurrent_ingest_converges() {
        let catalog = Catalog::in_memory();
        let object: CatalogObject = table(&[(1, "x"), (2, "y"), (3, "z")]).into();

        let ids: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let object = object.clone();
                    let catalog = &catalog;
                    scope.spawn(move || {
                        catalog
                            .ingest(object, IngestRequest::named("shared"))
                            .expect("ingest")
                            .dataset
                            .id
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("join"))
                .collect()
        });

        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        let counts = catalog.counts().expect("counts");
        assert_eq!(counts[&CatalogTable::Dataset], 1);
        assert_eq!(counts[&CatalogTable::Iota], 6);
        assert_eq!(counts[&CatalogTable::Source], 1);
    }
}

// =============================================================================
// TIER T1: HASH SENSITIVITY
// =============================================================================

mod t1_hash_sensitivity {
    use super::*;

    fn hash_of(catalog: &Catalog, object: CatalogObject) -> dsdb_core::ContentHash {
        catalog
            .ingest(object, IngestRequest::default())
            .expect("ingest")
            .dataset
            .content_hash
    }

    /// T1.1: A single changed cell changes the dataset hash.
    #[test]
    fn cell_change_changes_hash() {
        let catalog = Catalog::in_memory();
        let a = hash_of(&catalog, table(&[(1, "x"), (2, "y")]).into());
        let b = hash_of(&catalog, table(&[(1, "x"), (2, "z")]).into());
        assert_ne!(a, b);
    }

    /// T1.2: Row order is significant for tables.
    #[test]
    fn row_order_changes_hash() {
        let catalog = Catalog::in_memory();
        let a = hash_of(&catalog, table(&[(1, "x"), (2, "y")]).into());
        let b = hash_of(&catalog, table(&[(2, "y"), (1, "x")]).into());
        assert_ne!(a, b);
    }

    /// T1.3: Key insertion order is irrelevant for mappings.
    #[test]
    fn mapping_order_is_irrelevant() {
        let catalog = Catalog::in_memory();
        let a = hash_of(&catalog, mapping(&[("x", 1), ("y", 2)]).into());
        let b = hash_of(&catalog, mapping(&[("y", 2), ("x", 1)]).into());
        assert_eq!(a, b);
    }

    /// T1.4: Same content under another name conflicts; under the same name is a no-op.
    #[test]
    fn name_binds_to_content() {
        let catalog = Catalog::in_memory();
        catalog
            .ingest(table(&[(1, "x")]).into(), IngestRequest::named("n"))
            .expect("first");
        let err = catalog
            .ingest(table(&[(9, "x")]).into(), IngestRequest::named("n"))
            .expect_err("conflict");
        assert!(matches!(err, DsdbError::DuplicateNameConflict { .. }));

        let versioned = catalog
            .ingest(
                table(&[(9, "x")]).into(),
                IngestRequest::named("n").versioned(),
            )
            .expect("versioned");
        assert_eq!(versioned.dataset.name, "n@v2");
    }

    /// T1.5: Identical histories produce identical hashes in separate catalogs.
    #[test]
    fn hash_is_deterministic() {
        let first = Catalog::in_memory();
        let second = Catalog::in_memory();
        for catalog in [&first, &second] {
            catalog
                .ingest(mapping(&[("q", 7)]).into(), IngestRequest::default())
                .expect("warmup");
        }
        let object: CatalogObject = table(&[(1, "x"), (7, "q")]).into();
        assert_eq!(hash_of(&first, object.clone()), hash_of(&second, object));
    }
}

// =============================================================================
// TIER T2: LOSSLESS RECONSTRUCTION
// =============================================================================

mod t2_reconstruction {
    use super::*;

    /// T2.1: Tables rebuild cell-for-cell, including nulls and floats.
    #[test]
    fn table_roundtrip() {
        let catalog = Catalog::in_memory();
        let mut t = Table::new(["f", "n", "s"]).expect("columns");
        t.push_row(vec![Value::Float(1.5), Value::Null, Value::from("a")])
            .expect("row");
        t.push_row(vec![Value::Float(-0.0), Value::Int(3), Value::from("")])
            .expect("row");
        let id = catalog
            .ingest(t.clone().into(), IngestRequest::default())
            .expect("ingest")
            .dataset
            .id;
        assert_eq!(catalog.load(id).expect("load"), CatalogObject::Table(t));
    }

    /// T2.2: Persistent catalogs survive a reopen, opaque blobs included.
    #[test]
    fn persistent_roundtrip_after_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = CatalogConfig::persistent(dir.path().join("catalog.redb"));
        let opaque = OpaqueObject::encode(&("model", vec![0.25f64, 0.75])).expect("encode");

        let (table_id, opaque_id) = {
            let catalog = Catalog::open(&config).expect("open");
            assert!(catalog.is_persistent());
            let t = catalog
                .ingest(table(&[(1, "x"), (2, "y")]).into(), IngestRequest::named("t"))
                .expect("table");
            let o = catalog
                .ingest(opaque.clone().into(), IngestRequest::named("o"))
                .expect("opaque");
            (t.dataset.id, o.dataset.id)
        };

        let catalog = Catalog::open(&config).expect("reopen");
        assert_eq!(
            catalog.load(table_id).expect("load table"),
            CatalogObject::Table(table(&[(1, "x"), (2, "y")]))
        );
        assert_eq!(
            catalog.load(opaque_id).expect("load opaque"),
            CatalogObject::Opaque(opaque)
        );
        assert_eq!(catalog.find("t").expect("by name").id, table_id);
    }

    /// T2.3: A missing blob is a reconstruction mismatch, not a panic.
    #[test]
    fn missing_blob_detected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = CatalogConfig::persistent(dir.path().join("catalog.redb"));
        let catalog = Catalog::open(&config).expect("open");
        let id = catalog
            .ingest(
                OpaqueObject::from_bytes("raw", b"payload".to_vec()).into(),
                IngestRequest::default(),
            )
            .expect("ingest")
            .dataset
            .id;

        let blob_root = config.blob_config().expect("blob config").root;
        std::fs::remove_dir_all(&blob_root).expect("remove blobs");
        assert!(matches!(
            catalog.load(id),
            Err(DsdbError::ReconstructionMismatch(_))
        ));
    }

    /// T2.4: Coercion lets a write succeed that strict typing rejects.
    #[test]
    fn coercion_gate() {
        let catalog = Catalog::in_memory();
        let mut t = Table::new(["n"]).expect("columns");
        t.push_row(vec![Value::from("12")]).expect("row");
        let strict = ValidationRules::new().expect_type("n", ValueType::Int);

        let err = catalog
            .ingest(
                t.clone().into(),
                IngestRequest::default().with_rules(strict.clone()),
            )
            .expect_err("strict");
        assert!(
            matches!(err, DsdbError::Validation(ref f) if f.kind == ValidationKind::TypeMismatch)
        );
        assert_eq!(catalog.counts().expect("counts")[&CatalogTable::Iota], 0);

        catalog
            .ingest(
                t.into(),
                IngestRequest::default().with_rules(strict.coerce_types(true)),
            )
            .expect("coerced");
    }
}

// =============================================================================
// TIER T3: PROVENANCE INTEGRITY
// =============================================================================

mod t3_provenance {
    use super::*;

    /// T3.1: Two inputs, one output: exactly two input edges and one output edge.
    #[test]
    fn run_edges() {
        let catalog = Catalog::in_memory();
        let a = catalog
            .ingest(table(&[(1, "x")]).into(), IngestRequest::named("a"))
            .expect("a")
            .dataset
            .id;
        let b = catalog
            .ingest(mapping(&[("k", 1)]).into(), IngestRequest::named("b"))
            .expect("b")
            .dataset
            .id;

        let recorded = catalog
            .record_run(
                RunRequest::new(AlgorithmSpec::new("join", "2"), table(&[(5, "z")]))
                    .input(a)
                    .input(b),
            )
            .expect("run");

        assert!(recorded.run.end >= recorded.run.begin);
        let counts = catalog.counts().expect("counts");
        assert_eq!(counts[&CatalogTable::RunInput], 2);
        assert_eq!(counts[&CatalogTable::RunOutput], 1);

        let lineage = catalog.ancestors(recorded.output.id).expect("ancestors");
        assert_eq!(lineage.datasets, vec![a, b]);
        assert_eq!(lineage.runs, vec![recorded.run.id]);
    }

    /// T3.2: Algorithms are resolved by name and version.
    #[test]
    fn algorithm_reused() {
        let catalog = Catalog::in_memory();
        let input = catalog
            .ingest(table(&[(1, "x")]).into(), IngestRequest::default())
            .expect("input")
            .dataset
            .id;
        for seed in 0..3 {
            catalog
                .record_run(
                    RunRequest::new(AlgorithmSpec::new("scale", "1"), mapping(&[("s", seed)]))
                        .input(input),
                )
                .expect("run");
        }
        catalog
            .record_run(
                RunRequest::new(AlgorithmSpec::new("scale", "2"), mapping(&[("s", 0)]))
                    .input(input),
            )
            .expect("run v2");

        let counts = catalog.counts().expect("counts");
        assert_eq!(counts[&CatalogTable::Algorithm], 2);
        assert_eq!(counts[&CatalogTable::Run], 4);
        assert_eq!(counts[&CatalogTable::User], 1);
        // The v2 run reproduced an existing output: no new dataset, no new source.
        assert_eq!(counts[&CatalogTable::Dataset], 4);
        assert_eq!(counts[&CatalogTable::RunSource], 3);
        assert_eq!(catalog.descendants(input).expect("descendants").runs.len(), 4);
    }

    /// T3.3: Lineage spans a chain of runs, persisted to disk.
    #[test]
    fn chain_lineage_persistent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let catalog =
            Catalog::open(&CatalogConfig::persistent(dir.path().join("c.redb"))).expect("open");

        let raw = catalog
            .ingest(table(&[(1, "raw")]).into(), IngestRequest::named("raw"))
            .expect("raw")
            .dataset
            .id;
        let clean = catalog
            .record_run(
                RunRequest::new(AlgorithmSpec::new("clean", "1"), table(&[(1, "clean")]))
                    .input(raw)
                    .output_name("clean"),
            )
            .expect("clean")
            .output
            .id;
        let model = catalog
            .record_run(
                RunRequest::new(
                    AlgorithmSpec::new("fit", "1"),
                    OpaqueObject::encode(&[1u8, 2, 3]).expect("encode"),
                )
                .input(clean)
                .output_name("model"),
            )
            .expect("fit")
            .output
            .id;

        assert_eq!(
            catalog.ancestors(model).expect("ancestors").datasets,
            vec![clean, raw]
        );
        assert_eq!(
            catalog.descendants(raw).expect("descendants").datasets,
            vec![clean, model]
        );
        let runs = catalog.runs_for(clean).expect("runs");
        assert_eq!(runs.produced_by.len(), 1);
        assert_eq!(runs.consumed_by.len(), 1);
    }

    /// T3.4: A failing run leaves no run, algorithm, or output behind.
    #[test]
    fn failed_run_is_atomic() {
        let catalog = Catalog::in_memory();
        let input = catalog
            .ingest(table(&[(1, "x")]).into(), IngestRequest::named("in"))
            .expect("input")
            .dataset
            .id;
        let before = catalog.counts().expect("counts");

        let err = catalog
            .record_run(
                RunRequest::new(AlgorithmSpec::new("bad", "1"), mapping(&[("v", 1)]))
                    .input(input)
                    .output_name("in"),
            )
            .expect_err("name conflict");
        assert!(matches!(err, DsdbError::DuplicateNameConflict { .. }));
        assert_eq!(before, catalog.counts().expect("counts"));
    }
}
