//! # Provenance Queries
//!
//! Read-only walks over the RunInput / RunOutput edges.
//!
//! - `ancestors`: datasets the root was derived from, through producing runs
//! - `descendants`: datasets derived from the root, through consuming runs
//!
//! Both walks are breadth-first, visit each dataset once, and stop after
//! `MAX_LINEAGE_DEPTH` run hops.

use crate::primitives::MAX_LINEAGE_DEPTH;
use crate::store::TableReader;
use crate::{DatasetId, DsdbError, RunId};
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};

/// Walk direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards the inputs of producing runs.
    Upstream,
    /// Towards the outputs of consuming runs.
    Downstream,
}

/// Result of a lineage walk. The root itself is not in `datasets`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lineage {
    pub root: DatasetId,
    pub datasets: Vec<DatasetId>,
    pub runs: Vec<RunId>,
    /// Set when the walk stopped at the depth limit with edges left unvisited.
    pub truncated: bool,
}

/// Runs touching one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DatasetRuns {
    pub produced_by: Vec<RunId>,
    pub consumed_by: Vec<RunId>,
}

pub fn ancestors<R: TableReader + ?Sized>(
    reader: &R,
    root: DatasetId,
) -> Result<Lineage, DsdbError> {
    walk(reader, root, Direction::Upstream)
}

pub fn descendants<R: TableReader + ?Sized>(
    reader: &R,
    root: DatasetId,
) -> Result<Lineage, DsdbError> {
    walk(reader, root, Direction::Downstream)
}

pub fn runs_for<R: TableReader + ?Sized>(
    reader: &R,
    dataset: DatasetId,
) -> Result<DatasetRuns, DsdbError> {
    Ok(DatasetRuns {
        produced_by: reader.runs_producing(dataset)?,
        consumed_by: reader.runs_consuming(dataset)?,
    })
}

/// Breadth-first walk in one direction.
pub fn walk<R: TableReader + ?Sized>(
    reader: &R,
    root: DatasetId,
    direction: Direction,
) -> Result<Lineage, DsdbError> {
    if reader.dataset(root)?.is_none() {
        return Err(DsdbError::DatasetNotFound(root));
    }

    let mut seen = BTreeSet::from([root]);
    let mut runs = BTreeSet::new();
    let mut order = Vec::new();
    let mut queue = VecDeque::from([(root, 0usize)]);
    let mut truncated = false;

    while let Some((dataset, depth)) = queue.pop_front() {
        let hops = match direction {
            Direction::Upstream => reader.runs_producing(dataset)?,
            Direction::Downstream => reader.runs_consuming(dataset)?,
        };
        if hops.is_empty() {
            continue;
        }
        if depth >= MAX_LINEAGE_DEPTH {
            truncated = true;
            continue;
        }
        for run in hops {
            if !runs.insert(run) {
                continue;
            }
            let edges = match direction {
                Direction::Upstream => reader.run_inputs(run)?,
                Direction::Downstream => reader.run_outputs(run)?,
            };
            for edge in edges {
                if seen.insert(edge.dataset) {
                    order.push(edge.dataset);
                    queue.push_back((edge.dataset, depth + 1));
                }
            }
        }
    }

    Ok(Lineage {
        root,
        datasets: order,
        runs: runs.into_iter().collect(),
        truncated,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::{CatalogStore, Insert, MemoryCatalog, TableWriter};
    use crate::{AlgorithmSpec, ContentHash, IntrospectorKind, NewDataset, NewRun, RunEdge};
    use chrono::Utc;

    fn dataset(tx: &mut dyn TableWriter, name: &str) -> Result<DatasetId, DsdbError> {
        let new = NewDataset {
            name: name.to_string(),
            description: None,
            introspector: IntrospectorKind::Mapping,
            content_hash: ContentHash::of(name.as_bytes()),
            path_columns: Vec::new(),
        };
        match tx.insert_dataset(new, Utc::now())? {
            Insert::Created(id) => Ok(id),
            Insert::Conflict => Err(DsdbError::InvalidObject(name.to_string())),
        }
    }

    fn run(
        tx: &mut dyn TableWriter,
        inputs: &[DatasetId],
        outputs: &[DatasetId],
    ) -> Result<RunId, DsdbError> {
        let now = Utc::now();
        let user = match tx.insert_user("tester", now)? {
            Insert::Created(id) => id,
            Insert::Conflict => tx.find_user("tester")?.unwrap_or(crate::UserId(0)),
        };
        let spec = AlgorithmSpec::new("step", "1");
        let algorithm = match tx.insert_algorithm(&spec, now)? {
            Insert::Created(id) => id,
            Insert::Conflict => tx.find_algorithm("step", "1")?.unwrap_or(crate::AlgorithmId(0)),
        };
        let run = tx.insert_run(NewRun {
            algorithm,
            user,
            name: None,
            description: None,
            parameters: Default::default(),
            begin: now,
            end: now,
        })?;
        for &dataset in inputs {
            tx.insert_run_input(RunEdge { run, dataset, created: now })?;
        }
        for &dataset in outputs {
            tx.insert_run_output(RunEdge { run, dataset, created: now })?;
        }
        Ok(run)
    }

    /// raw ─r1─▶ clean ─r2─▶ model
    ///            other ─r2─┘
    fn chain() -> (MemoryCatalog, [DatasetId; 4], [RunId; 2]) {
        let store = MemoryCatalog::new();
        let (ids, runs) = store
            .write(|tx| {
                let raw = dataset(tx, "raw")?;
                let clean = dataset(tx, "clean")?;
                let other = dataset(tx, "other")?;
                let model = dataset(tx, "model")?;
                let r1 = run(tx, &[raw], &[clean])?;
                let r2 = run(tx, &[clean, other], &[model])?;
                Ok(([raw, clean, other, model], [r1, r2]))
            })
            .unwrap();
        (store, ids, runs)
    }

    #[test]
    fn ancestors_follow_producing_runs() {
        let (store, [raw, clean, other, model], [r1, r2]) = chain();
        let lineage = store.read(|r| ancestors(r, model)).unwrap();
        assert_eq!(lineage.datasets, vec![clean, other, raw]);
        assert_eq!(lineage.runs, vec![r1, r2]);
        assert!(!lineage.truncated);
    }

    #[test]
    fn descendants_follow_consuming_runs() {
        let (store, [raw, clean, _, model], [r1, r2]) = chain();
        let lineage = store.read(|r| descendants(r, raw)).unwrap();
        assert_eq!(lineage.datasets, vec![clean, model]);
        assert_eq!(lineage.runs, vec![r1, r2]);
    }

    #[test]
    fn source_dataset_has_no_ancestors() {
        let (store, [raw, ..], _) = chain();
        let lineage = store.read(|r| ancestors(r, raw)).unwrap();
        assert!(lineage.datasets.is_empty());
        assert!(lineage.runs.is_empty());
    }

    #[test]
    fn runs_for_lists_both_directions() {
        let (store, [_, clean, ..], [r1, r2]) = chain();
        let runs = store.read(|r| runs_for(r, clean)).unwrap();
        assert_eq!(runs.produced_by, vec![r1]);
        assert_eq!(runs.consumed_by, vec![r2]);
    }

    #[test]
    fn unknown_root_is_not_found() {
        let store = MemoryCatalog::new();
        assert!(matches!(
            store.read(|r| ancestors(r, DatasetId(9))),
            Err(DsdbError::DatasetNotFound(DatasetId(9)))
        ));
    }

    #[test]
    fn deep_chain_is_truncated() {
        let store = MemoryCatalog::new();
        let last = store
            .write(|tx| {
                let mut current = dataset(tx, "d0")?;
                for i in 1..=(MAX_LINEAGE_DEPTH + 5) {
                    let next = dataset(tx, &format!("d{i}"))?;
                    run(tx, &[current], &[next])?;
                    current = next;
                }
                Ok(current)
            })
            .unwrap();
        let lineage = store.read(|r| ancestors(r, last)).unwrap();
        assert!(lineage.truncated);
        assert_eq!(lineage.datasets.len(), MAX_LINEAGE_DEPTH);
    }
}
