use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::dataset::merged::MergedParams;
use crate::dataset::{
    Dataset, DatasetConfig, DatasetInfo, DatasetState, MergedDataset, SparseDataset, MERGED,
    SPARSE_MUTABLE,
};
use crate::error::{CellDbError, Result};
use crate::value::{CellValue, Timestamp};

#[derive(Clone)]
enum Entry {
    Sparse(Arc<SparseDataset>),
    Merged(Arc<MergedDataset>),
}

impl Entry {
    fn dataset(&self) -> Arc<dyn Dataset> {
        match self {
            Entry::Sparse(ds) => ds.clone(),
            Entry::Merged(ds) => ds.clone(),
        }
    }
}

/// Registry of datasets owned by one engine instance.
///
/// Besides lookup it tracks write reservations: at most one writer may own a
/// given dataset id's commit lifecycle at a time.
#[derive(Default)]
pub struct Catalog {
    datasets: RwLock<BTreeMap<String, Entry>>,
    writers: Mutex<HashSet<String>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, config: &DatasetConfig) -> Result<Arc<dyn Dataset>> {
        if config.id.is_empty() {
            return Err(CellDbError::config("dataset", "dataset id must not be empty"));
        }
        let entry = match config.type_tag.as_str() {
            SPARSE_MUTABLE => Entry::Sparse(Arc::new(SparseDataset::new(&config.id))),
            MERGED => {
                let params = MergedParams::parse(&config.id, &config.params)?;
                let mut members = Vec::with_capacity(params.datasets.len());
                for member in &params.datasets {
                    if member.id() == config.id {
                        return Err(CellDbError::config(
                            &config.id,
                            "merged dataset cannot include itself",
                        ));
                    }
                    members.push(self.get(member.id())?);
                }
                Entry::Merged(Arc::new(MergedDataset::new(&config.id, members)))
            }
            other => {
                return Err(CellDbError::config(
                    &config.id,
                    format!("unknown dataset type '{other}'"),
                ))
            }
        };

        // same lock order as `stage`: writers, then datasets
        let writers = self.writers.lock();
        if writers.contains(&config.id) {
            return Err(CellDbError::Conflict {
                id: config.id.clone(),
            });
        }
        let mut datasets = self.datasets.write();
        if datasets.contains_key(&config.id) {
            return Err(CellDbError::config(
                &config.id,
                "a dataset with this id already exists",
            ));
        }
        let dataset = entry.dataset();
        datasets.insert(config.id.clone(), entry);
        drop(datasets);
        drop(writers);
        tracing::info!("created {} dataset {}", config.type_tag, config.id);
        Ok(dataset)
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn Dataset>> {
        self.datasets
            .read()
            .get(id)
            .map(Entry::dataset)
            .ok_or_else(|| CellDbError::not_found("dataset", id))
    }

    /// Writable handle on a `sparse.mutable` dataset.
    pub fn sparse(&self, id: &str) -> Result<Arc<SparseDataset>> {
        match self.datasets.read().get(id) {
            Some(Entry::Sparse(ds)) => Ok(ds.clone()),
            Some(Entry::Merged(_)) => Err(CellDbError::state(id, "merged datasets are read-only")),
            None => Err(CellDbError::not_found("dataset", id)),
        }
    }

    /// Dataset for querying; uncommitted datasets are rejected.
    pub fn readable(&self, id: &str) -> Result<Arc<dyn Dataset>> {
        let dataset = self.get(id)?;
        if dataset.state() != DatasetState::Committed {
            return Err(CellDbError::state(
                id,
                "dataset is not committed and cannot be queried",
            ));
        }
        Ok(dataset)
    }

    pub fn drop_dataset(&self, id: &str) -> Result<()> {
        if self.writers.lock().contains(id) {
            return Err(CellDbError::Conflict { id: id.to_string() });
        }
        match self.datasets.write().remove(id) {
            Some(_) => {
                tracing::info!("dropped dataset {id}");
                Ok(())
            }
            None => Err(CellDbError::not_found("dataset", id)),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.datasets.read().contains_key(id)
    }

    pub fn list(&self) -> Vec<String> {
        self.datasets.read().keys().cloned().collect()
    }

    pub fn info(&self, id: &str) -> Result<DatasetInfo> {
        let dataset = self.get(id)?;
        Ok(DatasetInfo::of(dataset.as_ref()))
    }

    /// Reserves `id` for an atomic rewrite.
    ///
    /// Rows go into a private dataset; nothing is visible under `id` until
    /// [`StagedDataset::publish`]. Dropping the stage releases the reservation
    /// and discards its rows.
    pub fn stage(&self, id: &str) -> Result<StagedDataset<'_>> {
        if id.is_empty() {
            return Err(CellDbError::config("dataset", "dataset id must not be empty"));
        }
        let mut writers = self.writers.lock();
        if writers.contains(id) {
            return Err(CellDbError::Conflict { id: id.to_string() });
        }
        match self.datasets.read().get(id) {
            Some(Entry::Merged(_)) => {
                return Err(CellDbError::state(
                    id,
                    "cannot overwrite a merged dataset",
                ))
            }
            Some(Entry::Sparse(ds)) if !ds.is_committed() => {
                return Err(CellDbError::Conflict { id: id.to_string() })
            }
            _ => {}
        }
        writers.insert(id.to_string());
        tracing::debug!("staging dataset {id}");
        Ok(StagedDataset {
            catalog: self,
            dataset: Some(SparseDataset::new(id)),
        })
    }

    fn release(&self, id: &str) {
        self.writers.lock().remove(id);
    }
}

/// Write reservation returned by [`Catalog::stage`].
pub struct StagedDataset<'a> {
    catalog: &'a Catalog,
    dataset: Option<SparseDataset>,
}

impl StagedDataset<'_> {
    pub fn id(&self) -> &str {
        self.dataset.as_ref().map(|ds| ds.id()).unwrap_or_default()
    }

    pub fn record_row<I, K>(&self, row_name: &str, cells: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, CellValue, Timestamp)>,
        K: AsRef<str>,
    {
        match &self.dataset {
            Some(ds) => ds.record_row(row_name, cells),
            None => Err(CellDbError::state("dataset", "stage already published")),
        }
    }

    /// Commits the staged rows and swaps them in under the reserved id,
    /// replacing any previous committed dataset of that id.
    pub fn publish(mut self) -> Result<Arc<dyn Dataset>> {
        let dataset = self
            .dataset
            .take()
            .ok_or_else(|| CellDbError::state("dataset", "stage already published"))?;
        let id = dataset.id().to_string();
        dataset.commit();
        let dataset = Arc::new(dataset);
        let replaced = self
            .catalog
            .datasets
            .write()
            .insert(id.clone(), Entry::Sparse(dataset.clone()))
            .is_some();
        self.catalog.release(&id);
        if replaced {
            tracing::info!("replaced dataset {id}");
        }
        Ok(dataset)
    }
}

impl Drop for StagedDataset<'_> {
    fn drop(&mut self) {
        if let Some(ds) = self.dataset.take() {
            tracing::debug!("discarding staged dataset {}", ds.id());
            self.catalog.release(ds.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn create_sparse(catalog: &Catalog, id: &str) -> Arc<SparseDataset> {
        catalog.create(&DatasetConfig::sparse(id)).unwrap();
        catalog.sparse(id).unwrap()
    }

    fn setup_catalog() -> Catalog {
        let catalog = Catalog::new();
        let ds = create_sparse(&catalog, "base");
        ds.record_row("r1", [("x", CellValue::Integer(1), 0)]).unwrap();
        ds.commit();
        catalog
    }

    #[test]
    fn duplicate_and_unknown_types_are_config_errors() {
        let catalog = setup_catalog();
        let dup = catalog.create(&DatasetConfig::sparse("base")).unwrap_err();
        assert_eq!(dup.kind(), ErrorKind::Configuration);

        let mut cfg = DatasetConfig::sparse("other");
        cfg.type_tag = "beh.mutable".to_string();
        let unknown = catalog.create(&cfg).unwrap_err();
        assert_eq!(unknown.kind(), ErrorKind::Configuration);
        assert_eq!(unknown.id(), Some("other"));
    }

    #[test]
    fn merged_members_must_exist() {
        let catalog = setup_catalog();
        let err = catalog
            .create(&DatasetConfig::merged("m", ["base", "missing"]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!catalog.contains("m"));
        catalog
            .create(&DatasetConfig::merged("m", ["base"]))
            .unwrap();
        assert_eq!(catalog.info("m").unwrap().row_count, 1);
    }

    #[test]
    fn uncommitted_datasets_are_not_readable() {
        let catalog = setup_catalog();
        create_sparse(&catalog, "open");
        let err = catalog.readable("open").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        assert!(catalog.readable("base").is_ok());
    }

    #[test]
    fn staged_rows_stay_invisible_until_publish() {
        let catalog = setup_catalog();
        let stage = catalog.stage("out").unwrap();
        stage
            .record_row("a", [("v", CellValue::Integer(1), 0)])
            .unwrap();
        assert!(!catalog.contains("out"));

        let second = catalog.stage("out");
        match second {
            Err(CellDbError::Conflict { id }) => assert_eq!(id, "out"),
            Err(other) => panic!("unexpected: {other:?}"),
            Ok(_) => panic!("unexpected: second stage accepted"),
        }

        stage.publish().unwrap();
        let out = catalog.readable("out").unwrap();
        assert_eq!(out.row_names(), vec!["a"]);
        assert!(catalog.stage("out").is_ok());
    }

    #[test]
    fn dropped_stage_releases_reservation() {
        let catalog = setup_catalog();
        {
            let stage = catalog.stage("out").unwrap();
            stage
                .record_row("a", [("v", CellValue::Integer(1), 0)])
                .unwrap();
        }
        assert!(!catalog.contains("out"));
        assert!(catalog.stage("out").is_ok());
    }

    #[test]
    fn publish_replaces_previous_output() {
        let catalog = setup_catalog();
        let stage = catalog.stage("base").unwrap();
        stage
            .record_row("fresh", [("y", CellValue::Integer(2), 0)])
            .unwrap();
        stage.publish().unwrap();
        assert_eq!(catalog.get("base").unwrap().row_names(), vec!["fresh"]);
    }

    #[test]
    fn create_and_stage_of_one_id_exclude_each_other() {
        let catalog = setup_catalog();
        let stage = catalog.stage("out").unwrap();
        assert!(matches!(
            catalog.create(&DatasetConfig::sparse("out")),
            Err(CellDbError::Conflict { .. })
        ));
        drop(stage);

        for _ in 0..200 {
            let catalog = Catalog::new();
            let barrier = std::sync::Barrier::new(2);
            let (created, staged) = std::thread::scope(|s| {
                let creator = s.spawn(|| {
                    barrier.wait();
                    catalog.create(&DatasetConfig::sparse("race")).is_ok()
                });
                let stager = s.spawn(|| {
                    barrier.wait();
                    // hold the reservation until both sides have finished
                    catalog.stage("race").map(std::mem::forget).is_ok()
                });
                (creator.join().unwrap(), stager.join().unwrap())
            });
            assert!(created != staged, "created {created}, staged {staged}");
        }
    }

    #[test]
    fn open_dataset_cannot_be_staged() {
        let catalog = setup_catalog();
        create_sparse(&catalog, "open");
        assert!(matches!(
            catalog.stage("open"),
            Err(CellDbError::Conflict { .. })
        ));
    }
}
