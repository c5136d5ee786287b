//! Lookup of dataset adapters by id.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use zampy_common::{normalize_dataset_id, Result, VariableRegistry, ZampyError};

use crate::adapter::DatasetAdapter;
use crate::cams::CamsReanalysis;
use crate::cds::CdsReanalysis;
use crate::client::ArchiveClients;
use crate::land_cover::LandCover;
use crate::prism_dem::{DemGrade, PrismDem};

/// Adapters keyed by normalized dataset id (`ERA5-Land` finds `era5_land`).
#[derive(Clone, Default)]
pub struct DatasetCatalog {
    adapters: BTreeMap<String, Arc<dyn DatasetAdapter>>,
}

impl DatasetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every dataset zampy ships with.
    pub fn builtin(registry: &VariableRegistry, clients: &ArchiveClients) -> Result<Self> {
        let mut catalog = Self::new();
        catalog.register(Arc::new(CdsReanalysis::era5(registry, clients.cds.clone())?));
        catalog.register(Arc::new(CdsReanalysis::era5_land(registry, clients.cds.clone())?));
        catalog.register(Arc::new(LandCover::new(registry, clients.cds.clone())?));
        catalog.register(Arc::new(CamsReanalysis::new(registry, clients.ads.clone())?));
        catalog.register(Arc::new(PrismDem::new(
            DemGrade::Glo30,
            registry,
            clients.http.clone(),
            None,
        )?));
        catalog.register(Arc::new(PrismDem::new(
            DemGrade::Glo90,
            registry,
            clients.http.clone(),
            None,
        )?));
        Ok(catalog)
    }

    pub fn register(&mut self, adapter: Arc<dyn DatasetAdapter>) {
        let id = normalize_dataset_id(adapter.id());
        debug!(dataset = %id, "Registered dataset adapter");
        self.adapters.insert(id, adapter);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn DatasetAdapter>> {
        self.adapters
            .get(&normalize_dataset_id(id))
            .cloned()
            .ok_or_else(|| ZampyError::UnknownDataset(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }
}
