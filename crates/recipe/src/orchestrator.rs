//! Recipe Orchestrator: validate, plan and run download → ingest → convert
//! for every dataset of a recipe.

use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use datasets::{ArchiveClients, DatasetCatalog};
use downloader::{ArtifactIndex, DownloadCoordinator, IndexStats, RequestMode};
use grid_processor::{ConversionEngine, ConversionRequest, TargetGrid};
use ingestion::IngestionEngine;
use zampy_common::{
    ArtifactLayout, ConventionCatalog, Frequency, KeyLocks, OutputArtifact, Result,
    SpatialBounds, VariableRegistry, ZampyConfig, ZampyError,
};

use crate::document::Recipe;
use crate::plan::{DatasetPlan, ExecutionPlan, VariablePlan};
use crate::report::{DatasetOutcome, RunReport};

/// Behaviour switches for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Only use raw artifacts already on disk.
    pub skip_download: bool,
    /// Regenerate ingested artifacts even when they exist.
    pub force_ingest: bool,
}

/// Drives recipes through the pipeline.
pub struct Orchestrator {
    registry: Arc<VariableRegistry>,
    conventions: Arc<ConventionCatalog>,
    catalog: DatasetCatalog,
    coordinator: DownloadCoordinator,
    ingestion: IngestionEngine,
    conversion: ConversionEngine,
    options: RunOptions,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Build an orchestrator with the built-in registry, conventions and
    /// datasets, storing artifacts under the configured working directory.
    pub async fn new(config: &ZampyConfig, clients: ArchiveClients) -> Result<Self> {
        let registry = Arc::new(VariableRegistry::builtin()?);
        let conventions = Arc::new(ConventionCatalog::builtin()?);
        let catalog = DatasetCatalog::builtin(&registry, &clients)?;
        Self::with_parts(config, registry, conventions, catalog).await
    }

    /// Build an orchestrator from explicit registries and a dataset catalog.
    pub async fn with_parts(
        config: &ZampyConfig,
        registry: Arc<VariableRegistry>,
        conventions: Arc<ConventionCatalog>,
        catalog: DatasetCatalog,
    ) -> Result<Self> {
        config.validate()?;
        let layout = ArtifactLayout::new(&config.working_directory);
        let index = ArtifactIndex::open(&layout.index_path()).await?;
        let locks = Arc::new(KeyLocks::new());

        Ok(Self {
            coordinator: DownloadCoordinator::new(
                index,
                layout.clone(),
                locks.clone(),
                &config.download,
            ),
            ingestion: IngestionEngine::new(registry.clone(), layout.clone(), locks),
            conversion: ConversionEngine::new(
                registry.clone(),
                conventions.clone(),
                layout,
                config.na_threshold,
            ),
            registry,
            conventions,
            catalog,
            options: RunOptions::default(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Token that stops every dataset pipeline at its next stage boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Resolve and validate a recipe without touching the network.
    pub fn plan(&self, recipe: &Recipe) -> Result<ExecutionPlan> {
        let bounds = SpatialBounds::from_recipe(&recipe.bbox)?;
        let convention = self.conventions.get(&recipe.convert.convention)?;
        let frequency = Frequency::parse(&recipe.convert.frequency)?;
        TargetGrid::new(&bounds, recipe.convert.resolution)?;

        let mut datasets = Vec::with_capacity(recipe.datasets.len());
        for request in &recipe.datasets {
            let adapter = self.catalog.get(&request.dataset)?;
            let mut variables = Vec::with_capacity(request.variables.len());
            for variable in &request.variables {
                self.registry.require(&variable.name)?;
                adapter
                    .descriptor()
                    .check_request(&variable.name, &recipe.time, &bounds)?;
                let keys = adapter.plan_downloads(&variable.name, &recipe.time, &bounds)?;
                variables.push(VariablePlan {
                    variable: variable.name.clone(),
                    arguments: variable.arguments.clone(),
                    keys,
                });
            }
            datasets.push(DatasetPlan {
                dataset: adapter.id().to_string(),
                adapter,
                variables,
            });
        }

        Ok(ExecutionPlan {
            recipe: recipe.name.clone(),
            time: recipe.time,
            bounds,
            convention: convention.name.clone(),
            frequency,
            resolution: recipe.convert.resolution,
            datasets,
        })
    }

    /// Run a recipe. Validation failures are returned as `Err` before any
    /// download; pipeline failures are reported per dataset.
    #[instrument(skip(self, recipe), fields(recipe = %recipe.name))]
    pub async fn run(&self, recipe: &Recipe) -> Result<RunReport> {
        let plan = self.plan(recipe)?;
        info!(
            datasets = plan.datasets.len(),
            artifacts = plan.key_count(),
            skip_download = self.options.skip_download,
            force_ingest = self.options.force_ingest,
            "Starting recipe"
        );

        let datasets = join_all(plan.datasets.iter().map(|dataset| async {
            let result = self.run_dataset(&plan, dataset).await;
            if let Err(e) = &result {
                error!(dataset = %dataset.dataset, error = %e, "Dataset pipeline failed");
            }
            DatasetOutcome {
                dataset: dataset.dataset.clone(),
                result,
            }
        }))
        .await;

        let index = self.coordinator.stats().await?;
        info!(
            pending = index.pending,
            complete = index.complete,
            failed = index.failed,
            "Recipe finished"
        );

        Ok(RunReport {
            recipe: plan.recipe,
            datasets,
            index,
        })
    }

    pub async fn index_stats(&self) -> Result<IndexStats> {
        self.coordinator.stats().await
    }

    fn checkpoint(&self, stage: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            warn!(stage = stage, "Cancelled");
            return Err(ZampyError::Cancelled(stage.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self, plan, dataset), fields(dataset = %dataset.dataset))]
    async fn run_dataset(
        &self,
        plan: &ExecutionPlan,
        dataset: &DatasetPlan,
    ) -> Result<Vec<OutputArtifact>> {
        let mode = if self.options.skip_download {
            RequestMode::CachedOnly
        } else {
            RequestMode::Download
        };

        self.checkpoint("download")?;
        let mut raw = Vec::with_capacity(dataset.variables.len());
        for variable in &dataset.variables {
            let artifacts = self
                .coordinator
                .request_all(dataset.adapter.clone(), &variable.keys, mode)
                .await?;
            raw.push(artifacts);
        }
        info!(artifacts = dataset.key_count(), "Download stage complete");

        self.checkpoint("ingest")?;
        let mut ingested = Vec::with_capacity(raw.len());
        for artifacts in &raw {
            let mut documents = Vec::with_capacity(artifacts.len());
            for artifact in artifacts {
                documents.push(
                    self.ingestion
                        .ingest(dataset.adapter.clone(), artifact, self.options.force_ingest)
                        .await?,
                );
            }
            ingested.push(documents);
        }
        info!("Ingest stage complete");

        self.checkpoint("convert")?;
        let mut outputs = Vec::with_capacity(dataset.variables.len());
        for (variable, documents) in dataset.variables.iter().zip(&ingested) {
            let request = ConversionRequest {
                recipe: plan.recipe.clone(),
                dataset: dataset.dataset.clone(),
                variable: variable.variable.clone(),
                convention: plan.convention.clone(),
                frequency: plan.frequency,
                resolution: plan.resolution,
                bounds: plan.bounds,
                time: plan.time,
                attributes: variable.arguments.clone(),
            };
            outputs.push(self.conversion.convert(&request, documents).await?);
        }
        info!(outputs = outputs.len(), "Convert stage complete");

        Ok(outputs)
    }
}
