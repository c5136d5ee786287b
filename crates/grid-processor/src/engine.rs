//! The Conversion Engine: ingested documents → one output artifact.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument};

use zampy_common::artifact::write_atomic;
use zampy_common::{
    ArtifactLayout, CanonicalVariable, ConventionCatalog, ConventionTable, Frequency,
    IngestedArtifact, IngestedDocument, OutputArtifact, OutputDocument, Result, SpatialBounds,
    TimeBounds, VariableRegistry, ZampyError,
};

use crate::remap::remap;
use crate::spatial::{regrid, AggregationMethod, TargetGrid};
use crate::temporal::resample;

/// Everything needed to produce one output artifact.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub recipe: String,
    pub dataset: String,
    /// Canonical variable name.
    pub variable: String,
    pub convention: String,
    pub frequency: Frequency,
    pub resolution: f64,
    pub bounds: SpatialBounds,
    pub time: TimeBounds,
    /// Extra recipe arguments, stored on the output document.
    pub attributes: BTreeMap<String, Value>,
}

#[derive(Clone)]
pub struct ConversionEngine {
    registry: Arc<VariableRegistry>,
    conventions: Arc<ConventionCatalog>,
    layout: ArtifactLayout,
    na_threshold: f64,
}

impl ConversionEngine {
    pub fn new(
        registry: Arc<VariableRegistry>,
        conventions: Arc<ConventionCatalog>,
        layout: ArtifactLayout,
        na_threshold: f64,
    ) -> Self {
        Self {
            registry,
            conventions,
            layout,
            na_threshold,
        }
    }

    /// Regrid, resample and remap `inputs`, then write the output document.
    ///
    /// Nothing is written unless every transform succeeds.
    #[instrument(skip(self, request, inputs), fields(dataset = %request.dataset, variable = %request.variable, inputs = inputs.len()))]
    pub async fn convert(
        &self,
        request: &ConversionRequest,
        inputs: &[IngestedArtifact],
    ) -> Result<OutputArtifact> {
        let canonical = self.registry.require(&request.variable)?.clone();
        let table = self.conventions.get(&request.convention)?.clone();
        if inputs.is_empty() {
            return Err(ZampyError::ArtifactMissing(format!(
                "no ingested artifacts for {}/{}",
                request.dataset, request.variable
            )));
        }

        let mut documents = Vec::with_capacity(inputs.len());
        for input in inputs {
            let bytes = tokio::fs::read(&input.path).await?;
            let document: IngestedDocument = serde_json::from_slice(&bytes)
                .map_err(|e| ZampyError::malformed(&input.path, e.to_string()))?;
            documents.push(document);
        }
        debug!(documents = documents.len(), "Loaded ingested documents");

        let owned = request.clone();
        let na_threshold = self.na_threshold;
        let document = tokio::task::spawn_blocking(move || {
            build_output(&owned, &canonical, &table, documents, na_threshold)
        })
        .await
        .map_err(|e| ZampyError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        let path = self.layout.output_path(
            &request.recipe,
            &request.dataset,
            &request.variable,
            &request.time,
            request.resolution,
            &document.frequency,
        );
        write_atomic(&path, &serde_json::to_vec(&document)?).await?;

        info!(
            path = %path.display(),
            output_variable = %document.variable,
            steps = document.cube.time.len(),
            "Wrote output artifact"
        );
        Ok(OutputArtifact {
            dataset: request.dataset.clone(),
            variable: request.variable.clone(),
            output_variable: document.variable,
            path,
        })
    }
}

fn build_output(
    request: &ConversionRequest,
    canonical: &CanonicalVariable,
    table: &ConventionTable,
    documents: Vec<IngestedDocument>,
    na_threshold: f64,
) -> Result<OutputDocument> {
    let is_static = documents.iter().all(|d| d.native_step_seconds.is_none());
    let native_step = documents.iter().filter_map(|d| d.native_step_seconds).max();
    let mut attributes: BTreeMap<String, Value> = documents
        .first()
        .map(|d| {
            d.attributes
                .iter()
                .filter(|(k, _)| matches!(k.as_str(), "source_dataset" | "license"))
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect()
        })
        .unwrap_or_default();
    let cubes: Vec<_> = documents.into_iter().map(|d| d.cube).collect();

    let target = TargetGrid::new(&request.bounds, request.resolution)?;
    let mut cube = regrid(
        &cubes,
        &target,
        AggregationMethod::for_kind(canonical.kind),
        na_threshold,
    )?;

    // Static fields are labelled with the start of the requested period.
    if is_static && cube.time.len() == 1 {
        cube.time = vec![request.time.start];
    }

    let mut cube = resample(&cube, canonical.kind, native_step, &request.frequency)?;

    let remapping = remap(canonical, table)?;
    remapping.apply(&mut cube.values);

    attributes.insert("aggregation".to_string(), Value::from(canonical.kind.as_str()));
    attributes.insert("canonical_units".to_string(), Value::from(canonical.unit.clone()));
    for (name, value) in &request.attributes {
        attributes.insert(name.clone(), value.clone());
    }

    Ok(OutputDocument {
        recipe: request.recipe.clone(),
        dataset: request.dataset.clone(),
        convention: table.name.clone(),
        variable: remapping.name,
        canonical_variable: canonical.name.clone(),
        units: remapping.units,
        positive: remapping.positive,
        frequency: request.frequency.code(),
        resolution: request.resolution,
        time_window: request.time,
        bounds: request.bounds,
        attributes,
        cube,
    })
}
