//! The Ingestion Engine: raw artifact → canonical grid document.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use datasets::DatasetAdapter;
use zampy_common::artifact::write_atomic;
use zampy_common::time::median_step_seconds;
use zampy_common::{
    ArtifactLayout, DownloadArtifact, IngestedArtifact, IngestedDocument, KeyLocks,
    NativeVariable, Result, VariableRegistry, ZampyError,
};

use crate::normalize::to_cube;

/// Converts raw artifacts into canonical-unit documents.
#[derive(Clone)]
pub struct IngestionEngine {
    registry: Arc<VariableRegistry>,
    layout: ArtifactLayout,
    locks: Arc<KeyLocks>,
}

impl IngestionEngine {
    pub fn new(registry: Arc<VariableRegistry>, layout: ArtifactLayout, locks: Arc<KeyLocks>) -> Self {
        Self {
            registry,
            layout,
            locks,
        }
    }

    /// Ingest one raw artifact. An existing ingested file is reused unless
    /// `force` is set.
    #[instrument(skip(self, adapter, artifact), fields(dataset = %artifact.key.dataset, key = %artifact.key))]
    pub async fn ingest(
        &self,
        adapter: Arc<dyn DatasetAdapter>,
        artifact: &DownloadArtifact,
        force: bool,
    ) -> Result<IngestedArtifact> {
        let key = &artifact.key;
        let path = self.layout.ingested_path(key);
        let _guard = self.locks.lock(&format!("ingest:{}", key.id())).await;

        if !force && path.exists() {
            debug!(path = %path.display(), "Ingested artifact exists, skipping");
            return Ok(IngestedArtifact {
                key: key.clone(),
                path,
            });
        }

        let registry = self.registry.clone();
        let raw = artifact.clone();
        let document = tokio::task::spawn_blocking(move || {
            build_document(adapter.as_ref(), &registry, &raw)
        })
        .await
        .map_err(|e| ZampyError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        let bytes = serde_json::to_vec(&document)?;
        write_atomic(&path, &bytes).await?;

        info!(
            path = %path.display(),
            steps = document.cube.time.len(),
            lat = document.cube.latitude.len(),
            lon = document.cube.longitude.len(),
            "Ingested artifact"
        );
        Ok(IngestedArtifact {
            key: key.clone(),
            path,
        })
    }
}

/// Read an ingested document back from disk.
pub async fn read_ingested(artifact: &IngestedArtifact) -> Result<IngestedDocument> {
    let bytes = tokio::fs::read(&artifact.path).await?;
    serde_json::from_slice(&bytes).map_err(|e| ZampyError::malformed(&artifact.path, e.to_string()))
}

fn build_document(
    adapter: &dyn DatasetAdapter,
    registry: &VariableRegistry,
    artifact: &DownloadArtifact,
) -> Result<IngestedDocument> {
    let key = &artifact.key;
    let descriptor = adapter.descriptor();
    let canonical = registry.require(&key.variable)?;
    let native = descriptor.native_variable(&key.variable)?;

    let field = adapter.ingest(artifact)?;
    if field.name != native.name {
        return Err(ZampyError::malformed(
            &artifact.path,
            format!(
                "expected variable '{}' for {}, found '{}'",
                native.name, key.variable, field.name
            ),
        ));
    }

    let native_units = effective_native_unit(native, field.units.as_deref())
        .ok_or_else(|| {
            ZampyError::malformed(
                &artifact.path,
                format!("'{}' declares no units", field.name),
            )
        })?;
    let transform = canonical.to_canonical(&native_units)?;

    let mut cube = to_cube(&field, key.time.start, &artifact.path)?;
    transform.apply_slice(&mut cube.values);

    // Files covering a longer period than the key window (yearly maps) keep
    // their single step.
    let window = if cube.time.len() > 1 {
        Some(&key.time)
    } else {
        None
    };
    let cube = cube.clip(&key.bounds, window);
    if cube.is_empty() {
        return Err(ZampyError::malformed(
            &artifact.path,
            format!(
                "no grid points inside {} for {}",
                key.bounds.path_component(),
                key.time.path_component()
            ),
        ));
    }
    if cube.valid_count() == 0 {
        warn!(key = %key, "Ingested field has no valid values");
    }

    let native_step_seconds = descriptor
        .temporal_resolution
        .map(|declared| median_step_seconds(&cube.time).unwrap_or(declared.shortest_seconds()));

    let mut attributes: BTreeMap<String, String> = field.attributes.clone();
    attributes.insert("source_dataset".to_string(), descriptor.name.clone());
    attributes.insert("license".to_string(), descriptor.license.clone());

    Ok(IngestedDocument {
        dataset: descriptor.id.clone(),
        variable: canonical.name.clone(),
        units: canonical.unit.clone(),
        kind: canonical.kind,
        native_variable: field.name.clone(),
        native_units,
        time_window: key.time,
        bounds: key.bounds,
        native_step_seconds,
        attributes,
        cube,
    })
}

/// The unit raw values are in. The file's own `units` attribute wins unless
/// it is absent or an alias of the registry's declared native unit; an
/// unknown attribute then fails the unit lookup instead of being ignored.
fn effective_native_unit(native: &NativeVariable, file_units: Option<&str>) -> Option<String> {
    let file_units = file_units.map(str::trim).filter(|u| !u.is_empty());
    match (&native.unit, file_units) {
        (Some(declared), None) => Some(declared.clone()),
        (Some(declared), Some(file)) if native.is_alias(file) => Some(declared.clone()),
        (Some(declared), Some(file)) => {
            warn!(
                declared = %declared,
                file = %file,
                "File units differ from the registry, converting from the file units"
            );
            Some(file.to_string())
        }
        (None, file) => file.map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn native(unit: Option<&str>, file_units: &[&str]) -> NativeVariable {
        NativeVariable {
            name: "ssrd".to_string(),
            unit: unit.map(str::to_string),
            file_units: file_units.iter().map(|u| u.to_string()).collect(),
            request: None,
        }
    }

    #[test]
    fn test_declared_unit_applies_to_aliases_only() {
        let ssrd = native(Some("J m**-2 h**-1"), &["J m**-2"]);
        assert_eq!(effective_native_unit(&ssrd, None).as_deref(), Some("J m**-2 h**-1"));
        assert_eq!(
            effective_native_unit(&ssrd, Some("J m**-2")).as_deref(),
            Some("J m**-2 h**-1")
        );
        assert_eq!(effective_native_unit(&ssrd, Some("W m**-2")).as_deref(), Some("W m**-2"));
    }

    #[test]
    fn test_blank_file_units_fall_back() {
        assert_eq!(effective_native_unit(&native(Some("K"), &[]), Some("  ")).as_deref(), Some("K"));
        assert_eq!(effective_native_unit(&native(None, &[]), Some(" ")), None);
    }
}
