//! Per-dataset outcome of a recipe run.

use std::fmt;

use downloader::IndexStats;
use zampy_common::{OutputArtifact, ZampyError};

/// Result of one dataset pipeline.
#[derive(Debug)]
pub struct DatasetOutcome {
    pub dataset: String,
    pub result: std::result::Result<Vec<OutputArtifact>, ZampyError>,
}

impl DatasetOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub recipe: String,
    pub datasets: Vec<DatasetOutcome>,
    /// Artifact index counts at the end of the run.
    pub index: IndexStats,
}

impl RunReport {
    /// True only if every dataset succeeded.
    pub fn is_success(&self) -> bool {
        self.datasets.iter().all(DatasetOutcome::is_success)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &OutputArtifact> {
        self.datasets
            .iter()
            .filter_map(|d| d.result.as_ref().ok())
            .flatten()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &ZampyError)> {
        self.datasets
            .iter()
            .filter_map(|d| d.result.as_ref().err().map(|e| (d.dataset.as_str(), e)))
    }

    pub fn outcome(&self, dataset: &str) -> Option<&DatasetOutcome> {
        self.datasets.iter().find(|d| d.dataset == dataset)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Recipe '{}':", self.recipe)?;
        for outcome in &self.datasets {
            match &outcome.result {
                Ok(outputs) => {
                    writeln!(f, "  {}: ok ({} output(s))", outcome.dataset, outputs.len())?;
                    for output in outputs {
                        writeln!(
                            f,
                            "    {} -> {}: {}",
                            output.variable,
                            output.output_variable,
                            output.path.display()
                        )?;
                    }
                }
                Err(e) => writeln!(
                    f,
                    "  {}: FAILED [{}] {}",
                    outcome.dataset,
                    e.category().as_str(),
                    e
                )?,
            }
        }
        write!(
            f,
            "Artifacts: {} complete, {} pending, {} failed",
            self.index.complete, self.index.pending, self.index.failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn report() -> RunReport {
        RunReport {
            recipe: "r".to_string(),
            datasets: vec![
                DatasetOutcome {
                    dataset: "era5".to_string(),
                    result: Ok(vec![OutputArtifact {
                        dataset: "era5".to_string(),
                        variable: "air_temperature".to_string(),
                        output_variable: "Tair".to_string(),
                        path: PathBuf::from("/w/output/r/a.json"),
                    }]),
                },
                DatasetOutcome {
                    dataset: "land_cover".to_string(),
                    result: Err(ZampyError::AuthorizationRequired(
                        "accept the licence at https://cds.example.org".to_string(),
                    )),
                },
            ],
            index: IndexStats::default(),
        }
    }

    #[test]
    fn test_one_failure_fails_the_run() {
        let report = report();
        assert!(!report.is_success());
        assert_eq!(report.outputs().count(), 1);
        assert_eq!(report.failures().map(|(d, _)| d).collect::<Vec<_>>(), vec!["land_cover"]);
    }

    #[test]
    fn test_summary_carries_actionable_message() {
        let text = report().to_string();
        assert!(text.contains("era5: ok (1 output(s))"));
        assert!(text.contains("air_temperature -> Tair"));
        assert!(text.contains("accept the licence at https://cds.example.org"));
    }
}
