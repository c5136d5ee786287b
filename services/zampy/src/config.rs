//! Locating and loading `zampy_config.yml`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use zampy_common::ZampyConfig;

/// Used when neither `--config` nor `ZAMPY_CONFIG` is given.
pub const DEFAULT_CONFIG_PATH: &str = "~/.config/zampy/zampy_config.yml";

/// Expand `~` and `$VAR` / `${VAR}` in a path.
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(&raw)
        .with_context(|| format!("Failed to expand path: {}", raw))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

/// Load the configuration file, expanding the working directory.
pub fn load_config(path: Option<&Path>) -> Result<ZampyConfig> {
    let path = match path {
        Some(p) => expand_path(p)?,
        None => expand_path(Path::new(DEFAULT_CONFIG_PATH))?,
    };

    let mut config = ZampyConfig::load(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.working_directory = expand_path(&config.working_directory)?;
    config.validate()?;

    info!(
        config = %path.display(),
        working_directory = %config.working_directory.display(),
        archives = config.archives.len(),
        "Loaded configuration"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_working_directory_is_expanded() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("ZAMPY_TEST_ROOT", dir.path());
        let path = dir.path().join("zampy_config.yml");
        std::fs::write(
            &path,
            "working_directory: ${ZAMPY_TEST_ROOT}/work\n\
             cds:\n  url: https://cds.example.org/api\n  key: \"1:abc\"\n\
             download:\n  max_attempts: 5\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.working_directory, dir.path().join("work"));
        assert_eq!(config.download.max_attempts, 5);
        assert_eq!(config.archive("cds").unwrap().key.as_deref(), Some("1:abc"));
    }

    #[test]
    fn test_missing_file_is_a_config_error() {
        let err = load_config(Some(Path::new("/nonexistent/zampy_config.yml"))).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<zampy_common::ZampyError>(),
            Some(zampy_common::ZampyError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_tilde_expands_to_home() {
        let expanded = expand_path(Path::new("~/x")).unwrap();
        assert!(!expanded.to_string_lossy().starts_with('~'));
    }
}
