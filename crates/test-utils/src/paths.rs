//! Path utilities for locating workspace files from tests.

use std::path::PathBuf;

use tempfile::TempDir;

/// Returns the workspace root directory.
fn workspace_root() -> PathBuf {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    PathBuf::from(manifest_dir)
        .parent() // crates/
        .and_then(|p| p.parent()) // workspace root
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from(manifest_dir))
}

/// The workspace `config/` directory (variables and conventions).
pub fn config_dir() -> PathBuf {
    workspace_root().join("config")
}

/// Creates a temporary working directory, removed when dropped.
pub fn temp_working_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("zampy-test-")
        .tempdir()
        .expect("Failed to create temp dir")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_root_has_config() {
        let root = workspace_root();
        assert!(root.join("Cargo.toml").exists());
        assert!(config_dir().join("variables.yaml").exists());
    }

    #[test]
    fn test_temp_working_dir_is_removed() {
        let path = {
            let dir = temp_working_dir();
            assert!(dir.path().exists());
            dir.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
