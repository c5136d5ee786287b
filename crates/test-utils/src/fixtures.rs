//! Common fixtures for zampy tests.

use std::path::Path;

use zampy_common::{ArchiveCredentials, ZampyConfig};

/// Common bounding boxes, as `(north, east, south, west)`.
pub mod bbox {
    /// The 1°×1° box used by the recipe fixtures.
    pub const NETHERLANDS_TILE: (f64, f64, f64, f64) = (51.0, 4.0, 50.0, 3.0);

    /// Spans four DEM tiles.
    pub const FOUR_TILES: (f64, f64, f64, f64) = (51.5, 4.5, 50.0, 3.0);

    /// Crosses the antimeridian; must be rejected.
    pub const ANTIMERIDIAN: (f64, f64, f64, f64) = (10.0, -170.0, 0.0, 170.0);
}

/// Recipe documents.
pub mod recipes {
    /// Two ERA5 variables, two days, regridded to 0.5° and 6-hourly ALMA.
    pub const ERA5_RECIPE: &str = r#"
name: "era5_recipe"
download:
  time: ["2020-01-01", "2020-01-02"]
  bbox: [51, 4, 50, 3]
  datasets:
    era5:
      variables:
        - air_temperature
        - surface_pressure
convert:
  convention: ALMA
  frequency: 6h
  resolution: 0.5
"#;

    /// A variable no registry entry exists for.
    pub const UNKNOWN_VARIABLE_RECIPE: &str = r#"
name: "bad_recipe"
download:
  years: [2020, 2020]
  bbox: [51, 4, 50, 3]
  datasets:
    era5:
      variables:
        - air_temperature
        - not_a_variable
convert:
  convention: ALMA
  frequency: 1D
  resolution: 0.5
"#;

    /// Two yearly land cover maps, aggregated at year-start frequency.
    pub const LAND_COVER_YEARS_RECIPE: &str = r#"
name: "land_cover_years"
download:
  years: [2019, 2020]
  bbox: [51, 4, 50, 3]
  datasets:
    land_cover:
      variables:
        - land_cover
convert:
  convention: ALMA
  frequency: YS
  resolution: 0.5
"#;

    /// Two days of CAMS CO2, daily in ALMA units (ppm).
    pub const CAMS_RECIPE: &str = r#"
name: "cams_recipe"
download:
  time: ["2003-01-01", "2003-01-02"]
  bbox: [52.5, 4.5, 51, 3]
  datasets:
    cams_co2:
      variables:
        - co2_concentration
convert:
  convention: ALMA
  frequency: 1D
  resolution: 0.75
"#;

    /// Elevation from the 90 m DEM, with an ERA5 variable carrying arguments.
    pub const MIXED_RECIPE: &str = r#"
name: "mixed recipe/1"
download:
  time: ["2020-01-01", "2020-01-01T05:00"]
  bbox: [51, 4, 50, 3]
  datasets:
    prism_dem_90:
      variables:
        - elevation
    era5:
      variables:
        - eastward_component_of_wind: {height: "10m"}
convert:
  convention: ALMA
  frequency: 6h
  resolution: 0.5
"#;
}

/// A configuration rooted at `working_directory` with fake CDS and ADS
/// credentials and short backoffs.
pub fn test_config(working_directory: &Path) -> ZampyConfig {
    let mut config = ZampyConfig::new(working_directory)
        .with_archive(
            "cds",
            ArchiveCredentials {
                url: "https://cds.example.org/api".to_string(),
                key: Some("00000:test-key".to_string()),
            },
        )
        .with_archive(
            "ads",
            ArchiveCredentials {
                url: "https://ads.example.org/api".to_string(),
                key: Some("00000:test-key".to_string()),
            },
        );
    config.download.initial_backoff_ms = 1;
    config.download.max_backoff_ms = 4;
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        config.validate().unwrap();
        assert!(config.archive("cds").is_some());
        assert!(config.archive("ads").is_some());
        assert_eq!(config.download.max_attempts, 3);
    }
}
