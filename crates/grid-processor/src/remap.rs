//! Canonical name/unit → output convention name/unit.

use tracing::warn;

use zampy_common::{
    CanonicalVariable, ConventionTable, Direction, LinearTransform, Result,
};

/// How one canonical variable appears in an output convention.
#[derive(Debug, Clone, PartialEq)]
pub struct Remapping {
    pub name: String,
    pub units: String,
    pub positive: Option<Direction>,
    pub transform: LinearTransform,
}

impl Remapping {
    pub fn apply(&self, values: &mut [f64]) {
        if !self.transform.is_identity() {
            self.transform.apply_slice(values);
        }
    }
}

/// Resolve the output name, unit and value transform for `variable`.
///
/// A variable missing from the table keeps its canonical name and unit.
pub fn remap(variable: &CanonicalVariable, table: &ConventionTable) -> Result<Remapping> {
    let Some(entry) = table.entry(&variable.name) else {
        warn!(
            variable = %variable.name,
            convention = %table.name,
            "Variable not in convention, keeping canonical name and units"
        );
        return Ok(Remapping {
            name: variable.name.clone(),
            units: variable.unit.clone(),
            positive: variable.positive,
            transform: LinearTransform::IDENTITY,
        });
    };

    let mut transform = variable.from_canonical(&entry.units)?;
    let positive = match (variable.positive, entry.positive) {
        (Some(from), Some(to)) if from != to => {
            transform = transform.then(&LinearTransform::new(-1.0, 0.0));
            Some(to)
        }
        (canonical, wanted) => wanted.or(canonical),
    };

    Ok(Remapping {
        name: entry.variable.clone(),
        units: entry.units.clone(),
        positive,
        transform,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use zampy_common::{VariableRegistry, ZampyError};

    const REGISTRY: &str = r#"
variables:
  surface_net_radiation:
    unit: W m-2
    kind: accumulated
    positive: down
    accepted_units:
      kW m-2: { scale: 1000.0 }
  air_temperature:
    unit: kelvin
    kind: instantaneous
    accepted_units:
      degC: { offset: 273.15 }
"#;

    const CONVENTION: &str = r#"
name: TEST
variables:
  surface_net_radiation: { variable: Rnet, units: kW m-2, positive: up }
  air_temperature: { variable: Tair, units: degC }
"#;

    fn setup() -> (VariableRegistry, ConventionTable) {
        (
            VariableRegistry::from_yaml_str(REGISTRY).unwrap(),
            ConventionTable::from_yaml_str(CONVENTION).unwrap(),
        )
    }

    #[test]
    fn test_unit_inverted_from_accepted_transform() {
        let (registry, table) = setup();
        let remapping = remap(registry.require("air_temperature").unwrap(), &table).unwrap();
        assert_eq!(remapping.name, "Tair");
        let mut values = [273.15, 300.0];
        remapping.apply(&mut values);
        assert!((values[0]).abs() < 1e-9);
        assert!((values[1] - 26.85).abs() < 1e-9);
    }

    #[test]
    fn test_sign_flipped_on_direction_mismatch() {
        let (registry, table) = setup();
        let remapping = remap(registry.require("surface_net_radiation").unwrap(), &table).unwrap();
        assert_eq!(remapping.positive, Some(Direction::Up));
        let mut values = [500.0];
        remapping.apply(&mut values);
        assert!((values[0] + 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_missing_entry_keeps_canonical() {
        let (registry, _) = setup();
        let empty = ConventionTable::from_yaml_str("name: EMPTY\nvariables: {}\n").unwrap();
        let remapping = remap(registry.require("air_temperature").unwrap(), &empty).unwrap();
        assert_eq!(remapping.name, "air_temperature");
        assert_eq!(remapping.units, "kelvin");
        assert!(remapping.transform.is_identity());
    }

    #[test]
    fn test_unknown_output_unit() {
        let (registry, _) = setup();
        let table = ConventionTable::from_yaml_str(
            "name: BAD\nvariables:\n  air_temperature: { variable: T, units: degF }\n",
        )
        .unwrap();
        let err = remap(registry.require("air_temperature").unwrap(), &table).unwrap_err();
        assert!(matches!(err, ZampyError::UnsupportedUnitConversion { .. }));
    }
}
