//! Linear unit conversions.
//!
//! Only affine transforms (`value * scale + offset`) are supported, and only
//! between unit strings that the variable registry declares explicitly.

use serde::{Deserialize, Serialize};

/// An affine transform from some unit into a variable's canonical unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearTransform {
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
}

fn default_scale() -> f64 {
    1.0
}

impl Default for LinearTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl LinearTransform {
    pub const IDENTITY: LinearTransform = LinearTransform {
        scale: 1.0,
        offset: 0.0,
    };

    pub fn new(scale: f64, offset: f64) -> Self {
        Self { scale, offset }
    }

    pub fn is_identity(&self) -> bool {
        self.scale == 1.0 && self.offset == 0.0
    }

    #[inline]
    pub fn apply(&self, value: f64) -> f64 {
        value * self.scale + self.offset
    }

    /// The transform mapping canonical values back into this unit.
    ///
    /// Returns `None` for a degenerate (zero-scale) transform.
    pub fn inverse(&self) -> Option<LinearTransform> {
        if self.scale == 0.0 || !self.scale.is_finite() {
            return None;
        }
        Some(LinearTransform {
            scale: 1.0 / self.scale,
            offset: -self.offset / self.scale,
        })
    }

    /// `other` after `self`.
    pub fn then(&self, other: &LinearTransform) -> LinearTransform {
        LinearTransform {
            scale: self.scale * other.scale,
            offset: self.offset * other.scale + other.offset,
        }
    }

    /// Apply in place; NaN stays NaN.
    pub fn apply_slice(&self, values: &mut [f64]) {
        if self.is_identity() {
            return;
        }
        for v in values.iter_mut() {
            *v = self.apply(*v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_celsius_to_kelvin_and_back() {
        let c_to_k = LinearTransform::new(1.0, 273.15);
        let k_to_c = c_to_k.inverse().unwrap();
        assert!((c_to_k.apply(20.0) - 293.15).abs() < 1e-12);
        assert!((k_to_c.apply(293.15) - 20.0).abs() < 1e-12);
    }

    #[test]
    fn test_compose() {
        let hpa_to_pa = LinearTransform::new(100.0, 0.0);
        let pa_to_hpa = hpa_to_pa.inverse().unwrap();
        let roundtrip = hpa_to_pa.then(&pa_to_hpa);
        assert!((roundtrip.apply(1013.25) - 1013.25).abs() < 1e-9);
    }

    #[test]
    fn test_zero_scale_has_no_inverse() {
        assert!(LinearTransform::new(0.0, 1.0).inverse().is_none());
    }
}
