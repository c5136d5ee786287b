//! Shared test utilities for the zampy workspace.
//!
//! This crate provides common testing infrastructure including:
//! - A scripted in-memory [`FakeArchiveClient`]
//! - Synthetic CF-JSON and ESRI ASCII payload generators
//! - Recipe and configuration fixtures
//! - Workspace path helpers
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```

pub mod fake_archive;
pub mod fixtures;
pub mod generators;
pub mod paths;

pub use fake_archive::*;
pub use fixtures::*;
pub use generators::*;
pub use paths::*;

/// Macro for approximate floating-point equality assertions.
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(273.15_f64, 273.1500001_f64, 1e-6);
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if !(diff <= epsilon) {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Element-wise approximate equality of two slices. NaN matches NaN.
#[macro_export]
macro_rules! assert_slice_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: &[f64] = &$left;
        let right: &[f64] = &$right;
        assert_eq!(left.len(), right.len(), "slice lengths differ");
        for (i, (l, r)) in left.iter().zip(right.iter()).enumerate() {
            if l.is_nan() && r.is_nan() {
                continue;
            }
            let diff = (l - r).abs();
            if !(diff <= $epsilon as f64) {
                panic!(
                    "assertion failed at index {}: `{:?}` vs `{:?}` (diff {:?})",
                    i, l, r, diff
                );
            }
        }
    }};
}
