//! Raw file readers.

pub mod cf_json;
pub mod esri_ascii;

pub use cf_json::{parse_cf_json, read_cf_document, CfDocument};
pub use esri_ascii::{parse_esri_ascii, read_esri_ascii, AsciiGrid};
