//! Shared data model, errors, and variation-catalog loading for the
//! HTTP request smuggling detection engine.

pub mod error;
pub mod finding;
pub mod target;
pub mod types;
pub mod variation;

pub use error::DetectError;
pub use finding::{Classification, DetectorKind, Finding, H2PayloadPlacement, ScanResult};
pub use target::{Scheme, Target};
pub use types::{HeaderField, Request1, Request2, Response1, Response2, ResponseAnomaly};
pub use variation::{CatalogKind, HeaderVariation, VariationCatalog};
