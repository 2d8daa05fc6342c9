//! HTTP request smuggling (CL/TE desync) detection engine.
//!
//! This crate is the library surface the CLI, GUI, and JSON-writer
//! collaborators build on. It owns none of those: no argument parser,
//! no output formatter, no `main`. [`run_scan`] is the whole contract.

pub use hrs_core::{
    CatalogKind, Classification, DetectError, DetectorKind, Finding, H2PayloadPlacement, HeaderField,
    HeaderVariation, Request1, Request2, Response1, Response2, ResponseAnomaly, ScanResult, Scheme, Target,
    VariationCatalog,
};
pub use hrs_detect::{run_scan, VariationFiles};
pub use hrs_transport::{Http1Client, Http2Client};

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn run_scan_surfaces_a_bad_url_as_an_input_error() {
        let result = run_scan(
            "ftp://example.com",
            &DetectorKind::default_set(),
            &[],
            Duration::from_millis(50),
            false,
            H2PayloadPlacement::NormalHeader,
            VariationFiles::default(),
        )
        .await;
        // one or more errors, zero vulnerable findings.
        assert_eq!(result.exit_code, 2);
        assert_eq!(result.errors.len(), 1);
    }
}
