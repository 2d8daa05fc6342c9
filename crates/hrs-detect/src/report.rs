//! Report aggregator and the `run_scan` entry point.

use std::path::PathBuf;
use std::time::Duration;

use hrs_core::{CatalogKind, DetectorKind, H2PayloadPlacement, HeaderField, HeaderVariation, ScanResult, Target, VariationCatalog};
use tracing::info;

use crate::probes::{self, ProbeParams};

/// Default connect timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Fixed run order, the two stubs appended at the end since
/// they are user-selectable but outside the core four.
const ALL_DETECTORS: [DetectorKind; 6] = [
    DetectorKind::ClTe,
    DetectorKind::TeCl,
    DetectorKind::H2Cl,
    DetectorKind::H2Te,
    DetectorKind::ClZero,
    DetectorKind::H2Zero,
];

/// On-disk catalog paths, or `None` to use the built-in defaults (spec
/// defaults). Consumed as opaque input — their *contents* are the
/// external CLI collaborator's concern, not this crate's.
#[derive(Debug, Clone, Default)]
pub struct VariationFiles {
    pub te_catalog: Option<PathBuf>,
    pub cl_catalog: Option<PathBuf>,
}

/// The single external entry point:
/// `run_scan(url, types, headers, timeout, exit_first, h2_payload_placement, variation_files) -> ScanResult`.
///
/// TLS certificate verification is left disabled (`verify=false`):
/// probe targets are overwhelmingly internal lab/staging pairs with
/// self-signed certificates, matching C1's documented bypass (spec
/// C1's own TLS bypass default). An external collaborator wanting
/// strict verification is free
/// to build on `hrs_transport` directly.
#[allow(clippy::too_many_arguments)]
pub async fn run_scan(
    url: &str,
    types: &[DetectorKind],
    headers: &[HeaderField],
    timeout: Duration,
    exit_first: bool,
    h2_payload_placement: H2PayloadPlacement,
    variation_files: VariationFiles,
) -> ScanResult {
    let target = match Target::parse(url) {
        Ok(t) => t,
        Err(e) => {
            let mut result = ScanResult {
                target: url.to_string(),
                findings: Vec::new(),
                errors: vec![e.as_line()],
                exit_code: 0,
            };
            // recomputed below: one error and zero findings means exit 2.
            result.finalize_exit_code();
            return result;
        }
    };

    let mut result = ScanResult::new(&target);
    let te_catalog = VariationCatalog::load(CatalogKind::TransferEncoding, variation_files.te_catalog.as_deref());
    let cl_catalog = VariationCatalog::load(CatalogKind::ContentLength, variation_files.cl_catalog.as_deref());
    let empty: Vec<HeaderVariation> = Vec::new();

    for &kind in ALL_DETECTORS.iter() {
        if !types.contains(&kind) {
            continue;
        }

        if matches!(kind, DetectorKind::ClZero | DetectorKind::H2Zero) {
            info!(detector = kind.as_str(), "running stub detector");
            let outcome = if kind == DetectorKind::ClZero {
                probes::run_cl_zero()
            } else {
                probes::run_h2_zero()
            };
            result.errors.extend(outcome.errors);
            continue;
        }

        let variations: &[HeaderVariation] = match kind {
            DetectorKind::ClTe | DetectorKind::TeCl | DetectorKind::H2Te => &te_catalog.variations,
            DetectorKind::H2Cl => &cl_catalog.variations,
            DetectorKind::ClZero | DetectorKind::H2Zero => &empty,
        };

        let params = ProbeParams {
            target: &target,
            variations,
            extra_user_headers: headers,
            timeout,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            exit_first,
            h2_payload_placement,
            verify_tls: false,
        };

        info!(detector = kind.as_str(), variation_count = variations.len(), "starting detector");

        let outcome = match kind {
            DetectorKind::ClTe => probes::run_cl_te(&params).await,
            DetectorKind::TeCl => probes::run_te_cl(&params).await,
            DetectorKind::H2Cl => probes::run_h2_cl(&params).await,
            DetectorKind::H2Te => probes::run_h2_te(&params).await,
            DetectorKind::ClZero | DetectorKind::H2Zero => unreachable!("handled above"),
        };

        for finding in &outcome.findings {
            println!("{}", finding.markers());
        }

        let stop = outcome.stop_scan;
        result.findings.extend(outcome.findings);
        result.errors.extend(outcome.errors);

        if stop {
            break;
        }
    }

    result.finalize_exit_code();
    result
}
