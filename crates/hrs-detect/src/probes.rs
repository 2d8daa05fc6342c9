//! The four timing-differential probes plus the two stub
//! detectors for the under-specified zero-length primitives.

use std::time::Duration;

use hrs_core::{
    Classification, DetectError, DetectorKind, Finding, H2PayloadPlacement, HeaderField, HeaderVariation,
    Request1, Request2, Target,
};
use hrs_transport::{Http1Client, Http2Client};
use tracing::debug;

use crate::kernel;

pub struct ProbeParams<'a> {
    pub target: &'a Target,
    pub variations: &'a [HeaderVariation],
    pub extra_user_headers: &'a [HeaderField],
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub exit_first: bool,
    pub h2_payload_placement: H2PayloadPlacement,
    pub verify_tls: bool,
}

#[derive(Debug, Default)]
pub struct ProbeOutcome {
    pub findings: Vec<Finding>,
    pub errors: Vec<String>,
    /// Set once a `vulnerable` finding is recorded and `exit_first` was
    /// requested — the caller stops the whole scan, not just this
    /// detector's variation loop.
    pub stop_scan: bool,
}

fn scheme_str(target: &Target) -> &'static str {
    if target.is_tls() { "https" } else { "http" }
}

fn push_extra_h1(mut req: Request1, extra: &[HeaderField]) -> Request1 {
    for h in extra {
        req = req.push_header(h.clone());
    }
    req
}

fn push_extra_h2(mut req: Request2, extra: &[HeaderField]) -> Request2 {
    for h in extra {
        req = req.push_header(h.clone());
    }
    req
}

async fn timed_h1_request(
    target: &Target,
    connect_timeout: Duration,
    read_timeout: Duration,
    verify_tls: bool,
    req: &Request1,
) -> Result<f64, DetectError> {
    let mut client = Http1Client::new();
    client.connect(target, connect_timeout, verify_tls).await?;
    let resp = client.send_request(req, read_timeout).await?;
    client.close();
    Ok(resp.elapsed.as_secs_f64())
}

async fn timed_h2_request(
    target: &Target,
    connect_timeout: Duration,
    read_timeout: Duration,
    verify_tls: bool,
    req: &Request2,
) -> Result<f64, DetectError> {
    let mut client = Http2Client::new();
    client.connect(target, connect_timeout, verify_tls).await?;
    if client.negotiated_alpn() != Some("h2") {
        client.close();
        return Err(DetectError::Protocol(
            "server did not negotiate h2 over ALPN".to_string(),
        ));
    }
    let resp = client.send_request(req, read_timeout).await?;
    client.close();
    Ok(resp.elapsed.as_secs_f64())
}

/// Record a classified variation into `outcome`, skipping `Safe`
/// results (a `Finding` is "positive or noteworthy" per its doc
/// comment), and raising `stop_scan` on the first vulnerable result
/// when `exit_first` was requested.
fn record(
    outcome: &mut ProbeOutcome,
    params: &ProbeParams<'_>,
    detector: DetectorKind,
    variation: &HeaderVariation,
    baseline_elapsed: f64,
    probe_elapsed: f64,
    timeout_secs: f64,
) {
    let classification = kernel::classify(baseline_elapsed, probe_elapsed, timeout_secs);
    debug!(
        detector = detector.as_str(),
        ?classification,
        baseline_elapsed,
        probe_elapsed,
        "classified variation"
    );
    if classification == Classification::Safe {
        return;
    }
    let vulnerable = classification == Classification::Vulnerable;
    outcome.findings.push(Finding {
        url: params.target.display_url(),
        detector,
        classification,
        header_description: variation.description.clone(),
        header_name: variation.header_name.clone(),
        header_value: variation.header_value.clone(),
        baseline_elapsed,
        probe_elapsed,
        ratio: kernel::ratio(baseline_elapsed, probe_elapsed),
    });
    if vulnerable && params.exit_first {
        outcome.stop_scan = true;
    }
}

/// CL.TE: front-end trusts Content-Length, back-end trusts
/// Transfer-Encoding. The probe body starves a TE-reading back-end by
/// declaring one chunk and never sending its terminator.
pub async fn run_cl_te(params: &ProbeParams<'_>) -> ProbeOutcome {
    let mut outcome = ProbeOutcome::default();
    let timeout_secs = params.timeout.as_secs_f64();

    for variation in params.variations {
        let baseline_body = b"0\r\n\r\nX".to_vec();
        let baseline_req = push_extra_h1(
            Request1::new(*b"POST", params.target.path.clone().into_bytes())
                .header(b"Host".to_vec(), params.target.authority().into_bytes())
                .header(b"Content-Length".to_vec(), baseline_body.len().to_string().into_bytes())
                .body(baseline_body),
            params.extra_user_headers,
        );

        let baseline = match timed_h1_request(
            params.target,
            params.connect_timeout,
            params.timeout,
            params.verify_tls,
            &baseline_req,
        )
        .await
        {
            Ok(elapsed) => elapsed,
            Err(e) => {
                outcome.errors.push(e.as_line());
                continue;
            }
        };

        let probe_body = b"1\r\nA\r\nX".to_vec();
        let mut probe_req = Request1::new(*b"POST", params.target.path.clone().into_bytes())
            .header(b"Host".to_vec(), params.target.authority().into_bytes())
            .header(b"Content-Length".to_vec(), probe_body.len().to_string().into_bytes())
            .push_header(variation.header());
        for extra in variation.extra_header_fields() {
            probe_req = probe_req.push_header(extra);
        }
        probe_req = push_extra_h1(probe_req.body(probe_body), params.extra_user_headers);

        let probe = match timed_h1_request(
            params.target,
            params.connect_timeout,
            params.timeout,
            params.verify_tls,
            &probe_req,
        )
        .await
        {
            Ok(elapsed) => elapsed,
            Err(e) => {
                outcome.errors.push(e.as_line());
                continue;
            }
        };

        record(&mut outcome, params, DetectorKind::ClTe, variation, baseline, probe, timeout_secs);
        if outcome.stop_scan {
            break;
        }
    }
    outcome
}

/// TE.CL: front-end trusts Transfer-Encoding, back-end trusts
/// Content-Length. The probe declares a short `Content-Length` against
/// a longer chunked body, starving a CL-reading back-end.
pub async fn run_te_cl(params: &ProbeParams<'_>) -> ProbeOutcome {
    let mut outcome = ProbeOutcome::default();
    let timeout_secs = params.timeout.as_secs_f64();

    for variation in params.variations {
        let baseline_body = b"ping".to_vec();
        let baseline_req = push_extra_h1(
            Request1::new(*b"POST", params.target.path.clone().into_bytes())
                .header(b"Host".to_vec(), params.target.authority().into_bytes())
                .header(b"Content-Length".to_vec(), baseline_body.len().to_string().into_bytes())
                .body(baseline_body),
            params.extra_user_headers,
        );

        let baseline = match timed_h1_request(
            params.target,
            params.connect_timeout,
            params.timeout,
            params.verify_tls,
            &baseline_req,
        )
        .await
        {
            Ok(elapsed) => elapsed,
            Err(e) => {
                outcome.errors.push(e.as_line());
                continue;
            }
        };

        let probe_body = b"8\r\nSMUGGLED\r\n0\r\n\r\n".to_vec();
        let mut probe_req = Request1::new(*b"POST", params.target.path.clone().into_bytes())
            .header(b"Host".to_vec(), params.target.authority().into_bytes())
            .push_header(variation.header())
            .header(b"Content-Length".to_vec(), b"4".to_vec());
        for extra in variation.extra_header_fields() {
            probe_req = probe_req.push_header(extra);
        }
        probe_req = push_extra_h1(probe_req.body(probe_body), params.extra_user_headers);

        let probe = match timed_h1_request(
            params.target,
            params.connect_timeout,
            params.timeout,
            params.verify_tls,
            &probe_req,
        )
        .await
        {
            Ok(elapsed) => elapsed,
            Err(e) => {
                outcome.errors.push(e.as_line());
                continue;
            }
        };

        record(&mut outcome, params, DetectorKind::TeCl, variation, baseline, probe, timeout_secs);
        if outcome.stop_scan {
            break;
        }
    }
    outcome
}

/// Place the smuggled directive per `placement`, returning the
/// (possibly rewritten) `:path` value and any extra headers to attach
/// ("placement semantics").
fn apply_h2_placement(
    placement: H2PayloadPlacement,
    variation: &HeaderVariation,
    path: &str,
) -> (String, Vec<HeaderField>) {
    match placement {
        H2PayloadPlacement::NormalHeader => (path.to_string(), vec![variation.header()]),
        H2PayloadPlacement::CustomHeaderValue => {
            let value = format!("{}: {}", variation.header_name, variation.header_value);
            (
                path.to_string(),
                vec![HeaderField::new(b"x-smuggled".to_vec(), value.into_bytes())],
            )
        }
        H2PayloadPlacement::CustomHeaderName => {
            let name = format!("x-evil\r\n{}: {}\r\n", variation.header_name, variation.header_value);
            (path.to_string(), vec![HeaderField::new(name.into_bytes(), b"1".to_vec())])
        }
        H2PayloadPlacement::RequestLine => {
            let injected_path = format!(
                "{path} HTTP/1.1\r\n{}: {}\r\n\r\nGET / HTTP/1.1",
                variation.header_name, variation.header_value
            );
            (injected_path, Vec::new())
        }
    }
}

/// H2.CL: a front-end that translates H2 to H1 while preserving a
/// smuggled `content-length` leaves the back-end waiting for bytes
/// that never arrive.
pub async fn run_h2_cl(params: &ProbeParams<'_>) -> ProbeOutcome {
    let mut outcome = ProbeOutcome::default();
    let timeout_secs = params.timeout.as_secs_f64();

    for variation in params.variations {
        let baseline_req = push_extra_h2(
            Request2::new()
                .pseudo(":method", b"POST".to_vec())
                .pseudo(":path", params.target.path.clone().into_bytes())
                .pseudo(":scheme", scheme_str(params.target).as_bytes().to_vec())
                .pseudo(":authority", params.target.authority().into_bytes())
                .header(b"content-length".to_vec(), b"3".to_vec())
                .data(b"abc".to_vec())
                .end_stream(true),
            params.extra_user_headers,
        );

        let baseline = match timed_h2_request(
            params.target,
            params.connect_timeout,
            params.timeout,
            params.verify_tls,
            &baseline_req,
        )
        .await
        {
            Ok(elapsed) => elapsed,
            Err(e) => {
                outcome.errors.push(e.as_line());
                continue;
            }
        };

        let (path, extra_headers) = apply_h2_placement(params.h2_payload_placement, variation, &params.target.path);
        let mut probe_req = Request2::new()
            .pseudo(":method", b"POST".to_vec())
            .pseudo(":path", path.into_bytes())
            .pseudo(":scheme", scheme_str(params.target).as_bytes().to_vec())
            .pseudo(":authority", params.target.authority().into_bytes());
        for h in extra_headers {
            probe_req = probe_req.push_header(h);
        }
        probe_req = push_extra_h2(probe_req, params.extra_user_headers)
            .data(b"abc".to_vec())
            .end_stream(true);

        let probe = match timed_h2_request(
            params.target,
            params.connect_timeout,
            params.timeout,
            params.verify_tls,
            &probe_req,
        )
        .await
        {
            Ok(elapsed) => elapsed,
            Err(e) => {
                outcome.errors.push(e.as_line());
                continue;
            }
        };

        record(&mut outcome, params, DetectorKind::H2Cl, variation, baseline, probe, timeout_secs);
        if outcome.stop_scan {
            break;
        }
    }
    outcome
}

/// H2.TE: a smuggled `transfer-encoding` header on a request that
/// never sends its chunked terminator stalls a back-end honoring it.
pub async fn run_h2_te(params: &ProbeParams<'_>) -> ProbeOutcome {
    let mut outcome = ProbeOutcome::default();
    let timeout_secs = params.timeout.as_secs_f64();

    for variation in params.variations {
        let baseline_req = push_extra_h2(
            Request2::new()
                .pseudo(":method", b"POST".to_vec())
                .pseudo(":path", params.target.path.clone().into_bytes())
                .pseudo(":scheme", scheme_str(params.target).as_bytes().to_vec())
                .pseudo(":authority", params.target.authority().into_bytes())
                .data(b"ok".to_vec())
                .end_stream(true),
            params.extra_user_headers,
        );

        let baseline = match timed_h2_request(
            params.target,
            params.connect_timeout,
            params.timeout,
            params.verify_tls,
            &baseline_req,
        )
        .await
        {
            Ok(elapsed) => elapsed,
            Err(e) => {
                outcome.errors.push(e.as_line());
                continue;
            }
        };

        let (path, extra_headers) = apply_h2_placement(params.h2_payload_placement, variation, &params.target.path);
        let mut probe_req = Request2::new()
            .pseudo(":method", b"POST".to_vec())
            .pseudo(":path", path.into_bytes())
            .pseudo(":scheme", scheme_str(params.target).as_bytes().to_vec())
            .pseudo(":authority", params.target.authority().into_bytes());
        for h in extra_headers {
            probe_req = probe_req.push_header(h);
        }
        // end_stream=false deliberately leaves the stream half-open —
        // the chunked terminator is never sent.
        probe_req = push_extra_h2(probe_req, params.extra_user_headers)
            .data(b"0\r\n".to_vec())
            .end_stream(false);

        let probe = match timed_h2_request(
            params.target,
            params.connect_timeout,
            params.timeout,
            params.verify_tls,
            &probe_req,
        )
        .await
        {
            Ok(elapsed) => elapsed,
            Err(e) => {
                outcome.errors.push(e.as_line());
                continue;
            }
        };

        record(&mut outcome, params, DetectorKind::H2Te, variation, baseline, probe, timeout_secs);
        if outcome.stop_scan {
            break;
        }
    }
    outcome
}

/// Stub for the under-documented `CL.0` primitive. Makes no network
/// contact.
pub fn run_cl_zero() -> ProbeOutcome {
    ProbeOutcome {
        errors: vec![DetectError::Input("CL.0 detector not implemented".to_string()).as_line()],
        ..Default::default()
    }
}

/// Stub for the under-documented `H2.0` primitive. Makes no network
/// contact.
pub fn run_h2_zero() -> ProbeOutcome {
    ProbeOutcome {
        errors: vec![DetectError::Input("H2.0 detector not implemented".to_string()).as_line()],
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variation() -> HeaderVariation {
        HeaderVariation {
            description: "canonical chunked".to_string(),
            header_name: "content-length".to_string(),
            header_value: "4".to_string(),
            extra_headers: Vec::new(),
        }
    }

    #[test]
    fn normal_header_placement_adds_the_variation_as_a_header() {
        let (path, headers) = apply_h2_placement(H2PayloadPlacement::NormalHeader, &variation(), "/x");
        assert_eq!(path, "/x");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].name, b"content-length");
    }

    #[test]
    fn custom_header_value_flattens_name_and_value_into_one_header() {
        let (_, headers) = apply_h2_placement(H2PayloadPlacement::CustomHeaderValue, &variation(), "/x");
        assert_eq!(headers[0].name, b"x-smuggled");
        assert_eq!(headers[0].value, b"content-length: 4");
    }

    #[test]
    fn custom_header_name_embeds_crlf_injected_directive_in_the_name() {
        let (_, headers) = apply_h2_placement(H2PayloadPlacement::CustomHeaderName, &variation(), "/x");
        let hay = String::from_utf8_lossy(&headers[0].name).into_owned();
        assert!(hay.contains("\r\ncontent-length: 4\r\n"));
    }

    #[test]
    fn request_line_placement_rewrites_path_and_adds_no_headers() {
        let (path, headers) = apply_h2_placement(H2PayloadPlacement::RequestLine, &variation(), "/x");
        assert!(headers.is_empty());
        assert!(path.starts_with("/x HTTP/1.1\r\n"));
        assert!(path.contains("content-length: 4"));
    }

    fn params<'a>(target: &'a Target, variations: &'a [HeaderVariation], exit_first: bool) -> ProbeParams<'a> {
        ProbeParams {
            target,
            variations,
            extra_user_headers: &[],
            timeout: Duration::from_millis(300),
            connect_timeout: Duration::from_millis(300),
            exit_first,
            h2_payload_placement: H2PayloadPlacement::NormalHeader,
            verify_tls: false,
        }
    }

    #[test]
    fn record_skips_safe_classifications() {
        let target = Target::parse("http://127.0.0.1:1/").unwrap();
        let variations = vec![variation()];
        let p = params(&target, &variations, false);
        let mut outcome = ProbeOutcome::default();
        record(&mut outcome, &p, DetectorKind::ClTe, &variations[0], 0.05, 0.05, 0.3);
        assert!(outcome.findings.is_empty());
        assert!(!outcome.stop_scan);
    }

    #[test]
    fn record_sets_stop_scan_only_when_exit_first_and_vulnerable() {
        let target = Target::parse("http://127.0.0.1:1/").unwrap();
        let variations = vec![variation()];
        let p = params(&target, &variations, true);
        let mut outcome = ProbeOutcome::default();
        record(&mut outcome, &p, DetectorKind::ClTe, &variations[0], 0.05, 0.29, 0.3);
        assert_eq!(outcome.findings.len(), 1);
        assert_eq!(outcome.findings[0].classification, Classification::Vulnerable);
        assert!(outcome.stop_scan);
    }

    #[test]
    fn record_does_not_stop_scan_for_uncertain() {
        let target = Target::parse("http://127.0.0.1:1/").unwrap();
        let variations = vec![variation()];
        let p = params(&target, &variations, true);
        let mut outcome = ProbeOutcome::default();
        record(&mut outcome, &p, DetectorKind::TeCl, &variations[0], 0.1, 0.2, 0.3);
        assert_eq!(outcome.findings[0].classification, Classification::Uncertain);
        assert!(!outcome.stop_scan);
    }

    #[test]
    fn stubs_make_no_network_contact_and_report_input_error() {
        let cl0 = run_cl_zero();
        assert!(cl0.findings.is_empty());
        assert_eq!(cl0.errors.len(), 1);
        assert!(cl0.errors[0].contains("InputError"));

        let h20 = run_h2_zero();
        assert!(h20.errors[0].contains("H2.0"));
    }
}
