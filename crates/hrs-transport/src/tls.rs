//! TLS provider: connector construction and ALPN negotiation.
//!
//! Builds `rustls` client configs with explicit ALPN and an optional
//! verification bypass, the way a security probe needs to talk to
//! targets with self-signed or otherwise untrusted certificates.

use std::sync::Arc;

use hrs_core::DetectError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_rustls::TlsConnector;

/// Accepts any certificate chain and any signature — used when the
/// caller asks for `verify = false` ("hostname check and
/// chain verification are both disabled").
#[derive(Debug)]
struct NoVerification;

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}

/// Build a `TlsConnector` that offers `alpn` protocols and, when
/// `verify` is false, accepts any certificate the target presents.
/// Minimum version is TLS 1.2.
pub fn connector_for(alpn: &[&str], verify: bool) -> Result<TlsConnector, DetectError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let builder = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| DetectError::Tls(format!("unsupported protocol versions: {e}")))?;

    let mut config = if verify {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots).with_no_client_auth()
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification))
            .with_no_client_auth()
    };

    config.alpn_protocols = alpn.iter().map(|p| p.as_bytes().to_vec()).collect();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Read back the protocol the peer actually selected via ALPN, if any
/// (`negotiated_alpn`).
pub fn negotiated_alpn<T>(stream: &tokio_rustls::client::TlsStream<T>) -> Option<String> {
    let (_, conn) = stream.get_ref();
    conn.alpn_protocol()
        .map(|p| String::from_utf8_lossy(p).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_builds_for_h1_and_h2_alpn() {
        assert!(connector_for(&["http/1.1"], false).is_ok());
        assert!(connector_for(&["h2"], true).is_ok());
    }

    #[test]
    fn connector_preserves_requested_alpn_order() {
        // Smoke-check that building a connector for multiple ALPN values
        // succeeds instead of panicking or silently dropping entries.
        assert!(connector_for(&["h2", "http/1.1"], false).is_ok());
    }
}
