use thiserror::Error;

/// Closed set of failure kinds a probe can surface.
///
/// A `Timeout` is not fatal to a scan — the detector kernel catches it
/// and folds the elapsed duration into the classification instead of
/// propagating it. Every other variant is recorded in
/// `ScanResult::errors` and the detector moves on to the next variation.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("dns error: {0}")]
    Dns(String),
    #[error("connect error: {0}")]
    Connect(String),
    #[error("tls error: {0}")]
    Tls(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("timeout error: {0}")]
    Timeout(String),
    #[error("input error: {0}")]
    Input(String),
}

impl DetectError {
    /// Short kind discriminator, used for the `ERROR: <kind>: <detail>` lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Dns(_) => "DNSError",
            Self::Connect(_) => "ConnectError",
            Self::Tls(_) => "TlsError",
            Self::Protocol(_) => "ProtocolError",
            Self::Timeout(_) => "TimeoutError",
            Self::Input(_) => "InputError",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            Self::Dns(s)
            | Self::Connect(s)
            | Self::Tls(s)
            | Self::Protocol(s)
            | Self::Timeout(s)
            | Self::Input(s) => s.clone(),
        }
    }

    /// Render as the `ERROR: <kind>: <detail>` line.
    pub fn as_line(&self) -> String {
        format!("ERROR: {}: {}", self.kind(), self.detail())
    }
}
