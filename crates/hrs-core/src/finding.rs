use serde::{Deserialize, Serialize};

use crate::target::Target;

/// Which of the four (plus two stub) detectors produced a [`Finding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectorKind {
    #[serde(rename = "CL.TE")]
    ClTe,
    #[serde(rename = "TE.CL")]
    TeCl,
    #[serde(rename = "H2.CL")]
    H2Cl,
    #[serde(rename = "H2.TE")]
    H2Te,
    #[serde(rename = "CL.0")]
    ClZero,
    #[serde(rename = "H2.0")]
    H2Zero,
}

impl DetectorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DetectorKind::ClTe => "CL.TE",
            DetectorKind::TeCl => "TE.CL",
            DetectorKind::H2Cl => "H2.CL",
            DetectorKind::H2Te => "H2.TE",
            DetectorKind::ClZero => "CL.0",
            DetectorKind::H2Zero => "H2.0",
        }
    }

    /// Detectors offered to callers by default, in fixed iteration order;
    /// the two zero-length stubs are excluded.
    pub fn default_set() -> [DetectorKind; 4] {
        [
            DetectorKind::ClTe,
            DetectorKind::TeCl,
            DetectorKind::H2Cl,
            DetectorKind::H2Te,
        ]
    }
}

/// Outcome of the classification rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Safe,
    Uncertain,
    Vulnerable,
}

impl Classification {
    /// Ordering: Safe < Uncertain < Vulnerable.
    pub fn rank(self) -> u8 {
        match self {
            Classification::Safe => 0,
            Classification::Uncertain => 1,
            Classification::Vulnerable => 2,
        }
    }
}

/// Placement of the smuggled directive for H2.CL/H2.TE probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum H2PayloadPlacement {
    NormalHeader,
    CustomHeaderValue,
    CustomHeaderName,
    RequestLine,
}

/// One positive-or-noteworthy probe result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub url: String,
    #[serde(rename = "type")]
    pub detector: DetectorKind,
    pub classification: Classification,
    pub header_description: String,
    pub header_name: String,
    pub header_value: String,
    pub baseline_elapsed: f64,
    pub probe_elapsed: f64,
    pub ratio: f64,
}

impl Finding {
    /// The five `Name: Value` stdout markers this finding is reported as.
    pub fn markers(&self) -> String {
        format!(
            "Vulnerability_Type: {}\nVulnerable_URL: {}\nHeader_Description: {}\nActual_Header_Name: {}\nActual_Header_Value: {}",
            self.detector.as_str(),
            self.url,
            self.header_description,
            self.header_name,
            self.header_value,
        )
    }
}

/// Result of a complete scan across the requested detectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub target: String,
    pub findings: Vec<Finding>,
    pub errors: Vec<String>,
    pub exit_code: u8,
}

impl ScanResult {
    pub fn new(target: &Target) -> Self {
        ScanResult {
            target: target.display_url(),
            findings: Vec::new(),
            errors: Vec::new(),
            exit_code: 0,
        }
    }

    /// Exit code rule: 0 = clean, 1 = any vulnerable
    /// finding, 2 = errors with zero vulnerable findings.
    pub fn finalize_exit_code(&mut self) {
        let has_vulnerable = self
            .findings
            .iter()
            .any(|f| f.classification == Classification::Vulnerable);
        self.exit_code = if has_vulnerable {
            1
        } else if !self.errors.is_empty() {
            2
        } else {
            0
        };
    }
}
