use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DetectError;
use crate::types::HeaderField;

/// A single named header-field pair as read from a catalog file on
/// disk. Strings are UTF-8 on disk but treated as bytes on the wire
/// — no Unicode normalization happens anywhere past this
/// struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderFieldSpec {
    pub name: String,
    pub value: String,
}

impl From<&HeaderFieldSpec> for HeaderField {
    fn from(spec: &HeaderFieldSpec) -> Self {
        HeaderField::new(spec.name.clone().into_bytes(), spec.value.clone().into_bytes())
    }
}

/// One entry in a CL or TE catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderVariation {
    pub description: String,
    pub header_name: String,
    pub header_value: String,
    #[serde(default)]
    pub extra_headers: Vec<HeaderFieldSpec>,
}

impl HeaderVariation {
    pub fn header(&self) -> HeaderField {
        HeaderField::new(
            self.header_name.clone().into_bytes(),
            self.header_value.clone().into_bytes(),
        )
    }

    pub fn extra_header_fields(&self) -> Vec<HeaderField> {
        self.extra_headers.iter().map(HeaderField::from).collect()
    }
}

/// Which catalog a [`HeaderVariation`] list belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    TransferEncoding,
    ContentLength,
}

/// Order-preserving list of variations, loaded once and treated as
/// immutable shared data for the lifetime of a scan.
#[derive(Debug, Clone)]
pub struct VariationCatalog {
    pub kind: CatalogKind,
    pub variations: Vec<HeaderVariation>,
}

impl VariationCatalog {
    /// Load from a JSON file; on any I/O or parse failure, fall back to
    /// the built-in single-entry default ("built-in
    /// defaults if unreadable").
    pub fn load(kind: CatalogKind, path: Option<&Path>) -> Self {
        if let Some(path) = path {
            if let Ok(text) = std::fs::read_to_string(path) {
                if let Ok(variations) = serde_json::from_str::<Vec<HeaderVariation>>(&text) {
                    return VariationCatalog { kind, variations };
                }
            }
        }
        VariationCatalog {
            kind,
            variations: Self::defaults(kind),
        }
    }

    /// Parse variations directly from a JSON string (used by the
    /// loader above and exercised independently in tests).
    pub fn parse(kind: CatalogKind, json: &str) -> Result<Self, DetectError> {
        let variations: Vec<HeaderVariation> = serde_json::from_str(json)
            .map_err(|e| DetectError::Input(format!("invalid variation catalog: {e}")))?;
        Ok(VariationCatalog { kind, variations })
    }

    fn defaults(kind: CatalogKind) -> Vec<HeaderVariation> {
        match kind {
            CatalogKind::TransferEncoding => vec![HeaderVariation {
                description: "canonical chunked".to_string(),
                header_name: "Transfer-Encoding".to_string(),
                header_value: "chunked".to_string(),
                extra_headers: Vec::new(),
            }],
            CatalogKind::ContentLength => vec![HeaderVariation {
                description: "canonical content-length".to_string(),
                header_name: "Content-Length".to_string(),
                header_value: "4".to_string(),
                extra_headers: Vec::new(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cat = VariationCatalog::load(CatalogKind::TransferEncoding, Some(Path::new("/nonexistent/x.json")));
        assert_eq!(cat.variations.len(), 1);
        assert_eq!(cat.variations[0].header_name, "Transfer-Encoding");
    }

    #[test]
    fn order_is_preserved_from_file() {
        let json = r#"[
            {"description": "a", "header_name": "Transfer-Encoding", "header_value": "chunked"},
            {"description": "b", "header_name": "Transfer-encoding", "header_value": " chunked"},
            {"description": "c", "header_name": "X-Transfer-Encoding", "header_value": "chunked", "extra_headers": [{"name": "Transfer-Encoding", "value": "chunked"}]}
        ]"#;
        let cat = VariationCatalog::parse(CatalogKind::TransferEncoding, json).unwrap();
        assert_eq!(cat.variations.len(), 3);
        assert_eq!(cat.variations[0].description, "a");
        assert_eq!(cat.variations[2].extra_header_fields().len(), 1);
    }

    #[test]
    fn invalid_json_is_rejected_via_parse() {
        assert!(VariationCatalog::parse(CatalogKind::ContentLength, "not json").is_err());
    }

    #[test]
    fn bytes_are_taken_verbatim_including_non_ascii() {
        let json = r#"[{"description": "unicode trick", "header_name": "Transfer-Encoding", "header_value": "chunkéd"}]"#;
        let cat = VariationCatalog::parse(CatalogKind::TransferEncoding, json).unwrap();
        let field = cat.variations[0].header();
        assert_eq!(field.value, "chunk\u{e9}d".as_bytes());
    }
}
