use crate::error::DetectError;

/// Scheme of a [`Target`] URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// A scan target, derived from the user-supplied URL.
#[derive(Debug, Clone)]
pub struct Target {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Target {
    /// Parse a URL into a `Target`, defaulting the port by scheme.
    pub fn parse(raw: &str) -> Result<Self, DetectError> {
        let parsed =
            url::Url::parse(raw).map_err(|e| DetectError::Input(format!("bad url {raw}: {e}")))?;

        let scheme = match parsed.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(DetectError::Input(format!(
                    "unsupported scheme {other} (expected http or https)"
                )));
            }
        };

        let host = parsed
            .host_str()
            .ok_or_else(|| DetectError::Input(format!("url has no host: {raw}")))?
            .to_string();

        let port = parsed.port().unwrap_or_else(|| scheme.default_port());

        let mut path = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }
        if path.is_empty() {
            path = "/".to_string();
        }

        Ok(Target {
            scheme,
            host,
            port,
            path,
        })
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.scheme, Scheme::Https)
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn display_url(&self) -> String {
        let scheme = match self.scheme {
            Scheme::Http => "http",
            Scheme::Https => "https",
        };
        format!("{scheme}://{}{}", self.authority(), self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_port_by_scheme() {
        let t = Target::parse("https://example.com/foo").unwrap();
        assert_eq!(t.port, 443);
        assert_eq!(t.path, "/foo");
    }

    #[test]
    fn explicit_port_is_kept() {
        let t = Target::parse("http://example.com:8080/a?x=1").unwrap();
        assert_eq!(t.port, 8080);
        assert_eq!(t.path, "/a?x=1");
    }

    #[test]
    fn rejects_unsupported_scheme() {
        assert!(Target::parse("ftp://example.com/").is_err());
    }

    #[test]
    fn empty_path_becomes_slash() {
        let t = Target::parse("http://example.com").unwrap();
        assert_eq!(t.path, "/");
    }
}
