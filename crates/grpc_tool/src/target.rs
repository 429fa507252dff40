use std::fmt;

use tonic::codegen::http::Uri;
use tonic::codegen::http::uri::Authority;
use url::Url;

use crate::error::AddressParseError;

const PLAINTEXT_PREFIX: &str = "grpc://";
const SECURE_PREFIX: &str = "grpcs://";

/// The scheme of a dial target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plaintext HTTP/2.
    #[default]
    Grpc,
    /// HTTP/2 over TLS.
    Grpcs,
}

impl Scheme {
    /// The scheme prefix, without `://`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Grpc => "grpc",
            Scheme::Grpcs => "grpcs",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed dial target: `[grpc://|grpcs://]host[:port]`
///
/// Example: `grpcs://svc.internal:443`
/// - `scheme`: `grpcs`
/// - `authority`: `svc.internal:443`
/// - `secure`: `true`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    address: String,
    scheme: Scheme,
    authority: Authority,
    secure: bool,
}

impl Target {
    /// Parse a dial target.
    ///
    /// A `grpc://` or `grpcs://` prefix is parsed as a URL and only its host and port are
    /// kept. Anything without a `scheme://` prefix is taken verbatim as a plaintext
    /// `host[:port]`. Other schemes are rejected.
    pub fn parse(address: &str) -> Result<Self, AddressParseError> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(AddressParseError::new(address, "target must not be empty"));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(AddressParseError::new(
                address,
                "target must not contain whitespace",
            ));
        }

        let scheme = if trimmed.starts_with(SECURE_PREFIX) {
            Some(Scheme::Grpcs)
        } else if trimmed.starts_with(PLAINTEXT_PREFIX) {
            Some(Scheme::Grpc)
        } else {
            None
        };

        let (scheme, authority) = match scheme {
            Some(scheme) => {
                let url = Url::parse(trimmed)
                    .map_err(|e| AddressParseError::new(address, e.to_string()))?;
                let host = url
                    .host_str()
                    .filter(|host| !host.is_empty())
                    .ok_or_else(|| AddressParseError::new(address, "missing host"))?;
                let authority = match url.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_owned(),
                };
                (scheme, authority)
            }
            None => {
                if let Some((other, _)) = trimmed.split_once("://") {
                    return Err(AddressParseError::new(
                        address,
                        format!("unsupported scheme '{other}', expected grpc or grpcs"),
                    ));
                }
                (Scheme::Grpc, trimmed.to_owned())
            }
        };

        let authority = authority
            .parse::<Authority>()
            .map_err(|e| AddressParseError::new(address, format!("invalid host: {e}")))?;

        Ok(Target {
            address: address.to_owned(),
            scheme,
            authority,
            secure: scheme == Scheme::Grpcs,
        })
    }

    /// Override the secure-transport flag inferred from the scheme.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// The address exactly as supplied.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The scheme the address was written with.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// `host[:port]` as handed to the transport.
    pub fn authority(&self) -> &str {
        self.authority.as_str()
    }

    /// Host without port. IPv6 literals keep their brackets.
    pub fn host(&self) -> &str {
        self.authority.host()
    }

    /// The explicit port, if any.
    pub fn port(&self) -> Option<u16> {
        self.authority.port_u16()
    }

    /// True if the dial uses TLS.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// The logical origin used for `:scheme` and `:authority` on outgoing requests.
    pub fn origin(&self) -> Result<Uri, tonic::codegen::http::Error> {
        Uri::builder()
            .scheme(if self.secure { "https" } else { "http" })
            .authority(self.authority.clone())
            .path_and_query("/")
            .build()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plaintext_scheme() {
        let target = Target::parse("grpc://127.0.0.1:8080").unwrap();
        assert_eq!(target.scheme(), Scheme::Grpc);
        assert_eq!(target.authority(), "127.0.0.1:8080");
        assert!(!target.is_secure());
    }

    #[test]
    fn test_secure_scheme() {
        let target = Target::parse("grpcs://svc.internal:443").unwrap();
        assert_eq!(target.scheme(), Scheme::Grpcs);
        assert_eq!(target.authority(), "svc.internal:443");
        assert_eq!(target.host(), "svc.internal");
        assert_eq!(target.port(), Some(443));
        assert!(target.is_secure());
    }

    #[test]
    fn test_secure_scheme_without_port() {
        let target = Target::parse("grpcs://127.0.0.1").unwrap();
        assert_eq!(target.authority(), "127.0.0.1");
        assert_eq!(target.port(), None);
        assert!(target.is_secure());
    }

    #[test]
    fn test_no_scheme_defaults_to_plaintext() {
        for address in ["svc.internal:443", "127.0.0.1:8080", "localhost", "[::1]:50051"] {
            let target = Target::parse(address).unwrap();
            assert_eq!(target.scheme(), Scheme::Grpc, "{address}");
            assert_eq!(target.authority(), address);
            assert!(!target.is_secure());
        }
    }

    #[test]
    fn test_path_is_dropped() {
        let target = Target::parse("grpc://svc.internal:50051/ignored").unwrap();
        assert_eq!(target.authority(), "svc.internal:50051");
    }

    #[test]
    fn test_ipv6_with_scheme() {
        let target = Target::parse("grpc://[::1]:50051").unwrap();
        assert_eq!(target.authority(), "[::1]:50051");
        assert_eq!(target.port(), Some(50051));
    }

    #[test]
    fn test_with_secure_override() {
        let target = Target::parse("svc.internal:443").unwrap().with_secure(true);
        assert!(target.is_secure());
        assert_eq!(target.scheme(), Scheme::Grpc);
        assert_eq!(target.origin().unwrap().scheme_str(), Some("https"));
    }

    #[test]
    fn test_origin_plaintext() {
        let target = Target::parse("grpc://svc.internal:9000").unwrap();
        let origin = target.origin().unwrap();
        assert_eq!(origin.scheme_str(), Some("http"));
        assert_eq!(origin.authority().unwrap().as_str(), "svc.internal:9000");
    }

    #[test]
    fn test_display_keeps_original() {
        let target = Target::parse("grpcs://svc.internal:443").unwrap();
        assert_eq!(target.to_string(), "grpcs://svc.internal:443");
    }

    #[test]
    fn test_rejects_empty() {
        assert!(Target::parse("").is_err());
        assert!(Target::parse("   ").is_err());
    }

    #[test]
    fn test_rejects_missing_host() {
        let err = Target::parse("grpc://").unwrap_err();
        assert_eq!(err.address, "grpc://");
    }

    #[test]
    fn test_rejects_whitespace() {
        let err = Target::parse("grpcs://svc internal:443").unwrap_err();
        assert!(err.to_string().contains("grpcs://svc internal:443"));
    }

    #[test]
    fn test_rejects_bad_port() {
        assert!(Target::parse("grpc://svc.internal:notaport").is_err());
        assert!(Target::parse("grpc://svc.internal:99999").is_err());
    }

    #[test]
    fn test_rejects_unknown_scheme() {
        let err = Target::parse("http://svc.internal:80").unwrap_err();
        assert!(err.reason.contains("unsupported scheme"));
    }

    #[test]
    fn test_rejects_path_without_scheme() {
        assert!(Target::parse("svc.internal:80/path").is_err());
    }
}
