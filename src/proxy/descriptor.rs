//! `p://[u[:w]@]h:port`, grounded on the teacher's use of `url` for
//! `RoyalRoad`/`ScribbleHub` source URLs (`source/royalroad.rs`), extended
//! here with `percent-encoding` for the credential round-trip §4.A requires.

use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use url::Url;

use crate::error::ProxyUrlError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
    Socks5,
}

impl Protocol {
    const fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
            Self::Socks5 => 1080,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Socks5 => "socks5",
        }
    }

    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            "socks5" => Some(Self::Socks5),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyDescriptor {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// True iff `input` is a well-formed proxy URL per §4.A.
pub fn validate(input: &str) -> bool {
    parse(input).is_ok()
}

/// Parses a proxy URL, URL-decoding any credentials.
pub fn parse(input: &str) -> Result<ProxyDescriptor, ProxyUrlError> {
    let url = Url::parse(input).map_err(|_| ProxyUrlError::InvalidFormat)?;
    let protocol = Protocol::from_scheme(url.scheme()).ok_or(ProxyUrlError::UnsupportedProtocol)?;

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or(ProxyUrlError::MissingHost)?
        .to_string();

    let port = match url.port() {
        Some(0) => return Err(ProxyUrlError::InvalidPort),
        Some(p) => p,
        None => protocol.default_port(),
    };

    let username = (!url.username().is_empty())
        .then(|| percent_decode_str(url.username()).decode_utf8_lossy().into_owned());
    let password = url
        .password()
        .map(|p| percent_decode_str(p).decode_utf8_lossy().into_owned());

    Ok(ProxyDescriptor {
        protocol,
        host,
        port,
        username,
        password,
    })
}

/// `<proto>://[URLENC(user)[:URLENC(pass)]@]<host>:<port>`.
pub fn reconstruct(descriptor: &ProxyDescriptor) -> String {
    let mut out = format!("{}://", descriptor.protocol.as_str());
    if let Some(user) = &descriptor.username {
        out.push_str(&utf8_percent_encode(user, NON_ALPHANUMERIC).to_string());
        if let Some(pass) = &descriptor.password {
            out.push(':');
            out.push_str(&utf8_percent_encode(pass, NON_ALPHANUMERIC).to_string());
        }
        out.push('@');
    }
    out.push_str(&descriptor.host);
    out.push(':');
    out.push_str(&descriptor.port.to_string());
    out
}

/// Removes credentials from a proxy URL for logging. On parse failure,
/// falls back to blanking any `//…@` substring rather than refusing to
/// print anything.
pub fn sanitize_for_display(input: &str) -> String {
    match parse(input) {
        Ok(descriptor) => format!(
            "{}://{}:{}",
            descriptor.protocol.as_str(),
            descriptor.host,
            descriptor.port
        ),
        Err(_) => blank_credentials(input),
    }
}

fn blank_credentials(input: &str) -> String {
    let Some(at_pos) = input.find('@') else {
        return input.to_string();
    };
    let Some(slashes) = input.find("//") else {
        return input.to_string();
    };
    if slashes >= at_pos {
        return input.to_string();
    }
    let mut out = String::with_capacity(input.len());
    out.push_str(&input[..slashes + 2]);
    out.push_str("***");
    out.push_str(&input[at_pos..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_http_proxy() {
        let d = parse("http://proxy.example:8080").unwrap();
        assert_eq!(d.protocol, Protocol::Http);
        assert_eq!(d.host, "proxy.example");
        assert_eq!(d.port, 8080);
        assert!(d.username.is_none());
    }

    #[test]
    fn applies_default_ports() {
        assert_eq!(parse("http://h").unwrap().port, 80);
        assert_eq!(parse("https://h").unwrap().port, 443);
        assert_eq!(parse("socks5://h").unwrap().port, 1080);
    }

    #[test]
    fn decodes_credentials() {
        let d = parse("socks5://us%40er:p%40ss@h:1080").unwrap();
        assert_eq!(d.username.as_deref(), Some("us@er"));
        assert_eq!(d.password.as_deref(), Some("p@ss"));
    }

    #[test]
    fn rejects_unsupported_protocol() {
        assert_eq!(parse("ftp://h:21"), Err(ProxyUrlError::UnsupportedProtocol));
    }

    #[test]
    fn rejects_malformed_url() {
        assert_eq!(parse("not a url"), Err(ProxyUrlError::InvalidFormat));
    }

    #[test]
    fn rejects_zero_port() {
        assert_eq!(parse("http://h:0"), Err(ProxyUrlError::InvalidPort));
    }

    #[test]
    fn validate_matches_parse() {
        assert!(validate("http://h:80"));
        assert!(!validate("not a url"));
    }

    #[test]
    fn credential_round_trip() {
        let d = parse("socks5://us%40er:p%40ss@h:1080").unwrap();
        let reconstructed = reconstruct(&d);
        assert_eq!(parse(&reconstructed).unwrap(), d);
    }

    #[test]
    fn sanitize_drops_credentials_but_keeps_host_port() {
        let sanitized = sanitize_for_display("http://user:pass@h:8080");
        assert!(!sanitized.contains("user"));
        assert!(!sanitized.contains("pass"));
        assert!(sanitized.contains('h'));
        assert!(sanitized.contains("8080"));
    }

    #[test]
    fn sanitize_falls_back_on_unparseable_input() {
        let sanitized = sanitize_for_display("totally not://a/url@user:pass@host");
        assert!(!sanitized.contains("user:pass"));
    }
}
