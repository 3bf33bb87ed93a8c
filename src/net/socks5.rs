//! Hand-rolled SOCKS5 CONNECT + optional TLS wrap + raw HTTP/1.1 GET
//! (§4.C "Proxy transport semantics", §9 "SOCKS5 synthesized HTTP").
//!
//! `ureq` speaks HTTP/HTTPS proxies natively but has no SOCKS5 support, so
//! this module frames the tunnel itself: open the TCP connection to the
//! proxy, negotiate SOCKS5, optionally wrap the tunneled stream in TLS
//! (SNI = target hostname), then write a single `GET` request by hand and
//! split the raw response on `\r\n\r\n`.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use rustls_pki_types::ServerName;
use url::Url;

use crate::error::FetchError;
use crate::proxy::ProxyDescriptor;

use super::{install_default_crypto_provider, RawResponse};

pub fn fetch(
    proxy: &ProxyDescriptor,
    target: &Url,
    headers: &[(String, String)],
    timeout: Duration,
) -> Result<RawResponse, FetchError> {
    install_default_crypto_provider();

    let target_host = target
        .host_str()
        .ok_or_else(|| FetchError::InvalidUrl(target.to_string()))?
        .to_string();
    let is_https = target.scheme() == "https";
    let target_port = target.port().unwrap_or(if is_https { 443 } else { 80 });

    use std::net::ToSocketAddrs;
    let proxy_addr = format!("{}:{}", proxy.host, proxy.port);
    let addr = proxy_addr
        .to_socket_addrs()
        .map_err(|e| categorize(&io_err_message(&e), &proxy.host, proxy.port))?
        .next()
        .ok_or_else(|| FetchError::ProxyConnection {
            host: proxy.host.clone(),
            port: proxy.port,
        })?;

    let stream = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|e| categorize(&io_err_message(&e), &proxy.host, proxy.port))?;
    stream.set_read_timeout(Some(timeout)).ok();
    stream.set_write_timeout(Some(timeout)).ok();

    handshake(&stream, proxy, &target_host, target_port)
        .map_err(|e| categorize(&e, &proxy.host, proxy.port))?;

    let path = target_path_and_query(target);
    let request = build_get_request(&target_host, &path, headers);

    if is_https {
        let tls_stream = wrap_tls(stream, &target_host)?;
        send_and_parse(tls_stream, &request, &proxy.host, proxy.port)
    } else {
        send_and_parse(stream, &request, &proxy.host, proxy.port)
    }
}

fn handshake(
    mut stream: &TcpStream,
    proxy: &ProxyDescriptor,
    target_host: &str,
    target_port: u16,
) -> Result<(), String> {
    let wants_auth = proxy.username.is_some();
    let methods: &[u8] = if wants_auth { &[0x00, 0x02] } else { &[0x00] };
    let mut greeting = vec![0x05, methods.len() as u8];
    greeting.extend_from_slice(methods);
    stream.write_all(&greeting).map_err(|e| e.to_string())?;

    let mut method_reply = [0u8; 2];
    stream.read_exact(&mut method_reply).map_err(|e| e.to_string())?;
    if method_reply[0] != 0x05 {
        return Err("SOCKS5 handshake: unexpected protocol version".to_string());
    }
    match method_reply[1] {
        0x00 => {}
        0x02 => authenticate(stream, proxy)?,
        0xFF => return Err("407 no acceptable SOCKS5 authentication method".to_string()),
        _ => return Err("SOCKS5 handshake: unsupported method selected".to_string()),
    }

    let mut connect = vec![0x05, 0x01, 0x00, 0x03];
    connect.push(target_host.len() as u8);
    connect.extend_from_slice(target_host.as_bytes());
    connect.extend_from_slice(&target_port.to_be_bytes());
    stream.write_all(&connect).map_err(|e| e.to_string())?;

    let mut reply_head = [0u8; 4];
    stream.read_exact(&mut reply_head).map_err(|e| e.to_string())?;
    if reply_head[0] != 0x05 {
        return Err("SOCKS5 CONNECT: unexpected protocol version".to_string());
    }
    if reply_head[1] != 0x00 {
        return Err(connect_reply_message(reply_head[1]));
    }
    skip_bound_address(stream, reply_head[3]).map_err(|e| e.to_string())?;
    Ok(())
}

fn authenticate(mut stream: &TcpStream, proxy: &ProxyDescriptor) -> Result<(), String> {
    let user = proxy.username.as_deref().unwrap_or_default();
    let pass = proxy.password.as_deref().unwrap_or_default();
    let mut packet = vec![0x01, user.len() as u8];
    packet.extend_from_slice(user.as_bytes());
    packet.push(pass.len() as u8);
    packet.extend_from_slice(pass.as_bytes());
    stream.write_all(&packet).map_err(|e| e.to_string())?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).map_err(|e| e.to_string())?;
    if reply[1] != 0x00 {
        return Err("407 SOCKS5 username/password authentication failed".to_string());
    }
    Ok(())
}

fn skip_bound_address(mut stream: &TcpStream, atyp: u8) -> std::io::Result<()> {
    let len = match atyp {
        0x01 => 4,
        0x04 => 16,
        0x03 => {
            let mut len_byte = [0u8; 1];
            stream.read_exact(&mut len_byte)?;
            usize::from(len_byte[0])
        }
        _ => 0,
    };
    let mut discard = vec![0u8; len + 2];
    stream.read_exact(&mut discard)
}

fn connect_reply_message(code: u8) -> String {
    match code {
        0x02 => "ECONNREFUSED: SOCKS5 connection not allowed by ruleset".to_string(),
        0x05 => "ECONNREFUSED: SOCKS5 connection refused".to_string(),
        0x03 | 0x04 => "ENOTFOUND: SOCKS5 network/host unreachable".to_string(),
        0x06 => "timeout: SOCKS5 TTL expired".to_string(),
        other => format!("SOCKS5 CONNECT failed with reply code {other}"),
    }
}

fn wrap_tls(
    stream: TcpStream,
    host: &str,
) -> Result<rustls::StreamOwned<rustls::ClientConnection, TcpStream>, FetchError> {
    let root_store = rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| FetchError::Transport(format!("invalid SNI host: {host}")))?;
    let conn = rustls::ClientConnection::new(Arc::new(config), server_name)
        .map_err(|e| FetchError::Transport(e.to_string()))?;
    Ok(rustls::StreamOwned::new(conn, stream))
}

fn target_path_and_query(target: &Url) -> String {
    let mut path = target.path().to_string();
    if path.is_empty() {
        path.push('/');
    }
    if let Some(query) = target.query() {
        path.push('?');
        path.push_str(query);
    }
    path
}

fn build_get_request(host: &str, path: &str, headers: &[(String, String)]) -> Vec<u8> {
    let mut request = format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n");
    for (key, value) in headers {
        request.push_str(key);
        request.push_str(": ");
        request.push_str(value);
        request.push_str("\r\n");
    }
    request.push_str("\r\n");
    request.into_bytes()
}

fn send_and_parse<S: Read + Write>(
    mut stream: S,
    request: &[u8],
    proxy_host: &str,
    proxy_port: u16,
) -> Result<RawResponse, FetchError> {
    stream
        .write_all(request)
        .map_err(|e| categorize(&io_err_message(&e), proxy_host, proxy_port))?;

    let mut raw = Vec::new();
    stream
        .read_to_end(&mut raw)
        .map_err(|e| categorize(&io_err_message(&e), proxy_host, proxy_port))?;

    parse_raw_http(&raw)
}

fn parse_raw_http(raw: &[u8]) -> Result<RawResponse, FetchError> {
    let separator = b"\r\n\r\n";
    let split_at = raw
        .windows(separator.len())
        .position(|w| w == separator)
        .ok_or_else(|| FetchError::Transport("malformed HTTP response: no header terminator".into()))?;
    let (head, rest) = raw.split_at(split_at);
    let body = rest[separator.len()..].to_vec();

    let head_text = String::from_utf8_lossy(head);
    let status_line = head_text
        .lines()
        .next()
        .ok_or_else(|| FetchError::Transport("malformed HTTP response: empty status line".into()))?;
    let status = parse_status_line(status_line)?;

    Ok(RawResponse { status, body })
}

fn parse_status_line(line: &str) -> Result<u16, FetchError> {
    let mut parts = line.splitn(3, ' ');
    let _version = parts.next();
    let code = parts
        .next()
        .ok_or_else(|| FetchError::Transport(format!("malformed status line: {line}")))?;
    code.parse::<u16>()
        .map_err(|_| FetchError::Transport(format!("malformed status code: {code}")))
}

fn io_err_message(e: &std::io::Error) -> String {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => "ECONNREFUSED: connection refused".to_string(),
        std::io::ErrorKind::NotFound | std::io::ErrorKind::AddrNotAvailable => {
            format!("ENOTFOUND: {e}")
        }
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => format!("timeout: {e}"),
        _ => e.to_string(),
    }
}

pub(super) fn categorize(message: &str, host: &str, port: u16) -> FetchError {
    let lower = message.to_lowercase();
    if lower.contains("econnrefused") || lower.contains("enotfound") {
        FetchError::ProxyConnection {
            host: host.to_string(),
            port,
        }
    } else if lower.contains("407") || lower.contains("authentication") {
        FetchError::ProxyAuth {
            host: host.to_string(),
            port,
        }
    } else if lower.contains("timeout") || lower.contains("aborted") {
        FetchError::ProxyTimeout {
            host: host.to_string(),
            port,
        }
    } else {
        FetchError::Transport(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_line() {
        assert_eq!(parse_status_line("HTTP/1.1 200 OK").unwrap(), 200);
        assert_eq!(parse_status_line("HTTP/1.1 404 Not Found").unwrap(), 404);
    }

    #[test]
    fn splits_headers_from_body_on_blank_line() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        let response = parse_raw_http(raw).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"hello");
    }

    #[test]
    fn categorizes_proxy_errors_by_message_substring() {
        match categorize("ECONNREFUSED: refused", "h", 1080) {
            FetchError::ProxyConnection { .. } => {}
            other => panic!("unexpected: {other:?}"),
        }
        match categorize("407 authentication required", "h", 1080) {
            FetchError::ProxyAuth { .. } => {}
            other => panic!("unexpected: {other:?}"),
        }
        match categorize("read timeout", "h", 1080) {
            FetchError::ProxyTimeout { .. } => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn builds_path_with_query() {
        let url = Url::parse("https://example.com/a/b?x=1").unwrap();
        assert_eq!(target_path_and_query(&url), "/a/b?x=1");
    }

    #[test]
    fn builds_root_path_when_empty() {
        let url = Url::parse("https://example.com").unwrap();
        assert_eq!(target_path_and_query(&url), "/");
    }
}
