//! Endpoint grammar.
//!
//! An endpoint names where an engine listens and how to reach it:
//!
//! - `tcp://host:port` (or bare `host:port`) for insecure TCP
//! - `uds:///path/to/socket` for a unix domain socket
//! - `wnua://:port` for windows loopback authentication, loopback only
//! - `mtls://host:port[?ca=..&cert=..&key=..]` for mutual TLS; certificate
//!   paths default to `ca.crt`, `client.crt` and `client.key` under the
//!   directory named by `ANSYS_GRPC_CERTIFICATES`
//!
//! Every form parses and validates on every platform. Forms whose transport
//! is not available in this build fail at connect time with a transport
//! error naming the missing capability.

use std::fmt;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use postflow_core::CERTIFICATES_ENV_VAR;

use crate::error::{Error, Result};

const CA_FILE: &str = "ca.crt";
const CERT_FILE: &str = "client.crt";
const KEY_FILE: &str = "client.key";

/// A parsed engine address.
#[derive(Clone, Debug, PartialEq)]
pub enum Endpoint {
    /// Insecure TCP, as `host:port`.
    Tcp(String),
    /// Unix domain socket path.
    Uds(PathBuf),
    /// Windows loopback authentication on a local port.
    Wnua(u16),
    /// Mutual TLS with explicit certificate material.
    Mtls {
        address: String,
        ca: PathBuf,
        cert: PathBuf,
        key: PathBuf,
    },
}

impl Endpoint {
    fn malformed(endpoint: &str, reason: impl Into<String>) -> Error {
        Error::MalformedEndpoint {
            endpoint: endpoint.to_string(),
            reason: reason.into(),
        }
    }

    /// Splits `host:port`, checking the port parses.
    fn check_address(endpoint: &str, address: &str) -> Result<u16> {
        let (_, port) = address
            .rsplit_once(':')
            .ok_or_else(|| Self::malformed(endpoint, "expected `host:port`"))?;
        port.parse::<u16>()
            .map_err(|_| Self::malformed(endpoint, format!("invalid port `{}`", port)))
    }

    /// Opens a blocking stream to this endpoint.
    pub fn connect(&self, timeout: Option<Duration>) -> Result<Stream> {
        match self {
            Self::Tcp(address) => {
                let addrs: Vec<SocketAddr> = address
                    .to_socket_addrs()
                    .map_err(|e| Error::HostUnreachable(format!("{}: {}", address, e)))?
                    .collect();
                let addr = addrs
                    .first()
                    .ok_or_else(|| Error::HostUnreachable(address.clone()))?;
                let stream = match timeout {
                    Some(t) => TcpStream::connect_timeout(addr, t),
                    None => TcpStream::connect(addr),
                }
                .map_err(|e| Error::HostUnreachable(format!("{}: {}", address, e)))?;
                stream.set_nodelay(true)?;
                Ok(Stream::Tcp(stream))
            }
            Self::Uds(path) => {
                #[cfg(unix)]
                {
                    let stream = UnixStream::connect(path)
                        .map_err(|e| Error::HostUnreachable(format!("{}: {}", path.display(), e)))?;
                    Ok(Stream::Uds(stream))
                }
                #[cfg(not(unix))]
                {
                    let _ = path;
                    Err(Error::TransportUnavailable(
                        "unix domain sockets need a unix platform".to_string(),
                    ))
                }
            }
            Self::Wnua(_) => Err(Error::TransportUnavailable(
                "wnua endpoints need the windows named-pipe transport, which this build does not carry"
                    .to_string(),
            )),
            Self::Mtls { ca, cert, key, .. } => {
                for path in &[ca, cert, key] {
                    if !path.exists() {
                        return Err(Error::HostUnreachable(format!(
                            "certificate file `{}` does not exist",
                            path.display()
                        )));
                    }
                }
                Err(Error::TransportUnavailable(
                    "mtls endpoints need a tls transport, which this build does not carry"
                        .to_string(),
                ))
            }
        }
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (scheme, rest) = match s.split_once("://") {
            Some((scheme, rest)) => (scheme, rest),
            None => ("tcp", s),
        };
        match scheme {
            "tcp" => {
                Self::check_address(s, rest)?;
                Ok(Self::Tcp(rest.to_string()))
            }
            "uds" | "unix" => {
                if rest.is_empty() {
                    return Err(Self::malformed(s, "empty socket path"));
                }
                Ok(Self::Uds(PathBuf::from(rest)))
            }
            "wnua" => {
                let (host, _) = rest
                    .rsplit_once(':')
                    .ok_or_else(|| Self::malformed(s, "expected `wnua://:port`"))?;
                if !matches!(host, "" | "localhost" | "127.0.0.1") {
                    return Err(Self::malformed(s, "wnua endpoints are loopback only"));
                }
                let port = Self::check_address(s, rest)?;
                Ok(Self::Wnua(port))
            }
            "mtls" => {
                let (address, query) = match rest.split_once('?') {
                    Some((address, query)) => (address, Some(query)),
                    None => (rest, None),
                };
                Self::check_address(s, address)?;
                let mut ca = None;
                let mut cert = None;
                let mut key = None;
                if let Some(query) = query {
                    for pair in query.split('&') {
                        let (name, value) = pair
                            .split_once('=')
                            .ok_or_else(|| Self::malformed(s, format!("bad query pair `{}`", pair)))?;
                        match name {
                            "ca" => ca = Some(PathBuf::from(value)),
                            "cert" => cert = Some(PathBuf::from(value)),
                            "key" => key = Some(PathBuf::from(value)),
                            other => {
                                return Err(Self::malformed(
                                    s,
                                    format!("unknown query parameter `{}`", other),
                                ))
                            }
                        }
                    }
                }
                // unnamed certificates resolve from the environment directory
                let (ca, cert, key) = match (ca, cert, key) {
                    (Some(ca), Some(cert), Some(key)) => (ca, cert, key),
                    (ca, cert, key) => {
                        let dir = std::env::var(CERTIFICATES_ENV_VAR).map_err(|_| {
                            Self::malformed(
                                s,
                                format!(
                                    "certificates neither named in the endpoint nor via {}",
                                    CERTIFICATES_ENV_VAR
                                ),
                            )
                        })?;
                        let dir = Path::new(&dir);
                        (
                            ca.unwrap_or_else(|| dir.join(CA_FILE)),
                            cert.unwrap_or_else(|| dir.join(CERT_FILE)),
                            key.unwrap_or_else(|| dir.join(KEY_FILE)),
                        )
                    }
                };
                Ok(Self::Mtls {
                    address: address.to_string(),
                    ca,
                    cert,
                    key,
                })
            }
            other => Err(Self::malformed(s, format!("unknown scheme `{}`", other))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Tcp(address) => write!(f, "tcp://{}", address),
            Self::Uds(path) => write!(f, "uds://{}", path.display()),
            Self::Wnua(port) => write!(f, "wnua://:{}", port),
            Self::Mtls { address, .. } => write!(f, "mtls://{}", address),
        }
    }
}

/// A connected blocking stream, whichever transport carried it.
pub enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Uds(UnixStream),
}

impl Stream {
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match self {
            Self::Tcp(s) => s.set_read_timeout(timeout)?,
            #[cfg(unix)]
            Self::Uds(s) => s.set_read_timeout(timeout)?,
        }
        Ok(())
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match self {
            Self::Tcp(s) => s.set_write_timeout(timeout)?,
            #[cfg(unix)]
            Self::Uds(s) => s.set_write_timeout(timeout)?,
        }
        Ok(())
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Self::Uds(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Self::Uds(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Self::Uds(s) => s.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_address_parses_as_tcp() {
        let ep: Endpoint = "127.0.0.1:50054".parse().unwrap();
        assert_eq!(ep, Endpoint::Tcp("127.0.0.1:50054".to_string()));
        assert_eq!(ep.to_string(), "tcp://127.0.0.1:50054");
    }

    #[test]
    fn uds_keeps_the_full_path() {
        let ep: Endpoint = "uds:///tmp/engine.sock".parse().unwrap();
        assert_eq!(ep, Endpoint::Uds(PathBuf::from("/tmp/engine.sock")));
    }

    #[test]
    fn wnua_rejects_remote_hosts() {
        assert!("wnua://:50054".parse::<Endpoint>().is_ok());
        assert!("wnua://localhost:50054".parse::<Endpoint>().is_ok());
        assert!("wnua://example.com:50054".parse::<Endpoint>().is_err());
    }

    #[test]
    fn mtls_accepts_explicit_certificates() {
        let ep: Endpoint = "mtls://host:1234?ca=/a.crt&cert=/b.crt&key=/b.key"
            .parse()
            .unwrap();
        match ep {
            Endpoint::Mtls { address, ca, .. } => {
                assert_eq!(address, "host:1234");
                assert_eq!(ca, PathBuf::from("/a.crt"));
            }
            other => panic!("expected mtls endpoint, got {:?}", other),
        }
    }

    #[test]
    fn bad_ports_and_schemes_are_rejected() {
        assert!("tcp://host:notaport".parse::<Endpoint>().is_err());
        assert!("ftp://host:21".parse::<Endpoint>().is_err());
        assert!("justahost".parse::<Endpoint>().is_err());
    }
}
