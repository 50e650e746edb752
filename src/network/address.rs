//! Connection targets and name resolution.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use crate::dispatch::Dispatch;
use crate::error::RpcError;

/// Where a client connects or a server listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// UNIX-domain socket path.
    Local(PathBuf),
    /// `HOST:PORT` for clients; `PORT` or a full socket address for servers.
    Tcp(String),
}

impl Address {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Address::Local(path.into())
    }

    pub fn tcp(name: impl Into<String>) -> Self {
        Address::Tcp(name.into())
    }

    /// Split a client-side `HOST:PORT` name.
    pub fn host_port(name: &str) -> Result<(&str, u16), RpcError> {
        let (host, port) = name
            .rsplit_once(':')
            .ok_or_else(|| RpcError::InvalidAddress(name.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(RpcError::InvalidAddress(name.to_string()));
        }
        let port = port
            .parse()
            .map_err(|_| RpcError::InvalidAddress(name.to_string()))?;
        Ok((host, port))
    }

    /// Listening address for a server-side TCP name: a bare port binds
    /// every interface.
    pub fn listen_addr(name: &str) -> Result<SocketAddr, RpcError> {
        if let Ok(port) = name.parse::<u16>() {
            return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
        }
        if let Ok(addr) = name.parse::<SocketAddr>() {
            return Ok(addr);
        }
        name.to_socket_addrs()
            .ok()
            .and_then(|mut it| it.next())
            .ok_or_else(|| RpcError::InvalidAddress(name.to_string()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Local(p) => write!(f, "local:{}", p.display()),
            Address::Tcp(n) => write!(f, "tcp:{n}"),
        }
    }
}

/// Completion of a lookup. May be invoked synchronously from inside
/// [`NameResolver::resolve`] or later from any reactor callback.
pub type ResolveDone = Box<dyn FnOnce(&Dispatch, Result<IpAddr, String>)>;

/// Turns a host name into an address.
pub trait NameResolver {
    fn resolve(&self, dispatch: &Dispatch, host: &str, done: ResolveDone);
}

/// Blocking lookup through the system resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl SystemResolver {
    pub fn lookup(host: &str) -> io::Result<IpAddr> {
        (host, 0)
            .to_socket_addrs()?
            .map(|a| a.ip())
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses for host"))
    }
}

impl NameResolver for SystemResolver {
    fn resolve(&self, dispatch: &Dispatch, host: &str, done: ResolveDone) {
        done(dispatch, Self::lookup(host).map_err(|e| e.to_string()));
    }
}

impl<F> NameResolver for F
where
    F: Fn(&str) -> Result<IpAddr, String>,
{
    fn resolve(&self, dispatch: &Dispatch, host: &str, done: ResolveDone) {
        done(dispatch, self(host));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_port() {
        assert_eq!(Address::host_port("localhost:80").unwrap(), ("localhost", 80));
        assert_eq!(Address::host_port("[::1]:9").unwrap(), ("::1", 9));
        assert!(Address::host_port("localhost").is_err());
        assert!(Address::host_port(":80").is_err());
        assert!(Address::host_port("h:99999").is_err());
    }

    #[test]
    fn test_listen_addr() {
        assert_eq!(
            Address::listen_addr("8080").unwrap(),
            "0.0.0.0:8080".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            Address::listen_addr("127.0.0.1:0").unwrap(),
            "127.0.0.1:0".parse::<SocketAddr>().unwrap()
        );
        assert!(Address::listen_addr("not an address").is_err());
    }

    #[test]
    fn test_system_resolver_numeric() {
        assert_eq!(
            SystemResolver::lookup("127.0.0.1").unwrap(),
            IpAddr::from([127, 0, 0, 1])
        );
    }
}
