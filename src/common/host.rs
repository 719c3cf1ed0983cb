//! Peer descriptor handed out by the overlay engine.
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use crate::common::{Key, Member};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
/// A peer of the overlay.
pub struct Host {
    /// Host name, or the textual IP address for peers learned from the network.
    pub name: String,
    pub address: SocketAddr,
    /// Unknown for a bootstrap host until it answers.
    pub key: Option<Key>,
}

impl Host {
    /// Decode a `name:port` string, resolving `name`.
    ///
    /// A malformed string is an [Error::InvalidArguments], while failing to
    /// resolve a well formed one is an [Error::NetworkInit].
    pub fn decode(s: &str) -> Result<Host> {
        let (name, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidArguments(format!("expected name:port, got {s:?}")))?;

        if name.is_empty() {
            return Err(Error::InvalidArguments(format!("missing host name in {s:?}")));
        }

        let port: u16 = port
            .parse()
            .map_err(|_| Error::InvalidArguments(format!("invalid port in {s:?}")))?;

        // Accept bracketed IPv6 literals.
        let name = name.trim_start_matches('[').trim_end_matches(']');

        let addresses: Vec<SocketAddr> = (name, port)
            .to_socket_addrs()
            .map_err(Error::NetworkInit)?
            .collect();

        let address = addresses
            .iter()
            .find(|address| address.is_ipv4())
            .or_else(|| addresses.first())
            .copied()
            .ok_or_else(|| {
                Error::NetworkInit(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{name} did not resolve to any address"),
                ))
            })?;

        Ok(Host {
            name: name.to_string(),
            address,
            key: None,
        })
    }
}

impl From<Member> for Host {
    fn from(member: Member) -> Host {
        Host {
            name: member.address.ip().to_string(),
            address: member.address,
            key: Some(member.key),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decode_ip_and_port() {
        let host = Host::decode("127.0.0.1:6789").unwrap();

        assert_eq!(host.name, "127.0.0.1");
        assert_eq!(host.address, "127.0.0.1:6789".parse().unwrap());
        assert_eq!(host.key, None);
    }

    #[test]
    fn decode_localhost() {
        let host = Host::decode("localhost:4093").unwrap();

        assert_eq!(host.name, "localhost");
        assert_eq!(host.address.port(), 4093);
    }

    #[test]
    fn malformed() {
        for invalid in ["nascent", ":6789", "nascent:", "nascent:port", "nascent:70000"] {
            assert!(
                matches!(Host::decode(invalid), Err(Error::InvalidArguments(_))),
                "{invalid:?} should be invalid"
            );
        }
    }

    #[test]
    fn unresolvable_name() {
        assert!(matches!(
            Host::decode("no-such-host.invalid:4000"),
            Err(Error::NetworkInit(_))
        ));
    }

    #[test]
    fn from_member() {
        let member = Member {
            key: Key::hash(b"peer"),
            address: "10.1.2.3:4000".parse().unwrap(),
        };

        let host = Host::from(member);

        assert_eq!(host.name, "10.1.2.3");
        assert_eq!(host.key, Some(member.key));
    }
}
