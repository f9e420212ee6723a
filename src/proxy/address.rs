//! Destination address codec.
//!
//! The SOCKS5 request and the head of every tunnel carry a destination in
//! the same layout:
//!
//! ```text
//! ATYP(1) + ADDR + PORT(2, big-endian)
//!
//! ATYP 0x01: IPv4, 4 bytes
//! ATYP 0x03: domain, 1 length byte + name
//! ATYP 0x04: IPv6, 16 bytes
//! ```

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;

use crate::error::{Error, Result};

/// Address type: IPv4.
pub const ATYP_IPV4: u8 = 0x01;
/// Address type: domain name.
pub const ATYP_DOMAIN: u8 = 0x03;
/// Address type: IPv6.
pub const ATYP_IPV6: u8 = 0x04;

/// Longest domain that fits the one-byte length field.
pub const MAX_DOMAIN_LEN: usize = 255;

/// Host part of a destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    /// IPv4 literal
    Ipv4(Ipv4Addr),
    /// IPv6 literal
    Ipv6(Ipv6Addr),
    /// Domain name, resolved by whoever dials it
    Domain(String),
}

/// A destination host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    host: Host,
    port: u16,
}

impl Address {
    /// Build an address, checking the domain length limit.
    pub fn new(host: Host, port: u16) -> Result<Self> {
        if let Host::Domain(name) = &host {
            check_domain(name)?;
        }
        Ok(Self { host, port })
    }

    /// Build a domain address.
    pub fn domain(name: impl Into<String>, port: u16) -> Result<Self> {
        Self::new(Host::Domain(name.into()), port)
    }

    /// The host part.
    pub fn host(&self) -> &Host {
        &self.host
    }

    /// The port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wire type byte for this address.
    pub fn atyp(&self) -> u8 {
        match self.host {
            Host::Ipv4(_) => ATYP_IPV4,
            Host::Domain(_) => ATYP_DOMAIN,
            Host::Ipv6(_) => ATYP_IPV6,
        }
    }

    /// Number of bytes [`encode`](Self::encode) produces.
    pub fn encoded_len(&self) -> usize {
        let body = match &self.host {
            Host::Ipv4(_) => 4,
            Host::Domain(name) => 1 + name.len(),
            Host::Ipv6(_) => 16,
        };
        1 + body + 2
    }

    /// Append the wire form to `buf`.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.atyp());
        match &self.host {
            Host::Ipv4(ip) => buf.extend_from_slice(&ip.octets()),
            Host::Domain(name) => {
                buf.push(name.len() as u8);
                buf.extend_from_slice(name.as_bytes());
            }
            Host::Ipv6(ip) => buf.extend_from_slice(&ip.octets()),
        }
        buf.extend_from_slice(&self.port.to_be_bytes());
    }

    /// Serialize to the wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.write_to(&mut buf);
        buf
    }

    /// Parse the wire form from the start of `data`.
    ///
    /// Returns the address and the number of bytes it occupied. Trailing
    /// bytes are left for the caller.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let (&atyp, rest) = data
            .split_first()
            .ok_or_else(|| Error::malformed("empty address"))?;

        let (host, body_len) = match atyp {
            ATYP_IPV4 => {
                let octets: [u8; 4] = take(rest)?;
                (Host::Ipv4(Ipv4Addr::from(octets)), 4)
            }
            ATYP_IPV6 => {
                let octets: [u8; 16] = take(rest)?;
                (Host::Ipv6(Ipv6Addr::from(octets)), 16)
            }
            ATYP_DOMAIN => {
                let len = *rest
                    .first()
                    .ok_or_else(|| Error::malformed("missing domain length"))?
                    as usize;
                let name = rest
                    .get(1..1 + len)
                    .ok_or_else(|| {
                        Error::malformed(format!(
                            "domain length {} exceeds {} available bytes",
                            len,
                            rest.len() - 1
                        ))
                    })?;
                (Host::Domain(parse_domain(name)?), 1 + len)
            }
            other => {
                return Err(Error::malformed(format!(
                    "unknown address type: 0x{:02x}",
                    other
                )))
            }
        };

        let port_bytes: [u8; 2] = take(&rest[body_len..])?;
        let consumed = 1 + body_len + 2;
        Ok((
            Self {
                host,
                port: u16::from_be_bytes(port_bytes),
            },
            consumed,
        ))
    }

    /// Read one address from a stream.
    ///
    /// Unknown type bytes are [`Error::MalformedAddress`]; a stream that ends
    /// early is [`Error::TruncatedMessage`].
    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let atyp = reader.read_u8().await.map_err(Error::from_read)?;
        Self::read_body(atyp, reader).await
    }

    /// Read the rest of an address whose type byte was already consumed.
    pub async fn read_body<R>(atyp: u8, reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let host = match atyp {
            ATYP_IPV4 => {
                let mut octets = [0u8; 4];
                reader.read_exact(&mut octets).await.map_err(Error::from_read)?;
                Host::Ipv4(Ipv4Addr::from(octets))
            }
            ATYP_IPV6 => {
                let mut octets = [0u8; 16];
                reader.read_exact(&mut octets).await.map_err(Error::from_read)?;
                Host::Ipv6(Ipv6Addr::from(octets))
            }
            ATYP_DOMAIN => {
                let len = reader.read_u8().await.map_err(Error::from_read)? as usize;
                let mut name = vec![0u8; len];
                reader.read_exact(&mut name).await.map_err(Error::from_read)?;
                Host::Domain(parse_domain(&name)?)
            }
            other => {
                return Err(Error::malformed(format!(
                    "unknown address type: 0x{:02x}",
                    other
                )))
            }
        };
        let port = reader.read_u16().await.map_err(Error::from_read)?;
        Ok(Self { host, port })
    }

    /// Open a plain TCP connection to this address.
    pub async fn connect(&self) -> Result<TcpStream> {
        let result = match &self.host {
            Host::Ipv4(ip) => TcpStream::connect((*ip, self.port)).await,
            Host::Ipv6(ip) => TcpStream::connect((*ip, self.port)).await,
            Host::Domain(name) => TcpStream::connect((name.as_str(), self.port)).await,
        };
        result.map_err(|source| Error::Dial {
            target: self.to_string(),
            source,
        })
    }
}

fn take<const N: usize>(data: &[u8]) -> Result<[u8; N]> {
    data.get(..N)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| Error::malformed(format!("need {} bytes, got {}", N, data.len())))
}

fn check_domain(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::malformed("empty domain name"));
    }
    if name.len() > MAX_DOMAIN_LEN {
        return Err(Error::malformed(format!(
            "domain name is {} bytes, limit is {}",
            name.len(),
            MAX_DOMAIN_LEN
        )));
    }
    Ok(())
}

fn parse_domain(bytes: &[u8]) -> Result<String> {
    let name = std::str::from_utf8(bytes)
        .map_err(|_| Error::malformed("domain name is not valid UTF-8"))?;
    check_domain(name)?;
    Ok(name.to_owned())
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        let host = match addr.ip() {
            IpAddr::V4(ip) => Host::Ipv4(ip),
            IpAddr::V6(ip) => Host::Ipv6(ip),
        };
        Self {
            host,
            port: addr.port(),
        }
    }
}

impl FromStr for Address {
    type Err = Error;

    /// Parse `host:port`, with IPv6 literals in brackets.
    fn from_str(s: &str) -> Result<Self> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(addr.into());
        }
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::malformed(format!("missing port in {:?}", s)))?;
        let port: u16 = port
            .parse()
            .map_err(|_| Error::malformed(format!("invalid port in {:?}", s)))?;
        if host.starts_with('[') || host.contains(':') {
            return Err(Error::malformed(format!("invalid IPv6 address in {:?}", s)));
        }
        Self::domain(host, port)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Host::Ipv4(ip) => write!(f, "{}:{}", ip, self.port),
            Host::Ipv6(ip) => write!(f, "[{}]:{}", ip, self.port),
            Host::Domain(name) => write!(f, "{}:{}", name, self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(addr: &Address, expected_len: usize) {
        let wire = addr.encode();
        assert_eq!(wire.len(), expected_len);
        assert_eq!(addr.encoded_len(), expected_len);

        let (decoded, consumed) = Address::decode(&wire).unwrap();
        assert_eq!(&decoded, addr);
        assert_eq!(consumed, expected_len);
    }

    #[test]
    fn test_ipv4_round_trip() {
        for port in [0, 80, 65535] {
            let addr = Address::from(SocketAddr::from(([127, 0, 0, 1], port)));
            round_trip(&addr, 7);
        }
    }

    #[test]
    fn test_ipv6_round_trip() {
        for port in [0, 443, 65535] {
            let addr = Address::new(Host::Ipv6(Ipv6Addr::LOCALHOST), port).unwrap();
            round_trip(&addr, 19);
        }
    }

    #[test]
    fn test_domain_boundary_lengths() {
        let short = Address::domain("a", 0).unwrap();
        round_trip(&short, 1 + 1 + 1 + 2);

        let long = Address::domain("x".repeat(255), 65535).unwrap();
        round_trip(&long, 1 + 1 + 255 + 2);
    }

    #[test]
    fn test_domain_length_limits() {
        assert!(matches!(
            Address::domain("", 80),
            Err(Error::MalformedAddress(_))
        ));
        assert!(matches!(
            Address::domain("x".repeat(256), 80),
            Err(Error::MalformedAddress(_))
        ));
    }

    #[test]
    fn test_port_is_big_endian() {
        let addr = Address::from(SocketAddr::from(([10, 0, 0, 1], 0x1F90)));
        assert_eq!(addr.encode(), vec![0x01, 10, 0, 0, 1, 0x1F, 0x90]);
    }

    #[test]
    fn test_decode_leaves_trailing_payload() {
        let mut wire = Address::domain("example.com", 80).unwrap().encode();
        let addr_len = wire.len();
        wire.extend_from_slice(b"GET / HTTP/1.1\r\n");

        let (addr, consumed) = Address::decode(&wire).unwrap();
        assert_eq!(consumed, addr_len);
        assert_eq!(addr.to_string(), "example.com:80");
        assert_eq!(&wire[consumed..], b"GET / HTTP/1.1\r\n");
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = Address::decode(&[0x02, 1, 2, 3, 4, 0, 80]).unwrap_err();
        assert!(matches!(err, Error::MalformedAddress(_)));
    }

    #[test]
    fn test_decode_rejects_truncated_input() {
        let wire = Address::domain("example.com", 8080).unwrap().encode();
        for cut in 0..wire.len() {
            let err = Address::decode(&wire[..cut]).unwrap_err();
            assert!(matches!(err, Error::MalformedAddress(_)), "cut at {cut}");
        }

        let wire = Address::new(Host::Ipv6(Ipv6Addr::LOCALHOST), 1).unwrap().encode();
        for cut in 0..wire.len() {
            assert!(Address::decode(&wire[..cut]).is_err());
        }
    }

    #[test]
    fn test_decode_rejects_overlong_domain_length() {
        let err = Address::decode(&[0x03, 10, b'a', b'b', 0, 80]).unwrap_err();
        assert!(matches!(err, Error::MalformedAddress(_)));
    }

    #[test]
    fn test_decode_rejects_empty_domain() {
        let err = Address::decode(&[0x03, 0, 0, 80]).unwrap_err();
        assert!(matches!(err, Error::MalformedAddress(_)));
    }

    #[test]
    fn test_parse_host_port() {
        let addr: Address = "127.0.0.1:80".parse().unwrap();
        assert_eq!(addr.host(), &Host::Ipv4(Ipv4Addr::LOCALHOST));
        assert_eq!(addr.port(), 80);

        let addr: Address = "[::1]:443".parse().unwrap();
        assert_eq!(addr.to_string(), "[::1]:443");

        let addr: Address = "example.com:8388".parse().unwrap();
        assert_eq!(addr.host(), &Host::Domain("example.com".into()));

        assert!("example.com".parse::<Address>().is_err());
        assert!("example.com:99999".parse::<Address>().is_err());
    }

    #[tokio::test]
    async fn test_read_from_stream() {
        let mut wire = Address::domain("example.com", 443).unwrap().encode();
        wire.extend_from_slice(b"rest");
        let mut reader = &wire[..];

        let addr = Address::read_from(&mut reader).await.unwrap();
        assert_eq!(addr, Address::domain("example.com", 443).unwrap());
        assert_eq!(reader, b"rest");
    }

    #[tokio::test]
    async fn test_read_from_truncated_stream() {
        let wire = [0x01, 127, 0, 0];
        let err = Address::read_from(&mut &wire[..]).await.unwrap_err();
        assert!(matches!(err, Error::TruncatedMessage));
    }

    #[tokio::test]
    async fn test_read_from_unknown_type() {
        let wire = [0x09, 0, 0];
        let err = Address::read_from(&mut &wire[..]).await.unwrap_err();
        assert!(matches!(err, Error::MalformedAddress(_)));
    }
}
