//! Host address parsing (`host[:service]`).
//!
//! The service is a port number or a name. `verse` names the default
//! service; other names are looked up in the system services database.

use std::fmt;
use std::str::FromStr;

use crate::error::ConnectError;

/// Service used when the address names none.
pub const DEFAULT_SERVICE: u16 = 12345;

/// Name of the default service.
pub const DEFAULT_SERVICE_NAME: &str = "verse";

const SERVICES_DB: &str = "/etc/services";

/// Resolve a service given as a port number or a name.
pub fn resolve_service(service: &str) -> Option<u16> {
    if let Ok(port) = service.parse::<u16>() {
        return Some(port);
    }
    if service.eq_ignore_ascii_case(DEFAULT_SERVICE_NAME) {
        return Some(DEFAULT_SERVICE);
    }
    let db = std::fs::read_to_string(SERVICES_DB).ok()?;
    lookup_service(&db, service)
}

/// Find the TCP port of `name` in services(5) text.
fn lookup_service(db: &str, name: &str) -> Option<u16> {
    db.lines()
        .map(|line| line.split('#').next().unwrap_or_default())
        .find_map(|line| {
            let mut fields = line.split_whitespace();
            let official = fields.next()?;
            let (port, proto) = fields.next()?.split_once('/')?;
            if proto != "tcp" {
                return None;
            }
            let named = official == name || fields.any(|alias| alias == name);
            if named {
                port.parse().ok()
            } else {
                None
            }
        })
}

/// A host name (or literal IP) plus service port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddress {
    /// Host name or literal address, without brackets
    pub host: String,
    /// Service port
    pub service: u16,
}

impl HostAddress {
    /// Create from parts
    pub fn new(host: impl Into<String>, service: u16) -> Self {
        Self {
            host: host.into(),
            service,
        }
    }
}

impl FromStr for HostAddress {
    type Err = ConnectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConnectError::InvalidAddress(s.to_string());
        let s = s.trim();

        let (host, service) = if let Some(rest) = s.strip_prefix('[') {
            // [v6]:port or [v6]
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            match tail {
                "" => (host, None),
                _ => (host, Some(tail.strip_prefix(':').ok_or_else(invalid)?)),
            }
        } else if s.matches(':').count() > 1 {
            // bare IPv6 literal
            (s, None)
        } else {
            match s.split_once(':') {
                Some((host, service)) => (host, Some(service)),
                None => (s, None),
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }
        let service = match service {
            Some(raw) => resolve_service(raw).ok_or_else(invalid)?,
            None => DEFAULT_SERVICE,
        };

        Ok(Self::new(host, service))
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.service)
        } else {
            write!(f, "{}:{}", self.host, self.service)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_only() {
        let addr: HostAddress = "verse.example".parse().unwrap();
        assert_eq!(addr, HostAddress::new("verse.example", DEFAULT_SERVICE));
    }

    #[test]
    fn test_parse_host_and_service() {
        let addr: HostAddress = "localhost:4950".parse().unwrap();
        assert_eq!(addr.host, "localhost");
        assert_eq!(addr.service, 4950);
        assert_eq!(addr.to_string(), "localhost:4950");
    }

    #[test]
    fn test_parse_named_service() {
        let addr: HostAddress = "localhost:verse".parse().unwrap();
        assert_eq!(addr.service, DEFAULT_SERVICE);
    }

    #[test]
    fn test_lookup_service_table() {
        let db = "\
# comment line
ftp\t\t21/tcp
http\t\t80/tcp\t\twww www-http\t# WorldWideWeb
domain\t\t53/udp
";
        assert_eq!(lookup_service(db, "http"), Some(80));
        assert_eq!(lookup_service(db, "www"), Some(80));
        assert_eq!(lookup_service(db, "ftp"), Some(21));
        assert_eq!(lookup_service(db, "domain"), None);
        assert_eq!(lookup_service(db, "comment"), None);
    }

    #[test]
    fn test_parse_ipv6() {
        let addr: HostAddress = "[::1]:4950".parse().unwrap();
        assert_eq!(addr, HostAddress::new("::1", 4950));
        assert_eq!(addr.to_string(), "[::1]:4950");

        let addr: HostAddress = "[fe80::1]".parse().unwrap();
        assert_eq!(addr.service, DEFAULT_SERVICE);

        let addr: HostAddress = "::1".parse().unwrap();
        assert_eq!(addr.host, "::1");
    }

    #[test]
    fn test_parse_invalid() {
        for bad in ["", ":4950", "host:", "host:no-such-service", "host:99999", "[::1", "[::1]4950"] {
            assert!(bad.parse::<HostAddress>().is_err(), "{bad:?}");
        }
    }
}
