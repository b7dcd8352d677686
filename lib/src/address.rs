use std::fmt;
use std::str::FromStr;

use crate::{parse_identifier, ChordId, ProtocolError};

/// A peer reference as it travels over the wire: `<id>@<host>:<port>`.
///
/// Two addresses are equal exactly when their text forms are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub id: ChordId,
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(id: ChordId, host: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            host: host.into(),
            port,
        }
    }

    /// The `host:port` pair to dial.
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.host, self.port)
    }
}

impl FromStr for Address {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ProtocolError::MalformedAddress(s.to_string());

        let (id, host_port) = s.split_once('@').ok_or_else(malformed)?;
        let (host, port) = host_port.rsplit_once(':').ok_or_else(malformed)?;
        if host.is_empty() || host.contains('@') || host.chars().any(char::is_whitespace) {
            return Err(malformed());
        }
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let id = parse_identifier(id).map_err(|_| malformed())?;
        let port = port.parse::<u16>().map_err(|_| malformed())?;

        Ok(Address::new(id, host, port))
    }
}
