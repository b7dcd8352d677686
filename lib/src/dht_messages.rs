//! The line-oriented wire protocol spoken between peers.
//!
//! Every request and every response is a single line of space-separated
//! tokens. A response line cannot be decoded on its own: `NULL` means "no
//! value" to a GET but is a protocol violation in reply to a PING, so
//! responses are always parsed against the request that produced them.

use std::fmt;
use std::str::FromStr;

use crate::{parse_identifier, Address, ChordId, ProtocolError, RingSpace};

pub const OK: &str = "OK";
pub const PONG: &str = "PONG";
pub const NULL: &str = "NULL";
pub const ERROR: &str = "ERROR";

/// Requests a peer can receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhtMessage {
    // Client-facing operations, routed to the key's owner
    Put { key: ChordId, value: String },
    Get { key: ChordId },
    Delete { key: ChordId },
    // Store on the receiving node, no routing
    Store { key: ChordId, value: String },
    // Hand over the keys a joining node with this id now owns
    Transfer { id: ChordId },
    FindSuccessor { id: ChordId },
    GetSuccessorList,
    GetPredecessor,
    // The sender claims to be the receiver's predecessor
    Notify { address: Address },
    Ping,
}

/// Answers to a [`DhtMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhtResponse {
    Ok,
    Pong,
    Null,
    Error,
    Value(String),
    Address(Address),
    SuccessorList(Vec<Address>),
    Entries(Vec<(ChordId, String)>),
}

/// Values travel as single opaque tokens; the caller encodes payloads so
/// that they carry no whitespace.
pub fn is_value_token(value: &str) -> bool {
    !value.is_empty() && !value.chars().any(char::is_whitespace)
}

fn value_token(value: &str) -> Result<String, ProtocolError> {
    if is_value_token(value) {
        Ok(value.to_string())
    } else {
        Err(ProtocolError::InvalidValue(value.to_string()))
    }
}

impl DhtMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            DhtMessage::Put { .. } => "PUT",
            DhtMessage::Get { .. } => "GET",
            DhtMessage::Delete { .. } => "DELETE",
            DhtMessage::Store { .. } => "STORE",
            DhtMessage::Transfer { .. } => "TRANSFER",
            DhtMessage::FindSuccessor { .. } => "FIND_SUCCESSOR",
            DhtMessage::GetSuccessorList => "GET_SUCCESSOR_LIST",
            DhtMessage::GetPredecessor => "GET_PREDECESSOR",
            DhtMessage::Notify { .. } => "NOTIFY",
            DhtMessage::Ping => "PING",
        }
    }

    /// Rejects identifiers that do not fit the receiving node's ring.
    pub fn check_ring(&self, ring: &RingSpace) -> Result<(), ProtocolError> {
        let id = match self {
            DhtMessage::Put { key, .. }
            | DhtMessage::Get { key }
            | DhtMessage::Delete { key }
            | DhtMessage::Store { key, .. } => key,
            DhtMessage::Transfer { id } | DhtMessage::FindSuccessor { id } => id,
            DhtMessage::Notify { address } => &address.id,
            DhtMessage::GetSuccessorList | DhtMessage::GetPredecessor | DhtMessage::Ping => {
                return Ok(())
            }
        };
        if ring.contains(id) {
            Ok(())
        } else {
            Err(ProtocolError::IdentifierOutOfRange(id.to_string()))
        }
    }

    /// Decodes the line a peer sent back in reply to this request.
    pub fn parse_response(&self, line: &str) -> Result<DhtResponse, ProtocolError> {
        let line = line.trim();
        let unexpected = || ProtocolError::UnexpectedResponse {
            kind: self.kind(),
            line: line.to_string(),
        };

        if line == ERROR {
            return Ok(DhtResponse::Error);
        }

        match self {
            DhtMessage::Put { .. }
            | DhtMessage::Delete { .. }
            | DhtMessage::Store { .. }
            | DhtMessage::Notify { .. } => match line {
                OK => Ok(DhtResponse::Ok),
                _ => Err(unexpected()),
            },
            DhtMessage::Ping => match line {
                PONG => Ok(DhtResponse::Pong),
                _ => Err(unexpected()),
            },
            DhtMessage::Get { .. } => match line {
                NULL => Ok(DhtResponse::Null),
                value if is_value_token(value) => Ok(DhtResponse::Value(value.to_string())),
                _ => Err(unexpected()),
            },
            DhtMessage::Transfer { .. } => {
                if line == NULL {
                    return Ok(DhtResponse::Entries(Vec::new()));
                }
                let entries = line
                    .split_whitespace()
                    .map(|token| {
                        let (id, value) = token.split_once(':').ok_or_else(unexpected)?;
                        Ok((parse_identifier(id)?, value_token(value)?))
                    })
                    .collect::<Result<Vec<_>, ProtocolError>>()?;
                Ok(DhtResponse::Entries(entries))
            }
            DhtMessage::FindSuccessor { .. } => Ok(DhtResponse::Address(line.parse()?)),
            DhtMessage::GetPredecessor => match line {
                NULL => Ok(DhtResponse::Null),
                address => Ok(DhtResponse::Address(address.parse()?)),
            },
            DhtMessage::GetSuccessorList => {
                let list = line
                    .split_whitespace()
                    .map(str::parse)
                    .collect::<Result<Vec<Address>, ProtocolError>>()?;
                if list.is_empty() {
                    return Err(unexpected());
                }
                Ok(DhtResponse::SuccessorList(list))
            }
        }
    }
}

impl fmt::Display for DhtMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind();
        match self {
            DhtMessage::Put { key, value } | DhtMessage::Store { key, value } => {
                write!(f, "{} {} {}", kind, key, value)
            }
            DhtMessage::Get { key } | DhtMessage::Delete { key } => write!(f, "{} {}", kind, key),
            DhtMessage::Transfer { id } | DhtMessage::FindSuccessor { id } => {
                write!(f, "{} {}", kind, id)
            }
            DhtMessage::Notify { address } => write!(f, "{} {}", kind, address),
            DhtMessage::GetSuccessorList | DhtMessage::GetPredecessor | DhtMessage::Ping => {
                f.write_str(kind)
            }
        }
    }
}

impl FromStr for DhtMessage {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut tokens = line.split_whitespace();
        let kind = tokens.next().ok_or(ProtocolError::Empty)?;
        let args: Vec<&str> = tokens.collect();

        let message = match kind {
            "PUT" => {
                let [key, value] = arguments::<2>("PUT", &args)?;
                DhtMessage::Put {
                    key: parse_identifier(key)?,
                    value: value_token(value)?,
                }
            }
            "STORE" => {
                let [key, value] = arguments::<2>("STORE", &args)?;
                DhtMessage::Store {
                    key: parse_identifier(key)?,
                    value: value_token(value)?,
                }
            }
            "GET" => {
                let [key] = arguments::<1>("GET", &args)?;
                DhtMessage::Get {
                    key: parse_identifier(key)?,
                }
            }
            "DELETE" => {
                let [key] = arguments::<1>("DELETE", &args)?;
                DhtMessage::Delete {
                    key: parse_identifier(key)?,
                }
            }
            "TRANSFER" => {
                let [id] = arguments::<1>("TRANSFER", &args)?;
                DhtMessage::Transfer {
                    id: parse_identifier(id)?,
                }
            }
            "FIND_SUCCESSOR" => {
                let [id] = arguments::<1>("FIND_SUCCESSOR", &args)?;
                DhtMessage::FindSuccessor {
                    id: parse_identifier(id)?,
                }
            }
            "NOTIFY" => {
                let [address] = arguments::<1>("NOTIFY", &args)?;
                DhtMessage::Notify {
                    address: address.parse()?,
                }
            }
            "GET_SUCCESSOR_LIST" => {
                arguments::<0>("GET_SUCCESSOR_LIST", &args)?;
                DhtMessage::GetSuccessorList
            }
            "GET_PREDECESSOR" => {
                arguments::<0>("GET_PREDECESSOR", &args)?;
                DhtMessage::GetPredecessor
            }
            "PING" => {
                arguments::<0>("PING", &args)?;
                DhtMessage::Ping
            }
            other => return Err(ProtocolError::UnknownKind(other.to_string())),
        };
        Ok(message)
    }
}

fn arguments<'a, const N: usize>(
    kind: &'static str,
    args: &[&'a str],
) -> Result<[&'a str; N], ProtocolError> {
    <[&str; N]>::try_from(args).map_err(|_| ProtocolError::Arity {
        kind,
        expected: N,
        got: args.len(),
    })
}

impl fmt::Display for DhtResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DhtResponse::Ok => f.write_str(OK),
            DhtResponse::Pong => f.write_str(PONG),
            DhtResponse::Null => f.write_str(NULL),
            DhtResponse::Error => f.write_str(ERROR),
            DhtResponse::Value(value) => f.write_str(value),
            DhtResponse::Address(address) => write!(f, "{}", address),
            DhtResponse::SuccessorList(list) => {
                let rendered: Vec<String> = list.iter().map(Address::to_string).collect();
                f.write_str(&rendered.join(" "))
            }
            DhtResponse::Entries(entries) if entries.is_empty() => f.write_str(NULL),
            DhtResponse::Entries(entries) => {
                let rendered: Vec<String> = entries
                    .iter()
                    .map(|(id, value)| format!("{}:{}", id, value))
                    .collect();
                f.write_str(&rendered.join(" "))
            }
        }
    }
}
