use crate::resp::RespType;
use crate::store::Store;
use bytes::Bytes;
use std::str;
use std::time::Duration;
use thiserror::Error;

/// Handshake reply fields, sent back for every `HELLO`.
const HELLO_REPLY: [(&str, &str); 2] = [("server", "redis"), ("version", env!("CARGO_PKG_VERSION"))];

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Set {
        key: Bytes,
        value: Bytes,
        ttl: Option<Duration>,
    },
    Get(Bytes),
    Hello(Bytes),
    Client(Bytes),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("expected an array frame, got {0}")]
    NotAnArray(&'static str),
    #[error("empty command")]
    Empty,
    #[error("command arguments must be strings")]
    InvalidArgument,
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),
    #[error("invalid expire time in 'set' command")]
    InvalidExpire,
    #[error("syntax error in 'set' options")]
    Syntax,
}

impl CommandError {
    /// Whether the connection that sent the frame should be dropped.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CommandError::Unknown(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecError {
    #[error("key not found or expired")]
    KeyNotFound,
}

impl Command {
    pub fn from_resp(resp: RespType) -> Result<Command, CommandError> {
        let array = match resp {
            RespType::Array(Some(array)) => array,
            other => return Err(CommandError::NotAnArray(other.type_name())),
        };

        let mut args = array
            .into_iter()
            .map(into_argument)
            .collect::<Result<Vec<_>, _>>()?;
        if args.is_empty() {
            return Err(CommandError::Empty);
        }
        let name = args.remove(0);

        if name.eq_ignore_ascii_case(b"set") {
            match args.as_slice() {
                [key, value, options @ ..] => Ok(Command::Set {
                    key: key.clone(),
                    value: value.clone(),
                    ttl: parse_expiry(options)?,
                }),
                _ => Err(CommandError::WrongArity("set")),
            }
        } else if name.eq_ignore_ascii_case(b"get") {
            match args.as_slice() {
                [key] => Ok(Command::Get(key.clone())),
                _ => Err(CommandError::WrongArity("get")),
            }
        } else if name.eq_ignore_ascii_case(b"hello") {
            // Trailing AUTH/SETNAME arguments are accepted and ignored.
            match args.as_slice() {
                [identifier, ..] => Ok(Command::Hello(identifier.clone())),
                [] => Err(CommandError::WrongArity("hello")),
            }
        } else if name.eq_ignore_ascii_case(b"client") {
            match args.as_slice() {
                [value, ..] => Ok(Command::Client(value.clone())),
                [] => Err(CommandError::WrongArity("client")),
            }
        } else {
            Err(CommandError::Unknown(
                String::from_utf8_lossy(&name).to_lowercase(),
            ))
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Set { .. } => "set",
            Command::Get(_) => "get",
            Command::Hello(_) => "hello",
            Command::Client(_) => "client",
        }
    }

    pub fn execute(&self, store: &Store) -> Result<RespType, ExecError> {
        match self {
            Command::Set { key, value, ttl } => {
                store.set(key.clone(), value.clone(), *ttl);
                Ok(RespType::ok())
            }
            Command::Get(key) => store
                .get(key)
                .map(RespType::bulk)
                .ok_or(ExecError::KeyNotFound),
            Command::Hello(_) => Ok(RespType::string_map(HELLO_REPLY)),
            Command::Client(_) => Ok(RespType::ok()),
        }
    }
}

fn into_argument(frame: RespType) -> Result<Bytes, CommandError> {
    match frame {
        RespType::BulkString(Some(data)) => Ok(data),
        RespType::SimpleString(s) => Ok(Bytes::from(s)),
        _ => Err(CommandError::InvalidArgument),
    }
}

fn parse_expiry(options: &[Bytes]) -> Result<Option<Duration>, CommandError> {
    match options {
        [] => Ok(None),
        [unit, amount] => {
            let amount = str::from_utf8(amount)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or(CommandError::InvalidExpire)?;
            if unit.eq_ignore_ascii_case(b"ex") {
                Ok(Some(Duration::from_secs(amount)))
            } else if unit.eq_ignore_ascii_case(b"px") {
                Ok(Some(Duration::from_millis(amount)))
            } else {
                Err(CommandError::Syntax)
            }
        }
        _ => Err(CommandError::Syntax),
    }
}
