use std::io;
use thiserror::Error;

/// Failures of the hash table. None of these ever reach the wire.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DictError {
    #[error("expand refused: already rehashing or table large enough")]
    ExpandRefused,

    #[error("key already exists")]
    KeyExists,

    #[error("key does not exist")]
    KeyNotFound,
}

/// Malformed client input. The connection is torn down on any of these.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("expected '$' for bulk argument, got {0:#04x}")]
    ExpectedDollar(u8),

    #[error("invalid {what} length: {raw:?}")]
    InvalidLength { what: &'static str, raw: String },

    #[error("bulk length too long: {len} (max: {max})")]
    BulkTooLong { len: usize, max: usize },

    #[error("too many bulk arguments: {count} (max: {max})")]
    TooManyArgs { count: usize, max: usize },

    #[error("unterminated header line: {len} bytes (max: {max})")]
    HeaderTooLong { len: usize, max: usize },

    #[error("expected CRLF after bulk payload")]
    ExpectedCrlf,
}

/// Command failures surfaced to the client as `-ERR: <message>\r\n`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("wrong number of arguments for '{0}'")]
    WrongArity(String),

    #[error("wrong type")]
    WrongType,

    #[error("value is not an integer or out of range")]
    NotInteger,
}

/// Fatal failures while bringing the server up.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid bind address {addr:?}: {source}")]
    Address {
        addr: String,
        source: std::net::AddrParseError,
    },

    #[error("failed to set up listening socket on {addr}: {source}")]
    Listen { addr: String, source: io::Error },

    #[error(transparent)]
    Io(#[from] io::Error),
}
