//! # godis
//!
//! A single-threaded, in-memory key-value server. One `poll(2)` reactor
//! drives every connection and a periodic cron; there are no worker
//! threads and no locks.
//!
//! ```text
//!            +-----------+   Accept    +-----------+
//!  clients ->| listener  |------------>|  Client   |  query buffer, reply list
//!            +-----------+             +-----+-----+
//!                  ^                         | ReadQuery / SendReply
//!                  |                         v
//!            +-----+-----+   ServerCron +-----------+
//!            |  AeLoop   |------------->|  GodisDb  |  data + expire dicts
//!            +-----------+              +-----------+
//! ```
//!
//! Keys and values are [`object::Gobj`] strings behind `Rc`. Both keyspace
//! tables are [`dict::Dict`]s that rehash a bucket at a time on every
//! access, so growth never stalls the loop.
//!
//! Commands: `GET key`, `SET key value`, `EXPIRE key seconds` and `QUIT`.
//! Requests are either inline (`SET k v\r\n`) or multibulk
//! (`*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n`).

pub mod ae;
pub mod buffer;
pub mod client;
pub mod command;
pub mod config;
pub mod db;
pub mod dict;
pub mod error;
pub mod list;
pub mod object;
pub mod server;

pub use ae::{AeLoop, EventHandler, FeType, TeType};
pub use config::Config;
pub use dict::Dict;
pub use error::{CommandError, DictError, ProtocolError, ServerError};
pub use object::{GType, Gobj, GobjRef};
pub use server::Server;

/// Version of godis
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
