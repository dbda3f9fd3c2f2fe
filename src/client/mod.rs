//! Client layer: connections, cursors, query execution, configuration.
//!
//! - [`connection`] - Transport ownership, the session handshake, frame I/O
//! - [`cursor`] - DB-API style cursors draining buffered result pages
//! - [`query`] - QUERY body assembly and RESULT body parsing
//! - [`config`] - Connection configuration and credentials

pub mod config;
pub mod connection;
pub mod cursor;
pub mod query;

pub use config::{ConnectConfig, ConnectConfigBuilder, Credentials, DEFAULT_PORT};
pub use connection::{Connection, ConnectionState};
pub use cursor::Cursor;
pub use query::{ColumnSpec, ResultKind};
