//! # CQL Driver
//!
//! A from-scratch Rust client for the CQL native protocol v4, speaking the
//! binary frame protocol directly over TCP or TLS.
//!
//! ## Features
//!
//! - **Native protocol v4** - Frames encoded and decoded by hand, no generated code
//! - **Async/Await** - Built on Tokio; one outstanding request per connection
//! - **DB-API cursors** - `execute` / `fetchone` / `fetchmany` / `fetchall`
//! - **Typed results** - Server cells decoded into strongly typed [`Value`]s
//! - **Plain-text authentication** - The standard SASL-style exchange when the
//!   server demands it
//!
//! ## Quick Start
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! cql-driver = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use cql_driver::{ConnectConfig, Connection};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Connect and select a keyspace
//!     let config = ConnectConfig::builder("localhost")
//!         .with_keyspace("app")
//!         .build();
//!     let conn = Connection::connect(config).await?;
//!
//!     // Run a query through a cursor
//!     let mut cursor = conn.cursor();
//!     cursor.execute("SELECT name, score FROM players").await?;
//!
//!     while let Some(row) = cursor.fetchone().await? {
//!         println!("{:?}", row);
//!     }
//!
//!     conn.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Authentication
//!
//! Credentials are only used when the server answers STARTUP with an
//! authentication challenge:
//!
//! ```rust
//! use cql_driver::ConnectConfig;
//!
//! let config = ConnectConfig::builder("localhost")
//!     .with_credentials("user", "secret")
//!     .with_tls(true)
//!     .build();
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`CqlResult`]. Server-side failures surface as
//! [`CqlError::Operational`] with the server's error code and message;
//! protocol violations are [`CqlError::Internal`] and leave the connection
//! unusable:
//!
//! ```rust,no_run
//! # use cql_driver::{ConnectConfig, Connection, CqlError};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! # let conn = Connection::connect(ConnectConfig::new("localhost")).await?;
//! let mut cursor = conn.cursor();
//! match cursor.execute("SELEKT oops").await {
//!     Ok(()) => {}
//!     Err(CqlError::Operational { code, message }) => {
//!         eprintln!("server error {code:#06x}: {message}");
//!     }
//!     Err(e) => eprintln!("error: {e}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`client`] - Connections, cursors, and configuration
//! - [`proto`] - Low-level frame, wire-notation, and type codecs

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod client;
pub mod error;
pub mod proto;
pub mod value;

// Re-exports for convenience
pub use client::{
    ColumnSpec, ConnectConfig, ConnectConfigBuilder, Connection, ConnectionState, Credentials,
    Cursor, ResultKind, DEFAULT_PORT,
};
pub use error::{CqlError, CqlResult};
pub use proto::{Consistency, CqlType};
pub use value::Value;
