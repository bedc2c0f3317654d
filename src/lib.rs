//! # sqlx-format-bind
//!
//! A format-style placeholder compiler and a self-healing MySQL connection
//! core built on SQLx.
//!
//! ## Features
//!
//! - **Format Placeholders**: Write `%s`, `%d` and `%f` in templates; values are
//!   escaped or coerced by kind and substituted in order
//! - **Connection-Aware Escaping**: String values are escaped by the live
//!   connection, following its charset and `NO_BACKSLASH_ESCAPES` mode
//! - **Bounded Reconnects**: Lost connections are re-established and the
//!   interrupted statement replayed, up to a fixed number of attempts
//! - **Capability-Gated Charset Changes**: `SET NAMES` is only issued for
//!   principals holding the `use_db` capability
//! - **Named Field Access**: Bookkeeping fields can be read and written by
//!   name, with write protection and lazily computed fields
//!
//! ## Quick Start
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! sqlx-format-bind = "0.1"
//! ```
//!
//! ## Examples
//!
//! ### Compiling and Running a Statement
//!
//! ```rust,no_run
//! use sqlx_format_bind::prelude::*;
//!
//! # fn example() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let mut db = Database::connect_mysql(
//!     ConnectionConfig::from_env()?,
//!     Options::from_env()?,
//!     Authorizer::new(Principal::new("admin"), AllowAll),
//! )?;
//!
//! let result = db.execute(
//!     "UPDATE posts SET title = %s WHERE id = %d",
//!     &values!["Hello", 7],
//! )?;
//! println!("Updated {} rows", result.rows_affected);
//! # Ok(())
//! # }
//! ```
//!
//! ### Compiling Without a Server
//!
//! The compiler only needs something that can escape strings, so any
//! `Fn(&str) -> String` works as an [`EscapeProvider`]:
//!
//! ```rust
//! use sqlx_format_bind::escape::{escape_string, EscapeMode};
//! use sqlx_format_bind::{compile, values};
//!
//! let escaper = |raw: &str| escape_string(raw, EscapeMode::Backslash);
//! let sql = compile(
//!     "SELECT * FROM users WHERE login = %s AND score > %f",
//!     &values!["o'brien", 2.5],
//!     &escaper,
//! )?;
//!
//! assert_eq!(sql.as_str(), r"SELECT * FROM users WHERE login = 'o\'brien' AND score > 2.5");
//! # Ok::<(), sqlx_format_bind::CompileError>(())
//! ```
//!
//! ### Reading Fields by Name
//!
//! ```rust,no_run
//! use sqlx_format_bind::prelude::*;
//! use sqlx_format_bind::accessor::FieldValue;
//!
//! # fn example(db: &mut Database) -> std::result::Result<(), Box<dyn std::error::Error>> {
//! db.query("SELECT ID, post_title FROM posts")?;
//!
//! // Column metadata is only built when first read
//! if let Some(FieldValue::Columns(columns)) = db.get("col_info") {
//!     for column in columns {
//!         println!("{} ({})", column.name, column.type_name);
//!     }
//! }
//!
//! // Protected fields ignore external writes
//! db.set("check_current_query", false);
//! # Ok(())
//! # }
//! ```
//!
//! ## How It Works
//!
//! 1. **Parse**: Split the template into literal text and typed placeholders
//!    (`%%` is a literal percent sign)
//! 2. **Compile**: Escape and quote `%s` values, coerce `%d` and `%f` values,
//!    and fail on any count or type mismatch before anything is sent
//! 3. **Execute**: Run the statement on the current session, reconnecting and
//!    replaying once if the connection was lost
//!
//! Every successful connect reads the server's SQL modes first and switches
//! the session's escaping to match, then re-applies the charset profile, so
//! even the `SET NAMES` directive is escaped for the session it runs on.
//!
//! ## Limitations
//!
//! - MySQL only
//! - The API is blocking; each connection drives its own single-threaded runtime
//! - A database object is confined to one logical session and is not `Send`
//!
//! ## License
//!
//! Licensed under either of Apache License, Version 2.0 or MIT license at your option.

pub mod accessor;
pub mod builder;
pub mod capability;
pub mod charset;
pub mod client;
pub mod config;
pub mod connection;
pub mod database;
pub mod error;
pub mod escape;
pub mod query;
pub mod sqlx_driver;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod value;

pub use capability::{AllowAll, Authorizer, Principal, StaticCapabilities};
pub use client::{ClientKind, DriverSet, QueryResult};
pub use config::{ConnectionConfig, Options};
pub use database::Database;
pub use error::{
    ClientError, ClientErrorKind, CompileError, ConnectionError, Error, NegotiationError, Result,
};
pub use escape::EscapeProvider;
pub use query::{compile, PreparedQuery};
pub use value::Value;

/// Convenience re-exports for common use cases
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::values;
    pub use crate::{
        AllowAll, Authorizer, ConnectionConfig, Database, Options, Principal, PreparedQuery,
        QueryResult, Value,
    };
}
