#![allow(async_fn_in_trait)]

pub mod cleanup;
pub mod config;
pub mod connection;
pub mod duration;
pub mod error;
pub mod guard;
pub mod pool;
mod registry;
pub mod state;

use std::fmt::{Debug, Display};

/// Manager opens, validates and closes connections to the backend.
///
/// The pool calls it outside its lock and never looks inside a connection.
pub trait Manager {
    /// Backend connection handle
    type Connection;
    /// Per-connection execution context, e.g. a cursor or prepared session
    type Context;

    type Error: Display + Debug;

    /// Open one connection to the backend
    async fn connect(&self) -> Result<Self::Connection, Self::Error>;
    /// Create the execution context and apply session settings on a fresh connection
    async fn prepare(&self, conn: &mut Self::Connection) -> Result<Self::Context, Self::Error>;
    /// Check an idle connection before it is handed out again; an error evicts it
    async fn check(
        &self,
        _conn: &mut Self::Connection,
        _ctx: &mut Self::Context,
    ) -> Result<(), Self::Error> {
        Ok(())
    }
    /// Release backend resources. Errors are logged and otherwise ignored.
    fn close(&self, conn: Self::Connection, ctx: Self::Context) -> Result<(), Self::Error> {
        drop((conn, ctx));
        Ok(())
    }
}

pub use config::{PoolConfig, Target};
pub use connection::PooledConnection;
pub use error::{ConfigError, PoolError};
pub use guard::ConnectionGuard;
pub use pool::Pool;
pub use state::State;
