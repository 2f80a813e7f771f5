//! Daemon front end for the device-minder system: wires the broker
//! connection, database actor, and ingest coordinator together, and exposes
//! the [`dashboard::Dashboard`] facade that query / command callers use

pub mod config;
pub mod dashboard;

use actix::MailboxError;
use dmind_broker::BrokerError;
use dminddb::DatabaseError;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceMinderError {
    #[error("I/O Error")]
    Io(#[from] std::io::Error),
    #[error("Broker Error")]
    BrokerError(#[from] BrokerError),
    #[error("Database Error")]
    DatabaseError(#[from] DatabaseError),
    #[error("Actix mailbox Error")]
    MailError(#[from] MailboxError),
}

pub type DeviceMinderResult<T> = std::result::Result<T, DeviceMinderError>;
