//! Persistence layer — libSQL-backed storage for the message ledger,
//! campaigns, campaign sends, recipient preferences, and settings.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    AUTO_SEND_SETTING, Channel, Database, Direction, LedgerMessage, MessageStatus,
    NewInboundMessage, NewOutboundMessage, Recipient,
};
