//! Wellness SMS delivery engine.
//!
//! Campaign scheduling, inbound webhook processing, and a shared outbound
//! dispatch pipeline over a message ledger. Every send is recorded before
//! the carrier is called; idempotency barriers (one campaign message per
//! user per day, one row per provider message id) live in the store's
//! unique constraints.

pub mod api;
pub mod carrier;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod scheduler;
pub mod store;
pub mod webhook;

pub use config::{CarrierConfig, ServiceConfig};
pub use dispatch::{DispatchOutcome, Dispatcher, OutboundSms};
pub use error::{Error, Result};
pub use scheduler::{CampaignEngine, TickReport};
pub use store::{Database, LibSqlBackend};
