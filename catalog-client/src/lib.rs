//! Catalog admin client library exports.
//!
//! The gateway issues reads and writes against the store, the live
//! subscriber streams full-collection snapshots, and the catalog view
//! reconciles the two into the list an operator sees.

pub mod api_client;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod notifications;
pub mod realtime;
pub mod reconcile;
pub mod session;
pub mod view;
