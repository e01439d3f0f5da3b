//! Huddle client library
//!
//! A live connection to one community ([`LiveConnection`]), REST helpers
//! ([`ApiClient`]), and the merge of fetched history with live events
//! ([`reconcile`], [`Timeline`]).

pub mod network;
pub mod reconcile;

pub use network::{ApiClient, LiveConnection};
pub use reconcile::{reconcile, Timeline};
