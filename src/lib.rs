//! Xen: a teaching-assistant chat bot
//!
//! A token-budgeted dialogue with a hosted completion model, an image
//! generation, editing and variation wizard, and replies localized into the
//! language the user writes in.

pub mod api;
pub mod config;
pub mod context;
pub mod conversation;
pub mod error;
pub mod gateways;
pub mod metrics;

pub use config::Config;
pub use conversation::Dispatcher;
pub use error::{BotError, Result};
