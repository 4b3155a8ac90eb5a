//! Notification dispatch (§4.4, §6): channel configuration, AES-256-GCM secret storage,
//! Tera-based templating, and one sender per channel kind.

pub mod encryption;
pub mod models;
pub mod senders;
mod service;
mod templates;

pub use service::{NotificationError, NotificationService};
