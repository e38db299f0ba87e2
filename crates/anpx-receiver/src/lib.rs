//! anpx-receiver — dials a Gateway, authenticates with DID-WBA headers,
//! and pumps decoded HTTP requests into a local application.

pub mod app;
pub mod client;

pub use app::{HttpForwardApp, LocalApp, LocalRequest, LocalResponse};
pub use client::ReceiverClient;
