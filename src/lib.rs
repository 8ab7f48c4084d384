//! Polling engine for a Wynncraft tracking bot.
//!
//! The binary wires these together; a chat front end would call into
//! [`engine::Engine`] the same way.

pub mod api;
pub mod config;
pub mod differ;
pub mod engine;
pub mod fetch;
pub mod hunted;
pub mod jobs;
pub mod notify;
pub mod poll;
pub mod store;
