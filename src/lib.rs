//! LocalEngine — chat-driven publishing assistant for trade businesses.
//!
//! Receives inbound chat events over a signed webhook, routes each event to
//! the workflow that claims it (post, offer, review reply, or menu), and
//! publishes approved results to the business-listing platform and the
//! client's static site.

pub mod action;
pub mod config;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod retry;
pub mod router;
pub mod services;
pub mod store;
pub mod webhook;
