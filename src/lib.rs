//! # Booksync API Library
//!
//! This library provides the core functionality for the Booksync service:
//! the Calendly integration (OAuth, webhooks, polling), booking attribution,
//! and the HTTP surface around them.

pub mod attribution;
pub mod auth;
pub mod calendly;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod oauth_state;
pub mod orchestrator;
pub mod poll_scheduler;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub mod token_manager;
pub mod webhook_verifier;
pub use migration;
