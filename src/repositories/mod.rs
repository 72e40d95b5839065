//! # Repository Layer
//!
//! This module contains repository implementations that encapsulate SeaORM operations
//! for database entities, providing a clean API for data access with workspace-aware methods.

pub mod booking;
pub mod credential;
pub mod lead;
pub mod polling_job;
pub mod webhook;
pub mod workflow;

pub use booking::BookingRepository;
pub use credential::CredentialRepository;
pub use lead::LeadRepository;
pub use polling_job::PollingJobRepository;
pub use webhook::WebhookRepository;
pub use workflow::WorkflowRepository;
