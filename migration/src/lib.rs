//! Database migrations for the Booksync service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_12_01_100000_create_workflows;
mod m2025_12_01_100100_create_leads;
mod m2025_12_01_100200_create_oauth_credentials;
mod m2025_12_01_100300_create_bookings;
mod m2025_12_01_100400_create_booking_polling_jobs;
mod m2025_12_01_100500_create_webhook_idempotency_keys;
mod m2025_12_01_100600_create_webhook_dead_letters;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_12_01_100000_create_workflows::Migration),
            Box::new(m2025_12_01_100100_create_leads::Migration),
            Box::new(m2025_12_01_100200_create_oauth_credentials::Migration),
            Box::new(m2025_12_01_100300_create_bookings::Migration),
            Box::new(m2025_12_01_100400_create_booking_polling_jobs::Migration),
            Box::new(m2025_12_01_100500_create_webhook_idempotency_keys::Migration),
            Box::new(m2025_12_01_100600_create_webhook_dead_letters::Migration),
        ]
    }
}
