//! Database migrations for the linktrail integration service.

pub use sea_orm_migration::prelude::*;

mod m2026_10_01_000100_create_integrations;
mod m2026_10_01_000200_create_webhook_status;
mod m2026_10_01_000300_create_oauth_states;
mod m2026_10_01_000400_create_links;
mod m2026_10_01_000500_create_calls;
mod m2026_10_01_000600_create_youtube_videos;
mod m2026_10_01_000700_create_integration_audit_log;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_10_01_000100_create_integrations::Migration),
            Box::new(m2026_10_01_000200_create_webhook_status::Migration),
            Box::new(m2026_10_01_000300_create_oauth_states::Migration),
            Box::new(m2026_10_01_000400_create_links::Migration),
            Box::new(m2026_10_01_000500_create_calls::Migration),
            Box::new(m2026_10_01_000600_create_youtube_videos::Migration),
            Box::new(m2026_10_01_000700_create_integration_audit_log::Migration),
        ]
    }
}
