//! Database migration command.

use crate::output;
use blockvault_core::config::StoreProvider;
use blockvault_core::error::AppError;
use blockvault_database::DatabasePool;

/// Execute the migrate command
pub async fn execute(env: &str) -> Result<(), AppError> {
    let config = super::load_config(env)?;
    if config.store.provider == StoreProvider::Memory {
        output::print_warning("store.provider is memory; nothing to migrate");
        return Ok(());
    }

    let pool = DatabasePool::connect(&config.database).await?;
    println!("Running database migrations...");
    let result = blockvault_database::migration::run_migrations(pool.pool()).await;
    pool.close().await;
    result?;

    output::print_success("All migrations applied successfully.");
    Ok(())
}
