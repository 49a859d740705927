// Store preparation shared by every command: open, create schema, sync and seed from config.

use crate::config::AppConfig;
use crate::inventory_repo::InventoryRepo;
use tracing::info;

/// Open the configured store and bring hosts and subnets in line with the config.
///
/// Existing hosts get fresh credentials and group; hosts and subnets are only
/// seeded into empty tables.
pub async fn prepare_store(config: &AppConfig) -> anyhow::Result<InventoryRepo> {
    let groups = config.host_groups()?;
    let subnets = config.default_subnets()?;

    let repo = InventoryRepo::connect(&config.database.path, config.database.max_pool_size).await?;
    repo.init().await?;

    let synced = repo.sync_hosts_from_config(&groups).await?;
    let seeded_hosts = repo.seed_hosts_if_empty(&groups).await?;
    let seeded_subnets = repo.seed_subnets_if_empty(&subnets).await?;
    info!(
        path = %config.database.path,
        synced,
        seeded_hosts,
        seeded_subnets,
        "store ready"
    );
    Ok(repo)
}
