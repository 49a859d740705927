// Subnet list and per-address occupancy rows

use super::InventoryRepo;
use crate::models::{ScanStatus, SubnetOccupancyEntry, SubnetPrefix};
use sqlx::Row;
use sqlx::sqlite::SqlitePool;
use std::str::FromStr;
use tracing::instrument;

pub(super) async fn init_scan_tables(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS network_scans (
            subnet TEXT NOT NULL,
            ip TEXT NOT NULL,
            status TEXT NOT NULL,
            last_updated INTEGER NOT NULL,
            PRIMARY KEY (subnet, ip)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE TABLE IF NOT EXISTS subnets (prefix TEXT PRIMARY KEY)")
        .execute(pool)
        .await?;
    Ok(())
}

const UPSERT_SCAN: &str = "INSERT INTO network_scans (subnet, ip, status, last_updated) VALUES ($1, $2, $3, $4)
     ON CONFLICT(subnet, ip) DO UPDATE SET status = excluded.status, last_updated = excluded.last_updated";

impl InventoryRepo {
    /// Insert or overwrite the row for `(subnet, ip)`. `ip` must lie inside `subnet`.
    pub async fn upsert_scan_entry(
        &self,
        subnet: &SubnetPrefix,
        ip: &str,
        status: ScanStatus,
        last_updated: i64,
    ) -> anyhow::Result<()> {
        ensure_in_subnet(subnet, ip)?;
        sqlx::query(UPSERT_SCAN)
            .bind(subnet.as_str())
            .bind(ip)
            .bind(status.as_str())
            .bind(last_updated)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Upsert a batch of probe results for one subnet in a single transaction.
    #[instrument(
        skip(self, entries),
        fields(repo = "inventory", operation = "upsert_scan_entries", subnet = %subnet, entries_count = entries.len())
    )]
    pub async fn upsert_scan_entries(
        &self,
        subnet: &SubnetPrefix,
        entries: &[(String, ScanStatus)],
        last_updated: i64,
    ) -> anyhow::Result<()> {
        for (ip, _) in entries {
            ensure_in_subnet(subnet, ip)?;
        }
        let mut tx = self.pool.begin().await?;
        for (ip, status) in entries {
            sqlx::query(UPSERT_SCAN)
                .bind(subnet.as_str())
                .bind(ip)
                .bind(status.as_str())
                .bind(last_updated)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Occupancy rows of one subnet, ordered by the last octet.
    pub async fn scan_entries(
        &self,
        subnet: &SubnetPrefix,
    ) -> anyhow::Result<Vec<SubnetOccupancyEntry>> {
        let rows = sqlx::query(
            "SELECT subnet, ip, status, last_updated FROM network_scans WHERE subnet = $1",
        )
        .bind(subnet.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.try_get("status")?;
            out.push(SubnetOccupancyEntry {
                subnet: row.try_get("subnet")?,
                ip: row.try_get("ip")?,
                status: ScanStatus::from_str(&status)?,
                last_updated: row.try_get("last_updated")?,
            });
        }
        out.sort_by_key(|e| last_octet(&e.ip));
        Ok(out)
    }

    pub async fn list_subnets(&self) -> anyhow::Result<Vec<SubnetPrefix>> {
        let rows: Vec<String> = sqlx::query_scalar("SELECT prefix FROM subnets")
            .fetch_all(&self.pool)
            .await?;
        let mut out = rows
            .iter()
            .map(|s| SubnetPrefix::from_str(s))
            .collect::<anyhow::Result<Vec<_>>>()?;
        out.sort_by_key(|p| p.address(0));
        Ok(out)
    }

    /// Returns false when the prefix is already known.
    #[instrument(skip(self), fields(repo = "inventory", operation = "add_subnet", subnet = %prefix))]
    pub async fn add_subnet(&self, prefix: &SubnetPrefix) -> anyhow::Result<bool> {
        let r = sqlx::query("INSERT OR IGNORE INTO subnets (prefix) VALUES ($1)")
            .bind(prefix.as_str())
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() > 0)
    }

    /// Remove the prefix and its occupancy rows. Returns false when it was not known.
    #[instrument(skip(self), fields(repo = "inventory", operation = "remove_subnet", subnet = %prefix))]
    pub async fn remove_subnet(&self, prefix: &SubnetPrefix) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;
        let r = sqlx::query("DELETE FROM subnets WHERE prefix = $1")
            .bind(prefix.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM network_scans WHERE subnet = $1")
            .bind(prefix.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(r.rows_affected() > 0)
    }

    /// Insert the given prefixes only when no subnet is stored yet.
    pub async fn seed_subnets_if_empty(&self, prefixes: &[SubnetPrefix]) -> anyhow::Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subnets")
            .fetch_one(&self.pool)
            .await?;
        if count > 0 {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for prefix in prefixes {
            let r = sqlx::query("INSERT OR IGNORE INTO subnets (prefix) VALUES ($1)")
                .bind(prefix.as_str())
                .execute(&mut *tx)
                .await?;
            inserted += r.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }
}

fn ensure_in_subnet(subnet: &SubnetPrefix, ip: &str) -> anyhow::Result<()> {
    anyhow::ensure!(
        subnet.contains(ip),
        "address {ip} is outside subnet {subnet}"
    );
    Ok(())
}

fn last_octet(ip: &str) -> u16 {
    ip.rsplit('.')
        .next()
        .and_then(|o| o.parse().ok())
        .unwrap_or(u16::MAX)
}
