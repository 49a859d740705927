// SQLite inventory store: hosts, latest host metrics, latest VM set per host, subnet scans.
// Metrics and VMs keep only the latest snapshot: every successful poll replaces a host's rows.

mod scans;

use crate::config::HostGroup;
use crate::models::{
    AddressInspection, Host, HostMetricsSnapshot, HostOverview, ScanStatus, VmRecord, VmWithHost,
};
use crate::reconciler::CachedIpMap;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection};
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

/// VM filter for searches.
#[derive(Debug, Clone, PartialEq)]
pub enum VmSearch {
    All,
    /// Case-insensitive substring of the VM name.
    Name(String),
    /// Exact match against any address of the VM.
    Ip(String),
}

pub struct InventoryRepo {
    pool: SqlitePool,
}

impl InventoryRepo {
    pub async fn connect(path: &str, max_pool_size: u32) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    /// Create the schema if absent. Safe to call on every start.
    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hosts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT UNIQUE NOT NULL,
                username TEXT NOT NULL,
                password TEXT NOT NULL,
                group_name TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS host_metrics (
                host_id INTEGER PRIMARY KEY REFERENCES hosts(id),
                cpu_usage_pct REAL NOT NULL,
                used_cpu REAL NOT NULL,
                total_cpu REAL NOT NULL,
                mem_usage_pct REAL NOT NULL,
                used_mem REAL NOT NULL,
                total_mem REAL NOT NULL,
                storage_usage_pct REAL NOT NULL,
                used_storage REAL NOT NULL,
                total_storage REAL NOT NULL,
                last_updated INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vms (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                host_id INTEGER NOT NULL REFERENCES hosts(id),
                name TEXT NOT NULL,
                os TEXT NOT NULL,
                ip TEXT NOT NULL,
                vcpu_count INTEGER NOT NULL,
                ram_info TEXT NOT NULL,
                disk_info TEXT NOT NULL,
                created_date TEXT,
                power_state TEXT NOT NULL,
                last_updated INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_vms_host_id ON vms(host_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_vms_created_date ON vms(created_date)")
            .execute(&self.pool)
            .await?;

        scans::init_scan_tables(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Insert configured hosts only when the table is empty. Duplicate addresses are skipped.
    #[instrument(skip(self, groups), fields(repo = "inventory", operation = "seed_hosts_if_empty"))]
    pub async fn seed_hosts_if_empty(&self, groups: &[HostGroup]) -> anyhow::Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM hosts")
            .fetch_one(&self.pool)
            .await?;
        if count > 0 {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for group in groups {
            for address in &group.addresses {
                let r = sqlx::query(
                    "INSERT OR IGNORE INTO hosts (address, username, password, group_name) VALUES ($1, $2, $3, $4)",
                )
                .bind(address)
                .bind(&group.username)
                .bind(&group.password)
                .bind(&group.name)
                .execute(&mut *tx)
                .await?;
                inserted += r.rows_affected();
            }
        }
        tx.commit().await?;
        if inserted > 0 {
            tracing::info!(hosts = inserted, "seeded hosts from configuration");
        }
        Ok(inserted)
    }

    /// Refresh credentials and group of hosts already stored under a configured address.
    #[instrument(skip(self, groups), fields(repo = "inventory", operation = "sync_hosts_from_config"))]
    pub async fn sync_hosts_from_config(&self, groups: &[HostGroup]) -> anyhow::Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut updated = 0;
        for group in groups {
            for address in &group.addresses {
                let r = sqlx::query(
                    "UPDATE hosts SET username = $1, password = $2, group_name = $3
                     WHERE address = $4 AND (username != $1 OR password != $2 OR group_name IS NOT $3)",
                )
                .bind(&group.username)
                .bind(&group.password)
                .bind(&group.name)
                .bind(address)
                .execute(&mut *tx)
                .await?;
                updated += r.rows_affected();
            }
        }
        tx.commit().await?;
        Ok(updated)
    }

    pub async fn list_hosts(&self) -> anyhow::Result<Vec<Host>> {
        let rows = sqlx::query(
            "SELECT id, address, username, password, group_name FROM hosts ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_host_row).collect()
    }

    /// Every host with its metrics row, including hosts never polled successfully.
    pub async fn list_host_overviews(&self) -> anyhow::Result<Vec<HostOverview>> {
        let rows = sqlx::query(
            "SELECT h.id, h.address, h.group_name, m.host_id AS metrics_host_id,
                    m.cpu_usage_pct, m.used_cpu, m.total_cpu, m.mem_usage_pct, m.used_mem, m.total_mem,
                    m.storage_usage_pct, m.used_storage, m.total_storage, m.last_updated
             FROM hosts h
             LEFT JOIN host_metrics m ON h.id = m.host_id
             ORDER BY h.address",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let metrics_host_id: Option<i64> = row.try_get("metrics_host_id")?;
            let metrics = match metrics_host_id {
                Some(_) => Some(parse_metrics_row(&row)?),
                None => None,
            };
            out.push(HostOverview {
                id: row.try_get("id")?,
                address: row.try_get("address")?,
                group: row.try_get("group_name")?,
                metrics,
            });
        }
        Ok(out)
    }

    pub async fn get_host_metrics(&self, host_id: i64) -> anyhow::Result<Option<HostMetricsSnapshot>> {
        let row = sqlx::query(
            "SELECT cpu_usage_pct, used_cpu, total_cpu, mem_usage_pct, used_mem, total_mem,
                    storage_usage_pct, used_storage, total_storage, last_updated
             FROM host_metrics WHERE host_id = $1",
        )
        .bind(host_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_metrics_row).transpose()
    }

    /// Name -> IP of the host's current VM rows, read before they are replaced.
    #[instrument(skip(self), fields(repo = "inventory", operation = "cached_ips"))]
    pub async fn cached_ips(&self, host_id: i64) -> anyhow::Result<CachedIpMap> {
        let rows = sqlx::query("SELECT name, ip FROM vms WHERE host_id = $1 ORDER BY id")
            .bind(host_id)
            .fetch_all(&self.pool)
            .await?;
        let mut out = CachedIpMap::with_capacity(rows.len());
        for row in rows {
            out.insert(row.try_get("name")?, row.try_get("ip")?);
        }
        Ok(out)
    }

    /// Replace the host's metrics row and its whole VM set in one transaction.
    #[instrument(
        skip(self, metrics, vms),
        fields(repo = "inventory", operation = "replace_host_snapshot", vms_count = vms.len())
    )]
    pub async fn replace_host_snapshot(
        &self,
        host_id: i64,
        metrics: &HostMetricsSnapshot,
        vms: &[VmRecord],
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        write_host_metrics(&mut tx, host_id, metrics).await?;
        write_host_vms(&mut tx, host_id, vms).await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, metrics), fields(repo = "inventory", operation = "replace_host_metrics"))]
    pub async fn replace_host_metrics(
        &self,
        host_id: i64,
        metrics: &HostMetricsSnapshot,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        write_host_metrics(&mut tx, host_id, metrics).await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(
        skip(self, vms),
        fields(repo = "inventory", operation = "replace_host_vms", vms_count = vms.len())
    )]
    pub async fn replace_host_vms(&self, host_id: i64, vms: &[VmRecord]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        write_host_vms(&mut tx, host_id, vms).await?;
        tx.commit().await?;
        Ok(())
    }

    /// VMs of the host at `address`, ordered by name.
    pub async fn vms_for_host(&self, address: &str) -> anyhow::Result<Vec<VmRecord>> {
        let rows = sqlx::query(
            "SELECT v.host_id, v.name, v.os, v.ip, v.vcpu_count, v.ram_info, v.disk_info,
                    v.created_date, v.power_state, v.last_updated
             FROM vms v JOIN hosts h ON v.host_id = h.id
             WHERE h.address = $1
             ORDER BY v.name",
        )
        .bind(address)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_vm_row).collect()
    }

    #[instrument(skip(self), fields(repo = "inventory", operation = "search_vms"))]
    pub async fn search_vms(&self, search: &VmSearch) -> anyhow::Result<Vec<VmWithHost>> {
        let rows = sqlx::query(
            "SELECT v.host_id, v.name, v.os, v.ip, v.vcpu_count, v.ram_info, v.disk_info,
                    v.created_date, v.power_state, v.last_updated, h.address AS host_address
             FROM vms v JOIN hosts h ON v.host_id = h.id
             ORDER BY v.name",
        )
        .fetch_all(&self.pool)
        .await?;

        let needle = match search {
            VmSearch::Name(n) => n.to_lowercase(),
            _ => String::new(),
        };
        let mut out = Vec::new();
        for row in &rows {
            let vm = parse_vm_with_host_row(row)?;
            let matched = match search {
                VmSearch::All => true,
                VmSearch::Name(_) => vm.vm.name.to_lowercase().contains(&needle),
                VmSearch::Ip(ip) => vm.vm.ip_list().any(|candidate| candidate == ip),
            };
            if matched {
                out.push(vm);
            }
        }
        Ok(out)
    }

    /// VMs whose creation date falls in `[from, to)`, newest first. VMs without a date are excluded.
    pub async fn vms_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<VmWithHost>> {
        let rows = sqlx::query(
            "SELECT v.host_id, v.name, v.os, v.ip, v.vcpu_count, v.ram_info, v.disk_info,
                    v.created_date, v.power_state, v.last_updated, h.address AS host_address
             FROM vms v JOIN hosts h ON v.host_id = h.id
             WHERE v.created_date IS NOT NULL AND v.created_date >= $1 AND v.created_date < $2
             ORDER BY v.created_date DESC",
        )
        .bind(from.to_rfc3339_opts(SecondsFormat::Secs, true))
        .bind(to.to_rfc3339_opts(SecondsFormat::Secs, true))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_vm_with_host_row).collect()
    }

    /// Last probe status of `ip` and every VM reporting it.
    pub async fn inspect_address(&self, ip: &str) -> anyhow::Result<AddressInspection> {
        let status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM network_scans WHERE ip = $1 ORDER BY last_updated DESC LIMIT 1",
        )
        .bind(ip)
        .fetch_optional(&self.pool)
        .await?;
        let status = status.map(|s| ScanStatus::from_str(&s)).transpose()?;
        let vms = self.search_vms(&VmSearch::Ip(ip.to_string())).await?;
        Ok(AddressInspection {
            ip: ip.to_string(),
            status,
            vms,
        })
    }
}

async fn write_host_metrics(
    conn: &mut SqliteConnection,
    host_id: i64,
    m: &HostMetricsSnapshot,
) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM host_metrics WHERE host_id = $1")
        .bind(host_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query(
        "INSERT INTO host_metrics (host_id, cpu_usage_pct, used_cpu, total_cpu, mem_usage_pct, used_mem, total_mem,
                                   storage_usage_pct, used_storage, total_storage, last_updated)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(host_id)
    .bind(m.cpu_usage_pct)
    .bind(m.used_cpu_ghz)
    .bind(m.total_cpu_ghz)
    .bind(m.mem_usage_pct)
    .bind(m.used_mem_gb)
    .bind(m.total_mem_gb)
    .bind(m.storage_usage_pct)
    .bind(m.used_storage_gb)
    .bind(m.total_storage_gb)
    .bind(m.last_updated)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn write_host_vms(
    conn: &mut SqliteConnection,
    host_id: i64,
    vms: &[VmRecord],
) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM vms WHERE host_id = $1")
        .bind(host_id)
        .execute(&mut *conn)
        .await?;
    for vm in vms {
        sqlx::query(
            "INSERT INTO vms (host_id, name, os, ip, vcpu_count, ram_info, disk_info, created_date, power_state, last_updated)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(host_id)
        .bind(&vm.name)
        .bind(&vm.os)
        .bind(&vm.ip)
        .bind(vm.vcpu_count)
        .bind(&vm.ram_info)
        .bind(&vm.disk_info)
        .bind(&vm.created_date)
        .bind(&vm.power_state)
        .bind(vm.last_updated)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

fn parse_host_row(row: &SqliteRow) -> anyhow::Result<Host> {
    Ok(Host {
        id: row.try_get("id")?,
        address: row.try_get("address")?,
        username: row.try_get("username")?,
        password: row.try_get("password")?,
        group: row.try_get("group_name")?,
    })
}

fn parse_metrics_row(row: &SqliteRow) -> anyhow::Result<HostMetricsSnapshot> {
    Ok(HostMetricsSnapshot {
        cpu_usage_pct: row.try_get("cpu_usage_pct")?,
        used_cpu_ghz: row.try_get("used_cpu")?,
        total_cpu_ghz: row.try_get("total_cpu")?,
        mem_usage_pct: row.try_get("mem_usage_pct")?,
        used_mem_gb: row.try_get("used_mem")?,
        total_mem_gb: row.try_get("total_mem")?,
        storage_usage_pct: row.try_get("storage_usage_pct")?,
        used_storage_gb: row.try_get("used_storage")?,
        total_storage_gb: row.try_get("total_storage")?,
        last_updated: row.try_get("last_updated")?,
    })
}

fn parse_vm_row(row: &SqliteRow) -> anyhow::Result<VmRecord> {
    Ok(VmRecord {
        host_id: row.try_get("host_id")?,
        name: row.try_get("name")?,
        os: row.try_get("os")?,
        ip: row.try_get("ip")?,
        vcpu_count: row.try_get("vcpu_count")?,
        ram_info: row.try_get("ram_info")?,
        disk_info: row.try_get("disk_info")?,
        created_date: row.try_get("created_date")?,
        power_state: row.try_get("power_state")?,
        last_updated: row.try_get("last_updated")?,
    })
}

fn parse_vm_with_host_row(row: &SqliteRow) -> anyhow::Result<VmWithHost> {
    Ok(VmWithHost {
        vm: parse_vm_row(row)?,
        host_address: row.try_get("host_address")?,
    })
}
