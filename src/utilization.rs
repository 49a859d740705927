// Utilization math: percentages with a zero guard and unit conversions for display.

use crate::models::{HostMetricsSnapshot, HostSummary};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const MHZ_PER_GHZ: f64 = 1000.0;

/// Round half away from zero to `places` decimals.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// `used / total * 100` rounded to 2 decimals; 0 when `total` is not positive.
pub fn usage_percent(used: f64, total: f64) -> f64 {
    if total > 0.0 {
        round_to(used / total * 100.0, 2)
    } else {
        0.0
    }
}

/// Shortest decimal rendering that always shows a fractional part: 40.0 -> "40.0", 12.25 -> "12.25".
pub fn format_decimal(value: f64) -> String {
    let s = value.to_string();
    if !value.is_finite() || s.contains('.') || s.contains('e') {
        s
    } else {
        format!("{s}.0")
    }
}

/// Derive the stored host snapshot from a raw summary.
///
/// CPU: used MHz over cores x threads MHz. Memory and storage percentages are
/// taken from the GB values as rounded for display, so the three numbers stay consistent.
pub fn host_metrics(summary: &HostSummary, now_ms: i64) -> HostMetricsSnapshot {
    let used_cpu_mhz = summary.cpu_usage_mhz as f64;
    let total_cpu_mhz = (summary.cpu_mhz * summary.cpu_threads) as f64;

    let total_mem_gb = round_to(summary.memory_size_bytes as f64 / BYTES_PER_GB, 2);
    let used_mem_gb = round_to(summary.memory_usage_bytes as f64 / BYTES_PER_GB, 2);

    let total_storage: i64 = summary.datastores.iter().map(|d| d.capacity_bytes).sum();
    let free_storage: i64 = summary.datastores.iter().map(|d| d.free_space_bytes).sum();
    let total_storage_gb = round_to(total_storage as f64 / BYTES_PER_GB, 2);
    let used_storage_gb = round_to((total_storage - free_storage) as f64 / BYTES_PER_GB, 2);

    HostMetricsSnapshot {
        cpu_usage_pct: usage_percent(used_cpu_mhz, total_cpu_mhz),
        used_cpu_ghz: round_to(used_cpu_mhz / MHZ_PER_GHZ, 2),
        total_cpu_ghz: round_to(total_cpu_mhz / MHZ_PER_GHZ, 2),
        mem_usage_pct: usage_percent(used_mem_gb, total_mem_gb),
        used_mem_gb,
        total_mem_gb,
        storage_usage_pct: usage_percent(used_storage_gb, total_storage_gb),
        used_storage_gb,
        total_storage_gb,
        last_updated: now_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatastoreSummary;

    const GB: i64 = 1024 * 1024 * 1024;

    #[test]
    fn usage_percent_zero_total_is_zero() {
        assert_eq!(usage_percent(50.0, 0.0), 0.0);
        assert_eq!(usage_percent(0.0, 0.0), 0.0);
        assert_eq!(usage_percent(10.0, -1.0), 0.0);
    }

    #[test]
    fn usage_percent_rounds_to_two_places() {
        assert_eq!(usage_percent(50.0, 200.0), 25.0);
        assert_eq!(usage_percent(1.0, 3.0), 33.33);
        assert_eq!(usage_percent(2.0, 3.0), 66.67);
    }

    #[test]
    fn format_decimal_keeps_fraction() {
        assert_eq!(format_decimal(40.0), "40.0");
        assert_eq!(format_decimal(12.25), "12.25");
        assert_eq!(format_decimal(0.0), "0.0");
    }

    #[test]
    fn host_metrics_from_summary() {
        let summary = HostSummary {
            cpu_usage_mhz: 4000,
            cpu_mhz: 2000,
            cpu_threads: 8,
            memory_size_bytes: 64 * GB,
            memory_usage_bytes: 16 * GB,
            datastores: vec![
                DatastoreSummary {
                    capacity_bytes: 500 * GB,
                    free_space_bytes: 200 * GB,
                },
                DatastoreSummary {
                    capacity_bytes: 500 * GB,
                    free_space_bytes: 300 * GB,
                },
            ],
        };
        let m = host_metrics(&summary, 42);
        assert_eq!(m.cpu_usage_pct, 25.0);
        assert_eq!(m.used_cpu_ghz, 4.0);
        assert_eq!(m.total_cpu_ghz, 16.0);
        assert_eq!(m.total_mem_gb, 64.0);
        assert_eq!(m.used_mem_gb, 16.0);
        assert_eq!(m.mem_usage_pct, 25.0);
        assert_eq!(m.total_storage_gb, 1000.0);
        assert_eq!(m.used_storage_gb, 500.0);
        assert_eq!(m.storage_usage_pct, 50.0);
        assert_eq!(m.last_updated, 42);
    }

    #[test]
    fn host_metrics_empty_summary_has_no_division_by_zero() {
        let m = host_metrics(&HostSummary::default(), 0);
        assert_eq!(m.cpu_usage_pct, 0.0);
        assert_eq!(m.mem_usage_pct, 0.0);
        assert_eq!(m.storage_usage_pct, 0.0);
        assert_eq!(m.total_storage_gb, 0.0);
    }
}
