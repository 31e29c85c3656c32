//! Best-effort node statistics read from the proc filesystem.
//!
//! Supplies node memory and pid headroom. Filesystem and per-workload usage
//! need a container runtime integration and are absent from these snapshots;
//! the engine produces no observation for signals it cannot measure.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;

use eviction_agent_lib::stats::{MemoryStats, NodeStats, PidStats, Snapshot, SnapshotProvider};

pub struct ProcStatsProvider {
    proc_path: PathBuf,
}

impl Default for ProcStatsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcStatsProvider {
    pub fn new() -> Self {
        ProcStatsProvider {
            proc_path: PathBuf::from("/proc"),
        }
    }

    /// Create a provider with a custom proc path (for testing).
    pub fn with_proc_path(proc_path: impl Into<PathBuf>) -> Self {
        ProcStatsProvider {
            proc_path: proc_path.into(),
        }
    }

    async fn memory_stats(&self) -> Result<MemoryStats> {
        let path = self.proc_path.join("meminfo");
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(parse_meminfo(&content))
    }

    async fn pid_stats(&self) -> Result<PidStats> {
        let path = self.proc_path.join("sys/kernel/pid_max");
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let max_pids: u64 = content
            .trim()
            .parse()
            .context("Failed to parse pid_max value")?;

        // Every numeric entry under /proc is one running process.
        let mut entries = fs::read_dir(&self.proc_path)
            .await
            .context("Failed to list proc entries")?;
        let mut num_processes = 0u64;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.is_empty() && name.chars().all(|c| c.is_ascii_digit()) {
                num_processes += 1;
            }
        }

        Ok(PidStats {
            max_pids: Some(max_pids),
            num_processes: Some(num_processes),
        })
    }
}

/// Parse MemTotal and MemAvailable out of meminfo content (values in kB).
fn parse_meminfo(content: &str) -> MemoryStats {
    let mut total_bytes = None;
    let mut available_bytes = None;
    for line in content.lines() {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("MemTotal:"), Some(value)) => {
                total_bytes = value.parse::<u64>().ok().map(|kb| kb * 1024);
            }
            (Some("MemAvailable:"), Some(value)) => {
                available_bytes = value.parse::<u64>().ok().map(|kb| kb * 1024);
            }
            _ => {}
        }
    }
    MemoryStats {
        available_bytes,
        // Working set approximated as everything the kernel cannot reclaim.
        working_set_bytes: match (total_bytes, available_bytes) {
            (Some(total), Some(available)) => Some(total.saturating_sub(available)),
            _ => None,
        },
        usage_bytes: None,
    }
}

#[async_trait]
impl SnapshotProvider for ProcStatsProvider {
    async fn get(&self) -> Result<Snapshot> {
        let memory = self.memory_stats().await?;
        let pids = self.pid_stats().await?;
        Ok(Snapshot {
            node: NodeStats {
                memory,
                pids,
                ..Default::default()
            },
            workloads: Vec::new(),
            recorded_at: Some(Utc::now()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_mock_proc(mem_total_kb: u64, mem_available_kb: u64, pids: &[u32]) -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        let meminfo = format!(
            "MemTotal:       {mem_total_kb} kB\nMemFree:         1000 kB\nMemAvailable:   {mem_available_kb} kB\nBuffers:          100 kB\n"
        );
        fs::write(root.join("meminfo"), meminfo).await.unwrap();

        fs::create_dir_all(root.join("sys/kernel")).await.unwrap();
        fs::write(root.join("sys/kernel/pid_max"), "32768\n")
            .await
            .unwrap();

        for pid in pids {
            fs::create_dir_all(root.join(pid.to_string())).await.unwrap();
        }
        fs::create_dir_all(root.join("self")).await.unwrap();

        temp_dir
    }

    #[tokio::test]
    async fn test_snapshot_from_mock_proc() {
        let temp_dir = create_mock_proc(8_000_000, 6_000_000, &[1, 42, 4321]).await;
        let provider = ProcStatsProvider::with_proc_path(temp_dir.path());

        let snapshot = provider.get().await.unwrap();

        assert_eq!(
            snapshot.node.memory.available_bytes,
            Some(6_000_000 * 1024)
        );
        assert_eq!(
            snapshot.node.memory.working_set_bytes,
            Some(2_000_000 * 1024)
        );
        assert_eq!(snapshot.node.pids.max_pids, Some(32768));
        // Only the numeric entries count as processes.
        assert_eq!(snapshot.node.pids.num_processes, Some(3));
        assert!(snapshot.recorded_at.is_some());
        assert!(snapshot.workloads.is_empty());
    }

    #[tokio::test]
    async fn test_missing_meminfo_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let provider = ProcStatsProvider::with_proc_path(temp_dir.path());
        assert!(provider.get().await.is_err());
    }

    #[test]
    fn test_parse_meminfo_handles_missing_fields() {
        let stats = parse_meminfo("MemTotal:       8000 kB\n");
        assert_eq!(stats.available_bytes, None);
        assert_eq!(stats.working_set_bytes, None);

        let stats = parse_meminfo("");
        assert_eq!(stats.available_bytes, None);
    }
}
