use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::process::Command;
use std::str::FromStr;

/// Columns requested from the probe tool, in record order.
pub const SMI_QUERY_FIELDS: &str = "index,uuid,name,memory.total,memory.used,utilization.gpu";

/// One GPU as reported by the probe. Fields the tool could not report are
/// `None`; a GPU without a `name` is visible in status views but never
/// schedulable.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct GpuRecord {
    pub index: u32,
    pub uuid: Option<String>,
    pub name: Option<String>,
    pub memory_total_mib: Option<u64>,
    pub memory_used_mib: Option<u64>,
    pub utilization_pct: Option<u32>,
}

/// Source of GPU inventory snapshots. Queried fresh on every scheduling
/// tick; a failed snapshot skips the tick.
pub trait GpuProbe: Send + Sync {
    fn snapshot(&self) -> Result<Vec<GpuRecord>>;
}

/// Probe backed by the `nvidia-smi` CSV query interface.
pub struct SmiProbe {
    binary: String,
}

impl SmiProbe {
    pub fn new() -> Self {
        Self {
            binary: "nvidia-smi".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for SmiProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuProbe for SmiProbe {
    fn snapshot(&self) -> Result<Vec<GpuRecord>> {
        let output = Command::new(&self.binary)
            .arg(format!("--query-gpu={SMI_QUERY_FIELDS}"))
            .arg("--format=csv,noheader,nounits")
            .output()
            .with_context(|| format!("failed to execute {}", self.binary))?;

        if !output.status.success() {
            anyhow::bail!("{} exited with {}", self.binary, output.status);
        }

        parse_snapshot(&output.stdout)
    }
}

/// Parse the probe tool's CSV output. Rows without a parseable index are
/// dropped; any other missing or `[N/A]` cell becomes `None`.
pub fn parse_snapshot(raw: &[u8]) -> Result<Vec<GpuRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(raw);

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.context("malformed CSV row from GPU probe")?;
        let Some(index) = cell::<u32>(&row, 0) else {
            continue;
        };
        records.push(GpuRecord {
            index,
            uuid: text(&row, 1),
            name: text(&row, 2),
            memory_total_mib: cell(&row, 3),
            memory_used_mib: cell(&row, 4),
            utilization_pct: cell(&row, 5),
        });
    }
    Ok(records)
}

fn text(row: &csv::StringRecord, index: usize) -> Option<String> {
    row.get(index)
        .map(str::trim)
        .filter(|value| {
            !value.is_empty()
                && !value.eq_ignore_ascii_case("[N/A]")
                && !value.eq_ignore_ascii_case("[Not Supported]")
        })
        .map(str::to_string)
}

fn cell<T: FromStr>(row: &csv::StringRecord, index: usize) -> Option<T> {
    text(row, index)?.parse().ok()
}
