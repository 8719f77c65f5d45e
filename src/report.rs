//! Serializable run records and their JSON/YAML emitters.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::verdict::Verdict;

/// One step's contribution to a case record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: String,
    pub verdict: Verdict,
    pub message: String,
}

/// One executed attempt of one case iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    /// Case file path as referenced by the campaign.
    pub id: String,
    /// Position in the linearized campaign, starting at 1.
    pub order: usize,
    /// Back-to-back iteration number, starting at 1.
    pub iteration: u32,
    /// Retry number; 0 is the first attempt.
    pub retry: u32,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepRecord>,
}

/// Host facts captured at campaign start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostProps {
    pub hostname: String,
    pub os: String,
    pub engine_version: String,
}

impl HostProps {
    pub fn capture() -> Self {
        Self {
            hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_owned()),
            os: std::env::consts::OS.to_owned(),
            engine_version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

/// The full record of one campaign run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignRecord {
    pub campaign_name: String,
    /// RFC 3339 UTC timestamps.
    pub start: String,
    pub end: String,
    pub aggregate: Verdict,
    pub host: HostProps,
    pub cases: Vec<CaseRecord>,
}

/// Emit a campaign record as pretty JSON.
pub fn emit_campaign_json(record: &CampaignRecord) -> String {
    serde_json::to_string_pretty(record)
        .unwrap_or_else(|e| format!("{{ \"error\": \"{}\" }}", e))
}

/// Emit a campaign record as YAML.
pub fn emit_campaign_yaml(record: &CampaignRecord) -> String {
    serde_yaml::to_string(record).unwrap_or_else(|e| format!("# Error serializing record: {e}"))
}

/// Format a system time as an RFC 3339 UTC timestamp with second
/// precision, e.g. `2024-05-01T13:40:02Z`.
pub fn rfc3339(time: SystemTime) -> String {
    let secs = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    let days = secs / 86_400;
    let rem = secs % 86_400;
    let (year, month, day) = civil_from_days(days as i64);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}Z",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

/// Days-since-epoch to (year, month, day) in the proleptic Gregorian
/// calendar (Howard Hinnant's civil-from-days algorithm).
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}
