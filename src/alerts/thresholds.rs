use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chrono::Duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Normal,
    Medium,
    High,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Normal => "normal",
            AlertLevel::Medium => "medium",
            AlertLevel::High => "high",
            AlertLevel::Critical => "critical",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AlertLevel::Normal => "NORMAL",
            AlertLevel::Medium => "MEDIUM",
            AlertLevel::High => "HIGH",
            AlertLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AlertLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "normal" => Ok(AlertLevel::Normal),
            "medium" => Ok(AlertLevel::Medium),
            "high" => Ok(AlertLevel::High),
            "critical" => Ok(AlertLevel::Critical),
            other => bail!("Unknown alert level '{}'. Expected normal, medium, high or critical", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertTier {
    pub min_percent: f64,
    pub level: AlertLevel,
    pub cooldown_hours: u64,
}

/// Ordered cutoffs mapping a usage percentage to a level and cooldown.
#[derive(Debug, Clone, PartialEq)]
pub struct TierTable {
    tiers: Vec<AlertTier>,
    /// Parallel to `tiers`.
    cooldowns: Vec<Duration>,
    normal_cooldown: Duration,
}

pub fn default_tiers() -> Vec<AlertTier> {
    vec![
        AlertTier { min_percent: 95.0, level: AlertLevel::Critical, cooldown_hours: 12 },
        AlertTier { min_percent: 90.0, level: AlertLevel::High, cooldown_hours: 24 },
        AlertTier { min_percent: 80.0, level: AlertLevel::Medium, cooldown_hours: 72 },
    ]
}

pub const DEFAULT_NORMAL_COOLDOWN_HOURS: u64 = 7 * 24;

impl Default for TierTable {
    fn default() -> Self {
        let tiers = default_tiers();
        let cooldowns = tiers.iter().map(|tier| Duration::hours(tier.cooldown_hours as i64)).collect();
        Self {
            tiers,
            cooldowns,
            normal_cooldown: Duration::hours(DEFAULT_NORMAL_COOLDOWN_HOURS as i64),
        }
    }
}

fn cooldown_hours(hours: u64) -> Result<Duration> {
    i64::try_from(hours)
        .ok()
        .and_then(Duration::try_hours)
        .with_context(|| format!("Cooldown of {} hours is too large", hours))
}

impl TierTable {
    /// Tiers are sorted highest cutoff first; a `normal` tier, a
    /// non-finite cutoff or an unrepresentable cooldown is rejected.
    pub fn new(mut tiers: Vec<AlertTier>, normal_cooldown_hours: u64) -> Result<Self> {
        for tier in &tiers {
            if !tier.min_percent.is_finite() || tier.min_percent < 0.0 {
                bail!("Alert tier cutoff must be a non-negative number, got {}", tier.min_percent);
            }
            if tier.level == AlertLevel::Normal {
                bail!("Alert tiers cannot use the normal level; it applies below the lowest tier");
            }
        }

        tiers.sort_by(|a, b| b.min_percent.total_cmp(&a.min_percent));

        let cooldowns = tiers
            .iter()
            .map(|tier| cooldown_hours(tier.cooldown_hours))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            tiers,
            cooldowns,
            normal_cooldown: cooldown_hours(normal_cooldown_hours)?,
        })
    }

    pub fn tiers(&self) -> &[AlertTier] {
        &self.tiers
    }

    pub fn classify(&self, percent: f64) -> (AlertLevel, Duration) {
        if !percent.is_finite() {
            return (AlertLevel::Normal, self.normal_cooldown);
        }

        self.tiers
            .iter()
            .zip(&self.cooldowns)
            .find(|(tier, _)| percent >= tier.min_percent)
            .map(|(tier, cooldown)| (tier.level, *cooldown))
            .unwrap_or((AlertLevel::Normal, self.normal_cooldown))
    }

    /// Cooldown of the first tier carrying `level`, the normal cooldown otherwise.
    pub fn cooldown_for(&self, level: AlertLevel) -> Duration {
        self.tiers
            .iter()
            .zip(&self.cooldowns)
            .find(|(tier, _)| tier.level == level)
            .map(|(_, cooldown)| *cooldown)
            .unwrap_or(self.normal_cooldown)
    }
}

/// `100 * current / threshold`; 0 when the threshold is unset or non-positive.
pub fn percent(current: f64, threshold: f64) -> f64 {
    if !threshold.is_finite() || threshold <= 0.0 || !current.is_finite() {
        return 0.0;
    }
    100.0 * current / threshold
}
