use serde::{Deserialize, Serialize};

use crate::behavior::DriftSeverity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningSource {
    /// Exact or substring match against stored drift patterns.
    Memory,
    /// Similarity hit from the semantic index.
    Semantic,
}

impl WarningSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Semantic => "semantic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskWarning {
    pub source: WarningSource,
    pub function: String,
    pub severity: DriftSeverity,
    pub message: String,
    #[serde(default)]
    pub times_seen: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[serde(alias = "LOW")]
    Low,
    #[serde(alias = "MEDIUM")]
    Medium,
    #[serde(alias = "HIGH")]
    High,
    #[serde(alias = "BLOCKED")]
    Blocked,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score < 0.3 {
            Self::Low
        } else if score < 0.5 {
            Self::Medium
        } else if score < 0.8 {
            Self::High
        } else {
            Self::Blocked
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Blocked => "blocked",
        }
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "blocked" => Ok(Self::Blocked),
            other => Err(format!(
                "invalid risk level '{other}', expected one of: low, medium, high, blocked"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Safe,
    Risky,
    Blocked,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "SAFE",
            Self::Risky => "RISKY",
            Self::Blocked => "BLOCKED",
        }
    }

    /// Ordering used when picking the worst historical verdict.
    pub fn priority(self) -> u8 {
        match self {
            Self::Safe => 1,
            Self::Risky => 2,
            Self::Blocked => 3,
        }
    }

    /// SAFE at >= 98% preservation with no critical drift, BLOCKED below 85%
    /// or with more than two critical drifts, RISKY otherwise.
    pub fn from_preservation(preservation_pct: f64, critical_drifts: usize) -> Self {
        if preservation_pct < 85.0 || critical_drifts > 2 {
            Self::Blocked
        } else if preservation_pct >= 98.0 && critical_drifts == 0 {
            Self::Safe
        } else {
            Self::Risky
        }
    }
}

impl std::str::FromStr for Verdict {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SAFE" => Ok(Self::Safe),
            "RISKY" => Ok(Self::Risky),
            "BLOCKED" => Ok(Self::Blocked),
            other => Err(format!(
                "invalid verdict '{other}', expected one of: SAFE, RISKY, BLOCKED"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RiskFactors {
    pub drift: f64,
    pub history: f64,
    pub side_effect: f64,
    pub coverage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub warnings: Vec<RiskWarning>,
    pub known_drift_count: usize,
    pub past_run_count: usize,
    pub worst_historical_verdict: Option<Verdict>,
    pub side_effect_density: f64,
    pub test_coverage_gap: f64,
    pub factors: RiskFactors,
    pub computed_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Syntax,
    Api,
    Semantic,
    #[serde(alias = "dead-code")]
    DeadCode,
}

/// Only file and description feed risk scoring; code bodies in a patch
/// are never read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchChange {
    pub file: String,
    pub change_type: ChangeType,
    pub description: String,
    #[serde(default)]
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MigrationPatch {
    pub changes: Vec<PatchChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceReport {
    pub verdict: Verdict,
    pub behavior_preservation_pct: f64,
    pub critical_drifts: usize,
    pub non_critical_drifts: usize,
    pub test_coverage_pct: f64,
    pub risk_score: Option<f64>,
    #[serde(default)]
    pub missing_tests: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_level_boundaries() {
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.2999), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.3), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.4999), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.5), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.7999), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.8), RiskLevel::Blocked);
        assert_eq!(RiskLevel::from_score(1.0), RiskLevel::Blocked);
    }

    #[test]
    fn risk_level_uses_lowercase_wire_name() {
        let json = serde_json::to_string(&RiskLevel::Blocked).expect("serialize");
        assert_eq!(json, "\"blocked\"");
        assert_eq!(RiskLevel::Medium.as_str(), "medium");
        let parsed: RiskLevel = serde_json::from_str("\"HIGH\"").expect("parse legacy");
        assert_eq!(parsed, RiskLevel::High);
        assert_eq!(" Low ".parse::<RiskLevel>(), Ok(RiskLevel::Low));
        assert!("severe".parse::<RiskLevel>().is_err());
    }

    #[test]
    fn verdict_rules_follow_preservation_and_critical_count() {
        assert_eq!(Verdict::from_preservation(100.0, 0), Verdict::Safe);
        assert_eq!(Verdict::from_preservation(98.0, 0), Verdict::Safe);
        assert_eq!(Verdict::from_preservation(99.0, 1), Verdict::Risky);
        assert_eq!(Verdict::from_preservation(90.0, 0), Verdict::Risky);
        assert_eq!(Verdict::from_preservation(84.9, 0), Verdict::Blocked);
        assert_eq!(Verdict::from_preservation(100.0, 3), Verdict::Blocked);
    }

    #[test]
    fn verdict_parses_case_insensitively() {
        assert_eq!("safe".parse::<Verdict>(), Ok(Verdict::Safe));
        assert_eq!(" BLOCKED ".parse::<Verdict>(), Ok(Verdict::Blocked));
        assert!("maybe".parse::<Verdict>().is_err());
    }

    #[test]
    fn patch_ignores_code_bodies() {
        let raw = r#"{"changes":[{"file":"billing/invoice.py","change_type":"semantic",
            "description":"switch to decimal","line":12,"before":"x = 1","after":"x = 2"}]}"#;
        let patch: MigrationPatch = serde_json::from_str(raw).expect("parse patch");
        assert_eq!(patch.changes.len(), 1);
        assert_eq!(patch.changes[0].change_type, ChangeType::Semantic);
    }
}
