use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

pub mod heuristic;
pub mod protocol;

pub type TabId = i64;

pub const MAX_CONFIDENCE: u8 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("external link count {external} exceeds total {total}")]
    ExternalExceedsTotal { total: u32, external: u32 },
    #[error("scan url cannot be empty")]
    EmptyUrl,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssessmentError {
    #[error("confidence out of range: {0} > 100")]
    ConfidenceOutOfRange(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("tab record is loading but already carries an assessment")]
    LoadingWithAssessment,
    #[error("tab record is loading but already carries an error")]
    LoadingWithError,
    #[error("tab record carries both an assessment and an error")]
    AssessmentAndError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FormSummary {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub has_password_field: bool,
    #[serde(default)]
    pub input_count: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LinkSummary {
    pub total: u32,
    pub external: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub is_https: bool,
    #[serde(default)]
    pub title: String,
}

/// Summary of one page load as produced by the content script.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanReport {
    pub url: String,
    #[serde(default)]
    pub forms: Vec<FormSummary>,
    #[serde(default)]
    pub links: LinkSummary,
    pub meta: PageMeta,
}

/// The part of a scan that is sent to the assessment endpoint alongside the url.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Evidence {
    pub forms: Vec<FormSummary>,
    pub links: LinkSummary,
    pub meta: PageMeta,
}

impl ScanReport {
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.url.trim().is_empty() {
            return Err(ScanError::EmptyUrl);
        }
        if self.links.external > self.links.total {
            return Err(ScanError::ExternalExceedsTotal {
                total: self.links.total,
                external: self.links.external,
            });
        }
        Ok(())
    }

    pub fn evidence(&self) -> Evidence {
        Evidence {
            forms: self.forms.clone(),
            links: self.links,
            meta: self.meta.clone(),
        }
    }

    pub fn has_password_field(&self) -> bool {
        self.forms.iter().any(|form| form.has_password_field)
    }

    pub fn password_field_count(&self) -> usize {
        self.forms
            .iter()
            .filter(|form| form.has_password_field)
            .count()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Safety {
    Safe,
    Suspicious,
    Unsafe,
}

impl Safety {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Suspicious => "suspicious",
            Self::Unsafe => "unsafe",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Safe => "Safe",
            Self::Suspicious => "Suspicious",
            Self::Unsafe => "Unsafe",
        }
    }
}

impl fmt::Display for Safety {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assessment {
    pub safety: Safety,
    pub confidence: u8,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(alias = "assessedAt")]
    pub assessed_at: DateTime<Utc>,
}

impl Assessment {
    pub fn validate(&self) -> Result<(), AssessmentError> {
        if self.confidence > MAX_CONFIDENCE {
            return Err(AssessmentError::ConfidenceOutOfRange(self.confidence));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordPhase {
    Loading,
    Unassessed,
    Assessed,
    Failed,
}

impl RecordPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Unassessed => "unassessed",
            Self::Assessed => "assessed",
            Self::Failed => "failed",
        }
    }
}

/// Per-tab state: the latest scan plus whatever the assessment pipeline has
/// learned about it so far.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TabRecord {
    pub scan: ScanReport,
    pub assessment: Option<Assessment>,
    pub loading: bool,
    pub error: Option<String>,
}

impl TabRecord {
    pub fn pending(scan: ScanReport) -> Self {
        Self {
            scan,
            assessment: None,
            loading: true,
            error: None,
        }
    }

    pub fn settle_unauthenticated(&mut self) {
        self.assessment = None;
        self.error = None;
        self.loading = false;
    }

    pub fn settle_assessed(&mut self, assessment: Assessment) {
        self.assessment = Some(assessment);
        self.error = None;
        self.loading = false;
    }

    pub fn settle_failed(&mut self, message: impl Into<String>) {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = "assessment failed".to_string();
        }
        self.assessment = None;
        self.error = Some(message);
        self.loading = false;
    }

    pub fn phase(&self) -> RecordPhase {
        if self.loading {
            RecordPhase::Loading
        } else if self.assessment.is_some() {
            RecordPhase::Assessed
        } else if self.error.is_some() {
            RecordPhase::Failed
        } else {
            RecordPhase::Unassessed
        }
    }

    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.loading && self.assessment.is_some() {
            return Err(InvariantViolation::LoadingWithAssessment);
        }
        if self.loading && self.error.is_some() {
            return Err(InvariantViolation::LoadingWithError);
        }
        if self.assessment.is_some() && self.error.is_some() {
            return Err(InvariantViolation::AssessmentAndError);
        }
        Ok(())
    }
}

/// Tab ids arrive as numbers from the browser but some shims stringify them.
pub fn deserialize_tab_id<'de, D>(deserializer: D) -> Result<TabId, D::Error>
where
    D: Deserializer<'de>,
{
    let val: serde_json::Value = serde_json::Value::deserialize(deserializer)?;
    match val {
        serde_json::Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom("tab id must be an integer")),
        serde_json::Value::String(s) => s.trim().parse::<TabId>().map_err(serde::de::Error::custom),
        _ => Err(serde::de::Error::custom("expected string or number for tab id")),
    }
}

pub fn deserialize_optional_tab_id<'de, D>(deserializer: D) -> Result<Option<TabId>, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    match val {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("tab id must be an integer")),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<TabId>()
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(_) => Err(serde::de::Error::custom(
            "expected string or number for tab id",
        )),
    }
}
