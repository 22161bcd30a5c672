//! Local fallback verdict for pages that have no remote assessment.

use crate::{FormSummary, PageMeta, Safety, TabRecord};

const SUSPICIOUS_FORM_COUNT: usize = 3;

pub fn derive_status(meta: &PageMeta, forms: &[FormSummary]) -> Safety {
    let has_password = forms.iter().any(|form| form.has_password_field);

    if !meta.is_https && has_password {
        return Safety::Unsafe;
    }
    if !meta.is_https {
        return Safety::Suspicious;
    }
    if has_password || forms.len() > SUSPICIOUS_FORM_COUNT {
        return Safety::Suspicious;
    }
    Safety::Safe
}

/// What the display surface should show for a `GET_SCAN` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    NoData,
    Loading,
    Failed(String),
    Assessed {
        safety: Safety,
        confidence: u8,
        reasons: Vec<String>,
    },
    Heuristic(Safety),
}

impl Verdict {
    pub fn status_text(&self) -> &str {
        match self {
            Verdict::NoData => "No data yet",
            Verdict::Loading => "Loading",
            Verdict::Failed(_) => "Assessment failed",
            Verdict::Assessed { safety, .. } | Verdict::Heuristic(safety) => safety.label(),
        }
    }
}

pub fn verdict_for(record: Option<&TabRecord>) -> Verdict {
    let Some(record) = record else {
        return Verdict::NoData;
    };
    if record.loading {
        return Verdict::Loading;
    }
    if let Some(assessment) = &record.assessment {
        return Verdict::Assessed {
            safety: assessment.safety,
            confidence: assessment.confidence,
            reasons: assessment.reasons.clone(),
        };
    }
    if let Some(error) = &record.error {
        return Verdict::Failed(error.clone());
    }
    Verdict::Heuristic(derive_status(&record.scan.meta, &record.scan.forms))
}
