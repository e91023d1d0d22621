//! Normalized vendor job status.
//!
//! Both the status poller and the webhook receiver translate vendor
//! payloads into a [`StatusReport`], so the completion path never sees
//! vendor field names.

use serde::{Deserialize, Serialize};

/// Logical state of a vendor job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VendorState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl VendorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, VendorState::Succeeded | VendorState::Failed)
    }

    /// Parse a vendor status string, accepting the spellings seen across
    /// the status endpoint and the per-kind webhook payloads.
    pub fn parse_loose(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "QUEUED" | "PENDING" | "SUBMITTED" | "WAITING" => Some(VendorState::Queued),
            "RUNNING" | "PROCESSING" | "IN_PROGRESS" | "GENERATING" => Some(VendorState::Running),
            "SUCCEEDED" | "SUCCESS" | "COMPLETED" | "DONE" => Some(VendorState::Succeeded),
            "FAILED" | "FAILURE" | "ERROR" | "CANCELLED" | "CANCELED" => Some(VendorState::Failed),
            _ => None,
        }
    }
}

/// An output produced by the vendor, still hosted on its transient URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorArtifact {
    pub url: String,
    #[serde(default)]
    pub seed: Option<i64>,
}

/// Normalized `{state, progress, artifacts, error}` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: VendorState,
    /// 0-100 when the vendor reports it.
    pub progress: Option<u8>,
    pub artifacts: Vec<VendorArtifact>,
    pub error_reason: Option<String>,
}

impl StatusReport {
    pub fn running(progress: Option<u8>) -> Self {
        Self {
            state: VendorState::Running,
            progress,
            artifacts: Vec::new(),
            error_reason: None,
        }
    }

    pub fn queued() -> Self {
        Self {
            state: VendorState::Queued,
            progress: None,
            artifacts: Vec::new(),
            error_reason: None,
        }
    }

    pub fn succeeded(artifacts: Vec<VendorArtifact>) -> Self {
        Self {
            state: VendorState::Succeeded,
            progress: Some(100),
            artifacts,
            error_reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            state: VendorState::Failed,
            progress: None,
            artifacts: Vec::new(),
            error_reason: Some(reason.into()),
        }
    }

    /// The terminal signal carried by this report, if the job is done.
    pub fn terminal(&self) -> Option<TerminalSignal> {
        match self.state {
            VendorState::Succeeded => Some(TerminalSignal::Succeeded {
                artifacts: self.artifacts.clone(),
            }),
            VendorState::Failed => Some(TerminalSignal::Failed {
                reason: self
                    .error_reason
                    .clone()
                    .unwrap_or_else(|| "Vendor reported failure".to_string()),
            }),
            VendorState::Queued | VendorState::Running => None,
        }
    }
}

/// A terminal outcome handed to the completion resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalSignal {
    Succeeded { artifacts: Vec<VendorArtifact> },
    Failed { reason: String },
}

/// Clamp a vendor progress value (possibly fractional or out of range)
/// into `0..=100`.
pub fn clamp_progress(raw: f64) -> Option<u8> {
    if raw.is_nan() {
        return None;
    }
    Some(raw.clamp(0.0, 100.0).round() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parse_loose_accepts_case_and_aliases() {
        assert_eq!(VendorState::parse_loose("succeeded"), Some(VendorState::Succeeded));
        assert_eq!(VendorState::parse_loose(" COMPLETED "), Some(VendorState::Succeeded));
        assert_eq!(VendorState::parse_loose("in_progress"), Some(VendorState::Running));
        assert_eq!(VendorState::parse_loose("Failed"), Some(VendorState::Failed));
        assert_eq!(VendorState::parse_loose("exploded"), None);
    }

    #[test]
    fn failed_report_without_reason_gets_default() {
        let report = StatusReport {
            error_reason: None,
            ..StatusReport::failed("x")
        };
        assert_matches!(
            report.terminal(),
            Some(TerminalSignal::Failed { reason }) if reason == "Vendor reported failure"
        );
    }

    #[test]
    fn running_report_is_not_terminal() {
        assert!(StatusReport::running(Some(40)).terminal().is_none());
        assert!(StatusReport::queued().terminal().is_none());
    }

    #[test]
    fn clamp_progress_bounds() {
        assert_eq!(clamp_progress(-3.0), Some(0));
        assert_eq!(clamp_progress(42.6), Some(43));
        assert_eq!(clamp_progress(180.0), Some(100));
        assert_eq!(clamp_progress(f64::NAN), None);
    }
}
