//! Reconciliation status of a versioned resource.

use serde::{Deserialize, Serialize};

/// Status of a versioned resource's local content.
///
/// `Ready` and `Failed` are stable; `Updating` is transient and is always
/// backed by a sync guard admission while it lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    #[default]
    Ready,
    Updating,
    Failed,
}

impl VersionStatus {
    pub fn is_updating(&self) -> bool {
        matches!(self, VersionStatus::Updating)
    }

    /// Whether the status is one a resource can rest in indefinitely.
    pub fn is_stable(&self) -> bool {
        !self.is_updating()
    }
}

impl std::fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionStatus::Ready => write!(f, "ready"),
            VersionStatus::Updating => write!(f, "updating"),
            VersionStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for VersionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ready" => Ok(VersionStatus::Ready),
            "updating" => Ok(VersionStatus::Updating),
            "failed" => Ok(VersionStatus::Failed),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}
