use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Deployment state as reported by either registry.
///
/// Unrecognized status strings are kept verbatim in `Unknown` so the health
/// classifier can fail open to a cautionary state instead of guessing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Active,
    Running,
    Deploying,
    Error,
    Inactive,
    #[serde(untagged)]
    Unknown(String),
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => "active",
            Self::Running => "running",
            Self::Deploying => "deploying",
            Self::Error => "error",
            Self::Inactive => "inactive",
            Self::Unknown(raw) => raw.as_str(),
        }
    }

    /// Lenient parse used at the store edge: never fails, unknown strings
    /// are preserved.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Self::Active,
            "running" => Self::Running,
            "deploying" => Self::Deploying,
            "error" | "failed" => Self::Error,
            "inactive" => Self::Inactive,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which of the two parallel registries a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Registry {
    Fleet,
    Instance,
}

impl std::fmt::Display for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fleet => write!(f, "fleet"),
            Self::Instance => write!(f, "instance"),
        }
    }
}

/// Primary ("fleet") registry row. Business identifiers are nullable; only
/// the row key is guaranteed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetRecord {
    #[serde(rename = "id")]
    pub row_id: Uuid,
    pub deployment_id: Option<String>,
    /// Secondary identifier assigned by the provisioning path.
    pub droplet_id: Option<String>,
    pub provider: Option<String>,
    pub ip_address: Option<String>,
    pub status: DeploymentStatus,
    pub updated_at: DateTime<Utc>,
}

/// Legacy/backup ("instance") registry row, possibly referencing the same
/// physical host as a fleet row under a different identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    #[serde(rename = "id")]
    pub row_id: Uuid,
    /// Link back to the fleet deployment this instance mirrors, when known.
    pub linked_deployment_id: Option<String>,
    pub provider: Option<String>,
    pub ip_address: Option<String>,
    pub status: DeploymentStatus,
    pub updated_at: DateTime<Utc>,
}
