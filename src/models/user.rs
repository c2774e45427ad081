use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Organization,
    Freelancer,
    Maintainer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Organization => "organization",
            Role::Freelancer => "freelancer",
            Role::Maintainer => "maintainer",
        }
    }

    /// Admin and maintainer accounts are provisioned internally.
    pub fn is_self_service(&self) -> bool {
        matches!(self, Role::Organization | Role::Freelancer)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "organization" => Ok(Role::Organization),
            "freelancer" => Ok(Role::Freelancer),
            "maintainer" => Ok(Role::Maintainer),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// Role-specific profile written alongside the account row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewProfile {
    Organization {
        organization_name: String,
        phone: Option<String>,
        website: Option<String>,
    },
    Freelancer {
        phone: Option<String>,
        headline: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub profile: NewProfile,
}

#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}
