//! API response DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::{IdentityProvider, User};

/// Current user response
///
/// Identity payloads are not exposed, only which accounts are linked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUserResponse {
    pub id: String,
    pub is_onboarding: bool,
    pub is_managing: bool,
    pub is_joining: bool,
    pub identities: Vec<IdentitySummary>,
}

/// Linked provider account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySummary {
    pub provider: IdentityProvider,
    pub id: String,
    pub verified_at: DateTime<Utc>,
}

impl From<&User> for CurrentUserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            is_onboarding: user.is_onboarding,
            is_managing: user.is_managing,
            is_joining: user.is_joining,
            identities: user
                .identities
                .iter()
                .map(|identity| IdentitySummary {
                    provider: identity.provider(),
                    id: identity.id.clone(),
                    verified_at: identity.verified_at,
                })
                .collect(),
        }
    }
}
