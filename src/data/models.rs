//! Data models
//!
//! Plain records persisted in the keyed record store. Persistence lives in
//! [`super::Repository`]; these types only know their key prefix.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// A record type stored under `"<PREFIX>:<key>"`.
pub trait Record: Serialize + serde::de::DeserializeOwned + Send + Sync {
    /// Key namespace for this record type
    const PREFIX: &'static str;

    /// Key suffix identifying this instance
    fn key(&self) -> String;
}

// =============================================================================
// Identity Provider
// =============================================================================

/// Supported identity providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityProvider {
    Discord,
    GitHub,
}

impl IdentityProvider {
    /// Every supported provider.
    pub const ALL: [IdentityProvider; 2] = [IdentityProvider::Discord, IdentityProvider::GitHub];

    /// Get the provider identifier string.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityProvider::Discord => "discord",
            IdentityProvider::GitHub => "github",
        }
    }

    /// Decode a raw profile response into this provider's payload shape.
    ///
    /// # Errors
    /// Returns `Provider` if the profile lacks the fields the provider
    /// guarantees (at least a usable `id`).
    pub fn decode_profile(&self, raw: serde_json::Value) -> Result<IdentityPayload, AppError> {
        let decoded = match self {
            IdentityProvider::Discord => {
                serde_json::from_value::<DiscordProfile>(raw).map(IdentityPayload::Discord)
            }
            IdentityProvider::GitHub => {
                serde_json::from_value::<GitHubProfile>(raw).map(IdentityPayload::GitHub)
            }
        };

        decoded.map_err(|e| AppError::Provider(format!("{self} profile is malformed: {e}")))
    }
}

impl fmt::Display for IdentityProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentityProvider {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|provider| provider.as_str() == s)
            .ok_or(AppError::NotFound)
    }
}

// =============================================================================
// Provider Payloads
// =============================================================================

/// Discord `GET /users/@me` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscordProfile {
    pub id: String,
    pub username: String,
    pub discriminator: Option<String>,
    pub global_name: Option<String>,
    pub avatar: Option<String>,
    /// Remaining fields as returned by Discord
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// GitHub `GET /user` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitHubProfile {
    pub id: u64,
    pub login: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    /// Remaining fields as returned by GitHub
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Provider-shaped profile data, tagged by provider
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityPayload {
    Discord(DiscordProfile),
    GitHub(GitHubProfile),
}

impl IdentityPayload {
    pub fn provider(&self) -> IdentityProvider {
        match self {
            IdentityPayload::Discord(_) => IdentityProvider::Discord,
            IdentityPayload::GitHub(_) => IdentityProvider::GitHub,
        }
    }

    /// Provider-scoped account identifier.
    pub fn account_id(&self) -> String {
        match self {
            IdentityPayload::Discord(profile) => profile.id.clone(),
            IdentityPayload::GitHub(profile) => profile.id.to_string(),
        }
    }

    /// Encode back into the provider's raw profile shape.
    ///
    /// # Errors
    /// Returns `Internal` if a profile field cannot be represented as JSON
    pub fn encode(&self) -> Result<serde_json::Value, AppError> {
        let encoded = match self {
            IdentityPayload::Discord(profile) => serde_json::to_value(profile),
            IdentityPayload::GitHub(profile) => serde_json::to_value(profile),
        };
        encoded.map_err(|e| AppError::Internal(e.into()))
    }
}

// =============================================================================
// Identity Record
// =============================================================================

/// One verified link between a user and a provider account
///
/// Stored as `{id, provider, verifiedAt, data}`; `data` is decoded through
/// [`IdentityProvider::decode_profile`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "StoredIdentity")]
pub struct IdentityRecord {
    /// Provider-scoped account ID
    pub id: String,
    pub verified_at: DateTime<Utc>,
    pub payload: IdentityPayload,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredIdentity {
    id: String,
    provider: IdentityProvider,
    verified_at: DateTime<Utc>,
    data: serde_json::Value,
}

impl TryFrom<StoredIdentity> for IdentityRecord {
    type Error = AppError;

    fn try_from(stored: StoredIdentity) -> Result<Self, Self::Error> {
        Ok(Self {
            id: stored.id,
            verified_at: stored.verified_at,
            payload: stored.provider.decode_profile(stored.data)?,
        })
    }
}

impl Serialize for IdentityRecord {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        StoredIdentity {
            id: self.id.clone(),
            provider: self.provider(),
            verified_at: self.verified_at,
            data: self.payload.encode().map_err(serde::ser::Error::custom)?,
        }
        .serialize(serializer)
    }
}

impl IdentityRecord {
    /// Build a record from a freshly fetched profile.
    pub fn verified(payload: IdentityPayload, verified_at: DateTime<Utc>) -> Self {
        Self {
            id: payload.account_id(),
            verified_at,
            payload,
        }
    }

    pub fn provider(&self) -> IdentityProvider {
        self.payload.provider()
    }
}

// =============================================================================
// User
// =============================================================================

/// Internal user aggregating linked identities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Stable internal ID (the first linked account's ID)
    pub id: String,
    /// Random session secret; rotating it revokes every session
    #[serde(rename = "sessionKey")]
    pub session_secret: String,
    pub is_onboarding: bool,
    pub is_managing: bool,
    pub is_joining: bool,
    #[serde(default)]
    pub identities: Vec<IdentityRecord>,
}

impl User {
    /// Create a user that has not linked any identity yet.
    pub fn new(id: String) -> Self {
        Self {
            id,
            session_secret: generate_session_secret(),
            is_onboarding: true,
            is_managing: false,
            is_joining: false,
            identities: Vec::new(),
        }
    }

    /// Find the identity for a provider account.
    pub fn identity(&self, provider: IdentityProvider, id: &str) -> Option<&IdentityRecord> {
        self.identities
            .iter()
            .find(|identity| identity.provider() == provider && identity.id == id)
    }

    /// Merge a verified identity into this user.
    ///
    /// An existing `(provider, id)` link is refreshed in place; otherwise the
    /// record is appended. Returns `true` when a new link was added.
    pub fn upsert_identity(&mut self, record: IdentityRecord) -> bool {
        let provider = record.provider();
        match self
            .identities
            .iter_mut()
            .find(|identity| identity.provider() == provider && identity.id == record.id)
        {
            Some(existing) => {
                existing.verified_at = record.verified_at;
                existing.payload = record.payload;
                false
            }
            None => {
                self.identities.push(record);
                true
            }
        }
    }

    /// Replace the session secret, invalidating all outstanding sessions.
    pub fn rotate_session_secret(&mut self) {
        self.session_secret = generate_session_secret();
    }
}

impl Record for User {
    const PREFIX: &'static str = "user";

    fn key(&self) -> String {
        self.id.clone()
    }
}

/// Index entry mapping a provider account to the user that owns it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityLink {
    pub provider: IdentityProvider,
    pub account_id: String,
    pub user_id: String,
}

impl IdentityLink {
    /// Key of the index entry for a provider account.
    pub fn record_key(provider: IdentityProvider, account_id: &str) -> String {
        format!("{provider}:{account_id}")
    }
}

impl Record for IdentityLink {
    const PREFIX: &'static str = "identity";

    fn key(&self) -> String {
        Self::record_key(self.provider, &self.account_id)
    }
}

fn generate_session_secret() -> String {
    let mut bytes = [0_u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
