//! Account service
//!
//! Merges verified provider identities into users and persists them.
//!
//! The load → merge → save sequence is not a transaction. The identity
//! index entry is claimed first and the user record is written after it,
//! both with compare-and-swap against the bytes that were loaded. A
//! concurrent callback for the same user or the same provider account
//! fails with `Conflict` instead of silently dropping the other update or
//! attaching one account to two users. Nothing is retried.

use chrono::Utc;
use std::sync::Arc;

use crate::data::{
    IdentityLink, IdentityPayload, IdentityRecord, KeyValueStore, Record, Repository, User,
};
use crate::error::AppError;

/// Result of merging a verified identity
#[derive(Debug, Clone)]
pub struct LinkOutcome {
    pub user: User,
    /// A new user record was created
    pub created: bool,
    /// The identity was not linked to this user before
    pub newly_linked: bool,
}

/// Account operations over the record store
#[derive(Clone)]
pub struct AccountService {
    users: Repository<User>,
    links: Repository<IdentityLink>,
    link_to_current_session: bool,
}

impl AccountService {
    /// Create account service
    ///
    /// # Arguments
    /// * `store` - Keyed record store
    /// * `link_to_current_session` - Attach new provider accounts to the
    ///   user of the caller's session instead of creating a new user
    pub fn new(store: Arc<dyn KeyValueStore>, link_to_current_session: bool) -> Self {
        Self {
            users: Repository::new(store.clone()),
            links: Repository::new(store),
            link_to_current_session,
        }
    }

    pub fn users(&self) -> &Repository<User> {
        &self.users
    }

    /// Merge a freshly verified identity into its user and persist it.
    ///
    /// # Steps
    /// 1. Locate the owning user (see [`Self::locate_user`])
    /// 2. Refresh or append the `(provider, id)` identity
    /// 3. Claim the identity index entry (see [`Self::record_link`])
    /// 4. Save the user with compare-and-swap
    ///
    /// # Errors
    /// Returns `Conflict` if the user or the index entry changed between
    /// load and save
    pub async fn link_identity(
        &self,
        payload: IdentityPayload,
        session_user: Option<&User>,
    ) -> Result<LinkOutcome, AppError> {
        let provider = payload.provider();
        let account_id = payload.account_id();

        let (mut user, expected) = self
            .locate_user(&payload, session_user)
            .await?;
        let created = expected.is_none();

        let newly_linked = user.upsert_identity(IdentityRecord::verified(payload, Utc::now()));

        self.record_link(IdentityLink {
            provider,
            account_id: account_id.clone(),
            user_id: user.id.clone(),
        })
        .await?;
        self.users.save_if_unchanged(&user, expected).await?;

        tracing::info!(
            %provider,
            account_id = %account_id,
            user_id = %user.id,
            created,
            newly_linked,
            "Identity verified"
        );

        Ok(LinkOutcome {
            user,
            created,
            newly_linked,
        })
    }

    /// Find the user a verified identity belongs to.
    ///
    /// With session linking enabled, the identity index and then the
    /// caller's session user are consulted first. Otherwise the user keyed
    /// by the provider account ID is used, or a new one is created.
    ///
    /// # Returns
    /// The user and the stored bytes it was loaded from (`None` if new)
    async fn locate_user(
        &self,
        payload: &IdentityPayload,
        session_user: Option<&User>,
    ) -> Result<(User, Option<Vec<u8>>), AppError> {
        let account_id = payload.account_id();

        if self.link_to_current_session {
            let link_key = IdentityLink::record_key(payload.provider(), &account_id);
            if let Some(link) = self.links.get(&link_key).await? {
                if let Some(snapshot) = self.users.snapshot(&link.user_id).await? {
                    let (user, raw) = snapshot.into_parts();
                    return Ok((user, Some(raw)));
                }
            }

            if let Some(session_user) = session_user {
                if let Some(snapshot) = self.users.snapshot(&session_user.id).await? {
                    let (user, raw) = snapshot.into_parts();
                    return Ok((user, Some(raw)));
                }
            }
        }

        match self.users.snapshot(&account_id).await? {
            Some(snapshot) => {
                let (user, raw) = snapshot.into_parts();
                Ok((user, Some(raw)))
            }
            None => Ok((User::new(account_id), None)),
        }
    }

    /// Point the index entry of a provider account at `link.user_id`.
    ///
    /// A missing entry is created with compare-and-swap against "absent";
    /// an entry already naming the user is left alone. An entry naming
    /// another user is re-pointed only while session linking is disabled.
    ///
    /// # Errors
    /// Returns `Conflict` if another callback claimed the entry first, or
    /// if session linking is enabled and the account belongs to another user
    async fn record_link(&self, link: IdentityLink) -> Result<(), AppError> {
        let Some(snapshot) = self.links.snapshot(&link.key()).await? else {
            return self.links.save_if_unchanged(&link, None).await;
        };

        let (existing, raw) = snapshot.into_parts();
        if existing.user_id == link.user_id {
            return Ok(());
        }
        if self.link_to_current_session {
            tracing::warn!(
                provider = %link.provider,
                account_id = %link.account_id,
                owner = %existing.user_id,
                user_id = %link.user_id,
                "Identity is already linked to another user"
            );
            return Err(AppError::Conflict(format!(
                "{} account {} is linked to another user",
                link.provider, link.account_id
            )));
        }

        self.links.save_if_unchanged(&link, Some(raw)).await
    }

    /// Rotate a user's session secret, revoking every outstanding session.
    ///
    /// # Errors
    /// Returns `NotFound` if the user does not exist, `Conflict` if it
    /// changed concurrently
    pub async fn revoke_sessions(&self, user_id: &str) -> Result<User, AppError> {
        let (mut user, raw) = self
            .users
            .snapshot(user_id)
            .await?
            .ok_or(AppError::NotFound)?
            .into_parts();

        user.rotate_session_secret();
        self.users.save_if_unchanged(&user, Some(raw)).await?;

        tracing::info!(user_id = %user.id, "Session secret rotated");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{IdentityProvider, MemoryStore, MockKeyValueStore};
    use serde_json::json;

    fn discord(id: &str) -> IdentityPayload {
        IdentityProvider::Discord
            .decode_profile(json!({"id": id, "username": format!("user-{id}")}))
            .unwrap()
    }

    fn github(id: u64) -> IdentityPayload {
        IdentityProvider::GitHub
            .decode_profile(json!({"id": id, "login": format!("gh-{id}")}))
            .unwrap()
    }

    fn service(link_to_current_session: bool) -> (AccountService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (
            AccountService::new(store.clone(), link_to_current_session),
            store,
        )
    }

    #[tokio::test]
    async fn first_callback_creates_onboarding_user() {
        let (accounts, store) = service(false);

        let outcome = accounts.link_identity(discord("123"), None).await.unwrap();

        assert!(outcome.created);
        assert!(outcome.newly_linked);
        assert_eq!(outcome.user.id, "123");
        assert!(outcome.user.is_onboarding);
        assert_eq!(outcome.user.identities.len(), 1);
        assert!(
            outcome
                .user
                .identity(IdentityProvider::Discord, "123")
                .is_some()
        );

        assert_eq!(
            accounts.users().get("123").await.unwrap(),
            Some(outcome.user)
        );
        assert!(store.get("identity:discord:123").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn repeated_callback_refreshes_identity_in_place() {
        let (accounts, _store) = service(false);

        let first = accounts.link_identity(discord("123"), None).await.unwrap();
        let second = accounts.link_identity(discord("123"), None).await.unwrap();

        assert!(!second.created);
        assert!(!second.newly_linked);
        assert_eq!(second.user.identities.len(), 1);
        assert_eq!(second.user.session_secret, first.user.session_secret);
        assert!(second.user.identities[0].verified_at >= first.user.identities[0].verified_at);
    }

    #[tokio::test]
    async fn second_provider_creates_independent_user_without_linking() {
        let (accounts, _store) = service(false);
        let discord_user = accounts
            .link_identity(discord("123"), None)
            .await
            .unwrap()
            .user;

        let outcome = accounts
            .link_identity(github(456), Some(&discord_user))
            .await
            .unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.user.id, "456");
        let unchanged = accounts.users().get("123").await.unwrap().unwrap();
        assert_eq!(unchanged.identities.len(), 1);
    }

    #[tokio::test]
    async fn second_provider_links_to_session_user_when_enabled() {
        let (accounts, _store) = service(true);
        let discord_user = accounts
            .link_identity(discord("123"), None)
            .await
            .unwrap()
            .user;

        let outcome = accounts
            .link_identity(github(456), Some(&discord_user))
            .await
            .unwrap();

        assert!(!outcome.created);
        assert!(outcome.newly_linked);
        assert_eq!(outcome.user.id, "123");
        assert_eq!(outcome.user.identities.len(), 2);
        assert!(accounts.users().get("456").await.unwrap().is_none());

        // Later logins with the linked account find the same user without a session.
        let again = accounts.link_identity(github(456), None).await.unwrap();
        assert_eq!(again.user.id, "123");
        assert_eq!(again.user.identities.len(), 2);
    }

    #[tokio::test]
    async fn linking_never_moves_an_identity_owned_by_another_user() {
        let (accounts, _store) = service(true);
        let owner = accounts.link_identity(github(456), None).await.unwrap().user;
        let other = accounts.link_identity(discord("123"), None).await.unwrap().user;

        let outcome = accounts
            .link_identity(github(456), Some(&other))
            .await
            .unwrap();

        assert_eq!(outcome.user.id, owner.id);
        let other = accounts.users().get("123").await.unwrap().unwrap();
        assert_eq!(other.identities.len(), 1);
    }

    /// Store whose reads never see identity index entries, as if every
    /// callback raced another one that had not written its entry yet.
    struct StaleIndexStore(MemoryStore);

    #[async_trait::async_trait]
    impl KeyValueStore for StaleIndexStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
            if key.starts_with("identity:") {
                return Ok(None);
            }
            self.0.get(key).await
        }

        async fn put(&self, key: &str, value: Vec<u8>) -> Result<bool, AppError> {
            self.0.put(key, value).await
        }

        async fn compare_and_swap(
            &self,
            key: &str,
            expected: Option<Vec<u8>>,
            value: Vec<u8>,
        ) -> Result<bool, AppError> {
            self.0.compare_and_swap(key, expected, value).await
        }
    }

    #[tokio::test]
    async fn concurrent_link_of_one_account_to_two_users_conflicts() {
        let store = Arc::new(StaleIndexStore(MemoryStore::new()));
        let accounts = AccountService::new(store.clone(), true);
        let first = accounts.link_identity(discord("1"), None).await.unwrap().user;
        let second = accounts.link_identity(discord("2"), None).await.unwrap().user;

        let linked = accounts
            .link_identity(github(456), Some(&first))
            .await
            .unwrap();
        assert_eq!(linked.user.id, "1");

        let error = accounts
            .link_identity(github(456), Some(&second))
            .await
            .unwrap_err();
        assert!(matches!(error, AppError::Conflict(_)));

        let second = accounts.users().get("2").await.unwrap().unwrap();
        assert_eq!(second.identities.len(), 1);
        assert!(second.identity(IdentityProvider::GitHub, "456").is_none());

        let link = store.0.get("identity:github:456").await.unwrap().unwrap();
        let link: serde_json::Value = serde_json::from_slice(&link).unwrap();
        assert_eq!(link["userId"], "1");
    }

    #[tokio::test]
    async fn index_entry_is_repointed_when_linking_is_disabled() {
        let store = Arc::new(MemoryStore::new());
        let linking = AccountService::new(store.clone(), true);
        let owner = linking.link_identity(discord("123"), None).await.unwrap().user;
        linking
            .link_identity(github(456), Some(&owner))
            .await
            .unwrap();

        let plain = AccountService::new(store.clone(), false);
        let outcome = plain.link_identity(github(456), None).await.unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.user.id, "456");
        let link = stored_link(&store, "identity:github:456").await;
        assert_eq!(link.user_id, "456");
    }

    async fn stored_link(store: &MemoryStore, key: &str) -> IdentityLink {
        let raw = store.get(key).await.unwrap().unwrap();
        serde_json::from_slice(&raw).unwrap()
    }

    #[tokio::test]
    async fn lost_race_fails_without_retry() {
        let mut store = MockKeyValueStore::new();
        store.expect_get().times(2).returning(|_| Ok(None));
        store
            .expect_compare_and_swap()
            .withf(|key, expected, _| key == "identity:discord:123" && expected.is_none())
            .times(1)
            .returning(|_, _, _| Ok(true));
        store
            .expect_compare_and_swap()
            .withf(|key, expected, _| key == "user:123" && expected.is_none())
            .times(1)
            .returning(|_, _, _| Ok(false));
        store.expect_put().never();

        let accounts = AccountService::new(Arc::new(store), false);
        let error = accounts
            .link_identity(discord("123"), None)
            .await
            .unwrap_err();

        assert!(matches!(error, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn lost_index_claim_leaves_user_untouched() {
        let mut store = MockKeyValueStore::new();
        store.expect_get().times(2).returning(|_| Ok(None));
        store
            .expect_compare_and_swap()
            .withf(|key, expected, _| key == "identity:discord:123" && expected.is_none())
            .times(1)
            .returning(|_, _, _| Ok(false));
        store
            .expect_compare_and_swap()
            .withf(|key, _, _| key.starts_with("user:"))
            .never();
        store.expect_put().never();

        let accounts = AccountService::new(Arc::new(store), false);
        let error = accounts
            .link_identity(discord("123"), None)
            .await
            .unwrap_err();

        assert!(matches!(error, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn store_failure_propagates() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_get()
            .returning(|_| Err(AppError::Store("unavailable".to_string())));
        store.expect_compare_and_swap().never();
        store.expect_put().never();

        let accounts = AccountService::new(Arc::new(store), false);
        let error = accounts
            .link_identity(discord("123"), None)
            .await
            .unwrap_err();

        assert!(matches!(error, AppError::Store(_)));
    }

    #[tokio::test]
    async fn revoke_sessions_rotates_secret() {
        let (accounts, _store) = service(false);
        let user = accounts.link_identity(discord("123"), None).await.unwrap().user;

        let rotated = accounts.revoke_sessions("123").await.unwrap();

        assert_ne!(rotated.session_secret, user.session_secret);
        assert_eq!(
            accounts.users().get("123").await.unwrap().unwrap().session_secret,
            rotated.session_secret
        );
    }

    #[tokio::test]
    async fn revoke_sessions_for_missing_user_is_not_found() {
        let (accounts, _store) = service(false);
        assert!(matches!(
            accounts.revoke_sessions("nobody").await,
            Err(AppError::NotFound)
        ));
    }
}
