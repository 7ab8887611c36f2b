//! Single owner of the session tokens.
//!
//! Responsibilities:
//! - Hydrate tokens from a [`TokenStore`] and mirror every change back to it.
//! - Hand out a usable bearer token, refreshing transparently when expired.
//! - Guarantee at most one refresh exchange in flight; concurrent callers
//!   queue as waiters and all receive that exchange's outcome.
//! - Broadcast freshly issued tokens to interested parties (the stream layer).
//!
//! All state lives behind one `std::sync::Mutex` that is never held across an
//! `.await`. The `refreshing` flag, the waiter queue and the tokens are only
//! touched under that lock, and the waiter queue is drained in the same
//! critical section that clears the flag.

use crate::exchange::TokenExchanger;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use vesta_config::AuthConfig;
use vesta_types::{
    HttpTransport, NetworkError, Result, TokenKey, TokenResponse, TokenSet, TokenState,
    TokenStore,
};

/// Capacity of the refreshed-token broadcast channel.
const REFRESH_BROADCAST_CAPACITY: usize = 16;

type Waiter = oneshot::Sender<Result<String>>;

enum Begin {
    Ready(String),
    Join(oneshot::Receiver<Result<String>>),
    Lead(Option<String>),
}

#[derive(Default)]
struct AuthorityState {
    tokens: TokenSet,
    refreshing: bool,
    waiters: Vec<Waiter>,
}

/// Owns the session tokens and coalesces refreshes.
pub struct TokenAuthority {
    store: Arc<dyn TokenStore>,
    exchanger: TokenExchanger,
    leeway: Duration,
    state: Mutex<AuthorityState>,
    /// Serializes writes to the durable store.
    persist: tokio::sync::Mutex<()>,
    refreshed: broadcast::Sender<String>,
}

impl TokenAuthority {
    /// Creates an authority with no tokens.
    pub fn new(
        store: Arc<dyn TokenStore>,
        transport: Arc<dyn HttpTransport>,
        token_url: impl Into<String>,
        config: &AuthConfig,
    ) -> Self {
        let (refreshed, _) = broadcast::channel(REFRESH_BROADCAST_CAPACITY);
        Self {
            store,
            exchanger: TokenExchanger::new(transport, token_url, config.client_id.clone()),
            leeway: config.refresh_leeway(),
            state: Mutex::new(AuthorityState::default()),
            persist: tokio::sync::Mutex::new(()),
            refreshed,
        }
    }

    /// Creates an authority and hydrates it from `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn load(
        store: Arc<dyn TokenStore>,
        transport: Arc<dyn HttpTransport>,
        token_url: impl Into<String>,
        config: &AuthConfig,
    ) -> Result<Self> {
        let authority = Self::new(Arc::clone(&store), transport, token_url, config);
        let expires_at = match store.get(TokenKey::ExpiresAt).await? {
            Some(raw) => raw.parse::<u64>().map(Some).unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "ignoring unparseable stored expiry");
                None
            }),
            None => None,
        };
        let tokens = TokenSet {
            access_token: store.get(TokenKey::AccessToken).await?,
            refresh_token: store.get(TokenKey::RefreshToken).await?,
            identity_token: store.get(TokenKey::IdentityToken).await?,
            expires_at,
        };
        tracing::debug!(
            has_access = tokens.access_token.is_some(),
            has_refresh = tokens.refresh_token.is_some(),
            "loaded session tokens"
        );
        authority.lock().tokens = tokens;
        Ok(authority)
    }

    fn lock(&self) -> MutexGuard<'_, AuthorityState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return a usable bearer token, refreshing first if it has expired.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Unauthorized`] if there is no session or the
    /// refresh is rejected, or the refresh exchange's transport error.
    pub async fn current_token(&self) -> Result<String> {
        match self.begin(true) {
            Begin::Ready(token) => Ok(token),
            Begin::Join(rx) => rx.await.unwrap_or(Err(NetworkError::Cancelled)),
            Begin::Lead(refresh_token) => self.lead(refresh_token).await,
        }
    }

    /// Refresh the session, joining an in-flight refresh if there is one.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Unauthorized`] (after clearing every token) if
    /// there is no refresh token or the identity endpoint rejects it. A
    /// transport failure is returned as-is and leaves the tokens untouched.
    pub async fn refresh(&self) -> Result<String> {
        match self.begin(false) {
            Begin::Ready(token) => Ok(token),
            Begin::Join(rx) => rx.await.unwrap_or(Err(NetworkError::Cancelled)),
            Begin::Lead(refresh_token) => self.lead(refresh_token).await,
        }
    }

    /// Decide, in one critical section, whether the caller can use the
    /// current token, must join the in-flight refresh, or leads a new one.
    fn begin(&self, reuse_valid: bool) -> Begin {
        let mut st = self.lock();
        if reuse_valid
            && st.tokens.state(self.leeway) == TokenState::Valid
            && let Some(bearer) = st.tokens.bearer()
        {
            return Begin::Ready(bearer.to_string());
        }
        if st.refreshing {
            let (tx, rx) = oneshot::channel();
            st.waiters.push(tx);
            tracing::debug!(queued = st.waiters.len(), "joining in-flight token refresh");
            return Begin::Join(rx);
        }
        st.refreshing = true;
        Begin::Lead(st.tokens.refresh_token.clone())
    }

    /// Run the exchange as the refresh leader and fan the outcome out.
    async fn lead(&self, refresh_token: Option<String>) -> Result<String> {
        let mut guard = InFlight {
            authority: self,
            armed: true,
        };

        let outcome = match &refresh_token {
            Some(rt) => self.exchanger.exchange(rt).await,
            None => {
                tracing::info!("no refresh token available");
                Err(NetworkError::Unauthorized)
            }
        };

        let (result, waiters) = self.settle(outcome, refresh_token);
        guard.armed = false;

        match &result {
            Ok(_) => tracing::info!(waiters = waiters.len(), "token refresh succeeded"),
            Err(e) => tracing::warn!(error = %e, waiters = waiters.len(), "token refresh failed"),
        }
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }

        // Transport and decoding failures leave the tokens as they were.
        if matches!(result, Ok(_) | Err(NetworkError::Unauthorized)) {
            self.persist().await;
        }
        if let Ok(token) = &result {
            let _ = self.refreshed.send(token.clone());
        }
        result
    }

    /// Apply an exchange outcome, clear the flag and drain the waiters.
    fn settle(
        &self,
        outcome: Result<TokenResponse>,
        refresh_token: Option<String>,
    ) -> (Result<String>, Vec<Waiter>) {
        let mut st = self.lock();
        let result = match outcome {
            Ok(response) => {
                st.tokens = TokenSet::from_exchange(response, refresh_token);
                st.tokens
                    .bearer()
                    .map(str::to_string)
                    .ok_or(NetworkError::Unauthorized)
            }
            Err(NetworkError::Unauthorized) => {
                st.tokens = TokenSet::default();
                Err(NetworkError::Unauthorized)
            }
            Err(e) => Err(e),
        };
        st.refreshing = false;
        let waiters = std::mem::take(&mut st.waiters);
        (result, waiters)
    }

    /// Wipe every token, in memory and in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be cleared.
    pub async fn clear_tokens(&self) -> Result<()> {
        let _persist = self.persist.lock().await;
        self.lock().tokens = TokenSet::default();
        tracing::info!("session tokens cleared");
        self.store.clear().await
    }

    /// Install tokens obtained from an external sign-in.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn seed(&self, tokens: TokenSet) -> Result<()> {
        let _persist = self.persist.lock().await;
        self.lock().tokens = tokens.clone();
        write_snapshot(self.store.as_ref(), &tokens).await
    }

    /// Whether a usable or refreshable session exists.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.lock().tokens.state(self.leeway) != TokenState::Invalid
    }

    /// Subscribe to bearer tokens issued by successful refreshes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.refreshed.subscribe()
    }

    /// Mirror the latest in-memory snapshot to the store.
    async fn persist(&self) {
        let _persist = self.persist.lock().await;
        let snapshot = self.lock().tokens.clone();
        if let Err(e) = write_snapshot(self.store.as_ref(), &snapshot).await {
            tracing::warn!(error = %e, "failed to persist session tokens");
        }
    }
}

async fn write_snapshot(store: &dyn TokenStore, tokens: &TokenSet) -> Result<()> {
    if *tokens == TokenSet::default() {
        return store.clear().await;
    }
    let expires_at = tokens.expires_at.map(|t| t.to_string());
    let values = [
        (TokenKey::AccessToken, tokens.access_token.as_deref()),
        (TokenKey::RefreshToken, tokens.refresh_token.as_deref()),
        (TokenKey::IdentityToken, tokens.identity_token.as_deref()),
        (TokenKey::ExpiresAt, expires_at.as_deref()),
    ];
    for (key, value) in values {
        match value {
            Some(v) => store.set(key, v).await?,
            None => store.remove(key).await?,
        }
    }
    Ok(())
}

/// Releases the refresh slot if the initiating future is dropped mid-exchange,
/// so queued waiters are not left hanging.
struct InFlight<'a> {
    authority: &'a TokenAuthority,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let waiters = {
            let mut st = self.authority.lock();
            st.refreshing = false;
            std::mem::take(&mut st.waiters)
        };
        tracing::debug!(waiters = waiters.len(), "token refresh abandoned");
        for waiter in waiters {
            let _ = waiter.send(Err(NetworkError::Cancelled));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vesta_store::InMemoryTokenStore;
    use vesta_types::testutil::ScriptedTransport;
    use vesta_types::token::unix_now;

    const TOKEN_URL: &str = "https://api.test/v1/auth/token";

    fn expired(refresh: Option<&str>) -> TokenSet {
        TokenSet {
            access_token: Some("old".into()),
            refresh_token: refresh.map(String::from),
            identity_token: None,
            expires_at: Some(unix_now().saturating_sub(100)),
        }
    }

    fn granted(access: &str) -> serde_json::Value {
        json!({
            "access_token": access,
            "refresh_token": "rt-2",
            "token_type": "Bearer",
            "expires_in": 3600
        })
    }

    fn make(
        transport: &Arc<ScriptedTransport>,
        store: &Arc<InMemoryTokenStore>,
    ) -> Arc<TokenAuthority> {
        Arc::new(TokenAuthority::new(
            Arc::clone(store) as Arc<dyn TokenStore>,
            Arc::clone(transport) as Arc<dyn HttpTransport>,
            TOKEN_URL,
            &AuthConfig::default(),
        ))
    }

    async fn wait_for_waiters(authority: &TokenAuthority, n: usize) {
        while authority.lock().waiters.len() < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_current_token_valid_skips_network() {
        let transport = Arc::new(ScriptedTransport::new());
        let store = Arc::new(InMemoryTokenStore::new());
        let auth = make(&transport, &store);
        auth.seed(TokenSet::new("valid").with_expiry(3600))
            .await
            .unwrap();
        assert_eq!(auth.current_token().await.unwrap(), "valid");
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_current_token_prefers_identity_token() {
        let transport = Arc::new(ScriptedTransport::new());
        let store = Arc::new(InMemoryTokenStore::new());
        let auth = make(&transport, &store);
        auth.seed(TokenSet::new("access").with_identity("identity"))
            .await
            .unwrap();
        assert_eq!(auth.current_token().await.unwrap(), "identity");
    }

    #[tokio::test]
    async fn test_current_token_expired_refreshes() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(200, &granted("fresh"));
        let store = Arc::new(InMemoryTokenStore::new());
        let auth = make(&transport, &store);
        auth.seed(expired(Some("rt-1"))).await.unwrap();

        assert_eq!(auth.current_token().await.unwrap(), "fresh");
        assert_eq!(transport.calls(), 1);
        assert_eq!(
            store.get(TokenKey::AccessToken).await.unwrap().as_deref(),
            Some("fresh")
        );
        assert_eq!(
            store.get(TokenKey::RefreshToken).await.unwrap().as_deref(),
            Some("rt-2")
        );
    }

    #[tokio::test]
    async fn test_single_flight_refresh() {
        let (transport, gate) = ScriptedTransport::gated();
        let transport = Arc::new(transport);
        transport.push_json(200, &granted("shared"));
        let store = Arc::new(InMemoryTokenStore::new());
        let auth = make(&transport, &store);
        auth.seed(expired(Some("rt-1"))).await.unwrap();

        let callers: Vec<_> = (0..8)
            .map(|_| {
                let auth = Arc::clone(&auth);
                tokio::spawn(async move { auth.current_token().await })
            })
            .collect();

        wait_for_waiters(&auth, 7).await;
        gate.add_permits(1);

        for caller in callers {
            assert_eq!(caller.await.unwrap().unwrap(), "shared");
        }
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_never_exchange_twice() {
        for _ in 0..50 {
            // One scripted grant; a second exchange would hit an exhausted script.
            let transport = Arc::new(ScriptedTransport::new());
            transport.push_json(200, &granted("fresh"));
            let store = Arc::new(InMemoryTokenStore::new());
            let auth = make(&transport, &store);
            auth.seed(expired(Some("rt-1"))).await.unwrap();

            let callers: Vec<_> = (0..16)
                .map(|_| {
                    let auth = Arc::clone(&auth);
                    tokio::spawn(async move { auth.current_token().await })
                })
                .collect();
            for caller in callers {
                assert_eq!(caller.await.unwrap().unwrap(), "fresh");
            }
            assert_eq!(transport.calls(), 1);
        }
    }

    #[tokio::test]
    async fn test_single_flight_shares_failure() {
        let (transport, gate) = ScriptedTransport::gated();
        let transport = Arc::new(transport);
        transport.push_json(401, &json!({"error": "invalid_grant", "message": "revoked"}));
        let store = Arc::new(InMemoryTokenStore::new());
        let auth = make(&transport, &store);
        auth.seed(expired(Some("rt-1"))).await.unwrap();

        let callers: Vec<_> = (0..4)
            .map(|_| {
                let auth = Arc::clone(&auth);
                tokio::spawn(async move { auth.refresh().await })
            })
            .collect();
        wait_for_waiters(&auth, 3).await;
        gate.add_permits(1);

        for caller in callers {
            assert_eq!(caller.await.unwrap().unwrap_err(), NetworkError::Unauthorized);
        }
        assert_eq!(transport.calls(), 1);
        assert!(!auth.is_authenticated());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_after_resolution_starts_new_cycle() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(200, &granted("first"));
        transport.push_json(200, &granted("second"));
        let store = Arc::new(InMemoryTokenStore::new());
        let auth = make(&transport, &store);
        auth.seed(expired(Some("rt-1"))).await.unwrap();

        assert_eq!(auth.refresh().await.unwrap(), "first");
        assert!(auth.lock().waiters.is_empty());
        assert!(!auth.lock().refreshing);
        assert_eq!(auth.refresh().await.unwrap(), "second");
        assert_eq!(transport.calls(), 2);
        // second exchange used the rotated refresh token
        let body = match &transport.requests()[1].request.body {
            Some(vesta_types::RequestBody::Bytes(b)) => b.clone(),
            other => panic!("unexpected body {other:?}"),
        };
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["refresh_token"], "rt-2");
    }

    #[tokio::test]
    async fn test_missing_refresh_token_clears_and_is_unauthorized() {
        let transport = Arc::new(ScriptedTransport::new());
        let store = Arc::new(InMemoryTokenStore::new());
        let auth = make(&transport, &store);
        auth.seed(expired(None)).await.unwrap();

        assert_eq!(auth.refresh().await.unwrap_err(), NetworkError::Unauthorized);
        assert_eq!(transport.calls(), 0);
        assert_eq!(auth.lock().tokens, TokenSet::default());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_tokens() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(Err(NetworkError::NoConnection("offline".into())));
        let store = Arc::new(InMemoryTokenStore::new());
        let auth = make(&transport, &store);
        auth.seed(expired(Some("rt-1"))).await.unwrap();

        let err = auth.refresh().await.unwrap_err();
        assert!(matches!(err, NetworkError::NoConnection(_)));
        assert_eq!(auth.lock().tokens.refresh_token.as_deref(), Some("rt-1"));
        assert!(auth.is_authenticated());
    }

    #[tokio::test]
    async fn test_abandoned_refresh_releases_waiters() {
        let (transport, _gate) = ScriptedTransport::gated();
        let transport = Arc::new(transport);
        let store = Arc::new(InMemoryTokenStore::new());
        let auth = make(&transport, &store);
        auth.seed(expired(Some("rt-1"))).await.unwrap();

        let initiator = {
            let auth = Arc::clone(&auth);
            tokio::spawn(async move { auth.refresh().await })
        };
        let waiter = {
            let auth = Arc::clone(&auth);
            tokio::spawn(async move { auth.refresh().await })
        };
        wait_for_waiters(&auth, 1).await;
        initiator.abort();

        assert_eq!(waiter.await.unwrap().unwrap_err(), NetworkError::Cancelled);
        assert!(!auth.lock().refreshing);
    }

    #[tokio::test]
    async fn test_subscribe_receives_refreshed_token() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(200, &granted("pushed"));
        let store = Arc::new(InMemoryTokenStore::new());
        let auth = make(&transport, &store);
        auth.seed(expired(Some("rt-1"))).await.unwrap();
        let mut rx = auth.subscribe();

        auth.refresh().await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "pushed");
    }

    #[tokio::test]
    async fn test_load_hydrates_from_store() {
        let store = Arc::new(InMemoryTokenStore::new());
        store.set(TokenKey::AccessToken, "stored").await.unwrap();
        store.set(TokenKey::RefreshToken, "rt").await.unwrap();
        store
            .set(TokenKey::ExpiresAt, &(unix_now() + 3600).to_string())
            .await
            .unwrap();
        let transport = Arc::new(ScriptedTransport::new());

        let auth = TokenAuthority::load(
            Arc::clone(&store) as Arc<dyn TokenStore>,
            transport as Arc<dyn HttpTransport>,
            TOKEN_URL,
            &AuthConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(auth.current_token().await.unwrap(), "stored");
    }

    #[tokio::test]
    async fn test_clear_tokens() {
        let transport = Arc::new(ScriptedTransport::new());
        let store = Arc::new(InMemoryTokenStore::new());
        let auth = make(&transport, &store);
        auth.seed(TokenSet::new("a").with_refresh("r")).await.unwrap();
        assert!(!store.is_empty());

        auth.clear_tokens().await.unwrap();
        assert!(store.is_empty());
        assert!(!auth.is_authenticated());
        assert_eq!(auth.current_token().await.unwrap_err(), NetworkError::Unauthorized);
    }
}
