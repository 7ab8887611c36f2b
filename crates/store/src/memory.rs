//! In-memory token store backed by a `HashMap` behind a `Mutex`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use vesta_types::{Result, TokenKey, TokenStore};

/// An in-memory [`TokenStore`] implementation for testing and ephemeral use.
#[derive(Default)]
pub struct InMemoryTokenStore {
    data: Mutex<HashMap<TokenKey, String>>,
}

impl InMemoryTokenStore {
    /// Creates a new empty in-memory token store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TokenKey, String>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get(&self, key: TokenKey) -> Result<Option<String>> {
        Ok(self.lock().get(&key).cloned())
    }

    async fn set(&self, key: TokenKey, value: &str) -> Result<()> {
        self.lock().insert(key, value.to_string());
        Ok(())
    }

    async fn remove(&self, key: TokenKey) -> Result<()> {
        self.lock().remove(&key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = InMemoryTokenStore::new();
        store.set(TokenKey::AccessToken, "access").await.unwrap();
        assert_eq!(
            store.get(TokenKey::AccessToken).await.unwrap().as_deref(),
            Some("access")
        );
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = InMemoryTokenStore::new();
        assert!(store.get(TokenKey::RefreshToken).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overwrite() {
        let store = InMemoryTokenStore::new();
        store.set(TokenKey::AccessToken, "first").await.unwrap();
        store.set(TokenKey::AccessToken, "second").await.unwrap();
        assert_eq!(
            store.get(TokenKey::AccessToken).await.unwrap().as_deref(),
            Some("second")
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let store = InMemoryTokenStore::new();
        store.set(TokenKey::AccessToken, "a").await.unwrap();
        store.set(TokenKey::RefreshToken, "r").await.unwrap();
        store.remove(TokenKey::AccessToken).await.unwrap();
        assert!(store.get(TokenKey::AccessToken).await.unwrap().is_none());
        store.clear().await.unwrap();
        assert!(store.is_empty());
    }
}
