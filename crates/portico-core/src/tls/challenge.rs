use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

/// Path prefix of HTTP-01 challenge requests
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Pending HTTP-01 challenges, token to key authorization.
///
/// Shared between the certificate authority, which publishes tokens while an order is being
/// validated, and the plaintext listener, which serves them.
#[derive(Debug, Clone, Default)]
pub struct ChallengeStore {
    tokens: Arc<RwLock<HashMap<String, String>>>,
}

impl ChallengeStore {
    pub fn new() -> Self {
        ChallengeStore::default()
    }

    pub fn insert(&self, token: impl Into<String>, key_authorization: impl Into<String>) {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.insert(token.into(), key_authorization.into());
        }
    }

    pub fn get(&self, token: &str) -> Option<String> {
        self.tokens.read().ok()?.get(token).cloned()
    }

    pub fn remove(&self, token: &str) {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.remove(token);
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.read().map(|t| t.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
