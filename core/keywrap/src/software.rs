//! Software key store adapter.
//!
//! Keeps platform keys in process memory and encrypts with
//! XChaCha20-Poly1305. It implements the full [`PlatformKeyStore`]
//! contract, including scripted prompt outcomes and injected faults, so the
//! bridge logic can be exercised without secure hardware.

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::platform::{KeyPolicy, PlatformKeyStore};
use sealvault_common::{Error, Result, SensitiveBytes};
use sealvault_crypto::{decrypt, encrypt, VaultKey};

/// Outcome of a simulated user prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOutcome {
    Approve,
    Cancel,
    Reject,
}

struct SoftKey {
    key: VaultKey,
    policy: KeyPolicy,
    last_assertion: Option<Instant>,
}

/// In-memory [`PlatformKeyStore`].
pub struct SoftwareKeyStore {
    keys: Mutex<BTreeMap<String, SoftKey>>,
    available: AtomicBool,
    prompts: Mutex<VecDeque<PromptOutcome>>,
    prompt_count: AtomicUsize,
    transient_failures: AtomicUsize,
    fail_create: AtomicBool,
}

impl SoftwareKeyStore {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            prompts: Mutex::new(VecDeque::new()),
            prompt_count: AtomicUsize::new(0),
            transient_failures: AtomicUsize::new(0),
            fail_create: AtomicBool::new(false),
        }
    }

    /// Simulate hardware presence / enrollment.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Queue the outcome of the next prompt. Unqueued prompts approve.
    pub fn push_prompt(&self, outcome: PromptOutcome) {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push_back(outcome);
        }
    }

    /// Number of prompts shown so far.
    pub fn prompt_count(&self) -> usize {
        self.prompt_count.load(Ordering::SeqCst)
    }

    /// Fail the next `count` operations with `PlatformTransient`.
    pub fn inject_transient_failures(&self, count: usize) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Make `create_key` fail with a fatal error.
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Drop a key behind the bridge's back, as an OS reset would.
    pub fn forget_key(&self, alias: &str) {
        if let Ok(mut keys) = self.keys.lock() {
            keys.remove(alias);
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::PlatformKeyUnavailable)
        }
    }

    fn take_transient(&self) -> Result<()> {
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::PlatformTransient("key store busy".to_string()));
        }
        Ok(())
    }

    fn prompt(&self) -> Result<()> {
        self.prompt_count.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .prompts
            .lock()
            .map_err(|_| Error::Storage("prompt queue poisoned".to_string()))?
            .pop_front()
            .unwrap_or(PromptOutcome::Approve);
        match outcome {
            PromptOutcome::Approve => Ok(()),
            PromptOutcome::Cancel => Err(Error::AuthenticationCancelled),
            PromptOutcome::Reject => Err(Error::AuthenticationFailed),
        }
    }

    fn lock_keys(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, SoftKey>>> {
        self.keys
            .lock()
            .map_err(|_| Error::Storage("key table poisoned".to_string()))
    }
}

impl Default for SoftwareKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformKeyStore for SoftwareKeyStore {
    fn name(&self) -> &str {
        "software"
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn create_key(&self, alias: &str, policy: KeyPolicy) -> Result<()> {
        self.check_available()?;
        self.take_transient()?;
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::Crypto("key generation refused".to_string()));
        }
        let mut keys = self.lock_keys()?;
        if keys.contains_key(alias) {
            return Err(Error::AlreadyExists(format!("Platform key exists: {}", alias)));
        }
        keys.insert(
            alias.to_string(),
            SoftKey {
                key: VaultKey::generate(),
                policy,
                last_assertion: None,
            },
        );
        Ok(())
    }

    async fn wrap_secret(&self, alias: &str, secret: &[u8]) -> Result<Vec<u8>> {
        self.check_available()?;
        self.take_transient()?;
        let keys = self.lock_keys()?;
        let entry = keys.get(alias).ok_or(Error::PlatformKeyUnavailable)?;
        encrypt(entry.key.as_bytes(), secret)
    }

    async fn unwrap_secret(
        &self,
        alias: &str,
        wrapped: &[u8],
        requires_auth: bool,
    ) -> Result<SensitiveBytes> {
        self.check_available()?;
        self.take_transient()?;
        let mut keys = self.lock_keys()?;
        let entry = keys.get_mut(alias).ok_or(Error::PlatformKeyUnavailable)?;

        let now = Instant::now();
        let within_window = match (entry.policy, entry.last_assertion) {
            (KeyPolicy::ValidityWindow { seconds }, Some(at)) => {
                now.duration_since(at) < Duration::from_secs(u64::from(seconds))
            }
            _ => false,
        };
        if requires_auth || !within_window {
            self.prompt()?;
            entry.last_assertion = Some(now);
        }

        decrypt(entry.key.as_bytes(), wrapped).map(SensitiveBytes::new)
    }

    async fn delete_key(&self, alias: &str) -> Result<()> {
        self.take_transient()?;
        self.lock_keys()?.remove(alias);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.lock_keys()?.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wrap_unwrap() {
        let store = SoftwareKeyStore::new();
        store.create_key("a", KeyPolicy::FreshAssertion).await.unwrap();

        let wrapped = store.wrap_secret("a", b"secret").await.unwrap();
        let secret = store.unwrap_secret("a", &wrapped, true).await.unwrap();
        assert_eq!(secret.as_bytes(), b"secret");
        assert_eq!(store.prompt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validity_window_skips_prompt() {
        let store = SoftwareKeyStore::new();
        store
            .create_key("a", KeyPolicy::ValidityWindow { seconds: 60 })
            .await
            .unwrap();
        let wrapped = store.wrap_secret("a", b"k").await.unwrap();

        store.unwrap_secret("a", &wrapped, false).await.unwrap();
        store.unwrap_secret("a", &wrapped, false).await.unwrap();
        assert_eq!(store.prompt_count(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        store.unwrap_secret("a", &wrapped, false).await.unwrap();
        assert_eq!(store.prompt_count(), 2);
    }

    #[tokio::test]
    async fn test_prompt_outcomes() {
        let store = SoftwareKeyStore::new();
        store.create_key("a", KeyPolicy::FreshAssertion).await.unwrap();
        let wrapped = store.wrap_secret("a", b"k").await.unwrap();

        store.push_prompt(PromptOutcome::Cancel);
        store.push_prompt(PromptOutcome::Reject);
        assert!(matches!(
            store.unwrap_secret("a", &wrapped, true).await,
            Err(Error::AuthenticationCancelled)
        ));
        assert!(matches!(
            store.unwrap_secret("a", &wrapped, true).await,
            Err(Error::AuthenticationFailed)
        ));
        assert!(store.unwrap_secret("a", &wrapped, true).await.is_ok());
    }

    #[tokio::test]
    async fn test_unavailable_hardware() {
        let store = SoftwareKeyStore::new();
        store.set_available(false);
        assert!(!store.is_available().await);
        assert!(matches!(
            store.create_key("a", KeyPolicy::FreshAssertion).await,
            Err(Error::PlatformKeyUnavailable)
        ));
    }
}
