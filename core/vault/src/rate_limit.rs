//! Attempt limiting for secret-verifying operations.
//!
//! Failures are counted per `(vault, operation)` inside a sliding window.
//! Reaching the limit starts a lockout during which every attempt, correct
//! secret or not, is refused with [`Error::RateLimited`]. Time comes from
//! `tokio::time`, so tests can drive it with a paused clock.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::config::RateLimitConfig;
use sealvault_common::{Error, Result, VaultId};

/// Operation whose attempts are counted separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    Unlock,
    Export,
    Import,
}

#[derive(Debug, Default)]
struct AttemptRecord {
    failures: VecDeque<Instant>,
    locked_until: Option<Instant>,
}

impl AttemptRecord {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(first) = self.failures.front() {
            if now.duration_since(*first) >= window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Per-vault, per-operation attempt limiter.
pub struct RateLimiter {
    config: RateLimitConfig,
    records: Mutex<HashMap<(VaultId, OperationClass), AttemptRecord>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    fn with_records<T>(
        &self,
        f: impl FnOnce(&mut HashMap<(VaultId, OperationClass), AttemptRecord>) -> T,
    ) -> Result<T> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| Error::Storage("rate limiter state poisoned".to_string()))?;
        Ok(f(&mut records))
    }

    /// Refuse the attempt if the pair is locked out.
    ///
    /// An expired lockout is cleared together with its failure history.
    pub fn check(&self, vault_id: &VaultId, op: OperationClass) -> Result<()> {
        let now = Instant::now();
        let remaining = self.with_records(|records| {
            let key = (vault_id.clone(), op);
            let locked_until = records.get(&key)?.locked_until;
            match locked_until {
                Some(until) if until > now => Some(until - now),
                Some(_) => {
                    records.remove(&key);
                    None
                }
                None => None,
            }
        })?;

        match remaining {
            Some(left) => {
                let mut secs = left.as_secs();
                if left.subsec_nanos() > 0 {
                    secs += 1;
                }
                Err(Error::RateLimited {
                    remaining_secs: secs,
                })
            }
            None => Ok(()),
        }
    }

    /// Count a failed attempt. Returns the lockout duration if this failure
    /// started one.
    pub fn record_failure(&self, vault_id: &VaultId, op: OperationClass) -> Result<Option<Duration>> {
        let now = Instant::now();
        let config = &self.config;
        let started = self.with_records(|records| {
            let record = records.entry((vault_id.clone(), op)).or_default();
            record.prune(now, config.window);
            record.failures.push_back(now);
            if record.locked_until.is_none() && record.failures.len() >= config.max_attempts as usize {
                record.locked_until = Some(now + config.lockout);
                Some(config.lockout)
            } else {
                None
            }
        })?;

        if let Some(lockout) = started {
            warn!(vault_id = %vault_id, ?op, secs = lockout.as_secs(), "Too many failed attempts, locking out");
        }
        Ok(started)
    }

    /// Clear the failure history after a successful attempt.
    pub fn record_success(&self, vault_id: &VaultId, op: OperationClass) -> Result<()> {
        self.with_records(|records| {
            records.remove(&(vault_id.clone(), op));
        })
    }

    /// Failures currently counted in the window.
    pub fn failure_count(&self, vault_id: &VaultId, op: OperationClass) -> usize {
        let now = Instant::now();
        let window = self.config.window;
        self.with_records(|records| {
            records
                .get_mut(&(vault_id.clone(), op))
                .map(|r| {
                    r.prune(now, window);
                    r.failures.len()
                })
                .unwrap_or(0)
        })
        .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(RateLimitConfig::default())
    }

    fn vault(id: &str) -> VaultId {
        VaultId::new(id).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_lockout_after_max_failures() {
        let limiter = limiter();
        let id = vault("personal");

        for _ in 0..4 {
            limiter.check(&id, OperationClass::Unlock).unwrap();
            assert_eq!(limiter.record_failure(&id, OperationClass::Unlock).unwrap(), None);
        }
        assert_eq!(
            limiter.record_failure(&id, OperationClass::Unlock).unwrap(),
            Some(Duration::from_secs(300))
        );

        match limiter.check(&id, OperationClass::Unlock) {
            Err(Error::RateLimited { remaining_secs }) => assert_eq!(remaining_secs, 300),
            other => panic!("expected lockout, got {:?}", other),
        }

        tokio::time::advance(Duration::from_secs(120)).await;
        match limiter.check(&id, OperationClass::Unlock) {
            Err(Error::RateLimited { remaining_secs }) => assert_eq!(remaining_secs, 180),
            other => panic!("expected lockout, got {:?}", other),
        }

        tokio::time::advance(Duration::from_secs(181)).await;
        assert!(limiter.check(&id, OperationClass::Unlock).is_ok());
        assert_eq!(limiter.failure_count(&id, OperationClass::Unlock), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_outside_window_expire() {
        let limiter = limiter();
        let id = vault("personal");

        for _ in 0..4 {
            limiter.record_failure(&id, OperationClass::Unlock).unwrap();
        }
        tokio::time::advance(Duration::from_secs(301)).await;

        assert_eq!(limiter.record_failure(&id, OperationClass::Unlock).unwrap(), None);
        assert_eq!(limiter.failure_count(&id, OperationClass::Unlock), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets() {
        let limiter = limiter();
        let id = vault("personal");
        for _ in 0..4 {
            limiter.record_failure(&id, OperationClass::Unlock).unwrap();
        }
        limiter.record_success(&id, OperationClass::Unlock).unwrap();
        assert_eq!(limiter.failure_count(&id, OperationClass::Unlock), 0);
        assert_eq!(limiter.record_failure(&id, OperationClass::Unlock).unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = limiter();
        let a = vault("a");
        let b = vault("b");
        for _ in 0..5 {
            limiter.record_failure(&a, OperationClass::Unlock).unwrap();
        }
        assert!(limiter.check(&a, OperationClass::Unlock).is_err());
        assert!(limiter.check(&a, OperationClass::Export).is_ok());
        assert!(limiter.check(&b, OperationClass::Unlock).is_ok());
    }
}
