use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    clock::Clock,
    error::ClerkError,
    keys::{KeyFn, random_key},
};

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Token lifetime in microseconds.
    pub ttl_micros: i64,
    /// Random bytes per token. Values are hex, so twice as many characters.
    pub entropy_bytes: usize,
    /// Most expired tokens remembered for diagnostics.
    pub audit_capacity: usize,
    /// Draws allowed before giving up on a collision-free value.
    pub max_attempts: usize,
}

impl StoreConfig {
    pub fn token_len(&self) -> usize {
        self.entropy_bytes * 2
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            // 1 hour
            ttl_micros: 60 * 60 * 1_000_000,
            entropy_bytes: 42,
            audit_capacity: 30,
            max_attempts: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub value: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Valid { expires_at: i64 },
    ExpiredKnown { expired_at: i64 },
    Unknown,
}

/// Point-in-time copy of both maps.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Snapshot {
    pub live: BTreeMap<String, i64>,
    pub audit: BTreeMap<String, i64>,
}

#[derive(Default)]
struct Ledger {
    live: HashMap<String, i64>,
    audit: HashMap<String, i64>,
}

impl Ledger {
    fn sweep(&mut self, now: i64, capacity: usize) -> usize {
        if self.live.is_empty() {
            return 0;
        }

        let mut expired = Vec::new();
        self.live.retain(|value, expires_at| {
            if *expires_at <= now {
                expired.push((value.clone(), *expires_at));
                return false;
            }
            true
        });

        let count = expired.len();
        self.retire(expired, capacity);
        count
    }

    /// Caller must have removed every value from `live` already.
    fn retire(&mut self, entries: Vec<(String, i64)>, capacity: usize) {
        if entries.is_empty() {
            return;
        }

        self.audit.extend(entries);

        if self.audit.len() <= capacity {
            return;
        }

        let mut by_age: Vec<(i64, String)> = self
            .audit
            .iter()
            .map(|(value, &expired_at)| (expired_at, value.clone()))
            .collect();
        by_age.sort_unstable();

        let excess = by_age.len() - capacity;
        for (_, value) in by_age.into_iter().take(excess) {
            self.audit.remove(&value);
        }
    }
}

/// Registry of live anti-CSRF tokens plus a short memory of expired ones.
pub struct TokenStore {
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    keyfn: KeyFn,
    ledger: Mutex<Ledger>,
}

impl TokenStore {
    pub fn new(config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_keyfn(config, clock, Box::new(random_key))
    }

    pub fn with_keyfn(config: StoreConfig, clock: Arc<dyn Clock>, keyfn: KeyFn) -> Self {
        Self {
            config,
            clock,
            keyfn,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Issues a fresh token valid for `[now, now + ttl)`.
    ///
    /// Values already live or still remembered in the audit map are redrawn, so an
    /// old value can never come back carrying stale audit metadata.
    pub fn register(&self) -> Result<Token, ClerkError> {
        let mut ledger = self.ledger.lock();
        let now = self.clock.now_micros();
        let swept = ledger.sweep(now, self.config.audit_capacity);

        for attempt in 1..=self.config.max_attempts {
            let value = (self.keyfn)(self.config.entropy_bytes);

            if value.len() != self.config.token_len() {
                return Err(ClerkError::KeyLength {
                    expected: self.config.token_len(),
                    actual: value.len(),
                });
            }

            if ledger.live.contains_key(&value) || ledger.audit.contains_key(&value) {
                debug!(attempt, "Token collision, drawing again");
                continue;
            }

            let expires_at = now.saturating_add(self.config.ttl_micros);
            ledger.live.insert(value.clone(), expires_at);

            debug!(
                token = fingerprint(&value),
                expires_at,
                swept,
                live = ledger.live.len(),
                "Registered token"
            );

            return Ok(Token {
                value,
                issued_at: now,
                expires_at,
            });
        }

        Err(ClerkError::GenerationExhausted {
            attempts: self.config.max_attempts,
        })
    }

    pub fn validate(&self, value: &str) -> Validity {
        let mut ledger = self.ledger.lock();
        let now = self.clock.now_micros();
        ledger.sweep(now, self.config.audit_capacity);

        if let Some(&expires_at) = ledger.live.get(value) {
            return Validity::Valid { expires_at };
        }

        match ledger.audit.get(value) {
            Some(&expired_at) => Validity::ExpiredKnown { expired_at },
            None => Validity::Unknown,
        }
    }

    /// Expires the given values early. Each keeps its scheduled expiry in the audit map.
    ///
    /// Returns the sweep count plus the number of values actually taken out of the live
    /// map. Values that are not live are ignored.
    pub fn revoke<I, S>(&self, values: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ledger = self.ledger.lock();
        let now = self.clock.now_micros();
        let swept = ledger.sweep(now, self.config.audit_capacity);

        let mut retired = Vec::new();
        for value in values {
            let value = value.as_ref();
            if let Some(expires_at) = ledger.live.remove(value) {
                retired.push((value.to_owned(), expires_at));
            }
        }

        let revoked = retired.len();
        ledger.retire(retired, self.config.audit_capacity);

        if revoked > 0 {
            info!(revoked, swept, "Revoked tokens");
        }

        swept + revoked
    }

    /// Moves every live token to the audit map and returns how many there were.
    pub fn revoke_all(&self) -> usize {
        let mut ledger = self.ledger.lock();
        let retired: Vec<(String, i64)> = ledger.live.drain().collect();

        let count = retired.len();
        ledger.retire(retired, self.config.audit_capacity);

        info!(count, "Revoked all tokens");
        count
    }

    pub fn sweep(&self) -> usize {
        let mut ledger = self.ledger.lock();
        let now = self.clock.now_micros();
        let swept = ledger.sweep(now, self.config.audit_capacity);

        if swept > 0 {
            debug!(swept, live = ledger.live.len(), "Swept expired tokens");
        }

        swept
    }

    pub fn live_len(&self) -> usize {
        self.ledger.lock().live.len()
    }

    pub fn audit_len(&self) -> usize {
        self.ledger.lock().audit.len()
    }

    pub fn snapshot(&self) -> Snapshot {
        let ledger = self.ledger.lock();

        Snapshot {
            live: ledger.live.iter().map(|(k, &v)| (k.clone(), v)).collect(),
            audit: ledger.audit.iter().map(|(k, &v)| (k.clone(), v)).collect(),
        }
    }
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ledger = self.ledger.lock();

        f.debug_struct("TokenStore")
            .field("config", &self.config)
            .field("live", &ledger.live.len())
            .field("audit", &ledger.audit.len())
            .finish()
    }
}

/// Short prefix safe to put in logs.
pub fn fingerprint(value: &str) -> &str {
    value.get(..8).unwrap_or(value)
}
