//! Synthetic client identities and per-domain rotation.
//!
//! The pool is an explicit service object: construct it once per process
//! and hand an `Arc<IdentityPool>` to the orchestrator and workers. All
//! mutation goes through pool methods under a single lock, so no two
//! workers can be handed the same identity for the same domain.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::util::rand_u64;

/// Default number of identities generated per pool.
pub const DEFAULT_POOL_SIZE: usize = 200;

/// Identities blocked this many times stay blocked through recycling.
const BLOCK_LIMIT: u32 = 3;

/// When a domain has exhausted the pool, fall back to this many identities
/// from the front regardless of recent use. Forward progress beats
/// perfect isolation.
const FALLBACK_SLICE: usize = 20;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_2_1) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_2_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_6_3) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36 Edg/121.0.0.0",
];

const ACCEPT_LANGUAGES: &[&str] = &[
    "it-IT,it;q=0.9,en;q=0.8",
    "en-US,en;q=0.9",
    "fr-FR,fr;q=0.9,en;q=0.8",
    "de-DE,de;q=0.9,en;q=0.8",
    "es-ES,es;q=0.9,en;q=0.8",
];

const SCREENS: &[(u32, u32)] = &[
    (1920, 1080),
    (2560, 1440),
    (1366, 768),
    (1440, 900),
    (3840, 2160),
];

const TIMEZONES: &[&str] = &[
    "Europe/Rome",
    "Europe/Paris",
    "Europe/London",
    "Europe/Berlin",
    "Europe/Madrid",
    "America/New_York",
];

const PLATFORMS: &[&str] = &["Win32", "MacIntel", "Linux x86_64"];

const WEBGL_VENDORS: &[&str] = &[
    "Intel Inc.",
    "NVIDIA Corporation",
    "AMD",
    "Apple Inc.",
    "Google Inc.",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Screen {
    pub width: u32,
    pub height: u32,
}

/// A synthetic client fingerprint used to vary outgoing requests.
///
/// Owned by the pool; never deleted, only recycled.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub id: String,
    pub user_agent: String,
    pub accept_language: String,
    pub screen: Screen,
    pub timezone: String,
    pub platform: String,
    pub webgl_vendor: String,
    pub canvas_fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub success_count: u32,
    pub block_count: u32,
}

fn generate_identity() -> Identity {
    let pick = |table: &[&str]| table[rand_u64() as usize % table.len()].to_string();
    let (width, height) = SCREENS[rand_u64() as usize % SCREENS.len()];
    let seed = Uuid::new_v4();

    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    let canvas_fingerprint = format!("{:x}", hasher.finalize())[..32].to_string();

    Identity {
        id: format!("id_{}", &seed.simple().to_string()[..12]),
        user_agent: pick(USER_AGENTS),
        accept_language: pick(ACCEPT_LANGUAGES),
        screen: Screen { width, height },
        timezone: pick(TIMEZONES),
        platform: pick(PLATFORMS),
        webgl_vendor: pick(WEBGL_VENDORS),
        canvas_fingerprint,
        created_at: Utc::now(),
        last_used: None,
        success_count: 0,
        block_count: 0,
    }
}

struct PoolInner {
    identities: Vec<Identity>,
    /// Identity ids already handed out per domain since the last recycle.
    used: HashMap<String, HashSet<String>>,
    blocked: HashSet<String>,
    /// Success score per identity id, weighted by products found.
    scores: HashMap<String, i64>,
}

/// Thread-safe pool of rotating identities with per-domain usage tracking.
pub struct IdentityPool {
    cooldown: TimeDelta,
    inner: Mutex<PoolInner>,
}

impl Default for IdentityPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

impl IdentityPool {
    pub fn new(pool_size: usize) -> Self {
        let identities = (0..pool_size.max(1)).map(|_| generate_identity()).collect();
        Self {
            // Identities unused for an hour become eligible for recycling.
            cooldown: TimeDelta::hours(1),
            inner: Mutex::new(PoolInner {
                identities,
                used: HashMap::new(),
                blocked: HashSet::new(),
                scores: HashMap::new(),
            }),
        }
    }

    /// Override the recycle cooldown (tests, aggressive reuse policies).
    pub fn with_cooldown(mut self, cooldown: TimeDelta) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn len(&self) -> usize {
        self.lock_inner().identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("identity pool recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    /// Hand out the best identity for a domain: not blocked, not already
    /// used for that domain, highest (success score minus block count),
    /// ties to the lowest id.
    ///
    /// When the pool is exhausted for the domain, stale usage is recycled;
    /// if that still yields nothing, the front [`FALLBACK_SLICE`] of the
    /// pool is eligible regardless of recent use, so allocation always
    /// succeeds. Atomic: selection and usage marking happen under one lock.
    pub fn allocate(&self, domain: &str) -> Identity {
        let mut inner = self.lock_inner();
        let now = Utc::now();

        let mut candidates = available_indices(&inner, domain);
        if candidates.is_empty() {
            self.recycle(&mut inner, domain, now);
            candidates = available_indices(&inner, domain);
        }
        if candidates.is_empty() {
            tracing::debug!(%domain, "identity pool exhausted, using fallback slice");
            candidates = (0..inner.identities.len().min(FALLBACK_SLICE)).collect();
        }

        let mut best = candidates[0];
        for &i in &candidates[1..] {
            let score = |idx: usize| {
                let ident = &inner.identities[idx];
                inner.scores.get(&ident.id).copied().unwrap_or(0) - i64::from(ident.block_count)
            };
            let better = score(i) > score(best)
                || (score(i) == score(best) && inner.identities[i].id < inner.identities[best].id);
            if better {
                best = i;
            }
        }

        let id = inner.identities[best].id.clone();
        inner
            .used
            .entry(domain.to_string())
            .or_default()
            .insert(id.clone());
        inner.identities[best].last_used = Some(now);
        inner.identities[best].clone()
    }

    /// Credit an identity with the number of products it found. Identities
    /// that find more are preferred on later allocations, not merely ones
    /// that succeed.
    pub fn mark_success(&self, identity_id: &str, products_found: u64) {
        let mut inner = self.lock_inner();
        *inner.scores.entry(identity_id.to_string()).or_insert(0) += products_found as i64;
        if let Some(ident) = inner.identities.iter_mut().find(|i| i.id == identity_id) {
            ident.success_count += 1;
        }
    }

    /// Take an identity out of rotation until the next recycle.
    pub fn mark_blocked(&self, identity_id: &str) {
        let mut inner = self.lock_inner();
        inner.blocked.insert(identity_id.to_string());
        if let Some(ident) = inner.identities.iter_mut().find(|i| i.id == identity_id) {
            ident.block_count += 1;
            tracing::debug!(identity = %identity_id, blocks = ident.block_count, "identity blocked");
        }
    }

    /// Clear stale per-domain usage. Identities past the cooldown become
    /// available for the domain again; the repeatedly-blocked stay blocked.
    fn recycle(&self, inner: &mut PoolInner, domain: &str, now: DateTime<Utc>) {
        let cutoff = now - self.cooldown;
        let stale: Vec<String> = inner
            .identities
            .iter()
            .filter(|i| i.last_used.is_some_and(|t| t <= cutoff))
            .map(|i| i.id.clone())
            .collect();

        if stale.is_empty() {
            return;
        }
        tracing::debug!(%domain, recycled = stale.len(), "recycling stale identities");

        let used = inner.used.entry(domain.to_string()).or_default();
        for id in &stale {
            used.remove(id);
        }
        for id in &stale {
            let keep_blocked = inner
                .identities
                .iter()
                .find(|i| &i.id == id)
                .is_some_and(|i| i.block_count >= BLOCK_LIMIT);
            if !keep_blocked {
                inner.blocked.remove(id);
            }
        }
    }
}

fn available_indices(inner: &PoolInner, domain: &str) -> Vec<usize> {
    let used = inner.used.get(domain);
    inner
        .identities
        .iter()
        .enumerate()
        .filter(|(_, ident)| {
            !inner.blocked.contains(&ident.id)
                && !used.is_some_and(|u| u.contains(&ident.id))
        })
        .map(|(i, _)| i)
        .collect()
}
