//! Environment Registry
//!
//! Caches live environments by id with an idle TTL. Each `get`/`connect`
//! refreshes the entry; an entry left idle past its TTL is removed and
//! disposed by its eviction timer, and also treated as absent by lookups
//! that run before the timer fires.
//!
//! The registry is constructed explicitly and must be opened before use.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use appforge_core::Framework;

use crate::environment::{EnvironmentFactory, EnvironmentKind, ExecutionEnvironment};
use crate::error::{SandboxError, SandboxResult};

/// Idle time after which a cached environment is evicted.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(10 * 60);

struct Entry {
    env: Arc<dyn ExecutionEnvironment>,
    expires_at: Instant,
    generation: u64,
}

type EntryMap = DashMap<String, Entry>;

pub struct EnvironmentRegistry {
    factories: HashMap<EnvironmentKind, Arc<dyn EnvironmentFactory>>,
    entries: Arc<EntryMap>,
    ttl: Duration,
    open: AtomicBool,
    generation: AtomicU64,
}

impl EnvironmentRegistry {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_IDLE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            factories: HashMap::new(),
            entries: Arc::new(DashMap::new()),
            ttl,
            open: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    /// Register the factory for one backend kind, replacing any previous one.
    pub fn with_factory(mut self, factory: Arc<dyn EnvironmentFactory>) -> Self {
        self.factories.insert(factory.kind(), factory);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        tracing::debug!(ttl_secs = self.ttl.as_secs(), "environment registry opened");
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Close the registry and dispose every cached environment.
    pub async fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, entry)) = self.entries.remove(&id) {
                dispose_quietly(&id, entry.env).await;
            }
        }
        tracing::debug!("environment registry closed");
    }

    /// Provision a new environment and cache it.
    pub async fn create(
        &self,
        kind: EnvironmentKind,
        framework: Framework,
    ) -> SandboxResult<Arc<dyn ExecutionEnvironment>> {
        self.ensure_open()?;
        let env = self.factory(kind)?.create(framework).await?;
        tracing::info!(
            env = env.id(),
            kind = %kind,
            framework = %framework,
            "environment provisioned"
        );
        self.insert(env.clone());
        Ok(env)
    }

    /// Return the cached environment for `id`, or reconnect through the factory.
    pub async fn connect(
        &self,
        kind: EnvironmentKind,
        id: &str,
    ) -> SandboxResult<Arc<dyn ExecutionEnvironment>> {
        self.ensure_open()?;
        if let Some(env) = self.get(id).await {
            return Ok(env);
        }
        let env = self.factory(kind)?.connect(id).await?;
        tracing::info!(env = id, kind = %kind, "environment reconnected");
        self.insert(env.clone());
        Ok(env)
    }

    /// Cached environment for `id`, refreshing its idle TTL.
    pub async fn get(&self, id: &str) -> Option<Arc<dyn ExecutionEnvironment>> {
        if !self.is_open() {
            return None;
        }
        let now = Instant::now();
        let expired = {
            let mut entry = self.entries.get_mut(id)?;
            if entry.expires_at > now && entry.env.is_active() {
                entry.expires_at = now + self.ttl;
                return Some(entry.env.clone());
            }
            entry.generation
        };
        // Expired or disposed behind our back.
        if let Some((_, entry)) = self.entries.remove_if(id, |_, e| e.generation == expired) {
            dispose_quietly(id, entry.env).await;
        }
        None
    }

    /// Whether `id` is cached and unexpired. Does not refresh the TTL.
    pub fn contains(&self, id: &str) -> bool {
        let now = Instant::now();
        self.entries
            .get(id)
            .map(|e| e.expires_at > now)
            .unwrap_or(false)
    }

    /// Remove `id` from the cache and dispose it.
    pub async fn dispose(&self, id: &str) -> SandboxResult<()> {
        match self.entries.remove(id) {
            Some((_, entry)) => entry.env.dispose().await,
            None => Err(SandboxError::NotFound(format!("environment {}", id))),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn ensure_open(&self) -> SandboxResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(SandboxError::RegistryClosed)
        }
    }

    fn factory(&self, kind: EnvironmentKind) -> SandboxResult<&Arc<dyn EnvironmentFactory>> {
        self.factories.get(&kind).ok_or_else(|| {
            SandboxError::provisioning(format!("no factory registered for {} environments", kind))
        })
    }

    fn insert(&self, env: Arc<dyn ExecutionEnvironment>) {
        let id = env.id().to_string();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let expires_at = Instant::now() + self.ttl;
        if let Some(previous) = self.entries.insert(
            id.clone(),
            Entry {
                env: env.clone(),
                expires_at,
                generation,
            },
        ) {
            if !Arc::ptr_eq(&previous.env, &env) {
                tokio::spawn(dispose_quietly(id.clone(), previous.env));
            }
        }
        tokio::spawn(eviction_timer(
            Arc::downgrade(&self.entries),
            id,
            generation,
            expires_at,
        ));
    }
}

impl Default for EnvironmentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Sleeps until the entry's expiry, following TTL refreshes, then evicts it.
/// Exits when the entry is replaced, removed, or the registry is dropped.
async fn eviction_timer(
    entries: Weak<EntryMap>,
    id: String,
    generation: u64,
    mut deadline: Instant,
) {
    loop {
        tokio::time::sleep_until(deadline).await;
        let Some(map) = entries.upgrade() else {
            return;
        };
        let current = match map.get(&id) {
            Some(e) if e.generation == generation => e.expires_at,
            _ => return,
        };
        if current > Instant::now() {
            deadline = current;
            continue;
        }
        if let Some((_, entry)) = map.remove_if(&id, |_, e| {
            e.generation == generation && e.expires_at <= Instant::now()
        }) {
            tracing::info!(env = %id, "evicting idle environment");
            dispose_quietly(&id, entry.env).await;
        }
        return;
    }
}

async fn dispose_quietly(id: impl AsRef<str>, env: Arc<dyn ExecutionEnvironment>) {
    if let Err(e) = env.dispose().await {
        tracing::warn!(env = id.as_ref(), error = %e, "failed to dispose environment");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryEnvironmentFactory;

    const TTL: Duration = Duration::from_secs(600);
    const EPSILON: Duration = Duration::from_millis(1);

    fn registry() -> (EnvironmentRegistry, Arc<MemoryEnvironmentFactory>) {
        let factory = Arc::new(MemoryEnvironmentFactory::new());
        let registry = EnvironmentRegistry::with_ttl(TTL).with_factory(factory.clone());
        registry.open();
        (registry, factory)
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_present_before_ttl_and_absent_after() {
        let (registry, _) = registry();
        let env = registry
            .create(EnvironmentKind::InMemory, Framework::Nextjs)
            .await
            .unwrap();
        let id = env.id().to_string();

        tokio::time::advance(TTL - EPSILON).await;
        assert!(registry.contains(&id));

        tokio::time::advance(EPSILON * 2).await;
        assert!(!registry.contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_disposes_environment() {
        let (registry, _) = registry();
        let env = registry
            .create(EnvironmentKind::InMemory, Framework::Vue)
            .await
            .unwrap();

        tokio::time::sleep(TTL + Duration::from_secs(1)).await;

        assert!(registry.is_empty());
        assert!(!env.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_refreshes_idle_ttl() {
        let (registry, _) = registry();
        let env = registry
            .create(EnvironmentKind::InMemory, Framework::React)
            .await
            .unwrap();
        let id = env.id().to_string();

        tokio::time::sleep(TTL / 2).await;
        assert!(registry.get(&id).await.is_some());
        tokio::time::sleep(TTL / 2 + Duration::from_secs(1)).await;

        assert!(registry.contains(&id));
        assert!(env.is_active());
    }

    #[tokio::test]
    async fn test_connect_reuses_cached_instance() {
        let (registry, _) = registry();
        let env = registry
            .create(EnvironmentKind::InMemory, Framework::Svelte)
            .await
            .unwrap();

        let again = registry
            .connect(EnvironmentKind::InMemory, env.id())
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&env, &again));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_after_dispose_goes_to_factory() {
        let (registry, _) = registry();
        let env = registry
            .create(EnvironmentKind::InMemory, Framework::Angular)
            .await
            .unwrap();
        let id = env.id().to_string();

        registry.dispose(&id).await.unwrap();
        // in-memory environments do not survive disposal
        assert!(matches!(
            registry.connect(EnvironmentKind::InMemory, &id).await,
            Err(SandboxError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_registry_rejects_operations() {
        let registry = EnvironmentRegistry::new()
            .with_factory(Arc::new(MemoryEnvironmentFactory::new()));
        assert!(matches!(
            registry
                .create(EnvironmentKind::InMemory, Framework::Nextjs)
                .await,
            Err(SandboxError::RegistryClosed)
        ));

        registry.open();
        let env = registry
            .create(EnvironmentKind::InMemory, Framework::Nextjs)
            .await
            .unwrap();
        registry.close().await;
        assert!(!env.is_active());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_missing_factory_is_provisioning_error() {
        let (registry, _) = registry();
        assert!(matches!(
            registry
                .create(EnvironmentKind::RemoteSandbox, Framework::Nextjs)
                .await,
            Err(SandboxError::Provisioning(_))
        ));
    }
}
