//! Lazy per-tenant agent cache.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use murmur_provider::LlmProvider;
use murmur_store::Store;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::info;

use crate::agent::TenantAgent;

const DEFAULT_MAX_SESSIONS: usize = 1024;
const DEFAULT_MAX_TURNS: usize = 100;

/// Creates agents on first use and hands out the same instance afterwards.
/// Construction is serialized per tenant so concurrent first requests do
/// not each load the tenant context.
pub struct AgentRegistry {
    agents: RwLock<HashMap<i64, Arc<TenantAgent>>>,
    init_locks: Mutex<HashMap<i64, Arc<Semaphore>>>,
    store: Arc<Store>,
    provider: Arc<dyn LlmProvider>,
    max_sessions: usize,
    max_turns: usize,
}

impl AgentRegistry {
    pub fn new(store: Arc<Store>, provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            init_locks: Mutex::new(HashMap::new()),
            store,
            provider,
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    pub async fn get_or_create(&self, tenant_id: i64) -> Result<Arc<TenantAgent>> {
        if let Some(agent) = self.agents.read().await.get(&tenant_id) {
            return Ok(agent.clone());
        }

        let lock = {
            let mut locks = self.init_locks.lock().await;
            locks
                .entry(tenant_id)
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        let _permit = lock.acquire().await?;

        // A concurrent caller may have finished while we waited.
        if let Some(agent) = self.agents.read().await.get(&tenant_id) {
            return Ok(agent.clone());
        }

        let agent = Arc::new(TenantAgent::new(
            tenant_id,
            self.store.clone(),
            self.provider.clone(),
            self.max_sessions,
            self.max_turns,
        ));
        agent.load_context().await?;
        info!(tenant_id, "agent created");

        self.agents.write().await.insert(tenant_id, agent.clone());
        Ok(agent)
    }

    pub async fn agent_count(&self) -> usize {
        self.agents.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_provider::StubProvider;

    async fn registry_with_tenant() -> (AgentRegistry, i64) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let tenant = store.insert_tenant("Mario's Pizza", "restaurant").await.unwrap();
        store
            .insert_user(tenant, "Mario", "mario@pizza.test", "manager", "h")
            .await
            .unwrap();
        let registry = AgentRegistry::new(store, Arc::new(StubProvider::new()));
        (registry, tenant)
    }

    #[tokio::test]
    async fn same_tenant_gets_same_agent() {
        let (registry, tenant) = registry_with_tenant().await;
        let a = registry.get_or_create(tenant).await.unwrap();
        let b = registry.get_or_create(tenant).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.agent_count().await, 1);
    }

    #[tokio::test]
    async fn concurrent_first_access_loads_context_once() {
        let (registry, tenant) = registry_with_tenant().await;
        let registry = Arc::new(registry);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(
                async move { registry.get_or_create(tenant).await },
            ));
        }
        let mut agents = Vec::new();
        for handle in handles {
            agents.push(handle.await.unwrap().unwrap());
        }

        for agent in &agents[1..] {
            assert!(Arc::ptr_eq(&agents[0], agent));
        }
        assert_eq!(agents[0].context_load_count(), 1);
    }

    #[tokio::test]
    async fn unknown_tenant_errors_and_is_not_cached() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let registry = AgentRegistry::new(store.clone(), Arc::new(StubProvider::new()));

        assert!(registry.get_or_create(7).await.is_err());
        assert_eq!(registry.agent_count().await, 0);

        // Once the tenant exists, the same id succeeds.
        let id = store.insert_tenant("late arrival", "shop").await.unwrap();
        let agent = registry.get_or_create(id).await.unwrap();
        assert_eq!(agent.tenant_id(), id);
    }
}
