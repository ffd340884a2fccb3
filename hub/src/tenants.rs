use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::session::{Tenant, TenantId};
use crate::subprocess::supervisor::{SupervisorSettings, WorkerSupervisor};

/// Worker supervisors keyed by tenant, created on first use.
pub struct TenantDirectory {
    settings: Arc<SupervisorSettings>,
    supervisors: Mutex<HashMap<TenantId, Arc<WorkerSupervisor>>>,
}

impl TenantDirectory {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            supervisors: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TenantId, Arc<WorkerSupervisor>>> {
        self.supervisors.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get_or_create(&self, tenant: &Tenant) -> Arc<WorkerSupervisor> {
        let mut map = self.lock();
        let sup = map.entry(tenant.id.clone()).or_insert_with(|| {
            tracing::debug!("supervisor created for tenant {}", tenant.id);
            WorkerSupervisor::new(
                tenant.id.clone(),
                tenant.config_store(),
                Arc::clone(&self.settings),
            )
        });
        Arc::clone(sup)
    }

    pub fn get(&self, id: &TenantId) -> Option<Arc<WorkerSupervisor>> {
        self.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &TenantId) -> Option<Arc<WorkerSupervisor>> {
        self.lock().remove(id)
    }

    pub fn tenant_ids(&self) -> Vec<TenantId> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionPolicy, SessionRegistry};
    use std::time::Duration;

    fn settings() -> SupervisorSettings {
        SupervisorSettings {
            program: "true".to_string(),
            args: Vec::new(),
            start_timeout: Duration::from_secs(10),
            stop_grace: None,
        }
    }

    #[tokio::test]
    async fn supervisors_are_created_once_per_tenant() {
        let dir = tempfile::tempdir().unwrap();
        let reg = SessionRegistry::new(dir.path(), SessionPolicy::default());
        let (a, _) = reg.create_tenant_session().await.unwrap();
        let (b, _) = reg.create_tenant_session().await.unwrap();

        let tenants = TenantDirectory::new(settings());
        let first = tenants.get_or_create(&a);
        let again = tenants.get_or_create(&a);
        let other = tenants.get_or_create(&b);

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(first.tenant(), &a.id);
        assert_eq!(tenants.len(), 2);

        assert!(tenants.remove(&a.id).is_some());
        assert!(tenants.get(&a.id).is_none());
        assert_eq!(tenants.tenant_ids(), vec![b.id.clone()]);
    }
}
