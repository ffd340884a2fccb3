use std::sync::Arc;

use crate::config::HubConfig;
use crate::error::HubError;
use crate::session::{SessionPolicy, SessionRegistry, Tenant, TenantId};
use crate::subprocess::supervisor::{SupervisorSettings, WorkerSupervisor};
use crate::tenants::TenantDirectory;

/// Shared application state, passed to all route handlers via `axum::extract::State`.
pub struct AppState {
    pub config: HubConfig,
    pub sessions: SessionRegistry,
    pub tenants: TenantDirectory,
}

impl AppState {
    pub fn new(config: HubConfig) -> Arc<Self> {
        let sessions = SessionRegistry::new(
            config.data_dir.clone(),
            SessionPolicy {
                max_age: config.session_max_age,
                max_idle: config.session_max_idle,
            },
        );
        let tenants = TenantDirectory::new(SupervisorSettings::from_config(&config));

        Arc::new(Self {
            config,
            sessions,
            tenants,
        })
    }

    /// Supervisor of a tenant that is still registered. A tenant reclaimed
    /// after the caller resolved it yields `NotFound`.
    pub fn supervisor_for(&self, tenant: &Tenant) -> Result<Arc<WorkerSupervisor>, HubError> {
        if self.sessions.tenant_exists(&tenant.id) {
            let sup = self.tenants.get_or_create(tenant);
            // Reclamation may have dropped the record between check and insert.
            if self.sessions.tenant_exists(&tenant.id) {
                return Ok(sup);
            }
        }
        if let Some(stray) = self.tenants.remove(&tenant.id) {
            tokio::spawn(async move { stray.teardown().await });
        }
        Err(HubError::NotFound(format!("tenant {} no longer exists", tenant.id)))
    }

    /// Drop the tenant's records, stop its workers and delete its directory,
    /// in that order so concurrent requests see it as gone first. Idempotent.
    pub async fn destroy_tenant(&self, id: &TenantId) -> Result<bool, HubError> {
        let existed = self.sessions.forget_tenant(id);
        if let Some(sup) = self.tenants.remove(id) {
            sup.teardown().await;
        }
        self.sessions.destroy_tenant(id).await?;
        if existed {
            tracing::info!("tenant {id} destroyed");
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn destroyed_tenant_is_gone_before_its_supervisor() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(HubConfig::for_data_dir(dir.path()));
        let (tenant, token) = state.sessions.create_tenant_session().await.unwrap();
        state.supervisor_for(&tenant).unwrap();

        // Record dropped, supervisor not yet reaped: nothing is handed out.
        assert!(state.sessions.forget_tenant(&tenant.id));
        assert!(matches!(state.supervisor_for(&tenant), Err(HubError::NotFound(_))));
        assert!(state.sessions.resolve_session(&token).is_none());

        assert!(!state.destroy_tenant(&tenant.id).await.unwrap());
        assert!(state.tenants.get(&tenant.id).is_none());
        assert!(!tenant.directory.exists());
    }

    #[tokio::test]
    async fn supervisor_created_during_reclamation_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(HubConfig::for_data_dir(dir.path()));
        let (tenant, _) = state.sessions.create_tenant_session().await.unwrap();

        // A request raced the registry removal and inserted a supervisor.
        state.sessions.forget_tenant(&tenant.id);
        state.tenants.get_or_create(&tenant);

        assert!(state.supervisor_for(&tenant).is_err());
        assert_eq!(state.tenants.len(), 0);
    }

    #[tokio::test]
    async fn destroy_tenant_reports_existence_once() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(HubConfig::for_data_dir(dir.path()));
        let (tenant, _) = state.sessions.create_tenant_session().await.unwrap();
        state.supervisor_for(&tenant).unwrap();

        assert!(state.destroy_tenant(&tenant.id).await.unwrap());
        assert!(!state.sessions.tenant_exists(&tenant.id));
        assert!(state.tenants.get(&tenant.id).is_none());
        assert!(!tenant.directory.exists());
        assert!(!state.destroy_tenant(&tenant.id).await.unwrap());
    }
}
