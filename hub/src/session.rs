//! Tenant identity, session tokens and their expiry.
//!
//! The registry is the sole authority for tenant existence. Every tenant
//! exclusively owns one directory under the storage root whose name is the
//! tenant id; a directory without a live record is an orphan.

use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::bot_config::ConfigStore;
use crate::error::HubError;

/// Opaque tenant identifier (32 hex chars). Doubles as the directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TenantId(String);

/// Opaque session token (64 hex chars). Never equal to any tenant id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl TenantId {
    fn generate() -> Self {
        Self(random_hex::<16>())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[cfg(test)]
    pub fn from_raw(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl SessionToken {
    fn generate() -> Self {
        Self(random_hex::<32>())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

fn random_hex<const N: usize>() -> String {
    let mut buf = [0u8; N];
    OsRng.fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone)]
pub struct Session {
    pub tenant: TenantId,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Tenant {
    pub id: TenantId,
    pub directory: PathBuf,
    pub session: SessionToken,
}

impl Tenant {
    pub fn config_store(&self) -> ConfigStore {
        ConfigStore::new(&self.directory)
    }
}

/// Absolute and inactivity ceilings for a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    pub max_age: Duration,
    pub max_idle: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(24 * 60 * 60),
            max_idle: Duration::from_secs(2 * 60 * 60),
        }
    }
}

/// Tenants removed by one expiry pass.
#[derive(Debug, Default)]
pub struct ExpiryReport {
    pub expired: Vec<TenantId>,
    /// Sessions dropped because their tenant record was already gone.
    pub dangling_sessions: usize,
    pub failures: usize,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionToken, Session>,
    tenants: HashMap<TenantId, Tenant>,
    /// Ids whose directory is being created but whose record is not in yet.
    provisioning: HashSet<TenantId>,
}

impl Registry {
    fn is_live(&self, name: &str) -> bool {
        let id = TenantId(name.to_string());
        self.tenants.contains_key(&id) || self.provisioning.contains(&id)
    }

    fn remove_tenant(&mut self, id: &TenantId) -> Option<Tenant> {
        let tenant = self.tenants.remove(id)?;
        self.sessions.remove(&tenant.session);
        Some(tenant)
    }
}

pub struct SessionRegistry {
    root: PathBuf,
    policy: SessionPolicy,
    inner: Mutex<Registry>,
}

impl SessionRegistry {
    pub fn new(root: impl Into<PathBuf>, policy: SessionPolicy) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self {
            root,
            policy,
            inner: Mutex::new(Registry::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        // A poisoned registry still holds consistent maps; keep serving.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ensure the storage root exists and reclaim leftovers from a previous run.
    pub async fn init(&self) -> io::Result<usize> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(self.reclaim_orphaned_directories().await)
    }

    /// Allocate a tenant with a fresh directory, seeded configs and a session.
    pub async fn create_tenant_session(&self) -> Result<(Tenant, SessionToken), HubError> {
        let id = loop {
            let candidate = TenantId::generate();
            let mut reg = self.lock();
            if !reg.is_live(candidate.as_str()) {
                reg.provisioning.insert(candidate.clone());
                break candidate;
            }
        };

        let directory = self.root.join(id.as_str());
        if let Err(e) = tokio::fs::create_dir_all(&directory).await {
            self.lock().provisioning.remove(&id);
            tracing::warn!("tenant {id}: directory create failed: {e}");
            return Err(HubError::Storage(format!("create tenant directory: {e}")));
        }

        let store = ConfigStore::new(&directory);
        if let Err(e) = tokio::task::spawn_blocking(move || store.seed_defaults())
            .await
            .unwrap_or_else(|e| Err(io::Error::other(e)))
        {
            // Loads fall back to presets, so the tenant stays usable.
            tracing::warn!("tenant {id}: seeding default configs failed: {e}");
        }

        let now = Utc::now();
        let token = SessionToken::generate();
        let tenant = Tenant {
            id: id.clone(),
            directory,
            session: token.clone(),
        };

        {
            let mut reg = self.lock();
            reg.provisioning.remove(&id);
            reg.sessions.insert(
                token.clone(),
                Session {
                    tenant: id.clone(),
                    created_at: now,
                    last_activity: now,
                },
            );
            reg.tenants.insert(id.clone(), tenant.clone());
        }

        tracing::info!("tenant {id} created");
        Ok((tenant, token))
    }

    /// Tenant bound to `token`, refreshing its last activity.
    pub fn resolve_session(&self, token: &SessionToken) -> Option<Tenant> {
        let mut reg = self.lock();
        let session = reg.sessions.get_mut(token)?;
        session.last_activity = Utc::now();
        let tenant_id = session.tenant.clone();
        reg.tenants.get(&tenant_id).cloned()
    }

    pub fn tenant_exists(&self, id: &TenantId) -> bool {
        self.lock().tenants.contains_key(id)
    }

    pub fn tenant_ids(&self) -> Vec<TenantId> {
        self.lock().tenants.keys().cloned().collect()
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    pub async fn expire_sessions(&self) -> ExpiryReport {
        self.expire_sessions_at(Utc::now()).await
    }

    /// Remove every session past the age or idle ceiling at `now` and
    /// reclaim its tenant. Records are dropped before any directory work so
    /// concurrent lookups see the tenant as gone immediately.
    pub async fn expire_sessions_at(&self, now: DateTime<Utc>) -> ExpiryReport {
        let max_age = chrono::Duration::from_std(self.policy.max_age).unwrap_or(chrono::Duration::MAX);
        let max_idle =
            chrono::Duration::from_std(self.policy.max_idle).unwrap_or(chrono::Duration::MAX);

        let mut report = ExpiryReport::default();
        let mut doomed = Vec::new();
        {
            let mut reg = self.lock();
            let expired: Vec<SessionToken> = reg
                .sessions
                .iter()
                .filter(|(_, s)| now - s.created_at > max_age || now - s.last_activity > max_idle)
                .map(|(token, _)| token.clone())
                .collect();

            for token in expired {
                let Some(session) = reg.sessions.remove(&token) else {
                    continue;
                };
                match reg.tenants.get(&session.tenant) {
                    Some(t) if t.session == token => {
                        if let Some(tenant) = reg.remove_tenant(&session.tenant) {
                            doomed.push(tenant);
                        }
                    }
                    _ => report.dangling_sessions += 1,
                }
            }
        }

        for tenant in doomed {
            if let Err(e) = remove_tree(&tenant.directory).await {
                // Record is gone; the orphan sweep retries the directory.
                tracing::warn!("tenant {}: directory removal failed: {e}", tenant.id);
                report.failures += 1;
            }
            report.expired.push(tenant.id);
        }

        report
    }

    /// Delete storage-root subdirectories that belong to no live tenant.
    /// Returns the number of directories removed.
    pub async fn reclaim_orphaned_directories(&self) -> usize {
        let candidates = self.list_subdirectories().await;
        self.remove_orphans(candidates).await
    }

    async fn list_subdirectories(&self) -> Vec<(String, PathBuf)> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!("orphan sweep: cannot list {}: {e}", self.root.display());
                return Vec::new();
            }
        };

        let mut candidates = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                    if is_dir {
                        candidates.push((entry.file_name().to_string_lossy().to_string(), entry.path()));
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("orphan sweep: listing interrupted: {e}");
                    break;
                }
            }
        }
        candidates
    }

    /// Remove the listed directories that are still not live. A directory
    /// already gone is skipped, not counted.
    async fn remove_orphans(&self, candidates: Vec<(String, PathBuf)>) -> usize {
        let mut removed = 0;
        for (name, path) in candidates {
            // Re-check per entry: tenants may have been created since listing.
            if self.lock().is_live(&name) {
                continue;
            }
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    tracing::info!("reclaimed orphaned directory {name}");
                    removed += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!("orphan sweep: {name} already gone");
                }
                Err(e) => tracing::warn!("orphan sweep: cannot remove {}: {e}", path.display()),
            }
        }
        removed
    }

    /// Drop the tenant and its session from the registry without touching
    /// storage. Returns whether a record existed.
    pub fn forget_tenant(&self, id: &TenantId) -> bool {
        self.lock().remove_tenant(id).is_some()
    }

    /// Delete the tenant's directory and drop its records. Idempotent;
    /// returns whether a record existed.
    pub async fn destroy_tenant(&self, id: &TenantId) -> Result<bool, HubError> {
        let existed = self.forget_tenant(id);
        remove_tree(&self.root.join(id.as_str())).await?;
        if existed {
            tracing::info!("tenant {id} destroyed");
        }
        Ok(existed)
    }

    /// Forget every session and tenant and recreate an empty storage root.
    pub async fn clear_all(&self) -> io::Result<()> {
        {
            let mut reg = self.lock();
            reg.sessions.clear();
            reg.tenants.clear();
        }
        remove_tree(&self.root).await?;
        tokio::fs::create_dir_all(&self.root).await?;
        tracing::info!("cleared all tenant data under {}", self.root.display());
        Ok(())
    }
}

/// `remove_dir_all` that treats an already-missing tree as success.
async fn remove_tree(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
