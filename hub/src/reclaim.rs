//! Periodic reclamation sweeps.
//!
//! Each sweep runs in its own task on its own period and never propagates a
//! per-tenant failure: it logs and moves on to the next tenant.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::session::ExpiryReport;
use crate::state::AppState;

/// Expire sessions and tear down the supervisors of the tenants they owned.
pub async fn sweep_sessions(state: &AppState) -> ExpiryReport {
    let report = state.sessions.expire_sessions().await;
    for id in &report.expired {
        if let Some(sup) = state.tenants.remove(id) {
            sup.teardown().await;
        }
    }
    if !report.expired.is_empty() || report.dangling_sessions > 0 {
        tracing::info!(
            expired = report.expired.len(),
            dangling = report.dangling_sessions,
            failures = report.failures,
            live = state.sessions.session_count(),
            "session sweep done"
        );
    }
    report
}

pub async fn sweep_orphans(state: &AppState) -> usize {
    let removed = state.sessions.reclaim_orphaned_directories().await;
    if removed > 0 {
        tracing::info!(removed, "orphan sweep done");
    }
    removed
}

/// Drop supervisors whose tenant is no longer registered.
pub async fn sweep_idle_supervisors(state: &AppState) -> usize {
    let mut reaped = 0;
    for id in state.tenants.tenant_ids() {
        if state.sessions.tenant_exists(&id) {
            continue;
        }
        if let Some(sup) = state.tenants.remove(&id) {
            sup.teardown().await;
            reaped += 1;
        }
    }
    if reaped > 0 {
        tracing::info!(reaped, remaining = state.tenants.len(), "supervisor sweep done");
    }
    reaped
}

fn spawn_periodic<F, Fut>(name: &'static str, every: Duration, state: Arc<AppState>, sweep: F) -> JoinHandle<()>
where
    F: Fn(Arc<AppState>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        // First tick one period from now; boot already ran an orphan pass.
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            tracing::debug!("{name} sweep starting");
            sweep(Arc::clone(&state)).await;
        }
    })
}

/// Background tasks: session expiry, orphan directories, idle supervisors.
pub fn spawn_reclamation(state: Arc<AppState>) -> Vec<JoinHandle<()>> {
    let cfg = &state.config;
    vec![
        spawn_periodic("session", cfg.session_sweep_every, Arc::clone(&state), |s| async move {
            sweep_sessions(&s).await;
        }),
        spawn_periodic("orphan", cfg.orphan_sweep_every, Arc::clone(&state), |s| async move {
            sweep_orphans(&s).await;
        }),
        spawn_periodic("supervisor", cfg.supervisor_sweep_every, Arc::clone(&state), |s| async move {
            sweep_idle_supervisors(&s).await;
        }),
    ]
}
