//! Governed decision-influence weights: validated updates, clamping,
//! atomic persistence, an audit journal, and rollback.

pub mod audit;
pub mod contract;
pub mod router;
pub mod runtime;
pub mod state;

use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::warn;

pub use audit::{AuditEntry, AuditFilter, AuditIdentity, AuditStatus};
pub use contract::{ErrorType, GovernanceError, InfluenceUpdate, Section, FORBIDDEN_KEYS};
pub use router::{live_apply_allowed_by_env, InfluenceRouter, LIVE_APPLY_ENV};
pub use runtime::{DecisionInfluenceRuntime, InfluenceMeta, InfluenceResult, RollbackRequest, StateView};
pub use state::{InfluenceState, Rejection, WeightNode};

static GLOBAL: Lazy<Arc<DecisionInfluenceRuntime>> = Lazy::new(|| {
    let config = crate::config::Config::load_resolved(&None).unwrap_or_else(|e| {
        warn!(target: "codexcore::influence", error = %e, "config unreadable, using default influence paths");
        crate::config::Config::default()
    });
    Arc::new(DecisionInfluenceRuntime::from_config(&config.influence))
});

/// Process-wide runtime built from the resolved configuration on first use.
pub fn global_runtime() -> Arc<DecisionInfluenceRuntime> {
    GLOBAL.clone()
}
