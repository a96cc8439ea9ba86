//! Route guard
//!
//! Decides whether a route may render for the current session. The decision
//! itself is a pure function of the snapshot; [`RouteGuard`] only adds the
//! wait for hydration.

use crate::session::{SessionManager, SessionSnapshot};
use cbts_core::{Route, RouteAccess};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Hydration is still running; decide later
    Pending,
    Allow,
    Redirect(Route),
}

/// Evaluate `route` against its own access rule
pub fn evaluate(snapshot: &SessionSnapshot, route: &Route) -> GuardDecision {
    evaluate_with(snapshot, &route.access(), route)
}

/// Evaluate `route` against an explicit access rule
pub fn evaluate_with(
    snapshot: &SessionSnapshot,
    access: &RouteAccess,
    route: &Route,
) -> GuardDecision {
    if *access == RouteAccess::Public {
        return GuardDecision::Allow;
    }
    if !snapshot.is_ready() {
        return GuardDecision::Pending;
    }
    if !snapshot.is_authenticated() {
        return GuardDecision::Redirect(Route::login_returning_to(route));
    }
    if !access.permits(snapshot.role()) {
        return GuardDecision::Redirect(Route::Unauthorized);
    }
    GuardDecision::Allow
}

/// Guard bound to a live session
#[derive(Clone)]
pub struct RouteGuard {
    session: Arc<SessionManager>,
}

impl RouteGuard {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    /// Decision for the current snapshot; may be `Pending`
    pub fn check_now(&self, route: &Route) -> GuardDecision {
        evaluate(&self.session.state(), route)
    }

    /// Wait for hydration, then decide; never returns `Pending`
    pub async fn check(&self, route: &Route) -> GuardDecision {
        let snapshot = self.session.wait_until_ready().await;
        let decision = evaluate(&snapshot, route);
        debug!(route = %route, decision = ?decision, "Route guard evaluated");
        decision
    }
}
