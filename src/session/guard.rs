//! Route reachability derived from the session snapshot.
//!
//! Exactly one role's route set is reachable at a time. With no authenticated
//! slot only the login route is reachable.

use super::{context::Snapshot, origin::OriginKind};
use crate::token::Role;

pub const LOGIN_PATH: &str = "/login";

const USER_ROUTES: &[&str] = &[
    "/",
    "/my-profile",
    "/my-appointments",
    "/my-reports",
    "/notifications",
];
const ADMIN_ROUTES: &[&str] = &[
    "/admin-dashboard",
    "/all-appointments",
    "/add-doctor",
    "/doctor-list",
];
const DOCTOR_ROUTES: &[&str] = &[
    "/doctor-dashboard",
    "/doctor-appointments",
    "/doctor-profile",
];

/// Landing route after a role becomes active.
#[must_use]
pub const fn home_path(role: Role) -> &'static str {
    match role {
        Role::User => "/",
        Role::Admin => "/admin-dashboard",
        Role::Doctor => "/doctor-dashboard",
    }
}

#[must_use]
pub const fn routes(role: Role) -> &'static [&'static str] {
    match role {
        Role::User => USER_ROUTES,
        Role::Admin => ADMIN_ROUTES,
        Role::Doctor => DOCTOR_ROUTES,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Redirect(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct RouterGuard {
    origin: OriginKind,
}

impl RouterGuard {
    #[must_use]
    pub const fn new(origin: OriginKind) -> Self {
        Self { origin }
    }

    #[must_use]
    pub fn active_role(&self, snapshot: &Snapshot) -> Option<Role> {
        snapshot.active_role(self.origin)
    }

    #[must_use]
    pub fn reachable(&self, snapshot: &Snapshot) -> &'static [&'static str] {
        match self.active_role(snapshot) {
            Some(role) => routes(role),
            None => &[LOGIN_PATH],
        }
    }

    /// Where a tab should be when it has nowhere better to go.
    #[must_use]
    pub fn landing(&self, snapshot: &Snapshot) -> &'static str {
        self.active_role(snapshot).map_or(LOGIN_PATH, home_path)
    }

    #[must_use]
    pub fn check(&self, snapshot: &Snapshot, path: &str) -> GuardDecision {
        let path = normalize(path);
        if self.reachable(snapshot).contains(&path) {
            GuardDecision::Allow
        } else {
            GuardDecision::Redirect(self.landing(snapshot))
        }
    }
}

/// Drop query, fragment and trailing slash.
fn normalize(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}
