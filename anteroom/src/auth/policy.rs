//! Route admission policy.
//!
//! Pure decision logic, no I/O: given a resolved role (or the lack of one)
//! and a request path, decide whether to admit the request or where to send
//! it instead. Both guards (request-time and client-time) share this one
//! policy so their decisions can never disagree.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::auth::resolver::{Role, RoleResolution};
use crate::config::RoutesConfig;

/// Outcome of a policy decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmissionDecision {
    /// Let the request through unchanged.
    Allow,
    /// Send the client to this path instead.
    Redirect(String),
}

/// The admission rules, frozen from config at startup.
///
/// Rules apply first-match-wins:
/// 1. paths outside the protected prefix are public
/// 2. no resolved role sends the client to sign-in
/// 3. the admin sub-prefix requires the admin role; others land at user home
/// 4. everything else under the prefix is admitted
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    protected_prefix: String,
    admin_prefix: String,
    sign_in_path: String,
    user_home: String,
    admin_home: String,
}

/// Prefix match on path-segment boundaries: `/dashboard` covers
/// `/dashboard` and `/dashboard/users` but not `/dashboard-admin`.
fn path_is_under(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

impl RoutePolicy {
    pub fn new(routes: &RoutesConfig) -> Self {
        Self {
            protected_prefix: routes.protected_prefix.clone(),
            admin_prefix: routes.admin_prefix.clone(),
            sign_in_path: routes.sign_in_path.clone(),
            user_home: routes.user_home.clone(),
            admin_home: routes.admin_home.clone(),
        }
    }

    pub fn sign_in_path(&self) -> &str {
        &self.sign_in_path
    }

    pub fn user_home(&self) -> &str {
        &self.user_home
    }

    pub fn admin_home(&self) -> &str {
        &self.admin_home
    }

    /// Landing target for the protected root, by role.
    pub fn home_for(&self, role: Role) -> &str {
        match role {
            Role::User => &self.user_home,
            Role::Admin => &self.admin_home,
        }
    }

    /// Whether `path` lies under the protected prefix at all.
    pub fn is_protected(&self, path: &str) -> bool {
        path_is_under(path, &self.protected_prefix)
    }

    /// Decide admission for `path` under `resolution`. Total: never fails,
    /// and unrecognized or malformed paths simply fall outside the
    /// protected prefix and are public.
    pub fn decide(&self, resolution: RoleResolution, path: &str) -> AdmissionDecision {
        if !path_is_under(path, &self.protected_prefix) {
            return AdmissionDecision::Allow;
        }

        let role = match resolution {
            RoleResolution::Resolved(role) => role,
            RoleResolution::Unresolved => {
                trace!(path, "no resolved role for protected path");
                return AdmissionDecision::Redirect(self.sign_in_path.clone());
            }
        };

        if path_is_under(path, &self.admin_prefix) && role != Role::Admin {
            trace!(path, %role, "non-admin on admin path");
            return AdmissionDecision::Redirect(self.user_home.clone());
        }

        AdmissionDecision::Allow
    }

    /// Check that every redirect target admits the role sent there, so no
    /// decision chain can loop. Run once at config load.
    pub fn validate(&self) -> anyhow::Result<()> {
        if path_is_under(&self.sign_in_path, &self.protected_prefix) {
            anyhow::bail!(
                "sign-in path {} lies under the protected prefix {}; unauthenticated clients would redirect forever",
                self.sign_in_path,
                self.protected_prefix
            );
        }
        if self.decide(RoleResolution::Resolved(Role::User), &self.user_home) != AdmissionDecision::Allow {
            anyhow::bail!("user home {} does not admit the user role", self.user_home);
        }
        if self.decide(RoleResolution::Resolved(Role::Admin), &self.admin_home) != AdmissionDecision::Allow {
            anyhow::bail!("admin home {} does not admit the admin role", self.admin_home);
        }
        Ok(())
    }
}
