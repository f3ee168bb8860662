//! Row-level access control.
//!
//! Callers arrive with a user identifier and an OAuth-style scope string.
//! This module extracts access codes from the scope, composes the MongoDB
//! filter fragments that enforce row-level visibility (choosing between the
//! denormalized `_access`-index fast path and the generic `meta.security`
//! scan), and builds the patient-linkage filter for patient-scoped callers.
//!
//! - [`scopes`] - scope extraction boundary and the standard implementation
//! - [`security`] - the security tag composer
//! - [`patient`] - patient-linkage filtering

pub mod patient;
pub mod scopes;
pub mod security;

pub use scopes::{ScopeResolver, StandardScopeResolver, WILDCARD_ACCESS_CODE};
pub use security::SecurityTagComposer;

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    /// The user identifier (for diagnostics and authorization errors).
    pub user: String,
    /// The caller's space-separated scope string.
    pub scope: String,
}

impl CallerContext {
    /// Creates a caller context.
    pub fn new(user: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            scope: scope.into(),
        }
    }
}
