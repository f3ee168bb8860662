//! Scope extraction boundary.
//!
//! Authentication and JWT decoding live outside this crate; the query core
//! consumes decoded scope strings through the [`ScopeResolver`] trait.
//! [`StandardScopeResolver`] implements the conventional
//! `access/<code>.<permission>` grammar and serves tests and simple
//! deployments.

use bson::Document;

/// The wildcard access code granting unrestricted visibility.
pub const WILDCARD_ACCESS_CODE: &str = "*";

/// Extracts authorization facts from a caller's scope string.
pub trait ScopeResolver: Send + Sync {
    /// Returns the access codes in `scope` matching the requested action
    /// (e.g. `read`, `write`), in declaration order without duplicates.
    fn access_codes_from_scopes(
        &self,
        access_requested: &str,
        user: &str,
        scope: &str,
    ) -> Vec<String>;

    /// Returns `true` if the caller's scope permits the given resource type
    /// for the requested action.
    fn has_valid_scopes(
        &self,
        resource_type: &str,
        access_requested: &str,
        user: &str,
        scope: &str,
    ) -> bool;

    /// Returns `true` if the resource carries a security tag matching any of
    /// the given access codes. Used as a defense-in-depth re-check after
    /// graph traversal.
    fn resource_has_any_access_code(
        &self,
        codes: &[String],
        user: &str,
        scope: &str,
        resource: &Document,
    ) -> bool;
}

/// Scope grammar: space-separated `access/<code>.<perm>`,
/// `user/<Type>.<perm>`, and `patient/<Type>.<perm>` items, with `*`
/// accepted for any component.
#[derive(Debug, Clone)]
pub struct StandardScopeResolver {
    access_tag_system: String,
}

impl StandardScopeResolver {
    /// Creates a resolver checking security tags against the given system.
    pub fn new(access_tag_system: impl Into<String>) -> Self {
        Self {
            access_tag_system: access_tag_system.into(),
        }
    }
}

impl ScopeResolver for StandardScopeResolver {
    fn access_codes_from_scopes(
        &self,
        access_requested: &str,
        _user: &str,
        scope: &str,
    ) -> Vec<String> {
        let mut codes: Vec<String> = Vec::new();
        for item in scope.split_whitespace() {
            let Some(rest) = item.strip_prefix("access/") else {
                continue;
            };
            let Some((code, permission)) = rest.split_once('.') else {
                continue;
            };
            if (permission == access_requested || permission == "*")
                && !codes.iter().any(|c| c == code)
            {
                codes.push(code.to_string());
            }
        }
        codes
    }

    fn has_valid_scopes(
        &self,
        resource_type: &str,
        access_requested: &str,
        _user: &str,
        scope: &str,
    ) -> bool {
        let mut saw_resource_scope = false;
        for item in scope.split_whitespace() {
            let rest = match item
                .strip_prefix("user/")
                .or_else(|| item.strip_prefix("patient/"))
            {
                Some(rest) => rest,
                None => continue,
            };
            saw_resource_scope = true;
            let Some((scoped_type, permission)) = rest.split_once('.') else {
                continue;
            };
            if (scoped_type == resource_type || scoped_type == "*")
                && (permission == access_requested || permission == "*")
            {
                return true;
            }
        }
        // A scope with no resource-level items does not restrict by type.
        !saw_resource_scope
    }

    fn resource_has_any_access_code(
        &self,
        codes: &[String],
        _user: &str,
        _scope: &str,
        resource: &Document,
    ) -> bool {
        if codes.is_empty() || codes.iter().any(|c| c == WILDCARD_ACCESS_CODE) {
            return true;
        }
        let Some(security) = resource
            .get_document("meta")
            .ok()
            .and_then(|meta| meta.get_array("security").ok())
        else {
            return false;
        };
        security.iter().any(|tag| {
            let Some(tag) = tag.as_document() else {
                return false;
            };
            tag.get_str("system").is_ok_and(|s| s == self.access_tag_system)
                && tag
                    .get_str("code")
                    .is_ok_and(|code| codes.iter().any(|c| c == code))
        })
    }
}
