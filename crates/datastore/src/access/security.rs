//! Security tag composition.
//!
//! Translates caller access codes into the MongoDB filter clause enforcing
//! row-level visibility, choosing between the denormalized `_access`-index
//! fast path and the generic `meta.security` scan, and merging the clause
//! into the caller's query with the AND-combination rule.

use std::sync::Arc;

use bson::{Bson, Document, doc};

use crate::config::AccessControlSettings;
use crate::error::AccessError;
use crate::query::filter::and_combine;

use super::CallerContext;
use super::scopes::{ScopeResolver, WILDCARD_ACCESS_CODE};

/// Field prefix applied when targeting the history-table layout, where the
/// resource body lives under a `resource` key.
pub(crate) const HISTORY_FIELD_PREFIX: &str = "resource.";

/// Composes security and patient-linkage filter clauses.
pub struct SecurityTagComposer {
    pub(crate) resolver: Arc<dyn ScopeResolver>,
    pub(crate) settings: Arc<AccessControlSettings>,
    pub(crate) access_tag_system: String,
}

impl SecurityTagComposer {
    /// Creates a composer over the given scope resolver and static settings.
    pub fn new(
        resolver: Arc<dyn ScopeResolver>,
        settings: Arc<AccessControlSettings>,
        access_tag_system: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            settings,
            access_tag_system: access_tag_system.into(),
        }
    }

    /// The scope resolver backing this composer.
    pub fn resolver(&self) -> &Arc<dyn ScopeResolver> {
        &self.resolver
    }

    /// Extracts the caller's security tag set for the requested action.
    ///
    /// An empty result means unrestricted visibility (wildcard scope, or a
    /// patient scope that will be enforced by the patient filter instead).
    ///
    /// # Errors
    ///
    /// `AccessError::MissingAccessScopes` when the scope yields no codes and
    /// no patient-limiting scope is active.
    pub fn security_tags_from_scope(
        &self,
        caller: &CallerContext,
        has_patient_scope: bool,
        access_requested: &str,
    ) -> Result<Vec<String>, AccessError> {
        let codes =
            self.resolver
                .access_codes_from_scopes(access_requested, &caller.user, &caller.scope);
        if codes.is_empty() {
            if has_patient_scope {
                return Ok(Vec::new());
            }
            return Err(AccessError::MissingAccessScopes {
                user: caller.user.clone(),
                scope: caller.scope.clone(),
            });
        }
        if codes.iter().any(|c| c == WILDCARD_ACCESS_CODE) {
            return Ok(Vec::new());
        }
        Ok(codes)
    }

    /// Merges the row-level visibility clause for `security_tags` into the
    /// query. An empty tag set applies no restriction.
    ///
    /// With index support, the clause tests the denormalized
    /// `_access.<code>` field (one equality, or an `$or` of equalities);
    /// otherwise it is an `$elemMatch` scan over `meta.security`.
    pub fn apply_security_filter(
        &self,
        resource_type: &str,
        security_tags: &[String],
        query: Document,
        use_access_index: bool,
        use_history_table: bool,
    ) -> Document {
        if security_tags.is_empty() {
            return query;
        }
        let prefix = if use_history_table {
            HISTORY_FIELD_PREFIX
        } else {
            ""
        };
        let indexed = use_access_index && self.settings.has_access_index(resource_type);

        let clause = if indexed {
            if let [tag] = security_tags {
                doc! { format!("{prefix}_access.{tag}"): 1 }
            } else {
                let alternatives: Vec<Document> = security_tags
                    .iter()
                    .map(|tag| doc! { format!("{prefix}_access.{tag}"): 1 })
                    .collect();
                doc! { "$or": alternatives }
            }
        } else {
            let code: Bson = if let [tag] = security_tags {
                Bson::String(tag.clone())
            } else {
                bson::bson!({ "$in": security_tags.to_vec() })
            };
            doc! { format!("{prefix}meta.security"): { "$elemMatch": {
                "system": self.access_tag_system.clone(),
                "code": code,
            } } }
        };
        and_combine(query, clause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::StandardScopeResolver;
    use crate::config::DEFAULT_ACCESS_TAG_SYSTEM;

    fn composer(settings: AccessControlSettings) -> SecurityTagComposer {
        SecurityTagComposer::new(
            Arc::new(StandardScopeResolver::new(DEFAULT_ACCESS_TAG_SYSTEM)),
            Arc::new(settings),
            DEFAULT_ACCESS_TAG_SYSTEM,
        )
    }

    fn tags(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_no_scopes_without_patient_scope_is_forbidden() {
        let composer = composer(AccessControlSettings::new());
        let caller = CallerContext::new("user-1", "launch/patient openid");

        let err = composer
            .security_tags_from_scope(&caller, false, "read")
            .unwrap_err();
        match err {
            AccessError::MissingAccessScopes { user, scope } => {
                assert_eq!(user, "user-1");
                assert!(scope.contains("launch/patient"));
            }
            other => panic!("expected MissingAccessScopes, got {other}"),
        }
    }

    #[test]
    fn test_no_scopes_with_patient_scope_is_unrestricted() {
        let composer = composer(AccessControlSettings::new());
        let caller = CallerContext::new("user-1", "patient/*.read");
        let codes = composer
            .security_tags_from_scope(&caller, true, "read")
            .unwrap();
        assert!(codes.is_empty());
    }

    #[test]
    fn test_wildcard_scope_is_unrestricted() {
        let composer = composer(AccessControlSettings::new());
        let caller = CallerContext::new("admin", "access/*.read");
        let codes = composer
            .security_tags_from_scope(&caller, false, "read")
            .unwrap();
        assert!(codes.is_empty());
    }

    #[test]
    fn test_single_code_with_index_uses_access_field() {
        let composer = composer(AccessControlSettings::new().with_access_index("Patient"));
        let query =
            composer.apply_security_filter("Patient", &tags(&["acme"]), doc! {}, true, false);
        assert_eq!(query, doc! { "$and": [ { "_access.acme": 1 } ] });
    }

    #[test]
    fn test_multiple_codes_with_index_use_or() {
        let composer = composer(AccessControlSettings::new().with_access_index("Patient"));
        let query = composer.apply_security_filter(
            "Patient",
            &tags(&["acme", "northwind"]),
            doc! {},
            true,
            false,
        );
        assert_eq!(
            query,
            doc! { "$and": [ { "$or": [
                { "_access.acme": 1 },
                { "_access.northwind": 1 },
            ] } ] }
        );
    }

    #[test]
    fn test_generic_path_uses_elem_match() {
        let composer = composer(AccessControlSettings::new());
        let query = composer.apply_security_filter(
            "Patient",
            &tags(&["acme", "northwind"]),
            doc! { "active": true },
            false,
            false,
        );
        assert_eq!(
            query,
            doc! { "$and": [
                { "active": true },
                { "meta.security": { "$elemMatch": {
                    "system": DEFAULT_ACCESS_TAG_SYSTEM,
                    "code": { "$in": ["acme", "northwind"] },
                } } },
            ] }
        );
    }

    #[test]
    fn test_history_table_prefix() {
        let composer = composer(AccessControlSettings::new());
        let query =
            composer.apply_security_filter("Patient", &tags(&["acme"]), doc! {}, false, true);
        let clauses = query.get_array("$and").unwrap();
        let clause = clauses[0].as_document().unwrap();
        assert!(clause.contains_key("resource.meta.security"));
    }

    #[test]
    fn test_empty_tags_apply_no_restriction() {
        let composer = composer(AccessControlSettings::new());
        let query = doc! { "active": true };
        let unchanged = composer.apply_security_filter("Patient", &[], query.clone(), false, false);
        assert_eq!(unchanged, query);
    }

    #[test]
    fn test_index_flag_without_configured_index_falls_back() {
        let composer = composer(AccessControlSettings::new());
        let query =
            composer.apply_security_filter("Patient", &tags(&["acme"]), doc! {}, true, false);
        let clauses = query.get_array("$and").unwrap();
        let clause = clauses[0].as_document().unwrap();
        assert!(clause.contains_key("meta.security"));
    }
}
