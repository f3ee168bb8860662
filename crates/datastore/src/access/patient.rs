//! Patient-linkage filtering.
//!
//! Patient-scoped callers only see resources linked to their patient ids.
//! Patient ids arrive in two shapes, server-assigned UUIDs and external
//! source ids, and reference fields are denormalized into `._uuid` and
//! `._sourceId` sub-fields accordingly, so the filter splits the id list by
//! shape (a structural check, no database lookup) and ORs the per-shape
//! clauses together.

use bson::{Document, doc};
use uuid::Uuid;

use crate::error::AccessError;
use crate::query::filter::and_combine;

use super::security::{HISTORY_FIELD_PREFIX, SecurityTagComposer};

impl SecurityTagComposer {
    /// Merges the patient-linkage clause for `patient_ids` into the query.
    ///
    /// The resource type's configured property path(s) determine where the
    /// patient reference lives: a single path, several paths unioned with
    /// `$or`, or the special path `id` meaning the resource's own
    /// `_uuid`/`_sourceId` is matched. `.reference` suffixes are substituted
    /// with `._uuid` for UUID-shaped ids and `._sourceId` for the rest.
    ///
    /// # Errors
    ///
    /// `AccessError::PatientFilterUnsupported` when the resource type has no
    /// configured patient-reference property.
    pub fn apply_patient_filter(
        &self,
        patient_ids: &[String],
        query: Document,
        resource_type: &str,
        use_history_table: bool,
    ) -> Result<Document, AccessError> {
        let paths = self.settings.patient_filter_paths(resource_type).ok_or_else(|| {
            AccessError::PatientFilterUnsupported {
                resource_type: resource_type.to_string(),
            }
        })?;
        let prefix = if use_history_table {
            HISTORY_FIELD_PREFIX
        } else {
            ""
        };

        let (uuid_ids, source_ids): (Vec<String>, Vec<String>) = patient_ids
            .iter()
            .cloned()
            .partition(|id| is_uuid_shaped(id));

        let mut shape_clauses: Vec<Document> = Vec::new();
        for (subset, suffix) in [(&uuid_ids, "_uuid"), (&source_ids, "_sourceId")] {
            // An empty patient list still produces a match-nothing clause.
            if subset.is_empty() && !(patient_ids.is_empty() && suffix == "_uuid") {
                continue;
            }
            let path_clauses: Vec<Document> = paths
                .paths()
                .into_iter()
                .map(|path| path_clause(prefix, path, suffix, subset))
                .collect();
            shape_clauses.push(or_wrap(path_clauses));
        }

        Ok(and_combine(query, or_wrap(shape_clauses)))
    }
}

/// Returns `true` if the id has UUID shape.
pub fn is_uuid_shaped(id: &str) -> bool {
    Uuid::try_parse(id).is_ok()
}

fn path_clause(prefix: &str, path: &str, suffix: &str, ids: &[String]) -> Document {
    if path == "id" {
        // The resource is the patient itself.
        return in_or_eq(format!("{prefix}{suffix}"), ids.to_vec());
    }
    let field = match path.strip_suffix(".reference") {
        Some(base) => format!("{prefix}{base}.{suffix}"),
        None => format!("{prefix}{path}"),
    };
    let references: Vec<String> = ids.iter().map(|id| format!("Patient/{id}")).collect();
    in_or_eq(field, references)
}

fn in_or_eq(field: String, values: Vec<String>) -> Document {
    if let [value] = values.as_slice() {
        doc! { field: value }
    } else {
        doc! { field: { "$in": values } }
    }
}

fn or_wrap(mut clauses: Vec<Document>) -> Document {
    if clauses.len() == 1 {
        clauses.remove(0)
    } else {
        doc! { "$or": clauses }
    }
}
