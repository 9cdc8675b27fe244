use tracing::debug;

use crate::{
    Error, metrics,
    model::{FieldValue, assign_record},
    plugin::LockConfig,
    session::Session,
    statement::{SCRATCH_FROM_VERSION, SCRATCH_TO_VERSION, ScratchValue, Statement,
        primary_key_predicates},
    version::find_version_field,
};

/// After-update hook: zero rows on a gated update means the predicate
/// missed; a returned version that is not the computed successor means the
/// driver lied. Either way the conflict signal goes onto the statement.
pub(crate) fn verify_update(config: &LockConfig, session: &Session, stmt: &mut Statement) {
    if stmt.dry_run || stmt.unscoped {
        return;
    }
    if !stmt.is_targeted() {
        return;
    }
    // A lower-level error (driver failure, cancellation) already owns the
    // statement; nothing to verify on top of it.
    if stmt.error().is_some() {
        return;
    }
    let Some(version) = find_version_field(stmt.schema, &config.tag_keyword) else {
        return;
    };

    let pending = match stmt.scratch_get(SCRATCH_TO_VERSION) {
        Some(ScratchValue::Next(next)) => Some(next.clone()),
        _ => None,
    };

    if stmt.rows_affected == 0 {
        // No bump recorded means the rewriter chose not to touch this
        // statement; nothing was attempted.
        if pending.is_none() {
            return;
        }
        metrics::record_conflict();
        stmt.add_error(Error::VersionConflict);
        return;
    }

    let Some(pending) = pending else {
        return;
    };

    if stmt.returning {
        let observed = match stmt.scratch_get(SCRATCH_FROM_VERSION) {
            Some(ScratchValue::Value(value)) => value.clone(),
            _ => FieldValue::Null,
        };
        let Some(expected) = version.kind.expected(&observed, &pending) else {
            return;
        };
        let actual = stmt
            .model()
            .and_then(|model| model.get(&version.column))
            .unwrap_or(FieldValue::Null);
        let precision = session.dialect().timestamp_precision();
        if !version.kind.matches(&expected, &actual, precision) {
            metrics::record_conflict();
            stmt.add_error(Error::VersionConflict);
        }
        return;
    }

    // RETURNING unavailable: second round trip to refresh the model with
    // the persisted row.
    let fresh = {
        let Some(model) = stmt.model() else {
            return;
        };
        let Some(pk) = primary_key_predicates(model, stmt.schema) else {
            return;
        };
        match session.backend().reload(stmt.schema, &pk, model) {
            Ok(Some(fresh)) => fresh,
            Ok(None) => return,
            Err(err) => {
                debug!(table = %stmt.schema.table, error = %err, "post-update reload failed");
                return;
            }
        }
    };
    if let Some(model) = stmt.model_mut() {
        if let Err(err) = assign_record(model, fresh.as_ref()) {
            debug!(table = %stmt.schema.table, error = %err, "post-update refresh failed");
        }
    }
}
