use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    diff::{ChangeSet, DiffReporter},
    metrics,
    model::{Record, assign_record},
    session::Session,
    statement::{Statement, primary_key_predicates},
};

/// Caller-supplied reconciliation handler. Receives the freshly loaded row
/// and the field-path diff of the attempted write against it. Returning
/// `None` cancels the update; returning the current row unchanged accepts
/// it; returning anything else retries the update with that value.
pub type OnVersionMismatch =
    Arc<dyn Fn(&dyn Record, &ChangeSet) -> Option<Box<dyn Record>> + Send + Sync>;

/// Statement clause opting into conflict resolution.
#[derive(Clone, Default)]
pub struct Conflict {
    pub(crate) on_version_mismatch: Option<OnVersionMismatch>,
}

impl Conflict {
    pub fn on_version_mismatch<F>(handler: F) -> Self
    where
        F: Fn(&dyn Record, &ChangeSet) -> Option<Box<dyn Record>> + Send + Sync + 'static,
    {
        Self {
            on_version_mismatch: Some(Arc::new(handler)),
        }
    }

    pub(crate) fn handler(&self) -> Option<OnVersionMismatch> {
        self.on_version_mismatch.clone()
    }

    /// Associative composition: the earlier handler runs first and its
    /// output feeds the later one. When the interim value differs from the
    /// current row, the later handler sees a re-diff against the original
    /// current; a cancel from the earlier handler short-circuits.
    pub fn merge(self, other: Conflict) -> Conflict {
        match (self.on_version_mismatch, other.on_version_mismatch) {
            (Some(first), Some(second)) => {
                let chained = move |current: &dyn Record, diff: &ChangeSet| {
                    let interim = first(current, diff)?;
                    let current_json = current.to_json().ok()?;
                    let interim_json = interim.to_json().ok()?;
                    if current_json != interim_json {
                        let mut reporter = DiffReporter::new();
                        reporter.compare(&current_json, &interim_json);
                        second(interim.as_ref(), reporter.changes())
                    } else {
                        second(interim.as_ref(), diff)
                    }
                };
                Conflict {
                    on_version_mismatch: Some(Arc::new(chained)),
                }
            }
            (Some(first), None) => Conflict {
                on_version_mismatch: Some(first),
            },
            (None, second) => Conflict {
                on_version_mismatch: second,
            },
        }
    }
}

/// After-update hook: when the verifier raised the conflict signal and the
/// caller attached a handler, reload the current row, diff, and dispatch.
pub(crate) fn resolve_conflict(session: &Session, stmt: &mut Statement) {
    if stmt.dry_run || stmt.unscoped {
        return;
    }
    let Some(handler) = stmt.conflict.as_ref().and_then(Conflict::handler) else {
        return;
    };
    if !stmt.has_conflict() {
        return;
    }

    // Reload the row by primary key; hook-free by construction. A failed
    // reload leaves the original conflict in place.
    let (current, attempted_json) = {
        let Some(model) = stmt.model() else {
            return;
        };
        let Some(pk) = primary_key_predicates(model, stmt.schema) else {
            return;
        };
        let current = match session.backend().reload(stmt.schema, &pk, model) {
            Ok(Some(current)) => current,
            Ok(None) => return,
            Err(err) => {
                debug!(table = %stmt.schema.table, error = %err, "conflict reload failed");
                return;
            }
        };
        let attempted = match model.to_json() {
            Ok(value) => value,
            Err(err) => {
                debug!(table = %stmt.schema.table, error = %err, "conflict diff failed");
                return;
            }
        };
        (current, attempted)
    };
    let current_json = match current.to_json() {
        Ok(value) => value,
        Err(err) => {
            debug!(table = %stmt.schema.table, error = %err, "conflict diff failed");
            return;
        }
    };

    let mut reporter = DiffReporter::new();
    reporter.compare(&attempted_json, &current_json);

    match handler(current.as_ref(), reporter.changes()) {
        None => {
            warn!(
                table = %stmt.schema.table,
                "ignored version mismatch, cancelled update, no rows affected"
            );
            stmt.rows_affected = 0;
            metrics::record_resolution();
        }
        Some(resolved) => {
            let accepted_current = resolved
                .to_json()
                .map(|json| json == current_json)
                .unwrap_or(false);
            if accepted_current {
                warn!(
                    table = %stmt.schema.table,
                    "ignored version mismatch, accepted current value, no rows affected"
                );
                stmt.rows_affected = 0;
                if let Some(model) = stmt.model_mut() {
                    if let Err(err) = assign_record(model, current.as_ref()) {
                        debug!(table = %stmt.schema.table, error = %err, "conflict refresh failed");
                    }
                }
                metrics::record_resolution();
            } else {
                // Retry with the resolved value on a fresh session; the
                // retry re-reads the current version and is itself gated.
                let mut retry_model = resolved;
                let fresh = session.fresh();
                let (rows, error) = fresh.retry_update_record(&mut retry_model);
                if let Some(model) = stmt.model_mut() {
                    if let Err(err) = assign_record(model, retry_model.as_ref()) {
                        debug!(table = %stmt.schema.table, error = %err, "conflict refresh failed");
                    }
                }
                match error {
                    None => {
                        stmt.clear_error();
                        stmt.rows_affected = rows;
                        metrics::record_resolution();
                        metrics::record_retry();
                    }
                    Some(err) => {
                        stmt.replace_error(err);
                        stmt.rows_affected = rows;
                    }
                }
            }
        }
    }
}
