use tracing::debug;

use crate::{
    metrics,
    model::FieldValue,
    plugin::LockConfig,
    session::Session,
    statement::{
        Assignment, Predicate, REWRITE_APPLIED, SCRATCH_FROM_VERSION, SCRATCH_TO_VERSION,
        ScratchValue, SetExpr, Statement, build_map_assignments, build_struct_assignments,
        primary_key_predicates,
    },
    version::{NextVersion, find_version_field},
};

/// Before-update hook: the central rewrite. Captures the observed version,
/// rebuilds SET with a bump appended, gates WHERE on primary key plus the
/// observed version, and requests RETURNING where the dialect has it.
pub(crate) fn rewrite_update(config: &LockConfig, session: &Session, stmt: &mut Statement) {
    // Once per statement; later pipeline re-entries are no-ops.
    if stmt.has_flag(REWRITE_APPLIED) {
        return;
    }
    if stmt.dry_run || stmt.unscoped {
        return;
    }
    let Some(version) = find_version_field(stmt.schema, &config.tag_keyword) else {
        return;
    };
    // Mass updates addressed by arbitrary predicates are never gated.
    if !stmt.is_targeted() {
        return;
    }

    let naming = session.naming();
    let (observed, assignments, pk) = {
        let Some(model) = stmt.model() else {
            return;
        };
        let observed = model.get(&version.column).unwrap_or(FieldValue::Null);
        let assignments = if stmt.set_map.is_some() {
            build_map_assignments(stmt, naming, Some(version.column.as_str()))
        } else {
            Ok(build_struct_assignments(stmt, naming, Some(version.column.as_str())))
        };
        let pk = primary_key_predicates(model, stmt.schema);
        (observed, assignments, pk)
    };

    let mut assignments = match assignments {
        Ok(assignments) => assignments,
        Err(err) => {
            stmt.add_error(err);
            return;
        }
    };
    // Refuse to touch the version alone; a no-op update stays a no-op.
    if assignments.is_empty() {
        debug!(table = %stmt.schema.table, "no assignable columns, version left untouched");
        return;
    }

    let next = version
        .kind
        .next(&observed, session.now(), session.dialect().timestamp_precision());
    assignments.push(match &next {
        NextVersion::Increment => Assignment {
            column: version.column.clone(),
            value: SetExpr::Increment,
        },
        NextVersion::Value(value) => Assignment::value(version.column.clone(), value.clone()),
    });
    stmt.scratch_set(SCRATCH_FROM_VERSION, ScratchValue::Value(observed.clone()));
    stmt.scratch_set(SCRATCH_TO_VERSION, ScratchValue::Next(next));
    stmt.assignments = assignments;

    if let Some(predicates) = pk {
        for predicate in predicates {
            if !stmt.has_predicate(&predicate.column, naming) {
                stmt.predicates.push(predicate);
            }
        }
    }
    stmt.predicates.push(Predicate {
        column: version.column.clone(),
        value: observed,
    });

    if session.dialect().supports_returning() && !config.disable_returning && !stmt.returning {
        stmt.returning = true;
    }
    stmt.set_flag(REWRITE_APPLIED);
    metrics::record_rewrite();
}
