use crate::{
    Error, metrics,
    model::FieldValue,
    plugin::LockConfig,
    session::Session,
    statement::{SEED_APPLIED, Statement},
    version::{VersionKind, find_version_field},
};

/// Before-create hook: write a type-appropriate initial version into every
/// destination model. Dry-run and unscoped creates are left alone.
pub(crate) fn seed_create(config: &LockConfig, session: &Session, stmt: &mut Statement) {
    if stmt.dry_run || stmt.unscoped {
        return;
    }
    if stmt.has_flag(SEED_APPLIED) {
        return;
    }
    let Some(version) = find_version_field(stmt.schema, &config.tag_keyword) else {
        return;
    };

    let now = session.now();
    let precision = session.dialect().timestamp_precision();
    let mut failure = None;
    for model in stmt.models.iter_mut() {
        let initial = version.kind.initial(now, precision);
        if let Err(err) = model.set(&version.column, initial) {
            failure = Some(err);
            break;
        }
    }
    if let Some(err) = failure {
        stmt.add_error(err);
        return;
    }
    stmt.set_flag(SEED_APPLIED);
    metrics::record_seed(stmt.models.len() as u64);
}

/// After-create hook: the seeded value must have survived the driver.
/// Integers must come back as exactly 1; every other kind must be non-zero.
pub(crate) fn verify_create(config: &LockConfig, _session: &Session, stmt: &mut Statement) {
    if stmt.dry_run || stmt.unscoped {
        return;
    }
    if !stmt.has_flag(SEED_APPLIED) {
        return;
    }
    if stmt.error().is_some() {
        return;
    }
    let Some(version) = find_version_field(stmt.schema, &config.tag_keyword) else {
        return;
    };

    let all_persisted = stmt.models.iter().all(|model| {
        let value = model.get(&version.column).unwrap_or(FieldValue::Null);
        match version.kind {
            VersionKind::Int => value.as_uint() == Some(1),
            _ => !value.is_zero(),
        }
    });
    if !all_persisted {
        metrics::record_conflict();
        stmt.add_error(Error::VersionConflict);
    }
}
