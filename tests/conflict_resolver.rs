use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use anyhow::Result;
use optlock::testing::MemoryBackend;
use optlock::{ChangeSet, Conflict, Model, OptimisticLock, Record, Session};
use serde::Serialize;
use serde_json::json;

#[derive(Model, Serialize, Clone, Debug, PartialEq, Default)]
#[model(table = "todos")]
struct Todo {
    #[model(primary_key, auto_increment)]
    id: u64,
    description: String,
    enabled: bool,
    #[model(tag = "version")]
    version: u64,
}

fn session() -> Session {
    Session::builder(MemoryBackend::new())
        .register(OptimisticLock::new())
        .build()
}

/// Create a row, bump it to version 2 behind the caller's back, and return
/// a stale in-memory copy still holding version 1.
fn seed_conflict(db: &Session) -> Result<(Todo, Todo)> {
    let mut winner = Todo {
        description: "foo".into(),
        ..Todo::default()
    };
    db.create(&mut winner).execute()?;
    winner.description = "bar".into();
    db.update(&mut winner).execute()?;
    assert_eq!(winner.version, 2);

    let stale = Todo {
        id: winner.id,
        description: "qux".into(),
        enabled: false,
        version: 1,
    };
    Ok((winner, stale))
}

#[test]
fn resolver_returning_current_accepts_it_but_keeps_the_error() -> Result<()> {
    let db = session();
    let (winner, mut stale) = seed_conflict(&db)?;

    let err = db
        .update(&mut stale)
        .conflict(Conflict::on_version_mismatch(
            |current: &dyn Record, _diff: &ChangeSet| Some(current.clone_record()),
        ))
        .execute()
        .unwrap_err();

    assert!(err.is_version_conflict(), "caller still learns of the miss");
    assert_eq!(stale, winner, "in-memory copy overwritten with the fresh row");
    assert_eq!(db.reload(&winner)?.unwrap().version, 2, "nothing written");
    Ok(())
}

#[test]
fn resolver_returning_none_cancels() -> Result<()> {
    let db = session();
    let (winner, mut stale) = seed_conflict(&db)?;

    let err = db
        .update(&mut stale)
        .conflict(Conflict::on_version_mismatch(
            |_current: &dyn Record, _diff: &ChangeSet| None,
        ))
        .execute()
        .unwrap_err();

    assert!(err.is_version_conflict());
    assert_eq!(stale.version, 1, "model untouched on cancel");
    assert_eq!(stale.description, "qux");
    let persisted = db.reload(&winner)?.unwrap();
    assert_eq!(persisted.version, 2);
    assert_eq!(persisted.description, "bar");
    Ok(())
}

#[test]
fn resolver_returning_merged_value_retries() -> Result<()> {
    let db = session();
    let (winner, mut stale) = seed_conflict(&db)?;

    let rows = db
        .update(&mut stale)
        .conflict(Conflict::on_version_mismatch(
            |current: &dyn Record, _diff: &ChangeSet| {
                let mut merged = current.downcast_ref::<Todo>()?.clone();
                merged.description = "baz".into();
                Some(Box::new(merged))
            },
        ))
        .execute()?;

    assert_eq!(rows, 1);
    assert_eq!(stale.version, 3, "retry persisted on top of the current row");
    assert_eq!(stale.description, "baz");
    let persisted = db.reload(&winner)?.unwrap();
    assert_eq!(persisted.version, 3);
    assert_eq!(persisted.description, "baz");
    Ok(())
}

#[test]
fn resolver_sees_the_fresh_row_and_the_diff() -> Result<()> {
    let db = session();
    let (_, mut stale) = seed_conflict(&db)?;

    let seen: Arc<Mutex<Option<(Todo, ChangeSet)>>> = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    let _ = db
        .update(&mut stale)
        .conflict(Conflict::on_version_mismatch(
            move |current: &dyn Record, diff: &ChangeSet| {
                let current = current.downcast_ref::<Todo>()?.clone();
                *sink.lock().unwrap() = Some((current, diff.clone()));
                None
            },
        ))
        .execute();

    let (current, diff) = seen.lock().unwrap().take().expect("handler invoked");
    assert_eq!(current.version, 2);
    assert_eq!(current.description, "bar");

    let description = &diff["description"];
    assert_eq!(description.from, json!("qux"));
    assert_eq!(description.to, json!("bar"));
    let version = &diff["version"];
    assert_eq!(version.from, json!(1));
    assert_eq!(version.to, json!(2));
    Ok(())
}

#[test]
fn chained_conflict_clauses_compose() -> Result<()> {
    let db = session();
    let (winner, mut stale) = seed_conflict(&db)?;

    let second_saw: Arc<Mutex<Option<(String, ChangeSet)>>> = Arc::new(Mutex::new(None));
    let sink = second_saw.clone();

    let first = Conflict::on_version_mismatch(|current: &dyn Record, _diff: &ChangeSet| {
        let mut interim = current.downcast_ref::<Todo>()?.clone();
        interim.description = "one".into();
        Some(Box::new(interim))
    });
    let second = Conflict::on_version_mismatch(
        move |current: &dyn Record, diff: &ChangeSet| {
            let mut merged = current.downcast_ref::<Todo>()?.clone();
            *sink.lock().unwrap() = Some((merged.description.clone(), diff.clone()));
            merged.description = "two".into();
            Some(Box::new(merged))
        },
    );

    let rows = db
        .update(&mut stale)
        .conflict(first)
        .conflict(second)
        .execute()?;

    assert_eq!(rows, 1);
    let (interim_description, rediff) = second_saw.lock().unwrap().take().expect("second ran");
    assert_eq!(interim_description, "one", "second handler sees the interim value");
    assert_eq!(rediff["description"].from, json!("bar"));
    assert_eq!(rediff["description"].to, json!("one"));

    let persisted = db.reload(&winner)?.unwrap();
    assert_eq!(persisted.description, "two");
    assert_eq!(persisted.version, 3);
    Ok(())
}

#[test]
fn chained_cancel_short_circuits() -> Result<()> {
    let db = session();
    let (_, mut stale) = seed_conflict(&db)?;

    let second_ran = Arc::new(AtomicBool::new(false));
    let flag = second_ran.clone();

    let err = db
        .update(&mut stale)
        .conflict(Conflict::on_version_mismatch(
            |_current: &dyn Record, _diff: &ChangeSet| None,
        ))
        .conflict(Conflict::on_version_mismatch(
            move |current: &dyn Record, _diff: &ChangeSet| {
                flag.store(true, Ordering::SeqCst);
                Some(current.clone_record())
            },
        ))
        .execute()
        .unwrap_err();

    assert!(err.is_version_conflict());
    assert!(!second_ran.load(Ordering::SeqCst), "cancel wins the chain");
    Ok(())
}

#[test]
fn diff_records_reports_field_level_changes() -> Result<()> {
    let a = Todo {
        id: 1,
        description: "qux".into(),
        enabled: true,
        version: 1,
    };
    let b = Todo {
        id: 1,
        description: "bar".into(),
        enabled: true,
        version: 2,
    };

    let changes = optlock::diff_records(&a, &b)?;
    assert_eq!(changes.len(), 2);
    assert_eq!(changes["description"].from, json!("qux"));
    assert_eq!(changes["description"].to, json!("bar"));
    assert_eq!(changes["version"].from, json!(1));
    assert_eq!(changes["version"].to, json!(2));
    Ok(())
}

#[test]
fn conflict_clause_without_a_mismatch_never_fires() -> Result<()> {
    let db = session();
    let mut todo = Todo {
        description: "foo".into(),
        ..Todo::default()
    };
    db.create(&mut todo).execute()?;

    let fired = Arc::new(AtomicBool::new(false));
    let flag = fired.clone();
    todo.description = "bar".into();
    db.update(&mut todo)
        .conflict(Conflict::on_version_mismatch(
            move |current: &dyn Record, _diff: &ChangeSet| {
                flag.store(true, Ordering::SeqCst);
                Some(current.clone_record())
            },
        ))
        .execute()?;

    assert!(!fired.load(Ordering::SeqCst));
    assert_eq!(todo.version, 2);
    Ok(())
}
