use std::sync::Arc;

use anyhow::Result;
use optlock::testing::MemoryBackend;
use optlock::{Dialect, Error, Model, OptimisticLock, Session};
use serde::Serialize;

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

fn session_with(backend: Arc<MemoryBackend>) -> Session {
    Session::builder(backend)
        .register(OptimisticLock::new())
        .build()
}

#[test]
fn dry_run_create_writes_nothing() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let db = session_with(backend.clone());

    let mut todo = Todo {
        description: "foo".into(),
        ..Todo::default()
    };
    let rows = db.create(&mut todo).dry_run().execute()?;

    assert_eq!(rows, 0);
    assert_eq!(todo.version, 0, "no version seeded on dry run");
    assert_eq!(backend.row_count("todos"), 0);
    Ok(())
}

#[test]
fn dry_run_update_leaves_version_and_row_alone() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let db = session_with(backend.clone());

    let mut todo = Todo {
        description: "foo".into(),
        ..Todo::default()
    };
    db.create(&mut todo).execute()?;

    todo.description = "dryrun".into();
    let rows = db.update(&mut todo).dry_run().execute()?;

    assert_eq!(rows, 0);
    assert_eq!(todo.version, 1);
    let persisted = db.reload(&todo)?.unwrap();
    assert_eq!(persisted.version, 1);
    assert_eq!(persisted.description, "foo");
    Ok(())
}

#[test]
fn unscoped_update_bypasses_version_gating() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let db = session_with(backend.clone());

    let mut todo = Todo {
        description: "foo".into(),
        ..Todo::default()
    };
    db.create(&mut todo).execute()?;

    todo.description = "unscoped".into();
    let rows = db.update(&mut todo).unscoped().execute()?;

    assert_eq!(rows, 1);
    assert_eq!(todo.version, 1, "no bump outside the lock");
    let persisted = db.reload(&todo)?.unwrap();
    assert_eq!(persisted.version, 1);
    assert_eq!(persisted.description, "unscoped");
    Ok(())
}

#[test]
fn unscoped_update_ignores_a_stale_version() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let db = session_with(backend.clone());

    let mut todo = Todo {
        description: "foo".into(),
        ..Todo::default()
    };
    db.create(&mut todo).execute()?;
    todo.description = "bar".into();
    db.update(&mut todo).execute()?;

    // Version 1 is stale, but unscoped statements are not gated. The
    // struct-form zero rule still skips zero fields; the stale version is
    // written back verbatim.
    let mut stale = Todo {
        id: todo.id,
        description: "forced".into(),
        enabled: false,
        version: 1,
    };
    let rows = db.update(&mut stale).unscoped().execute()?;

    assert_eq!(rows, 1);
    let persisted = db.reload(&todo)?.unwrap();
    assert_eq!(persisted.description, "forced");
    assert_eq!(persisted.version, 1);
    Ok(())
}

#[test]
fn mass_updates_are_not_version_gated() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let db = session_with(backend.clone());

    let mut todos = vec![
        Todo {
            description: "shared".into(),
            ..Todo::default()
        },
        Todo {
            description: "shared".into(),
            ..Todo::default()
        },
    ];
    db.create_many(&mut todos).execute()?;

    let rows = db
        .update_all::<Todo>()
        .set("enabled", true)
        .eq("description", "shared")
        .execute()?;

    assert_eq!(rows, 2);
    for todo in &todos {
        let persisted = db.reload(todo)?.unwrap();
        assert!(persisted.enabled);
        assert_eq!(persisted.version, 1, "mass update leaves versions alone");
    }
    Ok(())
}

#[test]
fn mass_update_without_predicates_is_refused() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let db = session_with(backend);

    let err = db
        .update_all::<Todo>()
        .set("enabled", true)
        .execute()
        .unwrap_err();

    assert!(matches!(err, Error::MissingPredicate));
    Ok(())
}

#[test]
fn returning_less_dialect_falls_back_to_a_reload() -> Result<()> {
    let backend = Arc::new(MemoryBackend::with_dialect(Dialect::mysql()));
    let db = session_with(backend);

    let mut todo = Todo {
        description: "foo".into(),
        ..Todo::default()
    };
    db.create(&mut todo).execute()?;

    todo.description = "bar".into();
    let rows = db.update(&mut todo).execute()?;

    assert_eq!(rows, 1);
    assert_eq!(todo.version, 2, "second round trip refreshed the model");
    assert_eq!(todo.description, "bar");
    Ok(())
}

#[test]
fn returning_less_dialect_still_detects_conflicts() -> Result<()> {
    let backend = Arc::new(MemoryBackend::with_dialect(Dialect::mysql()));
    let db = session_with(backend);

    let mut todo = Todo {
        description: "foo".into(),
        ..Todo::default()
    };
    db.create(&mut todo).execute()?;
    todo.description = "bar".into();
    db.update(&mut todo).execute()?;

    let mut stale = Todo {
        id: todo.id,
        description: "qux".into(),
        enabled: false,
        version: 1,
    };
    let err = db.update(&mut stale).execute().unwrap_err();
    assert!(err.is_version_conflict());
    Ok(())
}

#[test]
fn disable_returning_forces_the_fallback_path() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let db = Session::builder(backend)
        .register(OptimisticLock::new().disable_returning())
        .build();

    let mut todo = Todo {
        description: "foo".into(),
        ..Todo::default()
    };
    db.create(&mut todo).execute()?;

    todo.description = "bar".into();
    db.update(&mut todo).execute()?;

    assert_eq!(todo.version, 2);
    assert_eq!(todo.description, "bar");
    Ok(())
}

#[test]
fn hook_skipping_sessions_bypass_the_plugin() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let db = session_with(backend);

    let mut todo = Todo {
        description: "foo".into(),
        ..Todo::default()
    };
    db.create(&mut todo).execute()?;

    let hookless = db.skipping_hooks();
    todo.description = "bar".into();
    let rows = hookless.update(&mut todo).execute()?;

    assert_eq!(rows, 1);
    assert_eq!(todo.version, 1, "no rewrite without hooks");
    assert_eq!(db.reload(&todo)?.unwrap().version, 1);
    Ok(())
}

#[test]
fn update_many_stops_at_the_first_conflict() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let db = session_with(backend);

    let mut todos = vec![
        Todo {
            description: "a".into(),
            ..Todo::default()
        },
        Todo {
            description: "b".into(),
            ..Todo::default()
        },
    ];
    db.create_many(&mut todos).execute()?;

    // Second element goes stale behind the sequence's back.
    let mut sneak = todos[1].clone();
    sneak.description = "sneak".into();
    db.update(&mut sneak).execute()?;

    for todo in todos.iter_mut() {
        todo.description = "bulk".into();
    }
    let err = db.update_many(&mut todos).execute().unwrap_err();

    assert!(err.is_version_conflict());
    assert_eq!(todos[0].version, 2, "first element already written");
    assert_eq!(todos[1].version, 1, "second element untouched");
    Ok(())
}

#[test]
fn conflicts_show_up_in_the_metrics_dump() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let db = session_with(backend);

    let mut todo = Todo {
        description: "foo".into(),
        ..Todo::default()
    };
    db.create(&mut todo).execute()?;
    todo.description = "bar".into();
    db.update(&mut todo).execute()?;

    let mut stale = Todo {
        id: todo.id,
        description: "qux".into(),
        enabled: false,
        version: 1,
    };
    let _ = db.update(&mut stale).execute();

    let metrics = optlock::metrics::metrics();
    assert!(metrics.conflicts_total.load(std::sync::atomic::Ordering::Relaxed) >= 1);
    let dump = optlock::metrics::render_prometheus();
    assert!(dump.contains("conflicts_total"));
    assert!(dump.contains("updates_rewritten_total"));
    Ok(())
}

#[test]
fn caller_predicates_are_merged_not_duplicated() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let db = session_with(backend);

    let mut todo = Todo {
        description: "foo".into(),
        ..Todo::default()
    };
    db.create(&mut todo).execute()?;

    // An explicit predicate on the primary key coexists with the injected
    // version gate.
    todo.description = "bar".into();
    let id = todo.id;
    let rows = db.update(&mut todo).eq("id", id).execute()?;

    assert_eq!(rows, 1);
    assert_eq!(todo.version, 2);
    Ok(())
}
