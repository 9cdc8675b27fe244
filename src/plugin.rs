use std::sync::Arc;

use crate::{
    conflict, rewrite, seed,
    session::{Callbacks, Plugin},
    verify,
};

pub(crate) struct LockConfig {
    /// Tag keyword the introspector recognizes on model fields.
    pub tag_keyword: String,
    /// Force the verifier onto the two-round-trip fallback path even when
    /// the dialect supports RETURNING.
    pub disable_returning: bool,
}

/// The optimistic-locking plugin. Registers the create-phase seeder, the
/// update rewriter, the post-update verifier and the conflict resolver
/// into a session's callback pipeline.
///
/// ```no_run
/// # use optlock::{OptimisticLock, Session};
/// # use optlock::testing::MemoryBackend;
/// let db = Session::builder(MemoryBackend::new())
///     .register(OptimisticLock::new())
///     .build();
/// ```
pub struct OptimisticLock {
    config: LockConfig,
}

impl OptimisticLock {
    pub fn new() -> Self {
        Self {
            config: LockConfig {
                tag_keyword: "version".to_string(),
                disable_returning: false,
            },
        }
    }

    pub fn tag_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.config.tag_keyword = keyword.into();
        self
    }

    pub fn disable_returning(mut self) -> Self {
        self.config.disable_returning = true;
        self
    }
}

impl Default for OptimisticLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for OptimisticLock {
    fn name(&self) -> &str {
        "optimistic_lock"
    }

    fn register(&self, callbacks: &mut Callbacks) {
        let config = Arc::new(LockConfig {
            tag_keyword: self.config.tag_keyword.clone(),
            disable_returning: self.config.disable_returning,
        });

        let cfg = config.clone();
        callbacks.register_before_create("optimistic:seed_version", move |session, stmt| {
            seed::seed_create(&cfg, session, stmt);
        });

        let cfg = config.clone();
        callbacks.register_after_create("optimistic:verify_create", move |session, stmt| {
            seed::verify_create(&cfg, session, stmt);
        });

        let cfg = config.clone();
        callbacks.register_before_update("optimistic:rewrite_update", move |session, stmt| {
            rewrite::rewrite_update(&cfg, session, stmt);
        });

        let cfg = config.clone();
        callbacks.register_after_update("optimistic:verify_update", move |session, stmt| {
            verify::verify_update(&cfg, session, stmt);
        });

        callbacks.register_after_update("optimistic:resolve_conflict", |session, stmt| {
            conflict::resolve_conflict(session, stmt);
        });
    }
}
