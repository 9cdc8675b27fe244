use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    Error, Result,
    conflict::Conflict,
    model::{FieldValue, Model, Record},
    schema::{ModelSchema, NamingStrategy},
    statement::{
        Operation, Predicate, Statement, build_map_assignments, build_struct_assignments,
        primary_key_predicates,
    },
    version::TimestampPrecision,
};

/// Database flavor as reported by the host driver. Only two behaviors hang
/// off it: whether `RETURNING` is available, and timestamp granularity.
#[derive(Clone, Debug)]
pub struct Dialect {
    name: String,
    timestamp_precision: TimestampPrecision,
}

impl Dialect {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timestamp_precision: TimestampPrecision::Micros,
        }
    }

    pub fn postgres() -> Self {
        Self::new("postgres")
    }

    pub fn mysql() -> Self {
        Self::new("mysql")
    }

    pub fn with_timestamp_precision(mut self, precision: TimestampPrecision) -> Self {
        self.timestamp_precision = precision;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn supports_returning(&self) -> bool {
        !self.name.eq_ignore_ascii_case("mysql")
    }

    pub fn timestamp_precision(&self) -> TimestampPrecision {
        self.timestamp_precision
    }
}

/// Execution interface supplied by the host. SQL generation, quoting and
/// transport live behind this boundary.
pub trait Backend: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Execute the statement, returning rows affected. Implementations
    /// write returned rows back into the statement's destination models
    /// when `returning` is set, and write generated keys back on insert.
    fn execute(&self, stmt: &mut Statement) -> Result<u64>;

    /// Single-row lookup by predicates. `template` supplies the concrete
    /// model type the returned record is built from.
    fn reload(
        &self,
        schema: &'static ModelSchema,
        predicates: &[Predicate],
        template: &dyn Record,
    ) -> Result<Option<Box<dyn Record>>>;
}

impl<B: Backend + ?Sized> Backend for Arc<B> {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    fn execute(&self, stmt: &mut Statement) -> Result<u64> {
        (**self).execute(stmt)
    }

    fn reload(
        &self,
        schema: &'static ModelSchema,
        predicates: &[Predicate],
        template: &dyn Record,
    ) -> Result<Option<Box<dyn Record>>> {
        (**self).reload(schema, predicates, template)
    }
}

pub type Hook = Arc<dyn Fn(&Session, &mut Statement) + Send + Sync>;

/// Ordered, named hook slots around statement execution.
#[derive(Default)]
pub struct Callbacks {
    pub(crate) before_create: Vec<(String, Hook)>,
    pub(crate) after_create: Vec<(String, Hook)>,
    pub(crate) before_update: Vec<(String, Hook)>,
    pub(crate) after_update: Vec<(String, Hook)>,
}

impl Callbacks {
    pub fn register_before_create<F>(&mut self, name: impl Into<String>, hook: F)
    where
        F: Fn(&Session, &mut Statement) + Send + Sync + 'static,
    {
        self.before_create.push((name.into(), Arc::new(hook)));
    }

    pub fn register_after_create<F>(&mut self, name: impl Into<String>, hook: F)
    where
        F: Fn(&Session, &mut Statement) + Send + Sync + 'static,
    {
        self.after_create.push((name.into(), Arc::new(hook)));
    }

    pub fn register_before_update<F>(&mut self, name: impl Into<String>, hook: F)
    where
        F: Fn(&Session, &mut Statement) + Send + Sync + 'static,
    {
        self.before_update.push((name.into(), Arc::new(hook)));
    }

    pub fn register_after_update<F>(&mut self, name: impl Into<String>, hook: F)
    where
        F: Fn(&Session, &mut Statement) + Send + Sync + 'static,
    {
        self.after_update.push((name.into(), Arc::new(hook)));
    }
}

/// A pipeline extension contributing hooks, registered at session build
/// time.
pub trait Plugin {
    fn name(&self) -> &str;

    fn register(&self, callbacks: &mut Callbacks);
}

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Entry point for statement construction. Cheap to clone; fresh sessions
/// derived from it share the backend and hook registry.
#[derive(Clone)]
pub struct Session {
    backend: Arc<dyn Backend>,
    callbacks: Arc<Callbacks>,
    naming: NamingStrategy,
    clock: Clock,
    skip_hooks: bool,
}

impl Session {
    pub fn builder(backend: impl Backend + 'static) -> SessionBuilder {
        SessionBuilder {
            backend: Arc::new(backend),
            callbacks: Callbacks::default(),
            naming: NamingStrategy,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn dialect(&self) -> Dialect {
        self.backend.dialect()
    }

    pub fn naming(&self) -> &NamingStrategy {
        &self.naming
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// A new session over the same backend with hooks enabled.
    pub fn fresh(&self) -> Session {
        let mut session = self.clone();
        session.skip_hooks = false;
        session
    }

    /// A new session whose statements bypass all registered hooks.
    pub fn skipping_hooks(&self) -> Session {
        let mut session = self.clone();
        session.skip_hooks = true;
        session
    }

    pub fn create<'a, T: Model>(&'a self, model: &'a mut T) -> CreateBuilder<'a, T> {
        CreateBuilder {
            session: self,
            target: CreateTarget::One(model),
            dry_run: false,
            unscoped: false,
        }
    }

    pub fn create_many<'a, T: Model>(&'a self, models: &'a mut [T]) -> CreateBuilder<'a, T> {
        CreateBuilder {
            session: self,
            target: CreateTarget::Many(models),
            dry_run: false,
            unscoped: false,
        }
    }

    pub fn update<'a, T: Model>(&'a self, model: &'a mut T) -> UpdateBuilder<'a, T> {
        UpdateBuilder::new(self, UpdateTarget::One(model))
    }

    pub fn update_many<'a, T: Model>(&'a self, models: &'a mut [T]) -> UpdateBuilder<'a, T> {
        UpdateBuilder::new(self, UpdateTarget::Many(models))
    }

    /// Mass update addressed by predicates alone; never version-gated.
    pub fn update_all<T: Model>(&self) -> UpdateBuilder<'_, T> {
        UpdateBuilder::new(self, UpdateTarget::Table)
    }

    /// Fetch the persisted row matching `template`'s primary key.
    pub fn reload<T: Model>(&self, template: &T) -> Result<Option<T>> {
        let schema = T::model_schema();
        let record: &dyn Record = template;
        let predicates =
            primary_key_predicates(record, schema).ok_or(Error::MissingPredicate)?;
        match self.backend.reload(schema, &predicates, record)? {
            Some(fresh) => Ok(fresh.as_any().downcast_ref::<T>().cloned()),
            None => Ok(None),
        }
    }

    pub(crate) fn run(&self, stmt: &mut Statement) {
        match stmt.operation {
            Operation::Create => {
                if !self.skip_hooks {
                    for (_, hook) in &self.callbacks.before_create {
                        hook(self, stmt);
                    }
                }
                self.execute(stmt);
                if !self.skip_hooks {
                    for (_, hook) in &self.callbacks.after_create {
                        hook(self, stmt);
                    }
                }
            }
            Operation::Update => {
                if !self.skip_hooks {
                    for (_, hook) in &self.callbacks.before_update {
                        hook(self, stmt);
                    }
                }
                self.prepare_update(stmt);
                self.execute(stmt);
                if !self.skip_hooks {
                    for (_, hook) in &self.callbacks.after_update {
                        hook(self, stmt);
                    }
                }
            }
        }
    }

    /// Internal retry path used by the conflict resolver: a plain
    /// struct-form update of `record` through the full pipeline.
    pub(crate) fn retry_update_record(&self, record: &mut Box<dyn Record>) -> (u64, Option<Error>) {
        let mut stmt = Statement::update(record.schema());
        stmt.models.push(record.clone_record());
        self.run(&mut stmt);
        if let Some(result) = stmt.models.first() {
            let _ = crate::model::assign_record(record.as_mut(), result.as_ref());
        }
        (stmt.rows_affected, stmt.take_error())
    }

    /// Host-side defaults for statements the hooks left alone: SET built
    /// from the map or the model, and primary-key predicates for targeted
    /// updates. Mass updates without any predicate are refused.
    fn prepare_update(&self, stmt: &mut Statement) {
        if stmt.error().is_some() {
            return;
        }
        if stmt.assignments.is_empty() {
            if stmt.set_map.is_some() {
                match build_map_assignments(stmt, &self.naming, None) {
                    Ok(assignments) => stmt.assignments = assignments,
                    Err(err) => {
                        stmt.add_error(err);
                        return;
                    }
                }
            } else if stmt.model().is_some() {
                stmt.assignments = build_struct_assignments(stmt, &self.naming, None);
            }
        }

        let pk = stmt
            .model()
            .and_then(|model| primary_key_predicates(model, stmt.schema));
        match pk {
            Some(predicates) => {
                for predicate in predicates {
                    if !stmt.has_predicate(&predicate.column, &self.naming) {
                        stmt.predicates.push(predicate);
                    }
                }
            }
            None => {
                if stmt.predicates.is_empty() {
                    stmt.add_error(Error::MissingPredicate);
                }
            }
        }
    }

    fn execute(&self, stmt: &mut Statement) {
        if stmt.error().is_some() || stmt.dry_run {
            return;
        }
        if stmt.operation == Operation::Update && stmt.assignments.is_empty() {
            return;
        }
        match self.backend.execute(stmt) {
            Ok(rows) => stmt.rows_affected = rows,
            Err(err) => stmt.add_error(err),
        }
    }
}

pub struct SessionBuilder {
    backend: Arc<dyn Backend>,
    callbacks: Callbacks,
    naming: NamingStrategy,
    clock: Clock,
}

impl SessionBuilder {
    pub fn register(mut self, plugin: impl Plugin) -> Self {
        plugin.register(&mut self.callbacks);
        self
    }

    pub fn naming(mut self, naming: NamingStrategy) -> Self {
        self.naming = naming;
        self
    }

    /// Override the time source; timestamp versions are drawn from it.
    pub fn clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn build(self) -> Session {
        Session {
            backend: self.backend,
            callbacks: Arc::new(self.callbacks),
            naming: self.naming,
            clock: self.clock,
            skip_hooks: false,
        }
    }
}

enum CreateTarget<'a, T> {
    One(&'a mut T),
    Many(&'a mut [T]),
}

pub struct CreateBuilder<'a, T: Model> {
    session: &'a Session,
    target: CreateTarget<'a, T>,
    dry_run: bool,
    unscoped: bool,
}

impl<'a, T: Model> CreateBuilder<'a, T> {
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn unscoped(mut self) -> Self {
        self.unscoped = true;
        self
    }

    pub fn execute(self) -> Result<u64> {
        let mut stmt = Statement::create(T::model_schema());
        stmt.dry_run = self.dry_run;
        stmt.unscoped = self.unscoped;
        match self.target {
            CreateTarget::One(model) => {
                stmt.models.push(Box::new(model.clone()));
                self.session.run(&mut stmt);
                copy_back(&stmt, std::slice::from_mut(model));
                finish(stmt)
            }
            CreateTarget::Many(models) => {
                if models.is_empty() {
                    return Ok(0);
                }
                for model in models.iter() {
                    stmt.models.push(Box::new(model.clone()));
                }
                self.session.run(&mut stmt);
                copy_back(&stmt, models);
                finish(stmt)
            }
        }
    }
}

enum UpdateTarget<'a, T> {
    One(&'a mut T),
    Many(&'a mut [T]),
    Table,
}

pub struct UpdateBuilder<'a, T: Model> {
    session: &'a Session,
    target: UpdateTarget<'a, T>,
    set_map: Vec<(String, FieldValue)>,
    selected: Vec<String>,
    omitted: Vec<String>,
    predicates: Vec<(String, FieldValue)>,
    dry_run: bool,
    unscoped: bool,
    conflict: Option<Conflict>,
}

impl<'a, T: Model> UpdateBuilder<'a, T> {
    fn new(session: &'a Session, target: UpdateTarget<'a, T>) -> Self {
        Self {
            session,
            target,
            set_map: Vec::new(),
            selected: Vec::new(),
            omitted: Vec::new(),
            predicates: Vec::new(),
            dry_run: false,
            unscoped: false,
            conflict: None,
        }
    }

    /// Map-form assignment; column keys pass through the naming strategy.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set_map.push((column.into(), value.into()));
        self
    }

    /// Restrict the update to these columns; `"*"` selects every column,
    /// forcing zero values to be written.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn omit<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.omitted.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Caller-supplied equality predicate.
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.predicates.push((column.into(), value.into()));
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn unscoped(mut self) -> Self {
        self.unscoped = true;
        self
    }

    /// Attach a conflict clause; repeated clauses merge associatively.
    pub fn conflict(mut self, clause: Conflict) -> Self {
        self.conflict = Some(match self.conflict.take() {
            Some(existing) => existing.merge(clause),
            None => clause,
        });
        self
    }

    pub fn execute(self) -> Result<u64> {
        let UpdateBuilder {
            session,
            target,
            set_map,
            selected,
            omitted,
            predicates,
            dry_run,
            unscoped,
            conflict,
        } = self;
        let naming = session.naming().clone();
        let build = |models: Vec<Box<dyn Record>>| {
            let mut stmt = Statement::update(T::model_schema());
            stmt.models = models;
            if !set_map.is_empty() {
                stmt.set_map = Some(set_map.clone());
            }
            stmt.selected = selected.clone();
            stmt.omitted = omitted.clone();
            stmt.predicates = predicates
                .iter()
                .map(|(column, value)| Predicate {
                    column: naming.column_name(column),
                    value: value.clone(),
                })
                .collect();
            stmt.dry_run = dry_run;
            stmt.unscoped = unscoped;
            stmt.conflict = conflict.clone();
            stmt
        };

        match target {
            UpdateTarget::One(model) => {
                let mut stmt = build(vec![Box::new(model.clone())]);
                session.run(&mut stmt);
                copy_back(&stmt, std::slice::from_mut(model));
                finish(stmt)
            }
            UpdateTarget::Many(models) => {
                // An ordered sequence of targeted models updates row by
                // row; the first failure aborts the remainder.
                let mut total = 0u64;
                for model in models.iter_mut() {
                    let mut stmt = build(vec![Box::new(model.clone())]);
                    session.run(&mut stmt);
                    copy_back(&stmt, std::slice::from_mut(model));
                    total += stmt.rows_affected;
                    if let Some(err) = stmt.take_error() {
                        return Err(err);
                    }
                }
                Ok(total)
            }
            UpdateTarget::Table => {
                let mut stmt = build(Vec::new());
                session.run(&mut stmt);
                finish(stmt)
            }
        }
    }
}

fn copy_back<T: Model>(stmt: &Statement, targets: &mut [T]) {
    for (target, boxed) in targets.iter_mut().zip(stmt.models.iter()) {
        if let Some(updated) = boxed.as_any().downcast_ref::<T>() {
            *target = updated.clone();
        }
    }
}

fn finish(mut stmt: Statement) -> Result<u64> {
    match stmt.take_error() {
        Some(err) => Err(err),
        None => Ok(stmt.rows_affected),
    }
}
