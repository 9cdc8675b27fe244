use std::collections::{HashMap, HashSet};

use crate::{
    Error, Result,
    conflict::Conflict,
    model::{FieldValue, Record},
    schema::{ModelSchema, NamingStrategy},
    version::NextVersion,
};

/// Scratch keys used to pass version state between the before- and
/// after-update hooks. Statement-scoped; gone when the statement finishes.
pub const SCRATCH_FROM_VERSION: &str = "optimistic:from_version";
pub const SCRATCH_TO_VERSION: &str = "optimistic:to_version";

/// Idempotence sentinels. A statement carrying one of these flags has
/// already been through the corresponding hook.
pub const REWRITE_APPLIED: &str = "optimistic:rewrite_applied";
pub const SEED_APPLIED: &str = "optimistic:seed_applied";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
}

/// One SET entry. `Increment` is the symbolic `column = column + 1`
/// expression used for integer version bumps.
#[derive(Clone, Debug, PartialEq)]
pub enum SetExpr {
    Value(FieldValue),
    Increment,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: SetExpr,
}

impl Assignment {
    pub fn value(column: impl Into<String>, value: FieldValue) -> Self {
        Self {
            column: column.into(),
            value: SetExpr::Value(value),
        }
    }
}

/// Equality predicate on a column.
#[derive(Clone, Debug, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub value: FieldValue,
}

#[derive(Clone, Debug)]
pub enum ScratchValue {
    Value(FieldValue),
    Next(NextVersion),
}

/// A single statement moving through the pipeline: destination models,
/// caller-supplied clauses, hook-built clauses, flags, scratch, and the
/// execution outcome.
pub struct Statement {
    pub operation: Operation,
    pub schema: &'static ModelSchema,
    pub models: Vec<Box<dyn Record>>,
    /// Map-form assignments as supplied by the caller (column keys are
    /// resolved through the naming strategy when SET is built).
    pub set_map: Option<Vec<(String, FieldValue)>>,
    pub assignments: Vec<Assignment>,
    pub predicates: Vec<Predicate>,
    pub returning: bool,
    pub dry_run: bool,
    pub unscoped: bool,
    pub selected: Vec<String>,
    pub omitted: Vec<String>,
    pub conflict: Option<Conflict>,
    pub rows_affected: u64,
    error: Option<Error>,
    flags: HashSet<&'static str>,
    scratch: HashMap<&'static str, ScratchValue>,
}

impl Statement {
    pub fn new(operation: Operation, schema: &'static ModelSchema) -> Self {
        Self {
            operation,
            schema,
            models: Vec::new(),
            set_map: None,
            assignments: Vec::new(),
            predicates: Vec::new(),
            returning: false,
            dry_run: false,
            unscoped: false,
            selected: Vec::new(),
            omitted: Vec::new(),
            conflict: None,
            rows_affected: 0,
            error: None,
            flags: HashSet::new(),
            scratch: HashMap::new(),
        }
    }

    pub fn create(schema: &'static ModelSchema) -> Self {
        Self::new(Operation::Create, schema)
    }

    pub fn update(schema: &'static ModelSchema) -> Self {
        Self::new(Operation::Update, schema)
    }

    pub fn model(&self) -> Option<&dyn Record> {
        self.models.first().map(|m| m.as_ref())
    }

    pub fn model_mut(&mut self) -> Option<&mut (dyn Record + '_)> {
        match self.models.first_mut() {
            Some(m) => Some(m.as_mut()),
            None => None,
        }
    }

    /// First error wins; later errors are dropped so the original signal
    /// stays identity-testable.
    pub fn add_error(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Unconditional replacement, used when a resolver retry supersedes
    /// the original conflict.
    pub fn replace_error(&mut self, error: Error) {
        self.error = Some(error);
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    pub fn has_conflict(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|e| e.is_version_conflict())
    }

    pub fn set_flag(&mut self, flag: &'static str) {
        self.flags.insert(flag);
    }

    pub fn has_flag(&self, flag: &'static str) -> bool {
        self.flags.contains(flag)
    }

    pub fn scratch_set(&mut self, key: &'static str, value: ScratchValue) {
        self.scratch.insert(key, value);
    }

    pub fn scratch_get(&self, key: &str) -> Option<&ScratchValue> {
        self.scratch.get(key)
    }

    /// A targeted statement addresses exactly one row through a model whose
    /// primary key fields are all non-zero.
    pub fn is_targeted(&self) -> bool {
        match self.model() {
            Some(model) => primary_key_predicates(model, self.schema).is_some(),
            None => false,
        }
    }

    /// Predicate presence check, comparing both sides through the naming
    /// strategy.
    pub fn has_predicate(&self, column: &str, naming: &NamingStrategy) -> bool {
        let target = naming.column_name(column);
        self.predicates
            .iter()
            .any(|p| naming.column_name(&p.column) == target)
    }

    pub(crate) fn select_omit(&self, naming: &NamingStrategy) -> SelectOmit {
        let mut star = false;
        let mut selected: HashSet<String> = HashSet::new();
        for raw in &self.selected {
            if raw == "*" {
                star = true;
            } else {
                selected.insert(naming.column_name(raw));
            }
        }
        if star {
            selected = self.schema.columns().map(str::to_string).collect();
        }
        let omitted: HashSet<String> = self
            .omitted
            .iter()
            .map(|raw| naming.column_name(raw))
            .collect();
        for column in &omitted {
            selected.remove(column);
        }
        SelectOmit {
            restricted: star || !self.selected.is_empty(),
            selected,
            omitted,
        }
    }
}

pub(crate) struct SelectOmit {
    pub selected: HashSet<String>,
    pub omitted: HashSet<String>,
    pub restricted: bool,
}

/// Equality predicates binding each primary key to its in-memory value, or
/// `None` when any primary key is zero (the statement is not targeted).
pub(crate) fn primary_key_predicates(
    model: &dyn Record,
    schema: &ModelSchema,
) -> Option<Vec<Predicate>> {
    let mut predicates = Vec::new();
    for field in schema.primary_fields() {
        let value = model.get(&field.column).unwrap_or(FieldValue::Null);
        if value.is_zero() {
            return None;
        }
        predicates.push(Predicate {
            column: field.column.clone(),
            value,
        });
    }
    if predicates.is_empty() {
        return None;
    }
    Some(predicates)
}

/// Resolve the caller's map-form assignments against the schema. Unknown
/// and non-updatable columns are rejected outright.
pub(crate) fn build_map_assignments(
    stmt: &Statement,
    naming: &NamingStrategy,
    exclude: Option<&str>,
) -> Result<Vec<Assignment>> {
    let mut assignments = Vec::new();
    let Some(entries) = stmt.set_map.as_ref() else {
        return Ok(assignments);
    };
    for (key, value) in entries {
        let column = naming.column_name(key);
        if Some(column.as_str()) == exclude {
            continue;
        }
        match stmt.schema.field_by_column(&column) {
            None => return Err(Error::UnknownColumn(column)),
            Some(field) if !field.updatable => return Err(Error::NotUpdatable(column)),
            Some(_) => assignments.push(Assignment::value(column, value.clone())),
        }
    }
    Ok(assignments)
}

/// Build struct-form assignments from the destination model: primary keys,
/// non-updatable fields and `exclude` are skipped; zero values are skipped
/// unless explicitly selected.
pub(crate) fn build_struct_assignments(
    stmt: &Statement,
    naming: &NamingStrategy,
    exclude: Option<&str>,
) -> Vec<Assignment> {
    let mut assignments = Vec::new();
    let Some(model) = stmt.model() else {
        return assignments;
    };
    let resolution = stmt.select_omit(naming);
    for field in &stmt.schema.fields {
        if field.primary_key || !field.updatable {
            continue;
        }
        if Some(field.column.as_str()) == exclude {
            continue;
        }
        if resolution.omitted.contains(&field.column) {
            continue;
        }
        let selected = resolution.selected.contains(&field.column);
        if resolution.restricted && !selected {
            continue;
        }
        let value = model.get(&field.column).unwrap_or(FieldValue::Null);
        if !resolution.restricted && value.is_zero() && !selected {
            continue;
        }
        assignments.push(Assignment::value(field.column.clone(), value));
    }
    assignments
}
