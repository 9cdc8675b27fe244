//! In-process backend for exercising the pipeline without a database.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::{
    Error, Result,
    model::{FieldValue, Record},
    schema::{FieldType, ModelSchema},
    session::{Backend, Dialect},
    statement::{Operation, Predicate, SetExpr, Statement},
};

type Row = HashMap<String, FieldValue>;

#[derive(Default)]
struct MemoryTable {
    rows: Vec<Row>,
    next_id: u64,
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<String, MemoryTable>,
}

/// Table-per-schema store that interprets statements the way a SQL host
/// would: INSERT materializes every schema column, UPDATE applies SET to
/// rows matching all predicates, RETURNING writes the modified row back
/// into the destination model.
pub struct MemoryBackend {
    dialect: Dialect,
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_dialect(Dialect::postgres())
    }

    pub fn with_dialect(dialect: Dialect) -> Self {
        Self {
            dialect,
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn row_count(&self, table: &str) -> usize {
        let state = self.state.lock().expect("memory backend poisoned");
        state.tables.get(table).map_or(0, |t| t.rows.len())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_all(row: &Row, predicates: &[Predicate]) -> bool {
    predicates
        .iter()
        .all(|p| row.get(&p.column) == Some(&p.value))
}

impl Backend for MemoryBackend {
    fn dialect(&self) -> Dialect {
        self.dialect.clone()
    }

    fn execute(&self, stmt: &mut Statement) -> Result<u64> {
        let mut state = self.state.lock().expect("memory backend poisoned");
        match stmt.operation {
            Operation::Create => {
                let schema = stmt.schema;
                let table = state.tables.entry(schema.table.clone()).or_default();
                let mut inserted = 0u64;
                for model in stmt.models.iter_mut() {
                    let mut row = Row::new();
                    for field in &schema.fields {
                        let mut value = model.get(&field.column).unwrap_or(FieldValue::Null);
                        if field.primary_key && field.auto_increment && value.is_zero() {
                            table.next_id += 1;
                            value = match field.field_type {
                                FieldType::Int => FieldValue::Int(table.next_id as i64),
                                _ => FieldValue::UInt(table.next_id),
                            };
                            model.set(&field.column, value.clone())?;
                        }
                        row.insert(field.column.clone(), value);
                    }

                    let pk: Vec<&str> = schema
                        .primary_fields()
                        .map(|f| f.column.as_str())
                        .collect();
                    if !pk.is_empty()
                        && table
                            .rows
                            .iter()
                            .any(|existing| pk.iter().all(|col| existing.get(*col) == row.get(*col)))
                    {
                        return Err(Error::Backend(format!(
                            "duplicate primary key in {}",
                            schema.table
                        )));
                    }
                    table.rows.push(row);
                    inserted += 1;
                }
                Ok(inserted)
            }
            Operation::Update => {
                let Some(table) = state.tables.get_mut(&stmt.schema.table) else {
                    return Ok(0);
                };
                if stmt.assignments.is_empty() {
                    return Ok(0);
                }
                let mut matched = 0u64;
                let mut returned: Option<Row> = None;
                for row in table.rows.iter_mut() {
                    if !matches_all(row, &stmt.predicates) {
                        continue;
                    }
                    for assignment in &stmt.assignments {
                        let value = match &assignment.value {
                            SetExpr::Value(value) => value.clone(),
                            SetExpr::Increment => match row.get(&assignment.column) {
                                Some(FieldValue::UInt(n)) => FieldValue::UInt(n + 1),
                                Some(FieldValue::Int(n)) => FieldValue::Int(n + 1),
                                other => {
                                    return Err(Error::Backend(format!(
                                        "cannot increment column {}: {:?}",
                                        assignment.column, other
                                    )));
                                }
                            },
                        };
                        row.insert(assignment.column.clone(), value);
                    }
                    matched += 1;
                    returned = Some(row.clone());
                }
                if stmt.returning && matched == 1 {
                    if let (Some(row), Some(model)) = (returned, stmt.models.first_mut()) {
                        for field in &stmt.schema.fields {
                            if let Some(value) = row.get(&field.column) {
                                model.set(&field.column, value.clone())?;
                            }
                        }
                    }
                }
                Ok(matched)
            }
        }
    }

    fn reload(
        &self,
        schema: &'static ModelSchema,
        predicates: &[Predicate],
        template: &dyn Record,
    ) -> Result<Option<Box<dyn Record>>> {
        let state = self.state.lock().expect("memory backend poisoned");
        let Some(table) = state.tables.get(&schema.table) else {
            return Ok(None);
        };
        for row in &table.rows {
            if matches_all(row, predicates) {
                let mut fresh = template.clone_record();
                for field in &schema.fields {
                    if let Some(value) = row.get(&field.column) {
                        fresh.set(&field.column, value.clone())?;
                    }
                }
                return Ok(Some(fresh));
            }
        }
        Ok(None)
    }
}
