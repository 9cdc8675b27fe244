use std::any::Any;

use chrono::{DateTime, Utc};
use serde::Serialize;
use ulid::Ulid;
use uuid::Uuid;

use crate::{Error, Result, schema::ModelSchema};

/// Runtime value of a single model field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// 16-byte opaque payloads (UUIDs, ULIDs).
    Opaque([u8; 16]),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    /// Type-appropriate "unset" test. All-zero opaque bytes and the Unix
    /// epoch count as zero.
    pub fn is_zero(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Bool(b) => !b,
            FieldValue::Int(n) => *n == 0,
            FieldValue::UInt(n) => *n == 0,
            FieldValue::Float(f) => *f == 0.0,
            FieldValue::Text(s) => s.is_empty(),
            FieldValue::Bytes(b) => b.is_empty(),
            FieldValue::Opaque(b) => b.iter().all(|byte| *byte == 0),
            FieldValue::Timestamp(ts) => ts.timestamp_nanos_opt().unwrap_or(0) == 0,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::Int(_) => "int",
            FieldValue::UInt(_) => "uint",
            FieldValue::Float(_) => "float",
            FieldValue::Text(_) => "text",
            FieldValue::Bytes(_) => "bytes",
            FieldValue::Opaque(_) => "opaque",
            FieldValue::Timestamp(_) => "timestamp",
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            FieldValue::UInt(n) => Some(*n),
            FieldValue::Int(n) if *n >= 0 => Some(*n as u64),
            _ => None,
        }
    }

    pub fn as_opaque(&self) -> Option<[u8; 16]> {
        match self {
            FieldValue::Opaque(b) => Some(*b),
            FieldValue::Bytes(b) => b.as_slice().try_into().ok(),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

macro_rules! from_int {
    ($($ty:ty => $variant:ident as $conv:ty),* $(,)?) => {
        $(impl From<$ty> for FieldValue {
            fn from(value: $ty) -> Self {
                FieldValue::$variant(value as $conv)
            }
        })*
    };
}

from_int!(
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int as i64,
    u8 => UInt as u64,
    u16 => UInt as u64,
    u32 => UInt as u64,
    u64 => UInt as u64,
);

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<f32> for FieldValue {
    fn from(value: f32) -> Self {
        FieldValue::Float(value as f64)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(value: Vec<u8>) -> Self {
        FieldValue::Bytes(value)
    }
}

impl From<Uuid> for FieldValue {
    fn from(value: Uuid) -> Self {
        FieldValue::Opaque(*value.as_bytes())
    }
}

impl From<Ulid> for FieldValue {
    fn from(value: Ulid) -> Self {
        FieldValue::Opaque(value.0.to_be_bytes())
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

impl<T> From<Option<T>> for FieldValue
where
    T: Into<FieldValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(inner) => inner.into(),
            None => FieldValue::Null,
        }
    }
}

/// Projection of a concrete field into a [`FieldValue`], used by derived
/// model accessors.
pub trait ToFieldValue {
    fn to_field_value(&self) -> FieldValue;
}

/// Conversion back out of a [`FieldValue`], used by derived model setters.
pub trait FromFieldValue: Sized {
    fn from_field_value(value: FieldValue) -> Result<Self>;
}

fn mismatch(expected: &'static str, value: &FieldValue) -> Error {
    Error::TypeMismatch {
        expected,
        found: value.kind_name(),
    }
}

macro_rules! field_value_int {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl ToFieldValue for $ty {
                fn to_field_value(&self) -> FieldValue {
                    FieldValue::from(*self)
                }
            }

            impl FromFieldValue for $ty {
                fn from_field_value(value: FieldValue) -> Result<Self> {
                    match value {
                        FieldValue::Int(n) => <$ty>::try_from(n).map_err(|_| mismatch($name, &FieldValue::Int(n))),
                        FieldValue::UInt(n) => <$ty>::try_from(n).map_err(|_| mismatch($name, &FieldValue::UInt(n))),
                        other => Err(mismatch($name, &other)),
                    }
                }
            }
        )*
    };
}

field_value_int!(
    i8 => "i8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
    u8 => "u8",
    u16 => "u16",
    u32 => "u32",
    u64 => "u64",
);

impl ToFieldValue for bool {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Bool(*self)
    }
}

impl FromFieldValue for bool {
    fn from_field_value(value: FieldValue) -> Result<Self> {
        match value {
            FieldValue::Bool(b) => Ok(b),
            other => Err(mismatch("bool", &other)),
        }
    }
}

impl ToFieldValue for f32 {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Float(*self as f64)
    }
}

impl FromFieldValue for f32 {
    fn from_field_value(value: FieldValue) -> Result<Self> {
        match value {
            FieldValue::Float(f) => Ok(f as f32),
            other => Err(mismatch("f32", &other)),
        }
    }
}

impl ToFieldValue for f64 {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Float(*self)
    }
}

impl FromFieldValue for f64 {
    fn from_field_value(value: FieldValue) -> Result<Self> {
        match value {
            FieldValue::Float(f) => Ok(f),
            other => Err(mismatch("f64", &other)),
        }
    }
}

impl ToFieldValue for String {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Text(self.clone())
    }
}

impl FromFieldValue for String {
    fn from_field_value(value: FieldValue) -> Result<Self> {
        match value {
            FieldValue::Text(s) => Ok(s),
            other => Err(mismatch("text", &other)),
        }
    }
}

impl ToFieldValue for Vec<u8> {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Bytes(self.clone())
    }
}

impl FromFieldValue for Vec<u8> {
    fn from_field_value(value: FieldValue) -> Result<Self> {
        match value {
            FieldValue::Bytes(b) => Ok(b),
            FieldValue::Opaque(b) => Ok(b.to_vec()),
            other => Err(mismatch("bytes", &other)),
        }
    }
}

impl ToFieldValue for Uuid {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Opaque(*self.as_bytes())
    }
}

impl FromFieldValue for Uuid {
    fn from_field_value(value: FieldValue) -> Result<Self> {
        match value.as_opaque() {
            Some(bytes) => Ok(Uuid::from_bytes(bytes)),
            None => Err(mismatch("uuid", &value)),
        }
    }
}

impl ToFieldValue for Ulid {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Opaque(self.0.to_be_bytes())
    }
}

impl FromFieldValue for Ulid {
    fn from_field_value(value: FieldValue) -> Result<Self> {
        match value.as_opaque() {
            Some(bytes) => Ok(Ulid(u128::from_be_bytes(bytes))),
            None => Err(mismatch("ulid", &value)),
        }
    }
}

impl ToFieldValue for DateTime<Utc> {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Timestamp(*self)
    }
}

impl FromFieldValue for DateTime<Utc> {
    fn from_field_value(value: FieldValue) -> Result<Self> {
        match value {
            FieldValue::Timestamp(ts) => Ok(ts),
            other => Err(mismatch("timestamp", &other)),
        }
    }
}

impl<T> ToFieldValue for Option<T>
where
    T: ToFieldValue,
{
    fn to_field_value(&self) -> FieldValue {
        match self {
            Some(inner) => inner.to_field_value(),
            None => FieldValue::Null,
        }
    }
}

impl<T> FromFieldValue for Option<T>
where
    T: FromFieldValue,
{
    fn from_field_value(value: FieldValue) -> Result<Self> {
        match value {
            FieldValue::Null => Ok(None),
            other => T::from_field_value(other).map(Some),
        }
    }
}

/// A persisted model type with derived column accessors.
///
/// Implemented via `#[derive(Model)]`; the schema carries the declarative
/// tag metadata the version introspector reads.
pub trait Model: Serialize + Clone + Send + 'static {
    fn model_schema() -> &'static ModelSchema;

    fn column_value(&self, column: &str) -> Option<FieldValue>;

    fn set_column(&mut self, column: &str, value: FieldValue) -> Result<()>;
}

/// Object-safe view over any [`Model`], used inside statements and by
/// conflict handlers.
pub trait Record: Send {
    fn schema(&self) -> &'static ModelSchema;

    fn get(&self, column: &str) -> Option<FieldValue>;

    fn set(&mut self, column: &str, value: FieldValue) -> Result<()>;

    /// JSON projection used by the diff reporter.
    fn to_json(&self) -> Result<serde_json::Value>;

    fn clone_record(&self) -> Box<dyn Record>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Model> Record for T {
    fn schema(&self) -> &'static ModelSchema {
        T::model_schema()
    }

    fn get(&self, column: &str) -> Option<FieldValue> {
        self.column_value(column)
    }

    fn set(&mut self, column: &str, value: FieldValue) -> Result<()> {
        self.set_column(column, value)
    }

    fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn clone_record(&self) -> Box<dyn Record> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<'a> dyn Record + 'a {
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

/// Copy every schema column of `src` into `dst`.
pub(crate) fn assign_record(dst: &mut dyn Record, src: &dyn Record) -> Result<()> {
    let schema = dst.schema();
    for field in &schema.fields {
        if let Some(value) = src.get(&field.column) {
            dst.set(&field.column, value)?;
        }
    }
    Ok(())
}
