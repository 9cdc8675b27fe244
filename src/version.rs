use std::sync::{Mutex, OnceLock};

use chrono::{DateTime, Utc};
use ulid::Ulid;
use uuid::Uuid;

use crate::{
    model::FieldValue,
    schema::{FieldDef, FieldType, ModelSchema},
};

/// Storage granularity for timestamp versions. Generation and comparison
/// truncate to the same precision, so a dialect that stores microseconds
/// never sees a nanosecond-level mismatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimestampPrecision {
    Seconds,
    Millis,
    Micros,
    Nanos,
}

impl TimestampPrecision {
    fn divisor(&self) -> i64 {
        match self {
            TimestampPrecision::Seconds => 1_000_000_000,
            TimestampPrecision::Millis => 1_000_000,
            TimestampPrecision::Micros => 1_000,
            TimestampPrecision::Nanos => 1,
        }
    }

    pub fn truncate_nanos(&self, nanos: i64) -> i64 {
        nanos - nanos.rem_euclid(self.divisor())
    }

    pub fn truncate(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let nanos = ts.timestamp_nanos_opt().unwrap_or(0);
        DateTime::from_timestamp_nanos(self.truncate_nanos(nanos))
    }
}

/// Semantic classification of a version field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VersionKind {
    Int,
    Uuid,
    Ulid,
    Timestamp,
}

/// The version slot discovered on a model schema.
#[derive(Clone, Debug)]
pub struct VersionField {
    pub name: String,
    pub column: String,
    pub kind: VersionKind,
}

/// Next value computed by the rewriter. Integer versions bump in-database
/// via a column expression; every other kind carries a generated value.
#[derive(Clone, Debug, PartialEq)]
pub enum NextVersion {
    Increment,
    Value(FieldValue),
}

/// Walk the schema for the first field whose tag settings contain
/// `keyword`, then classify it. Fields of unrecognized types leave the
/// model un-versioned.
pub fn find_version_field(schema: &ModelSchema, keyword: &str) -> Option<VersionField> {
    for field in &schema.fields {
        let Some(param) = tag_param(field, keyword) else {
            continue;
        };
        let kind = classify(field, param.as_deref())?;
        return Some(VersionField {
            name: field.name.clone(),
            column: field.column.clone(),
            kind,
        });
    }
    None
}

/// Returns `Some(param)` when one of the field's tags starts with the
/// keyword; the param is the optional `:`-suffix (`uuid` / `ulid`).
fn tag_param(field: &FieldDef, keyword: &str) -> Option<Option<String>> {
    for tag in &field.tags {
        let (kw, param) = match tag.split_once(':') {
            Some((kw, param)) => (kw, Some(param.trim().to_string())),
            None => (tag.as_str(), None),
        };
        if kw.trim().eq_ignore_ascii_case(keyword) {
            return Some(param.filter(|p| !p.is_empty()));
        }
    }
    None
}

fn classify(field: &FieldDef, param: Option<&str>) -> Option<VersionKind> {
    match field.field_type {
        FieldType::Int | FieldType::UInt => Some(VersionKind::Int),
        FieldType::Timestamp => Some(VersionKind::Timestamp),
        FieldType::Opaque16 => Some(match param {
            Some(p) if p.eq_ignore_ascii_case("ulid") => VersionKind::Ulid,
            Some(p) if p.eq_ignore_ascii_case("uuid") => VersionKind::Uuid,
            _ if field.type_name.to_ascii_lowercase().contains("ulid") => VersionKind::Ulid,
            _ => VersionKind::Uuid,
        }),
        _ => None,
    }
}

impl VersionKind {
    /// Initial value written by the create-phase seeder.
    pub fn initial(&self, now: DateTime<Utc>, precision: TimestampPrecision) -> FieldValue {
        match self {
            VersionKind::Int => FieldValue::UInt(1),
            VersionKind::Uuid => FieldValue::Opaque(*Uuid::new_v4().as_bytes()),
            VersionKind::Ulid => FieldValue::Opaque(next_ulid(now).0.to_be_bytes()),
            VersionKind::Timestamp => FieldValue::Timestamp(precision.truncate(now)),
        }
    }

    /// Successor of `observed`, as recorded in statement scratch.
    pub fn next(
        &self,
        _observed: &FieldValue,
        now: DateTime<Utc>,
        precision: TimestampPrecision,
    ) -> NextVersion {
        match self {
            VersionKind::Int => NextVersion::Increment,
            VersionKind::Uuid | VersionKind::Ulid | VersionKind::Timestamp => {
                NextVersion::Value(self.initial(now, precision))
            }
        }
    }

    /// The concrete value the verifier expects to read back after a
    /// successful update.
    pub fn expected(&self, observed: &FieldValue, pending: &NextVersion) -> Option<FieldValue> {
        match pending {
            NextVersion::Increment => observed.as_uint().map(|n| FieldValue::UInt(n + 1)),
            NextVersion::Value(value) => Some(value.clone()),
        }
    }

    /// Equality in the version domain: integer equality, byte equality, or
    /// granularity-respecting timestamp equality.
    pub fn matches(
        &self,
        expected: &FieldValue,
        actual: &FieldValue,
        precision: TimestampPrecision,
    ) -> bool {
        match self {
            VersionKind::Int => match (expected.as_uint(), actual.as_uint()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
            VersionKind::Uuid | VersionKind::Ulid => {
                match (expected.as_opaque(), actual.as_opaque()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
            VersionKind::Timestamp => match (expected.as_timestamp(), actual.as_timestamp()) {
                (Some(a), Some(b)) => {
                    let a = precision.truncate_nanos(a.timestamp_nanos_opt().unwrap_or(0));
                    let b = precision.truncate_nanos(b.timestamp_nanos_opt().unwrap_or(0));
                    a == b
                }
                _ => false,
            },
        }
    }
}

static ULID_GENERATOR: OnceLock<Mutex<ulid::Generator>> = OnceLock::new();

/// Process-wide monotonic ULID source, safe for concurrent callers.
pub(crate) fn next_ulid(now: DateTime<Utc>) -> Ulid {
    let generator = ULID_GENERATOR.get_or_init(|| Mutex::new(ulid::Generator::new()));
    let mut guard = generator.lock().expect("ulid generator poisoned");
    guard
        .generate_from_datetime(now.into())
        .unwrap_or_else(|_| Ulid::from_datetime(now.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;

    fn schema_with(field: FieldDef) -> ModelSchema {
        ModelSchema::builder("things")
            .field(FieldDef::new("id", FieldType::UInt).primary_key())
            .field(field)
            .build()
    }

    #[test]
    fn integer_field_classifies_as_int() {
        let schema = schema_with(FieldDef::new("version", FieldType::UInt).tag("version"));
        let vf = find_version_field(&schema, "version").unwrap();
        assert_eq!(vf.kind, VersionKind::Int);
        assert_eq!(vf.column, "version");
    }

    #[test]
    fn opaque_field_disambiguates_by_tag_param() {
        let schema = schema_with(FieldDef::new("version", FieldType::Opaque16).tag("version:ulid"));
        assert_eq!(
            find_version_field(&schema, "version").unwrap().kind,
            VersionKind::Ulid
        );

        let schema = schema_with(FieldDef::new("version", FieldType::Opaque16).tag("version:uuid"));
        assert_eq!(
            find_version_field(&schema, "version").unwrap().kind,
            VersionKind::Uuid
        );
    }

    #[test]
    fn opaque_field_falls_back_to_type_name_sniff() {
        let schema = schema_with(
            FieldDef::new("version", FieldType::Opaque16)
                .type_name("Ulid")
                .tag("version"),
        );
        assert_eq!(
            find_version_field(&schema, "version").unwrap().kind,
            VersionKind::Ulid
        );

        let schema = schema_with(
            FieldDef::new("version", FieldType::Opaque16)
                .type_name("Uuid")
                .tag("version"),
        );
        assert_eq!(
            find_version_field(&schema, "version").unwrap().kind,
            VersionKind::Uuid
        );
    }

    #[test]
    fn unrecognized_type_leaves_model_unversioned() {
        let schema = schema_with(FieldDef::new("version", FieldType::Text).tag("version"));
        assert!(find_version_field(&schema, "version").is_none());
    }

    #[test]
    fn custom_keyword_is_honored() {
        let schema = schema_with(FieldDef::new("revision", FieldType::UInt).tag("revision"));
        assert!(find_version_field(&schema, "version").is_none());
        assert!(find_version_field(&schema, "revision").is_some());
    }

    #[test]
    fn ulids_are_monotonic_within_a_tick() {
        let now = Utc::now();
        let a = next_ulid(now);
        let b = next_ulid(now);
        assert!(b > a);
    }

    #[test]
    fn truncation_is_symmetric() {
        let ts = DateTime::from_timestamp_nanos(1_700_000_000_123_456_789);
        let micros = TimestampPrecision::Micros.truncate(ts);
        assert_eq!(micros.timestamp_subsec_nanos() % 1_000, 0);
        assert!(VersionKind::Timestamp.matches(
            &FieldValue::Timestamp(ts),
            &FieldValue::Timestamp(micros),
            TimestampPrecision::Micros,
        ));
        assert!(!VersionKind::Timestamp.matches(
            &FieldValue::Timestamp(ts),
            &FieldValue::Timestamp(micros),
            TimestampPrecision::Nanos,
        ));
    }
}
