/// Storage classification of a model field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    Int,
    UInt,
    Float,
    Text,
    Bytes,
    /// 16-byte opaque values (UUIDs, ULIDs).
    Opaque16,
    Timestamp,
}

/// Declarative metadata for a single model field.
#[derive(Clone, Debug)]
pub struct FieldDef {
    /// Struct field name.
    pub name: String,
    /// Database column name.
    pub column: String,
    pub field_type: FieldType,
    /// Declared Rust type, kept verbatim for tag disambiguation.
    pub type_name: String,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub updatable: bool,
    /// Raw tag settings, e.g. `version` or `version:ulid`.
    pub tags: Vec<String>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        let column = snake_case(&name);
        Self {
            name,
            column,
            field_type,
            type_name: String::new(),
            primary_key: false,
            auto_increment: false,
            updatable: true,
            tags: Vec::new(),
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn updatable(mut self, updatable: bool) -> Self {
        self.updatable = updatable;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Parsed schema for one model type: table name plus ordered field metadata.
#[derive(Clone, Debug)]
pub struct ModelSchema {
    pub table: String,
    pub fields: Vec<FieldDef>,
}

impl ModelSchema {
    pub fn builder(table: impl Into<String>) -> ModelSchemaBuilder {
        ModelSchemaBuilder {
            table: table.into(),
            fields: Vec::new(),
        }
    }

    pub fn field_by_column(&self, column: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.column == column)
    }

    pub fn primary_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.primary_key)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.column.as_str())
    }
}

pub struct ModelSchemaBuilder {
    table: String,
    fields: Vec<FieldDef>,
}

impl ModelSchemaBuilder {
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn build(self) -> ModelSchema {
        ModelSchema {
            table: self.table,
            fields: self.fields,
        }
    }
}

/// Column naming convention applied to caller-supplied identifiers.
#[derive(Clone, Debug, Default)]
pub struct NamingStrategy;

impl NamingStrategy {
    pub fn column_name(&self, name: &str) -> String {
        snake_case(name)
    }
}

pub(crate) fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let chars: Vec<char> = name.chars().collect();
    for (i, ch) in chars.iter().enumerate() {
        if ch.is_ascii_uppercase() {
            let prev_lower = i > 0 && (chars[i - 1].is_ascii_lowercase() || chars[i - 1].is_ascii_digit());
            let next_lower = chars.get(i + 1).is_some_and(|c| c.is_ascii_lowercase());
            if i > 0 && (prev_lower || (chars[i - 1].is_ascii_uppercase() && next_lower)) {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(*ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_case_handles_mixed_identifiers() {
        assert_eq!(snake_case("Description"), "description");
        assert_eq!(snake_case("createdAt"), "created_at");
        assert_eq!(snake_case("HTMLBody"), "html_body");
        assert_eq!(snake_case("already_snake"), "already_snake");
        assert_eq!(snake_case("ID"), "id");
    }

    #[test]
    fn builder_keeps_field_order_and_defaults() {
        let schema = ModelSchema::builder("todos")
            .field(FieldDef::new("id", FieldType::UInt).primary_key().auto_increment())
            .field(FieldDef::new("Description", FieldType::Text))
            .field(FieldDef::new("version", FieldType::UInt).tag("version"))
            .build();

        assert_eq!(schema.table, "todos");
        assert_eq!(schema.fields[1].column, "description");
        assert!(schema.fields[0].primary_key);
        assert!(schema.fields[0].updatable);
        assert_eq!(schema.primary_fields().count(), 1);
        assert_eq!(schema.field_by_column("version").unwrap().tags, vec!["version"]);
    }
}
