//! Declared output tables and their fields.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::LEDGER_TABLE;
use super::extract::{Extractor, ExtractorSpec};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("invalid SQL identifier {0:?}")]
    InvalidIdentifier(String),
    #[error("table {0} is declared twice")]
    DuplicateTable(String),
    #[error("field {field} is declared twice in table {table}")]
    DuplicateField { table: String, field: String },
    #[error("table name {0} is reserved for the ledger")]
    ReservedTable(String),
    #[error("table {0} declares no fields")]
    EmptyTable(String),
    #[error("table {0} declares no primary key field")]
    MissingPrimaryKey(String),
    #[error("invalid JSON pointer {0:?}")]
    InvalidPointer(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Blob,
}

impl ColumnType {
    pub fn sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
            ColumnType::Blob => "BLOB",
        }
    }
}

/// Serialized schema, as loaded from configuration files.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub tables: Vec<TableConfig>,
    /// Extra statements run after table creation, e.g. `CREATE VIEW`.
    pub init_statements: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    pub fields: Vec<FieldConfig>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub primary_key: bool,
    pub extract: ExtractorSpec,
    /// Characters stripped from the end of text values.
    #[serde(default)]
    pub trim_end: Option<String>,
}

#[derive(Clone, Debug)]
pub struct FieldDef {
    pub name: String,
    pub column_type: ColumnType,
    pub primary_key: bool,
    pub extractor: Extractor,
}

impl FieldDef {
    pub fn new(
        name: impl Into<String>,
        column_type: ColumnType,
        extractor: Extractor,
    ) -> Self {
        Self {
            name: name.into(),
            column_type,
            primary_key: false,
            extractor,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

#[derive(Clone, Debug)]
pub struct TableDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn create_sql(&self) -> String {
        let columns = self
            .fields
            .iter()
            .map(|field| {
                format!("{} {}", quote(&field.name), field.column_type.sql())
            })
            .collect::<Vec<_>>()
            .join(", ");
        let keys = self
            .fields
            .iter()
            .filter(|field| field.primary_key)
            .map(|field| quote(&field.name))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({columns}, PRIMARY KEY ({keys}))",
            quote(&self.name)
        )
    }

    pub fn insert_sql(&self) -> String {
        let columns = self
            .fields
            .iter()
            .map(|field| quote(&field.name))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; self.fields.len()].join(", ");
        format!(
            "INSERT OR REPLACE INTO {} ({columns}) VALUES ({placeholders})",
            quote(&self.name)
        )
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{identifier}\"")
}

fn check_identifier(name: &str) -> Result<(), SchemaError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier(name.to_string()))
    }
}

/// Validated set of output tables. Extractors are resolved once here.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    tables: Vec<TableDef>,
    init_statements: Vec<String>,
}

impl Schema {
    /// A schema with no tables: only the ledger is written.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn from_config(config: &SchemaConfig) -> Result<Self, SchemaError> {
        let mut builder = Schema::builder();
        for table in &config.tables {
            let mut def = TableDef::new(table.name.as_str());
            for field in &table.fields {
                let mut extractor = Extractor::from_spec(&field.extract)?;
                if let Some(chars) = &field.trim_end {
                    extractor = extractor.trim_end(chars.as_str());
                }
                let mut field_def =
                    FieldDef::new(field.name.as_str(), field.column_type, extractor);
                field_def.primary_key = field.primary_key;
                def = def.field(field_def);
            }
            builder = builder.table(def);
        }
        for statement in &config.init_statements {
            builder = builder.init_statement(statement.as_str());
        }
        builder.build()
    }

    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    pub fn init_statements(&self) -> &[String] {
        &self.init_statements
    }
}

#[derive(Debug, Default)]
pub struct SchemaBuilder {
    tables: Vec<TableDef>,
    init_statements: Vec<String>,
}

impl SchemaBuilder {
    pub fn table(mut self, table: TableDef) -> Self {
        self.tables.push(table);
        self
    }

    pub fn init_statement(mut self, statement: impl Into<String>) -> Self {
        self.init_statements.push(statement.into());
        self
    }

    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut table_names = HashSet::new();
        for table in &self.tables {
            check_identifier(&table.name)?;
            // SQLite identifiers are case-insensitive
            let folded = table.name.to_ascii_lowercase();
            if folded == LEDGER_TABLE {
                return Err(SchemaError::ReservedTable(table.name.clone()));
            }
            if !table_names.insert(folded) {
                return Err(SchemaError::DuplicateTable(table.name.clone()));
            }
            if table.fields.is_empty() {
                return Err(SchemaError::EmptyTable(table.name.clone()));
            }

            let mut field_names = HashSet::new();
            for field in &table.fields {
                check_identifier(&field.name)?;
                if !field_names.insert(field.name.to_ascii_lowercase()) {
                    return Err(SchemaError::DuplicateField {
                        table: table.name.clone(),
                        field: field.name.clone(),
                    });
                }
            }
            if !table.fields.iter().any(|field| field.primary_key) {
                return Err(SchemaError::MissingPrimaryKey(table.name.clone()));
            }
        }

        Ok(Schema {
            tables: self.tables,
            init_statements: self.init_statements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advisors() -> TableDef {
        TableDef::new("advisors")
            .field(
                FieldDef::new(
                    "advisor_id",
                    ColumnType::Text,
                    Extractor::pointer("/campaign/advisor/id"),
                )
                .primary_key(),
            )
            .field(FieldDef::new(
                "mapped_id",
                ColumnType::Integer,
                Extractor::Identifier,
            ))
    }

    #[test]
    fn generates_create_and_insert_statements() {
        let table = advisors();
        assert_eq!(
            table.create_sql(),
            "CREATE TABLE IF NOT EXISTS \"advisors\" (\"advisor_id\" TEXT, \
             \"mapped_id\" INTEGER, PRIMARY KEY (\"advisor_id\"))"
        );
        assert_eq!(
            table.insert_sql(),
            "INSERT OR REPLACE INTO \"advisors\" (\"advisor_id\", \"mapped_id\") VALUES (?, ?)"
        );
    }

    #[test]
    fn rejects_invalid_layouts() {
        let err = Schema::builder()
            .table(advisors())
            .table(advisors())
            .build()
            .unwrap_err();
        assert_eq!(err, SchemaError::DuplicateTable("advisors".into()));

        let err = Schema::builder()
            .table(TableDef::new("Checked_Ids").field(
                FieldDef::new("id", ColumnType::Integer, Extractor::Identifier)
                    .primary_key(),
            ))
            .build()
            .unwrap_err();
        assert_eq!(err, SchemaError::ReservedTable("Checked_Ids".into()));

        let err = Schema::builder()
            .table(TableDef::new("drop table x"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidIdentifier(_)));

        let err = Schema::builder()
            .table(TableDef::new("events"))
            .build()
            .unwrap_err();
        assert_eq!(err, SchemaError::EmptyTable("events".into()));

        let err = Schema::builder()
            .table(TableDef::new("events").field(FieldDef::new(
                "title",
                ColumnType::Text,
                Extractor::pointer("/title"),
            )))
            .build()
            .unwrap_err();
        assert_eq!(err, SchemaError::MissingPrimaryKey("events".into()));
    }

    #[test]
    fn resolves_declarative_config() {
        let config: SchemaConfig = serde_json::from_str(
            r#"{
                "tables": [{
                    "name": "events",
                    "fields": [
                        {"name": "event_id", "type": "text", "primary_key": true,
                         "extract": {"kind": "each", "array": "/events", "field": "/id"}},
                        {"name": "start_time", "type": "text", "trim_end": "Z",
                         "extract": {"kind": "each", "array": "/events", "field": "/start"}}
                    ]
                }],
                "init_statements": ["CREATE VIEW IF NOT EXISTS v AS SELECT * FROM events"]
            }"#,
        )
        .expect("config parses");

        let schema = Schema::from_config(&config).expect("schema resolves");
        assert_eq!(schema.tables().len(), 1);
        assert_eq!(schema.init_statements().len(), 1);
        let fields = &schema.tables()[0].fields;
        assert!(fields[0].primary_key);
        assert!(matches!(fields[1].extractor, Extractor::TrimEnd { .. }));
    }
}
