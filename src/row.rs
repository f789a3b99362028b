//! Row Buffer
//!
//! Column targets for document-to-row conversion. A `TargetField` is the
//! write side of one SQL column: the converter stores a typed cell value or
//! marks the column NULL.

use crate::schema::{FieldMapping, SqlType};

/// A converted cell value, typed by SQL storage class.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Int(i64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// Seconds since the Unix epoch
    Timestamp(i64),
}

/// Character set of a column's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    Binary,
}

/// Write target for one column of the current row.
#[derive(Debug, Clone)]
pub struct TargetField {
    /// SQL column name
    pub name: String,
    /// MongoDB field path the column reads from
    pub mongo_path: String,
    pub sql_type: SqlType,
    pub charset: Charset,
    pub nullable: bool,
    value: CellValue,
    is_null: bool,
}

impl TargetField {
    pub fn new(name: &str, sql_type: SqlType) -> Self {
        let charset = match sql_type {
            SqlType::Blob => Charset::Binary,
            _ => Charset::Utf8,
        };
        Self {
            name: name.to_string(),
            mongo_path: name.to_string(),
            sql_type,
            charset,
            nullable: true,
            value: CellValue::Null,
            is_null: true,
        }
    }

    /// Build a target column from an inferred field mapping.
    pub fn from_mapping(mapping: &FieldMapping) -> Self {
        let mut field = Self::new(&mapping.sql_name, mapping.sql_type);
        field.mongo_path = mapping.mongo_path.clone();
        field.nullable = mapping.is_nullable;
        field
    }

    pub fn set_null(&mut self) {
        self.is_null = true;
        self.value = CellValue::Null;
    }

    pub fn set_not_null(&mut self) {
        self.is_null = false;
    }

    /// Store a cell value, clearing the NULL flag.
    pub fn store(&mut self, value: CellValue) {
        self.is_null = matches!(value, CellValue::Null);
        self.value = value;
    }

    pub fn value(&self) -> &CellValue {
        &self.value
    }

    pub fn is_null(&self) -> bool {
        self.is_null
    }
}
