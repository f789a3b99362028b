//! Document Conversion
//!
//! Converts MongoDB documents into SQL row buffers. Every BSON type has a
//! defined rendering; values the SQL side cannot hold natively degrade to a
//! string form rather than failing the row.

use mongodb::bson::{Bson, Document};
use tracing::trace;

use crate::error::EngineError;
use crate::row::{CellValue, TargetField};

/// Convert one document into the row buffer.
///
/// All fields are reset to NULL first, so columns absent from the document
/// come out NULL. `_id` (or a column named `id`) always reads the document's
/// `_id`; a column named `document` receives the whole document as JSON.
pub fn convert_document_to_row(
    doc: &Document,
    fields: &mut [TargetField],
) -> Result<(), EngineError> {
    for field in fields.iter_mut() {
        field.set_null();
    }

    for field in fields.iter_mut() {
        match field.name.as_str() {
            "_id" | "id" => store_id(doc, field)?,
            "document" => store_whole_document(doc, field),
            _ => {
                if let Some(value) = doc.get(field.mongo_path.as_str()) {
                    store_value(value, field);
                }
            }
        }
    }

    Ok(())
}

/// The `_id` column. Missing `_id` is a malformed document and fails the row.
fn store_id(doc: &Document, field: &mut TargetField) -> Result<(), EngineError> {
    let id = doc.get("_id").ok_or_else(|| {
        EngineError::ConversionFailed("document has no _id field".to_string())
    })?;

    match id {
        Bson::ObjectId(oid) => field.store(CellValue::Text(oid.to_hex())),
        Bson::String(s) => field.store(CellValue::Text(s.clone())),
        Bson::Int32(n) => field.store(CellValue::Int(*n as i64)),
        Bson::Int64(n) => field.store(CellValue::Int(*n)),
        other => {
            let rendered = other.clone().into_canonical_extjson().to_string();
            field.store(CellValue::Text(rendered));
        }
    }
    Ok(())
}

/// The `document` column: the full document as relaxed Extended JSON.
fn store_whole_document(doc: &Document, field: &mut TargetField) {
    let json = Bson::Document(doc.clone()).into_relaxed_extjson();
    let rendered = serde_json::to_string(&json)
        .unwrap_or_else(|_| Bson::Document(doc.clone()).into_canonical_extjson().to_string());
    field.store(CellValue::Text(rendered));
}

/// Store one BSON value into its column. Total over all BSON kinds.
fn store_value(value: &Bson, field: &mut TargetField) {
    match value {
        Bson::String(s) => field.store(CellValue::Text(s.clone())),
        Bson::Int32(n) => field.store(CellValue::Int(*n as i64)),
        Bson::Int64(n) => field.store(CellValue::Int(*n)),
        Bson::Double(d) => field.store(CellValue::Double(*d)),
        Bson::Boolean(b) => field.store(CellValue::Int(if *b { 1 } else { 0 })),
        Bson::DateTime(dt) => {
            field.store(CellValue::Timestamp(dt.timestamp_millis() / 1000));
        }
        // BSON timestamps carry epoch seconds in their time component
        Bson::Timestamp(ts) => field.store(CellValue::Timestamp(ts.time as i64)),
        Bson::Document(_) | Bson::Array(_) => {
            let rendered = value.clone().into_canonical_extjson().to_string();
            field.store(CellValue::Text(rendered));
        }
        Bson::Binary(bin) => field.store(CellValue::Bytes(bin.bytes.clone())),
        Bson::Null => field.set_null(),
        Bson::ObjectId(oid) => field.store(CellValue::Text(oid.to_hex())),
        Bson::Decimal128(dec) => field.store(CellValue::Text(dec.to_string())),
        other => {
            trace!(
                field = field.name.as_str(),
                bson_type = bson_type_name(other),
                "storing placeholder for unrepresentable value"
            );
            field.store(CellValue::Text(format!("[{}]", bson_type_name(other))));
        }
    }
}

fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Array(_) => "array",
        Bson::Document(_) => "document",
        Bson::Boolean(_) => "bool",
        Bson::Null => "null",
        Bson::RegularExpression(_) => "regex",
        Bson::JavaScriptCode(_) => "javascript",
        Bson::JavaScriptCodeWithScope(_) => "javascript_with_scope",
        Bson::Int32(_) => "int32",
        Bson::Int64(_) => "int64",
        Bson::Timestamp(_) => "timestamp",
        Bson::Binary(_) => "binary",
        Bson::ObjectId(_) => "object_id",
        Bson::DateTime(_) => "datetime",
        Bson::Symbol(_) => "symbol",
        Bson::Decimal128(_) => "decimal128",
        Bson::Undefined => "undefined",
        Bson::MaxKey => "max_key",
        Bson::MinKey => "min_key",
        Bson::DbPointer(_) => "db_pointer",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SqlType;
    use mongodb::bson::{doc, oid::ObjectId, Binary, Regex};

    fn text(field: &TargetField) -> &str {
        match field.value() {
            CellValue::Text(s) => s,
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn converts_typical_document() {
        let doc = doc! {
            "_id": "u1",
            "name": "Ana",
            "age": 33i32,
            "tags": ["a", "b"],
        };
        let mut fields = vec![
            TargetField::new("_id", SqlType::Varchar),
            TargetField::new("name", SqlType::Varchar),
            TargetField::new("age", SqlType::Int),
            TargetField::new("tags", SqlType::Json),
            TargetField::new("missing", SqlType::Varchar),
        ];

        convert_document_to_row(&doc, &mut fields).unwrap();

        assert_eq!(text(&fields[0]), "u1");
        assert_eq!(text(&fields[1]), "Ana");
        assert_eq!(*fields[2].value(), CellValue::Int(33));
        assert_eq!(text(&fields[3]), r#"["a","b"]"#);
        assert!(fields[4].is_null());
    }

    #[test]
    fn object_id_becomes_hex() {
        let oid = ObjectId::new();
        let doc = doc! { "_id": oid };
        let mut fields = vec![TargetField::new("_id", SqlType::Varchar)];

        convert_document_to_row(&doc, &mut fields).unwrap();
        assert_eq!(text(&fields[0]), oid.to_hex());
    }

    #[test]
    fn id_alias_reads_underscore_id() {
        let doc = doc! { "_id": 7i64 };
        let mut fields = vec![TargetField::new("id", SqlType::BigInt)];

        convert_document_to_row(&doc, &mut fields).unwrap();
        assert_eq!(*fields[0].value(), CellValue::Int(7));
    }

    #[test]
    fn missing_id_is_an_error() {
        let doc = doc! { "name": "x" };
        let mut fields = vec![TargetField::new("_id", SqlType::Varchar)];

        let err = convert_document_to_row(&doc, &mut fields).unwrap_err();
        assert!(matches!(err, EngineError::ConversionFailed(_)));
    }

    #[test]
    fn int64_keeps_full_magnitude() {
        let doc = doc! { "_id": "k", "big": i64::MAX };
        let mut fields = vec![
            TargetField::new("_id", SqlType::Varchar),
            TargetField::new("big", SqlType::BigInt),
        ];

        convert_document_to_row(&doc, &mut fields).unwrap();
        assert_eq!(*fields[1].value(), CellValue::Int(i64::MAX));
    }

    #[test]
    fn booleans_become_zero_or_one() {
        let doc = doc! { "_id": "k", "yes": true, "no": false };
        let mut fields = vec![
            TargetField::new("_id", SqlType::Varchar),
            TargetField::new("yes", SqlType::TinyInt),
            TargetField::new("no", SqlType::TinyInt),
        ];

        convert_document_to_row(&doc, &mut fields).unwrap();
        assert_eq!(*fields[1].value(), CellValue::Int(1));
        assert_eq!(*fields[2].value(), CellValue::Int(0));
    }

    #[test]
    fn datetime_truncates_to_seconds() {
        let doc = doc! {
            "_id": "k",
            "at": mongodb::bson::DateTime::from_millis(1_700_000_123_456),
        };
        let mut fields = vec![
            TargetField::new("_id", SqlType::Varchar),
            TargetField::new("at", SqlType::DateTime),
        ];

        convert_document_to_row(&doc, &mut fields).unwrap();
        assert_eq!(*fields[1].value(), CellValue::Timestamp(1_700_000_123));
    }

    #[test]
    fn regex_renders_as_placeholder() {
        let doc = doc! {
            "_id": "k",
            "pattern": Regex { pattern: "^a".to_string(), options: "i".to_string() },
        };
        let mut fields = vec![
            TargetField::new("_id", SqlType::Varchar),
            TargetField::new("pattern", SqlType::Varchar),
        ];

        convert_document_to_row(&doc, &mut fields).unwrap();
        assert_eq!(text(&fields[1]), "[regex]");
    }

    #[test]
    fn explicit_null_and_absent_field_both_null() {
        let doc = doc! { "_id": "k", "gone": Bson::Null };
        let mut fields = vec![
            TargetField::new("_id", SqlType::Varchar),
            TargetField::new("gone", SqlType::Varchar),
            TargetField::new("absent", SqlType::Varchar),
        ];

        convert_document_to_row(&doc, &mut fields).unwrap();
        assert!(fields[1].is_null());
        assert!(fields[2].is_null());
    }

    #[test]
    fn binary_becomes_bytes() {
        let doc = doc! {
            "_id": "k",
            "blob": Binary { subtype: mongodb::bson::spec::BinarySubtype::Generic, bytes: vec![1, 2, 3] },
        };
        let mut fields = vec![
            TargetField::new("_id", SqlType::Varchar),
            TargetField::new("blob", SqlType::Blob),
        ];

        convert_document_to_row(&doc, &mut fields).unwrap();
        assert_eq!(*fields[1].value(), CellValue::Bytes(vec![1, 2, 3]));
    }

    #[test]
    fn document_column_holds_whole_document() {
        let doc = doc! { "_id": "k", "n": 5i32 };
        let mut fields = vec![TargetField::new("document", SqlType::Json)];

        convert_document_to_row(&doc, &mut fields).unwrap();
        let rendered = text(&fields[0]);
        assert!(rendered.contains("\"_id\""));
        assert!(rendered.contains("\"n\""));
    }

    #[test]
    fn stale_values_are_cleared_between_rows() {
        let mut fields = vec![
            TargetField::new("_id", SqlType::Varchar),
            TargetField::new("name", SqlType::Varchar),
        ];

        convert_document_to_row(&doc! { "_id": "a", "name": "first" }, &mut fields).unwrap();
        convert_document_to_row(&doc! { "_id": "b" }, &mut fields).unwrap();

        assert_eq!(text(&fields[0]), "b");
        assert!(fields[1].is_null());
    }
}
