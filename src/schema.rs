//! Schema Registry
//!
//! Dynamic schema inference for MongoDB collections. A random sample of
//! documents is analyzed per collection; top-level keys become SQL column
//! mappings with inferred types, and the result is cached with a TTL so that
//! row conversion never waits on re-sampling.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures::stream::StreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{convert_driver_error, EngineError};

/// SQL column types the engine can infer or declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    TinyInt,
    Int,
    BigInt,
    Double,
    Decimal,
    Varchar,
    Blob,
    /// Embedded documents and arrays, stored as a JSON payload.
    Json,
    DateTime,
    Timestamp,
}

impl SqlType {
    /// SQL type name for diagnostics and schema display.
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlType::TinyInt => "TINYINT",
            SqlType::Int => "INT",
            SqlType::BigInt => "BIGINT",
            SqlType::Double => "DOUBLE",
            SqlType::Decimal => "DECIMAL",
            SqlType::Varchar => "VARCHAR",
            SqlType::Blob => "BLOB",
            SqlType::Json => "MEDIUMBLOB",
            SqlType::DateTime => "DATETIME",
            SqlType::Timestamp => "TIMESTAMP",
        }
    }

    fn default_max_length(&self) -> u32 {
        match self {
            SqlType::Varchar => 255,
            SqlType::Blob => 65_535,
            SqlType::Json => 1_048_576,
            _ => 0,
        }
    }

    fn numeric_rank(&self) -> Option<u8> {
        match self {
            SqlType::TinyInt => Some(0),
            SqlType::Int => Some(1),
            SqlType::BigInt => Some(2),
            SqlType::Double => Some(3),
            _ => None,
        }
    }
}

impl std::fmt::Display for SqlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Mapping of one MongoDB field onto a SQL column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// SQL column name (normalized identifier)
    pub sql_name: String,
    /// MongoDB field path
    pub mongo_path: String,
    pub sql_type: SqlType,
    /// Inferred fields are always nullable - absence is normal in MongoDB
    pub is_nullable: bool,
    pub is_virtual: bool,
    pub is_indexed: bool,
    pub max_length: u32,
    pub decimals: u32,
}

impl FieldMapping {
    fn new(sql_name: String, mongo_path: String, sql_type: SqlType) -> Self {
        Self {
            sql_name,
            mongo_path,
            sql_type,
            is_nullable: true,
            is_virtual: false,
            is_indexed: false,
            max_length: sql_type.default_max_length(),
            decimals: 0,
        }
    }
}

/// Cached inference result for one collection.
#[derive(Debug, Clone)]
pub struct SchemaCacheEntry {
    pub collection: String,
    pub mappings: Vec<FieldMapping>,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub is_valid: bool,
    pub estimated_documents: u64,
}

impl SchemaCacheEntry {
    fn is_usable(&self) -> bool {
        self.is_valid && Instant::now() < self.expires_at
    }
}

/// Cache key for a (database, collection) pair.
pub fn table_key(database: &str, collection: &str) -> String {
    format!("{}.{}", database, collection)
}

/// Infer the SQL type for a BSON value. Total over all BSON kinds; anything
/// without a better mapping falls back to VARCHAR.
pub fn infer_sql_type(value: &Bson) -> SqlType {
    match value {
        Bson::Double(_) => SqlType::Double,
        Bson::String(_) => SqlType::Varchar,
        Bson::Document(_) | Bson::Array(_) => SqlType::Json,
        Bson::Binary(_) => SqlType::Blob,
        Bson::Boolean(_) => SqlType::TinyInt,
        Bson::DateTime(_) => SqlType::DateTime,
        Bson::Int32(_) => SqlType::Int,
        Bson::Int64(_) => SqlType::BigInt,
        Bson::Timestamp(_) => SqlType::Timestamp,
        Bson::Decimal128(_) => SqlType::Decimal,
        Bson::ObjectId(_) => SqlType::Varchar,
        Bson::Null => SqlType::Varchar,
        Bson::RegularExpression(_)
        | Bson::JavaScriptCode(_)
        | Bson::JavaScriptCodeWithScope(_)
        | Bson::Symbol(_)
        | Bson::Undefined
        | Bson::MaxKey
        | Bson::MinKey
        | Bson::DbPointer(_) => SqlType::Varchar,
    }
}

/// Widen two observed types into the most general one. Numeric observations
/// widen along TINYINT < INT < BIGINT < DOUBLE; any disagreement outside the
/// numeric lattice falls back to VARCHAR. Commutative in outcome.
pub fn widen_type(current: SqlType, observed: SqlType) -> SqlType {
    if current == observed {
        return current;
    }
    match (current.numeric_rank(), observed.numeric_rank()) {
        (Some(a), Some(b)) => {
            if a >= b {
                current
            } else {
                observed
            }
        }
        _ => SqlType::Varchar,
    }
}

/// Normalize a MongoDB key into a SQL identifier candidate: invalid
/// characters become `_`, a leading digit gains a `_` prefix.
pub fn normalize_field_name(name: &str) -> String {
    let mut normalized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if normalized.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        normalized.insert(0, '_');
    }
    normalized
}

/// SQL identifier grammar: letters/digits/underscore, starting with a letter
/// or underscore, at most 64 characters.
pub fn is_valid_sql_identifier(name: &str) -> bool {
    if name.is_empty() || name.len() > 64 {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Analyze one sampled document, creating or widening field mappings.
fn analyze_document(doc: &Document, fields: &mut BTreeMap<String, FieldMapping>) {
    for (key, value) in doc {
        let sql_name = normalize_field_name(key);
        if !is_valid_sql_identifier(&sql_name) {
            debug!(key, "skipping field with unmappable name");
            continue;
        }

        let observed = infer_sql_type(value);
        match fields.get_mut(&sql_name) {
            Some(mapping) => {
                let widened = widen_type(mapping.sql_type, observed);
                if widened != mapping.sql_type {
                    mapping.sql_type = widened;
                    mapping.max_length = widened.default_max_length();
                }
            }
            None => {
                fields.insert(
                    sql_name.clone(),
                    FieldMapping::new(sql_name, key.clone(), observed),
                );
            }
        }
    }
}

/// Build the merged mapping set from a batch of sampled documents.
/// Deterministically ordered by SQL name.
pub fn build_mappings(samples: &[Document]) -> Vec<FieldMapping> {
    let mut fields = BTreeMap::new();
    for doc in samples {
        analyze_document(doc, &mut fields);
    }
    fields.into_values().collect()
}

/// Schema registry for one connection target. Owns a dedicated client for
/// sampling and a TTL'd cache of inferred mappings.
pub struct SchemaRegistry {
    client: Client,
    ttl: Duration,
    sample_size: u32,
    cache_enabled: bool,
    cache: Mutex<HashMap<String, SchemaCacheEntry>>,
}

impl SchemaRegistry {
    pub fn new(client: Client, ttl: Duration, sample_size: u32) -> Self {
        Self {
            client,
            ttl,
            sample_size,
            cache_enabled: true,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Disabling the cache forces re-sampling on every inference; entries are
    /// still written so the mappings of the latest run stay readable.
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Whether a cached entry may satisfy the next inference.
    fn has_fresh_entry(&self, key: &str) -> bool {
        if !self.cache_enabled {
            return false;
        }
        let cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        cache.get(key).is_some_and(SchemaCacheEntry::is_usable)
    }

    /// Infer (or re-validate) the schema of a collection.
    ///
    /// Returns `Ok(true)` on a cache hit or successful inference and
    /// `Ok(false)` when the collection sampled empty. A driver failure is an
    /// error. On failure of either kind, any previously cached entry is left
    /// untouched.
    pub async fn infer(&self, database: &str, collection: &str) -> Result<bool, EngineError> {
        let key = table_key(database, collection);

        if self.has_fresh_entry(&key) {
            debug!(key, "schema cache hit");
            return Ok(true);
        }

        let samples = self.sample_documents(database, collection).await?;
        if samples.is_empty() {
            warn!(key, "schema inference found no documents to sample");
            return Ok(false);
        }

        let mappings = build_mappings(&samples);
        let now = Instant::now();
        let entry = SchemaCacheEntry {
            collection: collection.to_string(),
            estimated_documents: samples.len() as u64,
            mappings,
            created_at: now,
            expires_at: now + self.ttl,
            is_valid: true,
        };

        info!(
            key,
            fields = entry.mappings.len(),
            sampled = samples.len(),
            "schema inferred"
        );

        let mut cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        cache.insert(key, entry);
        Ok(true)
    }

    /// Random-sample documents via a `$sample` aggregation stage.
    async fn sample_documents(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Vec<Document>, EngineError> {
        let coll = self
            .client
            .database(database)
            .collection::<Document>(collection);

        let pipeline = vec![doc! { "$sample": { "size": self.sample_size as i32 } }];
        let mut cursor = coll
            .aggregate(pipeline)
            .await
            .map_err(convert_driver_error)?;

        let mut samples = Vec::new();
        while let Some(result) = cursor.next().await {
            let doc = result.map_err(convert_driver_error)?;
            samples.push(doc);
            if samples.len() >= self.sample_size as usize {
                break;
            }
        }

        Ok(samples)
    }

    /// Cached mappings for a table key, if present, valid and unexpired.
    pub fn get_mappings(&self, key: &str) -> Option<Vec<FieldMapping>> {
        let cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        cache
            .get(key)
            .filter(|entry| entry.is_usable())
            .map(|entry| entry.mappings.clone())
    }

    /// Register mappings directly, bypassing sampling. Used for explicitly
    /// declared schemas and table-creation paths.
    pub fn register_mappings(&self, key: &str, mappings: Vec<FieldMapping>) {
        let now = Instant::now();
        let collection = key.rsplit('.').next().unwrap_or(key).to_string();
        let entry = SchemaCacheEntry {
            collection,
            mappings,
            created_at: now,
            expires_at: now + self.ttl,
            is_valid: true,
            estimated_documents: 0,
        };
        let mut cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        cache.insert(key.to_string(), entry);
    }

    /// Mark an entry invalid without reclaiming it; the next access forces
    /// re-inference.
    pub fn invalidate(&self, key: &str) {
        let mut cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(entry) = cache.get_mut(key) {
            entry.is_valid = false;
            debug!(key, "schema cache entry invalidated");
        }
    }

    /// Drop every cached entry.
    pub fn clear_all(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        cache.clear();
    }

    pub fn cache_size(&self) -> usize {
        self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn offline_registry(ttl: Duration) -> SchemaRegistry {
        // Client construction is lazy; no server is contacted here.
        let client = Client::with_uri_str("mongodb://127.0.0.1:27017")
            .await
            .unwrap();
        SchemaRegistry::new(client, ttl, 100)
    }

    #[test]
    fn infers_types_from_bson_values() {
        assert_eq!(infer_sql_type(&Bson::Int32(1)), SqlType::Int);
        assert_eq!(infer_sql_type(&Bson::Int64(1)), SqlType::BigInt);
        assert_eq!(infer_sql_type(&Bson::Double(1.5)), SqlType::Double);
        assert_eq!(infer_sql_type(&Bson::Boolean(true)), SqlType::TinyInt);
        assert_eq!(
            infer_sql_type(&Bson::String("x".to_string())),
            SqlType::Varchar
        );
        assert_eq!(infer_sql_type(&Bson::Array(vec![])), SqlType::Json);
        assert_eq!(
            infer_sql_type(&Bson::Document(Document::new())),
            SqlType::Json
        );
        assert_eq!(infer_sql_type(&Bson::Null), SqlType::Varchar);
    }

    #[test]
    fn widening_is_commutative_in_outcome() {
        assert_eq!(widen_type(SqlType::Int, SqlType::Double), SqlType::Double);
        assert_eq!(widen_type(SqlType::Double, SqlType::Int), SqlType::Double);
        assert_eq!(widen_type(SqlType::Int, SqlType::BigInt), SqlType::BigInt);
        assert_eq!(widen_type(SqlType::Int, SqlType::Varchar), SqlType::Varchar);
        assert_eq!(widen_type(SqlType::Varchar, SqlType::Int), SqlType::Varchar);
        assert_eq!(
            widen_type(SqlType::DateTime, SqlType::Json),
            SqlType::Varchar
        );
        assert_eq!(widen_type(SqlType::Json, SqlType::Json), SqlType::Json);
    }

    #[test]
    fn normalizes_field_names() {
        assert_eq!(normalize_field_name("first-name"), "first_name");
        assert_eq!(normalize_field_name("2fa"), "_2fa");
        assert_eq!(normalize_field_name("ok_name"), "ok_name");
        assert_eq!(normalize_field_name("a.b"), "a_b");
    }

    #[test]
    fn validates_sql_identifiers() {
        assert!(is_valid_sql_identifier("_id"));
        assert!(is_valid_sql_identifier("name2"));
        assert!(!is_valid_sql_identifier(""));
        assert!(!is_valid_sql_identifier("2name"));
        assert!(!is_valid_sql_identifier(&"x".repeat(65)));
    }

    #[test]
    fn builds_merged_mappings_from_samples() {
        let samples = vec![
            doc! { "_id": mongodb::bson::oid::ObjectId::new(), "age": 30, "name": "a" },
            doc! { "_id": mongodb::bson::oid::ObjectId::new(), "age": 31.5 },
        ];

        let mappings = build_mappings(&samples);
        let age = mappings.iter().find(|m| m.sql_name == "age").unwrap();
        assert_eq!(age.sql_type, SqlType::Double);
        assert!(age.is_nullable);

        let name = mappings.iter().find(|m| m.sql_name == "name").unwrap();
        assert_eq!(name.sql_type, SqlType::Varchar);
        assert_eq!(name.max_length, 255);
    }

    #[test]
    fn widening_order_does_not_matter_across_documents() {
        let forward = build_mappings(&[doc! {"v": 1}, doc! {"v": 2}, doc! {"v": 1.5}]);
        let reverse = build_mappings(&[doc! {"v": 1.5}, doc! {"v": 2}, doc! {"v": 1}]);
        assert_eq!(forward[0].sql_type, SqlType::Double);
        assert_eq!(reverse[0].sql_type, SqlType::Double);
    }

    #[tokio::test]
    async fn mappings_are_served_until_ttl_expiry() {
        let registry = offline_registry(Duration::from_millis(50)).await;
        let key = table_key("shop", "orders");
        registry.register_mappings(
            &key,
            vec![FieldMapping::new(
                "age".to_string(),
                "age".to_string(),
                SqlType::Int,
            )],
        );

        let served = registry.get_mappings(&key).unwrap();
        assert_eq!(served.len(), 1);
        assert_eq!(served[0].sql_type, SqlType::Int);

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(registry.get_mappings(&key).is_none());
    }

    #[tokio::test]
    async fn disabled_cache_never_satisfies_inference() {
        let key = table_key("shop", "orders");

        let enabled = offline_registry(Duration::from_secs(60)).await;
        enabled.register_mappings(&key, vec![]);
        assert!(enabled.has_fresh_entry(&key));

        let disabled = offline_registry(Duration::from_secs(60))
            .await
            .with_cache_enabled(false);
        disabled.register_mappings(&key, vec![]);

        // The latest run's mappings stay readable, but no entry can satisfy
        // the next inference; every infer call re-samples.
        assert!(disabled.get_mappings(&key).is_some());
        assert!(!disabled.has_fresh_entry(&key));
    }

    #[tokio::test]
    async fn invalidate_hides_entry_without_removing_it() {
        let registry = offline_registry(Duration::from_secs(60)).await;
        let key = table_key("shop", "orders");
        registry.register_mappings(&key, vec![]);

        assert!(registry.get_mappings(&key).is_some());
        registry.invalidate(&key);
        assert!(registry.get_mappings(&key).is_none());
        // Memory is reclaimed only by clear_all.
        assert_eq!(registry.cache_size(), 1);

        registry.clear_all();
        assert_eq!(registry.cache_size(), 0);
    }
}
