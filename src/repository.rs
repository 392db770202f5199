// 🗄️ Entity Repository - SQLite storage behind the local engine
//
// Holds pre-resolved entities, their records, the relationships between
// entities and the registered engine configurations. Fixtures import
// idempotently: a record whose document hash is unchanged is skipped.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::graph::EntityGraph;
use crate::payload::MatchLevel;

// ============================================================================
// DOCUMENTS
// ============================================================================

/// Side of a disclosed relationship this record states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisclosureKind {
    Link,
    Pointer,
    Anchor,
}

/// A relationship the record itself discloses (e.g. "my employer is ACME")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RelationshipDisclosure {
    pub domain: String,
    pub kind: DisclosureKind,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RecordDocument {
    pub data_source: String,
    pub record_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_dt: Option<DateTime<Utc>>,
    /// Feature type → values as the record stated them
    #[serde(default)]
    pub features: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub other_data: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<RelationshipDisclosure>,
}

impl RecordDocument {
    /// Hash of the stored document, used to skip unchanged re-imports
    pub fn compute_document_hash(&self) -> Result<String> {
        let text = serde_json::to_string(self)?;
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct FixtureEntity {
    pub entity_id: i64,
    pub records: Vec<RecordDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct StoredRelationship {
    pub entity_id: i64,
    pub related_id: i64,
    pub match_level: MatchLevel,
    #[serde(default)]
    pub match_key: String,
    #[serde(default)]
    pub disclosed: bool,
    #[serde(default)]
    pub ambiguous: bool,
}

impl StoredRelationship {
    fn reversed(&self) -> Self {
        Self {
            entity_id: self.related_id,
            related_id: self.entity_id,
            ..self.clone()
        }
    }
}

/// Importable repository contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RepositoryFixture {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    pub entities: Vec<FixtureEntity>,
    #[serde(default)]
    pub relationships: Vec<StoredRelationship>,
}

impl RepositoryFixture {
    pub fn data_sources(&self) -> BTreeSet<String> {
        self.entities
            .iter()
            .flat_map(|e| e.records.iter().map(|r| r.data_source.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub records_inserted: usize,
    pub records_unchanged: usize,
    pub relationships: usize,
    pub config_id: i64,
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS entities (
            entity_id INTEGER PRIMARY KEY,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            data_source TEXT NOT NULL,
            record_id TEXT NOT NULL,
            entity_id INTEGER NOT NULL REFERENCES entities(entity_id),
            document TEXT NOT NULL,
            document_hash TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(data_source, record_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS relationships (
            entity_id INTEGER NOT NULL,
            related_id INTEGER NOT NULL,
            match_level TEXT NOT NULL,
            match_key TEXT NOT NULL,
            disclosed INTEGER NOT NULL DEFAULT 0,
            ambiguous INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (entity_id, related_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS configs (
            config_id INTEGER PRIMARY KEY,
            config TEXT NOT NULL,
            is_default INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_records_entity ON records(entity_id)",
        [],
    )?;

    Ok(())
}

/// Open (or create) a repository file and make sure the schema exists
pub fn open_repository(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open repository: {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn load_fixture(path: &Path) -> Result<RepositoryFixture> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read fixture: {}", path.display()))?;
    let fixture = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse fixture: {}", path.display()))?;
    Ok(fixture)
}

// ============================================================================
// IMPORT
// ============================================================================

pub fn import_fixture(conn: &Connection, fixture: &RepositoryFixture) -> Result<ImportStats> {
    let mut stats = ImportStats::default();

    let config = match &fixture.config {
        Some(config) => config.clone(),
        None => default_config(&fixture.data_sources()),
    };
    stats.config_id = register_config(conn, &config, true)?;

    for entity in &fixture.entities {
        conn.execute(
            "INSERT OR IGNORE INTO entities (entity_id) VALUES (?1)",
            params![entity.entity_id],
        )?;

        for record in &entity.records {
            let hash = record.compute_document_hash()?;
            let existing: Option<(i64, String)> = conn
                .query_row(
                    "SELECT entity_id, document_hash FROM records
                     WHERE data_source = ?1 AND record_id = ?2",
                    params![record.data_source, record.record_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            if existing.as_ref() == Some(&(entity.entity_id, hash.clone())) {
                stats.records_unchanged += 1;
                continue;
            }

            conn.execute(
                "INSERT INTO records (data_source, record_id, entity_id, document, document_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(data_source, record_id) DO UPDATE SET
                    entity_id = excluded.entity_id,
                    document = excluded.document,
                    document_hash = excluded.document_hash",
                params![
                    record.data_source,
                    record.record_id,
                    entity.entity_id,
                    serde_json::to_string(record)?,
                    hash,
                ],
            )?;
            stats.records_inserted += 1;
        }
    }

    for relationship in &fixture.relationships {
        for side in [relationship.clone(), relationship.reversed()] {
            conn.execute(
                "INSERT OR REPLACE INTO relationships
                    (entity_id, related_id, match_level, match_key, disclosed, ambiguous)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    side.entity_id,
                    side.related_id,
                    side.match_level.as_str(),
                    side.match_key,
                    side.disclosed,
                    side.ambiguous,
                ],
            )?;
        }
        stats.relationships += 1;
    }

    Ok(stats)
}

// ============================================================================
// CONFIGURATIONS
// ============================================================================

/// Configuration registering the given data sources with the stock
/// feature types and attributes
pub fn default_config(data_sources: &BTreeSet<String>) -> Value {
    serde_json::json!({
        "DATA_SOURCES": data_sources,
        "FEATURE_TYPES": [
            {"FTYPE_CODE": "NAME", "ATTR_CLASS": "NAME"},
            {"FTYPE_CODE": "ADDRESS", "ATTR_CLASS": "ADDRESS"},
            {"FTYPE_CODE": "PHONE", "ATTR_CLASS": "PHONE"},
            {"FTYPE_CODE": "DOB", "ATTR_CLASS": "CHARACTERISTIC"},
            {"FTYPE_CODE": "GENDER", "ATTR_CLASS": "CHARACTERISTIC"},
            {"FTYPE_CODE": "EMAIL", "ATTR_CLASS": "IDENTIFIER"},
            {"FTYPE_CODE": "SSN", "ATTR_CLASS": "IDENTIFIER"},
            {"FTYPE_CODE": "PASSPORT", "ATTR_CLASS": "IDENTIFIER"},
            {"FTYPE_CODE": "DRLIC", "ATTR_CLASS": "IDENTIFIER"}
        ],
        "ATTRIBUTES": [
            {"ATTR_CODE": "NAME_FULL", "FTYPE_CODE": "NAME"},
            {"ATTR_CODE": "NAME_ORG", "FTYPE_CODE": "NAME"},
            {"ATTR_CODE": "ADDR_FULL", "FTYPE_CODE": "ADDRESS"},
            {"ATTR_CODE": "PHONE_NUMBER", "FTYPE_CODE": "PHONE"},
            {"ATTR_CODE": "DATE_OF_BIRTH", "FTYPE_CODE": "DOB"},
            {"ATTR_CODE": "GENDER", "FTYPE_CODE": "GENDER"},
            {"ATTR_CODE": "EMAIL_ADDRESS", "FTYPE_CODE": "EMAIL"},
            {"ATTR_CODE": "SSN_NUMBER", "FTYPE_CODE": "SSN"},
            {"ATTR_CODE": "PASSPORT_NUMBER", "FTYPE_CODE": "PASSPORT"},
            {"ATTR_CODE": "DRIVERS_LICENSE_NUMBER", "FTYPE_CODE": "DRLIC"}
        ]
    })
}

/// Stable configuration id derived from the configuration text
pub fn config_id_for(config: &Value) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(config.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes[2..].copy_from_slice(&digest[..6]);
    i64::from_be_bytes(bytes)
}

pub fn register_config(conn: &Connection, config: &Value, make_default: bool) -> Result<i64> {
    let config_id = config_id_for(config);
    conn.execute(
        "INSERT OR IGNORE INTO configs (config_id, config) VALUES (?1, ?2)",
        params![config_id, config.to_string()],
    )?;
    if make_default {
        set_default_config(conn, config_id)?;
    }
    Ok(config_id)
}

pub fn set_default_config(conn: &Connection, config_id: i64) -> Result<()> {
    let updated = conn.execute(
        "UPDATE configs SET is_default = (config_id = ?1)",
        params![config_id],
    )?;
    anyhow::ensure!(updated > 0, "No configurations registered");
    Ok(())
}

pub fn default_config_id(conn: &Connection) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT config_id FROM configs WHERE is_default = 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn get_config(conn: &Connection, config_id: i64) -> Result<Option<Value>> {
    let text: Option<String> = conn
        .query_row(
            "SELECT config FROM configs WHERE config_id = ?1",
            params![config_id],
            |row| row.get(0),
        )
        .optional()?;
    match text {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

// ============================================================================
// QUERIES
// ============================================================================

pub fn entity_exists(conn: &Connection, entity_id: i64) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM records WHERE entity_id = ?1",
        params![entity_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn entity_for_record(
    conn: &Connection,
    data_source: &str,
    record_id: &str,
) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT entity_id FROM records WHERE data_source = ?1 AND record_id = ?2",
            params![data_source, record_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

fn parse_document(text: String) -> Result<RecordDocument> {
    serde_json::from_str(&text).context("Corrupt record document")
}

pub fn get_record(
    conn: &Connection,
    data_source: &str,
    record_id: &str,
) -> Result<Option<(i64, RecordDocument)>> {
    let row: Option<(i64, String)> = conn
        .query_row(
            "SELECT entity_id, document FROM records WHERE data_source = ?1 AND record_id = ?2",
            params![data_source, record_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match row {
        Some((entity_id, text)) => Ok(Some((entity_id, parse_document(text)?))),
        None => Ok(None),
    }
}

pub fn records_for_entity(conn: &Connection, entity_id: i64) -> Result<Vec<RecordDocument>> {
    let mut stmt = conn.prepare(
        "SELECT document FROM records WHERE entity_id = ?1 ORDER BY data_source, record_id",
    )?;
    let rows = stmt.query_map(params![entity_id], |row| row.get::<_, String>(0))?;

    let mut records = Vec::new();
    for row in rows {
        records.push(parse_document(row?)?);
    }
    Ok(records)
}

/// Every record with its entity id, ordered by entity
pub fn all_records(conn: &Connection) -> Result<Vec<(i64, RecordDocument)>> {
    let mut stmt = conn.prepare(
        "SELECT entity_id, document FROM records ORDER BY entity_id, data_source, record_id",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;

    let mut records = Vec::new();
    for row in rows {
        let (entity_id, text) = row?;
        records.push((entity_id, parse_document(text)?));
    }
    Ok(records)
}

pub fn relationships_for_entity(
    conn: &Connection,
    entity_id: i64,
) -> Result<Vec<StoredRelationship>> {
    let mut stmt = conn.prepare(
        "SELECT entity_id, related_id, match_level, match_key, disclosed, ambiguous
         FROM relationships WHERE entity_id = ?1 ORDER BY related_id",
    )?;
    let rows = stmt.query_map(params![entity_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, bool>(4)?,
            row.get::<_, bool>(5)?,
        ))
    })?;

    let mut relationships = Vec::new();
    for row in rows {
        let (entity_id, related_id, level, match_key, disclosed, ambiguous) = row?;
        let match_level: MatchLevel = serde_json::from_value(Value::String(level.clone()))
            .with_context(|| format!("Unknown match level: {}", level))?;
        relationships.push(StoredRelationship {
            entity_id,
            related_id,
            match_level,
            match_key,
            disclosed,
            ambiguous,
        });
    }
    Ok(relationships)
}

/// Relationship graph over every entity, with the data sources of each
pub fn load_graph(conn: &Connection) -> Result<EntityGraph> {
    let mut graph = EntityGraph::new();

    let mut stmt = conn.prepare("SELECT DISTINCT entity_id, data_source FROM records")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
    for row in rows {
        let (entity_id, data_source) = row?;
        graph.add_entity(entity_id, Some(data_source));
    }

    let mut stmt = conn.prepare("SELECT entity_id, related_id FROM relationships")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;
    for row in rows {
        let (entity_id, related_id) = row?;
        graph.add_relationship(entity_id, related_id);
    }

    Ok(graph)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepositoryCounts {
    pub entities: i64,
    pub records: i64,
    pub relationships: i64,
}

pub fn repository_counts(conn: &Connection) -> Result<RepositoryCounts> {
    let count = |sql: &str| -> Result<i64> { Ok(conn.query_row(sql, [], |row| row.get(0))?) };
    Ok(RepositoryCounts {
        entities: count("SELECT COUNT(DISTINCT entity_id) FROM records")?,
        records: count("SELECT COUNT(*) FROM records")?,
        relationships: count("SELECT COUNT(*) FROM relationships")? / 2,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::create_test_fixture;

    fn create_test_repository() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_import_is_idempotent() {
        let conn = create_test_repository();
        let fixture = create_test_fixture();

        let first = import_fixture(&conn, &fixture).unwrap();
        assert!(first.records_inserted > 0);
        assert_eq!(first.records_unchanged, 0);

        let second = import_fixture(&conn, &fixture).unwrap();
        assert_eq!(second.records_inserted, 0);
        assert_eq!(second.records_unchanged, first.records_inserted);
        assert_eq!(second.config_id, first.config_id);

        let counts = repository_counts(&conn).unwrap();
        assert_eq!(counts.records as usize, first.records_inserted);
        assert_eq!(counts.relationships as usize, fixture.relationships.len());
    }

    #[test]
    fn test_record_lookup() {
        let conn = create_test_repository();
        import_fixture(&conn, &create_test_fixture()).unwrap();

        assert_eq!(entity_for_record(&conn, "CUSTOMERS", "1001").unwrap(), Some(1));
        assert_eq!(entity_for_record(&conn, "CUSTOMERS", "nope").unwrap(), None);
        assert!(entity_exists(&conn, 1).unwrap());
        assert!(!entity_exists(&conn, 999).unwrap());

        let records = records_for_entity(&conn, 1).unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(ids, vec!["1001", "1002"]);
    }

    #[test]
    fn test_relationships_are_symmetric() {
        let conn = create_test_repository();
        import_fixture(&conn, &create_test_fixture()).unwrap();

        let from_a: Vec<i64> = relationships_for_entity(&conn, 1)
            .unwrap()
            .iter()
            .map(|r| r.related_id)
            .collect();
        let from_b: Vec<i64> = relationships_for_entity(&conn, 2)
            .unwrap()
            .iter()
            .map(|r| r.related_id)
            .collect();

        assert!(from_a.contains(&2));
        assert!(from_b.contains(&1));
        assert!(!from_a.contains(&3));
    }

    #[test]
    fn test_default_config_switch() {
        let conn = create_test_repository();
        let stats = import_fixture(&conn, &create_test_fixture()).unwrap();
        assert_eq!(default_config_id(&conn).unwrap(), Some(stats.config_id));

        let mut sources = BTreeSet::new();
        sources.insert("ONLY".to_string());
        let other = register_config(&conn, &default_config(&sources), false).unwrap();
        assert_eq!(default_config_id(&conn).unwrap(), Some(stats.config_id));

        set_default_config(&conn, other).unwrap();
        assert_eq!(default_config_id(&conn).unwrap(), Some(other));
        assert!(get_config(&conn, other).unwrap().is_some());
    }

    #[test]
    fn test_repository_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repo.db");

        {
            let conn = open_repository(&path).unwrap();
            import_fixture(&conn, &create_test_fixture()).unwrap();
        }

        let conn = open_repository(&path).unwrap();
        assert_eq!(entity_for_record(&conn, "WATCHLIST", "2001").unwrap(), Some(2));
    }
}
