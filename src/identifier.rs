// 🔑 Entity Identifiers - "an entity" as a record coordinate or an entity id
//
// Requests name entities either by one of their records (data source plus
// record id) or by the resolved entity id. IdentifierResolver turns both into
// an entity id; only record coordinates cost an engine call.

use serde_json::Value;
use std::fmt;

use crate::engine::ResolutionEngine;
use crate::error::{GatewayError, GatewayResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityIdentifier {
    DataSourceRecordId {
        data_source: String,
        record_id: String,
    },
    EntityId(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Record,
    Entity,
}

impl EntityIdentifier {
    pub fn record(data_source: &str, record_id: &str) -> Self {
        EntityIdentifier::DataSourceRecordId {
            data_source: data_source.trim().to_uppercase(),
            record_id: record_id.to_string(),
        }
    }

    pub fn entity(entity_id: i64) -> Self {
        EntityIdentifier::EntityId(entity_id)
    }

    pub fn kind(&self) -> IdentifierKind {
        match self {
            EntityIdentifier::DataSourceRecordId { .. } => IdentifierKind::Record,
            EntityIdentifier::EntityId(_) => IdentifierKind::Entity,
        }
    }

    pub fn data_source(&self) -> Option<&str> {
        match self {
            EntityIdentifier::DataSourceRecordId { data_source, .. } => Some(data_source),
            EntityIdentifier::EntityId(_) => None,
        }
    }

    /// Parse one identifier.
    ///
    /// Accepted forms:
    /// - `1234` → entity id
    /// - `{"src":"CUSTOMERS","id":"1001"}` (or `dataSource`/`recordId`)
    /// - `:CUSTOMERS:1001` where the first character is the delimiter
    pub fn parse(text: &str) -> GatewayResult<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(GatewayError::invalid("empty entity identifier"));
        }

        if text.starts_with('{') {
            let value: Value = serde_json::from_str(text).map_err(|e| {
                GatewayError::invalid(format!("malformed record identifier {}: {}", text, e))
            })?;
            return Self::from_json(&value);
        }

        if let Ok(entity_id) = text.parse::<i64>() {
            return Ok(EntityIdentifier::EntityId(entity_id));
        }

        let mut chars = text.chars();
        if let Some(delimiter) = chars.next().filter(|c| !c.is_alphanumeric()) {
            let mut parts = chars.as_str().splitn(2, delimiter);
            if let (Some(ds), Some(rid)) = (parts.next(), parts.next()) {
                if !ds.trim().is_empty() && !rid.is_empty() {
                    return Ok(Self::record(ds, rid));
                }
            }
        }

        Err(GatewayError::invalid(format!(
            "unrecognized entity identifier: {}",
            text
        )))
    }

    /// Identifier given as a JSON value (number, record object or string)
    pub fn from_json(value: &Value) -> GatewayResult<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(EntityIdentifier::EntityId)
                .ok_or_else(|| GatewayError::invalid(format!("entity id out of range: {}", n))),
            Value::String(s) => Self::parse(s),
            Value::Object(obj) => {
                let field = |names: [&str; 2]| {
                    names
                        .iter()
                        .filter_map(|name| obj.get(*name))
                        .find_map(|v| match v {
                            Value::String(s) => Some(s.clone()),
                            Value::Number(n) => Some(n.to_string()),
                            _ => None,
                        })
                };
                match (field(["src", "dataSource"]), field(["id", "recordId"])) {
                    (Some(ds), Some(rid)) if !ds.trim().is_empty() && !rid.is_empty() => {
                        Ok(Self::record(&ds, &rid))
                    }
                    _ => Err(GatewayError::invalid(format!(
                        "record identifier needs a data source and record id: {}",
                        value
                    ))),
                }
            }
            other => Err(GatewayError::invalid(format!(
                "unrecognized entity identifier: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for EntityIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityIdentifier::EntityId(id) => write!(f, "{}", id),
            EntityIdentifier::DataSourceRecordId {
                data_source,
                record_id,
            } => write!(
                f,
                "{}",
                serde_json::json!({ "src": data_source, "id": record_id })
            ),
        }
    }
}

// ============================================================================
// IDENTIFIER SETS
// ============================================================================

/// Insertion-ordered, de-duplicated set of identifiers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityIdentifiers {
    items: Vec<EntityIdentifier>,
}

impl EntityIdentifiers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the identifier was already present
    pub fn insert(&mut self, identifier: EntityIdentifier) -> bool {
        if self.items.contains(&identifier) {
            return false;
        }
        self.items.push(identifier);
        true
    }

    pub fn extend(&mut self, other: EntityIdentifiers) {
        for identifier in other.items {
            self.insert(identifier);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityIdentifier> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Parse a combined-list parameter: a JSON array or comma-separated ids
    pub fn parse(text: &str) -> GatewayResult<Self> {
        let text = text.trim();
        let mut identifiers = EntityIdentifiers::new();
        if text.is_empty() {
            return Ok(identifiers);
        }

        if text.starts_with('[') {
            let values: Vec<Value> = serde_json::from_str(text).map_err(|e| {
                GatewayError::invalid(format!("malformed identifier list {}: {}", text, e))
            })?;
            for value in &values {
                identifiers.insert(EntityIdentifier::from_json(value)?);
            }
        } else if text.starts_with('{') {
            identifiers.insert(EntityIdentifier::parse(text)?);
        } else {
            for token in text.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                identifiers.insert(EntityIdentifier::parse(token)?);
            }
        }
        Ok(identifiers)
    }

    /// All record coordinates or all entity ids; `None` for an empty set
    pub fn ensure_homogeneous(&self, what: &str) -> GatewayResult<Option<IdentifierKind>> {
        let mut kinds = self.items.iter().map(EntityIdentifier::kind);
        let first = match kinds.next() {
            Some(kind) => kind,
            None => return Ok(None),
        };
        if kinds.any(|kind| kind != first) {
            return Err(GatewayError::invalid(format!(
                "{} must be all entity ids or all record identifiers",
                what
            )));
        }
        Ok(Some(first))
    }
}

impl FromIterator<EntityIdentifier> for EntityIdentifiers {
    fn from_iter<I: IntoIterator<Item = EntityIdentifier>>(iter: I) -> Self {
        let mut identifiers = EntityIdentifiers::new();
        for identifier in iter {
            identifiers.insert(identifier);
        }
        identifiers
    }
}

/// Two identifiers used as a pair must be of the same kind
pub fn ensure_same_kind(
    first: &EntityIdentifier,
    second: &EntityIdentifier,
    what: &str,
) -> GatewayResult<()> {
    if first.kind() != second.kind() {
        return Err(GatewayError::invalid(format!(
            "{} must both be entity ids or both be record identifiers",
            what
        )));
    }
    Ok(())
}

/// Every data source named must be registered with the engine.
/// Unknown codes are a caller error here, not a lookup miss.
pub fn ensure_known_sources<'a>(
    engine: &dyn ResolutionEngine,
    sources: impl IntoIterator<Item = &'a str>,
    what: &str,
) -> GatewayResult<()> {
    let mut known: Option<Vec<String>> = None;
    for source in sources {
        if known.is_none() {
            known = Some(engine.data_sources()?);
        }
        if !known.iter().flatten().any(|k| k == source) {
            return Err(GatewayError::invalid(format!(
                "unrecognized data source in {}: {}",
                what, source
            )));
        }
    }
    Ok(())
}

// ============================================================================
// RESOLVER
// ============================================================================

pub struct IdentifierResolver<'e> {
    engine: &'e dyn ResolutionEngine,
}

impl<'e> IdentifierResolver<'e> {
    pub fn new(engine: &'e dyn ResolutionEngine) -> Self {
        Self { engine }
    }

    pub fn resolve(&self, identifier: &EntityIdentifier) -> GatewayResult<i64> {
        match identifier {
            EntityIdentifier::EntityId(entity_id) => Ok(*entity_id),
            EntityIdentifier::DataSourceRecordId {
                data_source,
                record_id,
            } => self
                .engine
                .resolve_record(data_source, record_id)
                .map_err(GatewayError::from),
        }
    }

    /// Resolve a set, keeping first-seen order and dropping repeats
    pub fn resolve_all(&self, identifiers: &EntityIdentifiers) -> GatewayResult<Vec<i64>> {
        let mut resolved = Vec::with_capacity(identifiers.len());
        for identifier in identifiers.iter() {
            let entity_id = self.resolve(identifier)?;
            if !resolved.contains(&entity_id) {
                resolved.push(entity_id);
            }
        }
        Ok(resolved)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::create_test_engine;

    #[test]
    fn test_parse_entity_id() {
        assert_eq!(
            EntityIdentifier::parse(" 42 ").unwrap(),
            EntityIdentifier::EntityId(42)
        );
    }

    #[test]
    fn test_parse_json_record_identifier() {
        let expected = EntityIdentifier::record("CUSTOMERS", "1001");

        assert_eq!(
            EntityIdentifier::parse(r#"{"src":"customers","id":"1001"}"#).unwrap(),
            expected
        );
        assert_eq!(
            EntityIdentifier::parse(r#"{"dataSource":"CUSTOMERS","recordId":1001}"#).unwrap(),
            expected
        );
    }

    #[test]
    fn test_parse_delimited_record_identifier() {
        assert_eq!(
            EntityIdentifier::parse(":CUSTOMERS:1001").unwrap(),
            EntityIdentifier::record("CUSTOMERS", "1001")
        );
        // only the first delimiter after the data source splits
        assert_eq!(
            EntityIdentifier::parse("|WATCHLIST|A|B").unwrap(),
            EntityIdentifier::record("WATCHLIST", "A|B")
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for text in ["", "CUSTOMERS", ":CUSTOMERS", r#"{"src":"CUSTOMERS"}"#, "{broken"] {
            assert!(
                matches!(EntityIdentifier::parse(text), Err(GatewayError::InvalidArgument(_))),
                "{:?} should not parse",
                text
            );
        }
    }

    #[test]
    fn test_identifier_list_forms() {
        let ids = EntityIdentifiers::parse("1, 2,2,3").unwrap();
        assert_eq!(ids.len(), 3);

        let records =
            EntityIdentifiers::parse(r#"[{"src":"CUSTOMERS","id":"1001"},":WATCHLIST:2001"]"#)
                .unwrap();
        assert_eq!(
            records.ensure_homogeneous("entities").unwrap(),
            Some(IdentifierKind::Record)
        );
    }

    #[test]
    fn test_mixed_identifier_set_is_rejected() {
        let ids: EntityIdentifiers = vec![
            EntityIdentifier::entity(1),
            EntityIdentifier::record("CUSTOMERS", "1001"),
        ]
        .into_iter()
        .collect();

        assert!(ids.ensure_homogeneous("avoidEntities").is_err());
        assert_eq!(EntityIdentifiers::new().ensure_homogeneous("x").unwrap(), None);
    }

    #[test]
    fn test_resolve_record_and_entity_id() {
        let engine = create_test_engine();
        let resolver = IdentifierResolver::new(&engine);

        let record = EntityIdentifier::record("CUSTOMERS", "1002");
        let entity_id = resolver.resolve(&record).unwrap();

        assert_eq!(entity_id, 1);
        // resolving the resolved id again changes nothing
        assert_eq!(
            resolver.resolve(&EntityIdentifier::entity(entity_id)).unwrap(),
            entity_id
        );
    }

    #[test]
    fn test_resolve_unknown_record_and_source() {
        let engine = create_test_engine();
        let resolver = IdentifierResolver::new(&engine);

        let missing = resolver.resolve(&EntityIdentifier::record("CUSTOMERS", "nope"));
        assert!(matches!(missing, Err(GatewayError::NotFound(_))));

        let unknown_source = resolver.resolve(&EntityIdentifier::record("NOWHERE", "1"));
        assert!(matches!(unknown_source, Err(GatewayError::NotFound(_))));
    }

    #[test]
    fn test_resolve_all_collapses_same_entity() {
        let engine = create_test_engine();
        let resolver = IdentifierResolver::new(&engine);
        let ids = EntityIdentifiers::parse(":CUSTOMERS:1001,:CUSTOMERS:1002,:WATCHLIST:2001")
            .unwrap();

        assert_eq!(resolver.resolve_all(&ids).unwrap(), vec![1, 2]);
    }
}
