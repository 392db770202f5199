// 🏠 Local Engine - the engine interface over a SQLite repository
//
// Entities in the repository are already resolved. This engine assembles
// the native payloads from them: merged features, related entities, graph
// paths, attribute search scoring and match explanations.

use anyhow::Context;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::debug;

use super::scoring::{self, InboundValue};
use super::{
    EngineFailure, EngineFlags, EngineResult, NetworkRequest, PathRequest, ResolutionEngine,
    CONFIG_NOT_FOUND_CODE, REPOSITORY_FAILURE_CODE,
};
use crate::graph::PathConstraints;
use crate::payload::{
    MatchLevel, RawDisclosedRelation, RawEntityData, RawEntityPath, RawFeature, RawFeatureStats,
    RawFeatureValue, RawMatchInfo, RawNetworkData, RawPathData, RawRecord, RawRecordData,
    RawRecordKey, RawRecordSummary, RawRelatedEntity, RawResolvedEntity, RawSearchCandidate,
    RawSearchData, RawWhyData, RawWhyMatchInfo, RawWhyResult, RelationKind,
};
use crate::repository::{self, DisclosureKind, RecordDocument};

/// Internal matching keys generated from display features
const INTERNAL_KEYS: [(&str, &str); 3] = [
    ("NAME", "NAME_KEY"),
    ("ADDRESS", "ADDR_KEY"),
    ("PHONE", "PHONE_KEY"),
];

type FeatureCounts = HashMap<(String, String), u64>;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
struct EngineConfig {
    document: Value,
    data_sources: BTreeSet<String>,
    /// feature type → attribute class (NAME, ADDRESS, PHONE, ...)
    attr_classes: BTreeMap<String, String>,
    /// attribute code → feature type
    attributes: BTreeMap<String, String>,
}

impl EngineConfig {
    fn from_document(document: Value) -> Self {
        let entries = |key: &str| -> Vec<Value> {
            document
                .get(key)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        };
        let text = |entry: &Value, key: &str| {
            entry.get(key).and_then(Value::as_str).map(str::to_string)
        };

        let data_sources = entries("DATA_SOURCES")
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        let attr_classes = entries("FEATURE_TYPES")
            .iter()
            .filter_map(|e| Some((text(e, "FTYPE_CODE")?, text(e, "ATTR_CLASS")?)))
            .collect();
        let attributes = entries("ATTRIBUTES")
            .iter()
            .filter_map(|e| Some((text(e, "ATTR_CODE")?, text(e, "FTYPE_CODE")?)))
            .collect();

        Self {
            document,
            data_sources,
            attr_classes,
            attributes,
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct LocalEngine {
    conn: Connection,
    config_id: i64,
    config: EngineConfig,
}

impl LocalEngine {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = repository::open_repository(path)?;
        Self::from_connection(conn)
    }

    /// Wrap a connection, initializing with the repository's default config
    pub fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        repository::setup_database(&conn)?;
        let config_id = match repository::default_config_id(&conn)? {
            Some(id) => id,
            None => repository::register_config(
                &conn,
                &repository::default_config(&BTreeSet::new()),
                true,
            )?,
        };
        let document = repository::get_config(&conn, config_id)?
            .context("Default configuration disappeared")?;

        Ok(Self {
            conn,
            config_id,
            config: EngineConfig::from_document(document),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn require_data_source(&self, data_source: &str) -> EngineResult<()> {
        if self.config.data_sources.contains(data_source) {
            Ok(())
        } else {
            Err(EngineFailure::data_source_not_found(data_source))
        }
    }

    fn entity_records(&self, entity_id: i64) -> EngineResult<Vec<RecordDocument>> {
        let records = repository::records_for_entity(&self.conn, entity_id)?;
        if records.is_empty() {
            return Err(EngineFailure::entity_not_found(entity_id));
        }
        Ok(records)
    }

    fn record(&self, data_source: &str, record_id: &str) -> EngineResult<(i64, RecordDocument)> {
        self.require_data_source(data_source)?;
        repository::get_record(&self.conn, data_source, record_id)?
            .ok_or_else(|| EngineFailure::record_not_found(data_source, record_id))
    }

    /// Number of entities carrying each (feature type, normalized value)
    fn feature_counts(&self) -> EngineResult<FeatureCounts> {
        let mut holders: HashMap<(String, String), BTreeSet<i64>> = HashMap::new();
        for (entity_id, record) in repository::all_records(&self.conn)? {
            for (feature_type, values) in &record.features {
                for value in values {
                    let key = (
                        feature_type.clone(),
                        scoring::normalize_value(feature_type, value),
                    );
                    holders.entry(key).or_default().insert(entity_id);
                }
            }
        }
        Ok(holders
            .into_iter()
            .map(|(key, entities)| (key, entities.len() as u64))
            .collect())
    }

    fn entity_data(&self, entity_id: i64, flags: EngineFlags) -> EngineResult<RawEntityData> {
        let records = self.entity_records(entity_id)?;
        let counts = if flags.contains(EngineFlags::INCLUDE_FEATURE_STATS) {
            Some(self.feature_counts()?)
        } else {
            None
        };
        let resolved_entity = self.build_entity(entity_id, &records, flags, counts.as_ref());

        let mut related_entities = Vec::new();
        if flags.contains(EngineFlags::INCLUDE_RELATED) {
            for relationship in repository::relationships_for_entity(&self.conn, entity_id)? {
                let related_records = self.entity_records(relationship.related_id)?;
                let mut entity = self.build_entity(
                    relationship.related_id,
                    &related_records,
                    flags,
                    counts.as_ref(),
                );
                if !flags.contains(EngineFlags::INCLUDE_RELATED_DETAILS) {
                    entity.features.clear();
                    entity.records.clear();
                }
                related_entities.push(RawRelatedEntity {
                    entity,
                    match_level_code: relationship.match_level,
                    match_key: relationship.match_key,
                    is_disclosed: relationship.disclosed,
                    is_ambiguous: relationship.ambiguous,
                });
            }
        }

        Ok(RawEntityData {
            resolved_entity,
            related_entities,
        })
    }

    fn build_entity(
        &self,
        entity_id: i64,
        records: &[RecordDocument],
        flags: EngineFlags,
        counts: Option<&FeatureCounts>,
    ) -> RawResolvedEntity {
        let entity_name = records
            .iter()
            .find_map(|r| r.features.get("NAME").and_then(|names| names.first()))
            .cloned();

        let mut summaries: BTreeMap<&str, RawRecordSummary> = BTreeMap::new();
        for record in records {
            let summary = summaries
                .entry(record.data_source.as_str())
                .or_insert_with(|| RawRecordSummary {
                    data_source: record.data_source.clone(),
                    record_count: 0,
                    last_seen_dt: None,
                });
            summary.record_count += 1;
            summary.last_seen_dt = summary.last_seen_dt.max(record.last_seen_dt);
        }

        let features = if flags.contains(EngineFlags::INCLUDE_FEATURES) {
            merge_features(
                records,
                flags.contains(EngineFlags::INCLUDE_INTERNAL_FEATURES),
                counts,
            )
        } else {
            BTreeMap::new()
        };

        let raw_records = if flags.contains(EngineFlags::INCLUDE_RECORDS) {
            let with_data = flags.contains(EngineFlags::INCLUDE_RECORD_DATA);
            records.iter().map(|r| self.raw_record(r, with_data)).collect()
        } else {
            Vec::new()
        };

        RawResolvedEntity {
            entity_id,
            entity_name,
            features,
            record_summary: summaries.into_values().collect(),
            records: raw_records,
            last_seen_dt: records.iter().filter_map(|r| r.last_seen_dt).max(),
        }
    }

    fn raw_record(&self, record: &RecordDocument, with_data: bool) -> RawRecord {
        let mut raw = RawRecord {
            data_source: record.data_source.clone(),
            record_id: record.record_id.clone(),
            last_seen_dt: record.last_seen_dt,
            ..RawRecord::default()
        };
        if !with_data {
            return raw;
        }

        for (feature_type, values) in &record.features {
            let class = self.config.attr_classes.get(feature_type).map(String::as_str);
            for value in values {
                match class {
                    Some("NAME") => raw.name_data.push(value.clone()),
                    Some("ADDRESS") => raw.address_data.push(value.clone()),
                    Some("PHONE") => raw.phone_data.push(value.clone()),
                    Some("CHARACTERISTIC") => raw
                        .characteristic_data
                        .push(format!("{}: {}", feature_type, value)),
                    Some("IDENTIFIER") => raw
                        .identifier_data
                        .push(format!("{}: {}", feature_type, value)),
                    _ => raw.other_data.push(format!("{}: {}", feature_type, value)),
                }
            }
        }
        for disclosure in &record.relationships {
            let role = disclosure.role.as_deref().unwrap_or("");
            raw.relationship_data.push(format!(
                "{} {}: {} {}",
                disclosure.domain,
                kind_label(disclosure.kind),
                disclosure.key,
                role
            ).trim_end().to_string());
        }
        raw.other_data.extend(record.other_data.iter().cloned());
        raw
    }

    fn stored_match_level(
        &self,
        entity_id: i64,
        related_id: i64,
    ) -> EngineResult<Option<MatchLevel>> {
        Ok(repository::relationships_for_entity(&self.conn, entity_id)?
            .into_iter()
            .find(|r| r.related_id == related_id)
            .map(|r| r.match_level))
    }

    fn entities_payload(
        &self,
        entity_ids: &[i64],
        flags: EngineFlags,
    ) -> EngineResult<Vec<RawEntityData>> {
        entity_ids
            .iter()
            .map(|id| self.entity_data(*id, flags))
            .collect()
    }
}

fn kind_label(kind: DisclosureKind) -> &'static str {
    match kind {
        DisclosureKind::Link => "LINK",
        DisclosureKind::Pointer => "POINTER",
        DisclosureKind::Anchor => "ANCHOR",
    }
}

fn to_payload<T: Serialize>(value: &T) -> EngineResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| EngineFailure::new(REPOSITORY_FAILURE_CODE, e.to_string()))
}

/// Stable feature id for a (feature type, value) pair
fn feature_id(feature_type: &str, value: &str) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(feature_type.as_bytes());
    hasher.update(b"|");
    hasher.update(value.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes[2..].copy_from_slice(&digest[..6]);
    i64::from_be_bytes(bytes)
}

/// Fold record features into entity features. Values equal after
/// normalization become one feature whose first-seen value is primary.
fn merge_features(
    records: &[RecordDocument],
    with_internal: bool,
    counts: Option<&FeatureCounts>,
) -> BTreeMap<String, Vec<RawFeature>> {
    let mut grouped: BTreeMap<String, Vec<(String, Vec<String>)>> = BTreeMap::new();
    for record in records {
        for (feature_type, values) in &record.features {
            let groups = grouped.entry(feature_type.clone()).or_default();
            for value in values {
                let normalized = scoring::normalize_value(feature_type, value);
                match groups.iter_mut().find(|(n, _)| *n == normalized) {
                    Some((_, members)) => {
                        if !members.contains(value) {
                            members.push(value.clone());
                        }
                    }
                    None => groups.push((normalized, vec![value.clone()])),
                }
            }
        }
    }

    let mut features = BTreeMap::new();
    for (feature_type, groups) in &grouped {
        let merged = groups
            .iter()
            .map(|(normalized, members)| {
                build_feature(feature_type, feature_type, normalized, members, counts)
            })
            .collect();
        features.insert(feature_type.clone(), merged);

        if !with_internal {
            continue;
        }
        if let Some((_, key_type)) = INTERNAL_KEYS.iter().find(|(base, _)| base == feature_type) {
            let keys = groups
                .iter()
                .map(|(normalized, _)| {
                    build_feature(key_type, feature_type, normalized, &[normalized.clone()], counts)
                })
                .collect();
            features.insert(key_type.to_string(), keys);
        }
    }
    features
}

fn build_feature(
    feature_type: &str,
    count_type: &str,
    normalized: &str,
    members: &[String],
    counts: Option<&FeatureCounts>,
) -> RawFeature {
    let stats = counts.map(|counts| RawFeatureStats {
        entity_count: counts
            .get(&(count_type.to_string(), normalized.to_string()))
            .copied()
            .unwrap_or(1),
        candidate_cap_reached: false,
        scoring_cap_reached: false,
        suppressed: false,
    });
    let primary = members.first().cloned().unwrap_or_default();

    RawFeature {
        lib_feat_id: feature_id(feature_type, &primary),
        feat_desc: primary,
        usage_type: None,
        feat_desc_values: members
            .iter()
            .map(|value| RawFeatureValue {
                lib_feat_id: feature_id(feature_type, value),
                feat_desc: value.clone(),
                stats,
            })
            .collect(),
    }
}

fn merged_values(records: &[RecordDocument]) -> BTreeMap<String, Vec<String>> {
    let mut merged: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for record in records {
        for (feature_type, values) in &record.features {
            let target = merged.entry(feature_type.clone()).or_default();
            for value in values {
                if !target.contains(value) {
                    target.push(value.clone());
                }
            }
        }
    }
    merged
}

fn as_inbound(values: &BTreeMap<String, Vec<String>>) -> BTreeMap<String, Vec<InboundValue>> {
    values
        .iter()
        .map(|(feature_type, values)| {
            (
                feature_type.clone(),
                values.iter().map(|v| InboundValue::new(v)).collect(),
            )
        })
        .collect()
}

fn record_key(record: &RecordDocument) -> RawRecordKey {
    RawRecordKey {
        data_source: record.data_source.clone(),
        record_id: record.record_id.clone(),
    }
}

/// Pair up relationship disclosures from both sides on (domain, key)
fn disclosed_relations(
    side1: &[RecordDocument],
    side2: &[RecordDocument],
) -> Vec<RawDisclosedRelation> {
    let mut relations = Vec::new();
    for d1 in side1.iter().flat_map(|r| r.relationships.iter()) {
        for d2 in side2.iter().flat_map(|r| r.relationships.iter()) {
            if d1.domain != d2.domain || d1.key != d2.key {
                continue;
            }
            let kind = match (d1.kind, d2.kind) {
                (DisclosureKind::Link, DisclosureKind::Link) => RelationKind::RelLink,
                (DisclosureKind::Pointer, DisclosureKind::Anchor) => RelationKind::RelPointer,
                (DisclosureKind::Anchor, DisclosureKind::Pointer) => RelationKind::RelAnchor,
                _ => continue,
            };
            relations.push(RawDisclosedRelation {
                domain: d1.domain.clone(),
                ftype_code: kind,
                role1: d1.role.clone(),
                role2: d2.role.clone(),
                rel_key: Some(d1.key.clone()),
            });
        }
    }
    relations
}

/// Feature tokens followed by one `+DOMAIN(ROLES1:ROLES2)` token per domain
fn why_key(
    scores: &BTreeMap<String, Vec<crate::payload::RawFeatureScore>>,
    relations: &[RawDisclosedRelation],
) -> String {
    let mut key = scoring::match_key(scores);
    let mut domains: BTreeMap<&str, (Vec<&str>, Vec<&str>)> = BTreeMap::new();
    for relation in relations {
        let (roles1, roles2) = domains.entry(relation.domain.as_str()).or_default();
        if let Some(role) = relation.role1.as_deref() {
            if !roles1.contains(&role) {
                roles1.push(role);
            }
        }
        if let Some(role) = relation.role2.as_deref() {
            if !roles2.contains(&role) {
                roles2.push(role);
            }
        }
    }
    for (domain, (roles1, roles2)) in domains {
        key.push('+');
        key.push_str(domain);
        if !roles1.is_empty() || !roles2.is_empty() {
            key.push_str(&format!("({}:{})", roles1.join(","), roles2.join(",")));
        }
    }
    key
}

// ============================================================================
// ENGINE INTERFACE
// ============================================================================

impl ResolutionEngine for LocalEngine {
    fn resolve_record(&self, data_source: &str, record_id: &str) -> EngineResult<i64> {
        self.require_data_source(data_source)?;
        repository::entity_for_record(&self.conn, data_source, record_id)?
            .ok_or_else(|| EngineFailure::record_not_found(data_source, record_id))
    }

    fn get_entity_by_record_id(
        &self,
        data_source: &str,
        record_id: &str,
        flags: EngineFlags,
    ) -> EngineResult<Value> {
        let entity_id = self.resolve_record(data_source, record_id)?;
        self.get_entity_by_entity_id(entity_id, flags)
    }

    fn get_entity_by_entity_id(&self, entity_id: i64, flags: EngineFlags) -> EngineResult<Value> {
        debug!(entity_id, flags = flags.bits(), "get entity");
        to_payload(&self.entity_data(entity_id, flags)?)
    }

    fn get_record(&self, data_source: &str, record_id: &str) -> EngineResult<Value> {
        debug!(data_source, record_id, "get record");
        let (entity_id, record) = self.record(data_source, record_id)?;
        to_payload(&RawRecordData {
            entity_id,
            record: self.raw_record(&record, true),
            json_data: record.features.clone(),
        })
    }

    fn find_path(&self, request: &PathRequest, flags: EngineFlags) -> EngineResult<Value> {
        debug!(
            from = request.from,
            to = request.to,
            max_degrees = request.max_degrees,
            "find path"
        );
        for entity_id in [request.from, request.to] {
            if !repository::entity_exists(&self.conn, entity_id)? {
                return Err(EngineFailure::entity_not_found(entity_id));
            }
        }
        for data_source in &request.required_sources {
            self.require_data_source(data_source)?;
        }

        let graph = repository::load_graph(&self.conn)?;
        let constraints = PathConstraints {
            max_degrees: request.max_degrees,
            avoid: request.avoid.iter().copied().collect(),
            forbid_avoided: request.forbid_avoided,
            required_sources: request.required_sources.iter().cloned().collect(),
        };
        let path = graph
            .shortest_path(request.from, request.to, &constraints)
            .unwrap_or_default();

        let mut shown = if path.is_empty() {
            vec![request.from, request.to]
        } else {
            path.clone()
        };
        shown.dedup();

        to_payload(&RawPathData {
            entity_paths: vec![RawEntityPath {
                start_entity_id: request.from,
                end_entity_id: request.to,
                entities: path,
            }],
            entities: self.entities_payload(&shown, flags)?,
        })
    }

    fn find_network(&self, request: &NetworkRequest, flags: EngineFlags) -> EngineResult<Value> {
        debug!(
            entities = ?request.entity_ids,
            max_degrees = request.max_degrees,
            build_out = request.build_out,
            "find network"
        );
        for entity_id in &request.entity_ids {
            if !repository::entity_exists(&self.conn, *entity_id)? {
                return Err(EngineFailure::entity_not_found(*entity_id));
            }
        }

        let graph = repository::load_graph(&self.conn)?;
        let constraints = PathConstraints {
            max_degrees: request.max_degrees,
            ..PathConstraints::default()
        };

        let mut ordered = request.entity_ids.clone();
        let mut entity_paths = Vec::new();
        for (i, from) in request.entity_ids.iter().enumerate() {
            for to in &request.entity_ids[i + 1..] {
                let path = graph.shortest_path(*from, *to, &constraints).unwrap_or_default();
                for entity_id in &path {
                    if !ordered.contains(entity_id) {
                        ordered.push(*entity_id);
                    }
                }
                entity_paths.push(RawEntityPath {
                    start_entity_id: *from,
                    end_entity_id: *to,
                    entities: path,
                });
            }
        }
        for entity_id in graph.build_out(&request.entity_ids, request.build_out) {
            if !ordered.contains(&entity_id) {
                ordered.push(entity_id);
            }
        }

        let budget = (request.max_entities as usize).max(request.entity_ids.len());
        let max_entity_limit_reached = ordered.len() > budget;
        ordered.truncate(budget);

        to_payload(&RawNetworkData {
            entity_paths,
            entities: self.entities_payload(&ordered, flags)?,
            max_entity_limit_reached,
        })
    }

    fn search_by_attributes(&self, criteria: &Value, flags: EngineFlags) -> EngineResult<Value> {
        let mut inbound: BTreeMap<String, Vec<InboundValue>> = BTreeMap::new();
        if let Some(object) = criteria.as_object() {
            for (attribute, values) in object {
                let feature_type = match self.config.attributes.get(attribute) {
                    Some(feature_type) => feature_type.clone(),
                    None if self.config.attr_classes.contains_key(attribute) => attribute.clone(),
                    None => continue,
                };
                let texts: Vec<&str> = match values {
                    Value::String(s) => vec![s.as_str()],
                    Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
                    _ => Vec::new(),
                };
                let target = inbound.entry(feature_type).or_default();
                for text in texts {
                    target.push(if attribute == "NAME_ORG" {
                        InboundValue::organization(text)
                    } else {
                        InboundValue::new(text)
                    });
                }
            }
        }
        debug!(feature_types = inbound.len(), "search by attributes");

        let mut by_entity: BTreeMap<i64, Vec<RecordDocument>> = BTreeMap::new();
        for (entity_id, record) in repository::all_records(&self.conn)? {
            by_entity.entry(entity_id).or_default().push(record);
        }

        let mut candidates = Vec::new();
        for (entity_id, records) in &by_entity {
            let scores = scoring::score_features(&inbound, &merged_values(records));
            let level = scoring::classify(&scores);
            if level == MatchLevel::NoMatch {
                continue;
            }
            candidates.push((level, *entity_id, scores));
        }
        candidates.sort_by_key(|(level, entity_id, _)| (*level, *entity_id));

        let mut resolved_entities = Vec::new();
        for (level, entity_id, scores) in candidates {
            resolved_entities.push(RawSearchCandidate {
                match_info: RawMatchInfo {
                    match_level: level.number(),
                    match_level_code: level,
                    match_key: scoring::match_key(&scores),
                    feature_scores: scores,
                },
                entity: self.entity_data(entity_id, flags)?,
            });
        }

        to_payload(&RawSearchData { resolved_entities })
    }

    fn why_entity(&self, entity_id: i64, flags: EngineFlags) -> EngineResult<Value> {
        let records = self.entity_records(entity_id)?;

        let mut why_results = Vec::new();
        for (index, record) in records.iter().enumerate() {
            let others: Vec<RecordDocument> = records
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, r)| r.clone())
                .collect();
            let candidate = if others.is_empty() {
                record.features.clone()
            } else {
                merged_values(&others)
            };
            let scores = scoring::score_features(&as_inbound(&record.features), &candidate);

            why_results.push(RawWhyResult {
                entity_id,
                focus_records: vec![record_key(record)],
                entity_id_2: None,
                focus_records_2: Vec::new(),
                match_info: RawWhyMatchInfo {
                    why_key: scoring::match_key(&scores),
                    match_level_code: MatchLevel::Resolved,
                    why_errule_code: None,
                    feature_scores: scores,
                    disclosed_relations: Vec::new(),
                },
            });
        }

        to_payload(&RawWhyData {
            why_results,
            entities: vec![self.entity_data(entity_id, flags)?],
        })
    }

    fn why_entities(
        &self,
        entity_id1: i64,
        entity_id2: i64,
        flags: EngineFlags,
    ) -> EngineResult<Value> {
        let records1 = self.entity_records(entity_id1)?;
        let records2 = self.entity_records(entity_id2)?;

        let scores = scoring::score_features(
            &as_inbound(&merged_values(&records1)),
            &merged_values(&records2),
        );
        let relations = disclosed_relations(&records1, &records2);
        let match_level = match self.stored_match_level(entity_id1, entity_id2)? {
            Some(level) => level,
            None if !relations.is_empty() => MatchLevel::Disclosed,
            None => scoring::classify(&scores),
        };

        let result = RawWhyResult {
            entity_id: entity_id1,
            focus_records: records1.iter().map(record_key).collect(),
            entity_id_2: Some(entity_id2),
            focus_records_2: records2.iter().map(record_key).collect(),
            match_info: RawWhyMatchInfo {
                why_key: why_key(&scores, &relations),
                match_level_code: match_level,
                why_errule_code: None,
                feature_scores: scores,
                disclosed_relations: relations,
            },
        };

        to_payload(&RawWhyData {
            why_results: vec![result],
            entities: self.entities_payload(&[entity_id1, entity_id2], flags)?,
        })
    }

    fn why_records(
        &self,
        data_source1: &str,
        record_id1: &str,
        data_source2: &str,
        record_id2: &str,
        flags: EngineFlags,
    ) -> EngineResult<Value> {
        let (entity_id1, record1) = self.record(data_source1, record_id1)?;
        let (entity_id2, record2) = self.record(data_source2, record_id2)?;

        let scores = scoring::score_features(&as_inbound(&record1.features), &record2.features);
        let relations =
            disclosed_relations(std::slice::from_ref(&record1), std::slice::from_ref(&record2));
        let match_level = if entity_id1 == entity_id2 {
            MatchLevel::Resolved
        } else {
            match self.stored_match_level(entity_id1, entity_id2)? {
                Some(level) => level,
                None => scoring::classify(&scores),
            }
        };

        let mut entity_ids = vec![entity_id1];
        if entity_id2 != entity_id1 {
            entity_ids.push(entity_id2);
        }

        let result = RawWhyResult {
            entity_id: entity_id1,
            focus_records: vec![record_key(&record1)],
            entity_id_2: Some(entity_id2),
            focus_records_2: vec![record_key(&record2)],
            match_info: RawWhyMatchInfo {
                why_key: why_key(&scores, &relations),
                match_level_code: match_level,
                why_errule_code: None,
                feature_scores: scores,
                disclosed_relations: relations,
            },
        };

        to_payload(&RawWhyData {
            why_results: vec![result],
            entities: self.entities_payload(&entity_ids, flags)?,
        })
    }

    fn export_config(&self) -> EngineResult<Value> {
        Ok(self.config.document.clone())
    }

    fn active_config_id(&self) -> EngineResult<i64> {
        Ok(self.config_id)
    }

    fn default_config_id(&self) -> EngineResult<i64> {
        repository::default_config_id(&self.conn)?
            .ok_or_else(|| EngineFailure::new(CONFIG_NOT_FOUND_CODE, "No default configuration"))
    }

    fn reinitialize(&mut self, config_id: i64) -> EngineResult<()> {
        let document = repository::get_config(&self.conn, config_id)?.ok_or_else(|| {
            EngineFailure::new(
                CONFIG_NOT_FOUND_CODE,
                format!("Unknown configuration id: {}", config_id),
            )
        })?;
        debug!(from = self.config_id, to = config_id, "reinitializing engine");
        self.config_id = config_id;
        self.config = EngineConfig::from_document(document);
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DATA_SOURCE_NOT_FOUND_CODE, ENTITY_NOT_FOUND_CODE};
    use crate::fixtures::create_test_engine;
    use crate::payload::decode;
    use serde_json::json;

    fn create_test_flags() -> EngineFlags {
        EngineFlags::INCLUDE_FEATURES
            | EngineFlags::INCLUDE_RECORDS
            | EngineFlags::INCLUDE_RECORD_DATA
            | EngineFlags::INCLUDE_RELATED
    }

    #[test]
    fn test_entity_features_merge_duplicates() {
        let engine = create_test_engine();
        let payload = engine.get_entity_by_entity_id(1, create_test_flags()).unwrap();
        let raw: RawEntityData = decode(payload, "entity").unwrap();

        let entity = raw.resolved_entity;
        assert_eq!(entity.entity_name.as_deref(), Some("Joe Schmoe"));
        assert_eq!(entity.records.len(), 2);
        assert_eq!(entity.record_summary[0].record_count, 2);

        let names = &entity.features["NAME"];
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].feat_desc, "Joe Schmoe");
        assert_eq!(names[0].feat_desc_values.len(), 2);
        assert!(!entity.features.contains_key("NAME_KEY"));

        let related: Vec<i64> = raw.related_entities.iter().map(|r| r.entity.entity_id).collect();
        assert_eq!(related, vec![2, 7]);
        assert!(raw.related_entities[0].entity.records.is_empty());
    }

    #[test]
    fn test_internal_features_and_stats() {
        let engine = create_test_engine();
        let flags = EngineFlags::INCLUDE_FEATURES
            | EngineFlags::INCLUDE_INTERNAL_FEATURES
            | EngineFlags::INCLUDE_FEATURE_STATS;
        let raw: RawEntityData =
            decode(engine.get_entity_by_entity_id(2, flags).unwrap(), "entity").unwrap();
        let features = raw.resolved_entity.features;

        assert_eq!(features["NAME_KEY"][0].feat_desc, "joann smith");
        // the date of birth is shared with entity 1
        let dob_stats = features["DOB"][0].feat_desc_values[0].stats.unwrap();
        assert_eq!(dob_stats.entity_count, 2);
    }

    #[test]
    fn test_unknown_entity_and_source() {
        let engine = create_test_engine();

        let err = engine.get_entity_by_entity_id(999, EngineFlags::NONE).unwrap_err();
        assert_eq!(err.code, ENTITY_NOT_FOUND_CODE);

        let err = engine.resolve_record("NOWHERE", "1").unwrap_err();
        assert_eq!(err.code, DATA_SOURCE_NOT_FOUND_CODE);
    }

    #[test]
    fn test_get_record_payload() {
        let engine = create_test_engine();
        let raw: RawRecordData =
            decode(engine.get_record("CUSTOMERS", "1001").unwrap(), "record").unwrap();

        assert_eq!(raw.entity_id, 1);
        assert_eq!(raw.record.record_id, "1001");
        assert_eq!(raw.record.phone_data, vec!["702-555-1212".to_string()]);
        assert!(raw.record.other_data.contains(&"VIP: yes".to_string()));
        assert_eq!(raw.json_data["NAME"], vec!["Joe Schmoe".to_string()]);

        let err = engine.get_record("CUSTOMERS", "9999").unwrap_err();
        assert_eq!(err.code, crate::engine::RECORD_NOT_FOUND_CODE);
    }

    #[test]
    fn test_find_path_payload() {
        let engine = create_test_engine();
        let request = PathRequest {
            from: 1,
            to: 3,
            max_degrees: 2,
            avoid: Vec::new(),
            forbid_avoided: false,
            required_sources: Vec::new(),
        };
        let raw: RawPathData =
            decode(engine.find_path(&request, EngineFlags::NONE).unwrap(), "path").unwrap();

        assert_eq!(raw.entity_paths[0].entities, vec![1, 2, 3]);
        assert_eq!(raw.entities.len(), 3);
    }

    #[test]
    fn test_find_network_honors_budget() {
        let engine = create_test_engine();
        let request = NetworkRequest {
            entity_ids: vec![1],
            max_degrees: 1,
            build_out: 2,
            max_entities: 2,
        };
        let raw: RawNetworkData =
            decode(engine.find_network(&request, EngineFlags::NONE).unwrap(), "network").unwrap();

        assert_eq!(raw.entities.len(), 2);
        assert!(raw.max_entity_limit_reached);
        assert!(raw.entity_paths.is_empty());
    }

    #[test]
    fn test_search_by_phone() {
        let engine = create_test_engine();
        let raw: RawSearchData = decode(
            engine
                .search_by_attributes(&json!({"PHONE_NUMBER": ["702-555-1212"]}), EngineFlags::NONE)
                .unwrap(),
            "search",
        )
        .unwrap();

        assert_eq!(raw.resolved_entities.len(), 1);
        let candidate = &raw.resolved_entities[0];
        assert_eq!(candidate.entity.resolved_entity.entity_id, 1);
        assert_eq!(candidate.match_info.match_level_code, MatchLevel::PossiblyRelated);
        assert_eq!(candidate.match_info.match_key, "+PHONE");
    }

    #[test]
    fn test_why_entities_reports_disclosed_relation() {
        let engine = create_test_engine();
        let raw: RawWhyData =
            decode(engine.why_entities(3, 6, EngineFlags::NONE).unwrap(), "why").unwrap();

        let info = &raw.why_results[0].match_info;
        assert_eq!(info.match_level_code, MatchLevel::Disclosed);
        assert_eq!(info.disclosed_relations[0].ftype_code, RelationKind::RelPointer);
        assert!(info.why_key.contains("+EMPLOYER(EMPLOYEE:EMPLOYER)"));
        assert_eq!(raw.entities.len(), 2);
    }

    #[test]
    fn test_why_entity_has_one_perspective_per_record() {
        let engine = create_test_engine();
        let raw: RawWhyData =
            decode(engine.why_entity(1, EngineFlags::NONE).unwrap(), "why").unwrap();

        assert_eq!(raw.why_results.len(), 2);
        assert_eq!(raw.why_results[0].focus_records[0].record_id, "1001");
        assert_eq!(raw.why_results[0].match_info.why_key, "+NAME+PHONE");
    }

    #[test]
    fn test_reinitialize_switches_config() {
        let mut engine = create_test_engine();
        let mut sources = BTreeSet::new();
        sources.insert("ONLY_THIS".to_string());
        let config = repository::default_config(&sources);
        let other = repository::register_config(engine.connection(), &config, true).unwrap();

        assert_ne!(engine.active_config_id().unwrap(), engine.default_config_id().unwrap());
        engine.reinitialize(other).unwrap();
        assert_eq!(engine.active_config_id().unwrap(), other);
        assert_eq!(engine.data_sources().unwrap(), vec!["ONLY_THIS".to_string()]);
        assert!(engine.reinitialize(42).is_err());
    }
}
