// 📦 Engine Payloads - the raw structured answers the engine hands back
//
// Field names follow the engine's own UPPER_SNAKE vocabulary. Nothing in here
// is caller-facing; the projection layer maps these onto views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{GatewayError, GatewayResult};

/// Decode an engine payload, reporting shape problems as MalformedPayload
pub fn decode<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> GatewayResult<T> {
    serde_json::from_value(value)
        .map_err(|e| GatewayError::MalformedPayload(format!("{} payload: {}", what, e)))
}

// ============================================================================
// CLASSIFICATIONS
// ============================================================================

/// How two entities (or an entity and a search inbound) relate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchLevel {
    Resolved,
    PossiblySame,
    PossiblyRelated,
    NameOnly,
    Disclosed,
    NoMatch,
}

impl MatchLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchLevel::Resolved => "RESOLVED",
            MatchLevel::PossiblySame => "POSSIBLY_SAME",
            MatchLevel::PossiblyRelated => "POSSIBLY_RELATED",
            MatchLevel::NameOnly => "NAME_ONLY",
            MatchLevel::Disclosed => "DISCLOSED",
            MatchLevel::NoMatch => "NO_MATCH",
        }
    }

    /// Numeric MATCH_LEVEL the engine reports next to the code
    pub fn number(&self) -> u8 {
        match self {
            MatchLevel::Resolved => 1,
            MatchLevel::PossiblySame => 2,
            MatchLevel::PossiblyRelated | MatchLevel::Disclosed => 3,
            MatchLevel::NameOnly => 4,
            MatchLevel::NoMatch => 0,
        }
    }
}

/// Coarse closeness bucket for one compared feature pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoringBucket {
    Same,
    Close,
    Likely,
    Plausible,
    Unlikely,
    NoChance,
}

/// Disclosed-relationship feature kind as the engine names it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationKind {
    RelLink,
    RelPointer,
    RelAnchor,
}

// ============================================================================
// ENTITY DATA
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawEntityData {
    pub resolved_entity: RawResolvedEntity,
    #[serde(default)]
    pub related_entities: Vec<RawRelatedEntity>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawResolvedEntity {
    pub entity_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub features: BTreeMap<String, Vec<RawFeature>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub record_summary: Vec<RawRecordSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<RawRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_dt: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawRelatedEntity {
    #[serde(flatten)]
    pub entity: RawResolvedEntity,
    pub match_level_code: MatchLevel,
    #[serde(default)]
    pub match_key: String,
    #[serde(default)]
    pub is_disclosed: bool,
    #[serde(default)]
    pub is_ambiguous: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawRecordSummary {
    pub data_source: String,
    pub record_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_dt: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawRecord {
    pub data_source: String,
    pub record_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_dt: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_key: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name_data: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address_data: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phone_data: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub characteristic_data: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifier_data: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationship_data: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub other_data: Vec<String>,
}

/// One feature of an entity: its primary value plus every value folded into it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawFeature {
    pub lib_feat_id: i64,
    pub feat_desc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_type: Option<String>,
    #[serde(default)]
    pub feat_desc_values: Vec<RawFeatureValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawFeatureValue {
    pub lib_feat_id: i64,
    pub feat_desc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<RawFeatureStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawFeatureStats {
    pub entity_count: u64,
    #[serde(default)]
    pub candidate_cap_reached: bool,
    #[serde(default)]
    pub scoring_cap_reached: bool,
    #[serde(default)]
    pub suppressed: bool,
}

/// A single record as stored, with the entity it currently resolves to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawRecordData {
    pub entity_id: i64,
    #[serde(flatten)]
    pub record: RawRecord,
    /// Feature type → values exactly as the record stated them
    #[serde(default)]
    pub json_data: BTreeMap<String, Vec<String>>,
}

// ============================================================================
// PATHS AND NETWORKS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawEntityPath {
    pub start_entity_id: i64,
    pub end_entity_id: i64,
    #[serde(default)]
    pub entities: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawPathData {
    #[serde(default)]
    pub entity_paths: Vec<RawEntityPath>,
    #[serde(default)]
    pub entities: Vec<RawEntityData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawNetworkData {
    #[serde(default)]
    pub entity_paths: Vec<RawEntityPath>,
    #[serde(default)]
    pub entities: Vec<RawEntityData>,
    #[serde(default)]
    pub max_entity_limit_reached: bool,
}

// ============================================================================
// SEARCH
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawFeatureScore {
    pub inbound_feat: String,
    pub candidate_feat: String,
    pub full_score: i32,
    pub score_bucket: ScoringBucket,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name_score: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_name_score: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawMatchInfo {
    pub match_level: u8,
    pub match_level_code: MatchLevel,
    #[serde(default)]
    pub match_key: String,
    #[serde(default)]
    pub feature_scores: BTreeMap<String, Vec<RawFeatureScore>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawSearchCandidate {
    pub match_info: RawMatchInfo,
    pub entity: RawEntityData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawSearchData {
    #[serde(default)]
    pub resolved_entities: Vec<RawSearchCandidate>,
}

// ============================================================================
// WHY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawRecordKey {
    pub data_source: String,
    pub record_id: String,
}

/// One disclosed-relationship feature pair: side one's kind and roles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawDisclosedRelation {
    pub domain: String,
    pub ftype_code: RelationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rel_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawWhyMatchInfo {
    #[serde(default)]
    pub why_key: String,
    pub match_level_code: MatchLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub why_errule_code: Option<String>,
    #[serde(default)]
    pub feature_scores: BTreeMap<String, Vec<RawFeatureScore>>,
    #[serde(default)]
    pub disclosed_relations: Vec<RawDisclosedRelation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawWhyResult {
    pub entity_id: i64,
    #[serde(default)]
    pub focus_records: Vec<RawRecordKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id_2: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub focus_records_2: Vec<RawRecordKey>,
    pub match_info: RawWhyMatchInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawWhyData {
    #[serde(default)]
    pub why_results: Vec<RawWhyResult>,
    #[serde(default)]
    pub entities: Vec<RawEntityData>,
}
