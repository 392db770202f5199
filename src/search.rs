// 🔍 Search Classifier - attribute search, bucketed and filtered
//
// Criteria are attribute code → set of values. Several values for one code
// are alternatives: a candidate matching any of them counts.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::engine::ResolutionEngine;
use crate::error::{GatewayError, GatewayResult};
use crate::payload::{decode, MatchLevel, RawFeatureScore, RawSearchData, ScoringBucket};
use crate::projection::{EntityDataView, EntityProjector, ProjectionOptions};
use crate::Answer;

const NAME_SCORES: &str = "NAME";

// ============================================================================
// MATCH BUCKETS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchBucket {
    Match,
    PossibleMatch,
    PossibleRelation,
    NameOnlyMatch,
}

impl MatchBucket {
    pub fn parse(text: &str) -> GatewayResult<Self> {
        match text.trim().to_uppercase().as_str() {
            "MATCH" => Ok(MatchBucket::Match),
            "POSSIBLE_MATCH" => Ok(MatchBucket::PossibleMatch),
            "POSSIBLE_RELATION" => Ok(MatchBucket::PossibleRelation),
            "NAME_ONLY_MATCH" => Ok(MatchBucket::NameOnlyMatch),
            other => Err(GatewayError::invalid(format!(
                "unrecognized search result type: {}",
                other
            ))),
        }
    }

    /// Bucket for an engine match level; no bucket for non-matches
    pub fn from_level(level: MatchLevel) -> Option<Self> {
        match level {
            MatchLevel::Resolved => Some(MatchBucket::Match),
            MatchLevel::PossiblySame => Some(MatchBucket::PossibleMatch),
            MatchLevel::PossiblyRelated | MatchLevel::Disclosed => {
                Some(MatchBucket::PossibleRelation)
            }
            MatchLevel::NameOnly => Some(MatchBucket::NameOnlyMatch),
            MatchLevel::NoMatch => None,
        }
    }

    /// Parse a list of filter values, each possibly comma-separated
    pub fn parse_all<'a>(
        values: impl IntoIterator<Item = &'a str>,
    ) -> GatewayResult<BTreeSet<Self>> {
        let mut buckets = BTreeSet::new();
        for value in values {
            for token in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                buckets.insert(Self::parse(token)?);
            }
        }
        Ok(buckets)
    }
}

// ============================================================================
// CRITERIA
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCriteria {
    attributes: BTreeMap<String, BTreeSet<String>>,
}

impl SearchCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, attribute: &str, value: &str) -> Self {
        self.insert(attribute, value);
        self
    }

    pub fn insert(&mut self, attribute: &str, value: &str) {
        let attribute = attribute.trim().to_uppercase();
        let value = value.trim();
        if attribute.is_empty() || value.is_empty() {
            return;
        }
        self.attributes
            .entry(attribute)
            .or_default()
            .insert(value.to_string());
    }

    /// Merge a JSON object of attribute → value (or array of values)
    pub fn merge_json(&mut self, value: &Value) -> GatewayResult<()> {
        let object = value.as_object().ok_or_else(|| {
            GatewayError::invalid(format!("search criteria must be a JSON object: {}", value))
        })?;
        for (attribute, values) in object {
            let values = match values {
                Value::Array(items) => items.clone(),
                single => vec![single.clone()],
            };
            for item in values {
                match item {
                    Value::String(s) => self.insert(attribute, &s),
                    Value::Number(n) => self.insert(attribute, &n.to_string()),
                    Value::Null => {}
                    other => {
                        return Err(GatewayError::invalid(format!(
                            "unsupported value for search attribute {}: {}",
                            attribute, other
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    /// Merge JSON text (the `attrs` parameter or a request body)
    pub fn merge_json_text(&mut self, text: &str) -> GatewayResult<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        let value: Value = serde_json::from_str(text)
            .map_err(|e| GatewayError::invalid(format!("malformed search criteria: {}", e)))?;
        self.merge_json(&value)
    }

    /// Merge one `KEY:VALUE` pair
    pub fn merge_pair(&mut self, pair: &str) -> GatewayResult<()> {
        match pair.split_once(':') {
            Some((attribute, value))
                if !attribute.trim().is_empty() && !value.trim().is_empty() =>
            {
                self.insert(attribute, value);
                Ok(())
            }
            _ => Err(GatewayError::invalid(format!(
                "search attribute must look like KEY:VALUE: {}",
                pair
            ))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Engine form: every attribute carries an array of alternative values
    pub fn to_engine_value(&self) -> Value {
        Value::Object(
            self.attributes
                .iter()
                .map(|(attribute, values)| {
                    (
                        attribute.clone(),
                        Value::Array(values.iter().cloned().map(Value::String).collect()),
                    )
                })
                .collect(),
        )
    }
}

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureScoreView {
    pub inbound_feature: String,
    pub candidate_feature: String,
    pub score: i32,
    pub scoring_bucket: ScoringBucket,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name_score: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_name_score: Option<i32>,
}

impl From<&RawFeatureScore> for FeatureScoreView {
    fn from(score: &RawFeatureScore) -> Self {
        Self {
            inbound_feature: score.inbound_feat.clone(),
            candidate_feature: score.candidate_feat.clone(),
            score: score.full_score,
            scoring_bucket: score.score_bucket,
            full_name_score: score.full_name_score,
            org_name_score: score.org_name_score,
        }
    }
}

pub fn project_scores(
    scores: &BTreeMap<String, Vec<RawFeatureScore>>,
) -> BTreeMap<String, Vec<FeatureScoreView>> {
    scores
        .iter()
        .map(|(feature_type, scores)| {
            (
                feature_type.clone(),
                scores.iter().map(FeatureScoreView::from).collect(),
            )
        })
        .collect()
}

/// Highest full-name or organization-name score among NAME scores.
/// Absent (not zero) when there are none.
pub fn best_name_score(scores: &BTreeMap<String, Vec<RawFeatureScore>>) -> Option<i32> {
    scores
        .get(NAME_SCORES)?
        .iter()
        .flat_map(|s| [s.full_name_score, s.org_name_score])
        .flatten()
        .max()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    #[serde(flatten)]
    pub entity: EntityDataView,
    pub result_type: MatchBucket,
    pub match_level: MatchLevel,
    pub match_key: String,
    pub feature_scores: BTreeMap<String, Vec<FeatureScoreView>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_name_score: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultsData {
    pub search_results: Vec<SearchResult>,
}

// ============================================================================
// CLASSIFIER
// ============================================================================

pub struct SearchClassifier<'e> {
    engine: &'e dyn ResolutionEngine,
}

impl<'e> SearchClassifier<'e> {
    pub fn new(engine: &'e dyn ResolutionEngine) -> Self {
        Self { engine }
    }

    /// Empty `include_only` keeps every bucket
    pub fn search(
        &self,
        criteria: &SearchCriteria,
        include_only: &BTreeSet<MatchBucket>,
        options: ProjectionOptions,
    ) -> GatewayResult<Answer<SearchResultsData>> {
        if criteria.is_empty() {
            return Err(GatewayError::invalid("search criteria must not be empty"));
        }
        debug!(attributes = criteria.len(), filters = include_only.len(), "searching");

        let raw = self
            .engine
            .search_by_attributes(&criteria.to_engine_value(), options.engine_flags())?;
        let payload: RawSearchData = decode(raw.clone(), "search")?;

        let projector = EntityProjector::new(options);
        let search_results = payload
            .resolved_entities
            .iter()
            .filter_map(|candidate| {
                let info = &candidate.match_info;
                let bucket = MatchBucket::from_level(info.match_level_code)?;
                if !include_only.is_empty() && !include_only.contains(&bucket) {
                    return None;
                }
                Some(SearchResult {
                    entity: projector.project(&candidate.entity),
                    result_type: bucket,
                    match_level: info.match_level_code,
                    match_key: info.match_key.clone(),
                    feature_scores: project_scores(&info.feature_scores),
                    best_name_score: best_name_score(&info.feature_scores),
                })
            })
            .collect();

        Ok(Answer {
            data: SearchResultsData { search_results },
            raw,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
