// ❓ Why Analyzer - match explanations for one entity, two entities or two records
//
// The why-key handed back always agrees with the scores and disclosed
// relationships next to it: every SAME feature has a `+TYPE` token, every
// disclosed domain has a `+DOMAIN` token, and enumerated roles are complete.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::engine::ResolutionEngine;
use crate::error::{GatewayError, GatewayResult};
use crate::identifier::{
    ensure_known_sources, ensure_same_kind, EntityIdentifier, IdentifierKind, IdentifierResolver,
};
use crate::lookup::EntityLookup;
use crate::payload::{
    decode, MatchLevel, RawDisclosedRelation, RawRecordKey, RawWhyData, RawWhyResult,
    RelationKind, ScoringBucket,
};
use crate::projection::{EntityDataView, EntityProjector, ProjectionOptions};
use crate::search::{project_scores, FeatureScoreView};
use crate::Answer;

/// Attempts at a stable two-entity answer when records move between entities
pub const MAX_WHY_ATTEMPTS: usize = 3;

// ============================================================================
// DISCLOSED RELATIONSHIPS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationDirection {
    Outbound,
    Inbound,
    Bidirectional,
}

impl RelationDirection {
    pub fn from_kind(kind: RelationKind) -> Self {
        match kind {
            RelationKind::RelLink => RelationDirection::Bidirectional,
            RelationKind::RelPointer => RelationDirection::Outbound,
            RelationKind::RelAnchor => RelationDirection::Inbound,
        }
    }

    /// Combined direction of two relationships in the same domain
    pub fn and(self, other: RelationDirection) -> Self {
        if self == other {
            self
        } else {
            RelationDirection::Bidirectional
        }
    }

    pub fn is_directional(&self) -> bool {
        *self != RelationDirection::Bidirectional
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisclosedRelationshipView {
    pub domain: String,
    pub direction: RelationDirection,
    pub roles1: Vec<String>,
    pub roles2: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub relationship_keys: Vec<String>,
}

fn push_distinct(list: &mut Vec<String>, value: Option<&String>) {
    if let Some(value) = value {
        if !list.contains(value) {
            list.push(value.clone());
        }
    }
}

/// One view per domain, in domain order
pub fn group_relations(relations: &[RawDisclosedRelation]) -> Vec<DisclosedRelationshipView> {
    let mut grouped: BTreeMap<&str, DisclosedRelationshipView> = BTreeMap::new();
    for relation in relations {
        let direction = RelationDirection::from_kind(relation.ftype_code);
        let view = grouped
            .entry(relation.domain.as_str())
            .or_insert_with(|| DisclosedRelationshipView {
                domain: relation.domain.clone(),
                direction,
                roles1: Vec::new(),
                roles2: Vec::new(),
                relationship_keys: Vec::new(),
            });
        view.direction = view.direction.and(direction);
        push_distinct(&mut view.roles1, relation.role1.as_ref());
        push_distinct(&mut view.roles2, relation.role2.as_ref());
        push_distinct(&mut view.relationship_keys, relation.rel_key.as_ref());
    }
    grouped.into_values().collect()
}

// ============================================================================
// WHY KEY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct WhyToken {
    sign: char,
    name: String,
    roles: Option<(Vec<String>, Vec<String>)>,
}

impl WhyToken {
    fn new(sign: char, name: &str) -> Self {
        Self {
            sign,
            name: name.to_string(),
            roles: None,
        }
    }
}

fn parse_roles(text: &str) -> (Vec<String>, Vec<String>) {
    let split = |part: &str| -> Vec<String> {
        part.split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect()
    };
    match text.split_once(':') {
        Some((roles1, roles2)) => (split(roles1), split(roles2)),
        None => (split(text), Vec::new()),
    }
}

fn add_roles(target: &mut Vec<String>, roles: &[String]) {
    for role in roles {
        if !target.contains(role) {
            target.push(role.clone());
        }
    }
}

/// Token form of a why-key such as `+NAME+DOB-ADDRESS+EMPLOYER(EMPLOYEE:EMPLOYER)`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WhyKey {
    tokens: Vec<WhyToken>,
}

impl WhyKey {
    pub fn parse(text: &str) -> Self {
        let mut tokens = Vec::new();
        let mut current: Option<WhyToken> = None;
        let mut roles_text: Option<String> = None;

        for c in text.trim().chars() {
            if let Some(roles) = roles_text.as_mut() {
                if c == ')' {
                    if let Some(token) = current.as_mut() {
                        token.roles = Some(parse_roles(roles));
                    }
                    roles_text = None;
                } else {
                    roles.push(c);
                }
                continue;
            }
            match c {
                '+' | '-' => {
                    tokens.extend(current.take());
                    current = Some(WhyToken::new(c, ""));
                }
                '(' => roles_text = Some(String::new()),
                c if c.is_whitespace() => {}
                c => current.get_or_insert_with(|| WhyToken::new('+', "")).name.push(c),
            }
        }
        tokens.extend(current);
        tokens.retain(|t| !t.name.is_empty());
        Self { tokens }
    }

    pub fn contains(&self, sign: char, name: &str) -> bool {
        self.tokens.iter().any(|t| t.sign == sign && t.name == name)
    }

    /// Roles enumerated for a token, if any
    pub fn roles(&self, name: &str) -> Option<(&[String], &[String])> {
        self.tokens
            .iter()
            .find(|t| t.name == name)
            .and_then(|t| t.roles.as_ref())
            .map(|(r1, r2)| (r1.as_slice(), r2.as_slice()))
    }

    /// The feature agreed: `+TYPE`, replacing a `-TYPE` if present
    pub fn ensure_agreement(&mut self, name: &str) {
        match self.tokens.iter_mut().find(|t| t.name == name) {
            Some(token) => token.sign = '+',
            None => self.tokens.push(WhyToken::new('+', name)),
        }
    }

    /// A disclosed relationship: `+DOMAIN`, with complete roles when roles
    /// are enumerated or the relationship is directional
    pub fn ensure_relationship(&mut self, relationship: &DisclosedRelationshipView) {
        let token = match self.tokens.iter().position(|t| t.name == relationship.domain) {
            Some(index) => &mut self.tokens[index],
            None => {
                self.tokens.push(WhyToken::new('+', &relationship.domain));
                let last = self.tokens.len() - 1;
                &mut self.tokens[last]
            }
        };
        token.sign = '+';

        let has_roles = !relationship.roles1.is_empty() || !relationship.roles2.is_empty();
        if token.roles.is_none() && relationship.direction.is_directional() && has_roles {
            token.roles = Some((Vec::new(), Vec::new()));
        }
        if let Some((roles1, roles2)) = token.roles.as_mut() {
            add_roles(roles1, &relationship.roles1);
            add_roles(roles2, &relationship.roles2);
        }
    }

    /// Bring the key in line with the scores and relationships reported with it
    pub fn reconcile(
        text: &str,
        feature_scores: &BTreeMap<String, Vec<FeatureScoreView>>,
        relationships: &[DisclosedRelationshipView],
    ) -> String {
        let mut key = WhyKey::parse(text);
        for (feature_type, scores) in feature_scores {
            if scores.iter().any(|s| s.scoring_bucket == ScoringBucket::Same) {
                key.ensure_agreement(feature_type);
            }
        }
        for relationship in relationships {
            key.ensure_relationship(relationship);
        }
        let rendered = key.render();
        if rendered != text {
            debug!(engine_key = %text, why_key = %rendered, "adjusted why key");
        }
        rendered
    }

    pub fn render(&self) -> String {
        let mut text = String::new();
        for token in &self.tokens {
            text.push(token.sign);
            text.push_str(&token.name);
            if let Some((roles1, roles2)) = &token.roles {
                text.push_str(&format!("({}:{})", roles1.join(","), roles2.join(",")));
            }
        }
        text
    }
}

// ============================================================================
// VIEWS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordKeyView {
    pub data_source: String,
    pub record_id: String,
}

impl From<&RawRecordKey> for RecordKeyView {
    fn from(key: &RawRecordKey) -> Self {
        Self {
            data_source: key.data_source.clone(),
            record_id: key.record_id.clone(),
        }
    }
}

/// One side of a comparison: an entity and the records it was judged on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhyPerspective {
    pub entity_id: i64,
    pub focus_records: Vec<RecordKeyView>,
}

impl WhyPerspective {
    fn contains(&self, data_source: &str, record_id: &str) -> bool {
        self.focus_records
            .iter()
            .any(|r| r.data_source == data_source && r.record_id == record_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhyMatchInfoView {
    pub why_key: String,
    pub match_level: MatchLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_rule: Option<String>,
    pub feature_scores: BTreeMap<String, Vec<FeatureScoreView>>,
    pub disclosed_relationships: Vec<DisclosedRelationshipView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhyResultView {
    pub perspective: WhyPerspective,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_perspective: Option<WhyPerspective>,
    pub match_info: WhyMatchInfoView,
}

impl WhyResultView {
    fn from_raw(raw: &RawWhyResult) -> Self {
        let info = &raw.match_info;
        let feature_scores = project_scores(&info.feature_scores);
        let disclosed_relationships = group_relations(&info.disclosed_relations);
        let why_key = WhyKey::reconcile(&info.why_key, &feature_scores, &disclosed_relationships);

        Self {
            perspective: WhyPerspective {
                entity_id: raw.entity_id,
                focus_records: raw.focus_records.iter().map(RecordKeyView::from).collect(),
            },
            other_perspective: raw.entity_id_2.map(|entity_id| WhyPerspective {
                entity_id,
                focus_records: raw.focus_records_2.iter().map(RecordKeyView::from).collect(),
            }),
            match_info: WhyMatchInfoView {
                why_key,
                match_level: info.match_level_code,
                resolution_rule: info.why_errule_code.clone(),
                feature_scores,
                disclosed_relationships,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhyData {
    pub why_results: Vec<WhyResultView>,
    pub entities: Vec<EntityDataView>,
}

// ============================================================================
// ANALYZER
// ============================================================================

pub struct WhyAnalyzer<'e> {
    engine: &'e dyn ResolutionEngine,
}

impl<'e> WhyAnalyzer<'e> {
    pub fn new(engine: &'e dyn ResolutionEngine) -> Self {
        Self { engine }
    }

    /// One result per constituent record of the entity
    pub fn why_entity(
        &self,
        identifier: &EntityIdentifier,
        options: ProjectionOptions,
    ) -> GatewayResult<Answer<WhyData>> {
        ensure_known_sources(self.engine, identifier.data_source(), "entity identifier")?;
        let entity_id = IdentifierResolver::new(self.engine).resolve(identifier)?;
        debug!(entity_id, "why entity");

        let raw = self.engine.why_entity(entity_id, options.engine_flags())?;
        let payload: RawWhyData = decode(raw.clone(), "why")?;
        if payload.why_results.is_empty() {
            return Err(GatewayError::MalformedPayload(format!(
                "why payload for entity {} has no results",
                entity_id
            )));
        }

        self.answer(&payload, &[entity_id], options, raw)
    }

    /// Exactly one result comparing the two entities
    pub fn why_entities(
        &self,
        first: &EntityIdentifier,
        second: &EntityIdentifier,
        options: ProjectionOptions,
    ) -> GatewayResult<Answer<WhyData>> {
        ensure_same_kind(first, second, "compared entities")?;
        ensure_known_sources(
            self.engine,
            first.data_source().into_iter().chain(second.data_source()),
            "entity identifier",
        )?;

        let resolver = IdentifierResolver::new(self.engine);
        let by_record = first.kind() == IdentifierKind::Record;
        let flags = options.engine_flags();

        let mut attempt = 0;
        let (entity_id1, entity_id2, raw) = loop {
            attempt += 1;
            let entity_id1 = resolver.resolve(first)?;
            let entity_id2 = resolver.resolve(second)?;
            if entity_id1 == entity_id2 {
                return Err(GatewayError::invalid(format!(
                    "cannot compare entity {} with itself",
                    entity_id1
                )));
            }
            debug!(entity_id1, entity_id2, attempt, "why entities");
            let raw = self.engine.why_entities(entity_id1, entity_id2, flags)?;

            if !by_record {
                break (entity_id1, entity_id2, raw);
            }
            let moved = resolver.resolve(first)? != entity_id1
                || resolver.resolve(second)? != entity_id2;
            if !moved {
                break (entity_id1, entity_id2, raw);
            }
            if attempt >= MAX_WHY_ATTEMPTS {
                warn!(
                    entity_id1,
                    entity_id2,
                    attempt,
                    "records kept moving, answering with last comparison"
                );
                break (entity_id1, entity_id2, raw);
            }
        };

        let payload: RawWhyData = decode(raw.clone(), "why")?;
        let result = single_result(&payload)?;
        if result.entity_id != entity_id1 || result.entity_id_2 != Some(entity_id2) {
            return Err(GatewayError::MalformedPayload(format!(
                "why payload compares {} and {:?}, expected {} and {}",
                result.entity_id, result.entity_id_2, entity_id1, entity_id2
            )));
        }

        self.answer(&payload, &[entity_id1, entity_id2], options, raw)
    }

    /// Exactly one result comparing the two records
    pub fn why_records(
        &self,
        first: (&str, &str),
        second: (&str, &str),
        options: ProjectionOptions,
    ) -> GatewayResult<Answer<WhyData>> {
        let first = EntityIdentifier::record(first.0, first.1);
        let second = EntityIdentifier::record(second.0, second.1);
        ensure_known_sources(
            self.engine,
            first.data_source().into_iter().chain(second.data_source()),
            "record identifier",
        )?;
        let (ds1, rid1) = record_parts(&first);
        let (ds2, rid2) = record_parts(&second);
        debug!(ds1, rid1, ds2, rid2, "why records");

        let raw = self
            .engine
            .why_records(ds1, rid1, ds2, rid2, options.engine_flags())?;
        let payload: RawWhyData = decode(raw.clone(), "why")?;
        let result = single_result(&payload)?;

        let view = WhyResultView::from_raw(result);
        let second_side = view.other_perspective.as_ref();
        if !view.perspective.contains(ds1, rid1)
            || !second_side.map_or(false, |p| p.contains(ds2, rid2))
        {
            return Err(GatewayError::MalformedPayload(format!(
                "why payload focus records do not include {} and {}",
                first, second
            )));
        }

        let mut entity_ids = vec![result.entity_id];
        if let Some(entity_id2) = result.entity_id_2.filter(|id| *id != result.entity_id) {
            entity_ids.push(entity_id2);
        }
        self.answer(&payload, &entity_ids, options, raw)
    }

    fn answer(
        &self,
        payload: &RawWhyData,
        entity_ids: &[i64],
        options: ProjectionOptions,
        raw: serde_json::Value,
    ) -> GatewayResult<Answer<WhyData>> {
        let projector = EntityProjector::new(options);
        let entities = EntityLookup::new(self.engine)
            .gather(&payload.entities, entity_ids, options.engine_flags())?
            .iter()
            .map(|entity| projector.project(entity))
            .collect();

        Ok(Answer {
            data: WhyData {
                why_results: payload.why_results.iter().map(WhyResultView::from_raw).collect(),
                entities,
            },
            raw,
        })
    }
}

fn record_parts(identifier: &EntityIdentifier) -> (&str, &str) {
    match identifier {
        EntityIdentifier::DataSourceRecordId {
            data_source,
            record_id,
        } => (data_source, record_id),
        EntityIdentifier::EntityId(_) => ("", ""),
    }
}

fn single_result(payload: &RawWhyData) -> GatewayResult<&RawWhyResult> {
    match payload.why_results.as_slice() {
        [result] => Ok(result),
        results => Err(GatewayError::MalformedPayload(format!(
            "expected exactly one why result, got {}",
            results.len()
        ))),
    }
}

// ============================================================================
// TESTS
// ============================================================================
