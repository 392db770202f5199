// 🎨 Entity Projection - shaping raw engine entities into response views
//
// One immutable ProjectionOptions value decides how much of an entity gets
// rendered. The projector is a pure function of (raw entity, options), so the
// same request always renders the same view whichever surface asked for it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::engine::EngineFlags;
use crate::error::{GatewayError, GatewayResult};
use crate::payload::{
    MatchLevel, RawEntityData, RawFeature, RawFeatureStats, RawRecord, RawRecordSummary,
    RawRelatedEntity, RawResolvedEntity,
};

/// Feature types ending with this suffix exist only to support matching
pub const INTERNAL_FEATURE_SUFFIX: &str = "_KEY";

pub fn is_internal_feature(feature_type: &str) -> bool {
    feature_type.ends_with(INTERNAL_FEATURE_SUFFIX)
}

// ============================================================================
// OPTIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetailLevel {
    Minimal,
    Brief,
    Summary,
    Verbose,
}

impl DetailLevel {
    pub fn parse(text: &str) -> GatewayResult<Self> {
        match text.trim().to_uppercase().as_str() {
            "MINIMAL" => Ok(DetailLevel::Minimal),
            "BRIEF" => Ok(DetailLevel::Brief),
            "SUMMARY" => Ok(DetailLevel::Summary),
            "VERBOSE" => Ok(DetailLevel::Verbose),
            other => Err(GatewayError::invalid(format!(
                "detailLevel must be one of MINIMAL, BRIEF, SUMMARY, VERBOSE: {}",
                other
            ))),
        }
    }

    fn shows_name(self) -> bool {
        self != DetailLevel::Minimal
    }

    fn shows_record_list(self) -> bool {
        self != DetailLevel::Summary
    }

    fn shows_last_seen(self) -> bool {
        matches!(self, DetailLevel::Summary | DetailLevel::Verbose)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureMode {
    None,
    Representative,
    WithDuplicates,
}

impl FeatureMode {
    pub fn parse(text: &str) -> GatewayResult<Self> {
        match text.trim().to_uppercase().as_str() {
            "NONE" => Ok(FeatureMode::None),
            "REPRESENTATIVE" => Ok(FeatureMode::Representative),
            "WITH_DUPLICATES" => Ok(FeatureMode::WithDuplicates),
            other => Err(GatewayError::invalid(format!(
                "featureMode must be one of NONE, REPRESENTATIVE, WITH_DUPLICATES: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipMode {
    None,
    Partial,
    Full,
}

impl RelationshipMode {
    /// Accepts the enum names, or a boolean where `true` means PARTIAL
    pub fn parse(text: &str) -> GatewayResult<Self> {
        match text.trim().to_uppercase().as_str() {
            "NONE" | "FALSE" => Ok(RelationshipMode::None),
            "PARTIAL" | "TRUE" => Ok(RelationshipMode::Partial),
            "FULL" => Ok(RelationshipMode::Full),
            other => Err(GatewayError::invalid(format!(
                "relationship mode must be NONE, PARTIAL, FULL or a boolean: {}",
                other
            ))),
        }
    }
}

/// Rendering choices for one request. Built once, then only copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProjectionOptions {
    pub detail_level: DetailLevel,
    pub feature_mode: FeatureMode,
    pub force_minimal: bool,
    pub with_feature_stats: bool,
    pub with_internal_features: bool,
    pub relationship_mode: RelationshipMode,
}

impl Default for ProjectionOptions {
    fn default() -> Self {
        Self {
            detail_level: DetailLevel::Verbose,
            feature_mode: FeatureMode::WithDuplicates,
            force_minimal: false,
            with_feature_stats: false,
            with_internal_features: false,
            relationship_mode: RelationshipMode::Partial,
        }
    }
}

impl ProjectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detail_level(mut self, detail_level: DetailLevel) -> Self {
        self.detail_level = detail_level;
        self
    }

    pub fn with_feature_mode(mut self, feature_mode: FeatureMode) -> Self {
        self.feature_mode = feature_mode;
        self
    }

    pub fn with_force_minimal(mut self, force_minimal: bool) -> Self {
        self.force_minimal = force_minimal;
        self
    }

    pub fn with_feature_stats(mut self, with_feature_stats: bool) -> Self {
        self.with_feature_stats = with_feature_stats;
        self
    }

    pub fn with_internal_features(mut self, with_internal_features: bool) -> Self {
        self.with_internal_features = with_internal_features;
        self
    }

    pub fn with_relationship_mode(mut self, relationship_mode: RelationshipMode) -> Self {
        self.relationship_mode = relationship_mode;
        self
    }

    /// Engine flags asking for exactly what this projection will render
    pub fn engine_flags(&self) -> EngineFlags {
        let mut flags = EngineFlags::NONE;
        if self.detail_level.shows_record_list() {
            flags = flags | EngineFlags::INCLUDE_RECORDS;
        }
        if self.force_minimal {
            if self.relationship_mode != RelationshipMode::None {
                flags = flags | EngineFlags::INCLUDE_RELATED;
            }
            return flags;
        }

        if self.feature_mode != FeatureMode::None {
            flags = flags | EngineFlags::INCLUDE_FEATURES;
            if self.with_feature_stats {
                flags = flags | EngineFlags::INCLUDE_FEATURE_STATS;
            }
            if self.with_internal_features {
                flags = flags | EngineFlags::INCLUDE_INTERNAL_FEATURES;
            }
        }
        if self.detail_level == DetailLevel::Verbose {
            flags = flags | EngineFlags::INCLUDE_RECORD_DATA;
        }
        match self.relationship_mode {
            RelationshipMode::None => flags,
            RelationshipMode::Partial => flags | EngineFlags::INCLUDE_RELATED,
            RelationshipMode::Full => {
                flags | EngineFlags::INCLUDE_RELATED | EngineFlags::INCLUDE_RELATED_DETAILS
            }
        }
    }
}

// ============================================================================
// VIEWS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummaryView {
    pub data_source: String,
    pub record_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordView {
    pub data_source: String,
    pub record_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureStatsView {
    pub entity_count: u64,
    pub candidate_cap_reached: bool,
    pub scoring_cap_reached: bool,
    pub suppressed: bool,
}

impl From<&RawFeatureStats> for FeatureStatsView {
    fn from(stats: &RawFeatureStats) -> Self {
        Self {
            entity_count: stats.entity_count,
            candidate_cap_reached: stats.candidate_cap_reached,
            scoring_cap_reached: stats.scoring_cap_reached,
            suppressed: stats.suppressed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureDetailView {
    pub internal_id: i64,
    pub feature_value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<FeatureStatsView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureView {
    pub primary_id: i64,
    pub primary_value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_values: Option<Vec<String>>,
    pub feature_details: Vec<FeatureDetailView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityView {
    pub entity_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub record_summaries: Vec<RecordSummaryView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<RecordView>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub features: BTreeMap<String, Vec<FeatureView>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub name_data: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub address_data: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub phone_data: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub characteristic_data: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub identifier_data: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub relationship_data: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub other_data: Vec<String>,
    pub partial: bool,
}

impl EntityView {
    fn bare(entity_id: i64) -> Self {
        Self {
            entity_id,
            entity_name: None,
            record_summaries: Vec::new(),
            records: None,
            features: BTreeMap::new(),
            last_seen_timestamp: None,
            name_data: Vec::new(),
            address_data: Vec::new(),
            phone_data: Vec::new(),
            characteristic_data: Vec::new(),
            identifier_data: Vec::new(),
            relationship_data: Vec::new(),
            other_data: Vec::new(),
            partial: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedEntityView {
    #[serde(flatten)]
    pub entity: EntityView,
    pub match_level: MatchLevel,
    pub match_key: String,
    pub disclosed: bool,
    pub ambiguous: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDataView {
    pub resolved_entity: EntityView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_entities: Option<Vec<RelatedEntityView>>,
}

impl EntityDataView {
    pub fn entity_id(&self) -> i64 {
        self.resolved_entity.entity_id
    }
}

// ============================================================================
// PROJECTOR
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct EntityProjector {
    options: ProjectionOptions,
}

impl EntityProjector {
    pub fn new(options: ProjectionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> ProjectionOptions {
        self.options
    }

    /// Render one entity plus its related entities.
    ///
    /// Panics when the engine hands back an entity with neither records nor
    /// a record summary: that is a broken engine contract, not bad input.
    pub fn project(&self, raw: &RawEntityData) -> EntityDataView {
        let entity = &raw.resolved_entity;
        assert!(
            !entity.records.is_empty() || !entity.record_summary.is_empty(),
            "engine contract violation: entity {} has neither records nor a record summary",
            entity.entity_id
        );

        let related_entities = match self.options.relationship_mode {
            RelationshipMode::None => None,
            RelationshipMode::Partial | RelationshipMode::Full => Some(
                raw.related_entities
                    .iter()
                    .map(|related| self.project_related(related))
                    .collect(),
            ),
        };

        EntityDataView {
            resolved_entity: self.project_entity(entity),
            related_entities,
        }
    }

    fn project_entity(&self, raw: &RawResolvedEntity) -> EntityView {
        let opts = &self.options;
        let level = opts.detail_level;
        let mut view = EntityView::bare(raw.entity_id);

        if level.shows_record_list() {
            view.records = Some(raw.records.iter().map(|r| self.project_record(r)).collect());
        }
        if opts.force_minimal {
            return view;
        }

        if level.shows_name() {
            view.entity_name = raw.entity_name.clone();
            view.record_summaries = project_summaries(&raw.record_summary, level);
        }
        if level.shows_last_seen() {
            view.last_seen_timestamp = raw.last_seen_dt;
        }
        if opts.feature_mode != FeatureMode::None {
            view.features = self.project_features(&raw.features);
        }
        if level == DetailLevel::Verbose {
            for record in &raw.records {
                merge_distinct(&mut view.name_data, &record.name_data);
                merge_distinct(&mut view.address_data, &record.address_data);
                merge_distinct(&mut view.phone_data, &record.phone_data);
                merge_distinct(&mut view.characteristic_data, &record.characteristic_data);
                merge_distinct(&mut view.identifier_data, &record.identifier_data);
                merge_distinct(&mut view.relationship_data, &record.relationship_data);
                merge_distinct(&mut view.other_data, &record.other_data);
            }
        }
        view.partial = opts.feature_mode == FeatureMode::None;
        view
    }

    fn project_related(&self, raw: &RawRelatedEntity) -> RelatedEntityView {
        let full = self.options.relationship_mode == RelationshipMode::Full
            && !self.options.force_minimal;

        let entity = if full {
            self.project_entity(&raw.entity)
        } else {
            let mut view = EntityView::bare(raw.entity.entity_id);
            if !self.options.force_minimal && self.options.detail_level.shows_name() {
                view.entity_name = raw.entity.entity_name.clone();
                view.record_summaries =
                    project_summaries(&raw.entity.record_summary, self.options.detail_level);
            }
            view
        };

        RelatedEntityView {
            entity,
            match_level: raw.match_level_code,
            match_key: raw.match_key.clone(),
            disclosed: raw.is_disclosed,
            ambiguous: raw.is_ambiguous,
        }
    }

    fn project_record(&self, raw: &RawRecord) -> RecordView {
        let verbose =
            self.options.detail_level == DetailLevel::Verbose && !self.options.force_minimal;
        RecordView {
            data_source: raw.data_source.clone(),
            record_id: raw.record_id.clone(),
            last_seen_timestamp: if verbose { raw.last_seen_dt } else { None },
            match_key: if verbose { raw.match_key.clone() } else { None },
        }
    }

    fn project_features(
        &self,
        features: &BTreeMap<String, Vec<RawFeature>>,
    ) -> BTreeMap<String, Vec<FeatureView>> {
        features
            .iter()
            .filter(|(feature_type, _)| {
                self.options.with_internal_features || !is_internal_feature(feature_type)
            })
            .map(|(feature_type, values)| {
                let views = values.iter().map(|f| self.project_feature(f)).collect();
                (feature_type.clone(), views)
            })
            .collect()
    }

    fn project_feature(&self, raw: &RawFeature) -> FeatureView {
        let representative = self.options.feature_mode == FeatureMode::Representative;

        let feature_details = raw
            .feat_desc_values
            .iter()
            .filter(|value| !representative || value.lib_feat_id == raw.lib_feat_id)
            .map(|value| FeatureDetailView {
                internal_id: value.lib_feat_id,
                feature_value: value.feat_desc.clone(),
                statistics: if self.options.with_feature_stats {
                    value.stats.as_ref().map(FeatureStatsView::from)
                } else {
                    None
                },
            })
            .collect();

        let duplicate_values = if representative {
            None
        } else {
            let mut duplicates: Vec<String> = Vec::new();
            for value in &raw.feat_desc_values {
                if value.feat_desc != raw.feat_desc && !duplicates.contains(&value.feat_desc) {
                    duplicates.push(value.feat_desc.clone());
                }
            }
            Some(duplicates)
        };

        FeatureView {
            primary_id: raw.lib_feat_id,
            primary_value: raw.feat_desc.clone(),
            usage_type: raw.usage_type.clone(),
            duplicate_values,
            feature_details,
        }
    }
}

fn project_summaries(summaries: &[RawRecordSummary], level: DetailLevel) -> Vec<RecordSummaryView> {
    summaries
        .iter()
        .map(|summary| RecordSummaryView {
            data_source: summary.data_source.clone(),
            record_count: summary.record_count,
            last_seen_timestamp: if level.shows_last_seen() {
                summary.last_seen_dt
            } else {
                None
            },
        })
        .collect()
}

fn merge_distinct(target: &mut Vec<String>, values: &[String]) {
    for value in values {
        if !target.contains(value) {
            target.push(value.clone());
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{RawFeatureValue, RawRecordSummary};
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn create_test_feature(id: i64, primary: &str, duplicates: &[&str]) -> RawFeature {
        let mut values = vec![RawFeatureValue {
            lib_feat_id: id,
            feat_desc: primary.to_string(),
            stats: Some(RawFeatureStats {
                entity_count: 1,
                candidate_cap_reached: false,
                scoring_cap_reached: false,
                suppressed: false,
            }),
        }];
        for (offset, duplicate) in duplicates.iter().enumerate() {
            values.push(RawFeatureValue {
                lib_feat_id: id + 1 + offset as i64,
                feat_desc: duplicate.to_string(),
                stats: None,
            });
        }
        RawFeature {
            lib_feat_id: id,
            feat_desc: primary.to_string(),
            usage_type: None,
            feat_desc_values: values,
        }
    }

    fn create_test_entity() -> RawEntityData {
        let seen = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut features = BTreeMap::new();
        features.insert(
            "NAME".to_string(),
            vec![create_test_feature(10, "Joe Schmoe", &["JOE SCHMOE"])],
        );
        features.insert(
            "NAME_KEY".to_string(),
            vec![create_test_feature(20, "joe schmoe", &[])],
        );
        features.insert(
            "PHONE".to_string(),
            vec![create_test_feature(30, "702-555-1212", &[])],
        );

        let record = |rid: &str, name: &str| RawRecord {
            data_source: "CUSTOMERS".to_string(),
            record_id: rid.to_string(),
            last_seen_dt: Some(seen),
            match_key: Some("+NAME".to_string()),
            name_data: vec![format!("PRIMARY: {}", name)],
            phone_data: vec!["702-555-1212".to_string()],
            other_data: vec!["VIP: yes".to_string()],
            ..RawRecord::default()
        };

        RawEntityData {
            resolved_entity: RawResolvedEntity {
                entity_id: 1,
                entity_name: Some("Joe Schmoe".to_string()),
                features,
                record_summary: vec![RawRecordSummary {
                    data_source: "CUSTOMERS".to_string(),
                    record_count: 2,
                    last_seen_dt: Some(seen),
                }],
                records: vec![record("1001", "Joe Schmoe"), record("1002", "JOE SCHMOE")],
                last_seen_dt: Some(seen),
            },
            related_entities: vec![RawRelatedEntity {
                entity: RawResolvedEntity {
                    entity_id: 2,
                    entity_name: Some("Joann Smith".to_string()),
                    record_summary: vec![RawRecordSummary {
                        data_source: "WATCHLIST".to_string(),
                        record_count: 1,
                        last_seen_dt: None,
                    }],
                    records: vec![RawRecord {
                        data_source: "WATCHLIST".to_string(),
                        record_id: "2001".to_string(),
                        ..RawRecord::default()
                    }],
                    ..RawResolvedEntity::default()
                },
                match_level_code: MatchLevel::PossiblyRelated,
                match_key: "+PHONE".to_string(),
                is_disclosed: false,
                is_ambiguous: false,
            }],
        }
    }

    #[test]
    fn test_default_projection_is_verbose_with_duplicates() {
        let view =
            EntityProjector::new(ProjectionOptions::default()).project(&create_test_entity());
        let entity = &view.resolved_entity;

        assert_eq!(entity.entity_name.as_deref(), Some("Joe Schmoe"));
        assert_eq!(entity.records.as_ref().map(Vec::len), Some(2));
        assert_eq!(entity.other_data, vec!["VIP: yes".to_string()]);
        assert!(!entity.features.contains_key("NAME_KEY"));
        assert_eq!(
            entity.features["NAME"][0].duplicate_values,
            Some(vec!["JOE SCHMOE".to_string()])
        );
        assert!(entity.features["NAME"][0].feature_details[0].statistics.is_none());
        assert!(!entity.partial);

        let related = view.related_entities.unwrap();
        assert_eq!(related.len(), 1);
        assert!(related[0].entity.partial);
        assert!(related[0].entity.records.is_none());
    }

    #[test]
    fn test_representative_mode_drops_duplicates() {
        let options = ProjectionOptions::new().with_feature_mode(FeatureMode::Representative);
        let view = EntityProjector::new(options).project(&create_test_entity());
        let name = &view.resolved_entity.features["NAME"][0];

        assert_eq!(name.duplicate_values, None);
        assert_eq!(name.feature_details.len(), 1);
        assert_eq!(name.feature_details[0].feature_value, "Joe Schmoe");
    }

    #[test]
    fn test_internal_features_and_stats_on_request() {
        let options = ProjectionOptions::new()
            .with_internal_features(true)
            .with_feature_stats(true);
        let view = EntityProjector::new(options).project(&create_test_entity());
        let features = &view.resolved_entity.features;

        assert!(features.contains_key("NAME_KEY"));
        assert!(features.contains_key("NAME"));
        assert_eq!(
            features["NAME"][0].feature_details[0].statistics.map(|s| s.entity_count),
            Some(1)
        );
    }

    #[test]
    fn test_summary_level_has_no_record_list() {
        let options = ProjectionOptions::new().with_detail_level(DetailLevel::Summary);
        let entity = EntityProjector::new(options)
            .project(&create_test_entity())
            .resolved_entity;

        assert!(entity.records.is_none());
        assert_eq!(entity.record_summaries[0].record_count, 2);
        assert!(entity.last_seen_timestamp.is_some());
        assert!(entity.other_data.is_empty());
    }

    #[test]
    fn test_force_minimal_keeps_only_ids_and_records() {
        let options = ProjectionOptions::new()
            .with_force_minimal(true)
            .with_relationship_mode(RelationshipMode::Full);
        let view = EntityProjector::new(options).project(&create_test_entity());

        let entity = &view.resolved_entity;
        assert!(entity.features.is_empty());
        assert!(entity.record_summaries.is_empty());
        assert!(entity.entity_name.is_none());
        assert_eq!(entity.records.as_ref().map(Vec::len), Some(2));
        assert!(entity.partial);

        let related = view.related_entities.unwrap();
        assert!(related[0].entity.partial);
        assert!(related[0].entity.records.is_none());
    }

    #[test]
    fn test_full_relationship_mode_renders_related_entities() {
        let options = ProjectionOptions::new().with_relationship_mode(RelationshipMode::Full);
        let related = EntityProjector::new(options)
            .project(&create_test_entity())
            .related_entities
            .unwrap();

        assert_eq!(related[0].entity.records.as_ref().map(Vec::len), Some(1));
        assert_eq!(related[0].match_level, MatchLevel::PossiblyRelated);
        assert_eq!(related[0].match_key, "+PHONE");
    }

    #[test]
    fn test_relationship_mode_none_omits_related() {
        let options = ProjectionOptions::new().with_relationship_mode(RelationshipMode::None);
        let view = EntityProjector::new(options).project(&create_test_entity());
        assert!(view.related_entities.is_none());
    }

    #[test]
    #[should_panic(expected = "engine contract violation")]
    fn test_entity_without_records_panics() {
        let raw = RawEntityData {
            resolved_entity: RawResolvedEntity {
                entity_id: 9,
                ..RawResolvedEntity::default()
            },
            related_entities: Vec::new(),
        };
        EntityProjector::new(ProjectionOptions::default()).project(&raw);
    }

    #[test]
    fn test_engine_flags_follow_options() {
        let flags = ProjectionOptions::default().engine_flags();
        assert!(flags.contains(EngineFlags::INCLUDE_FEATURES));
        assert!(flags.contains(EngineFlags::INCLUDE_RELATED));
        assert!(!flags.contains(EngineFlags::INCLUDE_INTERNAL_FEATURES));

        let minimal = ProjectionOptions::new().with_force_minimal(true).engine_flags();
        assert!(!minimal.contains(EngineFlags::INCLUDE_FEATURES));
    }

    #[test]
    fn test_option_parsing() {
        assert_eq!(DetailLevel::parse("brief").unwrap(), DetailLevel::Brief);
        assert_eq!(
            FeatureMode::parse("WITH_DUPLICATES").unwrap(),
            FeatureMode::WithDuplicates
        );
        assert_eq!(RelationshipMode::parse("true").unwrap(), RelationshipMode::Partial);
        assert!(DetailLevel::parse("LOUD").is_err());
    }

    fn options_strategy() -> impl Strategy<Value = ProjectionOptions> {
        (
            prop_oneof![
                Just(DetailLevel::Minimal),
                Just(DetailLevel::Brief),
                Just(DetailLevel::Summary),
                Just(DetailLevel::Verbose),
            ],
            prop_oneof![
                Just(FeatureMode::None),
                Just(FeatureMode::Representative),
                Just(FeatureMode::WithDuplicates),
            ],
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
            prop_oneof![
                Just(RelationshipMode::None),
                Just(RelationshipMode::Partial),
                Just(RelationshipMode::Full),
            ],
        )
            .prop_map(|(level, mode, minimal, stats, internal, related)| {
                ProjectionOptions::new()
                    .with_detail_level(level)
                    .with_feature_mode(mode)
                    .with_force_minimal(minimal)
                    .with_feature_stats(stats)
                    .with_internal_features(internal)
                    .with_relationship_mode(related)
            })
    }

    proptest! {
        #[test]
        fn prop_no_features_without_feature_mode(options in options_strategy()) {
            let view = EntityProjector::new(options).project(&create_test_entity());
            let entity = &view.resolved_entity;

            if options.feature_mode == FeatureMode::None || options.force_minimal {
                prop_assert!(entity.features.is_empty());
            }
            if options.force_minimal {
                prop_assert!(entity.other_data.is_empty());
                prop_assert!(entity.record_summaries.is_empty());
            }
        }

        #[test]
        fn prop_flags_gate_their_content(options in options_strategy()) {
            let entity = EntityProjector::new(options)
                .project(&create_test_entity())
                .resolved_entity;

            if !options.with_internal_features {
                prop_assert!(entity.features.keys().all(|k| !is_internal_feature(k)));
            }
            for feature in entity.features.values().flatten() {
                if !options.with_feature_stats {
                    prop_assert!(feature.feature_details.iter().all(|d| d.statistics.is_none()));
                }
                if options.feature_mode == FeatureMode::Representative {
                    prop_assert!(feature.duplicate_values.is_none());
                }
            }
            if options.detail_level == DetailLevel::Summary {
                prop_assert!(entity.records.is_none());
            }
            if matches!(options.detail_level, DetailLevel::Minimal | DetailLevel::Brief) {
                prop_assert!(entity.last_seen_timestamp.is_none());
            }
            if options.detail_level != DetailLevel::Verbose {
                prop_assert!(entity.other_data.is_empty());
            }
        }

        #[test]
        fn prop_projection_is_deterministic(options in options_strategy()) {
            let raw = create_test_entity();
            let projector = EntityProjector::new(options);
            prop_assert_eq!(projector.project(&raw), projector.project(&raw));
        }
    }
}
