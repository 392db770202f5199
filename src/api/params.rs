// Query parameter access for the REST handlers
//
// Parameters are kept as an ordered list of pairs because several of them
// may repeat (`x`, `s`, `e`, `attr`, `includeOnly`).

use crate::error::{GatewayError, GatewayResult};
use crate::identifier::{EntityIdentifier, EntityIdentifiers};
use crate::projection::{DetailLevel, FeatureMode, ProjectionOptions, RelationshipMode};

#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }

    /// Last value given for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Every value given for `name`, in order
    pub fn all(&self, name: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    pub fn required(&self, name: &str) -> GatewayResult<&str> {
        self.get(name)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| GatewayError::invalid(format!("missing required parameter: {}", name)))
    }

    pub fn flag(&self, name: &str, default: bool) -> GatewayResult<bool> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => match value.trim().to_lowercase().as_str() {
                "" | "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                other => Err(GatewayError::invalid(format!(
                    "{} must be true or false: {}",
                    name, other
                ))),
            },
        }
    }

    pub fn number(&self, name: &str, default: u32) -> GatewayResult<u32> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value.trim().parse::<u32>().map_err(|_| {
                GatewayError::invalid(format!("{} must be a non-negative integer: {}", name, value))
            }),
        }
    }

    pub fn with_raw(&self) -> GatewayResult<bool> {
        self.flag("withRaw", false)
    }

    pub fn identifier(&self, name: &str) -> GatewayResult<EntityIdentifier> {
        EntityIdentifier::parse(self.required(name)?)
    }

    /// Identifiers from a repeated single-id parameter plus a combined-list
    /// parameter, merged into one set
    pub fn identifiers(&self, single: &str, list: &str) -> GatewayResult<EntityIdentifiers> {
        let mut identifiers = EntityIdentifiers::new();
        for value in self.all(single) {
            identifiers.insert(EntityIdentifier::parse(value)?);
        }
        for value in self.all(list) {
            identifiers.extend(EntityIdentifiers::parse(value)?);
        }
        Ok(identifiers)
    }

    /// Projection options from the common rendering parameters.
    /// `withRelated` and `withRelationships` are interchangeable.
    pub fn projection(
        &self,
        default_relationships: RelationshipMode,
    ) -> GatewayResult<ProjectionOptions> {
        let mut options = ProjectionOptions::new().with_relationship_mode(default_relationships);
        if let Some(level) = self.get("detailLevel") {
            options = options.with_detail_level(DetailLevel::parse(level)?);
        }
        if let Some(mode) = self.get("featureMode") {
            options = options.with_feature_mode(FeatureMode::parse(mode)?);
        }
        let relationships = self.get("withRelated").or_else(|| self.get("withRelationships"));
        if let Some(mode) = relationships {
            options = options.with_relationship_mode(RelationshipMode::parse(mode)?);
        }

        Ok(options
            .with_force_minimal(self.flag("forceMinimal", false)?)
            .with_feature_stats(self.flag("withFeatureStats", false)?)
            .with_internal_features(self.flag("withInternalFeatures", false)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_params(pairs: &[(&str, &str)]) -> QueryParams {
        QueryParams::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_projection_defaults() {
        let options = create_test_params(&[])
            .projection(RelationshipMode::None)
            .unwrap();

        assert_eq!(
            options,
            ProjectionOptions::new().with_relationship_mode(RelationshipMode::None)
        );
    }

    #[test]
    fn test_projection_parameters() {
        let params = create_test_params(&[
            ("detailLevel", "summary"),
            ("featureMode", "REPRESENTATIVE"),
            ("withRelationships", "true"),
            ("forceMinimal", "false"),
            ("withFeatureStats", "true"),
        ]);
        let options = params.projection(RelationshipMode::None).unwrap();

        assert_eq!(options.detail_level, DetailLevel::Summary);
        assert_eq!(options.feature_mode, FeatureMode::Representative);
        assert_eq!(options.relationship_mode, RelationshipMode::Partial);
        assert!(options.with_feature_stats);
        assert!(!options.force_minimal);
    }

    #[test]
    fn test_bad_values_are_invalid() {
        let params = create_test_params(&[("maxDegrees", "-1"), ("withRaw", "maybe")]);

        assert!(matches!(params.number("maxDegrees", 3), Err(GatewayError::InvalidArgument(_))));
        assert!(matches!(params.with_raw(), Err(GatewayError::InvalidArgument(_))));
        assert!(params.required("from").is_err());
    }

    #[test]
    fn test_single_and_list_identifiers_merge() {
        let params = create_test_params(&[("x", "2"), ("avoidEntities", "7,2"), ("x", "9")]);
        let identifiers = params.identifiers("x", "avoidEntities").unwrap();

        let ids: Vec<String> = identifiers.iter().map(|i| i.to_string()).collect();
        assert_eq!(ids, vec!["2", "9", "7"]);
    }
}
