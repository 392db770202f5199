// 🕸️ Network Builder - pairwise paths plus build-out, under an entity budget
//
// Entity order in the answer is fixed: requested entities, then entities on
// paths (in path order), then build-out discoveries. The budget cuts from the
// tail, so paths always win over build-out and requested entities are never cut.

use serde::Serialize;
use tracing::{debug, warn};

use crate::engine::{NetworkRequest, ResolutionEngine};
use crate::error::{GatewayError, GatewayResult};
use crate::identifier::{
    ensure_known_sources, EntityIdentifier, EntityIdentifiers, IdentifierResolver,
};
use crate::lookup::EntityLookup;
use crate::path::EntityPath;
use crate::payload::{decode, RawNetworkData};
use crate::projection::{EntityDataView, EntityProjector, ProjectionOptions};
use crate::Answer;

pub const DEFAULT_NETWORK_MAX_DEGREES: u32 = 3;
pub const DEFAULT_BUILD_OUT: u32 = 1;
pub const DEFAULT_MAX_ENTITIES: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityNetworkData {
    pub entity_paths: Vec<EntityPath>,
    pub entities: Vec<EntityDataView>,
    pub max_entity_limit_reached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkQuery {
    pub entities: EntityIdentifiers,
    pub max_degrees: u32,
    pub build_out: u32,
    pub max_entities: u32,
}

impl NetworkQuery {
    pub fn new(entities: EntityIdentifiers) -> Self {
        Self {
            entities,
            max_degrees: DEFAULT_NETWORK_MAX_DEGREES,
            build_out: DEFAULT_BUILD_OUT,
            max_entities: DEFAULT_MAX_ENTITIES,
        }
    }

    pub fn with_max_degrees(mut self, max_degrees: u32) -> Self {
        self.max_degrees = max_degrees;
        self
    }

    pub fn with_build_out(mut self, build_out: u32) -> Self {
        self.build_out = build_out;
        self
    }

    pub fn with_max_entities(mut self, max_entities: u32) -> Self {
        self.max_entities = max_entities;
        self
    }
}

/// Unordered pairs in request order: (0,1), (0,2), ... (1,2), ...
fn entity_pairs(entity_ids: &[i64]) -> Vec<(i64, i64)> {
    entity_ids
        .iter()
        .enumerate()
        .flat_map(|(i, from)| entity_ids[i + 1..].iter().map(move |to| (*from, *to)))
        .collect()
}

fn push_unique(ordered: &mut Vec<i64>, entity_id: i64) {
    if !ordered.contains(&entity_id) {
        ordered.push(entity_id);
    }
}

pub struct NetworkBuilder<'e> {
    engine: &'e dyn ResolutionEngine,
}

impl<'e> NetworkBuilder<'e> {
    pub fn new(engine: &'e dyn ResolutionEngine) -> Self {
        Self { engine }
    }

    pub fn find_network(
        &self,
        query: &NetworkQuery,
        options: ProjectionOptions,
    ) -> GatewayResult<Answer<EntityNetworkData>> {
        if query.entities.is_empty() {
            return Err(GatewayError::invalid("at least one entity is required"));
        }
        if query.max_degrees < 1 {
            return Err(GatewayError::invalid(format!(
                "maxDegrees must be at least 1: {}",
                query.max_degrees
            )));
        }
        if query.max_entities < 1 {
            return Err(GatewayError::invalid(format!(
                "maxEntities must be at least 1: {}",
                query.max_entities
            )));
        }
        query.entities.ensure_homogeneous("entities")?;
        ensure_known_sources(
            self.engine,
            query.entities.iter().filter_map(EntityIdentifier::data_source),
            "entity identifier",
        )?;

        let requested = IdentifierResolver::new(self.engine).resolve_all(&query.entities)?;
        let request = NetworkRequest {
            entity_ids: requested.clone(),
            max_degrees: query.max_degrees,
            build_out: query.build_out,
            max_entities: query.max_entities,
        };
        debug!(
            entities = ?request.entity_ids,
            max_degrees = request.max_degrees,
            build_out = request.build_out,
            max_entities = request.max_entities,
            "finding network"
        );

        let flags = options.engine_flags();
        let raw = self.engine.find_network(&request, flags)?;
        let payload: RawNetworkData = decode(raw.clone(), "network")?;

        let entity_paths: Vec<EntityPath> = entity_pairs(&requested)
            .into_iter()
            .map(|(from, to)| {
                let path = EntityPath::select(&payload.entity_paths, from, to);
                match path.violation(request.max_degrees, &[]) {
                    Some(problem) => {
                        warn!(from, to, problem = %problem, "discarding engine path");
                        EntityPath::empty(from, to)
                    }
                    None => path,
                }
            })
            .collect();

        let mut ordered = requested.clone();
        for path in &entity_paths {
            for entity_id in &path.entity_ids {
                push_unique(&mut ordered, *entity_id);
            }
        }
        for entity in &payload.entities {
            push_unique(&mut ordered, entity.resolved_entity.entity_id);
        }

        let budget = (request.max_entities as usize).max(requested.len());
        let mut limit_reached = payload.max_entity_limit_reached;
        if ordered.len() > budget {
            limit_reached = true;
            ordered.truncate(budget);
        }

        let projector = EntityProjector::new(options);
        let entities = EntityLookup::new(self.engine)
            .gather(&payload.entities, &ordered, flags)?
            .iter()
            .map(|entity| projector.project(entity))
            .collect();

        Ok(Answer {
            data: EntityNetworkData {
                entity_paths,
                entities,
                max_entity_limit_reached: limit_reached,
            },
            raw,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{create_test_engine, create_test_entity_payload, ScriptedEngine};
    use proptest::prelude::*;
    use serde_json::json;

    fn create_test_query(ids: &[i64]) -> NetworkQuery {
        NetworkQuery::new(ids.iter().map(|id| EntityIdentifier::entity(*id)).collect())
    }

    fn entity_ids(data: &EntityNetworkData) -> Vec<i64> {
        data.entities.iter().map(|e| e.entity_id()).collect()
    }

    #[test]
    fn test_entity_pairs_are_stable() {
        assert_eq!(entity_pairs(&[5, 1, 3]), vec![(5, 1), (5, 3), (1, 3)]);
        assert!(entity_pairs(&[5]).is_empty());
    }

    #[test]
    fn test_single_entity_without_build_out() {
        let engine = create_test_engine();
        let query = create_test_query(&[1]).with_max_degrees(1).with_build_out(0);

        let answer = NetworkBuilder::new(&engine)
            .find_network(&query, ProjectionOptions::default())
            .unwrap();

        assert_eq!(entity_ids(&answer.data), vec![1]);
        assert!(answer.data.entity_paths.is_empty());
        assert!(!answer.data.max_entity_limit_reached);
    }

    #[test]
    fn test_single_entity_with_build_out() {
        let engine = create_test_engine();
        let query = create_test_query(&[1]).with_max_degrees(1).with_build_out(1);

        let answer = NetworkBuilder::new(&engine)
            .find_network(&query, ProjectionOptions::default())
            .unwrap();

        let mut ids = entity_ids(&answer.data);
        ids.sort();
        assert_eq!(ids, vec![1, 2, 7]);
    }

    #[test]
    fn test_one_path_per_pair() {
        let engine = create_test_engine();
        let query = create_test_query(&[1, 3, 6]).with_max_degrees(2).with_build_out(0);

        let answer = NetworkBuilder::new(&engine)
            .find_network(&query, ProjectionOptions::default())
            .unwrap();
        let paths = &answer.data.entity_paths;

        assert_eq!(paths.len(), 3);
        assert_eq!(paths[0].entity_ids, vec![1, 2, 3]);
        // 1 to 6 needs three degrees
        assert!(paths[1].is_empty());
        assert_eq!(paths[2].entity_ids, vec![3, 6]);
        assert_eq!(entity_ids(&answer.data), vec![1, 3, 6, 2]);
    }

    #[test]
    fn test_budget_keeps_requested_entities() {
        let engine = create_test_engine();
        let query = create_test_query(&[1, 6])
            .with_max_degrees(3)
            .with_build_out(1)
            .with_max_entities(1);

        let answer = NetworkBuilder::new(&engine)
            .find_network(&query, ProjectionOptions::default())
            .unwrap();

        assert_eq!(entity_ids(&answer.data), vec![1, 6]);
        assert!(answer.data.max_entity_limit_reached);
        assert_eq!(answer.data.entity_paths[0].entity_ids, vec![1, 2, 3, 6]);
    }

    #[test]
    fn test_record_identifiers_collapse_to_one_entity() {
        let engine = create_test_engine();
        let entities =
            EntityIdentifiers::parse(":CUSTOMERS:1001,:CUSTOMERS:1002").unwrap();
        let query = NetworkQuery::new(entities).with_build_out(0);

        let answer = NetworkBuilder::new(&engine)
            .find_network(&query, ProjectionOptions::default())
            .unwrap();

        assert_eq!(entity_ids(&answer.data), vec![1]);
        assert!(answer.data.entity_paths.is_empty());
    }

    #[test]
    fn test_invalid_network_requests() {
        let engine = create_test_engine();
        let builder = NetworkBuilder::new(&engine);
        let options = ProjectionOptions::default();

        let empty = NetworkQuery::new(EntityIdentifiers::new());
        assert!(matches!(
            builder.find_network(&empty, options),
            Err(GatewayError::InvalidArgument(_))
        ));

        let zero_degrees = create_test_query(&[1]).with_max_degrees(0);
        assert!(matches!(
            builder.find_network(&zero_degrees, options),
            Err(GatewayError::InvalidArgument(_))
        ));

        let mixed: EntityIdentifiers = vec![
            EntityIdentifier::entity(1),
            EntityIdentifier::record("CUSTOMERS", "1001"),
        ]
        .into_iter()
        .collect();
        assert!(matches!(
            builder.find_network(&NetworkQuery::new(mixed), options),
            Err(GatewayError::InvalidArgument(_))
        ));

        assert!(matches!(
            builder.find_network(&create_test_query(&[1, 404]), options),
            Err(GatewayError::NotFound(_))
        ));
    }

    #[test]
    fn test_missing_requested_entity_is_fetched() {
        let engine = ScriptedEngine::new(&["TEST"])
            .with_entity(1, create_test_entity_payload(1, "TEST", "R1"))
            .with_entity(2, create_test_entity_payload(2, "TEST", "R2"))
            .with_network(json!({
                "ENTITY_PATHS": [],
                "ENTITIES": [create_test_entity_payload(1, "TEST", "R1")],
                "MAX_ENTITY_LIMIT_REACHED": false
            }));

        let answer = NetworkBuilder::new(&engine)
            .find_network(&create_test_query(&[1, 2]), ProjectionOptions::default())
            .unwrap();

        assert_eq!(entity_ids(&answer.data), vec![1, 2]);
        assert_eq!(answer.data.entity_paths.len(), 1);
        assert!(answer.data.entity_paths[0].is_empty());
        assert_eq!(engine.calls("get_entity"), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_network_honors_budget_and_keeps_requested(
            requested in prop::collection::btree_set(
                prop::sample::select(vec![1i64, 2, 3, 6, 7]),
                1..4,
            ),
            max_degrees in 1u32..4,
            build_out in 0u32..3,
            max_entities in 1u32..6,
        ) {
            let engine = create_test_engine();
            let requested: Vec<i64> = requested.into_iter().collect();
            let query = create_test_query(&requested)
                .with_max_degrees(max_degrees)
                .with_build_out(build_out)
                .with_max_entities(max_entities);

            let answer = NetworkBuilder::new(&engine)
                .find_network(&query, ProjectionOptions::default())
                .unwrap();
            let ids = entity_ids(&answer.data);

            prop_assert!(ids.len() <= (max_entities as usize).max(requested.len()));
            for entity_id in &requested {
                prop_assert!(ids.contains(entity_id));
            }
            let n = requested.len();
            prop_assert_eq!(answer.data.entity_paths.len(), n * (n - 1) / 2);
        }
    }
}
