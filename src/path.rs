// 🧭 Path Finder - bounded paths between two entities
//
// Identifiers are resolved before the engine is asked for anything. The
// engine's answer is checked against the request (degree bound, simple path,
// forbidden entities) and an answer that breaks the request becomes "no path".

use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::engine::{PathRequest, ResolutionEngine};
use crate::error::{GatewayError, GatewayResult};
use crate::identifier::{
    ensure_known_sources, ensure_same_kind, EntityIdentifier, EntityIdentifiers,
    IdentifierResolver,
};
use crate::lookup::EntityLookup;
use crate::payload::{decode, RawEntityPath, RawPathData};
use crate::projection::{EntityDataView, EntityProjector, ProjectionOptions};
use crate::Answer;

pub const DEFAULT_MAX_DEGREES: u32 = 3;

/// Ordered entity ids from start to end. No ids means no path was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityPath {
    pub start_entity_id: i64,
    pub end_entity_id: i64,
    pub entity_ids: Vec<i64>,
}

impl EntityPath {
    pub fn empty(start_entity_id: i64, end_entity_id: i64) -> Self {
        Self {
            start_entity_id,
            end_entity_id,
            entity_ids: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entity_ids.is_empty()
    }

    /// Degrees of separation, `None` when there is no path
    pub fn length(&self) -> Option<usize> {
        self.entity_ids.len().checked_sub(1)
    }

    /// The engine path between these endpoints (either orientation), with
    /// ids ordered from `start` to `end`
    pub(crate) fn select(paths: &[RawEntityPath], start: i64, end: i64) -> Self {
        let entity_ids = paths
            .iter()
            .find_map(|p| {
                if p.start_entity_id == start && p.end_entity_id == end {
                    Some(p.entities.clone())
                } else if p.start_entity_id == end && p.end_entity_id == start {
                    Some(p.entities.iter().rev().copied().collect())
                } else {
                    None
                }
            })
            .unwrap_or_default();
        Self {
            start_entity_id: start,
            end_entity_id: end,
            entity_ids,
        }
    }

    /// Why this path cannot answer a request bounded by `max_degrees` that
    /// forbids `forbidden`, if it cannot
    pub(crate) fn violation(&self, max_degrees: u32, forbidden: &[i64]) -> Option<String> {
        let ids = &self.entity_ids;
        let (first, last) = match (ids.first(), ids.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return None,
        };
        if first != self.start_entity_id || last != self.end_entity_id {
            return Some(format!("path runs {} to {}", first, last));
        }
        if ids.len() - 1 > max_degrees as usize {
            return Some(format!("path has {} degrees", ids.len() - 1));
        }
        let mut seen = HashSet::new();
        if let Some(repeat) = ids.iter().find(|id| !seen.insert(**id)) {
            return Some(format!("entity {} repeats", repeat));
        }
        if let Some(bad) = ids.iter().find(|id| forbidden.contains(id)) {
            return Some(format!("forbidden entity {} on path", bad));
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityPathData {
    pub entity_path: EntityPath,
    pub entities: Vec<EntityDataView>,
}

/// A path request as the caller phrased it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathQuery {
    pub from: EntityIdentifier,
    pub to: EntityIdentifier,
    pub max_degrees: u32,
    pub avoid: EntityIdentifiers,
    pub forbid_avoided: bool,
    pub required_sources: Vec<String>,
}

impl PathQuery {
    pub fn new(from: EntityIdentifier, to: EntityIdentifier) -> Self {
        Self {
            from,
            to,
            max_degrees: DEFAULT_MAX_DEGREES,
            avoid: EntityIdentifiers::new(),
            forbid_avoided: false,
            required_sources: Vec::new(),
        }
    }

    pub fn with_max_degrees(mut self, max_degrees: u32) -> Self {
        self.max_degrees = max_degrees;
        self
    }

    pub fn with_avoid(mut self, avoid: EntityIdentifiers) -> Self {
        self.avoid = avoid;
        self
    }

    pub fn with_forbid_avoided(mut self, forbid_avoided: bool) -> Self {
        self.forbid_avoided = forbid_avoided;
        self
    }

    pub fn with_required_sources(mut self, sources: Vec<String>) -> Self {
        self.required_sources = sources;
        self
    }
}

pub struct PathFinder<'e> {
    engine: &'e dyn ResolutionEngine,
}

impl<'e> PathFinder<'e> {
    pub fn new(engine: &'e dyn ResolutionEngine) -> Self {
        Self { engine }
    }

    pub fn find_path(
        &self,
        query: &PathQuery,
        options: ProjectionOptions,
    ) -> GatewayResult<Answer<EntityPathData>> {
        if query.max_degrees < 1 {
            return Err(GatewayError::invalid(format!(
                "maxDegrees must be at least 1: {}",
                query.max_degrees
            )));
        }
        ensure_same_kind(&query.from, &query.to, "from and to")?;
        query.avoid.ensure_homogeneous("avoidEntities")?;
        ensure_known_sources(
            self.engine,
            query.required_sources.iter().map(String::as_str),
            "requiredSources",
        )?;
        ensure_known_sources(
            self.engine,
            [&query.from, &query.to]
                .into_iter()
                .chain(query.avoid.iter())
                .filter_map(EntityIdentifier::data_source),
            "entity identifier",
        )?;

        let resolver = IdentifierResolver::new(self.engine);
        let from = resolver.resolve(&query.from)?;
        let to = resolver.resolve(&query.to)?;
        let avoid = resolver.resolve_all(&query.avoid)?;
        let forbid_avoided = query.forbid_avoided && !avoid.is_empty();
        if forbid_avoided {
            if let Some(endpoint) = [from, to].into_iter().find(|id| avoid.contains(id)) {
                return Err(GatewayError::invalid(format!(
                    "entity {} cannot be both a path endpoint and forbidden",
                    endpoint
                )));
            }
        }

        let flags = options.engine_flags();
        let projector = EntityProjector::new(options);
        let lookup = EntityLookup::new(self.engine);

        if from == to {
            let raw = self.engine.get_entity_by_entity_id(from, flags)?;
            let entity = decode(raw.clone(), "entity")?;
            return Ok(Answer {
                data: EntityPathData {
                    entity_path: EntityPath {
                        start_entity_id: from,
                        end_entity_id: to,
                        entity_ids: vec![from],
                    },
                    entities: vec![projector.project(&entity)],
                },
                raw,
            });
        }

        let request = PathRequest {
            from,
            to,
            max_degrees: query.max_degrees,
            avoid,
            forbid_avoided,
            required_sources: query.required_sources.clone(),
        };
        debug!(from, to, max_degrees = request.max_degrees, forbid_avoided, "finding path");

        let raw = self.engine.find_path(&request, flags)?;
        let payload: RawPathData = decode(raw.clone(), "path")?;

        let mut entity_path = EntityPath::select(&payload.entity_paths, from, to);
        let forbidden: &[i64] = if forbid_avoided { &request.avoid } else { &[] };
        if let Some(problem) = entity_path.violation(request.max_degrees, forbidden) {
            warn!(from, to, problem = %problem, "discarding engine path");
            entity_path = EntityPath::empty(from, to);
        }

        let wanted = if entity_path.is_empty() {
            vec![from, to]
        } else {
            entity_path.entity_ids.clone()
        };
        let entities = lookup
            .gather(&payload.entities, &wanted, flags)?
            .iter()
            .map(|entity| projector.project(entity))
            .collect();

        Ok(Answer {
            data: EntityPathData {
                entity_path,
                entities,
            },
            raw,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
