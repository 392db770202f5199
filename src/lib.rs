// Resolution Gateway - Core Library
// Query and projection layer over an entity-resolution engine: identifier
// resolution, entity projection, paths, networks, search and why-analysis.

pub mod error;
pub mod engine;         // Engine interface + local SQLite engine
pub mod payload;        // Native engine payload shapes
pub mod identifier;     // Record / entity identifiers and their resolution
pub mod projection;     // Detail level + feature mode rendering
pub mod lookup;
pub mod catalog;        // Data sources + attribute types of the active config
pub mod graph;          // Relationship graph search used by the local engine
pub mod path;
pub mod network;
pub mod search;
pub mod why;
pub mod repository;     // SQLite repository of resolved entities
pub mod pool;           // Engine worker pool + config refresh
pub mod timers;

#[cfg(feature = "server")]
pub mod api;

#[cfg(test)]
mod fixtures;

// Re-export commonly used types
pub use engine::{EngineFailure, EngineFlags, EngineHandle, LocalEngine, ResolutionEngine};
pub use error::{GatewayError, GatewayResult};
pub use identifier::{EntityIdentifier, EntityIdentifiers, IdentifierResolver};
pub use catalog::{AttributeTypeFilter, ConfigCatalog};
pub use lookup::{EntityLookup, RecordDataView};
pub use network::{EntityNetworkData, NetworkBuilder, NetworkQuery};
pub use path::{EntityPath, EntityPathData, PathFinder, PathQuery};
pub use pool::{EnginePool, RefreshOutcome};
pub use projection::{
    DetailLevel, EntityDataView, EntityProjector, FeatureMode, ProjectionOptions,
    RelationshipMode,
};
pub use search::{MatchBucket, SearchClassifier, SearchCriteria, SearchResult};
pub use timers::Timers;
pub use why::{WhyAnalyzer, WhyData, WhyKey};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version of the REST surface served by `api`
pub const REST_API_VERSION: &str = "3.0";

/// A projected answer together with the engine payload it came from.
/// The raw payload is only sent to clients that ask for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer<T> {
    pub data: T,
    pub raw: serde_json::Value,
}

impl<T> Answer<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Answer<U> {
        Answer {
            data: f(self.data),
            raw: self.raw,
        }
    }
}
