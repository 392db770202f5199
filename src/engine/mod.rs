// ⚙️ Resolution Engine - the seam between the gateway and the native engine
//
// The engine owns ingestion, resolution and scoring. Everything it hands back
// is a structured JSON payload in its own vocabulary; the gateway components
// turn those into the response shapes callers see.

pub mod local;
pub mod scoring;

pub use local::LocalEngine;

use serde_json::Value;
use std::fmt;
use std::ops::BitOr;

// ============================================================================
// RETURN CODES
// ============================================================================

pub const DATA_SOURCE_NOT_FOUND_CODE: i64 = 2207;
pub const ENTITY_NOT_FOUND_CODE: i64 = 37;
pub const RECORD_NOT_FOUND_CODE: i64 = 33;
pub const CONFIG_NOT_FOUND_CODE: i64 = 7221;
pub const REPOSITORY_FAILURE_CODE: i64 = 1001;

/// Non-zero engine return code plus the engine's own diagnostic text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFailure {
    pub code: i64,
    pub message: String,
}

impl EngineFailure {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn entity_not_found(entity_id: i64) -> Self {
        Self::new(
            ENTITY_NOT_FOUND_CODE,
            format!("Unknown resolved entity value '{}'", entity_id),
        )
    }

    pub fn record_not_found(data_source: &str, record_id: &str) -> Self {
        Self::new(
            RECORD_NOT_FOUND_CODE,
            format!("Unknown record: dsrc[{}], record[{}]", data_source, record_id),
        )
    }

    pub fn data_source_not_found(data_source: &str) -> Self {
        Self::new(
            DATA_SOURCE_NOT_FOUND_CODE,
            format!("Unknown data source: '{}'", data_source),
        )
    }
}

impl fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SENZ{:04}|{}", self.code, self.message)
    }
}

impl std::error::Error for EngineFailure {}

impl From<anyhow::Error> for EngineFailure {
    fn from(err: anyhow::Error) -> Self {
        EngineFailure::new(REPOSITORY_FAILURE_CODE, format!("{:#}", err))
    }
}

pub type EngineResult<T> = Result<T, EngineFailure>;

// ============================================================================
// FLAGS
// ============================================================================

/// Bit set telling the engine how much to put in a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EngineFlags(u64);

impl EngineFlags {
    pub const NONE: EngineFlags = EngineFlags(0);
    pub const INCLUDE_FEATURES: EngineFlags = EngineFlags(1);
    pub const INCLUDE_RECORDS: EngineFlags = EngineFlags(1 << 1);
    pub const INCLUDE_RECORD_DATA: EngineFlags = EngineFlags(1 << 2);
    pub const INCLUDE_FEATURE_STATS: EngineFlags = EngineFlags(1 << 3);
    pub const INCLUDE_INTERNAL_FEATURES: EngineFlags = EngineFlags(1 << 4);
    pub const INCLUDE_RELATED: EngineFlags = EngineFlags(1 << 5);
    pub const INCLUDE_RELATED_DETAILS: EngineFlags = EngineFlags(1 << 6);

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn contains(self, other: EngineFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for EngineFlags {
    type Output = EngineFlags;

    fn bitor(self, rhs: EngineFlags) -> EngineFlags {
        EngineFlags(self.0 | rhs.0)
    }
}

// ============================================================================
// REQUESTS
// ============================================================================

/// Path search as the engine receives it, identifiers already resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRequest {
    pub from: i64,
    pub to: i64,
    pub max_degrees: u32,
    pub avoid: Vec<i64>,
    pub forbid_avoided: bool,
    pub required_sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRequest {
    pub entity_ids: Vec<i64>,
    pub max_degrees: u32,
    pub build_out: u32,
    pub max_entities: u32,
}

// ============================================================================
// ENGINE TRAIT
// ============================================================================

/// One engine handle. Calls are blocking; the pool keeps them off the
/// async executor and never shares a handle between two calls.
pub trait ResolutionEngine: Send {
    fn resolve_record(&self, data_source: &str, record_id: &str) -> EngineResult<i64>;

    fn get_entity_by_record_id(
        &self,
        data_source: &str,
        record_id: &str,
        flags: EngineFlags,
    ) -> EngineResult<Value>;

    fn get_entity_by_entity_id(&self, entity_id: i64, flags: EngineFlags) -> EngineResult<Value>;

    /// One record with its attribute data and resolved entity id
    fn get_record(&self, data_source: &str, record_id: &str) -> EngineResult<Value>;

    fn find_path(&self, request: &PathRequest, flags: EngineFlags) -> EngineResult<Value>;

    fn find_network(&self, request: &NetworkRequest, flags: EngineFlags) -> EngineResult<Value>;

    fn search_by_attributes(&self, criteria: &Value, flags: EngineFlags) -> EngineResult<Value>;

    fn why_entity(&self, entity_id: i64, flags: EngineFlags) -> EngineResult<Value>;

    fn why_entities(&self, entity_id1: i64, entity_id2: i64, flags: EngineFlags)
        -> EngineResult<Value>;

    fn why_records(
        &self,
        data_source1: &str,
        record_id1: &str,
        data_source2: &str,
        record_id2: &str,
        flags: EngineFlags,
    ) -> EngineResult<Value>;

    /// Active configuration document
    fn export_config(&self) -> EngineResult<Value>;

    fn active_config_id(&self) -> EngineResult<i64>;

    /// Configuration the repository currently designates as default
    fn default_config_id(&self) -> EngineResult<i64>;

    fn reinitialize(&mut self, config_id: i64) -> EngineResult<()>;

    /// Data source codes registered in the active configuration
    fn data_sources(&self) -> EngineResult<Vec<String>> {
        let config = self.export_config()?;
        let sources = config
            .get("DATA_SOURCES")
            .and_then(Value::as_array)
            .map(|codes| {
                codes
                    .iter()
                    .filter_map(|code| code.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(sources)
    }
}

pub type EngineHandle = Box<dyn ResolutionEngine>;
