// 🧪 Test Fixtures - shared repository scenario and a scripted engine
//
// Scenario (demos/sample-repository.json):
//   A(1) has records CUSTOMERS:1001 and CUSTOMERS:1002
//   A - B(2) - C(3) - F(6), plus a second route A - G(7) - C
//   C and F disclose an EMPLOYER relationship (pointer / anchor)

use rusqlite::Connection;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use crate::engine::{
    EngineFailure, EngineFlags, EngineResult, LocalEngine, NetworkRequest, PathRequest,
    ResolutionEngine,
};
use crate::repository::{self, RepositoryFixture};

pub const SAMPLE_REPOSITORY: &str = include_str!("../demos/sample-repository.json");

pub fn create_test_fixture() -> RepositoryFixture {
    serde_json::from_str(SAMPLE_REPOSITORY).expect("sample repository fixture parses")
}

pub fn create_test_connection() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    repository::setup_database(&conn).unwrap();
    repository::import_fixture(&conn, &create_test_fixture()).unwrap();
    conn
}

pub fn create_test_engine() -> LocalEngine {
    LocalEngine::from_connection(create_test_connection()).unwrap()
}

// ============================================================================
// SCRIPTED ENGINE
// ============================================================================

/// Engine stub answering from canned payloads, for shapes the local engine
/// never produces (stale resolutions, malformed answers, ...)
#[derive(Default)]
pub struct ScriptedEngine {
    data_sources: Vec<String>,
    resolutions: Mutex<BTreeMap<(String, String), VecDeque<i64>>>,
    entities: BTreeMap<i64, Value>,
    path: Option<Value>,
    network: Option<Value>,
    search: Option<Value>,
    why: Option<Value>,
    config: Option<Value>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    pub fn new(data_sources: &[&str]) -> Self {
        Self {
            data_sources: data_sources.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Successive resolutions of the record answer these ids in turn; the
    /// last one repeats
    pub fn with_resolution(self, data_source: &str, record_id: &str, entity_ids: &[i64]) -> Self {
        self.resolutions.lock().unwrap().insert(
            (data_source.to_string(), record_id.to_string()),
            entity_ids.iter().copied().collect(),
        );
        self
    }

    pub fn with_entity(mut self, entity_id: i64, payload: Value) -> Self {
        self.entities.insert(entity_id, payload);
        self
    }

    pub fn with_path(mut self, payload: Value) -> Self {
        self.path = Some(payload);
        self
    }

    pub fn with_network(mut self, payload: Value) -> Self {
        self.network = Some(payload);
        self
    }

    pub fn with_search(mut self, payload: Value) -> Self {
        self.search = Some(payload);
        self
    }

    pub fn with_why(mut self, payload: Value) -> Self {
        self.why = Some(payload);
        self
    }

    pub fn with_config(mut self, document: Value) -> Self {
        self.config = Some(document);
        self
    }

    pub fn calls(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == name).count()
    }

    fn record_call(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }

    fn scripted(&self, name: &str, payload: &Option<Value>) -> EngineResult<Value> {
        self.record_call(name);
        payload
            .clone()
            .ok_or_else(|| EngineFailure::new(9999, format!("{} not scripted", name)))
    }
}

/// Minimal entity payload: id, name and one record
pub fn create_test_entity_payload(entity_id: i64, data_source: &str, record_id: &str) -> Value {
    serde_json::json!({
        "RESOLVED_ENTITY": {
            "ENTITY_ID": entity_id,
            "ENTITY_NAME": format!("Entity {}", entity_id),
            "RECORD_SUMMARY": [{"DATA_SOURCE": data_source, "RECORD_COUNT": 1}],
            "RECORDS": [{"DATA_SOURCE": data_source, "RECORD_ID": record_id}]
        },
        "RELATED_ENTITIES": []
    })
}

impl ResolutionEngine for ScriptedEngine {
    fn resolve_record(&self, data_source: &str, record_id: &str) -> EngineResult<i64> {
        self.record_call("resolve_record");
        if !self.data_sources.iter().any(|ds| ds == data_source) {
            return Err(EngineFailure::data_source_not_found(data_source));
        }
        let mut resolutions = self.resolutions.lock().unwrap();
        let queue = resolutions
            .get_mut(&(data_source.to_string(), record_id.to_string()))
            .ok_or_else(|| EngineFailure::record_not_found(data_source, record_id))?;
        let entity_id = *queue
            .front()
            .ok_or_else(|| EngineFailure::record_not_found(data_source, record_id))?;
        if queue.len() > 1 {
            queue.pop_front();
        }
        Ok(entity_id)
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

    fn get_entity_by_entity_id(&self, entity_id: i64, _flags: EngineFlags) -> EngineResult<Value> {
        self.record_call("get_entity");
        self.entities
            .get(&entity_id)
            .cloned()
            .ok_or_else(|| EngineFailure::entity_not_found(entity_id))
    }

    fn get_record(&self, data_source: &str, record_id: &str) -> EngineResult<Value> {
        self.record_call("get_record");
        Err(EngineFailure::record_not_found(data_source, record_id))
    }

    fn find_path(&self, _request: &PathRequest, _flags: EngineFlags) -> EngineResult<Value> {
        self.scripted("find_path", &self.path)
    }

    fn find_network(&self, _request: &NetworkRequest, _flags: EngineFlags) -> EngineResult<Value> {
        self.scripted("find_network", &self.network)
    }

    fn search_by_attributes(&self, _criteria: &Value, _flags: EngineFlags) -> EngineResult<Value> {
        self.scripted("search", &self.search)
    }

    fn why_entity(&self, _entity_id: i64, _flags: EngineFlags) -> EngineResult<Value> {
        self.scripted("why_entity", &self.why)
    }

    fn why_entities(&self, _id1: i64, _id2: i64, _flags: EngineFlags) -> EngineResult<Value> {
        self.scripted("why_entities", &self.why)
    }

    fn why_records(
        &self,
        _data_source1: &str,
        _record_id1: &str,
        _data_source2: &str,
        _record_id2: &str,
        _flags: EngineFlags,
    ) -> EngineResult<Value> {
        self.scripted("why_records", &self.why)
    }

    fn export_config(&self) -> EngineResult<Value> {
        Ok(self
            .config
            .clone()
            .unwrap_or_else(|| serde_json::json!({ "DATA_SOURCES": self.data_sources })))
    }

    fn active_config_id(&self) -> EngineResult<i64> {
        Ok(1)
    }

    fn default_config_id(&self) -> EngineResult<i64> {
        Ok(1)
    }

    fn reinitialize(&mut self, _config_id: i64) -> EngineResult<()> {
        Ok(())
    }
}
