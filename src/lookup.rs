// 🔎 Entity Lookup - one entity and its related entities, or one record
//
// Also owns the "make sure these entities are in the answer" step shared by
// path and network queries: entities the engine left out get fetched.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::engine::{EngineFlags, ResolutionEngine};
use crate::error::GatewayResult;
use crate::identifier::EntityIdentifier;
use crate::payload::{decode, RawEntityData, RawRecordData};
use crate::projection::{EntityDataView, EntityProjector, ProjectionOptions};
use crate::Answer;

/// A record with every attribute it carries
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDataView {
    pub data_source: String,
    pub record_id: String,
    pub entity_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_timestamp: Option<DateTime<Utc>>,
    pub json_data: BTreeMap<String, Vec<String>>,
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
}

impl From<RawRecordData> for RecordDataView {
    fn from(raw: RawRecordData) -> Self {
        let record = raw.record;
        Self {
            data_source: record.data_source,
            record_id: record.record_id,
            entity_id: raw.entity_id,
            last_seen_timestamp: record.last_seen_dt,
            json_data: raw.json_data,
            name_data: record.name_data,
            address_data: record.address_data,
            phone_data: record.phone_data,
            characteristic_data: record.characteristic_data,
            identifier_data: record.identifier_data,
            relationship_data: record.relationship_data,
            other_data: record.other_data,
        }
    }
}

pub struct EntityLookup<'e> {
    engine: &'e dyn ResolutionEngine,
}

impl<'e> EntityLookup<'e> {
    pub fn new(engine: &'e dyn ResolutionEngine) -> Self {
        Self { engine }
    }

    pub fn get_entity(
        &self,
        identifier: &EntityIdentifier,
        options: ProjectionOptions,
    ) -> GatewayResult<Answer<EntityDataView>> {
        let flags = options.engine_flags();
        let raw = match identifier {
            EntityIdentifier::EntityId(entity_id) => {
                self.engine.get_entity_by_entity_id(*entity_id, flags)?
            }
            EntityIdentifier::DataSourceRecordId {
                data_source,
                record_id,
            } => self
                .engine
                .get_entity_by_record_id(data_source, record_id, flags)?,
        };
        let entity: RawEntityData = decode(raw.clone(), "entity")?;

        Ok(Answer {
            data: EntityProjector::new(options).project(&entity),
            raw,
        })
    }

    pub fn get_record(
        &self,
        data_source: &str,
        record_id: &str,
    ) -> GatewayResult<Answer<RecordDataView>> {
        let data_source = data_source.trim().to_uppercase();
        debug!(data_source = %data_source, record_id, "get record");

        let raw = self.engine.get_record(&data_source, record_id)?;
        let record: RawRecordData = decode(raw.clone(), "record")?;
        Ok(Answer { data: record, raw }.map(RecordDataView::from))
    }

    /// Raw entity data for each wanted id, in order, taken from `provided`
    /// when present and fetched from the engine otherwise
    pub fn gather(
        &self,
        provided: &[RawEntityData],
        wanted: &[i64],
        flags: EngineFlags,
    ) -> GatewayResult<Vec<RawEntityData>> {
        let mut gathered = Vec::with_capacity(wanted.len());
        for entity_id in wanted {
            match provided
                .iter()
                .find(|e| e.resolved_entity.entity_id == *entity_id)
            {
                Some(entity) => gathered.push(entity.clone()),
                None => {
                    debug!(entity_id, "entity missing from engine payload, fetching");
                    let raw = self.engine.get_entity_by_entity_id(*entity_id, flags)?;
                    gathered.push(decode(raw, "entity")?);
                }
            }
        }
        Ok(gathered)
    }
}
