// 📚 Config Catalog - data sources and attribute types of the active configuration

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::engine::ResolutionEngine;
use crate::error::{GatewayError, GatewayResult};
use crate::payload::decode;
use crate::projection::is_internal_feature;
use crate::Answer;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct RawConfig {
    #[serde(default)]
    data_sources: Vec<String>,
    #[serde(default)]
    feature_types: Vec<RawFeatureType>,
    #[serde(default)]
    attributes: Vec<RawAttribute>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct RawFeatureType {
    ftype_code: String,
    #[serde(default)]
    attr_class: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct RawAttribute {
    attr_code: String,
    #[serde(default)]
    ftype_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceView {
    pub data_source_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceData {
    pub data_source: DataSourceView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeTypeView {
    pub attribute_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute_class: Option<String>,
    pub internal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeTypesData {
    pub attribute_types: Vec<AttributeTypeView>,
}

/// Narrows the attribute type listing. Codes compare case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeTypeFilter {
    pub attribute_class: Option<String>,
    pub feature_type: Option<String>,
    pub with_internal: bool,
}

impl AttributeTypeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute_class(mut self, attribute_class: Option<&str>) -> Self {
        self.attribute_class = attribute_class.map(|c| c.trim().to_uppercase());
        self
    }

    pub fn with_feature_type(mut self, feature_type: Option<&str>) -> Self {
        self.feature_type = feature_type.map(|f| f.trim().to_uppercase());
        self
    }

    pub fn with_internal(mut self, with_internal: bool) -> Self {
        self.with_internal = with_internal;
        self
    }

    fn accepts(&self, view: &AttributeTypeView) -> bool {
        (self.with_internal || !view.internal)
            && self
                .attribute_class
                .as_ref()
                .map_or(true, |class| view.attribute_class.as_ref() == Some(class))
            && self
                .feature_type
                .as_ref()
                .map_or(true, |ftype| view.feature_type.as_ref() == Some(ftype))
    }
}

pub struct ConfigCatalog<'e> {
    engine: &'e dyn ResolutionEngine,
}

impl<'e> ConfigCatalog<'e> {
    pub fn new(engine: &'e dyn ResolutionEngine) -> Self {
        Self { engine }
    }

    fn config(&self) -> GatewayResult<(RawConfig, Value)> {
        let document = self.engine.export_config()?;
        let config = decode(document.clone(), "config")?;
        Ok((config, document))
    }

    pub fn data_source(&self, code: &str) -> GatewayResult<Answer<DataSourceData>> {
        let code = code.trim().to_uppercase();
        let (config, _) = self.config()?;
        if !config.data_sources.contains(&code) {
            return Err(GatewayError::not_found(format!("data source {}", code)));
        }
        debug!(data_source = %code, "data source");

        Ok(Answer {
            data: DataSourceData {
                data_source: DataSourceView {
                    data_source_code: code.clone(),
                },
            },
            raw: serde_json::json!({ "DATA_SOURCE_CODE": code }),
        })
    }

    pub fn attribute_types(
        &self,
        filter: &AttributeTypeFilter,
    ) -> GatewayResult<Answer<AttributeTypesData>> {
        let (config, document) = self.config()?;
        let classes: BTreeMap<&str, Option<&str>> = config
            .feature_types
            .iter()
            .map(|f| (f.ftype_code.as_str(), f.attr_class.as_deref()))
            .collect();

        let attribute_types = config
            .attributes
            .iter()
            .map(|attribute| {
                let feature_type = attribute.ftype_code.clone();
                let attribute_class = feature_type
                    .as_deref()
                    .and_then(|ftype| classes.get(ftype).copied().flatten())
                    .map(str::to_string);
                let internal = is_internal_feature(&attribute.attr_code)
                    || feature_type.as_deref().map_or(false, is_internal_feature);
                AttributeTypeView {
                    attribute_code: attribute.attr_code.clone(),
                    feature_type,
                    attribute_class,
                    internal,
                }
            })
            .filter(|view| filter.accepts(view))
            .collect();

        Ok(Answer {
            data: AttributeTypesData { attribute_types },
            raw: document.get("ATTRIBUTES").cloned().unwrap_or(Value::Null),
        })
    }
}
