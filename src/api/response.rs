// Response envelope shared by every REST endpoint
//
// Success: { data, meta, links, rawData? }
// Failure: { meta, links, errors: [{ code?, message }] }

use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::timers::Timers;
use crate::{Answer, REST_API_VERSION, VERSION};

pub const SERVER_NAME: &str = "resolution-gateway";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub server: &'static str,
    pub http_method: String,
    pub http_status_code: u16,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
    pub rest_api_version: &'static str,
    pub request_id: Uuid,
    pub timings: BTreeMap<String, u64>,
}

#[derive(Debug, Serialize)]
pub struct Links {
    #[serde(rename = "self")]
    pub self_link: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub data: T,
    pub meta: Meta,
    pub links: Links,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub meta: Meta,
    pub links: Links,
    pub errors: Vec<ErrorDetail>,
}

/// What a handler produced: the view and, if requested, the raw payload
pub struct Reply<T> {
    pub data: T,
    pub raw: Option<Value>,
}

impl<T> Reply<T> {
    pub fn plain(data: T) -> Self {
        Self { data, raw: None }
    }

    pub fn from_answer(answer: Answer<T>, with_raw: bool) -> Self {
        Self {
            data: answer.data,
            raw: with_raw.then_some(answer.raw),
        }
    }
}

/// Per-request bookkeeping: echoed link, timers and request id
pub struct RequestContext {
    method: Method,
    self_link: String,
    request_id: Uuid,
    pub timers: Timers,
}

impl RequestContext {
    pub fn new(method: Method, uri: &Uri) -> Self {
        Self {
            method,
            self_link: uri.to_string(),
            request_id: Uuid::new_v4(),
            timers: Timers::new(),
        }
    }

    fn meta(&self, status: StatusCode) -> Meta {
        Meta {
            server: SERVER_NAME,
            http_method: self.method.to_string(),
            http_status_code: status.as_u16(),
            timestamp: Utc::now(),
            version: VERSION,
            rest_api_version: REST_API_VERSION,
            request_id: self.request_id,
            timings: self.timers.millis(),
        }
    }

    fn links(&self) -> Links {
        Links {
            self_link: self.self_link.clone(),
        }
    }

    pub fn respond<T: Serialize>(self, outcome: Result<Reply<T>, GatewayError>) -> Response {
        match outcome {
            Ok(reply) => {
                let envelope = Envelope {
                    data: reply.data,
                    meta: self.meta(StatusCode::OK),
                    links: self.links(),
                    raw_data: reply.raw,
                };
                (StatusCode::OK, Json(envelope)).into_response()
            }
            Err(err) => self.fail(err),
        }
    }

    pub fn fail(self, err: GatewayError) -> Response {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(
                request_id = %self.request_id,
                uri = %self.self_link,
                error = %err,
                "request failed"
            );
        } else {
            warn!(
                request_id = %self.request_id,
                uri = %self.self_link,
                error = %err,
                "request rejected"
            );
        }

        let envelope = ErrorEnvelope {
            meta: self.meta(status),
            links: self.links(),
            errors: vec![ErrorDetail {
                code: err.engine_code(),
                message: err.to_string(),
            }],
        };
        (status, Json(envelope)).into_response()
    }
}
