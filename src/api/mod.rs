// 🌐 REST API - axum routes over the engine pool
//
// Handlers parse parameters, run one component against a pooled engine
// handle and wrap the outcome in the common envelope.

pub mod params;
pub mod response;

use axum::{
    extract::{Path, Query, State},
    http::{Method, Uri},
    response::Response,
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::catalog::{AttributeTypeFilter, ConfigCatalog};
use crate::engine::ResolutionEngine;
use crate::error::{GatewayError, GatewayResult};
use crate::identifier::EntityIdentifier;
use crate::lookup::EntityLookup;
use crate::network::{
    NetworkBuilder, NetworkQuery, DEFAULT_BUILD_OUT, DEFAULT_MAX_ENTITIES,
    DEFAULT_NETWORK_MAX_DEGREES,
};
use crate::path::{PathFinder, PathQuery, DEFAULT_MAX_DEGREES};
use crate::pool::{EnginePool, RefreshOutcome};
use crate::projection::RelationshipMode;
use crate::search::{MatchBucket, SearchClassifier, SearchCriteria};
use crate::why::WhyAnalyzer;
use crate::{REST_API_VERSION, VERSION};

use params::QueryParams;
use response::{Reply, RequestContext};

type Params = Query<Vec<(String, String)>>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<EnginePool>,
}

impl AppState {
    pub fn new(pool: EnginePool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

pub fn build_router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/heartbeat", get(heartbeat))
        .route("/version", get(version))
        .route("/data-sources", get(data_sources))
        .route("/data-sources/:data_source", get(data_source))
        .route("/data-sources/:data_source/records/:record_id", get(record))
        .route(
            "/data-sources/:data_source/records/:record_id/entity",
            get(entity_by_record),
        )
        .route(
            "/data-sources/:data_source/records/:record_id/entity/why",
            get(why_entity_by_record),
        )
        .route("/attribute-types", get(attribute_types))
        .route("/entities", get(search_entities))
        .route("/entities/:entity_id", get(entity_by_id))
        .route("/entities/:entity_id/why", get(why_entity_by_id))
        .route("/entity-paths", get(entity_path))
        .route("/entity-networks", get(entity_network))
        .route("/search-entities", get(search_entities).post(search_entities))
        .route("/why/entities", get(why_entities))
        .route("/why/records", get(why_records))
        .route("/config/current", get(current_config))
        .route("/config/refresh", post(refresh_config))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn parse_entity_id(text: &str) -> GatewayResult<i64> {
    text.trim()
        .parse::<i64>()
        .map_err(|_| GatewayError::invalid(format!("entity id must be an integer: {}", text)))
}

// ============================================================================
// ADMIN
// ============================================================================

/// GET /heartbeat
async fn heartbeat(method: Method, uri: Uri) -> Response {
    RequestContext::new(method, &uri).respond(Ok(Reply::plain("OK")))
}

/// GET /version
async fn version(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    let mut ctx = RequestContext::new(method, &uri);
    let outcome = state
        .pool
        .execute(&mut ctx.timers, |engine| Ok(engine.active_config_id()?))
        .await
        .map(|config_id| {
            Reply::plain(json!({
                "version": VERSION,
                "restApiVersion": REST_API_VERSION,
                "activeConfigId": config_id,
            }))
        });
    ctx.respond(outcome)
}

/// GET /data-sources
async fn data_sources(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    let mut ctx = RequestContext::new(method, &uri);
    let outcome = state
        .pool
        .execute(&mut ctx.timers, |engine| Ok(engine.data_sources()?))
        .await
        .map(|sources| Reply::plain(json!({ "dataSources": sources })));
    ctx.respond(outcome)
}

/// GET /data-sources/:data_source
async fn data_source(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Path(code): Path<String>,
    Query(query): Params,
) -> Response {
    let mut ctx = RequestContext::new(method, &uri);
    let outcome = async {
        let with_raw = QueryParams::new(query).with_raw()?;
        let answer = state
            .pool
            .execute(&mut ctx.timers, move |engine| {
                ConfigCatalog::new(engine).data_source(&code)
            })
            .await?;
        Ok::<_, GatewayError>(Reply::from_answer(answer, with_raw))
    }
    .await;
    ctx.respond(outcome)
}

/// GET /attribute-types?attributeClass=&featureType=&withInternal=
async fn attribute_types(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Query(query): Params,
) -> Response {
    let mut ctx = RequestContext::new(method, &uri);
    let outcome = async {
        let params = QueryParams::new(query);
        let filter = AttributeTypeFilter::new()
            .with_attribute_class(params.get("attributeClass"))
            .with_feature_type(params.get("featureType"))
            .with_internal(params.flag("withInternal", false)?);
        let with_raw = params.with_raw()?;

        let answer = state
            .pool
            .execute(&mut ctx.timers, move |engine| {
                ConfigCatalog::new(engine).attribute_types(&filter)
            })
            .await?;
        Ok::<_, GatewayError>(Reply::from_answer(answer, with_raw))
    }
    .await;
    ctx.respond(outcome)
}

/// GET /config/current
async fn current_config(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    let mut ctx = RequestContext::new(method, &uri);
    let outcome = state
        .pool
        .execute(&mut ctx.timers, |engine: &dyn ResolutionEngine| {
            Ok((engine.active_config_id()?, engine.export_config()?))
        })
        .await
        .map(|(config_id, config)| {
            Reply::plain(json!({ "activeConfigId": config_id, "config": config }))
        });
    ctx.respond(outcome)
}

/// POST /config/refresh
async fn refresh_config(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    let mut ctx = RequestContext::new(method, &uri);
    ctx.timers.start("refresh");
    let outcome = state.pool.ensure_config_current().await;
    ctx.timers.stop("refresh");

    let outcome = outcome.map(|refresh| {
        Reply::plain(match refresh {
            RefreshOutcome::Refreshed { reinitialized } => {
                json!({ "refreshed": true, "reinitialized": reinitialized })
            }
            RefreshOutcome::Collapsed => json!({ "refreshed": false, "reinitialized": 0 }),
        })
    });
    ctx.respond(outcome)
}

// ============================================================================
// ENTITIES
// ============================================================================

/// GET /entities/:entity_id
async fn entity_by_id(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Path(entity_id): Path<String>,
    Query(query): Params,
) -> Response {
    let mut ctx = RequestContext::new(method, &uri);
    let outcome = async {
        let identifier = EntityIdentifier::entity(parse_entity_id(&entity_id)?);
        lookup_entity(&state, &mut ctx, identifier, QueryParams::new(query)).await
    }
    .await;
    ctx.respond(outcome)
}

/// GET /data-sources/:data_source/records/:record_id/entity
async fn entity_by_record(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Path((data_source, record_id)): Path<(String, String)>,
    Query(query): Params,
) -> Response {
    let mut ctx = RequestContext::new(method, &uri);
    let identifier = EntityIdentifier::record(&data_source, &record_id);
    let outcome = lookup_entity(&state, &mut ctx, identifier, QueryParams::new(query)).await;
    ctx.respond(outcome)
}

/// GET /data-sources/:data_source/records/:record_id
async fn record(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Path((data_source, record_id)): Path<(String, String)>,
    Query(query): Params,
) -> Response {
    let mut ctx = RequestContext::new(method, &uri);
    let outcome = async {
        let with_raw = QueryParams::new(query).with_raw()?;
        let answer = state
            .pool
            .execute(&mut ctx.timers, move |engine| {
                EntityLookup::new(engine).get_record(&data_source, &record_id)
            })
            .await?;
        Ok::<_, GatewayError>(Reply::from_answer(answer, with_raw))
    }
    .await;
    ctx.respond(outcome)
}

async fn lookup_entity(
    state: &AppState,
    ctx: &mut RequestContext,
    identifier: EntityIdentifier,
    params: QueryParams,
) -> GatewayResult<Reply<crate::projection::EntityDataView>> {
    let options = params.projection(RelationshipMode::Partial)?;
    let with_raw = params.with_raw()?;
    let answer = state
        .pool
        .execute(&mut ctx.timers, move |engine| {
            EntityLookup::new(engine).get_entity(&identifier, options)
        })
        .await?;
    Ok(Reply::from_answer(answer, with_raw))
}

// ============================================================================
// PATHS & NETWORKS
// ============================================================================

/// GET /entity-paths?from=&to=&maxDegrees=&x=&avoidEntities=&forbidAvoided=&s=
async fn entity_path(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Query(query): Params,
) -> Response {
    let mut ctx = RequestContext::new(method, &uri);
    let outcome = async {
        let params = QueryParams::new(query);
        let options = params.projection(RelationshipMode::Partial)?;
        let path_query = PathQuery::new(params.identifier("from")?, params.identifier("to")?)
            .with_max_degrees(params.number("maxDegrees", DEFAULT_MAX_DEGREES)?)
            .with_avoid(params.identifiers("x", "avoidEntities")?)
            .with_forbid_avoided(params.flag("forbidAvoided", false)?)
            .with_required_sources(
                params
                    .all("s")
                    .into_iter()
                    .map(|s| s.trim().to_uppercase())
                    .collect(),
            );
        let with_raw = params.with_raw()?;

        let answer = state
            .pool
            .execute(&mut ctx.timers, move |engine| {
                PathFinder::new(engine).find_path(&path_query, options)
            })
            .await?;
        Ok::<_, GatewayError>(Reply::from_answer(answer, with_raw))
    }
    .await;
    ctx.respond(outcome)
}

/// GET /entity-networks?e=&entities=&maxDegrees=&buildOut=&maxEntities=
async fn entity_network(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Query(query): Params,
) -> Response {
    let mut ctx = RequestContext::new(method, &uri);
    let outcome = async {
        let params = QueryParams::new(query);
        let options = params.projection(RelationshipMode::Partial)?;
        let network_query = NetworkQuery::new(params.identifiers("e", "entities")?)
            .with_max_degrees(params.number("maxDegrees", DEFAULT_NETWORK_MAX_DEGREES)?)
            .with_build_out(params.number("buildOut", DEFAULT_BUILD_OUT)?)
            .with_max_entities(params.number("maxEntities", DEFAULT_MAX_ENTITIES)?);
        let with_raw = params.with_raw()?;

        let answer = state
            .pool
            .execute(&mut ctx.timers, move |engine| {
                NetworkBuilder::new(engine).find_network(&network_query, options)
            })
            .await?;
        Ok::<_, GatewayError>(Reply::from_answer(answer, with_raw))
    }
    .await;
    ctx.respond(outcome)
}

// ============================================================================
// SEARCH
// ============================================================================

/// GET|POST /search-entities and GET /entities, ?attrs=&attr=KEY:VALUE&includeOnly=
async fn search_entities(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Query(query): Params,
    body: String,
) -> Response {
    let mut ctx = RequestContext::new(method, &uri);
    let outcome = async {
        let params = QueryParams::new(query);
        let options = params.projection(RelationshipMode::None)?;
        let mut criteria = SearchCriteria::new();
        for attrs in params.all("attrs") {
            criteria.merge_json_text(attrs)?;
        }
        for pair in params.all("attr") {
            criteria.merge_pair(pair)?;
        }
        criteria.merge_json_text(&body)?;
        let include_only = MatchBucket::parse_all(params.all("includeOnly"))?;
        let with_raw = params.with_raw()?;

        let answer = state
            .pool
            .execute(&mut ctx.timers, move |engine| {
                SearchClassifier::new(engine).search(&criteria, &include_only, options)
            })
            .await?;
        Ok::<_, GatewayError>(Reply::from_answer(answer, with_raw))
    }
    .await;
    ctx.respond(outcome)
}

// ============================================================================
// WHY
// ============================================================================

/// GET /entities/:entity_id/why
async fn why_entity_by_id(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Path(entity_id): Path<String>,
    Query(query): Params,
) -> Response {
    let mut ctx = RequestContext::new(method, &uri);
    let outcome = async {
        let identifier = EntityIdentifier::entity(parse_entity_id(&entity_id)?);
        explain_entity(&state, &mut ctx, identifier, QueryParams::new(query)).await
    }
    .await;
    ctx.respond(outcome)
}

/// GET /data-sources/:data_source/records/:record_id/entity/why
async fn why_entity_by_record(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Path((data_source, record_id)): Path<(String, String)>,
    Query(query): Params,
) -> Response {
    let mut ctx = RequestContext::new(method, &uri);
    let identifier = EntityIdentifier::record(&data_source, &record_id);
    let outcome = explain_entity(&state, &mut ctx, identifier, QueryParams::new(query)).await;
    ctx.respond(outcome)
}

async fn explain_entity(
    state: &AppState,
    ctx: &mut RequestContext,
    identifier: EntityIdentifier,
    params: QueryParams,
) -> GatewayResult<Reply<crate::why::WhyData>> {
    let options = params.projection(RelationshipMode::None)?;
    let with_raw = params.with_raw()?;
    let answer = state
        .pool
        .execute(&mut ctx.timers, move |engine| {
            WhyAnalyzer::new(engine).why_entity(&identifier, options)
        })
        .await?;
    Ok(Reply::from_answer(answer, with_raw))
}

/// GET /why/entities?entity1=&entity2=
async fn why_entities(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Query(query): Params,
) -> Response {
    let mut ctx = RequestContext::new(method, &uri);
    let outcome = async {
        let params = QueryParams::new(query);
        let options = params.projection(RelationshipMode::None)?;
        let first = params.identifier("entity1")?;
        let second = params.identifier("entity2")?;
        let with_raw = params.with_raw()?;

        let answer = state
            .pool
            .execute(&mut ctx.timers, move |engine| {
                WhyAnalyzer::new(engine).why_entities(&first, &second, options)
            })
            .await?;
        Ok::<_, GatewayError>(Reply::from_answer(answer, with_raw))
    }
    .await;
    ctx.respond(outcome)
}

/// GET /why/records?dataSource1=&recordId1=&dataSource2=&recordId2=
async fn why_records(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Query(query): Params,
) -> Response {
    let mut ctx = RequestContext::new(method, &uri);
    let outcome = async {
        let params = QueryParams::new(query);
        let options = params.projection(RelationshipMode::None)?;
        let first = (
            params.required("dataSource1")?.to_string(),
            params.required("recordId1")?.to_string(),
        );
        let second = (
            params.required("dataSource2")?.to_string(),
            params.required("recordId2")?.to_string(),
        );
        let with_raw = params.with_raw()?;

        let answer = state
            .pool
            .execute(&mut ctx.timers, move |engine| {
                WhyAnalyzer::new(engine).why_records(
                    (first.0.as_str(), first.1.as_str()),
                    (second.0.as_str(), second.1.as_str()),
                    options,
                )
            })
            .await?;
        Ok::<_, GatewayError>(Reply::from_answer(answer, with_raw))
    }
    .await;
    ctx.respond(outcome)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineHandle;
    use crate::fixtures::create_test_engine;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    fn create_test_app() -> Router {
        let handles: Vec<EngineHandle> = (0..2)
            .map(|_| Box::new(create_test_engine()) as EngineHandle)
            .collect();
        let pool = EnginePool::new(handles).unwrap();
        build_router(AppState::new(pool), CorsLayer::permissive())
    }

    async fn send_to(app: Router, method: Method, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn send(method: Method, uri: &str, body: &str) -> (StatusCode, Value) {
        send_to(create_test_app(), method, uri, body).await
    }

    async fn get_json(uri: &str) -> (StatusCode, Value) {
        send(Method::GET, uri, "").await
    }

    #[tokio::test]
    async fn test_heartbeat_envelope() {
        let (status, body) = get_json("/heartbeat").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], "OK");
        assert_eq!(body["links"]["self"], "/heartbeat");
        assert_eq!(body["meta"]["httpMethod"], "GET");
        assert_eq!(body["meta"]["httpStatusCode"], 200);
        assert_eq!(body["meta"]["version"], VERSION);
        assert!(body["meta"]["timings"]["overall"].is_u64());
        assert!(body.get("rawData").is_none());
    }

    #[tokio::test]
    async fn test_version_and_data_sources() {
        let (status, body) = get_json("/version").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["restApiVersion"], REST_API_VERSION);

        let (_, body) = get_json("/data-sources").await;
        let sources = body["data"]["dataSources"].as_array().unwrap();
        assert!(sources.contains(&Value::from("CUSTOMERS")));
    }

    #[tokio::test]
    async fn test_get_entity() {
        let (status, body) = get_json("/entities/1").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["resolvedEntity"]["entityId"], 1);
        assert_eq!(body["data"]["relatedEntities"].as_array().unwrap().len(), 2);
        assert!(body["meta"]["timings"]["engine"].is_u64());
    }

    #[tokio::test]
    async fn test_get_entity_by_record_with_raw() {
        let (status, body) = get_json(
            "/data-sources/CUSTOMERS/records/1002/entity?withRaw=true&withRelated=NONE",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["resolvedEntity"]["entityId"], 1);
        assert!(body["data"].get("relatedEntities").is_none());
        assert_eq!(body["rawData"]["RESOLVED_ENTITY"]["ENTITY_ID"], 1);
    }

    #[tokio::test]
    async fn test_projection_matches_direct_lookup() {
        use crate::projection::{DetailLevel, FeatureMode, ProjectionOptions};

        let app = create_test_app();
        let engine = create_test_engine();
        let lookup = EntityLookup::new(&engine);

        let levels = [
            (DetailLevel::Minimal, "MINIMAL"),
            (DetailLevel::Brief, "BRIEF"),
            (DetailLevel::Summary, "SUMMARY"),
            (DetailLevel::Verbose, "VERBOSE"),
        ];
        let modes = [
            (FeatureMode::None, "NONE"),
            (FeatureMode::Representative, "REPRESENTATIVE"),
            (FeatureMode::WithDuplicates, "WITH_DUPLICATES"),
        ];

        for (level, level_text) in levels {
            for (mode, mode_text) in modes {
                for bits in 0..8u8 {
                    let (minimal, stats, internal) = (bits & 1 != 0, bits & 2 != 0, bits & 4 != 0);
                    let options = ProjectionOptions::new()
                        .with_detail_level(level)
                        .with_feature_mode(mode)
                        .with_force_minimal(minimal)
                        .with_feature_stats(stats)
                        .with_internal_features(internal)
                        .with_relationship_mode(RelationshipMode::Partial);
                    let direct = lookup
                        .get_entity(&EntityIdentifier::entity(1), options)
                        .unwrap();

                    let uri = format!(
                        "/entities/1?detailLevel={}&featureMode={}&forceMinimal={}\
                         &withFeatureStats={}&withInternalFeatures={}",
                        level_text, mode_text, minimal, stats, internal
                    );
                    let (status, body) = send_to(app.clone(), Method::GET, &uri, "").await;

                    assert_eq!(status, StatusCode::OK, "{}", uri);
                    let expected = serde_json::to_value(&direct.data).unwrap();
                    assert_eq!(body["data"], expected, "{}", uri);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_get_record() {
        let (status, body) = get_json("/data-sources/customers/records/1001").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["dataSource"], "CUSTOMERS");
        assert_eq!(body["data"]["entityId"], 1);
        assert_eq!(body["data"]["jsonData"]["NAME"][0], "Joe Schmoe");
        assert!(body.get("rawData").is_none());

        let (_, body) = get_json("/data-sources/CUSTOMERS/records/1001?withRaw=true").await;
        assert_eq!(body["rawData"]["RECORD_ID"], "1001");

        let (status, _) = get_json("/data-sources/CUSTOMERS/records/9999").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_data_source_and_attribute_types() {
        let (status, body) = get_json("/data-sources/WATCHLIST?withRaw=true").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["dataSource"]["dataSourceCode"], "WATCHLIST");
        assert_eq!(body["rawData"]["DATA_SOURCE_CODE"], "WATCHLIST");

        let (status, _) = get_json("/data-sources/NOWHERE").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = get_json("/attribute-types?attributeClass=NAME").await;
        assert_eq!(status, StatusCode::OK);
        let types = body["data"]["attributeTypes"].as_array().unwrap();
        assert_eq!(types.len(), 2);
        assert_eq!(types[0]["attributeCode"], "NAME_FULL");

        let (status, _) = get_json("/attribute-types?withInternal=maybe").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_entities_search_alias() {
        let (status, body) =
            get_json("/entities?attr=PHONE_NUMBER:702-555-1212&withRaw=true").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["searchResults"].as_array().unwrap().len(), 1);
        assert!(body.get("rawData").is_some());

        let (status, _) = get_json("/entities").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_entity_errors() {
        let (status, body) = get_json("/entities/999").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["meta"]["httpStatusCode"], 404);
        assert!(body["errors"][0]["message"].as_str().unwrap().starts_with("Not found"));

        let (status, _) = get_json("/entities/abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get_json("/entities/1?detailLevel=BOGUS").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_entity_paths() {
        let (status, body) = get_json("/entity-paths?from=1&to=3&maxDegrees=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["entityPath"]["entityIds"], serde_json::json!([1, 2, 3]));
        assert_eq!(body["data"]["entities"].as_array().unwrap().len(), 3);

        let (_, body) =
            get_json("/entity-paths?from=1&to=3&x=2&avoidEntities=7&forbidAvoided=true").await;
        assert_eq!(body["data"]["entityPath"]["entityIds"], serde_json::json!([]));

        let (_, body) =
            get_json("/entity-paths?from=1&to=3&s=watchlist&x=2&forbidAvoided=true").await;
        assert_eq!(body["data"]["entityPath"]["entityIds"], serde_json::json!([1, 7, 3]));

        let (status, _) = get_json("/entity-paths?from=1&to=3&x=3&forbidAvoided=true").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get_json("/entity-paths?from=1&to=3&maxDegrees=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get_json("/entity-paths?from=1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_entity_networks() {
        let (status, body) = get_json("/entity-networks?e=1&maxDegrees=1&buildOut=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["entities"].as_array().unwrap().len(), 3);
        assert!(body["data"]["entityPaths"].as_array().unwrap().is_empty());
        assert_eq!(body["data"]["maxEntityLimitReached"], false);

        let (_, body) = get_json("/entity-networks?entities=1,6&maxEntities=1").await;
        assert_eq!(body["data"]["entityPaths"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"]["maxEntityLimitReached"], true);
    }

    #[tokio::test]
    async fn test_search_entities() {
        let (status, body) = get_json("/search-entities?attr=PHONE_NUMBER:702-555-1212").await;
        assert_eq!(status, StatusCode::OK);
        let results = body["data"]["searchResults"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["resultType"], "POSSIBLE_RELATION");

        let (_, body) =
            get_json("/search-entities?attr=PHONE_NUMBER:702-555-1212&includeOnly=MATCH").await;
        assert!(body["data"]["searchResults"].as_array().unwrap().is_empty());

        let (status, _) = get_json("/search-entities").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            get_json("/search-entities?attr=PHONE_NUMBER:702-555-1212&includeOnly=SORT_OF").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_search_entities_post_body() {
        let (status, body) = send(
            Method::POST,
            "/search-entities",
            r#"{"NAME_FULL": "Joe Schmoe", "PHONE_NUMBER": "702-555-1212"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let results = body["data"]["searchResults"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["resultType"], "MATCH");
        assert_eq!(results[0]["bestNameScore"], 100);
        assert_eq!(body["meta"]["httpMethod"], "POST");
    }

    #[tokio::test]
    async fn test_why_routes() {
        let (status, body) = get_json("/why/entities?entity1=1&entity2=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["data"]["whyResults"][0]["matchInfo"]["matchLevel"],
            "POSSIBLY_RELATED"
        );

        let (status, _) =
            get_json("/why/entities?entity1=:CUSTOMERS:1001&entity2=:CUSTOMERS:1002").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = get_json(
            "/why/records?dataSource1=CUSTOMERS&recordId1=1001\
             &dataSource2=WATCHLIST&recordId2=2001",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["entities"].as_array().unwrap().len(), 2);

        let (_, body) = get_json("/entities/1/why").await;
        assert_eq!(body["data"]["whyResults"].as_array().unwrap().len(), 2);

        let (status, _) = get_json("/data-sources/CUSTOMERS/records/1001/entity/why").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_config_routes() {
        let (status, body) = send(Method::POST, "/config/refresh", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["refreshed"], true);

        let (status, body) = get_json("/config/current").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["config"]["DATA_SOURCES"].is_array());
    }
}
