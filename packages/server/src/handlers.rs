//! HTTP handler functions for the climate map API.

use actix_web::{HttpResponse, web};
use climate_map_engine::EngineError;
use climate_map_grid::CellId;
use climate_map_index::LayerMetric;
use climate_map_layers::LayerType;
use climate_map_server_models::{ApiError, ApiHealth, LayerFormat, LayerQueryParams};
use climate_map_source::http::parse_observations;

use crate::AppState;

/// `GET /api/health`
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        cache: state.engine.cache_stats(),
    })
}

/// `GET /api/regions`
pub async fn regions(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.engine.regions())
}

/// `GET /api/regions/{regionId}/layers/{metric}/{layerType}`
///
/// A layer that fails to build is served empty so the map keeps
/// rendering; only malformed requests and unknown regions are errors.
pub async fn layer(
    state: web::Data<AppState>,
    path: web::Path<(String, String, String)>,
    params: web::Query<LayerQueryParams>,
) -> HttpResponse {
    let (region_id, metric, layer_type) = path.into_inner();

    let Ok(metric) = metric.parse::<LayerMetric>() else {
        return HttpResponse::BadRequest().json(ApiError::new(format!("unknown metric {metric:?}")));
    };
    let Ok(layer_type) = layer_type.parse::<LayerType>() else {
        return HttpResponse::BadRequest()
            .json(ApiError::new(format!("unknown layer type {layer_type:?}")));
    };
    if !state.engine.has_region(&region_id) {
        return engine_error(&EngineError::UnknownRegion(region_id));
    }

    let layer = state
        .engine
        .get_layer_or_empty(&region_id, metric, layer_type)
        .await;

    match params.format {
        LayerFormat::Descriptor => HttpResponse::Ok().json(layer.as_ref()),
        LayerFormat::Geojson => HttpResponse::Ok().json(layer.to_feature_collection()),
    }
}

/// `GET /api/regions/{regionId}/cells/{cellId}`
pub async fn cell(state: web::Data<AppState>, path: web::Path<(String, u32)>) -> HttpResponse {
    let (region_id, cell_id) = path.into_inner();
    match state.engine.get_cell_detail(&region_id, CellId(cell_id)) {
        Ok(detail) => HttpResponse::Ok().json(detail),
        Err(e) => engine_error(&e),
    }
}

/// `GET /api/regions/{regionId}/summary`
pub async fn summary(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    match state.engine.region_summary(&path) {
        Ok(summary) => HttpResponse::Ok().json(summary),
        Err(e) => engine_error(&e),
    }
}

/// `POST /api/regions/{regionId}/observations`
///
/// Takes a JSON array of raw observations (or `{"observations": [...]}`).
/// Records are decoded one by one, so a bad record is reported in the
/// response body rather than failing the request.
pub async fn ingest(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<serde_json::Value>,
) -> HttpResponse {
    let batch = match parse_observations(body.into_inner()) {
        Ok(batch) => batch,
        Err(e) => return HttpResponse::BadRequest().json(ApiError::new(e.to_string())),
    };
    match state.engine.ingest(&path, &batch) {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => engine_error(&e),
    }
}

/// `DELETE /api/regions/{regionId}/observations/{observationId}`
pub async fn remove_observation(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (region_id, observation_id) = path.into_inner();
    match state.engine.remove_observation(&region_id, &observation_id) {
        Ok(Some(removed)) => HttpResponse::Ok().json(removed),
        Ok(None) => HttpResponse::NotFound().json(ApiError::new(format!(
            "region {region_id:?} has no observation {observation_id:?}"
        ))),
        Err(e) => engine_error(&e),
    }
}

/// `POST /api/regions/{regionId}/refresh`
///
/// Pulls one batch from the region's configured source.
pub async fn refresh(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    match state.engine.refresh_configured(&path).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => engine_error(&e),
    }
}

fn engine_error(e: &EngineError) -> HttpResponse {
    let mut response = match e {
        EngineError::UnknownRegion(_) | EngineError::UnknownCell { .. } => {
            HttpResponse::NotFound()
        }
        EngineError::NoSource(_) => HttpResponse::Conflict(),
        EngineError::Source(_) => {
            log::warn!("Source failure: {e}");
            HttpResponse::BadGateway()
        }
        EngineError::DuplicateRegion(_)
        | EngineError::Grid { .. }
        | EngineError::Overlay(_)
        | EngineError::Config(_) => {
            log::error!("Request failed: {e}");
            HttpResponse::InternalServerError()
        }
    };
    response.json(ApiError::new(e.to_string()))
}
