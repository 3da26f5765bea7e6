use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    middleware,
    response::Response,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::{
    auth::StoreSession,
    error::{IngestError, LookupError, Result},
    form_verification::{ValidVisit, VisitRequest},
    geo::GeoClient,
    visitor_db::{single_domain, NewVisitor, VisitorRow, VisitorStore},
};

const ALLOW_HEADERS: &str = "authorization, x-client-info, apikey, content-type";
const ALLOW_METHODS: &str = "POST, OPTIONS";

#[derive(Clone)]
pub struct AppState {
    geo: GeoClient,
    store: Arc<dyn VisitorStore>,
}

impl AppState {
    pub fn new(geo: GeoClient, store: Arc<dyn VisitorStore>) -> Self {
        Self { geo, store }
    }
}

/// Summary of a recorded visit, sent back to the caller
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct GeoResponse {
    pub visitor_id: i64,
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub subdivisions: Vec<Option<String>>,
}

impl GeoResponse {
    fn from_row(row: VisitorRow, domain: String) -> Self {
        Self {
            visitor_id: row.id,
            domain,
            continent: row.continent,
            country: row.country,
            subdivisions: row.subdivisions,
        }
    }
}

/// Every path takes the same POST and preflight handlers.
pub fn router(state: AppState) -> Router {
    let visit_routes = post(visit).options(preflight);
    Router::new()
        .route("/", visit_routes.clone())
        .route("/*path", visit_routes)
        .layer(middleware::map_response(add_cors_headers))
        .with_state(state)
}

async fn add_cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    response
}

async fn preflight() -> &'static str {
    "ok"
}

async fn visit(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<GeoResponse>> {
    state.geo.require_configured()?;
    let visit = VisitRequest::from_body(&body)?.validate()?;
    let session = StoreSession::from_headers(&headers);

    record_visit(&state, &session, visit).await.map(Json)
}

/// Geolocates the visitor, resolves the domain and stores the visit, in that order. Nothing is
/// written unless every earlier step succeeded.
#[instrument(skip_all, fields(ip = %visit.ip, domain = %visit.domain))]
pub async fn record_visit(
    state: &AppState,
    session: &StoreSession,
    visit: ValidVisit,
) -> Result<GeoResponse> {
    let geo = state.geo.lookup(&visit.ip).await?;
    debug!(?geo, "Got geolocation data");

    let rows = state
        .store
        .find_domains(session, &visit.domain)
        .await
        .map_err(|err| LookupError::Store(err.to_string()))?;
    let domain = single_domain(rows, &visit.domain)?;

    let new_visitor = NewVisitor::new(domain.id(), &visit.ip, &geo, Utc::now());
    let row = state
        .store
        .insert_visitor(session, &new_visitor)
        .await
        .map_err(|err| IngestError::Persistence(err.to_string()))?;
    info!(visitor_id = row.id, domain_id = row.domain_id, "Recorded visit");

    Ok(GeoResponse::from_row(row, visit.domain))
}
