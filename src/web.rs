//! HTTP surface: application state, middleware and routing.

use anyhow::Result;
use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::actions;
use crate::config::Settings;
use crate::crm::HttpCrmSource;
use crate::crm_sync::SyncService;
use crate::geocoding::Geocoder;
use crate::match_service::MatchService;
use crate::routing::{GoogleDistanceBackend, HaversineEstimator, RouteProvider};
use crate::simulation::SimulationService;
use crate::travel_time_cache::TravelTimeService;
use crate::travel_time_repo::TravelTimeRepository;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

pub fn create_pool(database_url: &str) -> Result<PgPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder().max_size(10).build(manager)?;
    Ok(pool)
}

// App state for sharing the database pool and wired services
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub settings: Settings,
    pub geocoder: Arc<Geocoder>,
    pub travel: Arc<TravelTimeService>,
    pub match_service: Arc<MatchService>,
    pub simulation: Arc<SimulationService>,
    pub sync: Arc<SyncService>,
    /// Flipped once startup validation has passed; requests before that
    /// are answered 503.
    pub store_validated: Arc<AtomicBool>,
}

/// Wire every service once, at startup. This is the single composition
/// point: components receive their collaborators here and nowhere else.
pub fn build_state(pool: PgPool, settings: Settings) -> AppState {
    let geocoder = Arc::new(Geocoder::from_settings(&settings));

    let route_provider: Arc<dyn RouteProvider> = match settings.google_api_key.as_deref() {
        Some(key) => Arc::new(GoogleDistanceBackend::new(key)),
        None => {
            info!("No routing credential; travel times fall back to offline estimates");
            Arc::new(HaversineEstimator)
        }
    };
    let travel = Arc::new(TravelTimeService::new(
        Arc::new(TravelTimeRepository::new(pool.clone())),
        route_provider,
        &settings,
    ));

    let match_service = Arc::new(MatchService::new(
        pool.clone(),
        travel.clone(),
        geocoder.clone(),
        &settings,
    ));
    let simulation = Arc::new(SimulationService::new(
        pool.clone(),
        travel.clone(),
        geocoder.clone(),
        &settings,
    ));
    let sync = Arc::new(SyncService::new(
        pool.clone(),
        HttpCrmSource::from_settings(&settings),
        geocoder.clone(),
        travel.clone(),
    ));

    AppState {
        pool,
        settings,
        geocoder,
        travel,
        match_service,
        simulation,
        sync,
        store_validated: Arc::new(AtomicBool::new(false)),
    }
}

// Middleware for request logging with correlation ID
async fn request_logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = Uuid::new_v4().to_string()[..8].to_string();
    let start_time = Instant::now();

    info!("Started {} {} [{}]", method, path, request_id);

    let response = next.run(request).await;
    let duration = start_time.elapsed();
    let status = response.status();

    info!(
        "Completed {} {} [{}] {} in {:.2}ms",
        method,
        path,
        request_id,
        status.as_u16(),
        duration.as_secs_f64() * 1000.0
    );

    response
}

// Queue requests stay cold until the store has been validated against the
// expected project sentinel.
async fn store_validated_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.store_validated.load(Ordering::SeqCst) {
        return actions::json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "store not validated; service is not ready",
        )
        .into_response();
    }
    next.run(request).await
}

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/matching/run-matching", post(actions::run_matching))
        .route("/matching/matching-status", get(actions::matching_status))
        .route("/matching/unmatched", get(actions::unmatched_clients))
        .route("/scheduling/overrides", post(actions::upsert_override))
        .route("/scheduling/overrides", get(actions::list_overrides))
        .route("/scheduling/overrides", delete(actions::delete_override_by_pair))
        .route("/scheduling/overrides/{id}", get(actions::get_override))
        .route(
            "/scheduling/overrides/{id}",
            delete(actions::delete_override),
        )
        .route("/scheduling/sync-clients", post(actions::sync_clients))
        .route(
            "/scheduling/sync-clients/status",
            get(actions::sync_clients_status),
        )
        .route("/simulation/add-client", post(actions::add_client))
        .route("/simulation/run", post(actions::run_simulation))
        .route("/simulation/proposals", get(actions::list_proposals))
        .route("/simulation/approve/{id}", post(actions::approve_proposal))
        .route("/simulation/reject/{id}", post(actions::reject_proposal))
        .route("/simulation/defer/{id}", post(actions::defer_proposal))
        .route(
            "/technicians/{id}/reopen",
            post(actions::reopen_technician),
        );

    Router::new()
        .route("/status", get(actions::service_status))
        .route("/location/update", post(actions::update_location))
        .route(
            "/location/{entity_type}/{entity_id}",
            get(actions::get_location),
        )
        .nest("/admin", admin)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            store_validated_middleware,
        ))
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_web_server(state: AppState) -> Result<()> {
    let interface = state.settings.bind_address.clone();
    let port = state.settings.port;

    actions::init_server_start_time();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(format!("{interface}:{port}")).await?;
    info!("Web server listening on http://{interface}:{port}");

    axum::serve(listener, app).await?;
    Ok(())
}
