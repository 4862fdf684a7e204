use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod auth;
mod error;
mod esi;
mod extract;
mod middleware;
mod routes;
mod state;

/// Capacity of the live agent event channel; slower subscribers lag.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "EVE Co-Pilot API",
        version = "0.1.0",
        description = "Market, production, shopping and war-intel backend with an audited agent plan workflow."
    ),
    paths(
        routes::health::health_check,
        routes::market::get_prices,
        routes::market::compare,
        routes::market::upsert_prices,
        routes::market::refresh_prices,
        routes::production::get_materials,
        routes::shopping::list_lists,
        routes::shopping::create_list,
        routes::shopping::get_list,
        routes::shopping::update_list,
        routes::shopping::delete_list,
        routes::shopping::add_item,
        routes::shopping::update_item,
        routes::shopping::delete_item,
        routes::shopping::add_production,
        routes::shopping::compare,
        routes::war::ingest_killmails,
        routes::war::summary,
        routes::agent::create_session,
        routes::agent::list_sessions,
        routes::agent::get_session,
        routes::agent::update_session,
        routes::agent::delete_session,
        routes::agent::list_messages,
        routes::agent::add_message,
        routes::agent::plans::propose_plan,
        routes::agent::plans::list_plans,
        routes::agent::plans::get_plan,
        routes::agent::plans::approve_plan,
        routes::agent::plans::reject_plan,
        routes::agent::plans::start_plan,
        routes::agent::plans::complete_plan,
        routes::agent::plans::fail_plan,
        routes::agent::plans::record_step,
        routes::agent::events::list_events,
        routes::agent::stream::stream_events,
    ),
    components(schemas(
        routes::health::HealthResponse,
        eve_copilot_core::error::ApiError,
        eve_copilot_core::market::MarketPrice,
        eve_copilot_core::market::PriceComparison,
        eve_copilot_core::market::HubPrice,
        eve_copilot_core::market::PriceFreshness,
        eve_copilot_core::market::PriceFreshnessStatus,
        routes::market::PriceInput,
        routes::market::UpsertPricesRequest,
        routes::market::UpsertPricesResponse,
        routes::market::RefreshResponse,
        eve_copilot_core::production::MaterialRequirement,
        routes::production::MaterialsResponse,
        eve_copilot_core::shopping::ShoppingList,
        eve_copilot_core::shopping::ShoppingItem,
        eve_copilot_core::shopping::ListCost,
        eve_copilot_core::shopping::ListComparison,
        eve_copilot_core::shopping::RegionTotal,
        eve_copilot_core::shopping::CheapestSource,
        routes::shopping::ShoppingListSummary,
        routes::shopping::ShoppingListDetail,
        routes::shopping::CreateListRequest,
        routes::shopping::UpdateListRequest,
        routes::shopping::AddItemRequest,
        routes::shopping::UpdateItemRequest,
        routes::shopping::AddProductionResponse,
        eve_copilot_core::war::Killmail,
        eve_copilot_core::war::CountedEntry,
        eve_copilot_core::war::WarSummary,
        routes::war::IngestKillmailsRequest,
        routes::war::IngestKillmailsResponse,
        routes::war::SummaryResponse,
        eve_copilot_core::agent::Session,
        eve_copilot_core::agent::Message,
        eve_copilot_core::agent::MessageRole,
        eve_copilot_core::agent::Plan,
        eve_copilot_core::agent::PlanStep,
        eve_copilot_core::agent::PlanStatus,
        eve_copilot_core::agent::RiskLevel,
        eve_copilot_core::agent::AutonomyLevel,
        eve_copilot_core::agent::AgentEvent,
        eve_copilot_core::agent::PaginatedResponse<eve_copilot_core::agent::AgentEvent>,
        routes::agent::CreateSessionRequest,
        routes::agent::UpdateSessionRequest,
        routes::agent::AddMessageRequest,
        routes::agent::plans::ProposePlanRequest,
        routes::agent::plans::TransitionRequest,
        routes::agent::plans::StepOutcome,
        routes::agent::plans::StepOutcomeRequest,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eve_copilot_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = state::AppConfig::from_env();

    // Database connection
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let esi = esi::EsiClient::new(&config.esi_base_url, &config.esi_user_agent)
        .expect("Failed to build ESI client");

    if config.api_token.is_none() {
        tracing::warn!("COPILOT_API_TOKEN is not set; /api routes are open");
    }

    let cors_layer = middleware::cors::build_cors_layer(&config.cors_origins);
    let token_layer = auth::RequireTokenLayer::new(config.api_token.as_deref());
    let port = config.port;

    let app_state = state::AppState {
        db: pool,
        config: Arc::new(config),
        events: state::EventHub::new(EVENT_CHANNEL_CAPACITY),
        esi,
    };

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::market::router())
        .merge(routes::market::refresh_router().layer(middleware::rate_limit::esi_refresh_layer()))
        .merge(routes::production::router())
        .merge(routes::shopping::router())
        .merge(routes::war::router())
        .merge(routes::agent::read_router())
        .merge(routes::agent::router().layer(middleware::rate_limit::agent_layer()))
        .merge(routes::agent::stream_router())
        .layer(token_layer)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer),
        )
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("EVE Co-Pilot API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}
