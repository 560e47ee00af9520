mod configuration;
mod error;
mod routes;
mod state;

use configuration::Settings;
use liquid::providers::factory::ModelRegistry;
use state::AppState;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // An explicit settings file may be passed as the only argument
    let settings = match std::env::args().nth(1) {
        Some(path) => Settings::from_file(path)?,
        None => Settings::new()?,
    };
    let addr = settings.server.socket_addr()?;

    // The model is resolved once, every request shares it
    let registry = ModelRegistry::new(settings.provider_context());
    let model = registry.infer_model(&settings.model.name)?;
    info!(model = %model.name(), "serving model");

    let state = AppState::new(model, settings.tools, settings.suggestions);

    // Create router with CORS support
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::configure(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
