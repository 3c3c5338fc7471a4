// Group Graph Server - REST surface over groups and their relationships

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use group_graph::{app_state::AppState, config::Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize application state
    let app_state = AppState::new(config.clone()).await?;
    let app = app_state.router();

    // Start server
    let addr = config.server_address();
    let prefix = &config.server.api_prefix;
    info!("Group graph server starting on http://{}", addr);
    info!("  POST   {}/groups                         - Create group", prefix);
    info!("  GET    {}/groups?type={{type}}             - List groups by type", prefix);
    info!("  GET    {}/groups/{{id}}                    - Group detail", prefix);
    info!("  DELETE {}/groups/{{id}}                    - Delete group", prefix);
    info!("  POST   {}/groups/{{id}}/groups             - Relate groups (h|g)", prefix);
    info!("  POST   {}/groups/{{id}}/users              - Add users", prefix);
    info!("  POST   {}/groups/{{id}}/courses            - Add course", prefix);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
