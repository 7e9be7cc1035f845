#[tokio::main]
async fn main() {
    use adgraph_engine::{DebugController, ExecutorRegistry};
    use adgraph_server::auth::JwtVerifier;
    use adgraph_server::config::ServerConfig;
    use adgraph_server::db::PgExecutionRepository;
    use adgraph_server::routes::{self, AppState};
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;
    use tower_http::trace::TraceLayer;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!("loaded configuration");

    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    tracing::info!("running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    let repository = Arc::new(PgExecutionRepository::new(db_pool));
    let registry = Arc::new(ExecutorRegistry::with_defaults());
    let controller = Arc::new(DebugController::new(repository.clone(), registry));
    let jwt = JwtVerifier::new(&config.jwt.secret);

    let state = AppState {
        repository,
        controller,
        jwt,
    };

    let app = routes::router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.bind_addr);

    axum::serve(listener, app.into_make_service()).await.expect("server error");
}
