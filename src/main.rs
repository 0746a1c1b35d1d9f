mod db;
mod event;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use services::recommend::{GenreCatalog, TmdbClient, TmdbConfig};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()
        .expect("invalid PORT");

    let pool = db::init_pool(&database_url)
        .await
        .expect("database init failed");

    let tmdb = TmdbConfig::from_env().expect("TMDB_API_KEY required");
    let http = reqwest::Client::new();

    // The genre catalog is fixed at startup. If the remote list is
    // unreachable we fall back to the built-in standard mapping rather
    // than refusing to boot.
    let genres = match GenreCatalog::fetch(&http, &tmdb).await {
        Ok(catalog) => catalog,
        Err(e) => {
            tracing::warn!(error = %e, "genre catalog fetch failed — using built-in mapping");
            GenreCatalog::builtin()
        }
    };

    let recommender = Arc::new(TmdbClient::new(tmdb, http, genres));
    let state = state::AppState::new(pool, recommender);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "reelswipe listening");
    axum::serve(listener, app).await.expect("server failed");
}
