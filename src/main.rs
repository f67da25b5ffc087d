mod audit;
mod broadcaster;
mod config;
mod db;
mod errors;
mod filters;
mod handlers;
mod logger;
mod models;
mod policy;
mod remote;
mod routes;
mod security;
mod swagger;

use audit::AuditWriter;
use broadcaster::Broadcaster;
use db::{ensure_default_admin, get_db};
use filters::AppContext;
use log::error;
use remote::RemoteExecutor;
use std::sync::Arc;
use utoipa::OpenApi;
use warp::{self, Filter};

#[tokio::main]
async fn main() -> mongodb::error::Result<()> {
    logger::start_log();

    let config = Arc::new(config::Config::load());
    let doc_config = swagger::doc_config();

    let db = get_db(&config.database).await?;
    ensure_default_admin(&db).await?;

    let broadcaster = Broadcaster::new();
    if let Err(err) = broadcaster::serve(
        config.websocket.server,
        broadcaster.clone(),
        config.auth.jwt_secret.clone(),
    )
    .await
    {
        error!("could not start websocket listener: {}", err);
    }

    let ctx = AppContext {
        audit: AuditWriter::new(&db),
        db,
        broadcaster,
        remote: RemoteExecutor::new(config.remote.timeout_secs),
        config: config.clone(),
    };

    let root = warp::path::end().map(|| "Welcome to the AIoT Monitor api");

    let api_doc = warp::path("api-doc.json")
        .and(warp::get())
        .map(|| warp::reply::json(&swagger::MonitorDoc::openapi()));

    let swagger_ui = warp::path("docs")
        .and(warp::get())
        .and(warp::path::full())
        .and(warp::path::tail())
        .and(warp::any().map(move || doc_config.clone()))
        .and_then(swagger::serve_swagger);

    let routes = root
        .or(api_doc)
        .or(swagger_ui)
        .or(routes::api_routes(ctx))
        .recover(errors::handle_rejection);

    warp::serve(routes).run(config.server.addr()).await;

    Ok(())
}
