use std::sync::Arc;

use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpServer, Responder, get};
use anyhow::Context;

use pims_prp::config::Config;
use pims_prp::db::init_db;
use pims_prp::docs::ApiDoc;
use pims_prp::logging::init_file_logging;
use pims_prp::prp::PrpClient;
use pims_prp::routes;
use pims_prp::store::{MySqlUserStore, UserStore};
use pims_prp::sync::SyncService;
use tracing::info;
use utoipa::OpenApi; // ← needed for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

#[get("/")]
async fn index() -> impl Responder {
    "PIMS PRP sync"
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;

    let _guard = init_file_logging(&config.log_dir, "app.log");

    info!("Server starting...");

    let pool = init_db(&config.database_url)
        .await
        .context("failed to connect to database")?;

    let store: Arc<dyn UserStore> = Arc::new(MySqlUserStore::new(pool));
    let client = Arc::new(PrpClient::new(config.prp.clone()).context("failed to build PRP client")?);
    info!(base_url = %config.prp.base_url, "PRP client ready");

    // one service per process so the re-entrancy guard is shared by all workers
    let sync_service = Data::new(SyncService::new(client, store.clone()));
    let store_data: Data<dyn UserStore> = Data::from(store);

    let server_addr = config.server_addr.clone();
    let config_data = config.clone();

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // ← important: wildcard {_:.*} to match JS/CSS files
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(store_data.clone())
            .app_data(sync_service.clone())
            .app_data(Data::new(config.clone()))
            .service(index)
            // Configure auth + protected routes with rate limiting
            .configure(|cfg| routes::configure(cfg, config_data.clone()))
    })
    .bind(server_addr)?
    .run()
    .await?;

    Ok(())
}
