use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use jobtrack::openapi::ApiDoc;
use jobtrack::report::{HttpImageSource, ReportRenderer};
use jobtrack::repo::{inmem::InMemRepo, pg::PgRepo, Repo};
use jobtrack::settings::AppConfig;
use jobtrack::storage::S3BlobStore;
use jobtrack::{config, AppState};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // .env is a development convenience; production sets the environment externally
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = AppConfig::from_env()?;
    info!("Bootstrapping job request service");

    let repo: Arc<dyn Repo> = match &cfg.database_url {
        Some(url) => {
            use sqlx::postgres::PgPoolOptions;
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await
                .context("failed to connect to DATABASE_URL")?;
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("failed to apply migrations")?;
            info!("Using Postgres repository backend");
            Arc::new(PgRepo::new(pool))
        }
        None => {
            let repo = match &cfg.data_dir {
                Some(dir) => InMemRepo::with_snapshot(dir.join("state.json")),
                None => InMemRepo::new(),
            };
            info!("Using in-memory repository backend");
            Arc::new(repo)
        }
    };

    let blob_store = Arc::new(S3BlobStore::new(&cfg.s3).await?);
    let images = HttpImageSource::new(cfg.report_image_timeout).context("failed to build HTTP client")?;
    let renderer = Arc::new(ReportRenderer::new(Arc::new(images)));
    let state = AppState { repo, blob_store, renderer };

    let openapi = ApiDoc::openapi();
    let frontend_url = cfg.frontend_url.clone();

    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                // during local dev allow the Next/Vite default ports
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
                .allowed_origin("http://localhost:5173")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
                .expose_headers(["content-disposition"])
                .supports_credentials()
                .max_age(3600);
            if let Some(front) = &frontend_url {
                c = c.allowed_origin(front);
            }
            c
        };

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(&cfg.bind_addr)?;

    info!("Listening on http://{}", cfg.bind_addr);
    server.run().await?;
    Ok(())
}
