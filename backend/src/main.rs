use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use std::env;
use std::sync::Arc;
use std::time::Duration;

use xai_backend::config::AppConfig;
use xai_backend::context::AppContext;
use xai_backend::explain::Explainer;
use xai_backend::model::Oracle;
use xai_backend::routes::configure_routes;
use xai_backend::storage::{FsStore, ImageStore};

#[cfg(feature = "torch")]
fn load_oracle(config: &AppConfig) -> std::io::Result<Arc<dyn Oracle>> {
    use xai_backend::model::torch::TorchOracle;
    let oracle = TorchOracle::load(&config.model).map_err(|e| {
        log::error!("Failed to load model from {}: {}", config.model.path, e);
        std::io::Error::other(format!("Model loading failed: {}", e))
    })?;
    Ok(Arc::new(oracle))
}

#[cfg(not(feature = "torch"))]
fn load_oracle(_config: &AppConfig) -> std::io::Result<Arc<dyn Oracle>> {
    log::error!("No inference backend compiled in; rebuild with `--features torch`");
    Err(std::io::Error::other("no inference backend available"))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    }

    let config = AppConfig::load().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        std::io::Error::other(e.to_string())
    })?;

    let store = FsStore::new(&config.storage.staging_dir, &config.storage.artifact_dir)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    let artifact_dir = store.artifact_dir().display().to_string();
    let store: Arc<dyn ImageStore> = Arc::new(store);

    let oracle = load_oracle(&config)?;
    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    let workers = config.server.workers;
    let sweep_every = Duration::from_secs(config.storage.sweep_interval_secs.max(1));

    let ctx = AppContext::new(config, oracle, store).map_err(|e| {
        log::error!("Model self-test failed: {}", e);
        std::io::Error::other(e.to_string())
    })?;
    log::info!("Model loaded with classes {:?}", ctx.labels.as_slice());

    let _sweeper = ctx.lifecycle.spawn_sweeper(sweep_every);
    let explainer = Explainer::new(ctx.clone());

    log::info!("Starting server on {}", bind_address);

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .app_data(web::Data::new(ctx.clone()))
            .app_data(web::Data::new(explainer.clone()))
            .configure(|cfg| configure_routes(cfg, artifact_dir.clone()))
    });
    if let Some(workers) = workers {
        server = server.workers(workers);
    }
    server.bind(&bind_address)?.run().await
}
