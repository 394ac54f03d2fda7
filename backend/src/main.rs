use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use backend::inference::{InferencePipeline, PipelineConfig};
use backend::model::ModelRegistry;
use backend::routes::configure_routes;
use shared::ModelStage;
use std::env;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = PipelineConfig::load().map_err(|e| {
        log::error!("Failed to load pipeline config: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;
    log::info!(
        "Pipeline: {}px input, {} normalization, healthy threshold {}, binary temperature {}",
        config.image.target_size,
        config.image.normalization,
        config.router.healthy_threshold,
        if config.calibration.binary.temperature_scaling {
            config.calibration.binary.temperature.to_string()
        } else {
            "off".to_string()
        }
    );

    let registry = ModelRegistry::load(&config);
    for stage in [ModelStage::Binary, ModelStage::Multiclass] {
        if let Some(reason) = registry.handle(stage).reason() {
            log::warn!(
                "{} model unavailable, predictions will return 503: {}",
                stage,
                reason
            );
        }
    }

    let bind_address = format!("0.0.0.0:{}", config.server.port);
    let max_upload_bytes = config.server.max_upload_bytes;
    let pipeline = web::Data::new(InferencePipeline::new(config, registry));

    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(pipeline.clone())
            .configure(|cfg| configure_routes(cfg, max_upload_bytes))
    })
    .bind(&bind_address)?
    .run()
    .await
}
