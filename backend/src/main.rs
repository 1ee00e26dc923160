mod config;
mod error;
mod job_controller;
mod services;

use crate::config::AppConfig;
use crate::job_controller::manager::ImportJobManager;
use crate::services::import::store::BoardStore;
use actix_web::{web, App, HttpServer};
use env_logger::Env;
use log::info;
use std::io;

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config = AppConfig::from_env().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let store = BoardStore::open(&config.database_path).map_err(io::Error::other)?;

    // Initialize the import job registry
    let jobs = ImportJobManager::new();

    // Start the job observers
    tokio::spawn(job_controller::state::start_job_logger(jobs.subscribe()));
    tokio::spawn(job_controller::state::start_retention_sweeper(
        jobs.clone(),
        config.job_retention,
        config.sweep_interval,
    ));

    let bind = (config.host.clone(), config.port);
    info!("Server running at http://{}:{}", bind.0, bind.1);

    let config = web::Data::new(config);
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(jobs.clone()))
            .app_data(web::Data::new(store.clone()))
            .app_data(config.clone())
            .service(services::import::configure_routes())
    })
        .bind(bind)?
        .run()
        .await
}
