use std::sync::Mutex;

use actix_web::{
    http::{Method, StatusCode},
    middleware,
    web::{self, Data},
    App, HttpResponse, HttpServer, Responder,
};
use log::info;
use serde_json::json;

mod config;
mod db;
mod errors;
mod routes;
mod structs;
mod utils;

use config::AppConfig;
use db::{CartStore, ItemStore, UserStore};
use errors::AppError;

#[derive(Debug)]
pub struct AppState {
    pub items: Mutex<ItemStore>,
    pub carts: Mutex<CartStore>,
    pub users: Mutex<UserStore>,
    pub config: AppConfig,
}

/// Builds fresh stores and seeds the administrator account.
pub fn build_state(config: &AppConfig) -> Result<Data<AppState>, AppError> {
    let mut users = UserStore::new(config.password_min_length);
    users.seed_admin(&config.admin_username, &config.admin_password)?;

    Ok(Data::new(AppState {
        items: Mutex::new(ItemStore::new()),
        carts: Mutex::new(CartStore::new()),
        users: Mutex::new(users),
        config: config.clone(),
    }))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::from_env().map_err(|e| {
        log::error!("FATAL: {}", e);
        e
    })?;
    let state = build_state(&config).map_err(|e| {
        log::error!("FATAL: could not seed admin user: {}", e);
        e
    })?;

    info!(
        "Starting HTTP server on http://{}:{}/",
        state.config.server_host, state.config.server_port
    );

    HttpServer::new({
        let state = state.clone();
        move || {
            App::new()
                // enable logger - always register Actix Web Logger middleware last
                .wrap(middleware::Logger::default())
                .app_data(state.clone())
                .configure(routes::configure)
                .default_service(web::to(default_handler))
        }
    })
    .bind((config.server_host.as_str(), config.server_port))?
    .run()
    .await
}

async fn default_handler(req_method: Method) -> impl Responder {
    match req_method {
        Method::GET => {
            HttpResponse::build(StatusCode::NOT_FOUND).json(json!({ "detail": "Not Found" }))
        }
        _ => HttpResponse::MethodNotAllowed().finish(),
    }
}
