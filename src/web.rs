//! HTTP interface of the weather station daemon.
use std::sync::Arc;

use actix_web::http::Method;
use actix_web::{middleware, web, App, HttpMessage, HttpRequest, HttpResponse, HttpServer};
use serde::Serialize;
use serde_json::Value;

use crate::config::HttpParameters;
use crate::database::ReadingStore;
use crate::error::StartupError;
use crate::record::ReadingId;
use crate::validation;

#[derive(Serialize)]
struct Inserted {
    message: &'static str,
    id: ReadingId,
}

#[derive(Serialize)]
struct Rejected {
    message: String,
}

#[derive(Serialize)]
struct Failed {
    error: &'static str,
}

/// Headers attached to every response so browser dashboards on any origin can use the api.
fn cors_headers() -> middleware::DefaultHeaders {
    middleware::DefaultHeaders::new()
        .add(("Access-Control-Allow-Origin", "*"))
        .add(("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE"))
        .add(("Access-Control-Allow-Headers", "Content-Type"))
}

/// Registers the weather data routes for a store of type `S`.
pub fn configure<S: ReadingStore + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/data_get")
            .route(web::get().to(get_readings::<S>))
            .default_service(web::to(fallback)),
    )
    .service(
        web::resource("/post_data")
            .route(web::post().to(post_reading::<S>))
            .default_service(web::to(fallback)),
    )
    .default_service(web::to(fallback));
}

/// Binds the http server and returns it without running it.
///
/// Signal handling is left to the caller, which stops the server through its handle.
pub fn bind_server<S: ReadingStore + 'static>(store: Arc<S>, params: &HttpParameters) -> Result<actix_web::dev::Server, StartupError> {
    let store = web::Data::from(store);
    let max_body_bytes = params.max_body_bytes;

    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(store.clone())
            .app_data(web::PayloadConfig::new(max_body_bytes))
            .wrap(cors_headers())
            .wrap(middleware::Logger::default())
            .configure(configure::<S>)
    })
    .disable_signals();

    if let Some(workers) = params.workers {
        server = server.workers(workers);
    }

    let server = server
        .bind((params.address.as_str(), params.port))
        .map_err(StartupError::Bind)?;

    log::info!(target: "weatherd::http", "Server listening on {}:{}", params.address, params.port);
    Ok(server.run())
}

fn internal_error() -> HttpResponse {
    HttpResponse::InternalServerError().json(Failed { error: "Internal server error" })
}

async fn get_readings<S: ReadingStore + 'static>(store: web::Data<S>) -> HttpResponse {
    let store = store.into_inner();

    match web::block(move || store.list_readings_descending()).await {
        Ok(Ok(readings)) => HttpResponse::Ok().json(readings),
        Ok(Err(err)) => {
            log::error!(target: "weatherd::http", "Error fetching weather data: \'{}\'", err);
            internal_error()
        }
        Err(err) => {
            log::error!(target: "weatherd::http", "Could not run weather data query: \'{}\'", err);
            internal_error()
        }
    }
}

async fn post_reading<S: ReadingStore + 'static>(store: web::Data<S>, req: HttpRequest, body: web::Bytes) -> HttpResponse {
    // Only json bodies are parsed, anything else counts as an empty payload.
    let is_json = req.content_type().eq_ignore_ascii_case("application/json");
    let raw = if !is_json || body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Default::default())
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(raw) => raw,
            Err(err) => {
                log::debug!(target: "weatherd::http", "Received data cannot be deserialized via JSON: \'{}\'", err);
                return HttpResponse::BadRequest().json(Rejected { message: String::from("Malformed JSON body") });
            }
        }
    };

    let reading = match validation::validate(&raw) {
        Ok(reading) => reading,
        Err(err) => {
            log::debug!(target: "weatherd::http", "Rejected weather data on field {}: \'{}\'", err.field(), err);
            return HttpResponse::BadRequest().json(Rejected { message: err.message().to_string() });
        }
    };

    let store = store.into_inner();
    match web::block(move || store.insert_reading(&reading)).await {
        Ok(Ok(id)) => HttpResponse::Created().json(Inserted { message: "Weather data inserted", id }),
        Ok(Err(err)) => {
            log::error!(target: "weatherd::http", "Error inserting weather data: \'{}\'", err);
            internal_error()
        }
        Err(err) => {
            log::error!(target: "weatherd::http", "Could not run weather data insert: \'{}\'", err);
            internal_error()
        }
    }
}

/// Answers cors preflight requests and reports everything else as unknown.
async fn fallback(req: HttpRequest) -> HttpResponse {
    if req.method() == Method::OPTIONS {
        HttpResponse::NoContent().finish()
    } else {
        HttpResponse::NotFound().json(Failed { error: "Not found" })
    }
}
