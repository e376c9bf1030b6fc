use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer, Responder};
use actix_ws::Message;
use futures_util::StreamExt;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};

use crate::{config::HttpdConfig, hub::ReadingHub, models::MeterReading};

pub struct ApiManager {
    hub: Arc<ReadingHub>,
    config: HttpdConfig,
}

#[derive(Serialize, ToSchema)]
pub struct StatusResponse {
    pub message: String,
    pub status: String,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub has_reading: bool,
    pub subscribers: usize,
    pub timestamp: u64,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[utoipa::path(get,
    path = "/",
    summary = "Service banner",
    responses(
        (status = 200, description = "Service is running", body = StatusResponse)
    ),
)]
async fn root() -> impl Responder {
    HttpResponse::Ok().json(StatusResponse {
        message: "P1 Meter API".to_string(),
        status: "running".to_string(),
    })
}

#[utoipa::path(get,
    path = "/health",
    summary = "Health check endpoint for container monitoring",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    ),
)]
async fn health_check(hub: web::Data<ReadingHub>) -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        has_reading: hub.snapshot().is_some(),
        subscribers: hub.subscriber_count(),
        timestamp: crate::get_unix_ts(),
    })
}

#[utoipa::path(get,
    path = "/latest",
    summary = "Get the latest meter reading",
    responses(
        (status = 200, description = "Latest decoded telegram", body = MeterReading),
        (status = 404, description = "No telegram decoded yet", body = ErrorResponse)
    ),
)]
async fn get_latest_reading(hub: web::Data<ReadingHub>) -> impl Responder {
    match hub.snapshot() {
        Some(reading) => HttpResponse::Ok().json(reading),
        None => HttpResponse::NotFound().json(ErrorResponse {
            error: "No readings available yet".to_string(),
        }),
    }
}

// Websocket to push every new reading to the client
#[utoipa::path(get,
    path = "/ws",
    summary = "Websocket for real-time meter updates",
    responses(
        (status = 101, description = "The current reading is sent on connect, then each new one"),
    ),
)]
async fn ws_readings(req: HttpRequest, body: web::Payload, hub: web::Data<ReadingHub>) -> actix_web::Result<impl Responder> {
    let (response, mut session, mut msg_stream) = actix_ws::handle(&req, body)?;

    let hub = hub.into_inner();
    let mut subscription = hub.subscribe();
    let current = hub.snapshot();

    actix_web::rt::spawn(async move {
        let id = subscription.id;

        if let Some(reading) = current {
            if send_reading(&mut session, &reading).await.is_err() {
                hub.unsubscribe(id);
                return;
            }
        }

        loop {
            tokio::select! {
                reading = subscription.receiver.recv() => match reading {
                    Some(reading) => {
                        if send_reading(&mut session, &reading).await.is_err() {
                            debug!("Websocket {id} closed while sending");
                            break;
                        }
                    }
                    /* The hub dropped us */
                    None => break,
                },
                msg = msg_stream.next() => match msg {
                    Some(Ok(Message::Ping(bytes))) => {
                        if session.pong(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(reason))) => {
                        debug!("Websocket {id} closed by client: {reason:?}");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Websocket {id} protocol error: {e}");
                        break;
                    }
                    None => break,
                },
            }
        }

        hub.unsubscribe(id);
        let _ = session.close(None).await;
    });

    Ok(response)
}

async fn send_reading(session: &mut actix_ws::Session, reading: &MeterReading) -> Result<(), actix_ws::Closed> {
    match serde_json::to_string(reading) {
        Ok(text) => session.text(text).await,
        Err(e) => {
            warn!("Unable to serialize reading: {e}");
            Ok(())
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(description = "P1 smart meter API description"),
    paths(
        root,
        health_check,
        get_latest_reading,
        ws_readings,
    ),
    components(schemas(MeterReading, StatusResponse, HealthResponse, ErrorResponse))
)]
pub struct ApiDoc;

async fn openapi_json() -> impl Responder {
    HttpResponse::Ok().json(ApiDoc::openapi())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(root))
        .route("/health", web::get().to(health_check))
        .route("/latest", web::get().to(get_latest_reading))
        .route("/ws", web::get().to(ws_readings))
        .route("/api/v1/openapi.json", web::get().to(openapi_json));
}

impl ApiManager {
    pub fn new(hub: Arc<ReadingHub>, config: HttpdConfig) -> Self {
        return ApiManager { hub, config };
    }

    /// Runs until the server is stopped, actix stops it on SIGINT/SIGTERM.
    pub async fn start_thread(&self) -> std::io::Result<()> {
        let hub = web::Data::from(self.hub.clone());
        let address = format!("{}:{}", self.config.bind, self.config.port);
        info!("Starting HTTP API on {address}");

        HttpServer::new(move || {
            App::new()
                .app_data(hub.clone())
                .configure(configure)
        })
        .bind(address)?
        .run()
        .await
    }
}
