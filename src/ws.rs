//! Live monitor: exposes the running summary while a test is in progress.
//!
//! `GET /metrics` answers with the current summary as JSON. `GET /ws` upgrades
//! to a WebSocket that pushes the summary every second and on any text frame.

use actix::prelude::*;
use actix_web::dev::ServerHandle;
use actix_web::{web, App, Error, HttpRequest, HttpResponse, HttpServer};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::aggregator::Aggregator;

const PUSH_EVERY: Duration = Duration::from_secs(1);

pub struct WsSession {
    aggregator: Arc<Aggregator>,
}

impl WsSession {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self { aggregator }
    }

    fn push(&self, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::to_string(&self.aggregator.snapshot()) {
            Ok(json) => ctx.text(json),
            Err(e) => warn!(error = %e, "could not serialize summary"),
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        debug!("monitor websocket connected");
        self.push(ctx);
        ctx.run_interval(PUSH_EVERY, |act, ctx| act.push(ctx));
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(bytes)) => ctx.pong(&bytes),
            Ok(ws::Message::Text(_)) => self.push(ctx),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                warn!(error = %e, "monitor websocket protocol error");
                ctx.stop();
            }
            _ => {}
        }
    }
}

pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    aggregator: web::Data<Aggregator>,
) -> Result<HttpResponse, Error> {
    ws::start(WsSession::new(aggregator.into_inner()), &req, stream)
}

pub async fn metrics_handler(aggregator: web::Data<Aggregator>) -> HttpResponse {
    HttpResponse::Ok().json(aggregator.snapshot())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws", web::get().to(ws_handler))
        .route("/metrics", web::get().to(metrics_handler));
}

/// Starts the monitor on the current actix system and returns a handle to
/// stop it.
pub fn start_monitor(addr: &str, aggregator: Arc<Aggregator>) -> std::io::Result<ServerHandle> {
    let data = web::Data::from(aggregator);
    let server = HttpServer::new(move || App::new().app_data(data.clone()).configure(configure))
        .workers(1)
        .disable_signals()
        .bind(addr)?
        .run();

    info!("monitor listening on http://{addr}/metrics and ws://{addr}/ws");
    let handle = server.handle();
    actix_web::rt::spawn(server);
    Ok(handle)
}
