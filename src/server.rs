//! Native host: actix-web in front of the transport-neutral handlers.

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use tracing_subscriber::EnvFilter;

use crate::context::AppContext;
use crate::core::helpers::{Request, Response};
use crate::handlers;

mod adapter {
    use super::*;

    pub fn actix_to_http_request(req: &HttpRequest, body: web::Bytes) -> anyhow::Result<Request> {
        let mut builder = http::Request::builder()
            .method(req.method().as_str())
            .uri(req.uri().to_string());

        for (name, value) in req.headers() {
            builder = builder.header(name.as_str(), value.as_bytes());
        }

        builder
            .body(body.to_vec())
            .map_err(|e| anyhow::anyhow!("Invalid request: {}", e))
    }

    pub fn http_to_actix_response(resp: Response) -> HttpResponse {
        let status = actix_web::http::StatusCode::from_u16(resp.status().as_u16())
            .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);

        let mut response = HttpResponse::build(status);
        for (name, value) in resp.headers() {
            if let Ok(value) = value.to_str() {
                response.append_header((name.as_str(), value));
            }
        }
        response.body(resp.into_body())
    }
}

/// Every route goes through [`handlers::handle`]; actix only carries bytes.
pub async fn handle_all(app: web::Data<AppContext>, req: HttpRequest, body: web::Bytes) -> HttpResponse {
    let request = match adapter::actix_to_http_request(&req, body) {
        Ok(r) => r,
        Err(err) => {
            tracing::debug!(error = %err, "unreadable request");
            return HttpResponse::BadRequest().body("Invalid request");
        }
    };

    // Password hashing and store access are blocking.
    let app = app.into_inner();
    match web::block(move || handlers::handle(&app, request)).await {
        Ok(resp) => adapter::http_to_actix_response(resp),
        Err(err) => {
            tracing::error!(error = %err, "handler panicked");
            HttpResponse::InternalServerError().body("Internal server error")
        }
    }
}

pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(err) = result {
        eprintln!("tracing already initialized: {}", err);
    }
}

pub async fn run(app: AppContext) -> std::io::Result<()> {
    let bind_addr = app.settings.bind_addr.clone();
    let app = web::Data::new(app);
    tracing::info!(%bind_addr, "server listening");

    HttpServer::new(move || {
        App::new()
            .wrap(tracing_actix_web::TracingLogger::default())
            .app_data(app.clone())
            .default_service(web::route().to(handle_all))
    })
    .bind(bind_addr)?
    .run()
    .await
}
