pub mod auth;
pub mod config;
pub mod context;
pub mod core;
pub mod follow;
pub mod forms;
pub mod groups;
pub mod handlers;
pub mod models;
pub mod posts;
pub mod seed;
pub mod static_server;
pub mod templates;
pub mod users;

#[cfg(not(target_arch = "wasm32"))]
pub mod server;

pub use crate::config::Settings;
pub use crate::context::AppContext;
pub use crate::handlers::handle;

// === Component entrypoint ===
#[cfg(target_arch = "wasm32")]
mod component {
    use spin_sdk::http::{IntoResponse, Request, Response};
    use spin_sdk::http_component;
    use std::sync::Arc;

    use crate::config::Settings;
    use crate::context::AppContext;
    use crate::core::db::{Db, SpinBackend};

    fn to_http_request(req: &Request) -> anyhow::Result<crate::core::helpers::Request> {
        let mut builder = http::Request::builder()
            .method(req.method().to_string().as_str())
            .uri(req.path_and_query().unwrap_or("/"));
        for (name, value) in req.headers() {
            builder = builder.header(name, value.as_bytes());
        }
        builder
            .body(req.body().to_vec())
            .map_err(|e| anyhow::anyhow!("Invalid request: {}", e))
    }

    fn to_spin_response(resp: crate::core::helpers::Response) -> Response {
        let mut builder = Response::builder();
        builder.status(resp.status().as_u16());
        for (name, value) in resp.headers() {
            if let Ok(value) = value.to_str() {
                builder.header(name.as_str(), value);
            }
        }
        builder.body(resp.into_body()).build()
    }

    #[http_component]
    fn handle(req: Request) -> anyhow::Result<impl IntoResponse> {
        let settings = Settings::from_env().unwrap_or_default();
        let app = AppContext::new(Db::new(Arc::new(SpinBackend)), settings);
        if app.settings.seed_demo_data {
            if let Err(err) = crate::seed::seed_demo_data(&app) {
                tracing::warn!(error = %err, "demo data not seeded");
            }
        }

        let resp = crate::handlers::handle(&app, to_http_request(&req)?);
        Ok(to_spin_response(resp))
    }
}
