// src/server/http.rs

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::Request;
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use super::reload::client_script;

/// Path of the live-reload client script.
pub const RELOAD_SCRIPT_PATH: &str = "/__assetdag/reload.js";

/// Largest HTML page the reload script is injected into.
const MAX_HTML_BYTES: usize = 16 * 1024 * 1024;

/// Static file router over the output tree, plus the reload client.
///
/// HTML pages get a `<script>` tag for the reload client before `</body>`.
pub fn router(output: PathBuf, reload_port: u16, cors: bool) -> Router {
    let script = client_script(reload_port);

    let router = Router::new()
        .route(
            RELOAD_SCRIPT_PATH,
            get(move || {
                let script = script.clone();
                async move { ([(header::CONTENT_TYPE, "application/javascript")], script) }
            }),
        )
        // the output tree with generated assets
        .fallback_service(ServeDir::new(output))
        .layer(middleware::from_fn(inject_reload_script));

    if cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

async fn inject_reload_script(request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    if response.status() != StatusCode::OK || !is_html(&response) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_HTML_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "failed to read HTML response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let html = with_reload_tag(&String::from_utf8_lossy(&bytes));
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(html))
}

fn is_html(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/html"))
}

/// Insert the reload `<script>` before the last `</body>`, or append it.
fn with_reload_tag(html: &str) -> String {
    let tag = format!("<script src=\"{RELOAD_SCRIPT_PATH}\"></script>");
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(at) => format!("{}{tag}{}", &html[..at], &html[at..]),
        None => format!("{html}{tag}"),
    }
}

/// Serve `output` on `127.0.0.1:port` until the task is dropped.
pub async fn serve(output: PathBuf, port: u16, reload_port: u16, cors: bool) -> anyhow::Result<()> {
    let address = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(address).await?;

    info!(url = %format!("http://localhost:{port}/"), output = %output.display(), "starting HTTP server");

    axum::serve(listener, router(output, reload_port, cors)).await?;

    Ok(())
}
