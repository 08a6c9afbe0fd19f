// src/server/mod.rs

//! Dev server: static files over the output tree and live reload.

pub mod http;
pub mod reload;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::error;

use crate::completion::ReloadSink;
use crate::config::ConfigFile;
use crate::errors::Result;

pub use reload::{ReloadServer, client_script};

/// Both halves of the dev server, started together.
#[derive(Debug)]
pub struct DevServer {
    pub reload: Arc<ReloadServer>,
    pub http: JoinHandle<()>,
}

impl DevServer {
    /// Start the reload transport (its own threads) and the HTTP server (a
    /// task on the current runtime).
    pub fn start(cfg: &ConfigFile) -> Result<Self> {
        let server = cfg.server();
        let reload = Arc::new(ReloadServer::start(server.reload_port)?);

        let output = cfg.output_dir();
        let (port, reload_port, cors) = (server.port, reload.port(), server.cors);
        let http = tokio::spawn(async move {
            if let Err(err) = http::serve(output, port, reload_port, cors).await {
                error!(error = %err, "HTTP server stopped");
            }
        });

        Ok(Self { reload, http })
    }

    /// Sink for the completion notifier.
    pub fn sink(&self) -> Arc<dyn ReloadSink> {
        self.reload.clone()
    }
}

impl Drop for DevServer {
    fn drop(&mut self) {
        self.http.abort();
    }
}
