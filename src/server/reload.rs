// src/server/reload.rs

//! WebSocket live-reload transport.
//!
//! Two plain threads, as the protocol is tiny: one accepts browser
//! connections, the other broadcasts each reload signal as JSON to every
//! connected client.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};
use tungstenite::{Message, WebSocket};

use crate::completion::{ReloadSignal, ReloadSink};
use crate::errors::Result;

/// Connections kept open at most; older tabs are closed first.
const MAX_CLIENTS: usize = 10;

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// Running reload transport. Implements [`ReloadSink`] so the completion
/// notifier can feed it directly.
pub struct ReloadServer {
    addr: SocketAddr,
    clients: Clients,
    tx: Sender<String>,
    _threads: (JoinHandle<()>, JoinHandle<()>),
}

impl std::fmt::Debug for ReloadServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadServer")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl ReloadServer {
    /// Bind `127.0.0.1:port` (0 picks a free port) and start both threads.
    pub fn start(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        let addr = listener.local_addr()?;
        let clients: Clients = Arc::new(Mutex::new(Vec::new()));

        let incoming = new_thread_ws_incoming(listener, Arc::clone(&clients));
        let (tx, broadcast) = new_thread_ws_reload(Arc::clone(&clients));

        info!(%addr, "live-reload server listening");
        Ok(Self {
            addr,
            clients,
            tx,
            _threads: (incoming, broadcast),
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Number of connected browsers.
    pub fn client_count(&self) -> usize {
        lock(&self.clients).len()
    }
}

impl ReloadSink for ReloadServer {
    fn send(&self, signal: ReloadSignal) {
        match serde_json::to_string(&signal) {
            Ok(payload) => {
                if self.tx.send(payload).is_err() {
                    warn!("live-reload broadcaster stopped");
                }
            }
            Err(err) => error!(error = %err, "cannot encode reload signal"),
        }
    }
}

fn lock(clients: &Clients) -> MutexGuard<'_, Vec<WebSocket<TcpStream>>> {
    clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
    thread::spawn(move || {
        for stream in server.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(error = %err, "live-reload accept failed");
                    continue;
                }
            };
            match tungstenite::accept(stream) {
                Ok(socket) => {
                    debug!("live-reload client connected");
                    lock(&clients).push(socket);
                }
                Err(err) => warn!(error = %err, "live-reload handshake failed"),
            }
        }
    })
}

fn new_thread_ws_reload(clients: Clients) -> (Sender<String>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel::<String>();

    let thread = thread::spawn(move || {
        while let Ok(payload) = rx.recv() {
            let mut clients = lock(&clients);
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send(Message::text(payload.clone())) {
                    Ok(_) => {}
                    Err(tungstenite::Error::Io(e))
                        if matches!(e.kind(), ErrorKind::BrokenPipe | ErrorKind::ConnectionReset) =>
                    {
                        broken.push(i);
                    }
                    Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                        broken.push(i);
                    }
                    Err(e) => {
                        error!(error = ?e, "live-reload send failed");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            let len = clients.len();
            if len > MAX_CLIENTS {
                for mut socket in clients.drain(0..len - MAX_CLIENTS) {
                    socket.close(None).ok();
                }
            }

            debug!(clients = clients.len(), %payload, "broadcast reload");
        }
    });

    (tx, thread)
}

/// Browser side of the transport, served at `/__assetdag/reload.js`.
///
/// Style signals re-fetch stylesheets in place; everything else reloads.
pub fn client_script(reload_port: u16) -> String {
    CLIENT_SCRIPT.replace("__RELOAD_PORT__", &reload_port.to_string())
}

const CLIENT_SCRIPT: &str = r#"(function () {
  const socket = new WebSocket("ws://" + location.hostname + ":__RELOAD_PORT__");
  socket.addEventListener("message", event => {
    const signal = JSON.parse(event.data);
    if (signal.scope === "style") {
      for (const link of document.querySelectorAll('link[rel="stylesheet"]')) {
        const url = new URL(link.href);
        url.searchParams.set("assetdag", Date.now());
        link.href = url.toString();
      }
      return;
    }
    window.location.reload();
  });
})();
"#;

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::types::ArtifactClass;

    #[test]
    fn client_script_targets_reload_port() {
        let script = client_script(35729);
        assert!(script.contains(":35729\""));
        assert!(!script.contains("__RELOAD_PORT__"));
    }

    #[test]
    fn broadcasts_json_signal_to_connected_client() {
        let server = ReloadServer::start(0).unwrap();
        let url = format!("ws://127.0.0.1:{}", server.port());
        let (mut client, _) = tungstenite::connect(url).unwrap();

        let start = Instant::now();
        while server.client_count() == 0 {
            assert!(start.elapsed() < Duration::from_secs(5), "client never registered");
            thread::sleep(Duration::from_millis(10));
        }

        ReloadSink::send(
            &server,
            ReloadSignal {
                scope: ArtifactClass::Style,
                path: Some("scss/main.scss".into()),
            },
        );

        let message = client.read().unwrap();
        assert_eq!(
            message.into_text().unwrap().as_str(),
            r#"{"scope":"style","path":"scss/main.scss"}"#
        );
    }
}
