//! HTTP listener for the configuration portal.
//!
//! Uses `tiny_http`, which works on both host and ESP32 (via std::net).
//! The listener never spawns threads: [`PortalListener::poll`] drains the
//! requests already queued by the server and returns.

use super::{Method, PortalError, PortalListener, PortalRequest, PortalResponse};
use log::{debug, error, info, warn};
use std::io::Read;
use tiny_http::{Header, Response, Server};

/// Upper bound on requests served per poll.
pub const MAX_REQUESTS_PER_POLL: usize = 8;

/// Largest request body read; the rest is ignored.
pub const MAX_BODY_BYTES: u64 = 4096;

struct Running {
    server: Server,
    port: u16,
    content_type: Header,
    allow_origin: Header,
}

/// `tiny_http` based [`PortalListener`].
#[derive(Default)]
pub struct HttpPortal {
    running: Option<Running>,
}

impl HttpPortal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Port of the running listener.
    pub fn port(&self) -> Option<u16> {
        self.running.as_ref().map(|running| running.port)
    }
}

fn header(name: &str, value: &str) -> Result<Header, PortalError> {
    Header::from_bytes(name.as_bytes(), value.as_bytes())
        .map_err(|_| PortalError::Header(name.to_string()))
}

fn method_of(request: &tiny_http::Request) -> Method {
    match request.method() {
        tiny_http::Method::Get => Method::Get,
        tiny_http::Method::Post => Method::Post,
        _ => Method::Other,
    }
}

impl PortalListener for HttpPortal {
    fn start(&mut self, port: u16) -> Result<(), PortalError> {
        self.stop();

        let addr = format!("0.0.0.0:{}", port);
        let server = Server::http(&addr).map_err(|e| PortalError::Bind(e.to_string()))?;
        // Port 0 binds an ephemeral port; report the real one
        let port = server
            .server_addr()
            .to_ip()
            .map(|addr| addr.port())
            .unwrap_or(port);

        info!("Configuration portal listening on http://0.0.0.0:{}/api/info", port);
        self.running = Some(Running {
            server,
            port,
            content_type: header("Content-Type", "application/json")?,
            allow_origin: header("Access-Control-Allow-Origin", "*")?,
        });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.server.unblock();
            info!("Configuration portal on port {} stopped", running.port);
        }
    }

    fn is_running(&self) -> bool {
        self.running.is_some()
    }

    fn poll(&mut self, handler: &mut dyn FnMut(&PortalRequest) -> PortalResponse) -> usize {
        let Some(running) = self.running.as_ref() else {
            return 0;
        };

        let mut served = 0;
        while served < MAX_REQUESTS_PER_POLL {
            let mut request = match running.server.try_recv() {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(e) => {
                    error!("Portal server error: {}", e);
                    break;
                }
            };
            served += 1;

            let mut body = String::new();
            if let Err(e) = request
                .as_reader()
                .take(MAX_BODY_BYTES)
                .read_to_string(&mut body)
            {
                warn!("Failed to read request body: {}", e);
                body.clear();
            }

            let parsed = PortalRequest::from_parts(method_of(&request), request.url(), &body);
            debug!("{} {}", parsed.method(), parsed.path());
            let reply = handler(&parsed);

            let mut response = Response::from_string(reply.body().to_string())
                .with_status_code(reply.status())
                .with_header(running.content_type.clone())
                .with_header(running.allow_origin.clone());
            if let Some(allow) = reply.allow() {
                match header("Allow", allow.as_str()) {
                    Ok(allow) => response = response.with_header(allow),
                    Err(e) => warn!("{}", e),
                }
            }

            if let Err(e) = request.respond(response) {
                warn!("Failed to send response: {}", e);
            }
        }
        served
    }
}

impl Drop for HttpPortal {
    fn drop(&mut self) {
        self.stop();
    }
}
