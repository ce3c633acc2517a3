//! Configuration portal HTTP surface.
//!
//! The portal is only reachable in configuration mode. A [`PortalListener`]
//! accepts HTTP requests and hands each one, parsed into a
//! [`PortalRequest`], to a handler that returns a JSON [`PortalResponse`].
//! The handlers themselves live with the orchestrator; this module owns the
//! wire types, the route table ([`routes`]) and the `tiny_http` listener
//! ([`HttpPortal`]).
//!
//! # Example
//!
//! ```
//! use esp_config_wizard::portal::{Method, PortalRequest};
//!
//! let request = PortalRequest::from_parts(
//!     Method::Post,
//!     "/api/wifi/connect?ssid=Home+Net",
//!     "password=p%40ss",
//! );
//! assert_eq!(request.path(), "/api/wifi/connect");
//! assert_eq!(request.param("ssid"), Some("Home Net"));
//! assert_eq!(request.param("password"), Some("p@ss"));
//! ```

pub mod routes;
mod server;

pub use routes::{resolve, Endpoint, Route, RouteError, ROUTES};
pub use server::{HttpPortal, MAX_BODY_BYTES, MAX_REQUESTS_PER_POLL};

use serde_json::{json, Value};
use std::fmt;

/// Default portal port.
pub const DEFAULT_PORTAL_PORT: u16 = 80;

/// HTTP method, reduced to what the portal distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Other => "OTHER",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed portal request.
///
/// Parameters come from the query string followed by a URL-encoded body.
/// When a name appears more than once the first occurrence wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalRequest {
    method: Method,
    path: String,
    params: Vec<(String, String)>,
}

impl PortalRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    /// Add a parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Build a request from a raw URL (path plus optional query) and a
    /// URL-encoded body.
    pub fn from_parts(method: Method, url: &str, body: &str) -> Self {
        let (path, query) = url.split_once('?').unwrap_or((url, ""));
        let mut request = Self::new(method, path);
        parse_form(query, &mut request.params);
        parse_form(body, &mut request.params);
        request
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// First value of parameter `name`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

fn parse_form(input: &str, params: &mut Vec<(String, String)>) {
    for pair in input.split('&').filter(|pair| !pair.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.push((decode_component(name), decode_component(value)));
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

/// A JSON portal response.
#[derive(Debug, Clone, PartialEq)]
pub struct PortalResponse {
    status: u16,
    body: Value,
    allow: Option<Method>,
}

impl PortalResponse {
    /// 200 with `body`.
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            body,
            allow: None,
        }
    }

    /// 200 with `{"success": success}`.
    pub fn success(success: bool) -> Self {
        Self::ok(json!({ "success": success }))
    }

    /// 200 with `{"success": false, "msg": msg}`.
    pub fn failure(msg: impl Into<String>) -> Self {
        Self::ok(json!({ "success": false, "msg": msg.into() }))
    }

    /// 400 for a malformed request.
    pub fn bad_request() -> Self {
        Self {
            status: 400,
            body: json!({ "success": false }),
            allow: None,
        }
    }

    /// 404 for an unknown path.
    pub fn not_found() -> Self {
        Self {
            status: 404,
            body: json!({ "success": false, "msg": "not found" }),
            allow: None,
        }
    }

    /// 405 for a known path requested with the wrong method.
    pub fn method_not_allowed(allow: Method) -> Self {
        Self {
            status: 405,
            body: json!({ "success": false, "msg": "method not allowed" }),
            allow: Some(allow),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Method to advertise in an `Allow` header.
    pub fn allow(&self) -> Option<Method> {
        self.allow
    }

    /// Whether the body reports `"success": true`.
    pub fn is_success(&self) -> bool {
        self.body["success"] == Value::Bool(true)
    }
}

/// Portal listener errors.
#[derive(Debug)]
pub enum PortalError {
    /// Could not bind the listening socket.
    Bind(String),
    /// A response header could not be built.
    Header(String),
}

impl fmt::Display for PortalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind(msg) => write!(f, "cannot bind portal: {}", msg),
            Self::Header(name) => write!(f, "invalid header: {}", name),
        }
    }
}

impl std::error::Error for PortalError {}

/// Source of portal requests.
pub trait PortalListener {
    /// Start listening on `port`. A running listener is restarted.
    fn start(&mut self, port: u16) -> Result<(), PortalError>;

    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Serve the requests that are already waiting, without blocking.
    ///
    /// Returns the number of requests served.
    fn poll(&mut self, handler: &mut dyn FnMut(&PortalRequest) -> PortalResponse) -> usize;
}
