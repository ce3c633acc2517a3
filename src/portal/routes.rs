//! Portal route table.

use super::Method;

/// A portal API endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    WifiScan,
    WifiScanCount,
    WifiScanItem,
    WifiConnect,
    WifiInfo,
    NtpInfo,
    NtpSet,
    MqttConnect,
    MqttInfo,
    OptionCount,
    OptionGet,
    OptionSet,
    Info,
    Commit,
}

/// One entry of the route table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub path: &'static str,
    pub method: Method,
    pub endpoint: Endpoint,
}

const fn route(path: &'static str, method: Method, endpoint: Endpoint) -> Route {
    Route {
        path,
        method,
        endpoint,
    }
}

/// Every route the portal publishes.
pub const ROUTES: &[Route] = &[
    route("/api/wifi/scan", Method::Get, Endpoint::WifiScan),
    route("/api/wifi/scan/count", Method::Get, Endpoint::WifiScanCount),
    route("/api/wifi/scan/item", Method::Get, Endpoint::WifiScanItem),
    route("/api/wifi/connect", Method::Post, Endpoint::WifiConnect),
    route("/api/wifi/info", Method::Get, Endpoint::WifiInfo),
    route("/api/ntp/info", Method::Get, Endpoint::NtpInfo),
    route("/api/ntp/set", Method::Post, Endpoint::NtpSet),
    route("/api/mqtt/connect", Method::Post, Endpoint::MqttConnect),
    route("/api/mqtt/info", Method::Get, Endpoint::MqttInfo),
    route("/api/option/count", Method::Get, Endpoint::OptionCount),
    route("/api/option/get", Method::Get, Endpoint::OptionGet),
    route("/api/option/set", Method::Post, Endpoint::OptionSet),
    route("/api/info", Method::Get, Endpoint::Info),
    route("/api/commit", Method::Get, Endpoint::Commit),
];

/// Why a request matched no route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteError {
    NotFound,
    /// The path exists but only for `allow`.
    MethodNotAllowed { allow: Method },
}

/// Find the endpoint for `method` and `path`. A trailing slash is ignored.
pub fn resolve(method: Method, path: &str) -> Result<Endpoint, RouteError> {
    let path = match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };
    let route = ROUTES
        .iter()
        .find(|route| route.path == path)
        .ok_or(RouteError::NotFound)?;
    if route.method != method {
        return Err(RouteError::MethodNotAllowed {
            allow: route.method,
        });
    }
    Ok(route.endpoint)
}
