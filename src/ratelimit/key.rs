//! Rate limit key derivation
//!
//! A key is `ip[:user][:api-key][:path][:method]`; components that are not
//! configured or not present are left out rather than producing empty
//! segments.

use std::net::IpAddr;

use axum::http::{HeaderMap, Method};
use serde_json::Value;

use crate::config::RateLimitSettings;

/// Fallback when neither a trusted header nor a peer address is known
pub const UNKNOWN_CLIENT: &str = "unknown";

/// The request facts the limiter looks at
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    /// Peer address of the connection
    pub remote_addr: Option<IpAddr>,
    /// Identity attached by an upstream auth layer
    pub identity: Option<Value>,
}

impl RequestMeta {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            headers: HeaderMap::new(),
            remote_addr: None,
            identity: None,
        }
    }

    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn with_identity(mut self, identity: Value) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Builds limiter keys from request metadata
#[derive(Debug, Clone, Default)]
pub struct KeyGenerator {
    trusted_ip_header: Option<String>,
    user_id_path: Option<String>,
    api_key_header: Option<String>,
    include_path: bool,
    include_method: bool,
}

impl KeyGenerator {
    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self {
            trusted_ip_header: settings.trusted_ip_header.as_deref().map(str::to_ascii_lowercase),
            user_id_path: settings.user_id_path.clone(),
            api_key_header: settings.api_key_header.as_deref().map(str::to_ascii_lowercase),
            include_path: settings.include_path,
            include_method: settings.include_method,
        }
    }

    /// Client address: first entry of the trusted header, else the peer
    pub fn client_ip(&self, req: &RequestMeta) -> String {
        self.trusted_ip_header
            .as_deref()
            .and_then(|name| req.headers.get(name))
            .and_then(|v| v.to_str().ok())
            .and_then(|chain| chain.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string)
            .or_else(|| req.remote_addr.map(|a| a.to_string()))
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }

    /// User id at the configured dotted path, if it is a primitive
    pub fn user_id(&self, req: &RequestMeta) -> Option<String> {
        let path = self.user_id_path.as_deref()?;
        let identity = req.identity.as_ref()?;
        lookup_primitive(identity, path)
    }

    pub fn api_key(&self, req: &RequestMeta) -> Option<String> {
        let name = self.api_key_header.as_deref()?;
        req.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
    }

    pub fn generate(&self, req: &RequestMeta) -> String {
        let mut parts = vec![self.client_ip(req)];
        parts.extend(self.user_id(req));
        parts.extend(self.api_key(req));
        if self.include_path {
            parts.push(req.path.clone());
        }
        if self.include_method {
            parts.push(req.method.as_str().to_string());
        }
        parts.join(":")
    }
}

/// Walk `a.b.0.c` through objects and arrays; only strings, numbers and
/// booleans count.
fn lookup_primitive(root: &Value, path: &str) -> Option<String> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    match current {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
