use rocket::{
    Data, Request, Route,
    fairing::{Fairing, Info, Kind},
    http::{Method, uri::Origin},
    route::{Handler, Outcome},
};

use crate::{
    config::ServerConfig,
    database::FirewallDb,
    firewall::FirewallService,
    logger::*,
    routes::ApiError,
};

/// Internal route the gate reroutes denied requests to. Downstream routing
/// never sees the original request.
const DENIED_URI: &str = "/__firewall/denied";

#[derive(Clone)]
pub struct GateConfig {
    pub trust_proxy_headers: bool,
    pub protected_prefixes: Vec<String>,
}

impl GateConfig {
    pub fn new(trust_proxy_headers: bool, protected_prefixes: &[String]) -> Self {
        let protected_prefixes = protected_prefixes
            .iter()
            .map(|p| p.trim_end_matches('/').to_owned())
            .filter(|p| !p.is_empty())
            .collect();

        Self {
            trust_proxy_headers,
            protected_prefixes,
        }
    }
}

impl From<&ServerConfig> for GateConfig {
    fn from(config: &ServerConfig) -> Self {
        Self::new(config.trust_proxy_headers, &config.protected_prefixes)
    }
}

/// Request fairing enforcing the IP allowlist on the protected path
/// namespaces. Every decision reads the current allowlist from the database,
/// so a revoked address is denied on the very next request.
pub struct AccessGate {
    config: GateConfig,
}

impl AccessGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    /// A path is protected when it equals a configured prefix or continues
    /// it with a '/'. Anything else bypasses the gate entirely.
    fn is_protected(&self, path: &str) -> bool {
        self.config.protected_prefixes.iter().any(|prefix| {
            path.strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }

    /// Claimed client address for this request. With proxy trust on, the
    /// first X-Forwarded-For entry wins; the value is left unvalidated here
    /// since the allowlist check fails closed on garbage anyway.
    fn resolve_client_ip(&self, request: &Request<'_>) -> Option<String> {
        if self.config.trust_proxy_headers
            && let Some(forwarded) = request.headers().get_one("x-forwarded-for")
        {
            let first = forwarded.split(',').next().unwrap_or_default().trim();
            if !first.is_empty() {
                return Some(first.to_owned());
            }
        }

        request.remote().map(|addr| addr.ip().to_string())
    }
}

#[rocket::async_trait]
impl Fairing for AccessGate {
    fn info(&self) -> Info {
        Info {
            name: "API firewall gate",
            kind: Kind::Request,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _data: &mut Data<'_>) {
        let path = request.uri().path().as_str().to_owned();

        if !self.is_protected(&path) {
            return;
        }

        let client_ip = self.resolve_client_ip(request);

        // the db guard is scoped to the check and released before the
        // request is forwarded anywhere
        let allowed = match FirewallDb::get_one(request.rocket()).await {
            Ok(db) => {
                let service = FirewallService::new(db);

                match service.is_ip_allowed(client_ip.as_deref()).await {
                    Ok(allowed) => allowed,
                    Err(err) => {
                        // fail closed on storage faults
                        warn!("firewall check failed, denying request to {path}: {err}");
                        false
                    }
                }
            }

            Err(status) => {
                warn!("firewall database unavailable ({status}), denying request to {path}");
                false
            }
        };

        if !allowed {
            let ip = client_ip.as_deref().unwrap_or("<unknown>");
            warn!("[{ip}] blocking request to {path}");

            request.set_uri(Origin::parse(DENIED_URI).expect("static uri should parse"));
        }
    }
}

#[derive(Clone)]
struct DeniedHandler;

#[rocket::async_trait]
impl Handler for DeniedHandler {
    async fn handle<'r>(&self, request: &'r Request<'_>, _data: Data<'r>) -> Outcome<'r> {
        let error = ApiError::forbidden("ip_forbidden", "Access denied for client IP")
            .with_error_type("access_error");

        Outcome::from(request, error)
    }
}

/// Rejection routes answering [`DENIED_URI`] for every method the gate can
/// reroute. HEAD is served through the GET route by rocket itself.
pub fn denied_routes() -> Vec<Route> {
    [
        Method::Get,
        Method::Post,
        Method::Put,
        Method::Delete,
        Method::Patch,
        Method::Options,
    ]
    .map(|method| Route::new(method, DENIED_URI, DeniedHandler))
    .to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(prefixes: &[&str]) -> AccessGate {
        let prefixes: Vec<String> = prefixes.iter().map(|p| (*p).to_owned()).collect();
        AccessGate::new(GateConfig::new(false, &prefixes))
    }

    #[test]
    fn protection_matches_prefix_boundaries() {
        let gate = gate(&["/v1", "/backend-api/codex"]);

        assert!(gate.is_protected("/v1"));
        assert!(gate.is_protected("/v1/chat/completions"));
        assert!(gate.is_protected("/backend-api/codex"));
        assert!(gate.is_protected("/backend-api/codex/session"));

        assert!(!gate.is_protected("/v10"));
        assert!(!gate.is_protected("/v1abc"));
        assert!(!gate.is_protected("/backend-api"));
        assert!(!gate.is_protected("/api/firewall/ips"));
        assert!(!gate.is_protected("/"));
    }

    #[test]
    fn trailing_slash_in_config_is_tolerated() {
        let gate = gate(&["/v1/"]);

        assert!(gate.is_protected("/v1"));
        assert!(gate.is_protected("/v1/models"));
        assert!(!gate.is_protected("/v1x"));
    }
}
