use std::collections::HashMap;

/// A registered handler is opaque to the router — callers look it up by
/// pattern and dispatch however they like.
pub type HandlerId = u64;

#[derive(Debug, Clone)]
struct Entry {
    id: HandlerId,
    redirect_from_bare: bool,
}

/// Longest-prefix pattern mux (§4.10). Vhost-scoped patterns (the pattern's
/// first path segment names a `Host:` value) take precedence over generic
/// ones for requests whose host matches.
#[derive(Default)]
pub struct Router {
    generic: HashMap<String, Entry>,
    vhost_scoped: HashMap<String, HashMap<String, Entry>>,
    next_id: HandlerId,
}

/// Outcome of a route lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMatch {
    Handler(HandlerId),
    /// Matched a pattern ending in `/` via its bare (no trailing slash) form.
    RedirectToSlash,
    NotFound,
}

impl Router {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `pattern`. A pattern ending in `/` implies
    /// an implicit permanent-redirect from the same pattern without the
    /// trailing slash.
    pub fn handle(&mut self, pattern: &str) -> HandlerId {
        let id = self.next_id;
        self.next_id += 1;
        self.generic.insert(
            pattern.to_string(),
            Entry {
                id,
                redirect_from_bare: pattern.ends_with('/'),
            },
        );
        id
    }

    /// Registers `handler` under `pattern`, scoped to requests whose
    /// `Host:` header equals `host`.
    pub fn handle_for_host(&mut self, host: &str, pattern: &str) -> HandlerId {
        let id = self.next_id;
        self.next_id += 1;
        self.vhost_scoped
            .entry(host.to_string())
            .or_default()
            .insert(
                pattern.to_string(),
                Entry {
                    id,
                    redirect_from_bare: pattern.ends_with('/'),
                },
            );
        id
    }

    /// Resolves `path` for the given `host`, applying match precedence:
    /// vhost-scoped exact, vhost-scoped longest-prefix, generic exact,
    /// generic longest-prefix, bare-form redirect, not found.
    #[must_use]
    pub fn route(&self, host: &str, path: &str) -> RouteMatch {
        if let Some(table) = self.vhost_scoped.get(host) {
            if let Some(m) = Self::match_table(table, path) {
                return m;
            }
        }
        Self::match_table(&self.generic, path).unwrap_or(RouteMatch::NotFound)
    }

    fn match_table(table: &HashMap<String, Entry>, path: &str) -> Option<RouteMatch> {
        if let Some(e) = table.get(path) {
            return Some(RouteMatch::Handler(e.id));
        }
        let mut best: Option<(&str, &Entry)> = None;
        for (pattern, entry) in table {
            if pattern.ends_with('/') && path.starts_with(pattern.as_str()) {
                if best.is_none_or(|(b, _)| pattern.len() > b.len()) {
                    best = Some((pattern.as_str(), entry));
                }
            }
        }
        if let Some((_, entry)) = best {
            return Some(RouteMatch::Handler(entry.id));
        }
        // Bare-form redirect: pattern "foo/" registered, request for "foo".
        for (pattern, entry) in table {
            if entry.redirect_from_bare {
                let bare = pattern.trim_end_matches('/');
                if bare == path {
                    return Some(RouteMatch::RedirectToSlash);
                }
            }
        }
        None
    }
}

/// CORS response headers, applied by the wrapping middleware for any
/// request carrying an `Origin` header, or replacing the whole response on
/// `OPTIONS` preflight.
#[must_use]
pub fn cors_headers() -> Vec<(&'static str, &'static str)> {
    vec![
        ("Access-Control-Allow-Origin", "*"),
        (
            "Access-Control-Allow-Methods",
            "GET, POST, HEAD, OPTIONS, PUT, DELETE",
        ),
        ("Access-Control-Allow-Headers", "*"),
    ]
}

/// Whether a request method/headers combination is a CORS preflight that
/// should short-circuit with a 200 instead of reaching the handler.
#[must_use]
pub fn is_cors_preflight(method: &str) -> bool {
    method.eq_ignore_ascii_case("OPTIONS")
}

/// Result of basic-auth enforcement on an `/api/` path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Allowed,
    Unauthorized,
}

/// Applies basic-auth only to `/api/` paths (§4.10); every other path is
/// always `Allowed`.
#[must_use]
pub fn check_basic_auth(path: &str, header: Option<&str>, user: &str, pass: &str) -> AuthOutcome {
    if !path.starts_with("/api/") {
        return AuthOutcome::Allowed;
    }
    let Some(header) = header else {
        return AuthOutcome::Unauthorized;
    };
    let Some(b64) = header.strip_prefix("Basic ") else {
        return AuthOutcome::Unauthorized;
    };
    let Some(decoded) = decode_base64(b64) else {
        return AuthOutcome::Unauthorized;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return AuthOutcome::Unauthorized;
    };
    match decoded.split_once(':') {
        Some((u, p)) if u == user && p == pass => AuthOutcome::Allowed,
        _ => AuthOutcome::Unauthorized,
    }
}

/// Minimal base64 decoder (standard alphabet, `=` padding) — basic-auth is
/// the only consumer, so this avoids pulling in a dedicated crate for one
/// call site.
fn decode_base64(input: &str) -> Option<Vec<u8>> {
    fn val(c: u8) -> Option<u8> {
        match c {
            b'A'..=b'Z' => Some(c - b'A'),
            b'a'..=b'z' => Some(c - b'a' + 26),
            b'0'..=b'9' => Some(c - b'0' + 52),
            b'+' => Some(62),
            b'/' => Some(63),
            _ => None,
        }
    }
    let bytes: Vec<u8> = input.bytes().filter(|&b| b != b'=').collect();
    let mut out = Vec::with_capacity(bytes.len() * 3 / 4);
    for chunk in bytes.chunks(4) {
        let vals: Vec<u8> = chunk.iter().map(|&b| val(b)).collect::<Option<_>>()?;
        match vals.len() {
            4 => {
                out.push((vals[0] << 2) | (vals[1] >> 4));
                out.push((vals[1] << 4) | (vals[2] >> 2));
                out.push((vals[2] << 6) | vals[3]);
            }
            3 => {
                out.push((vals[0] << 2) | (vals[1] >> 4));
                out.push((vals[1] << 4) | (vals[2] >> 2));
            }
            2 => {
                out.push((vals[0] << 2) | (vals[1] >> 4));
            }
            _ => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_wins_over_prefix() {
        let mut r = Router::new();
        let exact = r.handle("/live/stream.flv");
        let _prefix = r.handle("/live/");
        assert_eq!(
            r.route("any", "/live/stream.flv"),
            RouteMatch::Handler(exact)
        );
    }

    #[test]
    fn longest_prefix_wins() {
        let mut r = Router::new();
        let _short = r.handle("/");
        let long = r.handle("/api/v1/");
        assert_eq!(
            r.route("any", "/api/v1/clusters"),
            RouteMatch::Handler(long)
        );
    }

    #[test]
    fn trailing_slash_pattern_redirects_bare_request() {
        let mut r = Router::new();
        r.handle("/console/");
        assert_eq!(r.route("any", "/console"), RouteMatch::RedirectToSlash);
    }

    #[test]
    fn vhost_scoped_overrides_generic_for_matching_host() {
        let mut r = Router::new();
        let generic = r.handle("/live/stream.flv");
        let scoped = r.handle_for_host("vhost1.example.com", "/live/stream.flv");
        assert_eq!(
            r.route("vhost1.example.com", "/live/stream.flv"),
            RouteMatch::Handler(scoped)
        );
        assert_eq!(
            r.route("other.example.com", "/live/stream.flv"),
            RouteMatch::Handler(generic)
        );
    }

    #[test]
    fn unmatched_path_is_not_found() {
        let r = Router::new();
        assert_eq!(r.route("any", "/nope"), RouteMatch::NotFound);
    }

    #[test]
    fn basic_auth_rejects_missing_header_only_on_api_paths() {
        assert_eq!(
            check_basic_auth("/live/stream.flv", None, "u", "p"),
            AuthOutcome::Allowed
        );
        assert_eq!(
            check_basic_auth("/api/v1/streams", None, "u", "p"),
            AuthOutcome::Unauthorized
        );
    }

    #[test]
    fn basic_auth_accepts_correct_credentials() {
        // base64("admin:secret")
        let header = "Basic YWRtaW46c2VjcmV0";
        assert_eq!(
            check_basic_auth("/api/v1/streams", Some(header), "admin", "secret"),
            AuthOutcome::Allowed
        );
    }

    #[test]
    fn basic_auth_rejects_wrong_password() {
        let header = "Basic YWRtaW46c2VjcmV0"; // admin:secret
        assert_eq!(
            check_basic_auth("/api/v1/streams", Some(header), "admin", "wrong"),
            AuthOutcome::Unauthorized
        );
    }

    #[test]
    fn preflight_detection() {
        assert!(is_cors_preflight("OPTIONS"));
        assert!(!is_cors_preflight("GET"));
    }
}
