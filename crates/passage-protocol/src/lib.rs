//! The wire protocol: request building and response classification.
//!
//! Everything here is pure: building a [`ProtocolRequest`] never touches a
//! socket, and [`classify`] maps a delivered [`RawResponse`] onto the
//! engine's decision space. The actual exchange happens behind the
//! engine's transport seam.
//!
//! Request headers encode three facts: "this is a protocol request", the
//! client's last-known asset version, and (for partial reloads) the
//! target component plus the `only`/`except`/`reset` prop lists in
//! dot-path notation.

pub mod headers;
mod query;

use passage_error::{PassageError, Result};
use passage_types::intent::{Method, VisitIntent};
use passage_types::page::Page;
use serde_json::{Map, Value};
use tracing::debug;

pub use crate::query::append_query;

// ---------------------------------------------------------------------------
// Request/response shapes
// ---------------------------------------------------------------------------

/// One outgoing protocol request, ready for the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolRequest {
    pub url: String,
    pub method: Method,
    /// Header names are lower-case.
    pub headers: Vec<(String, String)>,
    /// JSON body for mutation methods; GET data folds into the URL.
    pub body: Option<String>,
}

impl ProtocolRequest {
    /// First value of a (lower-case) header name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// One delivered response, as the transport saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    /// Header names are lower-case.
    pub headers: Vec<(String, String)>,
    /// The effective URL after any hops the transport followed itself.
    pub url: String,
    pub body: String,
}

impl RawResponse {
    /// First value of a (lower-case) header name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn is_marked(&self) -> bool {
        self.header(headers::MARKER)
            .is_some_and(|value| value.eq_ignore_ascii_case("true"))
    }
}

// ---------------------------------------------------------------------------
// Request building
// ---------------------------------------------------------------------------

/// Build the protocol request for an intent.
///
/// `current` supplies the partial-reload target component and the known
/// asset version.
#[must_use]
pub fn build_request(intent: &VisitIntent, current: &Page) -> ProtocolRequest {
    let mut request_headers = vec![(headers::MARKER.to_owned(), "true".to_owned())];

    if let Some(version) = &current.version {
        request_headers.push((headers::VERSION.to_owned(), version.clone()));
    }
    if intent.is_partial() {
        request_headers.push((
            headers::PARTIAL_COMPONENT.to_owned(),
            current.component.clone(),
        ));
        if !intent.only.is_empty() {
            request_headers.push((headers::PARTIAL_ONLY.to_owned(), join_paths(&intent.only)));
        }
        if !intent.except.is_empty() {
            request_headers.push((
                headers::PARTIAL_EXCEPT.to_owned(),
                join_paths(&intent.except),
            ));
        }
    }
    if !intent.reset.is_empty() {
        request_headers.push((headers::RESET.to_owned(), join_paths(&intent.reset)));
    }
    if let Some(bag) = &intent.error_bag {
        request_headers.push((headers::ERROR_BAG.to_owned(), bag.clone()));
    }
    for (name, value) in &intent.headers {
        request_headers.push((name.to_ascii_lowercase(), value.clone()));
    }

    let (url, body) = match (&intent.data, intent.method) {
        (Some(data), Method::Get) => (append_query(&intent.url, data), None),
        (Some(data), _) => {
            request_headers.push(("content-type".to_owned(), "application/json".to_owned()));
            (intent.url.clone(), Some(data.to_string()))
        }
        (None, _) => (intent.url.clone(), None),
    };

    ProtocolRequest {
        url,
        method: intent.method,
        headers: request_headers,
        body,
    }
}

fn join_paths(paths: &[passage_types::path::PropPath]) -> String {
    paths
        .iter()
        .map(passage_types::path::PropPath::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

// ---------------------------------------------------------------------------
// Response classification
// ---------------------------------------------------------------------------

/// What a delivered response means for the visit.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// A protocol page; apply it (422 pages carry `props.errors`).
    Page(Box<Page>),
    /// A bare validation map (422 without the page shape); merge into the
    /// current page's `props.errors`.
    ValidationMap(Map<String, Value>),
    /// Asset version conflict: force a full document reload of `url`.
    VersionConflict { url: String },
    /// Server-driven external redirect: hard-navigate to `url`.
    ExternalLocation { url: String },
    /// Follow this request under the same visit token.
    Follow(ProtocolRequest),
    /// Unrecognized response; fall back to a full navigation to `url`
    /// unless a subscriber overrides.
    Invalid { status: u16, url: String },
}

/// Classify a delivered response against the request that produced it.
pub fn classify(
    request: &ProtocolRequest,
    response: &RawResponse,
    known_version: Option<&str>,
) -> Result<Classified> {
    if let Some(location) = response.header(headers::LOCATION) {
        // The server steered us off the protocol entirely.
        return Ok(Classified::ExternalLocation {
            url: location.to_owned(),
        });
    }

    if response.status == 409 {
        let server_version = response.header(headers::VERSION);
        if server_version != known_version {
            debug!(
                server = server_version.unwrap_or("<none>"),
                client = known_version.unwrap_or("<none>"),
                "asset version conflict"
            );
        }
        return Ok(Classified::VersionConflict {
            url: request.url.clone(),
        });
    }

    if (300..400).contains(&response.status) {
        let Some(location) = response.header("location") else {
            return Err(PassageError::protocol(format!(
                "redirect status {} without a location header",
                response.status
            )));
        };
        return Ok(Classified::Follow(follow_request(
            request,
            response.status,
            location,
        )));
    }

    if response.is_marked() {
        match serde_json::from_str::<Page>(&response.body) {
            Ok(page) if !page.component.is_empty() => {
                return Ok(Classified::Page(Box::new(page)));
            }
            Ok(_) => {
                return Err(PassageError::protocol(
                    "marked response with an empty component name",
                ));
            }
            Err(err) => {
                if response.status == 422 {
                    if let Some(map) = bare_error_map(&response.body) {
                        return Ok(Classified::ValidationMap(map));
                    }
                }
                return Err(PassageError::Body(err));
            }
        }
    }

    if response.status == 422 {
        if let Some(map) = bare_error_map(&response.body) {
            return Ok(Classified::ValidationMap(map));
        }
    }

    Ok(Classified::Invalid {
        status: response.status,
        url: response.url.clone(),
    })
}

/// Decode a 422 body that is a bare prop-path → message map.
fn bare_error_map(body: &str) -> Option<Map<String, Value>> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value {
        Value::Object(map) if map.values().all(Value::is_string) => Some(map),
        _ => None,
    }
}

/// The follow-up request for a redirect, applying method-downgrade rules:
/// 303 downgrades every mutation method to GET; 301/302 downgrade POST
/// only; 307/308 never downgrade.
fn follow_request(request: &ProtocolRequest, status: u16, location: &str) -> ProtocolRequest {
    let downgrade = match status {
        303 => request.method.is_mutation(),
        301 | 302 => request.method == Method::Post,
        _ => false,
    };
    let (method, body) = if downgrade {
        (Method::Get, None)
    } else {
        (request.method, request.body.clone())
    };
    let headers = request
        .headers
        .iter()
        .filter(|(name, _)| !(downgrade && name == "content-type"))
        .cloned()
        .collect();
    ProtocolRequest {
        url: location.to_owned(),
        method,
        headers,
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use passage_types::path::PropPath;
    use serde_json::json;

    fn path(raw: &str) -> PropPath {
        PropPath::parse(raw).expect("valid path")
    }

    fn current_page() -> Page {
        let mut page = Page::new("Users/Index", "/users");
        page.version = Some("v42".to_owned());
        page
    }

    fn marked_response(status: u16, url: &str, body: &str) -> RawResponse {
        RawResponse {
            status,
            headers: vec![(headers::MARKER.to_owned(), "true".to_owned())],
            url: url.to_owned(),
            body: body.to_owned(),
        }
    }

    #[test]
    fn full_visit_headers() {
        let intent = VisitIntent::get("/users");
        let request = build_request(&intent, &current_page());
        assert_eq!(request.header(headers::MARKER), Some("true"));
        assert_eq!(request.header(headers::VERSION), Some("v42"));
        assert_eq!(request.header(headers::PARTIAL_COMPONENT), None);
        assert!(request.body.is_none());
    }

    #[test]
    fn partial_reload_headers_use_dot_paths() {
        let mut intent = VisitIntent::get("/users");
        intent.only = vec![path("users.data"), path("stats")];
        intent.reset = vec![path("users.data")];
        let request = build_request(&intent, &current_page());
        assert_eq!(
            request.header(headers::PARTIAL_COMPONENT),
            Some("Users/Index")
        );
        assert_eq!(
            request.header(headers::PARTIAL_ONLY),
            Some("users.data,stats")
        );
        assert_eq!(request.header(headers::RESET), Some("users.data"));
    }

    #[test]
    fn get_data_folds_into_query_string() {
        let mut intent = VisitIntent::get("/users");
        intent.data = Some(json!({ "q": "ada lovelace", "page": 2 }));
        let request = build_request(&intent, &current_page());
        assert_eq!(request.url, "/users?page=2&q=ada%20lovelace");
        assert!(request.body.is_none());
    }

    #[test]
    fn mutation_data_becomes_json_body() {
        let mut intent = VisitIntent::with_method("/users", Method::Post);
        intent.data = Some(json!({ "name": "ada" }));
        let request = build_request(&intent, &current_page());
        assert_eq!(request.url, "/users");
        assert_eq!(request.body.as_deref(), Some(r#"{"name":"ada"}"#));
        assert_eq!(request.header("content-type"), Some("application/json"));
    }

    #[test]
    fn error_bag_header() {
        let mut intent = VisitIntent::with_method("/login", Method::Post);
        intent.error_bag = Some("login".to_owned());
        let request = build_request(&intent, &current_page());
        assert_eq!(request.header(headers::ERROR_BAG), Some("login"));
    }

    #[test]
    fn marked_page_classifies_as_page() {
        let intent = VisitIntent::get("/users");
        let request = build_request(&intent, &current_page());
        let body = json!({ "component": "Users/Index", "props": {}, "url": "/users" });
        let classified = classify(
            &request,
            &marked_response(200, "/users", &body.to_string()),
            Some("v42"),
        )
        .expect("classify");
        assert!(matches!(classified, Classified::Page(_)));
    }

    #[test]
    fn page_shaped_422_stays_a_page() {
        let intent = VisitIntent::with_method("/users", Method::Post);
        let request = build_request(&intent, &current_page());
        let body = json!({
            "component": "Users/Create",
            "props": { "errors": { "email": "is taken" } },
            "url": "/users/create"
        });
        let classified = classify(
            &request,
            &marked_response(422, "/users/create", &body.to_string()),
            Some("v42"),
        )
        .expect("classify");
        match classified {
            Classified::Page(page) => assert!(page.has_errors()),
            other => panic!("expected page, got {other:?}"),
        }
    }

    #[test]
    fn bare_map_422_classifies_as_validation_map() {
        let intent = VisitIntent::with_method("/users", Method::Post);
        let request = build_request(&intent, &current_page());
        let response = RawResponse {
            status: 422,
            headers: Vec::new(),
            url: "/users".to_owned(),
            body: json!({ "email": "is taken", "name.first": "is required" }).to_string(),
        };
        let classified = classify(&request, &response, Some("v42")).expect("classify");
        match classified {
            Classified::ValidationMap(map) => {
                assert_eq!(map.get("email"), Some(&json!("is taken")));
            }
            other => panic!("expected validation map, got {other:?}"),
        }
    }

    #[test]
    fn version_conflict_on_409() {
        let intent = VisitIntent::get("/dashboard");
        let request = build_request(&intent, &current_page());
        let mut response = marked_response(409, "/dashboard", "");
        response
            .headers
            .push((headers::VERSION.to_owned(), "v43".to_owned()));
        let classified = classify(&request, &response, Some("v42")).expect("classify");
        assert_eq!(
            classified,
            Classified::VersionConflict {
                url: "/dashboard".to_owned()
            }
        );
    }

    #[test]
    fn external_location_wins_over_status() {
        let intent = VisitIntent::get("/dashboard");
        let request = build_request(&intent, &current_page());
        let response = RawResponse {
            status: 409,
            headers: vec![(headers::LOCATION.to_owned(), "https://sso.example".to_owned())],
            url: "/dashboard".to_owned(),
            body: String::new(),
        };
        let classified = classify(&request, &response, Some("v42")).expect("classify");
        assert_eq!(
            classified,
            Classified::ExternalLocation {
                url: "https://sso.example".to_owned()
            }
        );
    }

    #[test]
    fn redirect_follow_downgrades_by_status() {
        let mut intent = VisitIntent::with_method("/users", Method::Post);
        intent.data = Some(json!({ "name": "ada" }));
        let request = build_request(&intent, &current_page());

        let see_other = RawResponse {
            status: 303,
            headers: vec![("location".to_owned(), "/users/7".to_owned())],
            url: "/users".to_owned(),
            body: String::new(),
        };
        match classify(&request, &see_other, Some("v42")).expect("classify") {
            Classified::Follow(next) => {
                assert_eq!(next.method, Method::Get);
                assert_eq!(next.url, "/users/7");
                assert!(next.body.is_none());
                assert_eq!(next.header("content-type"), None);
            }
            other => panic!("expected follow, got {other:?}"),
        }

        let temporary = RawResponse {
            status: 307,
            headers: vec![("location".to_owned(), "/users-v2".to_owned())],
            url: "/users".to_owned(),
            body: String::new(),
        };
        match classify(&request, &temporary, Some("v42")).expect("classify") {
            Classified::Follow(next) => {
                assert_eq!(next.method, Method::Post);
                assert!(next.body.is_some());
            }
            other => panic!("expected follow, got {other:?}"),
        }

        let mut put_intent = VisitIntent::with_method("/users/7", Method::Put);
        put_intent.data = Some(json!({ "name": "ada" }));
        let put_request = build_request(&put_intent, &current_page());
        let found = RawResponse {
            status: 302,
            headers: vec![("location".to_owned(), "/users/7/edit".to_owned())],
            url: "/users/7".to_owned(),
            body: String::new(),
        };
        match classify(&put_request, &found, Some("v42")).expect("classify") {
            // 302 downgrades POST only; PUT keeps its method.
            Classified::Follow(next) => assert_eq!(next.method, Method::Put),
            other => panic!("expected follow, got {other:?}"),
        }
    }

    #[test]
    fn redirect_without_location_is_a_protocol_violation() {
        let intent = VisitIntent::get("/users");
        let request = build_request(&intent, &current_page());
        let response = RawResponse {
            status: 302,
            headers: Vec::new(),
            url: "/users".to_owned(),
            body: String::new(),
        };
        assert!(classify(&request, &response, Some("v42")).is_err());
    }

    #[test]
    fn unmarked_response_is_invalid() {
        let intent = VisitIntent::get("/users");
        let request = build_request(&intent, &current_page());
        let response = RawResponse {
            status: 200,
            headers: Vec::new(),
            url: "/somewhere".to_owned(),
            body: "<html>plain page</html>".to_owned(),
        };
        let classified = classify(&request, &response, Some("v42")).expect("classify");
        assert_eq!(
            classified,
            Classified::Invalid {
                status: 200,
                url: "/somewhere".to_owned()
            }
        );
    }

    #[test]
    fn marked_garbage_is_a_body_error() {
        let intent = VisitIntent::get("/users");
        let request = build_request(&intent, &current_page());
        let response = marked_response(200, "/users", "{not json");
        assert!(matches!(
            classify(&request, &response, Some("v42")),
            Err(PassageError::Body(_))
        ));
    }
}
