//! Axum router construction and route mapping.
//!
//! The [`app`] function wires every endpoint to its handler and returns a
//! ready-to-serve [`axum::Router`].  Identity is resolved once per request
//! by [`identity_middleware`] and handed to handlers as an
//! `Extension<Principal>`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, Path, RawQuery, State},
    http::{header, HeaderValue, Request},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use serde::de::DeserializeOwned;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::debug;
use utoipa::OpenApi;

use crate::auth::Principal;
use crate::config::IdentitySource;
use crate::errors::ApiError;
use crate::handlers::{blobs, files, health};
use crate::metrics::{metrics_handler, metrics_middleware, observe_file_operation};
use crate::presign::BLOB_ROUTE_PREFIX;
use crate::AppState;

/// Header carrying the caller identity in `local` identity mode.
pub const USER_ID_HEADER: &str = "x-user-id";

// -- OpenAPI specification ----------------------------------------------------

/// OpenAPI documentation for the CloudKeep API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "CloudKeep File API",
        version = "0.1.0",
        description = "Upload, list, download, delete and share per-user files"
    ),
    paths(
        health::health,
        health::index,
        files::upload,
        files::list,
        files::download,
        files::delete,
        files::share,
    ),
    tags(
        (name = "Health", description = "Service endpoints"),
        (name = "Files", description = "File lifecycle operations"),
    )
)]
pub struct ApiDoc;

/// Build the axum [`Router`] with all routes and middleware.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let metrics_enabled = state.config.observability.metrics;
    let max_body_bytes = state.config.server.max_body_bytes;

    let mut router = Router::new()
        .route("/health", get(health::health))
        .route("/", get(health::index))
        .route("/openapi.json", get(openapi_json))
        .route("/upload", post(handle_upload))
        .route("/files", get(handle_list))
        .route("/files/:fileId", delete(handle_delete))
        .route("/download/:fileId", get(handle_download))
        .route("/share/:fileId", post(handle_share))
        .route("/blobs/*key", get(handle_blob));
    if metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    // Layer ordering: inner layers run first, outer layers wrap them.
    let mut router = router
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(state, identity_middleware))
        .layer(middleware::from_fn(common_headers_middleware));
    if metrics_enabled {
        router = router.layer(middleware::from_fn(metrics_middleware));
    }
    router
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        // CORS is outermost so errors and preflights carry the headers too.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

// -- Common headers middleware -----------------------------------------------

/// Adds `x-request-id` (unless already present), `Date` and `Server` to
/// every response.
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if !headers.contains_key("x-request-id") {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-request-id", value);
        }
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(value) = HeaderValue::from_str(&date) {
        headers.insert(header::DATE, value);
    }
    headers.insert(header::SERVER, HeaderValue::from_static("CloudKeep"));

    response
}

/// 16-character uppercase hex request id.
fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode_upper(bytes)
}

// -- Identity middleware -----------------------------------------------------

/// Paths that need no principal.
const AUTH_SKIP_PATHS: &[&str] = &["/", "/health", "/metrics", "/openapi.json"];

/// Resolves the caller into a [`Principal`] before any handler runs.
///
/// In `local` mode the `x-user-id` header (or the default identity) is
/// trusted as-is.  In `authorizer` mode the `Authorization` header goes
/// through the [`crate::auth::Authorizer`] and a rejection ends the request
/// with 401.  Blob links carry their own signature and are skipped.
async fn identity_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let path = req.uri().path().to_string();
    if AUTH_SKIP_PATHS.contains(&path.as_str()) || path.starts_with(BLOB_ROUTE_PREFIX) {
        return Ok(next.run(req).await);
    }

    let principal = match state.config.auth.identity {
        IdentitySource::Local => {
            let header = req
                .headers()
                .get(USER_ID_HEADER)
                .map(|v| v.to_str())
                .transpose()
                .map_err(|_| {
                    debug!("Rejected non-UTF-8 {} header", USER_ID_HEADER);
                    ApiError::Validation("Invalid x-user-id header".to_string())
                })?;
            let user_id = header
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or(state.config.auth.default_identity.as_str());
            Principal::new(user_id)
        }
        IdentitySource::Authorizer => {
            let credential = req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok());
            let resource = format!("{} {}", req.method(), path);
            let grant = state
                .authorizer
                .authorize(credential, &resource)
                .await
                .map_err(|_| ApiError::Unauthorized)?;
            debug!("Authorized {} for {}", grant.principal_id, resource);
            grant.principal()
        }
    };

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

// -- Request parsing helpers -------------------------------------------------

/// Parse raw query string into a HashMap.
fn parse_query(raw: Option<String>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Some(qs) = raw {
        for part in qs.split('&').filter(|p| !p.is_empty()) {
            let (k, v) = part.split_once('=').unwrap_or((part, ""));
            map.insert(decode_component(k), decode_component(v));
        }
    }
    map
}

/// Percent-decode a query component, treating `+` as a space.
fn decode_component(s: &str) -> String {
    percent_encoding::percent_decode_str(&s.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

/// Surface a body the extractor refused (over `max_body_bytes`, or a
/// broken stream) through the JSON error envelope.
fn read_body(body: Result<Bytes, BytesRejection>) -> Result<Bytes, ApiError> {
    body.map_err(|rejection| {
        debug!("Rejected request body: {}", rejection.body_text());
        if rejection.status() == axum::http::StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge
        } else {
            ApiError::Validation("Invalid request body".to_string())
        }
    })
}

/// Deserialize a JSON request body. An empty body yields the default value.
fn parse_json_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        debug!("Rejected request body: {e}");
        ApiError::Validation("Invalid JSON body".to_string())
    })
}

// -- File routes -------------------------------------------------------------

/// `POST /upload`
async fn handle_upload(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let request = parse_json_body(&read_body(body)?)?;
    observe_file_operation("upload", files::upload(state, &principal, request).await)
}

/// `GET /files?limit=&lastKey=`
async fn handle_list(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, ApiError> {
    let query = parse_query(raw_query);
    let result = files::list(
        state,
        &principal,
        query.get("limit").map(String::as_str),
        query.get("lastKey").map(String::as_str),
    )
    .await;
    observe_file_operation("list", result)
}

/// `GET /download/:fileId`
async fn handle_download(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(file_id): Path<String>,
) -> Result<Response, ApiError> {
    observe_file_operation(
        "download",
        files::download(state, &principal, &file_id).await,
    )
}

/// `DELETE /files/:fileId`
async fn handle_delete(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(file_id): Path<String>,
) -> Result<Response, ApiError> {
    observe_file_operation("delete", files::delete(state, &principal, &file_id).await)
}

/// `POST /share/:fileId`
async fn handle_share(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(file_id): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let request = parse_json_body(&read_body(body)?)?;
    observe_file_operation(
        "share",
        files::share(state, &principal, &file_id, request).await,
    )
}

/// `GET /blobs/*key?expires=&signature=`
async fn handle_blob(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, ApiError> {
    let query = parse_query(raw_query);
    blobs::serve_blob(state, &key, &query).await
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::auth::Authorizer;
    use crate::config::{AuthMode, Config};
    use crate::metadata::memory::MemoryMetadataStore;
    use crate::presign::UrlSigner;
    use crate::storage::memory::MemoryObjectStore;

    const BASE_URL: &str = "http://localhost:3000";

    fn test_app(identity: IdentitySource, mode: AuthMode) -> Router {
        let mut config = Config::default();
        config.auth.identity = identity;
        config.auth.mode = mode;
        app_with_config(config)
    }

    fn app_with_config(mut config: Config) -> Router {
        config.observability.metrics = false;

        let signer = Arc::new(UrlSigner::new(b"test-secret".to_vec(), BASE_URL));
        let state = Arc::new(AppState {
            authorizer: Authorizer::new(&config.auth, None),
            metadata: Arc::new(MemoryMetadataStore::new()),
            storage: Arc::new(MemoryObjectStore::new(0, signer.clone())),
            signer,
            config,
        });
        app(state)
    }

    fn local_app() -> Router {
        test_app(IdentitySource::Local, AuthMode::Production)
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_ID_HEADER, user);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn upload(app: &Router, user: &str, name: &str) -> String {
        let (status, body) = send(
            app,
            Method::POST,
            "/upload",
            Some(user),
            Some(json!({"fileName": name, "fileContent": "aGVsbG8=", "contentType": "text/plain"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["fileId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let app = local_app();
        let (status, body) = send(&app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "cloudkeep-backend");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_index_and_openapi() {
        let app = local_app();
        let (status, body) = send(&app, Method::GET, "/", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "cloudkeep-backend");
        assert!(body["endpoints"].as_array().unwrap().len() >= 6);

        let (status, body) = send(&app, Method::GET, "/openapi.json", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/upload"].is_object());
    }

    #[tokio::test]
    async fn test_upload_list_download() {
        let app = local_app();
        let (status, body) = send(
            &app,
            Method::POST,
            "/upload",
            Some("alice"),
            Some(json!({"fileName": "a.txt", "fileContent": "aGVsbG8=", "contentType": "text/plain"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "File uploaded successfully");
        assert_eq!(body["fileName"], "a.txt");
        assert!(body["uploadDate"].is_i64());
        let file_id = body["fileId"].as_str().unwrap().to_string();

        let (status, body) = send(&app, Method::GET, "/files", Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["lastKey"], Value::Null);
        let entry = &body["files"][0];
        assert_eq!(entry["fileId"], file_id.as_str());
        assert_eq!(entry["fileName"], "a.txt");
        assert_eq!(entry["fileSize"], 5);
        assert_eq!(entry["contentType"], "text/plain");
        assert_eq!(entry["shared"], false);

        let (status, body) = send(
            &app,
            Method::GET,
            &format!("/download/{file_id}"),
            Some("alice"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fileName"], "a.txt");
        assert_eq!(body["fileSize"], 5);
        assert_eq!(body["expiresIn"], 3600);
        let url = body["downloadUrl"].as_str().unwrap();
        assert!(url.starts_with(&format!("{BASE_URL}/blobs/alice/{file_id}/a.txt?")));

        // Fetch the bytes through the signed link, without any identity.
        let path = url.strip_prefix(BASE_URL).unwrap();
        let response = app
            .clone()
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/plain");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn test_declared_file_size_wins() {
        let app = local_app();
        let (status, _) = send(
            &app,
            Method::POST,
            "/upload",
            Some("alice"),
            Some(json!({"fileName": "b.bin", "fileContent": "aGVsbG8=", "fileSize": 42})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send(&app, Method::GET, "/files", Some("alice"), None).await;
        assert_eq!(body["files"][0]["fileSize"], 42);
        assert_eq!(body["files"][0]["contentType"], "application/octet-stream");
    }

    #[tokio::test]
    async fn test_upload_validation() {
        let app = local_app();
        let (status, body) = send(
            &app,
            Method::POST,
            "/upload",
            Some("alice"),
            Some(json!({"fileName": "a.txt"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing required fields: fileName, fileContent");

        let (status, _) = send(&app, Method::POST, "/upload", Some("alice"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            Method::POST,
            "/upload",
            Some("alice"),
            Some(json!({"fileName": "a.txt", "fileContent": "***"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid fileContent encoding");

        let response = app
            .clone()
            .oneshot(
                Request::post("/upload")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_for_new_identity_is_empty() {
        let app = local_app();
        let (status, body) = send(&app, Method::GET, "/files", Some("nobody"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"files": [], "count": 0, "lastKey": null}));
    }

    #[tokio::test]
    async fn test_list_pagination() {
        let app = local_app();
        let mut uploaded = Vec::new();
        for name in ["1.txt", "2.txt", "3.txt"] {
            uploaded.push(upload(&app, "alice", name).await);
        }

        let (_, first) = send(&app, Method::GET, "/files?limit=2", Some("alice"), None).await;
        assert_eq!(first["count"], 2);
        let last_key = first["lastKey"].as_str().unwrap().to_string();

        let (_, second) = send(
            &app,
            Method::GET,
            &format!("/files?limit=2&lastKey={last_key}"),
            Some("alice"),
            None,
        )
        .await;
        assert_eq!(second["count"], 1);
        assert_eq!(second["lastKey"], Value::Null);

        let mut seen: Vec<String> = first["files"]
            .as_array()
            .unwrap()
            .iter()
            .chain(second["files"].as_array().unwrap())
            .map(|f| f["fileId"].as_str().unwrap().to_string())
            .collect();
        seen.sort();
        uploaded.sort();
        assert_eq!(seen, uploaded);

        // A cursor is bound to the identity that received it.
        let (status, _) = send(
            &app,
            Method::GET,
            &format!("/files?lastKey={last_key}"),
            Some("bob"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) =
            send(&app, Method::GET, "/files?lastKey=garbage!", Some("alice"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid lastKey parameter");
    }

    #[tokio::test]
    async fn test_delete_lifecycle() {
        let app = local_app();
        let file_id = upload(&app, "alice", "a.txt").await;

        let (status, body) = send(
            &app,
            Method::DELETE,
            &format!("/files/{file_id}"),
            Some("alice"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "File deleted successfully");
        assert_eq!(body["fileId"], file_id.as_str());
        assert_eq!(body["fileName"], "a.txt");

        let (_, body) = send(&app, Method::GET, "/files", Some("alice"), None).await;
        assert_eq!(body["count"], 0);

        // Second delete of the same id.
        let (status, body) = send(
            &app,
            Method::DELETE,
            &format!("/files/{file_id}"),
            Some("alice"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"error": "File not found"}));

        // Sharing a deleted file is refused, downloading still resolves the record.
        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/share/{file_id}"),
            Some("alice"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(
            &app,
            Method::GET,
            &format!("/download/{file_id}"),
            Some("alice"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_file_is_not_found() {
        let app = local_app();
        for (method, uri) in [
            (Method::DELETE, "/files/does-not-exist"),
            (Method::GET, "/download/does-not-exist"),
            (Method::POST, "/share/does-not-exist"),
        ] {
            let (status, body) = send(&app, method, uri, Some("alice"), None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body, json!({"error": "File not found"}));
        }
    }

    #[tokio::test]
    async fn test_files_are_isolated_per_identity() {
        let app = local_app();
        let file_id = upload(&app, "alice", "a.txt").await;
        let (status, _) = send(
            &app,
            Method::GET,
            &format!("/download/{file_id}"),
            Some("bob"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, body) = send(&app, Method::GET, "/files", Some("bob"), None).await;
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn test_share() {
        let app = local_app();
        let file_id = upload(&app, "alice", "a.txt").await;

        let before = chrono::Utc::now().timestamp_millis();
        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/share/{file_id}"),
            Some("alice"),
            Some(json!({"expiresIn": 3600})),
        )
        .await;
        let after = chrono::Utc::now().timestamp_millis();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Share link generated successfully");
        assert_eq!(body["fileName"], "a.txt");
        assert_eq!(body["expiresIn"], 3600);
        let expires_at = body["expiresAt"].as_i64().unwrap();
        assert!(expires_at >= before + 3_600_000 && expires_at <= after + 3_600_000);
        assert!(body["shareUrl"].as_str().unwrap().contains("/blobs/alice/"));

        let (_, body) = send(&app, Method::GET, "/files", Some("alice"), None).await;
        assert_eq!(body["files"][0]["shared"], true);
    }

    #[tokio::test]
    async fn test_share_expiry_defaults_and_limits() {
        let app = local_app();
        let file_id = upload(&app, "alice", "a.txt").await;
        let uri = format!("/share/{file_id}");

        let (_, body) = send(&app, Method::POST, &uri, Some("alice"), None).await;
        assert_eq!(body["expiresIn"], 86_400);

        let (_, body) = send(
            &app,
            Method::POST,
            &uri,
            Some("alice"),
            Some(json!({"expiresIn": 0})),
        )
        .await;
        assert_eq!(body["expiresIn"], 86_400);

        let (status, _) = send(
            &app,
            Method::POST,
            &uri,
            Some("alice"),
            Some(json!({"expiresIn": 700_000})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_tampered_blob_link_is_forbidden() {
        let app = local_app();
        let file_id = upload(&app, "alice", "a.txt").await;
        let (_, body) = send(
            &app,
            Method::GET,
            &format!("/download/{file_id}"),
            Some("alice"),
            None,
        )
        .await;
        let url = body["downloadUrl"].as_str().unwrap();
        let forged = url
            .strip_prefix(BASE_URL)
            .unwrap()
            .replace("/blobs/alice/", "/blobs/bob/");

        let (status, body) = send(&app, Method::GET, &forged, None, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Invalid signature");

        let (status, _) = send(&app, Method::GET, "/blobs/alice/x/a.txt", None, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_authorizer_mode_requires_credentials() {
        let app = test_app(IdentitySource::Authorizer, AuthMode::Development);

        let (status, body) = send(&app, Method::GET, "/files", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"error": "Unauthorized"}));

        let request = |auth: &str| {
            Request::get("/files")
                .header("authorization", auth)
                .body(Body::empty())
                .unwrap()
        };
        let response = app.clone().oneshot(request("Bearer nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(request("Bearer cloudkeep-alice"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Health stays open.
        let (status, _) = send(&app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_authorizer_identity_ignores_user_header() {
        let app = test_app(IdentitySource::Authorizer, AuthMode::Development);
        let response = app
            .clone()
            .oneshot(
                Request::post("/upload")
                    .header("authorization", "Bearer cloudkeep-alice")
                    .header(USER_ID_HEADER, "mallory")
                    .body(Body::from(
                        json!({"fileName": "a.txt", "fileContent": "aGVsbG8="}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::get("/files")
                    .header("authorization", "cloudkeep-alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["count"], 1);
    }

    #[tokio::test]
    async fn test_cors_and_common_headers_on_errors() {
        let app = local_app();
        let response = app
            .clone()
            .oneshot(
                Request::delete("/files/missing")
                    .header("origin", "https://app.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert_eq!(headers["server"], "CloudKeep");
        assert_eq!(headers["x-request-id"].len(), 16);
        assert!(headers.contains_key("date"));
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let app = local_app();
        let response = app
            .clone()
            .oneshot(
                Request::options("/upload")
                    .header("origin", "https://app.example.com")
                    .header("access-control-request-method", "POST")
                    .header("access-control-request-headers", "content-type,authorization")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }

    #[test]
    fn test_parse_query() {
        let q = parse_query(Some("limit=10&lastKey=abc%3D&flag&name=a+b".to_string()));
        assert_eq!(q["limit"], "10");
        assert_eq!(q["lastKey"], "abc=");
        assert_eq!(q["flag"], "");
        assert_eq!(q["name"], "a b");
        assert!(parse_query(None).is_empty());
    }

    #[test]
    fn test_parse_json_body() {
        let empty: files::ShareRequest = parse_json_body(b"  ").unwrap();
        assert!(empty.expires_in.is_none());
        let parsed: files::ShareRequest = parse_json_body(br#"{"expiresIn": 60}"#).unwrap();
        assert_eq!(parsed.expires_in, Some(60));
        assert!(parse_json_body::<files::ShareRequest>(b"[").is_err());
    }

    #[tokio::test]
    async fn test_oversized_body_is_a_json_error() {
        let mut config = Config::default();
        config.server.max_body_bytes = 64;
        let app = app_with_config(config);

        let content = "A".repeat(200);
        let (status, body) = send(
            &app,
            Method::POST,
            "/upload",
            Some("alice"),
            Some(json!({"fileName": "big.bin", "fileContent": content})),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"], "Request body too large");

        let (status, body) = send(
            &app,
            Method::POST,
            "/share/some-id",
            Some("alice"),
            Some(json!({"expiresIn": 60, "padding": "x".repeat(200)})),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"], "Request body too large");

        // Small bodies still go through.
        let (status, _) = send(&app, Method::GET, "/files", Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_non_utf8_user_header_is_rejected() {
        let app = local_app();
        let request = Request::builder()
            .method(Method::GET)
            .uri("/files")
            .header(USER_ID_HEADER, HeaderValue::from_bytes(b"al\xffice").unwrap())
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Invalid x-user-id header");

        // Absent or blank headers still fall back to the default identity.
        let (status, _) = send(&app, Method::GET, "/files", Some("   "), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, Method::GET, "/files", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_dot_file_names_are_rejected_on_local_storage() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.observability.metrics = false;
        let signer = Arc::new(UrlSigner::new(b"test-secret".to_vec(), BASE_URL));
        let state = Arc::new(AppState {
            authorizer: Authorizer::new(&config.auth, None),
            metadata: Arc::new(MemoryMetadataStore::new()),
            storage: Arc::new(
                crate::storage::local::LocalObjectStore::new(dir.path(), signer.clone()).unwrap(),
            ),
            signer,
            config,
        });
        let app = app(state);

        for name in [".", ".."] {
            let (status, body) = send(
                &app,
                Method::POST,
                "/upload",
                Some("alice"),
                Some(json!({"fileName": name, "fileContent": "aGVsbG8="})),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{name}");
            assert_eq!(body["error"], "Invalid fileName");
        }

        let (_, body) = send(&app, Method::GET, "/files", Some("alice"), None).await;
        assert_eq!(body["count"], 0);
        upload(&app, "alice", ".hidden").await;
    }
}
