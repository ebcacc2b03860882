use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{info, instrument};
use uuid::Uuid;

use super::dto::{AnalyzeResponse, IdentityRequest, ImageBase64Request, SessionView};
use super::error::{reject, FlowError};
use super::services;
use super::state::SessionHandle;
use crate::images::{services::format_from_mime, ImageError, ImageSource};
use crate::meals::LogEntry;
use crate::state::AppState;

const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;
// base64 inflates by 4/3, plus room for the JSON around it
const MAX_BASE64_BODY: usize = MAX_IMAGE_BYTES / 3 * 4 + 64 * 1024;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(open_session))
        .route("/sessions/:id", get(get_session).delete(close_session))
        .route("/sessions/:id/identity", post(submit_identity))
        .route(
            "/sessions/:id/image",
            get(get_image)
                .post(upload_image_multipart)
                .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES)),
        )
        .route(
            "/sessions/:id/image/base64",
            post(upload_image_base64).layer(DefaultBodyLimit::max(MAX_BASE64_BODY)),
        )
        .route("/sessions/:id/analyze", post(analyze))
        .route("/sessions/:id/push", post(push))
}

async fn session(state: &AppState, id: Uuid) -> Result<SessionHandle, (StatusCode, String)> {
    state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| reject(FlowError::SessionNotFound))
}

#[instrument(skip(state))]
pub async fn open_session(State(state): State<AppState>) -> (StatusCode, Json<SessionView>) {
    let (id, handle) = state.sessions.open().await;
    let view = SessionView::new(id, &*handle.lock().await);
    let open = state.sessions.len().await;
    info!(session_id = %id, open, "session opened");
    (StatusCode::CREATED, Json(view))
}

#[instrument(skip(state))]
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, (StatusCode, String)> {
    let handle = session(&state, id).await?;
    let s = handle.lock().await;
    Ok(Json(SessionView::new(id, &s)))
}

#[instrument(skip(state))]
pub async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    if !state.sessions.close(id).await {
        return Err(reject(FlowError::SessionNotFound));
    }
    info!(session_id = %id, "session closed");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, body))]
pub async fn submit_identity(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<IdentityRequest>,
) -> Result<Json<SessionView>, (StatusCode, String)> {
    let handle = session(&state, id).await?;
    let mut s = handle.lock().await;
    services::submit_identity(&mut s, &body.identity).map_err(reject)?;
    Ok(Json(SessionView::new(id, &s)))
}

/// POST /sessions/:id/image (multipart)
/// Fields: `image` (file, jpg or png), optional `source` = upload | camera
#[instrument(skip(state, mp))]
pub async fn upload_image_multipart(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut mp: Multipart,
) -> Result<Json<SessionView>, (StatusCode, String)> {
    let mut image: Option<Bytes> = None;
    let mut source = ImageSource::Upload;

    while let Some(field) = mp.next_field().await.map_err(bad_request)? {
        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some("image") => {
                let declared = field.content_type().map(|s| s.to_string());
                if let Some(ct) = declared.as_deref() {
                    if ct.starts_with("image/") && format_from_mime(ct).is_none() {
                        return Err(reject(FlowError::Image(ImageError::Unsupported)));
                    }
                }
                image = Some(field.bytes().await.map_err(bad_request)?);
            }
            Some("source") => {
                let text = field.text().await.map_err(bad_request)?;
                source = parse_source(&text)?;
            }
            _ => {}
        }
    }
    let Some(image) = image else {
        return Err((StatusCode::BAD_REQUEST, "image field is required".into()));
    };

    let handle = session(&state, id).await?;
    let mut s = handle.lock().await;
    services::submit_image(&mut s, &image, source).map_err(reject)?;
    Ok(Json(SessionView::new(id, &s)))
}

/// POST /sessions/:id/image/base64 { image_b64: "...", source?: "camera" }
#[instrument(skip(state, body))]
pub async fn upload_image_base64(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ImageBase64Request>,
) -> Result<Json<SessionView>, (StatusCode, String)> {
    let raw = decode_image_b64(&body.image_b64, MAX_IMAGE_BYTES)?;

    let handle = session(&state, id).await?;
    let mut s = handle.lock().await;
    services::submit_image(&mut s, &raw, body.source).map_err(reject)?;
    Ok(Json(SessionView::new(id, &s)))
}

#[instrument(skip(state))]
pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let handle = session(&state, id).await?;
    let s = handle.lock().await;
    let image = s.image().ok_or_else(|| reject(FlowError::MissingImage))?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], image.jpeg.clone()))
}

#[instrument(skip(state))]
pub async fn analyze(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AnalyzeResponse>, (StatusCode, String)> {
    let handle = session(&state, id).await?;
    let mut s = handle.lock().await;
    let analysis = services::run_analysis(&mut s, state.model.as_ref())
        .await
        .map_err(reject)?;
    Ok(Json(analysis.into()))
}

#[instrument(skip(state))]
pub async fn push(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<LogEntry>), (StatusCode, String)> {
    let handle = session(&state, id).await?;
    let s = handle.lock().await;
    let entry = services::push(&s, state.log.as_ref(), OffsetDateTime::now_utc().to_offset(state.offset))
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

fn parse_source(text: &str) -> Result<ImageSource, (StatusCode, String)> {
    ImageSource::parse(text).ok_or((
        StatusCode::BAD_REQUEST,
        "source must be upload or camera".into(),
    ))
}

fn decode_image_b64(text: &str, max: usize) -> Result<Vec<u8>, (StatusCode, String)> {
    let raw = STANDARD
        .decode(text.trim())
        .map_err(|_| (StatusCode::BAD_REQUEST, "invalid base64".to_string()))?;
    if raw.len() > max {
        return Err((
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("image exceeds {max} bytes"),
        ));
    }
    Ok(raw)
}

fn bad_request<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, e.to_string())
}

#[cfg(test)]
mod session_handler_tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::app::build_app;
    use crate::state::fakes::{sample_jpeg, sample_png_rgba, FakeModel, MemoryLog};
    use crate::state::AppState;

    const REPLY: &str = "**Total Calories:** 680 calories\n**Total Protein:** 42g\n\
                         **Total Carbohydrates:** 55g\n**Total Fat:** 20g";

    struct Harness {
        app: Router,
        model: Arc<FakeModel>,
        log: Arc<MemoryLog>,
    }

    fn harness() -> Harness {
        let model = Arc::new(FakeModel::replying(REPLY));
        let log = Arc::new(MemoryLog::default());
        let state = AppState::from_parts(model.clone(), log.clone());
        Harness {
            app: build_app(state),
            model,
            log,
        }
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header("Content-Type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    fn json_of(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    async fn open(app: &Router) -> String {
        let (status, body) = call(app, "POST", "/api/v1/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        let v = json_of(&body);
        assert_eq!(v["phase"], "no_identity");
        v["id"].as_str().unwrap().to_owned()
    }

    #[tokio::test]
    async fn full_flow_over_http() {
        let h = harness();
        let id = open(&h.app).await;
        let base = format!("/api/v1/sessions/{id}");

        let (status, _) = call(&h.app, "POST", &format!("{base}/push"), None).await;
        assert_eq!(status, StatusCode::PRECONDITION_REQUIRED);

        let (status, body) =
            call(&h.app, "POST", &format!("{base}/identity"), Some(json!({"identity": "alice"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body)["phase"], "awaiting_image");

        let (status, body) = call(&h.app, "POST", &format!("{base}/analyze"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(String::from_utf8_lossy(&body).contains("No image found"));
        assert_eq!(h.model.calls(), 0);

        let (status, _) = call(&h.app, "POST", &format!("{base}/push"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(h.log.rows().is_empty());

        let b64 = STANDARD.encode(sample_jpeg());
        let (status, body) = call(
            &h.app,
            "POST",
            &format!("{base}/image/base64"),
            Some(json!({"image_b64": b64, "source": "camera"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let v = json_of(&body);
        assert_eq!(v["phase"], "image_ready");
        assert_eq!(v["image"]["source"], "camera");

        let (status, body) = call(&h.app, "POST", &format!("{base}/analyze"), None).await;
        assert_eq!(status, StatusCode::OK);
        let v = json_of(&body);
        assert_eq!(v["record"], json!({"calories": 680, "protein": 42.0, "carbs": 55.0, "fat": 20.0}));
        assert_eq!(v["summary"][0], "Calories: 680 kcal");
        assert_eq!(h.model.calls(), 1);

        let (status, body) = call(&h.app, "POST", &format!("{base}/push"), None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json_of(&body)["identity"], "alice");
        let rows = h.log.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][1..], [json!("alice"), json!(680), json!(42.0), json!(55.0), json!(20.0)]);

        let (status, body) = call(&h.app, "GET", &base, None).await;
        assert_eq!(status, StatusCode::OK);
        let v = json_of(&body);
        assert_eq!(v["phase"], "result_ready");
        assert_eq!(v["result"]["matches_image"], true);

        let (status, _) = call(&h.app, "DELETE", &base, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&h.app, "GET", &base, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn multipart_upload_and_image_download() {
        let h = harness();
        let id = open(&h.app).await;
        let base = format!("/api/v1/sessions/{id}");
        call(&h.app, "POST", &format!("{base}/identity"), Some(json!({"identity": "bob"}))).await;

        let boundary = "XBOUNDARYX";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"source\"\r\n\r\nupload\r\n\
                 --{boundary}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"plate.png\"\r\n\
                 Content-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(&sample_png_rgba());
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let req = Request::builder()
            .method("POST")
            .uri(format!("{base}/image"))
            .header("Content-Type", format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap();
        let resp = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let req = Request::builder()
            .method("GET")
            .uri(format!("{base}/image"))
            .body(Body::empty())
            .unwrap();
        let resp = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "image/jpeg");
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        assert!(!img.color().has_alpha());
    }

    #[tokio::test]
    async fn rejects_bad_input() {
        let h = harness();
        let id = open(&h.app).await;
        let base = format!("/api/v1/sessions/{id}");

        let (status, _) = call(&h.app, "POST", &format!("{base}/identity"), Some(json!({"identity": ""}))).await;
        assert_eq!(status, StatusCode::PRECONDITION_REQUIRED);
        call(&h.app, "POST", &format!("{base}/identity"), Some(json!({"identity": "carol"}))).await;
        let (status, _) = call(&h.app, "POST", &format!("{base}/identity"), Some(json!({"identity": "dave"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(
            &h.app,
            "POST",
            &format!("{base}/image/base64"),
            Some(json!({"image_b64": "!!!not base64!!!"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(String::from_utf8_lossy(&body), "invalid base64");

        let (status, _) = call(
            &h.app,
            "POST",
            &format!("{base}/image/base64"),
            Some(json!({"image_b64": STANDARD.encode(b"plain text, not a picture")})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&h.app, "POST", "/api/v1/sessions/00000000-0000-0000-0000-000000000000/analyze", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn decoded_image_size_is_capped() {
        let text = STANDARD.encode([7u8; 100]);
        assert_eq!(super::decode_image_b64(&text, 100).unwrap().len(), 100);

        let (status, msg) = super::decode_image_b64(&text, 99).unwrap_err();
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(msg, "image exceeds 99 bytes");

        let (status, _) = super::decode_image_b64(" %%% ", 100).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn base64_body_limit_fits_a_full_size_image() {
        assert!(super::MAX_BASE64_BODY >= super::MAX_IMAGE_BYTES / 3 * 4 + 4);
        assert!(super::MAX_BASE64_BODY < super::MAX_IMAGE_BYTES * 2);
    }

    #[tokio::test]
    async fn health() {
        let app = build_app(AppState::fake());
        let (status, body) = call(&app, "GET", "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }
}
