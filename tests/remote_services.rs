//! Network collaborators against local mock servers.

mod common;

use axum::{
    extract::Path,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use common::{rig, RigOptions};
use image::RgbImage;
use serde_json::{json, Value};
use std::time::Duration;

use resq_eye::api::ApiServer;
use resq_eye::capture::{
    CameraDeviceConfig, CaptureError, CaptureProvider, DeviceConstraints, Facing, FrameSnapshot,
    HttpCameraProvider,
};
use resq_eye::cli::LiveApiClient;
use resq_eye::controller::{LiveCommand, LiveMode};
use resq_eye::inference::{GeminiClient, InferenceClient, InferenceError};

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn test_jpeg() -> Vec<u8> {
    FrameSnapshot::from_rgb(&RgbImage::new(8, 6), 80)
        .unwrap()
        .bytes
}

async fn camera_server() -> String {
    let jpeg = test_jpeg();
    let app = Router::new()
        .route(
            "/capture",
            get(move || {
                let jpeg = jpeg.clone();
                async move { ([(header::CONTENT_TYPE, "image/jpeg")], jpeg) }
            }),
        )
        .route("/denied", get(|| async { StatusCode::FORBIDDEN }))
        .route("/broken", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
    serve(app).await
}

fn device(id: &str, url: String, facing: Option<Facing>) -> CameraDeviceConfig {
    CameraDeviceConfig {
        id: id.to_string(),
        url,
        label: None,
        facing,
    }
}

#[tokio::test]
async fn test_snapshot_camera_serves_frames() {
    let base = camera_server().await;
    let provider = HttpCameraProvider::new(vec![device(
        "drone",
        format!("{base}/capture"),
        Some(Facing::Rear),
    )]);

    let mut stream = provider.open(&DeviceConstraints::any()).await.unwrap();
    assert_eq!(stream.device().facing, Some(Facing::Rear));

    let first = stream.snapshot().await.unwrap().unwrap();
    assert_eq!((first.width, first.height), (8, 6));
    let second = stream.snapshot().await.unwrap().unwrap();
    assert_eq!(second.bytes, first.bytes);

    stream.stop();
    assert!(stream.snapshot().await.unwrap().is_none());
}

#[tokio::test]
async fn test_forbidden_camera_is_unavailable() {
    let base = camera_server().await;
    let provider = HttpCameraProvider::new(vec![device("gate", format!("{base}/denied"), None)]);

    let error = provider.open(&DeviceConstraints::any()).await.err().unwrap();
    assert!(matches!(error, CaptureError::DeviceUnavailable(_)));
}

#[tokio::test]
async fn test_failing_camera_is_a_transport_error() {
    let base = camera_server().await;
    let provider = HttpCameraProvider::new(vec![device("roof", format!("{base}/broken"), None)]);

    let error = provider.open(&DeviceConstraints::any()).await.err().unwrap();
    assert!(matches!(error, CaptureError::Transport(_)));
}

#[tokio::test]
async fn test_facing_constraint_skips_other_cameras() {
    let base = camera_server().await;
    let provider = HttpCameraProvider::new(vec![
        device("rear", format!("{base}/denied"), Some(Facing::Rear)),
        device("front", format!("{base}/capture"), Some(Facing::Front)),
    ]);

    let stream = provider
        .open(&DeviceConstraints::facing(Facing::Front))
        .await
        .unwrap();
    assert_eq!(stream.device().id, "front");
}

/// Behaves according to the model named in the path.
async fn generate_content(Path(call): Path<String>, headers: HeaderMap) -> impl IntoResponse {
    if headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()) != Some("test-key") {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": {"code": 403, "message": "bad key", "status": "PERMISSION_DENIED"}})),
        );
    }

    let model = call.trim_end_matches(":generateContent");
    if model == "slow" {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    let reply = |text: &str| json!({"candidates": [{"content": {"parts": [{"text": text}]}}]});
    match model {
        "busy" => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": {"code": 429, "message": "quota", "status": "RESOURCE_EXHAUSTED"}})),
        ),
        "invalid" => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {"code": 400, "message": "bad image", "status": "INVALID_ARGUMENT"}})),
        ),
        "quiet" => (StatusCode::OK, Json(json!({"candidates": []}))),
        _ => (StatusCode::OK, Json(reply("ALERT: FIRE DETECTED\n"))),
    }
}

async fn gemini_client(model: &str, key: &str) -> GeminiClient {
    let app = Router::new().route("/v1beta/models/:call", post(generate_content));
    let base = serve(app).await;
    GeminiClient::new(
        key.to_string(),
        Some(format!("{base}/v1beta")),
        Some(model.to_string()),
        0.7,
    )
    .unwrap()
}

fn frame() -> FrameSnapshot {
    FrameSnapshot::jpeg(test_jpeg(), 8, 6)
}

#[tokio::test]
async fn test_gemini_verdict_is_trimmed() {
    let client = gemini_client("vision", "test-key").await;
    assert_eq!(
        client.analyze_frame(frame()).await.unwrap(),
        "ALERT: FIRE DETECTED"
    );
}

#[tokio::test]
async fn test_gemini_quota_is_rate_limited() {
    let client = gemini_client("busy", "test-key").await;
    let error = client.analyze_frame(frame()).await.unwrap_err();
    assert!(error.is_rate_limited());
}

#[tokio::test]
async fn test_gemini_bad_request_is_api_error() {
    let client = gemini_client("invalid", "test-key").await;
    let error = client.analyze_frame(frame()).await.unwrap_err();
    assert!(matches!(error, InferenceError::Api { status: 400, .. }));
}

#[tokio::test]
async fn test_gemini_empty_answer_reads_safe() {
    let client = gemini_client("quiet", "test-key").await;
    assert_eq!(client.analyze_frame(frame()).await.unwrap(), "SAFE");
}

#[tokio::test]
async fn test_gemini_wrong_key_is_api_error() {
    let client = gemini_client("vision", "other-key").await;
    let error = client.analyze_frame(frame()).await.unwrap_err();
    assert!(matches!(error, InferenceError::Api { status: 403, .. }));
}

#[tokio::test]
async fn test_gemini_configured_timeout_is_transport_error() {
    let client = gemini_client("slow", "test-key")
        .await
        .with_request_timeout(Duration::from_millis(200))
        .unwrap();
    let error = client.analyze_frame(frame()).await.unwrap_err();
    assert!(matches!(error, InferenceError::Transport(_)));
    assert!(!error.is_rate_limited());
}

#[tokio::test]
async fn test_cli_client_drives_running_service() {
    let mut rig = rig(RigOptions {
        force_simulation: true,
        ..Default::default()
    });
    rig.controller.start().await.unwrap();

    let handle = rig.controller.handle();
    let server = ApiServer::new(handle.clone(), rig.status.clone(), 0);
    let base = serve(server.router()).await;
    let events = rig.events;
    let controller = tokio::spawn(rig.controller.run(events));

    let client = LiveApiClient::new(&base);
    let status = client.status().await.unwrap();
    assert_eq!(status.mode, LiveMode::Simulation);
    assert!(status.audio_enabled);

    client.command(LiveCommand::ToggleAudio).await.unwrap();
    assert!(!client.status().await.unwrap().audio_enabled);

    let error = client.command(LiveCommand::ToggleVoice).await.unwrap_err();
    assert!(error.to_string().contains("simulation"));

    let info: Value = reqwest::get(format!("{base}/"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["service"], "resq-eye");

    handle.shutdown().await;
    controller.await.unwrap();
}
