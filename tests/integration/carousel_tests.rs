//! End-to-end carousel flows: upload, display pointer, reorder, delete and
//! rotation.

use axum::body::Body;
use axum::http::{header, StatusCode};
use serde_json::Value;

use paperframe::carousel::{RotationOutcome, UNTITLED};
use paperframe::PhotoRecord;

use super::test_utils::*;

// =============================================================================
// Upload
// =============================================================================

#[tokio::test]
async fn test_upload_appends_to_carousel() {
    let app = TestApp::new();
    app.seed(&[1, 2], 0).await;

    let record = app.upload("beach.jpg", Some("Beach")).await;

    assert_eq!(record.id, 3);
    assert_eq!(record.title, "Beach");
    assert!(record.filename.ends_with(".jpg"));

    let response = app.send(get("/api/carousel")).await;
    let carousel: Vec<PhotoRecord> = body_json(response).await;
    assert_eq!(carousel.len(), 3);
    assert_eq!(carousel.last().unwrap(), &record);
    assert!(app.objects.contains(&record.filename).await);
}

#[tokio::test]
async fn test_upload_into_empty_store_starts_at_zero() {
    let app = TestApp::new();

    let first = app.upload("a.jpg", Some("A")).await;
    let second = app.upload("b.jpg", Some("B")).await;

    assert_eq!(first.id, 0);
    assert_eq!(second.id, 1);
    assert_ne!(first.filename, second.filename);
}

#[tokio::test]
async fn test_upload_title_falls_back_to_file_name() {
    let app = TestApp::new();

    let named = app.upload("holiday.jpg", None).await;
    let blank = app.upload("other.jpg", Some("   ")).await;

    assert_eq!(named.title, "holiday.jpg");
    assert_eq!(blank.title, "other.jpg");
}

#[tokio::test]
async fn test_upload_without_file_name_is_untitled() {
    let app = TestApp::new();

    let response = app.send(upload_request("", None, JPEG_BYTES)).await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let record: PhotoRecord = body_json(response).await;
    assert_eq!(record.title, UNTITLED);
}

#[tokio::test]
async fn test_upload_without_image_field_is_400() {
    let app = TestApp::new();
    app.seed(&[1], 0).await;

    let response = app
        .send(upload_request_with_auth(
            Some(&admin_auth()),
            Some("No file"),
            None,
        ))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = body_json(response).await;
    assert_eq!(body["error"], "missing_file");
    assert_eq!(app.stored_ids().await, vec![1]);
    assert_eq!(app.objects.len().await, 1);
}

#[tokio::test]
async fn test_upload_with_empty_file_is_400() {
    let app = TestApp::new();

    let response = app.send(upload_request("empty.jpg", None, &[])).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.stored_ids().await.is_empty());
    assert_eq!(app.objects.len().await, 0);
}

#[tokio::test]
async fn test_ids_are_never_reused_after_delete() {
    let app = TestApp::new();
    let first = app.upload("a.jpg", None).await;
    let second = app.upload("b.jpg", None).await;

    let response = app
        .send(admin_request(
            "DELETE",
            &format!("/api/image/{}", second.id),
            Body::empty(),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let third = app.upload("c.jpg", None).await;
    assert!(third.id > second.id);
    assert_eq!(app.stored_ids().await, vec![first.id, third.id]);
}

// =============================================================================
// Full Lifecycle
// =============================================================================

#[tokio::test]
async fn test_upload_fetch_delete_lifecycle() {
    let app = TestApp::new();

    let record = app.upload("mountain.jpg", Some("Mountain")).await;
    let image_uri = format!("/api/image/{}", record.id);

    let response = app.send(get(&image_uri)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/jpeg"
    );
    assert_eq!(&body_bytes(response).await[..], JPEG_BYTES);

    let response = app
        .send(admin_request("DELETE", &image_uri, Body::empty()))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let removed: PhotoRecord = body_json(response).await;
    assert_eq!(removed, record);

    let response = app.send(get(&image_uri)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(!app.objects.contains(&record.filename).await);
    assert!(app.stored_ids().await.is_empty());
}

#[tokio::test]
async fn test_delete_unknown_id_is_404() {
    let app = TestApp::new();
    app.seed(&[1, 2], 0).await;

    let response = app
        .send(admin_request("DELETE", "/api/image/7", Body::empty()))
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.stored_ids().await, vec![1, 2]);
    assert_eq!(app.objects.len().await, 2);
}

#[tokio::test]
async fn test_delete_leaves_pointer_to_wrap() {
    let app = TestApp::new();
    app.seed(&[1, 2, 3], 2).await;

    let response = app
        .send(admin_request("DELETE", "/api/image/3", Body::empty()))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let state = app.service.load_state().await.unwrap();
    assert_eq!(state.current, 2);

    let response = app.send(get("/api/now/id")).await;
    let id: u64 = body_json(response).await;
    assert_eq!(id, 1);
}

// =============================================================================
// Display Pointer
// =============================================================================

#[tokio::test]
async fn test_now_id_returns_current_photo() {
    let app = TestApp::new();
    app.seed(&[1, 2, 3], 2).await;

    let response = app.send(get("/api/now/id")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );
    let id: u64 = body_json(response).await;
    assert_eq!(id, 3);
}

#[tokio::test]
async fn test_now_id_wraps_out_of_range_pointer() {
    let app = TestApp::new();
    app.seed(&[10, 20, 30], 5).await;

    let response = app.send(get("/api/now/id")).await;

    let id: u64 = body_json(response).await;
    assert_eq!(id, 30);
}

#[tokio::test]
async fn test_now_image_redirects_to_image() {
    let app = TestApp::new();
    app.seed(&[4, 8], 1).await;

    let response = app.send(get("/api/now/image")).await;

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/api/image/8"
    );
}

#[tokio::test]
async fn test_now_on_empty_carousel_is_404() {
    let app = TestApp::new();

    for uri in ["/api/now/id", "/api/now/image"] {
        let response = app.send(get(uri)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
        let body: Value = body_json(response).await;
        assert_eq!(body["error"], "empty_carousel");
    }
}

#[tokio::test]
async fn test_set_current_moves_pointer_to_position() {
    let app = TestApp::new();
    app.seed(&[5, 2, 9], 0).await;

    let response = app.send(admin_request("POST", "/api/now", "2")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = body_json(response).await;
    assert_eq!(body["id"], 2);
    assert_eq!(body["current"], 1);

    let response = app.send(get("/api/now/id")).await;
    let id: u64 = body_json(response).await;
    assert_eq!(id, 2);
}

#[tokio::test]
async fn test_set_current_accepts_json_body() {
    let app = TestApp::new();
    app.seed(&[5, 2, 9], 0).await;

    let response = app.send(admin_request("POST", "/api/now", "9")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .send(admin_request("POST", "/api/now", "\"5\""))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = body_json(response).await;
    assert_eq!(body["current"], 0);
}

#[tokio::test]
async fn test_set_current_rejects_bad_ids() {
    let app = TestApp::new();
    app.seed(&[5, 2, 9], 1).await;

    let response = app.send(admin_request("POST", "/api/now", "abc")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.send(admin_request("POST", "/api/now", "-1")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.send(admin_request("POST", "/api/now", "42")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let state = app.service.load_state().await.unwrap();
    assert_eq!(state.current, 1);
}

// =============================================================================
// Reorder
// =============================================================================

#[tokio::test]
async fn test_reorder_applies_permutation() {
    let app = TestApp::new();
    app.seed(&[1, 2, 3], 0).await;

    let response = app
        .send(admin_request("POST", "/api/carousel", "[3,1,2]"))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let carousel: Vec<PhotoRecord> = body_json(response).await;
    assert_eq!(
        carousel.iter().map(|p| p.id).collect::<Vec<_>>(),
        vec![3, 1, 2]
    );
    assert_eq!(carousel[0], photo(3));
    assert_eq!(app.stored_ids().await, vec![3, 1, 2]);
}

#[tokio::test]
async fn test_reorder_does_not_move_pointer() {
    let app = TestApp::new();
    app.seed(&[1, 2, 3], 0).await;

    app.send(admin_request("POST", "/api/carousel", "[2,3,1]"))
        .await;

    let state = app.service.load_state().await.unwrap();
    assert_eq!(state.current, 0);
    let response = app.send(get("/api/now/id")).await;
    let id: u64 = body_json(response).await;
    assert_eq!(id, 2);
}

#[tokio::test]
async fn test_reorder_rejections_leave_carousel_unchanged() {
    let app = TestApp::new();
    app.seed(&[1, 2, 3], 0).await;

    let cases = [
        ("[]", "empty_order"),
        ("{\"order\":[1,2,3]}", "empty_order"),
        ("[1,1,2]", "duplicate_id"),
        ("[1,2]", "length_mismatch"),
        ("[1,2,3,4]", "length_mismatch"),
        ("not json", "invalid_request"),
    ];

    for (body, expected) in cases {
        let response = app
            .send(admin_request("POST", "/api/carousel", body))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {}", body);
        let error: Value = body_json(response).await;
        assert_eq!(error["error"], expected, "body {}", body);
    }

    assert_eq!(app.stored_ids().await, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_reorder_with_unknown_id_is_refused() {
    let app = TestApp::new();
    app.seed(&[1, 2, 3], 0).await;

    let response = app
        .send(admin_request("POST", "/api/carousel", "[1,2,99]"))
        .await;

    assert!(response.status().is_server_error());
    assert_eq!(app.stored_ids().await, vec![1, 2, 3]);
}

// =============================================================================
// Rotation
// =============================================================================

#[tokio::test]
async fn test_rotation_cycles_through_carousel() {
    let app = TestApp::new();
    app.seed(&[7, 8, 9], 0).await;

    let mut shown = Vec::new();
    for _ in 0..4 {
        app.service.rotate().await.unwrap();
        let response = app.send(get("/api/now/id")).await;
        let id: u64 = body_json(response).await;
        shown.push(id);
    }

    assert_eq!(shown, vec![8, 9, 7, 8]);
}

#[tokio::test]
async fn test_rotation_normalizes_out_of_range_pointer() {
    let app = TestApp::new();
    app.seed(&[1, 2], 7).await;

    let outcome = app.service.rotate().await.unwrap();

    assert_eq!(outcome, RotationOutcome::Advanced { from: 7, to: 0 });
    assert_eq!(app.service.load_state().await.unwrap().current, 0);
}

#[tokio::test]
async fn test_rotation_on_empty_carousel_is_noop() {
    let app = TestApp::new();

    let outcome = app.service.rotate().await.unwrap();

    assert_eq!(outcome, RotationOutcome::Skipped);
    assert_eq!(app.metadata.cas_calls(), 0);
}
