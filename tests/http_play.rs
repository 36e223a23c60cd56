use std::time::Duration;

use axum_test::TestServer;
use chrono::Utc;
use usenet_streamer::http::{router, AppState};
use usenet_streamer::nzb::{Nzb, NzbFile};
use usenet_streamer::session::SessionManager;

#[tokio::test]
async fn health_reports_ok() {
    let sessions = SessionManager::new(vec![], Duration::from_secs(1800));
    let state = AppState { sessions, connections_per_loader: 4 };
    let server = TestServer::new(router(state)).unwrap();

    let response = server.get("/health").await;
    response.assert_status_ok();
    response.assert_json(&serde_json::json!({"status": "ok"}));
}

#[tokio::test]
async fn play_on_unknown_session_returns_not_found() {
    let sessions = SessionManager::new(vec![], Duration::from_secs(1800));
    let state = AppState { sessions, connections_per_loader: 4 };
    let server = TestServer::new(router(state)).unwrap();

    let response = server.get(&format!("/play/{}", uuid::Uuid::new_v4())).await;
    response.assert_status_not_found();
}

#[tokio::test]
async fn play_on_empty_direct_file_streams_zero_bytes() {
    let sessions = SessionManager::new(vec![], Duration::from_secs(1800));
    let mut nzb = Nzb::new();
    let mut file = NzbFile::new("Test Movie".into(), "poster@example.com".into(), Utc::now());
    file.path = "movie.mp4".into();
    nzb.files.push(file);
    let id = sessions.create_session(&nzb).await.unwrap();

    let state = AppState { sessions, connections_per_loader: 4 };
    let server = TestServer::new(router(state)).unwrap();

    let response = server.get(&format!("/play/{id}")).await;
    response.assert_status_ok();
    assert_eq!(response.as_bytes().len(), 0);
}
