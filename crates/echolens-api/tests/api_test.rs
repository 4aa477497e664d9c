//! Router tests against in-memory repositories.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use echolens_api::{router, AppState};
use echolens_core::{
    ArtifactRepository, Episode, Job, JobKind, JobRepository, JobStatus, NewVectorSlice, Vector,
};
use echolens_inference::mock::{MockEmbeddingBackend, MockEmbeddingGenerator};
use echolens_jobs::{
    CancelRegistry, InMemoryArtifactRepository, InMemoryJobRepository, JobCanceller,
    OrphanSweeper,
};

const DIM: usize = 16;

struct TestApp {
    app: Router,
    jobs: Arc<InMemoryJobRepository>,
    artifacts: Arc<InMemoryArtifactRepository>,
    registry: CancelRegistry,
    _upload: tempfile::TempDir,
}

fn test_app(with_embedding: bool) -> TestApp {
    let jobs = Arc::new(InMemoryJobRepository::new());
    let artifacts = Arc::new(InMemoryArtifactRepository::new());
    let registry = CancelRegistry::new();
    let upload = tempfile::tempdir().unwrap();

    let state = AppState {
        jobs: jobs.clone(),
        artifacts: artifacts.clone(),
        canceller: JobCanceller::new(
            jobs.clone(),
            artifacts.clone(),
            registry.clone(),
            upload.path(),
        ),
        sweeper: OrphanSweeper::new(jobs.clone())
            .with_timeout(Duration::from_secs(60))
            .with_registry(registry.clone()),
        embedding: with_embedding.then(|| {
            Arc::new(MockEmbeddingBackend::new(DIM)) as Arc<dyn echolens_core::EmbeddingBackend>
        }),
    };

    TestApp {
        app: router(state),
        jobs,
        artifacts,
        registry,
        _upload: upload,
    }
}

fn episode(url: &str) -> Episode {
    Episode {
        id: Uuid::now_v7(),
        podcast_id: Uuid::now_v7(),
        podcast_slug: "Tech Talk".to_string(),
        title: "Episode 1".to_string(),
        audio_url: url.to_string(),
        local_audio_path: None,
    }
}

fn stored_job(status: JobStatus, step: Option<&str>, percent: i32, age_secs: i64) -> Job {
    let updated = Utc::now() - chrono::Duration::seconds(age_secs);
    Job {
        id: Uuid::now_v7(),
        episode_id: Uuid::now_v7(),
        podcast_id: Uuid::now_v7(),
        kind: JobKind::Process,
        status,
        current_step: step.map(String::from),
        progress_percent: percent,
        error_message: None,
        failed_stage: None,
        cancel_requested: false,
        cancel_cleanup: false,
        created_at: updated,
        started_at: None,
        updated_at: updated,
        completed_at: None,
    }
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_health_check() {
    let t = test_app(false);
    let (status, body) = send(&t.app, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_process_episode_queues_once() {
    let t = test_app(false);
    let ep = episode("https://example.com/a.mp3");
    t.artifacts.add_episode(ep.clone());

    let uri = format!("/api/v1/episodes/{}/process", ep.id);
    let (status, body) = send(&t.app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");

    let job_id: Uuid = body["job_id"].as_str().unwrap().parse().unwrap();
    let job = t.jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.episode_id, ep.id);
    assert_eq!(job.podcast_id, ep.podcast_id);

    let (status, body) = send(&t.app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("already has an active"));
}

#[tokio::test]
async fn test_process_unknown_episode_is_404() {
    let t = test_app(false);
    let uri = format!("/api/v1/episodes/{}/process", Uuid::now_v7());

    let (status, body) = send(&t.app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().starts_with("Episode not found"));
}

#[tokio::test]
async fn test_get_job_includes_steps() {
    let t = test_app(false);
    let job = stored_job(
        JobStatus::InProgress,
        Some("Transcribing audio: chunk 2/5"),
        20,
        0,
    );
    t.jobs.put(job.clone());

    let (status, body) = send(&t.app, Method::GET, &format!("/api/v1/jobs/{}", job.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "in_progress");

    let steps = body["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 7);
    assert_eq!(steps[0]["status"], "completed");
    assert_eq!(steps[2]["name"], "Transcribing audio");
    assert_eq!(steps[2]["status"], "active");
    assert_eq!(steps[2]["detail"], "chunk 2/5");
    assert_eq!(steps[6]["status"], "pending");
}

#[tokio::test]
async fn test_get_unknown_job_is_404() {
    let t = test_app(false);
    let uri = format!("/api/v1/jobs/{}", Uuid::now_v7());

    let (status, _) = send(&t.app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&t.app, Method::GET, &format!("{}/logs", uri), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_jobs_filters_by_status() {
    let t = test_app(false);
    t.jobs.put(stored_job(JobStatus::Pending, None, 0, 0));
    t.jobs.put(stored_job(JobStatus::Success, Some("Completed"), 100, 0));

    let (status, body) = send(&t.app, Method::GET, "/api/v1/jobs?status=pending", None).await;
    assert_eq!(status, StatusCode::OK);
    let jobs = body["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["status"], "pending");
    assert_eq!(body["total"], 2);
}

#[tokio::test]
async fn test_list_jobs_rejects_unknown_status() {
    let t = test_app(false);
    let (status, body) = send(&t.app, Method::GET, "/api/v1/jobs?status=bogus", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("bogus"));
}

#[tokio::test]
async fn test_cancel_pending_job_with_cleanup() {
    let t = test_app(false);
    let ep = episode("https://example.com/b.mp3");
    t.artifacts.add_episode(ep.clone());
    t.artifacts.save_transcript(ep.id, "hello world").await.unwrap();
    let job = t.jobs.create(ep.id, ep.podcast_id).await.unwrap();

    let uri = format!("/api/v1/jobs/{}/cancel?cleanup=true", job.id);
    let (status, body) = send(&t.app, Method::POST, &uri, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["job_status"], "cancelled");
    assert_eq!(body["cleanup_performed"], true);
    assert_eq!(body["removed"]["transcripts"], 1);
    assert!(t.artifacts.get_transcript(ep.id).await.unwrap().is_none());

    let (_, logs) = send(
        &t.app,
        Method::GET,
        &format!("/api/v1/jobs/{}/logs", job.id),
        None,
    )
    .await;
    let messages: Vec<&str> = logs["logs"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|l| l["message"].as_str())
        .collect();
    assert!(messages.contains(&"Cancellation requested with cleanup"));
}

#[tokio::test]
async fn test_cancel_running_job_defers_cleanup() {
    let t = test_app(false);
    let ep = episode("https://example.com/c.mp3");
    t.artifacts.add_episode(ep.clone());
    let job = t.jobs.create(ep.id, ep.podcast_id).await.unwrap();
    let claimed = t.jobs.claim_next().await.unwrap().unwrap();
    assert_eq!(claimed.id, job.id);

    let guard = t.registry.register(job.id);
    let token = guard.token();

    let uri = format!("/api/v1/jobs/{}/cancel?cleanup=true", job.id);
    let (status, body) = send(&t.app, Method::POST, &uri, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job_status"], "in_progress");
    assert_eq!(body["cleanup_performed"], false);
    assert_eq!(body["cleanup_pending"], true);
    assert!(token.is_cancelled());
    assert!(t.jobs.is_cancel_requested(job.id).await.unwrap());
}

#[tokio::test]
async fn test_cancel_finished_job_is_conflict() {
    let t = test_app(false);
    let job = stored_job(JobStatus::Success, Some("Completed"), 100, 0);
    t.jobs.put(job.clone());

    let uri = format!("/api/v1/jobs/{}/cancel", job.id);
    let (status, _) = send(&t.app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_sweep_marks_stale_jobs_failed() {
    let t = test_app(false);
    let stale = stored_job(JobStatus::InProgress, Some("Downloading audio"), 5, 600);
    let fresh = stored_job(JobStatus::InProgress, Some("Downloading audio"), 5, 0);
    let queued = stored_job(JobStatus::Pending, None, 0, 600);
    t.jobs.put(stale.clone());
    t.jobs.put(fresh.clone());
    t.jobs.put(queued.clone());

    let (status, body) = send(&t.app, Method::POST, "/api/v1/jobs/sweep", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cleaned"], 1);
    let queued = t.jobs.get(queued.id).await.unwrap().unwrap();
    assert_eq!(queued.status, JobStatus::Pending);

    let (_, feed) = send(&t.app, Method::GET, "/api/v1/notifications", None).await;
    let feed = feed["notifications"].as_array().unwrap();
    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0]["type"], "orphans_swept");
    assert_eq!(feed[0]["message"], "Cleaned up 1 orphaned job(s)");

    let stale = t.jobs.get(stale.id).await.unwrap().unwrap();
    assert_eq!(stale.status, JobStatus::Failure);
    let fresh = t.jobs.get(fresh.id).await.unwrap().unwrap();
    assert_eq!(fresh.status, JobStatus::InProgress);
}

#[tokio::test]
async fn test_clear_history_keeps_active_jobs() {
    let t = test_app(false);
    t.jobs.put(stored_job(JobStatus::Success, Some("Completed"), 100, 0));
    t.jobs.put(stored_job(JobStatus::Failure, None, 40, 0));
    let active = stored_job(JobStatus::Pending, None, 0, 0);
    t.jobs.put(active.clone());

    let (status, body) = send(&t.app, Method::POST, "/api/v1/jobs/clear-history", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted_count"], 2);
    assert!(t.jobs.get(active.id).await.unwrap().is_some());

    let (_, overview) = send(&t.app, Method::GET, "/api/v1/tasks", None).await;
    assert_eq!(overview["queued"].as_array().unwrap().len(), 1);
    assert!(overview["recent"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_clear_history_posts_notification() {
    let t = test_app(false);
    t.jobs.put(stored_job(JobStatus::Success, Some("Completed"), 100, 0));

    send(&t.app, Method::POST, "/api/v1/jobs/clear-history", None).await;
    // Nothing left to clear, so no second notice.
    send(&t.app, Method::POST, "/api/v1/jobs/clear-history", None).await;

    let (_, feed) = send(&t.app, Method::GET, "/api/v1/notifications", None).await;
    let feed = feed["notifications"].as_array().unwrap();
    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0]["title"], "Job History Cleared");
    assert_eq!(feed[0]["level"], "info");
}

#[tokio::test]
async fn test_notifications_mark_read() {
    use echolens_core::{NewNotification, NotificationKind, NotificationLevel};

    let t = test_app(false);
    let first = t
        .jobs
        .add_notification(NewNotification::new(
            NotificationKind::JobStarted,
            NotificationLevel::Info,
            "Processing Started",
            "Started processing: Episode 1",
        ))
        .await
        .unwrap();
    t.jobs
        .add_notification(NewNotification::new(
            NotificationKind::JobFailed,
            NotificationLevel::Error,
            "Processing Failed",
            "Error processing Episode 1: boom",
        ))
        .await
        .unwrap();

    let uri = format!("/api/v1/notifications/{}/read", first.id);
    let (status, body) = send(&t.app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["read"], true);

    let (_, unread) = send(&t.app, Method::GET, "/api/v1/notifications?unread=true", None).await;
    let unread = unread["notifications"].as_array().unwrap();
    assert_eq!(unread.len(), 1);
    assert_eq!(unread[0]["type"], "job_failed");

    let (status, body) = send(&t.app, Method::POST, "/api/v1/notifications/read-all", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], 1);

    let uri = format!("/api/v1/notifications/{}/read", Uuid::now_v7());
    let (status, _) = send(&t.app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_extract_terms_requires_transcript() {
    let t = test_app(false);
    let ep = episode("https://example.com/terms.mp3");
    t.artifacts.add_episode(ep.clone());
    let uri = format!("/api/v1/episodes/{}/extract-terms", ep.id);

    let (status, body) = send(&t.app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("no transcript"));

    t.artifacts
        .save_transcript(ep.id, "Rust ownership and borrowing")
        .await
        .unwrap();
    let (status, body) = send(&t.app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["kind"], "extract_terms");

    let job_id: Uuid = body["job_id"].as_str().unwrap().parse().unwrap();
    let job = t.jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.kind, JobKind::ExtractTerms);

    // Any active job blocks both kinds.
    let (status, _) = send(&t.app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let process = format!("/api/v1/episodes/{}/process", ep.id);
    let (status, _) = send(&t.app, Method::POST, &process, None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, detail) = send(&t.app, Method::GET, &format!("/api/v1/jobs/{}", job_id), None).await;
    assert_eq!(detail["steps"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_queue_stats() {
    let t = test_app(false);
    t.jobs.put(stored_job(JobStatus::Pending, None, 0, 0));
    t.jobs.put(stored_job(JobStatus::InProgress, Some("Embedding"), 40, 0));

    let (status, body) = send(&t.app, Method::GET, "/api/v1/queue/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pending"], 1);
    assert_eq!(body["in_progress"], 1);
    assert_eq!(body["total"], 2);
}

#[tokio::test]
async fn test_search_without_embedding_backend() {
    let t = test_app(false);
    let (status, _) = send(
        &t.app,
        Method::POST,
        "/api/v1/search",
        Some(serde_json::json!({ "query": "rust" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_search_rejects_empty_query() {
    let t = test_app(true);
    let (status, _) = send(
        &t.app,
        Method::POST,
        "/api/v1/search",
        Some(serde_json::json!({ "query": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_search_ranks_matching_slice_first() {
    let t = test_app(true);
    let ep = episode("https://example.com/d.mp3");
    t.artifacts.add_episode(ep.clone());

    let texts = ["borrow checker and lifetimes", "gardening tips for spring"];
    let slices: Vec<NewVectorSlice> = texts
        .iter()
        .enumerate()
        .map(|(i, text)| NewVectorSlice {
            chunk_index: i as i32,
            text: text.to_string(),
            embedding: Vector::from(MockEmbeddingGenerator::generate(text, DIM)),
        })
        .collect();
    t.artifacts.insert_slices(&ep, &slices).await.unwrap();

    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/v1/search",
        Some(serde_json::json!({
            "query": "borrow checker and lifetimes",
            "podcast_id": ep.podcast_id,
            "limit": 1,
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["text"], "borrow checker and lifetimes");
    assert_eq!(results[0]["episode_id"], ep.id.to_string());
}
