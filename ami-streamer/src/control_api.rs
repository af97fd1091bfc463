//! HTTP surface over [`JobManager`].

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::jobs::{JobConfig, JobManager};

pub fn router(manager: Arc<JobManager>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/jobs", post(start_job).get(list_jobs))
        .route("/jobs/:job_id", get(get_job).delete(remove_job))
        .route("/jobs/:job_id/stop", post(stop_job))
        .with_state(manager)
}

/// Bind and serve the control API until the listener fails.
pub async fn serve(bind_addr: &str, manager: Arc<JobManager>) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid control bind address '{bind_addr}': {e}"))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "control API listening");
    axum::serve(listener, router(manager).into_make_service()).await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn start_job(State(manager): State<Arc<JobManager>>, Json(config): Json<JobConfig>) -> Response {
    match manager.start_job(config) {
        Ok(job_id) => (StatusCode::CREATED, Json(json!({ "job_id": job_id }))).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

#[derive(serde::Deserialize)]
struct ListQuery {
    #[serde(default)]
    all: bool,
}

/// Active jobs by default; `?all=true` includes finished ones.
async fn list_jobs(State(manager): State<Arc<JobManager>>, Query(query): Query<ListQuery>) -> Response {
    let jobs = if query.all {
        manager.list_jobs()
    } else {
        manager.list_active_jobs()
    };
    Json(jobs).into_response()
}

async fn get_job(State(manager): State<Arc<JobManager>>, Path(job_id): Path<String>) -> Response {
    match manager.get_status(&job_id) {
        Some(record) => Json(record).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": format!("job {job_id} not found") }))).into_response(),
    }
}

async fn stop_job(State(manager): State<Arc<JobManager>>, Path(job_id): Path<String>) -> Response {
    let stop_requested = manager.stop_job(&job_id);
    (
        StatusCode::ACCEPTED,
        Json(json!({ "job_id": job_id, "stop_requested": stop_requested })),
    )
        .into_response()
}

async fn remove_job(State(manager): State<Arc<JobManager>>, Path(job_id): Path<String>) -> Response {
    match manager.remove_job(&job_id) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        generator::FleetResolver,
        registry::JobRegistry,
        session::testing::FakeWarehouse,
        sinks::{SinkBuilder, SinkSettings},
        storage::testing::{MemoryBucket, MemoryConnector},
    };

    fn app() -> (Router, Arc<JobManager>) {
        let wh = Arc::new(FakeWarehouse::default());
        let builder = SinkBuilder::new(
            wh,
            Arc::new(MemoryConnector::new(Arc::new(MemoryBucket::named("ami")))),
            SinkSettings::default(),
        );
        let manager = Arc::new(JobManager::new(
            JobRegistry::new(),
            FleetResolver::synthetic_only(),
            Arc::new(builder),
            Duration::from_secs(2),
        ));
        (router(manager.clone()), manager)
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn start_query_and_stop_over_http() {
        let (app, manager) = app();

        let resp = app
            .clone()
            .oneshot(post_json(
                "/jobs",
                json!({
                    "sink": "table",
                    "target": "AMI.RAW.READINGS",
                    "meter_count": 20,
                    "cadence": { "mode": "rate", "rows_per_second": 10 },
                    "area": "MIDWEST_PLAINS"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let job_id = body_json(resp).await["job_id"].as_str().unwrap().to_string();

        tokio::time::sleep(Duration::from_millis(1_500)).await;

        let resp = app
            .clone()
            .oneshot(Request::get(format!("/jobs/{job_id}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let record = body_json(resp).await;
        assert_eq!(record["status"], "RUNNING");
        assert_eq!(record["config"]["sink"], "table");
        assert!(record["stats"]["total_rows"].as_u64().unwrap() >= 10);

        let resp = app
            .clone()
            .oneshot(Request::post(format!("/jobs/{job_id}/stop")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(resp).await["stop_requested"], true);

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(manager.list_active_jobs().is_empty());

        let resp = app
            .clone()
            .oneshot(Request::delete(format!("/jobs/{job_id}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn invalid_jobs_are_rejected() {
        let (app, _) = app();
        let resp = app
            .oneshot(post_json(
                "/jobs",
                json!({
                    "sink": "table",
                    "meter_count": 5,
                    "cadence": { "mode": "rate", "rows_per_second": 1 },
                    "area": "ATLANTIS"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(resp).await["error"].as_str().unwrap().contains("ATLANTIS"));
    }

    #[tokio::test]
    async fn stopping_unknown_job_is_a_no_op() {
        let (app, _) = app();
        let resp = app
            .clone()
            .oneshot(Request::post("/jobs/nope/stop").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(resp).await["stop_requested"], false);

        let resp = app
            .oneshot(Request::get("/jobs/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn healthz_and_empty_listing() {
        let (app, _) = app();
        let resp = app
            .clone()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(Request::get("/jobs?all=true").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(resp).await, json!([]));
    }
}
