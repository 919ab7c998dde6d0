//! HTTP Surface Tests
//!
//! Full-stack tests: each case boots a replica on an ephemeral port and talks
//! to it over real HTTP, the way clients and workers do.

#[cfg(test)]
mod tests {
    use crate::api::build_router;
    use crate::api::protocol::{HealthResponse, SubmitResponse};
    use crate::cluster::monitor::HealthMonitor;
    use crate::cluster::types::ReplicaId;
    use crate::config::{ClusterConfig, ReplicaSpec, ReplicationMode};
    use crate::dispatch::dispatcher::Dispatcher;
    use crate::dispatch::protocol::{
        PollRequest, PollResponse, RegisterRequest, RegisterResponse, ReportRequest,
        ReportResponse, TaskOutcome, ENDPOINT_POLL, ENDPOINT_REGISTER, ENDPOINT_REPORT,
    };
    use crate::dispatch::types::WorkerId;
    use crate::store::protocol::{
        ReplicateRequest, ReplicateResponse, ENDPOINT_REPLICATE, ENDPOINT_SNAPSHOT,
    };
    use crate::store::store::TaskStore;
    use crate::store::types::{TaskRecord, TaskState};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_config() -> Arc<ClusterConfig> {
        let replicas = (0..2)
            .map(|i| ReplicaSpec {
                id: ReplicaId(format!("replica-{}", i)),
                heartbeat_addr: "127.0.0.1:0".parse().unwrap(),
                http_addr: format!("127.0.0.1:{}", 8100 + i).parse().unwrap(),
            })
            .collect();

        Arc::new(ClusterConfig {
            replicas,
            workers: vec![WorkerId("worker-1".to_string())],
            heartbeat_interval: Duration::from_millis(50),
            max_missed_heartbeats: 3,
            max_attempts: 3,
            executor_timeout: Duration::from_secs(1),
            assignment_stall_timeout: Duration::from_secs(60),
            replication: ReplicationMode::Async,
            sync_interval: Duration::from_secs(5),
        })
    }

    struct TestReplica {
        base: String,
        store: Arc<TaskStore>,
    }

    /// Boots one replica's HTTP surface on an ephemeral port. No heartbeat or
    /// replication loops run; ordinal 0 is promoted by hand, everyone else
    /// stays a backup.
    async fn spawn_replica(ordinal: usize) -> TestReplica {
        let config = test_config();
        let monitor = HealthMonitor::new(config.clone(), ordinal).await.unwrap();
        if ordinal == 0 {
            // Skip the boot grace; these tests want a leading replica.
            monitor.promote();
        }
        let store = TaskStore::new(config.clone(), monitor.watch(), None);
        let dispatcher = Dispatcher::new(config, store.clone(), monitor.clone());

        let app = build_router(store.clone(), monitor, dispatcher);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestReplica {
            base: format!("http://{}", addr),
            store,
        }
    }

    #[tokio::test]
    async fn test_submit_and_fetch_crawl_task() {
        let replica = spawn_replica(0).await;
        let client = reqwest::Client::new();

        let submit: SubmitResponse = client
            .post(format!("{}/tasks/crawl", replica.base))
            .json(&json!({"urls": ["https://news.example.com"], "depth": 2}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(submit.state, TaskState::Queued);

        let task: TaskRecord = client
            .get(format!("{}/task/{}", replica.base, submit.task_id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(task.id, submit.task_id);
        assert_eq!(task.payload["depth"], json!(2));
    }

    #[tokio::test]
    async fn test_invalid_submission_becomes_failed_task() {
        let replica = spawn_replica(0).await;
        let client = reqwest::Client::new();

        let submit: SubmitResponse = client
            .post(format!("{}/tasks/crawl", replica.base))
            .json(&json!({"urls": []}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(submit.state, TaskState::Failed);
        let record = replica.store.get(&submit.task_id).unwrap();
        assert_eq!(record.error.as_deref(), Some("urls must not be empty"));
    }

    #[tokio::test]
    async fn test_submit_on_backup_returns_redirect() {
        let replica = spawn_replica(1).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}/tasks/summarize", replica.base))
            .json(&json!({"content": "article text"}))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["primary"], json!("127.0.0.1:8100"));
    }

    #[tokio::test]
    async fn test_unknown_task_is_404() {
        let replica = spawn_replica(0).await;

        let response = reqwest::get(format!("{}/task/no-such-task", replica.base))
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_worker_lifecycle_over_http() {
        let replica = spawn_replica(0).await;
        let client = reqwest::Client::new();

        let submit: SubmitResponse = client
            .post(format!("{}/tasks/summarize", replica.base))
            .json(&json!({"content": "long article"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let registered: RegisterResponse = client
            .post(format!("{}{}", replica.base, ENDPOINT_REGISTER))
            .json(&RegisterRequest {
                worker: WorkerId("worker-1".to_string()),
            })
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(registered.epoch, 1);

        let poll: PollResponse = client
            .post(format!("{}{}", replica.base, ENDPOINT_POLL))
            .json(&PollRequest {
                worker: WorkerId("worker-1".to_string()),
            })
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let assignment = poll.assignment.expect("queue was not empty");
        assert_eq!(assignment.task_id, submit.task_id);

        let report: ReportResponse = client
            .post(format!("{}{}", replica.base, ENDPOINT_REPORT))
            .json(&ReportRequest {
                worker: WorkerId("worker-1".to_string()),
                task_id: assignment.task_id.clone(),
                epoch: assignment.epoch,
                outcome: TaskOutcome::Success {
                    result: json!({"summary": "tl;dr"}),
                },
            })
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(report.state, TaskState::Completed);

        let record = replica.store.get(&submit.task_id).unwrap();
        assert_eq!(record.result, Some(json!({"summary": "tl;dr"})));
    }

    #[tokio::test]
    async fn test_unknown_worker_is_rejected() {
        let replica = spawn_replica(0).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}{}", replica.base, ENDPOINT_POLL))
            .json(&PollRequest {
                worker: WorkerId("intruder".to_string()),
            })
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_replication_endpoint_applies_and_fences() {
        let primary = spawn_replica(0).await;
        let backup = spawn_replica(1).await;
        let client = reqwest::Client::new();

        let record = primary
            .store
            .insert(crate::store::types::TaskKind::Crawl, json!({}))
            .await
            .unwrap();

        let applied: ReplicateResponse = client
            .post(format!("{}{}", backup.base, ENDPOINT_REPLICATE))
            .json(&ReplicateRequest {
                from: ReplicaId("replica-0".to_string()),
                epoch: 1,
                record: record.clone(),
            })
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(applied.applied);
        assert!(backup.store.get(&record.id).is_some());

        // A zombie primary pushing under a bygone epoch is refused.
        let newer = ReplicateRequest {
            from: ReplicaId("replica-0".to_string()),
            epoch: 7,
            record: record.clone(),
        };
        client
            .post(format!("{}{}", backup.base, ENDPOINT_REPLICATE))
            .json(&newer)
            .send()
            .await
            .unwrap();

        let stale: ReplicateResponse = client
            .post(format!("{}{}", backup.base, ENDPOINT_REPLICATE))
            .json(&ReplicateRequest {
                from: ReplicaId("replica-0".to_string()),
                epoch: 1,
                record,
            })
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(!stale.applied);
    }

    #[tokio::test]
    async fn test_snapshot_served_by_primary_only() {
        let primary = spawn_replica(0).await;
        let backup = spawn_replica(1).await;

        let refused = reqwest::get(format!("{}{}", backup.base, ENDPOINT_SNAPSHOT))
            .await
            .unwrap();
        assert_eq!(refused.status(), reqwest::StatusCode::FORBIDDEN);

        primary
            .store
            .insert(crate::store::types::TaskKind::Crawl, json!({}))
            .await
            .unwrap();
        let served = reqwest::get(format!("{}{}", primary.base, ENDPOINT_SNAPSHOT))
            .await
            .unwrap();
        assert_eq!(served.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_reports_role_and_counts() {
        let replica = spawn_replica(0).await;
        let client = reqwest::Client::new();

        client
            .post(format!("{}/tasks/crawl", replica.base))
            .json(&json!({"urls": ["https://a.example"]}))
            .send()
            .await
            .unwrap();

        let health: HealthResponse = client
            .get(format!("{}/health", replica.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert!(matches!(
            health.role,
            crate::cluster::types::ReplicaRole::Primary
        ));
        assert_eq!(health.epoch, 1);
        assert_eq!(health.tasks.queued, 1);
        assert_eq!(health.queue_depth, 1);
        assert_eq!(health.active_workers, 0);
    }

    #[tokio::test]
    async fn test_list_filters_by_state() {
        let replica = spawn_replica(0).await;
        let client = reqwest::Client::new();

        client
            .post(format!("{}/tasks/crawl", replica.base))
            .json(&json!({"urls": ["https://a.example"]}))
            .send()
            .await
            .unwrap();
        client
            .post(format!("{}/tasks/crawl", replica.base))
            .json(&json!({"urls": []}))
            .send()
            .await
            .unwrap();

        let queued: Vec<TaskRecord> = client
            .get(format!("{}/tasks?state=queued", replica.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let failed: Vec<TaskRecord> = client
            .get(format!("{}/tasks?state=failed", replica.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(queued.len(), 1);
        assert_eq!(failed.len(), 1);
    }
}
