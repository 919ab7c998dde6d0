//! Worker Module Tests

#[cfg(test)]
mod tests {
    use crate::api::build_router;
    use crate::cluster::monitor::HealthMonitor;
    use crate::cluster::types::ReplicaId;
    use crate::config::{ClusterConfig, ReplicaSpec, ReplicationMode};
    use crate::dispatch::dispatcher::Dispatcher;
    use crate::dispatch::types::WorkerId;
    use crate::store::store::TaskStore;
    use crate::store::types::{TaskKind, TaskState};
    use crate::worker::agent::{RetryPolicy, WorkerAgent};
    use crate::worker::executors::{
        extract_links, extract_title, register_summarize_executor, ExecutorRegistry,
    };
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_execute_without_registered_executor_fails() {
        let registry = ExecutorRegistry::new(Duration::from_secs(1));

        let err = registry
            .execute(TaskKind::Crawl, json!({}))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("no executor registered"));
    }

    #[tokio::test]
    async fn test_executor_overrun_is_cut_off() {
        let registry = ExecutorRegistry::new(Duration::from_millis(20));
        registry.register(TaskKind::Crawl, |_payload| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!({}))
        });

        let err = registry
            .execute(TaskKind::Crawl, json!({}))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("exceeded"));
    }

    #[tokio::test]
    async fn test_summarize_takes_leading_sentences() {
        let registry = ExecutorRegistry::new(Duration::from_secs(1));
        register_summarize_executor(&registry);

        let result = registry
            .execute(
                TaskKind::Summarize,
                json!({
                    "content": "First point. Second point. Third point. Fourth point.",
                    "title": "Daily wrap"
                }),
            )
            .await
            .unwrap();

        assert_eq!(
            result["summary"],
            json!("First point. Second point. Third point.")
        );
        assert_eq!(result["title"], json!("Daily wrap"));
        assert_eq!(result["word_count"], json!(8));
    }

    #[tokio::test]
    async fn test_summarize_rejects_empty_content() {
        let registry = ExecutorRegistry::new(Duration::from_secs(1));
        register_summarize_executor(&registry);

        let err = registry
            .execute(TaskKind::Summarize, json!({"content": "   "}))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("nothing to summarize"));
    }

    #[test]
    fn test_retry_policy_backs_off_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };

        // Jitter adds up to 50ms on top of the deterministic backoff.
        let jitter = Duration::from_millis(50);
        assert!(policy.delay(1) >= Duration::from_millis(100));
        assert!(policy.delay(1) <= Duration::from_millis(100) + jitter);
        assert!(policy.delay(3) >= Duration::from_millis(400));
        assert!(policy.delay(10) <= Duration::from_secs(1) + jitter);
        assert!(policy.delay(u32::MAX) <= Duration::from_secs(1) + jitter);
    }

    #[test]
    fn test_extract_links_keeps_absolute_urls_only() {
        let html = r#"
            <a href="https://news.example.com/a">one</a>
            <a href="/relative/path">two</a>
            <a href="http://other.example.com/b">three</a>
        "#;

        let links = extract_links(html);

        assert_eq!(
            links,
            vec![
                "https://news.example.com/a".to_string(),
                "http://other.example.com/b".to_string(),
            ]
        );
    }

    #[test]
    fn test_extract_title() {
        assert_eq!(
            extract_title("<html><title> Headline </title></html>"),
            Some("Headline".to_string())
        );
        assert_eq!(extract_title("<html><body>no title</body></html>"), None);
        assert_eq!(extract_title("<title></title>"), None);
    }

    /// End to end on one replica: submit over the store, let a real agent
    /// poll, execute, and report over HTTP.
    #[tokio::test]
    async fn test_agent_completes_summarize_task() {
        // Bind first so the topology can carry the real address.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = Arc::new(ClusterConfig {
            replicas: vec![ReplicaSpec {
                id: ReplicaId("replica-0".to_string()),
                heartbeat_addr: "127.0.0.1:0".parse().unwrap(),
                http_addr: addr,
            }],
            workers: vec![WorkerId("worker-1".to_string())],
            heartbeat_interval: Duration::from_millis(25),
            max_missed_heartbeats: 3,
            max_attempts: 3,
            executor_timeout: Duration::from_secs(1),
            assignment_stall_timeout: Duration::from_secs(60),
            replication: ReplicationMode::Async,
            sync_interval: Duration::from_secs(5),
        });

        let monitor = HealthMonitor::new(config.clone(), 0).await.unwrap();
        // Skip the boot grace; the test wants a leading replica right away.
        monitor.promote();
        let store = TaskStore::new(config.clone(), monitor.watch(), None);
        let dispatcher = Dispatcher::new(config.clone(), store.clone(), monitor.clone());
        let app = build_router(store.clone(), monitor, dispatcher);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let record = store
            .insert(
                TaskKind::Summarize,
                json!({"content": "Short article. With two sentences."}),
            )
            .await
            .unwrap();

        let executors = ExecutorRegistry::new(config.executor_timeout);
        register_summarize_executor(&executors);
        let agent = WorkerAgent::new(WorkerId("worker-1".to_string()), config, executors);
        agent.start().await;

        let mut completed = false;
        for _ in 0..80 {
            tokio::time::sleep(Duration::from_millis(25)).await;
            if store.get(&record.id).unwrap().state == TaskState::Completed {
                completed = true;
                break;
            }
        }

        assert!(completed, "agent should complete the task end to end");
        let task = store.get(&record.id).unwrap();
        assert_eq!(
            task.result.unwrap()["summary"],
            json!("Short article. With two sentences.")
        );
    }

    /// Discovery with a degraded priority list: the highest-priority replica
    /// is down and the next one is a backup pointing at the real primary.
    #[tokio::test]
    async fn test_agent_finds_primary_past_dead_and_backup_replicas() {
        // A port bound once and released: replica-0 is down.
        let dead = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = dead.local_addr().unwrap();
        drop(dead);

        let backup_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backup_addr = backup_listener.local_addr().unwrap();
        let primary_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let primary_addr = primary_listener.local_addr().unwrap();

        let replica = |n: usize, addr| ReplicaSpec {
            id: ReplicaId(format!("replica-{}", n)),
            heartbeat_addr: "127.0.0.1:0".parse().unwrap(),
            http_addr: addr,
        };
        let config = Arc::new(ClusterConfig {
            replicas: vec![
                replica(0, dead_addr),
                replica(1, backup_addr),
                replica(2, primary_addr),
            ],
            workers: vec![WorkerId("worker-1".to_string())],
            heartbeat_interval: Duration::from_millis(25),
            max_missed_heartbeats: 3,
            max_attempts: 3,
            executor_timeout: Duration::from_secs(1),
            assignment_stall_timeout: Duration::from_secs(60),
            replication: ReplicationMode::Async,
            sync_interval: Duration::from_secs(5),
        });

        // replica-1 stays a backup that has adopted replica-2 as primary.
        let backup_monitor = HealthMonitor::new(config.clone(), 1).await.unwrap();
        backup_monitor.observe_primary_claim(ReplicaId("replica-2".to_string()), 2, 2);
        let backup_store = TaskStore::new(config.clone(), backup_monitor.watch(), None);
        let backup_dispatcher = Dispatcher::new(
            config.clone(),
            backup_store.clone(),
            backup_monitor.clone(),
        );
        let backup_app = build_router(backup_store, backup_monitor, backup_dispatcher);
        tokio::spawn(async move {
            axum::serve(backup_listener, backup_app).await.unwrap();
        });

        // replica-2 leads.
        let monitor = HealthMonitor::new(config.clone(), 2).await.unwrap();
        monitor.promote();
        let store = TaskStore::new(config.clone(), monitor.watch(), None);
        let dispatcher = Dispatcher::new(config.clone(), store.clone(), monitor.clone());
        let app = build_router(store.clone(), monitor, dispatcher);
        tokio::spawn(async move {
            axum::serve(primary_listener, app).await.unwrap();
        });

        let record = store
            .insert(TaskKind::Summarize, json!({"content": "One sentence."}))
            .await
            .unwrap();

        let executors = ExecutorRegistry::new(config.executor_timeout);
        register_summarize_executor(&executors);
        let agent = WorkerAgent::new(WorkerId("worker-1".to_string()), config, executors);
        agent.start().await;

        let mut completed = false;
        for _ in 0..80 {
            tokio::time::sleep(Duration::from_millis(25)).await;
            if store.get(&record.id).unwrap().state == TaskState::Completed {
                completed = true;
                break;
            }
        }

        assert!(
            completed,
            "agent should reach the primary through the degraded list"
        );
    }
}
