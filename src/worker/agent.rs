use rand::Rng;
use reqwest::StatusCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use super::executors::ExecutorRegistry;
use crate::api::protocol::HealthResponse;
use crate::cluster::types::ReplicaRole;
use crate::config::ClusterConfig;
use crate::dispatch::protocol::{
    Assignment, PollRequest, PollResponse, RegisterRequest, RegisterResponse, ReportRequest,
    ReportResponse, TaskOutcome, WorkerHeartbeatRequest, ENDPOINT_POLL, ENDPOINT_REGISTER,
    ENDPOINT_REPORT, ENDPOINT_WORKER_HEARTBEAT,
};
use crate::dispatch::types::WorkerId;
use crate::store::types::{ErrorBody, TaskId};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
const REPORT_TRIES: usize = 5;

/// Bounded exponential backoff for reconnect attempts against the cluster.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), doubled each time up to
    /// the cap, plus jitter so a restarted fleet does not reconnect in sync.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self
            .base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay);
        backoff + Duration::from_millis(rand::thread_rng().gen_range(0..50))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

enum Poll {
    Assigned(Assignment),
    Empty,
    Unavailable,
}

/// The worker-side loop: find the primary, register, poll it for one
/// assignment at a time, execute, report.
///
/// The agent tracks the primary optimistically. Every refusal carries a hint
/// to the believed primary; when even that fails, the agent falls back to
/// walking the replica list in priority order, under the bounded backoff of
/// its [`RetryPolicy`]. After a failover the new primary has never heard of
/// us, so registration happens again whenever the believed primary changes.
pub struct WorkerAgent {
    id: WorkerId,
    config: Arc<ClusterConfig>,
    executors: Arc<ExecutorRegistry>,
    client: reqwest::Client,
    policy: RetryPolicy,
    primary: RwLock<Option<String>>,
    registered: AtomicBool,
    current_task: RwLock<Option<TaskId>>,
    shutdown_tx: watch::Sender<bool>,
}

impl WorkerAgent {
    pub fn new(
        id: WorkerId,
        config: Arc<ClusterConfig>,
        executors: Arc<ExecutorRegistry>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            id,
            config,
            executors,
            client: reqwest::Client::new(),
            policy: RetryPolicy::default(),
            primary: RwLock::new(None),
            registered: AtomicBool::new(false),
            current_task: RwLock::new(None),
            shutdown_tx,
        })
    }

    pub async fn start(self: Arc<Self>) {
        info!("Starting worker agent {}", self.id);

        let agent = self.clone();
        tokio::spawn(async move {
            agent.work_loop().await;
        });

        let agent = self.clone();
        tokio::spawn(async move {
            agent.heartbeat_loop().await;
        });
    }

    /// Cooperative stop: the loops finish their current unit of work and exit.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub async fn work_loop(self: Arc<Self>) {
        let mut failures: u32 = 0;

        while !self.is_shutting_down() {
            match self.poll_once().await {
                Poll::Assigned(assignment) => {
                    failures = 0;
                    self.run_assignment(assignment).await;
                }
                Poll::Empty => {
                    failures = 0;
                    tokio::time::sleep(self.config.heartbeat_interval).await;
                }
                Poll::Unavailable => {
                    failures = failures.saturating_add(1);
                    tokio::time::sleep(self.policy.delay(failures)).await;
                }
            }
        }

        info!("Worker agent {} stopped", self.id);
    }

    /// One poll against the believed primary.
    async fn poll_once(&self) -> Poll {
        let Some(primary) = self.primary_addr().await else {
            return Poll::Unavailable;
        };
        if !self.ensure_registered(&primary).await {
            return Poll::Unavailable;
        }

        let url = format!("http://{}{}", primary, ENDPOINT_POLL);
        let response = self
            .client
            .post(url)
            .json(&PollRequest {
                worker: self.id.clone(),
            })
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status() == StatusCode::SERVICE_UNAVAILABLE => {
                self.follow_redirect(resp).await;
                Poll::Unavailable
            }
            Ok(resp) if resp.status().is_success() => {
                match resp.json::<PollResponse>().await {
                    Ok(PollResponse {
                        assignment: Some(assignment),
                        ..
                    }) => Poll::Assigned(assignment),
                    Ok(_) => Poll::Empty,
                    Err(_) => Poll::Unavailable,
                }
            }
            Ok(resp) => {
                warn!("Poll refused with {}", resp.status());
                Poll::Unavailable
            }
            Err(e) => {
                debug!("Poll against {} failed: {}", primary, e);
                self.forget_primary().await;
                Poll::Unavailable
            }
        }
    }

    async fn run_assignment(&self, assignment: Assignment) {
        info!(
            "Executing {:?} task {} (epoch {})",
            assignment.kind, assignment.task_id, assignment.epoch
        );
        *self.current_task.write().await = Some(assignment.task_id.clone());

        let outcome = match self
            .executors
            .execute(assignment.kind, assignment.payload)
            .await
        {
            Ok(result) => TaskOutcome::Success { result },
            Err(e) => TaskOutcome::Failure {
                error: e.to_string(),
            },
        };

        self.report(ReportRequest {
            worker: self.id.clone(),
            task_id: assignment.task_id,
            epoch: assignment.epoch,
            outcome,
        })
        .await;

        *self.current_task.write().await = None;
    }

    /// Delivers an outcome, following primary redirects. A Conflict response
    /// means the assignment went stale under us (requeue or failover); the
    /// result is discarded and the requeued copy will run again.
    async fn report(&self, request: ReportRequest) {
        for attempt in 1..=REPORT_TRIES as u32 {
            let Some(primary) = self.primary_addr().await else {
                tokio::time::sleep(self.policy.delay(attempt)).await;
                continue;
            };

            let url = format!("http://{}{}", primary, ENDPOINT_REPORT);
            let response = self
                .client
                .post(url)
                .json(&request)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    if let Ok(ack) = resp.json::<ReportResponse>().await {
                        info!("Task {} acknowledged as {:?}", ack.task_id, ack.state);
                    }
                    return;
                }
                Ok(resp) if resp.status() == StatusCode::CONFLICT => {
                    info!(
                        "Result for task {} went stale, discarding",
                        request.task_id
                    );
                    return;
                }
                Ok(resp) if resp.status() == StatusCode::SERVICE_UNAVAILABLE => {
                    self.follow_redirect(resp).await;
                }
                Ok(resp) => {
                    warn!(
                        "Report for task {} refused with {}",
                        request.task_id,
                        resp.status()
                    );
                    return;
                }
                Err(e) => {
                    debug!("Report against {} failed: {}", primary, e);
                    self.forget_primary().await;
                    tokio::time::sleep(self.policy.delay(attempt)).await;
                }
            }
        }

        warn!("Gave up reporting task {}", request.task_id);
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval);

        while !self.is_shutting_down() {
            interval.tick().await;
            let Some(primary) = self.primary_addr().await else {
                continue;
            };

            let url = format!("http://{}{}", primary, ENDPOINT_WORKER_HEARTBEAT);
            let request = WorkerHeartbeatRequest {
                worker: self.id.clone(),
                current_task: self.current_task.read().await.clone(),
            };

            match self
                .client
                .post(url)
                .json(&request)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await
            {
                Ok(resp) if resp.status() == StatusCode::SERVICE_UNAVAILABLE => {
                    self.follow_redirect(resp).await;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Heartbeat to {} failed: {}", primary, e);
                    self.forget_primary().await;
                }
            }
        }
    }

    /// Introduces this worker to the primary if it has not yet done so under
    /// the current believed address.
    async fn ensure_registered(&self, primary: &str) -> bool {
        if self.registered.load(Ordering::Acquire) {
            return true;
        }

        let url = format!("http://{}{}", primary, ENDPOINT_REGISTER);
        let response = self
            .client
            .post(url)
            .json(&RegisterRequest {
                worker: self.id.clone(),
            })
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                if let Ok(ack) = resp.json::<RegisterResponse>().await {
                    info!("Registered with primary at {} (epoch {})", primary, ack.epoch);
                }
                self.registered.store(true, Ordering::Release);
                true
            }
            Ok(resp) if resp.status() == StatusCode::SERVICE_UNAVAILABLE => {
                self.follow_redirect(resp).await;
                false
            }
            Ok(resp) => {
                warn!("Registration refused with {}", resp.status());
                false
            }
            Err(e) => {
                debug!("Registration against {} failed: {}", primary, e);
                self.forget_primary().await;
                false
            }
        }
    }

    /// The believed primary's HTTP address, discovering one if needed.
    async fn primary_addr(&self) -> Option<String> {
        if let Some(primary) = self.primary.read().await.clone() {
            return Some(primary);
        }

        let discovered = self.discover_primary().await;
        if let Some(addr) = &discovered {
            info!("Discovered primary at {}", addr);
            *self.primary.write().await = Some(addr.clone());
        }
        discovered
    }

    /// Walks the replica list in priority order asking each who leads.
    async fn discover_primary(&self) -> Option<String> {
        for replica in self.config.replicas.iter() {
            let url = format!("http://{}/health", replica.http_addr);
            let Ok(response) = self
                .client
                .get(url)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await
            else {
                continue;
            };
            let Ok(health) = response.json::<HealthResponse>().await else {
                continue;
            };

            if health.role == ReplicaRole::Primary {
                return Some(replica.http_addr.to_string());
            }
            if let Some(primary_id) = health.primary {
                if let Some(spec) = self.config.replica(&primary_id) {
                    return Some(spec.http_addr.to_string());
                }
            }
        }
        None
    }

    /// Adopts the primary hint carried by a NotPrimary refusal. Whoever leads
    /// now has never heard of us, so registration starts over.
    async fn follow_redirect(&self, response: reqwest::Response) {
        let hint = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.primary);

        self.registered.store(false, Ordering::Release);
        match hint {
            Some(addr) => {
                debug!("Redirected to primary at {}", addr);
                *self.primary.write().await = Some(addr);
            }
            None => {
                *self.primary.write().await = None;
            }
        }
    }

    async fn forget_primary(&self) {
        self.registered.store(false, Ordering::Release);
        *self.primary.write().await = None;
    }
}
