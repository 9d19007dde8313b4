//! Webhook 投递调度
//!
//! - 有界队列：满时立即拒绝，`emit` 从不等待投递
//! - Semaphore 限制同时进行中的投递数
//! - 瞬时失败指数退避重试，永久失败或重试耗尽进入死信
//! - 每个任务结束时在广播通道上发布 [`DeliveryOutcome`]
//! - `shutdown()` 停止接收、取消退避等待，宽限期后中止剩余发送

pub mod retry;
pub mod sender;
pub mod signature;

pub use retry::{classify, FailureKind, RetryPolicy};
pub use sender::{DeliveryError, OutboundRequest, ReqwestSender, WebhookSender};

use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{config::WebhookConfig, models::webhook::WebhookSubscription};

const OUTCOME_CHANNEL_CAPACITY: usize = 1024;

/// 一个订阅的一次投递任务
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    pub delivery_id: Uuid,
    pub tenant_id: Uuid,
    pub subscription_id: Uuid,
    pub event_name: String,
    pub target_url: String,
    pub secret: String,
    /// 序列化后的 payload，所有订阅共享同一份
    pub body: Arc<[u8]>,
}

impl DeliveryJob {
    pub fn new(subscription: &WebhookSubscription, event_name: &str, body: Arc<[u8]>) -> Self {
        Self {
            delivery_id: Uuid::new_v4(),
            tenant_id: subscription.tenant_id,
            subscription_id: subscription.id,
            event_name: event_name.to_string(),
            target_url: subscription.target_url.clone(),
            secret: subscription.secret.clone(),
            body,
        }
    }

    /// 签名只计算一次，重试复用
    fn into_request(self) -> OutboundRequest {
        OutboundRequest {
            delivery_id: self.delivery_id,
            signature: signature::sign(&self.secret, &self.body),
            url: self.target_url,
            event_name: self.event_name,
            body: self.body,
        }
    }
}

/// 投递结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered {
        delivery_id: Uuid,
        subscription_id: Uuid,
        attempts: u32,
    },
    DeadLettered {
        delivery_id: Uuid,
        subscription_id: Uuid,
        reason: String,
        attempts: u32,
    },
    Cancelled {
        delivery_id: Uuid,
        subscription_id: Uuid,
    },
}

impl DeliveryOutcome {
    pub fn delivery_id(&self) -> Uuid {
        match self {
            DeliveryOutcome::Delivered { delivery_id, .. }
            | DeliveryOutcome::DeadLettered { delivery_id, .. }
            | DeliveryOutcome::Cancelled { delivery_id, .. } => *delivery_id,
        }
    }

    pub fn subscription_id(&self) -> Uuid {
        match self {
            DeliveryOutcome::Delivered { subscription_id, .. }
            | DeliveryOutcome::DeadLettered { subscription_id, .. }
            | DeliveryOutcome::Cancelled { subscription_id, .. } => *subscription_id,
        }
    }
}

/// 入队失败
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    #[error("delivery queue is full")]
    QueueFull,

    #[error("dispatcher is shutting down")]
    Closed,
}

/// emit 的结果：匹配了多少订阅、哪些已入队、哪些被拒绝
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct EmitReport {
    pub matched: usize,
    pub enqueued: Vec<Uuid>,
    pub rejected: Vec<RejectedDelivery>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RejectedDelivery {
    pub subscription_id: Uuid,
    pub reason: String,
}

/// 投递调度器
pub struct DeliveryDispatcher {
    queue: mpsc::Sender<DeliveryJob>,
    outcomes: broadcast::Sender<DeliveryOutcome>,
    cancel: CancellationToken,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryDispatcher {
    /// 启动调度任务，必须在 tokio 运行时内调用
    pub fn start(config: &WebhookConfig, sender: Arc<dyn WebhookSender>) -> Self {
        let (queue, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (outcomes, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let worker = Worker {
            sender,
            policy: RetryPolicy::from_config(config),
            semaphore: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            outcomes: outcomes.clone(),
            cancel: cancel.clone(),
            grace: Duration::from_secs(config.shutdown_grace_secs),
        };

        tracing::info!(
            queue_capacity = config.queue_capacity,
            max_in_flight = config.max_in_flight,
            max_attempts = config.max_attempts,
            "Delivery dispatcher started"
        );

        let pump = tokio::spawn(worker.run(rx));

        Self {
            queue,
            outcomes,
            cancel,
            pump: Mutex::new(Some(pump)),
        }
    }

    /// 非阻塞入队
    pub fn enqueue(&self, job: DeliveryJob) -> Result<(), EnqueueError> {
        if self.cancel.is_cancelled() {
            return Err(EnqueueError::Closed);
        }

        match self.queue.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(
                    delivery_id = %job.delivery_id,
                    subscription_id = %job.subscription_id,
                    event_name = %job.event_name,
                    "Delivery queue full, job rejected"
                );
                metrics::counter!("webhook_queue_rejected_total").increment(1);
                Err(EnqueueError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EnqueueError::Closed),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryOutcome> {
        self.outcomes.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 停止接收新任务，等待进行中的投递，超过宽限期后中止
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let pump = self
            .pump
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(pump) = pump {
            if let Err(e) = pump.await {
                tracing::error!(error = %e, "Delivery dispatcher task failed");
            }
        }

        tracing::info!("Delivery dispatcher stopped");
    }
}

struct Worker {
    sender: Arc<dyn WebhookSender>,
    policy: RetryPolicy,
    semaphore: Arc<Semaphore>,
    outcomes: broadcast::Sender<DeliveryOutcome>,
    cancel: CancellationToken,
    grace: Duration,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<DeliveryJob>) {
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Delivery task panicked");
                    }
                }

                job = rx.recv() => {
                    let Some(job) = job else { break };

                    let permit = tokio::select! {
                        permit = self.semaphore.clone().acquire_owned() => permit,
                        _ = self.cancel.cancelled() => {
                            self.publish_cancelled(&job);
                            break;
                        }
                    };

                    let Ok(permit) = permit else { break };
                    in_flight.spawn(self.delivery(job, permit));
                }
            }
        }

        // 队列中尚未开始的任务直接取消
        rx.close();
        while let Ok(job) = rx.try_recv() {
            self.publish_cancelled(&job);
        }

        let remaining = in_flight.len();
        if remaining > 0 {
            tracing::info!(in_flight = remaining, "Waiting for in-flight deliveries");
        }

        let drained = tokio::time::timeout(self.grace, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                aborted = in_flight.len(),
                grace_secs = self.grace.as_secs(),
                "Shutdown grace period elapsed, aborting deliveries"
            );
            in_flight.abort_all();
            while in_flight.join_next().await.is_some() {}
        }
    }

    fn publish_cancelled(&self, job: &DeliveryJob) {
        metrics::counter!("webhook_deliveries_total", "outcome" => "cancelled").increment(1);
        let _ = self.outcomes.send(DeliveryOutcome::Cancelled {
            delivery_id: job.delivery_id,
            subscription_id: job.subscription_id,
        });
    }

    /// 单个任务的执行体，持有并发许可直到结束
    fn delivery(
        &self,
        job: DeliveryJob,
        permit: OwnedSemaphorePermit,
    ) -> impl std::future::Future<Output = ()> + Send + 'static {
        let sender = self.sender.clone();
        let policy = self.policy.clone();
        let outcomes = self.outcomes.clone();
        let cancel = self.cancel.clone();

        async move {
            let _permit = permit;
            let subscription_id = job.subscription_id;
            let tenant_id = job.tenant_id;
            let request = job.into_request();

            let outcome = deliver(&*sender, &policy, &cancel, &request, tenant_id, subscription_id).await;

            let label = match &outcome {
                DeliveryOutcome::Delivered { .. } => "delivered",
                DeliveryOutcome::DeadLettered { .. } => "dead_lettered",
                DeliveryOutcome::Cancelled { .. } => "cancelled",
            };
            metrics::counter!("webhook_deliveries_total", "outcome" => label).increment(1);

            let _ = outcomes.send(outcome);
        }
    }
}

async fn deliver(
    sender: &dyn WebhookSender,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    request: &OutboundRequest,
    tenant_id: Uuid,
    subscription_id: Uuid,
) -> DeliveryOutcome {
    let delivery_id = request.delivery_id;
    let mut attempt = 1;

    loop {
        match sender.send(request).await {
            Ok(status) => {
                tracing::info!(
                    %delivery_id,
                    %tenant_id,
                    %subscription_id,
                    event_name = %request.event_name,
                    status,
                    attempt,
                    "Webhook delivered"
                );
                return DeliveryOutcome::Delivered {
                    delivery_id,
                    subscription_id,
                    attempts: attempt,
                };
            }
            Err(err) if policy.should_retry(&err, attempt) => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    %delivery_id,
                    %tenant_id,
                    %subscription_id,
                    url = %request.url,
                    error = %err,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    "Webhook delivery failed, retrying"
                );
                metrics::counter!("webhook_delivery_retries_total").increment(1);

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return DeliveryOutcome::Cancelled { delivery_id, subscription_id };
                    }
                }
                attempt += 1;
            }
            Err(err) => {
                let reason = match classify(&err) {
                    FailureKind::Permanent => format!("permanent failure: {}", err),
                    FailureKind::Transient => format!("retries exhausted: {}", err),
                };
                tracing::error!(
                    %delivery_id,
                    %tenant_id,
                    %subscription_id,
                    url = %request.url,
                    reason = %reason,
                    attempts = attempt,
                    "Webhook delivery dead-lettered"
                );
                return DeliveryOutcome::DeadLettered {
                    delivery_id,
                    subscription_id,
                    reason,
                    attempts: attempt,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 按顺序返回预设结果，用完后一律成功
    struct ScriptedSender {
        script: Mutex<VecDeque<Result<u16, DeliveryError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSender {
        fn new(script: Vec<Result<u16, DeliveryError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl WebhookSender for ScriptedSender {
        async fn send(&self, _request: &OutboundRequest) -> Result<u16, DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(200))
        }
    }

    /// 一直挂起直到被中止
    struct HangingSender;

    #[async_trait]
    impl WebhookSender for HangingSender {
        async fn send(&self, _request: &OutboundRequest) -> Result<u16, DeliveryError> {
            std::future::pending::<()>().await;
            Ok(200)
        }
    }

    fn config() -> WebhookConfig {
        WebhookConfig {
            delivery_timeout_secs: 1,
            max_in_flight: 2,
            queue_capacity: 8,
            max_attempts: 3,
            backoff_base_ms: 1,
            backoff_max_secs: 1,
            shutdown_grace_secs: 0,
        }
    }

    fn job() -> DeliveryJob {
        DeliveryJob {
            delivery_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            subscription_id: Uuid::new_v4(),
            event_name: "contact.created".to_string(),
            target_url: "https://hooks.example.com/in".to_string(),
            secret: "whsec_test".to_string(),
            body: Arc::from(&br#"{"id":"c1"}"#[..]),
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let sender = ScriptedSender::new(vec![Err(DeliveryError::Status(503)), Err(DeliveryError::Timeout)]);
        let dispatcher = DeliveryDispatcher::start(&config(), sender.clone());
        let mut outcomes = dispatcher.subscribe();

        dispatcher.enqueue(job()).unwrap();

        match outcomes.recv().await.unwrap() {
            DeliveryOutcome::Delivered { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(sender.calls.load(Ordering::SeqCst), 3);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_permanent_failure_dead_letters_immediately() {
        let sender = ScriptedSender::new(vec![Err(DeliveryError::Status(404))]);
        let dispatcher = DeliveryDispatcher::start(&config(), sender.clone());
        let mut outcomes = dispatcher.subscribe();

        dispatcher.enqueue(job()).unwrap();

        match outcomes.recv().await.unwrap() {
            DeliveryOutcome::DeadLettered { attempts, reason, .. } => {
                assert_eq!(attempts, 1);
                assert!(reason.contains("404"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter() {
        let sender = ScriptedSender::new(vec![
            Err(DeliveryError::Status(500)),
            Err(DeliveryError::Status(502)),
            Err(DeliveryError::Status(503)),
        ]);
        let dispatcher = DeliveryDispatcher::start(&config(), sender.clone());
        let mut outcomes = dispatcher.subscribe();

        dispatcher.enqueue(job()).unwrap();

        match outcomes.recv().await.unwrap() {
            DeliveryOutcome::DeadLettered { attempts, reason, .. } => {
                assert_eq!(attempts, 3);
                assert!(reason.starts_with("retries exhausted"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(sender.calls.load(Ordering::SeqCst), 3);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_waiting() {
        let config = WebhookConfig {
            max_in_flight: 1,
            queue_capacity: 1,
            ..config()
        };
        let dispatcher = DeliveryDispatcher::start(&config, Arc::new(HangingSender));

        // 第一个被取走执行后挂起，第二个卡在等许可，第三个占满队列
        let mut rejected = 0;
        for _ in 0..8 {
            if dispatcher.enqueue(job()) == Err(EnqueueError::QueueFull) {
                rejected += 1;
            }
        }
        assert!(rejected > 0);

        dispatcher.shutdown().await;
        assert_eq!(dispatcher.enqueue(job()), Err(EnqueueError::Closed));
    }

    #[tokio::test]
    async fn test_shutdown_aborts_hanging_sends() {
        let dispatcher = DeliveryDispatcher::start(&config(), Arc::new(HangingSender));
        dispatcher.enqueue(job()).unwrap();
        tokio::task::yield_now().await;

        // 宽限期为 0，不应该永久阻塞
        tokio::time::timeout(Duration::from_secs(5), dispatcher.shutdown())
            .await
            .unwrap();
        assert!(dispatcher.is_shutting_down());
    }
}
