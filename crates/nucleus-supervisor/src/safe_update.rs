use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use nucleus_domain::{Clock, ComponentName, ComponentUpdatePolicy};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::info;

use crate::channels::{UpdateVoteChannel, VoteResponse};
use crate::error::AgentError;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Proceed,
    Deferred { until_ms: i64 },
    Aborted { reason: String },
}

struct RequestUpdate {
    deployment_id: String,
    components: Vec<ComponentName>,
    policy: ComponentUpdatePolicy,
    reply: oneshot::Sender<Decision>,
}

enum Command {
    RequestUpdate(RequestUpdate),
}

/// Gates disruptive component transitions behind a per-component update
/// vote, sitting between `ConfigStore.merge` and `Orchestrator.apply` in the
/// deployment pipeline (§2, §4.6). Mailbox-serial, per §5.
#[derive(Clone)]
pub struct SafeUpdateScheduler {
    cmd_tx: mpsc::UnboundedSender<Command>,
    cancelled: Arc<Mutex<HashSet<String>>>,
}

struct Actor {
    vote_channel: Arc<dyn UpdateVoteChannel>,
    clock: Arc<dyn Clock>,
    cancelled: Arc<Mutex<HashSet<String>>>,
    vote_window: Duration,
    defer_cap: Duration,
}

impl SafeUpdateScheduler {
    pub fn spawn(vote_channel: Arc<dyn UpdateVoteChannel>, clock: Arc<dyn Clock>, vote_window: Duration, defer_cap: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let cancelled = Arc::new(Mutex::new(HashSet::new()));
        let actor = Actor {
            vote_channel,
            clock,
            cancelled: cancelled.clone(),
            vote_window,
            defer_cap,
        };
        tokio::spawn(Self::run(actor, cmd_rx));
        SafeUpdateScheduler { cmd_tx, cancelled }
    }

    async fn run(actor: Actor, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                Command::RequestUpdate(request) => {
                    let decision = actor.decide(&request).await;
                    let _ = request.reply.send(decision);
                }
            }
        }
    }

    pub async fn request_update(
        &self,
        deployment_id: String,
        components: Vec<ComponentName>,
        policy: ComponentUpdatePolicy,
    ) -> Result<Decision, AgentError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::RequestUpdate(RequestUpdate {
                deployment_id,
                components,
                policy,
                reply,
            }))
            .map_err(|_| AgentError::Ipc("safe update scheduler is gone".to_string()))?;
        rx.await.map_err(|_| AgentError::Ipc("safe update scheduler dropped reply".to_string()))
    }

    /// Discards any in-flight vote collection for `deployment_id` and
    /// forbids a `PROCEED` for it from here on (§4.6 Cancellation).
    pub async fn cancel(&self, deployment_id: &str) {
        self.cancelled.lock().await.insert(deployment_id.to_string());
    }
}

impl Actor {
    async fn decide(&self, request: &RequestUpdate) -> Decision {
        if request.policy == ComponentUpdatePolicy::SkipNotify {
            return Decision::Proceed;
        }

        let mut max_defer_ms: u64 = 0;
        let cap_ms = self.defer_cap.as_millis() as u64;

        for component in &request.components {
            if self.cancelled.lock().await.contains(&request.deployment_id) {
                return Decision::Aborted {
                    reason: format!("deployment {} cancelled during vote collection", request.deployment_id),
                };
            }

            let response = tokio::time::timeout(self.vote_window, self.vote_channel.request_vote(component, self.vote_window))
                .await
                .ok()
                .flatten()
                .unwrap_or(VoteResponse::Ready);

            if let VoteResponse::Defer { ms, reason } = response {
                info!(component = %component, ms, reason = %reason, "component requested update deferral");
                max_defer_ms = max_defer_ms.max(ms);
                if max_defer_ms > cap_ms {
                    info!(deployment_id = %request.deployment_id, "deferral cap exceeded, proceeding anyway");
                    return Decision::Proceed;
                }
            }
        }

        if self.cancelled.lock().await.contains(&request.deployment_id) {
            return Decision::Aborted {
                reason: format!("deployment {} cancelled after vote collection", request.deployment_id),
            };
        }

        if max_defer_ms == 0 {
            Decision::Proceed
        } else {
            Decision::Deferred {
                until_ms: self.clock.now_ms() + max_defer_ms as i64,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::AlwaysReadyVoteChannel;
    use async_trait::async_trait;
    use nucleus_domain::SystemClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn skip_notify_proceeds_without_voting() {
        let scheduler = SafeUpdateScheduler::spawn(
            Arc::new(AlwaysReadyVoteChannel),
            Arc::new(SystemClock),
            Duration::from_secs(60),
            Duration::from_secs(900),
        );
        let decision = scheduler
            .request_update(
                "dep-1".to_string(),
                vec![ComponentName::new("CustomerApp").unwrap()],
                ComponentUpdatePolicy::SkipNotify,
            )
            .await
            .unwrap();
        assert_eq!(decision, Decision::Proceed);
    }

    struct DeferOnceChannel {
        called: AtomicU32,
    }

    #[async_trait]
    impl UpdateVoteChannel for DeferOnceChannel {
        async fn request_vote(&self, _component: &ComponentName, _window: Duration) -> Option<VoteResponse> {
            let count = self.called.fetch_add(1, Ordering::SeqCst);
            if count == 0 {
                Some(VoteResponse::Defer {
                    ms: 1_000,
                    reason: "busy".to_string(),
                })
            } else {
                Some(VoteResponse::Ready)
            }
        }
    }

    #[tokio::test]
    async fn a_single_defer_vote_defers_the_whole_update() {
        let scheduler = SafeUpdateScheduler::spawn(
            Arc::new(DeferOnceChannel { called: AtomicU32::new(0) }),
            Arc::new(SystemClock),
            Duration::from_secs(60),
            Duration::from_secs(900),
        );
        let decision = scheduler
            .request_update(
                "dep-1".to_string(),
                vec![ComponentName::new("A").unwrap(), ComponentName::new("B").unwrap()],
                ComponentUpdatePolicy::Notify,
            )
            .await
            .unwrap();
        assert!(matches!(decision, Decision::Deferred { .. }));
    }

    struct AllDeferChannel {
        ms: u64,
    }

    #[async_trait]
    impl UpdateVoteChannel for AllDeferChannel {
        async fn request_vote(&self, _component: &ComponentName, _window: Duration) -> Option<VoteResponse> {
            Some(VoteResponse::Defer {
                ms: self.ms,
                reason: "busy".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn deferral_is_the_max_requested_not_the_sum() {
        let start = 1_000_000;
        let clock = Arc::new(nucleus_domain::TestClock::new(start));
        let scheduler = SafeUpdateScheduler::spawn(
            Arc::new(AllDeferChannel { ms: 400 }),
            clock.clone(),
            Duration::from_secs(60),
            Duration::from_millis(900),
        );
        let decision = scheduler
            .request_update(
                "dep-1".to_string(),
                vec![
                    ComponentName::new("A").unwrap(),
                    ComponentName::new("B").unwrap(),
                    ComponentName::new("C").unwrap(),
                ],
                ComponentUpdatePolicy::Notify,
            )
            .await
            .unwrap();
        // Three components each defer 400ms; summed that's 1200ms > the
        // 900ms cap, but the max single request (400ms) is well under it.
        assert_eq!(decision, Decision::Deferred { until_ms: start + 400 });
    }

    #[tokio::test]
    async fn cancelling_before_vote_collection_aborts() {
        let scheduler = SafeUpdateScheduler::spawn(
            Arc::new(AlwaysReadyVoteChannel),
            Arc::new(SystemClock),
            Duration::from_secs(60),
            Duration::from_secs(900),
        );
        scheduler.cancel("dep-1").await;
        let decision = scheduler
            .request_update(
                "dep-1".to_string(),
                vec![ComponentName::new("CustomerApp").unwrap()],
                ComponentUpdatePolicy::Notify,
            )
            .await
            .unwrap();
        assert!(matches!(decision, Decision::Aborted { .. }));
    }
}
