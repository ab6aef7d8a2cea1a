//! Unread-count aggregation.
//!
//! One badge value derived from two asynchronous sources: the REST
//! conversation snapshot (source of truth at rest) and streamed deltas that
//! merely signal "something changed". The aggregator is the only writer of the
//! badge; consumers read a converged value through a watch channel and never
//! see a partially-updated intermediate state.

use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::{EventBus, SubscriptionToken};
use crate::core::{EventKind, RealtimeResult};

/// Per-conversation summary returned by the conversations-list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: i64,
    pub unread_count_for_current_user: u64,
}

/// External REST collaborator: the conversations-list endpoint.
pub trait ConversationApi: Send + Sync + 'static {
    fn fetch_summaries(
        &self,
    ) -> impl std::future::Future<Output = RealtimeResult<Vec<ConversationSummary>>> + Send;
}

#[derive(Debug)]
enum AggregatorSignal {
    /// A `message.new` or `conversation.update` arrived; re-fetch.
    Activity,
    Shutdown,
}

/// Handle to a running aggregator task.
pub struct UnreadHandle {
    badge_rx: watch::Receiver<u64>,
    signal_tx: mpsc::UnboundedSender<AggregatorSignal>,
    task: JoinHandle<()>,
    tokens: Vec<SubscriptionToken>,
}

impl UnreadHandle {
    /// Current converged badge value; updates only when a fetch resolves.
    pub fn badge(&self) -> watch::Receiver<u64> {
        self.badge_rx.clone()
    }

    /// Manually request a re-aggregation (e.g. after marking a thread read).
    pub fn recheck(&self) {
        let _ = self.signal_tx.send(AggregatorSignal::Activity);
    }

    /// Subscribe to the bus kinds that invalidate the badge. Signals sent
    /// before the bootstrap fetch completes stay queued in the aggregator's
    /// mailbox and are applied after the snapshot, never dropped.
    pub fn attach(&mut self, bus: &EventBus) {
        for kind in [EventKind::MessageNew, EventKind::ConversationUpdate] {
            let tx = self.signal_tx.clone();
            self.tokens.push(bus.subscribe(kind, move |_payload| {
                let _ = tx.send(AggregatorSignal::Activity);
            }));
        }
    }

    /// Cancel subscriptions and stop the task. Idempotent at the bus level.
    pub async fn shutdown(self) {
        for token in &self.tokens {
            token.cancel();
        }
        let _ = self.signal_tx.send(AggregatorSignal::Shutdown);
        let _ = self.task.await;
    }
}

/// The aggregator task. Serial by construction: one fetch at a time, so
/// overlapping triggers coalesce in the mailbox and at most one follow-up
/// fetch runs after an in-flight one resolves.
pub struct UnreadAggregator;

impl UnreadAggregator {
    pub fn spawn<A: ConversationApi>(api: A) -> UnreadHandle {
        let (badge_tx, badge_rx) = watch::channel(0u64);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run(api, badge_tx, signal_rx));

        UnreadHandle {
            badge_rx,
            signal_tx,
            task,
            tokens: Vec::new(),
        }
    }
}

fn sum_unread(summaries: &[ConversationSummary]) -> u64 {
    summaries
        .iter()
        .map(|s| s.unread_count_for_current_user)
        .sum()
}

async fn run<A: ConversationApi>(
    api: A,
    badge_tx: watch::Sender<u64>,
    mut signal_rx: mpsc::UnboundedReceiver<AggregatorSignal>,
) {
    // Bootstrap snapshot. On failure the badge keeps its initial value and the
    // next activity signal retries.
    match api.fetch_summaries().await {
        Ok(summaries) => {
            let total = sum_unread(&summaries);
            debug!(total, conversations = summaries.len(), "initial unread snapshot applied");
            let _ = badge_tx.send(total);
        }
        Err(err) => {
            warn!(error = %err, "initial conversation fetch failed; keeping badge at 0");
        }
    }

    while let Some(signal) = signal_rx.recv().await {
        match signal {
            AggregatorSignal::Shutdown => break,
            AggregatorSignal::Activity => {}
        }

        // Coalesce: everything queued behind this signal is covered by the
        // single fetch below.
        loop {
            match signal_rx.try_recv() {
                Ok(AggregatorSignal::Activity) => continue,
                Ok(AggregatorSignal::Shutdown) => return,
                Err(_) => break,
            }
        }

        match api.fetch_summaries().await {
            Ok(summaries) => {
                let total = sum_unread(&summaries);
                debug!(total, "unread badge re-converged");
                let _ = badge_tx.send(total);
            }
            Err(err) => {
                // Keep the previous converged value; no flicker on failure.
                warn!(error = %err, "conversation re-fetch failed; badge unchanged");
            }
        }
    }
}
