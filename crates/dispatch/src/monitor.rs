//! Race monitor
//!
//! Watches every chat of one dispatch attempt and collapses the race into a
//! single result:
//!
//! - the first chat observed as `started` wins, every other chat is dropped
//! - a chat whose contract timer fires is marked missed and leaves the race
//! - a chat that closes without being accepted leaves the race silently
//! - an empty race, or the global ceiling, ends in a timeout
//! - an authorization failure on any subscription ends the attempt
//! - a network outage on a subscription is tolerated for a grace period
//!
//! Per-chat work (the status subscription and the miss timer) runs in tasks
//! that only report events; every decision is taken by the single loop in
//! [`RaceMonitor::run`]. All tasks hang off one race token, so teardown is a
//! single cancel followed by a join of the task set.
//!
//! Missed calls are the one remote mutation a race makes. They run beside the
//! loop under the attempt token, so a slow backend never delays a decision.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use supportchat_shared::{ChatId, ChatStatus};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::ChatBackend;
use crate::config::DispatchConfig;
use crate::creator::CreatedChat;
use crate::error::{BackendError, DispatchError};
use crate::guard::OutcomeGuard;
use crate::pending::{PendingSet, RaceGauges};

/// Timing knobs of a race
#[derive(Debug, Clone)]
pub struct RaceSettings {
    pub global_timeout: Duration,
    pub connection_grace: Duration,
    pub resubscribe_base_delay: Duration,
    pub resubscribe_max_delay: Duration,
}

impl From<&DispatchConfig> for RaceSettings {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            global_timeout: config.global_timeout,
            connection_grace: config.connection_grace,
            resubscribe_base_delay: config.resubscribe_base_delay,
            resubscribe_max_delay: config.resubscribe_max_delay,
        }
    }
}

/// How a race ended
#[derive(Debug)]
pub enum RaceOutcome {
    Won(CreatedChat),
    TimedOut,
    Aborted,
    Failed(DispatchError),
}

impl fmt::Display for RaceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaceOutcome::Won(created) => write!(f, "won by {}", created.chat.id),
            RaceOutcome::TimedOut => f.write_str("timed out"),
            RaceOutcome::Aborted => f.write_str("aborted"),
            RaceOutcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

#[derive(Debug)]
enum RaceEvent {
    Status(ChatStatus),
    SubscriptionError(BackendError),
    Recovered,
    AuthFailed(BackendError),
    MissTimerFired,
}

#[derive(Debug)]
struct TaggedEvent {
    generation: u64,
    chat_id: ChatId,
    event: RaceEvent,
}

/// Per-chat tasks report through this; every event carries its attempt's generation
#[derive(Clone)]
struct EventSender {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl EventSender {
    /// Returns false once the race loop is gone
    fn send(&self, chat_id: &ChatId, event: RaceEvent) -> bool {
        self.tx
            .send(TaggedEvent {
                generation: self.generation,
                chat_id: chat_id.clone(),
                event,
            })
            .is_ok()
    }
}

/// Races the chats of one dispatch attempt
pub struct RaceMonitor {
    backend: Arc<dyn ChatBackend>,
    settings: RaceSettings,
    generation: u64,
    attempt_token: CancellationToken,
    guard: OutcomeGuard,
    gauges: RaceGauges,
}

impl RaceMonitor {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        settings: RaceSettings,
        generation: u64,
        attempt_token: CancellationToken,
        guard: OutcomeGuard,
        gauges: RaceGauges,
    ) -> Self {
        Self {
            backend,
            settings,
            generation,
            attempt_token,
            guard,
            gauges,
        }
    }

    /// Race `chats` to a result. Every subscription and timer of the race is
    /// disposed before this returns.
    pub async fn run(self, chats: Vec<CreatedChat>) -> RaceOutcome {
        let RaceMonitor {
            backend,
            settings,
            generation,
            attempt_token,
            guard,
            gauges,
        } = self;

        let race_token = attempt_token.child_token();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = EventSender { generation, tx };
        let mut tasks = JoinSet::new();
        let mut race = Race {
            backend: backend.clone(),
            generation,
            attempt_token: attempt_token.clone(),
            pending: PendingSet::new(),
            guard,
            marks: JoinSet::new(),
        };

        for created in chats {
            let chat_token = race_token.child_token();
            let chat_id = created.chat.id.clone();

            tasks.spawn(watch_status(
                backend.clone(),
                chat_id.clone(),
                chat_token.clone(),
                events.clone(),
                settings.clone(),
                gauges.clone(),
            ));

            if let Some(timeout) = created.contract.miss_timeout() {
                tasks.spawn(miss_timer(
                    chat_id,
                    timeout,
                    chat_token.clone(),
                    events.clone(),
                    gauges.clone(),
                ));
            }

            race.pending.insert(created, chat_token);
        }
        drop(events);

        info!(
            generation,
            chats = race.pending.len(),
            ceiling_secs = settings.global_timeout.as_secs(),
            "Race started"
        );

        let ceiling = tokio::time::sleep(settings.global_timeout);
        tokio::pin!(ceiling);

        let outcome = loop {
            let grace_deadline = race
                .pending
                .oldest_degraded()
                .map(|(_, degraded)| degraded.since + settings.connection_grace);

            tokio::select! {
                biased;

                _ = attempt_token.cancelled() => break RaceOutcome::Aborted,

                _ = &mut ceiling => {
                    // An acceptance already queued beats the ceiling
                    if let Some(outcome) = race.drain(&mut rx).await {
                        break outcome;
                    }
                    warn!(
                        generation,
                        remaining = race.pending.len(),
                        "No agent accepted before the global ceiling"
                    );
                    break RaceOutcome::TimedOut;
                }

                _ = sleep_until_deadline(grace_deadline) => {
                    if let Some(outcome) = race.drain(&mut rx).await {
                        break outcome;
                    }
                    if let Some((chat_id, degraded)) = race.pending.oldest_degraded() {
                        error!(
                            generation,
                            chat_id = %chat_id,
                            error = %degraded.error,
                            "Status subscription did not recover within grace period"
                        );
                        break RaceOutcome::Failed(DispatchError::SubscriptionLost {
                            chat_id: chat_id.clone(),
                            source: degraded.error.clone(),
                        });
                    }
                }

                Some(tagged) = rx.recv() => {
                    if let Some(outcome) = race.handle(tagged).await {
                        break outcome;
                    }
                }
            }
        };

        race.pending.clear();
        race_token.cancel();
        tasks.shutdown().await;
        // In-flight missed calls finish on their own unless the attempt is disposed
        race.marks.detach_all();

        info!(generation, outcome = %outcome, "Race finished");
        outcome
    }
}

/// Decision state of one race, owned by the race loop
struct Race {
    backend: Arc<dyn ChatBackend>,
    generation: u64,
    attempt_token: CancellationToken,
    pending: PendingSet,
    guard: OutcomeGuard,
    marks: JoinSet<()>,
}

impl Race {
    /// Handle every event already queued, stopping at the first decision
    async fn drain(&mut self, rx: &mut mpsc::UnboundedReceiver<TaggedEvent>) -> Option<RaceOutcome> {
        while let Ok(tagged) = rx.try_recv() {
            if let Some(outcome) = self.handle(tagged).await {
                return Some(outcome);
            }
        }
        None
    }

    fn mark_missed(&mut self, chat_id: ChatId) {
        let backend = self.backend.clone();
        let token = self.attempt_token.clone();
        self.marks.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(chat_id = %chat_id, "Attempt disposed before chat was marked missed");
                }
                result = backend.mark_chat_missed(&chat_id) => {
                    if let Err(e) = result {
                        warn!(chat_id = %chat_id, error = %e, "Failed to mark chat missed");
                    }
                }
            }
        });
    }

    async fn handle(&mut self, tagged: TaggedEvent) -> Option<RaceOutcome> {
        if tagged.generation != self.generation {
            debug!(
                generation = self.generation,
                event_generation = tagged.generation,
                "Dropping event from superseded attempt"
            );
            return None;
        }

        let chat_id = tagged.chat_id;
        if !self.pending.contains(&chat_id) {
            debug!(chat_id = %chat_id, event = ?tagged.event, "Ignoring event for withdrawn chat");
            return None;
        }

        match tagged.event {
            RaceEvent::Status(ChatStatus::Started) => {
                let created = self.pending.remove(&chat_id)?;
                // Losers stop here: no further timers, subscriptions or missed calls
                self.pending.clear();
                self.guard.on_winner(&created.chat).await;
                Some(RaceOutcome::Won(created))
            }

            RaceEvent::Status(status) if status.is_closed() => {
                self.pending.remove(&chat_id);
                info!(
                    chat_id = %chat_id,
                    status = %status,
                    remaining = self.pending.len(),
                    "Chat closed before acceptance - withdrawn from race"
                );
                self.pending.is_empty().then_some(RaceOutcome::TimedOut)
            }

            RaceEvent::Status(status) => {
                debug!(chat_id = %chat_id, status = %status, "Chat still pending");
                None
            }

            RaceEvent::MissTimerFired => {
                self.pending.remove(&chat_id);
                info!(
                    chat_id = %chat_id,
                    remaining = self.pending.len(),
                    "Chat missed"
                );
                self.mark_missed(chat_id);
                self.pending.is_empty().then_some(RaceOutcome::TimedOut)
            }

            RaceEvent::SubscriptionError(e) => {
                warn!(chat_id = %chat_id, error = %e, "Status subscription interrupted");
                self.pending.mark_degraded(&chat_id, e);
                None
            }

            RaceEvent::Recovered => {
                if self.pending.mark_recovered(&chat_id) {
                    info!(chat_id = %chat_id, "Status subscription recovered");
                }
                None
            }

            RaceEvent::AuthFailed(e) => {
                error!(chat_id = %chat_id, error = %e, "Status subscription rejected credentials");
                Some(RaceOutcome::Failed(DispatchError::SubscriptionLost {
                    chat_id,
                    source: e,
                }))
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Backoff between resubscribe attempts: base, 2 * base, 4 * base, ... capped, with jitter
fn resubscribe_backoff(settings: &RaceSettings) -> impl Iterator<Item = Duration> {
    let base_ms = settings.resubscribe_base_delay.as_millis() as u64;
    ExponentialBackoff::from_millis(2)
        .factor((base_ms / 2).max(1))
        .max_delay(settings.resubscribe_max_delay)
        .map(jitter)
}

/// Keep one chat's status subscription alive until its token is cancelled.
///
/// Transport errors are reported and followed by a resubscribe; an
/// authorization error is reported and ends the task.
async fn watch_status(
    backend: Arc<dyn ChatBackend>,
    chat_id: ChatId,
    token: CancellationToken,
    events: EventSender,
    settings: RaceSettings,
    gauges: RaceGauges,
) {
    let mut backoff = resubscribe_backoff(&settings);
    let mut interrupted = false;

    loop {
        let subscribed = tokio::select! {
            _ = token.cancelled() => return,
            result = backend.subscribe_chat_status(&chat_id) => result,
        };

        let error = match subscribed {
            Ok(mut stream) => {
                let _open = gauges.open_subscription();
                if interrupted {
                    interrupted = false;
                    backoff = resubscribe_backoff(&settings);
                    if !events.send(&chat_id, RaceEvent::Recovered) {
                        return;
                    }
                }

                loop {
                    let item = tokio::select! {
                        _ = token.cancelled() => return,
                        item = stream.next() => item,
                    };

                    match item {
                        Some(Ok(update)) if update.id != chat_id => {
                            debug!(chat_id = %chat_id, other = %update.id, "Ignoring update for another chat");
                        }
                        Some(Ok(update)) => {
                            if !events.send(&chat_id, RaceEvent::Status(update.status)) {
                                return;
                            }
                        }
                        Some(Err(e)) => break e,
                        None => break BackendError::Closed,
                    }
                }
            }
            Err(e) => e,
        };

        if error.is_auth() {
            events.send(&chat_id, RaceEvent::AuthFailed(error));
            return;
        }

        interrupted = true;
        if !events.send(&chat_id, RaceEvent::SubscriptionError(error)) {
            return;
        }

        let delay = backoff.next().unwrap_or(settings.resubscribe_max_delay);
        debug!(chat_id = %chat_id, delay_ms = delay.as_millis() as u64, "Resubscribing");
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Fire once after `timeout` unless the chat leaves the race first
async fn miss_timer(
    chat_id: ChatId,
    timeout: Duration,
    token: CancellationToken,
    events: EventSender,
    gauges: RaceGauges,
) {
    let _armed = gauges.arm_timer();
    tokio::select! {
        _ = token.cancelled() => {}
        _ = tokio::time::sleep(timeout) => {
            events.send(&chat_id, RaceEvent::MissTimerFired);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use supportchat_shared::{Contract, DispatchRequest, NewChat, VisitorForm};

    fn settings() -> RaceSettings {
        RaceSettings {
            global_timeout: Duration::from_secs(180),
            connection_grace: Duration::from_secs(10),
            resubscribe_base_delay: Duration::from_millis(250),
            resubscribe_max_delay: Duration::from_secs(5),
        }
    }

    async fn create(
        backend: &InMemoryBackend,
        request: &DispatchRequest,
        contracts: &[Contract],
    ) -> Vec<CreatedChat> {
        let mut created = Vec::new();
        for contract in contracts {
            let chat = backend
                .create_chat(&NewChat::for_contract(request, contract))
                .await
                .unwrap();
            created.push(CreatedChat {
                chat,
                contract: contract.clone(),
            });
        }
        created
    }

    fn monitor(
        backend: &InMemoryBackend,
        request: &DispatchRequest,
        settings: RaceSettings,
        token: CancellationToken,
        gauges: RaceGauges,
    ) -> RaceMonitor {
        let backend: Arc<dyn ChatBackend> = Arc::new(backend.clone());
        RaceMonitor::new(
            backend.clone(),
            settings,
            1,
            token,
            OutcomeGuard::new(backend, request.clone()),
            gauges,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_chat_leaves_race_and_other_wins() {
        let backend = InMemoryBackend::new().accept_after("a", Duration::from_secs(12));
        let request = DispatchRequest::new(&VisitorForm::new("Ada", "Hi"), None);
        let chats = create(
            &backend,
            &request,
            &[Contract::new("a", 1, 30), Contract::new("b", 1, 5)],
        )
        .await;
        let b_chat = chats[1].chat.id.clone();
        let gauges = RaceGauges::default();

        let outcome = monitor(&backend, &request, settings(), CancellationToken::new(), gauges.clone())
            .run(chats)
            .await;

        match outcome {
            RaceOutcome::Won(created) => assert_eq!(created.contract.id.0, "a"),
            other => panic!("Expected A to win, got: {}", other),
        }
        assert_eq!(backend.missed_calls(), vec![b_chat.clone()]);
        assert_eq!(backend.messages().len(), 1);
        assert_eq!(backend.push_status(&b_chat, ChatStatus::Started), 0);
        assert_eq!(gauges.armed_timers(), 0);
        assert_eq!(gauges.open_subscriptions(), 0);
        assert_eq!(backend.open_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_missed_call_does_not_block_winner() {
        let backend = InMemoryBackend::new()
            .accept_after("a", Duration::from_secs(6))
            .with_missed_delay(Duration::from_secs(300));
        let request = DispatchRequest::new(&VisitorForm::new("Ada", "Hi"), None);
        let chats = create(
            &backend,
            &request,
            &[Contract::new("a", 1, 0), Contract::new("b", 1, 5)],
        )
        .await;
        let b_chat = chats[1].chat.id.clone();
        let gauges = RaceGauges::default();

        let started = Instant::now();
        let outcome = monitor(&backend, &request, settings(), CancellationToken::new(), gauges.clone())
            .run(chats)
            .await;

        match outcome {
            RaceOutcome::Won(created) => assert_eq!(created.contract.id.0, "a"),
            other => panic!("Expected A to win, got: {}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(7));
        assert_eq!(backend.missed_calls(), vec![b_chat]);
        assert_eq!(backend.messages().len(), 1);
        assert_eq!(gauges.armed_timers(), 0);
        assert_eq!(gauges.open_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_missed_call_does_not_delay_timeout() {
        let backend = InMemoryBackend::new().with_missed_delay(Duration::from_secs(300));
        let request = DispatchRequest::new(&VisitorForm::new("Ada", "Hi"), None);
        let chats = create(&backend, &request, &[Contract::new("a", 1, 2)]).await;
        let token = CancellationToken::new();

        let started = Instant::now();
        let outcome = monitor(&backend, &request, settings(), token.clone(), RaceGauges::default())
            .run(chats)
            .await;

        assert!(matches!(outcome, RaceOutcome::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(3));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(backend.missed_calls().len(), 1);

        // Disposing the attempt stops the call still in flight
        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_chat_missed_times_out() {
        let backend = InMemoryBackend::new();
        let request = DispatchRequest::new(&VisitorForm::new("Ada", "Hi"), None);
        let chats = create(
            &backend,
            &request,
            &[Contract::new("a", 1, 3), Contract::new("b", 1, 5)],
        )
        .await;

        let started = Instant::now();
        let outcome = monitor(&backend, &request, settings(), CancellationToken::new(), RaceGauges::default())
            .run(chats)
            .await;

        assert!(matches!(outcome, RaceOutcome::TimedOut));
        // The last missed call runs beside the race
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(backend.missed_calls().len(), 2);
        assert!(started.elapsed() < Duration::from_secs(6));
        assert!(backend.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_chat_withdrawn_without_missed_call() {
        let backend = InMemoryBackend::new();
        let request = DispatchRequest::new(&VisitorForm::new("Ada", "Hi"), None);
        let chats = create(&backend, &request, &[Contract::new("a", 1, 0)]).await;
        let chat_id = chats[0].chat.id.clone();

        let race = tokio::spawn(
            monitor(&backend, &request, settings(), CancellationToken::new(), RaceGauges::default())
                .run(chats),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(backend.push_status(&chat_id, ChatStatus::Ended), 1);

        assert!(matches!(race.await.unwrap(), RaceOutcome::TimedOut));
        assert!(backend.missed_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_ceiling_with_disabled_timers() {
        let backend = InMemoryBackend::new();
        let request = DispatchRequest::new(&VisitorForm::new("Ada", "Hi"), None);
        let chats = create(&backend, &request, &[Contract::new("a", 1, 0)]).await;
        let mut race_settings = settings();
        race_settings.global_timeout = Duration::from_secs(60);

        let started = Instant::now();
        let outcome = monitor(&backend, &request, race_settings, CancellationToken::new(), RaceGauges::default())
            .run(chats)
            .await;

        assert!(matches!(outcome, RaceOutcome::TimedOut));
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert!(backend.missed_calls().is_empty());
        assert_eq!(backend.open_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_fails_race() {
        let backend = InMemoryBackend::new();
        let request = DispatchRequest::new(&VisitorForm::new("Ada", "Hi"), None);
        let chats = create(
            &backend,
            &request,
            &[Contract::new("a", 1, 30), Contract::new("b", 1, 30)],
        )
        .await;
        let chat_id = chats[0].chat.id.clone();

        let race = tokio::spawn(
            monitor(&backend, &request, settings(), CancellationToken::new(), RaceGauges::default())
                .run(chats),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        backend.push_error(&chat_id, BackendError::Unauthorized("token expired".into()));

        match race.await.unwrap() {
            RaceOutcome::Failed(DispatchError::SubscriptionLost { source, .. }) => {
                assert!(source.is_auth())
            }
            other => panic!("Expected auth failure, got: {}", other),
        }
        assert_eq!(backend.open_subscriptions(), 0);
        assert!(backend.missed_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_blip_recovers_within_grace() {
        let backend = InMemoryBackend::new();
        let request = DispatchRequest::new(&VisitorForm::new("Ada", "Hi"), None);
        let chats = create(&backend, &request, &[Contract::new("a", 1, 0)]).await;
        let chat_id = chats[0].chat.id.clone();

        let race = tokio::spawn(
            monitor(&backend, &request, settings(), CancellationToken::new(), RaceGauges::default())
                .run(chats),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        backend.fail_subscribe(&chat_id, vec![BackendError::Network("offline".into())]);
        backend.push_error(&chat_id, BackendError::Network("connection reset".into()));

        // Resubscribed well within the grace period
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(backend.push_status(&chat_id, ChatStatus::Started), 1);

        assert!(matches!(race.await.unwrap(), RaceOutcome::Won(_)));
        assert!(backend.subscribe_calls().len() >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_outage_escalates_after_grace() {
        let backend = InMemoryBackend::new();
        let request = DispatchRequest::new(&VisitorForm::new("Ada", "Hi"), None);
        let chats = create(&backend, &request, &[Contract::new("a", 1, 0)]).await;
        let chat_id = chats[0].chat.id.clone();

        let race = tokio::spawn(
            monitor(&backend, &request, settings(), CancellationToken::new(), RaceGauges::default())
                .run(chats),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        backend.fail_subscribe(
            &chat_id,
            (0..100).map(|_| BackendError::Network("offline".into())).collect(),
        );
        let failed_at = Instant::now();
        backend.push_error(&chat_id, BackendError::Network("connection reset".into()));

        match race.await.unwrap() {
            RaceOutcome::Failed(DispatchError::SubscriptionLost { chat_id: lost, source }) => {
                assert_eq!(lost, chat_id);
                assert!(source.is_transient());
            }
            other => panic!("Expected connection failure, got: {}", other),
        }
        assert!(failed_at.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_and_disposes() {
        let backend = InMemoryBackend::new();
        let request = DispatchRequest::new(&VisitorForm::new("Ada", "Hi"), None);
        let chats = create(
            &backend,
            &request,
            &[Contract::new("a", 1, 30), Contract::new("b", 1, 30)],
        )
        .await;
        let token = CancellationToken::new();
        let gauges = RaceGauges::default();

        let race = tokio::spawn(
            monitor(&backend, &request, settings(), token.clone(), gauges.clone()).run(chats),
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(gauges.armed_timers(), 2);
        assert_eq!(gauges.open_subscriptions(), 2);

        token.cancel();
        assert!(matches!(race.await.unwrap(), RaceOutcome::Aborted));
        assert_eq!(gauges.armed_timers(), 0);
        assert_eq!(gauges.open_subscriptions(), 0);
        assert_eq!(backend.open_subscriptions(), 0);
        assert!(backend.missed_calls().is_empty());
    }
}
