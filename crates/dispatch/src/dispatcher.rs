//! Dispatch owner
//!
//! [`ChatDispatcher`] runs the whole attempt: fetch contracts, resolve the
//! session and visitor IP, select eligible contracts, fan chat creation out,
//! race the created chats, and hand the winner off as the active chat. It
//! owns the single attempt slot, so a new submit always disposes the previous
//! attempt before anything of its own is created.

use std::sync::{Arc, RwLock};

use reqwest::Client;
use supportchat_shared::{DispatchRequest, ErrorKind, VisitorForm};
use tracing::{info, warn};

use crate::attempt::{Attempt, AttemptSlot};
use crate::backend::{ChatBackend, GraphqlBackend};
use crate::classify::classify;
use crate::config::DispatchConfig;
use crate::contracts::ContractSelector;
use crate::creator::{CreatedChat, DispatchCreator};
use crate::error::{BackendResult, DispatchError};
use crate::guard::OutcomeGuard;
use crate::ip_lookup::{lookup_ip, HttpIpLookup, IpLookup};
use crate::monitor::{RaceMonitor, RaceOutcome, RaceSettings};
use crate::outcome::{ActiveChat, Outcome};
use crate::pending::RaceGauges;
use crate::session_clock::{HttpTimeSource, SessionClock};

/// Chats ready to race, with the request they were created from
type Prepared = Option<(DispatchRequest, Vec<CreatedChat>)>;

/// Connects visitors to the first agent that accepts
pub struct ChatDispatcher {
    backend: Arc<dyn ChatBackend>,
    clock: SessionClock,
    ip_lookup: Arc<dyn IpLookup>,
    config: DispatchConfig,
    selector: ContractSelector,
    creator: DispatchCreator,
    slot: AttemptSlot,
    active: RwLock<Option<ActiveChat>>,
    gauges: RaceGauges,
}

impl ChatDispatcher {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        clock: SessionClock,
        ip_lookup: Arc<dyn IpLookup>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            selector: ContractSelector::new(config.session_fallback),
            creator: DispatchCreator::new(backend.clone(), config.create_retries),
            backend,
            clock,
            ip_lookup,
            config,
            slot: AttemptSlot::new(),
            active: RwLock::new(None),
            gauges: RaceGauges::default(),
        }
    }

    /// Dispatcher wired to the GraphQL backend and the HTTP time and IP services
    pub fn from_config(config: DispatchConfig) -> BackendResult<Self> {
        let backend = GraphqlBackend::new(&config)?;
        let lookup_client = Client::builder()
            .timeout(config.time_timeout.max(config.ip_timeout))
            .build()?;

        let clock = SessionClock::new(
            Arc::new(HttpTimeSource::new(
                lookup_client.clone(),
                config.time_url.clone(),
            )),
            config.time_timeout,
        );
        let ip_lookup = Arc::new(HttpIpLookup::new(lookup_client, config.ip_url.clone()));

        Ok(Self::new(Arc::new(backend), clock, ip_lookup, config))
    }

    /// Run one dispatch attempt for the visitor's form.
    ///
    /// Any attempt still in flight is aborted first. A connection error is
    /// retried once with a fresh attempt when auto-retry is enabled.
    pub async fn submit(&self, form: VisitorForm) -> Outcome {
        let attempt = self.slot.begin().await;
        let outcome = self.run_attempt(&attempt, &form).await;

        if !self.config.auto_retry || outcome.error_kind() != Some(ErrorKind::ConnectionError) {
            return outcome;
        }

        info!(
            generation = attempt.generation,
            delay_ms = self.config.auto_retry_delay.as_millis() as u64,
            "Connection error - retrying dispatch once"
        );
        tokio::select! {
            _ = attempt.token.cancelled() => return Outcome::Aborted,
            _ = tokio::time::sleep(self.config.auto_retry_delay) => {}
        }
        // A newer submit owns the slot once this attempt is stale
        match self.slot.renew(attempt) {
            Some(retry) => self.run_attempt(&retry, &form).await,
            None => Outcome::Aborted,
        }
    }

    /// Cancel the racing attempt. It resolves to [`Outcome::Aborted`].
    pub fn abort(&self) -> bool {
        self.slot.abort()
    }

    /// The chat handed off by the last connected attempt
    pub fn active_chat(&self) -> Option<ActiveChat> {
        self.active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Status subscriptions currently held by a race
    pub fn open_subscriptions(&self) -> usize {
        self.gauges.open_subscriptions()
    }

    /// Miss timers currently armed by a race
    pub fn armed_timers(&self) -> usize {
        self.gauges.armed_timers()
    }

    fn set_active(&self, active: Option<ActiveChat>) {
        *self
            .active
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = active;
    }

    async fn run_attempt(&self, attempt: &Attempt, form: &VisitorForm) -> Outcome {
        let generation = attempt.generation;
        self.set_active(None);
        info!(generation, customer = %form.customer_name, "Dispatch attempt started");

        let prepared = tokio::select! {
            biased;
            _ = attempt.token.cancelled() => {
                info!(generation, "Dispatch attempt aborted before racing");
                return Outcome::Aborted;
            }
            prepared = self.prepare(form) => prepared,
        };

        let (request, created) = match prepared {
            Ok(Some(race)) => race,
            Ok(None) => {
                info!(generation, "No eligible contracts - service unavailable");
                return Outcome::Unavailable;
            }
            Err(e) => {
                let kind = classify(&e);
                warn!(generation, error = %e, kind = kind.as_str(), "Dispatch attempt failed before racing");
                return Outcome::Error(kind);
            }
        };

        let monitor = RaceMonitor::new(
            self.backend.clone(),
            RaceSettings::from(&self.config),
            generation,
            attempt.token.clone(),
            OutcomeGuard::new(self.backend.clone(), request),
            self.gauges.clone(),
        );

        match monitor.run(created).await {
            RaceOutcome::Won(created) => {
                let active = ActiveChat {
                    chat: created.chat,
                    contract: created.contract,
                };
                if !self.slot.is_current(generation) {
                    warn!(
                        generation,
                        chat_id = %active.chat.id,
                        "Attempt superseded while connecting - not handing off"
                    );
                    return Outcome::Aborted;
                }
                self.set_active(Some(active.clone()));
                Outcome::Connected(active)
            }
            RaceOutcome::TimedOut => Outcome::TimedOut,
            RaceOutcome::Aborted => Outcome::Aborted,
            RaceOutcome::Failed(e) => {
                let kind = classify(&e);
                warn!(generation, error = %e, kind = kind.as_str(), "Race failed");
                Outcome::Error(kind)
            }
        }
    }

    /// Everything before the race. `None` means nobody is on duty.
    async fn prepare(&self, form: &VisitorForm) -> Result<Prepared, DispatchError> {
        let (records, ip_address, session) = tokio::join!(
            self.backend.fetch_contracts(),
            lookup_ip(&self.ip_lookup, self.config.ip_timeout),
            self.clock.current_session(),
        );
        let records = records?;

        let eligible = self.selector.select(&records, session);
        if eligible.is_empty() {
            return Ok(None);
        }

        let report = self
            .creator
            .dispatch(&eligible, form, ip_address)
            .await
            .map_err(|e| match classify(&e) {
                // A lone contract rejecting the chat means the chat never started
                ErrorKind::Unexpected => DispatchError::AllCreationsFailed { attempted: 1 },
                _ => e,
            })?;

        report.into_pending().map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::error::BackendError;
    use crate::ip_lookup::NoIpLookup;
    use serde_json::json;
    use std::time::Duration;
    use supportchat_shared::ContractRecord;

    fn active(id: &str, session: i64, miss: u64) -> ContractRecord {
        ContractRecord {
            id: Some(id.to_string()),
            session: Some(json!(session)),
            status: Some("active".to_string()),
            chat_miss_time: Some(json!(miss)),
        }
    }

    fn dispatcher(backend: &InMemoryBackend, config: DispatchConfig) -> ChatDispatcher {
        ChatDispatcher::new(
            Arc::new(backend.clone()),
            SessionClock::local(),
            Arc::new(NoIpLookup),
            config,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_contract_fetch_failure_is_classified() {
        let backend = InMemoryBackend::new()
            .fail_contracts(BackendError::Network("connection refused".into()));
        let config = DispatchConfig {
            auto_retry: false,
            ..DispatchConfig::default()
        };

        let outcome = dispatcher(&backend, config)
            .submit(VisitorForm::new("Ada", "Hi"))
            .await;

        assert_eq!(outcome, Outcome::Error(ErrorKind::ConnectionError));
        assert!(backend.create_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_error_is_retried_once() {
        let backend = InMemoryBackend::new()
            .fail_contracts(BackendError::Network("connection refused".into()));

        let started = tokio::time::Instant::now();
        let outcome = dispatcher(&backend, DispatchConfig::default())
            .submit(VisitorForm::new("Ada", "Hi"))
            .await;

        assert_eq!(outcome, Outcome::Error(ErrorKind::ConnectionError));
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_submit_during_retry_delay_wins_the_slot() {
        let backend = InMemoryBackend::new()
            .fail_contracts(BackendError::Network("connection refused".into()));
        let dispatcher = Arc::new(dispatcher(&backend, DispatchConfig::default()));

        let first = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.submit(VisitorForm::new("Ada", "Hi")).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;

        let second = dispatcher.submit(VisitorForm::new("Ada", "Hi again")).await;

        assert_eq!(first.await.unwrap(), Outcome::Aborted);
        assert_eq!(second, Outcome::Error(ErrorKind::ConnectionError));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_contract_rejection_fails_to_start() {
        let backend = InMemoryBackend::new()
            .with_contracts(vec![active("a", 1, 30), active("a2", 2, 30), active("a3", 3, 30)])
            .fail_create("a", BackendError::GraphQl(vec!["contract is full".into()]))
            .fail_create("a2", BackendError::GraphQl(vec!["contract is full".into()]))
            .fail_create("a3", BackendError::GraphQl(vec!["contract is full".into()]));

        let outcome = dispatcher(&backend, DispatchConfig::default())
            .submit(VisitorForm::new("Ada", "Hi"))
            .await;

        assert_eq!(outcome, Outcome::Error(ErrorKind::FailedToStart));
        assert_eq!(backend.create_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_chat_becomes_active() {
        let backend = InMemoryBackend::new()
            .with_contracts(vec![active("a", 1, 0), active("b", 2, 0), active("c", 3, 0)])
            .accept_after("a", Duration::from_secs(1))
            .accept_after("b", Duration::from_secs(1))
            .accept_after("c", Duration::from_secs(1));
        let dispatcher = dispatcher(&backend, DispatchConfig::default());

        let outcome = dispatcher.submit(VisitorForm::new("Ada", "Hi")).await;

        let active = dispatcher.active_chat().unwrap();
        assert_eq!(outcome, Outcome::Connected(active.clone()));
        assert_eq!(backend.messages().len(), 1);
        assert_eq!(backend.messages()[0].chat_id, active.chat.id);
        assert_eq!(dispatcher.open_subscriptions(), 0);
        assert_eq!(dispatcher.armed_timers(), 0);
    }
}
