//! Chats being raced in one dispatch attempt

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use supportchat_shared::ChatId;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::creator::CreatedChat;
use crate::error::BackendError;

/// Live counts of the resources held by racing attempts
#[derive(Debug, Clone, Default)]
pub struct RaceGauges {
    timers: Arc<AtomicUsize>,
    subscriptions: Arc<AtomicUsize>,
}

impl RaceGauges {
    pub fn armed_timers(&self) -> usize {
        self.timers.load(Ordering::SeqCst)
    }

    pub fn open_subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Count a miss timer until the returned handle is dropped
    pub(crate) fn arm_timer(&self) -> GaugeHandle {
        GaugeHandle::acquire(&self.timers)
    }

    /// Count an open status subscription until the returned handle is dropped
    pub(crate) fn open_subscription(&self) -> GaugeHandle {
        GaugeHandle::acquire(&self.subscriptions)
    }
}

#[derive(Debug)]
pub(crate) struct GaugeHandle(Arc<AtomicUsize>);

impl GaugeHandle {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for GaugeHandle {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Subscription trouble on one chat that has not recovered yet
#[derive(Debug, Clone)]
pub struct Degraded {
    pub since: Instant,
    pub error: BackendError,
}

struct PendingChat {
    created: CreatedChat,
    token: CancellationToken,
    degraded: Option<Degraded>,
}

/// The chats of one attempt that can still win, each with the token that
/// owns its subscription and miss timer
#[derive(Default)]
pub struct PendingSet {
    chats: HashMap<ChatId, PendingChat>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, created: CreatedChat, token: CancellationToken) {
        self.chats.insert(
            created.chat.id.clone(),
            PendingChat {
                created,
                token,
                degraded: None,
            },
        );
    }

    /// Withdraw a chat from the race, cancelling its subscription and timer
    pub fn remove(&mut self, chat_id: &ChatId) -> Option<CreatedChat> {
        let pending = self.chats.remove(chat_id)?;
        pending.token.cancel();
        Some(pending.created)
    }

    pub fn contains(&self, chat_id: &ChatId) -> bool {
        self.chats.contains_key(chat_id)
    }

    pub fn len(&self) -> usize {
        self.chats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }

    /// Record a subscription error. The first error of an outage starts its clock.
    pub fn mark_degraded(&mut self, chat_id: &ChatId, error: BackendError) {
        if let Some(pending) = self.chats.get_mut(chat_id) {
            match &mut pending.degraded {
                Some(degraded) => degraded.error = error,
                None => {
                    pending.degraded = Some(Degraded {
                        since: Instant::now(),
                        error,
                    })
                }
            }
        }
    }

    /// Clear a chat's outage. Returns true if it was degraded.
    pub fn mark_recovered(&mut self, chat_id: &ChatId) -> bool {
        self.chats
            .get_mut(chat_id)
            .and_then(|pending| pending.degraded.take())
            .is_some()
    }

    /// The longest-running outage
    pub fn oldest_degraded(&self) -> Option<(&ChatId, &Degraded)> {
        self.chats
            .iter()
            .filter_map(|(id, pending)| pending.degraded.as_ref().map(|d| (id, d)))
            .min_by_key(|(_, degraded)| degraded.since)
    }

    /// Cancel every remaining chat
    pub fn clear(&mut self) {
        for (_, pending) in self.chats.drain() {
            pending.token.cancel();
        }
    }
}
