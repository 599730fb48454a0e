//! In-memory chat backend
//!
//! Scriptable implementation of [`ChatBackend`] that captures every call.
//! Used by the test suite and by `dispatch-probe --in-memory` to exercise the
//! engine without a running support backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use supportchat_shared::{
    Chat, ChatId, ChatStatus, ChatStatusUpdate, ContractId, ContractRecord, NewChat, NewMessage,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{ChatBackend, StatusStream};
use crate::error::{BackendError, BackendResult};

type StatusSender = mpsc::UnboundedSender<BackendResult<ChatStatusUpdate>>;

/// How `create_chat` behaves for one contract
#[derive(Debug, Clone)]
enum CreateBehavior {
    Fail(BackendError),
    FailTimes(usize, BackendError),
}

#[derive(Default)]
struct MemoryState {
    contracts: Vec<ContractRecord>,
    contracts_error: Option<BackendError>,
    create_behavior: HashMap<ContractId, CreateBehavior>,
    create_delay: HashMap<ContractId, Duration>,
    accept_after: HashMap<ContractId, Duration>,
    subscribe_errors: HashMap<ChatId, Vec<BackendError>>,
    missed_error: Option<BackendError>,
    missed_delay: Option<Duration>,
    message_error: Option<BackendError>,

    chats: Vec<Chat>,
    subscribers: HashMap<ChatId, Vec<StatusSender>>,

    create_calls: Vec<NewChat>,
    subscribe_calls: Vec<ChatId>,
    missed_calls: Vec<ChatId>,
    messages: Vec<NewMessage>,
}

/// In-memory backend for tests and local development
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    next_chat: Arc<AtomicUsize>,
}

impl InMemoryBackend {
    /// Create an empty backend with no contracts
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // =========================================================================
    // Scripting
    // =========================================================================

    /// Replace the contract fleet
    pub fn with_contracts(self, contracts: Vec<ContractRecord>) -> Self {
        self.state().contracts = contracts;
        self
    }

    /// Make `fetch_contracts` fail
    pub fn fail_contracts(self, error: BackendError) -> Self {
        self.state().contracts_error = Some(error);
        self
    }

    /// Every `create_chat` for this contract fails
    pub fn fail_create(self, contract_id: &str, error: BackendError) -> Self {
        self.state()
            .create_behavior
            .insert(ContractId::from(contract_id), CreateBehavior::Fail(error));
        self
    }

    /// The next `times` calls of `create_chat` for this contract fail, then it succeeds
    pub fn fail_create_times(self, contract_id: &str, times: usize, error: BackendError) -> Self {
        self.state().create_behavior.insert(
            ContractId::from(contract_id),
            CreateBehavior::FailTimes(times, error),
        );
        self
    }

    /// Delay `create_chat` for this contract
    pub fn with_create_delay(self, contract_id: &str, delay: Duration) -> Self {
        self.state()
            .create_delay
            .insert(ContractId::from(contract_id), delay);
        self
    }

    /// Emit `started` for this contract's chat `delay` after it is subscribed
    pub fn accept_after(self, contract_id: &str, delay: Duration) -> Self {
        self.state()
            .accept_after
            .insert(ContractId::from(contract_id), delay);
        self
    }

    /// Queue errors returned by the next `subscribe_chat_status` calls for a chat
    pub fn fail_subscribe(&self, chat_id: &ChatId, errors: Vec<BackendError>) {
        self.state()
            .subscribe_errors
            .insert(chat_id.clone(), errors);
    }

    /// Make `mark_chat_missed` fail
    pub fn fail_missed(self, error: BackendError) -> Self {
        self.state().missed_error = Some(error);
        self
    }

    /// Hold every `mark_chat_missed` call for `delay` after recording it
    pub fn with_missed_delay(self, delay: Duration) -> Self {
        self.state().missed_delay = Some(delay);
        self
    }

    /// Make `create_message` fail
    pub fn fail_messages(self, error: BackendError) -> Self {
        self.state().message_error = Some(error);
        self
    }

    // =========================================================================
    // Driving subscriptions
    // =========================================================================

    /// Deliver a status notification to every live subscription of a chat.
    /// Returns the number of subscriptions that received it.
    pub fn push_status(&self, chat_id: &ChatId, status: ChatStatus) -> usize {
        let update = ChatStatusUpdate {
            id: chat_id.clone(),
            status,
        };
        self.broadcast(chat_id, Ok(update))
    }

    /// Deliver a subscription error to every live subscription of a chat
    pub fn push_error(&self, chat_id: &ChatId, error: BackendError) -> usize {
        self.broadcast(chat_id, Err(error))
    }

    fn broadcast(&self, chat_id: &ChatId, item: BackendResult<ChatStatusUpdate>) -> usize {
        let mut state = self.state();
        let Some(senders) = state.subscribers.get_mut(chat_id) else {
            return 0;
        };
        senders.retain(|tx| !tx.is_closed());
        senders
            .iter()
            .filter(|tx| tx.send(item.clone()).is_ok())
            .count()
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Number of status subscriptions whose consumer is still attached
    pub fn open_subscriptions(&self) -> usize {
        self.state()
            .subscribers
            .values()
            .flatten()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    /// Most recent chat created for a contract
    pub fn chat_for_contract(&self, contract_id: &str) -> Option<ChatId> {
        let contract_id = ContractId::from(contract_id);
        self.state()
            .chats
            .iter()
            .rev()
            .find(|chat| chat.contract_id == contract_id)
            .map(|chat| chat.id.clone())
    }

    pub fn create_calls(&self) -> Vec<NewChat> {
        self.state().create_calls.clone()
    }

    pub fn subscribe_calls(&self) -> Vec<ChatId> {
        self.state().subscribe_calls.clone()
    }

    pub fn missed_calls(&self) -> Vec<ChatId> {
        self.state().missed_calls.clone()
    }

    pub fn messages(&self) -> Vec<NewMessage> {
        self.state().messages.clone()
    }
}

#[async_trait]
impl ChatBackend for InMemoryBackend {
    async fn fetch_contracts(&self) -> BackendResult<Vec<ContractRecord>> {
        let state = self.state();
        match &state.contracts_error {
            Some(error) => Err(error.clone()),
            None => Ok(state.contracts.clone()),
        }
    }

    async fn create_chat(&self, new_chat: &NewChat) -> BackendResult<Chat> {
        let delay = {
            let mut state = self.state();
            state.create_calls.push(new_chat.clone());
            state.create_delay.get(&new_chat.contract_id).copied()
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        match state.create_behavior.get_mut(&new_chat.contract_id) {
            Some(CreateBehavior::Fail(error)) => return Err(error.clone()),
            Some(CreateBehavior::FailTimes(remaining, error)) if *remaining > 0 => {
                *remaining -= 1;
                return Err(error.clone());
            }
            _ => {}
        }

        let n = self.next_chat.fetch_add(1, Ordering::SeqCst) + 1;
        let chat = Chat {
            id: ChatId(format!("chat-{}-{}", n, new_chat.contract_id)),
            key: new_chat.key,
            customer_name: new_chat.customer_name.clone(),
            headline: new_chat.headline.clone(),
            ip_address: new_chat.ip_address.clone(),
            status: ChatStatus::Pending,
            contract_id: new_chat.contract_id.clone(),
        };
        state.chats.push(chat.clone());
        Ok(chat)
    }

    async fn subscribe_chat_status(&self, chat_id: &ChatId) -> BackendResult<StatusStream> {
        let mut state = self.state();
        state.subscribe_calls.push(chat_id.clone());

        if let Some(errors) = state.subscribe_errors.get_mut(chat_id) {
            if !errors.is_empty() {
                return Err(errors.remove(0));
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();

        let accept_delay = state
            .chats
            .iter()
            .find(|chat| &chat.id == chat_id)
            .and_then(|chat| state.accept_after.get(&chat.contract_id).copied());
        if let Some(delay) = accept_delay {
            let tx = tx.clone();
            let chat_id = chat_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(Ok(ChatStatusUpdate {
                    id: chat_id,
                    status: ChatStatus::Started,
                }));
            });
        }

        state
            .subscribers
            .entry(chat_id.clone())
            .or_default()
            .push(tx);

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn mark_chat_missed(&self, chat_id: &ChatId) -> BackendResult<()> {
        let delay = {
            let mut state = self.state();
            state.missed_calls.push(chat_id.clone());
            state.missed_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match &self.state().missed_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn create_message(&self, message: &NewMessage) -> BackendResult<()> {
        let mut state = self.state();
        state.messages.push(message.clone());
        match &state.message_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use supportchat_shared::{Contract, DispatchRequest, VisitorForm};

    fn new_chat(contract: &str) -> NewChat {
        let request = DispatchRequest::new(&VisitorForm::new("Ada", "Hi"), None);
        NewChat::for_contract(&request, &Contract::new(contract, 1, 30))
    }

    #[tokio::test]
    async fn test_subscription_receives_pushed_status() {
        let backend = InMemoryBackend::new();
        let chat = backend.create_chat(&new_chat("a")).await.unwrap();

        let mut stream = backend.subscribe_chat_status(&chat.id).await.unwrap();
        assert_eq!(backend.open_subscriptions(), 1);

        assert_eq!(backend.push_status(&chat.id, ChatStatus::Started), 1);
        let update = stream.next().await.unwrap().unwrap();
        assert_eq!(update.status, ChatStatus::Started);

        drop(stream);
        assert_eq!(backend.open_subscriptions(), 0);
        assert_eq!(backend.push_status(&chat.id, ChatStatus::Ended), 0);
    }

    #[tokio::test]
    async fn test_fail_create_times_then_succeeds() {
        let backend = InMemoryBackend::new().fail_create_times(
            "a",
            1,
            BackendError::Network("reset".into()),
        );

        assert!(backend.create_chat(&new_chat("a")).await.is_err());
        assert!(backend.create_chat(&new_chat("a")).await.is_ok());
        assert_eq!(backend.create_calls().len(), 2);
        assert!(backend.chat_for_contract("a").is_some());
    }
}
