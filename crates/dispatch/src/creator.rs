//! Chat creation fan-out
//!
//! Creates one chat per eligible contract. All creations of one call share a
//! single idempotency key; each branch is isolated so one contract's failure
//! never cancels the others.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use supportchat_shared::{Chat, Contract, DispatchRequest, NewChat, VisitorForm};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::{debug, info, warn};

use crate::backend::ChatBackend;
use crate::error::{BackendError, BackendResult, DispatchError};

/// Multiplier of the retry backoff (100ms, 200ms, 400ms, ...)
const RETRY_FACTOR_MS: u64 = 50;

/// Maximum backoff between creation retries
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

/// A chat created for one contract
#[derive(Debug, Clone)]
pub struct CreatedChat {
    pub chat: Chat,
    pub contract: Contract,
}

/// A contract whose chat could not be created
#[derive(Debug, Clone)]
pub struct FailedCreation {
    pub contract: Contract,
    pub error: BackendError,
}

/// Per-contract results of one fan-out
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub request: DispatchRequest,
    pub succeeded: Vec<CreatedChat>,
    pub failed: Vec<FailedCreation>,
}

impl DispatchReport {
    /// The chats to race, or `AllCreationsFailed` when there are none
    pub fn into_pending(self) -> Result<(DispatchRequest, Vec<CreatedChat>), DispatchError> {
        if self.succeeded.is_empty() {
            return Err(DispatchError::AllCreationsFailed {
                attempted: self.failed.len(),
            });
        }
        Ok((self.request, self.succeeded))
    }
}

/// Fans one visitor request out to every eligible contract
#[derive(Clone)]
pub struct DispatchCreator {
    backend: Arc<dyn ChatBackend>,
    retries: usize,
}

impl DispatchCreator {
    pub fn new(backend: Arc<dyn ChatBackend>, retries: usize) -> Self {
        Self { backend, retries }
    }

    /// Create one chat per contract.
    ///
    /// With a single contract the creation is awaited directly and its failure
    /// is returned as the error. With several, every creation runs
    /// concurrently and failures are collected in the report.
    pub async fn dispatch(
        &self,
        eligible: &[Contract],
        form: &VisitorForm,
        ip_address: Option<String>,
    ) -> Result<DispatchReport, DispatchError> {
        let request = DispatchRequest::new(form, ip_address);

        match eligible {
            [] => Err(DispatchError::NoEligibleContracts),
            [contract] => {
                let chat = self.create_with_retry(&request, contract).await?;
                info!(
                    chat_id = %chat.id,
                    contract_id = %contract.id,
                    key = %request.idempotency_key,
                    "Created chat for single eligible contract"
                );
                Ok(DispatchReport {
                    request,
                    succeeded: vec![CreatedChat {
                        chat,
                        contract: contract.clone(),
                    }],
                    failed: Vec::new(),
                })
            }
            contracts => {
                let results = join_all(
                    contracts
                        .iter()
                        .map(|contract| self.create_with_retry(&request, contract)),
                )
                .await;

                let mut succeeded = Vec::new();
                let mut failed = Vec::new();
                for (contract, result) in contracts.iter().zip(results) {
                    match result {
                        Ok(chat) => succeeded.push(CreatedChat {
                            chat,
                            contract: contract.clone(),
                        }),
                        Err(error) => {
                            warn!(
                                contract_id = %contract.id,
                                error = %error,
                                "Chat creation failed for contract"
                            );
                            failed.push(FailedCreation {
                                contract: contract.clone(),
                                error,
                            });
                        }
                    }
                }

                info!(
                    key = %request.idempotency_key,
                    succeeded = succeeded.len(),
                    failed = failed.len(),
                    "Chat fan-out complete"
                );

                Ok(DispatchReport {
                    request,
                    succeeded,
                    failed,
                })
            }
        }
    }

    /// Create with exponential backoff and jitter. Only transient errors are retried;
    /// every retry reuses the request's idempotency key.
    async fn create_with_retry(
        &self,
        request: &DispatchRequest,
        contract: &Contract,
    ) -> BackendResult<Chat> {
        let retry_strategy = ExponentialBackoff::from_millis(2)
            .factor(RETRY_FACTOR_MS)
            .max_delay(RETRY_MAX_DELAY)
            .map(jitter)
            .take(self.retries);

        let new_chat = NewChat::for_contract(request, contract);

        Retry::spawn(retry_strategy, || async {
            let result = self.backend.create_chat(&new_chat).await;

            match &result {
                Ok(_) => Ok(result),
                Err(e) if e.is_transient() => {
                    debug!(
                        contract_id = %contract.id,
                        error = %e,
                        "Transient creation error - will retry"
                    );
                    Err(result) // Return error to trigger retry
                }
                Err(_) => Ok(result), // Permanent error - stop retrying
            }
        })
        .await
        .unwrap_or_else(|e| e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;

    fn contracts(ids: &[&str]) -> Vec<Contract> {
        ids.iter().map(|id| Contract::new(*id, 1, 30)).collect()
    }

    #[tokio::test]
    async fn test_fan_out_isolates_failures() {
        let backend = InMemoryBackend::new().fail_create(
            "b",
            BackendError::GraphQl(vec!["contract is full".into()]),
        );
        let creator = DispatchCreator::new(Arc::new(backend.clone()), 2);

        let report = creator
            .dispatch(&contracts(&["a", "b", "c"]), &VisitorForm::new("Ada", "Hi"), None)
            .await
            .unwrap();

        assert_eq!(report.succeeded.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].contract.id.0, "b");
        // Permanent errors are not retried
        assert_eq!(backend.create_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_all_creations_share_one_key() {
        let backend = InMemoryBackend::new();
        let creator = DispatchCreator::new(Arc::new(backend.clone()), 0);

        let report = creator
            .dispatch(&contracts(&["a", "b", "c"]), &VisitorForm::new("Ada", "Hi"), None)
            .await
            .unwrap();

        let calls = backend.create_calls();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|call| call.key == report.request.idempotency_key));

        let mut chat_ids: Vec<_> = report.succeeded.iter().map(|c| c.chat.id.clone()).collect();
        chat_ids.dedup();
        assert_eq!(chat_ids.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_creations_run_concurrently() {
        let backend = InMemoryBackend::new()
            .with_create_delay("a", Duration::from_secs(1))
            .with_create_delay("b", Duration::from_secs(1));
        let creator = DispatchCreator::new(Arc::new(backend), 0);

        let started = tokio::time::Instant::now();
        creator
            .dispatch(&contracts(&["a", "b"]), &VisitorForm::new("Ada", "Hi"), None)
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried_with_same_key() {
        let backend = InMemoryBackend::new().fail_create_times(
            "a",
            1,
            BackendError::Network("connection reset".into()),
        );
        let creator = DispatchCreator::new(Arc::new(backend.clone()), 2);

        let report = creator
            .dispatch(&contracts(&["a", "b"]), &VisitorForm::new("Ada", "Hi"), None)
            .await
            .unwrap();

        assert_eq!(report.succeeded.len(), 2);
        let calls_for_a: Vec<_> = backend
            .create_calls()
            .into_iter()
            .filter(|call| call.contract_id.0 == "a")
            .collect();
        assert_eq!(calls_for_a.len(), 2);
        assert_eq!(calls_for_a[0].key, calls_for_a[1].key);
    }

    #[tokio::test]
    async fn test_single_contract_failure_is_direct_error() {
        let backend = InMemoryBackend::new()
            .fail_create("a", BackendError::Unauthorized("expired".into()));
        let creator = DispatchCreator::new(Arc::new(backend), 2);

        let result = creator
            .dispatch(&contracts(&["a"]), &VisitorForm::new("Ada", "Hi"), None)
            .await;

        assert!(matches!(
            result,
            Err(DispatchError::Backend(BackendError::Unauthorized(_)))
        ));
    }

    #[tokio::test]
    async fn test_all_failed_report_maps_to_failed_to_start() {
        let backend = InMemoryBackend::new()
            .fail_create("a", BackendError::GraphQl(vec!["nope".into()]))
            .fail_create("b", BackendError::GraphQl(vec!["nope".into()]));
        let creator = DispatchCreator::new(Arc::new(backend), 0);

        let report = creator
            .dispatch(&contracts(&["a", "b"]), &VisitorForm::new("Ada", "Hi"), None)
            .await
            .unwrap();

        assert!(matches!(
            report.into_pending(),
            Err(DispatchError::AllCreationsFailed { attempted: 2 })
        ));
    }
}
