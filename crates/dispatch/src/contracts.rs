//! Contract eligibility
//!
//! Filters the contract fleet down to the contracts that may receive a chat
//! right now: active, well-formed, and scheduled for the current session.

use std::collections::HashSet;

use serde_json::Value;
use supportchat_shared::{Contract, ContractId, ContractRecord, Session};
use tracing::{debug, info};

use crate::config::SessionFallback;

/// Status value of a contract that is on duty
const ACTIVE_STATUS: &str = "active";

/// Selects the contracts eligible for a dispatch attempt
#[derive(Debug, Clone, Copy)]
pub struct ContractSelector {
    fallback: SessionFallback,
}

impl ContractSelector {
    pub fn new(fallback: SessionFallback) -> Self {
        Self { fallback }
    }

    /// Active contracts scheduled for `session`.
    ///
    /// With [`SessionFallback::AllActive`], an empty session match falls back
    /// to every active contract. An empty active set always yields an empty
    /// result.
    pub fn select(&self, records: &[ContractRecord], session: Session) -> Vec<Contract> {
        let active = filter_active(records);
        if active.is_empty() {
            debug!(total = records.len(), "No active contracts");
            return active;
        }

        let scheduled = filter_by_session(&active, session);
        if !scheduled.is_empty() {
            debug!(
                session = %session,
                active = active.len(),
                eligible = scheduled.len(),
                "Selected contracts for session"
            );
            return scheduled;
        }

        match self.fallback {
            SessionFallback::AllActive => {
                info!(
                    session = %session,
                    active = active.len(),
                    "No contracts scheduled for session - falling back to all active contracts"
                );
                active
            }
            SessionFallback::Strict => {
                info!(session = %session, "No contracts scheduled for session");
                Vec::new()
            }
        }
    }
}

impl Default for ContractSelector {
    fn default() -> Self {
        Self::new(SessionFallback::AllActive)
    }
}

/// Keep active contracts with an id and a numeric session. Malformed entries
/// are dropped, and a repeated id keeps only its first record.
pub fn filter_active(records: &[ContractRecord]) -> Vec<Contract> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(|record| {
            let contract = validate(record);
            if contract.is_none() {
                debug!(id = ?record.id, status = ?record.status, "Dropping ineligible contract record");
            }
            contract
        })
        .filter(|contract| {
            let first = seen.insert(contract.id.clone());
            if !first {
                debug!(contract_id = %contract.id, "Dropping duplicate contract record");
            }
            first
        })
        .collect()
}

/// Keep contracts scheduled for `session`
pub fn filter_by_session(contracts: &[Contract], session: Session) -> Vec<Contract> {
    contracts
        .iter()
        .filter(|contract| contract.is_scheduled_for(session))
        .cloned()
        .collect()
}

fn validate(record: &ContractRecord) -> Option<Contract> {
    let is_active = record
        .status
        .as_deref()
        .is_some_and(|status| status.trim().eq_ignore_ascii_case(ACTIVE_STATUS));
    if !is_active {
        return None;
    }

    let id = record.id.as_deref().map(str::trim).filter(|id| !id.is_empty())?;
    let session = record.session.as_ref().and_then(integral)?;
    let chat_miss_time = record
        .chat_miss_time
        .as_ref()
        .and_then(integral)
        .map(|secs| secs.max(0) as u64)
        .unwrap_or(0);

    Some(Contract {
        id: ContractId(id.to_string()),
        session,
        chat_miss_time,
    })
}

/// Integer value of a JSON number; integral floats are accepted, strings are not
fn integral(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    value
        .as_f64()
        .filter(|f| f.is_finite() && f.fract() == 0.0)
        .map(|f| f as i64)
}
