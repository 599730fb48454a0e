//! Support chat dispatch engine
//!
//! Connects a website visitor to one of several on-duty agents:
//!
//! 1. [`ContractSelector`] picks the active contracts of the current shift
//!    session (from [`SessionClock`])
//! 2. [`DispatchCreator`] creates one chat per contract, all sharing one
//!    idempotency key
//! 3. [`RaceMonitor`] watches every chat; the first one an agent accepts wins,
//!    unanswered chats are marked missed
//! 4. [`OutcomeGuard`] makes the hand-off (opening message, connected state)
//!    happen exactly once
//! 5. [`classify`] maps any terminal failure to the UI's [`ErrorKind`]
//!
//! [`ChatDispatcher`] ties the steps together and owns the single attempt slot.

pub mod attempt;
pub mod backend;
pub mod classify;
pub mod config;
pub mod contracts;
pub mod creator;
pub mod dispatcher;
pub mod error;
pub mod guard;
pub mod ip_lookup;
pub mod monitor;
pub mod outcome;
pub mod pending;
pub mod session_clock;

pub use attempt::{Attempt, AttemptSlot};
pub use backend::{ChatBackend, GraphqlBackend, InMemoryBackend, StatusStream};
pub use classify::classify;
pub use config::{ConfigError, DispatchConfig, SessionFallback};
pub use contracts::{filter_active, filter_by_session, ContractSelector};
pub use creator::{CreatedChat, DispatchCreator, DispatchReport, FailedCreation};
pub use dispatcher::ChatDispatcher;
pub use error::{BackendError, BackendResult, DispatchError};
pub use guard::OutcomeGuard;
pub use ip_lookup::{lookup_ip, HttpIpLookup, IpLookup, NoIpLookup};
pub use monitor::{RaceMonitor, RaceOutcome, RaceSettings};
pub use outcome::{ActiveChat, Outcome};
pub use pending::{PendingSet, RaceGauges};
pub use session_clock::{session_at, HttpTimeSource, LocalTimeSource, SessionClock, TimeSource};
pub use supportchat_shared::ErrorKind;
