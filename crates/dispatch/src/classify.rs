//! Maps dispatch failures to the UI error taxonomy

use supportchat_shared::ErrorKind;

use crate::error::{BackendError, DispatchError};

/// Classify a dispatch failure. Rules are applied in priority order.
pub fn classify(error: &DispatchError) -> ErrorKind {
    let backend = backend_source(error);

    if backend.is_some_and(is_transport_error) {
        return ErrorKind::ConnectionError;
    }

    if backend.is_some_and(BackendError::is_auth) {
        return ErrorKind::AuthError;
    }

    match error {
        DispatchError::NoEligibleContracts => ErrorKind::NoAgents,
        DispatchError::AllCreationsFailed { .. } => ErrorKind::FailedToStart,
        // A subscription that stayed down through the grace period is a connection failure
        DispatchError::SubscriptionLost { .. } => ErrorKind::ConnectionError,
        DispatchError::Backend(_) => ErrorKind::Unexpected,
    }
}

fn backend_source(error: &DispatchError) -> Option<&BackendError> {
    match error {
        DispatchError::Backend(inner) => Some(inner),
        DispatchError::SubscriptionLost { source, .. } => Some(source),
        _ => None,
    }
}

fn is_transport_error(error: &BackendError) -> bool {
    matches!(
        error,
        BackendError::Network(_) | BackendError::Timeout | BackendError::Closed
    )
}
