//! Maps provider-level failures onto the RPC error taxonomy.
//!
//! | Provider condition                   | Category                     |
//! |--------------------------------------|------------------------------|
//! | deadline exceeded                    | `TIMEOUT`                    |
//! | remote overload                      | `SERVER_BUSY`                |
//! | encode failed locally / remotely     | `CLIENT_/SERVER_SERIALIZE`   |
//! | decode failed locally / remotely     | `CLIENT_/SERVER_DESERIALIZE` |
//! | connection dropped, send not started | `CLIENT_NETWORK`             |
//! | undeclared remote fault              | `SERVER_UNDECLARED_ERROR`    |
//! | anything else                        | `CLIENT_UNDECLARED_ERROR`    |
//!
//! Translation is total and idempotent: an already-categorized error is
//! returned unchanged.

use std::sync::Arc;

use crate::error::{ErrorKind, ProviderError, RpcError, Side};

/// Translate a provider failure into a categorized [`RpcError`].
///
/// The provider error is kept as the cause.
pub fn translate(err: ProviderError) -> RpcError {
    let kind = match err {
        ProviderError::Rpc(inner) => return inner,
        ProviderError::Timeout { .. } => ErrorKind::Timeout,
        ProviderError::ServerBusy(_) => ErrorKind::ServerBusy,
        ProviderError::Serialization { side, .. } => match side {
            Side::Client => ErrorKind::ClientSerialize,
            Side::Server => ErrorKind::ServerSerialize,
        },
        ProviderError::Deserialization { side, .. } => match side {
            Side::Client => ErrorKind::ClientDeserialize,
            Side::Server => ErrorKind::ServerDeserialize,
        },
        ProviderError::ConnectionClosed(_)
        | ProviderError::SendFailed(_)
        | ProviderError::Io(_) => ErrorKind::ClientNetwork,
        ProviderError::ServerException(_) => ErrorKind::ServerUndeclaredError,
        ProviderError::Other(_) => ErrorKind::ClientUndeclaredError,
    };
    let message = err.to_string();
    RpcError::with_cause(kind, message, Arc::new(err))
}

/// Translate an arbitrary boxed error.
///
/// Known types are downcast and classified; unknown ones fall back to
/// `CLIENT_UNDECLARED_ERROR` with the original error as cause.
pub fn translate_boxed(err: Box<dyn std::error::Error + Send + Sync + 'static>) -> RpcError {
    let err = match err.downcast::<RpcError>() {
        Ok(rpc) => return *rpc,
        Err(other) => other,
    };
    let err = match err.downcast::<ProviderError>() {
        Ok(provider) => return translate(*provider),
        Err(other) => other,
    };
    let message = err.to_string();
    RpcError::with_cause(ErrorKind::ClientUndeclaredError, message, Arc::from(err))
}

impl From<ProviderError> for RpcError {
    fn from(err: ProviderError) -> Self {
        translate(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_mapping() {
        let cases: Vec<(ProviderError, ErrorKind)> = vec![
            (ProviderError::Timeout { ms: 100 }, ErrorKind::Timeout),
            (ProviderError::ServerBusy("queue full".into()), ErrorKind::ServerBusy),
            (
                ProviderError::Serialization { side: Side::Client, message: "x".into() },
                ErrorKind::ClientSerialize,
            ),
            (
                ProviderError::Serialization { side: Side::Server, message: "x".into() },
                ErrorKind::ServerSerialize,
            ),
            (
                ProviderError::Deserialization { side: Side::Client, message: "x".into() },
                ErrorKind::ClientDeserialize,
            ),
            (
                ProviderError::Deserialization { side: Side::Server, message: "x".into() },
                ErrorKind::ServerDeserialize,
            ),
            (ProviderError::ConnectionClosed("reset".into()), ErrorKind::ClientNetwork),
            (ProviderError::SendFailed("queue closed".into()), ErrorKind::ClientNetwork),
            (ProviderError::ServerException("npe".into()), ErrorKind::ServerUndeclaredError),
            (ProviderError::other("weird"), ErrorKind::ClientUndeclaredError),
        ];
        for (err, expected) in cases {
            let shown = err.to_string();
            let rpc = translate(err);
            assert_eq!(rpc.kind(), expected, "for {shown}");
            assert!(rpc.cause().is_some(), "cause dropped for {shown}");
        }
    }

    #[test]
    fn already_categorized_passes_through() {
        let original = RpcError::new(ErrorKind::ServerBusy, "try later");
        let once = translate(ProviderError::Rpc(original.clone()));
        assert_eq!(once, original);
        // Not re-wrapped: no provider error is added as cause.
        assert!(once.cause().is_none());
        let twice = translate(ProviderError::Rpc(once.clone()));
        assert_eq!(twice, once);
    }

    #[test]
    fn boxed_rpc_error_is_unchanged() {
        let original = RpcError::timeout(30);
        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(original.clone());
        assert_eq!(translate_boxed(boxed), original);
    }

    #[test]
    fn boxed_provider_error_is_classified() {
        let boxed: Box<dyn std::error::Error + Send + Sync> =
            Box::new(ProviderError::ServerBusy("busy".into()));
        assert_eq!(translate_boxed(boxed).kind(), ErrorKind::ServerBusy);
    }

    #[test]
    fn unknown_error_type_is_client_undeclared() {
        let boxed: Box<dyn std::error::Error + Send + Sync> =
            Box::new(std::fmt::Error);
        let rpc = translate_boxed(boxed);
        assert_eq!(rpc.kind(), ErrorKind::ClientUndeclaredError);
        assert!(rpc.cause().is_some());
    }

    #[test]
    fn translation_is_deterministic() {
        let a = translate(ProviderError::ConnectionClosed("peer reset".into()));
        let b = translate(ProviderError::ConnectionClosed("peer reset".into()));
        assert_eq!(a, b);
    }
}
