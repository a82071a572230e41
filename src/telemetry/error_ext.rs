//! Error logging at request boundaries
//!
//! Caller mistakes (unknown session, bad params, before `initialize`) are
//! logged at `debug`; everything else at `warn` with its wire code, retry
//! hint and source chain.

use std::error::Error as StdError;

use crate::types::AgentError;

pub trait ErrorTraceExt {
    /// Log this error as the outcome of `operation`
    fn trace_error(&self, operation: &str) -> &Self;
}

impl ErrorTraceExt for AgentError {
    fn trace_error(&self, operation: &str) -> &Self {
        let code = self.error_code().code();
        if self.is_client_error() {
            tracing::debug!(operation, error = %self, code, "Request rejected");
            return self;
        }

        let chain = source_chain(self);
        tracing::warn!(
            operation,
            error = %self,
            code,
            retryable = self.is_retryable(),
            retry_after_ms = self.retry_after().map(|d| d.as_millis() as u64),
            error_chain = ?chain,
            "Request failed"
        );
        self
    }
}

pub trait ResultTraceExt<T> {
    /// Log the error, if any, and pass the result through unchanged
    fn traced(self, operation: &str) -> Result<T, AgentError>;
}

impl<T> ResultTraceExt<T> for Result<T, AgentError> {
    fn traced(self, operation: &str) -> Result<T, AgentError> {
        if let Err(ref e) = self {
            e.trace_error(operation);
        }
        self
    }
}

/// Messages of every error below `error`, outermost first
fn source_chain(error: &dyn StdError) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = error.source();
    while let Some(source) = current {
        chain.push(source.to_string());
        current = source.source();
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolveError;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_traced_passes_result_through() {
        let ok: Result<u8, AgentError> = Ok(7);
        assert_eq!(ok.traced("session/new").unwrap(), 7);

        let err: Result<u8, AgentError> = Err(AgentError::session_not_found("s1"));
        assert!(matches!(
            err.traced("session/prompt"),
            Err(AgentError::SessionNotFound(ref id)) if id == "s1"
        ));
    }

    #[test]
    fn test_source_chain_follows_wrapped_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no access");
        let err = AgentError::from(ResolveError::from(io));
        assert_eq!(source_chain(&err), vec!["no access".to_string()]);

        assert!(source_chain(&AgentError::internal("oops")).is_empty());
    }
}
