use thiserror::Error;

/// Errors raised by the message bus layer.
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("broker unreachable: {reason}")]
    ConnectionLost { reason: String },

    #[error("publish to {exchange}:{routing_key} failed after retry: {reason}")]
    PublishFailed {
        exchange: String,
        routing_key: String,
        reason: String,
    },

    #[error("queue {queue} already has a subscriber")]
    AlreadySubscribed { queue: String },

    #[error("unknown queue: {queue}")]
    UnknownQueue { queue: String },

    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Errors raised by the cache layer. Most cache calls degrade to
/// `None`/`false` instead of surfacing these; they exist for the few
/// operations where the caller must distinguish failure from absence.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unreachable: {reason}")]
    ConnectionLost { reason: String },

    #[error("value at {key} is not valid JSON: {reason}")]
    Decode { key: String, reason: String },
}

/// Errors raised while building or running the indicator DAG.
#[derive(Debug, Error)]
pub enum IndicatorError {
    #[error("circular dependency detected involving {0}")]
    CyclicDependency(String),

    #[error("not enough candles: need {need}, got {got}")]
    InsufficientData { need: usize, got: usize },

    #[error("{indicator} failed: {reason}")]
    Calculation { indicator: String, reason: String },
}

/// Errors raised by the execution pipeline.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("invalid signal {id}: {reason}")]
    InvalidSignal { id: String, reason: String },

    #[error("exchange rejected order for {symbol}: {reason}")]
    ExchangeRejected { symbol: String, reason: String },

    #[error("illegal order status transition {from} -> {to} for order {id}")]
    IllegalTransition {
        id: String,
        from: String,
        to: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_formatting() {
        let err = IndicatorError::CyclicDependency("order_block".to_string());
        assert!(err.to_string().contains("order_block"));

        let err = ExecutionError::IllegalTransition {
            id: "42".to_string(),
            from: "filled".to_string(),
            to: "open".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("filled"));
        assert!(msg.contains("open"));
    }
}
