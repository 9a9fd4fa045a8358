use thiserror::Error;

/// Crate-wide error taxonomy.
///
/// Expected denials (`StopActive`, limit breaches) are not errors; they live
/// in [`crate::risk::Denial`] so callers can assert on the exact reason.
#[derive(Debug, Error)]
pub enum BotError {
    /// Every upstream endpoint was tried and failed this tick. Recoverable:
    /// the loop skips the tick and the rotation retries degraded endpoints
    /// on the next one.
    #[error("no RPC endpoint available after {attempts} attempts")]
    NoEndpointAvailable { attempts: usize },

    /// A single endpoint call failed (timeout, rate limit, malformed
    /// result). Internal to the rotation; surfaces as `NoEndpointAvailable`
    /// once the list is exhausted.
    #[error("rpc error from {endpoint}: {message}")]
    Rpc { endpoint: String, message: String },

    /// The signer rejected the transaction before broadcast (insufficient
    /// balance, nonce error, ...). No daily-counter charge applies.
    #[error("submission rejected before broadcast: {0}")]
    SubmissionRejected(String),

    /// The transaction was broadcast but not mined within the inclusion
    /// timeout. Outcome is ambiguous: accounting assumes not executed, but
    /// the nonce must not be reused.
    #[error("transaction {tx_hash} not included within {timeout_secs}s")]
    InclusionTimeout { tx_hash: String, timeout_secs: u64 },

    /// Persisted risk state failed validation (negative counters, impossible
    /// mode). Fatal: the process refuses to trade rather than guess.
    #[error("corrupt persisted risk state: {0}")]
    CorruptRiskState(String),

    /// Chain data that parsed as JSON but not as the expected ABI shape
    /// (wrong word count, oversized integer, bad hex).
    #[error("malformed chain data: {0}")]
    Decode(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BotError {
    /// Whether the loop should treat this as a skip-tick condition rather
    /// than a fault worth escalating.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BotError::NoEndpointAvailable { .. }
                | BotError::Rpc { .. }
                | BotError::SubmissionRejected(_)
                | BotError::InclusionTimeout { .. }
                | BotError::Decode(_)
                | BotError::Http(_)
        )
    }
}
