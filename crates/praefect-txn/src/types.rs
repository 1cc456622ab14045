use praefect_base::StorageName;

pub type TransactionId = u64;

/// VoteHash is the opaque digest a voter casts for a subtransaction
/// (spec.md §4.E). Praefect backends hash their proposed reference
/// updates; this crate never inspects the bytes.
pub type VoteHash = Vec<u8>;

/// Outcome delivered to a voter once its subtransaction resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// This voter's hash was among the quorum winner; proceed.
    Committed,
    /// Either no hash reached quorum, or this voter's hash lost to the
    /// one that did; the voter must abort its local write.
    TransactionFailed,
    /// The transaction was stopped, or its context died, before this
    /// subtransaction resolved. Distinct from `TransactionFailed`
    /// (spec.md §4.E: "returned to voters as an error that is *not*
    /// TransactionFailed").
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum TxnError {
    #[error("transaction must have at least one voter")]
    MissingVoters,
    #[error("duplicate voter {0}")]
    DuplicateVoter(StorageName),
    #[error("threshold {threshold} is below the minimum quorum {minimum} for {voters} voters")]
    ThresholdTooLow { threshold: u32, minimum: u32, voters: usize },
    #[error("transaction {0} not found")]
    NotFound(TransactionId),
    #[error("{0} is not a voter in transaction {1}")]
    InvalidVoter(StorageName, TransactionId),
    #[error("{0} already voted in the current subtransaction of {1}")]
    AlreadyVoted(StorageName, TransactionId),
}

impl From<TxnError> for praefect_base::Error {
    fn from(err: TxnError) -> Self {
        match err {
            TxnError::MissingVoters | TxnError::DuplicateVoter(_) | TxnError::ThresholdTooLow { .. } => {
                praefect_base::Error::InvalidArgument(err.to_string())
            }
            TxnError::NotFound(_) => praefect_base::Error::NotFound(err.to_string()),
            TxnError::InvalidVoter(_, _) | TxnError::AlreadyVoted(_, _) => {
                praefect_base::Error::FailedPrecondition(err.to_string())
            }
        }
    }
}

/// Minimum quorum for `n` voters: `floor(n/2) + 1`, i.e. a simple
/// majority (spec.md §4.E).
pub fn minimum_quorum(n: usize) -> u32 {
    (n / 2 + 1) as u32
}
