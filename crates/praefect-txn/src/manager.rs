use crate::types::{minimum_quorum, TransactionId, TxnError, VoteHash, VoteOutcome};
use praefect_base::StorageName;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Clone)]
enum Resolution {
    Commit(VoteHash),
    Abort,
    Stopped,
}

#[derive(Debug)]
struct SubtransactionState {
    votes: HashMap<VoteHash, HashSet<StorageName>>,
    voted: HashSet<StorageName>,
    resolution: Option<Resolution>,
}

/// A subtransaction is kept alive behind an `Arc` past the point its
/// transaction replaces `current` with a fresh one, so voters already
/// waiting on it still observe its resolution (spec.md §4.E).
#[derive(Debug)]
struct Subtransaction {
    state: Mutex<SubtransactionState>,
    notify: Notify,
}

impl Subtransaction {
    fn new() -> Arc<Self> {
        Arc::new(Subtransaction {
            state: Mutex::new(SubtransactionState { votes: HashMap::new(), voted: HashSet::new(), resolution: None }),
            notify: Notify::new(),
        })
    }
}

#[derive(Debug)]
struct Transaction {
    voters: Vec<StorageName>,
    threshold: u32,
    current: Arc<Subtransaction>,
    stopped: bool,
}

/// TransactionManager is the reference-transaction coordinator of
/// spec.md §4.E. It tracks live transactions and, within each, a
/// sequence of subtransactions — one reference-update round apiece —
/// resolving each by simple-majority-or-higher quorum.
#[derive(Debug, Clone)]
pub struct TransactionManager {
    transactions: Arc<Mutex<HashMap<TransactionId, Transaction>>>,
    next_id: Arc<AtomicU64>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        TransactionManager { transactions: Arc::new(Mutex::new(HashMap::new())), next_id: Arc::new(AtomicU64::new(1)) }
    }

    /// Registers a new transaction. `threshold` defaults to a simple
    /// majority of `voters`; an explicit value below that minimum is
    /// rejected to avoid split commits (spec.md §4.E).
    pub fn register_transaction(
        &self,
        voters: Vec<StorageName>,
        threshold: Option<u32>,
    ) -> Result<(TransactionId, TransactionHandle), TxnError> {
        if voters.is_empty() {
            return Err(TxnError::MissingVoters);
        }
        let mut seen = HashSet::new();
        for voter in &voters {
            if !seen.insert(voter.clone()) {
                return Err(TxnError::DuplicateVoter(voter.clone()));
            }
        }

        let minimum = minimum_quorum(voters.len());
        let threshold = threshold.unwrap_or(minimum);
        if threshold < minimum {
            return Err(TxnError::ThresholdTooLow { threshold, minimum, voters: voters.len() });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let txn = Transaction { voters, threshold, current: Subtransaction::new(), stopped: false };
        self.transactions.lock().unwrap().insert(id, txn);

        Ok((id, TransactionHandle { manager: self.clone(), id }))
    }

    /// Casts `voter`'s vote for `hash` in the current subtransaction of
    /// `id`, and waits for that subtransaction to resolve.
    pub async fn vote_transaction(&self, id: TransactionId, voter: &StorageName, hash: VoteHash) -> Result<VoteOutcome, TxnError> {
        let sub = {
            let transactions = self.transactions.lock().unwrap();
            let txn = transactions.get(&id).ok_or(TxnError::NotFound(id))?;
            if !txn.voters.contains(voter) {
                return Err(TxnError::InvalidVoter(voter.clone(), id));
            }
            if txn.stopped {
                return Ok(VoteOutcome::Stopped);
            }
            txn.current.clone()
        };

        let (threshold, voter_count) = {
            let transactions = self.transactions.lock().unwrap();
            let txn = transactions.get(&id).ok_or(TxnError::NotFound(id))?;
            (txn.threshold, txn.voters.len())
        };

        let resolved_now = {
            let mut state = sub.state.lock().unwrap();
            if state.voted.contains(voter) {
                return Err(TxnError::AlreadyVoted(voter.clone(), id));
            }
            state.voted.insert(voter.clone());
            state.votes.entry(hash.clone()).or_default().insert(voter.clone());

            if state.resolution.is_none() {
                state.resolution = resolve(&state.votes, state.voted.len(), voter_count, threshold);
            }
            state.resolution.clone()
        };

        if resolved_now.is_some() {
            sub.notify.notify_waiters();
            self.rotate_if_current(id, &sub);
        }

        let resolution = self.wait_for_resolution(&sub).await;
        Ok(outcome_for(&resolution, &hash))
    }

    /// Forces every pending subtransaction of `id` to `Stopped`.
    pub fn stop_transaction(&self, id: TransactionId) {
        let sub = {
            let mut transactions = self.transactions.lock().unwrap();
            let Some(txn) = transactions.get_mut(&id) else { return };
            txn.stopped = true;
            txn.current.clone()
        };
        let mut state = sub.state.lock().unwrap();
        if state.resolution.is_none() {
            state.resolution = Some(Resolution::Stopped);
        }
        drop(state);
        sub.notify.notify_waiters();
    }

    fn rotate_if_current(&self, id: TransactionId, resolved: &Arc<Subtransaction>) {
        let mut transactions = self.transactions.lock().unwrap();
        if let Some(txn) = transactions.get_mut(&id) {
            if Arc::ptr_eq(&txn.current, resolved) && !txn.stopped {
                txn.current = Subtransaction::new();
            }
        }
    }

    async fn wait_for_resolution(&self, sub: &Arc<Subtransaction>) -> Resolution {
        loop {
            if let Some(resolution) = sub.state.lock().unwrap().resolution.clone() {
                return resolution;
            }
            sub.notify.notified().await;
        }
    }
}

/// Determines whether the subtransaction can resolve given the votes
/// cast so far. Resolves to `Commit` as soon as a hash has quorum, or
/// to `Abort` once no hash can mathematically still reach it even if
/// every outstanding voter broke for the current leader (spec.md §4.E).
fn resolve(
    votes: &HashMap<VoteHash, HashSet<StorageName>>,
    voted: usize,
    total_voters: usize,
    threshold: u32,
) -> Option<Resolution> {
    let threshold = threshold as usize;
    if let Some((hash, _)) = votes.iter().find(|(_, voters)| voters.len() >= threshold) {
        return Some(Resolution::Commit(hash.clone()));
    }

    let remaining = total_voters - voted;
    let best_possible = votes.values().map(|v| v.len()).max().unwrap_or(0) + remaining;
    if best_possible < threshold {
        return Some(Resolution::Abort);
    }
    None
}

fn outcome_for(resolution: &Resolution, voter_hash: &VoteHash) -> VoteOutcome {
    match resolution {
        Resolution::Commit(winner) if winner == voter_hash => VoteOutcome::Committed,
        Resolution::Commit(_) | Resolution::Abort => VoteOutcome::TransactionFailed,
        Resolution::Stopped => VoteOutcome::Stopped,
    }
}

/// TransactionHandle is the `cancel` half of `RegisterTransaction`'s
/// `(id, cancel)` return (spec.md §4.E).
#[derive(Debug)]
pub struct TransactionHandle {
    manager: TransactionManager,
    id: TransactionId,
}

impl TransactionHandle {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn cancel(&self) {
        self.manager.stop_transaction(self.id);
    }
}
