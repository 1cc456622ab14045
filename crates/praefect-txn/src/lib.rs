//! The reference-transaction coordinator (spec §4.E): backends vote on
//! a subtransaction's outcome, and the manager resolves each one by
//! quorum as soon as the result is mathematically decided.

mod manager;
mod types;

pub use manager::{TransactionHandle, TransactionManager};
pub use types::{minimum_quorum, TransactionId, TxnError, VoteHash, VoteOutcome};

#[cfg(test)]
mod test {
    use super::*;
    use praefect_base::StorageName;
    use std::time::Duration;

    fn storage(name: &str) -> StorageName {
        StorageName(name.into())
    }

    #[tokio::test]
    async fn happy_path_mutation_commits_once_quorum_votes_the_same_hash() {
        let mgr = TransactionManager::new();
        let (id, _handle) = mgr.register_transaction(vec![storage("a"), storage("b"), storage("c")], None).unwrap();
        assert_eq!(minimum_quorum(3), 2);

        let a = tokio::spawn({
            let mgr = mgr.clone();
            async move { mgr.vote_transaction(id, &storage("a"), vec![1]).await.unwrap() }
        });
        let b = tokio::spawn({
            let mgr = mgr.clone();
            async move { mgr.vote_transaction(id, &storage("b"), vec![1]).await.unwrap() }
        });

        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.unwrap(), VoteOutcome::Committed);
        assert_eq!(b.unwrap(), VoteOutcome::Committed);

        let c = mgr.vote_transaction(id, &storage("c"), vec![2]).await.unwrap();
        assert_eq!(c, VoteOutcome::TransactionFailed, "late dissenting voter loses once quorum already committed");
    }

    #[tokio::test]
    async fn minority_dissent_does_not_block_commit() {
        let mgr = TransactionManager::new();
        let (id, _handle) = mgr.register_transaction(vec![storage("a"), storage("b"), storage("c")], None).unwrap();

        let a = tokio::spawn({
            let mgr = mgr.clone();
            async move { mgr.vote_transaction(id, &storage("a"), vec![1]).await.unwrap() }
        });
        let b = tokio::spawn({
            let mgr = mgr.clone();
            async move { mgr.vote_transaction(id, &storage("b"), vec![1]).await.unwrap() }
        });
        let c = tokio::spawn({
            let mgr = mgr.clone();
            async move { mgr.vote_transaction(id, &storage("c"), vec![9]).await.unwrap() }
        });

        let (a, b, c) = tokio::join!(a, b, c);
        assert_eq!(a.unwrap(), VoteOutcome::Committed);
        assert_eq!(b.unwrap(), VoteOutcome::Committed);
        assert_eq!(c.unwrap(), VoteOutcome::TransactionFailed);
    }

    #[tokio::test]
    async fn no_quorum_aborts_once_mathematically_impossible() {
        let mgr = TransactionManager::new();
        let (id, _handle) = mgr.register_transaction(vec![storage("a"), storage("b"), storage("c"), storage("d")], None).unwrap();

        // Threshold is 3 of 4. a, b, c each vote a distinct hash, so
        // even if the lone remaining voter (d) sides with the leader
        // no hash can reach 3 — this should abort without waiting for d.
        let a = tokio::spawn({
            let mgr = mgr.clone();
            async move { mgr.vote_transaction(id, &storage("a"), vec![1]).await.unwrap() }
        });
        let b = tokio::spawn({
            let mgr = mgr.clone();
            async move { mgr.vote_transaction(id, &storage("b"), vec![2]).await.unwrap() }
        });
        let c = tokio::spawn({
            let mgr = mgr.clone();
            async move { mgr.vote_transaction(id, &storage("c"), vec![3]).await.unwrap() }
        });

        let (a, b, c) = tokio::join!(a, b, c);
        assert_eq!(a.unwrap(), VoteOutcome::TransactionFailed);
        assert_eq!(b.unwrap(), VoteOutcome::TransactionFailed);
        assert_eq!(c.unwrap(), VoteOutcome::TransactionFailed);
    }

    #[test]
    fn register_rejects_an_explicit_threshold_below_quorum() {
        let mgr = TransactionManager::new();
        let err = mgr.register_transaction(vec![storage("a"), storage("b"), storage("c")], Some(1)).unwrap_err();
        assert!(matches!(err, TxnError::ThresholdTooLow { .. }));
    }

    #[test]
    fn register_rejects_duplicate_voters() {
        let mgr = TransactionManager::new();
        let err = mgr.register_transaction(vec![storage("a"), storage("a")], None).unwrap_err();
        assert!(matches!(err, TxnError::DuplicateVoter(_)));
    }

    #[tokio::test]
    async fn stop_transaction_resolves_pending_votes_as_stopped_not_failed() {
        let mgr = TransactionManager::new();
        let (id, handle) = mgr.register_transaction(vec![storage("a"), storage("b")], None).unwrap();

        let a = tokio::spawn({
            let mgr = mgr.clone();
            async move { mgr.vote_transaction(id, &storage("a"), vec![1]).await.unwrap() }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();

        assert_eq!(a.await.unwrap(), VoteOutcome::Stopped);
    }
}
