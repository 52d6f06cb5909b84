use tracing::{debug, info};

use crate::{
    bluesky::{types::POINTS_DELETE, AtUri, RepoClient, WriteOperation},
    error::{Result, SweepError},
    sweep::{limiter::RateLimiter, scanner::DeletionCandidate},
};

/// Candidates of a single repository that go into one `applyWrites` call.
#[derive(Debug, PartialEq, Eq)]
pub struct WriteBatch<'a> {
    pub account_id: &'a str,
    pub candidates: &'a [DeletionCandidate],
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeleteSummary {
    pub batches: usize,
    pub records: usize,
    /// Record URIs a dry run would have deleted, in batch order
    pub would_delete: Vec<String>,
}

/// Group candidates by account in order of first appearance, keeping relative order.
fn group_by_account(candidates: &[DeletionCandidate]) -> Vec<(&str, Vec<DeletionCandidate>)> {
    let mut groups: Vec<(&str, Vec<DeletionCandidate>)> = Vec::new();

    for candidate in candidates {
        match groups.iter_mut().find(|(account, _)| *account == candidate.account_id) {
            Some((_, group)) => group.push(candidate.clone()),
            None => groups.push((candidate.account_id.as_str(), vec![candidate.clone()])),
        }
    }

    groups
}

/// Slice each account's group into consecutive batches of at most `max_batch_size`.
fn plan_batches<'a>(
    groups: &'a [(&'a str, Vec<DeletionCandidate>)],
    max_batch_size: usize,
) -> Vec<WriteBatch<'a>> {
    groups
        .iter()
        .flat_map(|(account_id, group)| {
            let account_id: &'a str = account_id;
            group.chunks(max_batch_size).map(move |chunk| WriteBatch {
                account_id,
                candidates: chunk,
            })
        })
        .collect()
}

/// Deletes candidates with as few `applyWrites` calls as the PDS allows.
pub struct BatchDeleter {
    collection: String,
    max_batch_size: usize,
    dry_run: bool,
}

impl BatchDeleter {
    pub fn new(collection: &str, max_batch_size: usize, dry_run: bool) -> Result<Self> {
        if max_batch_size == 0 {
            return Err(SweepError::Config("write batch size must be greater than 0".to_string()));
        }

        Ok(Self {
            collection: collection.to_string(),
            max_batch_size,
            dry_run,
        })
    }

    /// Delete `candidates`, spending one "delete" point per batch.
    ///
    /// Dry runs spend the same points but never call the PDS. The first failure
    /// aborts the remaining batches; batches already applied stay applied.
    pub async fn delete(
        &self,
        client: &dyn RepoClient,
        candidates: &[DeletionCandidate],
        limiter: &RateLimiter,
    ) -> Result<DeleteSummary> {
        if candidates.is_empty() {
            return Ok(DeleteSummary::default());
        }

        let groups = group_by_account(candidates);
        let batches = plan_batches(&groups, self.max_batch_size);
        let mut summary = DeleteSummary::default();

        for (batch_num, batch) in batches.iter().enumerate() {
            limiter.spend(POINTS_DELETE).await?;

            if self.dry_run {
                info!(
                    "DRY RUN: Would delete {} records from {} (batch {}/{})",
                    batch.candidates.len(),
                    batch.account_id,
                    batch_num + 1,
                    batches.len()
                );
                for candidate in batch.candidates {
                    let uri = AtUri {
                        authority: batch.account_id.to_string(),
                        collection: self.collection.clone(),
                        rkey: candidate.record_key.clone(),
                    }
                    .to_string();
                    info!("DRY RUN: Would delete {} (created {})", uri, candidate.created_at.to_rfc3339());
                    summary.would_delete.push(uri);
                }
            } else {
                let writes = batch
                    .candidates
                    .iter()
                    .map(|candidate| WriteOperation::Delete {
                        collection: self.collection.clone(),
                        rkey: candidate.record_key.clone(),
                    })
                    .collect();

                client.apply_writes(batch.account_id, writes).await?;

                debug!(
                    "Deleted {} records from {} (batch {}/{})",
                    batch.candidates.len(),
                    batch.account_id,
                    batch_num + 1,
                    batches.len()
                );
            }

            summary.batches += 1;
            summary.records += batch.candidates.len();
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluesky::{client::MockRepoClient, types::COLLECTION_POST};
    use chrono::Utc;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn candidates(account_id: &str, count: usize) -> Vec<DeletionCandidate> {
        (0..count)
            .map(|i| DeletionCandidate {
                account_id: account_id.to_string(),
                record_key: format!("{account_id}-{i}"),
                created_at: Utc::now(),
            })
            .collect()
    }

    fn limiter() -> RateLimiter {
        RateLimiter::new(1000, Duration::from_secs(3600), None).unwrap()
    }

    fn recording_client(calls: Arc<Mutex<Vec<(String, Vec<String>)>>>) -> MockRepoClient {
        let mut client = MockRepoClient::new();
        client.expect_apply_writes().returning(move |repo, writes| {
            let rkeys = writes
                .into_iter()
                .map(|WriteOperation::Delete { rkey, .. }| rkey)
                .collect();
            calls.lock().unwrap().push((repo.to_string(), rkeys));
            Ok(())
        });
        client
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        assert!(matches!(
            BatchDeleter::new(COLLECTION_POST, 0, false),
            Err(SweepError::Config(_))
        ));
    }

    #[test]
    fn test_batches_never_mix_accounts() {
        let mut input = candidates("did:plc:a", 3);
        input.extend(candidates("did:plc:b", 2));
        input.push(DeletionCandidate {
            account_id: "did:plc:a".to_string(),
            record_key: "did:plc:a-late".to_string(),
            created_at: Utc::now(),
        });

        let groups = group_by_account(&input);
        let batches = plan_batches(&groups, 2);

        let shape: Vec<_> = batches
            .iter()
            .map(|b| {
                assert!(b.candidates.iter().all(|c| c.account_id == b.account_id));
                (b.account_id, b.candidates.len())
            })
            .collect();
        assert_eq!(shape, vec![("did:plc:a", 2), ("did:plc:a", 2), ("did:plc:b", 2)]);

        // Relative order within an account is preserved
        assert_eq!(batches[1].candidates[1].record_key, "did:plc:a-late");
    }

    #[tokio::test]
    async fn test_empty_input_is_noop() {
        let mut client = MockRepoClient::new();
        client.expect_apply_writes().never();

        let limiter = limiter();
        let deleter = BatchDeleter::new(COLLECTION_POST, 10, false).unwrap();
        let summary = deleter.delete(&client, &[], &limiter).await.unwrap();

        assert_eq!(summary, DeleteSummary::default());
        assert_eq!(limiter.spent_points(), 0);
    }

    #[tokio::test]
    async fn test_twenty_five_records_make_three_batches() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let client = recording_client(calls.clone());

        let limiter = limiter();
        let deleter = BatchDeleter::new(COLLECTION_POST, 10, false).unwrap();
        let summary = deleter.delete(&client, &candidates("A", 25), &limiter).await.unwrap();

        let calls = calls.lock().unwrap();
        let sizes: Vec<_> = calls.iter().map(|(_, rkeys)| rkeys.len()).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert!(calls.iter().all(|(repo, _)| repo == "A"));
        assert_eq!(calls[0].1[0], "A-0");
        assert_eq!(calls[2].1[4], "A-24");
        assert_eq!(summary.batches, 3);
        assert_eq!(summary.records, 25);
        assert!(summary.would_delete.is_empty());
        assert_eq!(limiter.spent_points(), 3);
    }

    #[tokio::test]
    async fn test_dry_run_spends_same_points_without_writes() {
        let mut input = candidates("did:plc:a", 12);
        input.extend(candidates("did:plc:b", 3));

        let calls = Arc::new(Mutex::new(Vec::new()));
        let live_client = recording_client(calls.clone());
        let live_limiter = limiter();
        BatchDeleter::new(COLLECTION_POST, 10, false)
            .unwrap()
            .delete(&live_client, &input, &live_limiter)
            .await
            .unwrap();

        let mut dry_client = MockRepoClient::new();
        dry_client.expect_apply_writes().never();
        let dry_limiter = limiter();
        let summary = BatchDeleter::new(COLLECTION_POST, 10, true)
            .unwrap()
            .delete(&dry_client, &input, &dry_limiter)
            .await
            .unwrap();

        assert_eq!(calls.lock().unwrap().len(), 3);
        assert_eq!(dry_limiter.spent_points(), live_limiter.spent_points());
        assert_eq!((summary.batches, summary.records), (3, 15));
    }

    #[tokio::test]
    async fn test_dry_run_names_every_record() {
        let mut input = candidates("did:plc:a", 3);
        input.extend(candidates("did:plc:b", 2));

        let mut client = MockRepoClient::new();
        client.expect_apply_writes().never();

        let limiter = limiter();
        let summary = BatchDeleter::new(COLLECTION_POST, 2, true)
            .unwrap()
            .delete(&client, &input, &limiter)
            .await
            .unwrap();

        let expected: Vec<_> = input
            .iter()
            .map(|c| format!("at://{}/{}/{}", c.account_id, COLLECTION_POST, c.record_key))
            .collect();
        assert_eq!(summary.would_delete, expected);
        assert_eq!(summary.records, 5);
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_batches() {
        let mut client = MockRepoClient::new();
        let mut seq = mockall::Sequence::new();
        client
            .expect_apply_writes()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        client
            .expect_apply_writes()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Err(SweepError::Api {
                    status: 500,
                    error: "InternalServerError".to_string(),
                    message: "boom".to_string(),
                })
            });

        let limiter = limiter();
        let deleter = BatchDeleter::new(COLLECTION_POST, 10, false).unwrap();
        let err = deleter
            .delete(&client, &candidates("did:plc:a", 30), &limiter)
            .await
            .unwrap_err();

        assert!(matches!(err, SweepError::Api { status: 500, .. }));
        assert_eq!(limiter.spent_points(), 2);
    }
}
