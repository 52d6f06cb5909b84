use chrono::{DateTime, Months, NaiveDateTime, TimeZone, Utc};
use tracing::debug;

use crate::{
    bluesky::{types::POINTS_GET, AtUri, RepoClient},
    error::{Result, SweepError},
    sweep::limiter::RateLimiter,
};

/// Timestamp layout some records carry without a zone offset.
const NAIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// A record old enough to be deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionCandidate {
    pub account_id: String,
    pub record_key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub candidates: Vec<DeletionCandidate>,
    /// Last cursor returned by the listing, or the input cursor if nothing was fetched
    pub cursor: String,
    pub pages_fetched: usize,
}

/// Parse a record's `createdAt`, accepting RFC 3339 and the offset-less variant (read as UTC).
pub fn parse_created_at(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, NAIVE_TIMESTAMP_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|source| SweepError::Timestamp {
            value: raw.to_string(),
            source,
        })
}

/// Records created strictly before the returned instant are old enough to delete.
pub fn age_cutoff(now: DateTime<Utc>, max_age_months: u32) -> Result<DateTime<Utc>> {
    now.checked_sub_months(Months::new(max_age_months)).ok_or_else(|| {
        SweepError::Config(format!("post TTL of {} months is out of range", max_age_months))
    })
}

/// Walks an account's records oldest first and collects the ones past their TTL.
pub struct RecordScanner {
    collection: String,
    page_size: usize,
    max_pages: usize,
}

impl RecordScanner {
    pub fn new(collection: &str, page_size: usize, max_pages: usize) -> Self {
        Self {
            collection: collection.to_string(),
            page_size,
            max_pages,
        }
    }

    /// Scan from `cursor` (empty = oldest record) for records older than `max_age_months`.
    ///
    /// Each page costs one "get" point. Because the listing is oldest first, the
    /// first record inside the TTL ends the scan: everything after it is younger.
    /// An empty cursor in a response marks the end of the collection.
    pub async fn scan(
        &self,
        client: &dyn RepoClient,
        max_age_months: u32,
        cursor: &str,
        limiter: &RateLimiter,
    ) -> Result<ScanOutcome> {
        let cutoff = age_cutoff(Utc::now(), max_age_months)?;
        let did = client.did();

        let mut outcome = ScanOutcome {
            cursor: cursor.to_string(),
            ..ScanOutcome::default()
        };

        'pages: for _ in 0..self.max_pages {
            limiter.spend(POINTS_GET).await?;

            let page = client
                .list_records(&self.collection, self.page_size, &outcome.cursor, true)
                .await?;
            outcome.pages_fetched += 1;
            outcome.cursor = page.cursor.unwrap_or_default();

            debug!(
                "Fetched page {} for {} ({} records)",
                outcome.pages_fetched,
                did,
                page.records.len()
            );

            for record in page.records {
                let created_at = parse_created_at(&record.value.created_at)?;

                if created_at >= cutoff {
                    debug!("Reached {} created at {}, stopping scan for {}", record.uri, created_at, did);
                    break 'pages;
                }

                let uri = AtUri::parse(&record.uri)?;
                outcome.candidates.push(DeletionCandidate {
                    account_id: uri.authority,
                    record_key: uri.rkey,
                    created_at,
                });
            }

            if outcome.cursor.trim().is_empty() {
                debug!("Reached end of collection for {}", did);
                break;
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluesky::{
        client::MockRepoClient,
        types::{ListRecordsOutput, RecordEntry, RecordValue, COLLECTION_POST},
    };
    use chrono::Duration as ChronoDuration;
    use mockall::Sequence;
    use std::time::Duration;

    const DID: &str = "did:plc:alice";

    fn record(rkey: &str, created_at: DateTime<Utc>) -> RecordEntry {
        RecordEntry {
            uri: format!("at://{DID}/{COLLECTION_POST}/{rkey}"),
            value: RecordValue {
                created_at: created_at.to_rfc3339(),
            },
        }
    }

    fn old(days: i64) -> DateTime<Utc> {
        Utc::now() - ChronoDuration::days(365 * 2 + days)
    }

    fn young() -> DateTime<Utc> {
        Utc::now() - ChronoDuration::days(1)
    }

    fn page(records: Vec<RecordEntry>, cursor: &str) -> ListRecordsOutput {
        ListRecordsOutput {
            records,
            cursor: (!cursor.is_empty()).then(|| cursor.to_string()),
        }
    }

    fn client() -> MockRepoClient {
        let mut client = MockRepoClient::new();
        client.expect_did().return_const(DID.to_string());
        client
    }

    fn limiter() -> RateLimiter {
        RateLimiter::new(1000, Duration::from_secs(3600), None).unwrap()
    }

    #[test]
    fn test_parse_created_at_formats() {
        let with_offset = parse_created_at("2023-09-14T08:15:30.123Z").unwrap();
        assert_eq!(with_offset.to_rfc3339(), "2023-09-14T08:15:30.123+00:00");

        let shifted = parse_created_at("2023-09-14T10:15:30.123456+02:00").unwrap();
        assert_eq!(shifted.timestamp(), with_offset.timestamp());

        let naive = parse_created_at("2023-09-14T08:15:30.123456").unwrap();
        assert_eq!(naive.timestamp(), with_offset.timestamp());
    }

    #[test]
    fn test_parse_created_at_rejects_garbage() {
        let err = parse_created_at("14/09/2023").unwrap_err();
        assert!(matches!(err, SweepError::Timestamp { ref value, .. } if value == "14/09/2023"));
    }

    #[test]
    fn test_age_cutoff_uses_calendar_months() {
        let now = Utc.with_ymd_and_hms(2024, 7, 15, 12, 0, 0).unwrap();
        assert_eq!(
            age_cutoff(now, 6).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
        );
        assert_eq!(age_cutoff(now, 0).unwrap(), now);
    }

    #[tokio::test]
    async fn test_stops_at_first_young_record() {
        let mut client = client();
        client
            .expect_list_records()
            .times(1)
            .returning(|_, _, _, _| {
                Ok(page(vec![record("a", old(2)), record("b", old(1)), record("c", young())], "next"))
            });

        let limiter = limiter();
        let scanner = RecordScanner::new(COLLECTION_POST, 100, 5);
        let outcome = scanner.scan(&client, 6, "", &limiter).await.unwrap();

        let keys: Vec<_> = outcome.candidates.iter().map(|c| c.record_key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert!(outcome.candidates.iter().all(|c| c.account_id == DID));
        assert_eq!(outcome.pages_fetched, 1);
        assert_eq!(outcome.cursor, "next");
        assert_eq!(limiter.spent_points(), 1);
    }

    #[tokio::test]
    async fn test_follows_cursor_across_pages() {
        let mut client = client();
        let mut seq = Sequence::new();
        client
            .expect_list_records()
            .withf(|collection, limit, cursor, reverse| {
                collection == COLLECTION_POST && *limit == 2 && cursor == "start" && *reverse
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(page(vec![record("a", old(4)), record("b", old(3))], "p2")));
        client
            .expect_list_records()
            .withf(|_, _, cursor, _| cursor == "p2")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(page(vec![record("c", old(2)), record("d", old(1))], "p3")));

        let limiter = limiter();
        let scanner = RecordScanner::new(COLLECTION_POST, 2, 2);
        let outcome = scanner.scan(&client, 12, "start", &limiter).await.unwrap();

        assert_eq!(outcome.candidates.len(), 4);
        assert_eq!(outcome.pages_fetched, 2);
        assert_eq!(outcome.cursor, "p3");
        assert_eq!(limiter.spent_points(), 2);
    }

    // The listing cannot distinguish "empty collection" from "no more pages" on the
    // first response; both are treated as the end of the collection.
    #[tokio::test]
    async fn test_empty_response_cursor_ends_scan_on_first_page() {
        let mut client = client();
        client
            .expect_list_records()
            .times(1)
            .returning(|_, _, _, _| Ok(page(vec![record("a", old(1))], "")));

        let limiter = limiter();
        let scanner = RecordScanner::new(COLLECTION_POST, 100, 5);
        let outcome = scanner.scan(&client, 6, "", &limiter).await.unwrap();

        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.pages_fetched, 1);
        assert_eq!(outcome.cursor, "");
    }

    #[tokio::test]
    async fn test_zero_pages_keeps_input_cursor() {
        let mut client = client();
        client.expect_list_records().never();

        let limiter = limiter();
        let scanner = RecordScanner::new(COLLECTION_POST, 100, 0);
        let outcome = scanner.scan(&client, 6, "resume", &limiter).await.unwrap();

        assert!(outcome.candidates.is_empty());
        assert_eq!(outcome.cursor, "resume");
        assert_eq!(limiter.spent_points(), 0);
    }

    #[tokio::test]
    async fn test_unparseable_timestamp_fails_scan() {
        let mut client = client();
        client.expect_list_records().returning(|_, _, _, _| {
            let mut bad = record("b", old(1));
            bad.value.created_at = "yesterday".to_string();
            Ok(page(vec![record("a", old(2)), bad], "next"))
        });

        let limiter = limiter();
        let scanner = RecordScanner::new(COLLECTION_POST, 100, 5);
        let err = scanner.scan(&client, 6, "", &limiter).await.unwrap_err();
        assert!(matches!(err, SweepError::Timestamp { .. }));
    }

    #[tokio::test]
    async fn test_malformed_record_uri_fails_scan() {
        let mut client = client();
        client.expect_list_records().times(1).returning(|_, _, _, _| {
            let mut bad = record("b", old(1));
            bad.uri = format!("at://{DID}/{COLLECTION_POST}");
            Ok(page(vec![record("a", old(2)), bad, record("c", old(1))], "next"))
        });

        let limiter = limiter();
        let scanner = RecordScanner::new(COLLECTION_POST, 100, 5);
        let err = scanner.scan(&client, 6, "", &limiter).await.unwrap_err();
        assert!(
            matches!(err, SweepError::InvalidRecordUri(ref uri) if uri == &format!("at://{DID}/{COLLECTION_POST}"))
        );
    }

    #[tokio::test]
    async fn test_cancelled_limiter_stops_before_fetching() {
        let mut client = client();
        client.expect_list_records().never();

        let limiter = std::sync::Arc::new(limiter());
        let shutdown = tokio_util::sync::CancellationToken::new();
        shutdown.cancel();
        limiter.run(shutdown).await;

        let scanner = RecordScanner::new(COLLECTION_POST, 100, 5);
        let err = scanner.scan(&client, 6, "", &limiter).await.unwrap_err();
        assert!(matches!(err, SweepError::Cancelled));
    }
}
