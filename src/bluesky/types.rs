use serde::{Deserialize, Serialize};

pub const COLLECTION_POST: &str = "app.bsky.feed.post";

/// Point costs charged by the PDS per operation kind.
pub const POINTS_CREATE: u32 = 3;
pub const POINTS_UPDATE: u32 = 2;
pub const POINTS_DELETE: u32 = 1;
/// Not published; assumed to cost the same as a delete.
pub const POINTS_GET: u32 = 1;

/// One page of `com.atproto.repo.listRecords`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ListRecordsOutput {
    #[serde(default)]
    pub records: Vec<RecordEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordEntry {
    pub uri: String,
    pub value: RecordValue,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordValue {
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "$type")]
pub enum WriteOperation {
    #[serde(rename = "com.atproto.repo.applyWrites#delete")]
    Delete { collection: String, rkey: String },
}

#[derive(Debug, Serialize)]
pub(crate) struct ApplyWritesInput<'a> {
    pub repo: &'a str,
    pub writes: &'a [WriteOperation],
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateSessionInput<'a> {
    pub identifier: &'a str,
    pub password: &'a str,
}

/// Credentials returned by `createSession` / `refreshSession`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub did: String,
    pub handle: String,
    pub access_jwt: String,
    pub refresh_jwt: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct XrpcErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_write_serialization() {
        let op = WriteOperation::Delete {
            collection: COLLECTION_POST.to_string(),
            rkey: "3k2a".to_string(),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["$type"], "com.atproto.repo.applyWrites#delete");
        assert_eq!(json["collection"], COLLECTION_POST);
        assert_eq!(json["rkey"], "3k2a");
    }

    #[test]
    fn test_list_records_without_cursor() {
        let page: ListRecordsOutput = serde_json::from_str(
            r#"{"records":[{"uri":"at://did:plc:a/app.bsky.feed.post/1","cid":"x","value":{"text":"hi","createdAt":"2023-01-01T00:00:00.000Z"}}]}"#,
        )
        .unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].value.created_at, "2023-01-01T00:00:00.000Z");
        assert!(page.cursor.is_none());
    }
}
