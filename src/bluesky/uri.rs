use crate::error::{Result, SweepError};

/// Parsed `at://<authority>/<collection>/<rkey>` record URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtUri {
    pub authority: String,
    pub collection: String,
    pub rkey: String,
}

impl AtUri {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || SweepError::InvalidRecordUri(raw.to_string());

        let path = raw.strip_prefix("at://").ok_or_else(invalid)?;
        let mut segments = path.split('/');

        let authority = segments.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let collection = segments.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let rkey = segments.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;

        if segments.next().is_some() {
            return Err(invalid());
        }

        Ok(Self {
            authority: authority.to_string(),
            collection: collection.to_string(),
            rkey: rkey.to_string(),
        })
    }
}

impl std::fmt::Display for AtUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "at://{}/{}/{}", self.authority, self.collection, self.rkey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record_uri() {
        let uri = AtUri::parse("at://did:plc:abc123/app.bsky.feed.post/3jzfcijpj2z2a").unwrap();
        assert_eq!(uri.authority, "did:plc:abc123");
        assert_eq!(uri.collection, "app.bsky.feed.post");
        assert_eq!(uri.rkey, "3jzfcijpj2z2a");
        assert_eq!(uri.to_string(), "at://did:plc:abc123/app.bsky.feed.post/3jzfcijpj2z2a");
    }

    #[test]
    fn test_rejects_malformed_uris() {
        for raw in [
            "https://did:plc:abc/app.bsky.feed.post/1",
            "at://did:plc:abc/app.bsky.feed.post",
            "at://did:plc:abc//1",
            "at://did:plc:abc/app.bsky.feed.post/1/extra",
            "",
        ] {
            assert!(
                matches!(AtUri::parse(raw), Err(SweepError::InvalidRecordUri(_))),
                "accepted {raw:?}"
            );
        }
    }
}
