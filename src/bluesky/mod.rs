pub mod client;
pub mod types;
pub mod uri;

pub use client::{
    build_http_client, AuthenticatedClient, RepoClient, SessionProvider, XrpcClient,
    XrpcSessionProvider,
};
pub use types::{ListRecordsOutput, RecordEntry, RecordValue, Session, WriteOperation};
pub use uri::AtUri;
