use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::{
    bluesky::types::{
        ApplyWritesInput, CreateSessionInput, ListRecordsOutput, Session, WriteOperation,
        XrpcErrorBody,
    },
    error::{Result, SweepError},
    storage::models::Configuration,
};

/// Repository calls made on behalf of one authenticated account.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RepoClient: Send + Sync {
    /// DID of the account the client is bound to
    fn did(&self) -> String;

    async fn list_records(
        &self,
        collection: &str,
        limit: usize,
        cursor: &str,
        reverse: bool,
    ) -> Result<ListRecordsOutput>;

    /// Applies all writes in one call; the PDS rejects the whole call on any element error.
    async fn apply_writes(&self, repo: &str, writes: Vec<WriteOperation>) -> Result<()>;
}

pub struct AuthenticatedClient {
    pub client: Box<dyn RepoClient>,
    pub session: Session,
}

/// Turns a stored configuration into a client with a fresh access token.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn open(&self, configuration: &Configuration) -> Result<AuthenticatedClient>;
}

pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("record-sweeper/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

fn endpoint(host: &str, nsid: &str) -> String {
    format!("{}/xrpc/{}", host.trim_end_matches('/'), nsid)
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body: XrpcErrorBody = response.json().await.unwrap_or_default();
    Err(SweepError::Api {
        status: status.as_u16(),
        error: body
            .error
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown").to_string()),
        message: body.message.unwrap_or_default(),
    })
}

/// XRPC client bound to one PDS host and session.
#[derive(Clone)]
pub struct XrpcClient {
    http: reqwest::Client,
    host: String,
    session: Session,
}

impl XrpcClient {
    pub fn new(http: reqwest::Client, host: &str, session: Session) -> Self {
        Self {
            http,
            host: host.to_string(),
            session,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Log in with an identifier (handle or DID) and an app password
    pub async fn create_session(
        http: &reqwest::Client,
        host: &str,
        identifier: &str,
        password: &str,
    ) -> Result<Session> {
        let response = http
            .post(endpoint(host, "com.atproto.server.createSession"))
            .json(&CreateSessionInput { identifier, password })
            .send()
            .await?;

        Ok(check_status(response).await?.json().await?)
    }

    /// Exchange a refresh token for a new session; the old refresh token is consumed
    pub async fn refresh_session(
        http: &reqwest::Client,
        host: &str,
        refresh_jwt: &str,
    ) -> Result<Session> {
        let response = http
            .post(endpoint(host, "com.atproto.server.refreshSession"))
            .bearer_auth(refresh_jwt)
            .send()
            .await?;

        Ok(check_status(response).await?.json().await?)
    }
}

#[async_trait]
impl RepoClient for XrpcClient {
    fn did(&self) -> String {
        self.session.did.clone()
    }

    async fn list_records(
        &self,
        collection: &str,
        limit: usize,
        cursor: &str,
        reverse: bool,
    ) -> Result<ListRecordsOutput> {
        let mut query = vec![
            ("repo", self.session.did.clone()),
            ("collection", collection.to_string()),
            ("reverse", reverse.to_string()),
            ("limit", limit.to_string()),
        ];
        if !cursor.trim().is_empty() {
            query.push(("cursor", cursor.to_string()));
        }

        debug!("listRecords for {} (cursor: {:?})", self.session.did, cursor);

        let response = self
            .http
            .get(endpoint(&self.host, "com.atproto.repo.listRecords"))
            .bearer_auth(&self.session.access_jwt)
            .query(&query)
            .send()
            .await?;

        Ok(check_status(response).await?.json().await?)
    }

    async fn apply_writes(&self, repo: &str, writes: Vec<WriteOperation>) -> Result<()> {
        debug!("applyWrites for {} ({} operations)", repo, writes.len());

        let response = self
            .http
            .post(endpoint(&self.host, "com.atproto.repo.applyWrites"))
            .bearer_auth(&self.session.access_jwt)
            .json(&ApplyWritesInput { repo, writes: &writes })
            .send()
            .await?;

        check_status(response).await?;
        Ok(())
    }
}

/// Opens sessions against each account's own PDS.
pub struct XrpcSessionProvider {
    http: reqwest::Client,
}

impl XrpcSessionProvider {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl SessionProvider for XrpcSessionProvider {
    async fn open(&self, configuration: &Configuration) -> Result<AuthenticatedClient> {
        let session =
            XrpcClient::refresh_session(&self.http, &configuration.service, &configuration.refresh_jwt)
                .await?;

        if session.did != configuration.did {
            return Err(SweepError::Other(anyhow::anyhow!(
                "Session for {} was issued to {}",
                configuration.did,
                session.did
            )));
        }

        let client = XrpcClient::new(self.http.clone(), &configuration.service, session.clone());
        Ok(AuthenticatedClient {
            client: Box::new(client),
            session,
        })
    }
}
