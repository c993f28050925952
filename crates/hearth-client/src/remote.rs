//! The server of record as seen by the sync engine.
//!
//! [`RemoteApi`] is the seam the engine is written against; [`HttpRemote`] is
//! the production implementation over the server's `/api/sync` routes.

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;
use uuid::Uuid;

use hearth_shared::protocol::{
    PullQuery, PullResponse, PushAck, RemoteChat, RemoteDocument, RemoteMessage,
};
use hearth_shared::types::EntityKind;

use crate::error::{ClientError, Result};

#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Idempotent upsert keyed by `chat.id`.
    async fn push_chat(&self, chat: &RemoteChat) -> Result<PushAck>;
    async fn push_message(&self, message: &RemoteMessage) -> Result<PushAck>;
    async fn push_document(&self, document: &RemoteDocument) -> Result<PushAck>;
    /// Delete a record on the server.  [`ClientError::NotFound`] when the
    /// server never had it.
    async fn delete_remote(&self, kind: EntityKind, id: Uuid) -> Result<()>;
    /// Records updated strictly after `since` (epoch millis).
    async fn pull_changes(&self, since: i64) -> Result<PullResponse>;
}

/// [`RemoteApi`] over HTTP + JSON.
#[derive(Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(client: reqwest::Client, server_url: &str) -> Self {
        Self {
            client,
            base_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    fn record_url(&self, kind: EntityKind, id: Uuid) -> String {
        format!("{}/api/sync/{}/{}", self.base_url, kind.route_segment(), id)
    }

    async fn put<T: serde::Serialize + Sync>(
        &self,
        kind: EntityKind,
        id: Uuid,
        body: &T,
    ) -> Result<PushAck> {
        let url = self.record_url(kind, id);
        let resp = self.client.put(&url).json(body).send().await?;
        let ack: PushAck = check(resp).await?.json().await?;
        debug!(%kind, %id, applied = ack.applied, "Pushed record");
        Ok(ack)
    }
}

/// Map non-2xx responses to [`ClientError`].
pub(crate) async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ClientError::NotFound);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn push_chat(&self, chat: &RemoteChat) -> Result<PushAck> {
        self.put(EntityKind::Chat, chat.id, chat).await
    }

    async fn push_message(&self, message: &RemoteMessage) -> Result<PushAck> {
        self.put(EntityKind::Message, message.id, message).await
    }

    async fn push_document(&self, document: &RemoteDocument) -> Result<PushAck> {
        self.put(EntityKind::Document, document.id, document).await
    }

    async fn delete_remote(&self, kind: EntityKind, id: Uuid) -> Result<()> {
        let resp = self.client.delete(self.record_url(kind, id)).send().await?;
        check(resp).await?;
        Ok(())
    }

    async fn pull_changes(&self, since: i64) -> Result<PullResponse> {
        let url = format!("{}/api/sync/changes", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&PullQuery { since })
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_urls_use_route_segments() {
        let remote = HttpRemote::new(reqwest::Client::new(), "http://localhost:8080/");
        let id = Uuid::nil();
        assert_eq!(
            remote.record_url(EntityKind::Message, id),
            format!("http://localhost:8080/api/sync/messages/{id}")
        );
        assert_eq!(
            remote.record_url(EntityKind::Document, id),
            format!("http://localhost:8080/api/sync/documents/{id}")
        );
    }
}
