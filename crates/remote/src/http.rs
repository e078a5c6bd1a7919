use crate::error::{ErrorKind, Result};
use crate::{RawEntitySchema, RawRecord, RawSchema, RemoteService, wire};
use async_trait::async_trait;
use exn::ResultExt;
use serde_json::{Value as Json, json};
use sgarchive_config::Connection;
use sgarchive_model::Filter;

const ENDPOINT: &str = "api3/json";

/// [`RemoteService`] over the JSON-RPC HTTP API.
///
/// # Examples
///
/// ```no_run
/// use sgarchive_config::Connection;
/// use sgarchive_remote::{HttpService, RemoteService};
///
/// # async fn example(connection: &Connection) -> Result<(), Box<dyn std::error::Error>> {
/// let service = HttpService::new(connection)?;
/// let entity_types = service.schema_entity_read().await?;
/// # Ok(())
/// # }
/// ```
pub struct HttpService {
    base_url: String,
    endpoint: String,
    auth: Json,
    client: reqwest::Client,
}
impl HttpService {
    pub fn new(connection: &Connection) -> Result<Self> {
        let base_url = connection.base_url.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(connection.timeout())
            .user_agent(concat!("sgarchive/", env!("CARGO_PKG_VERSION")))
            .build()
            .or_raise(|| ErrorKind::Transport("failed to build HTTP client".to_string()))?;
        Ok(Self {
            endpoint: format!("{base_url}/{ENDPOINT}"),
            base_url,
            auth: wire::auth(connection),
            client,
        })
    }

    /// Attachment URLs may be relative to the server (`/file_serve/...`).
    fn absolute_url(&self, url: &str) -> String {
        if url.starts_with('/') { format!("{}{url}", self.base_url) } else { url.to_string() }
    }

    #[tracing::instrument(level = "trace", skip(self, payload))]
    async fn call(&self, method: &str, payload: Json) -> Result<Json> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&wire::request(method, &self.auth, payload))
            .send()
            .await
            .map_err(ErrorKind::from)?;
        let status = response.status();
        if !status.is_success() {
            exn::bail!(ErrorKind::Http { status: status.as_u16(), url: self.endpoint.clone() });
        }
        let body: Json = response.json().await.map_err(ErrorKind::from)?;
        wire::results(body)
    }
}

#[async_trait]
impl RemoteService for HttpService {
    async fn find(
        &self,
        entity_type: &str,
        filters: &[Filter],
        fields: &[String],
        limit: usize,
        page: usize,
    ) -> Result<Vec<RawRecord>> {
        let results = self.call("read", wire::read_payload(entity_type, filters, fields, limit, page)).await?;
        wire::entities(results)
    }

    async fn schema_read(&self) -> Result<RawSchema> {
        wire::schema(&self.call("schema_read", json!({})).await?)
    }

    async fn schema_entity_read(&self) -> Result<RawEntitySchema> {
        wire::entity_schema(&self.call("schema_entity_read", json!({})).await?)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let url = self.absolute_url(url);
        tracing::trace!(url = %url, "downloading attachment");
        let response = self.client.get(&url).send().await.map_err(ErrorKind::from)?;
        let status = response.status();
        if !status.is_success() {
            exn::bail!(ErrorKind::Http { status: status.as_u16(), url });
        }
        Ok(response.bytes().await.map_err(ErrorKind::from)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> HttpService {
        HttpService::new(&Connection {
            base_url: "https://studio.example.com/".to_string(),
            script_name: "archiver".to_string(),
            api_key: "secret".to_string(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint() {
        assert_eq!(service().endpoint, "https://studio.example.com/api3/json");
    }

    #[test]
    fn test_absolute_url() {
        let service = service();
        assert_eq!(service.absolute_url("/file_serve/attachment/1"), "https://studio.example.com/file_serve/attachment/1");
        assert_eq!(service.absolute_url("https://cdn.example.com/a.jpg"), "https://cdn.example.com/a.jpg");
    }
}
