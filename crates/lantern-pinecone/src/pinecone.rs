//! Minimal blocking client for the Pinecone REST API, enough to read an
//! index out.

use crate::error::{ImportError, ImportResult};
use crate::import::{SourceDescription, VectorSource};
use crate::vector::{FetchResponse, IndexStats, Vector};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct DatabaseInfo {
    name: String,
    dimension: usize,
    metric: String,
}

#[derive(Debug, Default, Deserialize)]
struct DatabaseStatus {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    host: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescribeResponse {
    database: DatabaseInfo,
    #[serde(default)]
    status: Option<DatabaseStatus>,
}

#[derive(Debug, Deserialize)]
struct QueryMatchId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct QueryIdsResponse {
    #[serde(default)]
    matches: Vec<QueryMatchId>,
}

pub struct PineconeClient {
    http: Client,
    api_key: String,
    controller: String,
    data_plane: String,
    description: SourceDescription,
}

fn controller_url(environment: &str) -> String {
    format!("https://controller.{environment}.pinecone.io")
}

fn parse_description(body: DescribeResponse) -> ImportResult<(SourceDescription, String)> {
    let status = body.status.unwrap_or_default();
    let host = status
        .host
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ImportError::Source(format!("index {} has no host", body.database.name)))?;
    let host = if host.starts_with("http") {
        host
    } else {
        format!("https://{host}")
    };
    Ok((
        SourceDescription {
            name: body.database.name,
            dimension: body.database.dimension,
            metric: body.database.metric,
            ready: status.ready,
        },
        host,
    ))
}

impl PineconeClient {
    /// Looks the index up through the environment's controller and keeps
    /// its description and data-plane host.
    pub fn connect(api_key: &str, environment: &str, index_name: &str) -> ImportResult<Self> {
        let http = Client::builder()
            .user_agent("lantern-pinecone")
            .timeout(Duration::from_secs(60))
            .build()?;
        let controller = controller_url(environment);
        let body: DescribeResponse = http
            .get(format!("{controller}/databases/{index_name}"))
            .header("Api-Key", api_key)
            .send()?
            .error_for_status()?
            .json()?;
        let (description, data_plane) = parse_description(body)?;
        debug!(index = index_name, host = %data_plane, "resolved pinecone index");
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            controller,
            data_plane,
            description,
        })
    }

    pub fn controller(&self) -> &str {
        &self.controller
    }
}

impl VectorSource for PineconeClient {
    fn describe(&self) -> ImportResult<SourceDescription> {
        Ok(self.description.clone())
    }

    fn stats(&self) -> ImportResult<IndexStats> {
        Ok(self
            .http
            .post(format!("{}/describe_index_stats", self.data_plane))
            .header("Api-Key", &self.api_key)
            .json(&json!({}))
            .send()?
            .error_for_status()?
            .json()?)
    }

    fn fetch(&self, ids: &[String], namespace: &str) -> ImportResult<Vec<Vector>> {
        let mut query: Vec<(&str, &str)> = ids.iter().map(|id| ("ids", id.as_str())).collect();
        query.push(("namespace", namespace));
        let response: FetchResponse = self
            .http
            .get(format!("{}/vectors/fetch", self.data_plane))
            .header("Api-Key", &self.api_key)
            .query(&query)
            .send()?
            .error_for_status()?
            .json()?;
        Ok(response.vectors.into_values().collect())
    }

    fn query_ids(&self, vector: &[f32], top_k: usize, namespace: &str) -> ImportResult<Vec<String>> {
        let response: QueryIdsResponse = self
            .http
            .post(format!("{}/query", self.data_plane))
            .header("Api-Key", &self.api_key)
            .json(&json!({
                "vector": vector,
                "topK": top_k,
                "namespace": namespace,
                "includeValues": false,
                "includeMetadata": false,
            }))
            .send()?
            .error_for_status()?
            .json()?;
        Ok(response.matches.into_iter().map(|m| m.id).collect())
    }
}
