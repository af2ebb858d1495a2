//! HTTP/JSON cluster connection.
//!
//! Talks to a node's administration gateway using `reqwest`:
//!
//!   Commands:   `POST http://{host}:{port}/admin/{command}` with the
//!               argument document as the JSON body
//!   Documents:  `GET  http://{host}:{port}/{database}/{collection}/one`,
//!               `404` when the collection holds no document
//!
//! Connecting issues a `ping`; a node that does not answer it is reported
//! as unreachable.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::debug;

use super::backend::{ClientFuture, Connection, Connector, Namespace, ADMIN_DATABASE};
use crate::address::Endpoint;
use crate::errors::ClusterError;

/// Opens [`HttpConnection`]s.  Cheap to clone; all connections share one
/// `reqwest` connection pool.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    /// Create a connector whose requests time out after `request_timeout`.
    pub fn new(request_timeout: Duration) -> Result<Self, ClusterError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| ClusterError::Transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl Connector for HttpConnector {
    fn connect(&self, endpoint: &Endpoint) -> ClientFuture<'_, Box<dyn Connection>> {
        let conn = HttpConnection {
            client: self.client.clone(),
            base_url: base_url(endpoint),
            endpoint: endpoint.clone(),
        };
        Box::pin(async move {
            if let Err(e) = conn.command("ping", json!({})).await {
                debug!("ping to {} failed: {}", conn.endpoint, e);
                return Err(ClusterError::Connection {
                    endpoints: conn.endpoint.to_string(),
                });
            }
            let conn: Box<dyn Connection> = Box::new(conn);
            Ok(conn)
        })
    }
}

/// Connection to a single node's HTTP gateway.
pub struct HttpConnection {
    client: reqwest::Client,
    endpoint: Endpoint,
    base_url: String,
}

impl HttpConnection {
    fn command_url(&self, command: &str) -> String {
        format!("{}/{}/{}", self.base_url, ADMIN_DATABASE, command)
    }

    fn document_url(&self, namespace: Namespace<'_>) -> String {
        format!(
            "{}/{}/{}/one",
            self.base_url, namespace.database, namespace.collection
        )
    }
}

impl Connection for HttpConnection {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn command(&self, command: &str, args: Value) -> ClientFuture<'_, Value> {
        let url = self.command_url(command);
        Box::pin(async move {
            debug!("POST {}", url);
            let resp = self
                .client
                .post(&url)
                .json(&args)
                .send()
                .await
                .map_err(|e| ClusterError::Transport(format!("POST {url}: {e}")))?;

            let status = resp.status();
            let body = resp
                .bytes()
                .await
                .map_err(|e| ClusterError::Transport(format!("POST {url}: {e}")))?;

            // Rejected commands still come back as a reply document carrying
            // `ok`, `code` and `errmsg`, whatever the HTTP status.
            match serde_json::from_slice::<Value>(&body) {
                Ok(reply) if reply.is_object() => Ok(reply),
                _ if !status.is_success() => Err(ClusterError::Transport(format!(
                    "POST {url} returned {status}"
                ))),
                Ok(_) => Err(ClusterError::Transport(format!(
                    "POST {url} returned a non-document reply"
                ))),
                Err(e) => Err(ClusterError::Decode(e)),
            }
        })
    }

    fn read_document(&self, namespace: Namespace<'_>) -> ClientFuture<'_, Option<Value>> {
        let url = self.document_url(namespace);
        Box::pin(async move {
            debug!("GET {}", url);
            let resp = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| ClusterError::Transport(format!("GET {url}: {e}")))?;

            match resp.status() {
                StatusCode::NOT_FOUND => Ok(None),
                status if status.is_success() => {
                    let doc = resp
                        .json::<Value>()
                        .await
                        .map_err(|e| ClusterError::Transport(format!("GET {url}: {e}")))?;
                    Ok(if doc.is_null() { None } else { Some(doc) })
                }
                status => Err(ClusterError::Transport(format!(
                    "GET {url} returned {status}"
                ))),
            }
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        // Pooled sockets are released when the last client handle drops.
        Box::pin(async {})
    }
}

fn base_url(endpoint: &Endpoint) -> String {
    format!("http://{}:{}", endpoint.host, endpoint.port)
}
