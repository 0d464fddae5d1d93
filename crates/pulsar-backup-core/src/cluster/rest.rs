//! Admin operations over the Pulsar admin REST API.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use super::oauth::{self, OAuth2Credentials};
use super::{ClusterAdmin, CreateOutcome};
use crate::config::{ClusterAuth, ClusterConfig};
use crate::error::ClusterError;
use crate::inventory::TopicName;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct PartitionedMetadata {
    #[serde(default)]
    partitions: u32,
}

#[derive(Debug, Clone)]
enum BearerAuth {
    None,
    Token(String),
    /// Fetched on first use and shared by clones
    OAuth2 {
        endpoint: String,
        credentials: OAuth2Credentials,
        audience: Option<String>,
        token: Arc<OnceCell<String>>,
    },
}

/// `admin/v2` REST client
#[derive(Debug, Clone)]
pub struct RestAdmin {
    http: reqwest::Client,
    base_url: String,
    auth: BearerAuth,
}

impl RestAdmin {
    /// Build a client for the cluster's admin URL
    pub fn new(config: &ClusterConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.operation_timeout())
            .connect_timeout(config.operation_timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        let auth = match &config.auth {
            Some(ClusterAuth::OAuth2(oauth)) => BearerAuth::OAuth2 {
                endpoint: oauth::token_endpoint(&oauth.issuer_url),
                credentials: OAuth2Credentials::load(&oauth.credentials_file)?,
                audience: oauth.audience.clone(),
                token: Arc::new(OnceCell::new()),
            },
            None => match config.resolve_token()? {
                Some(token) => BearerAuth::Token(token),
                None => BearerAuth::None,
            },
        };

        Ok(Self {
            http,
            base_url: format!("{}/admin/v2", config.resolve_admin_url()?),
            auth,
        })
    }

    async fn bearer_token(&self) -> std::result::Result<Option<String>, ClusterError> {
        match &self.auth {
            BearerAuth::None => Ok(None),
            BearerAuth::Token(token) => Ok(Some(token.clone())),
            BearerAuth::OAuth2 {
                endpoint,
                credentials,
                audience,
                token,
            } => token
                .get_or_try_init(|| {
                    oauth::fetch_token(&self.http, endpoint, credentials, audience.as_deref())
                })
                .await
                .map(|token| Some(token.clone())),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> std::result::Result<reqwest::Response, ClusterError> {
        let url = self.url(path);
        debug!("{} {}", method, url);

        let mut request = self.http.request(method, &url);
        if let Some(token) = self.bearer_token().await? {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ClusterError::Timeout(url.clone())
            } else if e.is_connect() {
                ClusterError::Unreachable {
                    endpoint: url.clone(),
                    message: e.to_string(),
                }
            } else {
                ClusterError::Client(e.to_string())
            }
        })?;

        Ok(response)
    }

    /// Map a non-success response to an error naming `entity`
    async fn rejection(entity: &str, response: reqwest::Response) -> ClusterError {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return ClusterError::NotFound(entity.to_string());
        }
        let message = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(512)
            .collect::<String>();
        ClusterError::Rejected {
            status: status.as_u16(),
            message: format!("{}: {}", entity, message),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str, entity: &str) -> Result<T> {
        let response = self.send(Method::GET, path, None).await?;
        if !response.status().is_success() {
            return Err(Self::rejection(entity, response).await.into());
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ClusterError::Client(format!("Invalid response for {}: {}", entity, e)).into())
    }

    async fn create(
        &self,
        path: &str,
        entity: &str,
        body: Option<serde_json::Value>,
    ) -> Result<CreateOutcome> {
        let response = self.send(Method::PUT, path, body).await?;
        match response.status() {
            s if s.is_success() => Ok(CreateOutcome::Created),
            StatusCode::CONFLICT => Ok(CreateOutcome::AlreadyExists),
            _ => Err(Self::rejection(entity, response).await.into()),
        }
    }

    async fn delete(&self, path: &str, entity: &str) -> Result<()> {
        let response = self.send(Method::DELETE, path, None).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::rejection(entity, response).await.into())
        }
    }
}

#[async_trait]
impl ClusterAdmin for RestAdmin {
    async fn list_clusters(&self) -> Result<Vec<String>> {
        self.get_json("clusters", "clusters").await
    }

    async fn list_tenants(&self) -> Result<Vec<String>> {
        self.get_json("tenants", "tenants").await
    }

    async fn list_namespaces(&self, tenant: &str) -> Result<Vec<String>> {
        self.get_json(&format!("namespaces/{}", tenant), tenant).await
    }

    async fn list_topics(&self, namespace: &str) -> Result<Vec<String>> {
        self.get_json(&format!("namespaces/{}/topics", namespace), namespace)
            .await
    }

    async fn list_partitioned_topics(&self, namespace: &str) -> Result<Vec<String>> {
        self.get_json(&format!("persistent/{}/partitioned", namespace), namespace)
            .await
    }

    async fn partition_count(&self, topic: &str) -> Result<u32> {
        let name = TopicName::parse(topic)?;
        let metadata: PartitionedMetadata = self
            .get_json(&format!("{}/partitions", name.rest_path()), topic)
            .await?;
        Ok(metadata.partitions)
    }

    async fn create_tenant(
        &self,
        name: &str,
        allowed_clusters: &[String],
    ) -> Result<CreateOutcome> {
        let body = json!({ "allowedClusters": allowed_clusters, "adminRoles": [] });
        self.create(&format!("tenants/{}", name), name, Some(body))
            .await
    }

    async fn create_namespace(&self, name: &str) -> Result<CreateOutcome> {
        self.create(&format!("namespaces/{}", name), name, None)
            .await
    }

    async fn create_topic(&self, name: &str, partitions: u32) -> Result<CreateOutcome> {
        let topic = TopicName::parse(name)?;
        if partitions == 0 {
            self.create(&topic.rest_path(), name, None).await
        } else {
            self.create(
                &format!("{}/partitions", topic.rest_path()),
                name,
                Some(json!(partitions)),
            )
            .await
        }
    }

    async fn delete_topic(&self, name: &str, partitions: u32) -> Result<()> {
        let topic = TopicName::parse(name)?;
        if partitions == 0 {
            self.delete(&topic.rest_path(), name).await
        } else {
            self.delete(&format!("{}/partitions", topic.rest_path()), name)
                .await
        }
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        self.delete(&format!("namespaces/{}", name), name).await
    }

    async fn delete_tenant(&self, name: &str) -> Result<()> {
        self.delete(&format!("tenants/{}", name), name).await
    }
}
