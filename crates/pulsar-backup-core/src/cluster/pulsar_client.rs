//! Broker transport over the Pulsar binary protocol.

use async_trait::async_trait;
use futures::StreamExt;
use pulsar::consumer::{ConsumerOptions, InitialPosition};
use pulsar::reader::Reader;
use pulsar::authentication::oauth2::{OAuth2Authentication, OAuth2Params};
use pulsar::{producer, Authentication, ConnectionRetryOptions, Producer, Pulsar, TokioExecutor};
use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info};

use super::oauth;
use super::{MessagingClient, OutgoingMessage, ReceivedMessage, TopicPublisher, TopicReader};
use crate::config::{ClusterAuth, ClusterConfig};
use crate::error::ClusterError;
use crate::Result;

/// Client for one Pulsar cluster
#[derive(Clone)]
pub struct PulsarMessagingClient {
    pulsar: Pulsar<TokioExecutor>,
    service_url: String,
    operation_timeout: Duration,
}

impl PulsarMessagingClient {
    /// Connect to the cluster's service URL
    pub async fn connect(config: &ClusterConfig) -> Result<Self> {
        let retry = ConnectionRetryOptions {
            connection_timeout: config.operation_timeout(),
            max_retries: 3,
            ..Default::default()
        };

        let mut builder = Pulsar::builder(config.service_url.clone(), TokioExecutor)
            .with_connection_retry_options(retry);
        match &config.auth {
            Some(ClusterAuth::OAuth2(oauth2)) => {
                builder = builder.with_auth_provider(OAuth2Authentication::client_credentials(
                    OAuth2Params {
                        issuer_url: oauth2.issuer_url.clone(),
                        credentials_url: oauth::credentials_url(oauth2)?,
                        audience: oauth2.audience.clone(),
                        scope: None,
                    },
                ));
            }
            None => {
                if let Some(token) = config.resolve_token()? {
                    builder = builder.with_auth(Authentication {
                        name: "token".to_string(),
                        data: token.into_bytes(),
                    });
                }
            }
        }

        let pulsar = tokio::time::timeout(config.operation_timeout(), builder.build())
            .await
            .map_err(|_| ClusterError::Timeout(config.service_url.clone()))?
            .map_err(|e| ClusterError::Unreachable {
                endpoint: config.service_url.clone(),
                message: e.to_string(),
            })?;

        info!("Connected to {}", config.service_url);
        Ok(Self {
            pulsar,
            service_url: config.service_url.clone(),
            operation_timeout: config.operation_timeout(),
        })
    }

    fn map_error(&self, e: pulsar::Error) -> ClusterError {
        match e {
            pulsar::Error::Connection(e) => ClusterError::Unreachable {
                endpoint: self.service_url.clone(),
                message: e.to_string(),
            },
            other => ClusterError::Client(other.to_string()),
        }
    }
}

#[async_trait]
impl MessagingClient for PulsarMessagingClient {
    async fn open_reader(&self, topic: &str) -> Result<Box<dyn TopicReader>> {
        let options = ConsumerOptions {
            initial_position: InitialPosition::Earliest,
            ..Default::default()
        };

        let reader: Reader<Vec<u8>, TokioExecutor> = tokio::time::timeout(
            self.operation_timeout,
            self.pulsar
                .reader()
                .with_topic(topic)
                .with_options(options)
                .into_reader(),
        )
        .await
        .map_err(|_| ClusterError::Timeout(format!("open reader on {}", topic)))?
        .map_err(|e| self.map_error(e))?;

        debug!("Opened reader on {}", topic);
        Ok(Box::new(PulsarTopicReader {
            reader: Box::pin(reader),
        }))
    }

    async fn open_publisher(&self, topic: &str) -> Result<Box<dyn TopicPublisher>> {
        let producer: Producer<TokioExecutor> = tokio::time::timeout(
            self.operation_timeout,
            self.pulsar.producer().with_topic(topic).build(),
        )
        .await
        .map_err(|_| ClusterError::Timeout(format!("open producer on {}", topic)))?
        .map_err(|e| self.map_error(e))?;

        debug!("Opened producer on {}", topic);
        Ok(Box::new(PulsarTopicPublisher {
            producer,
            topic: topic.to_string(),
        }))
    }
}

struct PulsarTopicReader {
    reader: Pin<Box<Reader<Vec<u8>, TokioExecutor>>>,
}

#[async_trait]
impl TopicReader for PulsarTopicReader {
    async fn next_message(&mut self, timeout: Duration) -> Result<Option<ReceivedMessage>> {
        let msg = match tokio::time::timeout(timeout, self.reader.next()).await {
            Err(_) | Ok(None) => return Ok(None),
            Ok(Some(Err(e))) => return Err(ClusterError::Client(e.to_string()).into()),
            Ok(Some(Ok(msg))) => msg,
        };

        let id = msg.message_id();
        let message_id = format!(
            "{}:{}:{}:{}",
            id.ledger_id,
            id.entry_id,
            id.partition.unwrap_or(-1),
            id.batch_index.unwrap_or(-1)
        );

        let metadata = msg.metadata();
        let properties: BTreeMap<String, String> = metadata
            .properties
            .iter()
            .map(|kv| (kv.key.clone(), kv.value.clone()))
            .collect();

        Ok(Some(ReceivedMessage {
            message_id: Some(message_id),
            properties,
            publish_timestamp: metadata.publish_time,
            event_timestamp: metadata.event_time.filter(|ts| *ts != 0),
            partition_key: metadata.partition_key.clone(),
            content: msg.payload.data.clone(),
        }))
    }
}

struct PulsarTopicPublisher {
    producer: Producer<TokioExecutor>,
    topic: String,
}

#[async_trait]
impl TopicPublisher for PulsarTopicPublisher {
    async fn publish(&mut self, message: OutgoingMessage) -> Result<()> {
        let outgoing = producer::Message {
            payload: message.content,
            properties: message.properties.into_iter().collect::<HashMap<_, _>>(),
            partition_key: message.partition_key,
            event_time: message.event_timestamp,
            ..Default::default()
        };

        let receipt = self
            .producer
            .send_non_blocking(outgoing)
            .await
            .map_err(|e| ClusterError::Client(format!("send to {}: {}", self.topic, e)))?;
        receipt
            .await
            .map_err(|e| ClusterError::Client(format!("receipt from {}: {}", self.topic, e)))?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.producer
            .close()
            .await
            .map_err(|e| ClusterError::Client(format!("close producer on {}: {}", self.topic, e)))?;
        Ok(())
    }
}
