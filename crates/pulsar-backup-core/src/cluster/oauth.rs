//! OAuth2 client credentials flow.
//!
//! The broker client hands the key file to the `pulsar` crate's provider;
//! the admin REST client fetches its bearer token here.

use serde::Deserialize;
use std::path::Path;
use tracing::debug;

use crate::config::OAuth2Config;
use crate::error::ClusterError;
use crate::{Error, Result};

/// Client id and secret read from the key file
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OAuth2Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl OAuth2Credentials {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read OAuth2 credentials {}: {}",
                path.display(),
                e
            ))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            Error::Config(format!(
                "Invalid OAuth2 credentials {}: {}",
                path.display(),
                e
            ))
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub(crate) fn token_endpoint(issuer_url: &str) -> String {
    format!("{}/oauth/token", issuer_url.trim_end_matches('/'))
}

/// `file://` URL of the key file, as the broker provider expects it
pub(crate) fn credentials_url(config: &OAuth2Config) -> Result<String> {
    let path = if config.credentials_file.is_absolute() {
        config.credentials_file.clone()
    } else {
        std::env::current_dir()
            .map_err(|e| Error::Config(format!("Failed to resolve working directory: {}", e)))?
            .join(&config.credentials_file)
    };
    url::Url::from_file_path(&path)
        .map(|url| url.to_string())
        .map_err(|_| {
            Error::Config(format!(
                "Invalid OAuth2 credentials path {}",
                path.display()
            ))
        })
}

/// Request an access token with the client credentials grant
pub(crate) async fn fetch_token(
    http: &reqwest::Client,
    endpoint: &str,
    credentials: &OAuth2Credentials,
    audience: Option<&str>,
) -> std::result::Result<String, ClusterError> {
    debug!("Requesting OAuth2 token from {}", endpoint);

    let mut form = vec![
        ("grant_type", "client_credentials"),
        ("client_id", credentials.client_id.as_str()),
        ("client_secret", credentials.client_secret.as_str()),
    ];
    if let Some(audience) = audience {
        form.push(("audience", audience));
    }

    let response = http
        .post(endpoint)
        .form(&form)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                ClusterError::Timeout(endpoint.to_string())
            } else {
                ClusterError::Unreachable {
                    endpoint: endpoint.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ClusterError::Rejected {
            status: status.as_u16(),
            message: format!("token request: {}", message.chars().take(512).collect::<String>()),
        });
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| ClusterError::Client(format!("Invalid token response: {}", e)))?;
    Ok(token.access_token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one token response and return the raw request
    async fn serve_token_once(listener: TcpListener, body: &'static str) -> String {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request);
            if n == 0 || text.contains("audience=") {
                break;
            }
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        String::from_utf8_lossy(&request).into_owned()
    }

    #[test]
    fn test_load_credentials_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.json");
        std::fs::write(
            &path,
            r#"{"type":"client_credentials","client_id":"backup","client_secret":"s3cret"}"#,
        )
        .unwrap();

        let credentials = OAuth2Credentials::load(&path).unwrap();
        assert_eq!(credentials.client_id, "backup");
        assert_eq!(credentials.client_secret, "s3cret");

        std::fs::write(&path, r#"{"client_id":"backup"}"#).unwrap();
        assert!(matches!(
            OAuth2Credentials::load(&path),
            Err(Error::Config(_))
        ));
        assert!(OAuth2Credentials::load(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_token_endpoint_and_credentials_url() {
        assert_eq!(
            token_endpoint("https://auth.example.com/"),
            "https://auth.example.com/oauth/token"
        );

        let config = OAuth2Config {
            issuer_url: "https://auth.example.com".to_string(),
            credentials_file: PathBuf::from("/etc/pulsar/key.json"),
            audience: None,
        };
        assert_eq!(
            credentials_url(&config).unwrap(),
            "file:///etc/pulsar/key.json"
        );
    }

    #[tokio::test]
    async fn test_fetch_token_posts_client_credentials() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = token_endpoint(&format!("http://{}/", listener.local_addr().unwrap()));
        let server = tokio::spawn(serve_token_once(
            listener,
            r#"{"access_token":"abc123","token_type":"Bearer","expires_in":3600}"#,
        ));

        let credentials = OAuth2Credentials {
            client_id: "backup".to_string(),
            client_secret: "s3cret".to_string(),
        };
        let token = fetch_token(
            &reqwest::Client::new(),
            &endpoint,
            &credentials,
            Some("urn:pulsar"),
        )
        .await
        .unwrap();
        assert_eq!(token, "abc123");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /oauth/token"));
        assert!(request.contains("grant_type=client_credentials"));
        assert!(request.contains("client_id=backup"));
        assert!(request.contains("client_secret=s3cret"));
        assert!(request.contains("audience=urn%3Apulsar"));
    }

    #[tokio::test]
    async fn test_unreachable_issuer_is_connectivity_error() {
        let credentials = OAuth2Credentials {
            client_id: "backup".to_string(),
            client_secret: "s3cret".to_string(),
        };
        let err = fetch_token(
            &reqwest::Client::new(),
            "http://127.0.0.1:1/oauth/token",
            &credentials,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ClusterError::Unreachable { .. }));
    }
}
