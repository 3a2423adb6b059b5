use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::CredentialProvider;
use crate::error::{Error, Result};
use crate::registry::{Authenticator, ImageReference};

/// Token endpoint of the GCE metadata server
pub const DEFAULT_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Username GCR and Artifact Registry expect with an OAuth2 access token
const GCP_TOKEN_USERNAME: &str = "oauth2accesstoken";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Logs in to GCR / Artifact Registry with the workload's service account token
#[derive(Clone, Debug)]
pub struct GcpMetadataProvider {
    client: Client,
    token_url: String,
}

impl GcpMetadataProvider {
    pub fn new(client: Client) -> Self {
        Self::with_token_url(client, DEFAULT_TOKEN_URL)
    }

    pub fn with_token_url(client: Client, token_url: impl Into<String>) -> Self {
        Self {
            client,
            token_url: token_url.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for GcpMetadataProvider {
    async fn login(&self, _image: &str, reference: &ImageReference) -> Result<Authenticator> {
        let failed = |message: String| Error::LoginFailed {
            provider: "gcp",
            registry: reference.registry().to_string(),
            message,
        };

        let response = self
            .client
            .get(&self.token_url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| failed(format!("metadata server unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("metadata server returned {status}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| failed(format!("malformed token response: {e}")))?;
        debug!(
            registry = reference.registry(),
            expires_in = ?token.expires_in,
            "Obtained GCP access token"
        );

        Ok(Authenticator::Basic {
            username: GCP_TOKEN_USERNAME.to_string(),
            password: token.access_token,
        })
    }
}
