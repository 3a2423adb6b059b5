//! Registry v2 HTTP client for listing tags
//!
//! Handles the token dance: an anonymous or basic request answered with a
//! `401` and a `Bearer` challenge is retried with a token fetched from the
//! challenge's realm. Pagination follows `Link: <...>; rel="next"`.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, LINK, WWW_AUTHENTICATE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{Authenticator, ImageReference, RegistryClient, ScanOptions};
use crate::error::{Error, Result};

const PAGE_SIZE: usize = 1000;
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// A parsed `WWW-Authenticate` header
#[derive(Debug, PartialEq, Eq)]
struct Challenge {
    scheme: String,
    params: HashMap<String, String>,
}

impl Challenge {
    fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, rest) = match header.split_once(char::is_whitespace) {
            Some((scheme, rest)) => (scheme, rest),
            None => (header, ""),
        };
        if scheme.is_empty() {
            return None;
        }

        let mut params = HashMap::new();
        let mut chars = rest.chars().peekable();
        loop {
            while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
                chars.next();
            }
            let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
            if key.is_empty() {
                break;
            }
            let mut value = String::new();
            if chars.peek() == Some(&'"') {
                chars.next();
                let mut escaped = false;
                for c in chars.by_ref() {
                    match c {
                        _ if escaped => {
                            value.push(c);
                            escaped = false;
                        }
                        '\\' => escaped = true,
                        '"' => break,
                        _ => value.push(c),
                    }
                }
            } else {
                while let Some(c) = chars.peek() {
                    if *c == ',' {
                        break;
                    }
                    value.push(*c);
                    chars.next();
                }
            }
            params.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        Some(Challenge {
            scheme: scheme.to_ascii_lowercase(),
            params,
        })
    }
}

/// Default registry client speaking the distribution v2 API
#[derive(Clone, Debug)]
pub struct HttpRegistryClient {
    client: Client,
}

impl HttpRegistryClient {
    pub fn new() -> Result<Self> {
        let client = Self::builder()
            .build()
            .map_err(|e| Error::ConfigError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn builder() -> reqwest::ClientBuilder {
        Client::builder().user_agent(concat!("image-reflector/", env!("CARGO_PKG_VERSION")))
    }

    /// Shared client, or a dedicated one when the scan carries its own TLS material
    fn client_for(&self, options: &ScanOptions) -> Result<Client> {
        match &options.transport {
            None => Ok(self.client.clone()),
            Some(transport) => transport
                .apply(Self::builder())
                .build()
                .map_err(|e| Error::TlsError(format!("failed to build HTTP client: {e}"))),
        }
    }

    async fn send(
        &self,
        reference: &ImageReference,
        request: RequestBuilder,
        authorization: Option<&str>,
    ) -> Result<Response> {
        let request = match authorization {
            Some(value) => request.header(AUTHORIZATION, value),
            None => request,
        };
        request.send().await.map_err(|source| Error::RegistryRequest {
            registry: reference.registry().to_string(),
            source,
        })
    }

    /// Answer a challenge with an `Authorization` header value
    async fn authorize(
        &self,
        client: &Client,
        reference: &ImageReference,
        challenge: &Challenge,
        credentials: Option<&Authenticator>,
    ) -> Result<String> {
        match challenge.scheme.as_str() {
            "basic" => match credentials {
                Some(Authenticator::Basic { username, password }) => {
                    Ok(basic_header(username, password))
                }
                _ => Err(status_error(
                    reference,
                    StatusCode::UNAUTHORIZED,
                    "registry requires basic credentials".to_string(),
                )),
            },
            "bearer" => {
                let realm = challenge.params.get("realm").ok_or_else(|| {
                    status_error(
                        reference,
                        StatusCode::UNAUTHORIZED,
                        "bearer challenge without realm".to_string(),
                    )
                })?;
                let scope = challenge
                    .params
                    .get("scope")
                    .cloned()
                    .unwrap_or_else(|| format!("repository:{}:pull", reference.repository()));

                let mut query = vec![("scope", scope)];
                if let Some(service) = challenge.params.get("service") {
                    query.push(("service", service.clone()));
                }
                let mut request = client.get(realm.as_str()).query(&query);
                if let Some(Authenticator::Basic { username, password }) = credentials {
                    request = request.basic_auth(username, Some(password));
                }

                let response = self.send(reference, request, None).await?;
                let response = check_status(reference, response).await?;
                let body: TokenResponse =
                    response.json().await.map_err(|source| Error::RegistryRequest {
                        registry: reference.registry().to_string(),
                        source,
                    })?;
                let token = body.token.or(body.access_token).ok_or_else(|| {
                    status_error(
                        reference,
                        StatusCode::UNAUTHORIZED,
                        format!("token service {realm} returned no token"),
                    )
                })?;
                Ok(format!("Bearer {token}"))
            }
            other => Err(status_error(
                reference,
                StatusCode::UNAUTHORIZED,
                format!("unsupported authentication scheme {other:?}"),
            )),
        }
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    #[instrument(
        skip(self, options),
        fields(registry = %reference.registry(), repository = %reference.repository())
    )]
    async fn list_tags(
        &self,
        reference: &ImageReference,
        options: &ScanOptions,
    ) -> Result<Vec<String>> {
        let client = self.client_for(options)?;
        let credentials = options.credentials_for(reference.registry());

        let mut authorization = match credentials {
            Some(Authenticator::Bearer(token)) => Some(format!("Bearer {token}")),
            _ => None,
        };
        let mut challenged = false;

        let mut next = Some(format!(
            "{}/v2/{}/tags/list?n={PAGE_SIZE}",
            reference.registry_url(),
            reference.repository()
        ));
        let mut tags = Vec::new();

        while let Some(page_url) = next.take() {
            let mut response = self
                .send(reference, client.get(&page_url), authorization.as_deref())
                .await?;

            if response.status() == StatusCode::UNAUTHORIZED && !challenged {
                challenged = true;
                let challenge = response
                    .headers()
                    .get(WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(Challenge::parse);
                if let Some(challenge) = challenge {
                    debug!(scheme = %challenge.scheme, "Registry requested authentication");
                    authorization = Some(
                        self.authorize(&client, reference, &challenge, credentials)
                            .await?,
                    );
                    response = self
                        .send(reference, client.get(&page_url), authorization.as_deref())
                        .await?;
                }
            }

            let response = check_status(reference, response).await?;
            next = next_page(&page_url, &response);

            let page: TagList = response.json().await.map_err(|source| Error::RegistryRequest {
                registry: reference.registry().to_string(),
                source,
            })?;
            tags.extend(page.tags.unwrap_or_default());
        }

        debug!(count = tags.len(), "Listed tags");
        Ok(tags)
    }
}

fn basic_header(username: &str, password: &str) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

fn status_error(reference: &ImageReference, status: StatusCode, message: String) -> Error {
    Error::RegistryStatus {
        registry: reference.registry().to_string(),
        status: status.as_u16(),
        message,
    }
}

async fn check_status(reference: &ImageReference, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("unexpected status").to_string()
    } else {
        body.trim().to_string()
    };
    Err(status_error(reference, status, message))
}

/// Absolute URL of the next page, if the registry advertised one
fn next_page(current: &str, response: &Response) -> Option<String> {
    let link = response.headers().get(LINK)?.to_str().ok()?;
    let target = link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        params
            .split(';')
            .any(|p| matches!(p.trim(), "rel=\"next\"" | "rel=next"))
            .then(|| target.trim().trim_start_matches('<').trim_end_matches('>'))
    })?;
    url::Url::parse(current)
        .ok()?
        .join(target)
        .ok()
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::parse_image_reference;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn reference_for(server: &MockServer, repository: &str) -> ImageReference {
        let host = server.address().to_string();
        parse_image_reference(&format!("{host}/{repository}")).unwrap()
    }

    #[test]
    fn test_parse_bearer_challenge() {
        let challenge = Challenge::parse(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/alpine:pull,push""#,
        )
        .unwrap();
        assert_eq!(challenge.scheme, "bearer");
        assert_eq!(challenge.params["realm"], "https://auth.docker.io/token");
        assert_eq!(challenge.params["service"], "registry.docker.io");
        assert_eq!(challenge.params["scope"], "repository:library/alpine:pull,push");
    }

    #[test]
    fn test_parse_basic_challenge() {
        let challenge = Challenge::parse(r#"Basic realm="Registry Realm""#).unwrap();
        assert_eq!(challenge.scheme, "basic");
        assert_eq!(challenge.params["realm"], "Registry Realm");
    }

    #[tokio::test]
    async fn test_anonymous_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/org/app/tags/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "org/app",
                "tags": ["1.0.0", "1.1.0", "latest"]
            })))
            .mount(&server)
            .await;

        let client = HttpRegistryClient::new().unwrap();
        let tags = client
            .list_tags(&reference_for(&server, "org/app"), &ScanOptions::default())
            .await
            .unwrap();
        assert_eq!(tags, vec!["1.0.0", "1.1.0", "latest"]);
    }

    #[tokio::test]
    async fn test_follows_link_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/org/app/tags/list"))
            .and(query_param("last", "b"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"name": "org/app", "tags": ["c"]})),
            )
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/org/app/tags/list"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Link", r#"</v2/org/app/tags/list?n=1000&last=b>; rel="next""#)
                    .set_body_json(serde_json::json!({"name": "org/app", "tags": ["a", "b"]})),
            )
            .with_priority(2)
            .mount(&server)
            .await;

        let client = HttpRegistryClient::new().unwrap();
        let tags = client
            .list_tags(&reference_for(&server, "org/app"), &ScanOptions::default())
            .await
            .unwrap();
        assert_eq!(tags, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_bearer_token_flow_with_basic_credentials() {
        let server = MockServer::start().await;
        let realm = format!("{}/token", server.uri());

        Mock::given(method("GET"))
            .and(path("/token"))
            .and(query_param("scope", "repository:org/app:pull"))
            .and(query_param("service", "test-registry"))
            .and(header("authorization", basic_header("bot", "s3cret").as_str()))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "tok123"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/org/app/tags/list"))
            .and(header("authorization", "Bearer tok123"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"name": "org/app", "tags": ["v1"]})),
            )
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/org/app/tags/list"))
            .respond_with(ResponseTemplate::new(401).insert_header(
                "WWW-Authenticate",
                format!(r#"Bearer realm="{realm}",service="test-registry""#).as_str(),
            ))
            .with_priority(2)
            .mount(&server)
            .await;

        let options = ScanOptions {
            auth: Some(Authenticator::Basic {
                username: "bot".to_string(),
                password: "s3cret".to_string(),
            }),
            ..Default::default()
        };
        let client = HttpRegistryClient::new().unwrap();
        let tags = client
            .list_tags(&reference_for(&server, "org/app"), &options)
            .await
            .unwrap();
        assert_eq!(tags, vec!["v1"]);
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/org/missing/tags/list"))
            .respond_with(ResponseTemplate::new(404).set_body_string(
                r#"{"errors":[{"code":"NAME_UNKNOWN","message":"repository name not known to registry"}]}"#,
            ))
            .mount(&server)
            .await;

        let client = HttpRegistryClient::new().unwrap();
        let err = client
            .list_tags(&reference_for(&server, "org/missing"), &ScanOptions::default())
            .await
            .unwrap_err();
        match &err {
            Error::RegistryStatus { status, message, .. } => {
                assert_eq!(*status, 404);
                assert!(message.contains("NAME_UNKNOWN"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_unauthorized_without_credentials_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/org/private/tags/list"))
            .respond_with(
                ResponseTemplate::new(401).insert_header("WWW-Authenticate", r#"Basic realm="r""#),
            )
            .mount(&server)
            .await;

        let client = HttpRegistryClient::new().unwrap();
        let err = client
            .list_tags(&reference_for(&server, "org/private"), &ScanOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RegistryStatus { status: 401, .. }));
    }
}
