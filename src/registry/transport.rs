//! TLS transport options built from a certificate secret

use std::fmt;

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use reqwest::{Certificate, ClientBuilder, Identity};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::{Error, Result};

pub const CLIENT_CERT_KEY: &str = "certFile";
pub const CLIENT_KEY_KEY: &str = "keyFile";
pub const CA_CERT_KEY: &str = "caFile";

/// Client identity and extra trust roots for talking to a registry
///
/// Extra roots are added on top of the system roots, never instead of them.
#[derive(Clone, Default)]
pub struct Transport {
    identity: Option<Identity>,
    roots: Vec<Certificate>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("client_identity", &self.identity.is_some())
            .field("extra_roots", &self.roots.len())
            .finish()
    }
}

impl Transport {
    /// Build from `certFile`/`keyFile`/`caFile`; a certificate without a key is an error
    pub fn from_secret(secret: &Secret) -> Result<Self> {
        let get = |key: &str| {
            secret
                .data
                .as_ref()
                .and_then(|d| d.get(key))
                .map(|b| b.0.as_slice())
        };
        let name = secret.name_any();
        let tls_error = |message: String| Error::TlsError(format!("secret {name}: {message}"));

        let mut transport = Transport::default();

        if let Some(cert_pem) = get(CLIENT_CERT_KEY) {
            let key_pem = get(CLIENT_KEY_KEY)
                .ok_or_else(|| tls_error("client certificate found, but no key".to_string()))?;

            let certs = CertificateDer::pem_slice_iter(cert_pem)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| tls_error(format!("failed to parse client certificate: {e}")))?;
            if certs.is_empty() {
                return Err(tls_error("certFile holds no certificate".to_string()));
            }
            PrivateKeyDer::from_pem_slice(key_pem)
                .map_err(|e| tls_error(format!("failed to parse client key: {e}")))?;

            let mut bundle = Vec::with_capacity(cert_pem.len() + key_pem.len() + 1);
            bundle.extend_from_slice(cert_pem);
            bundle.push(b'\n');
            bundle.extend_from_slice(key_pem);
            let identity = Identity::from_pem(&bundle)
                .map_err(|e| tls_error(format!("invalid client identity: {e}")))?;
            transport.identity = Some(identity);
        }

        if let Some(ca_pem) = get(CA_CERT_KEY) {
            for cert in CertificateDer::pem_slice_iter(ca_pem) {
                let cert =
                    cert.map_err(|e| tls_error(format!("failed to parse CA certificate: {e}")))?;
                let root = Certificate::from_der(cert.as_ref())
                    .map_err(|e| tls_error(format!("invalid CA certificate: {e}")))?;
                transport.roots.push(root);
            }
        }

        Ok(transport)
    }

    pub fn has_client_identity(&self) -> bool {
        self.identity.is_some()
    }

    pub fn extra_roots(&self) -> usize {
        self.roots.len()
    }

    /// Configure a reqwest client builder with this transport
    pub fn apply(&self, mut builder: ClientBuilder) -> ClientBuilder {
        builder = builder.use_rustls_tls();
        if let Some(identity) = &self.identity {
            builder = builder.identity(identity.clone());
        }
        for root in &self.roots {
            builder = builder.add_root_certificate(root.clone());
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn secret(entries: &[(&str, String)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("tls".to_string()),
                namespace: Some("apps".to_string()),
                ..Default::default()
            },
            data: Some(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.clone().into_bytes())))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        }
    }

    fn self_signed() -> (String, String) {
        let certified =
            rcgen::generate_simple_self_signed(vec!["registry.local".to_string()]).unwrap();
        (certified.cert.pem(), certified.key_pair.serialize_pem())
    }

    #[test]
    fn test_certificate_without_key_is_rejected() {
        let (cert, _) = self_signed();
        let err = Transport::from_secret(&secret(&[(CLIENT_CERT_KEY, cert)])).unwrap_err();
        assert!(err.to_string().contains("client certificate found, but no key"), "{err}");
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_client_identity_and_ca() {
        let (cert, key) = self_signed();
        let (ca, _) = self_signed();
        let transport = Transport::from_secret(&secret(&[
            (CLIENT_CERT_KEY, cert),
            (CLIENT_KEY_KEY, key),
            (CA_CERT_KEY, ca),
        ]))
        .unwrap();
        assert!(transport.has_client_identity());
        assert_eq!(transport.extra_roots(), 1);
        assert!(transport.apply(reqwest::Client::builder()).build().is_ok());
    }

    #[test]
    fn test_ca_only() {
        let (ca, _) = self_signed();
        let transport = Transport::from_secret(&secret(&[(CA_CERT_KEY, ca)])).unwrap();
        assert!(!transport.has_client_identity());
        assert_eq!(transport.extra_roots(), 1);
    }

    #[test]
    fn test_garbage_key_is_rejected() {
        let (cert, _) = self_signed();
        let result = Transport::from_secret(&secret(&[
            (CLIENT_CERT_KEY, cert),
            (CLIENT_KEY_KEY, "not a key".to_string()),
        ]));
        assert!(matches!(result, Err(Error::TlsError(_))));
    }

    #[test]
    fn test_empty_secret_gives_default_transport() {
        let transport = Transport::from_secret(&secret(&[])).unwrap();
        assert!(!transport.has_client_identity());
        assert_eq!(transport.extra_roots(), 0);
    }
}
