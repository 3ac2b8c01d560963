use std::sync::Arc;

use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;

use crate::authority::CertificateAuthority;
use crate::CaError;

/// TLS certificate selection backed by the authority's per-name leaf cache.
#[derive(Debug, Clone)]
pub struct CertificateSelector {
    authority: Arc<CertificateAuthority>,
}

impl CertificateSelector {
    pub(crate) fn new(authority: Arc<CertificateAuthority>) -> Self {
        Self { authority }
    }

    pub fn certificate_for(&self, server_name: &str) -> Result<Arc<CertifiedKey>, CaError> {
        self.authority.server_certificate(server_name)
    }

    /// Server configuration answering every SNI name with a leaf from this selector.
    pub fn into_server_config(self) -> ServerConfig {
        let mut server_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(self));
        server_config.alpn_protocols = vec![b"http/1.1".to_vec()];
        server_config
    }
}

impl ResolvesServerCert for CertificateSelector {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let Some(server_name) = client_hello.server_name() else {
            tracing::warn!("client hello carried no server name; no certificate selected");
            return None;
        };
        match self.authority.server_certificate(server_name) {
            Ok(certified) => Some(certified),
            Err(error) => {
                tracing::warn!(server_name, error = %error, "failed to issue certificate");
                None
            }
        }
    }
}
