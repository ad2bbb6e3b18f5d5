//! TLS client used for upstream connections.
//!
//! Upstream certificates are checked against the webpki roots unless
//! `ssl_insecure` is set, in which case any certificate chain is accepted.
//! Handshake signatures are still verified either way.

use std::sync::Arc;

use hudsucker::hyper_util::client::legacy::connect::HttpConnector;
use hudsucker::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use hudsucker::rustls::crypto::{
    aws_lc_rs::default_provider, verify_tls12_signature, verify_tls13_signature, CryptoProvider,
};
use hudsucker::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use hudsucker::rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use hyper_rustls::{ConfigBuilderExt, HttpsConnector, HttpsConnectorBuilder};

use crate::error::{ProxyError, Result};

/// Connector type handed to hudsucker for upstream requests.
pub type UpstreamConnector = HttpsConnector<HttpConnector>;

/// Builds the rustls client configuration for upstream connections.
pub fn client_config(ssl_insecure: bool) -> Result<ClientConfig> {
    let provider = Arc::new(default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| ProxyError::Tls(e.to_string()))?;

    let config = if ssl_insecure {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
            .with_no_client_auth()
    } else {
        builder.with_webpki_roots().with_no_client_auth()
    };
    Ok(config)
}

/// Wraps a client configuration into an HTTP/HTTPS connector.
pub fn upstream_connector(config: ClientConfig) -> UpstreamConnector {
    HttpsConnectorBuilder::new()
        .with_tls_config(config)
        .https_or_http()
        .enable_http1()
        .build()
}

/// Accepts any server certificate chain.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, hudsucker::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, hudsucker::rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, hudsucker::rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> AcceptAnyServerCert {
        AcceptAnyServerCert {
            provider: Arc::new(default_provider()),
        }
    }

    #[test]
    fn insecure_verifier_accepts_unknown_chain() {
        let cert = CertificateDer::from(vec![0x30, 0x03, 0x02, 0x01, 0x00]);
        let name = ServerName::try_from("self-signed.test").unwrap();
        let verdict = verifier().verify_server_cert(&cert, &[], &name, &[], UnixTime::now());
        assert!(verdict.is_ok());
    }

    #[test]
    fn insecure_verifier_offers_provider_schemes() {
        let schemes = verifier().supported_verify_schemes();
        assert!(!schemes.is_empty());
        assert!(schemes.contains(&SignatureScheme::ECDSA_NISTP256_SHA256));
    }

    #[test]
    fn client_config_builds_in_both_modes() {
        assert!(client_config(false).is_ok());
        assert!(client_config(true).is_ok());
    }

    #[tokio::test]
    async fn connector_builds_from_config() {
        let config = client_config(true).unwrap();
        let _connector: UpstreamConnector = upstream_connector(config);
    }
}
