//! Node identity and certificate material
//!
//! The node identity is the ed25519 key in the provisioned PEM key file. The
//! same file, together with the certificate chain and CA bundle, also feeds
//! the relay's TLS listener.

use ed25519_dalek::pkcs8::DecodePrivateKey;
use ed25519_dalek::SigningKey;
use iroh::SecretKey;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::SecurityConfig;
use crate::error::{TunnelError, TunnelResult};

const PRIVATE_KEY_TAG: &str = "PRIVATE KEY";
const CERTIFICATE_TAG: &str = "CERTIFICATE";

fn read_pem_file(path: &Path, component: &str) -> TunnelResult<Vec<pem::Pem>> {
    let contents = std::fs::read(path).map_err(|e| {
        TunnelError::configuration(component, format!("cannot read {}: {}", path.display(), e))
    })?;

    pem::parse_many(&contents).map_err(|e| {
        TunnelError::configuration(component, format!("{} is not valid PEM: {}", path.display(), e))
    })
}

fn private_key_der(path: &Path) -> TunnelResult<Vec<u8>> {
    read_pem_file(path, "security.private_key_file")?
        .into_iter()
        .find(|block| block.tag() == PRIVATE_KEY_TAG)
        .map(pem::Pem::into_contents)
        .ok_or_else(|| {
            TunnelError::configuration(
                "security.private_key_file",
                format!("{} holds no PKCS#8 private key", path.display()),
            )
        })
}

/// Load the node identity from a PKCS#8 ed25519 PEM key.
pub fn load_secret_key(path: impl AsRef<Path>) -> TunnelResult<SecretKey> {
    let path = path.as_ref();
    let der = private_key_der(path)?;

    let signing_key = SigningKey::from_pkcs8_der(&der).map_err(|e| {
        TunnelError::configuration(
            "security.private_key_file",
            format!("{} is not an ed25519 key: {}", path.display(), e),
        )
    })?;

    let secret_key = SecretKey::from_bytes(&signing_key.to_bytes());
    info!("Loaded node identity {}", secret_key.public());
    Ok(secret_key)
}

/// Load every certificate of a PEM chain, leaf first.
pub fn load_certificate_chain(path: impl AsRef<Path>) -> TunnelResult<Vec<CertificateDer<'static>>> {
    let path = path.as_ref();
    let certs: Vec<_> = read_pem_file(path, "security.cert_file")?
        .into_iter()
        .filter(|block| block.tag() == CERTIFICATE_TAG)
        .map(|block| CertificateDer::from(block.into_contents()))
        .collect();

    if certs.is_empty() {
        return Err(TunnelError::configuration(
            "security.cert_file",
            format!("{} holds no certificates", path.display()),
        ));
    }

    debug!("Loaded {} certificates from {}", certs.len(), path.display());
    Ok(certs)
}

/// Load a CA bundle into a root store.
pub fn load_ca_roots(path: impl AsRef<Path>) -> TunnelResult<RootCertStore> {
    let path = path.as_ref();
    let mut roots = RootCertStore::empty();
    for cert in read_pem_file(path, "security.ca_file")?
        .into_iter()
        .filter(|block| block.tag() == CERTIFICATE_TAG)
    {
        roots
            .add(CertificateDer::from(cert.into_contents()))
            .map_err(|e| TunnelError::invalid_config("security.ca_file", path.display(), &e.to_string()))?;
    }

    if roots.is_empty() {
        return Err(TunnelError::configuration(
            "security.ca_file",
            format!("{} holds no CA certificates", path.display()),
        ));
    }
    Ok(roots)
}

/// TLS material for the relay listener
pub struct RelayTls {
    pub certs: Vec<CertificateDer<'static>>,
    pub server_config: rustls::ServerConfig,
}

/// Build the relay's rustls config from the configured certificate material.
///
/// Client certificates are only demanded when `require_client_auth` is set.
pub fn relay_tls_config(security: &SecurityConfig) -> TunnelResult<RelayTls> {
    let certs = load_certificate_chain(&security.cert_file)?;
    let key = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(private_key_der(
        &security.private_key_file,
    )?));

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| TunnelError::configuration("security", e.to_string()))?;

    let builder = if security.require_client_auth {
        let roots = load_ca_roots(&security.ca_file)?;
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(|e| TunnelError::configuration("security.ca_file", e.to_string()))?;
        builder.with_client_cert_verifier(verifier)
    } else {
        builder.with_no_client_auth()
    };

    let server_config = builder
        .with_single_cert(certs.clone(), key)
        .map_err(|e| TunnelError::configuration("security.cert_file", e.to_string()))?;

    Ok(RelayTls {
        certs,
        server_config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_secret_key_is_stable() {
        let key_pair = rcgen::KeyPair::generate(&rcgen::PKCS_ED25519).unwrap();
        let file = write_temp(&key_pair.serialize_pem());

        let first = load_secret_key(file.path()).unwrap();
        let second = load_secret_key(file.path()).unwrap();
        assert_eq!(first.public(), second.public());
    }

    #[test]
    fn test_missing_key_file_is_config_error() {
        let err = load_secret_key("/definitely/not/here.key").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_non_ed25519_key_is_rejected() {
        let key_pair = rcgen::KeyPair::generate(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let file = write_temp(&key_pair.serialize_pem());
        assert!(matches!(
            load_secret_key(file.path()),
            Err(TunnelError::Configuration { .. })
        ));
    }

    #[test]
    fn test_garbage_pem_is_rejected() {
        let file = write_temp("this is not pem");
        assert!(load_secret_key(file.path()).is_err());
        assert!(load_certificate_chain(file.path()).is_err());
    }

    #[test]
    fn test_relay_tls_config_with_and_without_client_auth() {
        let mut params = rcgen::CertificateParams::new(vec!["localhost".to_string()]);
        params.alg = &rcgen::PKCS_ED25519;
        let cert = rcgen::Certificate::from_params(params).unwrap();
        let cert_file = write_temp(&cert.serialize_pem().unwrap());
        let key_file = write_temp(&cert.serialize_private_key_pem());

        let mut security = SecurityConfig {
            tls_enabled: true,
            ca_file: cert_file.path().to_path_buf(),
            cert_file: cert_file.path().to_path_buf(),
            private_key_file: key_file.path().to_path_buf(),
            require_client_auth: false,
        };

        let tls = relay_tls_config(&security).unwrap();
        assert_eq!(tls.certs.len(), 1);

        // The relay identity and its TLS key come from the same file
        assert!(load_secret_key(&security.private_key_file).is_ok());

        security.require_client_auth = true;
        assert!(relay_tls_config(&security).is_ok());
    }
}
