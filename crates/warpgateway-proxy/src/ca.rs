//! Root certificate authority for TLS interception.
//!
//! The gateway signs a leaf certificate per intercepted host with a root CA
//! kept on disk as two PEM files. The root is generated on first use; clients
//! (Warp, or the OS trust store) must trust `warpgateway-ca.crt` for HTTPS
//! interception to work.

use std::fs;
use std::path::{Path, PathBuf};

use hudsucker::certificate_authority::RcgenAuthority;
use hudsucker::rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, Issuer, KeyPair, KeyUsagePurpose,
};
use hudsucker::rustls::crypto::aws_lc_rs::default_provider;

pub use crate::error::CaManagerError;

const CA_CERT_FILENAME: &str = "warpgateway-ca.crt";
const CA_KEY_FILENAME: &str = "warpgateway-ca.key";
pub(crate) const CA_COMMON_NAME: &str = "WarpGateway Root CA";

/// Number of leaf certificates kept in the signing cache.
const LEAF_CACHE_SIZE: u64 = 1000;

/// Owns the on-disk root CA.
#[derive(Debug, Clone)]
pub struct CaManager {
    ca_dir: PathBuf,
}

impl CaManager {
    /// Creates a manager for the given directory.
    pub fn new(ca_dir: impl AsRef<Path>) -> Self {
        Self {
            ca_dir: ca_dir.as_ref().to_path_buf(),
        }
    }

    /// Creates a manager in the platform data directory.
    pub fn with_default_dir() -> Result<Self, CaManagerError> {
        let project_dirs = directories::ProjectDirs::from("com", "warpgateway", "WarpGateway")
            .ok_or_else(|| CaManagerError::Generation("no home directory".into()))?;

        Ok(Self::new(project_dirs.data_dir().join("ca")))
    }

    /// Uses `dir` when given, otherwise the platform data directory.
    pub fn from_dir_or_default(dir: Option<&Path>) -> Result<Self, CaManagerError> {
        match dir {
            Some(dir) => Ok(Self::new(dir)),
            None => Self::with_default_dir(),
        }
    }

    pub fn ca_dir(&self) -> &Path {
        &self.ca_dir
    }

    pub fn cert_path(&self) -> PathBuf {
        self.ca_dir.join(CA_CERT_FILENAME)
    }

    pub fn key_path(&self) -> PathBuf {
        self.ca_dir.join(CA_KEY_FILENAME)
    }

    /// Returns true if both the certificate and key files exist.
    pub fn ca_exists(&self) -> bool {
        self.cert_path().exists() && self.key_path().exists()
    }

    /// Loads the authority, generating the root first if it is missing.
    pub fn ensure_ca(&self) -> Result<RcgenAuthority, CaManagerError> {
        if !self.ca_exists() {
            self.generate_ca()?;
        }
        self.load_authority()
    }

    /// Generates a new root certificate and key, replacing any existing pair.
    pub fn generate_ca(&self) -> Result<(), CaManagerError> {
        fs::create_dir_all(&self.ca_dir)?;

        let key_pair =
            KeyPair::generate().map_err(|e| CaManagerError::Generation(e.to_string()))?;
        let cert = root_params()
            .map_err(|e| CaManagerError::Generation(e.to_string()))?
            .self_signed(&key_pair)
            .map_err(|e| CaManagerError::Generation(e.to_string()))?;

        fs::write(self.cert_path(), cert.pem()).map_err(|e| CaManagerError::Write(e.to_string()))?;
        fs::write(self.key_path(), key_pair.serialize_pem())
            .map_err(|e| CaManagerError::Write(e.to_string()))?;

        tracing::info!("Generated new CA certificate at {}", self.cert_path().display());
        Ok(())
    }

    /// Loads the root from disk into a hudsucker signing authority.
    pub fn load_authority(&self) -> Result<RcgenAuthority, CaManagerError> {
        let cert_pem = fs::read_to_string(self.cert_path())?;
        let key_pem = fs::read_to_string(self.key_path())?;

        let key_pair =
            KeyPair::from_pem(&key_pem).map_err(|e| CaManagerError::Parse(e.to_string()))?;
        let issuer = Issuer::from_ca_cert_pem(&cert_pem, key_pair)
            .map_err(|e| CaManagerError::Parse(e.to_string()))?;

        Ok(RcgenAuthority::new(issuer, LEAF_CACHE_SIZE, default_provider()))
    }

    /// Reads the root certificate PEM for installation into a trust store.
    pub fn cert_pem(&self) -> Result<String, CaManagerError> {
        Ok(fs::read_to_string(self.cert_path())?)
    }
}

fn root_params() -> Result<CertificateParams, hudsucker::rcgen::Error> {
    let mut params = CertificateParams::new(Vec::<String>::new())?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, CA_COMMON_NAME);
    dn.push(DnType::OrganizationName, "WarpGateway");
    params.distinguished_name = dn;

    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn ca_manager_paths() {
        let manager = CaManager::new("/tmp/wg-ca");
        assert_eq!(manager.ca_dir(), Path::new("/tmp/wg-ca"));
        assert_eq!(
            manager.cert_path(),
            PathBuf::from("/tmp/wg-ca/warpgateway-ca.crt")
        );
        assert_eq!(
            manager.key_path(),
            PathBuf::from("/tmp/wg-ca/warpgateway-ca.key")
        );
    }

    #[test]
    fn ca_manager_from_explicit_dir() {
        let temp_dir = TempDir::new().unwrap();
        let manager = CaManager::from_dir_or_default(Some(temp_dir.path())).unwrap();
        assert_eq!(manager.ca_dir(), temp_dir.path());
    }

    #[test]
    fn ca_manager_ensure_generates_then_reuses() {
        let temp_dir = TempDir::new().unwrap();
        let manager = CaManager::new(temp_dir.path().join("ca"));
        assert!(!manager.ca_exists());

        assert!(manager.ensure_ca().is_ok());
        assert!(manager.ca_exists());
        let first = manager.cert_pem().unwrap();

        assert!(manager.ensure_ca().is_ok());
        assert_eq!(manager.cert_pem().unwrap(), first);
        assert!(first.starts_with("-----BEGIN CERTIFICATE-----"));
    }

    #[test]
    fn ca_manager_rejects_corrupt_key() {
        let temp_dir = TempDir::new().unwrap();
        let manager = CaManager::new(temp_dir.path());
        manager.generate_ca().unwrap();
        fs::write(manager.key_path(), "not a key").unwrap();

        assert!(matches!(
            manager.load_authority(),
            Err(CaManagerError::Parse(_))
        ));
    }
}
