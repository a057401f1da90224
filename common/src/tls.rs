//! Mutual-TLS configuration built from a two-certificate chain.
//!
//! The certificate file carries the leaf first and the issuing CA second.
//! The CA is the only trust anchor: it verifies the peer's server certificate
//! on the client side and the peer's client certificate on the server side.

use std::{fs, io::BufReader, path::Path, sync::Arc};

use rustls::{
    client::Resumption,
    crypto::{aws_lc_rs, CryptoProvider},
    pki_types::{CertificateDer, PrivateKeyDer, ServerName},
    server::{ServerSessionMemoryCache, WebPkiClientVerifier},
    ClientConfig, RootCertStore, ServerConfig, SupportedProtocolVersion,
};
use rustls_pemfile::{certs, private_key};

use crate::{
    config::{TlsMaterialPath, SESSION_CACHE_SIZE},
    error::ConfigError,
};

/// Protocol versions a connection may negotiate. TLS 1.2 is the floor, and
/// the only version the pinned suite exists for.
pub const PROTOCOL_VERSIONS: &[&SupportedProtocolVersion] = &[&rustls::version::TLS12];

/// ALPN identifiers offered on both ends, most preferred first
pub const ALPN_PROTOCOLS: &[&[u8]] = &[b"h2", b"http/1.1"];

const CHAIN_LENGTH: usize = 2;

/// The crypto provider with the cipher suite list narrowed to
/// ECDHE-ECDSA-AES128-GCM-SHA256.
pub fn pinned_provider() -> Arc<CryptoProvider> {
    let mut provider = aws_lc_rs::default_provider();
    provider.cipher_suites = vec![aws_lc_rs::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256];
    Arc::new(provider)
}

/// A validated leaf + CA chain and the leaf's private key.
///
/// Loaded once, then shared read-only; every config built from it trusts the
/// embedded CA and nothing else.
pub struct TlsMaterial {
    chain: Vec<CertificateDer<'static>>,
    key:   PrivateKeyDer<'static>,
    roots: Arc<RootCertStore>,
}

impl TlsMaterial {
    /// Reads the chain and key from disk.
    pub fn load(paths: &TlsMaterialPath) -> Result<Self, ConfigError> {
        tracing::info!("Loading TLS material:");
        tracing::info!("  - Certificate chain: {:?}", paths.cert_path);
        tracing::info!("  - Private key: {:?}", paths.key_path);

        let cert_pem = read(&paths.cert_path)?;
        let key_pem = read(&paths.key_path)?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Parses PEM-encoded material, checking the chain shape.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, ConfigError> {
        let chain = certs(&mut BufReader::new(cert_pem))
            .collect::<Result<Vec<_>, _>>()
            .map_err(ConfigError::Certificates)?;

        if chain.len() != CHAIN_LENGTH {
            return Err(ConfigError::ChainLength { found: chain.len() });
        }

        let key = private_key(&mut BufReader::new(key_pem))
            .map_err(ConfigError::KeyMaterial)?
            .ok_or(ConfigError::MissingKey)?;

        let mut roots = RootCertStore::empty();
        roots
            .add(chain[1].clone())
            .map_err(ConfigError::InvalidCa)?;

        Ok(Self {
            chain,
            key,
            roots: Arc::new(roots),
        })
    }

    /// The leaf certificate presented to peers
    pub fn leaf(&self) -> &CertificateDer<'static> {
        &self.chain[0]
    }

    /// The CA certificate used as the trust anchor
    pub fn ca(&self) -> &CertificateDer<'static> {
        &self.chain[1]
    }

    /// Server-side config: presents the chain, requires and verifies a client
    /// certificate issued by the embedded CA.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>, ConfigError> {
        let provider = pinned_provider();

        let client_verifier =
            WebPkiClientVerifier::builder_with_provider(self.roots.clone(), provider.clone())
                .build()?;

        let mut config = ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(PROTOCOL_VERSIONS)?
            .with_client_cert_verifier(client_verifier)
            .with_single_cert(self.chain.clone(), self.key.clone_key())?;

        config.ignore_client_order = true;
        config.session_storage = ServerSessionMemoryCache::new(SESSION_CACHE_SIZE);
        config.alpn_protocols = alpn_protocols();

        Ok(Arc::new(config))
    }

    /// Client-side config: verifies the server against the embedded CA and
    /// presents the chain as the client certificate.
    pub fn client_config(&self) -> Result<Arc<ClientConfig>, ConfigError> {
        let mut config = ClientConfig::builder_with_provider(pinned_provider())
            .with_protocol_versions(PROTOCOL_VERSIONS)?
            .with_root_certificates(self.roots.clone())
            .with_client_auth_cert(self.chain.clone(), self.key.clone_key())?;

        config.resumption = Resumption::in_memory_sessions(SESSION_CACHE_SIZE);
        config.alpn_protocols = alpn_protocols();

        Ok(Arc::new(config))
    }
}

/// Parses the name a client verifies the server certificate against. IP
/// literals are matched against IP SANs, anything else against DNS SANs.
pub fn server_name(host: &str) -> Result<ServerName<'static>, ConfigError> {
    ServerName::try_from(host.to_string()).map_err(|_| ConfigError::ServerName(host.to_string()))
}

fn alpn_protocols() -> Vec<Vec<u8>> {
    ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect()
}

fn read(path: &Path) -> Result<Vec<u8>, ConfigError> {
    fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestPki;

    #[test]
    fn two_certificate_chain_is_accepted() {
        let pki = TestPki::generate();
        let material = TlsMaterial::from_pem(
            pki.server.chain_pem.as_bytes(),
            pki.server.key_pem.as_bytes(),
        )
        .unwrap();

        assert_eq!(material.ca().as_ref(), pki.ca_der.as_slice());
        assert_ne!(material.leaf(), material.ca());
        material.server_config().unwrap();
        material.client_config().unwrap();
    }

    #[test]
    fn other_chain_lengths_are_rejected() {
        let pki = TestPki::generate();
        let key = pki.server.key_pem.as_bytes();

        let leaf_only = pki.server.leaf_pem.clone();
        let three = format!("{}{}", pki.server.chain_pem, pki.ca_pem);

        for (pem, expected) in [("", 0), (leaf_only.as_str(), 1), (three.as_str(), 3)] {
            match TlsMaterial::from_pem(pem.as_bytes(), key) {
                Err(ConfigError::ChainLength { found }) => assert_eq!(found, expected),
                Err(other) => panic!("expected chain length error, got {other}"),
                Ok(_) => panic!("chain of {expected} accepted"),
            }
        }
    }

    #[test]
    fn unparsable_ca_is_rejected() {
        let pki = TestPki::generate();
        let garbage_ca = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
        let pem = format!("{}{}", pki.server.leaf_pem, garbage_ca);

        let result = TlsMaterial::from_pem(pem.as_bytes(), pki.server.key_pem.as_bytes());
        assert!(matches!(result, Err(ConfigError::InvalidCa(_))));
    }

    #[test]
    fn missing_key_is_rejected() {
        let pki = TestPki::generate();
        let result = TlsMaterial::from_pem(pki.server.chain_pem.as_bytes(), b"");
        assert!(matches!(result, Err(ConfigError::MissingKey)));
    }

    #[test]
    fn unreadable_files_are_reported_with_their_path() {
        let paths = TlsMaterialPath::in_dir("/nonexistent/trirpc", "server.crt", "server.key");
        match TlsMaterial::load(&paths) {
            Err(ConfigError::Read { path, .. }) => assert_eq!(path, paths.cert_path),
            Err(other) => panic!("expected read error, got {other}"),
            Ok(_) => panic!("loaded material from a missing file"),
        }
    }

    #[test]
    fn server_config_pins_suite_and_advertises_h2() {
        let pki = TestPki::generate();
        let material = TlsMaterial::from_pem(
            pki.server.chain_pem.as_bytes(),
            pki.server.key_pem.as_bytes(),
        )
        .unwrap();
        let config = material.server_config().unwrap();

        let suites = &config.crypto_provider().cipher_suites;
        assert_eq!(suites.len(), 1);
        assert_eq!(
            suites[0].suite(),
            rustls::CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256
        );
        assert_eq!(config.alpn_protocols[0], b"h2".to_vec());
        assert!(config.ignore_client_order);
    }

    #[test]
    fn server_names_accept_hosts_and_ip_literals() {
        assert!(matches!(
            server_name("127.0.0.1").unwrap(),
            ServerName::IpAddress(_)
        ));
        assert!(matches!(
            server_name("localhost").unwrap(),
            ServerName::DnsName(_)
        ));
        assert!(server_name("not a host!").is_err());
    }
}
