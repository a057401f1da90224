use std::{env, path::PathBuf, time::Duration};

/// HTTP path every transport serves the RPC endpoint on
pub const RPC_PATH: &str = "/rpc/v1";

/// Port of the plaintext loopback listener
pub const LOOPBACK_PORT: u16 = 9394;

/// Port of the public mutual-TLS listener
pub const TLS_PORT: u16 = 9395;

/// The local socket our server and clients communicate over. The leading `@`
/// selects the abstract namespace where the platform has one.
pub const SOCKET_PATH: &str = "@/tmp/server.sock";

/// How long a draining transport waits for in-flight requests
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// How long an accepted TLS connection may take to finish its handshake
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on cached TLS sessions, per configuration
pub const SESSION_CACHE_SIZE: usize = 256;

pub const SERVER_CERT_FILE: &str = "server.crt";
pub const SERVER_KEY_FILE: &str = "server.key";
pub const CLIENT_CERT_FILE: &str = "client.crt";
pub const CLIENT_KEY_FILE: &str = "client.key";

const CERTS_DIR_ENV: &str = "TRIRPC_CERTS_DIR";
const DEFAULT_CERTS_DIR: &str = "certs";

fn get_certs_dir() -> PathBuf {
    env::var(CERTS_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CERTS_DIR))
}

/// Location of a certificate chain file (leaf followed by its CA) and the
/// leaf's private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterialPath {
    /// PEM file holding exactly two certificates: leaf, then CA
    pub cert_path: PathBuf,
    /// PEM file holding the leaf's private key
    pub key_path:  PathBuf,
}

impl TlsMaterialPath {
    /// Material for the given file names inside `dir`
    pub fn in_dir(dir: impl Into<PathBuf>, cert: &str, key: &str) -> Self {
        let base = dir.into();
        Self {
            cert_path: base.join(cert),
            key_path:  base.join(key),
        }
    }

    /// Server material at the default location
    pub fn server() -> Self {
        Self::in_dir(get_certs_dir(), SERVER_CERT_FILE, SERVER_KEY_FILE)
    }

    /// Client material at the default location
    pub fn client() -> Self {
        Self::in_dir(get_certs_dir(), CLIENT_CERT_FILE, CLIENT_KEY_FILE)
    }
}
