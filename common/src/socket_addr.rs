use std::{fmt, io, path::PathBuf};

/// Leading character that selects the abstract socket namespace
pub const ABSTRACT_SENTINEL: char = '@';

/// Whether this platform has Linux-style abstract sockets
pub const SUPPORTS_ABSTRACT: bool = cfg!(target_os = "linux");

/// A local socket address after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SocketAddress {
    /// Abstract-namespace name, without the namespace's leading NUL
    Abstract(Vec<u8>),
    /// Socket file on the filesystem
    Path(PathBuf),
}

impl SocketAddress {
    /// Normalizes `path` for the current platform. Client and server both go
    /// through here so they agree on the literal address.
    pub fn normalize(path: &str) -> Self {
        Self::normalize_for(path, SUPPORTS_ABSTRACT)
    }

    /// `@name` becomes the abstract name `name\0` when `abstract_namespace` is
    /// set; every other path, and `@name` without abstract support, is a
    /// filesystem path taken verbatim.
    pub fn normalize_for(path: &str, abstract_namespace: bool) -> Self {
        match path.strip_prefix(ABSTRACT_SENTINEL) {
            Some(name) if abstract_namespace => {
                let mut bytes = Vec::with_capacity(name.len() + 1);
                bytes.extend_from_slice(name.as_bytes());
                bytes.push(0);
                Self::Abstract(bytes)
            }
            _ => Self::Path(PathBuf::from(path)),
        }
    }

    /// The socket file backing this address, if any
    pub fn file_path(&self) -> Option<&PathBuf> {
        match self {
            Self::Path(path) => Some(path),
            Self::Abstract(_) => None,
        }
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abstract(name) => write!(
                f,
                "{ABSTRACT_SENTINEL}{}",
                String::from_utf8_lossy(name).escape_debug()
            ),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

#[cfg(unix)]
mod unix {
    use std::{os::unix::net as std_net, path::Path};

    use tokio::net::{UnixListener, UnixStream};

    use super::*;

    impl SocketAddress {
        /// Binds a listener on this address.
        ///
        /// Filesystem sockets replace a stale socket file left behind by an
        /// earlier run and are restricted to the owner. A socket something is
        /// still listening on fails with `AddrInUse`; a path that is not a
        /// socket fails with `AlreadyExists`. Neither is touched.
        pub fn bind(&self) -> io::Result<UnixListener> {
            match self {
                Self::Abstract(name) => {
                    let listener = std_net::UnixListener::bind_addr(&abstract_addr(name)?)?;
                    listener.set_nonblocking(true)?;
                    UnixListener::from_std(listener)
                }
                Self::Path(path) => {
                    remove_stale_socket(path)?;
                    let listener = UnixListener::bind(path)?;

                    use std::os::unix::fs::PermissionsExt;
                    if let Err(e) =
                        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                    {
                        tracing::warn!("Failed to set socket permissions on {:?}: {}", path, e);
                    }
                    Ok(listener)
                }
            }
        }

        /// Opens a stream to this address.
        pub async fn connect(&self) -> io::Result<UnixStream> {
            match self {
                Self::Abstract(name) => {
                    let stream = std_net::UnixStream::connect_addr(&abstract_addr(name)?)?;
                    stream.set_nonblocking(true)?;
                    UnixStream::from_std(stream)
                }
                Self::Path(path) => UnixStream::connect(path).await,
            }
        }
    }

    fn remove_stale_socket(path: &Path) -> io::Result<()> {
        use std::os::unix::fs::FileTypeExt;

        let metadata = match std::fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        if !metadata.file_type().is_socket() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} exists and is not a socket", path.display()),
            ));
        }

        match std_net::UnixStream::connect(path) {
            Ok(_) => Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{} is in use by another listener", path.display()),
            )),
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                tracing::warn!("Removing stale socket file at {:?}", path);
                std::fs::remove_file(path)
            }
            Err(e) => Err(e),
        }
    }

    #[cfg(target_os = "linux")]
    fn abstract_addr(name: &[u8]) -> io::Result<std_net::SocketAddr> {
        use std::os::linux::net::SocketAddrExt;

        std_net::SocketAddr::from_abstract_name(name)
    }

    #[cfg(not(target_os = "linux"))]
    fn abstract_addr(_name: &[u8]) -> io::Result<std_net::SocketAddr> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "abstract sockets are not supported on this platform",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_selects_abstract_namespace() {
        let address = SocketAddress::normalize_for("@/tmp/server.sock", true);
        assert_eq!(address, SocketAddress::Abstract(b"/tmp/server.sock\0".to_vec()));
        assert_eq!(address.file_path(), None);
    }

    #[test]
    fn sentinel_is_verbatim_without_abstract_support() {
        let address = SocketAddress::normalize_for("@/tmp/server.sock", false);
        assert_eq!(address, SocketAddress::Path(PathBuf::from("@/tmp/server.sock")));
    }

    #[test]
    fn plain_paths_are_filesystem_sockets() {
        for abstract_namespace in [true, false] {
            let address = SocketAddress::normalize_for("/run/trirpc.sock", abstract_namespace);
            assert_eq!(address, SocketAddress::Path(PathBuf::from("/run/trirpc.sock")));
        }
    }

    #[test]
    fn normalization_is_deterministic() {
        assert_eq!(
            SocketAddress::normalize("@/tmp/server.sock"),
            SocketAddress::normalize("@/tmp/server.sock")
        );
    }

    #[test]
    fn display_marks_abstract_names() {
        let address = SocketAddress::normalize_for("@/tmp/server.sock", true);
        assert_eq!(address.to_string(), "@/tmp/server.sock\\0");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn abstract_address_binds_and_connects() {
        let path = format!("@/tmp/trirpc-common-test-{}.sock", std::process::id());
        let server_side = SocketAddress::normalize(&path);
        let client_side = SocketAddress::normalize(&path);

        let listener = server_side.bind().unwrap();
        let (accepted, connected) = tokio::join!(listener.accept(), client_side.connect());
        accepted.unwrap();
        connected.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn bind_leaves_regular_files_alone() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"keep me").unwrap();

        let err = SocketAddress::Path(path.clone()).bind().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn bind_refuses_a_live_socket() {
        let dir = tempfile::TempDir::new().unwrap();
        let address = SocketAddress::Path(dir.path().join("live.sock"));
        let first = address.bind().unwrap();

        let err = address.bind().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);

        // The first listener still accepts.
        let (accepted, connected) = tokio::join!(first.accept(), address.connect());
        accepted.unwrap();
        connected.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn bind_replaces_a_stale_socket() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stale.sock");
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let address = SocketAddress::Path(path);
        let listener = address.bind().unwrap();
        let (accepted, connected) = tokio::join!(listener.accept(), address.connect());
        accepted.unwrap();
        connected.unwrap();
    }
}
