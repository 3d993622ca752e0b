//! SFTP transfer backend over libssh2.

use std::io::Read;
use std::net::TcpStream;
use std::path::Path;

use ssh2::{ErrorCode, Session, Sftp};

use crate::{write_atomic, RemoteEndpoint, RemoteEntry, TransferConnector, TransferError, TransferSession};

/// libssh2's `LIBSSH2_FX_NO_SUCH_FILE`.
const FX_NO_SUCH_FILE: i32 = 2;

#[derive(Debug, Clone)]
pub struct SftpConnector {
    pub timeout_ms: u32,
}

impl Default for SftpConnector {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

impl TransferConnector for SftpConnector {
    fn connect(&self, endpoint: &RemoteEndpoint) -> Result<Box<dyn TransferSession>, TransferError> {
        let addr = format!("{}:{}", endpoint.host, endpoint.port);
        let connect_err = |source: Box<dyn std::error::Error + Send + Sync>| TransferError::Connect {
            addr: addr.clone(),
            source,
        };

        let tcp = TcpStream::connect(&addr).map_err(|err| connect_err(err.into()))?;
        let mut session = Session::new().map_err(|err| connect_err(err.into()))?;
        session.set_timeout(self.timeout_ms);
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|err| connect_err(err.into()))?;

        session
            .userauth_password(&endpoint.user, &endpoint.password)
            .map_err(|err| TransferError::Auth {
                user: endpoint.user.clone(),
                source: err.into(),
            })?;
        if !session.authenticated() {
            return Err(TransferError::Auth {
                user: endpoint.user.clone(),
                source: "server rejected credentials".into(),
            });
        }

        let sftp = session.sftp().map_err(|err| connect_err(err.into()))?;
        Ok(Box::new(SftpSession { session, sftp }))
    }
}

struct SftpSession {
    session: Session,
    sftp: Sftp,
}

fn is_no_such_file(err: &ssh2::Error) -> bool {
    matches!(err.code(), ErrorCode::SFTP(code) if code == FX_NO_SUCH_FILE)
}

impl TransferSession for SftpSession {
    fn list(&mut self, remote_dir: &str) -> Result<Vec<RemoteEntry>, TransferError> {
        let entries = self
            .sftp
            .readdir(Path::new(remote_dir))
            .map_err(|err| TransferError::List {
                path: remote_dir.to_string(),
                source: err.into(),
            })?;
        Ok(entries
            .into_iter()
            .filter_map(|(path, stat)| {
                let name = path.file_name()?.to_str()?.to_string();
                // Resolve links the way the local listing does; dangling ones are skipped.
                let is_file = if stat.file_type().is_symlink() {
                    self.sftp.stat(&path).map(|target| target.is_file()).unwrap_or(false)
                } else {
                    stat.is_file()
                };
                Some(RemoteEntry { name, is_file })
            })
            .collect())
    }

    fn fetch(&mut self, remote_path: &str, local_path: &Path) -> Result<(), TransferError> {
        let fetch_err = |source: Box<dyn std::error::Error + Send + Sync>| TransferError::Fetch {
            path: remote_path.to_string(),
            source,
        };

        let mut file = match self.sftp.open(Path::new(remote_path)) {
            Ok(file) => file,
            Err(err) if is_no_such_file(&err) => {
                return Err(TransferError::NotFound {
                    path: remote_path.to_string(),
                })
            }
            Err(err) => return Err(fetch_err(err.into())),
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|err| fetch_err(err.into()))?;
        write_atomic(local_path, &bytes).map_err(|err| fetch_err(err.into()))
    }

    fn close(self: Box<Self>) -> Result<(), TransferError> {
        let SftpSession { session, sftp } = *self;
        drop(sftp);
        session
            .disconnect(None, "mcstats sync finished", None)
            .map_err(|err| TransferError::Connect {
                addr: "session".to_string(),
                source: err.into(),
            })
    }
}
