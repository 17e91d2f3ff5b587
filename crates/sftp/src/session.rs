//! SSH session lifecycle
//!
//! A [`SessionHandle`] owns at most one authenticated SFTP channel. It can be
//! opened, closed and reopened; work submitted while it is closed fails with
//! a connectivity error instead of reconnecting behind the caller's back.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ssh2::{CheckResult, KnownHostFileKind, Session, Sftp};
use stow_core::{Error, Result, SftpAuth, SftpConfig};
use tracing::{debug, info};

use crate::error::classify;

pub(crate) struct Connection {
    session: Session,
    sftp: Sftp,
}

impl Connection {
    fn establish(config: &SftpConfig) -> Result<Self> {
        let endpoint = format!("{}:{}", config.host, config.port);
        let timeout = Duration::from_secs(config.timeout_secs.max(1));

        let tcp = connect_tcp(&endpoint, timeout)?;
        let mut session = Session::new().map_err(|e| classify(e, &endpoint))?;
        session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| classify(e, &endpoint))?;

        verify_host_key(&session, config)?;
        authenticate(&session, config)?;

        let sftp = session.sftp().map_err(|e| classify(e, &endpoint))?;
        info!(endpoint = %endpoint, user = %config.username, "sftp session established");
        Ok(Self { session, sftp })
    }

    fn shutdown(self) {
        drop(self.sftp);
        if let Err(e) = self.session.disconnect(None, "closing", None) {
            debug!(error = %e, "disconnect reported an error");
        }
    }
}

fn connect_tcp(endpoint: &str, timeout: Duration) -> Result<TcpStream> {
    let addrs = endpoint
        .to_socket_addrs()
        .map_err(|e| Error::Connectivity(format!("cannot resolve {endpoint}: {e}")))?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(match last_err {
        Some(e) => Error::io_at(endpoint, e),
        None => Error::Connectivity(format!("{endpoint} resolved to no addresses")),
    })
}

fn verify_host_key(session: &Session, config: &SftpConfig) -> Result<()> {
    let (key, _) = session
        .host_key()
        .ok_or_else(|| Error::Connectivity(format!("{} offered no host key", config.host)))?;

    let path = config
        .known_hosts_path()
        .ok_or_else(|| Error::Config("no known_hosts file configured".into()))?;
    let mut known = session
        .known_hosts()
        .map_err(|e| classify(e, "known_hosts"))?;
    known
        .read_file(&path, KnownHostFileKind::OpenSSH)
        .map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e.message()))
        })?;

    match known.check_port(&config.host, config.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::Mismatch => Err(Error::Access(format!(
            "host key for {} does not match the entry in {}",
            config.host,
            path.display()
        ))),
        CheckResult::NotFound => Err(Error::Access(format!(
            "host {} is not listed in {}",
            config.host,
            path.display()
        ))),
        CheckResult::Failure => Err(Error::Connectivity(format!(
            "host key check for {} failed",
            config.host
        ))),
    }
}

fn authenticate(session: &Session, config: &SftpConfig) -> Result<()> {
    let user = config.username.as_str();
    let attempt = match &config.auth {
        SftpAuth::Key {
            key_file,
            passphrase,
        } => session.userauth_pubkey_file(user, None, key_file, passphrase.as_deref()),
        SftpAuth::Password { password } => session.userauth_password(user, password),
        SftpAuth::Agent => session.userauth_agent(user),
    };
    attempt.map_err(|e| {
        Error::Access(format!("authentication as '{user}' failed: {}", e.message()))
    })?;

    if !session.authenticated() {
        return Err(Error::Access(format!("server did not accept '{user}'")));
    }
    Ok(())
}

/// Shared, reopenable SFTP connection
#[derive(Clone, Default)]
pub(crate) struct SessionHandle {
    inner: Arc<Mutex<Option<Connection>>>,
}

impl SessionHandle {
    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// Connect and authenticate unless already open
    pub(crate) async fn open(&self, config: SftpConfig) -> Result<()> {
        let handle = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = handle.lock();
            if guard.is_none() {
                *guard = Some(Connection::establish(&config)?);
            }
            Ok::<_, Error>(())
        })
        .await?
    }

    /// Drop the connection; closing a closed handle succeeds
    pub(crate) async fn close(&self) -> Result<()> {
        let handle = self.clone();
        tokio::task::spawn_blocking(move || {
            if let Some(connection) = handle.lock().take() {
                connection.shutdown();
                info!("sftp session closed");
            }
        })
        .await?;
        Ok(())
    }

    /// Run blocking SFTP work on the blocking pool
    pub(crate) async fn run<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Sftp) -> Result<T> + Send + 'static,
    {
        let handle = self.clone();
        tokio::task::spawn_blocking(move || {
            let guard = handle.lock();
            let connection = guard
                .as_ref()
                .ok_or_else(|| Error::Connectivity("sftp session is not open".into()))?;
            work(&connection.sftp)
        })
        .await?
    }
}
