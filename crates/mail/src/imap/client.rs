//! Blocking IMAP session on top of the `imap` crate
//!
//! One session per run: connect, login, select, then SEARCH ALL and one
//! FETCH (RFC822) per message. The session is logged out explicitly on
//! success and by `Drop` on every other exit path.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::{debug, info, warn};

use super::{ImapError, MailSource, RemoteId, Security, ServerSettings};
use crate::credentials::Password;

/// Byte stream the session runs over (TLS or plain TCP)
pub trait ImapStream: Read + Write + Send {}

impl<T: Read + Write + Send> ImapStream for T {}

type Session = imap::Session<Box<dyn ImapStream>>;

/// An authenticated IMAP session with a selected mailbox
pub struct ImapConnector {
    session: Option<Session>,
    mailbox: String,
}

impl ImapConnector {
    /// Connect to the server, log in and select the configured mailbox
    pub fn connect(
        settings: &ServerSettings,
        user: &str,
        password: &Password,
    ) -> Result<Self, ImapError> {
        info!(
            "Connecting to {}:{} ({:?})",
            settings.host, settings.port, settings.security
        );
        let tcp = open_tcp(&settings.host, settings.port, settings.timeout).map_err(|source| {
            ImapError::Connect {
                host: settings.host.clone(),
                port: settings.port,
                source,
            }
        })?;

        let stream: Box<dyn ImapStream> = match settings.security {
            Security::Tls => {
                let tls = native_tls::TlsConnector::builder().build()?;
                let stream =
                    tls.connect(&settings.host, tcp)
                        .map_err(|e| ImapError::Handshake {
                            host: settings.host.clone(),
                            message: e.to_string(),
                        })?;
                Box::new(stream)
            }
            Security::Plain => {
                warn!("Using unencrypted IMAP; the password is sent in clear text");
                Box::new(tcp)
            }
        };

        Self::from_stream(stream, user, password, &settings.mailbox)
    }

    /// Run the greeting, login and select steps over an established stream
    pub fn from_stream(
        stream: Box<dyn ImapStream>,
        user: &str,
        password: &Password,
        mailbox: &str,
    ) -> Result<Self, ImapError> {
        let mut client = imap::Client::new(stream);
        client
            .read_greeting()
            .map_err(|e| ImapError::Greeting(e.to_string()))?;

        let mut session = client
            .login(user, password.expose())
            .map_err(|(e, _client)| ImapError::Login {
                user: user.to_string(),
                message: e.to_string(),
            })?;
        debug!("Logged in as {}", user);

        if let Err(e) = session.select(mailbox) {
            let err = ImapError::Select {
                mailbox: mailbox.to_string(),
                message: e.to_string(),
            };
            if let Err(e) = session.logout() {
                warn!("Logout after failed select also failed: {}", e);
            }
            return Err(err);
        }
        debug!("Selected mailbox {}", mailbox);

        Ok(Self {
            session: Some(session),
            mailbox: mailbox.to_string(),
        })
    }

    /// Name of the selected mailbox
    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    /// Close the session, reporting logout errors
    pub fn logout(mut self) -> Result<(), ImapError> {
        let mut session = self.session.take().ok_or(ImapError::Closed)?;
        session
            .logout()
            .map_err(|e| ImapError::Logout(e.to_string()))?;
        debug!("Logged out");
        Ok(())
    }

    fn session(&mut self) -> Result<&mut Session, ImapError> {
        self.session.as_mut().ok_or(ImapError::Closed)
    }
}

/// Connect to the first reachable address, with the timeout also bounding
/// every later read and write
fn open_tcp(host: &str, port: u16, timeout: Duration) -> std::io::Result<TcpStream> {
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(tcp) => {
                tcp.set_read_timeout(Some(timeout))?;
                tcp.set_write_timeout(Some(timeout))?;
                return Ok(tcp);
            }
            Err(e) => {
                debug!("Connecting to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "host resolved to no addresses")
    }))
}

impl MailSource for ImapConnector {
    fn list_all(&mut self) -> Result<Vec<RemoteId>, ImapError> {
        let found = self
            .session()?
            .search("ALL")
            .map_err(|e| ImapError::Search(e.to_string()))?;

        // SEARCH results arrive unordered
        let mut ids: Vec<RemoteId> = found.into_iter().map(RemoteId).collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn fetch_raw(&mut self, id: RemoteId) -> Result<Vec<u8>, ImapError> {
        let fetches = self
            .session()?
            .fetch(id.0.to_string(), "(RFC822)")
            .map_err(|e| ImapError::Fetch {
                id,
                message: e.to_string(),
            })?;

        fetches
            .iter()
            .find_map(|f| f.body())
            .map(|body| body.to_vec())
            .ok_or(ImapError::EmptyFetch(id))
    }
}

impl Drop for ImapConnector {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!("Closing IMAP session");
            if let Err(e) = session.logout() {
                warn!("Logout failed while closing session: {}", e);
            }
        }
    }
}
