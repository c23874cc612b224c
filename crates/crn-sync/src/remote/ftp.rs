//! Anonymous, read-only FTP adapter.
//!
//! Speaks just enough of RFC 959 / RFC 3659 to walk the products tree:
//! login, `TYPE A`, passive data connections (`EPSV` with a `PASV`
//! fallback), `MLSD` for listings and `RETR` for line-by-line retrieval.
//! Every connect and read is bounded by the configured inactivity timeout.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::{
    ContentFetcher, DirectoryListing, LineStream, RemoteConfig, RemoteConnector, RemoteIndex,
    RemoteSession,
};
use crate::error::{Result, SyncError};

/// Protocol-level failures, mapped onto [`SyncError`] at the trait boundary.
#[derive(Error, Debug)]
enum FtpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no activity for {0:?}")]
    Timeout(Duration),

    #[error("connection closed by server")]
    Closed,

    #[error("unexpected reply to {command}: {code} {text}")]
    Unexpected {
        command: String,
        code: u16,
        text: String,
    },

    #[error("malformed reply: {0}")]
    Malformed(String),
}

#[derive(Debug)]
struct Reply {
    code: u16,
    text: String,
}

impl Reply {
    fn class(&self) -> u16 {
        self.code / 100
    }

    fn require(self, command: &str, class: u16) -> std::result::Result<Self, FtpError> {
        if self.class() == class {
            Ok(self)
        } else {
            Err(self.unexpected(command))
        }
    }

    fn unexpected(self, command: &str) -> FtpError {
        FtpError::Unexpected {
            command: command.to_string(),
            code: self.code,
            text: self.text,
        }
    }
}

async fn with_timeout<F, T>(limit: Duration, fut: F) -> std::result::Result<T, FtpError>
where
    F: Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(FtpError::Timeout(limit)),
    }
}

/// Opens [`FtpSession`]s against the configured host.
#[derive(Debug, Clone)]
pub struct FtpConnector {
    config: RemoteConfig,
}

impl FtpConnector {
    pub fn new(config: RemoteConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }
}

#[async_trait]
impl RemoteConnector for FtpConnector {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>> {
        let session = FtpSession::open(&self.config).await.map_err(|e| {
            SyncError::RemoteUnavailable(format!(
                "{}:{}: {}",
                self.config.host, self.config.port, e
            ))
        })?;
        Ok(Box::new(session))
    }
}

/// One logged-in control connection.
pub struct FtpSession {
    control: BufReader<TcpStream>,
    timeout: Duration,
}

impl FtpSession {
    async fn open(config: &RemoteConfig) -> std::result::Result<Self, FtpError> {
        let timeout = config.timeout();
        let stream = with_timeout(
            timeout,
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await?;

        let mut session = Self {
            control: BufReader::new(stream),
            timeout,
        };

        session.read_reply().await?.require("connect", 2)?;

        let reply = session.command(&format!("USER {}", config.user)).await?;
        match reply.class() {
            2 => {}
            3 => {
                session
                    .command(&format!("PASS {}", config.password))
                    .await?
                    .require("PASS", 2)?;
            }
            _ => return Err(reply.unexpected("USER")),
        }

        session.command("TYPE A").await?.require("TYPE", 2)?;

        info!(host = %config.host, port = config.port, "Connected to remote archive");
        Ok(session)
    }

    async fn read_line(&mut self) -> std::result::Result<String, FtpError> {
        let mut line = String::new();
        let read = with_timeout(self.timeout, self.control.read_line(&mut line)).await?;
        if read == 0 {
            return Err(FtpError::Closed);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn read_reply(&mut self) -> std::result::Result<Reply, FtpError> {
        let first = self.read_line().await?;
        let code = parse_code(&first)?;
        let mut text = first.get(4..).unwrap_or_default().to_string();

        // Multi-line replies run until a line starting with "<code> ".
        if first.as_bytes().get(3) == Some(&b'-') {
            let terminator = format!("{} ", code);
            loop {
                let line = self.read_line().await?;
                text.push('\n');
                text.push_str(&line);
                if line.starts_with(&terminator) || line == code.to_string() {
                    break;
                }
            }
        }

        Ok(Reply { code, text })
    }

    async fn command(&mut self, command: &str) -> std::result::Result<Reply, FtpError> {
        if command.starts_with("PASS") {
            debug!("> PASS ****");
        } else {
            debug!("> {}", command);
        }

        let wire = format!("{}\r\n", command);
        with_timeout(self.timeout, self.control.get_mut().write_all(wire.as_bytes())).await?;

        let reply = self.read_reply().await?;
        debug!(code = reply.code, "< {}", reply.text);
        Ok(reply)
    }

    /// Negotiate a passive data connection.
    async fn open_data(&mut self) -> std::result::Result<TcpStream, FtpError> {
        // The advertised PASV host is ignored; the data connection goes to
        // the same address as the control connection.
        let peer = self.control.get_ref().peer_addr()?;

        let reply = self.command("EPSV").await?;
        let port = if reply.code == 229 {
            parse_epsv_port(&reply.text)?
        } else {
            let reply = self.command("PASV").await?;
            if reply.code != 227 {
                return Err(reply.unexpected("PASV"));
            }
            parse_pasv_port(&reply.text)?
        };

        with_timeout(self.timeout, TcpStream::connect(SocketAddr::new(peer.ip(), port))).await
    }

    /// Open a data connection and issue a transfer command on it.
    async fn start_transfer<'a>(
        &'a mut self,
        verb: &str,
        path: &str,
    ) -> std::result::Result<Transfer<'a>, FtpError> {
        let data = self.open_data().await?;
        let reply = self.command(&format!("{} {}", verb, path)).await?;
        let awaiting_completion = match reply.class() {
            1 => true,
            // Some servers finish tiny transfers before answering at all.
            2 => false,
            _ => return Err(reply.unexpected(verb)),
        };

        Ok(Transfer {
            session: self,
            data: BufReader::new(data),
            verb: verb.to_string(),
            awaiting_completion,
        })
    }

    async fn mlsd(&mut self, directory: &str) -> std::result::Result<Vec<String>, FtpError> {
        let mut transfer = self.start_transfer("MLSD", directory).await?;
        let mut lines = Vec::new();
        while let Some(line) = transfer.next_line().await? {
            lines.push(line);
        }
        Ok(lines)
    }
}

/// An in-flight data transfer borrowing its control connection.
struct Transfer<'a> {
    session: &'a mut FtpSession,
    data: BufReader<TcpStream>,
    verb: String,
    awaiting_completion: bool,
}

impl Transfer<'_> {
    async fn next_line(&mut self) -> std::result::Result<Option<String>, FtpError> {
        let mut buf = Vec::new();
        let read =
            with_timeout(self.session.timeout, self.data.read_until(b'\n', &mut buf)).await?;
        if read > 0 {
            return Ok(Some(decode_line(&buf)));
        }

        // End of data: the control channel must confirm the transfer.
        if self.awaiting_completion {
            self.awaiting_completion = false;
            self.session.read_reply().await?.require(&self.verb, 2)?;
        }
        Ok(None)
    }
}

/// Strips the line terminator and decodes the rest, replacing invalid UTF-8.
fn decode_line(bytes: &[u8]) -> String {
    let mut end = bytes.len();
    if end > 0 && bytes[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && bytes[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[async_trait]
impl RemoteIndex for FtpSession {
    async fn list(&mut self, directory: &str) -> Result<DirectoryListing> {
        let lines = self.mlsd(directory).await.map_err(|e| {
            SyncError::RemoteUnavailable(format!("listing {}: {}", directory, e))
        })?;
        debug!(directory = %directory, entries = lines.len(), "Listed remote directory");
        Ok(DirectoryListing::from_mlsd_lines(directory, lines))
    }
}

#[async_trait]
impl ContentFetcher for FtpSession {
    async fn fetch<'a>(&'a mut self, path: &str) -> Result<LineStream<'a>> {
        let owned_path = path.to_string();
        let transfer = self
            .start_transfer("RETR", path)
            .await
            .map_err(|e| fetch_error(path, e))?;

        let lines = stream::try_unfold(transfer, move |mut transfer| {
            let path = owned_path.clone();
            async move {
                match transfer.next_line().await {
                    Ok(Some(line)) => Ok(Some((line, transfer))),
                    Ok(None) => Ok(None),
                    Err(e) => Err(fetch_error(&path, e)),
                }
            }
        });

        Ok(lines.boxed())
    }
}

#[async_trait]
impl RemoteSession for FtpSession {
    async fn close(&mut self) -> Result<()> {
        match self.command("QUIT").await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(error = %e, "QUIT failed, dropping connection");
                Err(SyncError::RemoteUnavailable(e.to_string()))
            }
        }
    }
}

fn fetch_error(path: &str, error: FtpError) -> SyncError {
    SyncError::Fetch {
        path: path.to_string(),
        reason: error.to_string(),
    }
}

fn parse_code(line: &str) -> std::result::Result<u16, FtpError> {
    line.get(..3)
        .filter(|code| code.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| FtpError::Malformed(line.to_string()))
}

/// Port from `229 Entering Extended Passive Mode (|||6446|)`.
fn parse_epsv_port(text: &str) -> std::result::Result<u16, FtpError> {
    let malformed = || FtpError::Malformed(text.to_string());

    let open = text.find('(').ok_or_else(malformed)?;
    let inner = &text[open + 1..];
    let close = inner.find(')').ok_or_else(malformed)?;
    let inner = &inner[..close];
    let delimiter = inner.chars().next().ok_or_else(malformed)?;

    inner
        .split(delimiter)
        .nth(3)
        .and_then(|port| port.parse().ok())
        .ok_or_else(malformed)
}

/// Port from `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`.
fn parse_pasv_port(text: &str) -> std::result::Result<u16, FtpError> {
    let numbers: Vec<u16> = text
        .split(|c: char| !(c.is_ascii_digit() || c == ','))
        .find(|group| group.matches(',').count() == 5)
        .map(|group| group.split(',').filter_map(|n| n.parse().ok()).collect())
        .unwrap_or_default();

    match numbers.as_slice() {
        [_, _, _, _, high, low] if *high < 256 && *low < 256 => Ok(high * 256 + low),
        _ => Err(FtpError::Malformed(text.to_string())),
    }
}
