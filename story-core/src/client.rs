//! Protocol client.
//!
//! Opens a connection to a story server, sends one envelope at a time and
//! collects the response frame up to the terminator.

use crate::document::{DocumentError, StoryDocument};
use crate::prompt::{PromptError, PromptPolicy};
use crate::protocol::{Envelope, FrameReader, FrameWriter, ProtocolError, Reply};
use std::fmt;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

/// Errors from client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server closed the connection before the end of the response")]
    UnexpectedEof,

    #[error("Not connected")]
    NotConnected,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Invalid story document: {0}")]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Prompt(#[from] PromptError),
}

impl From<ProtocolError> for ClientError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Io(e) => ClientError::Io(e),
            ProtocolError::UnexpectedEof => ClientError::UnexpectedEof,
            other => ClientError::Protocol(other.to_string()),
        }
    }
}

struct Connection {
    reader: FrameReader<BufReader<OwnedReadHalf>>,
    writer: FrameWriter<OwnedWriteHalf>,
}

/// A connection to a story server.
pub struct StoryClient {
    peer: String,
    connection: Option<Connection>,
}

impl StoryClient {
    /// Connect to the server at `addr`.
    pub async fn connect<A>(addr: A) -> Result<Self, ClientError>
    where
        A: ToSocketAddrs + fmt::Display,
    {
        let peer = addr.to_string();
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: peer.clone(),
                source,
            })?;

        let (read_half, write_half) = stream.into_split();
        tracing::debug!(%peer, "connected to story server");

        Ok(Self {
            peer,
            connection: Some(Connection {
                reader: FrameReader::new(BufReader::new(read_half)),
                writer: FrameWriter::new(write_half),
            }),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Send one request and return the raw response body.
    ///
    /// Body lines are joined with `\n`; the terminator is not included.
    /// An error reply comes back as its `ERROR: <message>` line.
    pub async fn send(&mut self, envelope: &Envelope) -> Result<String, ClientError> {
        Ok(self.request(envelope).await?.to_body())
    }

    /// Send one request and return the decoded reply.
    ///
    /// A transport or framing failure drops the connection.
    pub async fn request(&mut self, envelope: &Envelope) -> Result<Reply, ClientError> {
        let connection = self.connection.as_mut().ok_or(ClientError::NotConnected)?;

        let result = async {
            connection.writer.write_request(envelope).await?;
            connection.reader.read_reply().await
        }
        .await;

        match result {
            Ok(reply) => Ok(reply),
            Err(e) => {
                if !matches!(e, ProtocolError::Malformed(_)) {
                    self.connection = None;
                }
                Err(e.into())
            }
        }
    }

    /// Close the connection. Safe to call when already disconnected.
    pub async fn disconnect(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.writer.shutdown().await {
                tracing::debug!(peer = %self.peer, error = %e, "connection already closed");
            }
        }
    }

    /// Ask the server to generate a story for a fully built prompt.
    pub async fn create_story(&mut self, prompt: &str) -> Result<String, ClientError> {
        into_result(self.request(&Envelope::create_story(prompt)).await?)
    }

    /// Ask the server to extract a structured document from narrative text.
    pub async fn extract_story(&mut self, text: &str) -> Result<StoryDocument, ClientError> {
        let json = into_result(self.request(&Envelope::extract_story(text)).await?)?;
        Ok(StoryDocument::deserialize(&json)?)
    }

    /// Generate a story for `topic` and extract it into a document.
    ///
    /// The returned document carries the generated narrative as its body
    /// text. It is not saved.
    pub async fn compose_story(
        &mut self,
        policy: PromptPolicy,
        topic: &str,
        tier: u8,
    ) -> Result<StoryDocument, ClientError> {
        let prompt = policy.build_prompt(topic, tier)?;
        tracing::info!(policy = %policy, tier, "requesting story");

        let narrative = self.create_story(&prompt).await?;
        let mut document = self.extract_story(&narrative).await?;
        document.set_body_text(narrative);
        Ok(document)
    }
}

impl fmt::Debug for StoryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoryClient")
            .field("peer", &self.peer)
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn into_result(reply: Reply) -> Result<String, ClientError> {
    match reply {
        Reply::Body(body) => Ok(body),
        Reply::Error(message) => Err(ClientError::Server(message)),
    }
}
