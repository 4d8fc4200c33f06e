//! Transport layer for SMTP connections.
//!
//! A TCP connection with optional TLS (implicit from the first byte, or
//! upgraded in place after STARTTLS). Replies are collected through a
//! buffered read loop that honors multi-line continuations; every
//! connect, read, and write is bounded by the configured idle timeout.

use std::fmt;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::errors::{MailError, MailResult};
use crate::protocol::{SmtpCommand, SmtpResponse};

/// Transport abstraction for the transaction engine.
#[async_trait]
pub trait SmtpTransport: Send + Sync + fmt::Debug {
    /// Sends a command and reads the reply.
    async fn send_command(&mut self, command: &SmtpCommand) -> MailResult<SmtpResponse>;

    /// Sends raw bytes (DATA payload, AUTH continuation lines).
    async fn send_data(&mut self, data: &[u8]) -> MailResult<()>;

    /// Reads one complete reply.
    async fn read_response(&mut self) -> MailResult<SmtpResponse>;

    /// Upgrades the connection to TLS in place.
    async fn upgrade_tls(&mut self, host: &str) -> MailResult<()>;

    /// Returns true once TLS is active.
    fn is_tls(&self) -> bool;

    /// Returns true once EHLO/STARTTLS/AUTH negotiation has completed on
    /// this connection.
    fn is_session_ready(&self) -> bool;

    /// Marks negotiation as complete (or stale).
    fn set_session_ready(&mut self, ready: bool);

    /// Sends QUIT and shuts the connection down.
    async fn close(&mut self) -> MailResult<()>;
}

enum TransportStream {
    Plain(BufReader<TcpStream>),
    #[cfg(feature = "rustls-tls")]
    Tls(Box<BufReader<tokio_rustls::client::TlsStream<TcpStream>>>),
    /// Transient marker while the stream is being upgraded.
    Detached,
}

/// TCP connection with optional TLS.
pub struct TcpTransport {
    stream: TransportStream,
    timeout: Duration,
    tls_enabled: bool,
    session_ready: bool,
    closed: bool,
    host: String,
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("host", &self.host)
            .field("tls_enabled", &self.tls_enabled)
            .field("session_ready", &self.session_ready)
            .finish()
    }
}

impl TcpTransport {
    /// Opens a connection to the relay and reads the greeting.
    ///
    /// With `secure` the TLS handshake happens before the greeting, as
    /// the first bytes on the wire.
    pub async fn connect(
        host: &str,
        port: u16,
        idle_timeout: Duration,
        secure: bool,
    ) -> MailResult<Self> {
        let address = format!("{}:{}", host, port);

        let stream = timeout(idle_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| {
                MailError::connection(format!("Connection to {} timed out", address))
                    .with_code("ETIMEDOUT")
                    .with_socket_state("connecting")
            })?
            .map_err(|e| map_io_error(e, &address))?;

        stream.set_nodelay(true).ok();

        let mut transport = Self {
            stream: TransportStream::Plain(BufReader::new(stream)),
            timeout: idle_timeout,
            tls_enabled: false,
            session_ready: false,
            closed: false,
            host: host.to_string(),
        };

        if secure {
            transport.upgrade_tls(host).await?;
        }

        let greeting = transport.read_response().await?;
        if !greeting.is_success() {
            return Err(greeting.to_error().with_socket_state("greeting"));
        }

        Ok(transport)
    }

    async fn read_response_inner<R: AsyncBufReadExt + Unpin>(
        reader: &mut R,
        deadline: Duration,
    ) -> MailResult<SmtpResponse> {
        let mut lines = Vec::new();

        loop {
            let mut line = String::new();

            let read = timeout(deadline, reader.read_line(&mut line))
                .await
                .map_err(|_| MailError::timeout("Read timed out"))?
                .map_err(|e| MailError::connection(format!("Read error: {}", e)))?;

            if read == 0 {
                return Err(MailError::connection("Server closed connection")
                    .with_socket_state("closed"));
            }

            let line = line.trim_end().to_string();

            // Continuation lines carry a hyphen after the status code.
            let is_continuation = line.len() >= 4 && line.as_bytes()[3] == b'-';
            lines.push(line);

            if !is_continuation {
                break;
            }
        }

        SmtpResponse::parse(&lines)
    }

    async fn write_all<W: AsyncWrite + Unpin>(
        writer: &mut W,
        data: &[u8],
        deadline: Duration,
    ) -> MailResult<()> {
        timeout(deadline, writer.write_all(data))
            .await
            .map_err(|_| MailError::timeout("Write timed out"))?
            .map_err(|e| MailError::connection(format!("Write error: {}", e)))?;

        timeout(deadline, writer.flush())
            .await
            .map_err(|_| MailError::timeout("Flush timed out"))?
            .map_err(|e| MailError::connection(format!("Flush error: {}", e)))?;

        Ok(())
    }
}

fn map_io_error(error: io::Error, address: &str) -> MailError {
    let err = match error.kind() {
        io::ErrorKind::ConnectionRefused => {
            MailError::connection(format!("Connection refused to {}", address))
        }
        io::ErrorKind::TimedOut => {
            MailError::connection(format!("Connection to {} timed out", address))
                .with_code("ETIMEDOUT")
        }
        io::ErrorKind::ConnectionReset => MailError::connection("Connection reset by server"),
        _ => MailError::connection(format!("Connection error: {}", error)),
    };
    err.with_socket_state("connecting")
}

#[cfg(feature = "rustls-tls")]
fn tls_client_config() -> MailResult<rustls::ClientConfig> {
    use std::sync::Arc;

    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    // AEAD suites only; under rustls this pins the session to TLS 1.3.
    let provider = rustls::crypto::CryptoProvider {
        cipher_suites: vec![
            rustls::crypto::ring::cipher_suite::TLS13_AES_128_GCM_SHA256,
            rustls::crypto::ring::cipher_suite::TLS13_AES_256_GCM_SHA384,
            rustls::crypto::ring::cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
        ],
        ..rustls::crypto::ring::default_provider()
    };

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| MailError::connection(format!("TLS configuration rejected: {}", e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(config)
}

#[async_trait]
impl SmtpTransport for TcpTransport {
    async fn send_command(&mut self, command: &SmtpCommand) -> MailResult<SmtpResponse> {
        let line = format!("{}\r\n", command.to_smtp_string());

        #[cfg(feature = "tracing")]
        tracing::debug!(command = %command.name(), "sending SMTP command");

        self.send_data(line.as_bytes()).await?;
        self.read_response().await
    }

    async fn send_data(&mut self, data: &[u8]) -> MailResult<()> {
        match &mut self.stream {
            TransportStream::Plain(stream) => {
                Self::write_all(stream.get_mut(), data, self.timeout).await
            }
            #[cfg(feature = "rustls-tls")]
            TransportStream::Tls(stream) => {
                Self::write_all(stream.get_mut(), data, self.timeout).await
            }
            TransportStream::Detached => Err(MailError::connection("Transport detached")),
        }
    }

    async fn read_response(&mut self) -> MailResult<SmtpResponse> {
        let response = match &mut self.stream {
            TransportStream::Plain(stream) => {
                Self::read_response_inner(stream, self.timeout).await?
            }
            #[cfg(feature = "rustls-tls")]
            TransportStream::Tls(stream) => {
                Self::read_response_inner(stream.as_mut(), self.timeout).await?
            }
            TransportStream::Detached => {
                return Err(MailError::connection("Transport detached"))
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(code = response.code, reply = %response.first_message(), "received SMTP reply");

        Ok(response)
    }

    async fn upgrade_tls(&mut self, host: &str) -> MailResult<()> {
        if self.tls_enabled {
            return Ok(());
        }

        #[cfg(feature = "rustls-tls")]
        {
            use rustls::pki_types::ServerName;
            use std::sync::Arc;

            let config = tls_client_config()?;
            let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
            let server_name = ServerName::try_from(host.to_string())
                .map_err(|_| MailError::connection(format!("Invalid server name: {}", host)))?;

            let tcp_stream =
                match std::mem::replace(&mut self.stream, TransportStream::Detached) {
                    TransportStream::Plain(reader) => reader.into_inner(),
                    other => {
                        self.stream = other;
                        return Err(MailError::connection("Connection already upgraded"));
                    }
                };

            let tls_stream = timeout(self.timeout, connector.connect(server_name, tcp_stream))
                .await
                .map_err(|_| {
                    MailError::connection("TLS handshake timed out").with_code("ETIMEDOUT")
                })?
                .map_err(|e| {
                    MailError::connection(format!("TLS handshake failed: {}", e))
                        .with_socket_state("tls_handshake")
                })?;

            self.stream = TransportStream::Tls(Box::new(BufReader::new(tls_stream)));
            self.tls_enabled = true;

            Ok(())
        }

        #[cfg(not(feature = "rustls-tls"))]
        {
            let _ = host;
            Err(MailError::connection("No TLS implementation available"))
        }
    }

    fn is_tls(&self) -> bool {
        self.tls_enabled
    }

    fn is_session_ready(&self) -> bool {
        self.session_ready
    }

    fn set_session_ready(&mut self, ready: bool) {
        self.session_ready = ready;
    }

    async fn close(&mut self) -> MailResult<()> {
        if !self.closed {
            let _ = self.send_data(b"QUIT\r\n").await;
            self.closed = true;
            self.session_ready = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn scripted_server(replies: Vec<&'static str>) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let mut replies = replies.into_iter();
            // Greeting first, then one reply per inbound line.
            if let Some(greeting) = replies.next() {
                socket.write_all(greeting.as_bytes()).await.ok();
            }
            for reply in replies {
                if socket.read(&mut buf).await.unwrap_or(0) == 0 {
                    break;
                }
                socket.write_all(reply.as_bytes()).await.ok();
            }
        });
        addr
    }

    #[tokio::test]
    async fn connect_reads_greeting() {
        let addr = scripted_server(vec!["220 relay ready\r\n", "250 OK\r\n"]).await;
        let mut transport = TcpTransport::connect(
            &addr.ip().to_string(),
            addr.port(),
            Duration::from_secs(2),
            false,
        )
        .await
        .unwrap();

        let reply = transport.send_command(&SmtpCommand::Noop).await.unwrap();
        assert_eq!(reply.code, 250);
        assert!(!transport.is_tls());
    }

    #[tokio::test]
    async fn multiline_replies_are_collected() {
        let addr = scripted_server(vec![
            "220 relay ready\r\n",
            "250-relay hello\r\n250-SIZE 10485760\r\n250 STARTTLS\r\n",
        ])
        .await;
        let mut transport = TcpTransport::connect(
            &addr.ip().to_string(),
            addr.port(),
            Duration::from_secs(2),
            false,
        )
        .await
        .unwrap();

        let reply = transport
            .send_command(&SmtpCommand::Ehlo("client.example.com".to_string()))
            .await
            .unwrap();
        assert_eq!(reply.code, 250);
        assert!(reply.is_multiline);
        assert_eq!(reply.message.len(), 3);
    }

    #[tokio::test]
    async fn refused_connection_is_connection_error() {
        // Port 1 is essentially never listening.
        let err = TcpTransport::connect("127.0.0.1", 1, Duration::from_secs(2), false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Connection);
    }

    #[tokio::test]
    async fn failed_greeting_is_rejected() {
        let addr = scripted_server(vec!["554 no service\r\n"]).await;
        let err = TcpTransport::connect(
            &addr.ip().to_string(),
            addr.port(),
            Duration::from_secs(2),
            false,
        )
        .await
        .unwrap_err();
        assert!(err.server_response().unwrap_or_default().contains("554"));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let err = TcpTransport::connect(
            &addr.ip().to_string(),
            addr.port(),
            Duration::from_millis(200),
            false,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "ETIMEDOUT");
    }
}
