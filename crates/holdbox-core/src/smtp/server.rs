//! SMTP capture server

use crate::smtp::SmtpHandler;
use holdbox_common::config::{Config, SmtpConfig};
use holdbox_common::Result;
use holdbox_storage::MessageRepository;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// SMTP capture server
pub struct SmtpServer {
    config: SmtpConfig,
    hostname: String,
    messages: MessageRepository,
    connection_semaphore: Arc<Semaphore>,
}

impl SmtpServer {
    /// Create a new SMTP server
    pub fn new(config: &Config, messages: MessageRepository) -> Self {
        Self {
            config: config.smtp.clone(),
            hostname: config.server.hostname.clone(),
            messages,
            connection_semaphore: Arc::new(Semaphore::new(config.smtp.max_connections.max(1))),
        }
    }

    /// Bind the configured address and serve until the task is aborted
    pub async fn run(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("SMTP capture listening on {}", addr);

        self.serve(listener).await
    }

    /// Accept sessions on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let permit = match self.connection_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            warn!("Max connections reached, rejecting {}", peer_addr);
                            continue;
                        }
                    };

                    let handler = SmtpHandler::new(
                        self.config.clone(),
                        self.hostname.clone(),
                        self.messages.clone(),
                        peer_addr,
                    );

                    tokio::spawn(async move {
                        if let Err(e) = handler.handle(stream).await {
                            error!("SMTP session error from {}: {}", peer_addr, e);
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdbox_common::types::MessageRef;
    use holdbox_storage::repository::MessageRepositoryTrait;
    use holdbox_storage::DatabasePool;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    struct Client {
        reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
        writer: tokio::net::tcp::OwnedWriteHalf,
    }

    impl Client {
        async fn connect(addr: std::net::SocketAddr) -> Self {
            let (reader, writer) = TcpStream::connect(addr).await.unwrap().into_split();
            Self {
                reader: BufReader::new(reader),
                writer,
            }
        }

        /// Read one reply, following multi-line continuations
        async fn reply(&mut self) -> String {
            let mut reply = String::new();
            loop {
                let mut line = String::new();
                self.reader.read_line(&mut line).await.unwrap();
                reply.push_str(&line);
                if line.as_bytes().get(3) != Some(&b'-') {
                    return reply;
                }
            }
        }

        async fn send(&mut self, data: &[u8]) -> String {
            self.writer.write_all(data).await.unwrap();
            self.reply().await
        }
    }

    async fn start(config: Config) -> (std::net::SocketAddr, MessageRepository) {
        let db = DatabasePool::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let messages = MessageRepository::new(db);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = SmtpServer::new(&config, messages.clone());
        tokio::spawn(async move { server.serve(listener).await });

        (addr, messages)
    }

    #[tokio::test]
    async fn test_capture_over_loopback() {
        let (addr, messages) = start(Config::default()).await;
        let mut client = Client::connect(addr).await;

        assert!(client.reply().await.starts_with("220 localhost ESMTP"));
        let ehlo = client.send(b"EHLO client.test\r\n").await;
        assert!(ehlo.contains("250-SIZE 26214400"));
        assert!(client.send(b"MAIL FROM:<alice@example.com>\r\n").await.starts_with("250"));
        assert!(client.send(b"RCPT TO:<bob@example.com>\r\n").await.starts_with("250"));
        assert!(client.send(b"RCPT TO:<anyone@anywhere.test>\r\n").await.starts_with("250"));
        assert!(client.send(b"DATA\r\n").await.starts_with("354"));

        let reply = client
            .send(b"From: alice@example.com\r\nTo: bob@example.com\r\nSubject: Captured\r\n\r\n..dot\r\nbody\r\n.\r\n")
            .await;
        assert!(reply.starts_with("250 2.0.0 OK: queued as"), "{}", reply);
        assert!(client.send(b"QUIT\r\n").await.starts_with("221"));

        assert_eq!(messages.count().await.unwrap(), 1);
        let raw = messages.load_raw(MessageRef::Latest).await.unwrap().unwrap();
        assert_eq!(
            raw,
            b"From: alice@example.com\r\nTo: bob@example.com\r\nSubject: Captured\r\n\r\n.dot\r\nbody\r\n".to_vec()
        );
    }

    #[tokio::test]
    async fn test_bad_sequence_and_limits() {
        let mut config = Config::default();
        config.smtp.max_recipients = 1;
        config.smtp.max_message_size = 32;
        let (addr, messages) = start(config).await;
        let mut client = Client::connect(addr).await;

        client.reply().await;
        assert!(client.send(b"MAIL FROM:<a@example.com>\r\n").await.starts_with("503"));
        assert!(client.send(b"HELO client.test\r\n").await.starts_with("250"));
        assert!(client.send(b"DATA\r\n").await.starts_with("503"));
        assert!(client.send(b"AUTH PLAIN\r\n").await.starts_with("502"));
        assert!(client.send(b"MAIL FROM:<>\r\n").await.starts_with("250"));
        assert!(client.send(b"RCPT TO:<b@example.com>\r\n").await.starts_with("250"));
        assert!(client.send(b"RCPT TO:<c@example.com>\r\n").await.starts_with("452"));
        assert!(client.send(b"DATA\r\n").await.starts_with("354"));
        assert!(client
            .send(b"Subject: this message is far too long for the limit\r\n\r\nbody\r\n.\r\n")
            .await
            .starts_with("552"));
        assert!(client.send(b"NOOP\r\n").await.starts_with("250"));
        assert!(client.send(b"BOGUS\r\n").await.starts_with("500"));

        assert_eq!(messages.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_overlong_command_line_is_rejected() {
        let (addr, _) = start(Config::default()).await;
        let mut client = Client::connect(addr).await;

        client.reply().await;
        let mut line = b"HELO ".to_vec();
        line.extend_from_slice(&[b'x'; 2048]);
        line.extend_from_slice(b"\r\n");

        let reply = client.send(&line).await;
        assert!(reply.starts_with("500 5.5.2 Line too long"), "{}", reply);
        assert!(client.send(b"NOOP\r\n").await.starts_with("250"));
        assert!(client.send(b"QUIT\r\n").await.starts_with("221"));
    }
}
