//! SMTP capture session handler

use holdbox_common::config::SmtpConfig;
use holdbox_common::types::{EmailAddress, Envelope};
use holdbox_common::{Error, Result};
use holdbox_storage::repository::MessageRepositoryTrait;
use holdbox_storage::MessageRepository;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Longest accepted command line, CRLF included (RFC 5321 4.5.3.1.4)
const MAX_COMMAND_LINE: usize = 512;

/// Largest single read inside DATA; longer lines arrive in several pieces
const MAX_DATA_CHUNK: usize = 1000;

/// SMTP session state
#[derive(Debug, Clone, Copy, PartialEq)]
enum SessionState {
    Connected,
    Greeted,
    MailFrom,
    RcptTo,
}

/// Result of reading a DATA section
#[derive(Debug, PartialEq)]
enum DataOutcome {
    Complete(Vec<u8>),
    TooLarge,
    TimedOut,
}

/// SMTP capture session handler
pub struct SmtpHandler {
    config: SmtpConfig,
    hostname: String,
    messages: MessageRepository,
    peer_addr: SocketAddr,
}

impl SmtpHandler {
    /// Create a new handler
    pub fn new(
        config: SmtpConfig,
        hostname: String,
        messages: MessageRepository,
        peer_addr: SocketAddr,
    ) -> Self {
        Self {
            config,
            hostname,
            messages,
            peer_addr,
        }
    }

    /// Handle an SMTP session
    pub async fn handle(self, stream: TcpStream) -> Result<()> {
        let (reader, writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut writer = BufWriter::new(writer);

        let mut state = SessionState::Connected;
        let mut envelope = Envelope {
            client_ip: Some(self.peer_addr.ip().to_string()),
            ..Envelope::default()
        };
        let idle = Duration::from_secs(self.config.connection_timeout_secs);

        self.send_response(&mut writer, 220, &format!("{} ESMTP Holdbox", self.hostname))
            .await?;

        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = read_bounded(&mut reader, &mut buf, MAX_COMMAND_LINE);
            let bytes_read = match timeout(idle, read).await {
                Ok(read) => read?,
                Err(_) => {
                    debug!("Client {} idle timeout", self.peer_addr);
                    self.send_response(&mut writer, 421, "4.4.2 Idle timeout, closing connection")
                        .await?;
                    break;
                }
            };

            if bytes_read == 0 {
                debug!("Client {} disconnected", self.peer_addr);
                break;
            }

            if bytes_read >= MAX_COMMAND_LINE && !buf.ends_with(b"\n") {
                warn!("Command line from {} exceeds {} bytes", self.peer_addr, MAX_COMMAND_LINE);
                if !skip_line(&mut reader, idle).await? {
                    break;
                }
                self.send_response(&mut writer, 500, "5.5.2 Line too long").await?;
                continue;
            }

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            debug!("SMTP from {}: {}", self.peer_addr, line);

            let (command, args) = parse_command(line);

            match command.to_uppercase().as_str() {
                "HELO" => {
                    envelope.helo = Some(args.to_string());
                    envelope.reset();
                    state = SessionState::Greeted;
                    self.send_response(&mut writer, 250, &format!("{} Hello {}", self.hostname, args))
                        .await?;
                }

                "EHLO" => {
                    envelope.helo = Some(args.to_string());
                    envelope.reset();
                    state = SessionState::Greeted;

                    let responses = [
                        format!("{} Hello {}", self.hostname, args),
                        format!("SIZE {}", self.config.max_message_size),
                        "8BITMIME".to_string(),
                        "PIPELINING".to_string(),
                        "ENHANCEDSTATUSCODES".to_string(),
                    ];

                    for (i, resp) in responses.iter().enumerate() {
                        if i == responses.len() - 1 {
                            self.send_response(&mut writer, 250, resp).await?;
                        } else {
                            self.send_response_continue(&mut writer, 250, resp).await?;
                        }
                    }
                }

                "MAIL" => {
                    if state != SessionState::Greeted {
                        self.send_response(&mut writer, 503, "5.5.1 Bad sequence of commands")
                            .await?;
                        continue;
                    }

                    if let Some(from_addr) = parse_mail_from(args) {
                        envelope.from = from_addr;
                        state = SessionState::MailFrom;
                        self.send_response(&mut writer, 250, "2.1.0 OK").await?;
                    } else {
                        self.send_response(&mut writer, 501, "5.1.7 Bad sender address syntax")
                            .await?;
                    }
                }

                "RCPT" => {
                    if state != SessionState::MailFrom && state != SessionState::RcptTo {
                        self.send_response(&mut writer, 503, "5.5.1 Bad sequence of commands")
                            .await?;
                        continue;
                    }

                    if envelope.to.len() >= self.config.max_recipients {
                        self.send_response(&mut writer, 452, "4.5.3 Too many recipients")
                            .await?;
                        continue;
                    }

                    // Every recipient is captured; nothing is ever delivered.
                    if let Some(to_addr) = parse_rcpt_to(args) {
                        envelope.to.push(to_addr);
                        state = SessionState::RcptTo;
                        self.send_response(&mut writer, 250, "2.1.5 OK").await?;
                    } else {
                        self.send_response(&mut writer, 501, "5.1.3 Bad recipient address syntax")
                            .await?;
                    }
                }

                "DATA" => {
                    if state != SessionState::RcptTo || envelope.to.is_empty() {
                        self.send_response(&mut writer, 503, "5.5.1 Bad sequence of commands")
                            .await?;
                        continue;
                    }

                    self.send_response(&mut writer, 354, "Start mail input; end with <CRLF>.<CRLF>")
                        .await?;

                    match read_data(&mut reader, self.config.max_message_size, idle).await? {
                        DataOutcome::Complete(data) => match self.messages.create(&data).await {
                            Ok(stored) => {
                                info!(
                                    message_id = %stored.id,
                                    peer = %self.peer_addr,
                                    recipients = envelope.to.len(),
                                    size = data.len(),
                                    "Message captured"
                                );
                                self.send_response(
                                    &mut writer,
                                    250,
                                    &format!("2.0.0 OK: queued as {}", stored.id),
                                )
                                .await?;
                            }
                            Err(e) => {
                                warn!("Failed to store message: {}", e);
                                self.send_response(&mut writer, 451, "4.3.0 Temporary error")
                                    .await?;
                            }
                        },
                        DataOutcome::TooLarge => {
                            warn!("Message from {} exceeds size limit", self.peer_addr);
                            self.send_response(&mut writer, 552, "5.3.4 Message too big")
                                .await?;
                        }
                        DataOutcome::TimedOut => {
                            debug!("Client {} idle timeout during DATA", self.peer_addr);
                            self.send_response(&mut writer, 421, "4.4.2 Idle timeout, closing connection")
                                .await?;
                            break;
                        }
                    }

                    state = SessionState::Greeted;
                    envelope.reset();
                }

                "RSET" => {
                    envelope.reset();
                    if state != SessionState::Connected {
                        state = SessionState::Greeted;
                    }
                    self.send_response(&mut writer, 250, "2.0.0 OK").await?;
                }

                "NOOP" => {
                    self.send_response(&mut writer, 250, "2.0.0 OK").await?;
                }

                "QUIT" => {
                    self.send_response(&mut writer, 221, "2.0.0 Bye").await?;
                    break;
                }

                "VRFY" => {
                    self.send_response(&mut writer, 252, "2.5.2 Cannot VRFY user")
                        .await?;
                }

                "STARTTLS" | "AUTH" | "EXPN" => {
                    self.send_response(&mut writer, 502, "5.5.1 Command not implemented")
                        .await?;
                }

                _ => {
                    self.send_response(&mut writer, 500, "5.5.2 Command not recognized")
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// Send an SMTP response
    async fn send_response<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut BufWriter<W>,
        code: u16,
        message: &str,
    ) -> Result<()> {
        let response = format!("{} {}\r\n", code, message);
        writer.write_all(response.as_bytes()).await?;
        writer.flush().await?;
        debug!("SMTP to {}: {}", self.peer_addr, response.trim());
        Ok(())
    }

    /// Send a multi-line response (intermediate line)
    async fn send_response_continue<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut BufWriter<W>,
        code: u16,
        message: &str,
    ) -> Result<()> {
        let response = format!("{}-{}\r\n", code, message);
        writer.write_all(response.as_bytes()).await?;
        debug!("SMTP to {}: {}", self.peer_addr, response.trim());
        Ok(())
    }
}

/// Read up to `limit` bytes, stopping after the first `\n`
async fn read_bounded<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
) -> std::io::Result<usize> {
    AsyncReadExt::take(&mut *reader, limit as u64)
        .read_until(b'\n', buf)
        .await
}

/// Discard the rest of the current line.
///
/// Returns `false` if the client went away or stalled first.
async fn skip_line<R: AsyncBufRead + Unpin>(reader: &mut R, idle: Duration) -> Result<bool> {
    let mut scratch = Vec::with_capacity(MAX_COMMAND_LINE);
    loop {
        scratch.clear();
        match timeout(idle, read_bounded(reader, &mut scratch, MAX_COMMAND_LINE)).await {
            Ok(Ok(0)) | Err(_) => return Ok(false),
            Ok(Ok(_)) if scratch.ends_with(b"\n") => return Ok(true),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e.into()),
        }
    }
}

/// Read message data until `<CRLF>.<CRLF>`, undoing dot-stuffing.
///
/// Bytes are kept exactly as sent. Each read is bounded and subject to the
/// idle timeout. An oversized message is drained to its terminator so the
/// session can continue.
async fn read_data<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_size: usize,
    idle: Duration,
) -> Result<DataOutcome> {
    let mut data = Vec::new();
    let mut chunk = Vec::new();
    let mut too_large = false;
    let mut line_start = true;

    loop {
        chunk.clear();
        let read = read_bounded(reader, &mut chunk, MAX_DATA_CHUNK);
        let bytes_read = match timeout(idle, read).await {
            Ok(read) => read?,
            Err(_) => return Ok(DataOutcome::TimedOut),
        };

        if bytes_read == 0 {
            return Err(Error::Smtp("Connection closed during DATA".to_string()));
        }

        // Terminator and dot-stuffing only apply at the start of a line.
        let at_line_start = line_start;
        line_start = chunk.ends_with(b"\n");

        if at_line_start && (chunk == b".\r\n" || chunk == b".\n") {
            break;
        }

        if too_large {
            continue;
        }

        let bytes = if at_line_start && chunk.starts_with(b".") {
            &chunk[1..]
        } else {
            &chunk[..]
        };
        data.extend_from_slice(bytes);

        if data.len() > max_size {
            too_large = true;
            data = Vec::new();
        }
    }

    if too_large {
        Ok(DataOutcome::TooLarge)
    } else {
        Ok(DataOutcome::Complete(data))
    }
}

/// Parse an SMTP command line into command and arguments
fn parse_command(line: &str) -> (&str, &str) {
    match line.split_once(' ') {
        Some((command, args)) => (command, args.trim()),
        None => (line, ""),
    }
}

/// Extract the path from `<address> [params]` or a bare address
fn parse_path(addr_part: &str) -> Option<&str> {
    let addr_part = addr_part.trim();
    if addr_part.starts_with('<') {
        let end = addr_part.find('>')?;
        Some(&addr_part[1..end])
    } else {
        addr_part.split_whitespace().next()
    }
}

/// Parse MAIL FROM:<address> or MAIL FROM: <address>
fn parse_mail_from(args: &str) -> Option<Option<EmailAddress>> {
    let args = args.trim();
    let prefix = args.get(..5)?;
    if !prefix.eq_ignore_ascii_case("FROM:") {
        return None;
    }

    let email = parse_path(&args[5..])?;
    if email.is_empty() {
        // Null sender <>
        Some(None)
    } else {
        EmailAddress::parse(email).map(Some)
    }
}

/// Parse RCPT TO:<address>
fn parse_rcpt_to(args: &str) -> Option<EmailAddress> {
    let args = args.trim();
    let prefix = args.get(..3)?;
    if !prefix.eq_ignore_ascii_case("TO:") {
        return None;
    }

    EmailAddress::parse(parse_path(&args[3..])?)
}
