//! Live sessions
//!
//! [`Session`] is the seam between the execution engine and the network:
//! the engine only ever reads and writes whole lines (or raw binary
//! payloads). [`TcpSession`] is the production implementation — a
//! line-buffered TCP client with CRLF framing, a spin-wait refill loop,
//! and an optional synthetic first response ("shebang").

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use crate::element::Attachment;
use crate::error::HarnessError;

/// Milliseconds to sleep between empty reads while waiting for input.
const SHORT_WAIT_FOR_INPUT: Duration = Duration::from_millis(10);

const CRLF: &[u8] = b"\r\n";

const READ_BUFFER_SIZE: usize = 2048;

/// One live connection, identified by its script alias.
pub trait Session {
    /// Open the connection. Must be called before any read or write.
    fn start(&mut self) -> Result<(), HarnessError>;

    /// Close the connection. Safe to call more than once; failures here
    /// are not fatal to the run.
    fn stop(&mut self) -> Result<(), HarnessError>;

    /// Read one line, with CR dropped and LF consumed.
    fn read_line(&mut self) -> Result<String, HarnessError>;

    /// Write a line followed by CRLF.
    fn write_line(&mut self, line: &str) -> Result<(), HarnessError>;

    /// Write a raw payload followed by CRLF.
    fn write_binary(&mut self, attachment: &Attachment) -> Result<(), HarnessError>;
}

/// Descriptor for one remote endpoint a script may talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHost {
    pub alias: String,
    pub host: String,
    pub port: u16,
}

impl std::str::FromStr for RemoteHost {
    type Err = String;

    /// Parses the `alias=host:port` form used on the command line.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (alias, addr) = s
            .split_once('=')
            .ok_or_else(|| format!("expected alias=host:port, got '{}'", s))?;
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| format!("expected alias=host:port, got '{}'", s))?;
        if alias.trim().is_empty() {
            return Err(format!("empty alias in '{}'", s));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| format!("invalid port in '{}'", s))?;
        Ok(RemoteHost {
            alias: alias.trim().to_string(),
            host: host.to_string(),
            port,
        })
    }
}

/// A line-buffered TCP client session.
///
/// Reads are non-blocking under the hood: when the internal buffer runs
/// dry mid-line the socket is polled in a spin-wait loop with a short
/// fixed sleep, blocking indefinitely on a silent peer unless a read
/// deadline was configured. Text is treated as single-byte ASCII; binary
/// payloads go through [`Session::write_binary`] untouched.
pub struct TcpSession {
    alias: String,
    host: String,
    port: u16,
    shebang: Option<String>,
    read_timeout: Option<Duration>,
    stream: Option<TcpStream>,
    buf: Vec<u8>,
    pos: usize,
    filled: usize,
    first: bool,
    lines_in: u64,
    lines_out: u64,
}

impl TcpSession {
    pub fn new(host: &RemoteHost, shebang: Option<String>, read_timeout: Option<Duration>) -> Self {
        Self {
            alias: host.alias.clone(),
            host: host.host.clone(),
            port: host.port,
            shebang,
            read_timeout,
            stream: None,
            buf: vec![0; READ_BUFFER_SIZE],
            pos: 0,
            filled: 0,
            first: true,
            lines_in: 0,
            lines_out: 0,
        }
    }

    fn stream(&mut self) -> Result<&mut TcpStream, HarnessError> {
        self.stream
            .as_mut()
            .ok_or_else(|| HarnessError::transport("session not started"))
    }

    /// Fill the read buffer with at least one byte from the socket,
    /// spin-waiting while no input is available.
    fn refill(&mut self) -> Result<(), HarnessError> {
        let alias = self.alias.clone();
        let deadline = self.read_timeout.map(|t| Instant::now() + t);
        trace!(alias = %alias, "refilling read buffer");
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Err(HarnessError::transport("session not started"));
            };
            match stream.read(&mut self.buf) {
                Ok(0) => {
                    return Err(HarnessError::transport(format!(
                        "connection to '{}' closed by peer",
                        alias
                    )))
                }
                Ok(n) => {
                    self.pos = 0;
                    self.filled = n;
                    return Ok(());
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if let Some(deadline) = deadline {
                        if Instant::now() >= deadline {
                            return Err(HarnessError::transport(format!(
                                "read from '{}' timed out",
                                alias
                            )));
                        }
                    }
                    std::thread::sleep(SHORT_WAIT_FOR_INPUT);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    return Err(HarnessError::transport(format!(
                        "read from '{}' failed: {}",
                        alias, e
                    )))
                }
            }
        }
    }

    fn write_all_spin(&mut self, data: &[u8]) -> Result<(), HarnessError> {
        let alias = self.alias.clone();
        let stream = self.stream()?;
        let mut remaining = data;
        while !remaining.is_empty() {
            match stream.write(remaining) {
                Ok(0) => {
                    return Err(HarnessError::transport(format!(
                        "connection to '{}' closed during write",
                        alias
                    )))
                }
                Ok(n) => remaining = &remaining[n..],
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(SHORT_WAIT_FOR_INPUT)
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    return Err(HarnessError::transport(format!(
                        "write to '{}' failed: {}",
                        alias, e
                    )))
                }
            }
        }
        Ok(())
    }
}

impl Session for TcpSession {
    fn start(&mut self) -> Result<(), HarnessError> {
        info!(alias = %self.alias, host = %self.host, port = self.port, "connecting");
        let stream = TcpStream::connect((self.host.as_str(), self.port)).map_err(|e| {
            HarnessError::transport(format!(
                "cannot connect '{}' to {}:{}: {}",
                self.alias, self.host, self.port, e
            ))
        })?;
        // Non-blocking mode so the line reader can spin-wait on its own
        // fixed cadence instead of parking in the kernel.
        stream.set_nonblocking(true).map_err(|e| {
            HarnessError::transport(format!("cannot configure '{}': {}", self.alias, e))
        })?;
        self.stream = Some(stream);
        info!(alias = %self.alias, "connected");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), HarnessError> {
        if let Some(stream) = self.stream.take() {
            debug!(
                alias = %self.alias,
                lines_in = self.lines_in,
                lines_out = self.lines_out,
                "closing session"
            );
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, HarnessError> {
        let mut line = String::new();
        loop {
            if self.pos >= self.filled {
                self.refill()?;
            }
            let byte = self.buf[self.pos];
            self.pos += 1;
            match byte {
                b'\n' => break,
                b'\r' => {}
                other => line.push(other as char),
            }
        }
        self.lines_in += 1;
        if self.first {
            self.first = false;
            if let Some(ref shebang) = self.shebang {
                // The real greeting is still recorded for diagnostics.
                debug!(alias = %self.alias, real = %line, "first line replaced by shebang");
                let shebang = shebang.clone();
                info!(alias = %self.alias, "<- {}", shebang);
                return Ok(shebang);
            }
        }
        info!(alias = %self.alias, "<- {}", line);
        Ok(line)
    }

    fn write_line(&mut self, line: &str) -> Result<(), HarnessError> {
        info!(alias = %self.alias, "-> {}", line);
        // ASCII-only text: one byte per character.
        self.write_all_spin(line.as_bytes())?;
        self.write_all_spin(CRLF)?;
        self.lines_out += 1;
        Ok(())
    }

    fn write_binary(&mut self, attachment: &Attachment) -> Result<(), HarnessError> {
        info!(
            alias = %self.alias,
            "-> binary file ({} bytes): {}",
            attachment.data.len(),
            attachment.filename
        );
        self.write_all_spin(&attachment.data)?;
        self.write_all_spin(CRLF)?;
        self.lines_out += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;

    fn spawn_server(
        greeting: &'static [u8],
    ) -> (RemoteHost, std::thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket.write_all(greeting).unwrap();
            let mut received = Vec::new();
            let mut reader = BufReader::new(socket.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap_or(0) > 0 {
                received.push(line.trim_end().to_string());
                line.clear();
            }
            received
        });
        (
            RemoteHost {
                alias: "test".to_string(),
                host: "127.0.0.1".to_string(),
                port,
            },
            handle,
        )
    }

    #[test]
    fn test_read_line_strips_crlf() {
        let (host, server) = spawn_server(b"* OK ready\r\nsecond\r\n");
        let mut session = TcpSession::new(&host, None, Some(Duration::from_secs(5)));
        session.start().unwrap();
        assert_eq!(session.read_line().unwrap(), "* OK ready");
        assert_eq!(session.read_line().unwrap(), "second");
        session.stop().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn test_shebang_replaces_first_line_only() {
        let (host, server) = spawn_server(b"real greeting\r\nsecond\r\n");
        let mut session = TcpSession::new(
            &host,
            Some("* OK IMAP4rev1 Server ready".to_string()),
            Some(Duration::from_secs(5)),
        );
        session.start().unwrap();
        assert_eq!(session.read_line().unwrap(), "* OK IMAP4rev1 Server ready");
        assert_eq!(session.read_line().unwrap(), "second");
        session.stop().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn test_write_line_appends_crlf() {
        let (host, server) = spawn_server(b"hi\r\n");
        let mut session = TcpSession::new(&host, None, Some(Duration::from_secs(5)));
        session.start().unwrap();
        session.read_line().unwrap();
        session.write_line("a001 LOGIN").unwrap();
        session
            .write_binary(&Attachment {
                data: b"payload".to_vec(),
                filename: "f.bin".to_string(),
            })
            .unwrap();
        session.stop().unwrap();
        let received = server.join().unwrap();
        assert_eq!(received, vec!["a001 LOGIN", "payload"]);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (host, server) = spawn_server(b"hi\r\n");
        let mut session = TcpSession::new(&host, None, Some(Duration::from_secs(5)));
        session.start().unwrap();
        session.read_line().unwrap();
        session.stop().unwrap();
        session.stop().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn test_connect_failure_is_transport_error() {
        // A port nothing listens on: bind then drop to reserve-and-free.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let host = RemoteHost {
            alias: "dead".to_string(),
            host: "127.0.0.1".to_string(),
            port,
        };
        let mut session = TcpSession::new(&host, None, None);
        assert!(session.start().is_err());
    }

    #[test]
    fn test_remote_host_parsing() {
        let host: RemoteHost = "imap=mail.example.org:143".parse().unwrap();
        assert_eq!(host.alias, "imap");
        assert_eq!(host.host, "mail.example.org");
        assert_eq!(host.port, 143);
        assert!("noequals".parse::<RemoteHost>().is_err());
        assert!("a=hostonly".parse::<RemoteHost>().is_err());
        assert!("=h:1".parse::<RemoteHost>().is_err());
        assert!("a=h:notaport".parse::<RemoteHost>().is_err());
    }
}
