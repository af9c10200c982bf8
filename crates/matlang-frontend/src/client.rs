//! TCP client for the parser subprocess.
//!
//! A single long-lived connection carries null-terminated XML command
//! frames. A mutex serializes each send+receive pair; a background
//! worker sends `<heartbeat></heartbeat>` every two seconds between
//! commands so the front end keeps the session alive. Connecting retries
//! up to five times, one second apart, to give a freshly spawned
//! subprocess time to open its listener.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::FrontendError;
use crate::xml;

/// Default front-end port.
pub const DEFAULT_PORT: u16 = 47146;
/// Default front-end host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_RETRY: Duration = Duration::from_secs(1);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

/// Connection to the parser front-end.
#[derive(Debug)]
pub struct ParserClient {
    stream: Arc<Mutex<TcpStream>>,
    heartbeat_stop: Sender<()>,
    heartbeat: Option<JoinHandle<()>>,
}

impl ParserClient {
    /// Connects to a front-end at `host:port`, retrying while the
    /// subprocess starts up, and spawns the heartbeat worker.
    pub fn connect(host: &str, port: u16) -> Result<ParserClient, FrontendError> {
        let address = format!("{}:{}", host, port);
        let mut last_err = None;
        let mut stream = None;
        for attempt in 1..=CONNECT_ATTEMPTS {
            match TcpStream::connect(&address) {
                Ok(s) => {
                    debug!(%address, attempt, "connected to parser front-end");
                    stream = Some(s);
                    break;
                }
                Err(e) => {
                    debug!(%address, attempt, error = %e, "connect attempt failed");
                    last_err = Some(e);
                    thread::sleep(CONNECT_RETRY);
                }
            }
        }
        let stream = stream.ok_or_else(|| FrontendError::ConnectFailed {
            address: address.clone(),
            reason: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts made".to_string()),
        })?;

        let stream = Arc::new(Mutex::new(stream));
        let (heartbeat_stop, stop_rx) = mpsc::channel();
        let hb_stream = Arc::clone(&stream);
        let heartbeat = thread::spawn(move || loop {
            match stop_rx.recv_timeout(HEARTBEAT_INTERVAL) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => {
                    let mut guard = hb_stream.lock().expect("parser stream poisoned");
                    if let Err(e) = send_frame(&mut guard, "<heartbeat></heartbeat>") {
                        warn!(error = %e, "heartbeat send failed");
                        return;
                    }
                }
            }
        });

        Ok(ParserClient {
            stream,
            heartbeat_stop,
            heartbeat: Some(heartbeat),
        })
    }

    /// Asks the front end to parse a file; returns the raw XML reply.
    pub fn parse_file(&self, path: &str) -> Result<String, FrontendError> {
        self.send_command(&format!("<parsefile>{}</parsefile>", xml::escape(path)))
    }

    /// Asks the front end to parse source text; returns the raw XML
    /// reply.
    pub fn parse_text(&self, source: &str) -> Result<String, FrontendError> {
        self.send_command(&format!("<parsetext>{}</parsetext>", xml::escape(source)))
    }

    /// Asks the front end to terminate.
    pub fn shutdown(&self) -> Result<String, FrontendError> {
        self.send_command("<shutdown/>")
    }

    /// Sends one command and reads its reply under the connection lock,
    /// so command/heartbeat traffic never interleaves.
    fn send_command(&self, command: &str) -> Result<String, FrontendError> {
        let mut guard = self.stream.lock().expect("parser stream poisoned");
        send_frame(&mut guard, command)?;
        read_frame(&mut guard)
    }
}

impl Drop for ParserClient {
    fn drop(&mut self) {
        let _ = self.heartbeat_stop.send(());
        if let Some(handle) = self.heartbeat.take() {
            let _ = handle.join();
        }
    }
}

/// Writes one null-terminated frame.
fn send_frame(stream: &mut TcpStream, payload: &str) -> std::io::Result<()> {
    stream.write_all(payload.as_bytes())?;
    stream.write_all(&[0])?;
    stream.flush()
}

/// Reads bytes until the null terminator.
fn read_frame(stream: &mut TcpStream) -> Result<String, FrontendError> {
    let mut out = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte)?;
        if n == 0 {
            return Err(FrontendError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "parser connection closed mid-reply",
            )));
        }
        if byte[0] == 0 {
            break;
        }
        out.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    /// A tiny in-process stand-in for the front end: replies to every
    /// non-heartbeat frame with a canned document.
    fn spawn_fake_frontend(reply: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test listener");
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (mut sock, _) = listener.accept().expect("accept");
            loop {
                let mut buf = Vec::new();
                let mut byte = [0u8; 1];
                loop {
                    match sock.read(&mut byte) {
                        Ok(0) | Err(_) => return,
                        Ok(_) if byte[0] == 0 => break,
                        Ok(_) => buf.push(byte[0]),
                    }
                }
                let frame = String::from_utf8_lossy(&buf);
                if frame.starts_with("<heartbeat") {
                    continue;
                }
                if frame.starts_with("<shutdown") {
                    let _ = sock.write_all(b"<ok/>\0");
                    return;
                }
                let _ = sock.write_all(reply.as_bytes());
                let _ = sock.write_all(&[0]);
            }
        });
        port
    }

    #[test]
    fn parse_text_round_trip() {
        let port = spawn_fake_frontend("<CompilationUnits></CompilationUnits>");
        let client = ParserClient::connect(DEFAULT_HOST, port).unwrap();
        let reply = client.parse_text("x = 1;").unwrap();
        assert!(reply.contains("CompilationUnits"));
    }

    #[test]
    fn commands_escape_payloads() {
        let port = spawn_fake_frontend("<CompilationUnits></CompilationUnits>");
        let client = ParserClient::connect(DEFAULT_HOST, port).unwrap();
        // A path with XML metacharacters must not corrupt the frame.
        let reply = client.parse_file("dir/<odd>&name.m").unwrap();
        assert!(reply.contains("CompilationUnits"));
    }

    #[test]
    fn connect_failure_reports_address() {
        // A port with nothing listening; keep retries cheap by using a
        // port in the dynamic range that is almost surely closed.
        let err = ParserClient::connect("127.0.0.1", 1).unwrap_err();
        match err {
            FrontendError::ConnectFailed { address, .. } => {
                assert!(address.contains(":1"));
            }
            other => panic!("expected ConnectFailed, got {:?}", other),
        }
    }
}
