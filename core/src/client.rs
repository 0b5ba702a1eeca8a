//! Client-side reconnect/handshake/receive state machine. Unlike the rest of the pipeline this
//! has no direct teacher analogue -- `neutronium::net` is server-only -- so it borrows its
//! texture from the reactor/channel code (blocking read-to-completion framing, the same codec,
//! the same strategy registry) while the reconnect loop itself follows the simple
//! connect -> handshake -> run -> reset cycle the design notes call for.

use crate::codec::{self, Target};
use crate::strategy::{StrategyPair, StrategySlot};
use byteorder::{BigEndian, ByteOrder};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use wiremesh_support::logging::{info, warn, Logger};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub reconnect_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            reconnect_backoff: Duration::from_secs(2),
        }
    }
}

#[derive(Debug)]
pub enum ClientError {
    Io(io::Error),
    Codec(codec::CodecError),
    UnexpectedTarget,
    BadHandshakeBody,
    FrameTooLarge,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Io(err) => write!(f, "i/o error: {}", err),
            ClientError::Codec(err) => write!(f, "codec error: {}", err),
            ClientError::UnexpectedTarget => write!(f, "handshake arrived on an unexpected target"),
            ClientError::BadHandshakeBody => write!(f, "handshake body was not a 4-byte strategy code"),
            ClientError::FrameTooLarge => write!(f, "frame exceeds the maximum frame size"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        ClientError::Io(err)
    }
}

fn read_frame(stream: &TcpStream, buf: &mut [u8]) -> Result<usize, ClientError> {
    let mut reader = stream;
    reader.read_exact(&mut buf[..codec::HEADER_SIZE])?;
    let total_len = codec::peek_total_len(&buf[..codec::HEADER_SIZE]) as usize;
    if total_len < codec::MIN_FRAME_SIZE || total_len > buf.len() {
        return Err(ClientError::FrameTooLarge);
    }
    reader.read_exact(&mut buf[codec::HEADER_SIZE..total_len])?;
    Ok(total_len)
}

fn handshake(stream: &TcpStream) -> Result<StrategyPair, ClientError> {
    let mut buf = [0u8; codec::DEFAULT_FRAME_CAPACITY];
    let total_len = read_frame(stream, &mut buf)?;
    let frame = codec::parse(&mut buf[..total_len], None).map_err(ClientError::Codec)?;
    if frame.target != codec::SEC_ARG {
        return Err(ClientError::UnexpectedTarget);
    }
    if frame.body.len() != 4 {
        return Err(ClientError::BadHandshakeBody);
    }
    let code = BigEndian::read_u32(frame.body);
    Ok(crate::strategy::resolve(code))
}

fn receive_loop<H>(
    stream: &TcpStream,
    strategy: &StrategySlot,
    handler: &mut H,
    log: &Logger,
) where
    H: FnMut(Target, &[u8]),
{
    let mut buf = [0u8; codec::DEFAULT_FRAME_CAPACITY];
    loop {
        let total_len = match read_frame(stream, &mut buf) {
            Ok(len) => len,
            Err(err) => {
                info!(log, "connection reset"; "error" => %err);
                return;
            }
        };
        let decrypt = strategy.get().decrypt;
        match codec::parse(&mut buf[..total_len], Some(decrypt)) {
            Ok(frame) => handler(frame.target, frame.body),
            Err(err) => {
                warn!(log, "dropping malformed frame from server"; "error" => %err);
                return;
            }
        }
    }
}

fn manager_loop<H>(
    addr: SocketAddr,
    config: ClientConfig,
    running: Arc<AtomicBool>,
    connection: Arc<Mutex<Option<TcpStream>>>,
    strategy: Arc<StrategySlot>,
    mut handler: H,
    log: Logger,
) where
    H: FnMut(Target, &[u8]) + Send + 'static,
{
    while running.load(Ordering::Acquire) {
        let stream = match TcpStream::connect(addr) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(log, "connect failed, retrying"; "error" => %err);
                thread::sleep(config.reconnect_backoff);
                continue;
            }
        };

        let pair = match handshake(&stream) {
            Ok(pair) => pair,
            Err(err) => {
                warn!(log, "handshake failed, retrying"; "error" => %err);
                let _ = stream.shutdown(Shutdown::Both);
                thread::sleep(config.reconnect_backoff);
                continue;
            }
        };
        strategy.set(pair);
        info!(log, "connected"; "strategy" => pair.code);

        match stream.try_clone() {
            Ok(publish) => *connection.lock().unwrap() = Some(publish),
            Err(err) => {
                warn!(log, "failed to clone stream for sending"; "error" => %err);
                thread::sleep(config.reconnect_backoff);
                continue;
            }
        }

        receive_loop(&stream, &strategy, &mut handler, &log);

        *connection.lock().unwrap() = None;
        strategy.set(StrategyPair::plaintext());

        if running.load(Ordering::Acquire) {
            thread::sleep(config.reconnect_backoff);
        }
    }
}

/// A reconnecting TCP client running its state machine on a dedicated background thread.
/// `send` blocks only on the internal connection mutex, never on the network itself beyond
/// whatever the OS socket buffer does.
pub struct Client {
    running: Arc<AtomicBool>,
    connection: Arc<Mutex<Option<TcpStream>>>,
    strategy: Arc<StrategySlot>,
    thread: Option<JoinHandle<()>>,
}

impl Client {
    pub fn connect<H>(addr: SocketAddr, config: ClientConfig, handler: H, log: Logger) -> Client
    where
        H: FnMut(Target, &[u8]) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let connection = Arc::new(Mutex::new(None));
        let strategy = Arc::new(StrategySlot::new(StrategyPair::plaintext()));

        let thread = {
            let running = running.clone();
            let connection = connection.clone();
            let strategy = strategy.clone();
            thread::spawn(move || {
                manager_loop(addr, config, running, connection, strategy, handler, log)
            })
        };

        Client {
            running,
            connection,
            strategy,
            thread: Some(thread),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.lock().unwrap().is_some()
    }

    /// Frames and sends `body` addressed to `target`. Fails with `NotConnected` while the
    /// client is reconnecting.
    pub fn send(&self, target: Target, body: &[u8]) -> io::Result<usize> {
        let encrypt = self.strategy.get().encrypt;
        let mut buf = [0u8; codec::DEFAULT_FRAME_CAPACITY];
        let len = codec::serialize(&mut buf, &target, body, Some(encrypt))
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;

        let mut guard = self.connection.lock().unwrap();
        match guard.as_mut() {
            Some(stream) => stream.write_all(&buf[..len]).map(|_| len),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "client is disconnected")),
        }
    }

    pub fn set_strategy(&self, code: u32) {
        self.strategy.set(crate::strategy::resolve(code));
    }

    /// Stops the reconnect loop and waits for the background thread to exit.
    pub fn disconnect(mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(stream) = self.connection.lock().unwrap().as_ref() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(stream) = self.connection.lock().unwrap().as_ref() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
