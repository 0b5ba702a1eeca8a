//! Server lifecycle: wires the reactor, worker and sender threads together and owns their
//! shutdown ordering. Grounded on the single `Endpoint` + single-threaded game-loop shape the
//! teacher used to drive `neutronium::net`, split across three threads the way the design notes
//! call for instead of one tick-driven loop.

use crate::codec;
use crate::queue::BoundedQueue;
use crate::reactor::IoReactor;
use crate::roster::ClientRoster;
use crate::sender::{self, SenderHandle};
use crate::strategy::{self, StrategySlot};
use crate::task::{InboundTask, OutboundTask};
use crate::worker::{self, MessageHandler};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use wiremesh_support::logging::Logger;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Size, in bytes, of each read into the reactor's per-event scratch buffer.
    pub read_buffer_size: usize,
    pub inbound_queue_capacity: usize,
    pub outbound_queue_capacity: usize,
    /// Strategy code advertised to every client during the post-accept handshake.
    pub default_strategy: u32,
    pub poll_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            read_buffer_size: codec::DEFAULT_FRAME_CAPACITY,
            inbound_queue_capacity: 1024,
            outbound_queue_capacity: 1024,
            default_strategy: strategy::STRATEGY_XOR,
            poll_timeout: Duration::from_millis(100),
        }
    }
}

#[derive(Debug)]
pub enum ServerError {
    Bind(io::Error),
    Io(io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Bind(err) => write!(f, "failed to bind listener: {}", err),
            ServerError::Io(err) => write!(f, "i/o error while running: {}", err),
        }
    }
}

impl std::error::Error for ServerError {}

/// A cheap-to-clone handle for interacting with a running (or about-to-run) server from
/// outside the worker thread -- sending, broadcasting, swapping the cipher strategy, or just
/// checking how many peers are connected.
#[derive(Clone)]
pub struct ServerHandle {
    sender: SenderHandle,
    roster: Arc<ClientRoster>,
    strategy: Arc<StrategySlot>,
}

impl ServerHandle {
    pub fn send(&self, peer: crate::roster::PeerId, target: codec::Target, body: &[u8]) -> bool {
        self.sender.send(peer, target, body)
    }

    pub fn broadcast(&self, target: codec::Target, body: &[u8]) -> bool {
        self.sender.broadcast(target, body)
    }

    pub fn set_strategy(&self, code: u32) {
        self.strategy.set(strategy::resolve(code));
    }

    pub fn client_count(&self) -> usize {
        self.roster.len()
    }
}

pub struct Server {
    reactor: IoReactor,
    inbound: Arc<BoundedQueue<InboundTask>>,
    outbound: Arc<BoundedQueue<OutboundTask>>,
    roster: Arc<ClientRoster>,
    strategy: Arc<StrategySlot>,
    log: Logger,
}

impl Server {
    pub fn bind(addr: SocketAddr, config: ServerConfig, log: Logger) -> Result<Server, ServerError> {
        let roster = Arc::new(ClientRoster::new());
        let inbound = Arc::new(BoundedQueue::new(config.inbound_queue_capacity));
        let outbound = Arc::new(BoundedQueue::new(config.outbound_queue_capacity));
        // Seed the live cipher with the same code advertised in the handshake frame below --
        // otherwise a client that honors the handshake and the server's own worker/sender would
        // disagree about which cipher is in effect from the very first post-handshake packet.
        let strategy = Arc::new(StrategySlot::new(strategy::resolve(config.default_strategy)));

        let reactor = IoReactor::bind(
            addr,
            config.read_buffer_size,
            config.poll_timeout,
            config.default_strategy,
            roster.clone(),
            inbound.clone(),
            log.clone(),
        )
        .map_err(ServerError::Bind)?;

        Ok(Server {
            reactor,
            inbound,
            outbound,
            roster,
            strategy,
            log,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.reactor.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            sender: SenderHandle::new(self.outbound.clone()),
            roster: self.roster.clone(),
            strategy: self.strategy.clone(),
        }
    }

    pub fn client_count(&self) -> usize {
        self.roster.len()
    }

    /// Runs the server until `exit` is set: the `Running -> Draining` transition. Returns a
    /// [`DrainingServer`] once the reactor stops accepting new readiness events; the worker and
    /// sender threads are still alive at that point; call [`DrainingServer::shutdown`] to join
    /// them and release the roster's sockets (the `Draining -> Terminated` transition).
    pub fn run<H: MessageHandler>(
        mut self,
        handler: H,
        exit: &AtomicBool,
    ) -> Result<DrainingServer, ServerError> {
        let sender_for_worker = SenderHandle::new(self.outbound.clone());

        let worker_thread = {
            let inbound = self.inbound.clone();
            let strategy = self.strategy.clone();
            let log = self.log.clone();
            thread::spawn(move || worker::run(inbound, strategy, sender_for_worker, handler, log))
        };

        let sender_thread = {
            let outbound = self.outbound.clone();
            let roster = self.roster.clone();
            let strategy = self.strategy.clone();
            let log = self.log.clone();
            thread::spawn(move || sender::run(outbound, roster, strategy, log))
        };

        self.reactor.run_until(exit).map_err(ServerError::Io)?;

        Ok(DrainingServer {
            inbound: self.inbound,
            outbound: self.outbound,
            roster: self.roster,
            worker_thread: Some(worker_thread),
            sender_thread: Some(sender_thread),
        })
    }
}

/// A server whose reactor has stopped but whose worker and sender threads (and roster sockets)
/// are still live. Produced by [`Server::run`]; call [`shutdown`](Self::shutdown) to complete
/// the `Draining -> Terminated` transition. Dropping without calling it runs the same teardown,
/// so shutdown is never skipped, just possibly implicit.
pub struct DrainingServer {
    inbound: Arc<BoundedQueue<InboundTask>>,
    outbound: Arc<BoundedQueue<OutboundTask>>,
    roster: Arc<ClientRoster>,
    worker_thread: Option<JoinHandle<()>>,
    sender_thread: Option<JoinHandle<()>>,
}

impl DrainingServer {
    /// Poisons both queues, joins the worker and sender threads, and closes every socket still
    /// on the roster.
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        self.inbound.try_enqueue(InboundTask::Poison);
        self.outbound.try_enqueue(OutboundTask::Poison);

        if let Some(worker_thread) = self.worker_thread.take() {
            worker_thread.join().expect("worker thread panicked");
        }
        if let Some(sender_thread) = self.sender_thread.take() {
            sender_thread.join().expect("sender thread panicked");
        }

        for handle in self.roster.clear() {
            let _ = handle.writer.shutdown(std::net::Shutdown::Both);
        }
    }
}

impl Drop for DrainingServer {
    fn drop(&mut self) {
        self.teardown();
    }
}
