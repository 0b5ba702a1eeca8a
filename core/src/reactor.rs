//! The single-threaded, mio-driven readiness demultiplexer, grounded on
//! `neutronium::net::endpoint::Endpoint::sync` -- accept, read-to-`WouldBlock`, disconnect --
//! collapsed from the teacher's three-poll handshake/live/server split into one `Poll` since this
//! pipeline's handshake is a single immediate write rather than its own readiness-driven phase.

use crate::codec;
use crate::queue::BoundedQueue;
use crate::roster::{ClientRoster, PeerHandle, PeerId};
use crate::task::InboundTask;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremesh_support::logging::{info, warn, Logger};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const INGRESS_TIMEOUT: Duration = Duration::from_secs(60);
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(5);

struct Slot {
    stream: TcpStream,
    peer_id: PeerId,
    last_ingress: Instant,
}

/// Duplicates the underlying file descriptor so the reactor can keep reading non-blockingly
/// while the sender thread writes through an independently-owned handle. The duplicate shares
/// the same open file description as the original (and so the same O_NONBLOCK flag); the sender
/// treats `WouldBlock` on that handle as a drop, not a fatal error, to account for it.
fn duplicate_for_writer(stream: &TcpStream) -> io::Result<std::net::TcpStream> {
    let fd = unsafe { libc::dup(stream.as_raw_fd()) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { std::net::TcpStream::from_raw_fd(fd) })
}

pub struct IoReactor {
    listener: TcpListener,
    poll: Poll,
    events: Events,
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    next_peer_id: PeerId,
    roster: Arc<ClientRoster>,
    inbound: Arc<BoundedQueue<InboundTask>>,
    read_buffer_size: usize,
    poll_timeout: Duration,
    handshake_strategy_code: u32,
    last_housekeeping: Instant,
    log: Logger,
}

impl IoReactor {
    pub fn bind(
        addr: SocketAddr,
        read_buffer_size: usize,
        poll_timeout: Duration,
        handshake_strategy_code: u32,
        roster: Arc<ClientRoster>,
        inbound: Arc<BoundedQueue<InboundTask>>,
        log: Logger,
    ) -> io::Result<IoReactor> {
        let mut listener = TcpListener::bind(addr)?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(IoReactor {
            listener,
            poll,
            events: Events::with_capacity(1024),
            slots: Vec::new(),
            free: Vec::new(),
            next_peer_id: 0,
            roster,
            inbound,
            read_buffer_size,
            poll_timeout,
            handshake_strategy_code,
            last_housekeeping: Instant::now(),
            log,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the reactor loop until `exit` is set. Each iteration polls once, services ready
    /// sockets, then runs housekeeping if the interval has elapsed.
    pub fn run_until(&mut self, exit: &AtomicBool) -> io::Result<()> {
        while !exit.load(Ordering::Acquire) {
            self.poll.poll(&mut self.events, Some(self.poll_timeout))?;

            let tokens: Vec<Token> = self.events.iter().map(|e| e.token()).collect();
            for token in tokens {
                if token == LISTENER_TOKEN {
                    self.accept_loop();
                } else {
                    self.drain_peer(token.0);
                }
            }

            self.housekeeping();
        }
        Ok(())
    }

    fn accept_loop(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, addr)) => {
                    let _ = stream.set_nodelay(true);
                    let slot_id = self.free.pop().unwrap_or_else(|| {
                        self.slots.push(None);
                        self.slots.len() - 1
                    });
                    let token = Token(slot_id);

                    if let Err(err) = self
                        .poll
                        .registry()
                        .register(&mut stream, token, Interest::READABLE)
                    {
                        warn!(self.log, "failed to register accepted socket"; "error" => %err);
                        continue;
                    }

                    let writer = match duplicate_for_writer(&stream) {
                        Ok(writer) => writer,
                        Err(err) => {
                            warn!(self.log, "failed to duplicate accepted socket"; "error" => %err);
                            let _ = self.poll.registry().deregister(&mut stream);
                            continue;
                        }
                    };

                    let peer_id = self.next_peer_id;
                    self.next_peer_id += 1;

                    info!(self.log, "accepted connection"; "peer" => peer_id, "addr" => %addr);

                    self.roster.insert(PeerHandle { id: peer_id, writer });
                    self.slots[slot_id] = Some(Slot {
                        stream,
                        peer_id,
                        last_ingress: Instant::now(),
                    });
                    self.write_handshake(slot_id);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(self.log, "accept failed"; "error" => %err);
                    break;
                }
            }
        }
    }

    fn write_handshake(&mut self, slot_id: usize) {
        let mut buf = [0u8; codec::DEFAULT_FRAME_CAPACITY];
        let body = self.handshake_strategy_code.to_be_bytes();
        let len = codec::serialize(&mut buf, &codec::SEC_ARG, &body, None)
            .expect("handshake frame always fits the default capacity");

        let stream = &mut self.slots[slot_id].as_mut().unwrap().stream;
        let mut written = 0;
        let mut spins = 0;
        while written < len {
            match stream.write(&buf[written..len]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    spins += 1;
                    if spins > 1000 {
                        warn!(self.log, "handshake write stalled, giving up"; "slot" => slot_id);
                        break;
                    }
                    std::thread::yield_now();
                }
                Err(err) => {
                    warn!(self.log, "handshake write failed"; "error" => %err);
                    break;
                }
            }
        }
    }

    fn drain_peer(&mut self, slot_id: usize) {
        if self.slots.get(slot_id).and_then(Option::as_ref).is_none() {
            return;
        }

        loop {
            let mut buffer = vec![0u8; self.read_buffer_size];
            let read_result = self.slots[slot_id].as_mut().unwrap().stream.read(&mut buffer);
            match read_result {
                Ok(0) => {
                    self.disconnect(slot_id);
                    break;
                }
                Ok(n) => {
                    buffer.truncate(n);
                    self.slots[slot_id].as_mut().unwrap().last_ingress = Instant::now();
                    let peer = self.slots[slot_id].as_ref().unwrap().peer_id;
                    if !self.inbound.try_enqueue(InboundTask::Data { peer, buffer }) {
                        warn!(self.log, "inbound queue full, dropping packet"; "peer" => peer);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => {
                    self.disconnect(slot_id);
                    break;
                }
            }
        }
    }

    fn disconnect(&mut self, slot_id: usize) {
        if let Some(mut slot) = self.slots[slot_id].take() {
            let _ = self.poll.registry().deregister(&mut slot.stream);
            self.roster.remove(slot.peer_id);
            info!(self.log, "peer disconnected"; "peer" => slot.peer_id);
            self.free.push(slot_id);
        }
    }

    fn housekeeping(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_housekeeping) < HOUSEKEEPING_INTERVAL {
            return;
        }
        self.last_housekeeping = now;

        let idle: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                let slot = slot.as_ref()?;
                if now.duration_since(slot.last_ingress) > INGRESS_TIMEOUT {
                    Some(i)
                } else {
                    None
                }
            })
            .collect();

        for slot_id in idle {
            warn!(self.log, "dropping idle peer"; "slot" => slot_id);
            self.disconnect(slot_id);
        }
    }
}
