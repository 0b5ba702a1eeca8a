//! The single sender thread: dequeue outbound packets, frame + encrypt them through the codec,
//! and write them to the target peer (or every peer, for a broadcast). Grounded on
//! `neutronium::net::channel::Channel::send`/`send_raw`, generalized from "the one channel this
//! call is a method on" to "whichever peer or peers the task names".

use crate::codec;
use crate::queue::BoundedQueue;
use crate::roster::{ClientRoster, PeerId};
use crate::strategy::StrategySlot;
use crate::task::{Destination, OutboundTask};
use std::io::{self, Write};
use std::net::TcpStream;
use std::sync::Arc;
use wiremesh_support::logging::{warn, Logger};

/// Writes `frame` to `stream` in full, retrying on `WouldBlock` rather than failing a potentially
/// partial write the way a bare `write_all` would -- `stream` is a `dup()`-ed clone of a
/// non-blocking socket (see `reactor::duplicate_for_writer`), so `WouldBlock` here is routine
/// backpressure, not an error. Gives up after a bounded number of retries; a frame abandoned
/// mid-write has desynced the peer's byte stream beyond repair, which the caller treats as fatal
/// for that connection rather than silently leaving a corrupted stream in place.
fn write_frame(stream: &mut TcpStream, frame: &[u8]) -> io::Result<()> {
    let mut written = 0;
    let mut spins = 0;
    while written < frame.len() {
        match stream.write(&frame[written..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "peer closed the connection mid-write",
                ))
            }
            Ok(n) => {
                written += n;
                spins = 0;
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                spins += 1;
                if spins > 1000 {
                    return Err(io::Error::new(
                        e.kind(),
                        format!(
                            "write stalled past retry budget with {}/{} bytes sent",
                            written,
                            frame.len()
                        ),
                    ));
                }
                std::thread::yield_now();
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// A cheap-to-clone submission point for outbound packets, handed to the embedder's handler and
/// to anything else (the server's public handle, the reactor's handshake path) that needs to
/// queue a write without touching the sockets directly.
#[derive(Clone)]
pub struct SenderHandle {
    outbound: Arc<BoundedQueue<OutboundTask>>,
}

impl SenderHandle {
    pub fn new(outbound: Arc<BoundedQueue<OutboundTask>>) -> SenderHandle {
        SenderHandle { outbound }
    }

    /// Queues a unicast send. Returns `false` if the outbound queue is full; the packet is
    /// dropped, not buffered further.
    pub fn send(&self, peer: PeerId, target: codec::Target, body: &[u8]) -> bool {
        self.outbound.try_enqueue(OutboundTask::Send {
            destination: Destination::Unicast(peer),
            target,
            body: body.to_vec(),
        })
    }

    /// Queues a broadcast send to every currently-connected peer.
    pub fn broadcast(&self, target: codec::Target, body: &[u8]) -> bool {
        self.outbound.try_enqueue(OutboundTask::Send {
            destination: Destination::Broadcast,
            target,
            body: body.to_vec(),
        })
    }
}

pub fn run(
    outbound: Arc<BoundedQueue<OutboundTask>>,
    roster: Arc<ClientRoster>,
    strategy: Arc<StrategySlot>,
    log: Logger,
) {
    let mut buf = [0u8; codec::DEFAULT_FRAME_CAPACITY];

    loop {
        match outbound.dequeue() {
            OutboundTask::Poison => break,
            OutboundTask::Send {
                destination,
                target,
                body,
            } => {
                let encrypt = strategy.get().encrypt;
                let len = match codec::serialize(&mut buf, &target, &body, Some(encrypt)) {
                    Ok(len) => len,
                    Err(err) => {
                        warn!(log, "failed to frame outbound packet"; "error" => %err);
                        continue;
                    }
                };

                // Partial/failed writes never evict a peer here -- removal is the reactor's read
                // path's job, once it observes the same dead connection on its own side.
                match destination {
                    Destination::Unicast(peer) => {
                        let wrote = roster
                            .with_peer_mut(peer, |handle| write_frame(&mut handle.writer, &buf[..len]));
                        match wrote {
                            Some(Err(err)) => {
                                warn!(log, "unicast write failed"; "peer" => peer, "error" => %err);
                            }
                            None => {
                                warn!(log, "unicast send to unknown peer"; "peer" => peer);
                            }
                            Some(Ok(())) => {}
                        }
                    }
                    Destination::Broadcast => {
                        roster.with_snapshot(|peers| {
                            for handle in peers {
                                if let Err(err) = write_frame(&mut handle.writer, &buf[..len]) {
                                    warn!(log, "broadcast write failed"; "peer" => handle.id, "error" => %err);
                                }
                            }
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::PeerHandle;
    use crate::strategy::StrategyPair;
    use std::io::Read;
    use std::net::{TcpListener, TcpStream};

    fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server_side, _) = listener.accept().unwrap();
        (client, server_side)
    }

    #[test]
    fn unicast_writes_a_framed_packet_to_the_right_peer() {
        let (mut client_end, server_side) = connected_pair();
        let roster = Arc::new(ClientRoster::new());
        roster.insert(PeerHandle {
            id: 1,
            writer: server_side,
        });

        let outbound = Arc::new(BoundedQueue::new(4));
        let strategy = Arc::new(StrategySlot::new(StrategyPair::plaintext()));
        let target = codec::target_from_str("chat");
        outbound.try_enqueue(OutboundTask::Send {
            destination: Destination::Unicast(1),
            target,
            body: b"hello".to_vec(),
        });
        outbound.try_enqueue(OutboundTask::Poison);

        run(outbound, roster, strategy, wiremesh_support::logging::discard());

        let mut received = vec![0u8; codec::DEFAULT_FRAME_CAPACITY];
        let n = client_end.read(&mut received).unwrap();
        let frame = codec::parse(&mut received[..n], None).unwrap();
        assert_eq!(frame.target, target);
        assert_eq!(frame.body, b"hello");
    }

    #[test]
    fn unicast_to_unknown_peer_does_not_panic() {
        let roster = Arc::new(ClientRoster::new());
        let outbound = Arc::new(BoundedQueue::new(4));
        let strategy = Arc::new(StrategySlot::new(StrategyPair::plaintext()));
        outbound.try_enqueue(OutboundTask::Send {
            destination: Destination::Unicast(999),
            target: codec::target_from_str("chat"),
            body: b"hello".to_vec(),
        });
        outbound.try_enqueue(OutboundTask::Poison);

        run(outbound, roster, strategy, wiremesh_support::logging::discard());
    }

    #[test]
    fn write_frame_retries_through_wouldblock_instead_of_losing_bytes() {
        let (mut writer, mut reader) = connected_pair();
        writer.set_nonblocking(true).unwrap();

        // large enough to overrun the OS send/receive buffers at their default size, so the
        // first write(s) hit WouldBlock well before the whole frame is on the wire; the reader
        // is a plain blocking socket, so it just drains at its own pace while write_frame
        // retries in the background.
        const PAYLOAD_LEN: usize = 16 * 1024 * 1024;
        let reader_thread = std::thread::spawn(move || {
            let mut total = 0usize;
            let mut scratch = [0u8; 65536];
            while total < PAYLOAD_LEN {
                match reader.read(&mut scratch) {
                    Ok(0) => break,
                    Ok(n) => total += n,
                    Err(err) => panic!("unexpected read error: {}", err),
                }
            }
            total
        });

        write_frame(&mut writer, &vec![0x42u8; PAYLOAD_LEN]).unwrap();
        drop(writer);

        let total_read = reader_thread.join().unwrap();
        assert_eq!(total_read, PAYLOAD_LEN);
    }
}
