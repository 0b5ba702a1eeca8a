//! The single worker thread: dequeue inbound packets, validate + decrypt them through the
//! codec, and hand the payload to the embedder's handler. Kept as a free function rather than a
//! struct since it owns nothing beyond what it's handed -- there is exactly one of these per
//! server, matching the pipeline's fixed three-thread shape.

use crate::codec;
use crate::queue::BoundedQueue;
use crate::roster::PeerId;
use crate::sender::SenderHandle;
use crate::strategy::StrategySlot;
use crate::task::InboundTask;
use std::sync::Arc;
use wiremesh_support::logging::{warn, Logger};

/// Implemented by anything that can react to an inbound packet. Blanket-implemented for
/// closures so embedders rarely need to name this trait directly.
pub trait MessageHandler: Send + 'static {
    fn handle(&self, peer: PeerId, target: codec::Target, body: &[u8], sender: &SenderHandle);
}

impl<F> MessageHandler for F
where
    F: Fn(PeerId, codec::Target, &[u8], &SenderHandle) + Send + 'static,
{
    fn handle(&self, peer: PeerId, target: codec::Target, body: &[u8], sender: &SenderHandle) {
        self(peer, target, body, sender)
    }
}

pub fn run<H: MessageHandler>(
    inbound: Arc<BoundedQueue<InboundTask>>,
    strategy: Arc<StrategySlot>,
    sender: SenderHandle,
    handler: H,
    log: Logger,
) {
    loop {
        match inbound.dequeue() {
            InboundTask::Poison => break,
            InboundTask::Data { peer, mut buffer } => {
                let decrypt = strategy.get().decrypt;
                match codec::parse(&mut buffer, Some(decrypt)) {
                    Ok(frame) => handler.handle(peer, frame.target, frame.body, &sender),
                    Err(err) => {
                        warn!(log, "dropping malformed inbound frame"; "peer" => peer, "error" => %err);
                    }
                }
            }
        }
    }
}
