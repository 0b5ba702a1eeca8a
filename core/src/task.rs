//! The two task types carried on the bounded queues between the reactor, worker and sender
//! threads. Each carries a `Poison` variant as the shutdown sentinel (C2/C5/C6 in the design
//! notes): pushing one guarantees the consuming thread wakes from its blocking dequeue and
//! exits instead of waiting forever on a queue nothing will ever fill again.

use crate::codec::Target;
use crate::roster::PeerId;

pub enum InboundTask {
    Data { peer: PeerId, buffer: Vec<u8> },
    Poison,
}

#[derive(Clone, Copy)]
pub enum Destination {
    Unicast(PeerId),
    Broadcast,
}

pub enum OutboundTask {
    Send {
        destination: Destination,
        target: Target,
        body: Vec<u8>,
    },
    Poison,
}
