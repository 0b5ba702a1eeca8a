//! The live-client roster, grounded on `neutronium::net::endpoint::Endpoint`'s
//! `live: IndexSet<ChannelId>` -- ordered so broadcast iteration is deterministic, keyed by id so
//! unicast lookup is O(1) rather than a scan.

use indexmap::map::ValuesMut;
use indexmap::IndexMap;
use std::net::TcpStream;
use std::sync::Mutex;

pub type PeerId = u64;

pub struct PeerHandle {
    pub id: PeerId,
    pub writer: TcpStream,
}

pub struct ClientRoster {
    peers: Mutex<IndexMap<PeerId, PeerHandle>>,
}

impl ClientRoster {
    pub fn new() -> Self {
        ClientRoster {
            peers: Mutex::new(IndexMap::new()),
        }
    }

    pub fn insert(&self, handle: PeerHandle) {
        self.peers.lock().unwrap().insert(handle.id, handle);
    }

    pub fn remove(&self, id: PeerId) -> Option<PeerHandle> {
        self.peers.lock().unwrap().shift_remove(&id)
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.peers.lock().unwrap().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn with_peer_mut<F, R>(&self, id: PeerId, f: F) -> Option<R>
    where
        F: FnOnce(&mut PeerHandle) -> R,
    {
        let mut guard = self.peers.lock().unwrap();
        guard.get_mut(&id).map(f)
    }

    pub fn with_snapshot<F, R>(&self, f: F) -> R
    where
        F: FnOnce(ValuesMut<'_, PeerId, PeerHandle>) -> R,
    {
        let mut guard = self.peers.lock().unwrap();
        f(guard.values_mut())
    }

    /// Drains the roster, returning the removed handles so callers can shut their sockets down.
    pub fn clear(&self) -> Vec<PeerHandle> {
        let mut guard = self.peers.lock().unwrap();
        guard.drain(..).map(|(_, handle)| handle).collect()
    }
}

impl Default for ClientRoster {
    fn default() -> Self {
        Self::new()
    }
}
