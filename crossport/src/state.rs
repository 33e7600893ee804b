//! Shared port state: the thread-safe half of a port.
//!
//! A [`PortState`] outlives the port that owns it. It carries the inbound
//! message queue, the receiving flag, and a wake slot for the current owner;
//! separately it carries the entanglement link to its sibling state.
//!
//! Two locks exist because the two questions "what is my queue?" and "who is
//! my peer?" have different callers. The queue is hot, touched on every send
//! and receive; the sibling link is touched only on entangle, disentangle
//! and close. Entangled states share a single [`Bond`], whose one mutex
//! guards both ends' links — the minimum coordination that makes
//! disentanglement atomic across both sides.
//!
//! Lock order: a bond's mutex may be followed by a state's queue mutex (the
//! post path) or a state's bond slot (the disentangle swap); the queue mutex
//! is never held while acquiring either of the others.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::environment::PortWake;
use crate::message::Message;

/// Result of one attempt to take the next inbound message.
pub(crate) enum Dequeue {
    /// A message was popped and should be delivered.
    Message(Message),
    /// The queue is empty.
    Empty,
    /// The port is not receiving; messages stay queued.
    Stopped,
}

/// Shared state of one port, reference-counted and owner-independent.
pub(crate) struct PortState {
    inner: Mutex<PortInner>,
    bond: Mutex<BondHandle>,
}

struct PortInner {
    incoming: VecDeque<Message>,
    receiving: bool,
    owner: Option<PortWake>,
}

/// The entanglement shared by two port states.
///
/// Both ends' links live under this single mutex, so no thread can observe a
/// half-entangled pair.
#[derive(Default)]
struct Bond {
    peers: Mutex<[Option<Weak<PortState>>; 2]>,
}

impl Bond {
    fn peers(&self) -> MutexGuard<'_, [Option<Weak<PortState>>; 2]> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A state's current view of its entanglement: which bond, and which end.
///
/// Disentangling swaps this for a fresh private bond, so stray operations
/// that captured the old bond can never make the two sides block each other
/// again.
#[derive(Clone)]
struct BondHandle {
    bond: Arc<Bond>,
    end: usize,
}

impl BondHandle {
    fn solo() -> Self {
        Self {
            bond: Arc::new(Bond::default()),
            end: 0,
        }
    }

    fn peer(&self) -> Option<Arc<PortState>> {
        self.bond.peers()[1 - self.end]
            .as_ref()
            .and_then(Weak::upgrade)
    }
}

impl PortState {
    /// Create a fresh, sibling-less state: empty queue, not receiving.
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(PortInner {
                incoming: VecDeque::new(),
                receiving: false,
                owner: None,
            }),
            bond: Mutex::new(BondHandle::solo()),
        })
    }

    /// Entangle two fresh states.
    ///
    /// Both must be sibling-less; `Channel` only ever entangles states it
    /// just created, so no other thread can observe the intermediate steps.
    pub(crate) fn entangle(a: &Arc<Self>, b: &Arc<Self>) {
        debug_assert!(a.sibling_closed());
        debug_assert!(b.sibling_closed());

        let bond = Arc::new(Bond::default());
        {
            let mut peers = bond.peers();
            peers[0] = Some(Arc::downgrade(a));
            peers[1] = Some(Arc::downgrade(b));
        }
        *a.bond_slot() = BondHandle {
            bond: Arc::clone(&bond),
            end: 0,
        };
        *b.bond_slot() = BondHandle { bond, end: 1 };
    }

    fn inner(&self) -> MutexGuard<'_, PortInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bond_slot(&self) -> MutexGuard<'_, BondHandle> {
        self.bond.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push an inbound message and wake the owner, if any.
    ///
    /// The receiving flag is deliberately not inspected here; delivery
    /// gating happens in the receive loop, so messages accumulate while the
    /// port is stopped.
    pub(crate) fn enqueue(&self, message: Message) {
        let mut inner = self.inner();
        inner.incoming.push_back(message);
        tracing::trace!(queued = inner.incoming.len(), "message enqueued");
        if let Some(owner) = &inner.owner {
            owner.signal();
        }
    }

    /// Take the next deliverable message, if the port is receiving.
    pub(crate) fn dequeue(&self) -> Dequeue {
        let mut inner = self.inner();
        if !inner.receiving {
            return Dequeue::Stopped;
        }
        match inner.incoming.pop_front() {
            Some(message) => Dequeue::Message(message),
            None => Dequeue::Empty,
        }
    }

    /// Begin receiving; wakes the owner when messages are already queued.
    pub(crate) fn start(&self) {
        let mut inner = self.inner();
        inner.receiving = true;
        if !inner.incoming.is_empty() {
            if let Some(owner) = &inner.owner {
                owner.signal();
            }
        }
    }

    /// Stop receiving. Pending messages stay queued.
    pub(crate) fn stop(&self) {
        self.inner().receiving = false;
    }

    /// Install or clear the owner's wake handle.
    pub(crate) fn set_owner(&self, owner: Option<PortWake>) {
        let mut inner = self.inner();
        if owner.is_some() {
            debug_assert!(inner.owner.is_none(), "state already has an owner");
        }
        inner.owner = owner;
    }

    /// Whether the sibling is gone (never entangled, or disentangled).
    pub(crate) fn sibling_closed(&self) -> bool {
        let handle = self.bond_slot().clone();
        handle.peer().is_none()
    }

    /// Hand a message to the sibling's queue, or discard it silently.
    ///
    /// The enqueue happens under the bond mutex, so a concurrent
    /// disentangle either sees the message already queued or prevents the
    /// delivery entirely.
    pub(crate) fn deliver_to_sibling(&self, message: Message) {
        let handle = self.bond_slot().clone();
        let peers = handle.bond.peers();
        match peers[1 - handle.end].as_ref().and_then(Weak::upgrade) {
            Some(peer) => peer.enqueue(message),
            None => {
                tracing::trace!("discarding message posted to a port with no sibling");
            }
        }
    }

    /// Atomically sever the entanglement.
    ///
    /// Holds the old shared bond's mutex across the whole swap: fresh
    /// private bonds are installed in both sides and both links cleared
    /// before any other thread can look. Afterwards both owners are pinged
    /// so their loops observe the now-closed sibling.
    pub(crate) fn disentangle(&self) {
        let old = self.bond_slot().clone();
        let peer = {
            let mut peers = old.bond.peers();
            *self.bond_slot() = BondHandle::solo();
            let peer = peers[1 - old.end].take().and_then(|w| w.upgrade());
            peers[old.end] = None;
            if let Some(peer) = &peer {
                *peer.bond_slot() = BondHandle::solo();
            }
            peer
        };

        self.ping_owner();
        if let Some(peer) = peer {
            peer.ping_owner();
        }
    }

    /// Signal the owner's wake, if an owner is bound.
    pub(crate) fn ping_owner(&self) {
        let inner = self.inner();
        if let Some(owner) = &inner.owner {
            owner.signal();
        }
    }

    /// Bytes held by queued messages.
    pub(crate) fn queued_bytes(&self) -> usize {
        self.inner().incoming.iter().map(Message::size).sum()
    }
}

impl Drop for PortState {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        if let Ok(inner) = self.inner.get_mut() {
            debug_assert!(inner.owner.is_none(), "state dropped while owned");
        }
        self.disentangle();
    }
}

/// A detached port state, ready for adoption by a new port.
///
/// Produced by [`Port::detach`](crate::Port::detach). The state keeps its
/// queue and its sibling link; messages that arrive while detached are
/// delivered once a new port adopts the state and starts it.
pub struct PortStateHandle {
    pub(crate) state: Arc<PortState>,
}

impl PortStateHandle {
    pub(crate) fn new(state: Arc<PortState>) -> Self {
        Self { state }
    }

    /// Bytes held by messages queued on the detached state.
    pub fn queued_bytes(&self) -> usize {
        self.state.queued_bytes()
    }
}

impl fmt::Debug for PortStateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortStateHandle")
            .field("queued_bytes", &self.state.queued_bytes())
            .finish()
    }
}
