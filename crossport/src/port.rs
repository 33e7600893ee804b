//! Ports: the owner-side façade over a shared port state.
//!
//! A [`Port`] binds one [`PortState`] to one environment and drives the
//! receive loop. Posting serializes through the port's codec and hands the
//! message to the sibling state; a coalescing wake then schedules one drain
//! on the sibling owner's loop.
//!
//! The port follows a synchronous-API-with-background-task shape: the
//! constructor spawns a receive task on the environment's loop, and
//! `close`/`detach` end it by flipping the port slot and signalling the
//! wake. The drain re-reads the slot on every iteration, so mid-drain
//! closes and detaches behave predictably: the already-popped message still
//! delivers, nothing after it does.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crossport_core::{PortError, Value, ValueCodec};

use crate::environment::{EnvHandle, PortWake};
use crate::message::Message;
use crate::state::{Dequeue, PortState, PortStateHandle};

/// Error type message handlers may return to reject a delivery.
///
/// A rejected delivery is logged and the receive loop reschedules itself;
/// the rejected message is not redelivered.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type MessageHandler = Box<dyn FnMut(Value) -> Result<(), HandlerError> + Send>;
type CloseHandler = Box<dyn FnOnce() + Send>;

/// Where a port is in its lifecycle. `Detached` and `Closed` are terminal
/// for the port instance; a detached state lives on in its handle.
enum PortSlot {
    Bound(Arc<PortState>),
    Detached,
    Closed,
}

struct PortShared {
    id: u64,
    env: EnvHandle,
    codec: Arc<dyn ValueCodec>,
    slot: Mutex<PortSlot>,
    wake: Arc<Notify>,
    on_message: Mutex<Option<MessageHandler>>,
    on_close: Mutex<Option<CloseHandler>>,
}

impl PortShared {
    fn slot(&self) -> MutexGuard<'_, PortSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn message_slot(&self) -> MutexGuard<'_, Option<MessageHandler>> {
        self.on_message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn close_slot(&self) -> MutexGuard<'_, Option<CloseHandler>> {
        self.on_close.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn next_port_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// One end of a message channel, bound to an environment.
///
/// Created in entangled pairs by [`Channel`](crate::Channel), or by adopting
/// a detached state via [`Port::adopt`]. All user callbacks run on the
/// owning environment's loop thread; every other method is callable from any
/// thread.
pub struct Port {
    shared: Arc<PortShared>,
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port").field("id", &self.shared.id).finish()
    }
}

impl Port {
    /// Create a fresh, sibling-less port on `env`.
    ///
    /// Posts on a sibling-less port are discarded; ports that can actually
    /// converse come from [`Channel`](crate::Channel).
    ///
    /// # Errors
    ///
    /// Returns [`PortError::EnvironmentGone`] if the environment has shut
    /// down.
    pub fn new<C: ValueCodec>(env: &EnvHandle, codec: C) -> Result<Self, PortError> {
        Self::bind(env, Arc::new(codec), PortState::new(), false)
    }

    /// Adopt a detached state, binding it to `env`.
    ///
    /// Messages queued while the state was detached are preserved; a wake is
    /// scheduled immediately so they flush as soon as the port starts.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::EnvironmentGone`] if the environment has shut
    /// down.
    pub fn adopt<C: ValueCodec>(
        env: &EnvHandle,
        state: PortStateHandle,
        codec: C,
    ) -> Result<Self, PortError> {
        Self::bind(env, Arc::new(codec), state.state, true)
    }

    pub(crate) fn bind(
        env: &EnvHandle,
        codec: Arc<dyn ValueCodec>,
        state: Arc<PortState>,
        flush: bool,
    ) -> Result<Self, PortError> {
        let shared = Arc::new(PortShared {
            id: next_port_id(),
            env: env.clone(),
            codec,
            slot: Mutex::new(PortSlot::Bound(Arc::clone(&state))),
            wake: Arc::new(Notify::new()),
            on_message: Mutex::new(None),
            on_close: Mutex::new(None),
        });
        state.set_owner(Some(PortWake::new(Arc::clone(&shared.wake))));

        let task_shared = Arc::clone(&shared);
        if let Err(err) = env.schedule(move || {
            tokio::task::spawn_local(receive_task(task_shared));
        }) {
            state.set_owner(None);
            *shared.slot() = PortSlot::Closed;
            return Err(err);
        }

        if flush {
            // Easiest way to run a queue inherited from a detached state.
            shared.wake.notify_one();
        }
        tracing::debug!(port = shared.id, env = %env.name(), "port bound");
        Ok(Port { shared })
    }

    fn bound_state(&self) -> Result<Arc<PortState>, PortError> {
        match &*self.shared.slot() {
            PortSlot::Bound(state) => Ok(Arc::clone(state)),
            _ => Err(PortError::ClosedPort),
        }
    }

    /// Serialize `value` and deliver it to the sibling port.
    ///
    /// `transfer_list` names the byte buffers whose memory should move
    /// instead of copy. When the sibling is gone the message is discarded
    /// silently; there is nobody to deliver to, and that is not an error.
    ///
    /// # Errors
    ///
    /// - [`PortError::ClosedPort`] if this port is closed or detached.
    /// - [`PortError::InvalidTransferObject`] for non-buffer transfer entries.
    /// - [`PortError::CloneFailure`] if the codec rejects the value; the
    ///   sender's buffers are left untouched.
    pub fn post(&self, value: &Value, transfer_list: &[Value]) -> Result<(), PortError> {
        let state = self.bound_state()?;
        let mut message = Message::new();
        message.serialize(self.shared.codec.as_ref(), value, transfer_list)?;
        tracing::trace!(port = self.shared.id, bytes = message.size(), "posting message");
        state.deliver_to_sibling(message);
        Ok(())
    }

    /// Begin delivering queued and future messages to the handler.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::ClosedPort`] if the port is closed or detached.
    pub fn start(&self) -> Result<(), PortError> {
        self.bound_state()?.start();
        Ok(())
    }

    /// Pause delivery. Messages keep accumulating until `start` is called.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::ClosedPort`] if the port is closed or detached.
    pub fn stop(&self) -> Result<(), PortError> {
        self.bound_state()?.stop();
        Ok(())
    }

    /// Release this port's state for adoption by another port.
    ///
    /// The port becomes empty and unusable; pending messages travel with the
    /// returned handle. No close event fires.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::ClosedPort`] if the port is already closed or
    /// detached.
    pub fn detach(&self) -> Result<PortStateHandle, PortError> {
        let state = {
            let mut slot = self.shared.slot();
            match std::mem::replace(&mut *slot, PortSlot::Detached) {
                PortSlot::Bound(state) => state,
                other => {
                    *slot = other;
                    return Err(PortError::ClosedPort);
                }
            }
        };
        state.set_owner(None);
        self.shared.wake.notify_one();
        tracing::debug!(port = self.shared.id, "port detached");
        Ok(PortStateHandle::new(state))
    }

    /// Close the port: disentangle from the sibling and release the state.
    ///
    /// Idempotent; closing an already-closed or detached port does nothing.
    /// The close callback fires on the owning loop once the receive task has
    /// wound down.
    pub fn close(&self) {
        if close_shared(&self.shared) {
            self.shared.wake.notify_one();
        }
    }

    /// Install the message handler.
    ///
    /// Invoked on the owning environment's loop for each delivered value,
    /// never while any port lock is held. May be replaced at any time,
    /// including from inside a delivery.
    pub fn set_on_message<F>(&self, handler: F)
    where
        F: FnMut(Value) -> Result<(), HandlerError> + Send + 'static,
    {
        *self.shared.message_slot() = Some(Box::new(handler));
    }

    /// Install the close callback, fired once when the port closes.
    ///
    /// Closure due to the sibling going away also fires this; detaching does
    /// not.
    pub fn set_on_close<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.shared.close_slot() = Some(Box::new(handler));
    }

    /// Whether the sibling port has gone away.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::ClosedPort`] if this port is closed or detached.
    pub fn sibling_closed(&self) -> Result<bool, PortError> {
        Ok(self.bound_state()?.sibling_closed())
    }

    /// Bytes currently held by this port's inbound queue.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::ClosedPort`] if this port is closed or detached.
    pub fn queued_bytes(&self) -> Result<usize, PortError> {
        Ok(self.bound_state()?.queued_bytes())
    }
}

impl Drop for Port {
    fn drop(&mut self) {
        if close_shared(&self.shared) {
            self.shared.wake.notify_one();
        }
    }
}

/// Transition the port to `Closed` and sever its entanglement.
///
/// Returns true when this call performed the transition.
fn close_shared(shared: &PortShared) -> bool {
    let state = {
        let mut slot = shared.slot();
        match std::mem::replace(&mut *slot, PortSlot::Closed) {
            PortSlot::Bound(state) => state,
            PortSlot::Detached => {
                *slot = PortSlot::Detached;
                return false;
            }
            PortSlot::Closed => return false,
        }
    };
    state.set_owner(None);
    state.disentangle();
    tracing::debug!(port = shared.id, "port closed");
    true
}

enum DrainOutcome {
    /// Queue drained or port stopped; wait for the next wake.
    Idle,
    /// A delivery failed; reschedule so the rest of the queue gets a turn.
    Retry,
    /// The state was detached; the task ends without a close event.
    Detached,
    /// The port closed; the task ends and fires the close event.
    Closed,
}

/// The receive task parked on a port's wake. One `notified` wake runs one
/// drain, however many signals coalesced into it.
async fn receive_task(shared: Arc<PortShared>) {
    loop {
        shared.wake.notified().await;
        match drain(&shared) {
            DrainOutcome::Idle => {}
            DrainOutcome::Retry => {
                if matches!(&*shared.slot(), PortSlot::Bound(_)) {
                    shared.wake.notify_one();
                }
            }
            DrainOutcome::Detached => {
                shared.message_slot().take();
                tracing::debug!(port = shared.id, "receive task released after detach");
                return;
            }
            DrainOutcome::Closed => break,
        }
    }
    if let Some(on_close) = shared.close_slot().take() {
        on_close();
    }
    shared.message_slot().take();
    tracing::debug!(port = shared.id, "receive task finished");
}

/// One drain pass. Runs on the owning loop; it is the sole consumer of the
/// state's inbound queue.
fn drain(shared: &PortShared) -> DrainOutcome {
    loop {
        // The port may be closed or detached while messages are being
        // processed, so re-check ownership on every iteration.
        let state = match &*shared.slot() {
            PortSlot::Bound(state) => Arc::clone(state),
            PortSlot::Detached => return DrainOutcome::Detached,
            PortSlot::Closed => return DrainOutcome::Closed,
        };

        let message = match state.dequeue() {
            Dequeue::Message(message) => message,
            Dequeue::Stopped | Dequeue::Empty => break,
        };

        if !shared.env.can_call_user_code() {
            // The environment is tearing down; nothing to do but drain.
            tracing::trace!(port = shared.id, "discarding message during teardown");
            continue;
        }

        let value = match message.deserialize(shared.codec.as_ref()) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(
                    port = shared.id,
                    error = %err,
                    "failed to deserialize incoming message"
                );
                return DrainOutcome::Retry;
            }
        };

        let Some(mut handler) = shared.message_slot().take() else {
            tracing::warn!(port = shared.id, "message dropped: no handler installed");
            return DrainOutcome::Retry;
        };
        let result = handler(value);
        {
            // Put the handler back unless the callback installed a new one.
            let mut slot = shared.message_slot();
            if slot.is_none() {
                *slot = Some(handler);
            }
        }
        if let Err(err) = result {
            tracing::warn!(port = shared.id, error = %err, "message handler failed");
            return DrainOutcome::Retry;
        }
    }

    // This is the only place closure-due-to-peer-closure is observed.
    let state = match &*shared.slot() {
        PortSlot::Bound(state) => Arc::clone(state),
        PortSlot::Detached => return DrainOutcome::Detached,
        PortSlot::Closed => return DrainOutcome::Closed,
    };
    if state.sibling_closed() {
        close_shared(shared);
        return DrainOutcome::Closed;
    }
    DrainOutcome::Idle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use crossport_core::JsonCodec;

    #[test]
    fn test_operations_on_detached_port_fail() {
        let env = Environment::new("port-detach-test").expect("spawn environment");
        let port = Port::new(env.handle(), JsonCodec).expect("bind port");

        let handle = port.detach().expect("detach");
        assert_eq!(handle.queued_bytes(), 0);

        assert!(matches!(
            port.post(&Value::Null, &[]),
            Err(PortError::ClosedPort)
        ));
        assert!(matches!(port.start(), Err(PortError::ClosedPort)));
        assert!(matches!(port.stop(), Err(PortError::ClosedPort)));
        assert!(matches!(port.detach(), Err(PortError::ClosedPort)));
        assert!(matches!(port.sibling_closed(), Err(PortError::ClosedPort)));
    }

    #[test]
    fn test_close_is_idempotent() {
        let env = Environment::new("port-close-test").expect("spawn environment");
        let port = Port::new(env.handle(), JsonCodec).expect("bind port");

        port.close();
        port.close();
        assert!(matches!(
            port.post(&Value::Null, &[]),
            Err(PortError::ClosedPort)
        ));
    }

    #[test]
    fn test_post_on_sibling_less_port_is_silent() {
        let env = Environment::new("port-solo-test").expect("spawn environment");
        let port = Port::new(env.handle(), JsonCodec).expect("bind port");

        // No sibling: the message is dropped without error.
        port.post(&Value::from("into the void"), &[])
            .expect("post succeeds");
        assert_eq!(port.queued_bytes().expect("bound"), 0);
        assert!(port.sibling_closed().expect("bound"));
    }

    #[test]
    fn test_bind_on_shut_down_environment_fails() {
        let env = Environment::new("port-env-gone-test").expect("spawn environment");
        let handle = env.handle().clone();
        env.shutdown();

        let err = Port::new(&handle, JsonCodec).expect_err("environment is gone");
        assert!(matches!(err, PortError::EnvironmentGone { .. }));
    }
}
