//! Channel construction: two freshly entangled ports.

use std::sync::Arc;

use crossport_core::{PortError, ValueCodec};

use crate::environment::EnvHandle;
use crate::port::Port;
use crate::state::PortState;

/// A pair of entangled ports.
///
/// Posting on one end delivers to the other end's inbound queue. The channel
/// itself has no runtime role beyond construction; the two ports are
/// independent once returned, and either can move to another environment via
/// [`Port::detach`] / [`Port::adopt`].
///
/// # Examples
///
/// ```rust,ignore
/// use crossport::{Channel, Environment, JsonCodec, Value};
///
/// let env = Environment::new("main")?;
/// let channel = Channel::new(env.handle(), JsonCodec)?;
///
/// channel.port2.set_on_message(|value| {
///     println!("received {value:?}");
///     Ok(())
/// });
/// channel.port2.start()?;
/// channel.port1.post(&Value::from("hello"), &[])?;
/// ```
#[derive(Debug)]
pub struct Channel {
    /// First end of the channel.
    pub port1: Port,
    /// Second end of the channel.
    pub port2: Port,
}

impl Channel {
    /// Create a channel on `env`: two fresh ports with entangled states.
    ///
    /// Both ports share the same codec instance.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::EnvironmentGone`] if the environment has shut
    /// down.
    pub fn new<C: ValueCodec>(env: &EnvHandle, codec: C) -> Result<Self, PortError> {
        let codec: Arc<dyn ValueCodec> = Arc::new(codec);
        let state1 = PortState::new();
        let state2 = PortState::new();
        PortState::entangle(&state1, &state2);

        let port1 = Port::bind(env, Arc::clone(&codec), state1, false)?;
        let port2 = Port::bind(env, codec, state2, false)?;
        Ok(Channel { port1, port2 })
    }
}
