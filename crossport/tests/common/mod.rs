//! Shared helpers for crossport integration tests.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossport::{Port, Value};

/// Install a fmt subscriber once, honoring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Poll `pred` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if pred() {
            return true;
        }
        if Instant::now() >= deadline {
            return pred();
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Records every value delivered to a port, observable from the test thread.
#[derive(Clone, Default)]
pub struct Recorder {
    values: Arc<Mutex<Vec<Value>>>,
}

#[allow(dead_code)]
impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install this recorder as the port's message handler.
    pub fn attach(&self, port: &Port) {
        let values = Arc::clone(&self.values);
        port.set_on_message(move |value| {
            values.lock().expect("recorder lock").push(value);
            Ok(())
        });
    }

    /// Record a value directly, for hand-written handlers.
    pub fn push(&self, value: Value) {
        self.values.lock().expect("recorder lock").push(value);
    }

    pub fn len(&self) -> usize {
        self.values.lock().expect("recorder lock").len()
    }

    pub fn snapshot(&self) -> Vec<Value> {
        self.values.lock().expect("recorder lock").clone()
    }
}
