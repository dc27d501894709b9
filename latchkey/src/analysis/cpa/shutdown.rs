use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation flag shared between a running analysis and whoever may want to
/// stop it (a watchdog thread, a signal handler).
///
/// The exploration loop checks the flag once per popped state.
#[derive(Debug, Clone, Default)]
pub struct ShutdownNotifier(Arc<AtomicBool>);

impl ShutdownNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_shutdown(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn should_shutdown(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
