use std::fmt;

/// DeferredAction holds cleanup work that must run after the caller has released its locks,
/// e.g. failing the promises of a resigned participant. It runs when fired or dropped,
/// whichever comes first.
#[must_use]
pub struct DeferredAction {
    action: Option<Box<dyn FnOnce() + Send>>,
}

impl DeferredAction {
    pub fn new<F>(action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        DeferredAction {
            action: Some(Box::new(action)),
        }
    }

    pub fn noop() -> Self {
        DeferredAction { action: None }
    }

    pub fn fire(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

impl Drop for DeferredAction {
    fn drop(&mut self) {
        self.run();
    }
}

impl fmt::Debug for DeferredAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredAction")
            .field("pending", &self.action.is_some())
            .finish()
    }
}
