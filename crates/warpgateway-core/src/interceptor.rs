//! Interceptor trait and the short-circuiting interceptor chain.
//!
//! ## Dispatch
//!
//! ```text
//! dispatch_request(flow)              dispatch_response(flow)
//!   ├─ filter    → Continue             ├─ filter    → Continue
//!   ├─ logger    → Handled ──┐          ├─ logger    → Continue
//!   └─ stats     (skipped)   │          └─ stats     → Continue
//!                            ▼
//!                      phase stops
//! ```
//!
//! Each phase is an independent traversal in registration order. Disabled
//! interceptors are skipped without being called. The first interceptor that
//! returns [`Decision::Handled`] ends the traversal for that phase only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::flow::Flow;

/// Outcome of one interceptor for one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Decision {
    /// Let later interceptors run.
    #[default]
    Continue,
    /// Stop the traversal for this phase. Any mutation already happened on the flow.
    Handled,
}

impl Decision {
    /// Returns true if the traversal should stop.
    pub fn is_handled(&self) -> bool {
        matches!(self, Decision::Handled)
    }
}

/// Enable flag shared by interceptor implementations.
#[derive(Debug)]
pub struct InterceptorToggle {
    enabled: AtomicBool,
}

impl InterceptorToggle {
    /// Creates an enabled toggle.
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
        }
    }

    /// Returns whether the interceptor is enabled.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Sets the flag and logs the transition under the given name.
    pub fn set(&self, name: &str, enabled: bool) {
        let old = self.enabled.swap(enabled, Ordering::SeqCst);
        if old != enabled {
            if enabled {
                tracing::info!("{} enabled", name);
            } else {
                tracing::info!("{} disabled", name);
            }
        }
    }
}

impl Default for InterceptorToggle {
    fn default() -> Self {
        Self::new()
    }
}

/// A unit of traffic policy or observability invoked once per flow phase.
pub trait Interceptor: Send + Sync {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// Returns whether the chain should call this interceptor.
    fn is_enabled(&self) -> bool;

    /// Enables or disables this interceptor for subsequent dispatches.
    fn set_enabled(&self, enabled: bool);

    /// Inspects or transforms the request phase.
    fn on_request(&self, flow: &mut Flow) -> Decision;

    /// Inspects or transforms the response phase.
    fn on_response(&self, flow: &mut Flow) -> Decision;

    /// Enables this interceptor.
    fn enable(&self) {
        self.set_enabled(true);
    }

    /// Disables this interceptor.
    fn disable(&self) {
        self.set_enabled(false);
    }
}

/// Ordered, shared list of interceptors.
#[derive(Default)]
pub struct InterceptorChain {
    members: RwLock<Vec<Arc<dyn Interceptor>>>,
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("members", &self.names())
            .finish()
    }
}

impl InterceptorChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an interceptor at the end of the chain.
    pub fn add(&self, interceptor: Arc<dyn Interceptor>) {
        tracing::info!("Added interceptor: {}", interceptor.name());
        self.members.write().push(interceptor);
    }

    /// Builder-style variant of [`add`](Self::add).
    pub fn with(self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.add(interceptor);
        self
    }

    /// Unregisters an interceptor by identity. Returns true if it was registered.
    pub fn remove(&self, interceptor: &Arc<dyn Interceptor>) -> bool {
        let mut members = self.members.write();
        match members.iter().position(|m| Arc::ptr_eq(m, interceptor)) {
            Some(idx) => {
                let removed = members.remove(idx);
                tracing::info!("Removed interceptor: {}", removed.name());
                true
            }
            None => false,
        }
    }

    /// Finds the first registered interceptor with the given name.
    pub fn find(&self, name: &str) -> Option<Arc<dyn Interceptor>> {
        self.members
            .read()
            .iter()
            .find(|m| m.name() == name)
            .cloned()
    }

    /// Returns member names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.members
            .read()
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    /// Returns the number of registered interceptors.
    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    /// Returns true if no interceptors are registered.
    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Runs the request phase. Returns `Handled` if an interceptor stopped it.
    pub fn dispatch_request(&self, flow: &mut Flow) -> Decision {
        self.dispatch(flow, |interceptor, flow| interceptor.on_request(flow))
    }

    /// Runs the response phase. Returns `Handled` if an interceptor stopped it.
    pub fn dispatch_response(&self, flow: &mut Flow) -> Decision {
        self.dispatch(flow, |interceptor, flow| interceptor.on_response(flow))
    }

    fn dispatch<F>(&self, flow: &mut Flow, mut phase: F) -> Decision
    where
        F: FnMut(&dyn Interceptor, &mut Flow) -> Decision,
    {
        // Interceptors never run while the membership lock is held.
        let members = self.members.read().clone();

        for interceptor in &members {
            if !interceptor.is_enabled() {
                continue;
            }
            if phase(interceptor.as_ref(), flow).is_handled() {
                tracing::trace!("{} handled the flow, stopping chain", interceptor.name());
                return Decision::Handled;
            }
        }

        Decision::Continue
    }
}
