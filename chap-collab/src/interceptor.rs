//! Turns buffer change notifications into outbound patches.
//!
//! The interceptor is the loop breaker: while `applying_remote` is set, a
//! change notification is the echo of a remote patch and must not be
//! re-emitted.

use log::trace;

use crate::buffer::BufferChange;
use crate::patch::Patch;

#[derive(Debug, Default)]
pub struct EditInterceptor {
    applying_remote: bool,
    closing: bool,
    clock: u64,
}

impl EditInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert a change into a patch, or `None` if it must not be emitted.
    ///
    /// Suppressed: changes made while applying a remote patch, bulk loads,
    /// changes with an empty origin, empty deltas, and anything after the
    /// session started closing.
    pub fn intercept(&mut self, change: &BufferChange) -> Option<Patch> {
        if self.closing {
            trace!("Dropping change during teardown");
            return None;
        }
        if self.applying_remote {
            trace!("Suppressing echo of remote patch");
            return None;
        }
        if !change.origin.is_broadcastable() {
            trace!("Not emitting change with origin {:?}", change.origin.as_str());
            return None;
        }
        if change.removed.is_empty() && change.inserted.is_empty() {
            return None;
        }

        self.clock += 1;
        Some(Patch::new(
            change.origin.clone(),
            change.from,
            change.to,
            change.removed.clone(),
            change.inserted.clone(),
            self.clock,
        ))
    }

    pub fn begin_remote(&mut self) {
        self.applying_remote = true;
    }

    pub fn end_remote(&mut self) {
        self.applying_remote = false;
    }

    pub fn is_applying_remote(&self) -> bool {
        self.applying_remote
    }

    pub fn close(&mut self) {
        self.closing = true;
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Clock value of the last emitted patch.
    pub fn clock(&self) -> u64 {
        self.clock
    }
}
