// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, RwLock},
};

use tracing::warn;

/// A typed subscription list for one event.
///
/// Handlers run synchronously on the emitting task, in subscription order.
/// A panicking handler does not take the publisher down: the panic is
/// caught, logged, and reported back to the caller so the offending session
/// can be closed without poisoning its endpoint.
pub struct Handlers<A> {
    subs: RwLock<Vec<Arc<dyn Fn(&A) + Send + Sync>>>,
}

impl<A> Default for Handlers<A> {
    fn default() -> Self {
        Self {
            subs: RwLock::new(Vec::new()),
        }
    }
}

impl<A> Handlers<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F)
    where F: Fn(&A) + Send + Sync + 'static {
        if let Ok(mut subs) = self.subs.write() {
            subs.push(Arc::new(handler));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.subs.read().map(|s| s.is_empty()).unwrap_or(true)
    }

    /// Invoke every handler with `arg`. Returns false if any handler
    /// panicked.
    pub fn emit(&self, arg: &A) -> bool {
        let subs = match self.subs.read() {
            Ok(subs) => subs.clone(),
            Err(_) => return true,
        };
        let mut all_ok = true;
        for handler in subs {
            if catch_unwind(AssertUnwindSafe(|| handler(arg))).is_err() {
                warn!("event handler panicked");
                all_ok = false;
            }
        }
        all_ok
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn handlers_run_in_subscription_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handlers: Handlers<u64> = Handlers::new();
        for expect in 0..3 {
            let calls = calls.clone();
            handlers.subscribe(move |_arg| {
                assert_eq!(calls.fetch_add(1, Ordering::SeqCst), expect);
            });
        }
        assert!(handlers.emit(&7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panicking_handler_is_contained() {
        let handlers: Handlers<()> = Handlers::new();
        let reached = Arc::new(AtomicUsize::new(0));
        handlers.subscribe(|_| panic!("boom"));
        let reached2 = reached.clone();
        handlers.subscribe(move |_| {
            reached2.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!handlers.emit(&()));
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }
}
