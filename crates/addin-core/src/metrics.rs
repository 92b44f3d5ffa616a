//! Global atomic counters for the add-in tree.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single `info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    modules_loaded: AtomicU64,
    items_built: AtomicU64,
    codons_excluded: AtomicU64,
    lazy_bindings_resolved: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            modules_loaded: AtomicU64::new(0),
            items_built: AtomicU64::new(0),
            codons_excluded: AtomicU64::new(0),
            lazy_bindings_resolved: AtomicU64::new(0),
        }
    }

    pub fn inc_modules_loaded(&self) {
        self.modules_loaded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "modules_loaded", "counter incremented");
    }

    pub fn add_items_built(&self, count: u64) {
        self.items_built.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_codons_excluded(&self) {
        self.codons_excluded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "codons_excluded", "counter incremented");
    }

    pub fn inc_lazy_bindings_resolved(&self) {
        self.lazy_bindings_resolved.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "lazy_bindings_resolved", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            modules_loaded = self.modules_loaded(),
            items_built = self.items_built(),
            codons_excluded = self.codons_excluded(),
            lazy_bindings_resolved = self.lazy_bindings_resolved(),
        );
    }

    pub fn modules_loaded(&self) -> u64 {
        self.modules_loaded.load(Ordering::Relaxed)
    }

    pub fn items_built(&self) -> u64 {
        self.items_built.load(Ordering::Relaxed)
    }

    pub fn codons_excluded(&self) -> u64 {
        self.codons_excluded.load(Ordering::Relaxed)
    }

    pub fn lazy_bindings_resolved(&self) -> u64 {
        self.lazy_bindings_resolved.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.modules_loaded.store(0, Ordering::Relaxed);
        self.items_built.store(0, Ordering::Relaxed);
        self.codons_excluded.store(0, Ordering::Relaxed);
        self.lazy_bindings_resolved.store(0, Ordering::Relaxed);
    }
}
