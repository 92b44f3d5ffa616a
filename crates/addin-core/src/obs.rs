//! Structured lifecycle events for the add-in tree.
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`); failures
//! that are swallowed on purpose are emitted at `warn!`.

use tracing::{info, warn};

/// RAII guard that enters a host-scoped span for synchronous startup work.
///
/// ```ignore
/// let _span = HostSpan::enter("addins.json");
/// ```
pub struct HostSpan {
    _span: tracing::span::EnteredSpan,
}

impl HostSpan {
    pub fn enter(config: &str) -> Self {
        let span = tracing::info_span!("addin.host", config = %config);
        Self {
            _span: span.entered(),
        }
    }
}

/// Span attached to an asynchronous node build.
pub fn node_span(path: &str) -> tracing::Span {
    tracing::debug_span!("addin.node", path = %path)
}

/// Emit event: an add-in document was read and registered.
pub fn emit_add_in_loaded(name: &str, base_location: &str, runtimes: usize) {
    info!(
        event = "addin.loaded",
        add_in = %name,
        base_location = %base_location,
        runtimes = runtimes,
    );
}

/// Emit event: a runtime loaded and instantiated its module.
pub fn emit_module_loaded(add_in: &str, runtime: &str, locator: &str, exports: usize) {
    info!(
        event = "runtime.module_loaded",
        add_in = %add_in,
        runtime = %runtime,
        locator = %locator,
        exports = exports,
    );
}

/// Emit event: a codon was excluded by its guards.
pub fn emit_codon_excluded(codon: &str, id: &str) {
    tracing::debug!(event = "codon.excluded", codon = %codon, id = %id);
}

/// Emit event: a node finished building.
pub fn emit_items_built(path: &str, codons: usize, items: usize) {
    tracing::debug!(event = "node.items_built", path = %path, codons = codons, items = items);
}

/// Emit event: an autostart command failed (warning level).
pub fn emit_autostart_command_failed(index: usize, error: &dyn std::fmt::Display) {
    warn!(event = "autostart.command_failed", index = index, error = %error);
}
