//! Application start: load configured add-in documents, then run `/autostart`.

use std::sync::Arc;

use tracing::{info, warn};

use crate::addin::AddIn;
use crate::build::BuildItemsArgs;
use crate::config::HostConfig;
use crate::declaration::Element;
use crate::doozer::Command;
use crate::error::Result;
use crate::obs;
use crate::runtime::ModuleLoader;
use crate::sandbox::Sandbox;

/// Path whose items are executed as commands once every add-in is loaded.
pub const AUTOSTART_PATH: &str = "/autostart";

/// Outcome of running the autostart commands.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AutostartReport {
    pub executed: usize,
    pub failed: usize,
    /// Items that were not commands.
    pub skipped: usize,
}

pub struct AddInHost {
    config: HostConfig,
    sandbox: Sandbox,
}

impl AddInHost {
    /// Creates a host whose sandbox has the builtin doozers registered.
    pub fn new(config: HostConfig, loader: Arc<dyn ModuleLoader>) -> Self {
        Self::with_sandbox(config, Sandbox::with_defaults(loader))
    }

    pub fn with_sandbox(config: HostConfig, sandbox: Sandbox) -> Self {
        Self { config, sandbox }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Loads every enabled add-in, then runs autostart.
    pub async fn start(&self) -> Result<AutostartReport> {
        let loaded = self.load_add_ins().await?;
        info!(add_ins = loaded.len(), "add-ins loaded");
        self.run_autostart().await
    }

    /// Reads the configured documents in order and registers their add-ins.
    pub async fn load_add_ins(&self) -> Result<Vec<Arc<AddIn>>> {
        let mut loaded = Vec::new();
        for entry in self.config.resolve() {
            let data = tokio::fs::read_to_string(&entry.document).await?;
            let document = Element::from_json(&data)?;
            loaded.push(self.load_document(&document, &entry.base_location)?);
        }
        Ok(loaded)
    }

    /// Reads one in-memory add-in document.
    pub fn load_document(&self, document: &Element, base_location: &str) -> Result<Arc<AddIn>> {
        AddIn::load(&mut document.cursor(), base_location, &self.sandbox)
    }

    /// Builds [`AUTOSTART_PATH`] and executes each built command.
    ///
    /// A failing command is logged and the remaining commands still run.
    pub async fn run_autostart(&self) -> Result<AutostartReport> {
        let mut report = AutostartReport::default();
        let Some(node) = self.sandbox.node(AUTOSTART_PATH)? else {
            return Ok(report);
        };

        let items = node.build_items(BuildItemsArgs::new(), &self.sandbox).await?;
        for (index, item) in items.iter().enumerate() {
            let Some(command) = item.downcast_ref::<Arc<dyn Command>>() else {
                warn!(index, "autostart item is not a command");
                report.skipped += 1;
                continue;
            };
            match command.execute() {
                Ok(()) => report.executed += 1,
                Err(err) => {
                    obs::emit_autostart_command_failed(index, &err);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}
