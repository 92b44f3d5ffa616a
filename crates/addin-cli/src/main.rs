//! AddIn Tree - command-line host
//!
//! The `addin` command loads the add-in documents named by a host
//! configuration file and works with the resulting extension tree.
//!
//! ## Commands
//!
//! - `tree`: Print the extension tree below a path
//! - `build`: Build the items of one node and print them
//! - `start`: Run the `/autostart` commands

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use addin_core::{
    command_item, AddInHost, BuildItemsArgs, BuildOutput, BuildRequest, Command, Doozer,
    HostConfig, HostSpan, Item, ModuleInstance, Node, StaticModuleLoader, METRICS,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "addin")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Extension tree host for AddIn Tree", long_about = None)]
struct Cli {
    /// Host configuration file (JSON)
    #[arg(short, long, global = true, env = "ADDIN_CONFIG", default_value = "addin.json")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the extension tree
    Tree {
        /// Node to start from
        #[arg(default_value = "/")]
        path: String,
    },

    /// Build every item of a node
    Build {
        /// Node path, e.g. /workbench/menu
        path: String,

        /// Only build codons of this type
        #[arg(short, long)]
        name: Option<String>,

        /// Build parameter passed to doozers and evaluators (JSON)
        #[arg(short, long)]
        parameter: Option<String>,
    },

    /// Load all add-ins and run the autostart commands
    Start,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    addin_core::init_tracing(cli.json, level);

    let _span = HostSpan::enter(&cli.config.to_string_lossy());
    let host = host_from_file(&cli.config)?;

    let result = match cli.command {
        Commands::Tree { path } => cmd_tree(&host, &path).await,
        Commands::Build {
            path,
            name,
            parameter,
        } => cmd_build(&host, &path, name.as_deref(), parameter.as_deref()).await,
        Commands::Start => cmd_start(&host).await,
    };
    METRICS.flush();
    result
}

fn host_from_file(config: &Path) -> Result<AddInHost> {
    let config = HostConfig::load(config)
        .with_context(|| format!("Failed to read host config {}", config.display()))?;
    Ok(host_from_config(config))
}

/// Creates a host with the builtin doozers plus the CLI's `Text` and `Log`.
fn host_from_config(config: HostConfig) -> AddInHost {
    let host = AddInHost::new(config, Arc::new(StaticModuleLoader::new()));
    host.sandbox().doozers().set("Text", Arc::new(TextDoozer));
    host.sandbox().doozers().set("Log", Arc::new(LogDoozer));
    host
}

async fn cmd_tree(host: &AddInHost, path: &str) -> Result<()> {
    host.load_add_ins().await.context("Failed to load add-ins")?;
    let node = host
        .sandbox()
        .node(path)?
        .with_context(|| format!("No node at {path}"))?;
    print!("{}", render_tree(&node));
    Ok(())
}

async fn cmd_build(host: &AddInHost, path: &str, name: Option<&str>, parameter: Option<&str>) -> Result<()> {
    host.load_add_ins().await.context("Failed to load add-ins")?;
    let node = host
        .sandbox()
        .node(path)?
        .with_context(|| format!("No node at {path}"))?;

    let mut args = BuildItemsArgs::new();
    if let Some(name) = name {
        args = args.named(name);
    }
    if let Some(parameter) = parameter {
        let value: Value = serde_json::from_str(parameter).context("Build parameter is not valid JSON")?;
        args = args.parameter(value);
    }

    let items = node
        .build_items(args, host.sandbox())
        .await
        .with_context(|| format!("Failed to build {path}"))?;
    info!(path = %path, items = items.len(), "built");
    for (index, item) in items.iter().enumerate() {
        println!("{index:>3}  {}", describe(item));
    }
    Ok(())
}

async fn cmd_start(host: &AddInHost) -> Result<()> {
    let report = host.start().await.context("Failed to start add-ins")?;
    println!(
        "autostart: {} executed, {} failed, {} skipped",
        report.executed, report.failed, report.skipped
    );
    Ok(())
}

/// One line per node: path, then its codons in declaration order.
fn render_tree(node: &Arc<Node>) -> String {
    let mut out = String::new();
    let mut stack = vec![Arc::clone(node)];
    while let Some(node) = stack.pop() {
        let codons = node.codons();
        let path = if node.path().is_empty() { "/" } else { node.path() };
        let _ = writeln!(out, "{path}");
        for codon in &codons {
            let _ = writeln!(out, "    {} {}", codon.name(), codon.id());
        }
        let mut children = node.children();
        children.reverse();
        stack.extend(children);
    }
    out
}

fn describe(item: &Item) -> String {
    if let Some(text) = item.downcast_ref::<String>() {
        text.clone()
    } else if item.is::<Arc<dyn Command>>() {
        "<command>".to_string()
    } else if let Some(module) = item.downcast_ref::<ModuleInstance>() {
        format!("<module: {}>", module.names().join(", "))
    } else {
        "<item>".to_string()
    }
}

/// Builds the codon's text content, falling back to `label`, then the id.
struct TextDoozer;

#[async_trait]
impl Doozer for TextDoozer {
    async fn build_item(&self, request: BuildRequest) -> addin_core::Result<BuildOutput> {
        let codon = request.codon();
        let text = codon
            .content()
            .map(str::trim)
            .or_else(|| codon.properties().non_empty("label"))
            .unwrap_or(codon.id())
            .to_string();
        Ok(BuildOutput::Single(Item::new(text)))
    }
}

/// Builds a command that logs `message` when executed.
struct LogDoozer;

#[async_trait]
impl Doozer for LogDoozer {
    async fn build_item(&self, request: BuildRequest) -> addin_core::Result<BuildOutput> {
        let codon = request.codon();
        let command = LogCommand {
            id: codon.id().to_string(),
            message: codon.get("message", codon.id()).to_string(),
        };
        Ok(BuildOutput::Single(command_item(Arc::new(command))))
    }
}

struct LogCommand {
    id: String,
    message: String,
}

impl Command for LogCommand {
    fn execute(&self) -> anyhow::Result<()> {
        info!(command = %self.id, "{}", self.message);
        Ok(())
    }
}
