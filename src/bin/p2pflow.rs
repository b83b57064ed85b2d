use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use p2pflow::{
    utils::LoggingConfig, FlowContext, FlowLogic, FlowSession, InMemoryNetwork, Node, NodeConfig,
    PeerId,
};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "p2pflow", version, about = "P2P flow engine with draining mode", author)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the two-node "Hi there" exchange in process
    Demo {
        /// How long the responder node stays in draining mode
        #[arg(long, default_value_t = 5000)]
        drain_ms: u64,
        /// Skip draining mode entirely
        #[arg(long)]
        no_drain: bool,
    },
    /// Print the effective node configuration
    Config {
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

struct InitiateSessionFlow {
    counterparty: PeerId,
}

#[async_trait]
impl FlowLogic for InitiateSessionFlow {
    fn name(&self) -> &str {
        "InitiateSessionFlow"
    }

    async fn call(&self, ctx: &mut FlowContext) -> p2pflow::Result<Value> {
        let session = ctx.initiate_flow(self.counterparty.clone())?;
        ctx.send(&session, "Hi there")?;
        let answer: String = ctx.receive(&session).await?;
        Ok(json!(answer))
    }
}

struct InitiatedFlow {
    session: FlowSession,
}

#[async_trait]
impl FlowLogic for InitiatedFlow {
    fn name(&self) -> &str {
        "InitiatedFlow"
    }

    async fn call(&self, ctx: &mut FlowContext) -> p2pflow::Result<Value> {
        let message: String = ctx.receive(&self.session).await?;
        ctx.send(&self.session, &format!("{message} answer"))?;
        Ok(Value::Null)
    }
}

fn main() -> anyhow::Result<()> {
    LoggingConfig::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Demo { drain_ms, no_drain } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(handle_demo(drain_ms, no_drain))?
        }
        Command::Config { file } => handle_config(file)?,
    }
    Ok(())
}

async fn handle_demo(drain_ms: u64, no_drain: bool) -> anyhow::Result<()> {
    let config = NodeConfig::default().apply_env_overrides()?;
    let network = InMemoryNetwork::new();

    let initiated = Node::builder("O=Bank B")
        .with_config(config.clone())
        .with_transport(Arc::new(network.clone()))
        .with_responder("InitiateSessionFlow", |session| InitiatedFlow { session })
        .build()?;
    let initiating = Node::builder("O=Bank A")
        .with_config(config)
        .with_transport(Arc::new(network.clone()))
        .build()?;
    network.register(&initiated);
    network.register(&initiating);

    if !no_drain {
        initiated.set_flows_draining_mode_enabled(true);
    }

    let handle = initiating.start(InitiateSessionFlow {
        counterparty: initiated.identity().clone(),
    });

    if !no_drain {
        tokio::time::sleep(Duration::from_millis(drain_ms)).await;
        println!(
            "Held initiations on {}: {}",
            initiated.identity(),
            initiated.held_initiation_count()
        );
        println!("Disabling flows draining mode for {}", initiated.identity());
        initiated.set_flows_draining_mode_enabled(false);
    }

    let answer: String = handle.result_as().await?;
    println!("{answer}");
    Ok(())
}

fn handle_config(file: Option<PathBuf>) -> anyhow::Result<()> {
    let config = match file {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    }
    .apply_env_overrides()?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
