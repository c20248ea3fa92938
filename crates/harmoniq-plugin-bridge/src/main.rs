use anyhow::Context;
use clap::Parser;
use harmoniq_pipe::{PipeClient, PipeConfig};
use harmoniq_plugin_bridge::{BridgeBehavior, BridgeServer};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "harmoniq-plugin-bridge", about = "Out-of-process plugin bridge")]
struct Args {
    /// Host sample rate in Hz.
    sample_rate: u32,
    /// Window title for the plugin UI.
    title: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let behavior = BridgeBehavior::from_env();
    tracing::info!(sample_rate = args.sample_rate, title = %args.title, ?behavior, "bridge starting");

    let client = PipeClient::from_stdio(PipeConfig::default()).context("failed to attach to host pipe")?;
    BridgeServer::new(behavior).run(client);
    Ok(())
}
