use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use harmoniq_plugin_scanner::{
    BinaryType, DiscoveryInfo, DiscoveryOptions, DiscoveryRequester, PluginDiscovery, PluginType,
};
use tracing_subscriber::EnvFilter;

const IDLE_INTERVAL: Duration = Duration::from_millis(10);
const PROBE_BIN: &str = "harmoniq-discovery-probe";

#[derive(Parser, Debug)]
#[command(name = "harmoniq-plugin-scanner")]
struct Args {
    /// Plugin type to discover (clap, vst2, vst3, lv2, ...)
    #[arg(long = "type", value_name = "TYPE")]
    plugin_type: PluginType,

    /// Binary architecture to look for
    #[arg(long = "binary", value_name = "BINARY", default_value = "native")]
    binary_type: BinaryType,

    /// Directories to search; each may itself be a path list
    #[arg(long = "path", value_name = "PATH", required = true)]
    paths: Vec<std::ffi::OsString>,

    /// Discovery tool; defaults to the probe installed next to this binary
    #[arg(long, value_name = "TOOL")]
    tool: Option<PathBuf>,

    /// JSON cache of earlier results, updated in place
    #[arg(long, value_name = "FILE")]
    cache: Option<PathBuf>,

    /// Seconds a probe may stay silent before it is skipped
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    timeout: u64,

    /// Print results as JSON lines
    #[arg(long)]
    json: bool,
}

/// Results of earlier runs, keyed by candidate hash.
#[derive(Debug, Default)]
struct CachedRequester {
    previous: BTreeMap<String, Vec<DiscoveryInfo>>,
    current: BTreeMap<String, Vec<DiscoveryInfo>>,
    found: Vec<DiscoveryInfo>,
}

impl DiscoveryRequester for CachedRequester {
    fn plugin_found(&mut self, info: Option<&DiscoveryInfo>, hash: Option<&str>) {
        if let Some(hash) = hash {
            let entry = self.current.entry(hash.to_owned()).or_default();
            entry.extend(info.cloned());
        }
        self.found.extend(info.cloned());
    }

    fn check_cache(&mut self, _filename: &Path, hash: &str) -> bool {
        let Some(plugins) = self.previous.get(hash) else {
            return false;
        };
        self.found.extend(plugins.iter().cloned());
        self.current.insert(hash.to_owned(), plugins.clone());
        true
    }
}

fn default_tool() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot locate the scanner binary")?;
    Ok(exe.with_file_name(format!("{PROBE_BIN}{}", std::env::consts::EXE_SUFFIX)))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let tool = match args.tool {
        Some(tool) => tool,
        None => default_tool()?,
    };
    let search_paths: Vec<PathBuf> = args.paths.iter().flat_map(|paths| std::env::split_paths(paths)).collect();

    let mut requester = CachedRequester::default();
    if let Some(cache) = args.cache.as_ref().filter(|cache| cache.exists()) {
        let raw = fs::read_to_string(cache).with_context(|| format!("reading {}", cache.display()))?;
        requester.previous = serde_json::from_str(&raw).context("invalid cache file")?;
    }

    let options = DiscoveryOptions {
        probe_timeout: Duration::from_secs(args.timeout),
        ..DiscoveryOptions::default()
    };
    let mut discovery = PluginDiscovery::start(
        tool,
        args.binary_type,
        args.plugin_type,
        &search_paths,
        requester,
        options,
    )?;
    while discovery.idle() {
        thread::sleep(IDLE_INTERVAL);
    }
    let requester = discovery.stop();

    if let Some(cache) = &args.cache {
        fs::write(cache, serde_json::to_string_pretty(&requester.current)?)
            .with_context(|| format!("writing {}", cache.display()))?;
    }
    for info in &requester.found {
        if args.json {
            println!("{}", serde_json::to_string(info)?);
        } else {
            println!(
                "{} [{}] by {} ({})",
                info.metadata.name,
                info.label,
                info.metadata.maker,
                info.filename.display()
            );
        }
    }
    Ok(())
}
