use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use harmoniq_pipe::{PipeClient, PipeConfig, PipeHandler};
use harmoniq_plugin_scanner::{
    detect_binary_type, manifest_for, read_manifest, BinaryType, PluginType, ProbeBehavior,
    ProbeManifest, ALL_TARGET, DISCOVERY_PATH_ENV, MANIFEST_FILE,
};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

const HANG_INTERVAL: Duration = Duration::from_millis(50);

/// Describes the plugins in one candidate from its `manifest.json`.
#[derive(Parser, Debug)]
#[command(name = "harmoniq-discovery-probe")]
struct Args {
    plugin_type: PluginType,
    /// Candidate binary or bundle, or `:all`
    target: String,
}

struct Ignore;

impl PipeHandler for Ignore {
    fn message_received(&mut self, _line: &str) -> bool {
        true
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut client = PipeClient::from_stdio(PipeConfig::default()).context("failed to attach to scanner pipe")?;

    let lines = if args.target == ALL_TARGET {
        describe_all(args.plugin_type)
    } else {
        describe_candidate(Path::new(&args.target))
    };
    let lines = match lines {
        Ok(Some(lines)) => lines,
        Ok(None) => {
            while client.is_running() {
                client.idle_timeout(&mut Ignore, HANG_INTERVAL);
            }
            return Ok(());
        }
        Err(err) => vec![format!("error {err:#}")],
    };

    let mut writer = client.channel().lock();
    for line in &lines {
        writer.write_and_fix_message(line);
    }
    writer.sync_and_unlock();
    client.write_exiting_message_and_wait();
    Ok(())
}

/// Probe lines for one candidate; `None` means hang until told to quit.
fn describe_candidate(candidate: &Path) -> anyhow::Result<Option<Vec<String>>> {
    let Some(manifest) = manifest_for(candidate)? else {
        return Ok(Some(vec![format!("warning no manifest for {}", candidate.display())]));
    };
    let binary_type = detect_binary_type(candidate).unwrap_or(BinaryType::NATIVE);
    crash_if_asked(&manifest);
    if manifest.behavior == ProbeBehavior::Hang {
        return Ok(None);
    }
    Ok(Some(
        manifest
            .plugins
            .iter()
            .flat_map(|plugin| plugin.to_lines(binary_type, &plugin.label))
            .collect(),
    ))
}

/// Probe lines for every manifest under the discovery path.
fn describe_all(plugin_type: PluginType) -> anyhow::Result<Option<Vec<String>>> {
    let roots: Vec<PathBuf> = std::env::var_os(DISCOVERY_PATH_ENV)
        .map(|paths| std::env::split_paths(&paths).collect())
        .unwrap_or_default();
    let mut lines = Vec::new();
    for root in roots {
        for entry in WalkDir::new(&root).into_iter().filter_map(Result::ok) {
            if entry.file_name().to_str() != Some(MANIFEST_FILE) {
                continue;
            }
            let manifest = read_manifest(entry.path())?;
            crash_if_asked(&manifest);
            if manifest.behavior == ProbeBehavior::Hang {
                return Ok(None);
            }
            let bundle = entry
                .path()
                .parent()
                .and_then(Path::file_name)
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            for plugin in &manifest.plugins {
                let label = if plugin_type == PluginType::Lv2 {
                    format!("{bundle}/{}", plugin.label)
                } else {
                    plugin.label.clone()
                };
                lines.extend(plugin.to_lines(BinaryType::NATIVE, &label));
            }
        }
    }
    Ok(Some(lines))
}

fn crash_if_asked(manifest: &ProbeManifest) {
    if manifest.behavior == ProbeBehavior::Crash {
        tracing::error!("manifest asks the probe to crash");
        std::process::abort();
    }
}
