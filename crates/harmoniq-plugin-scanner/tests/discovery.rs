#![cfg(target_os = "linux")]

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use harmoniq_plugin_scanner::{
    content_hash, BinaryType, DiscoveryError, DiscoveryInfo, DiscoveryOptions, DiscoveryRequester,
    PluginDiscovery, PluginType,
};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

const PROBE: &str = env!("CARGO_BIN_EXE_harmoniq-discovery-probe");

#[cfg(target_pointer_width = "64")]
const NATIVE_ELF: &[u8] = b"\x7fELF\x02\x01\x01\0\0\0\0\0\0\0\0\0";
#[cfg(not(target_pointer_width = "64"))]
const NATIVE_ELF: &[u8] = b"\x7fELF\x01\x01\x01\0\0\0\0\0\0\0\0\0";

#[derive(Debug, Default)]
struct Recorder {
    found: Vec<(Option<DiscoveryInfo>, Option<String>)>,
    cached: Vec<String>,
}

impl DiscoveryRequester for Recorder {
    fn plugin_found(&mut self, info: Option<&DiscoveryInfo>, hash: Option<&str>) {
        self.found.push((info.cloned(), hash.map(str::to_owned)));
    }

    fn check_cache(&mut self, _filename: &Path, hash: &str) -> bool {
        self.cached.iter().any(|known| known == hash)
    }
}

fn run(mut discovery: PluginDiscovery<Recorder>) -> Recorder {
    let deadline = Instant::now() + Duration::from_secs(30);
    while discovery.idle() {
        assert!(Instant::now() < deadline, "discovery did not finish");
        thread::sleep(Duration::from_millis(5));
    }
    discovery.stop()
}

fn plugin(dir: &Path, file: &str) -> PathBuf {
    let path = dir.join(file);
    fs::write(&path, NATIVE_ELF).unwrap();
    path
}

fn manifest(dir: &Path, value: serde_json::Value) {
    fs::write(dir.join("manifest.json"), value.to_string()).unwrap();
}

fn start(root: &Path, requester: Recorder, options: DiscoveryOptions) -> PluginDiscovery<Recorder> {
    PluginDiscovery::start(
        PROBE,
        BinaryType::NATIVE,
        PluginType::Clap,
        &[root.to_path_buf()],
        requester,
        options,
    )
    .unwrap()
}

#[test]
fn plugins_are_reported_with_their_binary_hash() {
    let dir = tempdir().unwrap();
    let synth = plugin(dir.path(), "synth.clap");
    let empty = plugin(dir.path(), "empty.clap");
    manifest(
        dir.path(),
        serde_json::json!({
            "plugins": [
                { "binary": "synth.clap", "name": "Synth One", "label": "one", "maker": "Acme", "audio_outs": 2 },
                { "binary": "synth.clap", "name": "Synth Two", "label": "two", "maker": "Acme" }
            ]
        }),
    );

    let recorder = run(start(dir.path(), Recorder::default(), DiscoveryOptions::default()));

    let empty_hash = content_hash(&empty).unwrap();
    let synth_hash = content_hash(&synth).unwrap();
    assert_eq!(recorder.found.len(), 3);
    assert_eq!(recorder.found[0], (None, Some(empty_hash)));

    let (Some(one), Some(hash)) = &recorder.found[1] else {
        panic!("expected a plugin");
    };
    assert_eq!(hash, &synth_hash);
    assert_eq!(one.filename, synth);
    assert_eq!(one.label, "one");
    assert_eq!(one.metadata.name, "Synth One");
    assert_eq!(one.io.audio_outs, 2);
    assert_eq!(one.binary_type, Some(BinaryType::NATIVE));
    assert_eq!(recorder.found[2].0.as_ref().map(|info| info.label.as_str()), Some("two"));
}

#[test]
fn cached_binaries_are_not_probed() {
    let dir = tempdir().unwrap();
    let synth = plugin(dir.path(), "synth.clap");
    manifest(dir.path(), serde_json::json!({ "plugins": [{ "name": "Synth", "label": "s" }] }));

    let requester = Recorder {
        cached: vec![content_hash(&synth).unwrap()],
        ..Recorder::default()
    };
    let recorder = run(start(dir.path(), requester, DiscoveryOptions::default()));
    assert!(recorder.found.is_empty());
}

#[test]
fn silent_probe_is_skipped_after_the_timeout() {
    let dir = tempdir().unwrap();
    let stuck = dir.path().join("a-stuck");
    let fine = dir.path().join("b-fine");
    fs::create_dir_all(&stuck).unwrap();
    fs::create_dir_all(&fine).unwrap();
    plugin(&stuck, "stuck.clap");
    plugin(&fine, "fine.clap");
    manifest(&stuck, serde_json::json!({ "behavior": "hang" }));
    manifest(&fine, serde_json::json!({ "plugins": [{ "name": "Fine", "label": "fine" }] }));

    let options = DiscoveryOptions {
        probe_timeout: Duration::from_millis(300),
        skip_timeout: Duration::from_millis(500),
        ..DiscoveryOptions::default()
    };
    let started = Instant::now();
    let recorder = run(start(dir.path(), Recorder::default(), options));
    assert!(started.elapsed() < Duration::from_secs(10));

    let labels: Vec<_> = recorder
        .found
        .iter()
        .map(|(info, _)| info.as_ref().map(|info| info.label.clone()))
        .collect();
    assert_eq!(labels, vec![None, Some("fine".to_owned())]);
}

#[test]
fn crashing_probe_counts_as_empty_binary() {
    let dir = tempdir().unwrap();
    let bad = plugin(dir.path(), "bad.clap");
    manifest(dir.path(), serde_json::json!({ "behavior": "crash" }));

    let recorder = run(start(dir.path(), Recorder::default(), DiscoveryOptions::default()));
    assert_eq!(recorder.found, vec![(None, Some(content_hash(&bad).unwrap()))]);
}

#[test]
fn lv2_bundles_come_from_the_discovery_path() {
    let dir = tempdir().unwrap();
    let bundle = dir.path().join("reverb.lv2");
    fs::create_dir_all(&bundle).unwrap();
    manifest(
        &bundle,
        serde_json::json!({ "plugins": [{ "name": "Reverb", "label": "urn:acme:reverb" }] }),
    );

    let discovery = PluginDiscovery::start(
        PROBE,
        BinaryType::NATIVE,
        PluginType::Lv2,
        &[dir.path().to_path_buf()],
        Recorder::default(),
        DiscoveryOptions::default(),
    )
    .unwrap();
    let recorder = run(discovery);

    assert_eq!(recorder.found.len(), 1);
    let (Some(info), None) = &recorder.found[0] else {
        panic!("expected an unhashed plugin");
    };
    assert_eq!(info.filename, PathBuf::from("reverb.lv2"));
    assert_eq!(info.label, "urn:acme:reverb");
}

#[test]
fn impossible_requests_are_rejected() {
    let dir = tempdir().unwrap();
    let err = PluginDiscovery::start(
        PROBE,
        BinaryType::NATIVE,
        PluginType::Vst3,
        &[dir.path().to_path_buf()],
        Recorder::default(),
        DiscoveryOptions::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, DiscoveryError::NoCandidates { .. }));

    let err = PluginDiscovery::start(
        PROBE,
        BinaryType::Win32,
        PluginType::Lv2,
        &[dir.path().to_path_buf()],
        Recorder::default(),
        DiscoveryOptions::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, DiscoveryError::Unsupported { .. }));
}

#[test]
fn scanner_cli_prints_found_plugins_and_writes_the_cache() {
    let dir = tempdir().unwrap();
    let plugins = dir.path().join("plugins");
    fs::create_dir_all(&plugins).unwrap();
    plugin(&plugins, "pad.clap");
    manifest(
        &plugins,
        serde_json::json!({ "plugins": [{ "name": "Pad", "label": "pad", "maker": "Acme" }] }),
    );
    let cache = dir.path().join("cache.json");

    let output = Command::cargo_bin("harmoniq-plugin-scanner")
        .unwrap()
        .args(["--type", "clap", "--tool", PROBE, "--json", "--path"])
        .arg(&plugins)
        .arg("--cache")
        .arg(&cache)
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let info: DiscoveryInfo = serde_json::from_str(stdout.lines().next().unwrap()).unwrap();
    assert_eq!(info.metadata.name, "Pad");
    assert!(fs::read_to_string(&cache).unwrap().contains("\"pad\""));
}
