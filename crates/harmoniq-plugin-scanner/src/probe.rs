use std::fs;
use std::path::{Path, PathBuf};

use harmoniq_pipe::line::{split_command, EXITING};
use harmoniq_pipe::{Fields, PipeError};
use serde::{Deserialize, Serialize};

use crate::info::{BinaryType, DiscoveryInfo, PluginCategory, PluginType};

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// What one probe line meant to the scanner.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeLine {
    /// `end` closed a plugin description.
    Found(DiscoveryInfo),
    Exiting,
    Handled,
    Unknown,
}

/// Builds [`DiscoveryInfo`] records out of the probe's `key value` lines.
#[derive(Debug)]
pub struct ProbeParser {
    plugin_type: PluginType,
    next: DiscoveryInfo,
}

impl ProbeParser {
    pub fn new(plugin_type: PluginType) -> Self {
        Self {
            plugin_type,
            next: DiscoveryInfo::new(plugin_type),
        }
    }

    pub fn feed(&mut self, line: &str) -> Result<ProbeLine, PipeError> {
        let (key, value) = split_command(line);
        let mut fields = Fields::new(value);
        match key {
            "warning" | "error" => tracing::info!(probe = key, "{value}"),
            "init" => self.next = DiscoveryInfo::new(self.plugin_type),
            "end" => {
                let info = std::mem::replace(&mut self.next, DiscoveryInfo::new(self.plugin_type));
                return Ok(ProbeLine::Found(info));
            }
            "build" => {
                let code: u8 = fields.next("a binary type")?;
                self.next.binary_type = BinaryType::from_code(code);
            }
            "hints" => self.next.metadata.hints = fields.next("plugin hints")?,
            "category" => self.next.metadata.category = PluginCategory::from_name(value),
            "name" => self.next.metadata.name = value.to_owned(),
            "label" => self.next.label = value.to_owned(),
            "maker" => self.next.metadata.maker = value.to_owned(),
            "uniqueId" => self.next.unique_id = fields.next("a unique id")?,
            "audio.ins" => self.next.io.audio_ins = fields.next("a port count")?,
            "audio.outs" => self.next.io.audio_outs = fields.next("a port count")?,
            "cv.ins" => self.next.io.cv_ins = fields.next("a port count")?,
            "cv.outs" => self.next.io.cv_outs = fields.next("a port count")?,
            "midi.ins" => self.next.io.midi_ins = fields.next("a port count")?,
            "midi.outs" => self.next.io.midi_outs = fields.next("a port count")?,
            "parameters.ins" => self.next.io.parameter_ins = fields.next("a parameter count")?,
            "parameters.outs" => self.next.io.parameter_outs = fields.next("a parameter count")?,
            EXITING => return Ok(ProbeLine::Exiting),
            _ => return Ok(ProbeLine::Unknown),
        }
        Ok(ProbeLine::Handled)
    }
}

/// Test hook carried by a manifest: how the probe misbehaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeBehavior {
    #[default]
    Normal,
    /// Reports nothing and never exits on its own.
    Hang,
    /// Aborts before reporting.
    Crash,
}

/// Plugin descriptions shipped next to (or inside) a plugin binary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeManifest {
    pub behavior: ProbeBehavior,
    pub plugins: Vec<ManifestPlugin>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestPlugin {
    /// File name this entry belongs to when the manifest is shared by a
    /// directory of binaries. Entries without one match every binary.
    pub binary: Option<String>,
    pub name: String,
    pub label: String,
    pub maker: String,
    pub category: Option<String>,
    pub unique_id: u64,
    pub hints: u32,
    pub audio_ins: u32,
    pub audio_outs: u32,
    pub cv_ins: u32,
    pub cv_outs: u32,
    pub midi_ins: u32,
    pub midi_outs: u32,
    pub parameter_ins: u32,
    pub parameter_outs: u32,
}

impl ManifestPlugin {
    fn applies_to(&self, candidate: &Path) -> bool {
        match &self.binary {
            None => true,
            Some(binary) => candidate
                .file_name()
                .is_some_and(|name| name.to_string_lossy() == binary.as_str()),
        }
    }

    /// The probe lines describing this plugin, `init` through `end`.
    pub fn to_lines(&self, binary_type: BinaryType, label: &str) -> Vec<String> {
        let category = self.category.as_deref().map_or(PluginCategory::None, PluginCategory::from_name);
        let mut lines = vec![
            "init".to_owned(),
            format!("build {}", binary_type.code()),
            format!("hints {}", self.hints),
            format!("category {}", category.as_str()),
            format!("name {}", self.name),
            format!("label {label}"),
            format!("maker {}", self.maker),
            format!("uniqueId {}", self.unique_id),
        ];
        for (key, count) in [
            ("audio.ins", self.audio_ins),
            ("audio.outs", self.audio_outs),
            ("cv.ins", self.cv_ins),
            ("cv.outs", self.cv_outs),
            ("midi.ins", self.midi_ins),
            ("midi.outs", self.midi_outs),
            ("parameters.ins", self.parameter_ins),
            ("parameters.outs", self.parameter_outs),
        ] {
            lines.push(format!("{key} {count}"));
        }
        lines.push("end".to_owned());
        lines
    }
}

/// Manifest describing `candidate`: inside a bundle directory (also under
/// `Contents/`) or shared by the directory a plain file lives in.
pub fn find_manifest(candidate: &Path) -> Option<PathBuf> {
    let candidates = if candidate.is_dir() {
        vec![
            candidate.join(MANIFEST_FILE),
            candidate.join("Contents").join(MANIFEST_FILE),
        ]
    } else {
        candidate
            .parent()
            .map(|parent| vec![parent.join(MANIFEST_FILE)])
            .unwrap_or_default()
    };
    candidates.into_iter().find(|path| path.is_file())
}

pub fn read_manifest(path: &Path) -> Result<ProbeManifest, ProbeError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Loads the manifest for `candidate` keeping only the entries that apply to it.
pub fn manifest_for(candidate: &Path) -> Result<Option<ProbeManifest>, ProbeError> {
    let Some(path) = find_manifest(candidate) else {
        return Ok(None);
    };
    let mut manifest = read_manifest(&path)?;
    manifest.plugins.retain(|plugin| plugin.applies_to(candidate));
    Ok(Some(manifest))
}
