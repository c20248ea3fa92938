use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Architecture of a plugin binary, as recognised from its executable header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryType {
    Posix32,
    Posix64,
    Win32,
    Win64,
    Other,
}

impl BinaryType {
    #[cfg(all(windows, target_pointer_width = "64"))]
    pub const NATIVE: BinaryType = BinaryType::Win64;
    #[cfg(all(windows, not(target_pointer_width = "64")))]
    pub const NATIVE: BinaryType = BinaryType::Win32;
    #[cfg(all(not(windows), target_pointer_width = "64"))]
    pub const NATIVE: BinaryType = BinaryType::Posix64;
    #[cfg(all(not(windows), not(target_pointer_width = "64")))]
    pub const NATIVE: BinaryType = BinaryType::Posix32;

    pub fn is_windows(self) -> bool {
        matches!(self, BinaryType::Win32 | BinaryType::Win64)
    }

    /// Code used on the probe wire (`build <n>`).
    pub fn code(self) -> u8 {
        match self {
            BinaryType::Posix32 => 1,
            BinaryType::Posix64 => 2,
            BinaryType::Win32 => 3,
            BinaryType::Win64 => 4,
            BinaryType::Other => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => BinaryType::Posix32,
            2 => BinaryType::Posix64,
            3 => BinaryType::Win32,
            4 => BinaryType::Win64,
            5 => BinaryType::Other,
            _ => return None,
        })
    }
}

impl fmt::Display for BinaryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryType::Posix32 => "posix32",
            BinaryType::Posix64 => "posix64",
            BinaryType::Win32 => "win32",
            BinaryType::Win64 => "win64",
            BinaryType::Other => "other",
        })
    }
}

impl FromStr for BinaryType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "native" => Ok(BinaryType::NATIVE),
            "posix32" => Ok(BinaryType::Posix32),
            "posix64" => Ok(BinaryType::Posix64),
            "win32" => Ok(BinaryType::Win32),
            "win64" => Ok(BinaryType::Win64),
            "other" => Ok(BinaryType::Other),
            other => Err(format!("unsupported binary type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    Internal,
    Ladspa,
    Dssi,
    Lv2,
    Vst2,
    Vst3,
    Au,
    Clap,
    Dls,
    Gig,
    Sf2,
    Sfz,
    Jsfx,
}

impl PluginType {
    pub fn as_str(self) -> &'static str {
        match self {
            PluginType::Internal => "internal",
            PluginType::Ladspa => "ladspa",
            PluginType::Dssi => "dssi",
            PluginType::Lv2 => "lv2",
            PluginType::Vst2 => "vst2",
            PluginType::Vst3 => "vst3",
            PluginType::Au => "au",
            PluginType::Clap => "clap",
            PluginType::Dls => "dls",
            PluginType::Gig => "gig",
            PluginType::Sf2 => "sf2",
            PluginType::Sfz => "sfz",
            PluginType::Jsfx => "jsfx",
        }
    }

    /// Types that only exist as native binaries or plain data files.
    pub fn is_native_only(self) -> bool {
        matches!(
            self,
            PluginType::Internal
                | PluginType::Lv2
                | PluginType::Sfz
                | PluginType::Jsfx
                | PluginType::Dls
                | PluginType::Gig
                | PluginType::Sf2
        )
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value.to_ascii_lowercase().as_str() {
            "internal" => PluginType::Internal,
            "ladspa" => PluginType::Ladspa,
            "dssi" => PluginType::Dssi,
            "lv2" => PluginType::Lv2,
            "vst" | "vst2" => PluginType::Vst2,
            "vst3" => PluginType::Vst3,
            "au" => PluginType::Au,
            "clap" => PluginType::Clap,
            "dls" => PluginType::Dls,
            "gig" => PluginType::Gig,
            "sf2" => PluginType::Sf2,
            "sfz" => PluginType::Sfz,
            "jsfx" => PluginType::Jsfx,
            other => return Err(format!("unsupported plugin type: {other}")),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginCategory {
    #[default]
    None,
    Synth,
    Delay,
    Eq,
    Filter,
    Distortion,
    Dynamics,
    Modulator,
    Utility,
    Other,
}

impl PluginCategory {
    /// Lenient parse used for probe output; unknown names map to `Other`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "none" => PluginCategory::None,
            "synth" => PluginCategory::Synth,
            "delay" => PluginCategory::Delay,
            "eq" => PluginCategory::Eq,
            "filter" => PluginCategory::Filter,
            "distortion" => PluginCategory::Distortion,
            "dynamics" => PluginCategory::Dynamics,
            "modulator" => PluginCategory::Modulator,
            "utility" => PluginCategory::Utility,
            _ => PluginCategory::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PluginCategory::None => "none",
            PluginCategory::Synth => "synth",
            PluginCategory::Delay => "delay",
            PluginCategory::Eq => "eq",
            PluginCategory::Filter => "filter",
            PluginCategory::Distortion => "distortion",
            PluginCategory::Dynamics => "dynamics",
            PluginCategory::Modulator => "modulator",
            PluginCategory::Utility => "utility",
            PluginCategory::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub name: String,
    pub maker: String,
    pub category: PluginCategory,
    pub hints: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginIo {
    pub audio_ins: u32,
    pub audio_outs: u32,
    pub cv_ins: u32,
    pub cv_outs: u32,
    pub midi_ins: u32,
    pub midi_outs: u32,
    pub parameter_ins: u32,
    pub parameter_outs: u32,
}

/// One plugin reported by a discovery probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryInfo {
    pub binary_type: Option<BinaryType>,
    pub plugin_type: PluginType,
    /// Binary or bundle the plugin lives in; empty for `:all` discoveries
    /// that have no file of their own.
    pub filename: PathBuf,
    pub label: String,
    pub unique_id: u64,
    pub metadata: PluginMetadata,
    pub io: PluginIo,
}

impl DiscoveryInfo {
    pub fn new(plugin_type: PluginType) -> Self {
        Self {
            binary_type: None,
            plugin_type,
            filename: PathBuf::new(),
            label: String::new(),
            unique_id: 0,
            metadata: PluginMetadata::default(),
            io: PluginIo::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn type_names_parse_case_insensitively() {
        assert_eq!("VST3".parse::<PluginType>(), Ok(PluginType::Vst3));
        assert_eq!("vst".parse::<PluginType>(), Ok(PluginType::Vst2));
        assert_eq!("native".parse::<BinaryType>(), Ok(BinaryType::NATIVE));
        assert!("ovst".parse::<PluginType>().is_err());
    }

    #[test]
    fn binary_codes_are_stable() {
        for binary in [
            BinaryType::Posix32,
            BinaryType::Posix64,
            BinaryType::Win32,
            BinaryType::Win64,
            BinaryType::Other,
        ] {
            assert_eq!(BinaryType::from_code(binary.code()), Some(binary));
        }
        assert_eq!(BinaryType::from_code(0), None);
    }

    #[test]
    fn unknown_categories_fall_back_to_other() {
        assert_eq!(PluginCategory::from_name("Synth"), PluginCategory::Synth);
        assert_eq!(PluginCategory::from_name("granular"), PluginCategory::Other);
        assert_eq!(PluginCategory::from_name(""), PluginCategory::None);
    }
}
