use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};
use walkdir::{DirEntry, WalkDir};

use crate::info::{BinaryType, PluginType};

const HEADER_PROBE_LEN: usize = 4096;

/// How candidates for a plugin type are found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateMode {
    /// Regular files with the extension, filtered by executable header.
    Files(&'static str),
    /// Data files with the extension; there is no header to check.
    DataFiles(&'static str),
    /// Bundle directories with the extension.
    Directories(&'static str),
    /// `.vst3` bundles, plus bare `.vst3` files for Windows binaries.
    Vst3,
    /// The probe enumerates everything itself (`:all`).
    All,
}

/// Picks the candidate mode, or `None` when the combination cannot exist.
pub fn candidate_mode(plugin_type: PluginType, binary_type: BinaryType) -> Option<CandidateMode> {
    if plugin_type.is_native_only() && binary_type != BinaryType::NATIVE {
        return None;
    }
    let windows = cfg!(windows) || binary_type.is_windows();
    let mac = cfg!(target_os = "macos");
    Some(match plugin_type {
        PluginType::Internal | PluginType::Lv2 | PluginType::Sfz | PluginType::Jsfx => {
            CandidateMode::All
        }
        PluginType::Ladspa | PluginType::Dssi if windows => CandidateMode::Files("dll"),
        PluginType::Ladspa | PluginType::Dssi if mac => CandidateMode::Files("dylib"),
        PluginType::Ladspa | PluginType::Dssi => CandidateMode::Files("so"),
        PluginType::Vst2 if windows => CandidateMode::Files("dll"),
        PluginType::Vst2 if mac => CandidateMode::Directories("vst"),
        PluginType::Vst2 => CandidateMode::Files("so"),
        PluginType::Vst3 => CandidateMode::Vst3,
        PluginType::Au => CandidateMode::Directories("component"),
        PluginType::Clap if mac => CandidateMode::Directories("clap"),
        PluginType::Clap => CandidateMode::Files("clap"),
        PluginType::Dls => CandidateMode::DataFiles("dls"),
        PluginType::Gig => CandidateMode::DataFiles("gig"),
        PluginType::Sf2 => CandidateMode::DataFiles("sf2"),
    })
}

/// Walks every search root and returns the matching candidates, sorted.
/// Hidden files and directories are skipped; bundles are not descended into.
pub fn find_candidates(mode: CandidateMode, binary_type: BinaryType, roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for root in roots {
        if root.as_os_str().is_empty() || !root.exists() {
            continue;
        }
        let mut walker = WalkDir::new(root).follow_links(true).into_iter();
        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::debug!(root = %root.display(), %err, "skipping entry while scanning");
                    continue;
                }
            };
            if entry.depth() > 0 && is_hidden(&entry) {
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            }
            let is_dir = entry.file_type().is_dir();
            let path = entry.path();
            let matched = match mode {
                CandidateMode::All => false,
                CandidateMode::Files(ext) => {
                    !is_dir && has_extension(path, ext) && detect_binary_type(path) == Some(binary_type)
                }
                CandidateMode::DataFiles(ext) => !is_dir && has_extension(path, ext),
                CandidateMode::Directories(ext) => is_dir && entry.depth() > 0 && has_extension(path, ext),
                CandidateMode::Vst3 => {
                    entry.depth() > 0
                        && has_extension(path, "vst3")
                        && (is_dir || binary_type.is_windows())
                        && vst3_binary_type(path) == Some(binary_type)
                }
            };
            if matched {
                found.push(path.to_path_buf());
                if is_dir {
                    walker.skip_current_dir();
                }
            }
        }
    }
    found.sort();
    found.dedup();
    found
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_str().is_some_and(|name| name.starts_with('.'))
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|found| found.to_str())
        .is_some_and(|found| found.eq_ignore_ascii_case(ext))
}

/// A `.vst3` bundle's type is that of the first recognisable binary inside it.
fn vst3_binary_type(path: &Path) -> Option<BinaryType> {
    if path.is_file() {
        return detect_binary_type(path);
    }
    WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .find_map(|entry| detect_binary_type(entry.path()))
}

/// Reads the executable header of `path` (ELF, PE or Mach-O).
pub fn detect_binary_type(path: &Path) -> Option<BinaryType> {
    let mut file = File::open(path).ok()?;
    let mut header = Vec::with_capacity(HEADER_PROBE_LEN);
    file.by_ref()
        .take(HEADER_PROBE_LEN as u64)
        .read_to_end(&mut header)
        .ok()?;
    binary_type_from_header(&header)
}

pub fn binary_type_from_header(header: &[u8]) -> Option<BinaryType> {
    match header {
        [0x7f, b'E', b'L', b'F', class, ..] => match class {
            1 => Some(BinaryType::Posix32),
            2 => Some(BinaryType::Posix64),
            _ => Some(BinaryType::Other),
        },
        [0xfe, 0xed, 0xfa, 0xce, ..] | [0xce, 0xfa, 0xed, 0xfe, ..] => Some(BinaryType::Posix32),
        [0xfe, 0xed, 0xfa, 0xcf, ..] | [0xcf, 0xfa, 0xed, 0xfe, ..] | [0xca, 0xfe, 0xba, 0xbe, ..] => {
            Some(BinaryType::Posix64)
        }
        [b'M', b'Z', ..] => pe_binary_type(header),
        _ => None,
    }
}

fn pe_binary_type(header: &[u8]) -> Option<BinaryType> {
    let lfanew = header.get(0x3c..0x40)?;
    let offset = u32::from_le_bytes([lfanew[0], lfanew[1], lfanew[2], lfanew[3]]) as usize;
    let signature = header.get(offset..offset.checked_add(6)?)?;
    if &signature[..4] != b"PE\0\0" {
        return None;
    }
    Some(match u16::from_le_bytes([signature[4], signature[5]]) {
        0x014c => BinaryType::Win32,
        0x8664 | 0xaa64 => BinaryType::Win64,
        _ => BinaryType::Other,
    })
}

/// Identity of a candidate for caching: SHA-256 over the full path and the
/// modification time in milliseconds, hex encoded. File contents are not read.
pub fn content_hash(path: &Path) -> io::Result<String> {
    let modified = path.metadata()?.modified()?;
    let mtime = modified
        .duration_since(UNIX_EPOCH)
        .map(|since| i64::try_from(since.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0);
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(mtime.to_ne_bytes());
    Ok(hex::encode(hasher.finalize()))
}
