use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::info::BinaryType;

const PREFIX_SEARCH_DEPTH: usize = 10;

/// How Windows binaries are probed on other platforms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WineOptions {
    /// Wine launcher; `wine` from `PATH` when unset.
    pub executable: Option<PathBuf>,
    /// Look for a prefix (a directory holding `dosdevices`) above each binary.
    pub auto_prefix: bool,
    /// Prefix used when neither auto detection nor `WINEPREFIX` gives one.
    pub fallback_prefix: Option<PathBuf>,
}

impl Default for WineOptions {
    fn default() -> Self {
        Self {
            executable: None,
            auto_prefix: true,
            fallback_prefix: None,
        }
    }
}

impl WineOptions {
    /// Launcher for `binary_type`, or `None` when the probe runs directly.
    ///
    /// A configured absolute launcher gets a `64` suffix for Win64 binaries
    /// when such a sibling exists (`/opt/wine/bin/wine64`).
    pub fn helper_tool(&self, binary_type: BinaryType) -> Option<OsString> {
        if cfg!(windows) || !binary_type.is_windows() {
            return None;
        }
        let Some(executable) = self.executable.as_ref().filter(|exe| !exe.as_os_str().is_empty()) else {
            return Some(OsString::from("wine"));
        };
        if binary_type == BinaryType::Win64 && executable.is_absolute() {
            let mut wide = executable.clone().into_os_string();
            wide.push("64");
            if Path::new(&wide).is_file() {
                return Some(wide);
            }
        }
        Some(executable.clone().into_os_string())
    }

    /// Prefix for probing `binary`: auto-detected, then `WINEPREFIX`, then the
    /// configured fallback, then `~/.wine`.
    pub fn resolve_prefix(&self, binary: Option<&Path>) -> PathBuf {
        if self.auto_prefix {
            if let Some(prefix) = binary.and_then(find_wine_prefix) {
                return prefix;
            }
        }
        if let Some(env) = std::env::var_os("WINEPREFIX").filter(|value| !value.is_empty()) {
            return PathBuf::from(env);
        }
        if let Some(fallback) = &self.fallback_prefix {
            return fallback.clone();
        }
        dirs::home_dir().unwrap_or_default().join(".wine")
    }
}

/// Closest ancestor of `path` containing a `dosdevices` directory, searched
/// at most ten levels up.
pub fn find_wine_prefix(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .skip(1)
        .take(PREFIX_SEARCH_DEPTH)
        .filter(|dir| dir.parent().is_some())
        .find(|dir| dir.join("dosdevices").is_dir())
        .map(Path::to_path_buf)
}
