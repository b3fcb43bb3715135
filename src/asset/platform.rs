use std::fmt;
use std::str::FromStr;

/// Platform the installed OBS build targets.
///
/// OBS portable bundles and most plugin archives are published for Windows,
/// so that is the default regardless of the host the installer runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Default for Platform {
    fn default() -> Self {
        Self::windows_x64()
    }
}

impl Platform {
    pub fn windows_x64() -> Self {
        Self {
            os: "windows".to_string(),
            arch: "x86_64".to_string(),
        }
    }

    /// Detect the host platform.
    pub fn detect() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "macos",
            other => other,
        };
        Self {
            os: os.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    /// Name fragments an asset for this OS usually carries.
    pub(crate) fn os_aliases(&self) -> &'static [&'static str] {
        match self.os.as_str() {
            "windows" => &["windows", "win64", "win32", "win"],
            "macos" | "darwin" => &["macos", "darwin", "osx", "mac"],
            "linux" => &["linux", "ubuntu"],
            _ => &[],
        }
    }

    /// Name fragments an asset for this architecture usually carries.
    pub(crate) fn arch_aliases(&self) -> &'static [&'static str] {
        match self.arch.as_str() {
            "x86_64" | "amd64" | "x64" => &["x86_64", "x64", "amd64", "win64"],
            "aarch64" | "arm64" => &["aarch64", "arm64"],
            "x86" | "i686" => &["x86", "i686", "i386", "win32"],
            _ => &[],
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

impl FromStr for Platform {
    type Err = String;

    /// Parses `os-arch`, e.g. `windows-x86_64`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().split_once('-') {
            Some((os, arch)) if !os.is_empty() && !arch.is_empty() => Ok(Self {
                os: os.to_string(),
                arch: arch.to_string(),
            }),
            _ => Err(format!("invalid platform '{}', expected OS-ARCH", s)),
        }
    }
}
