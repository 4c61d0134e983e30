//! Node architecture identifiers

use serde::{Deserialize, Serialize};

/// CPU architecture and platform family of a worker node.
///
/// Used to select the build platform for compiled environments and by
/// task dispatchers to pick node-specific task implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    LinuxAmd64,
    LinuxArm64,
    Unknown,
}

impl Architecture {
    /// Container platform string understood by the image build runtime.
    pub fn platform(&self) -> Option<&'static str> {
        match self {
            Architecture::LinuxAmd64 => Some("linux/amd64"),
            Architecture::LinuxArm64 => Some("linux/arm64"),
            Architecture::Unknown => None,
        }
    }

    /// Stable string used in image tags and fingerprints.
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::LinuxAmd64 => "linux_amd64",
            Architecture::LinuxArm64 => "linux_arm64",
            Architecture::Unknown => "unknown",
        }
    }

    pub fn from_str_or_unknown(s: &str) -> Self {
        match s {
            "linux_amd64" => Architecture::LinuxAmd64,
            "linux_arm64" => Architecture::LinuxArm64,
            _ => Architecture::Unknown,
        }
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_architecture_has_no_build_platform() {
        assert_eq!(Architecture::LinuxAmd64.platform(), Some("linux/amd64"));
        assert_eq!(Architecture::Unknown.platform(), None);
    }
}
