//! Platform-Compatibility Resolver
//!
//! Maps a selected artifact's platform tag to the native runtime libraries
//! it expects and the patch policy the post-install step applies (rewriting
//! library load paths of the bundled binaries).
//!
//! # Tag Families
//!
//! | Platform tag                          | Family        | Policy          |
//! |---------------------------------------|---------------|-----------------|
//! | `manylinux1_*`, `manylinux_2_5_*`     | manylinux1    | `manylinux1`    |
//! | `manylinux2010_*`, `manylinux_2_12_*` | manylinux2010 | `manylinux2010` |
//! | `manylinux2014_*`, `manylinux_2_17_*` | manylinux2014 | `manylinux2014` |
//! | `manylinux_2_N_*` (N > 17)            | manylinux2014 | `manylinux_2_N` |
//! | `musllinux_1_N_*`                     | musllinux     | `musllinux_1_N` |
//!
//! Anything else (`source`, `any`, macOS, Windows, plain `linux_*`) needs
//! neither native libraries nor patching.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Libraries every manylinux1 wheel may link against (PEP 513)
pub const MANYLINUX1_LIBRARIES: &[&str] = &[
    "glibc",
    "libgcc",
    "libstdc++",
    "ncurses5",
    "libX11",
    "libXext",
    "libXrender",
    "libICE",
    "libSM",
    "libGL",
    "glib",
];

/// Libraries for manylinux2010 (PEP 571); ncurses5 is no longer allowed
pub const MANYLINUX2010_LIBRARIES: &[&str] = &[
    "glibc",
    "libgcc",
    "libstdc++",
    "libX11",
    "libXext",
    "libXrender",
    "libICE",
    "libSM",
    "libGL",
    "glib",
];

/// Libraries for manylinux2014 (PEP 599) and later glibc generations
pub const MANYLINUX2014_LIBRARIES: &[&str] = MANYLINUX2010_LIBRARIES;

/// Libraries for musllinux (PEP 656)
pub const MUSLLINUX_LIBRARIES: &[&str] = &["musl", "libgcc", "libstdc++"];

/// Normalized binary-compatibility family of a platform tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagFamily {
    Manylinux1,
    Manylinux2010,
    Manylinux2014,
    /// PEP 600 tag above glibc 2.17
    Glibc { minor: u32 },
    Musllinux { minor: u32 },
}

impl TagFamily {
    /// Recognize the family of one platform tag (not a compressed set)
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.to_ascii_lowercase();

        if tag.starts_with("manylinux1_") {
            return Some(Self::Manylinux1);
        }
        if tag.starts_with("manylinux2010_") {
            return Some(Self::Manylinux2010);
        }
        if tag.starts_with("manylinux2014_") {
            return Some(Self::Manylinux2014);
        }
        if let Some(rest) = tag.strip_prefix("manylinux_") {
            let (major, minor) = leading_pair(rest)?;
            if major != 2 {
                return None;
            }
            return Some(match minor {
                0..=5 => Self::Manylinux1,
                6..=12 => Self::Manylinux2010,
                13..=17 => Self::Manylinux2014,
                minor => Self::Glibc { minor },
            });
        }
        if let Some(rest) = tag.strip_prefix("musllinux_") {
            let (major, minor) = leading_pair(rest)?;
            return (major == 1).then_some(Self::Musllinux { minor });
        }

        None
    }

    /// Native libraries the family expects from the host
    pub fn libraries(&self) -> &'static [&'static str] {
        match self {
            Self::Manylinux1 => MANYLINUX1_LIBRARIES,
            Self::Manylinux2010 => MANYLINUX2010_LIBRARIES,
            Self::Manylinux2014 | Self::Glibc { .. } => MANYLINUX2014_LIBRARIES,
            Self::Musllinux { .. } => MUSLLINUX_LIBRARIES,
        }
    }

    /// Policy token consumed by the patch step
    pub fn policy(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TagFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manylinux1 => write!(f, "manylinux1"),
            Self::Manylinux2010 => write!(f, "manylinux2010"),
            Self::Manylinux2014 => write!(f, "manylinux2014"),
            Self::Glibc { minor } => write!(f, "manylinux_2_{}", minor),
            Self::Musllinux { minor } => write!(f, "musllinux_1_{}", minor),
        }
    }
}

/// Parse `X_Y_...` into `(X, Y)`
fn leading_pair(rest: &str) -> Option<(u32, u32)> {
    let mut parts = rest.split('_');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

/// Native runtime needs of an installed artifact
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlatformRequirements {
    pub native_deps: BTreeSet<String>,
    pub patch_policy: Option<String>,
}

impl PlatformRequirements {
    /// No native libraries, no patching
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether the post-install patch step has anything to do
    pub fn needs_patching(&self) -> bool {
        self.patch_policy.is_some()
    }
}

/// Resolve the native requirements of a platform tag
///
/// Compressed tag sets (`a.b`) use their first recognized member. Unknown
/// tags resolve to no requirements rather than failing.
pub fn resolve(platform_tag: &str) -> PlatformRequirements {
    match platform_tag.split('.').find_map(TagFamily::from_tag) {
        Some(family) => PlatformRequirements {
            native_deps: family.libraries().iter().map(|s| s.to_string()).collect(),
            patch_policy: Some(family.policy()),
        },
        None => PlatformRequirements::none(),
    }
}
