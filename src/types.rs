//! Type-safe enumerations shared across the planner
//!
//! Stringly-typed lock file and environment values are mapped onto these
//! enums at the edges so the core can match on them exhaustively.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// How a selected artifact is turned into an installed package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DistributionKind {
    /// Needs a build step (sdist, VCS checkout, local directory)
    Source,
    /// Prebuilt wheel
    Binary,
}

/// Operating system family of the target environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OsFamily {
    #[default]
    Linux,
    Darwin,
    Windows,
}

impl OsFamily {
    /// Value of the `os_name` marker variable
    pub fn os_name(&self) -> &'static str {
        match self {
            Self::Linux | Self::Darwin => "posix",
            Self::Windows => "nt",
        }
    }

    /// Value of the `sys_platform` marker variable
    pub fn sys_platform(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Darwin => "darwin",
            Self::Windows => "win32",
        }
    }

    /// Value of the `platform_system` marker variable
    pub fn platform_system(&self) -> &'static str {
        match self {
            Self::Linux => "Linux",
            Self::Darwin => "Darwin",
            Self::Windows => "Windows",
        }
    }
}

/// C library of a Linux target, which decides the wheel tag family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Libc {
    /// `manylinux` wheels
    #[default]
    Glibc,
    /// `musllinux` wheels
    Musl,
}

impl Libc {
    /// Prefix of the wheel platform tags built against this C library
    pub fn wheel_tag_prefix(&self) -> &'static str {
        match self {
            Self::Glibc => "manylinux",
            Self::Musl => "musllinux",
        }
    }
}

/// Python implementation of the target interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Implementation {
    #[default]
    CPython,
    PyPy,
}

impl Implementation {
    /// Value of the `implementation_name` marker variable
    pub fn implementation_name(&self) -> &'static str {
        match self {
            Self::CPython => "cpython",
            Self::PyPy => "pypy",
        }
    }

    /// Value of the `platform_python_implementation` marker variable
    pub fn platform_python_implementation(&self) -> &'static str {
        match self {
            Self::CPython => "CPython",
            Self::PyPy => "PyPy",
        }
    }

    /// Short interpreter tag prefix used in wheel filenames
    pub fn tag_prefix(&self) -> &'static str {
        match self {
            Self::CPython => "cp",
            Self::PyPy => "pp",
        }
    }
}

/// Lock file field an error is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, EnumString, EnumIter)]
pub enum Field {
    #[strum(serialize = "name")]
    Name,
    #[strum(serialize = "version")]
    Version,
    #[strum(serialize = "python-versions")]
    PythonVersions,
    #[strum(serialize = "marker")]
    Marker,
    #[strum(serialize = "source")]
    Source,
    #[strum(serialize = "files")]
    Files,
    #[strum(serialize = "dependencies")]
    Dependencies,
    #[strum(serialize = "override")]
    Override,
}
