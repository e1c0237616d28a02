//! # Host Platforms
//!
//! What each host runtime expects of the native artifact: where it lives,
//! what it is called, which architectures and OS versions it targets, how it
//! is published, and how failures are surfaced there.
//!
//! ```text
//! ┌──────────────┬──────────────────────────────┬───────────────────────────┐
//! │ Host         │ Artifact                     │ Published as              │
//! ├──────────────┼──────────────────────────────┼───────────────────────────┤
//! │ JVM          │ libnostr_sdk_ffi.{so,dylib}  │ org.rust-nostr:           │
//! │              │ nostr_sdk_ffi.dll            │   nostr-sdk-kmp (jvm)     │
//! │ Android      │ jniLibs/<abi>/libnostr_...so │ org.rust-nostr:nostr-sdk  │
//! │ Kotlin/Nat.  │ src/lib/<target>/lib...a     │ org.rust-nostr:           │
//! │              │ + cinterop nostr_sdk.def     │   nostr-sdk-kmp           │
//! │ Swift        │ nostr_sdkFFI.xcframework     │ nostr-sdk-swift/NostrSDK  │
//! │ Rust         │ shared library or embedded   │ nostr-bridge crate        │
//! └──────────────┴──────────────────────────────┴───────────────────────────┘
//! ```

mod artifact;
mod failure;

pub use artifact::{
    android_abi, check_architecture, detect_architectures, locate_artifact, shared_library_name,
    CinteropLayout, XcframeworkLayout, LIBRARY_STEM, STATIC_LIBRARY_NAME,
};
pub use failure::HostFailure;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::contract::nostr_sdk::ABI_VERSION;
use crate::error::{Error, Result};

// ============================================================================
// HOSTS
// ============================================================================

/// A host runtime the bindings ship to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostPlatform {
    /// Desktop/server JVM through JNA
    Jvm,
    /// Android through JNA and jniLibs
    Android,
    /// Kotlin/Native through cinterop against a static library
    KotlinNative,
    /// Swift package with a binary xcframework target
    Swift,
    /// Rust host, this crate
    Rust,
}

impl HostPlatform {
    pub const ALL: [HostPlatform; 5] = [
        HostPlatform::Jvm,
        HostPlatform::Android,
        HostPlatform::KotlinNative,
        HostPlatform::Swift,
        HostPlatform::Rust,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HostPlatform::Jvm => "jvm",
            HostPlatform::Android => "android",
            HostPlatform::KotlinNative => "kotlin-native",
            HostPlatform::Swift => "swift",
            HostPlatform::Rust => "rust",
        }
    }

    /// Whether the host links the core statically
    pub fn links_statically(self) -> bool {
        matches!(self, HostPlatform::KotlinNative | HostPlatform::Swift)
    }

    /// Oldest OS/runtime versions the published artifact supports
    pub fn minimum_versions(self) -> &'static [(&'static str, &'static str)] {
        match self {
            HostPlatform::Jvm => &[("jvm", "17")],
            HostPlatform::Android => &[("android-api", "21")],
            HostPlatform::KotlinNative => &[("ios", "14"), ("jvm", "17")],
            HostPlatform::Swift => &[("ios", "14"), ("macos", "12")],
            HostPlatform::Rust => &[("rust", "1.75")],
        }
    }

    /// Where the bindings for this host are published
    pub fn coordinates(self) -> PackageCoordinates {
        let (group, artifact, product) = match self {
            HostPlatform::Jvm => (Some("org.rust-nostr"), "nostr-sdk-kmp", Some("jvm")),
            HostPlatform::Android => (Some("org.rust-nostr"), "nostr-sdk", None),
            HostPlatform::KotlinNative => (Some("org.rust-nostr"), "nostr-sdk-kmp", None),
            HostPlatform::Swift => (None, "nostr-sdk-swift", Some("NostrSDK")),
            HostPlatform::Rust => (None, "nostr-bridge", None),
        };
        PackageCoordinates {
            group,
            artifact,
            version: ABI_VERSION,
            product,
        }
    }

    /// Architectures the published artifact is built for
    pub fn architectures(self) -> &'static [Arch] {
        match self {
            HostPlatform::Android => &[Arch::Aarch64, Arch::Arm, Arch::X86_64, Arch::X86],
            HostPlatform::KotlinNative | HostPlatform::Swift => &[Arch::Aarch64, Arch::X86_64],
            HostPlatform::Jvm | HostPlatform::Rust => &[Arch::Aarch64, Arch::X86_64],
        }
    }
}

impl fmt::Display for HostPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostPlatform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jvm" | "java" => Ok(HostPlatform::Jvm),
            "android" => Ok(HostPlatform::Android),
            "kotlin-native" | "kotlin_native" | "kmp" | "native" => Ok(HostPlatform::KotlinNative),
            "swift" | "apple" => Ok(HostPlatform::Swift),
            "rust" => Ok(HostPlatform::Rust),
            other => Err(Error::UnsupportedPlatform(format!("unknown host `{}`", other))),
        }
    }
}

/// Published package coordinates
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageCoordinates {
    /// Maven group, when published to Maven
    pub group: Option<&'static str>,
    /// Artifact or package name
    pub artifact: &'static str,
    /// Always the contract's ABI version
    pub version: &'static str,
    /// Product, target or variant within the package
    pub product: Option<&'static str>,
}

impl fmt::Display for PackageCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.group {
            Some(group) => write!(f, "{}:{}:{}", group, self.artifact, self.version)?,
            None => write!(f, "{}@{}", self.artifact, self.version)?,
        }
        if let Some(product) = self.product {
            write!(f, " ({})", product)?;
        }
        Ok(())
    }
}

// ============================================================================
// ARCHITECTURE
// ============================================================================

/// CPU architecture of a native artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    X86,
    X86_64,
    Arm,
    Aarch64,
}

impl Arch {
    /// Architecture this binary was compiled for
    pub fn current() -> Self {
        if cfg!(target_arch = "aarch64") {
            Arch::Aarch64
        } else if cfg!(target_arch = "arm") {
            Arch::Arm
        } else if cfg!(target_arch = "x86") {
            Arch::X86
        } else {
            Arch::X86_64
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Arch::X86 => "x86",
            Arch::X86_64 => "x86_64",
            Arch::Arm => "arm",
            Arch::Aarch64 => "aarch64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x86" | "i386" | "i686" => Ok(Arch::X86),
            "x86_64" | "x86-64" | "amd64" | "x64" => Ok(Arch::X86_64),
            "arm" | "armv7" | "armeabi-v7a" => Ok(Arch::Arm),
            "aarch64" | "arm64" | "arm64-v8a" => Ok(Arch::Aarch64),
            other => Err(Error::UnsupportedPlatform(format!("unknown architecture `{}`", other))),
        }
    }
}

/// Operating system of the running host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Os {
    Linux,
    MacOs,
    Windows,
    Android,
    Ios,
}

impl Os {
    pub fn current() -> Self {
        if cfg!(target_os = "android") {
            Os::Android
        } else if cfg!(target_os = "ios") {
            Os::Ios
        } else if cfg!(target_os = "macos") {
            Os::MacOs
        } else if cfg!(target_os = "windows") {
            Os::Windows
        } else {
            Os::Linux
        }
    }
}
