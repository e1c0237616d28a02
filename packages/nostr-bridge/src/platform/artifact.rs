//! Artifact names, package layouts, lookup, and binary header checks.

use std::env;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use super::{Arch, HostPlatform, Os};
use crate::config::BridgeConfig;
use crate::error::{Error, Result};

/// Base name of the native library
pub const LIBRARY_STEM: &str = "nostr_sdk_ffi";

/// Static library linked by Kotlin/Native and the xcframework
pub const STATIC_LIBRARY_NAME: &str = "libnostr_sdk_ffi.a";

/// File name of the shared library on `os`
pub fn shared_library_name(os: Os) -> String {
    match os {
        Os::Linux | Os::Android => format!("lib{}.so", LIBRARY_STEM),
        Os::MacOs | Os::Ios => format!("lib{}.dylib", LIBRARY_STEM),
        Os::Windows => format!("{}.dll", LIBRARY_STEM),
    }
}

/// Android ABI directory under `jniLibs`
pub fn android_abi(arch: Arch) -> &'static str {
    match arch {
        Arch::Aarch64 => "arm64-v8a",
        Arch::Arm => "armeabi-v7a",
        Arch::X86_64 => "x86_64",
        Arch::X86 => "x86",
    }
}

// ============================================================================
// PACKAGE LAYOUTS
// ============================================================================

/// Kotlin/Native cinterop layout of a KMP project
///
/// ```text
/// <root>/src/nativeInterop/cinterop/nostr_sdk.def
/// <root>/src/nativeInterop/cinterop/headers/nostr_sdk/
/// <root>/src/lib/{ios_arm64,ios_simulator_arm64,ios_x64}/libnostr_sdk_ffi.a
/// ```
#[derive(Debug, Clone)]
pub struct CinteropLayout {
    root: PathBuf,
}

impl CinteropLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn def_file(&self) -> PathBuf {
        self.root.join("src/nativeInterop/cinterop/nostr_sdk.def")
    }

    pub fn headers_dir(&self) -> PathBuf {
        self.root.join("src/nativeInterop/cinterop/headers/nostr_sdk")
    }

    /// Kotlin/Native target directories for `arch`, device first
    pub fn targets(arch: Arch) -> &'static [&'static str] {
        match arch {
            Arch::Aarch64 => &["ios_arm64", "ios_simulator_arm64"],
            Arch::X86_64 => &["ios_x64"],
            _ => &[],
        }
    }

    pub fn library(&self, target: &str) -> PathBuf {
        self.root.join("src/lib").join(target).join(STATIC_LIBRARY_NAME)
    }

    /// Check the def file, headers and at least one library for `arch`
    pub fn validate(&self, arch: Arch) -> Result<PathBuf> {
        let mut missing = Vec::new();
        if !self.def_file().is_file() {
            missing.push(self.def_file());
        }
        if !self.headers_dir().is_dir() {
            missing.push(self.headers_dir());
        }

        let library = Self::targets(arch)
            .iter()
            .map(|target| self.library(target))
            .find(|path| path.is_file());

        match (library, missing.is_empty()) {
            (Some(library), true) => Ok(library),
            (library, _) => {
                if library.is_none() {
                    missing.extend(Self::targets(arch).iter().map(|t| self.library(t)));
                }
                Err(Error::ArtifactNotFound {
                    name: "cinterop layout".into(),
                    searched: join_paths(&missing),
                })
            }
        }
    }
}

/// Swift package binary target
///
/// ```text
/// <root>/nostr_sdkFFI.xcframework/<slice>/libnostr_sdk_ffi.a
/// ```
#[derive(Debug, Clone)]
pub struct XcframeworkLayout {
    root: PathBuf,
}

impl XcframeworkLayout {
    pub const NAME: &'static str = "nostr_sdkFFI.xcframework";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn bundle(&self) -> PathBuf {
        self.root.join(Self::NAME)
    }

    /// Slices that can hold `arch`, device first
    pub fn slices(arch: Arch) -> &'static [&'static str] {
        match arch {
            Arch::Aarch64 => &["ios-arm64", "ios-arm64_x86_64-simulator", "macos-arm64_x86_64"],
            Arch::X86_64 => &["ios-arm64_x86_64-simulator", "macos-arm64_x86_64"],
            _ => &[],
        }
    }

    pub fn library(&self, slice: &str) -> PathBuf {
        self.bundle().join(slice).join(STATIC_LIBRARY_NAME)
    }
}

// ============================================================================
// LOOKUP
// ============================================================================

fn join_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "nothing".into();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Dynamic loader search path of the running OS
fn loader_path() -> Vec<PathBuf> {
    let var = match Os::current() {
        Os::MacOs | Os::Ios => "DYLD_LIBRARY_PATH",
        Os::Windows => "PATH",
        Os::Linux | Os::Android => "LD_LIBRARY_PATH",
    };
    env::var_os(var)
        .map(|value| env::split_paths(&value).collect())
        .unwrap_or_default()
}

/// Every candidate path, in search order
fn candidates(config: &BridgeConfig) -> Vec<PathBuf> {
    let arch = config.arch;
    match config.host {
        HostPlatform::Jvm | HostPlatform::Rust => {
            let name = shared_library_name(Os::current());
            let mut dirs = config.search_paths.clone();
            dirs.extend(loader_path());
            if let Ok(cwd) = env::current_dir() {
                dirs.push(cwd);
            }
            dirs.into_iter().map(|dir| dir.join(&name)).collect()
        }
        HostPlatform::Android => {
            let name = shared_library_name(Os::Android);
            let abi = android_abi(arch);
            config
                .search_paths
                .iter()
                .flat_map(|root| [root.join("jniLibs").join(abi).join(&name), root.join(abi).join(&name)])
                .collect()
        }
        HostPlatform::KotlinNative => config
            .search_paths
            .iter()
            .flat_map(|root| {
                let layout = CinteropLayout::new(root);
                CinteropLayout::targets(arch)
                    .iter()
                    .map(move |target| layout.library(target))
                    .collect::<Vec<_>>()
            })
            .collect(),
        HostPlatform::Swift => config
            .search_paths
            .iter()
            .flat_map(|root| {
                let layout = XcframeworkLayout::new(root);
                XcframeworkLayout::slices(arch)
                    .iter()
                    .map(move |slice| layout.library(slice))
                    .collect::<Vec<_>>()
            })
            .collect(),
    }
}

/// Find the native artifact for the configured host and architecture
pub fn locate_artifact(config: &BridgeConfig) -> Result<PathBuf> {
    if let Some(path) = &config.library {
        if path.is_file() {
            return Ok(path.clone());
        }
        return Err(Error::ArtifactNotFound {
            name: path.display().to_string(),
            searched: "explicit path".into(),
        });
    }

    let candidates = candidates(config);
    if let Some(found) = candidates.iter().find(|path| path.is_file()) {
        tracing::debug!("Found native artifact at {}", found.display());
        return Ok(found.clone());
    }

    let name = match config.host {
        HostPlatform::KotlinNative | HostPlatform::Swift => STATIC_LIBRARY_NAME.to_string(),
        HostPlatform::Android => shared_library_name(Os::Android),
        _ => shared_library_name(Os::current()),
    };
    Err(Error::ArtifactNotFound {
        name,
        searched: join_paths(&candidates),
    })
}

// ============================================================================
// HEADER SNIFFING
// ============================================================================

const HEADER_LEN: usize = 4096;

fn elf_machine(machine: u16) -> Option<Arch> {
    match machine {
        0x03 => Some(Arch::X86),
        0x3E => Some(Arch::X86_64),
        0x28 => Some(Arch::Arm),
        0xB7 => Some(Arch::Aarch64),
        _ => None,
    }
}

fn macho_cpu(cpu: u32) -> Option<Arch> {
    match cpu {
        0x0000_0007 => Some(Arch::X86),
        0x0100_0007 => Some(Arch::X86_64),
        0x0000_000C => Some(Arch::Arm),
        0x0100_000C => Some(Arch::Aarch64),
        _ => None,
    }
}

fn pe_machine(machine: u16) -> Option<Arch> {
    match machine {
        0x014C => Some(Arch::X86),
        0x8664 => Some(Arch::X86_64),
        0x01C0 | 0x01C4 => Some(Arch::Arm),
        0xAA64 => Some(Arch::Aarch64),
        _ => None,
    }
}

fn u16_at(bytes: &[u8], offset: usize, little: bool) -> Option<u16> {
    let b: [u8; 2] = bytes.get(offset..offset + 2)?.try_into().ok()?;
    Some(if little { u16::from_le_bytes(b) } else { u16::from_be_bytes(b) })
}

fn u32_at(bytes: &[u8], offset: usize, little: bool) -> Option<u32> {
    let b: [u8; 4] = bytes.get(offset..offset + 4)?.try_into().ok()?;
    Some(if little { u32::from_le_bytes(b) } else { u32::from_be_bytes(b) })
}

/// Architectures declared by an ELF, Mach-O (thin or fat) or PE header
///
/// `None` when the format isn't recognized, e.g. static archives.
pub fn sniff_header(bytes: &[u8]) -> Option<Vec<Arch>> {
    // ELF
    if bytes.starts_with(b"\x7fELF") {
        let little = *bytes.get(5)? == 1;
        return Some(elf_machine(u16_at(bytes, 18, little)?).into_iter().collect());
    }

    // Mach-O thin, either byte order
    match u32_at(bytes, 0, true)? {
        0xFEED_FACE | 0xFEED_FACF => return Some(macho_cpu(u32_at(bytes, 4, true)?).into_iter().collect()),
        0xCEFA_EDFE | 0xCFFA_EDFE => return Some(macho_cpu(u32_at(bytes, 4, false)?).into_iter().collect()),
        _ => {}
    }

    // Mach-O fat (big-endian). Java class files share the magic but have a
    // much larger second word.
    if matches!(u32_at(bytes, 0, false)?, 0xCAFE_BABE | 0xCAFE_BABF) {
        let count = u32_at(bytes, 4, false)? as usize;
        if count == 0 || count > 32 {
            return None;
        }
        let wide = u32_at(bytes, 0, false)? == 0xCAFE_BABF;
        let stride = if wide { 32 } else { 20 };
        let archs = (0..count)
            .filter_map(|i| u32_at(bytes, 8 + i * stride, false).and_then(macho_cpu))
            .collect();
        return Some(archs);
    }

    // PE
    if bytes.starts_with(b"MZ") {
        let pe = u32_at(bytes, 0x3C, true)? as usize;
        if bytes.get(pe..pe + 4)? != b"PE\0\0" {
            return None;
        }
        return Some(pe_machine(u16_at(bytes, pe + 4, true)?).into_iter().collect());
    }

    None
}

/// Read the artifact header and report its architectures
pub fn detect_architectures(path: &Path) -> Result<Option<Vec<Arch>>> {
    let mut file =
        File::open(path).map_err(|e| Error::LibraryOpen(format!("{}: {}", path.display(), e)))?;
    let mut header = Vec::with_capacity(HEADER_LEN);
    file.by_ref()
        .take(HEADER_LEN as u64)
        .read_to_end(&mut header)
        .map_err(|e| Error::LibraryOpen(format!("{}: {}", path.display(), e)))?;
    Ok(sniff_header(&header))
}

/// Fail with `ArchitectureMismatch` if the artifact can't run on `expected`
///
/// Unrecognized formats pass; the loader has the final word on those.
pub fn check_architecture(path: &Path, expected: Arch) -> Result<()> {
    match detect_architectures(path)? {
        Some(found) if !found.contains(&expected) => Err(Error::ArchitectureMismatch {
            path: path.display().to_string(),
            expected: expected.to_string(),
            found: if found.is_empty() {
                "unknown".into()
            } else {
                found.iter().map(|a| a.as_str()).collect::<Vec<_>>().join("+")
            },
        }),
        _ => Ok(()),
    }
}
