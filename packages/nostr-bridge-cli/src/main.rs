//! nostr-bridge CLI
//!
//! Inspects the binding contract bundled with this build and checks native
//! artifacts against it:
//!
//! 1. **contract / fingerprint**: what glue generators and native cores must
//!    agree on.
//! 2. **locate**: where a given host would load the artifact from, and which
//!    architectures its header declares.
//! 3. **probe**: open a shared library (or the built-in loopback core through
//!    the same C ABI) and report whether an adapter would accept it.
//! 4. **platforms**: per-host minimum versions and package coordinates.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use serde_json::json;

use nostr_bridge::contract::nostr_sdk;
use nostr_bridge::native::{DynamicCore, NativeCore};
use nostr_bridge::platform::{detect_architectures, locate_artifact};
use nostr_bridge::{Adapter, Arch, BridgeConfig, HostPlatform};

mod loopback {
    nostr_bridge::export_native_core!(unexported nostr_bridge::native::loopback::core);
}

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "nostr-bridge", version, about = "nostr-sdk binding contract tools")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the contract manifest as JSON
    Contract {
        /// Pretty-print
        #[arg(long)]
        pretty: bool,
    },

    /// Print the ABI version and contract fingerprint
    Fingerprint,

    /// Show where a host would load the native artifact from
    Locate {
        /// Host platform (jvm, android, kotlin-native, swift, rust)
        #[arg(long, default_value = "rust", env = "NOSTR_BRIDGE_HOST")]
        host: HostPlatform,

        /// Target architecture (defaults to this machine)
        #[arg(long, env = "NOSTR_BRIDGE_ARCH")]
        arch: Option<Arch>,

        /// Extra directory to search first (repeatable)
        #[arg(long = "search")]
        search: Vec<PathBuf>,
    },

    /// Check a native core against the bundled contract
    Probe {
        /// Shared library to open; the built-in loopback core when omitted
        path: Option<PathBuf>,
    },

    /// List supported hosts
    Platforms,
}

// ── Entry Point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nostr_bridge=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Contract { pretty } => {
            let manifest = nostr_sdk::contract().to_json()?;
            let rendered = if pretty {
                serde_json::to_string_pretty(&manifest)?
            } else {
                serde_json::to_string(&manifest)?
            };
            println!("{}", rendered);
        }
        Command::Fingerprint => {
            println!("{} {}", nostr_sdk::ABI_VERSION, nostr_sdk::contract().fingerprint());
        }
        Command::Locate { host, arch, search } => locate(host, arch, search)?,
        Command::Probe { path } => probe(path)?,
        Command::Platforms => platforms()?,
    }

    Ok(())
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn locate(host: HostPlatform, arch: Option<Arch>, mut search: Vec<PathBuf>) -> Result<()> {
    let mut config = BridgeConfig::from_env();
    config.host = host;
    if let Some(arch) = arch {
        config.arch = arch;
    }
    search.append(&mut config.search_paths);
    config.search_paths = search;

    let path = locate_artifact(&config).wrap_err("artifact not found")?;
    let detected: Vec<String> = if path.is_file() {
        detect_architectures(&path)?
            .unwrap_or_default()
            .into_iter()
            .map(|arch| arch.to_string())
            .collect()
    } else {
        Vec::new()
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "host": host,
            "arch": config.arch,
            "path": path.display().to_string(),
            "detected": detected,
            "links_statically": host.links_statically(),
        }))?
    );
    Ok(())
}

fn probe(path: Option<PathBuf>) -> Result<()> {
    let core = match &path {
        Some(path) => DynamicCore::open(path)?,
        None => DynamicCore::from_table(loopback::abi_table(), "built-in loopback"),
    };

    tracing::debug!("Probing {}", core.describe());
    let contract = nostr_sdk::contract();
    let version = core.abi_version()?;
    let fingerprint = core.contract_fingerprint()?;
    let compatible = contract.check_compatible(&version, &fingerprint);

    let mut report = json!({
        "source": core.describe(),
        "abi_version": version,
        "fingerprint": fingerprint,
        "expected_abi_version": contract.abi_version,
        "expected_fingerprint": contract.fingerprint(),
        "compatible": compatible.is_ok(),
    });

    match compatible {
        Ok(()) => {
            let context = BridgeConfig::from_env().context.build(1)?;
            let adapter = Adapter::load(Arc::new(core), contract, context)?;
            let git_hash = nostr_bridge::surface::git_hash_version(&adapter)?;
            report["git_hash"] = json!(git_hash);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Err(e) => {
            report["error"] = json!(nostr_bridge::FfiError::from(&e));
            println!("{}", serde_json::to_string_pretty(&report)?);
            bail!("native core is not compatible: {}", e);
        }
    }
    Ok(())
}

fn platforms() -> Result<()> {
    let hosts: Vec<_> = HostPlatform::ALL
        .iter()
        .map(|host| {
            let minimum: serde_json::Map<_, _> = host
                .minimum_versions()
                .iter()
                .map(|(os, version)| (os.to_string(), json!(version)))
                .collect();
            json!({
                "host": host,
                "coordinates": host.coordinates().to_string(),
                "architectures": host.architectures(),
                "minimum_versions": minimum,
                "links_statically": host.links_statically(),
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&hosts)?);
    Ok(())
}
