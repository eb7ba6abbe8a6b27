//! App lifecycle commands: install, uninstall, launch, stop, clear-state,
//! push, pull.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use handset::{CompanionDevice, Device};

/// Arguments naming a single app.
#[derive(clap::Args)]
pub struct BundleArgs {
    /// Bundle identifier.
    pub bundle_id: String,
}

/// Arguments for `handset install`.
#[derive(clap::Args)]
pub struct InstallArgs {
    /// Path to the gzip-compressed bundle archive.
    pub path: PathBuf,
}

/// Arguments for `handset launch`.
#[derive(clap::Args)]
pub struct LaunchArgs {
    /// Bundle identifier.
    pub bundle_id: String,

    /// Launch argument as `key=value`; values that parse as JSON keep
    /// their type.
    #[arg(short = 'a', long = "arg", value_parser = parse_arg)]
    pub args: Vec<(String, serde_json::Value)>,

    /// Session identifier passed to the app.
    #[arg(long)]
    pub session: Option<String>,
}

/// Arguments for `handset clear-state`.
#[derive(clap::Args)]
pub struct ClearStateArgs {
    /// Bundle identifier.
    pub bundle_id: String,

    /// Fail if the container could not be fully recreated.
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for `handset push`.
#[derive(clap::Args)]
pub struct PushArgs {
    /// Bundle identifier.
    pub bundle_id: String,

    /// File or directory to copy into the container root.
    pub src: PathBuf,
}

/// Arguments for `handset pull`.
#[derive(clap::Args)]
pub struct PullArgs {
    /// Bundle identifier.
    pub bundle_id: String,

    /// Destination directory.
    pub dst: PathBuf,
}

/// Parses `key=value`.
fn parse_arg(s: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_owned()));
    Ok((key.to_owned(), value))
}

pub fn install(device: &CompanionDevice, args: &InstallArgs) -> Result<()> {
    let file = File::open(&args.path)
        .with_context(|| format!("failed to open {}", args.path.display()))?;
    device
        .install(&mut BufReader::new(file))
        .with_context(|| format!("failed to install {}", args.path.display()))?;
    println!("{}", args.path.display());
    Ok(())
}

pub fn uninstall(device: &CompanionDevice, args: &BundleArgs) -> Result<()> {
    device
        .uninstall(&args.bundle_id)
        .with_context(|| format!("failed to uninstall {}", args.bundle_id))?;
    println!("{}", args.bundle_id);
    Ok(())
}

pub fn launch(device: &CompanionDevice, args: &LaunchArgs) -> Result<()> {
    let arguments: BTreeMap<_, _> = args.args.iter().cloned().collect();
    device
        .launch(&args.bundle_id, &arguments, args.session.as_deref())
        .with_context(|| format!("failed to launch {}", args.bundle_id))
}

pub fn stop(device: &CompanionDevice, args: &BundleArgs) -> Result<()> {
    device
        .stop(&args.bundle_id)
        .with_context(|| format!("failed to stop {}", args.bundle_id))
}

pub fn clear_state(device: &CompanionDevice, args: &ClearStateArgs) -> Result<()> {
    if args.strict {
        device.clear_app_state_strict(&args.bundle_id)
    } else {
        device.clear_app_state(&args.bundle_id)
    }
    .with_context(|| format!("failed to clear state of {}", args.bundle_id))
}

pub fn push(device: &CompanionDevice, args: &PushArgs) -> Result<()> {
    device
        .push_app_state(&args.bundle_id, &args.src)
        .with_context(|| format!("failed to push {}", args.src.display()))
}

pub fn pull(device: &CompanionDevice, args: &PullArgs) -> Result<()> {
    device
        .pull_app_state(&args.bundle_id, &args.dst)
        .with_context(|| format!("failed to pull {}", args.bundle_id))?;
    println!("{}", args.dst.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_values_keep_json_types() {
        assert_eq!(
            parse_arg("retries=3").unwrap(),
            ("retries".to_owned(), serde_json::json!(3))
        );
        assert_eq!(
            parse_arg("mode=demo").unwrap(),
            ("mode".to_owned(), serde_json::json!("demo"))
        );
        assert_eq!(
            parse_arg("empty=").unwrap(),
            ("empty".to_owned(), serde_json::json!(""))
        );
        assert!(parse_arg("novalue").is_err());
    }
}
