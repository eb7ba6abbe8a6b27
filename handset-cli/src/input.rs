//! Input commands: tap, long-press, input.

use std::time::Duration;

use anyhow::{Context, Result};
use handset::{CompanionDevice, Device};

/// Arguments for `handset tap`.
#[derive(clap::Args)]
pub struct TapArgs {
    /// Horizontal position in points.
    pub x: i32,

    /// Vertical position in points.
    pub y: i32,

    /// Tap twice.
    #[arg(long)]
    pub double: bool,
}

/// Arguments for `handset long-press`.
#[derive(clap::Args)]
pub struct LongPressArgs {
    /// Horizontal position in points.
    pub x: i32,

    /// Vertical position in points.
    pub y: i32,

    /// Hold duration in milliseconds.
    #[arg(short = 'd', long = "duration", default_value_t = 1000)]
    pub duration_ms: u64,
}

/// Arguments for `handset input`.
#[derive(clap::Args)]
pub struct InputArgs {
    /// Text to type.
    #[arg(required_unless_present_any = ["erase", "key"])]
    pub text: Option<String>,

    /// Delete this many characters first.
    #[arg(long)]
    pub erase: Option<usize>,

    /// Press a named key afterwards (e.g. enter, tab, escape).
    #[arg(long)]
    pub key: Option<String>,
}

pub fn tap(device: &CompanionDevice, args: &TapArgs) -> Result<()> {
    if args.double {
        device.double_tap(args.x, args.y)
    } else {
        device.tap(args.x, args.y)
    }
    .with_context(|| format!("failed to tap at {},{}", args.x, args.y))
}

pub fn long_press(device: &CompanionDevice, args: &LongPressArgs) -> Result<()> {
    device
        .long_press(args.x, args.y, Duration::from_millis(args.duration_ms))
        .with_context(|| format!("failed to press at {},{}", args.x, args.y))
}

pub fn input(device: &CompanionDevice, args: &InputArgs) -> Result<()> {
    if let Some(count) = args.erase {
        device.erase_text(count).context("failed to erase text")?;
    }
    if let Some(text) = &args.text {
        device.input(text).context("failed to type text")?;
    }
    if let Some(key) = &args.key {
        device
            .press_key(key)
            .with_context(|| format!("failed to press {key}"))?;
    }
    Ok(())
}
