//! CLI for driving mobile devices through a handset companion.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod app;
mod input;

use std::fs::File;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use handset::{CompanionDevice, Device, DriverConfig, Element, Endpoint};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "handset", version, about = "Drive a phone or simulator through its companion")]
struct Cli {
    #[command(flatten)]
    global: Global,

    #[command(subcommand)]
    command: Command,
}

/// Connection options shared by every command.
#[derive(clap::Args)]
struct Global {
    /// Target device identifier.
    #[arg(long, global = true)]
    device: Option<String>,

    /// Companion endpoint (`host:port` or `unix:/path`).
    #[arg(long, global = true)]
    endpoint: Option<Endpoint>,

    /// Companion executable to launch instead of attaching.
    #[arg(long, global = true)]
    companion: Option<PathBuf>,

    /// Settings file (default: `<config dir>/handset/config.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, default_value = "table")]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Command {
    /// Describe the target device.
    Info,

    /// Dump the accessibility tree.
    Tree,

    /// Tap at a point.
    Tap(input::TapArgs),

    /// Press and hold at a point.
    LongPress(input::LongPressArgs),

    /// Type text into the focused element.
    Input(input::InputArgs),

    /// Press a hardware button (home, lock, siri, side-button, apple-pay).
    Button {
        /// Button name.
        name: String,
    },

    /// Install an app from a gzip-compressed bundle archive.
    Install(app::InstallArgs),

    /// Uninstall an app.
    Uninstall(app::BundleArgs),

    /// Launch an app.
    Launch(app::LaunchArgs),

    /// Terminate an app.
    Stop(app::BundleArgs),

    /// Reset an app's data container.
    ClearState(app::ClearStateArgs),

    /// Copy a file or directory into an app's data container.
    Push(app::PushArgs),

    /// Copy an app's data container out.
    Pull(app::PullArgs),

    /// Open a URL or deep link.
    Open {
        /// URL to open.
        url: String,
    },

    /// Simulate a geolocation.
    #[command(allow_negative_numbers = true)]
    Location {
        /// Latitude in degrees.
        latitude: f64,
        /// Longitude in degrees.
        longitude: f64,
    },

    /// Wipe the device keychain.
    Keychain,

    /// Record the screen into a file.
    Record {
        /// Output file.
        output: PathBuf,
        /// Stop after this many seconds instead of waiting for Enter.
        #[arg(long)]
        seconds: Option<u64>,
    },

    /// Generate shell completion scripts.
    #[command(hide = true)]
    Completion {
        /// Target shell.
        shell: Shell,
    },
}

/// Output format for commands that print data.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    /// Human-readable text.
    #[default]
    Table,
    /// Machine-readable JSON.
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("handset=info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = Cli::parse().dispatch() {
        eprintln!("handset: {e:#}");
        std::process::exit(1);
    }
}

impl Cli {
    fn dispatch(self) -> Result<()> {
        if let Command::Completion { shell } = self.command {
            clap_complete::generate(shell, &mut Self::command(), "handset", &mut std::io::stdout());
            return Ok(());
        }

        let device = self.global.connect()?;
        let result = match self.command {
            Command::Info => info(&device, self.global.format),
            Command::Tree => tree(&device, self.global.format),
            Command::Tap(args) => input::tap(&device, &args),
            Command::LongPress(args) => input::long_press(&device, &args),
            Command::Input(args) => input::input(&device, &args),
            Command::Button { name } => device
                .press_button(&name)
                .with_context(|| format!("failed to press {name}")),
            Command::Install(args) => app::install(&device, &args),
            Command::Uninstall(args) => app::uninstall(&device, &args),
            Command::Launch(args) => app::launch(&device, &args),
            Command::Stop(args) => app::stop(&device, &args),
            Command::ClearState(args) => app::clear_state(&device, &args),
            Command::Push(args) => app::push(&device, &args),
            Command::Pull(args) => app::pull(&device, &args),
            Command::Open { url } => device
                .open_link(&url)
                .with_context(|| format!("failed to open {url}")),
            Command::Location {
                latitude,
                longitude,
            } => device
                .set_location(latitude, longitude)
                .context("failed to set location"),
            Command::Keychain => device.clear_keychain().context("failed to clear keychain"),
            Command::Record { output, seconds } => record(&device, &output, seconds),
            Command::Completion { .. } => Ok(()),
        };
        if device.session().restarts() > 0 {
            tracing::info!(restarts = device.session().restarts(), "companion was reconnected");
        }
        device.close();
        result
    }
}

impl Global {
    /// Merges flags over the settings file and connects.
    fn connect(&self) -> Result<CompanionDevice> {
        let path = match &self.config {
            Some(path) => path.clone(),
            None => dirs::config_dir()
                .ok_or_else(|| anyhow::anyhow!("no platform config directory"))?
                .join("handset")
                .join("config.json"),
        };
        let mut config = DriverConfig::load_or_default(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if let Some(device) = &self.device {
            config.device_id = Some(device.clone());
        }
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = Some(endpoint.clone());
        }
        if let Some(companion) = &self.companion {
            config.companion = Some(companion.clone());
        }
        tracing::debug!(?config, "connecting");
        CompanionDevice::from_config(&config).context("failed to reach companion")
    }
}

fn info(device: &CompanionDevice, format: OutputFormat) -> Result<()> {
    let desc = device.describe().context("failed to describe device")?;

    if matches!(format, OutputFormat::Json) {
        let obj = serde_json::json!({
            "udid": desc.udid,
            "name": desc.name,
            "os_version": desc.os_version,
            "screen": {
                "width_pixels": desc.screen.width,
                "height_pixels": desc.screen.height,
                "width_points": desc.screen.width_points,
                "height_points": desc.screen.height_points,
                "density": desc.screen.density,
            },
        });
        println!("{}", serde_json::to_string_pretty(&obj)?);
        return Ok(());
    }

    println!("udid:    {}", desc.udid);
    println!("name:    {}", desc.name);
    println!("os:      {}", desc.os_version);
    println!(
        "screen:  {}x{} px, {}x{} pt @{}x",
        desc.screen.width,
        desc.screen.height,
        desc.screen.width_points,
        desc.screen.height_points,
        desc.screen.density
    );
    Ok(())
}

fn tree(device: &CompanionDevice, format: OutputFormat) -> Result<()> {
    let root = device
        .content_descriptor()
        .context("failed to read accessibility tree")?;

    if matches!(format, OutputFormat::Json) {
        println!("{}", serde_json::to_string_pretty(&root)?);
        return Ok(());
    }
    print_element(&root, 0);
    Ok(())
}

fn print_element(element: &Element, depth: usize) {
    let attrs: Vec<String> = element
        .attributes
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{k}={v:?}"))
        .collect();
    let frame = element.frame.map_or_else(String::new, |f| {
        format!(" [{},{} {}x{}]", f.x, f.y, f.width, f.height)
    });
    println!("{:indent$}{}{frame}", "", attrs.join(" "), indent = depth * 2);
    for child in &element.children {
        print_element(child, depth + 1);
    }
}

fn record(device: &CompanionDevice, output: &Path, seconds: Option<u64>) -> Result<()> {
    let file =
        File::create(output).with_context(|| format!("failed to create {}", output.display()))?;
    let recording = device
        .start_screen_recording(Box::new(file))
        .context("failed to start recording")?;

    match seconds {
        Some(secs) => std::thread::sleep(Duration::from_secs(secs)),
        None => {
            eprintln!("recording, press Enter to stop");
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
        }
    }

    recording.close().context("recording failed")?;
    println!("{}", output.display());
    Ok(())
}
