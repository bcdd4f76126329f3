use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use postshot_cli::host::Host;
use postshot_cli::logging::init_logging;
use postshot_cli::readline;
use postshot_core::control::canonical_url;
use postshot_core::{ControlAction, PageCommand, PumpReport, RingAction, RingError, config};
use postshot_types::Settings;
use postshot_types::formatting::format_bytes;
use tracing::debug;

const DEFAULT_ADDRESS: &str = "https://www.tumblr.com/dashboard";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), String> {
    init_logging();
    let cli = Cli::parse();
    let settings = config::resolve(cli.config.as_deref()).map_err(|e| e.to_string())?;
    debug!(?settings, "settings loaded");

    match cli.command {
        Some(Commands::RewriteUrl { url }) => {
            let rewritten = canonical_url(&url, &settings.control).map_err(|e| e.to_string())?;
            println!("{rewritten}");
        }
        Some(Commands::Status { url, page }) => {
            let mut host = new_host(settings, None, page.as_deref());
            let status = match page {
                Some(page) => host.navigate(&page, &url).await?,
                None => host.check(&url).await,
            };
            println!("{status}");
            if let Some(alert) = host.control().alert() {
                println!("{alert}");
            }
        }
        Some(Commands::Capture {
            page,
            item,
            address,
            assets,
            out,
        }) => {
            let mut host = new_host(settings, assets, Some(&page));
            let status = host.navigate(&page, &address).await?;
            if status.is_error() {
                return Err(format!("{address}: {status}"));
            }
            host.press_control(ControlAction::ScanPosts).await?;
            let ring = match item {
                Some(id) => {
                    host.target(&id)?;
                    id
                }
                None => "1".to_string(),
            };
            println!("{}", host.press(&ring, RingAction::Select).await?);
            let dir = out.unwrap_or_else(default_output_dir);
            println!("saved {}", host.save(&dir)?.display());
        }
        Some(Commands::Repl {
            page,
            address,
            assets,
        }) => {
            let mut host = new_host(settings, assets, page.as_deref());
            if let Some(page) = page {
                println!("{}", host.navigate(&page, &address).await?);
            }
            repl(&mut host).await?;
        }
        None => {
            let mut host = new_host(settings, None, None);
            repl(&mut host).await?;
        }
    }
    Ok(())
}

#[derive(Parser)]
#[command(version, about = "Capture feed posts as images")]
struct Cli {
    /// Settings file; the per-user config is used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the canonical address of a styled blog page
    RewriteUrl { url: String },
    /// Classify an address and ping the page agent
    Status {
        url: String,
        /// Page fixture to load at `url` before pinging
        #[arg(short, long)]
        page: Option<PathBuf>,
    },
    /// Load a page, select one item and save its image
    Capture {
        page: PathBuf,
        /// Element id of the item; the first visible item when omitted
        #[arg(short, long)]
        item: Option<String>,
        #[arg(short, long, default_value = DEFAULT_ADDRESS)]
        address: String,
        /// Directory mirroring remote hosts; defaults to the page's directory
        #[arg(long)]
        assets: Option<PathBuf>,
        /// Output directory; defaults to the download directory
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Interactive control surface
    Repl {
        page: Option<PathBuf>,
        #[arg(short, long, default_value = DEFAULT_ADDRESS)]
        address: String,
        #[arg(long)]
        assets: Option<PathBuf>,
    },
}

fn new_host(settings: Settings, assets: Option<PathBuf>, page: Option<&Path>) -> Host {
    let assets = assets
        .or_else(|| page.and_then(Path::parent).map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    let clipboard = dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("postshot")
        .join("clipboard");
    Host::new(settings, assets, clipboard)
}

fn default_output_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
}

// ─────────────────────────────────────────────────────────────────────────────
// REPL
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(no_binary_name = true, disable_version_flag = true)]
struct Repl {
    #[command(subcommand)]
    command: Option<ReplCommand>,
}

#[derive(Subcommand)]
enum ReplCommand {
    /// Navigate the tab to a page fixture
    Open {
        page: PathBuf,
        #[arg(short, long, default_value = DEFAULT_ADDRESS)]
        address: String,
    },
    Status,
    /// Enter targeting mode
    Scan,
    TogglePanel,
    ExitTargeting,
    ToggleTargeting,
    /// Reload a styled blog on the canonical host
    Unstyle,
    Rings,
    /// Press a ring button: `press <ring|#id> <action>`
    Press { ring: String, action: String },
    /// Scroll an item into view and ring it
    Target { id: String },
    Scroll {
        #[arg(allow_negative_numbers = true)]
        dy: f64,
    },
    Resize { width: f64, height: f64 },
    /// Advance the clock
    Tick { ms: u64 },
    Save { dir: Option<PathBuf> },
    Copy,
    Config,
    Exit,
}

async fn repl(host: &mut Host) -> Result<(), String> {
    while let Some(line) = readline()? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match respond(line, host).await {
            Ok(true) => break,
            Ok(false) => {}
            Err(err) => {
                writeln!(std::io::stdout(), "{err}").map_err(|e| e.to_string())?;
                std::io::stdout().flush().map_err(|e| e.to_string())?;
            }
        }
    }
    Ok(())
}

async fn respond(line: &str, host: &mut Host) -> Result<bool, String> {
    let args = shlex::split(line).ok_or("error: Invalid quoting")?;
    let repl = Repl::try_parse_from(args).map_err(|e| e.to_string())?;

    let message = match repl.command {
        Some(ReplCommand::Open { page, address }) => {
            host.navigate(&page, &address).await?.to_string()
        }
        Some(ReplCommand::Status) => {
            let status = host.status().await;
            let actions: Vec<String> = host
                .control()
                .actions()
                .iter()
                .map(ToString::to_string)
                .collect();
            format!("{status} [{}]", actions.join(", "))
        }
        Some(ReplCommand::Scan) => host.press_control(ControlAction::ScanPosts).await?,
        Some(ReplCommand::TogglePanel) => host.press_control(ControlAction::TogglePanel).await?,
        Some(ReplCommand::Unstyle) => host.press_control(ControlAction::Unstyle).await?,
        Some(ReplCommand::ExitTargeting) => host.send(PageCommand::ExitTargeting).await?,
        Some(ReplCommand::ToggleTargeting) => host.send(PageCommand::ToggleTargeting).await?,
        Some(ReplCommand::Rings) => {
            let rings = host.describe_rings()?;
            if rings.is_empty() {
                "no rings".to_string()
            } else {
                rings.join("\n")
            }
        }
        Some(ReplCommand::Press { ring, action }) => {
            let action: RingAction = action.parse().map_err(|e: RingError| e.to_string())?;
            host.press(&ring, action).await?
        }
        Some(ReplCommand::Target { id }) => host.target(&id)?.to_string(),
        Some(ReplCommand::Scroll { dy }) => describe_pump(&host.scroll_by(dy)?),
        Some(ReplCommand::Resize { width, height }) => describe_pump(&host.resize(width, height)?),
        Some(ReplCommand::Tick { ms }) => {
            let report = host.advance(ms);
            format!("t={}ms, {}", host.now_ms(), describe_pump(&report))
        }
        Some(ReplCommand::Save { dir }) => {
            let dir = dir.unwrap_or_else(default_output_dir);
            format!("saved {}", host.save(&dir)?.display())
        }
        Some(ReplCommand::Copy) => format!("copied {}", format_bytes(host.copy()?)),
        Some(ReplCommand::Config) => {
            toml::to_string_pretty(host.settings()).map_err(|e| e.to_string())?
        }
        Some(ReplCommand::Exit) => return Ok(true),
        None => return Ok(false),
    };
    println!("{message}");
    Ok(false)
}

fn describe_pump(report: &PumpReport) -> String {
    format!(
        "{} notice(s), {} ring(s) evicted, {} dismissed, {} label(s) reverted",
        report.notices,
        report.evicted.len(),
        report.dismissed.len(),
        report.reverted
    )
}
