use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use glass_loop::{
    Agent, AgentConfig, BrowserConfig, ChromiumComputer, CuaClient, CuaConfig, DiskScreenshotStore, Item,
    JsonlLogger, PageMetadata, StdinSafetyGate, StepLogger,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ComputerKind {
    /// Launch a local Chromium.
    Chromium,
    /// Attach to a running Chromium over its DevTools websocket.
    ChromiumRemote,
}

#[derive(Debug, Parser)]
#[command(name = "glass-loop", about = "Drive a browser with a computer-use model")]
struct Args {
    /// Computer environment to use.
    #[arg(long, value_enum, default_value = "chromium")]
    computer: ComputerKind,
    /// DevTools websocket url for `chromium-remote`.
    #[arg(long, env = "CHROME_WS_URL")]
    ws_url: Option<String>,
    /// Initial input to use instead of asking the user.
    #[arg(long)]
    input: Option<String>,
    /// Enable debug output, including the request history.
    #[arg(long)]
    debug: bool,
    /// Save each computer-call screenshot under the screenshot directory.
    #[arg(long)]
    show: bool,
    /// Start the browsing session with a specific URL.
    #[arg(long, default_value = "https://bing.com")]
    start_url: String,
    /// Run Chromium without a window.
    #[arg(long)]
    headless: bool,
    /// Maximum number of model round trips per turn before returning a capped response.
    #[arg(long)]
    max_actions: Option<usize>,
    /// Stop once the agent produces a message for the user.
    #[arg(long)]
    stop_on_message: bool,
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
    #[arg(long, default_value = "screenshots")]
    screenshot_dir: PathBuf,
}

fn normalize_start_url(url: &str) -> String {
    if url.starts_with("http") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

/// Metadata for the `initial_navigation` event. A failed metadata script still yields a
/// record carrying the raw URL.
fn navigation_metadata(read: Result<PageMetadata>, current_url: String) -> PageMetadata {
    let mut metadata = read.unwrap_or_else(|e| {
        warn!(error = %e, "failed to read page metadata after initial navigation");
        PageMetadata::default()
    });
    if metadata.full_url.as_deref().map_or(true, str::is_empty) {
        metadata.full_url = Some(current_url);
    }
    metadata
}

/// `None` on "exit" or end of input.
async fn read_prompt() -> Result<Option<String>> {
    let line = tokio::task::spawn_blocking(|| -> io::Result<Option<String>> {
        let mut stdout = io::stdout();
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    })
    .await??;
    Ok(line.filter(|l| l != "exit"))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    run(args).await
}

async fn run(mut args: Args) -> Result<()> {
    let browser_cfg = BrowserConfig { headless: args.headless, ..Default::default() };
    let computer = match args.computer {
        ComputerKind::Chromium => ChromiumComputer::launch(browser_cfg).await?,
        ComputerKind::ChromiumRemote => {
            let ws = args
                .ws_url
                .as_deref()
                .filter(|ws| !ws.trim().is_empty())
                .context("--ws-url or CHROME_WS_URL is required for chromium-remote")?;
            ChromiumComputer::connect(ws, browser_cfg).await?
        }
    };

    let logger = Arc::new(JsonlLogger::create(&args.log_dir).await?);
    info!(agent_id = logger.agent_id(), path = %logger.path().display(), "logging steps");

    let start_url = normalize_start_url(&args.start_url);
    computer.open_url(&start_url).await?;
    let current_url = computer.current_url().await?;
    let metadata = navigation_metadata(computer.page_metadata().await, current_url);
    logger.log_browser_state("initial_navigation", &metadata).await?;

    let client = CuaClient::new(CuaConfig::default())?;
    let mut agent = Agent::new(computer, client, StdinSafetyGate, AgentConfig::default())
        .with_logger(logger.clone());
    if args.show {
        let dir = args.screenshot_dir.join(logger.agent_id());
        agent = agent.with_screenshot_store(Arc::new(DiskScreenshotStore::new(dir)));
    }

    let mut items: Vec<Item> = Vec::new();
    loop {
        let user_input = match args.input.take() {
            Some(input) => input,
            None => match read_prompt().await? {
                Some(input) => input,
                None => break,
            },
        };
        if user_input == "exit" {
            break;
        }

        let prompt_id = logger.new_prompt(&user_input).await?;
        items.push(Item::user(user_input));
        let output = agent
            .run_turn(&items, Some(&prompt_id), args.max_actions)
            .await?;

        let answered = output.iter().any(Item::is_assistant_message);
        let capped = output
            .iter()
            .any(|item| matches!(item, Item::ActionLimitReached { .. }));
        items.extend(output);

        if args.stop_on_message && answered {
            println!("Assistant message received; stopping due to --stop-on-message.");
            break;
        }
        if args.max_actions.is_some() && capped {
            println!("Maximum actions reached; stopping due to --max-actions.");
            break;
        }
    }
    Ok(())
}
