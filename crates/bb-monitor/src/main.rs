mod app;
mod config;
mod ui;

use anyhow::Context;
use app::{handle_input, App, AppEvent, KeyAction, RefreshTrigger};
use bb_client::{push_loop, OctoPrintApi, PushEvent};
use bb_core::{ActivationReason, PluginApi, StatusReconciler};
use clap::{Parser, Subcommand};
use config::{default_config_path, load_file_config, resolve, MonitorConfig, Overrides};
use crossterm::{
    event::EventStream,
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{
    fs::OpenOptions,
    io::{self, Stdout},
    path::PathBuf,
    sync::Mutex,
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

const PUSH_QUEUE_CAPACITY: usize = 256;
const EVENT_QUEUE_CAPACITY: usize = 64;
const REDRAW_TICK_MS: u64 = 1000;

#[derive(Parser, Debug)]
#[command(name = "bb-monitor", version, about = "Watch the Buffer Buddy OctoPrint plugin")]
struct Args {
    /// Config file (defaults to the user config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// OctoPrint base URL.
    #[arg(long, env = "BB_OCTOPRINT_URL", global = true)]
    url: Option<String>,
    #[arg(long, env = "BB_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,
    #[arg(long, env = "BB_PLUGIN_ID", global = true)]
    plugin_id: Option<String>,
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[arg(long, default_value_t = false, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Live dashboard fed by the push socket.
    Watch {
        /// Print one line per change instead of drawing the dashboard.
        #[arg(long, default_value_t = false)]
        plain: bool,
    },
    /// Fetch one snapshot and print it.
    Status {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Ask the plugin to reset its counters.
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let command = args.command.clone().unwrap_or(Command::Watch { plain: false });
    let config = load_config(&args)?;
    let interactive = matches!(command, Command::Watch { plain: false });
    init_logging(&config, interactive);

    let api = OctoPrintApi::new(config.api_config()?)?;
    match command {
        Command::Watch { plain: false } => run_dashboard(config, api).await,
        Command::Watch { plain: true } => run_plain(config, api).await,
        Command::Status { json } => run_status(config, api, json).await,
        Command::Clear => {
            api.clear().await.context("clear command failed")?;
            println!("clear command sent to {}", config.octoprint_url);
            Ok(())
        }
    }
}

fn load_config(args: &Args) -> anyhow::Result<MonitorConfig> {
    let file = match args.config.clone().or_else(default_config_path) {
        Some(path) => load_file_config(&path)?,
        None => Default::default(),
    };
    Ok(resolve(
        Overrides {
            octoprint_url: args.url.clone(),
            api_key: args.api_key.clone(),
            plugin_id: args.plugin_id.clone(),
            log_file: args.log_file.clone(),
            debug: args.debug,
        },
        file,
    ))
}

fn init_logging(config: &MonitorConfig, interactive: bool) {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("BB_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if let Some(path) = config.log_file.as_ref() {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .try_init();
                return;
            }
            Err(err) => eprintln!("log_file_error: {}: {err}", path.display()),
        }
    }

    let stderr_enabled = !interactive
        || matches!(
            std::env::var("BB_LOG_STDOUT").ok().as_deref(),
            Some("1") | Some("true") | Some("TRUE") | Some("yes") | Some("YES")
        );
    if stderr_enabled {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .try_init();
    }
}

fn spawn_refresh(api: &OctoPrintApi, trigger: RefreshTrigger, tx: &mpsc::Sender<AppEvent>) {
    let api = api.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let result = match trigger {
            RefreshTrigger::Activation(reason) => {
                StatusReconciler::activation_fetch(reason, api).await
            }
            RefreshTrigger::RequestData => StatusReconciler::request_data_fetch(api).await,
        };
        let _ = tx.send(AppEvent::Snapshot { trigger, result }).await;
    });
}

fn spawn_clear(api: &OctoPrintApi, tx: &mpsc::Sender<AppEvent>) {
    let api = api.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let result = api.clear().await;
        let _ = tx.send(AppEvent::Cleared(result)).await;
    });
}

async fn run_dashboard(config: MonitorConfig, api: OctoPrintApi) -> anyhow::Result<()> {
    let mut app = App::new(config);
    let (push_tx, mut push_rx) = mpsc::channel(PUSH_QUEUE_CAPACITY);
    let push_task = tokio::spawn(push_loop(api.clone(), push_tx));
    let (event_tx, mut event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    spawn_refresh(
        &api,
        RefreshTrigger::Activation(ActivationReason::Startup),
        &event_tx,
    );
    app.fetch_started();

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = dashboard_loop(
        &mut terminal,
        &mut app,
        &api,
        &mut push_rx,
        &event_tx,
        &mut event_rx,
    )
    .await;

    push_task.abort();
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

async fn dashboard_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut App,
    api: &OctoPrintApi,
    push_rx: &mut mpsc::Receiver<PushEvent>,
    event_tx: &mpsc::Sender<AppEvent>,
    event_rx: &mut mpsc::Receiver<AppEvent>,
) -> anyhow::Result<()> {
    let mut events = EventStream::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(REDRAW_TICK_MS));

    loop {
        let view = app.view().clone();
        terminal.draw(|frame| ui::render_ui(frame, app, &view))?;
        tokio::select! {
            _ = ticker.tick() => {}
            Some(event) = push_rx.recv() => {
                if let Some(reason) = app.apply_push_event(event) {
                    spawn_refresh(api, RefreshTrigger::Activation(reason), event_tx);
                    app.fetch_started();
                }
            }
            Some(event) = event_rx.recv() => {
                app.apply_app_event(event);
            }
            maybe_event = events.next() => {
                let Some(Ok(event)) = maybe_event else {
                    continue;
                };
                match handle_input(event, app) {
                    KeyAction::Quit => return Ok(()),
                    KeyAction::RequestData => {
                        spawn_refresh(api, RefreshTrigger::RequestData, event_tx);
                        app.fetch_started();
                    }
                    KeyAction::Clear => spawn_clear(api, event_tx),
                    KeyAction::None => {}
                }
            }
        }
    }
}

async fn run_plain(config: MonitorConfig, api: OctoPrintApi) -> anyhow::Result<()> {
    let mut app = App::new(config);
    let mut status_rx = app.reconciler.subscribe();
    let (push_tx, mut push_rx) = mpsc::channel(PUSH_QUEUE_CAPACITY);
    let push_task = tokio::spawn(push_loop(api.clone(), push_tx));
    let (event_tx, mut event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    spawn_refresh(
        &api,
        RefreshTrigger::Activation(ActivationReason::Startup),
        &event_tx,
    );
    println!("{}", ui::plain_line(&status_rx.borrow_and_update()));

    loop {
        tokio::select! {
            Some(event) = push_rx.recv() => {
                if let Some(reason) = app.apply_push_event(event) {
                    spawn_refresh(&api, RefreshTrigger::Activation(reason), &event_tx);
                }
            }
            Some(event) = event_rx.recv() => {
                app.apply_app_event(event);
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("{}", ui::plain_line(&status_rx.borrow_and_update()));
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    push_task.abort();
    Ok(())
}

async fn run_status(config: MonitorConfig, api: OctoPrintApi, json: bool) -> anyhow::Result<()> {
    if json {
        let snapshot = api.get_snapshot().await.context("snapshot fetch failed")?;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let reconciler = StatusReconciler::new(config.plugin_id.clone());
    if let Err(err) = reconciler.activate(ActivationReason::Startup, &api).await {
        warn!("status_unavailable: {err}");
        anyhow::bail!("snapshot fetch from {} failed: {err}", config.octoprint_url);
    }
    let status = reconciler.current();
    println!("state: {}", status.state);
    println!("status: {}", status.status);
    for row in status.config_rows() {
        println!("{row}");
    }
    Ok(())
}
