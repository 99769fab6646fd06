use crate::config::MonitorConfig;
use bb_client::PushEvent;
use bb_core::{ActivationReason, BufferStatus, SnapshotResponse, StatusReconciler, TransportError};
use chrono::{DateTime, Utc};
use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind};
use tokio::sync::watch;
use tracing::{info, warn};

/// What started a snapshot fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    Activation(ActivationReason),
    RequestData,
}

impl RefreshTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            RefreshTrigger::Activation(reason) => reason.as_str(),
            RefreshTrigger::RequestData => "request_data",
        }
    }
}

/// Completions of work spawned off the event loop.
#[derive(Debug)]
pub enum AppEvent {
    Snapshot {
        trigger: RefreshTrigger,
        result: Result<SnapshotResponse, TransportError>,
    },
    Cleared(Result<(), TransportError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    None,
    Quit,
    RequestData,
    Clear,
}

pub struct App {
    pub config: MonitorConfig,
    pub reconciler: StatusReconciler,
    status_rx: watch::Receiver<BufferStatus>,
    view: BufferStatus,
    pub connected: bool,
    pub ever_connected: bool,
    pub help_open: bool,
    pub status_note: Option<String>,
    pub last_change: Option<DateTime<Utc>>,
    pub fetches_in_flight: usize,
}

impl App {
    pub fn new(config: MonitorConfig) -> Self {
        let reconciler = StatusReconciler::new(config.plugin_id.clone());
        let status_rx = reconciler.subscribe();
        let view = status_rx.borrow().clone();
        Self {
            config,
            reconciler,
            status_rx,
            view,
            connected: false,
            ever_connected: false,
            help_open: false,
            status_note: None,
            last_change: None,
            fetches_in_flight: 0,
        }
    }

    /// Latest status as seen by the renderer.
    pub fn view(&mut self) -> &BufferStatus {
        if self.status_rx.has_changed().unwrap_or(false) {
            self.view = self.status_rx.borrow_and_update().clone();
            self.last_change = Some(Utc::now());
        }
        &self.view
    }

    pub fn fetch_started(&mut self) {
        self.fetches_in_flight += 1;
    }

    /// Applies a push event. Returns the activation it triggers, if any.
    pub fn apply_push_event(&mut self, event: PushEvent) -> Option<ActivationReason> {
        match event {
            PushEvent::Connected => {
                self.connected = true;
                self.status_note = Some("push socket connected".to_string());
                if self.ever_connected {
                    return Some(ActivationReason::Reconnected);
                }
                self.ever_connected = true;
                None
            }
            PushEvent::Disconnected => {
                self.connected = false;
                self.status_note = Some("push socket lost; holding last status".to_string());
                None
            }
            PushEvent::Plugin(message) => {
                self.reconciler.apply_push_message(&message.plugin, &message.data);
                None
            }
            PushEvent::Activation(reason) => Some(reason),
            PushEvent::ReauthRequired => {
                self.status_note = Some("session expired; re-authenticating".to_string());
                None
            }
        }
    }

    pub fn apply_app_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Snapshot { trigger, result } => {
                self.fetches_in_flight = self.fetches_in_flight.saturating_sub(1);
                match self.reconciler.apply_snapshot_result(result) {
                    Ok(changed) => {
                        info!("snapshot_applied: trigger={} changed={changed}", trigger.as_str());
                        if matches!(trigger, RefreshTrigger::RequestData) {
                            self.status_note = Some("snapshot refreshed".to_string());
                        }
                    }
                    Err(err) => {
                        self.status_note = Some(format!("snapshot failed: {err}"));
                    }
                }
            }
            AppEvent::Cleared(result) => match result {
                Ok(()) => {
                    info!("clear_sent");
                    self.status_note = Some("clear command sent".to_string());
                }
                Err(err) => {
                    warn!("clear_failed: {err}");
                    self.status_note = Some(format!("clear failed: {err}"));
                }
            },
        }
    }
}

pub fn handle_input(event: Event, app: &mut App) -> KeyAction {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => handle_key(key, app),
        _ => KeyAction::None,
    }
}

fn handle_key(key: KeyEvent, app: &mut App) -> KeyAction {
    if matches!(key.code, KeyCode::Char('?') | KeyCode::F(1)) {
        app.help_open = !app.help_open;
        return KeyAction::None;
    }
    if key.code == KeyCode::Esc && app.help_open {
        app.help_open = false;
        return KeyAction::None;
    }
    if app.help_open {
        return KeyAction::None;
    }

    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => KeyAction::Quit,
        KeyCode::Char('r') => KeyAction::RequestData,
        KeyCode::Char('c') => KeyAction::Clear,
        _ => KeyAction::None,
    }
}
