use crate::error::TransportError;
use crate::plugin_api::{PluginState, PushMessage, SnapshotResponse, DEFAULT_PLUGIN_ID};
use crate::status::BufferStatus;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Request side of the plugin API.
pub trait PluginApi {
    fn fetch_snapshot(
        &self,
    ) -> impl Future<Output = Result<SnapshotResponse, TransportError>> + Send;

    fn clear(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Why a snapshot refresh was requested. Every reason refreshes the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivationReason {
    Startup,
    UserLoggedIn,
    UserLoggedOut,
    SettingsUpdated,
    Reconnected,
}

impl ActivationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivationReason::Startup => "startup",
            ActivationReason::UserLoggedIn => "user_logged_in",
            ActivationReason::UserLoggedOut => "user_logged_out",
            ActivationReason::SettingsUpdated => "settings_updated",
            ActivationReason::Reconnected => "reconnected",
        }
    }
}

impl fmt::Display for ActivationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Applied { changed: bool },
    OtherPlugin,
    UnknownType(String),
    Malformed(String),
}

/// Single writer for [`BufferStatus`]. Renderers observe it through
/// [`StatusReconciler::subscribe`] and are only woken on real changes.
pub struct StatusReconciler {
    plugin_id: String,
    status_tx: watch::Sender<BufferStatus>,
}

impl Default for StatusReconciler {
    fn default() -> Self {
        Self::new(DEFAULT_PLUGIN_ID)
    }
}

impl StatusReconciler {
    pub fn new(plugin_id: impl Into<String>) -> Self {
        let (status_tx, _) = watch::channel(BufferStatus::default());
        Self {
            plugin_id: plugin_id.into(),
            status_tx,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn subscribe(&self) -> watch::Receiver<BufferStatus> {
        self.status_tx.subscribe()
    }

    pub fn current(&self) -> BufferStatus {
        self.status_tx.borrow().clone()
    }

    /// Entry point for `plugin` frames from the push socket, which carries
    /// messages for every installed plugin.
    pub fn apply_push_message(&self, plugin_id: &str, data: &Value) -> PushOutcome {
        if plugin_id != self.plugin_id {
            return PushOutcome::OtherPlugin;
        }
        let message = match PushMessage::from_data(data) {
            Ok(message) => message,
            Err(err) => {
                debug!("push_message_malformed: {err}");
                return PushOutcome::Malformed(err.to_string());
            }
        };
        if let PushMessage::Unknown { kind } = message {
            debug!("push_message_ignored: type={kind}");
            return PushOutcome::UnknownType(kind);
        }
        PushOutcome::Applied {
            changed: self.apply_message(message),
        }
    }

    pub fn apply_message(&self, message: PushMessage) -> bool {
        match message {
            PushMessage::Update(update) => self
                .status_tx
                .send_if_modified(|status| status.apply_update(&update)),
            PushMessage::Status(text) => self
                .status_tx
                .send_if_modified(|status| status.set_status(&text)),
            PushMessage::State(config) => self.apply_config(&config),
            PushMessage::Unknown { .. } => false,
        }
    }

    pub fn apply_config(&self, config: &PluginState) -> bool {
        let changed = self
            .status_tx
            .send_if_modified(|status| status.apply_config(config));
        if changed {
            debug!(
                "plugin_state_applied: state={} enabled={} advanced_ok={}",
                config.state, config.enabled, config.advanced_ok_detected
            );
        }
        changed
    }

    /// Applies the outcome of a snapshot fetch. A failed fetch mutates nothing.
    pub fn apply_snapshot_result(
        &self,
        result: Result<SnapshotResponse, TransportError>,
    ) -> Result<bool, TransportError> {
        match result {
            Ok(snapshot) => Ok(self.apply_config(&snapshot.state)),
            Err(err) => {
                warn!("snapshot_fetch_failed: {err}");
                Err(err)
            }
        }
    }

    pub async fn refresh<A: PluginApi>(&self, api: &A) -> Result<bool, TransportError> {
        let result = api.fetch_snapshot().await;
        self.apply_snapshot_result(result)
    }

    pub async fn request_data<A: PluginApi>(&self, api: &A) -> Result<bool, TransportError> {
        self.refresh(api).await
    }

    pub async fn activate<A: PluginApi>(
        &self,
        reason: ActivationReason,
        api: &A,
    ) -> Result<bool, TransportError> {
        log_activation(reason);
        self.refresh(api).await
    }

    /// Detached form of [`activate`](Self::activate): the returned future
    /// owns `api` and does not borrow the reconciler, so it can be spawned.
    /// Its result goes back through [`apply_snapshot_result`](Self::apply_snapshot_result).
    pub fn activation_fetch<A>(
        reason: ActivationReason,
        api: A,
    ) -> impl Future<Output = Result<SnapshotResponse, TransportError>> + Send
    where
        A: PluginApi + Send + Sync,
    {
        log_activation(reason);
        Self::request_data_fetch(api)
    }

    /// Detached form of [`request_data`](Self::request_data).
    pub fn request_data_fetch<A>(
        api: A,
    ) -> impl Future<Output = Result<SnapshotResponse, TransportError>> + Send
    where
        A: PluginApi + Send + Sync,
    {
        async move { api.fetch_snapshot().await }
    }
}

fn log_activation(reason: ActivationReason) {
    info!("activation: reason={reason}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin_api::CtsTriggered;
    use crate::status::READY_STATUS;
    use serde_json::json;
    use std::sync::Mutex;

    struct FakeApi {
        snapshot: Mutex<Option<Result<SnapshotResponse, TransportError>>>,
    }

    impl FakeApi {
        fn returning(result: Result<SnapshotResponse, TransportError>) -> Self {
            Self {
                snapshot: Mutex::new(Some(result)),
            }
        }
    }

    impl PluginApi for FakeApi {
        fn fetch_snapshot(
            &self,
        ) -> impl Future<Output = Result<SnapshotResponse, TransportError>> + Send {
            let result = self
                .snapshot
                .lock()
                .expect("snapshot lock")
                .take()
                .unwrap_or_else(|| Err(TransportError::Request("no snapshot queued".to_string())));
            async move { result }
        }

        fn clear(&self) -> impl Future<Output = Result<(), TransportError>> + Send {
            async { Ok(()) }
        }
    }

    fn ready_state() -> PluginState {
        PluginState {
            enabled: true,
            advanced_ok_detected: true,
            state: "ready".to_string(),
            planner_buffer_size: Some(512),
            command_buffer_size: Some(16),
            inflight_target: Some(4),
        }
    }

    fn update_data() -> Value {
        json!({
            "type": "update",
            "message": {
                "command_buffer_avail": 10,
                "command_underruns_detected": 0,
                "planner_buffer_avail": 400,
                "planner_underruns_detected": 1,
                "cts_triggered": false,
                "current_line_number": 1000,
                "acked_line_number": 995,
                "inflight": 5,
                "resends_detected": 2,
                "send_queue_size": 3
            }
        })
    }

    #[test]
    fn update_touches_only_runtime_counters() {
        let reconciler = StatusReconciler::default();
        reconciler.apply_config(&PluginState {
            advanced_ok_detected: false,
            ..ready_state()
        });
        reconciler.apply_message(PushMessage::Status("Monitoring".to_string()));
        let before = reconciler.current();

        let outcome = reconciler.apply_push_message("buffer_buddy", &update_data());
        assert_eq!(outcome, PushOutcome::Applied { changed: true });

        let after = reconciler.current();
        assert_eq!(after.enabled, before.enabled);
        assert_eq!(after.advanced_ok_detected, before.advanced_ok_detected);
        assert_eq!(after.state, before.state);
        assert_eq!(after.status, before.status);
        assert_eq!(after.planner_buffer_size, before.planner_buffer_size);
        assert_eq!(after.command_buffer_size, before.command_buffer_size);
        assert_eq!(after.inflight_target, before.inflight_target);

        assert_eq!(after.command_buffer_avail, Some(10));
        assert_eq!(after.command_underruns_detected, Some(0));
        assert_eq!(after.planner_buffer_avail, Some(400));
        assert_eq!(after.planner_underruns_detected, Some(1));
        assert_eq!(after.cts_triggered, Some(CtsTriggered::Flag(false)));
        assert_eq!(after.current_line_number, Some(1000));
        assert_eq!(after.acked_line_number, Some(995));
        assert_eq!(after.inflight, Some(5));
        assert_eq!(after.resends_detected, Some(2));
        assert_eq!(after.send_queue_size, Some(3));
    }

    #[test]
    fn update_values_render_as_plain_numbers() {
        let reconciler = StatusReconciler::default();
        reconciler.apply_push_message("buffer_buddy", &update_data());

        let rendered: Vec<String> = reconciler
            .current()
            .runtime_rows()
            .into_iter()
            .map(|row| row.value)
            .collect();
        assert_eq!(
            rendered,
            vec!["10", "0", "400", "1", "false", "1000", "995", "5", "2", "3"]
        );
    }

    #[test]
    fn handshake_forces_ready_status() {
        let reconciler = StatusReconciler::default();
        reconciler.apply_message(PushMessage::Status("Resend detected, backing off".to_string()));

        let outcome = reconciler.apply_push_message(
            "buffer_buddy",
            &json!({"type": "state", "message": {
                "enabled": true,
                "advanced_ok_detected": true,
                "state": "printing",
                "planner_buffer_size": 16,
                "command_buffer_size": 4,
                "inflight_target": 3
            }}),
        );

        assert_eq!(outcome, PushOutcome::Applied { changed: true });
        assert_eq!(reconciler.current().status, READY_STATUS);
        assert_eq!(reconciler.current().state, "printing");
    }

    #[test]
    fn config_without_handshake_leaves_status() {
        let reconciler = StatusReconciler::default();
        reconciler.apply_message(PushMessage::Status("Buffer sizes detected".to_string()));
        reconciler.apply_config(&PluginState {
            advanced_ok_detected: false,
            ..ready_state()
        });
        assert_eq!(reconciler.current().status, "Buffer sizes detected");

        let fresh = StatusReconciler::default();
        fresh.apply_config(&PluginState {
            advanced_ok_detected: false,
            ..ready_state()
        });
        assert_eq!(fresh.current().status, "Initialising...");
    }

    #[test]
    fn status_after_handshake_is_taken_verbatim() {
        let reconciler = StatusReconciler::default();
        reconciler.apply_config(&ready_state());
        reconciler.apply_message(PushMessage::Status("Monitoring".to_string()));
        assert_eq!(reconciler.current().status, "Monitoring");
    }

    #[test]
    fn other_plugins_are_ignored_without_waking_observers() {
        let reconciler = StatusReconciler::default();
        let observer = reconciler.subscribe();
        let before = reconciler.current();

        let outcome = reconciler.apply_push_message("octolapse", &update_data());

        assert_eq!(outcome, PushOutcome::OtherPlugin);
        assert_eq!(reconciler.current(), before);
        assert!(!observer.has_changed().expect("sender alive"));
    }

    #[test]
    fn unknown_and_malformed_messages_are_ignored() {
        let reconciler = StatusReconciler::default();
        let observer = reconciler.subscribe();
        let before = reconciler.current();

        let unknown = reconciler.apply_push_message(
            "buffer_buddy",
            &json!({"type": "histogram", "message": {"bins": [1, 2, 3]}}),
        );
        assert_eq!(unknown, PushOutcome::UnknownType("histogram".to_string()));

        let malformed = reconciler.apply_push_message(
            "buffer_buddy",
            &json!({"type": "update", "message": {"inflight": "lots"}}),
        );
        assert!(matches!(malformed, PushOutcome::Malformed(_)));

        assert_eq!(reconciler.current(), before);
        assert!(!observer.has_changed().expect("sender alive"));
    }

    #[test]
    fn observers_see_applied_changes() {
        let reconciler = StatusReconciler::default();
        let mut observer = reconciler.subscribe();

        reconciler.apply_message(PushMessage::Status("Monitoring".to_string()));

        assert!(observer.has_changed().expect("sender alive"));
        assert_eq!(observer.borrow_and_update().status, "Monitoring");
        reconciler.apply_message(PushMessage::Status("Monitoring".to_string()));
        assert!(!observer.has_changed().expect("sender alive"));
    }

    #[tokio::test]
    async fn activation_applies_snapshot() {
        let reconciler = StatusReconciler::default();
        reconciler.apply_message(PushMessage::Status("Initialising...".to_string()));
        let api = FakeApi::returning(Ok(SnapshotResponse {
            state: ready_state(),
        }));

        let changed = reconciler
            .activate(ActivationReason::Startup, &api)
            .await
            .expect("refresh");

        assert!(changed);
        let status = reconciler.current();
        assert!(status.enabled);
        assert!(status.advanced_ok_detected);
        assert_eq!(status.state, "ready");
        assert_eq!(status.planner_buffer_size, Some(512));
        assert_eq!(status.command_buffer_size, Some(16));
        assert_eq!(status.inflight_target, Some(4));
        assert_eq!(status.status, "Ready");
    }

    #[tokio::test]
    async fn failed_fetch_leaves_state_untouched() {
        let reconciler = StatusReconciler::default();
        reconciler.apply_push_message("buffer_buddy", &update_data());
        reconciler.apply_message(PushMessage::Status("Monitoring".to_string()));
        let before = reconciler.current();
        let api = FakeApi::returning(Err(TransportError::Status {
            status: 503,
            body: "offline".to_string(),
        }));

        let result = reconciler.activate(ActivationReason::UserLoggedIn, &api).await;

        assert!(matches!(result, Err(TransportError::Status { status: 503, .. })));
        assert_eq!(reconciler.current(), before);
    }

    #[tokio::test]
    async fn every_activation_reason_refreshes() {
        for reason in [
            ActivationReason::Startup,
            ActivationReason::UserLoggedIn,
            ActivationReason::UserLoggedOut,
            ActivationReason::SettingsUpdated,
            ActivationReason::Reconnected,
        ] {
            let reconciler = StatusReconciler::default();
            let api = FakeApi::returning(Ok(SnapshotResponse {
                state: ready_state(),
            }));
            reconciler.activate(reason, &api).await.expect("refresh");
            assert_eq!(reconciler.current().state, "ready", "reason {reason}");
            assert!(api.snapshot.lock().expect("snapshot lock").is_none());
        }
    }

    #[tokio::test]
    async fn stale_snapshot_overwrites_newer_push_state() {
        let reconciler = StatusReconciler::default();
        let api = FakeApi::returning(Ok(SnapshotResponse {
            state: PluginState {
                state: "ready".to_string(),
                advanced_ok_detected: false,
                ..ready_state()
            },
        }));
        let pending = api.fetch_snapshot();
        reconciler.apply_message(PushMessage::State(PluginState {
            state: "printing".to_string(),
            advanced_ok_detected: false,
            ..ready_state()
        }));

        reconciler
            .apply_snapshot_result(pending.await)
            .expect("snapshot applied");

        assert_eq!(reconciler.current().state, "ready");
    }

    #[tokio::test]
    async fn detached_fetches_apply_like_activate() {
        let reconciler = StatusReconciler::default();
        let api = FakeApi::returning(Ok(SnapshotResponse {
            state: ready_state(),
        }));
        let fetch = StatusReconciler::activation_fetch(ActivationReason::SettingsUpdated, api);
        let handle = tokio::spawn(fetch);

        let changed = reconciler
            .apply_snapshot_result(handle.await.expect("fetch task"))
            .expect("snapshot applied");

        assert!(changed);
        assert_eq!(reconciler.current().status, "Ready");

        let failing = FakeApi::returning(Err(TransportError::Request("refused".to_string())));
        let result = StatusReconciler::request_data_fetch(failing).await;
        assert!(reconciler.apply_snapshot_result(result).is_err());
        assert_eq!(reconciler.current().state, "ready");
    }
}
