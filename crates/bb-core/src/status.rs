use crate::plugin_api::{CtsTriggered, PluginState, UpdatePayload};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const INITIAL_STATE: &str = "initialising";
pub const INITIAL_STATUS: &str = "Initialising...";
pub const READY_STATUS: &str = "Ready";
pub const UNKNOWN_VALUE: &str = "?";

/// Everything the monitor knows about the plugin. Numeric fields stay `None`
/// until the host has reported them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferStatus {
    pub enabled: bool,
    pub advanced_ok_detected: bool,
    pub state: String,
    pub status: String,

    pub planner_buffer_size: Option<u64>,
    pub command_buffer_size: Option<u64>,
    pub inflight_target: Option<u64>,

    pub command_buffer_avail: Option<u64>,
    pub command_underruns_detected: Option<u64>,
    pub planner_buffer_avail: Option<u64>,
    pub planner_underruns_detected: Option<u64>,
    pub cts_triggered: Option<CtsTriggered>,
    pub current_line_number: Option<u64>,
    pub acked_line_number: Option<u64>,
    pub inflight: Option<u64>,
    pub resends_detected: Option<u64>,
    pub send_queue_size: Option<u64>,
}

impl Default for BufferStatus {
    fn default() -> Self {
        Self {
            enabled: false,
            advanced_ok_detected: false,
            state: INITIAL_STATE.to_string(),
            status: INITIAL_STATUS.to_string(),
            planner_buffer_size: None,
            command_buffer_size: None,
            inflight_target: None,
            command_buffer_avail: None,
            command_underruns_detected: None,
            planner_buffer_avail: None,
            planner_underruns_detected: None,
            cts_triggered: None,
            current_line_number: None,
            acked_line_number: None,
            inflight: None,
            resends_detected: None,
            send_queue_size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub label: &'static str,
    pub value: String,
}

impl fmt::Display for StatusRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.value)
    }
}

fn assign<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

pub fn format_count(value: Option<u64>) -> String {
    value
        .map(|value| value.to_string())
        .unwrap_or_else(|| UNKNOWN_VALUE.to_string())
}

impl BufferStatus {
    /// Overwrites the runtime counters. Returns whether anything changed.
    pub fn apply_update(&mut self, update: &UpdatePayload) -> bool {
        let mut changed = false;
        changed |= assign(&mut self.command_buffer_avail, Some(update.command_buffer_avail));
        changed |= assign(
            &mut self.command_underruns_detected,
            Some(update.command_underruns_detected),
        );
        changed |= assign(&mut self.planner_buffer_avail, Some(update.planner_buffer_avail));
        changed |= assign(
            &mut self.planner_underruns_detected,
            Some(update.planner_underruns_detected),
        );
        changed |= assign(&mut self.cts_triggered, Some(update.cts_triggered));
        changed |= assign(&mut self.current_line_number, Some(update.current_line_number));
        changed |= assign(&mut self.acked_line_number, Some(update.acked_line_number));
        changed |= assign(&mut self.inflight, Some(update.inflight));
        changed |= assign(&mut self.resends_detected, Some(update.resends_detected));
        changed |= assign(&mut self.send_queue_size, Some(update.send_queue_size));
        changed
    }

    /// Overwrites the configuration fields. A completed advanced-ok handshake
    /// takes over the status line.
    pub fn apply_config(&mut self, config: &PluginState) -> bool {
        let mut changed = false;
        changed |= assign(&mut self.enabled, config.enabled);
        changed |= assign(&mut self.advanced_ok_detected, config.advanced_ok_detected);
        changed |= assign(&mut self.state, config.state.clone());
        changed |= assign(&mut self.planner_buffer_size, config.planner_buffer_size);
        changed |= assign(&mut self.command_buffer_size, config.command_buffer_size);
        changed |= assign(&mut self.inflight_target, config.inflight_target);
        if self.advanced_ok_detected {
            changed |= assign(&mut self.status, READY_STATUS.to_string());
        }
        changed
    }

    pub fn set_status(&mut self, status: &str) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status.to_string();
        true
    }

    pub fn config_rows(&self) -> Vec<StatusRow> {
        vec![
            StatusRow {
                label: "Enabled",
                value: self.enabled.to_string(),
            },
            StatusRow {
                label: "Advanced ok",
                value: self.advanced_ok_detected.to_string(),
            },
            StatusRow {
                label: "Planner buffer size",
                value: format_count(self.planner_buffer_size),
            },
            StatusRow {
                label: "Command buffer size",
                value: format_count(self.command_buffer_size),
            },
            StatusRow {
                label: "Inflight target",
                value: format_count(self.inflight_target),
            },
        ]
    }

    pub fn runtime_rows(&self) -> Vec<StatusRow> {
        vec![
            StatusRow {
                label: "Command buffer avail",
                value: format_count(self.command_buffer_avail),
            },
            StatusRow {
                label: "Command underruns",
                value: format_count(self.command_underruns_detected),
            },
            StatusRow {
                label: "Planner buffer avail",
                value: format_count(self.planner_buffer_avail),
            },
            StatusRow {
                label: "Planner underruns",
                value: format_count(self.planner_underruns_detected),
            },
            StatusRow {
                label: "CTS triggered",
                value: self
                    .cts_triggered
                    .map(|cts| cts.to_string())
                    .unwrap_or_else(|| UNKNOWN_VALUE.to_string()),
            },
            StatusRow {
                label: "Current line",
                value: format_count(self.current_line_number),
            },
            StatusRow {
                label: "Acked line",
                value: format_count(self.acked_line_number),
            },
            StatusRow {
                label: "Inflight",
                value: format_count(self.inflight),
            },
            StatusRow {
                label: "Resends",
                value: format_count(self.resends_detected),
            },
            StatusRow {
                label: "Send queue",
                value: format_count(self.send_queue_size),
            },
        ]
    }

    pub fn display_rows(&self) -> Vec<StatusRow> {
        let mut rows = vec![
            StatusRow {
                label: "State",
                value: self.state.clone(),
            },
            StatusRow {
                label: "Status",
                value: self.status.clone(),
            },
        ];
        rows.extend(self.config_rows());
        rows.extend(self.runtime_rows());
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_value<'a>(rows: &'a [StatusRow], label: &str) -> &'a str {
        rows.iter()
            .find(|row| row.label == label)
            .map(|row| row.value.as_str())
            .unwrap_or_else(|| panic!("missing row {label}"))
    }

    #[test]
    fn fresh_status_renders_placeholders() {
        let status = BufferStatus::default();
        let rows = status.display_rows();
        assert_eq!(row_value(&rows, "State"), "initialising");
        assert_eq!(row_value(&rows, "Status"), "Initialising...");
        assert_eq!(row_value(&rows, "Enabled"), "false");
        assert_eq!(row_value(&rows, "Planner buffer size"), "?");
        assert_eq!(row_value(&rows, "CTS triggered"), "?");
        assert_eq!(row_value(&rows, "Send queue"), "?");
        assert_eq!(rows.len(), 17);
    }

    #[test]
    fn config_without_handshake_keeps_status_line() {
        let mut status = BufferStatus::default();
        status.set_status("Buffer sizes detected");
        let changed = status.apply_config(&PluginState {
            enabled: true,
            advanced_ok_detected: false,
            state: "printing".to_string(),
            planner_buffer_size: Some(16),
            command_buffer_size: Some(4),
            inflight_target: Some(3),
        });
        assert!(changed);
        assert_eq!(status.status, "Buffer sizes detected");
        assert_eq!(status.state, "printing");
    }

    #[test]
    fn identical_config_reports_no_change() {
        let config = PluginState {
            enabled: true,
            advanced_ok_detected: true,
            state: "ready".to_string(),
            planner_buffer_size: Some(512),
            command_buffer_size: Some(16),
            inflight_target: Some(4),
        };
        let mut status = BufferStatus::default();
        assert!(status.apply_config(&config));
        assert!(!status.apply_config(&config));
        assert!(!status.set_status(READY_STATUS));
    }

    #[test]
    fn row_display_joins_label_and_value() {
        let row = StatusRow {
            label: "Inflight",
            value: "5".to_string(),
        };
        assert_eq!(row.to_string(), "Inflight: 5");
    }
}
