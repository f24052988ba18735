//! Operator input: typed commands from stdin and timed scripts.
//!
//! | command                   | action        |
//! |---------------------------|---------------|
//! | `retry`, `reconnect`, `r` | `Confirm`     |
//! | `quit`, `cancel`, `q`     | `Cancel`      |
//! | `status`, `s`             | `QueryStatus` |
//! | `role`                    | `QueryRole`   |

use std::collections::VecDeque;
use std::io::BufRead;
use std::thread;

use irpad_shared::publisher::OperatorAction;
use log::{debug, warn};
use tokio::sync::mpsc;

use crate::DemoError;

/// Map one typed command to an action
pub fn parse_action(command: &str) -> Option<OperatorAction> {
    match command.trim().to_ascii_lowercase().as_str() {
        "retry" | "reconnect" | "r" => Some(OperatorAction::Confirm),
        "quit" | "cancel" | "q" => Some(OperatorAction::Cancel),
        "status" | "s" => Some(OperatorAction::QueryStatus),
        "role" => Some(OperatorAction::QueryRole),
        _ => None,
    }
}

/// An action fired once the run has lasted `at_ms`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptStep {
    pub at_ms: u64,
    pub action: OperatorAction,
}

/// Timed actions, consumed in order
#[derive(Debug, Default, Clone)]
pub struct Script {
    steps: VecDeque<ScriptStep>,
}

impl Script {
    /// Parse `"<ms>:<command>,<ms>:<command>,..."`
    pub fn parse(text: &str) -> Result<Self, DemoError> {
        let mut steps = Vec::new();
        for item in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (at, command) = item
                .split_once(':')
                .ok_or_else(|| DemoError::Config(format!("script step '{item}' is not <ms>:<command>")))?;
            let at_ms = at
                .trim()
                .parse::<u64>()
                .map_err(|e| DemoError::Config(format!("script step '{item}': {e}")))?;
            let action =
                parse_action(command).ok_or_else(|| DemoError::Config(format!("unknown command '{command}'")))?;
            steps.push(ScriptStep { at_ms, action });
        }
        steps.sort_by_key(|s| s.at_ms);

        Ok(Self { steps: steps.into() })
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Next action whose time has come
    pub fn due(&mut self, elapsed_ms: u64) -> Option<OperatorAction> {
        match self.steps.front() {
            Some(step) if step.at_ms <= elapsed_ms => self.steps.pop_front().map(|s| s.action),
            _ => None,
        }
    }
}

/// Read commands from stdin on a plain thread
///
/// The channel closes when stdin reaches end of file.
pub fn spawn_stdin_reader() -> mpsc::Receiver<OperatorAction> {
    let (tx, rx) = mpsc::channel(8);
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("stdin: {}", e);
                    break;
                }
            };
            match parse_action(&line) {
                Some(action) => {
                    if tx.blocking_send(action).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => warn!("Unknown command '{}'", line.trim()),
            }
        }
        debug!("stdin closed");
    });
    rx
}
