//! Sliding dialogue windows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DialogueWindow, Utterance};

/// Transcript windowing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowingConfig {
    /// Utterances atomized per window.
    pub window_size: usize,
    /// Trailing utterances of the previous window carried as context.
    pub overlap: usize,
}

impl Default for WindowingConfig {
    fn default() -> Self {
        Self {
            window_size: 40,
            overlap: 2,
        }
    }
}

impl WindowingConfig {
    /// Validate configuration values are in valid ranges.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.window_size == 0 {
            return Err("window_size must be at least 1");
        }
        if self.overlap >= self.window_size {
            return Err("overlap must be smaller than window_size");
        }
        Ok(())
    }
}

/// Split utterances into consecutive windows.
///
/// Each utterance is atomized in exactly one window; the `overlap` turns
/// preceding a window ride along as its context.
pub fn split_windows(
    utterances: Vec<Utterance>,
    config: &WindowingConfig,
    created_at: DateTime<Utc>,
) -> Vec<DialogueWindow> {
    let size = config.window_size.max(1);
    let mut windows = Vec::with_capacity(utterances.len().div_ceil(size));

    let mut start = 0;
    while start < utterances.len() {
        let end = (start + size).min(utterances.len());
        let context_start = start.saturating_sub(config.overlap);
        windows.push(
            DialogueWindow::new(utterances[start..end].to_vec(), created_at)
                .with_context(utterances[context_start..start].to_vec()),
        );
        start = end;
    }
    windows
}
