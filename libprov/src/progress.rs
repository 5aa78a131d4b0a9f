//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

/// Receives progress notifications from the long running phases of a resolution.
///
/// Gathering reports one step per repository and slicing reports the number of units
/// visited so far. Reporters must be cheap; they are called from inside the resolution loop.
///
/// # Examples
///
/// ```
/// use libprov::progress::{ProgressInfo, ProgressReporter};
///
/// struct Printer;
///
/// impl ProgressReporter for Printer {
///     fn start(&self, info: &ProgressInfo) {
///         println!("begin {}", info.phase);
///     }
///
///     fn update(&self, info: &ProgressInfo) {
///         println!("{}", info);
///     }
///
///     fn finish(&self, info: &ProgressInfo) {
///         println!("done {}", info.phase);
///     }
/// }
/// ```
pub trait ProgressReporter: Send + Sync {
    fn start(&self, info: &ProgressInfo);
    fn update(&self, info: &ProgressInfo);
    fn finish(&self, info: &ProgressInfo);
}

/// Snapshot of a phase's progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressInfo {
    /// Phase name, e.g. `gather` or `slice`
    pub phase: String,
    pub current: Option<u64>,
    pub total: Option<u64>,
    /// What is being worked on right now, e.g. a repository location
    pub context: Option<String>,
}

impl ProgressInfo {
    pub fn new(phase: impl Into<String>) -> Self {
        ProgressInfo {
            phase: phase.into(),
            current: None,
            total: None,
            context: None,
        }
    }

    pub fn with_current(mut self, current: u64) -> Self {
        self.current = Some(current);
        self
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl fmt::Display for ProgressInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.phase)?;
        match (self.current, self.total) {
            (Some(current), Some(total)) => write!(f, " {}/{}", current, total)?,
            (Some(current), None) => write!(f, " {}", current)?,
            _ => {}
        }
        if let Some(context) = &self.context {
            write!(f, " ({})", context)?;
        }
        Ok(())
    }
}

/// Reporter that drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgressReporter;

impl ProgressReporter for NoopProgressReporter {
    fn start(&self, _info: &ProgressInfo) {}
    fn update(&self, _info: &ProgressInfo) {}
    fn finish(&self, _info: &ProgressInfo) {}
}
