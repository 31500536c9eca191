//! Run-scoped logging handle.
//!
//! RULE: Components never call the `log` macros with a bare message.
//! They log through the `RunLog` they were built with, so every record
//! carries the run id and the component that produced it.

use crate::types::RunId;

pub const LOG_TARGET: &str = "dwh";

#[derive(Debug, Clone)]
pub struct RunLog {
    run_id:    RunId,
    component: &'static str,
}

impl RunLog {
    pub fn new(run_id: RunId) -> Self {
        Self { run_id, component: "pipeline" }
    }

    /// A fresh run id (UUID v4) for a new pipeline run.
    pub fn fresh() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    /// Same run, different component label.
    pub fn child(&self, component: &'static str) -> Self {
        Self { run_id: self.run_id.clone(), component }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn debug(&self, msg: impl AsRef<str>) {
        log::debug!(target: LOG_TARGET, "[{} {}] {}", self.run_id, self.component, msg.as_ref());
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        log::info!(target: LOG_TARGET, "[{} {}] {}", self.run_id, self.component, msg.as_ref());
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        log::warn!(target: LOG_TARGET, "[{} {}] {}", self.run_id, self.component, msg.as_ref());
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        log::error!(target: LOG_TARGET, "[{} {}] {}", self.run_id, self.component, msg.as_ref());
    }
}
