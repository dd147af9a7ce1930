//! Post-run hooks, the plugin boundary.

use crate::mirror::types::RunReport;
use async_trait::async_trait;

/// Called once after a run in which at least one file was downloaded.
/// Failures are logged by the engine and otherwise ignored.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PostRunHook: Send + Sync {
    fn name(&self) -> String;

    async fn after_run(&self, report: &RunReport) -> Result<(), String>;
}
