//! Settings application through the [`CaseConfigurator`].

use crate::configurator::CaseConfigurator;
use crate::engine::{StageContext, StageOutcome, StageStep};
use async_trait::async_trait;
use std::sync::Arc;

/// Writes the run's settings into the solve directory's dictionaries.
pub struct ApplySettings {
    configurator: Arc<dyn CaseConfigurator>,
}

impl ApplySettings {
    pub fn new(configurator: Arc<dyn CaseConfigurator>) -> Self {
        Self { configurator }
    }
}

#[async_trait]
impl StageStep for ApplySettings {
    async fn run(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        let configurator = Arc::clone(&self.configurator);
        let case_dir = ctx.solve_dir();
        let settings = Arc::clone(&ctx.settings);

        // Dictionary edits are blocking file I/O.
        let result =
            tokio::task::spawn_blocking(move || configurator.apply(&case_dir, &settings)).await?;

        match result {
            Ok(changes) => {
                for change in &changes {
                    ctx.log(format!("[settings] {change}")).await;
                }
                Ok(StageOutcome::success(format!(
                    "Applied {} setting(s)",
                    changes.len()
                )))
            }
            Err(e) => Ok(StageOutcome::failure(e.to_string())),
        }
    }
}
