use std::sync::Arc;

use anyhow::{Result, bail};
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::rip_directory;
use crate::core::handler::{DiscHandler, OutcomeSender, RipRequest, RipperFactory, TaskHandler};
use crate::core::progress::RipProgress;

/// Pretends to rip a disc, reporting progress at a fixed pace. Nothing is
/// written to disk.
pub struct SimulatedRipper {
    pub steps: u8,
    pub step_delay: Duration,
    /// When set, the rip fails with this reason after the last step.
    pub fail_with: Option<String>,
}

impl Default for SimulatedRipper {
    fn default() -> Self {
        Self {
            steps: 10,
            step_delay: Duration::from_millis(500),
            fail_with: None,
        }
    }
}

impl RipperFactory for SimulatedRipper {
    fn name(&self) -> &str {
        "simulated"
    }

    fn create(
        &self,
        request: RipRequest,
        outcomes: OutcomeSender,
    ) -> Result<Arc<dyn DiscHandler>> {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let steps = self.steps.max(1);
        let step_delay = self.step_delay;
        let fail_with = self.fail_with.clone();

        let job = async move {
            info!(device = %request.device, kind = %request.kind, "(Simulated) Ripping disc");

            for step in 1..=steps {
                tokio::select! {
                    _ = token.cancelled() => bail!("rip cancelled"),
                    _ = sleep(step_delay) => {}
                }

                request
                    .progress
                    .report(RipProgress {
                        kind: request.kind,
                        stage: "simulated".to_string(),
                        percentage: (u32::from(step) * 100 / u32::from(steps)) as u8,
                    })
                    .await;
            }

            if let Some(reason) = fail_with {
                bail!(reason);
            }
            Ok(rip_directory(&request.outdir, &request.device))
        };

        Ok(Arc::new(TaskHandler::new(Box::pin(job), cancel, outcomes)))
    }
}
