use async_trait::async_trait;
use log::info;

use crate::jobs::dispatcher::{DispatchOutcome, JobDispatcher, JobPreparer};
use crate::jobs::JobTemplate;

/// Prepares jobs exactly as the real dispatcher would, but only logs them.
pub struct DryRunDispatcher {
    preparer: JobPreparer,
}

impl DryRunDispatcher {
    pub fn new(preparer: JobPreparer) -> Self {
        Self { preparer }
    }
}

#[async_trait]
impl JobDispatcher for DryRunDispatcher {
    async fn dispatch(&self, template: JobTemplate) -> DispatchOutcome {
        let job = self.preparer.prepare(template);
        info!(
            "[dry run] Would create job {} in namespace {}: {}",
            job.name(),
            job.namespace(),
            job.body()
        );
        DispatchOutcome::Created {
            name: job.name().to_owned(),
            namespace: job.namespace().to_owned(),
        }
    }
}
