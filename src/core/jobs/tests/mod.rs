
use std::sync::Arc;

use crate::core::jobs::JobQueue;
use crate::core::subagents::SubagentRegistry;

pub(crate) fn queue_with(max_concurrent: usize) -> (JobQueue, Arc<SubagentRegistry>) {
    let subagents = Arc::new(SubagentRegistry::new(None));
    let queue = JobQueue::new(max_concurrent, 2, 30_000, subagents.clone(), None);
    (queue, subagents)
}
