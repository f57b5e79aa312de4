//! Batch dispatch for one decision turn.

use futures::future::join_all;

use super::ToolRegistry;
use crate::types::{ToolCallRequest, ToolExecutionResult};

/// Dispatches every call of one turn.
///
/// Calls addressing different targets run concurrently; calls sharing a
/// target run one after another in request order. Results come back in
/// request order regardless.
pub async fn dispatch_batch(
    registry: &ToolRegistry,
    calls: &[ToolCallRequest],
) -> Vec<ToolExecutionResult> {
    let mut groups: Vec<(Option<String>, Vec<usize>)> = Vec::new();
    for (index, call) in calls.iter().enumerate() {
        let target = registry.target_for(call);
        match groups.iter_mut().find(|(t, _)| *t == target) {
            Some((_, indices)) => indices.push(index),
            None => groups.push((target, vec![index])),
        }
    }

    tracing::debug!(calls = calls.len(), groups = groups.len(), "Dispatching tool batch");

    let lanes = groups.into_iter().map(|(_, indices)| async move {
        let mut results = Vec::with_capacity(indices.len());
        for index in indices {
            results.push((index, registry.dispatch(&calls[index]).await));
        }
        results
    });

    let mut ordered: Vec<(usize, ToolExecutionResult)> =
        join_all(lanes).await.into_iter().flatten().collect();
    ordered.sort_by_key(|(index, _)| *index);
    ordered.into_iter().map(|(_, result)| result).collect()
}
