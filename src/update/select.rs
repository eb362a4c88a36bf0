use super::{Error, ReleaseContext, WorkloadFilter, WorkloadUpdate};
use std::collections::BTreeMap;
use tagsync_api::result::reason;
use tagsync_api::{ReleaseResult, ResourceId, WorkloadResult};
use tracing::debug;

/// Find the workloads passing all filters, recording every rejection in `result`.
///
/// Prefilters (and the context's namespace scope) are applied to all defined workloads. The
/// survivors are looked up in the cluster, and the ones running are checked against the
/// postfilters. Candidates come back ordered by ID, and without a result of their own.
pub async fn select_workloads<C: ReleaseContext>(
    ctx: &C,
    result: &mut ReleaseResult,
    prefilters: &[WorkloadFilter],
    postfilters: &[WorkloadFilter],
) -> Result<Vec<WorkloadUpdate>, Error> {
    let mut prefilters = prefilters.to_vec();
    prefilters.push(WorkloadFilter::Namespaces(ctx.scope().to_vec()));

    let mut pending = BTreeMap::<ResourceId, WorkloadUpdate>::new();
    for update in ctx.defined_workloads().await? {
        match update.filter(&prefilters) {
            Some(rejected) => {
                debug!(workload = %update.id, status = %rejected.status, "Rejected by prefilter");
                result.decide(update.id, rejected);
            }
            None => {
                pending.insert(update.id.clone(), update);
            }
        }
    }

    let ids: Vec<_> = pending.keys().cloned().collect();
    let mut candidates = vec![];
    for workload in ctx.running_workloads(&ids).await? {
        let mut update = pending
            .remove(&workload.id)
            .ok_or_else(|| Error::Undefined(workload.id.clone()))?;
        update.workload = Some(workload);

        match update.filter(postfilters) {
            Some(rejected) => {
                debug!(workload = %update.id, status = %rejected.status, "Rejected by postfilter");
                result.decide(update.id, rejected);
            }
            None => candidates.push(update),
        }
    }

    for id in pending.into_keys() {
        result.decide(id, WorkloadResult::skipped(reason::NOT_ACCESSIBLE_IN_CLUSTER));
    }

    candidates.sort_by(|l, r| l.id.cmp(&r.id));
    Ok(candidates)
}

/// Mark named workloads which did not make it into the candidate set, unless they are decided already.
pub(crate) fn mark_skipped<'a>(
    result: &mut ReleaseResult,
    named: impl IntoIterator<Item = &'a ResourceId>,
    candidates: &[WorkloadUpdate],
) {
    for id in named {
        if !candidates.iter().any(|u| &u.id == id) {
            result.decide(id.clone(), WorkloadResult::skipped(reason::NOT_IN_REPO));
        }
    }
}
