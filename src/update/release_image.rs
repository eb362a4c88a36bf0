use super::select::{mark_skipped, select_workloads};
use super::{Error, ImageRepos, Pattern, Release, ReleaseContext, WorkloadFilter, WorkloadUpdate};
use tagsync_api::result::reason;
use tagsync_api::{
    ContainerUpdate, ImageSpec, Policy, ReleaseImageSpec, ReleaseKind, ReleaseResult,
    WorkloadResult,
};
use tracing::{debug, info, info_span, Instrument};

/// Why a workload did not change, in increasing order of precedence.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
enum Outcome {
    Unknown,
    Ignored,
    Skipped,
}

impl Outcome {
    fn result(self) -> WorkloadResult {
        match self {
            Self::Unknown => WorkloadResult::unknown(reason::IMAGE_NOT_FOUND),
            Self::Ignored => WorkloadResult::ignored(reason::DOES_NOT_USE_IMAGE),
            Self::Skipped => WorkloadResult::skipped(reason::IMAGE_UP_TO_DATE),
        }
    }
}

impl Release for ReleaseImageSpec {
    async fn calculate_release<C: ReleaseContext>(
        &self,
        ctx: &C,
    ) -> Result<(Vec<WorkloadUpdate>, ReleaseResult), Error> {
        let span = info_span!("release", kind = %self.kind, image = %self.image_spec);

        async move {
            let mut result = ReleaseResult::new();

            let (pre, post) = filters(self, ctx).await?;
            let candidates = select_workloads(ctx, &mut result, &pre, &post).await?;
            mark_skipped(&mut result, self.named_ids(), &candidates);

            let repos = match &self.image_spec {
                ImageSpec::NoUpdates => {
                    for u in candidates {
                        result.decide(u.id, WorkloadResult::skipped(reason::NO_UPDATES_REQUESTED));
                    }
                    return Ok((vec![], result));
                }
                ImageSpec::Latest => ImageRepos::fetch_updatable(ctx.registry(), &candidates).await?,
                ImageSpec::Ref(image) => ImageRepos::exact(ctx.registry(), image).await?,
            };

            let updates = calculate_updates(self, candidates, &repos, &mut result)?;
            info!(
                updates = updates.len(),
                workloads = result.len(),
                "Calculated release"
            );

            Ok((updates, result))
        }
        .instrument(span)
        .await
    }

    fn release_kind(&self) -> ReleaseKind {
        self.kind
    }

    fn commit_message(&self, _result: &ReleaseResult) -> String {
        let image = self.image_spec.to_string();
        let workloads: Vec<_> = self
            .workload_specs
            .iter()
            .map(|s| s.to_string().trim_matches(['<', '>']).to_string())
            .collect();

        format!(
            "Release {} to {}",
            image.trim_matches(['<', '>']),
            workloads.join(", ")
        )
    }
}

async fn filters<C: ReleaseContext>(
    spec: &ReleaseImageSpec,
    ctx: &C,
) -> Result<(Vec<WorkloadFilter>, Vec<WorkloadFilter>), Error> {
    let mut pre = vec![];
    if !spec.targets_all() {
        pre.push(WorkloadFilter::Include(spec.named_ids().cloned().collect()));
    }
    pre.push(WorkloadFilter::Exclude(
        spec.excludes.iter().cloned().collect(),
    ));

    let mut post = vec![];
    if let ImageSpec::Ref(image) = &spec.image_spec {
        post.push(WorkloadFilter::SpecificImage(image.clone()));
    }
    // forcing only overrides policies of explicitly named workloads
    if spec.targets_all() || !spec.force {
        post.push(WorkloadFilter::Locked(
            ctx.workloads_with_policy(&Policy::Locked).await?,
        ));
        post.push(WorkloadFilter::Ignore(
            ctx.workloads_with_policy(&Policy::Ignore).await?,
        ));
    }

    Ok((pre, post))
}

fn pattern(spec: &ReleaseImageSpec, u: &WorkloadUpdate, container: &str) -> Option<Pattern> {
    if spec.force && spec.image_spec != ImageSpec::Latest {
        Some(Pattern::All)
    } else {
        u.tag_pattern(container)
    }
}

fn calculate_updates(
    spec: &ReleaseImageSpec,
    candidates: Vec<WorkloadUpdate>,
    repos: &ImageRepos,
    result: &mut ReleaseResult,
) -> Result<Vec<WorkloadUpdate>, Error> {
    let requested = match &spec.image_spec {
        ImageSpec::Ref(image) => Some(image.canonical_name()),
        _ => None,
    };

    let mut updates = vec![];

    for mut u in candidates {
        if let Some(excuse) = u.workload.as_ref().and_then(|w| w.excuse.clone()) {
            debug!(workload = %u.id, %excuse, "Unable to read containers");
            result.decide(u.id, WorkloadResult::failed(excuse));
            continue;
        }

        let mut changes = vec![];
        let mut outcome = None;

        for container in u.containers().to_vec() {
            let name = container.image.canonical_name();
            let latest = pattern(spec, &u, &container.name)
                .and_then(|pattern| repos.latest(&name, &pattern));

            let Some((latest, tag)) = latest.and_then(|i| i.id.tag().map(|t| (i, t))) else {
                let missing = if requested.as_ref() == Some(&name) {
                    Outcome::Unknown
                } else {
                    Outcome::Ignored
                };
                outcome = outcome.max(Some(missing));
                continue;
            };

            if latest.id.same_canonical_ref(&container.image) {
                outcome = outcome.max(Some(Outcome::Skipped));
                continue;
            }

            let target = container.image.with_tag(tag);
            u.definition
                .update_container_image(&container.name, &target)?;
            changes.push(ContainerUpdate {
                container: container.name,
                current: container.image,
                target,
            });
        }

        if changes.is_empty() {
            let outcome = outcome.unwrap_or(Outcome::Ignored);
            debug!(workload = %u.id, ?outcome, "No changes");
            result.decide(u.id, outcome.result());
        } else {
            debug!(workload = %u.id, changes = changes.len(), "Updating");
            result.decide(u.id.clone(), WorkloadResult::success(changes.clone()));
            u.updates = changes;
            updates.push(u);
        }
    }

    Ok(updates)
}
