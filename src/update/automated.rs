use super::select::{mark_skipped, select_workloads};
use super::{Error, Release, ReleaseContext, WorkloadFilter, WorkloadUpdate};
use std::collections::BTreeSet;
use tagsync_api::result::reason;
use tagsync_api::{
    Automated, ContainerUpdate, Policy, ReleaseKind, ReleaseResult, WorkloadResult,
    WorkloadStatus,
};
use tracing::{debug, info, info_span, Instrument};

impl Release for Automated {
    async fn calculate_release<C: ReleaseContext>(
        &self,
        ctx: &C,
    ) -> Result<(Vec<WorkloadUpdate>, ReleaseResult), Error> {
        let span = info_span!("release", kind = "automated", changes = self.changes.len());

        async move {
            let mut result = ReleaseResult::new();

            let ids = self.workload_ids();
            let pre = [WorkloadFilter::Include(ids.clone())];
            let post = [WorkloadFilter::Locked(
                ctx.workloads_with_policy(&Policy::Locked).await?,
            )];

            let candidates = select_workloads(ctx, &mut result, &pre, &post).await?;
            mark_skipped(&mut result, &ids, &candidates);

            let updates = calculate_updates(self, candidates, &mut result)?;
            info!(
                updates = updates.len(),
                workloads = result.len(),
                "Calculated automated release"
            );

            Ok((updates, result))
        }
        .instrument(span)
        .await
    }

    fn release_kind(&self) -> ReleaseKind {
        ReleaseKind::Execute
    }

    fn commit_message(&self, result: &ReleaseResult) -> String {
        let images: BTreeSet<_> = result
            .iter()
            .filter(|(_, r)| r.status == WorkloadStatus::Success)
            .flat_map(|(_, r)| r.per_container.iter().map(|c| c.target.to_string()))
            .collect();

        let mut message = String::new();
        match images.len() {
            0 => message.push_str("Auto-release (no images)\n"),
            1 => message.push_str("Auto-release "),
            n => message.push_str(&format!("Auto-release multiple ({n}) images\n\n")),
        }

        let prefix = if images.len() > 1 { " - " } else { "" };
        for image in images {
            message.push_str(&format!("{prefix}{image}\n"));
        }

        message
    }
}

fn calculate_updates(
    spec: &Automated,
    candidates: Vec<WorkloadUpdate>,
    result: &mut ReleaseResult,
) -> Result<Vec<WorkloadUpdate>, Error> {
    let by_workload = spec.workload_map();
    let mut updates = vec![];

    for mut u in candidates {
        if let Some(excuse) = u.workload.as_ref().and_then(|w| w.excuse.clone()) {
            result.decide(u.id, WorkloadResult::failed(excuse));
            continue;
        }

        let changes = by_workload.get(&u.id).cloned().unwrap_or_default();
        let mut container_updates = vec![];
        let mut up_to_date = false;

        for container in u.containers().to_vec() {
            for change in changes.iter().filter(|c| c.container == container.name) {
                // keep the form the manifest uses, if it is the same repository
                let target = match change.image.tag() {
                    Some(tag)
                        if change.image.canonical_name() == container.image.canonical_name() =>
                    {
                        container.image.with_tag(tag)
                    }
                    _ => change.image.clone(),
                };

                if target.same_canonical_ref(&container.image) {
                    up_to_date = true;
                    continue;
                }

                u.definition
                    .update_container_image(&container.name, &target)?;
                container_updates.push(ContainerUpdate {
                    container: container.name.clone(),
                    current: container.image.clone(),
                    target,
                });
            }
        }

        if !container_updates.is_empty() {
            debug!(workload = %u.id, changes = container_updates.len(), "Updating");
            result.decide(
                u.id.clone(),
                WorkloadResult::success(container_updates.clone()),
            );
            u.updates = container_updates;
            updates.push(u);
        } else if up_to_date {
            result.decide(u.id, WorkloadResult::skipped(reason::IMAGE_UP_TO_DATE));
        } else {
            result.decide(u.id, WorkloadResult::ignored(reason::DOES_NOT_USE_IMAGE));
        }
    }

    Ok(updates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::fixture::{definition, manifest, workload, MemoryContext};
    use tagsync_api::{ContainerUpdate, ResourceId};

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    fn change(automated: &mut Automated, workload: &str, container: &str, image: &str) {
        automated.add(id(workload), container, image.parse().unwrap());
    }

    #[tokio::test]
    async fn one_of_two_containers() {
        let containers = [("web", "repo/a:v1"), ("sidecar", "repo/b:v1")];
        let ctx = MemoryContext::default()
            .define(definition("default:deployment/web", &containers))
            .run(workload("default:deployment/web", &containers));

        let mut automated = Automated::default();
        change(&mut automated, "default:deployment/web", "web", "repo/a:v2");

        let (updates, result) = automated.calculate_release(&ctx).await.unwrap();

        let expected = vec![ContainerUpdate {
            container: "web".into(),
            current: "repo/a:v1".parse().unwrap(),
            target: "repo/a:v2".parse().unwrap(),
        }];
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].updates, expected);
        assert_eq!(
            result.get(&id("default:deployment/web")),
            Some(&WorkloadResult::success(expected))
        );

        let manifest = String::from_utf8_lossy(updates[0].definition.bytes()).to_string();
        assert!(manifest.contains("image: repo/a:v2"));
        assert!(manifest.contains("image: repo/b:v1"));
    }

    #[tokio::test]
    async fn keeps_original_form() {
        let containers = [("web", "nginx:1.24")];
        let ctx = MemoryContext::default()
            .define(definition("default:deployment/web", &containers))
            .run(workload("default:deployment/web", &containers));

        let mut automated = Automated::default();
        change(
            &mut automated,
            "default:deployment/web",
            "web",
            "index.docker.io/library/nginx:1.25",
        );

        let (updates, _) = automated.calculate_release(&ctx).await.unwrap();
        assert_eq!(updates[0].updates[0].target.to_string(), "nginx:1.25");
    }

    #[tokio::test]
    async fn locked_unused_and_up_to_date() {
        let web = [("web", "repo/a:v2")];
        let frozen = [("web", "repo/a:v1")];
        let other = [("db", "postgres:15")];

        let ctx = MemoryContext::default()
            .define(definition("default:deployment/web", &web))
            .run(workload("default:deployment/web", &web))
            .define(manifest(
                "default:deployment/frozen",
                &frozen,
                &[("tagsync.io/locked", "true")],
            ))
            .run(workload("default:deployment/frozen", &frozen))
            .define(definition("default:deployment/db", &other))
            .run(workload("default:deployment/db", &other));

        let mut automated = Automated::default();
        change(&mut automated, "default:deployment/web", "web", "repo/a:v2");
        change(&mut automated, "default:deployment/frozen", "web", "repo/a:v2");
        change(&mut automated, "default:deployment/db", "web", "repo/a:v2");
        change(&mut automated, "default:deployment/ghost", "web", "repo/a:v2");

        let (updates, result) = automated.calculate_release(&ctx).await.unwrap();

        assert!(updates.is_empty());
        assert_eq!(
            result.get(&id("default:deployment/web")),
            Some(&WorkloadResult::skipped(reason::IMAGE_UP_TO_DATE))
        );
        assert_eq!(
            result.get(&id("default:deployment/frozen")),
            Some(&WorkloadResult::skipped(reason::LOCKED))
        );
        assert_eq!(
            result.get(&id("default:deployment/db")),
            Some(&WorkloadResult::ignored(reason::DOES_NOT_USE_IMAGE))
        );
        assert_eq!(
            result.get(&id("default:deployment/ghost")),
            Some(&WorkloadResult::skipped(reason::NOT_IN_REPO))
        );
    }

    #[tokio::test]
    async fn not_named_is_not_included() {
        let web = [("web", "repo/a:v1")];
        let ctx = MemoryContext::default()
            .define(definition("default:deployment/web", &web))
            .run(workload("default:deployment/web", &web))
            .define(definition("default:deployment/other", &web))
            .run(workload("default:deployment/other", &web));

        let mut automated = Automated::default();
        change(&mut automated, "default:deployment/web", "web", "repo/a:v2");

        let (updates, result) = automated.calculate_release(&ctx).await.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(
            result.get(&id("default:deployment/other")),
            Some(&WorkloadResult::ignored(reason::NOT_INCLUDED))
        );
    }

    #[test]
    fn commit_message() {
        let automated = Automated::default();
        let update = |target: &str| {
            WorkloadResult::success(vec![ContainerUpdate {
                container: "c".into(),
                current: "repo/a:v1".parse().unwrap(),
                target: target.parse().unwrap(),
            }])
        };

        assert_eq!(
            automated.commit_message(&ReleaseResult::new()),
            "Auto-release (no images)\n"
        );

        let one: ReleaseResult = [
            (id("a:deployment/x"), update("repo/a:v2")),
            (id("a:deployment/y"), update("repo/a:v2")),
        ]
        .into_iter()
        .collect();
        assert_eq!(automated.commit_message(&one), "Auto-release repo/a:v2\n");

        let two: ReleaseResult = [
            (id("a:deployment/x"), update("repo/b:v2")),
            (id("a:deployment/y"), update("repo/a:v2")),
            (id("a:deployment/z"), WorkloadResult::skipped(reason::LOCKED)),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            automated.commit_message(&two),
            "Auto-release multiple (2) images\n\n - repo/a:v2\n - repo/b:v2\n"
        );
    }

    #[test]
    fn always_executes() {
        assert_eq!(Automated::default().release_kind(), ReleaseKind::Execute);
    }
}
