use crate::objects::{self, WorkloadObject};
use crate::update::Workload;
use futures::{Stream, StreamExt, TryStreamExt};
use kube::runtime::watcher;
use kube::{Api, Client};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use tagsync_api::ResourceId;
use tracing::debug;

/// A change of the live workloads, of one kind.
#[derive(Clone, Debug)]
pub enum Event {
    Applied(Workload),
    Deleted(ResourceId),
    /// All workloads of a kind, replacing what was known.
    Restarted(String, Vec<Workload>),
}

/// The workloads currently running in the cluster.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    workloads: BTreeMap<ResourceId, Workload>,
}

impl Inner {
    /// add or replace a workload
    fn apply(&mut self, workload: Workload) {
        self.workloads.insert(workload.id.clone(), workload);
    }

    fn delete(&mut self, id: &ResourceId) {
        self.workloads.remove(id);
    }

    /// full reset of one kind
    fn reset(&mut self, kind: &str, workloads: Vec<Workload>) {
        self.workloads.retain(|id, _| id.kind() != kind);
        for workload in workloads {
            self.apply(workload);
        }
    }
}

impl Store {
    pub fn new<S>(stream: S) -> (Self, impl Future<Output = anyhow::Result<()>>)
    where
        S: Stream<Item = Result<Event, watcher::Error>>,
    {
        let inner = Arc::new(RwLock::new(Inner::default()));
        let runner = {
            let inner = inner.clone();
            async move { run(inner, stream).await }
        };

        (Self { inner }, runner)
    }

    /// Those of the requested workloads which are running.
    pub fn get(&self, ids: &[ResourceId]) -> Vec<Workload> {
        let inner = self.inner.read();
        ids.iter()
            .filter_map(|id| inner.workloads.get(id).cloned())
            .collect()
    }

    /// All workloads, ordered by ID.
    pub fn all(&self) -> Vec<Workload> {
        self.inner.read().workloads.values().cloned().collect()
    }
}

async fn run<S>(inner: Arc<RwLock<Inner>>, stream: S) -> anyhow::Result<()>
where
    S: Stream<Item = Result<Event, watcher::Error>>,
{
    let mut stream = pin!(stream);

    while let Some(evt) = stream.try_next().await? {
        match evt {
            Event::Applied(workload) => {
                debug!(workload = %workload.id, "Applied");
                inner.write().apply(workload);
            }
            Event::Deleted(id) => {
                debug!(workload = %id, "Deleted");
                inner.write().delete(&id);
            }
            Event::Restarted(kind, workloads) => {
                debug!(%kind, workloads = workloads.len(), "Restarted");
                inner.write().reset(&kind, workloads);
            }
        }
    }

    Ok(())
}

/// Watch all objects of one workload type, in all namespaces.
pub fn watch<K>(client: Client) -> impl Stream<Item = Result<Event, watcher::Error>> + Send
where
    K: WorkloadObject + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let api: Api<K> = Api::all(client);

    watcher(api, watcher::Config::default()).try_filter_map(|evt| async move {
        Ok::<_, watcher::Error>(match evt {
            watcher::Event::Applied(object) => objects::to_workload(&object).map(Event::Applied),
            watcher::Event::Deleted(object) => objects::resource_id(&object).map(Event::Deleted),
            watcher::Event::Restarted(list) => Some(Event::Restarted(
                objects::kind::<K>(),
                list.iter().filter_map(objects::to_workload).collect(),
            )),
        })
    })
}

/// Watch all supported workload types.
pub fn watch_all(client: Client) -> impl Stream<Item = Result<Event, watcher::Error>> {
    use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
    use k8s_openapi::api::batch::v1::CronJob;

    futures::stream::select_all([
        watch::<Deployment>(client.clone()).boxed(),
        watch::<DaemonSet>(client.clone()).boxed(),
        watch::<StatefulSet>(client.clone()).boxed(),
        watch::<CronJob>(client).boxed(),
    ])
}
