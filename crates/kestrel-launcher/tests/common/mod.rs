//! Shared setup for launcher integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use kestrel_launcher::config::CommandConfig;
use kestrel_launcher::k8s::ObjectMeta;
use kestrel_launcher::{
    ClusterClient, LaunchContext, LaunchPreparer, LocationFactory, MemoryCluster, PodInfo,
    PollingWatcher, ProgramSpecification, ResourceTuning, RunId,
};
use object_store::memory::InMemory;

pub const NAMESPACE: &str = "kestrel";

/// A launch context wired to an in-memory cluster and store.
pub struct TestLauncher {
    pub cluster: Arc<MemoryCluster>,
    pub factory: LocationFactory,
    pub context: Arc<LaunchContext>,
}

fn context(factory: &LocationFactory, cluster: Arc<dyn ClusterClient>) -> Arc<LaunchContext> {
    Arc::new(LaunchContext {
        factory: factory.clone(),
        cluster: cluster.clone(),
        watcher: Arc::new(PollingWatcher::new(cluster, Duration::from_millis(20))),
        pod_info: PodInfo::new("master-0", NAMESPACE, "kestrel/runtime:1.0"),
        commands: CommandConfig::default(),
        tuning: ResourceTuning::new(200, 0.7),
        namespace: NAMESPACE.to_owned(),
        app_root: factory.create("memory:///apps").unwrap(),
    })
}

pub fn preparer_in(
    context: &Arc<LaunchContext>,
    spec: ProgramSpecification,
    run_id: &str,
) -> LaunchPreparer {
    LaunchPreparer::new(
        Arc::clone(context),
        spec,
        RunId::new(run_id),
        ObjectMeta::default(),
    )
    .unwrap()
}

impl TestLauncher {
    pub fn new() -> Self {
        let factory = LocationFactory::new().with_store("memory", "", Arc::new(InMemory::new()));
        let cluster = Arc::new(MemoryCluster::default());
        let context = context(&factory, cluster.clone());

        Self {
            cluster,
            factory,
            context,
        }
    }

    pub fn preparer(&self, spec: ProgramSpecification, run_id: &str) -> LaunchPreparer {
        preparer_in(&self.context, spec, run_id)
    }

    /// A context on the same store that submits to `cluster` instead.
    pub fn context_with(&self, cluster: Arc<dyn ClusterClient>) -> Arc<LaunchContext> {
        context(&self.factory, cluster)
    }

    /// Store `data` at `uri` in the in-memory store.
    pub async fn seed(&self, uri: &str, data: &'static [u8]) {
        self.factory
            .create(uri)
            .unwrap()
            .put(Bytes::from_static(data))
            .await
            .unwrap();
    }
}
