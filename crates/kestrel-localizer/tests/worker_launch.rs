//! End to end: package a worker, build its deployment, then localize it the
//! way its init container would.

mod common;

use std::time::Duration;

use common::{memory_factory, put, zip_of};
use kestrel_launcher::config::CommandConfig;
use kestrel_launcher::deployment::HEAP_MAX_ENV;
use kestrel_launcher::k8s::ObjectMeta;
use kestrel_launcher::{
    DeploymentBuilder, EnvironmentMap, LocalFile, Packager, PodInfo, ProgramSpecification,
    ResourceSpec, ResourceTuning, RunId, RunnableSpec, RuntimeArguments,
};
use kestrel_localizer::bundle::manifest_path;
use kestrel_localizer::{localize_bundle, LocalizeError};

#[tokio::test]
async fn worker_is_packaged_deployed_and_localized() {
    let factory = memory_factory();
    put(
        &factory,
        "memory:///shared/config.json",
        br#"{"threads":4}"#.to_vec(),
    )
    .await;

    // Archive from a different scheme is copied into the run
    let sources = tempfile::tempdir().unwrap();
    let libs = sources.path().join("libs.zip");
    std::fs::write(
        &libs,
        zip_of(&[("lib/core.jar", "core"), ("lib/util.jar", "util")], &["lib/"]),
    )
    .unwrap();

    let spec = ProgramSpecification::single(
        "demo",
        RunnableSpec::new("worker", ResourceSpec::new(3, 1024))
            .with_local_file(LocalFile::new("config.json", "memory:///shared/config.json"))
            .with_local_file(
                LocalFile::new("libs.zip", format!("file://{}", libs.display())).archive(),
            ),
    );
    let run_id = RunId::new("run-1");
    let app = factory.create("memory:///apps/demo/run-1").unwrap();

    let bundle = Packager::new(&factory, &app)
        .package_and_upload(&spec, &RuntimeArguments::default(), &run_id)
        .await
        .unwrap();

    let pod_info = PodInfo::new("master-0", "kestrel", "kestrel/runtime:1.0");
    let commands = CommandConfig::default();
    let tuning = ResourceTuning::new(200, 0.7);
    let deployment = DeploymentBuilder::new(&pod_info, &commands, &tuning)
        .build(
            ObjectMeta::default(),
            &spec,
            &bundle,
            &run_id,
            &EnvironmentMap::new(),
            Duration::from_secs(60),
        )
        .unwrap();

    let pod = deployment.pod_spec();
    let main = &pod.containers[0];
    assert_eq!(main.resources.requests["cpu"].as_str(), "3000m");
    assert_eq!(main.resources.requests["memory"].as_str(), "1024Mi");
    assert_eq!(main.env_value(HEAP_MAX_ENV), Some("-Xmx824m"));
    assert_eq!(pod.init_containers[0].resources, main.resources);

    // The init container's bundle and runnable arguments
    let init_args = &pod.init_containers[0].args;
    let runnable = init_args.last().unwrap();
    let bundle_uri = &init_args[init_args.len() - 2];
    assert_eq!(bundle_uri, bundle.as_str());

    let work = tempfile::tempdir().unwrap();
    let summary = localize_bundle(&factory, bundle_uri, runnable, work.path())
        .await
        .unwrap();

    assert!(manifest_path(work.path(), "worker").is_file());
    assert!(work.path().join("runtime-config/launchSpec.json").is_file());
    assert!(work.path().join("runtime-config/arguments.json").is_file());

    assert_eq!(summary.copied, [work.path().join("config.json")]);
    assert_eq!(
        std::fs::read_to_string(work.path().join("config.json")).unwrap(),
        r#"{"threads":4}"#
    );
    assert_eq!(
        std::fs::read_to_string(work.path().join("libs.zip/lib/core.jar")).unwrap(),
        "core"
    );
    assert!(work.path().join("libs.zip/lib/util.jar").is_file());
}

#[tokio::test]
async fn unknown_runnable_is_rejected() {
    let factory = memory_factory();
    let spec = ProgramSpecification::single(
        "demo",
        RunnableSpec::new("worker", ResourceSpec::new(1, 512)),
    );
    let app = factory.create("memory:///apps/demo/run-2").unwrap();
    let bundle = Packager::new(&factory, &app)
        .package_and_upload(&spec, &RuntimeArguments::default(), &RunId::new("run-2"))
        .await
        .unwrap();

    let work = tempfile::tempdir().unwrap();
    let err = localize_bundle(&factory, bundle.as_str(), "reducer", work.path())
        .await
        .unwrap_err();
    assert!(matches!(err, LocalizeError::UnknownRunnable { ref name } if name == "reducer"));
}
