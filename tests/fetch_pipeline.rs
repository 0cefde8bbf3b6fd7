// tests/fetch_pipeline.rs

//! Integration tests for resolve -> fetch -> install with a local registry.

mod common;

use arm::{
    ContentFetcher, Error, FetchingInstaller, Install, InstallOrchestrator, InstallRequest,
    LocalRegistry, Manifest, RegistryConfig, RegistrySet, RegistryType,
};
use common::{TestEnv, dir_entries, write_local_version};
use std::fs;
use std::sync::Arc;

/// Env with a local registry named `local` holding two rulesets
fn setup() -> (TestEnv, FetchingInstaller) {
    let env = TestEnv::new()
        .with_registry_config(
            "local",
            RegistryConfig {
                url: "file:///registry".to_string(),
                kind: RegistryType::Local,
                ..Default::default()
            },
        )
        .with_channel("cursor", &[".cursor/rules"])
        .with_channel("copilot", &[".github/copilot"]);

    let registry_root = env.path("registry");
    write_local_version(&registry_root, "py-rules", "1.0.0", &["rules/python.md"]);
    write_local_version(
        &registry_root,
        "py-rules",
        "1.2.0",
        &["rules/python.md", "rules/typing.md", "README.md"],
    );
    write_local_version(&registry_root, "py-rules", "2.0.0", &["rules/python.md"]);
    write_local_version(&registry_root, "go-rules", "0.3.0", &["go.md"]);

    let registries = RegistrySet::new().with(Arc::new(LocalRegistry::new("local", &registry_root)));
    let installer = FetchingInstaller::new(env.installer(), registries)
        .with_fetcher(ContentFetcher::with_scratch_dir(env.path("scratch")));
    (env, installer)
}

#[tokio::test]
async fn test_resolves_fetches_and_installs() {
    let (env, installer) = setup();

    let request = InstallRequest::new("local", "py-rules", "^1.0.0")
        .with_patterns(["rules/*.md"])
        .with_channels(["cursor"]);
    let result = installer.install(request).await.unwrap();

    assert_eq!(result.version, "1.2.0");
    assert_eq!(result.files_count, 2);
    let version_dir = env.path(".cursor/rules/arm/local/py-rules/1.2.0");
    assert_eq!(dir_entries(&version_dir.join("rules")), vec!["python.md", "typing.md"]);
    assert!(!version_dir.join("README.md").exists());
    assert!(!env.path(".github/copilot/arm").exists());

    let entry = env.lock_store().get("local", "py-rules").unwrap();
    assert_eq!(entry.version, "1.2.0");
    assert_eq!(entry.kind, RegistryType::Local);
    assert_eq!(entry.patterns, None);

    // Scratch directories are gone once the install returns
    assert_eq!(fs::read_dir(env.path("scratch")).unwrap().count(), 0);
}

#[tokio::test]
async fn test_fetch_failures_leave_nothing_behind() {
    let (env, installer) = setup();

    let missing_version = InstallRequest::new("local", "py-rules", "^9.0.0");
    assert!(matches!(
        installer.install(missing_version).await,
        Err(Error::NotFound(_))
    ));

    let no_matching_files = InstallRequest::new("local", "go-rules", "0.3.0").with_patterns(["*.txt"]);
    assert!(matches!(
        installer.install(no_matching_files).await,
        Err(Error::NotFound(_))
    ));

    let unknown_channel = InstallRequest::new("local", "go-rules", "0.3.0").with_channels(["nope"]);
    assert!(matches!(
        installer.install(unknown_channel).await,
        Err(Error::NotFound(_))
    ));

    if env.path("scratch").exists() {
        assert_eq!(fs::read_dir(env.path("scratch")).unwrap().count(), 0);
    }
    assert!(!env.path(".cursor/rules/arm").exists());
    assert!(env.lock_store().load().is_empty());
}

#[tokio::test]
async fn test_manifest_batch_through_orchestrator() {
    let (env, installer) = setup();

    let manifest = Manifest::from_json_str(
        r#"{
            "rulesets": {
                "local": {
                    "py-rules": {"version": "latest"},
                    "go-rules": {"version": "0.3.0", "channels": ["copilot"]}
                }
            }
        }"#,
    )
    .unwrap();
    let requests = manifest.install_requests(&env.lock_store().load());

    let orchestrator = InstallOrchestrator::new(Arc::new(installer), Arc::new(env.config.clone()));
    let result = orchestrator
        .install_multiple(requests.into(), None)
        .await
        .unwrap();

    assert_eq!(result.successful.len(), 2, "{:?}", result.failed);
    assert!(env.path(".cursor/rules/arm/local/py-rules/2.0.0/rules/python.md").is_file());
    assert!(env.path(".github/copilot/arm/local/py-rules/2.0.0/rules/python.md").is_file());
    assert!(env.path(".github/copilot/arm/local/go-rules/0.3.0/go.md").is_file());
    assert!(!env.path(".cursor/rules/arm/local/go-rules").exists());

    let lock = env.lock_store().load();
    assert_eq!(lock.get("local", "py-rules").unwrap().version, "2.0.0");
    assert_eq!(lock.get("local", "go-rules").unwrap().version, "0.3.0");
}

#[tokio::test]
async fn test_prefetched_files_skip_the_registry() {
    let (env, installer) = setup();
    let (root, files) = env.write_sources("download", "local", &["custom.md"]);

    // Not in the registry at all; the given files are installed as-is
    let request = InstallRequest::new("local", "custom", "0.0.1")
        .with_source_root(root)
        .with_source_files(files)
        .with_channels(["cursor"]);
    installer.install(request).await.unwrap();

    assert!(env.path(".cursor/rules/arm/local/custom/0.0.1/custom.md").is_file());
}
