//! Identifier resolution through the registry and the scheduler

use golden_repos::GoldenRepoError;

use crate::common::TestEnv;

#[test]
fn test_bare_name_resolves_to_canonical_alias() {
    let env = TestEnv::new();
    env.add_remote("repo");
    let scheduler = env.scheduler(None);

    assert_eq!(scheduler.resolve_global_alias("repo").unwrap(), "repo-global");
    assert_eq!(
        scheduler.resolve_global_alias("repo-global").unwrap(),
        "repo-global"
    );
}

#[test]
fn test_bare_and_canonical_forms_resolve_identically() {
    let env = TestEnv::new();
    env.add_remote("repo");
    env.add_local("svc", Some("local://svc"));

    for name in ["repo", "svc"] {
        let bare = env.context.registry.resolve_global_repo(name).unwrap();
        let canonical = env
            .context
            .registry
            .resolve_global_repo(&format!("{}-global", name))
            .unwrap();
        assert_eq!(bare, canonical);
    }
}

#[test]
fn test_unknown_identifier_names_it_in_the_error() {
    let env = TestEnv::new();
    env.add_remote("repo");
    let scheduler = env.scheduler(None);

    let err = scheduler.resolve_global_alias("missing").unwrap_err();
    assert!(matches!(err, GoldenRepoError::NotFound { .. }));
    assert!(err.to_string().contains("missing"));

    // A canonical identifier is never suffixed a second time
    let err = scheduler.resolve_global_alias("missing-global").unwrap_err();
    assert!(err.to_string().contains("missing-global"));
    assert!(!err.to_string().contains("missing-global-global"));
}

#[test]
fn test_explicit_alias_registration_resolves_as_is() {
    let env = TestEnv::new();
    let master = env.master_path("tools");
    std::fs::create_dir_all(&master).unwrap();
    env.context
        .registry
        .register_global_repo("tools", "shared-tools", None, &master, false)
        .unwrap();

    assert_eq!(
        env.context.registry.resolve_global_alias("shared-tools").unwrap(),
        "shared-tools"
    );
    assert!(env.context.registry.resolve_global_alias("tools").is_err());
}
