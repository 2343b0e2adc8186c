//! End-to-end compilation tests.
//!
//! These compile whole configs against a static resolver, so no registry is
//! contacted.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test --test compile
//! ```

use async_trait::async_trait;
use blubber_core::build::graph::{Definition, FileAction, Op, Owner};
use blubber_core::build::{
    Image, ImageMetaResolver, Options, Platform, ResolvedImage, StaticResolver,
};
use blubber_core::{read_yaml_config, BlubberError, Compiler, Config, Policy, Result};
use std::sync::Arc;
use std::time::Duration;

fn platform() -> Platform {
    Platform::new("linux", "amd64")
}

fn options() -> Options {
    Options { build_platform: platform(), target_platform: platform(), ..Options::default() }
}

fn compiler() -> Compiler {
    let mut base = Image::new(&platform());
    base.config.cmd = Some(vec!["bash".into()]);

    let resolver = StaticResolver::new().with_image("foo/bar", "sha256:f00", base);
    Compiler::new(Arc::new(resolver))
}

fn config(yaml: &str) -> Config {
    read_yaml_config(yaml.as_bytes()).unwrap()
}

fn definition(graph: &[u8]) -> serde_json::Value {
    serde_json::from_slice(graph).unwrap()
}

fn sources(definition: &Definition) -> Vec<String> {
    definition
        .ops
        .iter()
        .filter_map(|entry| match &entry.op {
            Op::Source { identifier, .. } => Some(identifier.clone()),
            _ => None,
        })
        .collect()
}

/// A single variant on a base compiles to one source, the user setup and
/// labels naming the variant.
#[tokio::test]
async fn test_single_stage() {
    let config = config("version: v4\nbase: foo/bar\nvariants:\n  development: {}");

    let target = compiler().compile(&config, "development", &options()).await.unwrap();
    let definition = target.state().marshal();

    assert_eq!(sources(&definition), vec!["docker-image://docker.io/foo/bar:latest@sha256:f00"]);

    let labels = target.image().config.labels.clone().unwrap();
    assert_eq!(labels["blubber.variant"], "development");
    assert_eq!(labels["blubber.version"], blubber_core::VERSION);

    let image = &target.image().config;
    assert_eq!(image.user, "900:900");
    assert_eq!(image.working_dir, "/srv/app");
    assert_eq!(image.cmd, Some(vec!["bash".to_string()]));
}

/// `copies: [build]` copies the application and library directories out of
/// the final state of `build`.
#[tokio::test]
async fn test_multi_stage_copies() {
    let config = config(
        r#"
version: v4
base: foo/bar
variants:
  build:
    builder:
      command: [make]
  production:
    copies: [build]
"#,
    );

    let mut expanded = config.clone();
    assert_eq!(
        expanded.expand_includes_and_copies("production").unwrap(),
        vec!["build", "production"]
    );

    let compiler = compiler();
    let build = compiler.compile(&config, "build", &options()).await.unwrap();
    let production = compiler.compile(&config, "production", &options()).await.unwrap();

    let build_head = build.state().marshal().head.unwrap();
    let definition = production.state().marshal();

    let copies: Vec<FileAction> = definition
        .ops
        .iter()
        .filter(|entry| entry.inputs.contains(&build_head))
        .flat_map(|entry| match &entry.op {
            Op::File { actions } => actions.clone(),
            _ => Vec::new(),
        })
        .collect();

    let owner = Some(Owner { uid: 65533, gid: 65533 });
    assert_eq!(
        copies,
        vec![
            FileAction::copy(1, "/srv/app", "/srv/app", owner),
            FileAction::copy(1, "/opt/lib", "/opt/lib", owner),
        ]
    );
}

#[tokio::test]
async fn test_entrypoint_and_run_entrypoint() {
    let config = config(
        r#"
version: v4
base: foo/bar
runs: { environment: { APP_ENV: test } }
variants:
  test:
    entrypoint: [./run-tests.sh]
"#,
    );

    let options = Options {
        run_entrypoint: true,
        entrypoint_args: vec!["--unit".into()],
        ..options()
    };

    let target = compiler().compile(&config, "test", &options).await.unwrap();

    assert_eq!(target.image().config.entrypoint, Some(vec!["./run-tests.sh".to_string()]));
    assert_eq!(target.image().config.cmd, None);

    let definition = target.state().marshal();
    let Some(Op::Exec { args, env, ignore_cache, user, .. }) = definition.head_op() else {
        panic!("expected the entrypoint run last");
    };

    assert_eq!(args, &vec!["./run-tests.sh".to_string(), "--unit".to_string()]);
    assert!(env.contains(&"APP_ENV=test".to_string()));
    assert_eq!(user, "900:900");
    assert!(ignore_cache);
}

#[tokio::test]
async fn test_scratch_variant() {
    let config = config(
        r#"
version: v4
variants:
  build:
    base: foo/bar
  release:
    copies: [build]
    entrypoint: [/srv/app/server]
"#,
    );

    let target = compiler().compile(&config, "release", &options()).await.unwrap();
    let definition = target.state().marshal();

    assert_eq!(target.image().config.user, "");
    assert_eq!(target.image().config.entrypoint, Some(vec!["/srv/app/server".to_string()]));

    let owner = Some(Owner { uid: 65533, gid: 65533 });
    let copies: Vec<&FileAction> = definition
        .ops
        .iter()
        .filter_map(|entry| match &entry.op {
            Op::File { actions } => actions.first(),
            _ => None,
        })
        .collect();

    // the first copy lands on an empty filesystem, so its source is input 0
    assert_eq!(
        copies,
        vec![
            &FileAction::copy(0, "/srv/app", "/srv/app", owner),
            &FileAction::copy(1, "/opt/lib", "/opt/lib", owner),
        ]
    );
}

#[tokio::test]
async fn test_build_args_override_users() {
    let config = config("version: v4\nbase: foo/bar\nvariants:\n  build: {}");
    let options = options().with_build_arg("LIVES_UID", "1000");

    let target = compiler().compile(&config, "build", &options).await.unwrap();

    assert_eq!(target.state().get_env("LIVES_UID"), Some("1000"));
    assert_eq!(target.state().get_env("RUNS_AS"), Some("runuser"));
}

#[tokio::test]
async fn test_output_is_deterministic() {
    let config = config(
        r#"
version: v4
base: foo/bar
apt: { packages: [git, curl] }
variants:
  build:
    builders:
      - node: { requirements: [package.json] }
      - custom: { command: [make] }
  production:
    copies: [build]
    entrypoint: [node, server.js]
"#,
    );

    let options = options();
    let first = compiler().compile(&config, "production", &options).await.unwrap();
    let second = compiler().compile(&config, "production", &options).await.unwrap();
    let (first, second) = (first.marshal().unwrap(), second.marshal().unwrap());

    assert_eq!(first, second);

    let graph = definition(&first.0);
    let ops = graph["ops"].as_array().unwrap();
    assert_eq!(graph["head"], ops.last().unwrap()["digest"]);

    let image = definition(&first.1);
    assert_eq!(image["config"]["Entrypoint"], serde_json::json!(["node", "server.js"]));
    assert_eq!(image["rootfs"]["type"], "layers");
}

#[tokio::test]
async fn test_policy_violation() {
    let config = blubber_core::parse_yaml_config(
        b"version: v4\nbase: foo/bar\nvariants:\n  production:\n    runs: { as: root }\n",
    )
    .unwrap();

    let policy = Policy::from_yaml(
        br#"enforcements:
  - { path: variants.production.runs.as, rule: "ne=root" }
"#,
    )
    .unwrap();

    let err = policy.validate(&config).unwrap_err();
    assert_eq!(err.exit_code(), 6);
    assert_eq!(
        err.to_string(),
        r#"value for "variants.production.runs.as" violates policy rule "ne=root""#
    );
}

/// Settings a variant inherits from the root are enforced like its own.
#[tokio::test]
async fn test_policy_enforces_inherited_values() {
    let config = blubber_core::parse_yaml_config(
        b"version: v4\nbase: foo/bar\nruns: { insecurely: true }\nvariants:\n  production: {}\n",
    )
    .unwrap();

    let insecure = Policy::from_yaml(
        b"enforcements:\n  - { path: variants.production.runs.insecurely, rule: isfalse }\n",
    )
    .unwrap();
    let err = insecure.enforce(&config, "production").unwrap_err();
    assert_eq!(err.exit_code(), 6);

    let base = Policy::from_yaml(
        b"enforcements:\n  - { path: variants.production.base, rule: 'oneof=foo/bar' }\n",
    )
    .unwrap();
    base.enforce(&config, "production").unwrap();

    let target = compiler().compile(&config, "production", &options()).await.unwrap();
    assert_eq!(target.name(), "production");
}

#[tokio::test]
async fn test_two_letter_variant() {
    let config = config("version: v4\nbase: foo/bar\nvariants:\n  qa: {}");

    let target = compiler().compile(&config, "qa", &options()).await.unwrap();
    let labels = target.image().config.labels.as_ref().unwrap();
    assert_eq!(labels["blubber.variant"], "qa");
}

#[tokio::test]
async fn test_include_cycle() {
    let config: Config =
        serde_yaml::from_str("version: v4\nvariants:\n  a: {includes: [b]}\n  b: {includes: [a]}")
            .unwrap();

    let err = compiler().compile(&config, "a", &options()).await.unwrap_err();

    assert!(matches!(err, BlubberError::ExpansionLoop { .. }), "{:?}", err);
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test]
async fn test_unknown_variant() {
    let config = config("version: v4\nbase: foo/bar\nvariants:\n  build: {}");

    let err = compiler().compile(&config, "nope", &options()).await.unwrap_err();
    assert!(matches!(err, BlubberError::UnknownVariant { .. }), "{:?}", err);
}

#[tokio::test]
async fn test_unresolvable_base() {
    let config = config("version: v4\nbase: foo/missing\nvariants:\n  build: {}");

    let err = compiler().compile(&config, "build", &options()).await.unwrap_err();
    assert!(matches!(
        err,
        BlubberError::Compile { ref variant, ref source }
            if variant == "build" && matches!(**source, BlubberError::BaseImageResolution { .. })
    ));
}

/// Fails for one image and never answers for any other.
struct HangingResolver;

#[async_trait]
impl ImageMetaResolver for HangingResolver {
    async fn resolve_image_config(&self, reference: &str, _: &Platform) -> Result<ResolvedImage> {
        if reference.contains("broken") {
            return Err(BlubberError::BaseImageResolution {
                image: reference.into(),
                reason: "manifest unknown".into(),
            });
        }

        std::future::pending().await
    }
}

/// One failed base image lookup cancels the lookups still in flight.
#[tokio::test]
async fn test_failed_resolution_cancels_peers() {
    let config = config(
        r#"
version: v4
variants:
  deps:
    base: foo/slow
  build:
    base: foo/broken
  production:
    base: foo/bar
    copies: [deps, build]
"#,
    );

    let compiler = Compiler::new(Arc::new(HangingResolver));
    let opts = options();
    let compile = compiler.compile(&config, "production", &opts);
    let err = tokio::time::timeout(Duration::from_secs(5), compile)
        .await
        .expect("compilation should not hang")
        .unwrap_err();

    assert!(err.to_string().contains("foo/broken"), "{}", err);
}
