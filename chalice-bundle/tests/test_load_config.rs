use std::env;
use std::fs::write;
use std::path::PathBuf;
use std::time::Duration;

use chalice_bundle::load_config::{load_config, AssetsConfig, ASSET_STORE_API_KEY_VAR};
use chalice_bundle_core::build::{
    default_container_image, default_init_commands, BuildStrategy, REGION_ENV_VAR,
};
use chalice_bundle_core::stage_config::StagesPolicy;
use serde_json::json;
use serial_test::serial;
use tempfile::NamedTempFile;

fn config_file(yaml: &str) -> NamedTempFile {
    let file = NamedTempFile::new().expect("Creating temp config file failed");
    write(file.path(), yaml).expect("Writing temp config failed");
    file
}

#[test]
#[serial]
fn loads_full_local_config() {
    let file = config_file(
        r#"
source_dir: ./chalice_app
stage: prod
stage_config:
  api_gateway_stage: v1
  lambda_memory_size: 256
stages_policy: require_existing
package:
  use_container: false
  env:
    AWS_DEFAULT_REGION: eu-west-1
    LOG_LEVEL: debug
  timeout_secs: 600
  output_dir: /tmp/chalice.out
assets:
  type: local
  staging_dir: ./cdk.out/assets
  bucket: chalice-assets
overrides:
  role: arn:aws:iam::123456789012:role/chalice
  environment_variables:
    TABLE_NAME: users
"#,
    );

    let config = load_config(file.path()).expect("config should load");

    assert_eq!(config.request.source_dir, PathBuf::from("./chalice_app"));
    assert_eq!(config.request.stage.as_str(), "prod");
    assert_eq!(
        config.request.stage_config,
        json!({ "api_gateway_stage": "v1", "lambda_memory_size": 256 })
    );
    assert_eq!(config.request.stages_policy, StagesPolicy::RequireExisting);
    assert_eq!(
        config.request.overrides.role.as_deref(),
        Some("arn:aws:iam::123456789012:role/chalice")
    );
    assert_eq!(
        config.request.overrides.environment_variables.as_ref().unwrap()["TABLE_NAME"],
        "users"
    );

    assert_eq!(config.package.strategy, BuildStrategy::LocalProcess);
    assert_eq!(config.package.env[REGION_ENV_VAR], "eu-west-1");
    assert_eq!(config.package.env["LOG_LEVEL"], "debug");
    assert_eq!(config.package.timeout, Some(Duration::from_secs(600)));
    assert_eq!(config.package.output_root, PathBuf::from("/tmp/chalice.out"));

    assert_eq!(
        config.assets,
        AssetsConfig::Local {
            staging_dir: PathBuf::from("./cdk.out/assets"),
            bucket: "chalice-assets".to_string(),
        }
    );
}

#[test]
#[serial]
fn minimal_config_uses_defaults() {
    let file = config_file(
        "source_dir: app\nstage: dev\nassets:\n  type: local\n  staging_dir: assets\n  bucket: b\n",
    );

    let config = load_config(file.path()).expect("config should load");

    assert_eq!(config.request.stage_config, json!({}));
    assert_eq!(config.request.stages_policy, StagesPolicy::AutoCreate);
    assert_eq!(config.package.strategy, BuildStrategy::LocalProcess);
    assert_eq!(config.package.env[REGION_ENV_VAR], "us-east-1");
    assert_eq!(config.package.output_root, PathBuf::from("chalice.out"));
    assert_eq!(config.package.timeout, None);
    assert!(config.package.inherit_env);
    assert!(config.request.overrides.role.is_none());
}

#[test]
#[serial]
fn container_with_explicit_image() {
    let file = config_file(
        "source_dir: app\nstage: dev\npackage:\n  use_container: true\n  image: cdk-chalice:latest\nassets:\n  type: local\n  staging_dir: assets\n  bucket: b\n",
    );

    let config = load_config(file.path()).unwrap();

    assert_eq!(
        config.package.strategy,
        BuildStrategy::Container {
            image: "cdk-chalice:latest".to_string(),
            init_commands: default_init_commands(),
        }
    );
}

#[test]
#[serial]
fn container_init_commands_replace_the_default_install() {
    let file = config_file(
        "source_dir: app\nstage: dev\npackage:\n  use_container: true\n  image: python:3.12\n  init_commands:\n    - pip install awscli --upgrade\n    - pip install chalice\nassets:\n  type: local\n  staging_dir: assets\n  bucket: b\n",
    );

    let config = load_config(file.path()).unwrap();

    assert_eq!(
        config.package.strategy,
        BuildStrategy::Container {
            image: "python:3.12".to_string(),
            init_commands: vec![
                "pip install awscli --upgrade".to_string(),
                "pip install chalice".to_string(),
            ],
        }
    );
}

#[test]
#[serial]
fn inherit_env_can_be_disabled() {
    let file = config_file(
        "source_dir: app\nstage: dev\npackage:\n  inherit_env: false\nassets:\n  type: local\n  staging_dir: assets\n  bucket: b\n",
    );

    let config = load_config(file.path()).unwrap();

    assert!(!config.package.inherit_env);
}

#[test]
#[serial]
fn container_without_image_uses_default_build_image() {
    let file = config_file(
        "source_dir: app\nstage: dev\npackage:\n  use_container: true\nassets:\n  type: local\n  staging_dir: assets\n  bucket: b\n",
    );

    let config = load_config(file.path()).unwrap();

    match config.package.strategy {
        BuildStrategy::Container {
            image,
            init_commands,
        } => {
            assert!(image.starts_with(&default_container_image("")));
            assert_eq!(init_commands, default_init_commands());
        }
        other => panic!("expected container strategy, got {other:?}"),
    }
}

#[test]
#[serial]
fn http_store_reads_api_key_from_env() {
    env::set_var(ASSET_STORE_API_KEY_VAR, "secret-token");
    let file = config_file(
        "source_dir: app\nstage: dev\nassets:\n  type: http\n  endpoint: http://localhost:9000\n  bucket: assets\n",
    );

    let config = load_config(file.path()).unwrap();
    env::remove_var(ASSET_STORE_API_KEY_VAR);

    assert_eq!(
        config.assets,
        AssetsConfig::Http {
            endpoint: "http://localhost:9000".to_string(),
            bucket: "assets".to_string(),
            api_key: Some("secret-token".to_string()),
        }
    );
}

#[test]
#[serial]
fn http_store_without_api_key() {
    env::remove_var(ASSET_STORE_API_KEY_VAR);
    let file = config_file(
        "source_dir: app\nstage: dev\nassets:\n  type: http\n  endpoint: http://localhost:9000\n  bucket: assets\n",
    );

    let config = load_config(file.path()).unwrap();

    assert!(matches!(config.assets, AssetsConfig::Http { api_key: None, .. }));
}

#[test]
#[serial]
fn rejects_invalid_stage_name() {
    let file = config_file(
        "source_dir: app\nstage: \"prod; rm -rf /\"\nassets:\n  type: local\n  staging_dir: assets\n  bucket: b\n",
    );

    let err = load_config(file.path()).unwrap_err();

    assert!(format!("{err:#}").contains("stage"));
}

#[test]
#[serial]
fn rejects_missing_assets_section() {
    let file = config_file("source_dir: app\nstage: dev\n");

    let err = load_config(file.path()).unwrap_err();

    assert!(err.to_string().contains("Failed to parse config YAML"));
}

#[test]
#[serial]
fn missing_file_is_reported() {
    let err = load_config("/definitely/not/here/run.yaml").unwrap_err();

    assert!(err.to_string().contains("Failed to read config file"));
}
