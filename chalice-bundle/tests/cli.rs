use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::write;
use tempfile::NamedTempFile;

#[test]
fn help_lists_package_command() {
    let mut cmd = Command::cargo_bin("chalice-bundle").expect("Binary exists");

    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("package"));
}

#[test]
fn package_requires_config_flag() {
    let mut cmd = Command::cargo_bin("chalice-bundle").expect("Binary exists");

    cmd.arg("package").assert().failure();
}

#[test]
fn package_fails_on_missing_config_file() {
    let mut cmd = Command::cargo_bin("chalice-bundle").expect("Binary exists");

    cmd.arg("package")
        .arg("--config")
        .arg("/definitely/not/here/run.yaml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn package_fails_on_invalid_yaml() {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    write(config.path(), b"source_dir: [unterminated\n").expect("Writing temp config failed");
    let mut cmd = Command::cargo_bin("chalice-bundle").expect("Binary exists");

    cmd.arg("package")
        .arg("--config")
        .arg(config.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config YAML"));
}

#[cfg(unix)]
mod with_fake_chalice {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use tempfile::{tempdir, TempDir};

    const FAKE_CHALICE: &str = r#"#!/bin/sh
mkdir -p "$4"
printf 'PK-cli' > "$4/deployment.zip"
cat > "$4/sam.json" <<'JSON'
{"Resources": {"APIHandler": {"Type": "AWS::Serverless::Function", "Properties": {"CodeUri": "./deployment.zip"}}}}
JSON
"#;

    const FAILING_CHALICE: &str = r#"#!/bin/sh
echo "Unable to import your app.py file" >&2
exit 2
"#;

    struct Project {
        scratch: TempDir,
        bin_dir: PathBuf,
        config: PathBuf,
    }

    fn project(chalice_script: &str) -> Project {
        let scratch = tempdir().unwrap();
        let root = scratch.path();
        let app_dir = root.join("chalice_app");
        fs::create_dir_all(app_dir.join(".chalice")).unwrap();
        fs::write(app_dir.join(".chalice/config.json"), r#"{"version": "2.0"}"#).unwrap();

        let bin_dir = root.join("bin");
        fs::create_dir_all(&bin_dir).unwrap();
        let tool = bin_dir.join("chalice");
        fs::write(&tool, chalice_script).unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

        let config = root.join("run.yaml");
        fs::write(
            &config,
            format!(
                "source_dir: {app}\nstage: prod\nstage_config:\n  api_gateway_stage: v1\npackage:\n  output_dir: {out}\nassets:\n  type: local\n  staging_dir: {assets}\n  bucket: chalice-assets\n",
                app = app_dir.display(),
                out = root.join("chalice.out").display(),
                assets = root.join("assets").display(),
            ),
        )
        .unwrap();

        Project {
            scratch,
            bin_dir,
            config,
        }
    }

    fn path_with(bin_dir: &Path) -> String {
        let inherited = std::env::var("PATH").unwrap_or_default();
        format!("{}:{}", bin_dir.display(), inherited)
    }

    #[test]
    #[serial]
    fn package_succeeds_and_prints_summary() {
        let project = project(FAKE_CHALICE);
        let mut cmd = Command::cargo_bin("chalice-bundle").expect("Binary exists");

        cmd.arg("package")
            .arg("--config")
            .arg(&project.config)
            .env("PATH", path_with(&project.bin_dir))
            .assert()
            .success()
            .stdout(
                predicate::str::contains("Packaging complete.")
                    .and(predicate::str::contains("s3://chalice-assets/"))
                    .and(predicate::str::contains("sam_with_assets.json")),
            );

        let config = fs::read_to_string(project.scratch.path().join("chalice_app/.chalice/config.json")).unwrap();
        assert!(config.contains("api_gateway_stage"));
        let staged = fs::read_dir(project.scratch.path().join("assets/chalice-assets")).unwrap().count();
        assert_eq!(staged, 1);
    }

    #[test]
    #[serial]
    fn package_reports_tool_failure() {
        let project = project(FAILING_CHALICE);
        let mut cmd = Command::cargo_bin("chalice-bundle").expect("Binary exists");

        cmd.arg("package")
            .arg("--config")
            .arg(&project.config)
            .env("PATH", path_with(&project.bin_dir))
            .assert()
            .failure()
            .stderr(
                predicate::str::contains("PackagingFailed")
                    .and(predicate::str::contains("Unable to import your app.py file")),
            );
    }
}
