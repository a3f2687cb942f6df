//! Every workspace member inherits its package metadata from the root
//! manifest, so all published crates share one version.

use std::path::{Path, PathBuf};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .unwrap()
        .to_path_buf()
}

fn manifest(dir: &Path) -> toml::Value {
    let text = std::fs::read_to_string(dir.join("Cargo.toml")).unwrap();
    text.parse().unwrap()
}

fn inherits(package: &toml::Value, key: &str) -> bool {
    package
        .get(key)
        .and_then(|v| v.get("workspace"))
        .and_then(toml::Value::as_bool)
        == Some(true)
}

#[test]
fn members_inherit_version_and_edition() {
    let root = workspace_root();
    let doc = manifest(&root);
    let members = doc["workspace"]["members"].as_array().unwrap();
    assert!(!members.is_empty());

    for member in members {
        let member = member.as_str().unwrap();
        let package = manifest(&root.join(member))["package"].clone();
        assert!(inherits(&package, "version"), "{member} pins its own version");
        assert!(inherits(&package, "edition"), "{member} pins its own edition");
    }
}

#[test]
fn library_version_matches_workspace() {
    let doc = manifest(&workspace_root());
    let version = doc["workspace"]["package"]["version"].as_str().unwrap();
    assert_eq!(mlpilot_core::VERSION, version);
}

#[test]
fn cli_dependencies_are_all_used() {
    let cli = workspace_root().join("crates").join("mlpilot-cli");
    let source = std::fs::read_to_string(cli.join("src").join("main.rs")).unwrap();
    let doc = manifest(&cli);
    let deps = doc["dependencies"].as_table().unwrap();

    for name in deps.keys() {
        let path = format!("{}::", name.replace('-', "_"));
        assert!(source.contains(&path), "mlpilot-cli declares unused dependency {name}");
    }
}
