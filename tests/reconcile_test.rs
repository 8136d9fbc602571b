use serde_json::json;
use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};

use cnisync::{ConfigReconciler, Error, Network, SyncConfig};

fn reconciler(root: &Path) -> ConfigReconciler {
    ConfigReconciler::new(&SyncConfig {
        cni_root: root.to_path_buf(),
        ..Default::default()
    })
}

fn network(name: &str, default: bool, cni_config: serde_json::Value) -> Network {
    serde_json::from_value(json!({
        "uuid": format!("uuid-{}", name),
        "name": name,
        "environment_uuid": "e1",
        "default": default,
        "metadata": {"cniConfig": cni_config},
    }))
    .expect("valid network")
}

#[test]
fn test_default_network_scenario() -> Result<(), Box<dyn std::error::Error>> {
    let root = tempfile::tempdir()?;
    let net1 = network("net1", true, json!({"10-bridge.conf": {"type": "bridge"}}));

    reconciler(root.path()).apply(&net1)?;

    let dir = root.path().join("net1.d");
    let file = dir.join("10-bridge.conf");
    assert_eq!(fs::read_to_string(&file)?, "{\n  \"type\": \"bridge\"\n}");
    assert_eq!(fs::metadata(&file)?.permissions().mode() & 0o777, 0o600);
    assert_eq!(fs::metadata(&dir)?.permissions().mode() & 0o777, 0o700);
    assert_eq!(
        fs::read_link(root.path().join("managed.d"))?,
        PathBuf::from("net1.d")
    );
    Ok(())
}

#[test]
fn test_nested_config_is_pretty_printed() -> Result<(), Box<dyn std::error::Error>> {
    let root = tempfile::tempdir()?;
    let net = network(
        "overlay",
        false,
        json!({"20-vxlan.conf": {
            "type": "vxlan",
            "ipam": {"type": "host-local", "ranges": [[{"subnet": "10.42.0.0/16"}]]},
        }}),
    );

    reconciler(root.path()).apply(&net)?;

    let written = fs::read_to_string(root.path().join("overlay.d/20-vxlan.conf"))?;
    assert!(written.contains("\n  \"ipam\": {\n    \"ranges\": ["));
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&written)?,
        net.metadata["cniConfig"]["20-vxlan.conf"]
    );
    assert!(!root.path().join("managed.d").exists());
    Ok(())
}

#[test]
fn test_managed_link_kept_when_it_already_resolves() -> Result<(), Box<dyn std::error::Error>> {
    let root = tempfile::tempdir()?;
    let net1 = network("net1", true, json!({"10-bridge.conf": {"type": "bridge"}}));
    fs::create_dir_all(root.path().join("net1.d"))?;

    // Same directory, different link text
    let absolute = root.path().join("net1.d");
    symlink(&absolute, root.path().join("managed.d"))?;

    reconciler(root.path()).apply(&net1)?;

    assert_eq!(fs::read_link(root.path().join("managed.d"))?, absolute);
    Ok(())
}

#[test]
fn test_managed_link_replaced_when_stale_or_dangling() -> Result<(), Box<dyn std::error::Error>> {
    let root = tempfile::tempdir()?;
    let managed = root.path().join("managed.d");
    let net2 = network("net2", true, json!({"10-bridge.conf": {"type": "bridge"}}));

    fs::create_dir_all(root.path().join("net1.d"))?;
    symlink("net1.d", &managed)?;
    reconciler(root.path()).apply(&net2)?;
    assert_eq!(fs::read_link(&managed)?, PathBuf::from("net2.d"));

    fs::remove_file(&managed)?;
    symlink("vanished.d", &managed)?;
    reconciler(root.path()).apply(&net2)?;
    assert_eq!(fs::read_link(&managed)?, PathBuf::from("net2.d"));

    // An empty real directory in the way is removed too
    fs::remove_file(&managed)?;
    fs::create_dir(&managed)?;
    reconciler(root.path()).apply(&net2)?;
    assert_eq!(fs::read_link(&managed)?, PathBuf::from("net2.d"));
    Ok(())
}

#[test]
fn test_failing_file_does_not_stop_the_others() -> Result<(), Box<dyn std::error::Error>> {
    let root = tempfile::tempdir()?;
    let dir = root.path().join("net1.d");
    // A directory where a config file should go makes that one write fail
    fs::create_dir_all(dir.join("10-bridge.conf"))?;

    let net1 = network(
        "net1",
        true,
        json!({
            "10-bridge.conf": {"type": "bridge"},
            "20-portmap.conf": {"type": "portmap"},
        }),
    );

    let err = reconciler(root.path()).apply(&net1).unwrap_err();

    match &err {
        Error::Apply { network, failures } => {
            assert_eq!(network, "net1");
            assert_eq!(failures.len(), 1);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(matches!(err.last(), Error::Io { path, .. } if path.ends_with("10-bridge.conf")));
    assert!(dir.join("20-portmap.conf").is_file());
    assert_eq!(
        fs::read_link(root.path().join("managed.d"))?,
        PathBuf::from("net1.d")
    );
    Ok(())
}

#[test]
fn test_escaping_file_name_is_a_failure() -> Result<(), Box<dyn std::error::Error>> {
    let root = tempfile::tempdir()?;
    let net = network(
        "net1",
        false,
        json!({"../outside.conf": {"type": "bridge"}, "10-ok.conf": {"type": "bridge"}}),
    );

    let err = reconciler(root.path()).apply(&net).unwrap_err();

    assert!(matches!(err.last(), Error::InvalidFileName(name) if name == "../outside.conf"));
    assert!(!root.path().join("outside.conf").exists());
    assert!(root.path().join("net1.d/10-ok.conf").is_file());
    Ok(())
}

#[test]
fn test_unusable_network_dir_stops_the_apply() -> Result<(), Box<dyn std::error::Error>> {
    let root = tempfile::tempdir()?;
    fs::write(root.path().join("net1.d"), "not a directory")?;
    let net1 = network("net1", true, json!({"10-bridge.conf": {"type": "bridge"}}));

    let err = reconciler(root.path()).apply(&net1).unwrap_err();

    assert!(matches!(err, Error::Io { ref path, .. } if path.ends_with("net1.d")));
    assert!(fs::symlink_metadata(root.path().join("managed.d")).is_err());
    Ok(())
}

#[test]
fn test_escaping_network_name_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let base = tempfile::tempdir()?;
    let root = base.path().join("cni");
    fs::create_dir(&root)?;

    for name in ["../escaped", "a/b", ".", ".."] {
        let net = network(name, true, json!({"10-bridge.conf": {"type": "bridge"}}));
        let err = reconciler(&root).apply(&net).unwrap_err();
        assert!(matches!(err.last(), Error::InvalidNetworkName(n) if n == name), "{}", err);
    }

    assert!(!base.path().join("escaped.d").exists());
    assert!(fs::symlink_metadata(root.join("managed.d")).is_err());
    assert_eq!(fs::read_dir(&root)?.count(), 0);
    Ok(())
}
