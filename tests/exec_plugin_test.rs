use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use cnisync::chain::{cni_add, cni_del, PluginChain};
use cnisync::{ContainerSpec, Error, SyncConfig};

fn write_plugin(bin: &Path, name: &str, body: &str) -> Result<(), Box<dyn std::error::Error>> {
    let path = bin.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body))?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

// Scripts are written before any of them runs, and everything happens in one
// test so no concurrent fork holds a script open for writing.
#[test]
fn test_exec_plugins_follow_cni_process_contract() -> Result<(), Box<dyn std::error::Error>> {
    let root = tempfile::tempdir()?;
    let bin = root.path().join("bin");
    let trace = root.path().join("trace.log");
    fs::create_dir_all(&bin)?;

    // Records what it was given, then reports an address on ADD. PATH only holds
    // the plugin dirs, so the scripts stick to shell builtins.
    write_plugin(
        &bin,
        "recorder",
        &format!(
            r#"IFS= read -r conf
paths="$CNI_PATH|$PATH"
echo "$CNI_COMMAND|$CNI_CONTAINERID|$CNI_NETNS|$CNI_IFNAME|$CNI_ARGS|$paths|$conf" >> {trace}
if [ "$CNI_COMMAND" = "ADD" ]; then
  echo '{{"cniVersion":"0.4.0","ips":[{{"address":"10.42.0.7/16"}}]}}'
fi"#,
            trace = trace.display()
        ),
    )?;
    write_plugin(
        &bin,
        "refuser",
        r#"echo '{"cniVersion":"0.4.0","code":11,"msg":"try again later"}'
exit 1"#,
    )?;
    write_plugin(&bin, "crasher", "echo 'segfault-ish' >&2\nexit 2")?;

    let config = SyncConfig {
        cni_root: root.path().to_path_buf(),
        plugin_path: vec![root.path().join("missing-bin"), bin.clone()],
        ..Default::default()
    };
    let spec = ContainerSpec {
        container_id: "c0ffee".to_string(),
        pid: 4242,
        network_mode: "net1".to_string(),
        labels: HashMap::from([(
            "io.rancher.container.uuid".to_string(),
            "3f1b-uuid".to_string(),
        )]),
    };

    let net = root.path().join("net1.d");
    fs::create_dir_all(&net)?;
    fs::write(net.join("10-record.conf"), r#"{"type":"recorder","name":"net1"}"#)?;

    let result = cni_add(&spec, &config)?.expect("recorder reports an address");
    assert_eq!(result.ips.unwrap()[0].address, "10.42.0.7/16");
    cni_del(&spec, &config)?;

    // Both variables carry the whole search path, missing dirs included
    let search_path = format!("{}:{}", root.path().join("missing-bin").display(), bin.display());
    let args = "IgnoreUnknown=1;DOCKER=true;RancherContainerUUID=3f1b-uuid";
    let conf = r#"{"type":"recorder","name":"net1"}"#;
    let lines = fs::read_to_string(&trace)?;
    let lines: Vec<&str> = lines.lines().collect();
    assert_eq!(
        lines,
        vec![
            format!(
                "ADD|c0ffee|/proc/4242/ns/net|eth0|{}|{}|{}|{}",
                args, search_path, search_path, conf
            ),
            format!("DEL|c0ffee||eth0|{}|{}|{}|{}", args, search_path, search_path, conf),
        ]
    );

    // Structured plugin error
    fs::write(net.join("20-refuse.conf"), r#"{"type":"refuser"}"#)?;
    let err = PluginChain::for_container(&spec, &config)?.add().unwrap_err();
    match err {
        Error::Plugin { plugin, error } => {
            assert_eq!(plugin, "refuser");
            assert_eq!(error.code, 11);
            assert_eq!(error.msg, "try again later");
        }
        other => panic!("unexpected error: {}", other),
    }

    // Unstructured failure falls back to stderr
    fs::remove_file(net.join("20-refuse.conf"))?;
    fs::write(net.join("30-crash.conf"), r#"{"type":"crasher"}"#)?;
    let err = PluginChain::for_container(&spec, &config)?.del().unwrap_err();
    assert!(err.to_string().contains("segfault-ish"), "{}", err);

    // Unknown binary
    fs::remove_file(net.join("30-crash.conf"))?;
    fs::write(net.join("40-ghost.conf"), r#"{"type":"ghost"}"#)?;
    let err = PluginChain::for_container(&spec, &config)?.add().unwrap_err();
    assert!(matches!(err, Error::PluginNotFound(ref name) if name == "ghost"));

    Ok(())
}
