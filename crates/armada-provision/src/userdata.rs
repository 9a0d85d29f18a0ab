//! First-boot user data
//!
//! Renders the cloud-init document delivered to a new machine. The document
//! writes the registry login script and the worker configuration, formats
//! and mounts the data volume, and installs the worker agent container as a
//! unit that powers the machine off on failure when the instance is mortal.
//!
//! The worker configuration is itself a YAML document; embedding it inside
//! the outer document's `content: |` block requires re-indenting every line
//! by the block's indentation, or the outer document stops parsing.

use armada_core::{ProvisionError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;

/// Indentation of `content: |` blocks in the rendered document
const CONTENT_INDENT: &str = "      ";

/// Variables substituted into the first-boot document
#[derive(Debug, Clone)]
pub struct UserDataArgs {
    /// Container registry login command, embedded verbatim as a script
    pub login_command: String,

    /// Serialized worker configuration (a YAML document)
    pub worker_config: String,

    /// Worker agent container image
    pub worker_image: String,

    /// SSH public key body; empty installs no key
    pub ssh_key: String,

    /// Block device the data volume appears as, without the /dev prefix
    pub device_name: &'static str,

    /// Upper bound for the worker's startup jitter sleep
    pub count: u32,

    /// Power the machine off when the worker unit fails
    pub mortal: bool,
}

/// Data device name by storage attachment style
pub fn device_name(nvme: bool) -> &'static str {
    if nvme {
        "nvme1n1"
    } else {
        "xvdb"
    }
}

/// Serialize a worker configuration value to the YAML document embedded in
/// user data
pub fn to_yaml<T: Serialize>(value: &T) -> Result<String> {
    serde_yaml::to_string(value)
        .map_err(|e| ProvisionError::other(format!("serialize worker config: {e}")))
}

// Shift an embedded document onto the outer block's indentation.
fn reindent(doc: &str) -> String {
    doc.trim_end().replace('\n', &format!("\n{CONTENT_INDENT}"))
}

/// Render the cloud-init document
pub fn render(args: &UserDataArgs) -> String {
    let UserDataArgs {
        login_command,
        worker_image,
        ssh_key,
        device_name,
        count,
        mortal,
        ..
    } = args;
    let worker_config = reindent(&args.worker_config);
    let mortal = if *mortal {
        "\n      OnFailure=poweroff.target\n      OnFailureJobMode=replace-irreversibly"
    } else {
        ""
    };

    format!(
        r#"#cloud-config
write_files:
  - path: "/etc/registrylogin"
    permissions: "0644"
    owner: "root"
    content: |
      {login_command}

  - path: "/etc/armadaconfig"
    permissions: "0644"
    owner: "root"
    content: |
      {worker_config}

coreos:
  update:
    reboot-strategy: "off"

  units:
  - name: update-engine.service
    command: stop

  - name: locksmithd.service
    command: stop

  - name: format-{device_name}.service
    command: start
    content: |
      [Unit]
      Description=Format /dev/{device_name}
      After=dev-{device_name}.device
      Requires=dev-{device_name}.device
      [Service]
      Type=oneshot
      RemainAfterExit=yes
      ExecStart=/usr/sbin/wipefs -f /dev/{device_name}
      ExecStart=/usr/sbin/mkfs.ext4 -F /dev/{device_name}

  - name: mnt-data.mount
    command: start
    content: |
      [Mount]
      What=/dev/{device_name}
      Where=/mnt/data
      Type=ext4
      Options=data=writeback

  - name: armada-worker.service
    enable: true
    command: start
    content: |
      [Unit]
      Description=armada worker
      Requires=network.target
      After=network.target{mortal}

      [Service]
      Type=oneshot
      ExecStartPre=-/usr/bin/docker stop %n
      ExecStartPre=-/usr/bin/docker rm %n
      ExecStartPre=-/bin/bash -c 'sleep $[( $RANDOM % {count} ) ]'
      ExecStartPre=/bin/bash /etc/registrylogin
      ExecStartPre=/usr/bin/docker pull {worker_image}
      ExecStart=/usr/bin/docker run --rm --name %n --net=host \
        -v /:/host \
        -v /var/run/docker.sock:/var/run/docker.sock \
        -v '/etc/ssl/certs/ca-certificates.crt:/etc/ssl/certs/ca-certificates.crt' \
        {worker_image} -prefix /host -config /host/etc/armadaconfig

      [Install]
      WantedBy=multi-user.target

  - name: "node-exporter.service"
    enable: true
    command: "start"
    content: |
      [Unit]
      Description=node-exporter
      Requires=network.target
      After=network.target
      After=mnt-data.mount
      [Service]
      Restart=always
      TimeoutStartSec=infinity
      RestartSec=10s
      StartLimitInterval=0
      ExecStartPre=-/usr/bin/docker stop %n
      ExecStartPre=-/usr/bin/docker rm %n
      ExecStartPre=/usr/bin/docker pull prom/node-exporter:0.12.0
      ExecStart=/usr/bin/docker run --rm --name %n -p 9100:9100 -v /proc:/host/proc -v /sys:/host/sys -v /:/rootfs --net=host prom/node-exporter:0.12.0 -collector.procfs /host/proc -collector.sysfs /host/proc

ssh-authorized-keys:
  - {ssh_key}
"#
    )
}

/// Render and base64-encode, ready for submission to the cloud API
pub fn render_base64(args: &UserDataArgs) -> String {
    BASE64.encode(render(args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn args() -> UserDataArgs {
        UserDataArgs {
            login_command: "docker login -u AWS -p token registry.example.com".to_string(),
            worker_config: "cluster: test\ncache:\n  path: /mnt/data\n".to_string(),
            worker_image: "armada/worker:v7".to_string(),
            ssh_key: "ssh-rsa AAAA test@host".to_string(),
            device_name: device_name(false),
            count: 1,
            mortal: true,
        }
    }

    #[test]
    fn test_device_name_by_attachment_style() {
        assert_eq!(device_name(false), "xvdb");
        assert_eq!(device_name(true), "nvme1n1");
    }

    #[test]
    fn test_rendered_document_is_valid_yaml() {
        let doc = render(&args());
        let value: serde_yaml::Value = serde_yaml::from_str(&doc).unwrap();
        assert!(value.get("write_files").is_some());
        assert!(value.get("coreos").is_some());
    }

    #[test]
    fn test_embedded_worker_config_round_trips() {
        let config = BTreeMap::from([
            ("cluster".to_string(), "prod".to_string()),
            ("scheduler".to_string(), "https://sched:9001".to_string()),
        ]);
        let mut a = args();
        a.worker_config = to_yaml(&config).unwrap();

        let doc = render(&a);
        let value: serde_yaml::Value = serde_yaml::from_str(&doc).unwrap();
        let embedded = value["write_files"][1]["content"].as_str().unwrap();
        let parsed: BTreeMap<String, String> = serde_yaml::from_str(embedded).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_mortal_flag_controls_poweroff() {
        let mut a = args();
        assert!(render(&a).contains("OnFailure=poweroff.target"));
        a.mortal = false;
        assert!(!render(&a).contains("OnFailure=poweroff.target"));
    }

    #[test]
    fn test_nvme_device_threads_through_units() {
        let mut a = args();
        a.device_name = device_name(true);
        let doc = render(&a);
        assert!(doc.contains("format-nvme1n1.service"));
        assert!(doc.contains("What=/dev/nvme1n1"));
        assert!(!doc.contains("xvdb"));
    }

    #[test]
    fn test_base64_encodes_rendered_document() {
        let a = args();
        let encoded = render_base64(&a);
        let decoded = BASE64.decode(encoded).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), render(&a));
    }

    #[test]
    fn test_login_command_embedded_verbatim() {
        let doc = render(&args());
        let value: serde_yaml::Value = serde_yaml::from_str(&doc).unwrap();
        let script = value["write_files"][0]["content"].as_str().unwrap();
        assert_eq!(
            script.trim_end(),
            "docker login -u AWS -p token registry.example.com"
        );
    }
}
