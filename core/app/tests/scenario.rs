//! End-to-end login and browsing against both adapter kinds.

use std::fs;
use std::path::Path;

use tempfile::TempDir;
use vaultgate_app::{AppConfig, BrowsingService};
use vaultgate_common::{Error, Passphrase, VaultDescriptor, VaultId, VaultPath};
use vaultgate_crypto::KdfParams;
use vaultgate_vault::format::initialize;
use vaultgate_vault::{AdapterKind, MountConfig, VaultAdapter};

const PASSPHRASE: &str = "correct-horse";
const SECRET: &[u8] = b"the eagle lands at dawn";

fn config(vault_path: &Path, adapter: AdapterKind, mount: MountConfig) -> AppConfig {
    let config = AppConfig {
        secret_key: "integration".to_string(),
        adapter,
        mount,
        vaults: vec![VaultDescriptor::new(
            VaultId::new("personal").unwrap(),
            vault_path,
        )],
        ..AppConfig::default()
    };
    config.validate().unwrap();
    config
}

fn exercise(service: &BrowsingService) {
    let token = service
        .login("personal", &Passphrase::new(PASSPHRASE), "127.0.0.1")
        .unwrap();

    let names: Vec<_> = service
        .browse(&token, "/")
        .unwrap()
        .into_iter()
        .map(|e| (e.name, e.is_dir))
        .collect();
    assert_eq!(
        names,
        vec![
            ("docs".to_string(), true),
            ("photos".to_string(), true),
            ("secret.txt".to_string(), false),
        ]
    );

    assert!(matches!(
        service.browse(&token, "/nonexistent"),
        Err(Error::NotFound(_))
    ));
    assert_eq!(
        service
            .fetch(&token, "/secret.txt")
            .unwrap()
            .into_bytes()
            .unwrap(),
        SECRET
    );
    assert_eq!(service.browse(&token, "/docs/../docs").unwrap().len(), 1);
    assert!(matches!(
        service.browse(&token, "/../../etc"),
        Err(Error::PathTraversal(_))
    ));

    service.logout(&token);
    assert!(matches!(
        service.browse(&token, "/"),
        Err(Error::Authentication)
    ));
}

#[test]
fn test_inprocess_scenario() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("personal");
    let pass = Passphrase::new(PASSPHRASE);
    initialize(&root, &pass, KdfParams::minimal()).unwrap();

    let config = config(&root, AdapterKind::InProcess, MountConfig::default());
    let vault = config.vault("personal").unwrap().clone();
    let adapter = VaultAdapter::from_kind(AdapterKind::InProcess, MountConfig::default());
    let mut handle = adapter.open(&vault, &pass).unwrap();
    for dir in ["/docs", "/photos"] {
        adapter
            .make_dir(&handle, &VaultPath::parse(dir).unwrap())
            .unwrap();
    }
    adapter
        .write_file(&handle, &VaultPath::parse("/docs/readme.md").unwrap(), b"# hi")
        .unwrap();
    adapter
        .write_file(&handle, &VaultPath::parse("/secret.txt").unwrap(), SECRET)
        .unwrap();
    adapter.close(&mut handle);

    for cache in [true, false] {
        let mut config = config.clone();
        config.enable_login_index_cache = cache;
        exercise(&BrowsingService::from_config(&config));
    }
}

#[cfg(unix)]
#[test]
fn test_process_mount_scenario() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let root = dir.path().join("personal");
    fs::create_dir_all(root.join("docs")).unwrap();
    fs::create_dir_all(root.join("photos")).unwrap();
    fs::write(root.join("docs/readme.md"), b"# hi").unwrap();
    fs::write(root.join("secret.txt"), SECRET).unwrap();

    let helper = dir.path().join("mount.sh");
    fs::write(
        &helper,
        "#!/bin/sh\n[ \"$VAULTGATE_PASSPHRASE\" = \"correct-horse\" ] || exit 1\ncp -R \"$1\"/. \"$2\"/\n",
    )
    .unwrap();
    let unmount = dir.path().join("umount.sh");
    fs::write(&unmount, "#!/bin/sh\nrm -rf \"$1\"/*\n").unwrap();
    for script in [&helper, &unmount] {
        fs::set_permissions(script, fs::Permissions::from_mode(0o755)).unwrap();
    }

    let mount = MountConfig {
        helper,
        helper_args: vec!["{vault}".to_string(), "{mountpoint}".to_string()],
        unmount_helper: unmount,
        mount_root: dir.path().join("mounts"),
        ready_timeout_ms: 2_000,
        poll_interval_ms: 10,
        ..MountConfig::default()
    };

    let config = config(&root, AdapterKind::Process, mount);
    let service = BrowsingService::from_config(&config);
    exercise(&service);
    assert_eq!(
        fs::read_dir(dir.path().join("mounts")).unwrap().count(),
        0
    );

    assert!(matches!(
        service.login("personal", &Passphrase::new("wrong"), "127.0.0.1"),
        Err(Error::Authentication)
    ));
}
