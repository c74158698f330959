use pd_e2e::{
    driver::{setup_driver, ClientConfig},
    fs::{block_size_gb, force_chmod, fs_size_gb, read_file, rm_all, write_file},
    test_utils::FakeInstance,
    Error,
};
use std::path::{Path, PathBuf};

#[tokio::test]
async fn test_write_then_read() {
    let instance = FakeInstance::new("node-1");
    instance.respond("cat", "hello\n");

    write_file(&instance, "/mnt/pd/testfile", "hello").await.unwrap();
    let contents = read_file(&instance, "/mnt/pd/testfile").await.unwrap();
    assert_eq!(contents, "hello\n");

    let history = instance.history();
    assert_eq!(history.len(), 2);
    assert!(!history[0].sudo);
    assert_eq!(history[0].line(), "echo hello > /mnt/pd/testfile");
    assert_eq!(history[1].line(), "cat /mnt/pd/testfile");
}

#[tokio::test]
async fn test_read_failure_carries_output() {
    let instance = FakeInstance::new("node-1");
    instance.fail("cat", "cat: /mnt/pd/missing: No such file or directory");

    let err = read_file(&instance, "/mnt/pd/missing").await.unwrap_err();
    assert!(matches!(err, Error::Remote { .. }));
    assert_eq!(err.output(), Some("cat: /mnt/pd/missing: No such file or directory"));
    assert!(err.to_string().starts_with("failed to read test file /mnt/pd/missing"));
}

#[tokio::test]
async fn test_force_chmod_restores_umask() {
    let instance = FakeInstance::new("node-1");
    instance.respond("umask", "0022\n");

    force_chmod(&instance, "/mnt/pd", "777").await.unwrap();

    let lines: Vec<(bool, String)> = instance.history().iter().map(|c| (c.sudo, c.line())).collect();
    assert_eq!(
        lines,
        vec![
            (false, "umask".to_string()),
            (false, "umask 0000".to_string()),
            (true, "chmod -R 777 /mnt/pd".to_string()),
            (false, "umask 0022".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_force_chmod_failure_still_restores() {
    let instance = FakeInstance::new("node-1");
    instance.respond("umask", "0022");
    instance.fail("chmod", "chmod: cannot access '/nope'");

    let err = force_chmod(&instance, "/nope", "777").await.unwrap_err();
    assert!(err.to_string().starts_with("failed to chmod file /nope"));
    assert_eq!(instance.history().last().unwrap().line(), "umask 0022");
}

#[tokio::test]
async fn test_fs_size() {
    let instance = FakeInstance::new("node-1");
    instance.respond("df", "  10G\n");

    assert_eq!(fs_size_gb(&instance, "/mnt/pd").await.unwrap(), 10);
    assert_eq!(
        instance.history()[0].line(),
        "df --output=size -BG /mnt/pd | awk 'NR==2'"
    );

    instance.respond("df", "Size\n");
    let err = fs_size_gb(&instance, "/mnt/pd").await.unwrap_err();
    assert!(matches!(err, Error::Parse { .. }));
}

#[tokio::test]
async fn test_block_size() {
    let instance = FakeInstance::new("node-1");
    instance.respond("blockdev", "10737418240\n");

    assert_eq!(block_size_gb(&instance, "/dev/sdb").await.unwrap(), 10);
    let history = instance.history();
    let cmd = &history[0];
    assert!(cmd.sudo);
    assert_eq!(cmd.line(), "blockdev --getsize64 /dev/sdb");
}

#[tokio::test]
async fn test_rm_all() {
    let instance = FakeInstance::new("node-1");
    rm_all(&instance, "/mnt/pd/dir").await.unwrap();
    let history = instance.history();
    let cmd = &history[0];
    assert!(cmd.sudo);
    assert_eq!(cmd.line(), "rm -rf /mnt/pd/dir");

    instance.fail("rm", "rm: cannot remove: Device or resource busy");
    let err = rm_all(&instance, "/mnt/pd").await.unwrap_err();
    assert_eq!(err.output(), Some("rm: cannot remove: Device or resource busy"));
}

#[tokio::test]
async fn test_setup_driver_stages_and_starts() {
    let instance = FakeInstance::new("node-1");
    let config = ClientConfig::new(Path::new("/go"), "/tmp/gce-pd-e2e-20181002T171125", 5000);

    let ctx = setup_driver(&instance, config.clone()).await.unwrap();
    assert_eq!(ctx.instance, "node-1");
    assert_eq!(ctx.endpoint, "tcp://localhost:5000");

    assert_eq!(
        instance.copies(),
        vec![(
            PathBuf::from("/go/src/sigs.k8s.io/gcp-compute-persistent-disk-csi-driver/bin/gce-pd-csi-driver"),
            "/tmp/gce-pd-e2e-20181002T171125/gce-pd-csi-driver".to_string(),
        )]
    );

    let history = instance.history();
    assert_eq!(history[0].line(), "mkdir -p /tmp/gce-pd-e2e-20181002T171125");
    let start = history.last().unwrap();
    assert!(start.sudo);
    assert_eq!(start.line(), config.run_driver_cmd);
}

#[tokio::test]
async fn test_setup_driver_start_failure() {
    let instance = FakeInstance::new("node-1");
    let config = ClientConfig::new(Path::new("/go"), "/tmp/ws", 5000);
    instance.fail(&config.run_driver_cmd, "sh: not found");

    let err = setup_driver(&instance, config).await.unwrap_err();
    assert!(err.to_string().starts_with("failed to start driver"));
    assert_eq!(err.output(), Some("sh: not found"));
}
