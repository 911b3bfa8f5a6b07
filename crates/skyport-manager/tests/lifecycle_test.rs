//! Tunnel manager lifecycle tests against in-process collaborators

mod common;

use common::*;
use skyport_manager::{LinkHealth, ManagerError};
use skyport_proto::{parse_ports, EndpointStatus, ServicePort, TunnelState};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

#[tokio::test]
async fn test_up_reaches_monitoring() {
    let harness = Harness::new().await;
    let (link, counters) = ScriptedLink::new(vec![]);
    let mut manager = harness.manager(harness.options(parse_ports("80,443").unwrap()), link);

    manager.up().await.unwrap();

    assert_eq!(manager.state(), TunnelState::Monitoring);
    assert_eq!(counters.established.load(Ordering::SeqCst), 1);
    // The single probe run by test_tunnel
    assert_eq!(counters.probes.load(Ordering::SeqCst), 1);

    let endpoint = manager.endpoint().unwrap();
    assert_eq!(endpoint.id, HOST_ID);
    assert_eq!(endpoint.status, EndpointStatus::Ready);
    assert_eq!(endpoint.public_address(), Ipv4Addr::LOCALHOST);

    let commands = harness.shell.commands.lock().unwrap().clone();
    assert_eq!(commands, vec!["cloud-init status --wait".to_string()]);
}

#[tokio::test]
async fn test_boot_document_carries_keys_and_link_files() {
    let harness = Harness::new().await;
    let (link, _) = ScriptedLink::new(vec![]);
    let mut manager = harness.manager(harness.options(parse_ports("80").unwrap()), link);
    manager.up().await.unwrap();

    let documents = harness.provisioner.boot_documents.lock().unwrap().clone();
    assert_eq!(documents.len(), 1);
    let document = &documents[0];
    assert!(document.starts_with("#cloud-config\n"));
    assert!(document.contains("PRIVATE-skyport-test-host"));
    assert!(document.contains("ssh-ed25519 PUBLIC-skyport-test-client"));
    assert!(document.contains(BOOT_FILE_PATH));
    assert!(document.contains("echo scripted"));
    // The client private key never leaves the local machine
    assert!(!document.contains("PRIVATE-skyport-test-client"));
}

#[tokio::test]
async fn test_state_dir_is_written_and_removed_on_cleanup() {
    let harness = Harness::new().await;
    let (link, _) = ScriptedLink::new(vec![]);
    let mut manager = harness.manager(harness.options(parse_ports("80").unwrap()), link);
    manager.up().await.unwrap();

    let state_dir = manager.state_dir().clone();
    assert!(state_dir.client_key_path().exists());
    let record = state_dir.read_endpoint().unwrap();
    assert_eq!(record.id, HOST_ID);
    assert_eq!(record.public_address(), Ipv4Addr::LOCALHOST);
    // The stand-in management port is never 22, so entries carry the port
    let port = harness.management.local_addr().unwrap().port();
    let known_hosts = state_dir.read_known_hosts().unwrap();
    assert!(known_hosts.starts_with(&format!(
        "[127.0.0.1]:{} ssh-ed25519 PUBLIC-skyport-test-host",
        port
    )));

    manager.cleanup().await.unwrap();
    assert!(!state_dir.exists());
}

#[tokio::test]
async fn test_floating_address_is_attached_and_pinned() {
    let floating = Ipv4Addr::new(198, 51, 100, 7);
    let harness = Harness::new().await;
    let (link, _) = ScriptedLink::new(vec![]);
    let options = harness
        .options(parse_ports("80").unwrap())
        .with_floating_address(Some(floating));
    let mut manager = harness.manager(options, link);
    manager.up().await.unwrap();

    assert_eq!(
        harness.provisioner.attached.lock().unwrap().clone(),
        vec![(floating, HOST_ID.to_string())]
    );
    assert_eq!(manager.endpoint().unwrap().public_address(), floating);
    let port = harness.management.local_addr().unwrap().port();
    let known_hosts = manager.state_dir().read_known_hosts().unwrap();
    assert!(known_hosts.starts_with(&format!(
        "[127.0.0.1]:{port},[198.51.100.7]:{port} ",
        port = port
    )));
}

#[tokio::test]
async fn test_relay_forwards_to_destination() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_port = backend.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut stream, _) = backend.accept().await.unwrap();
        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).await.unwrap();
        stream.write_all(&buf[..n]).await.unwrap();
    });

    let public_port = {
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        probe.local_addr().unwrap().port()
    };

    let harness = Harness::new().await;
    let (link, _) = ScriptedLink::new(vec![]);
    let link = link.with_relay_address(LOOPBACK);
    let services = vec![ServicePort::tcp(public_port).with_local_port(backend_port)];
    let mut manager = harness.manager(harness.options(services), link);
    manager.up().await.unwrap();

    assert_eq!(manager.relay_address(), Some(LOOPBACK));
    assert!(manager.relay_failures().is_empty());

    let mut client = TcpStream::connect(SocketAddr::new(LOOPBACK, public_port))
        .await
        .unwrap();
    client.write_all(b"through the tunnel").await.unwrap();
    let mut received = [0u8; 18];
    tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&received, b"through the tunnel");

    manager.cleanup().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(TcpStream::connect(SocketAddr::new(LOOPBACK, public_port))
        .await
        .is_err());
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let harness = Harness::new().await;
    let (link, counters) = ScriptedLink::new(vec![]);
    let mut manager = harness.manager(harness.options(parse_ports("80").unwrap()), link);
    manager.up().await.unwrap();

    manager.cleanup().await.unwrap();
    manager.cleanup().await.unwrap();

    assert_eq!(manager.state(), TunnelState::TornDown);
    assert_eq!(harness.destroyed(), vec![HOST_ID.to_string()]);
    assert_eq!(counters.teardowns.load(Ordering::SeqCst), 1);
    assert_eq!(
        manager.endpoint().unwrap().status,
        EndpointStatus::Destroyed
    );
}

#[tokio::test]
async fn test_cleanup_without_tunnel() {
    let harness = Harness::new().await;
    let (link, _) = ScriptedLink::new(vec![]);
    let mut manager = harness.manager(harness.options(parse_ports("80").unwrap()), link);

    manager.cleanup().await.unwrap();
    assert_eq!(manager.state(), TunnelState::TornDown);
    assert!(harness.destroyed().is_empty());
}

#[tokio::test]
async fn test_destroy_failure_is_surfaced_once() {
    let provisioner = StubProvisioner {
        fail_destroy: true,
        ..Default::default()
    };
    let harness = Harness::with_parts(provisioner, RecordingShell::default()).await;
    let (link, _) = ScriptedLink::new(vec![]);
    let mut manager = harness.manager(harness.options(parse_ports("80").unwrap()), link);
    manager.up().await.unwrap();

    let err = manager.cleanup().await.unwrap_err();
    assert!(matches!(err, ManagerError::Provisioning(_)));
    assert_eq!(manager.state(), TunnelState::TornDown);

    // Not retried
    manager.cleanup().await.unwrap();
    assert_eq!(harness.destroyed().len(), 1);
}

#[tokio::test]
async fn test_operations_before_up_are_invalid() {
    let harness = Harness::new().await;
    let (link, counters) = ScriptedLink::new(vec![]);
    let mut manager = harness.manager(harness.options(parse_ports("80").unwrap()), link);

    assert!(manager.open_tunnel().await.unwrap_err().is_invalid_state());
    assert!(manager.test_tunnel().await.unwrap_err().is_invalid_state());
    assert!(manager.run(&["uptime"]).await.unwrap_err().is_invalid_state());
    assert!(manager.run_quiet(&["true"]).await.unwrap_err().is_invalid_state());
    assert_eq!(counters.opens.load(Ordering::SeqCst), 0);
    assert_eq!(manager.state(), TunnelState::Unprovisioned);
}

#[tokio::test]
async fn test_up_twice_is_invalid() {
    let harness = Harness::new().await;
    let (link, _) = ScriptedLink::new(vec![]);
    let mut manager = harness.manager(harness.options(parse_ports("80").unwrap()), link);
    manager.up().await.unwrap();

    let err = manager.up().await.unwrap_err();
    assert!(err.is_invalid_state());
    assert_eq!(manager.state(), TunnelState::Monitoring);
}

#[tokio::test]
async fn test_run_uses_the_endpoint_shell() {
    let harness = Harness::new().await;
    let (link, _) = ScriptedLink::new(vec![]);
    let mut manager = harness.manager(harness.options(parse_ports("80").unwrap()), link);
    manager.up().await.unwrap();

    assert_eq!(manager.run(&["uname", "-a"]).await.unwrap(), "ran uname -a\n");
    manager.run_quiet(&["true"]).await.unwrap();
    assert!(harness
        .shell
        .commands
        .lock()
        .unwrap()
        .contains(&"uname -a".to_string()));
}

#[tokio::test]
async fn test_create_failure_fails_without_endpoint() {
    let provisioner = StubProvisioner {
        fail_create: true,
        ..Default::default()
    };
    let harness = Harness::with_parts(provisioner, RecordingShell::default()).await;
    let (link, _) = ScriptedLink::new(vec![]);
    let mut manager = harness.manager(harness.options(parse_ports("80").unwrap()), link);

    let err = manager.up().await.unwrap_err();
    assert!(matches!(err, ManagerError::Provisioning(_)));
    assert_eq!(manager.state(), TunnelState::Failed);
    assert!(manager.endpoint().is_none());

    manager.cleanup().await.unwrap();
    assert!(harness.destroyed().is_empty());
    assert_eq!(manager.state(), TunnelState::TornDown);
}

#[tokio::test]
async fn test_host_that_never_gets_ready_is_destroyed() {
    let provisioner = StubProvisioner {
        fail_ready: true,
        ..Default::default()
    };
    let harness = Harness::with_parts(provisioner, RecordingShell::default()).await;
    let (link, _) = ScriptedLink::new(vec![]);
    let mut manager = harness.manager(harness.options(parse_ports("80").unwrap()), link);

    let err = manager.up().await.unwrap_err();
    assert!(matches!(err, ManagerError::Provisioning(_)));
    assert!(manager.endpoint().is_none());

    manager.cleanup().await.unwrap();
    assert_eq!(harness.destroyed(), vec![HOST_ID.to_string()]);
    manager.cleanup().await.unwrap();
    assert_eq!(harness.destroyed().len(), 1);
}

#[tokio::test]
async fn test_interrupted_boot_wait_destroys_created_host() {
    let provisioner = StubProvisioner {
        hang_ready: true,
        ..Default::default()
    };
    let harness = Harness::with_parts(provisioner, RecordingShell::default()).await;
    let (link, _) = ScriptedLink::new(vec![]);
    let mut manager = harness.manager(harness.options(parse_ports("80").unwrap()), link);

    let outcome = tokio::select! {
        result = manager.up() => Some(result),
        _ = tokio::time::sleep(Duration::from_millis(50)) => None,
    };
    assert!(outcome.is_none());
    assert_eq!(manager.state(), TunnelState::Provisioning);

    manager.cleanup().await.unwrap();
    assert_eq!(harness.destroyed(), vec![HOST_ID.to_string()]);
    assert_eq!(manager.state(), TunnelState::TornDown);
}

#[tokio::test]
async fn test_boot_command_failure_still_destroys_endpoint() {
    let shell = RecordingShell {
        fail: true,
        ..Default::default()
    };
    let harness = Harness::with_parts(StubProvisioner::default(), shell).await;
    let (link, counters) = ScriptedLink::new(vec![]);
    let mut manager = harness.manager(harness.options(parse_ports("80").unwrap()), link);

    let err = manager.up().await.unwrap_err();
    assert!(matches!(err, ManagerError::Provisioning(_)));
    assert_eq!(manager.state(), TunnelState::Failed);
    assert_eq!(counters.established.load(Ordering::SeqCst), 0);

    manager.cleanup().await.unwrap();
    assert_eq!(harness.destroyed(), vec![HOST_ID.to_string()]);
}

#[tokio::test]
async fn test_failed_initial_probe_is_an_establish_error() {
    let harness = Harness::new().await;
    let (link, _) = ScriptedLink::new(vec![LinkHealth::Unresponsive("no reply".to_string())]);
    let mut manager = harness.manager(harness.options(parse_ports("80").unwrap()), link);

    let err = manager.up().await.unwrap_err();
    assert!(matches!(err, ManagerError::TunnelEstablish(_)));
    assert_eq!(manager.state(), TunnelState::Failed);
}
