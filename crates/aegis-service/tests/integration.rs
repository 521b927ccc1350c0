//! Integration tests for the aegis-service crate.
//!
//! These tests exercise the governance gate, dispatcher, and channel
//! transport together on top of a real genesis vault in a temporary
//! directory.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use aegis_service::client::exchange;
use aegis_service::protocol::MAX_REQUEST_BYTES;
use aegis_service::{
    Dispatcher, GovernanceGate, ManualClock, ServiceConfig, ServiceRequest, ServiceResponse,
    Status, serve_connection,
};
use aegis_vault::{EphemeralProtector, GenesisVault, VaultConfig};

const PHRASE: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

struct Harness {
    dir: tempfile::TempDir,
    clock: Arc<ManualClock>,
    gate: Arc<GovernanceGate>,
    dispatcher: Dispatcher,
}

fn harness(config: ServiceConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let vault = GenesisVault::new(
        VaultConfig::new(dir.path().join("data")).with_shares(5, 3),
        Box::new(EphemeralProtector::new().unwrap()),
    )
    .unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let gate = Arc::new(GovernanceGate::new(clock.clone()));
    let config = config.with_log_file(dir.path().join("service.log"));
    let dispatcher = Dispatcher::new(vault, gate.clone(), config);
    Harness {
        dir,
        clock,
        gate,
        dispatcher,
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Governance scenarios
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn unlock_window_expires_without_explicit_lock() {
    let h = harness(ServiceConfig::default());
    h.dispatcher
        .dispatch(ServiceRequest::new("set_mnemonic").with_param("mnemonic", PHRASE))
        .await;

    h.gate.unlock(chrono::Duration::minutes(15));
    let resp = h.dispatcher.dispatch(ServiceRequest::new("get_mnemonic")).await;
    assert!(resp.success);
    assert_eq!(resp.value.unwrap()["mnemonic"], PHRASE);

    h.clock.advance(chrono::Duration::minutes(16));
    let resp = h.dispatcher.dispatch(ServiceRequest::new("get_mnemonic")).await;
    assert!(!resp.success);
    assert_eq!(resp.status, Status::Locked);
    assert_eq!(resp.status_code, 423);
    assert!(resp.value.is_none());
}

#[tokio::test]
async fn dev_unlock_refused_when_policy_off() {
    let h = harness(ServiceConfig::default());
    for minutes in [5, 1, 10_000] {
        let resp = h
            .dispatcher
            .dispatch(ServiceRequest::new("unlock_for_development").with_param("minutes", minutes))
            .await;
        assert_eq!(resp.status, Status::Forbidden);
        assert_eq!(resp.status_code, 403);
    }
    assert!(!h.gate.is_unlocked());

    let resp = h.dispatcher.dispatch(ServiceRequest::new("get_mnemonic")).await;
    assert_eq!(resp.status, Status::Locked);
}

#[tokio::test]
async fn first_unlocked_read_creates_the_secret() {
    let h = harness(ServiceConfig::default().with_dev_unlock(true));

    let resp = h
        .dispatcher
        .dispatch(ServiceRequest::new("unlockdev").with_param("minutes", 5))
        .await;
    assert!(resp.success);
    assert_eq!(resp.value.unwrap()["status"], "unlocked");

    let first = h.dispatcher.dispatch(ServiceRequest::new("getmnemonic")).await;
    let second = h.dispatcher.dispatch(ServiceRequest::new("getmnemonic")).await;
    assert_eq!(first.value, second.value);

    let phrase = first.value.unwrap()["mnemonic"].as_str().unwrap().to_owned();
    assert_eq!(phrase.split(' ').count(), 12);

    let resp = h.dispatcher.dispatch(ServiceRequest::new("hasmnemonic")).await;
    assert_eq!(resp.value.unwrap()["hasMnemonic"], true);
}

#[tokio::test]
async fn device_info_and_shares_round_trip() {
    let h = harness(ServiceConfig::default());

    let resp = h
        .dispatcher
        .dispatch(ServiceRequest::new("set_mnemonic").with_param("mnemonic", PHRASE))
        .await;
    let shares: Vec<aegis_vault::Share> =
        serde_json::from_value(resp.value.unwrap()["shares"].clone()).unwrap();
    assert_eq!(shares.len(), 5);
    let recovered = aegis_vault::recover_mnemonic(&shares[1..4], 3).unwrap();
    assert_eq!(recovered.as_str(), PHRASE);

    let resp = h.dispatcher.dispatch(ServiceRequest::new("get_device_info")).await;
    let device = &resp.value.unwrap()["device"];
    assert_eq!(device["shareCount"], 5);
    assert_eq!(device["recoveryThreshold"], 3);
    assert!(device["deviceId"].is_string());
}

#[tokio::test]
async fn internal_failures_are_generic() {
    let h = harness(ServiceConfig::default());
    h.dispatcher
        .dispatch(ServiceRequest::new("set_mnemonic").with_param("mnemonic", PHRASE))
        .await;

    // Corrupt the envelope, then read it while unlocked.
    std::fs::write(h.dir.path().join("data").join("genesis.enc"), b"{}").unwrap();
    h.gate.unlock(chrono::Duration::minutes(1));

    let resp = h.dispatcher.dispatch(ServiceRequest::new("get_mnemonic")).await;
    assert_eq!(resp.status, Status::InternalError);
    assert_eq!(resp.status_code, 500);
    assert_eq!(resp.error_message.as_deref(), Some("internal service error"));
}

// ═══════════════════════════════════════════════════════════════════════
//  Connection handling (in-memory duplex)
// ═══════════════════════════════════════════════════════════════════════

async fn read_response<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> ServiceResponse {
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    serde_json::from_str(&line).unwrap()
}

#[tokio::test]
async fn one_request_one_response() {
    let h = harness(ServiceConfig::default());
    let (client, server) = tokio::io::duplex(64 * 1024);
    let dispatcher = h.dispatcher.clone();
    tokio::spawn(async move { serve_connection(server, &dispatcher).await });

    let resp = exchange(client, &ServiceRequest::new("ping")).await.unwrap();
    assert!(resp.success);
    assert!(resp.value.unwrap()["utc"].is_string());
}

#[tokio::test]
async fn connection_carries_many_requests_and_survives_garbage() {
    let h = harness(ServiceConfig::default());
    let (client, server) = tokio::io::duplex(64 * 1024);
    let dispatcher = h.dispatcher.clone();
    let task = tokio::spawn(async move { serve_connection(server, &dispatcher).await });

    let (reader, mut writer) = tokio::io::split(client);
    let mut reader = BufReader::new(reader);

    writer.write_all(b"{\"command\":\"ping\"}\n").await.unwrap();
    assert!(read_response(&mut reader).await.success);

    writer.write_all(b"\n   \nnot json\n").await.unwrap();
    let resp = read_response(&mut reader).await;
    assert_eq!(resp.status, Status::BadRequest);

    writer
        .write_all(b"{\"command\":\"self_destruct\"}\n")
        .await
        .unwrap();
    assert_eq!(read_response(&mut reader).await.status, Status::NotFound);

    writer
        .write_all(b"{\"command\":\"get_lock_status\"}\n")
        .await
        .unwrap();
    let resp = read_response(&mut reader).await;
    assert_eq!(resp.value.unwrap()["unlocked"], false);

    drop(writer);
    drop(reader);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn oversized_request_is_rejected_and_closed() {
    let h = harness(ServiceConfig::default());
    let (client, server) = tokio::io::duplex(4 * MAX_REQUEST_BYTES);
    let dispatcher = h.dispatcher.clone();
    let task = tokio::spawn(async move { serve_connection(server, &dispatcher).await });

    let (reader, mut writer) = tokio::io::split(client);
    let mut reader = BufReader::new(reader);

    let mut huge = vec![b'x'; MAX_REQUEST_BYTES + 10];
    huge.push(b'\n');
    writer.write_all(&huge).await.unwrap();

    let resp = read_response(&mut reader).await;
    assert_eq!(resp.status, Status::BadRequest);
    task.await.unwrap().unwrap();

    let mut rest = String::new();
    assert_eq!(reader.read_line(&mut rest).await.unwrap(), 0);
}

// ═══════════════════════════════════════════════════════════════════════
//  Unix socket transport
// ═══════════════════════════════════════════════════════════════════════

#[cfg(unix)]
mod unix_socket {
    use super::*;
    use aegis_service::{Endpoint, ServiceClient, ServiceServer};

    #[tokio::test]
    async fn end_to_end_over_socket() {
        use std::os::unix::fs::PermissionsExt;

        let h = harness(ServiceConfig::default().with_dev_unlock(true));
        let path = h.dir.path().join("aegis.sock");
        let endpoint = Endpoint::UnixSocket(path.clone());

        let server = ServiceServer::bind(h.dispatcher.clone(), endpoint.clone())
            .await
            .unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let serving = tokio::spawn(server.serve(async {
            let _ = stopped.await;
        }));

        let client = ServiceClient::new(endpoint, Duration::from_secs(5));
        assert!(client.ping().await.unwrap().success);

        let resp = client.set_mnemonic(PHRASE).await.unwrap();
        assert!(resp.success);
        assert_eq!(client.set_mnemonic(PHRASE).await.unwrap().status, Status::Conflict);

        assert_eq!(client.get_mnemonic().await.unwrap().status, Status::Locked);
        assert!(client.unlock_for_development(Some(5)).await.unwrap().success);
        let resp = client.get_mnemonic().await.unwrap();
        assert_eq!(resp.value.unwrap()["mnemonic"], PHRASE);

        assert!(client.lock().await.unwrap().success);
        assert_eq!(client.get_mnemonic().await.unwrap().status, Status::Locked);

        let resp = client.get_recent_logs(Some(10)).await.unwrap();
        assert!(resp.success);

        // Concurrent clients share one vault and one gate.
        let calls: Vec<_> = (0..8)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.has_mnemonic().await })
            })
            .collect();
        for call in calls {
            let resp = call.await.unwrap().unwrap();
            assert_eq!(resp.value.unwrap()["hasMnemonic"], true);
        }

        stop.send(()).unwrap();
        serving.await.unwrap().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn socket_is_bound_privately_and_moved_into_place() {
        use std::os::unix::fs::PermissionsExt;

        let h = harness(ServiceConfig::default());
        let run = h.dir.path().join("run");
        let path = run.join("aegis.sock");
        let server = ServiceServer::bind(h.dispatcher.clone(), Endpoint::UnixSocket(path.clone()))
            .await
            .unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let entries: Vec<_> = std::fs::read_dir(&run)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("aegis.sock")]);

        let client = ServiceClient::new(Endpoint::UnixSocket(path), Duration::from_secs(5));
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let serving = tokio::spawn(server.serve(async {
            let _ = stopped.await;
        }));
        assert!(client.ping().await.unwrap().success);
        stop.send(()).unwrap();
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stale_socket_is_replaced_live_one_is_not() {
        let h = harness(ServiceConfig::default());
        let path = h.dir.path().join("stale.sock");

        // A listener that went away leaves its socket file behind.
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let endpoint = Endpoint::UnixSocket(path.clone());
        let live = ServiceServer::bind(h.dispatcher.clone(), endpoint.clone())
            .await
            .unwrap();

        let second = ServiceServer::bind(h.dispatcher.clone(), endpoint).await;
        assert!(second.is_err());
        drop(live);
    }

    #[tokio::test]
    async fn client_times_out_without_service() {
        let dir = tempfile::tempdir().unwrap();
        let client = ServiceClient::new(
            Endpoint::UnixSocket(dir.path().join("nobody.sock")),
            Duration::from_millis(200),
        );
        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, aegis_service::ServiceError::Transport { .. }));
    }

    #[test]
    fn endpoint_from_config() {
        let cfg = ServiceConfig::default();
        assert_eq!(
            Endpoint::from_config(&cfg),
            Endpoint::UnixSocket(std::env::temp_dir().join("AegisMint.sock"))
        );

        let cfg = ServiceConfig::default().with_socket_path("/run/aegis/aegis.sock");
        assert_eq!(
            Endpoint::from_config(&cfg),
            Endpoint::UnixSocket("/run/aegis/aegis.sock".into())
        );
    }
}
