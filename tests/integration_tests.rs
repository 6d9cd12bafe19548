// Integration tests for the gust transfer pipeline
// These tests drive the real TLS server with the pinned client path, end to end
// on the loopback interface.

use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use gust::beacon::Device;
use gust::catalog::FileCatalog;
use gust::client::TransferClient;
use gust::crypto;
use gust::identity::{pinned_client_config, Identity};
use gust::phrase;
use gust::protocol::TransferProtocol;
use gust::server::{self, ServerState};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const PHRASE: &str = "swift-ocean";

struct Harness {
    fingerprint: String,
    port: u16,
    _server: JoinHandle<()>,
    connected: oneshot::Receiver<String>,
    done: oneshot::Receiver<()>,
}

fn write_file(path: &Path, bytes: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::File::create(path).unwrap().write_all(bytes).unwrap();
}

async fn start_sender(paths: &[std::path::PathBuf]) -> Harness {
    let catalog = FileCatalog::scan(paths).unwrap();
    let identity = Identity::generate().unwrap();
    let fingerprint = identity.fingerprint().to_string();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let tls = identity.server_tls_config().unwrap();
    let (state, connected, done) = ServerState::new(
        PHRASE.to_string(),
        "it-sender".to_string(),
        fingerprint.clone(),
        catalog,
    );
    let _server = tokio::spawn(async move {
        let _ = server::serve(listener, tls, state).await;
    });

    Harness {
        fingerprint,
        port,
        _server,
        connected,
        done,
    }
}

fn device_for(harness: &Harness) -> Device {
    Device {
        alias: "it-sender".to_string(),
        fingerprint: harness.fingerprint.clone(),
        addr: SocketAddr::from(([127, 0, 0, 1], harness.port)),
        protocol: TransferProtocol::Https,
    }
}

fn pinned_client(fingerprint: &str) -> reqwest::Client {
    let tls = pinned_client_config(fingerprint).unwrap();
    reqwest::Client::builder()
        .use_preconfigured_tls(tls)
        .build()
        .unwrap()
}

fn handshake_body(timestamp: String, proof: String) -> serde_json::Value {
    serde_json::json!({
        "info": {
            "alias": "it-receiver",
            "version": "2.1",
            "deviceModel": "CLI",
            "deviceType": "headless",
            "fingerprint": "cd".repeat(32),
        },
        "files": {},
        "cliAuth": { "timestamp": timestamp, "proof": proof },
    })
}

// ============================================================================
// End-to-End Transfer Tests
// ============================================================================

#[tokio::test]
async fn test_end_to_end_transfer_is_byte_identical() {
    let src = tempfile::tempdir().unwrap();
    let shared = src.path().join("shared");
    let doc: Vec<u8> = (0..200_000u32).flat_map(|i| i.to_le_bytes()).collect();
    write_file(&shared.join("doc.pdf"), &doc);
    write_file(&shared.join("notes/readme.txt"), b"read me first");

    let mut harness = start_sender(&[shared]).await;

    let out = tempfile::tempdir().unwrap();
    let receiver_identity = Identity::generate().unwrap();
    let client = TransferClient::new(
        PHRASE.to_string(),
        out.path().to_path_buf(),
        true,
        &receiver_identity,
    );
    client.run(&device_for(&harness)).await.unwrap();

    // Byte-for-byte identical content under the advertised relative names.
    assert_eq!(std::fs::read(out.path().join("shared/doc.pdf")).unwrap(), doc);
    assert_eq!(
        std::fs::read(out.path().join("shared/notes/readme.txt")).unwrap(),
        b"read me first"
    );

    // The connected barrier carried the receiver's alias exactly once.
    assert_eq!(harness.connected.try_recv().unwrap(), "it-receiver");

    // The completion barrier fires after the flush grace.
    tokio::time::timeout(Duration::from_secs(3), harness.done)
        .await
        .expect("completion barrier should fire")
        .unwrap();
}

#[tokio::test]
async fn test_substituted_certificate_fails_before_http() {
    let src = tempfile::tempdir().unwrap();
    write_file(&src.path().join("doc.txt"), b"contents");
    let harness = start_sender(&[src.path().join("doc.txt")]).await;

    // The receiver expects a different fingerprint than the one the server
    // presents, as if a middlebox answered the beacon.
    let imposter = Identity::generate().unwrap();
    let client = pinned_client(imposter.fingerprint());
    let result = client
        .get(format!(
            "https://127.0.0.1:{}/api/localsend/v2/info",
            harness.port
        ))
        .send()
        .await;
    assert!(result.is_err(), "TLS handshake must fail, not reach HTTP");
}

// ============================================================================
// Handshake Authentication Tests
// ============================================================================

#[tokio::test]
async fn test_handshake_replay_and_session_reuse() {
    let src = tempfile::tempdir().unwrap();
    write_file(&src.path().join("doc.txt"), b"contents");
    let harness = start_sender(&[src.path().join("doc.txt")]).await;

    let client = pinned_client(&harness.fingerprint);
    let base = format!("https://127.0.0.1:{}/api/localsend/v2", harness.port);

    // A replayed handshake from ten minutes ago is expired.
    let stale = (crypto::now_unix_ms() - 10 * 60 * 1000).to_string();
    let stale_proof = crypto::auth_proof(PHRASE, &stale, &harness.fingerprint);
    let response = client
        .post(format!("{}/prepare-upload", base))
        .json(&handshake_body(stale, stale_proof))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    // A proof keyed by the wrong phrase is forbidden.
    let now = crypto::now_unix_ms().to_string();
    let bad_proof = crypto::auth_proof("wrong-phrase", &now, &harness.fingerprint);
    let response = client
        .post(format!("{}/prepare-upload", base))
        .json(&handshake_body(now, bad_proof))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);

    // A fresh valid proof succeeds, and a second handshake returns the same
    // session instead of rotating it.
    let fresh = crypto::now_unix_ms().to_string();
    let proof = crypto::auth_proof(PHRASE, &fresh, &harness.fingerprint);
    let first: serde_json::Value = client
        .post(format!("{}/prepare-upload", base))
        .json(&handshake_body(fresh.clone(), proof.clone()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let second: serde_json::Value = client
        .post(format!("{}/prepare-upload", base))
        .json(&handshake_body(fresh, proof))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["sessionId"], second["sessionId"]);
    assert_eq!(first["files"].as_object().unwrap().len(), 1);

    // Downloads under any other session id are refused.
    let response = client
        .get(format!(
            "{}/download?sessionId=00000000-0000-0000-0000-000000000000&fileId={}",
            base,
            first["files"].as_object().unwrap().keys().next().unwrap()
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);
}

// ============================================================================
// Pairing Derivation Laws
// ============================================================================

#[test]
fn test_generated_phrases_validate_and_hash_stably() {
    for _ in 0..20 {
        let code = phrase::generate();
        assert!(phrase::validate(&code));
        assert_eq!(phrase::hash(&code), phrase::hash(&format!("  {}  ", code.to_uppercase())));
    }
}
