//! End-to-end tests: a real tracker and real peers on loopback sockets.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use peershare::conn::{ConnError, Connection};
use peershare::peer::{CycleOutcome, Registration, ServerStats};
use peershare::{FileServer, Message, Peer, PeerConfig, PeerError, Registry, Status, Tracker, TrackerConfig};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const T: Duration = Duration::from_secs(5);

async fn start_tracker(shutdown: &CancellationToken) -> (String, Arc<Registry>) {
    let tracker = Tracker::bind_to("127.0.0.1:0".parse().unwrap(), TrackerConfig::default())
        .await
        .unwrap();
    let addr = tracker.local_addr().unwrap().to_string();
    let registry = tracker.registry();
    tokio::spawn(tracker.run(shutdown.clone()));
    (addr, registry)
}

struct TestPeer {
    peer: Arc<Peer>,
    stats: Arc<ServerStats>,
    dir: TempDir,
}

impl TestPeer {
    fn addr(&self) -> &str {
        self.peer.address()
    }
}

/// A peer with its file server on an ephemeral port. `host` picks how the
/// peer names itself to the tracker.
async fn start_peer_as(
    host: &str,
    tracker_addr: &str,
    files: &[(&str, &[u8])],
    shutdown: &CancellationToken,
) -> TestPeer {
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in files {
        std::fs::write(dir.path().join(name), content).unwrap();
    }

    let config = PeerConfig::new(tracker_addr, 0, dir.path());
    let server = FileServer::bind_to("127.0.0.1:0".parse().unwrap(), &config)
        .await
        .unwrap();
    let port = server.local_addr().unwrap().port();
    let stats = server.stats();
    tokio::spawn(server.run(shutdown.clone()));

    let peer = Arc::new(Peer::new(format!("{host}:{port}"), config));
    TestPeer { peer, stats, dir }
}

async fn start_peer(
    tracker_addr: &str,
    files: &[(&str, &[u8])],
    shutdown: &CancellationToken,
) -> TestPeer {
    start_peer_as("127.0.0.1", tracker_addr, files, shutdown).await
}

/// An address nothing listens on.
async fn dead_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn share_list_and_download() {
    let shutdown = CancellationToken::new();
    let (tracker_addr, registry) = start_tracker(&shutdown).await;

    let content: &[u8] = b"hello world\n";
    assert_eq!(content.len(), 12);
    let peer1 = start_peer(&tracker_addr, &[("a.txt", content)], &shutdown).await;
    let peer2 = start_peer(&tracker_addr, &[], &shutdown).await;
    peer1.peer.register().await.unwrap();
    peer2.peer.register().await.unwrap();
    assert!(registry.is_registered(peer2.addr()));

    let files = peer2.peer.list().await.unwrap();
    assert_eq!(
        files,
        BTreeMap::from([("a.txt".to_owned(), vec![peer1.addr().to_owned()])])
    );

    let report = peer2
        .peer
        .download("a.txt", peer2.dir.path())
        .await
        .unwrap();
    assert_eq!(report.source, peer1.addr());
    assert_eq!(report.bytes, 12);
    assert_eq!(std::fs::read(peer2.dir.path().join("a.txt")).unwrap(), content);
    assert!(peer2.peer.known_files().contains("a.txt"));
    assert!(peer2.peer.active_peers().contains(peer1.addr()));

    wait_for(|| peer1.stats.transfers() == 1).await;
    assert_eq!(peer1.stats.bytes_sent(), 12);

    // the next cycle advertises the downloaded copy
    assert_eq!(
        peer2.peer.heartbeat_cycle().await.unwrap(),
        CycleOutcome::Registered
    );
    assert_eq!(registry.peers_for("a.txt").len(), 2);
    assert_eq!(
        peer2.peer.heartbeat_cycle().await.unwrap(),
        CycleOutcome::Heartbeat
    );

    shutdown.cancel();
}

#[tokio::test]
async fn missing_file_on_reachable_peer() {
    let shutdown = CancellationToken::new();
    let (tracker_addr, registry) = start_tracker(&shutdown).await;
    let holder = start_peer(&tracker_addr, &[], &shutdown).await;
    let fetcher = start_peer(&tracker_addr, &[], &shutdown).await;
    registry.register(holder.addr(), &["ghost.txt".to_owned()]);

    let err = fetcher
        .peer
        .download("ghost.txt", fetcher.dir.path())
        .await
        .unwrap_err();
    let PeerError::AllPeersFailed { attempts, last, .. } = err else {
        panic!("unexpected error {err:?}");
    };
    assert_eq!(attempts, 1);
    assert_eq!(last.status(), Some(&Status::FileNotFound));
    assert!(!fetcher.dir.path().join("ghost.txt").exists());
    assert_eq!(holder.stats.transfers(), 0);

    shutdown.cancel();
}

#[tokio::test]
async fn fails_over_to_next_peer() {
    let shutdown = CancellationToken::new();
    let (tracker_addr, registry) = start_tracker(&shutdown).await;

    // A accepts and hangs up straight away
    let broken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let broken_addr = broken.local_addr().unwrap().to_string();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = broken.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });

    // "localhost:..." sorts after "127.0.0.1:...", so A is tried first
    let good = start_peer_as("localhost", &tracker_addr, &[("f.bin", b"payload")], &shutdown).await;
    let fetcher = start_peer(&tracker_addr, &[], &shutdown).await;
    registry.register(&broken_addr, &["f.bin".to_owned()]);
    good.peer.register().await.unwrap();
    assert_eq!(
        registry.peers_for("f.bin"),
        vec![broken_addr.clone(), good.addr().to_owned()]
    );

    let report = fetcher
        .peer
        .download("f.bin", fetcher.dir.path())
        .await
        .unwrap();
    assert_eq!(report.source, good.addr());
    assert_eq!(
        std::fs::read(fetcher.dir.path().join("f.bin")).unwrap(),
        b"payload"
    );
    assert_eq!(accepted.load(Ordering::SeqCst), 1);

    shutdown.cancel();
}

#[tokio::test]
async fn every_peer_failing_reports_the_last() {
    let shutdown = CancellationToken::new();
    let (tracker_addr, registry) = start_tracker(&shutdown).await;
    let fetcher = start_peer(&tracker_addr, &[], &shutdown).await;

    let mut dead = vec![dead_addr().await, dead_addr().await];
    for addr in &dead {
        registry.register(addr, &["f.bin".to_owned()]);
    }
    dead.sort();

    let err = fetcher
        .peer
        .download("f.bin", fetcher.dir.path())
        .await
        .unwrap_err();
    let PeerError::AllPeersFailed { attempts, last, .. } = err else {
        panic!("unexpected error {err:?}");
    };
    assert_eq!(attempts, 2);
    match *last {
        PeerError::Conn(ConnError::Connect { addr, .. }) => assert_eq!(addr, dead[1]),
        other => panic!("unexpected last error {other:?}"),
    }
    assert!(!fetcher.dir.path().join("f.bin").exists());

    shutdown.cancel();
}

#[tokio::test]
async fn failed_download_keeps_existing_copy() {
    let shutdown = CancellationToken::new();
    let (tracker_addr, registry) = start_tracker(&shutdown).await;
    let fetcher = start_peer(&tracker_addr, &[("f.bin", b"the local copy")], &shutdown).await;

    // announces ten bytes, sends three, hangs up
    let short = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let short_addr = short.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (stream, _) = short.accept().await.unwrap();
        let mut stream = BufReader::new(stream);
        let mut request = String::new();
        stream.read_line(&mut request).await.unwrap();
        stream
            .get_mut()
            .write_all(b"{\"status\":\"ok\",\"size\":10}\nabc")
            .await
            .unwrap();
    });
    registry.register(&short_addr, &["f.bin".to_owned()]);

    let err = fetcher
        .peer
        .download("f.bin", fetcher.dir.path())
        .await
        .unwrap_err();
    let PeerError::AllPeersFailed { last, .. } = err else {
        panic!("unexpected error {err:?}");
    };
    assert!(matches!(
        *last,
        PeerError::Conn(ConnError::ShortTransfer {
            expected: 10,
            transferred: 3
        })
    ));

    assert_eq!(
        std::fs::read(fetcher.dir.path().join("f.bin")).unwrap(),
        b"the local copy"
    );
    let leftovers = std::fs::read_dir(fetcher.dir.path()).unwrap().count();
    assert_eq!(leftovers, 1);

    shutdown.cancel();
}

#[tokio::test]
async fn download_replaces_existing_copy() {
    let shutdown = CancellationToken::new();
    let (tracker_addr, _registry) = start_tracker(&shutdown).await;
    let holder = start_peer(&tracker_addr, &[("f.bin", b"fresh")], &shutdown).await;
    let fetcher = start_peer(&tracker_addr, &[("f.bin", b"an older, longer copy")], &shutdown).await;
    holder.peer.register().await.unwrap();

    let report = fetcher
        .peer
        .download("f.bin", fetcher.dir.path())
        .await
        .unwrap();
    assert_eq!(report.bytes, 5);
    assert_eq!(std::fs::read(fetcher.dir.path().join("f.bin")).unwrap(), b"fresh");
    assert_eq!(std::fs::read_dir(fetcher.dir.path()).unwrap().count(), 1);

    shutdown.cancel();
}

#[tokio::test]
async fn no_peers_for_unknown_file() {
    let shutdown = CancellationToken::new();
    let (tracker_addr, _registry) = start_tracker(&shutdown).await;
    let fetcher = start_peer(&tracker_addr, &[], &shutdown).await;

    let err = fetcher
        .peer
        .download("nothing.txt", fetcher.dir.path())
        .await
        .unwrap_err();
    assert!(matches!(err, PeerError::NoPeers { .. }));
    assert!(fetcher.peer.active_peers().is_empty());

    shutdown.cancel();
}

#[tokio::test]
async fn invalid_filename_never_reaches_tracker() {
    // nothing listens on the tracker address, so any network call would fail differently
    let tracker_addr = dead_addr().await;
    let shutdown = CancellationToken::new();
    let fetcher = start_peer(&tracker_addr, &[], &shutdown).await;

    let err = fetcher
        .peer
        .download("../escape", fetcher.dir.path())
        .await
        .unwrap_err();
    assert!(matches!(err, PeerError::InvalidFilename(_)));

    shutdown.cancel();
}

#[tokio::test]
async fn empty_file_downloads() {
    let shutdown = CancellationToken::new();
    let (tracker_addr, _registry) = start_tracker(&shutdown).await;
    let holder = start_peer(&tracker_addr, &[("empty", b"")], &shutdown).await;
    let fetcher = start_peer(&tracker_addr, &[], &shutdown).await;
    holder.peer.register().await.unwrap();

    let report = fetcher
        .peer
        .download("empty", fetcher.dir.path())
        .await
        .unwrap();
    assert_eq!(report.bytes, 0);
    assert!(fetcher.dir.path().join("empty").exists());

    shutdown.cancel();
}

#[tokio::test]
async fn reaped_peer_is_rejected_then_reregisters() {
    let shutdown = CancellationToken::new();
    let (tracker_addr, registry) = start_tracker(&shutdown).await;
    let peer = start_peer(&tracker_addr, &[("a.txt", b"abc")], &shutdown).await;
    peer.peer.register().await.unwrap();
    assert!(matches!(
        peer.peer.registration(),
        Registration::Registered { .. }
    ));

    let reaped = registry.reap(
        Instant::now() + Duration::from_secs(1000),
        TrackerConfig::default().stale_after(),
    );
    assert_eq!(reaped, vec![peer.addr().to_owned()]);
    assert!(registry.peers_for("a.txt").is_empty());
    assert!(peer.peer.list().await.unwrap().is_empty());

    let mut conn = Connection::connect(&tracker_addr, T).await.unwrap();
    let response = conn
        .request(Message::heartbeat(peer.addr()), T, T)
        .await
        .unwrap();
    assert_eq!(response.status(), Status::PeerNotRegistered);

    assert_eq!(
        peer.peer.heartbeat_cycle().await.unwrap(),
        CycleOutcome::Reregistered
    );
    assert_eq!(registry.peers_for("a.txt"), vec![peer.addr().to_owned()]);

    shutdown.cancel();
}

#[tokio::test]
async fn deleted_file_is_withdrawn() {
    let shutdown = CancellationToken::new();
    let (tracker_addr, registry) = start_tracker(&shutdown).await;
    let peer = start_peer(&tracker_addr, &[("a.txt", b"a"), ("b.txt", b"b")], &shutdown).await;
    peer.peer.register().await.unwrap();
    assert_eq!(registry.list().len(), 2);

    std::fs::remove_file(peer.dir.path().join("a.txt")).unwrap();
    assert_eq!(
        peer.peer.heartbeat_cycle().await.unwrap(),
        CycleOutcome::Registered
    );
    assert!(registry.peers_for("a.txt").is_empty());
    assert_eq!(registry.peers_for("b.txt"), vec![peer.addr().to_owned()]);

    shutdown.cancel();
}

#[tokio::test]
async fn start_survives_unreachable_tracker() {
    let shutdown = CancellationToken::new();
    let tracker_addr = dead_addr().await;
    let peer = start_peer(&tracker_addr, &[], &shutdown).await;

    let tasks = peer.peer.start(shutdown.clone()).await;
    assert_eq!(peer.peer.registration(), Registration::Unregistered);

    shutdown.cancel();
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn start_registers_with_tracker() {
    let shutdown = CancellationToken::new();
    let (tracker_addr, registry) = start_tracker(&shutdown).await;
    let peer = start_peer(&tracker_addr, &[("a.txt", b"abc")], &shutdown).await;

    let tasks = peer.peer.start(shutdown.clone()).await;
    assert_eq!(registry.peers_for("a.txt"), vec![peer.addr().to_owned()]);

    shutdown.cancel();
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn file_server_drops_other_commands() {
    let shutdown = CancellationToken::new();
    let (tracker_addr, _registry) = start_tracker(&shutdown).await;
    let peer = start_peer(&tracker_addr, &[("a.txt", b"abc")], &shutdown).await;

    let mut conn = Connection::connect(peer.addr(), T).await.unwrap();
    let result = conn.request(Message::list(), T, T).await;
    assert!(matches!(result, Err(ConnError::Closed)));

    shutdown.cancel();
}

#[tokio::test]
async fn file_server_refuses_traversal() {
    let shutdown = CancellationToken::new();
    let (tracker_addr, _registry) = start_tracker(&shutdown).await;
    let peer = start_peer(&tracker_addr, &[("a.txt", b"abc")], &shutdown).await;
    let outside = peer.dir.path().join("..").join("secret");
    let _ = std::fs::write(&outside, b"secret");

    let mut conn = Connection::connect(peer.addr(), T).await.unwrap();
    let response = conn
        .request(Message::download("../secret"), T, T)
        .await
        .unwrap();
    assert_eq!(response.status(), Status::FileNotFound);
    assert_eq!(peer.stats.transfers(), 0);

    let _ = std::fs::remove_file(&outside);
    shutdown.cancel();
}

#[tokio::test]
async fn tracker_survives_garbage() {
    let shutdown = CancellationToken::new();
    let (tracker_addr, registry) = start_tracker(&shutdown).await;

    let mut raw = tokio::net::TcpStream::connect(&tracker_addr).await.unwrap();
    raw.write_all(b"not json\n").await.unwrap();
    drop(raw);

    registry.register("10.0.0.1:9001", &["a.txt".to_owned()]);
    let mut conn = Connection::connect(&tracker_addr, T).await.unwrap();
    let response = conn.request(Message::list(), T, T).await.unwrap();
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.filemap["a.txt"], vec!["10.0.0.1:9001"]);

    shutdown.cancel();
}

#[tokio::test]
async fn server_address_is_reachable() {
    let shutdown = CancellationToken::new();
    let config = PeerConfig::default();
    let server = FileServer::bind_to("127.0.0.1:0".parse().unwrap(), &config)
        .await
        .unwrap();
    let addr: SocketAddr = server.local_addr().unwrap();
    tokio::spawn(server.run(shutdown.clone()));

    assert!(Connection::connect(&addr.to_string(), T).await.is_ok());
    shutdown.cancel();
}
