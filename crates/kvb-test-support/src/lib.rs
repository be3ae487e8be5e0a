//! Shared test harness: spins up a real `kvb-broker` on a loopback port and
//! exposes a thin WS client for driving it from integration tests, rather
//! than testing handlers in isolation.

pub mod mock_client;

pub use mock_client::MockBrokerClient;

use kvb_broker::config::BrokerConfig;
use kvb_broker::AppState;

pub struct TestBroker {
    pub addr: std::net::SocketAddr,
    _data_dir: tempfile::TempDir,
}

impl TestBroker {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// Binds to an OS-assigned loopback port, builds a fresh `AppState` backed by
/// a throwaway temp directory, and serves it on a spawned task for the
/// lifetime of the test process.
pub async fn spawn_test_broker() -> TestBroker {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let config = BrokerConfig {
        port: 0,
        data_dir: data_dir.path().to_path_buf(),
    };
    let state = AppState::new(config).await.expect("broker state init");
    let router = kvb_broker::build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback port");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("test broker serve");
    });

    TestBroker { addr, _data_dir: data_dir }
}
