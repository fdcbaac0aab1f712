use std::{collections::BTreeSet, sync::Arc, time::Duration};

use chrono::Utc;
use focus_unlock::{
    blocking::{BlockingController, MemoryBlockingStore},
    client::TokenStoreClient,
    database::queries::SeaOrmStore,
    messaging::spawn_background,
    models::{ConsumeOutcome, ConsumeResponse, UnlockToken},
    poller::{PollerConfig, PollerState, UnlockPoller},
    rules::{BlockedPage, MemoryRuleEngine, RuleEngine, RuleSynchronizer},
    startup::build_router,
    state::AppState,
    test_utils::{memory_database, TEST_API_KEY},
    tokens::ManualClock,
};
use reqwest::StatusCode;
use secrecy::SecretString;
use tokio::{net::TcpListener, time::timeout};

const SITE: &str = "example.com";

struct TestServer {
    base_url: String,
    clock: Arc<ManualClock>,
}

impl TestServer {
    async fn spawn(ttl: chrono::Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let db = memory_database().await.unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let state = AppState::new(
            Arc::new(SeaOrmStore::<UnlockToken>::new(db)),
            clock.clone(),
            ttl,
            &base_url,
            SecretString::from(TEST_API_KEY),
        );
        let router = build_router(state, &[]);
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { base_url, clock }
    }

    fn client(&self) -> TokenStoreClient {
        TokenStoreClient::new(&self.base_url, SecretString::from(TEST_API_KEY)).unwrap()
    }
}

struct Device {
    controller: Arc<BlockingController<MemoryBlockingStore>>,
    synchronizer: RuleSynchronizer<MemoryRuleEngine>,
}

impl Device {
    async fn blocking(hosts: &[&str]) -> Self {
        let controller = Arc::new(BlockingController::new(MemoryBlockingStore::default()));
        for host in hosts {
            controller.add_blocked(host).await.unwrap();
        }
        let synchronizer = RuleSynchronizer::new(
            MemoryRuleEngine::default(),
            BlockedPage::new("chrome-extension://focus").unwrap(),
        );
        let device = Self {
            controller,
            synchronizer,
        };
        device.resync().await;
        device
    }

    async fn resync(&self) {
        let state = self.controller.load().await.unwrap();
        self.synchronizer.synchronize_state(&state).await.unwrap();
    }

    async fn redirected_hosts(&self) -> BTreeSet<String> {
        self.synchronizer
            .engine()
            .rules()
            .await
            .unwrap()
            .iter()
            .filter_map(|rule| rule.host().map(str::to_string))
            .collect()
    }
}

// The second device only opens the deep link and confirms
async fn scan(unlock_url: &str) -> (StatusCode, ConsumeResponse) {
    let response = reqwest::Client::new().post(unlock_url).send().await.unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

fn hosts(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|h| h.to_string()).collect()
}

#[tokio::test]
async fn scanned_code_unlocks_the_site() {
    let server = TestServer::spawn(chrono::Duration::minutes(5)).await;
    let device = Device::blocking(&[SITE]).await;
    assert_eq!(device.redirected_hosts().await, hosts(&[SITE]));

    let (background, _task) = spawn_background(Arc::clone(&device.controller));
    let poller = Arc::new(UnlockPoller::new(
        server.client(),
        background,
        PollerConfig {
            poll_interval: Duration::from_millis(50),
            navigate_delay: Duration::from_millis(10),
        },
    ));
    let mut states = poller.subscribe();
    let run = tokio::spawn({
        let poller = Arc::clone(&poller);
        async move { poller.run(SITE).await }
    });

    let unlock_url = match &*states
        .wait_for(|state| matches!(state, PollerState::Polling { .. }))
        .await
        .unwrap()
    {
        PollerState::Polling { unlock_url, .. } => unlock_url.clone(),
        other => panic!("unexpected state {other:?}"),
    };
    assert!(unlock_url.starts_with(&server.base_url));

    let (status, body) = scan(&unlock_url).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.message, "Sites unlocked! You can close this page.");

    let outcome = timeout(Duration::from_secs(10), run)
        .await
        .expect("poller did not finish")
        .unwrap();
    assert_eq!(
        outcome,
        PollerState::Unlocked {
            destination: "https://example.com".to_string()
        }
    );
    assert!(device
        .controller
        .load()
        .await
        .unwrap()
        .temporarily_unlocked
        .contains_key(SITE));

    device.resync().await;
    assert!(device.redirected_hosts().await.is_empty());

    // Scanning the same code again is rejected
    let (status, body) = scan(&unlock_url).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body.outcome, ConsumeOutcome::AlreadyConsumed);
}

#[tokio::test]
async fn late_scan_is_expired_and_the_site_stays_blocked() {
    let server = TestServer::spawn(chrono::Duration::seconds(1)).await;
    let device = Device::blocking(&[SITE]).await;

    let issued = server.client().issue().await.unwrap();
    server.clock.advance(chrono::Duration::seconds(2));

    let (status, body) = scan(&issued.unlock_url).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body.outcome, ConsumeOutcome::Expired);
    assert_eq!(body.message, "This token has expired");

    let status = server.client().status(&issued.token).await.unwrap();
    assert!(!status.consumed);

    device.resync().await;
    assert!(device
        .controller
        .load()
        .await
        .unwrap()
        .temporarily_unlocked
        .is_empty());
    assert_eq!(device.redirected_hosts().await, hosts(&[SITE]));
}

#[tokio::test]
async fn concurrent_scans_unlock_once() {
    let server = TestServer::spawn(chrono::Duration::minutes(5)).await;
    let issued = server.client().issue().await.unwrap();

    let scans: Vec<_> = (0..8)
        .map(|_| {
            let url = issued.unlock_url.clone();
            tokio::spawn(async move { scan(&url).await.1.outcome })
        })
        .collect();

    let mut outcomes = Vec::new();
    for scan in scans {
        outcomes.push(scan.await.unwrap());
    }

    let successes = outcomes.iter().filter(|o| o.is_success()).count();
    assert_eq!(successes, 1);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, ConsumeOutcome::Success | ConsumeOutcome::AlreadyConsumed)));
}

#[tokio::test]
async fn unknown_and_missing_tokens_are_rejected() {
    let server = TestServer::spawn(chrono::Duration::minutes(5)).await;

    let (status, body) = scan(&format!("{}/unlock?token=not-a-token", server.base_url)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body.message, "Invalid or expired token");

    let response = reqwest::get(format!("{}/unlock", server.base_url))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unblocking_an_unlocked_site_drops_its_rule() {
    let device = Device::blocking(&[SITE, "news.example.org"]).await;
    device.controller.temporary_unlock(SITE).await.unwrap();
    device.resync().await;
    assert_eq!(device.redirected_hosts().await, hosts(&["news.example.org"]));

    assert!(device.controller.remove_blocked(SITE).await.unwrap());
    device.resync().await;

    assert_eq!(device.redirected_hosts().await, hosts(&["news.example.org"]));
    let state = device.controller.load().await.unwrap();
    assert!(!state.blocked_hosts.contains(SITE));
    assert!(state.temporarily_unlocked.contains_key(SITE));

    assert!(device.controller.remove_blocked("news.example.org").await.unwrap());
    device.resync().await;
    assert!(device.redirected_hosts().await.is_empty());
}
