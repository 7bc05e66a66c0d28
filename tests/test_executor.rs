use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use intent_flow::db::{self, Db};
use intent_flow::error::{FlowError, FlowResult};
use intent_flow::execute::chain_client::ChainReader;
use intent_flow::execute::keystore::{KeyStore, SessionKeyMaterial};
use intent_flow::execute::signer::{Signer, SignerReceipt, SignerStatus};
use intent_flow::execute::{ExecuteRequest, ExecutionService};
use intent_flow::lock::memory::MemoryLockBackend;
use intent_flow::lock::LockManager;
use intent_flow::model::definition::{ActionKind, Intent, MovementIntent, PositionSide};
use intent_flow::model::entity::{KeyPermissions, TxStatus};
use intent_flow::oracle::sources::PriceSource;
use intent_flow::oracle::OracleValidator;

// ── Mocks ───────────────────────────────────────────────────────────

struct MockSigner {
    calls: Mutex<Vec<Intent>>,
    /// Fail every submission with a transient error when set.
    fail_transient: Mutex<bool>,
    delay: Option<Duration>,
}

impl MockSigner {
    fn ok() -> Arc<Self> {
        Arc::new(MockSigner {
            calls: Mutex::new(Vec::new()),
            fail_transient: Mutex::new(false),
            delay: None,
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(MockSigner {
            calls: Mutex::new(Vec::new()),
            fail_transient: Mutex::new(false),
            delay: Some(delay),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(MockSigner {
            calls: Mutex::new(Vec::new()),
            fail_transient: Mutex::new(true),
            delay: None,
        })
    }

    fn set_failing(&self, failing: bool) {
        *self.fail_transient.lock().unwrap() = failing;
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn calls(&self) -> Vec<Intent> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Signer for MockSigner {
    async fn submit(
        &self,
        intent: &Intent,
        _key: &SessionKeyMaterial,
    ) -> FlowResult<SignerReceipt> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if *self.fail_transient.lock().unwrap() {
            return Err(FlowError::signer("rpc unavailable", true));
        }
        self.calls.lock().unwrap().push(intent.clone());
        Ok(SignerReceipt {
            status: SignerStatus::Success,
            tx_hash: Some("0xhash".into()),
            description: None,
        })
    }
}

struct StaticKeyStore;

#[async_trait]
impl KeyStore for StaticKeyStore {
    async fn get(&self, _id: i64) -> FlowResult<Option<SessionKeyMaterial>> {
        Ok(Some(SessionKeyMaterial {
            public_key: "pk".into(),
            private_key: "sk".into(),
        }))
    }

    async fn put(&self, _id: i64, _material: &SessionKeyMaterial) -> FlowResult<()> {
        Ok(())
    }

    async fn delete(&self, _id: i64) -> FlowResult<()> {
        Ok(())
    }
}

struct MockChainReader {
    balance: f64,
    allowance: f64,
}

#[async_trait]
impl ChainReader for MockChainReader {
    async fn token_balance(&self, _chain: &str, _token: &str, _owner: &str) -> FlowResult<f64> {
        Ok(self.balance)
    }

    async fn allowance(
        &self,
        _chain: &str,
        _token: &str,
        _owner: &str,
        _spender: &str,
    ) -> FlowResult<f64> {
        Ok(self.allowance)
    }

    fn default_spender(&self, _chain: &str) -> Option<String> {
        Some("0xrouter".into())
    }
}

struct StaticSource {
    name: &'static str,
    price: f64,
}

#[async_trait]
impl PriceSource for StaticSource {
    fn name(&self) -> &str {
        self.name
    }

    async fn price(&self, _chain: &str, _token: &str) -> FlowResult<Option<f64>> {
        Ok(Some(self.price))
    }
}

// ── Harness ─────────────────────────────────────────────────────────

struct Harness {
    db: Db,
    locks: LockManager,
    service: Arc<ExecutionService>,
    signer: Arc<MockSigner>,
    user_id: i64,
    session_key_id: i64,
}

async fn harness_with(
    signer: Arc<MockSigner>,
    chain: MockChainReader,
    oracle_prices: (f64, f64),
    breaker_threshold: u32,
) -> Harness {
    let db = db::open_in_memory().unwrap();
    let user_id = db::users::insert(&db, "ext-1", "u@example.com").await.unwrap();
    let session_key_id =
        db::session_keys::insert(&db, user_id, "pk-1", &KeyPermissions::default(), None)
            .await
            .unwrap();

    let locks = LockManager::new(Arc::new(MemoryLockBackend::new()));
    let sources: Vec<Arc<dyn PriceSource>> = vec![
        Arc::new(StaticSource {
            name: "a",
            price: oracle_prices.0,
        }),
        Arc::new(StaticSource {
            name: "b",
            price: oracle_prices.1,
        }),
    ];
    let oracle = Arc::new(OracleValidator::new(
        db.clone(),
        sources,
        Duration::from_secs(5),
    ));

    let service = Arc::new(ExecutionService::new(
        db.clone(),
        locks.clone(),
        oracle,
        Arc::new(StaticKeyStore),
        Arc::new(chain),
        signer.clone(),
        30_000,
        breaker_threshold,
    ));

    Harness {
        db,
        locks,
        service,
        signer,
        user_id,
        session_key_id,
    }
}

async fn harness() -> Harness {
    harness_with(
        MockSigner::ok(),
        MockChainReader {
            balance: 0.0,
            allowance: f64::MAX,
        },
        (2000.0, 2010.0),
        0,
    )
    .await
}

fn custom_intent(name: &str) -> Intent {
    Intent::Custom {
        name: name.into(),
        parameters: json!({}),
    }
}

fn swap_intent(amount: f64, percentage: bool) -> Intent {
    Intent::Swap(MovementIntent {
        from_chain: "base".into(),
        to_chain: "base".into(),
        from_token: "0xUSDC".into(),
        to_token: "0xWETH".into(),
        from_amount: amount,
        user_address: "0xowner".into(),
        amount_in_is_percentage: percentage.then_some(true),
        slippage_bps: Some(50),
        destination_address: None,
    })
}

fn request(h: &Harness, intent: Intent, idempotency_key: &str) -> ExecuteRequest {
    ExecuteRequest {
        user_id: h.user_id,
        intent,
        session_key_id: h.session_key_id,
        idempotency_key: idempotency_key.into(),
    }
}

// ── Idempotency ─────────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_requests_sign_once() {
    let h = harness().await;
    let req = request(&h, custom_intent("noop"), "strategy:42:job:abc");

    let first = h.service.execute(req.clone()).await.unwrap();
    let second = h.service.execute(req).await.unwrap();

    assert_eq!(h.signer.call_count(), 1, "one signer invocation");
    assert_eq!(first.id, second.id, "both responses reference the same row");
    assert_eq!(first.status, TxStatus::Success);

    let logs = db::tx_logs::for_strategy(&h.db, 42).await.unwrap();
    assert_eq!(logs.len(), 1, "exactly one log row created");
}

#[tokio::test]
async fn concurrent_duplicates_sign_once() {
    let h = harness_with(
        MockSigner::slow(Duration::from_millis(150)),
        MockChainReader {
            balance: 0.0,
            allowance: f64::MAX,
        },
        (2000.0, 2010.0),
        0,
    )
    .await;

    let req = request(&h, custom_intent("noop"), "strategy:7:job:j1");
    let (a, b) = tokio::join!(
        h.service.execute(req.clone()),
        h.service.execute(req.clone())
    );

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.id, b.id);
    assert_eq!(h.signer.call_count(), 1, "lock plus recheck dedupes racers");
}

// ── Session key checks ──────────────────────────────────────────────

#[tokio::test]
async fn unknown_session_key_is_not_found() {
    let h = harness().await;
    let mut req = request(&h, custom_intent("noop"), "strategy:1:job:x");
    req.session_key_id = 9999;

    let err = h.service.execute(req).await.unwrap_err();
    assert!(matches!(err, FlowError::NotFound(_)));
    assert_eq!(h.signer.call_count(), 0);
}

#[tokio::test]
async fn out_of_scope_action_is_denied() {
    let h = harness().await;
    let restricted = KeyPermissions {
        actions: Some(vec![ActionKind::Swap]),
        ..Default::default()
    };
    let key_id = db::session_keys::insert(&h.db, h.user_id, "pk-2", &restricted, None)
        .await
        .unwrap();

    let mut req = request(
        &h,
        Intent::OpenPosition {
            chain: "hyperliquid".into(),
            market: "ETH".into(),
            side: PositionSide::Long,
            size: 10.0,
            leverage: 2.0,
            slippage: None,
        },
        "strategy:1:job:x",
    );
    req.session_key_id = key_id;

    let err = h.service.execute(req).await.unwrap_err();
    assert!(matches!(err, FlowError::PermissionDenied(_)));
    assert_eq!(h.signer.call_count(), 0);
}

#[tokio::test]
async fn out_of_scope_chain_is_denied() {
    let h = harness().await;
    let restricted = KeyPermissions {
        chains: Some(vec!["arbitrum".into()]),
        ..Default::default()
    };
    let key_id = db::session_keys::insert(&h.db, h.user_id, "pk-3", &restricted, None)
        .await
        .unwrap();

    let mut req = request(&h, swap_intent(100.0, false), "strategy:1:job:x");
    req.session_key_id = key_id;

    let err = h.service.execute(req).await.unwrap_err();
    assert!(matches!(err, FlowError::PermissionDenied(_)));
}

#[tokio::test]
async fn expired_session_key_is_denied() {
    let h = harness().await;
    let expired_at = Utc::now() - chrono::Duration::hours(1);
    let key_id = db::session_keys::insert(
        &h.db,
        h.user_id,
        "pk-4",
        &KeyPermissions::default(),
        Some(expired_at),
    )
    .await
    .unwrap();

    let mut req = request(&h, custom_intent("noop"), "strategy:1:job:x");
    req.session_key_id = key_id;

    let err = h.service.execute(req).await.unwrap_err();
    assert!(matches!(err, FlowError::PermissionDenied(_)));
}

#[tokio::test]
async fn foreign_session_key_is_denied() {
    let h = harness().await;
    let other = db::users::insert(&h.db, "ext-2", "o@example.com").await.unwrap();
    let key_id = db::session_keys::insert(&h.db, other, "pk-5", &KeyPermissions::default(), None)
        .await
        .unwrap();

    let mut req = request(&h, custom_intent("noop"), "strategy:1:job:x");
    req.session_key_id = key_id;

    let err = h.service.execute(req).await.unwrap_err();
    assert!(matches!(err, FlowError::PermissionDenied(_)));
}

// ── Oracle gate ─────────────────────────────────────────────────────

#[tokio::test]
async fn oracle_deviation_vetoes_dispatch() {
    let h = harness_with(
        MockSigner::ok(),
        MockChainReader {
            balance: 0.0,
            allowance: f64::MAX,
        },
        (100.0, 130.0),
        0,
    )
    .await;

    let req = request(&h, swap_intent(100.0, false), "strategy:9:job:x");
    let log = h.service.execute(req).await.unwrap();

    assert_eq!(log.status, TxStatus::Failed);
    assert!(
        log.description.contains("deviation"),
        "description was: {}",
        log.description
    );
    assert_eq!(h.signer.call_count(), 0, "no signer call after veto");
}

#[tokio::test]
async fn custom_intents_skip_the_oracle() {
    // Wildly disagreeing sources must not block a non-price-sensitive intent.
    let h = harness_with(
        MockSigner::ok(),
        MockChainReader {
            balance: 0.0,
            allowance: f64::MAX,
        },
        (100.0, 900.0),
        0,
    )
    .await;

    let req = request(&h, custom_intent("noop"), "strategy:9:job:x");
    let log = h.service.execute(req).await.unwrap();
    assert_eq!(log.status, TxStatus::Success);
}

// ── Amount normalisation & allowance preflight ──────────────────────

#[tokio::test]
async fn percentage_amount_resolves_against_balance() {
    let h = harness_with(
        MockSigner::ok(),
        MockChainReader {
            balance: 1234.56,
            allowance: f64::MAX,
        },
        (2000.0, 2010.0),
        0,
    )
    .await;
    db::wallets::insert(&h.db, h.user_id, "base", "0xowner", None)
        .await
        .unwrap();

    let req = request(&h, swap_intent(50.0, true), "strategy:3:job:x");
    let log = h.service.execute(req).await.unwrap();
    assert_eq!(log.status, TxStatus::Success);

    let calls = h.signer.calls();
    assert_eq!(calls.len(), 1);
    match &calls[0] {
        Intent::Swap(m) => {
            assert_eq!(m.from_amount, 617.0, "floor(1234.56 * 50 / 100)");
            assert_eq!(m.amount_in_is_percentage, Some(false));
        }
        other => panic!("unexpected intent: {other:?}"),
    }
}

#[tokio::test]
async fn missing_wallet_fails_percentage_amount() {
    let h = harness_with(
        MockSigner::ok(),
        MockChainReader {
            balance: 1000.0,
            allowance: f64::MAX,
        },
        (2000.0, 2010.0),
        0,
    )
    .await;

    let req = request(&h, swap_intent(50.0, true), "strategy:3:job:x");
    let log = h.service.execute(req).await.unwrap();

    assert_eq!(log.status, TxStatus::Failed);
    assert!(log.description.contains("wallet"));
    assert_eq!(h.signer.call_count(), 0);
}

#[tokio::test]
async fn insufficient_allowance_emits_approval_first() {
    let h = harness_with(
        MockSigner::ok(),
        MockChainReader {
            balance: 0.0,
            allowance: 0.0,
        },
        (2000.0, 2010.0),
        0,
    )
    .await;

    let req = request(&h, swap_intent(100.0, false), "strategy:5:job:x");
    let log = h.service.execute(req).await.unwrap();
    assert_eq!(log.status, TxStatus::Success);

    let calls = h.signer.calls();
    assert_eq!(calls.len(), 2, "approval then main intent");
    match &calls[0] {
        Intent::Custom { name, parameters } => {
            assert_eq!(name, "erc20-approve");
            assert_eq!(parameters["spender"], "0xrouter");
        }
        other => panic!("expected approval first, got {other:?}"),
    }
    assert!(matches!(calls[1], Intent::Swap(_)));

    // Both rows share the idempotency key; the lookup resolves to the main
    // execution row, not the approval.
    let logs = db::tx_logs::for_strategy(&h.db, 5).await.unwrap();
    assert_eq!(logs.len(), 2);
    for row in &logs {
        assert_eq!(row.details["idempotencyKey"], "strategy:5:job:x");
    }
    let found = db::tx_logs::find_by_idempotency_key(&h.db, "strategy:5:job:x")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, log.id);
    assert_eq!(found.details["kind"], "execution");
}

// ── Transient failures & circuit breaker ────────────────────────────

#[tokio::test]
async fn transient_signer_failure_leaves_no_log() {
    let h = harness_with(
        MockSigner::failing(),
        MockChainReader {
            balance: 0.0,
            allowance: f64::MAX,
        },
        (2000.0, 2010.0),
        0,
    )
    .await;

    let req = request(&h, custom_intent("noop"), "strategy:11:job:x");
    let err = h.service.execute(req.clone()).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(db::tx_logs::for_strategy(&h.db, 11).await.unwrap().is_empty());

    // The key is not poisoned: once the signer recovers, the retry lands.
    h.signer.set_failing(false);
    let log = h.service.execute(req).await.unwrap();
    assert_eq!(log.status, TxStatus::Success);
}

#[tokio::test]
async fn breaker_opens_after_consecutive_failures() {
    let h = harness_with(
        MockSigner::failing(),
        MockChainReader {
            balance: 0.0,
            allowance: f64::MAX,
        },
        (2000.0, 2010.0),
        2,
    )
    .await;

    for i in 0..2 {
        let req = request(&h, custom_intent("noop"), &format!("strategy:1:job:{i}"));
        assert!(h.service.execute(req).await.is_err());
    }

    // Signer recovers, but the open breaker fails fast.
    h.signer.set_failing(false);
    let req = request(&h, custom_intent("noop"), "strategy:1:job:after");
    let err = h.service.execute(req).await.unwrap_err();
    assert!(err.to_string().contains("circuit"), "got: {err}");
    assert_eq!(h.signer.call_count(), 0);
}

// ── Locking ─────────────────────────────────────────────────────────

#[tokio::test]
async fn execution_waits_out_a_short_lived_lock() {
    let h = harness().await;

    // Simulate a dying worker's leftover hold: short ttl, never released.
    let lock_key = format!("strategy-execute:{}", h.session_key_id);
    h.locks.acquire(&lock_key, 300).await.unwrap().unwrap();

    let req = request(&h, custom_intent("noop"), "strategy:2:job:x");
    let log = h.service.execute(req).await.unwrap();
    assert_eq!(log.status, TxStatus::Success);
}
