//! # Tally Test Harness
//!
//! Shared infrastructure for integration tests: every test gets its own
//! temporary data directory and a ledger tuned for fast feedback (zero retry
//! backoff, small OCC budget), plus builders for the command maps the
//! scenarios submit over and over.
//!
//! ## Usage Pattern
//!
//! ```rust
//! let env = common::setup().await;
//! env.create_account("cash", "asset", "USD").await;
//! env.create_account("revenue", "revenue", "USD").await;
//!
//! let command = env.ledger.submit(common::create_transaction_map(
//!     "inv-1",
//!     "pending",
//!     &[("cash", 100, "USD"), ("revenue", 100, "USD")],
//! )).unwrap();
//! env.drain().await;
//! ```
//!
//! Tests run in parallel by default; the `TempDir` handle inside `TestEnv`
//! keeps each data directory alive until the test drops it.

use std::sync::{Arc, Once};
use tempfile::TempDir;

use tally::command_map::{AccountData, CommandMap, EntryData, Payload, TransactionData};
use tally::config::Config;
use tally::entities::Instance;
use tally::ledger::Ledger;
use tally::logging::{create_base_env_filter, create_subscriber_builder};

// Ensure tracing is initialized only once per test binary
static INIT: Once = Once::new();

fn init_test_tracing() {
    INIT.call_once(|| {
        // Use RUST_LOG if set, otherwise default to warn for tests
        let env_filter = create_base_env_filter("warn");
        let _ = create_subscriber_builder(env_filter).try_init();
    });
}

pub struct TestEnv {
    pub ledger: Arc<Ledger>,
    pub instance: Instance,
    _temp_dir: TempDir,
}

/// Ledger with fast-feedback tuning and a seeded `acme` instance.
pub async fn setup() -> TestEnv {
    init_test_tracing();
    let temp_dir = TempDir::new().expect("temp dir");

    let mut config = Config::default();
    config.ledger.data_dir = temp_dir
        .path()
        .join("ledger")
        .to_string_lossy()
        .into_owned();
    config.ledger.idempotency_secret = "integration-test-secret".into();
    config.queue.max_retries = 3;
    config.queue.retry_interval_ms = 0;
    config.queue.retry_backoff_cap_ms = 0;
    config.occ.max_occ_retries = 5;
    config.occ.backoff_base_ms = 0;
    config.worker.poll_interval_ms = 10;

    let ledger = Arc::new(Ledger::open(config).expect("open ledger"));
    let instance = ledger.create_instance("acme").expect("create instance");

    TestEnv {
        ledger,
        instance,
        _temp_dir: temp_dir,
    }
}

impl TestEnv {
    /// Create an account through the synchronous engine path.
    pub async fn create_account(&self, address: &str, account_type: &str, currency: &str) {
        self.ledger
            .execute_no_save(create_account_map(address, account_type, currency))
            .await
            .unwrap_or_else(|e| panic!("create account {}: {}", address, e));
    }

    /// Process runnable commands until the queue is quiet. Bounded so a
    /// misbehaving test fails instead of hanging.
    pub async fn drain(&self) -> usize {
        let mut processed = 0;
        for _ in 0..1000 {
            match self.ledger.process_next("test-worker").await.expect("process_next") {
                Some(_) => processed += 1,
                None => return processed,
            }
        }
        panic!("queue did not quiesce within 1000 rounds");
    }
}

pub fn entry(account_address: &str, amount: i64, currency: &str) -> EntryData {
    EntryData {
        account_address: Some(account_address.into()),
        amount: Some(amount),
        currency: Some(currency.into()),
    }
}

pub fn create_transaction_map(
    source_idempk: &str,
    status: &str,
    entries: &[(&str, i64, &str)],
) -> CommandMap {
    CommandMap {
        action: "create_transaction".into(),
        instance_address: "acme".into(),
        source: "billing".into(),
        source_idempk: source_idempk.into(),
        update_idempk: None,
        update_source: None,
        payload: Payload::Transaction(TransactionData {
            status: Some(status.into()),
            entries: entries
                .iter()
                .map(|(address, amount, currency)| entry(address, *amount, currency))
                .collect(),
        }),
    }
}

pub fn update_transaction_map(
    source_idempk: &str,
    update_idempk: &str,
    status: &str,
    entries: &[(&str, i64, &str)],
) -> CommandMap {
    CommandMap {
        action: "update_transaction".into(),
        instance_address: "acme".into(),
        source: "billing".into(),
        source_idempk: source_idempk.into(),
        update_idempk: Some(update_idempk.into()),
        update_source: None,
        payload: Payload::Transaction(TransactionData {
            status: Some(status.into()),
            entries: entries
                .iter()
                .map(|(address, amount, currency)| entry(address, *amount, currency))
                .collect(),
        }),
    }
}

pub fn create_account_map(address: &str, account_type: &str, currency: &str) -> CommandMap {
    CommandMap {
        action: "create_account".into(),
        instance_address: "acme".into(),
        source: "onboarding".into(),
        source_idempk: format!("acct-{}", address),
        update_idempk: None,
        update_source: None,
        payload: Payload::Account(AccountData {
            name: Some(address.into()),
            address: Some(address.into()),
            account_type: Some(account_type.into()),
            currency: Some(currency.into()),
            description: None,
        }),
    }
}

pub fn update_account_map(address: &str, update_idempk: &str, name: &str) -> CommandMap {
    CommandMap {
        action: "update_account".into(),
        instance_address: "acme".into(),
        source: "onboarding".into(),
        source_idempk: format!("acct-{}", address),
        update_idempk: Some(update_idempk.into()),
        update_source: None,
        payload: Payload::Account(AccountData {
            name: Some(name.into()),
            address: Some(address.into()),
            account_type: None,
            currency: None,
            description: None,
        }),
    }
}
