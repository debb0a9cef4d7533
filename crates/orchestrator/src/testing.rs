//! Scripted collaborators for orchestrator tests.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use chain::{
    json,
    testing::{Behavior, FakeLedger},
    Keypair, TransactionSigner, Value,
};
use common::config::Config;
use db::{
    amount::Amount,
    deployment::Resources,
    lease::Lease,
    order::{ContainerSpec, Order, PortMapping, TrustLevel},
    provider::{Capacity, Provider},
};

use crate::{
    app::Orchestrator,
    market::{NewOrder, ProviderProfile},
    runtime::{ContainerRuntime, ContainerState, LaunchSpec, RuntimeError},
};

/// Scripted result of a container inspection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Inspection {
    Running,
    Exited(i64),
    Missing,

    /// Inspection never completes.
    Hang,
}

#[derive(Default)]
struct RuntimeState {
    fail_create: bool,
    inspection: Option<Inspection>,
    launched: Vec<(String, LaunchSpec)>,
    stopped: Vec<String>,
    removed: Vec<String>,
}

/// [`ContainerRuntime`] implementation with scripted behavior.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    pub fn fail_create(&self, fail: bool) {
        self.lock().fail_create = fail;
    }

    pub fn inspect_as(&self, inspection: Inspection) {
        self.lock().inspection = Some(inspection);
    }

    pub fn launched(&self) -> Vec<(String, LaunchSpec)> {
        self.lock().launched.clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.lock().stopped.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.lock().removed.clone()
    }

    fn lock(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().expect("fake runtime state poisoned")
    }

    fn known(&self, container_id: &str) -> Result<(), RuntimeError> {
        if self.lock().launched.iter().any(|(id, _)| id == container_id) {
            Ok(())
        } else {
            Err(RuntimeError::NotFound {
                container_id: container_id.to_string(),
            })
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_and_start(&self, spec: &LaunchSpec) -> Result<String, RuntimeError> {
        let mut state = self.lock();

        if state.fail_create {
            return Err(RuntimeError::Failure(String::from("image pull failed")));
        }

        let id = format!("container-{}", state.launched.len() + 1);
        state.launched.push((id.clone(), spec.clone()));

        Ok(id)
    }

    async fn stop(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.known(container_id)?;
        self.lock().stopped.push(container_id.to_string());
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.known(container_id)?;
        self.lock().removed.push(container_id.to_string());
        Ok(())
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerState, RuntimeError> {
        let inspection = self.lock().inspection.unwrap_or(Inspection::Running);

        match inspection {
            Inspection::Running => Ok(ContainerState::Running {
                started_at: Some(String::from("2024-01-01T00:00:00Z")),
                stats: Some(Resources {
                    cpu_percent: 12.5,
                    memory_mb: 64.0,
                    storage_mb: None,
                }),
            }),
            Inspection::Exited(exit_code) => Ok(ContainerState::Exited { exit_code }),
            Inspection::Missing => Err(RuntimeError::NotFound {
                container_id: container_id.to_string(),
            }),
            Inspection::Hang => std::future::pending().await,
        }
    }

    async fn logs(&self, container_id: &str, _tail: usize) -> Result<String, RuntimeError> {
        self.known(container_id)?;
        Ok(String::from("2024-01-01T00:00:00Z listening on 0.0.0.0:80\n"))
    }
}

/// Contract state shared by scripted marketplace methods.
#[derive(Default)]
struct Book {
    orders: BTreeMap<u64, Value>,
    bids: u64,
    providers: BTreeMap<u64, Value>,
}

fn id_arg(args: &[Value], index: usize) -> Result<u64, String> {
    args.get(index)
        .and_then(Value::as_u64)
        .ok_or_else(|| format!("argument {index} is not an identifier"))
}

fn str_arg(args: &[Value], index: usize) -> Result<String, String> {
    args.get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| format!("argument {index} is not a string"))
}

/// Script order book, provider registry and escrow contract methods.
pub fn install_contracts(ledger: &FakeLedger) {
    let book = Arc::new(Mutex::new(Book::default()));

    let with_book = |f: fn(&mut Book, &[Value]) -> Result<Value, String>| {
        let book = book.clone();
        move |args: &[Value]| f(&mut book.lock().expect("book poisoned"), args)
    };

    ledger.respond(
        "create_order",
        Behavior::write_with(with_book(|book, args| {
            let id = book.orders.len() as u64 + 1;
            let max_price = str_arg(args, 0)?;

            book.orders.insert(
                id,
                json!({
                    "max_price": max_price,
                    "state": "Active",
                    "number_of_blocks": id_arg(args, 1)?,
                    "spec": {
                        "spec": str_arg(args, 3)?,
                        "trust_levels": args.get(4).cloned().unwrap_or_default(),
                        "quantity": id_arg(args, 2)?,
                        "max_price": max_price,
                    },
                }),
            );

            Ok(json!(id))
        })),
    );

    ledger.respond(
        "get_order",
        Behavior::read_with(with_book(|book, args| {
            book.orders
                .get(&id_arg(args, 0)?)
                .cloned()
                .ok_or_else(|| String::from("order not found"))
        })),
    );

    ledger.respond(
        "update_order_to_closed",
        Behavior::write_with(with_book(|book, args| {
            let order = book
                .orders
                .get_mut(&id_arg(args, 0)?)
                .ok_or_else(|| String::from("order not found"))?;
            order["state"] = json!("Closed");
            Ok(Value::Null)
        })),
    );

    ledger.respond(
        "place_bid",
        Behavior::write_with(with_book(|book, _| {
            book.bids += 1;
            Ok(json!(book.bids))
        })),
    );

    ledger.respond("accept_bid", Behavior::write(Value::Null));

    ledger.respond(
        "add_provider",
        Behavior::write_with(with_book(|book, args| {
            let id = book.providers.len() as u64 + 1;

            book.providers.insert(
                id,
                json!({
                    "address": str_arg(args, 0)?,
                    "trust_level": "One",
                    "status": "Registered",
                }),
            );

            Ok(json!(id))
        })),
    );

    ledger.respond(
        "get_provider",
        Behavior::read_with(with_book(|book, args| {
            book.providers
                .get(&id_arg(args, 0)?)
                .cloned()
                .ok_or_else(|| String::from("provider not found"))
        })),
    );

    ledger.respond(
        "get_provider_by_address",
        Behavior::read_with(with_book(|book, args| {
            let address = str_arg(args, 0)?;

            book.providers
                .iter()
                .find(|(_, provider)| provider["address"] == address.as_str())
                .map(|(id, provider)| json!([id, provider]))
                .ok_or_else(|| String::from("provider not found"))
        })),
    );

    ledger.respond(
        "set_provider_status",
        Behavior::write_with(with_book(|book, args| {
            let provider = book
                .providers
                .get_mut(&id_arg(args, 1)?)
                .ok_or_else(|| String::from("provider not found"))?;
            provider["status"] = args.get(2).cloned().unwrap_or_default();
            Ok(Value::Null)
        })),
    );

    for method in ["deposit", "withdraw", "lock", "unlock_tokens", "transfer_locked"] {
        ledger.respond(method, Behavior::write(Value::Null));
    }

    ledger.respond("withdraw_provider_earnings", Behavior::write(json!("12.5")));

    ledger.respond(
        "get_tenant_balance",
        Behavior::read(json!({"locked_balance": "10", "unlocked_balance": "5.5"})),
    );

    ledger.respond(
        "get_provider_earnings",
        Behavior::read(json!({"earned": "20", "withdrawn": "7.5", "balance": "12.5"})),
    );
}

/// Orchestrator wired to a scripted ledger and container runtime.
pub struct TestEnv {
    pub config: Config,
    pub ledger: Arc<FakeLedger>,
    pub runtime: Arc<FakeRuntime>,
    pub orchestrator: Orchestrator,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_config(Config::for_tests())
    }

    pub fn with_config(config: Config) -> Self {
        let ledger = Arc::new(FakeLedger::new());
        ledger.set_latest_ledger(100);
        install_contracts(&ledger);

        let adapter = Arc::new(ledger.adapter(&config.ledger));
        let runtime = Arc::new(FakeRuntime::default());
        let orchestrator = Orchestrator::new(&config, adapter, runtime.clone());

        Self {
            config,
            ledger,
            runtime,
            orchestrator,
        }
    }

    pub fn tenant() -> Keypair {
        Keypair::from_seed([1; 32])
    }

    pub fn provider_account() -> Keypair {
        Keypair::from_seed([2; 32])
    }

    pub fn specification() -> ContainerSpec {
        ContainerSpec {
            image: String::from("nginx:1.25"),
            cpu: 2.0,
            memory: 4,
            storage: None,
            env: BTreeMap::new(),
            ports: vec![PortMapping {
                container_port: 80,
                host_port: Some(8080),
                protocol: None,
            }],
            volumes: Vec::new(),
            command: None,
            args: None,
        }
    }

    pub async fn order(&self) -> Order {
        self.orchestrator
            .market
            .create_order(
                &Self::tenant(),
                NewOrder {
                    max_price: "5".parse().unwrap(),
                    specification: Self::specification(),
                    trust_levels: vec![TrustLevel::One],
                    quantity: 1,
                    duration_blocks: 720,
                },
            )
            .await
            .unwrap()
    }

    pub async fn provider(&self) -> Provider {
        self.orchestrator
            .market
            .register_provider(
                &Self::provider_account(),
                ProviderProfile {
                    hostname: Some(String::from("node.example.com")),
                    capacity: Capacity {
                        cpu: 8.0,
                        memory: 16384,
                        storage: 100_000,
                    },
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }

    /// Run the order, bid and acceptance flow, returning the resulting lease.
    pub async fn lease(&self) -> Lease {
        let order = self.order().await;
        let provider = self.provider().await;

        let bid = self
            .orchestrator
            .market
            .place_bid(
                &Self::provider_account(),
                order.id,
                provider.id,
                "4.5".parse::<Amount>().unwrap(),
            )
            .await
            .unwrap();

        self.orchestrator
            .accept_bid(&Self::tenant(), bid.id)
            .await
            .unwrap()
    }

    pub fn tenant_address() -> String {
        Self::tenant().address().to_string()
    }

    pub fn provider_address() -> String {
        Self::provider_account().address().to_string()
    }
}
