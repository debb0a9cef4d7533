//! End-to-end orchestrator scenarios.

use std::time::Duration;

use chain::{testing::Behavior, ChainError, TransactionSigner};
use db::{
    bid,
    deployment::{Health, Status},
    lease, payment,
};

use crate::{
    app::AcceptError,
    deployment::DeploymentError,
    market::MarketError,
    escrow::EscrowError,
    lease::LeaseError,
    testing::{Inspection, TestEnv},
};

#[tokio::test]
async fn lease_happy_path() {
    let env = TestEnv::new();

    let order = env.order().await;
    assert_eq!(order.specification.cpu, 2.0);
    assert_eq!(order.specification.memory, 4);

    let provider = env.provider().await;

    let bid = env
        .orchestrator
        .market
        .place_bid(
            &TestEnv::provider_account(),
            order.id,
            provider.id,
            "4.5".parse().unwrap(),
        )
        .await
        .expect("unable to place bid");

    let lease = env
        .orchestrator
        .accept_bid(&TestEnv::tenant(), bid.id)
        .await
        .expect("unable to accept bid");

    assert_eq!(lease.state, lease::State::Active);
    assert_eq!(lease.order_id, order.id);
    assert_eq!(lease.provider_id, provider.id);

    let deployment = env.orchestrator.deployments.get(lease.id).await.unwrap();
    assert_eq!(deployment.status, Status::Running);

    let lease = env
        .orchestrator
        .leases
        .complete(lease.id)
        .await
        .expect("unable to complete lease");

    assert_eq!(lease.state, lease::State::Completed);

    let deployment = env.orchestrator.deployments.get(lease.id).await.unwrap();
    assert_eq!(deployment.status, Status::Stopped);

    assert!(matches!(
        env.orchestrator.leases.complete(lease.id).await,
        Err(LeaseError::InvalidTransition {
            from: lease::State::Completed,
            ..
        })
    ));
}

#[tokio::test]
async fn concurrent_acceptance_creates_one_lease() {
    let env = TestEnv::new();
    let order = env.order().await;
    let provider = env.provider().await;

    let bid = env
        .orchestrator
        .market
        .place_bid(
            &TestEnv::provider_account(),
            order.id,
            provider.id,
            "4.5".parse().unwrap(),
        )
        .await
        .expect("unable to place bid");

    let tenant = TestEnv::tenant();
    let (first, second) = tokio::join!(
        env.orchestrator.accept_bid(&tenant, bid.id),
        env.orchestrator.accept_bid(&tenant, bid.id),
    );

    let (accepted, rejected) = match (first, second) {
        (Ok(lease), Err(err)) | (Err(err), Ok(lease)) => (lease, err),
        (first, second) => panic!("unexpected results: {first:?}, {second:?}"),
    };

    assert!(matches!(
        rejected,
        AcceptError::Market(MarketError::BidNotActive {
            state: bid::State::Matched,
            ..
        })
    ));
    assert_eq!(
        env.orchestrator.leases.list_by_order(order.id).await.unwrap(),
        vec![env.orchestrator.leases.get(accepted.id).await.unwrap()]
    );
    assert_eq!(env.ledger.sent_count("accept_bid"), 1);
    assert_eq!(env.runtime.launched().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn supervisor_escalates_unrecoverable_deployment() {
    let env = TestEnv::new();
    let lease = env.lease().await;

    let deployment = env.orchestrator.deployments.get(lease.id).await.unwrap();
    assert_eq!(deployment.health, Health::Unknown);

    env.runtime.inspect_as(Inspection::Missing);
    env.runtime.fail_create(true);

    let supervisor = env.orchestrator.spawn_supervisor();

    // Health checks run every second, the first one immediately.
    tokio::time::sleep(Duration::from_millis(5500)).await;
    supervisor.abort();

    let deployment = env.orchestrator.deployments.get(lease.id).await.unwrap();

    assert_eq!(deployment.status, Status::Failed);
    assert!(deployment.escalated);
    assert_eq!(deployment.consecutive_failures, 3);
    assert_eq!(env.ledger.sent_count("lock"), 1);

    let lease = env.orchestrator.leases.get(lease.id).await.unwrap();
    assert_eq!(lease.state, lease::State::Active);
}

#[tokio::test]
async fn unconfirmed_payment_is_not_recorded() {
    let env = TestEnv::new();
    let lease = env.lease().await;
    let tenant = TestEnv::tenant();

    env.ledger
        .respond("transfer_locked", Behavior::NeverFinalize);

    let err = env
        .orchestrator
        .leases
        .process_payment(lease.id, "token", tenant.address(), "1".parse().unwrap(), &tenant)
        .await
        .unwrap_err();

    let err = match err {
        LeaseError::Escrow(err) => err,
        err => panic!("unexpected error: {err}"),
    };

    assert!(err.is_indeterminate());
    assert!(matches!(
        err,
        EscrowError::TransferFailed {
            cause: ChainError::Timeout { .. },
            ..
        }
    ));

    let payments = env.orchestrator.escrow.payments().await.unwrap();
    assert!(payments
        .iter()
        .all(|payment| payment.status != payment::Status::Completed
            || payment.kind != payment::Kind::Transfer));
}

#[tokio::test]
async fn canceled_lease_wins_over_health_checks() {
    let env = TestEnv::new();
    let lease = env.lease().await;

    env.runtime.inspect_as(Inspection::Exited(1));

    let (canceled, checked) = tokio::join!(
        env.orchestrator.leases.cancel(lease.id),
        env.orchestrator.deployments.check_health(lease.id),
    );

    assert_eq!(canceled.unwrap().state, lease::State::Canceled);

    match checked {
        Ok(deployment) => assert_eq!(deployment.consecutive_failures, 1),
        Err(err) => assert!(matches!(err, DeploymentError::Stopped(_))),
    }

    let deployment = env.orchestrator.deployments.get(lease.id).await.unwrap();
    assert_eq!(deployment.status, Status::Stopped);
}
