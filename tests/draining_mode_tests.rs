mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio::time::sleep;

use p2pflow::{
    DrainingSnapshot, Envelope, FileHoldingStore, FlowContext, FlowLogic, FlowState,
    HoldingStore, InMemoryNetwork, MemoryHoldingStore, Node, PeerId, SessionKey, SessionState,
};

use common::{
    echo_responders, node_pair, pair, test_config, wait_until, CreationLog, InitiateSessionFlow,
    INITIATOR,
};

#[tokio::test]
async fn flows_draining_mode_suspends_consumption_of_initial_session_messages(
) -> anyhow::Result<()> {
    let common::Pair {
        initiating,
        initiated,
        created,
        ..
    } = pair();

    initiated.set_flows_draining_mode_enabled(true);
    assert!(initiated.is_flows_draining_mode_enabled());

    let should_fail = Arc::new(AtomicBool::new(true));
    let handle = initiating.start(InitiateSessionFlow::new(initiated.identity()));
    let flow_id = handle.id();

    let toggler = {
        let initiated = initiated.clone();
        let should_fail = Arc::clone(&should_fail);
        tokio::spawn(async move {
            sleep(Duration::from_secs(5)).await;
            should_fail.store(false, Ordering::SeqCst);
            initiated.set_flows_draining_mode_enabled(false);
        })
    };

    wait_until("initiate to be held", || initiated.held_initiation_count() == 1).await;
    wait_until("initiating flow to suspend", || {
        initiating.flow_state(flow_id) == Some(FlowState::Suspended)
    })
    .await;
    assert_eq!(created.len(), 0);
    assert_eq!(initiated.outstanding_flow_count(), 0);
    assert_eq!(initiating.outstanding_flow_count(), 1);

    let answer: String = handle.result_as().await?;
    assert!(
        !should_fail.load(Ordering::SeqCst),
        "flow finished before draining mode was switched off"
    );
    assert_eq!(answer, "Hi there answer");
    assert_eq!(created.len(), 1);
    toggler.await?;
    Ok(())
}

#[tokio::test]
async fn exchange_without_draining_completes_immediately() -> anyhow::Result<()> {
    let pair = pair();
    assert!(!pair.initiated.is_flows_draining_mode_enabled());

    let handle = pair
        .initiating
        .start(InitiateSessionFlow::new(pair.initiated.identity()));
    let answer: String = tokio::time::timeout(Duration::from_secs(2), handle.result_as()).await??;

    assert_eq!(answer, "Hi there answer");
    assert_eq!(pair.initiated.held_initiation_count(), 0);
    assert_eq!(pair.created.len(), 1);
    wait_until("flows to finish", || {
        pair.initiating.outstanding_flow_count() == 0 && pair.initiated.outstanding_flow_count() == 0
    })
    .await;
    Ok(())
}

#[tokio::test]
async fn held_initiations_are_released_in_arrival_order() -> anyhow::Result<()> {
    let pair = pair();
    pair.initiated.set_flows_draining_mode_enabled(true);

    let first = pair.initiating.start(
        InitiateSessionFlow::new(pair.initiated.identity()).with_greeting("M1"),
    );
    wait_until("M1 held", || pair.initiated.held_initiation_count() == 1).await;
    let second = pair.initiating.start(
        InitiateSessionFlow::new(pair.initiated.identity()).with_greeting("M2"),
    );
    wait_until("M2 held", || pair.initiated.held_initiation_count() == 2).await;

    let held = pair.initiated.held_sessions();
    assert_eq!(pair.created.len(), 0);

    pair.initiated.set_flows_draining_mode_enabled(false);
    assert_eq!(pair.initiated.held_initiation_count(), 0);

    assert_eq!(first.result_as::<String>().await?, "M1 answer");
    assert_eq!(second.result_as::<String>().await?, "M2 answer");
    assert_eq!(pair.created.entries(), held);
    Ok(())
}

#[tokio::test]
async fn every_held_initiation_is_processed_exactly_once() -> anyhow::Result<()> {
    let pair = node_pair(InMemoryNetwork::new().with_redelivery(), test_config());
    pair.initiated.set_flows_draining_mode_enabled(true);

    let mut handles = Vec::new();
    for index in 0..8 {
        handles.push(pair.initiating.start(
            InitiateSessionFlow::new(pair.initiated.identity()).with_greeting(format!("M{index}")),
        ));
        wait_until("initiate held", || {
            pair.initiated.held_initiation_count() == index + 1
        })
        .await;
    }
    let held = pair.initiated.held_sessions();
    assert_eq!(held.len(), 8);

    pair.initiated.set_flows_draining_mode_enabled(false);
    for (index, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.result_as::<String>().await?, format!("M{index} answer"));
    }
    assert_eq!(pair.created.entries(), held);
    Ok(())
}

#[tokio::test]
async fn toggling_is_idempotent() -> anyhow::Result<()> {
    let pair = pair();
    pair.initiated.set_flows_draining_mode_enabled(true);
    pair.initiated.set_flows_draining_mode_enabled(true);

    let handle = pair
        .initiating
        .start(InitiateSessionFlow::new(pair.initiated.identity()));
    wait_until("initiate held", || pair.initiated.held_initiation_count() == 1).await;

    pair.initiated.set_flows_draining_mode_enabled(true);
    assert_eq!(pair.initiated.held_initiation_count(), 1);

    pair.initiated.set_flows_draining_mode_enabled(false);
    pair.initiated.set_flows_draining_mode_enabled(false);
    assert_eq!(handle.result_as::<String>().await?, "Hi there answer");
    assert_eq!(pair.created.len(), 1);
    assert!(!pair.initiated.is_flows_draining_mode_enabled());
    Ok(())
}

/// 多轮对话：第一轮后等待外部信号再继续
struct ConversationFlow {
    counterparty: PeerId,
    first_round_done: Arc<AtomicBool>,
    proceed: Arc<Notify>,
}

#[async_trait]
impl FlowLogic for ConversationFlow {
    fn name(&self) -> &str {
        common::INITIATOR
    }

    async fn call(&self, ctx: &mut FlowContext) -> p2pflow::Result<Value> {
        let session = ctx.initiate_flow(self.counterparty.clone())?;
        let mut answers = Vec::new();
        let first: String = ctx.send_and_receive(&session, "round 1").await?;
        answers.push(first);
        self.first_round_done.store(true, Ordering::SeqCst);
        self.proceed.notified().await;
        for round in 2..=3 {
            let answer: String = ctx
                .send_and_receive(&session, &format!("round {round}"))
                .await?;
            answers.push(answer);
        }
        Ok(json!(answers))
    }
}

#[tokio::test]
async fn established_sessions_ignore_later_draining() -> anyhow::Result<()> {
    let pair = pair();
    let first_round_done = Arc::new(AtomicBool::new(false));
    let proceed = Arc::new(Notify::new());

    let handle = pair.initiating.start(ConversationFlow {
        counterparty: pair.initiated.identity().clone(),
        first_round_done: Arc::clone(&first_round_done),
        proceed: Arc::clone(&proceed),
    });
    wait_until("first round", || first_round_done.load(Ordering::SeqCst)).await;

    let session = pair.created.entries()[0].clone();
    assert_eq!(
        pair.initiating.session_state(&session),
        Some(SessionState::Established)
    );

    pair.initiated.set_flows_draining_mode_enabled(true);
    proceed.notify_one();

    let answers: Vec<String> = handle.result_as().await?;
    assert_eq!(
        answers,
        vec!["round 1 answer", "round 2 answer", "round 3 answer"]
    );
    assert!(pair.initiated.is_flows_draining_mode_enabled());
    assert_eq!(pair.initiated.held_initiation_count(), 0);
    assert_eq!(pair.created.len(), 1);
    Ok(())
}

#[tokio::test]
async fn draining_state_survives_restart() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store_path = dir.path().join("draining.json");
    let mut config = test_config();
    config.draining.holding_store_path = Some(store_path.clone());

    let pair = node_pair(InMemoryNetwork::new(), config.clone());
    pair.initiated.set_flows_draining_mode_enabled(true);
    let _handle = pair
        .initiating
        .start(InitiateSessionFlow::new(pair.initiated.identity()));
    wait_until("initiate held", || pair.initiated.held_initiation_count() == 1).await;
    let held = pair.initiated.held_sessions();

    let restarted = Node::builder("O=Bank B")
        .with_config(config)
        .with_transport(Arc::new(pair.network.clone()))
        .with_holding_store(Arc::new(FileHoldingStore::new(store_path)))
        .build()?;
    assert!(restarted.is_flows_draining_mode_enabled());
    assert_eq!(restarted.held_sessions(), held);
    Ok(())
}

#[tokio::test]
async fn draining_mode_can_be_switched_off_from_a_plain_thread() -> anyhow::Result<()> {
    let pair = pair();
    pair.initiated.set_flows_draining_mode_enabled(true);
    let handle = pair
        .initiating
        .start(InitiateSessionFlow::new(pair.initiated.identity()));
    wait_until("initiate held", || pair.initiated.held_initiation_count() == 1).await;

    let initiated = pair.initiated.clone();
    std::thread::spawn(move || initiated.set_flows_draining_mode_enabled(false))
        .join()
        .expect("toggle thread");

    assert_eq!(pair.initiated.held_initiation_count(), 0);
    assert_eq!(pair.created.len(), 1);
    let answer: String =
        tokio::time::timeout(Duration::from_secs(3), handle.result_as()).await??;
    assert_eq!(answer, "Hi there answer");
    Ok(())
}

#[tokio::test]
async fn initiates_released_before_a_crash_are_delivered_on_restart() -> anyhow::Result<()> {
    let network = InMemoryNetwork::new();
    let key = SessionKey::new("O=Bank A", 77);
    let store = Arc::new(MemoryHoldingStore::new());
    store.save(&DrainingSnapshot {
        enabled: false,
        held: vec![Envelope::initiate(
            PeerId::new("O=Bank A"),
            PeerId::new("O=Bank B"),
            key.clone(),
            INITIATOR,
        )],
    })?;

    let created = CreationLog::default();
    let restarted = Node::builder("O=Bank B")
        .with_config(test_config())
        .with_transport(Arc::new(network.clone()))
        .with_responders(echo_responders(&created))
        .with_holding_store(store.clone())
        .build()?;

    assert!(!restarted.is_flows_draining_mode_enabled());
    assert_eq!(restarted.held_initiation_count(), 0);
    assert_eq!(created.entries(), vec![key]);
    let settled = store.snapshot().expect("snapshot saved");
    assert!(settled.held.is_empty());
    Ok(())
}
