use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::support::{
    helpers::{
        assert_is_contiguous, discovered_heights, init_tracing, wait_for_dropped_tx,
        wait_for_processed_height,
    },
    mock_rpc::{MockChain, MockRpcServer},
};
use anyhow::{bail, Result};
use rollstream::{
    BufferedSink, ChainEvent, DropReason, IngestConfig, IngestEngine, MemoryLedger,
    PendingTxObservation, TxState,
};
use tokio::time::sleep;

fn base_config(url: &str) -> rollstream::IngestConfigBuilder {
    IngestConfig::builder()
        .node("mock", url)
        .poll_interval(Duration::from_millis(50))
        .rpc_timeout(Duration::from_secs(2))
        .sweep_interval(Duration::from_secs(30))
}

fn engine_over(
    config: IngestConfig,
    sink: Arc<BufferedSink>,
) -> Result<IngestEngine> {
    IngestEngine::new(config, Arc::new(MemoryLedger::new()), sink)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn catch_up_processes_blocks_in_order() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(14);
    let server = MockRpcServer::start(chain.clone()).await?;

    let sink = Arc::new(BufferedSink::new());
    let config = base_config(server.url()).genesis_catchup(true).build()?;
    let mut engine = engine_over(config, sink.clone())?;

    engine.start().await?;
    wait_for_processed_height(&engine, 13, Duration::from_secs(10)).await?;
    engine.stop().await?;
    server.shutdown().await;

    let heights = discovered_heights(&sink.drain().await);
    assert_eq!(heights.first(), Some(&0));
    assert_eq!(heights.last(), Some(&13));
    assert_is_contiguous(&heights);

    assert_eq!(engine.chain().latest_height().await?, Some(13));
    assert!(engine.fatal_error().is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn polling_follows_tip_advances() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(20);
    chain.set_tip_limit(5);
    let server = MockRpcServer::start(chain.clone()).await?;

    let sink = Arc::new(BufferedSink::new());
    let config = base_config(server.url()).genesis_catchup(true).build()?;
    let mut engine = engine_over(config, sink.clone())?;

    engine.start().await?;
    wait_for_processed_height(&engine, 5, Duration::from_secs(10)).await?;

    chain.advance_tip_by(14);
    wait_for_processed_height(&engine, 19, Duration::from_secs(10)).await?;

    engine.stop().await?;
    server.shutdown().await;

    let heights = discovered_heights(&sink.drain().await);
    assert_is_contiguous(&heights);
    assert_eq!(heights.last(), Some(&19));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn malformed_block_stalls_the_cursor_until_the_payload_heals() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(7);
    chain.mangle_block(3);
    let server = MockRpcServer::start(chain.clone()).await?;

    let sink = Arc::new(BufferedSink::new());
    let config = base_config(server.url()).genesis_catchup(true).build()?;
    let mut engine = engine_over(config, sink.clone())?;

    engine.start().await?;
    wait_for_processed_height(&engine, 2, Duration::from_secs(10)).await?;

    // The unparseable block at 3 is skipped with a log; the cursor must not
    // advance past it and nothing above 2 may be announced.
    sleep(Duration::from_millis(300)).await;
    assert_eq!(engine.processed_height(), Some(2));
    assert_eq!(engine.chain().latest_height().await?, Some(2));
    let heights = discovered_heights(&sink.drain().await);
    assert_eq!(heights.last(), Some(&2));
    assert!(engine.fatal_error().is_none());

    // Once the node serves a parseable payload, polling recovers in order.
    chain.heal_block(3);
    wait_for_processed_height(&engine, 6, Duration::from_secs(10)).await?;
    engine.stop().await?;
    server.shutdown().await;

    let heights = discovered_heights(&sink.drain().await);
    assert_eq!(heights.first(), Some(&3));
    assert_eq!(heights.last(), Some(&6));
    assert_is_contiguous(&heights);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reorg_is_reconciled_and_resurfaces_dropped_txs() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(12);
    let server = MockRpcServer::start(chain.clone()).await?;

    let sink = Arc::new(BufferedSink::new());
    let config = base_config(server.url()).genesis_catchup(true).build()?;
    let mut engine = engine_over(config, sink.clone())?;

    engine.start().await?;
    wait_for_processed_height(&engine, 11, Duration::from_secs(10)).await?;
    sink.drain().await;
    let orphaned_tx = chain.tx_hash_at(7).expect("height 7 should exist");

    // The node switches to a longer branch rooted at height 5.
    chain.force_reorg(5, 10)?;
    wait_for_processed_height(&engine, 15, Duration::from_secs(10)).await?;

    let events = sink.drain().await;
    let dropped: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            ChainEvent::DroppedTxs { txs } => Some(txs.clone()),
            _ => None,
        })
        .flatten()
        .collect();
    assert!(
        dropped
            .iter()
            .any(|tx| tx.reason == DropReason::Reorg && tx.tx_hash.to_string() == orphaned_tx),
        "orphaned tx {orphaned_tx} should surface in a DROPPED_TXS event"
    );
    assert!(
        dropped
            .iter()
            .all(|tx| tx.orphaned_tx_effect_hash.is_some() || tx.reason != DropReason::Reorg),
        "reorg drops must carry the orphaned effect hash"
    );

    // The fork branch carries a newer protocol version and the cache ratchets.
    assert_eq!(engine.chain().latest_height().await?, Some(15));
    assert_eq!(engine.chain().rollup_version().await?, Some(2));

    // Resubmitting the orphaned tx through the pending pool resurrects it.
    chain.set_pending(vec![PendingTxObservation {
        tx_hash: orphaned_tx.as_str().into(),
        fee_payer: "0xfee".into(),
    }]);
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(tx) = engine.tracker().tx_by_hash(&orphaned_tx.as_str().into()).await? {
            assert_eq!(tx.state, TxState::Pending);
            break;
        }
        if Instant::now() > deadline {
            bail!("orphaned tx was not resurrected within 10s");
        }
        sleep(Duration::from_millis(25)).await;
    }
    assert!(engine
        .tracker()
        .dropped_tx(&orphaned_tx.as_str().into())
        .await?
        .is_none());

    engine.stop().await?;
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stale_pending_txs_are_dropped_then_resurrected() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(2);
    let server = MockRpcServer::start(chain.clone()).await?;

    let sink = Arc::new(BufferedSink::new());
    let config = base_config(server.url())
        .genesis_catchup(true)
        .dropped_tx_age_threshold_ms(200)
        .dropped_tx_lookback_blocks(5)
        .sweep_interval(Duration::from_millis(100))
        .build()?;
    let mut engine = engine_over(config, sink.clone())?;

    chain.set_pending(vec![PendingTxObservation {
        tx_hash: "0xfeed01".into(),
        fee_payer: "0xfee".into(),
    }]);
    engine.start().await?;

    let tx_hash = "0xfeed01".into();
    let deadline = Instant::now() + Duration::from_secs(10);
    let birth = loop {
        if let Some(tx) = engine.tracker().tx_by_hash(&tx_hash).await? {
            break tx.birth_timestamp_ms;
        }
        if Instant::now() > deadline {
            bail!("pending tx was not observed within 10s");
        }
        sleep(Duration::from_millis(25)).await;
    };

    // The tx leaves the node's pool without ever being included; the sweep
    // eventually declares it stale.
    chain.set_pending(vec![]);
    wait_for_dropped_tx(engine.tracker(), &tx_hash, Duration::from_secs(10)).await?;
    let dropped = engine.tracker().dropped_tx(&tx_hash).await?.unwrap();
    assert_eq!(dropped.reason, DropReason::Stale);
    assert_eq!(dropped.created_at_ms, birth);

    // Resubmission resurrects it with the original birth timestamp.
    chain.set_pending(vec![PendingTxObservation {
        tx_hash: "0xfeed01".into(),
        fee_payer: "0xfee".into(),
    }]);
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(tx) = engine.tracker().tx_by_hash(&tx_hash).await? {
            assert_eq!(tx.state, TxState::Pending);
            assert_eq!(tx.birth_timestamp_ms, birth);
            break;
        }
        if Instant::now() > deadline {
            bail!("stale-dropped tx was not resurrected within 10s");
        }
        sleep(Duration::from_millis(25)).await;
    }

    let events = sink.drain().await;
    let pending_batches = events
        .iter()
        .filter(|event| event.kind() == "PENDING_TXS")
        .count();
    assert!(
        pending_batches >= 2,
        "initial observation and resurrection should each publish PENDING_TXS"
    );

    engine.stop().await?;
    server.shutdown().await;
    Ok(())
}
