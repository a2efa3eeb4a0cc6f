use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{init_tracing, wait_for_processed_height},
    mock_rpc::{MockChain, MockRpcServer},
};
use anyhow::{Context, Result};
use rollstream::{IngestConfig, IngestEngine, MemoryLedger, NullSink};
use tokio::time::{sleep, timeout};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn engine_restarts_and_resumes_from_stored_progress() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(12);
    chain.set_tip_limit(5);
    let server = MockRpcServer::start(chain.clone()).await?;

    let config = IngestConfig::builder()
        .node("mock", server.url())
        .poll_interval(Duration::from_millis(50))
        .rpc_timeout(Duration::from_secs(2))
        .genesis_catchup(true)
        .build()?;
    let mut engine = IngestEngine::new(config, Arc::new(MemoryLedger::new()), Arc::new(NullSink))?;

    engine.start().await?;
    wait_for_processed_height(&engine, 5, Duration::from_secs(10)).await?;
    engine.stop().await?;

    chain.set_tip_limit(11);
    engine.start().await?;
    wait_for_processed_height(&engine, 11, Duration::from_secs(10)).await?;
    engine.stop().await?;

    assert_eq!(engine.chain().latest_height().await?, Some(11));
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn external_cancellation_ends_the_run() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(4);
    let server = MockRpcServer::start(chain.clone()).await?;

    let config = IngestConfig::builder()
        .node("mock", server.url())
        .poll_interval(Duration::from_millis(50))
        .rpc_timeout(Duration::from_secs(2))
        .build()?;
    let mut engine = IngestEngine::new(config, Arc::new(MemoryLedger::new()), Arc::new(NullSink))?;
    let token = engine.cancellation_token();

    let canceller = tokio::spawn(async move {
        sleep(Duration::from_millis(200)).await;
        token.cancel();
    });

    timeout(Duration::from_secs(10), engine.run_until_ctrl_c())
        .await
        .context("run did not end after cancellation")?
        .context("cancellation is a clean shutdown, not an error")?;

    canceller.await.expect("canceller task should join");
    server.shutdown().await;
    Ok(())
}
