//! Integration tests for the screening run and the scan scheduler.
//!
//! Uses an in-memory `MarketDataSource`, so no network access is needed.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{rising, reversal, series, test_config, trading_day, MockSource};

use krx_screener::data::{Market, MarketDataSource};
use krx_screener::error::ScreeningError;
use krx_screener::scheduler::{ScanScheduler, ScanState};
use krx_screener::screener::{
    AnalysisResults, ScreeningPipeline, SnapshotStore, DEADLINE_RESULT_MESSAGE,
};

fn pipeline(source: MockSource, config: &krx_common::Config) -> ScreeningPipeline {
    let source: Arc<dyn MarketDataSource> = Arc::new(source);
    ScreeningPipeline::new(source, config.screener.clone())
}

fn tickers(rows: &[krx_screener::screener::ScreenedStock]) -> Vec<&str> {
    rows.iter().map(|r| r.ticker.as_str()).collect()
}

// ============================================================================
// Pipeline
// ============================================================================

#[tokio::test]
async fn test_run_ranks_passing_tickers() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let source = MockSource::new()
        .with_ticker("000001", "Steady Climber", series(&rising(40, 5000.0, 20.0), 100_000.0))
        .with_ticker("000002", "Rebound", series(&reversal(40), 100_000.0))
        .with_ticker("000003", "Thin Trade", series(&rising(40, 5000.0, 20.0), 10_000.0));

    let run = pipeline(source, &config).run(Market::Kospi, trading_day()).await.unwrap();

    assert_eq!(run.trading_date, trading_day());
    assert_eq!(run.stats.universe, 3);
    assert_eq!(run.stats.processed, 3);
    assert_eq!(run.stats.passed, 2);
    assert_eq!(run.stats.illiquid, 1);

    let views = run.results.views().expect("ranked views");
    assert_eq!(tickers(&views.top_risers), vec!["000002", "000001"]);
    assert_eq!(tickers(&views.top_fallers), vec!["000001", "000002"]);
    assert_eq!(tickers(&views.macd_golden_cross), vec!["000002"]);
    assert!(!tickers(&views.bb_breakout).contains(&"000001"));
    assert_eq!(views.top_risers[0].name, "Rebound");
}

#[tokio::test]
async fn test_only_eligible_ticker_survives() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let source = MockSource::new()
        .with_ticker("A00001", "A", series(&rising(40, 4900.0, 5.0), 100_000.0))
        .with_ticker("B00002", "B", series(&rising(10, 4900.0, 5.0), 100_000.0))
        .with_ticker("C00003", "C", series(&rising(40, 4900.0, 5.0), 10_000.0));

    let run = pipeline(source, &config).run(Market::Kospi, trading_day()).await.unwrap();

    assert_eq!(run.stats.passed, 1);
    assert_eq!(run.stats.insufficient_history, 1);
    assert_eq!(run.stats.illiquid, 1);

    let views = run.results.views().unwrap();
    assert_eq!(tickers(&views.top_risers), vec!["A00001"]);
    assert!(views.top_risers[0].change_pct > 0.0);
}

#[tokio::test]
async fn test_fetch_failure_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let source = MockSource::new()
        .with_failing("000001")
        .with_ticker("000002", "Climber", series(&rising(40, 5000.0, 20.0), 100_000.0));

    let run = pipeline(source, &config).run(Market::Kospi, trading_day()).await.unwrap();

    assert_eq!(run.stats.fetch_failed, 1);
    assert_eq!(run.stats.passed, 1);
    let views = run.results.views().unwrap();
    assert_eq!(tickers(&views.top_volume), vec!["000002"]);
}

#[tokio::test]
async fn test_views_are_capped_at_top_n() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let mut source = MockSource::new();
    for i in 0..15 {
        let ticker = format!("{:06}", i + 1);
        let step = 5.0 + i as f64;
        source = source.with_ticker(
            &ticker,
            &format!("Issue {}", i),
            series(&rising(40, 5000.0, step), 100_000.0 + i as f64),
        );
    }

    let run = pipeline(source, &config).run(Market::Kospi, trading_day()).await.unwrap();
    let views = run.results.views().unwrap();

    assert_eq!(views.top_risers.len(), 10);
    assert_eq!(views.top_fallers.len(), 10);
    assert_eq!(views.top_volume.len(), 10);
    assert_eq!(views.top_risers[0].ticker, "000015");
    assert_eq!(views.top_fallers[0].ticker, "000001");
    assert_eq!(views.top_volume[0].ticker, "000015");
    assert!(views
        .top_risers
        .windows(2)
        .all(|w| w[0].change_pct >= w[1].change_pct));
}

#[tokio::test]
async fn test_zero_reference_close_is_excluded() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let mut closes = rising(40, 5000.0, 20.0);
    closes[35] = 0.0;
    let source = MockSource::new()
        .with_ticker("000001", "Broken Print", series(&closes, 100_000.0))
        .with_ticker("000002", "Climber", series(&rising(40, 5000.0, 20.0), 100_000.0));

    let run = pipeline(source, &config).run(Market::Kospi, trading_day()).await.unwrap();

    assert_eq!(run.stats.zero_reference_close, 1);
    let views = run.results.views().unwrap();
    assert_eq!(tickers(&views.top_risers), vec!["000002"]);

    let json = serde_json::to_string(&run.results).unwrap();
    assert!(!json.contains("inf"));
    assert!(!json.contains("NaN"));
}

#[tokio::test]
async fn test_name_lookup_falls_back_to_ticker() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let source = MockSource::new().with_unnamed("000001", series(&rising(40, 5000.0, 20.0), 100_000.0));

    let run = pipeline(source, &config).run(Market::Kospi, trading_day()).await.unwrap();

    assert_eq!(run.stats.name_fallbacks, 1);
    let views = run.results.views().unwrap();
    assert_eq!(views.top_risers[0].name, "000001");
}

#[tokio::test]
async fn test_no_survivors_gives_empty_result() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let source = MockSource::new()
        .with_ticker("000001", "Short", series(&rising(20, 5000.0, 20.0), 100_000.0))
        .with_ticker("000002", "Cheap", series(&rising(40, 500.0, 1.0), 100_000.0));

    let run = pipeline(source, &config).run(Market::Kospi, trading_day()).await.unwrap();

    assert_eq!(run.stats.insufficient_history, 1);
    assert_eq!(run.stats.penny_stock, 1);
    assert_eq!(run.results, AnalysisResults::empty());
}

#[tokio::test]
async fn test_repeated_runs_are_identical() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let source = MockSource::new()
        .with_ticker("000001", "Climber", series(&rising(40, 5000.0, 20.0), 100_000.0))
        .with_ticker("000002", "Rebound", series(&reversal(40), 120_000.0));
    let pipeline = pipeline(source, &config);

    let first = pipeline.run(Market::Kospi, trading_day()).await.unwrap();
    let second = pipeline.run(Market::Kospi, trading_day()).await.unwrap();

    assert_eq!(first.results, second.results);
    assert_eq!(first.trading_date, second.trading_date);
}

#[tokio::test]
async fn test_universe_failure_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let source = Arc::new(MockSource::new().without_universe());
    let pipeline = ScreeningPipeline::new(source.clone(), config.screener.clone());

    let err = pipeline.run(Market::Kospi, trading_day()).await.unwrap_err();
    assert!(matches!(err, ScreeningError::UniverseUnavailable { market: Market::Kospi, .. }));
    assert_eq!(source.candle_calls(), 0);
}

#[tokio::test]
async fn test_ticker_delay_paces_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.screener.ticker_delay_ms = 100;

    let source = MockSource::new()
        .with_ticker("000001", "One", series(&rising(40, 5000.0, 20.0), 100_000.0))
        .with_ticker("000002", "Two", series(&rising(40, 5000.0, 30.0), 100_000.0))
        .with_ticker("000003", "Three", series(&rising(40, 5000.0, 40.0), 100_000.0));

    let started = Instant::now();
    let run = pipeline(source, &config).run(Market::Kospi, trading_day()).await.unwrap();

    assert_eq!(run.stats.passed, 3);
    assert!(
        started.elapsed() >= Duration::from_millis(300),
        "run took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_deadline_stops_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.screener.run_deadline_secs = Some(0);

    let source = Arc::new(
        MockSource::new()
            .with_ticker("000001", "One", series(&rising(40, 5000.0, 20.0), 100_000.0))
            .with_ticker("000002", "Two", series(&rising(40, 5000.0, 30.0), 100_000.0)),
    );
    let pipeline = ScreeningPipeline::new(source.clone(), config.screener.clone());

    let run = pipeline.run(Market::Kospi, trading_day()).await.unwrap();

    assert!(run.stats.deadline_hit);
    assert_eq!(run.stats.universe, 2);
    assert_eq!(run.stats.processed, 0);
    assert_eq!(source.candle_calls(), 0);
    assert_eq!(run.results, AnalysisResults::empty_with(DEADLINE_RESULT_MESSAGE));
    assert_ne!(run.results, AnalysisResults::empty());
}

// ============================================================================
// Scheduler
// ============================================================================

fn scheduler(source: MockSource, config: &krx_common::Config) -> (ScanScheduler, Arc<SnapshotStore>) {
    let store = Arc::new(SnapshotStore::new(&config.snapshot));
    let pipeline = Arc::new(pipeline(source, config));
    let scheduler =
        ScanScheduler::new(config.screener.clone(), Market::Kospi, pipeline, store.clone()).unwrap();
    (scheduler, store)
}

#[tokio::test]
async fn test_trigger_scan_persists_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let source = MockSource::new()
        .with_ticker("000001", "Climber", series(&rising(40, 5000.0, 20.0), 100_000.0));
    let (scheduler, store) = scheduler(source, &config);

    let snapshot = scheduler.trigger_scan().await.unwrap();
    let loaded = store.load(trading_day()).await.unwrap();
    assert_eq!(loaded, snapshot);

    let status = scheduler.status().await;
    assert_eq!(status.runs_completed, 1);
    assert_eq!(status.last_trading_date, Some(trading_day()));
    assert_eq!(status.scan, ScanState::Idle);
    assert!(status.last_error.is_none());
}

#[tokio::test]
async fn test_empty_result_is_still_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let source = MockSource::new()
        .with_ticker("000001", "Thin Trade", series(&rising(40, 5000.0, 20.0), 10.0));
    let (scheduler, store) = scheduler(source, &config);

    scheduler.trigger_scan().await.unwrap();
    let loaded = store.load(trading_day()).await.unwrap();
    assert_eq!(loaded.results, AnalysisResults::empty());
}

#[tokio::test]
async fn test_failed_run_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let (scheduler, store) = scheduler(MockSource::new().without_universe(), &config);

    assert!(scheduler.trigger_scan().await.is_err());
    assert!(store.load(trading_day()).await.unwrap_err().is_not_found());

    let status = scheduler.status().await;
    assert_eq!(status.runs_completed, 0);
    assert!(status.last_error.is_some());
    assert_eq!(status.scan, ScanState::Idle);
}

#[tokio::test]
async fn test_overlapping_run_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let source = MockSource::new()
        .with_ticker("000001", "Climber", series(&rising(40, 5000.0, 20.0), 100_000.0))
        .with_universe_delay(Duration::from_millis(300));
    let (scheduler, _store) = scheduler(source, &config);

    let handle = scheduler.spawn_scan().await.unwrap();
    assert_eq!(scheduler.scan_state(), ScanState::Running);
    assert!(matches!(
        scheduler.trigger_scan().await,
        Err(ScreeningError::AlreadyRunning)
    ));

    handle.await.unwrap().unwrap();
    assert_eq!(scheduler.scan_state(), ScanState::Idle);
    assert_eq!(scheduler.status().await.runs_completed, 1);
}

#[tokio::test]
async fn test_deadline_run_keeps_existing_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let source = || {
        MockSource::new()
            .with_ticker("000001", "Climber", series(&rising(40, 5000.0, 20.0), 100_000.0))
    };

    let (full, store) = scheduler(source(), &config);
    let saved = full.trigger_scan().await.unwrap();

    let mut rushed = config.clone();
    rushed.screener.run_deadline_secs = Some(0);
    let (cut_short, _) = scheduler(source(), &rushed);

    let returned = cut_short.trigger_scan().await.unwrap();
    assert_eq!(returned, saved);
    assert_eq!(store.load(trading_day()).await.unwrap(), saved);
}

#[tokio::test]
async fn test_deadline_run_without_snapshot_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.screener.run_deadline_secs = Some(0);
    let (scheduler, store) = scheduler(MockSource::new().with_failing("000001"), &config);

    scheduler.trigger_scan().await.unwrap();
    let loaded = store.load(trading_day()).await.unwrap();
    assert!(loaded.stats.deadline_hit);
    assert_eq!(loaded.results, AnalysisResults::empty_with(DEADLINE_RESULT_MESSAGE));
}

#[tokio::test(start_paused = true)]
async fn test_startup_scan_runs_after_delay() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.screener.enabled = true;
    config.screener.startup_delay_secs = 10;

    let source = Arc::new(
        MockSource::new()
            .with_ticker("000001", "Climber", series(&rising(40, 5000.0, 20.0), 100_000.0)),
    );
    let store = Arc::new(SnapshotStore::new(&config.snapshot));
    let pipeline = Arc::new(ScreeningPipeline::new(source.clone(), config.screener.clone()));
    let scheduler =
        ScanScheduler::new(config.screener.clone(), Market::Kospi, pipeline, store.clone()).unwrap();

    let handle = scheduler.spawn_startup_scan();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(source.universe_calls.load(Ordering::Relaxed), 0);
    assert!(!store.path_for(trading_day()).exists());

    handle.await.unwrap();
    assert_eq!(source.universe_calls.load(Ordering::Relaxed), 1);
    assert!(store.load(trading_day()).await.is_ok());
    assert_eq!(scheduler.status().await.runs_completed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_startup_scan_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let source = MockSource::new()
        .with_ticker("000001", "Climber", series(&rising(40, 5000.0, 20.0), 100_000.0));
    let (scheduler, store) = scheduler(source, &config);

    scheduler.spawn_startup_scan().await.unwrap();
    assert!(!store.path_for(trading_day()).exists());
    assert_eq!(scheduler.status().await.runs_completed, 0);
}

#[tokio::test]
async fn test_panicking_run_releases_guard() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let (scheduler, _store) = scheduler(MockSource::new().with_universe_panic(), &config);

    let handle = scheduler.spawn_scan().await.unwrap();
    assert!(handle.await.unwrap_err().is_panic());
    assert_eq!(scheduler.scan_state(), ScanState::Idle);
    assert_eq!(scheduler.status().await.scan, ScanState::Idle);

    let retry = scheduler.spawn_scan().await;
    assert!(retry.is_ok());
    assert!(retry.unwrap().await.unwrap_err().is_panic());
}
