// Integration tests for `DisplayController`: readiness gating, the
// latest-wins slot, degraded mode and brightness handling.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::{Semaphore, mpsc};

use common::{CallLog, FakeDriver, settle, store};
use framecast_core::{
    AssetMessage, ConfigStore, ConfigUpdate, CoreConfig, DisplayController, DisplayMode,
    GateSignal,
};

// ── Helpers ─────────────────────────────────────────────────────────

struct Harness {
    display: DisplayController<FakeDriver>,
    signals: mpsc::UnboundedReceiver<GateSignal>,
    store: ConfigStore,
    log: CallLog,
}

fn harness_with(config: &CoreConfig, configure: impl FnOnce(FakeDriver) -> FakeDriver) -> Harness {
    let log = CallLog::default();
    let driver = configure(FakeDriver::new(log.clone()));
    let store = store();
    let (signals_tx, signals) = mpsc::unbounded_channel();
    let display = DisplayController::new(driver, store.subscribe(), config, signals_tx);
    Harness {
        display,
        signals,
        store,
        log,
    }
}

fn harness(configure: impl FnOnce(FakeDriver) -> FakeDriver) -> Harness {
    harness_with(&CoreConfig::default(), configure)
}

fn asset(payload: &[u8]) -> AssetMessage {
    AssetMessage::new(common::ASSET_TOPIC, payload.to_vec())
}

fn rendered_signals(rx: &mut mpsc::UnboundedReceiver<GateSignal>) -> usize {
    let mut count = 0;
    while let Ok(signal) = rx.try_recv() {
        if signal == GateSignal::AssetRendered {
            count += 1;
        }
    }
    count
}

// ── Buffering ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_assets_before_ready_render_latest_once() {
    let mut h = harness(|d| d);

    h.display.offer(asset(b"first"));
    h.display.offer(asset(b"second"));
    assert!(h.display.has_pending());
    assert!(h.log.matching("driver.render").is_empty());

    assert_eq!(h.display.init().await, DisplayMode::Hardware);
    settle(10).await;

    assert_eq!(h.display.driver().renders(), vec![b"second".to_vec()]);
    assert!(!h.display.has_pending());
    assert!(!h.display.is_busy());
    assert_eq!(rendered_signals(&mut h.signals), 1);

    // Draining again has nothing left to render.
    assert!(!h.display.drain_pending());
}

#[tokio::test(start_paused = true)]
async fn test_render_collapses_to_latest_while_busy() {
    let gate = Arc::new(Semaphore::new(0));
    let mut h = harness(|d| d.gated(Arc::clone(&gate)));
    h.display.init().await;

    h.display.offer(asset(b"a"));
    settle(1).await;
    assert!(h.display.is_busy());

    h.display.offer(asset(b"b"));
    h.display.offer(asset(b"c"));
    assert!(h.display.has_pending());

    gate.add_permits(8);
    settle(10).await;

    assert_eq!(
        h.display.driver().renders(),
        vec![b"a".to_vec(), b"c".to_vec()]
    );
    assert!(!h.display.is_busy());
    assert_eq!(rendered_signals(&mut h.signals), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_offer_racing_init_still_renders_latest_last() {
    for _ in 0..200 {
        let h = harness(|d| d);
        h.display.offer(asset(b"old"));

        let init = {
            let display = h.display.clone();
            tokio::spawn(async move { display.init().await })
        };
        h.display.offer(asset(b"new"));
        assert_eq!(init.await.unwrap(), DisplayMode::Hardware);

        tokio::time::timeout(Duration::from_secs(5), async {
            while h.display.is_busy() || h.display.has_pending() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(
            h.display.driver().renders().last().cloned(),
            Some(b"new".to_vec())
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_render_failure_drops_asset_and_recovers() {
    let mut h = harness(|d| d.failing_on(b"corrupt"));
    h.display.init().await;

    h.display.offer(asset(b"corrupt"));
    settle(10).await;
    assert!(!h.display.is_busy());
    assert!(h.display.driver().renders().is_empty());

    h.display.offer(asset(b"good"));
    settle(10).await;
    assert_eq!(h.display.driver().renders(), vec![b"good".to_vec()]);
    assert_eq!(rendered_signals(&mut h.signals), 1);
}

// ── Init ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_init_retries_then_succeeds() {
    let h = harness(|d| d.init_failures(2));
    let started = tokio::time::Instant::now();

    assert_eq!(h.display.init().await, DisplayMode::Hardware);
    assert_eq!(h.display.driver().init_calls(), 3);
    assert!(started.elapsed() >= Duration::from_millis(1_000));
}

#[tokio::test(start_paused = true)]
async fn test_degraded_mode_keeps_the_pipeline_moving() {
    let mut h = harness(|d| d.init_failures(u32::MAX));

    assert_eq!(h.display.init().await, DisplayMode::Degraded);
    assert_eq!(h.display.driver().init_calls(), 3);
    assert!(h.display.is_ready());

    h.display.offer(asset(b"frame"));
    settle(10).await;
    assert!(h.log.matching("driver.render").is_empty());
    assert!(!h.display.is_busy());
    assert_eq!(rendered_signals(&mut h.signals), 1);

    // Nothing to release in degraded mode.
    h.display.close().await;
    assert_eq!(h.log.count("driver.close"), 0);
}

// ── Close ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_close_before_init_is_safe() {
    let h = harness(|d| d);
    h.display.offer(asset(b"late"));

    h.display.close().await;
    h.display.close().await;

    assert!(h.display.is_closed());
    assert!(!h.display.has_pending());
    assert!(h.log.entries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_close_is_idempotent_and_clears_when_configured() {
    let config = CoreConfig {
        clear_on_close: true,
        ..CoreConfig::default()
    };
    let h = harness_with(&config, |d| d);
    h.display.init().await;

    h.display.close().await;
    h.display.close().await;

    assert_eq!(
        h.log.entries(),
        vec!["driver.init", "driver.clear", "driver.close"]
    );

    // Closed devices drop new assets.
    h.display.offer(asset(b"after"));
    settle(10).await;
    assert!(h.display.driver().renders().is_empty());
}

// ── Brightness ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_brightness_before_ready_applies_on_next_render() {
    let h = harness(|d| d);

    let settings = h.store.apply(&ConfigUpdate {
        brightness: Some(0.7),
        auto_shutdown_enabled: None,
    });
    h.display.set_brightness(settings.brightness).await;
    assert!(h.display.driver().brightness().is_empty());

    h.display.init().await;
    h.display.offer(asset(b"frame"));
    settle(10).await;

    assert_eq!(
        h.log.entries(),
        vec!["driver.init", "driver.brightness 0.7", "driver.render"]
    );

    // Unchanged brightness is not pushed again.
    h.display.offer(asset(b"frame2"));
    settle(10).await;
    assert_eq!(h.display.driver().brightness(), vec![0.7]);
}

#[tokio::test(start_paused = true)]
async fn test_brightness_when_ready_applies_immediately() {
    let h = harness(|d| d);
    h.display.init().await;

    h.display.set_brightness(1.5).await;
    assert_eq!(h.display.driver().brightness(), vec![1.5]);
}
