// =============================================================================
// Feed — bounded per-chart tick queue and its worker task
// =============================================================================
//
// Producers push ticks into a chart's `TickQueue`; one Tokio task per chart
// drains it into the session.  The queue never drops a tick:
//
//   - room left            -> append
//   - full, coalescing on,
//     same timestamp as the
//     newest queued tick   -> merge into it (high = max, low = min,
//                             close = newest, volume summed)
//   - full otherwise       -> wait for the worker to make room
//
// Merging is only switched on where it cannot change the bars: a resampled
// candlestick chart folds both ticks into the same bucket either way.  Kagi
// and range-bar charts walk every close, and a pass-through candlestick chart
// turns every tick into a bar, so those always wait instead.
//
// The worker stops when its shutdown `Notify` fires, when the chart it feeds
// is gone, or once the queue has been closed and drained.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{ChartError, Result};
use crate::session::ChartConfig;
use crate::types::{ChartType, Ohlcv};

/// How a full queue treats a tick carrying the newest queued timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coalesce {
    /// Always wait for room.
    Never,
    /// Merge into the newest queued tick.
    SameTimestamp,
}

impl Coalesce {
    /// The mode that leaves `config`'s bars unchanged.
    pub fn for_chart(config: &ChartConfig) -> Self {
        match config.chart_type {
            ChartType::Candlestick if config.resample_timeframe.is_some() => Self::SameTimestamp,
            _ => Self::Never,
        }
    }
}

/// Outcome of a push that did not have to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Merged into the newest queued tick carrying the same timestamp.
    Coalesced,
}

/// Fold `tick` into `into` as one longer print of the same instant.
fn merge_into(into: &mut Ohlcv, tick: &Ohlcv) {
    into.high = into.high.max(tick.high);
    into.low = into.low.min(tick.low);
    into.close = tick.close;
    into.volume += tick.volume;
}

fn can_merge(queued: &Ohlcv, tick: &Ohlcv) -> bool {
    queued.timestamp == tick.timestamp
        && queued.symbol == tick.symbol
        && queued.timeframe == tick.timeframe
        // A tick the engine would reject must still reach it on its own.
        && queued.validate(None).is_ok()
        && tick.validate(None).is_ok()
}

#[derive(Debug)]
pub struct TickQueue {
    capacity: usize,
    coalesce: Coalesce,
    ticks: Mutex<VecDeque<Ohlcv>>,
    closed: AtomicBool,
    /// Signalled when a tick is queued or the queue closes.
    ready: Notify,
    /// Signalled when the worker takes a tick or the queue closes.
    space: Notify,
    coalesced: AtomicU64,
}

impl TickQueue {
    pub fn new(capacity: usize, coalesce: Coalesce) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            coalesce,
            ticks: Mutex::new(VecDeque::with_capacity(capacity)),
            closed: AtomicBool::new(false),
            ready: Notify::new(),
            space: Notify::new(),
            coalesced: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn coalesce(&self) -> Coalesce {
        self.coalesce
    }

    pub fn len(&self) -> usize {
        self.ticks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.lock().is_empty()
    }

    /// Ticks absorbed by merging into a queued tick of the same timestamp.
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Refuse further ticks.  The worker finishes what is queued, then exits.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.ready.notify_one();
        self.space.notify_waiters();
    }

    /// Queue without waiting.  Hands the tick back when the queue is closed,
    /// or full and the tick cannot be merged.
    pub fn try_push(&self, tick: Ohlcv) -> std::result::Result<PushOutcome, Ohlcv> {
        if self.is_closed() {
            return Err(tick);
        }
        let mut ticks = self.ticks.lock();
        if ticks.len() < self.capacity {
            ticks.push_back(tick);
            drop(ticks);
            self.ready.notify_one();
            return Ok(PushOutcome::Queued);
        }
        if self.coalesce == Coalesce::SameTimestamp {
            if let Some(last) = ticks.back_mut().filter(|last| can_merge(last, &tick)) {
                merge_into(last, &tick);
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                return Ok(PushOutcome::Coalesced);
            }
        }
        Err(tick)
    }

    /// Queue, waiting for room when the queue is full (backpressure).  Hands
    /// the tick back if the queue is closed.
    pub async fn push(&self, tick: Ohlcv) -> std::result::Result<PushOutcome, Ohlcv> {
        let mut tick = tick;
        loop {
            let space = self.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            match self.try_push(tick) {
                Ok(outcome) => return Ok(outcome),
                Err(back) if self.is_closed() => return Err(back),
                Err(back) => {
                    tick = back;
                    space.await;
                }
            }
        }
    }

    pub fn try_pop(&self) -> Option<Ohlcv> {
        let tick = self.ticks.lock().pop_front();
        if tick.is_some() {
            self.space.notify_one();
        }
        tick
    }

    /// Next tick, waiting until one is queued.  `None` once the queue is
    /// closed and empty.
    pub async fn pop(&self) -> Option<Ohlcv> {
        loop {
            if let Some(tick) = self.try_pop() {
                return Some(tick);
            }
            if self.is_closed() {
                return None;
            }
            self.ready.notified().await;
        }
    }
}

/// A running feed: the queue producers write to and the worker draining it.
#[derive(Debug)]
pub struct FeedHandle {
    chart_id: String,
    queue: Arc<TickQueue>,
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl FeedHandle {
    pub fn chart_id(&self) -> &str {
        &self.chart_id
    }

    pub fn queue(&self) -> Arc<TickQueue> {
        self.queue.clone()
    }

    pub async fn push(&self, tick: Ohlcv) -> std::result::Result<PushOutcome, Ohlcv> {
        self.queue.push(tick).await
    }

    /// Ask the worker to exit at its next suspension point.  Queued ticks
    /// are abandoned.
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the worker and wait for it.
    pub async fn join(self) {
        self.stop();
        let _ = self.task.await;
    }

    /// Close the queue and wait until the worker has processed every tick
    /// already in it.
    pub async fn drain(self) {
        self.queue.close();
        let _ = self.task.await;
    }
}

/// Spawn the worker for `chart_id`.  `handle` runs each tick through the
/// chart; a `NotFound` from it means the chart was closed and ends the
/// worker.  Other errors were already counted and logged by the session.
pub fn spawn_feed<F>(chart_id: String, capacity: usize, coalesce: Coalesce, mut handle: F) -> FeedHandle
where
    F: FnMut(&Ohlcv) -> Result<()> + Send + 'static,
{
    let queue = Arc::new(TickQueue::new(capacity, coalesce));
    let shutdown = Arc::new(Notify::new());

    let worker_queue = queue.clone();
    let worker_shutdown = shutdown.clone();
    let worker_id = chart_id.clone();
    let task = tokio::spawn(async move {
        info!(
            chart_id = %worker_id,
            capacity = worker_queue.capacity(),
            coalesce = ?worker_queue.coalesce(),
            "feed worker started"
        );
        let mut processed: u64 = 0;
        loop {
            tokio::select! {
                _ = worker_shutdown.notified() => {
                    debug!(chart_id = %worker_id, "feed worker shutdown requested");
                    break;
                }
                next = worker_queue.pop() => {
                    let Some(tick) = next else {
                        debug!(chart_id = %worker_id, "feed drained");
                        break;
                    };
                    match handle(&tick) {
                        Ok(()) => processed += 1,
                        Err(ChartError::NotFound(_)) => break,
                        Err(_) => {}
                    }
                }
            }
        }
        info!(
            chart_id = %worker_id,
            processed,
            coalesced = worker_queue.coalesced(),
            "feed worker stopped"
        );
    });

    FeedHandle {
        chart_id,
        queue,
        shutdown,
        task,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::bars::{BarEngine, BarPolicy, FormedBar};
    use crate::types::SizeMode;
    use std::time::Duration;

    fn tick(t: i64, price: f64) -> Ohlcv {
        Ohlcv::from_price(t, price, 1.0)
    }

    fn run(engine: &mut BarEngine, ticks: &[Ohlcv]) -> Vec<FormedBar> {
        ticks.iter().flat_map(|t| engine.push(t).unwrap()).collect()
    }

    #[test]
    fn full_queue_merges_same_timestamp_only() {
        let queue = TickQueue::new(2, Coalesce::SameTimestamp);
        assert_eq!(queue.try_push(tick(1, 100.0)), Ok(PushOutcome::Queued));
        assert_eq!(queue.try_push(tick(2, 101.0)), Ok(PushOutcome::Queued));

        // Same instant: folded into the queued tick, nothing lost.
        assert_eq!(queue.try_push(tick(2, 99.0)), Ok(PushOutcome::Coalesced));
        // A new timestamp must wait.
        let back = queue.try_push(tick(3, 103.0)).unwrap_err();
        assert_eq!(back.timestamp, 3);

        assert_eq!(queue.coalesced(), 1);
        assert_eq!(queue.try_pop().unwrap().close, 100.0);
        let merged = queue.try_pop().unwrap();
        assert_eq!(merged.open, 101.0);
        assert_eq!(merged.high, 101.0);
        assert_eq!(merged.low, 99.0);
        assert_eq!(merged.close, 99.0);
        assert!((merged.volume - 2.0).abs() < 1e-12);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn invalid_tick_is_never_merged() {
        let queue = TickQueue::new(1, Coalesce::SameTimestamp);
        queue.try_push(tick(1, 100.0)).unwrap();
        let mut bad = tick(1, 100.5);
        bad.volume = 0.0;
        assert!(queue.try_push(bad).is_err());
        assert_eq!(queue.coalesced(), 0);
    }

    #[test]
    fn range_bar_ticks_are_never_coalesced() {
        let config = ChartConfig::new("BTCUSDT", ChartType::RangeBar, "1m").with_range(1.0, SizeMode::Points);
        let policy = config.to_policy().unwrap();
        let ticks = [tick(0, 100.0), tick(1, 101.5), tick(1, 100.2)];

        // 101.5 completes the first bar, 100.2 the second.
        let direct = run(&mut BarEngine::new(policy.clone()).unwrap(), &ticks);
        assert_eq!(direct.len(), 2);

        let queue = TickQueue::new(2, Coalesce::for_chart(&config));
        let mut engine = BarEngine::new(policy).unwrap();
        let mut queued = Vec::new();
        for t in ticks {
            let mut pending = t;
            // Stand-in for the worker: drain one tick whenever the queue
            // pushes back.
            while let Err(back) = queue.try_push(pending) {
                pending = back;
                let next = queue.try_pop().unwrap();
                queued.extend(engine.push(&next).unwrap());
            }
        }
        while let Some(next) = queue.try_pop() {
            queued.extend(engine.push(&next).unwrap());
        }

        assert_eq!(queue.coalesced(), 0);
        assert_eq!(queued, direct);
        let volume: f64 = queued.iter().map(|b| b.bar().volume).sum();
        assert!((volume - 3.0).abs() < 1e-12);
    }

    #[test]
    fn merging_leaves_resampled_candles_unchanged() {
        let config = ChartConfig::new("BTCUSDT", ChartType::Candlestick, "1m").with_resample("5m");
        assert_eq!(Coalesce::for_chart(&config), Coalesce::SameTimestamp);
        assert_eq!(
            Coalesce::for_chart(&ChartConfig::new("BTCUSDT", ChartType::Candlestick, "1m")),
            Coalesce::Never
        );
        let policy = config.to_policy().unwrap();
        let ticks: Vec<Ohlcv> = [(0, 100.0), (60_000, 103.0), (60_000, 98.0), (60_000, 101.0), (300_000, 102.0)]
            .iter()
            .map(|&(t, p)| tick(t, p))
            .collect();

        let direct = run(&mut BarEngine::new(policy.clone()).unwrap(), &ticks);

        let queue = TickQueue::new(2, Coalesce::SameTimestamp);
        for t in &ticks[..4] {
            queue.try_push(t.clone()).unwrap();
        }
        assert_eq!(queue.coalesced(), 2);
        let mut drained: Vec<Ohlcv> = std::iter::from_fn(|| queue.try_pop()).collect();
        drained.push(ticks[4].clone());

        let queued = run(&mut BarEngine::new(policy).unwrap(), &drained);
        assert_eq!(queued, direct);
        assert_eq!(queued.len(), 1);
    }

    #[tokio::test]
    async fn push_waits_for_room() {
        let queue = Arc::new(TickQueue::new(1, Coalesce::Never));
        queue.push(tick(1, 100.0)).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(tick(2, 101.0)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(queue.pop().await.unwrap().timestamp, 1);
        assert_eq!(producer.await.unwrap(), Ok(PushOutcome::Queued));
        assert_eq!(queue.pop().await.unwrap().timestamp, 2);
    }

    #[tokio::test]
    async fn closing_releases_waiting_producers() {
        let queue = Arc::new(TickQueue::new(1, Coalesce::Never));
        queue.push(tick(1, 100.0)).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(tick(2, 101.0)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let back = producer.await.unwrap().unwrap_err();
        assert_eq!(back.timestamp, 2);
        // What was queued before closing is still delivered.
        assert_eq!(queue.pop().await.unwrap().timestamp, 1);
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn drain_processes_every_queued_tick() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let feed = spawn_feed("chart".into(), 4, Coalesce::Never, move |t: &Ohlcv| {
            sink.lock().push(t.timestamp);
            Ok(())
        });
        for t in 0..10 {
            feed.push(tick(t, 100.0)).await.unwrap();
        }
        feed.drain().await;
        assert_eq!(*seen.lock(), (0..10).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn worker_exits_when_chart_is_gone() {
        let feed = spawn_feed("gone".into(), 4, Coalesce::Never, |_t: &Ohlcv| {
            Err(ChartError::NotFound("gone".into()))
        });
        feed.push(tick(1, 100.0)).await.unwrap();
        for _ in 0..50 {
            if feed.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(feed.is_finished());
    }
}
