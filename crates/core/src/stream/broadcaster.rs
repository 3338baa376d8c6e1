//! Frame broadcaster.
//!
//! One capture loop per streamed run. Each tick captures a screenshot,
//! transcodes it, caches it as the run's last good frame and fans it out to
//! every viewer. Failed ticks re-push the cached frame (or a placeholder) so
//! viewers see a stale picture instead of a dead connection; a circuit
//! breaker pauses capturing when nearly every attempt fails.
//!
//! Per-run state (cache, viewers, breaker) lives behind one lock that is
//! never held across an await, so fan-out order matches capture order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::metrics;

use super::breaker::{Admission, CircuitBreaker};
use super::sink::{ChannelSink, FrameSink, SinkError, StreamSubscription};
use super::transcode::FrameTranscoder;
use super::{
    DropReason, FrameSource, StreamConfig, StreamError, StreamEvent, StreamStats, ViewerInfo,
};

/// Consecutive full-buffer pushes after which a viewer counts as dead.
const STALLED_AFTER_DROPS: u32 = 50;

struct Viewer {
    info: ViewerInfo,
    sink: Box<dyn FrameSink>,
    consecutive_drops: u32,
}

struct RunStream {
    cache: Option<Bytes>,
    viewers: Vec<Viewer>,
    breaker: CircuitBreaker,
    stats: StreamStats,
    stopped: bool,
}

impl RunStream {
    /// Push one frame to every viewer, removing the dead ones.
    fn fan_out(&mut self, frame: &Bytes) -> Vec<(u64, DropReason)> {
        let mut dropped = Vec::new();
        let stats = &mut self.stats;

        self.viewers.retain_mut(|viewer| {
            match viewer.sink.try_push(frame.clone()) {
                Ok(()) => {
                    viewer.consecutive_drops = 0;
                    stats.frames_pushed += 1;
                    true
                }
                Err(SinkError::Backpressure) => {
                    stats.frames_dropped += 1;
                    viewer.consecutive_drops += 1;
                    if viewer.consecutive_drops >= STALLED_AFTER_DROPS {
                        viewer.sink.close();
                        dropped.push((viewer.info.subscriber_id, DropReason::Stalled));
                        false
                    } else {
                        true
                    }
                }
                Err(SinkError::Closed) => {
                    viewer.sink.close();
                    dropped.push((viewer.info.subscriber_id, DropReason::Closed));
                    false
                }
            }
        });

        self.stats.subscribers = self.viewers.len();
        dropped
    }

    fn close_all(&mut self) -> Vec<u64> {
        let ids = self
            .viewers
            .iter_mut()
            .map(|viewer| {
                viewer.sink.close();
                viewer.info.subscriber_id
            })
            .collect();
        self.viewers.clear();
        self.stats.subscribers = 0;
        ids
    }
}

fn lock(state: &Mutex<RunStream>) -> MutexGuard<'_, RunStream> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct ActiveStream {
    state: Arc<Mutex<RunStream>>,
    task: JoinHandle<()>,
}

/// What a capture loop needs besides its run state.
#[derive(Clone)]
struct LoopContext {
    run_id: String,
    interval: Duration,
    cooldown_ms: u64,
    transcoder: FrameTranscoder,
    placeholder: Bytes,
    events: broadcast::Sender<StreamEvent>,
}

impl LoopContext {
    fn emit(&self, event: StreamEvent) {
        // No listeners is fine
        let _ = self.events.send(event);
    }

    fn report_dropped(&self, dropped: Vec<(u64, DropReason)>) {
        report_dropped(&self.events, &self.run_id, dropped);
    }
}

fn report_dropped(
    events: &broadcast::Sender<StreamEvent>,
    run_id: &str,
    dropped: Vec<(u64, DropReason)>,
) {
    for (subscriber_id, reason) in dropped {
        debug!(run_id, subscriber_id, reason = reason.as_str(), "Removed stream viewer");
        metrics::SUBSCRIBERS_DROPPED
            .with_label_values(&[reason.as_str()])
            .inc();
        let _ = events.send(StreamEvent::SubscriberDropped {
            run_id: run_id.to_string(),
            subscriber_id,
            reason,
        });
    }
}

/// Multi-viewer live frame fan-out, keyed by run id.
pub struct FrameBroadcaster {
    config: StreamConfig,
    transcoder: FrameTranscoder,
    placeholder: Bytes,
    streams: Mutex<HashMap<String, ActiveStream>>,
    events: broadcast::Sender<StreamEvent>,
    next_subscriber_id: AtomicU64,
}

impl FrameBroadcaster {
    pub fn new(config: StreamConfig) -> Self {
        let transcoder = FrameTranscoder::from_config(&config);
        let placeholder = transcoder.placeholder().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to render placeholder frame");
            Bytes::new()
        });
        let (events, _) = broadcast::channel(256);

        Self {
            config,
            transcoder,
            placeholder,
            streams: Mutex::new(HashMap::new()),
            events,
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Receive broadcast lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    fn streams(&self) -> MutexGuard<'_, HashMap<String, ActiveStream>> {
        self.streams
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state_of(&self, run_id: &str) -> Result<Arc<Mutex<RunStream>>, StreamError> {
        self.streams()
            .get(run_id)
            .map(|active| active.state.clone())
            .ok_or_else(|| StreamError::NotStreaming(run_id.to_string()))
    }

    /// Start the capture loop for a run.
    ///
    /// Returns `false` if the run is already streaming.
    pub fn start_broadcast(&self, run_id: &str, source: Arc<dyn FrameSource>) -> bool {
        let mut streams = self.streams();
        if streams.contains_key(run_id) {
            warn!(run_id, "Broadcast already active");
            return false;
        }

        let state = Arc::new(Mutex::new(RunStream {
            cache: None,
            viewers: Vec::new(),
            breaker: CircuitBreaker::new(
                self.config.failure_rate_threshold,
                self.config.min_samples,
                self.config.cooldown(),
            ),
            stats: StreamStats {
                run_id: run_id.to_string(),
                breaker: "closed".to_string(),
                started_at: Some(Utc::now()),
                ..Default::default()
            },
            stopped: false,
        }));

        let ctx = LoopContext {
            run_id: run_id.to_string(),
            interval: self.config.capture_interval(),
            cooldown_ms: self.config.cooldown_ms,
            transcoder: self.transcoder,
            placeholder: self.placeholder.clone(),
            events: self.events.clone(),
        };
        let interval_ms = ctx.interval.as_millis() as u64;
        let task = tokio::spawn(capture_loop(ctx, state.clone(), source));

        streams.insert(run_id.to_string(), ActiveStream { state, task });
        drop(streams);

        info!(run_id, interval_ms, "Started frame broadcast");
        let _ = self.events.send(StreamEvent::Started {
            run_id: run_id.to_string(),
            interval_ms,
        });
        true
    }

    /// Stop the capture loop, end every viewer and evict the cached frame.
    ///
    /// Returns `false` if the run was not streaming.
    pub fn stop_broadcast(&self, run_id: &str) -> bool {
        let Some(active) = self.streams().remove(run_id) else {
            return false;
        };
        active.task.abort();

        let closed = {
            let mut state = lock(&active.state);
            state.stopped = true;
            state.cache = None;
            state.close_all()
        };

        report_dropped(
            &self.events,
            run_id,
            closed.into_iter().map(|id| (id, DropReason::Stopped)).collect(),
        );

        info!(run_id, "Stopped frame broadcast");
        let _ = self.events.send(StreamEvent::Stopped {
            run_id: run_id.to_string(),
        });
        true
    }

    /// Attach a viewer. It immediately gets the cached frame, or a
    /// placeholder when nothing was captured yet.
    pub fn subscribe(
        &self,
        run_id: &str,
        viewer: &str,
        mut sink: Box<dyn FrameSink>,
    ) -> Result<ViewerInfo, StreamError> {
        let state = self.state_of(run_id)?;
        let info = ViewerInfo {
            subscriber_id: self.next_subscriber_id.fetch_add(1, Ordering::Relaxed),
            viewer: viewer.to_string(),
            connected_at: Utc::now(),
        };

        let mut state = lock(&state);
        if state.stopped {
            return Err(StreamError::NotStreaming(run_id.to_string()));
        }

        let first = state
            .cache
            .clone()
            .unwrap_or_else(|| self.placeholder.clone());
        match sink.try_push(first) {
            Ok(()) => state.stats.frames_pushed += 1,
            Err(SinkError::Backpressure) => state.stats.frames_dropped += 1,
            Err(SinkError::Closed) => {
                debug!(run_id, viewer, "Viewer left before its first frame");
                return Ok(info);
            }
        }

        state.viewers.push(Viewer {
            info: info.clone(),
            sink,
            consecutive_drops: 0,
        });
        state.stats.subscribers = state.viewers.len();

        debug!(
            run_id,
            viewer,
            subscriber_id = info.subscriber_id,
            viewers = state.viewers.len(),
            "Viewer subscribed"
        );
        Ok(info)
    }

    /// Attach a viewer backed by a bounded channel.
    pub fn subscribe_channel(
        &self,
        run_id: &str,
        viewer: &str,
    ) -> Result<StreamSubscription, StreamError> {
        let (sink, rx) = ChannelSink::pair(self.config.subscriber_buffer);
        let info = self.subscribe(run_id, viewer, Box::new(sink))?;
        Ok(StreamSubscription::new(
            info.subscriber_id,
            run_id.to_string(),
            info.viewer,
            info.connected_at,
            rx,
        ))
    }

    /// Detach a viewer and end its stream.
    pub fn unsubscribe(&self, run_id: &str, subscriber_id: u64) -> bool {
        let Ok(state) = self.state_of(run_id) else {
            return false;
        };

        let removed = {
            let mut state = lock(&state);
            let before = state.viewers.len();
            state.viewers.retain_mut(|viewer| {
                if viewer.info.subscriber_id == subscriber_id {
                    viewer.sink.close();
                    false
                } else {
                    true
                }
            });
            state.stats.subscribers = state.viewers.len();
            before != state.viewers.len()
        };

        if removed {
            report_dropped(
                &self.events,
                run_id,
                vec![(subscriber_id, DropReason::Unsubscribed)],
            );
        }
        removed
    }

    /// Push an externally captured frame (e.g. a step screenshot).
    pub async fn publish_frame(&self, run_id: &str, raw: Bytes) -> Result<(), StreamError> {
        let state = self.state_of(run_id)?;
        let frame = self.transcoder.transcode_blocking(raw).await?;

        let dropped = {
            let mut state = lock(&state);
            if state.stopped {
                return Err(StreamError::NotStreaming(run_id.to_string()));
            }
            state.cache = Some(frame.clone());
            state.fan_out(&frame)
        };
        report_dropped(&self.events, run_id, dropped);
        Ok(())
    }

    pub fn is_streaming(&self, run_id: &str) -> bool {
        self.streams().contains_key(run_id)
    }

    pub fn active_streams(&self) -> Vec<String> {
        self.streams().keys().cloned().collect()
    }

    pub fn cached_frame(&self, run_id: &str) -> Option<Bytes> {
        let state = self.state_of(run_id).ok()?;
        let cached = lock(&state).cache.clone();
        cached
    }

    pub fn stats(&self, run_id: &str) -> Option<StreamStats> {
        let state = self.state_of(run_id).ok()?;
        let state = lock(&state);
        Some(StreamStats {
            has_cached_frame: state.cache.is_some(),
            ..state.stats.clone()
        })
    }

    pub fn viewers(&self, run_id: &str) -> Vec<ViewerInfo> {
        match self.state_of(run_id) {
            Ok(state) => lock(&state).viewers.iter().map(|v| v.info.clone()).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Total viewers across all runs.
    pub fn viewer_count(&self) -> usize {
        let states: Vec<_> = self.streams().values().map(|a| a.state.clone()).collect();
        states.iter().map(|s| lock(s).viewers.len()).sum()
    }

    /// Stop every broadcast.
    pub fn shutdown(&self) {
        for run_id in self.active_streams() {
            self.stop_broadcast(&run_id);
        }
    }
}

impl Drop for FrameBroadcaster {
    fn drop(&mut self) {
        for (_, active) in self.streams().drain() {
            active.task.abort();
        }
    }
}

async fn capture_loop(ctx: LoopContext, state: Arc<Mutex<RunStream>>, source: Arc<dyn FrameSource>) {
    let mut ticker = tokio::time::interval(ctx.interval);
    // A slow capture delays the next one instead of bursting to catch up
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let admission = {
            let mut state = lock(&state);
            if state.stopped {
                break;
            }
            let admission = state.breaker.try_acquire(Instant::now());
            if admission == Admission::Rejected {
                state.stats.skipped += 1;
            }
            state.stats.breaker = state.breaker.state().name().to_string();
            admission
        };

        match admission {
            Admission::Rejected => {
                metrics::FRAME_CAPTURES.with_label_values(&["skipped"]).inc();
                continue;
            }
            Admission::Probe => {
                info!(run_id = %ctx.run_id, "Resuming paused broadcast");
                ctx.emit(StreamEvent::Resumed {
                    run_id: ctx.run_id.clone(),
                });
            }
            Admission::Allowed => {}
        }

        let captured = match source.capture_frame().await {
            Ok(raw) => ctx.transcoder.transcode_blocking(raw).await,
            Err(e) => Err(e),
        };

        let (dropped, paused) = {
            let mut state = lock(&state);
            if state.stopped {
                break;
            }
            state.stats.attempts += 1;

            let outcome = match captured {
                Ok(frame) => {
                    state.breaker.record_success();
                    state.stats.successes += 1;
                    state.cache = Some(frame.clone());
                    metrics::FRAME_CAPTURES.with_label_values(&["success"]).inc();
                    (state.fan_out(&frame), None)
                }
                Err(e) => {
                    state.stats.failures += 1;
                    debug!(run_id = %ctx.run_id, error = %e, "Frame capture failed");

                    let fallback = match state.cache.clone() {
                        Some(cached) => {
                            state.stats.cached_fallbacks += 1;
                            metrics::FRAME_CAPTURES.with_label_values(&["cached"]).inc();
                            cached
                        }
                        None => {
                            state.stats.placeholder_fallbacks += 1;
                            metrics::FRAME_CAPTURES
                                .with_label_values(&["placeholder"])
                                .inc();
                            ctx.placeholder.clone()
                        }
                    };
                    let dropped = state.fan_out(&fallback);

                    let tripped = state.breaker.record_failure(Instant::now());
                    if tripped.is_some() {
                        state.stats.pauses += 1;
                    }
                    (dropped, tripped)
                }
            };
            state.stats.breaker = state.breaker.state().name().to_string();
            outcome
        };

        ctx.report_dropped(dropped);

        if let Some(window) = paused {
            metrics::STREAM_PAUSES.inc();
            warn!(
                run_id = %ctx.run_id,
                attempts = window.attempts,
                failures = window.failures,
                cooldown_ms = ctx.cooldown_ms,
                "Pausing broadcast after repeated capture failures"
            );
            ctx.emit(StreamEvent::Paused {
                run_id: ctx.run_id.clone(),
                cooldown_ms: ctx.cooldown_ms,
                attempts: window.attempts,
                failures: window.failures,
            });
        }
    }

    debug!(run_id = %ctx.run_id, "Capture loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;

    struct CountingSource {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl FrameSource for CountingSource {
        async fn capture_frame(&self) -> Result<Bytes, StreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StreamError::Capture("no session".into()));
            }
            let img = RgbImage::from_pixel(8, 8, Rgb([0, 128, 255]));
            let mut out = Cursor::new(Vec::new());
            img.write_to(&mut out, ImageFormat::Png)
                .map_err(|e| StreamError::Capture(e.to_string()))?;
            Ok(Bytes::from(out.into_inner()))
        }
    }

    fn fast_config() -> StreamConfig {
        StreamConfig {
            fps: 100.0,
            min_interval_ms: 10,
            min_samples: 5,
            cooldown_ms: 60_000,
            ..Default::default()
        }
    }

    fn source(fail: bool) -> Arc<CountingSource> {
        Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    #[tokio::test]
    async fn test_subscribe_without_broadcast_fails() {
        let broadcaster = FrameBroadcaster::new(fast_config());
        assert!(matches!(
            broadcaster.subscribe_channel("run-1", "alice"),
            Err(StreamError::NotStreaming(_))
        ));
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let broadcaster = FrameBroadcaster::new(fast_config());
        assert!(broadcaster.start_broadcast("run-1", source(false)));
        assert!(!broadcaster.start_broadcast("run-1", source(false)));
        broadcaster.stop_broadcast("run-1");
    }

    #[tokio::test]
    async fn test_late_joiner_gets_placeholder_immediately() {
        let config = StreamConfig {
            min_interval_ms: 60_000,
            ..fast_config()
        };
        let broadcaster = FrameBroadcaster::new(config);
        broadcaster.start_broadcast("run-1", source(true));

        let mut sub = broadcaster.subscribe_channel("run-1", "alice").unwrap();
        let first = sub.try_next_frame().expect("frame without waiting");
        assert_eq!(&first[..2], &[0xFF, 0xD8]);
        broadcaster.stop_broadcast("run-1");
    }

    #[tokio::test]
    async fn test_frames_flow_and_cache_fills() {
        let broadcaster = FrameBroadcaster::new(fast_config());
        let src = source(false);
        broadcaster.start_broadcast("run-1", src.clone());
        let mut sub = broadcaster.subscribe_channel("run-1", "alice").unwrap();

        for _ in 0..3 {
            tokio::time::timeout(Duration::from_secs(2), sub.next_frame())
                .await
                .unwrap()
                .unwrap();
        }
        assert!(broadcaster.cached_frame("run-1").is_some());
        let stats = broadcaster.stats("run-1").unwrap();
        assert!(stats.successes >= 1);
        assert_eq!(stats.subscribers, 1);

        broadcaster.stop_broadcast("run-1");
        assert!(broadcaster.cached_frame("run-1").is_none());
    }

    #[tokio::test]
    async fn test_stop_ends_viewer_streams() {
        let broadcaster = FrameBroadcaster::new(fast_config());
        broadcaster.start_broadcast("run-1", source(false));
        let sub = broadcaster.subscribe_channel("run-1", "alice").unwrap();

        assert!(broadcaster.stop_broadcast("run-1"));
        assert!(!broadcaster.stop_broadcast("run-1"));
        assert!(!broadcaster.is_streaming("run-1"));

        let mut rx = sub.into_receiver();
        let drained = tokio::time::timeout(Duration::from_secs(1), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok(), "viewer stream should end after stop");
    }

    #[tokio::test]
    async fn test_dead_viewer_removed_others_keep_streaming() {
        let broadcaster = FrameBroadcaster::new(fast_config());
        broadcaster.start_broadcast("run-1", source(false));
        let mut events = broadcaster.events();

        let gone = broadcaster.subscribe_channel("run-1", "bob").unwrap();
        let mut alive = broadcaster.subscribe_channel("run-1", "alice").unwrap();
        drop(gone);

        let dropped = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(StreamEvent::SubscriberDropped { reason, .. }) = events.recv().await {
                    return reason;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(dropped, DropReason::Closed);

        // The survivor keeps receiving
        for _ in 0..2 {
            tokio::time::timeout(Duration::from_secs(2), alive.next_frame())
                .await
                .unwrap()
                .unwrap();
        }
        assert_eq!(broadcaster.viewers("run-1").len(), 1);
        broadcaster.stop_broadcast("run-1");
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let broadcaster = FrameBroadcaster::new(fast_config());
        broadcaster.start_broadcast("run-1", source(false));
        let sub = broadcaster.subscribe_channel("run-1", "alice").unwrap();

        assert!(broadcaster.unsubscribe("run-1", sub.id));
        assert!(!broadcaster.unsubscribe("run-1", sub.id));
        assert_eq!(broadcaster.viewer_count(), 0);
        broadcaster.stop_broadcast("run-1");
    }

    #[tokio::test]
    async fn test_failing_source_pauses_after_min_samples() {
        let broadcaster = FrameBroadcaster::new(fast_config());
        let src = source(true);
        let mut events = broadcaster.events();
        broadcaster.start_broadcast("run-1", src.clone());
        let mut sub = broadcaster.subscribe_channel("run-1", "alice").unwrap();

        let paused = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(StreamEvent::Paused { attempts, .. }) = events.recv().await {
                    return attempts;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(paused, 5);

        // Placeholders kept the viewer fed: 1 on subscribe + 1 per failed attempt
        let mut frames = 0;
        while sub.try_next_frame().is_some() {
            frames += 1;
        }
        assert!(frames >= 5, "got {} frames", frames);

        // Paused: no further capture attempts
        let calls = src.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(src.calls.load(Ordering::SeqCst), calls);

        let stats = broadcaster.stats("run-1").unwrap();
        assert_eq!(stats.pauses, 1);
        assert_eq!(stats.breaker, "open");
        broadcaster.stop_broadcast("run-1");
    }

    #[tokio::test]
    async fn test_paused_broadcast_resumes_after_cooldown() {
        let config = StreamConfig {
            min_samples: 2,
            cooldown_ms: 50,
            ..fast_config()
        };
        let broadcaster = FrameBroadcaster::new(config);
        let mut events = broadcaster.events();
        broadcaster.start_broadcast("run-1", source(true));

        let resumed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(StreamEvent::Resumed { run_id }) = events.recv().await {
                    return run_id;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(resumed, "run-1");
        broadcaster.stop_broadcast("run-1");
    }

    #[tokio::test]
    async fn test_publish_frame_updates_cache() {
        let config = StreamConfig {
            min_interval_ms: 60_000,
            ..fast_config()
        };
        let broadcaster = FrameBroadcaster::new(config);
        broadcaster.start_broadcast("run-1", source(true));
        let mut sub = broadcaster.subscribe_channel("run-1", "alice").unwrap();
        let placeholder = sub.try_next_frame().unwrap();

        let raw = source(false).capture_frame().await.unwrap();
        broadcaster.publish_frame("run-1", raw).await.unwrap();

        // The loop's first tick may have pushed a fallback in between
        let mut frame = sub.try_next_frame().unwrap();
        while let Some(next) = sub.try_next_frame() {
            frame = next;
        }
        assert_ne!(frame, placeholder);
        assert_eq!(broadcaster.cached_frame("run-1"), Some(frame));
        broadcaster.stop_broadcast("run-1");
    }
}
