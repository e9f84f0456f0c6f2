use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use duplex_core::buffering::{capture_channel, playback_channel, PlaybackMessage};
use duplex_core::engine::{pipeline, PlaybackFeed};
use duplex_core::ipc::events::{AudioActivityEvent, CapturedAudioEvent};
use duplex_core::vad::{VadDecision, VoiceActivityDetector};
use duplex_core::{AudioDiagnostics, CaptureProcessor};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

struct AlwaysSpeechVad;

impl VoiceActivityDetector for AlwaysSpeechVad {
    fn classify(&mut self, _samples: &[f32]) -> VadDecision {
        VadDecision::Speech
    }

    fn reset(&mut self) {}
}

fn recv_with_timeout<T: Clone>(rx: &mut broadcast::Receiver<T>, timeout: Duration) -> T {
    let start = Instant::now();
    loop {
        match rx.try_recv() {
            Ok(ev) => return ev,
            Err(TryRecvError::Empty) => {
                if start.elapsed() >= timeout {
                    panic!("timed out waiting for event");
                }
                thread::sleep(Duration::from_millis(2));
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => panic!("event channel closed unexpectedly"),
        }
    }
}

struct Harness {
    capture: CaptureProcessor,
    running: Arc<AtomicBool>,
    diagnostics: Arc<AudioDiagnostics>,
    capture_rx: broadcast::Receiver<CapturedAudioEvent>,
    activity_rx: broadcast::Receiver<AudioActivityEvent>,
    worker: thread::JoinHandle<()>,
}

fn spawn_pipeline(
    vad: Option<Box<dyn VoiceActivityDetector>>,
    playback: Arc<Mutex<Option<PlaybackFeed>>>,
    diagnostics: Arc<AudioDiagnostics>,
) -> Harness {
    let (producer, consumer) = capture_channel(1 << 16, 256);
    let running = Arc::new(AtomicBool::new(true));
    let (capture_tx, capture_rx) = broadcast::channel(256);
    let (activity_tx, activity_rx) = broadcast::channel(256);

    let ctx = pipeline::PipelineContext {
        consumer,
        capture_sample_rate: 48_000,
        target_sample_rate: 48_000,
        vad,
        playback,
        running: Arc::clone(&running),
        capture_tx,
        activity_tx,
        seq: Arc::new(AtomicU64::new(0)),
        diagnostics: Arc::clone(&diagnostics),
    };
    let worker = thread::spawn(move || pipeline::run(ctx));

    Harness {
        capture: CaptureProcessor::new(producer, Arc::clone(&diagnostics)),
        running,
        diagnostics,
        capture_rx,
        activity_rx,
        worker,
    }
}

#[test]
fn captured_blocks_arrive_in_order_and_unchanged() {
    let diagnostics = Arc::new(AudioDiagnostics::default());
    let mut h = spawn_pipeline(None, Arc::new(Mutex::new(None)), diagnostics);

    const BLOCKS: usize = 20;
    const LEN: usize = 441;
    for i in 0..BLOCKS {
        let block = vec![i as f32 / BLOCKS as f32; LEN];
        assert!(h.capture.process(Some(block.as_slice())));
    }

    for i in 0..BLOCKS {
        let ev = recv_with_timeout(&mut h.capture_rx, Duration::from_secs(2));
        assert_eq!(ev.seq, i as u64 + 1);
        assert_eq!(ev.sample_rate, 48_000);
        assert_eq!(ev.samples.len(), LEN);
        assert!(ev.samples.iter().all(|&s| s == i as f32 / BLOCKS as f32));
    }

    h.running.store(false, Ordering::SeqCst);
    h.worker.join().expect("pipeline thread panicked");

    let diag = h.diagnostics.snapshot();
    assert_eq!(diag.blocks_captured, BLOCKS);
    assert_eq!(diag.blocks_forwarded, BLOCKS);
    assert_eq!(diag.blocks_dropped, 0);
    assert_eq!(diag.samples_captured, BLOCKS * LEN);
}

#[test]
fn blocks_left_in_ring_are_forwarded_after_stop() {
    let diagnostics = Arc::new(AudioDiagnostics::default());
    let mut h = spawn_pipeline(None, Arc::new(Mutex::new(None)), diagnostics);

    // Pushed before the stop: some may still sit in the ring when the loop
    // sees it, and every one must come out.
    for i in 0..5 {
        h.capture.process(Some(&[i as f32; 64][..]));
    }
    h.running.store(false, Ordering::SeqCst);
    h.worker.join().expect("pipeline thread panicked");

    let diag = h.diagnostics.snapshot();
    assert_eq!(diag.blocks_captured, 5);
    assert_eq!(diag.blocks_forwarded, 5);

    let mut received = Vec::new();
    while let Ok(ev) = h.capture_rx.try_recv() {
        received.push(ev);
    }
    assert_eq!(received.len(), 5);
    for (i, ev) in received.iter().enumerate() {
        assert_eq!(ev.seq, i as u64 + 1);
        assert!(ev.samples.iter().all(|&s| s == i as f32));
    }
}

#[test]
fn speech_during_playback_clears_the_queue() {
    let diagnostics = Arc::new(AudioDiagnostics::default());
    let (sender, mut receiver) = playback_channel(16);
    let mut feed = PlaybackFeed::new(sender, 48_000, 48_000).unwrap();
    feed.push(&[0.5; 256]).unwrap();
    let playback = Arc::new(Mutex::new(Some(feed)));

    // Pretend the output callback is mid-response.
    diagnostics.playback_active.store(true, Ordering::SeqCst);

    let mut h = spawn_pipeline(
        Some(Box::new(AlwaysSpeechVad)),
        Arc::clone(&playback),
        diagnostics,
    );
    assert!(h.capture.process(Some(&[0.8f32; 480][..])));

    let activity = recv_with_timeout(&mut h.activity_rx, Duration::from_secs(2));
    assert!(activity.is_speech);
    assert!(activity.barge_in);
    assert!(activity.rms > 0.7);

    assert_eq!(receiver.try_recv(), Some(PlaybackMessage::Clear));
    assert_eq!(receiver.try_recv(), None);

    // A second speech block with nothing playing is not a barge-in.
    assert!(h.capture.process(Some(&[0.8f32; 480][..])));
    let activity = recv_with_timeout(&mut h.activity_rx, Duration::from_secs(2));
    assert!(activity.is_speech);
    assert!(!activity.barge_in);

    h.running.store(false, Ordering::SeqCst);
    h.worker.join().expect("pipeline thread panicked");
    assert_eq!(h.diagnostics.snapshot().barge_ins, 1);
}

#[test]
fn speech_without_playback_is_reported_but_clears_nothing() {
    let diagnostics = Arc::new(AudioDiagnostics::default());
    let (sender, mut receiver) = playback_channel(16);
    let feed = PlaybackFeed::new(sender, 48_000, 48_000).unwrap();
    let mut h = spawn_pipeline(
        Some(Box::new(AlwaysSpeechVad)),
        Arc::new(Mutex::new(Some(feed))),
        diagnostics,
    );

    assert!(h.capture.process(Some(&[0.3f32; 160][..])));
    let activity = recv_with_timeout(&mut h.activity_rx, Duration::from_secs(2));
    assert!(activity.is_speech);
    assert!(!activity.barge_in);
    assert_eq!(receiver.try_recv(), None);

    h.running.store(false, Ordering::SeqCst);
    h.worker.join().expect("pipeline thread panicked");
}
