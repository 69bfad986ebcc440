//! Session lifecycle: device ownership, state transitions, and guaranteed
//! idempotent teardown.
//!
//! A session owns the capture source, the playback scheduler, and the
//! outbound transport. Acquiring the input device is the only awaited
//! operation; after that everything runs in response to transport events
//! and capture frames. Leaving `Connected` (close or fault) releases every
//! owned resource exactly once; a second teardown is a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;

use crate::audio::capture::{CaptureSource, LoudnessMeter};
use crate::audio::codec;
use crate::audio::device::{AudioInputSource, AudioOutputDevice};
use crate::audio::playback::PlaybackScheduler;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::transport::{DuplexTransport, OutboundAudio, TransportEvent};

/// Session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the transport handshake.
    Connecting,
    /// Capture is pulling frames; inbound fragments are scheduled.
    Connected,
    /// A device or transport fault ended the session.
    Error,
    /// Explicit teardown or a remote close ended the session.
    Closed,
}

/// A live duplex voice session.
///
/// Re-opening while a session is active is unsupported; callers close fully
/// before opening a new one.
pub struct Session {
    state: SessionState,
    scheduler: PlaybackScheduler,
    transport: Box<dyn DuplexTransport>,
    capture: Option<CaptureSource>,
    capture_running: Arc<AtomicBool>,
    capture_handle: Option<JoinHandle<()>>,
    out_tx: Option<mpsc::Sender<OutboundAudio>>,
    out_rx: Option<mpsc::Receiver<OutboundAudio>>,
    muted: Arc<AtomicBool>,
    loudness: LoudnessMeter,
    torn_down: bool,
}

impl Session {
    /// Acquire the input device and assemble a session in `Connecting`.
    ///
    /// This is the one suspension point: waiting for the device grant.
    /// Acquisition failure surfaces as [`EngineError::DeviceAcquisition`]
    /// and no session is created.
    pub async fn open(
        config: &EngineConfig,
        input: &mut dyn AudioInputSource,
        output: Box<dyn AudioOutputDevice>,
        transport: Box<dyn DuplexTransport>,
    ) -> Result<Self, EngineError> {
        let device = input.acquire(config.capture_sample_rate).await?;

        let muted = Arc::new(AtomicBool::new(config.start_muted));
        let loudness = LoudnessMeter::default();
        let capture = CaptureSource::new(
            device,
            config.capture_frame_size,
            config.loudness_gain,
            muted.clone(),
            loudness.clone(),
        );
        let (out_tx, out_rx) = mpsc::channel::<OutboundAudio>(100);

        log::info!(
            "Session opening: capture {} Hz, playback {} Hz, frame {}",
            config.capture_sample_rate,
            config.playback_sample_rate,
            config.capture_frame_size,
        );

        Ok(Self {
            state: SessionState::Connecting,
            scheduler: PlaybackScheduler::new(output, config.playback_sample_rate),
            transport,
            capture: Some(capture),
            capture_running: Arc::new(AtomicBool::new(false)),
            capture_handle: None,
            out_tx: Some(out_tx),
            out_rx: Some(out_rx),
            muted,
            loudness,
            torn_down: false,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle for the UI loudness readout.
    pub fn loudness(&self) -> LoudnessMeter {
        self.loudness.clone()
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// True exactly once when inbound playback finishes draining; used to
    /// flip a UI "speaking" indicator back to idle.
    pub fn poll_drained(&mut self) -> bool {
        self.scheduler.poll_drained()
    }

    /// Drive the session until it leaves `Connected`/`Connecting`.
    ///
    /// Forwards capture frames to the transport and applies transport
    /// events, in the arrival order of each stream. Dropping the event
    /// sender closes the session.
    pub async fn run(&mut self, mut events: mpsc::Receiver<TransportEvent>) {
        let Some(mut out_rx) = self.out_rx.take() else {
            return;
        };
        let mut capture_open = true;

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_transport_event(event),
                        None => self.close(),
                    }
                    if !matches!(self.state, SessionState::Connecting | SessionState::Connected) {
                        break;
                    }
                }
                audio = out_rx.recv(), if capture_open => {
                    match audio {
                        Some(audio) => {
                            if self.handle_outbound(&audio).await.is_err() {
                                break;
                            }
                        }
                        // Capture wound down; keep serving inbound playback.
                        None => capture_open = false,
                    }
                }
            }
        }
    }

    /// Apply one transport lifecycle or payload event.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => {
                if self.state != SessionState::Connecting {
                    log::warn!("Ignoring handshake in state {:?}", self.state);
                    return;
                }
                log::info!("Session connected");
                self.scheduler.begin_stream();
                self.start_capture();
                self.state = SessionState::Connected;
            }
            TransportEvent::Audio(chunk) => {
                if self.state != SessionState::Connected {
                    return;
                }
                match codec::decode(&chunk) {
                    Ok(samples) if !samples.is_empty() => {
                        self.scheduler.enqueue(samples);
                    }
                    Ok(_) => {}
                    // A malformed chunk drops that fragment only; playback
                    // continues with subsequent fragments.
                    Err(e) => log::warn!("Dropping malformed inbound chunk: {}", e),
                }
            }
            TransportEvent::Close => {
                log::info!("Remote closed session");
                self.teardown();
                self.state = SessionState::Closed;
            }
            TransportEvent::Error(reason) => {
                log::error!("Transport error: {}", reason);
                self.teardown();
                self.state = SessionState::Error;
            }
        }
    }

    /// Forward one capture chunk to the transport. A send failure is a
    /// transport fault and ends the session.
    pub async fn handle_outbound(&mut self, audio: &OutboundAudio) -> Result<(), EngineError> {
        if self.state != SessionState::Connected {
            return Ok(());
        }
        if let Err(e) = self.transport.send_audio(audio).await {
            log::error!("Failed to deliver capture audio: {}", e);
            self.teardown();
            self.state = SessionState::Error;
            return Err(e);
        }
        Ok(())
    }

    /// Tear down and move to `Closed`. Safe from any state, repeatedly,
    /// including before the session ever connected.
    pub fn close(&mut self) {
        self.teardown();
        if self.state != SessionState::Error {
            self.state = SessionState::Closed;
        }
    }

    fn start_capture(&mut self) {
        let Some(capture) = self.capture.take() else {
            return;
        };
        let Some(out_tx) = self.out_tx.take() else {
            return;
        };
        self.capture_running.store(true, Ordering::SeqCst);
        let running = self.capture_running.clone();

        let spawned = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                if let Err(e) = capture.run(out_tx, &running) {
                    log::error!("Capture loop error: {}", e);
                }
            });
        match spawned {
            Ok(handle) => self.capture_handle = Some(handle),
            Err(e) => log::error!("Failed to spawn capture thread: {}", e),
        }
    }

    /// Release the input device, capture thread, and pending playback
    /// exactly once. Never raises.
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.capture_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.capture_handle.take() {
            let _ = handle.join();
        }
        self.capture = None;
        self.out_tx = None;
        self.scheduler.stop();

        log::info!("Session resources released");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// One-directional streamed speech playback.
///
/// Reuses the scheduler and decode path of a duplex session without a
/// capture side: same gapless cursor, same decode-error policy, same drain
/// semantics.
pub struct TtsPlayback {
    scheduler: PlaybackScheduler,
}

impl TtsPlayback {
    pub fn new(output: Box<dyn AudioOutputDevice>, sample_rate: u32) -> Self {
        let mut scheduler = PlaybackScheduler::new(output, sample_rate);
        scheduler.begin_stream();
        Self { scheduler }
    }

    /// Decode and schedule one inbound chunk. Malformed chunks are dropped
    /// with a warning; playback continues.
    pub fn push_chunk(&mut self, chunk: &str) {
        match codec::decode(chunk) {
            Ok(samples) if !samples.is_empty() => {
                self.scheduler.enqueue(samples);
            }
            Ok(_) => {}
            Err(e) => log::warn!("Dropping malformed speech chunk: {}", e),
        }
    }

    /// True exactly once when playback finishes draining.
    pub fn poll_drained(&mut self) -> bool {
        self.scheduler.poll_drained()
    }

    /// Halt all pending playback. Idempotent, never raises.
    pub fn stop(&mut self) {
        self.scheduler.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::{
        AudioInputDevice, AudioOutputDevice, FragmentHandle,
    };
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct IdleInput;

    impl AudioInputDevice for IdleInput {
        fn sample_rate(&self) -> u32 {
            16000
        }

        fn read_frame(&mut self, _buf: &mut [f32]) -> Result<usize> {
            // Keep the capture thread responsive to the running flag
            // without busy-spinning.
            thread::sleep(Duration::from_millis(1));
            Ok(0)
        }
    }

    struct GrantingSource;

    #[async_trait]
    impl AudioInputSource for GrantingSource {
        async fn acquire(
            &mut self,
            _sample_rate: u32,
        ) -> Result<Box<dyn AudioInputDevice>, EngineError> {
            Ok(Box::new(IdleInput))
        }
    }

    /// Produces full frames as fast as they are asked for.
    struct BusyInput;

    impl AudioInputDevice for BusyInput {
        fn sample_rate(&self) -> u32 {
            16000
        }

        fn read_frame(&mut self, buf: &mut [f32]) -> Result<usize> {
            buf.fill(0.05);
            Ok(buf.len())
        }
    }

    struct BusySource;

    #[async_trait]
    impl AudioInputSource for BusySource {
        async fn acquire(
            &mut self,
            _sample_rate: u32,
        ) -> Result<Box<dyn AudioInputDevice>, EngineError> {
            Ok(Box::new(BusyInput))
        }
    }

    struct DeniedSource;

    #[async_trait]
    impl AudioInputSource for DeniedSource {
        async fn acquire(
            &mut self,
            _sample_rate: u32,
        ) -> Result<Box<dyn AudioInputDevice>, EngineError> {
            Err(EngineError::DeviceAcquisition("permission denied".into()))
        }
    }

    struct NullHandle;

    impl FragmentHandle for NullHandle {
        fn stop(&mut self) {}
    }

    struct RecordingOutput {
        starts: Arc<Mutex<Vec<f64>>>,
    }

    impl AudioOutputDevice for RecordingOutput {
        fn current_time(&self) -> f64 {
            0.0
        }

        fn schedule_fragment(
            &mut self,
            _samples: Vec<f32>,
            start_time: f64,
        ) -> Box<dyn FragmentHandle> {
            self.starts.lock().unwrap().push(start_time);
            Box::new(NullHandle)
        }
    }

    /// Accepts every chunk but takes a long time doing it, so the outbound
    /// channel backs up behind it.
    struct SlowTransport;

    #[async_trait]
    impl DuplexTransport for SlowTransport {
        async fn send_audio(&mut self, _audio: &OutboundAudio) -> Result<(), EngineError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        }
    }

    struct RecordingTransport {
        sent: Arc<Mutex<Vec<OutboundAudio>>>,
        fail: bool,
    }

    #[async_trait]
    impl DuplexTransport for RecordingTransport {
        async fn send_audio(&mut self, audio: &OutboundAudio) -> Result<(), EngineError> {
            if self.fail {
                return Err(EngineError::Transport("socket reset".into()));
            }
            self.sent.lock().unwrap().push(audio.clone());
            Ok(())
        }
    }

    struct Harness {
        session: Session,
        starts: Arc<Mutex<Vec<f64>>>,
        sent: Arc<Mutex<Vec<OutboundAudio>>>,
    }

    async fn harness(fail_transport: bool) -> Harness {
        let _ = env_logger::builder().is_test(true).try_init();
        let starts = Arc::new(Mutex::new(Vec::new()));
        let sent = Arc::new(Mutex::new(Vec::new()));
        let session = Session::open(
            &EngineConfig::default(),
            &mut GrantingSource,
            Box::new(RecordingOutput {
                starts: starts.clone(),
            }),
            Box::new(RecordingTransport {
                sent: sent.clone(),
                fail: fail_transport,
            }),
        )
        .await
        .unwrap();
        Harness {
            session,
            starts,
            sent,
        }
    }

    #[tokio::test]
    async fn test_handshake_moves_connecting_to_connected() {
        let mut h = harness(false).await;
        assert_eq!(h.session.state(), SessionState::Connecting);
        h.session.handle_transport_event(TransportEvent::Open);
        assert_eq!(h.session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_device_denial_surfaces_acquisition_error() {
        let result = Session::open(
            &EngineConfig::default(),
            &mut DeniedSource,
            Box::new(RecordingOutput {
                starts: Arc::new(Mutex::new(Vec::new())),
            }),
            Box::new(RecordingTransport {
                sent: Arc::new(Mutex::new(Vec::new())),
                fail: false,
            }),
        )
        .await;
        assert!(matches!(result, Err(EngineError::DeviceAcquisition(_))));
    }

    #[tokio::test]
    async fn test_inbound_chunks_are_scheduled_in_order() {
        let mut h = harness(false).await;
        h.session.handle_transport_event(TransportEvent::Open);
        let chunk = codec::encode(&vec![0.25f32; 2400]);
        h.session
            .handle_transport_event(TransportEvent::Audio(chunk.clone()));
        h.session
            .handle_transport_event(TransportEvent::Audio(chunk));
        let starts = h.starts.lock().unwrap();
        assert_eq!(starts.len(), 2);
        assert!(starts[1] >= starts[0] + 0.1 - 1e-9);
    }

    #[tokio::test]
    async fn test_malformed_chunk_is_dropped_without_failing_session() {
        let mut h = harness(false).await;
        h.session.handle_transport_event(TransportEvent::Open);
        h.session
            .handle_transport_event(TransportEvent::Audio("%%%not-audio%%%".into()));
        assert_eq!(h.session.state(), SessionState::Connected);
        assert!(h.starts.lock().unwrap().is_empty());

        // The next well-formed chunk still plays.
        let chunk = codec::encode(&vec![0.1f32; 1200]);
        h.session.handle_transport_event(TransportEvent::Audio(chunk));
        assert_eq!(h.starts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_outbound_audio_reaches_transport() {
        let mut h = harness(false).await;
        h.session.handle_transport_event(TransportEvent::Open);
        let audio = OutboundAudio {
            chunk: codec::encode(&[0.5, -0.5]),
            sample_rate: 16000,
        };
        h.session.handle_outbound(&audio).await.unwrap();
        assert_eq!(h.sent.lock().unwrap().as_slice(), &[audio]);
    }

    #[tokio::test]
    async fn test_transport_send_failure_moves_to_error() {
        let mut h = harness(true).await;
        h.session.handle_transport_event(TransportEvent::Open);
        let audio = OutboundAudio {
            chunk: codec::encode(&[0.5]),
            sample_rate: 16000,
        };
        assert!(h.session.handle_outbound(&audio).await.is_err());
        assert_eq!(h.session.state(), SessionState::Error);
    }

    #[tokio::test]
    async fn test_remote_close_tears_down_to_closed() {
        let mut h = harness(false).await;
        h.session.handle_transport_event(TransportEvent::Open);
        h.session.handle_transport_event(TransportEvent::Close);
        assert_eq!(h.session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_remote_close_completes_under_outbound_backpressure() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut session = Session::open(
            &EngineConfig::default(),
            &mut BusySource,
            Box::new(RecordingOutput {
                starts: Arc::new(Mutex::new(Vec::new())),
            }),
            Box::new(SlowTransport),
        )
        .await
        .unwrap();

        let (event_tx, event_rx) = mpsc::channel(8);
        let driver = async {
            event_tx.send(TransportEvent::Open).await.unwrap();
            // Let capture back the outbound channel up well past what the
            // transport drains.
            tokio::time::sleep(Duration::from_millis(300)).await;
            event_tx.send(TransportEvent::Close).await.unwrap();
        };

        tokio::time::timeout(Duration::from_secs(10), async {
            tokio::join!(session.run(event_rx), driver);
        })
        .await
        .expect("teardown must complete despite outbound backpressure");
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_transport_fault_tears_down_to_error() {
        let mut h = harness(false).await;
        h.session.handle_transport_event(TransportEvent::Open);
        h.session
            .handle_transport_event(TransportEvent::Error("timeout".into()));
        assert_eq!(h.session.state(), SessionState::Error);
        // A later close must not flip Error back to Closed.
        h.session.close();
        assert_eq!(h.session.state(), SessionState::Error);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_from_any_state() {
        let mut h = harness(false).await;
        // Never connected: closing twice is still a no-op the second time.
        h.session.close();
        assert_eq!(h.session.state(), SessionState::Closed);
        h.session.close();
        assert_eq!(h.session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_mute_flag_is_shared_with_capture() {
        let h = harness(false).await;
        assert!(!h.session.is_muted());
        h.session.set_muted(true);
        assert!(h.session.is_muted());
    }

    #[tokio::test]
    async fn test_tts_playback_reuses_gapless_scheduling() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let mut tts = TtsPlayback::new(
            Box::new(RecordingOutput {
                starts: starts.clone(),
            }),
            24000,
        );
        let chunk = codec::encode(&vec![0.2f32; 2400]);
        tts.push_chunk(&chunk);
        tts.push_chunk(&chunk);
        tts.push_chunk("***garbage***");
        {
            let starts = starts.lock().unwrap();
            assert_eq!(starts.len(), 2);
            assert!((starts[0] - 0.0).abs() < 1e-9);
            assert!((starts[1] - 0.1).abs() < 1e-9);
        }
        tts.stop();
        tts.stop();
    }
}
