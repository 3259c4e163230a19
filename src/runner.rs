//! The capture-process-display loop.
//!
//! The loop owns the camera and the window for its whole lifetime and drops
//! both when it returns, so they are released exactly once on every exit path.

use crate::capture::CaptureBackend;
use crate::output::{DisplayEvent, OutputBackend};
use crate::pipeline::FrameProcessor;
use crate::utils::FpsCounter;
use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The quit key was pressed
    QuitKey,
    /// The window was closed
    WindowClosed,
    /// The external stop flag was raised
    Cancelled,
    /// The configured number of frames was displayed
    FrameLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Running,
    Stopped(StopReason),
}

/// Loop behaviour that does not depend on the backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSettings {
    pub quit_key: char,
    pub poll_timeout: Duration,
    pub max_frames: Option<u64>,
    pub max_consecutive_failures: Option<u32>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            quit_key: 'q',
            poll_timeout: Duration::from_millis(1),
            max_frames: None,
            max_consecutive_failures: None,
        }
    }
}

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub iterations: u64,
    pub frames_read: u64,
    pub frames_displayed: u64,
    pub read_failures: u64,
    pub stop_reason: Option<StopReason>,
}

/// Reads, processes and displays frames until told to stop.
pub struct CaptureLoop<C, O, P> {
    capture: C,
    output: O,
    processor: P,
    settings: LoopSettings,
    stop: Arc<AtomicBool>,
}

impl<C, O, P> CaptureLoop<C, O, P>
where
    C: CaptureBackend,
    O: OutputBackend,
    P: FrameProcessor,
{
    pub fn new(capture: C, output: O, processor: P, settings: LoopSettings) -> Self {
        Self {
            capture,
            output,
            processor,
            settings,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Uses `stop` as the cancellation flag; the loop exits once it reads `true`.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Runs until stopped, then releases the camera and closes the window.
    pub fn run(self) -> Result<LoopStats> {
        let Self {
            mut capture,
            mut output,
            mut processor,
            settings,
            stop,
        } = self;

        info!("Starting {} loop", processor.name());
        let result = drive(&mut capture, &mut output, &mut processor, &settings, &stop);

        drop(capture);
        drop(output);

        if let Ok(stats) = &result {
            info!(
                "Loop stopped ({:?}) after {} iterations, {} frames displayed, {} read failures",
                stats.stop_reason, stats.iterations, stats.frames_displayed, stats.read_failures
            );
        }
        result
    }
}

/// First event in `events` that ends the loop; other keys are ignored.
fn stop_reason_for(events: &[DisplayEvent], quit_key: char) -> Option<StopReason> {
    events.iter().find_map(|event| match *event {
        DisplayEvent::Key(key) if key == quit_key => Some(StopReason::QuitKey),
        DisplayEvent::Key(key) => {
            debug!("Ignoring key {:?}", key);
            None
        }
        DisplayEvent::CloseRequested => Some(StopReason::WindowClosed),
    })
}

fn drive<C, O, P>(
    capture: &mut C,
    output: &mut O,
    processor: &mut P,
    settings: &LoopSettings,
    stop: &AtomicBool,
) -> Result<LoopStats>
where
    C: CaptureBackend,
    O: OutputBackend,
    P: FrameProcessor,
{
    let mut stats = LoopStats::default();
    let mut fps = FpsCounter::new();
    let mut consecutive_failures = 0u32;
    let mut state = LoopState::Running;

    while state == LoopState::Running {
        if stop.load(Ordering::SeqCst) {
            state = LoopState::Stopped(StopReason::Cancelled);
            break;
        }
        stats.iterations += 1;

        match capture.capture_frame() {
            Ok(frame) => {
                stats.frames_read += 1;
                consecutive_failures = 0;

                let processed = processor
                    .process(&frame)
                    .with_context(|| format!("{} processing failed", processor.name()))?;
                output.write_frame(&processed).context("Failed to display frame")?;
                stats.frames_displayed += 1;

                if let Some(rate) = fps.update() {
                    let (w, h) = capture.frame_size();
                    debug!("[Perf] Displaying at {:.2} FPS (Resolution: {}x{})", rate, w, h);
                }
            }
            Err(e) if e.is_recoverable() => {
                stats.read_failures += 1;
                consecutive_failures += 1;
                warn!("Skipping frame: {}", e);
                if let Some(limit) = settings.max_consecutive_failures {
                    if consecutive_failures >= limit {
                        return Err(anyhow!("{} consecutive frame reads failed, last: {}", consecutive_failures, e));
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }

        let events = output.poll_events(settings.poll_timeout)?;
        if let Some(reason) = stop_reason_for(&events, settings.quit_key) {
            state = LoopState::Stopped(reason);
        }

        if state == LoopState::Running {
            if let Some(limit) = settings.max_frames {
                if stats.frames_displayed >= limit {
                    state = LoopState::Stopped(StopReason::FrameLimit);
                }
            }
        }
    }

    if let LoopState::Stopped(reason) = state {
        stats.stop_reason = Some(reason);
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CameraInfo, CaptureConfig, CaptureError, CaptureResult};
    use crate::frame::{PixelFormat, VideoFrame};
    use crate::pipeline::{ContourFill, Grayscale};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    type Journal = Rc<RefCell<Vec<&'static str>>>;

    struct ScriptedCamera {
        reads: VecDeque<CaptureResult<VideoFrame>>,
        journal: Journal,
    }

    impl ScriptedCamera {
        fn new(reads: Vec<CaptureResult<VideoFrame>>, journal: &Journal) -> Self {
            Self {
                reads: reads.into(),
                journal: journal.clone(),
            }
        }
    }

    impl CaptureBackend for ScriptedCamera {
        fn list_devices() -> CaptureResult<Vec<CameraInfo>> {
            Ok(Vec::new())
        }

        fn open(_config: CaptureConfig) -> CaptureResult<Self> {
            Ok(Self::new(Vec::new(), &Journal::default()))
        }

        fn capture_frame(&mut self) -> CaptureResult<VideoFrame> {
            self.reads
                .pop_front()
                .unwrap_or_else(|| Err(CaptureError::ReadFailed("script exhausted".into())))
        }

        fn frame_size(&self) -> (u32, u32) {
            (4, 4)
        }
    }

    impl Drop for ScriptedCamera {
        fn drop(&mut self) {
            self.journal.borrow_mut().push("camera released");
        }
    }

    /// Replays one batch of events per poll, then reports a window close.
    struct ScriptedWindow {
        polls: VecDeque<Vec<DisplayEvent>>,
        shown: Rc<RefCell<Vec<VideoFrame>>>,
        journal: Journal,
    }

    impl ScriptedWindow {
        fn new(polls: Vec<Vec<DisplayEvent>>, journal: &Journal) -> Self {
            Self {
                polls: polls.into(),
                shown: Rc::default(),
                journal: journal.clone(),
            }
        }
    }

    impl OutputBackend for ScriptedWindow {
        fn write_frame(&mut self, frame: &VideoFrame) -> Result<()> {
            self.shown.borrow_mut().push(frame.clone());
            Ok(())
        }

        fn poll_events(&mut self, _timeout: Duration) -> Result<Vec<DisplayEvent>> {
            Ok(self
                .polls
                .pop_front()
                .unwrap_or_else(|| vec![DisplayEvent::CloseRequested]))
        }
    }

    impl Drop for ScriptedWindow {
        fn drop(&mut self) {
            self.journal.borrow_mut().push("window closed");
        }
    }

    /// Records every frame it receives.
    #[derive(Default)]
    struct Recorder {
        seen: Rc<RefCell<Vec<VideoFrame>>>,
        fail: bool,
    }

    impl FrameProcessor for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn process(&mut self, frame: &VideoFrame) -> Result<VideoFrame> {
            if self.fail {
                return Err(anyhow!("boom"));
            }
            self.seen.borrow_mut().push(frame.clone());
            Ok(frame.clone())
        }
    }

    fn frame(shade: u8) -> CaptureResult<VideoFrame> {
        Ok(VideoFrame::from_data(4, 4, PixelFormat::Rgb, vec![shade; 48]))
    }

    fn key(c: char) -> Vec<DisplayEvent> {
        vec![DisplayEvent::Key(c)]
    }

    fn idle() -> Vec<DisplayEvent> {
        Vec::new()
    }

    fn releases(journal: &Journal) -> Vec<&'static str> {
        journal.borrow().clone()
    }

    #[test]
    fn test_one_display_per_frame_then_quit() {
        let journal = Journal::default();
        let camera = ScriptedCamera::new(vec![frame(1), frame(2), frame(3)], &journal);
        let window = ScriptedWindow::new(vec![idle(), idle(), key('q')], &journal);
        let shown = window.shown.clone();

        let stats = CaptureLoop::new(camera, window, Grayscale, LoopSettings::default())
            .run()
            .unwrap();

        assert_eq!(stats.frames_displayed, 3);
        assert_eq!(stats.iterations, 3);
        assert_eq!(stats.stop_reason, Some(StopReason::QuitKey));
        assert_eq!(shown.borrow().len(), 3);
        assert!(shown.borrow().iter().all(|f| f.format == PixelFormat::Gray));
        assert_eq!(releases(&journal), vec!["camera released", "window closed"]);
    }

    #[test]
    fn test_failed_read_never_reaches_processor() {
        let journal = Journal::default();
        let camera = ScriptedCamera::new(
            vec![frame(10), Err(CaptureError::ReadFailed("timeout".into())), frame(20)],
            &journal,
        );
        let window = ScriptedWindow::new(vec![idle(), idle(), key('q')], &journal);
        let shown = window.shown.clone();
        let recorder = Recorder::default();
        let seen = recorder.seen.clone();

        let stats = CaptureLoop::new(camera, window, recorder, LoopSettings::default())
            .run()
            .unwrap();

        assert_eq!(stats.iterations, 3);
        assert_eq!(stats.frames_read, 2);
        assert_eq!(stats.read_failures, 1);
        assert_eq!(seen.borrow().len(), 2);
        assert_eq!(seen.borrow()[0].data[0], 10);
        assert_eq!(seen.borrow()[1].data[0], 20);
        assert_eq!(shown.borrow().len(), 2);
    }

    #[test]
    fn test_quit_key_is_honoured_while_reads_fail() {
        let journal = Journal::default();
        let camera = ScriptedCamera::new(vec![], &journal);
        let window = ScriptedWindow::new(vec![idle(), key('q')], &journal);

        let stats = CaptureLoop::new(camera, window, Grayscale, LoopSettings::default())
            .run()
            .unwrap();

        assert_eq!(stats.frames_displayed, 0);
        assert_eq!(stats.read_failures, 2);
        assert_eq!(stats.stop_reason, Some(StopReason::QuitKey));
    }

    #[test]
    fn test_other_keys_do_not_stop() {
        let journal = Journal::default();
        let camera = ScriptedCamera::new(vec![frame(1), frame(2)], &journal);
        let window = ScriptedWindow::new(vec![key('x'), key('q')], &journal);

        let stats = CaptureLoop::new(camera, window, Grayscale, LoopSettings::default())
            .run()
            .unwrap();

        assert_eq!(stats.frames_displayed, 2);
        assert_eq!(stats.stop_reason, Some(StopReason::QuitKey));
    }

    #[test]
    fn test_window_close_stops_loop() {
        let journal = Journal::default();
        let camera = ScriptedCamera::new(vec![frame(1)], &journal);
        let window = ScriptedWindow::new(vec![vec![DisplayEvent::CloseRequested]], &journal);

        let stats = CaptureLoop::new(camera, window, Grayscale, LoopSettings::default())
            .run()
            .unwrap();

        assert_eq!(stats.stop_reason, Some(StopReason::WindowClosed));
        assert_eq!(releases(&journal).len(), 2);
    }

    #[test]
    fn test_cancelled_before_first_iteration_releases_once() {
        let journal = Journal::default();
        let camera = ScriptedCamera::new(vec![frame(1)], &journal);
        let window = ScriptedWindow::new(vec![], &journal);
        let shown = window.shown.clone();

        let stop = Arc::new(AtomicBool::new(true));
        let stats = CaptureLoop::new(camera, window, Grayscale, LoopSettings::default())
            .with_stop_flag(stop)
            .run()
            .unwrap();

        assert_eq!(stats.iterations, 0);
        assert_eq!(stats.stop_reason, Some(StopReason::Cancelled));
        assert!(shown.borrow().is_empty());
        assert_eq!(releases(&journal), vec!["camera released", "window closed"]);
    }

    #[test]
    fn test_single_iteration_releases_once() {
        let journal = Journal::default();
        let camera = ScriptedCamera::new(vec![frame(1)], &journal);
        let window = ScriptedWindow::new(vec![key('q')], &journal);

        let stats = CaptureLoop::new(camera, window, Grayscale, LoopSettings::default())
            .run()
            .unwrap();

        assert_eq!(stats.iterations, 1);
        assert_eq!(releases(&journal), vec!["camera released", "window closed"]);
    }

    #[test]
    fn test_processing_error_still_releases() {
        let journal = Journal::default();
        let camera = ScriptedCamera::new(vec![frame(1)], &journal);
        let window = ScriptedWindow::new(vec![idle()], &journal);
        let shown = window.shown.clone();
        let recorder = Recorder {
            fail: true,
            ..Default::default()
        };

        let err = CaptureLoop::new(camera, window, recorder, LoopSettings::default())
            .run()
            .unwrap_err();

        assert!(format!("{:#}", err).contains("boom"));
        assert!(shown.borrow().is_empty());
        assert_eq!(releases(&journal), vec!["camera released", "window closed"]);
    }

    #[test]
    fn test_device_loss_is_fatal() {
        let journal = Journal::default();
        let camera = ScriptedCamera::new(
            vec![
                frame(1),
                Err(CaptureError::DeviceUnavailable {
                    index: 0,
                    reason: "unplugged".into(),
                }),
            ],
            &journal,
        );
        let window = ScriptedWindow::new(vec![idle(), idle()], &journal);

        let result = CaptureLoop::new(camera, window, Grayscale, LoopSettings::default()).run();

        assert!(result.is_err());
        assert_eq!(releases(&journal).len(), 2);
    }

    #[test]
    fn test_frame_limit() {
        let journal = Journal::default();
        let camera = ScriptedCamera::new(vec![frame(1), frame(2), frame(3)], &journal);
        let window = ScriptedWindow::new(vec![idle(), idle(), idle()], &journal);
        let settings = LoopSettings {
            max_frames: Some(2),
            ..Default::default()
        };

        let stats = CaptureLoop::new(camera, window, Grayscale, settings).run().unwrap();

        assert_eq!(stats.frames_displayed, 2);
        assert_eq!(stats.stop_reason, Some(StopReason::FrameLimit));
    }

    #[test]
    fn test_consecutive_failure_limit() {
        let journal = Journal::default();
        let camera = ScriptedCamera::new(
            vec![
                Err(CaptureError::ReadFailed("a".into())),
                frame(1),
                Err(CaptureError::Decode("b".into())),
                Err(CaptureError::ReadFailed("c".into())),
            ],
            &journal,
        );
        let window = ScriptedWindow::new(vec![idle(); 4], &journal);
        let settings = LoopSettings {
            max_consecutive_failures: Some(2),
            ..Default::default()
        };

        let err = CaptureLoop::new(camera, window, Grayscale, settings).run().unwrap_err();

        assert!(err.to_string().contains("2 consecutive"));
        assert_eq!(releases(&journal).len(), 2);
    }

    #[test]
    fn test_quit_behind_queued_keys_stops_same_iteration() {
        let journal = Journal::default();
        let camera = ScriptedCamera::new(vec![frame(1), frame(2), frame(3)], &journal);
        let keys = vec![
            DisplayEvent::Key('a'),
            DisplayEvent::Key('b'),
            DisplayEvent::Key('q'),
        ];
        let window = ScriptedWindow::new(vec![keys, idle(), idle()], &journal);

        let stats = CaptureLoop::new(camera, window, Grayscale, LoopSettings::default())
            .run()
            .unwrap();

        assert_eq!(stats.iterations, 1);
        assert_eq!(stats.frames_displayed, 1);
        assert_eq!(stats.stop_reason, Some(StopReason::QuitKey));
    }

    #[test]
    fn test_stop_reason_takes_first_stopping_event() {
        use DisplayEvent::{CloseRequested, Key};

        assert_eq!(stop_reason_for(&[], 'q'), None);
        assert_eq!(stop_reason_for(&[Key('x'), Key('y')], 'q'), None);
        assert_eq!(stop_reason_for(&[Key('x'), Key('q')], 'q'), Some(StopReason::QuitKey));
        assert_eq!(
            stop_reason_for(&[CloseRequested, Key('q')], 'q'),
            Some(StopReason::WindowClosed)
        );
        assert_eq!(stop_reason_for(&[Key('Q')], 'q'), None);
    }

    #[test]
    fn test_custom_quit_key() {
        let journal = Journal::default();
        let camera = ScriptedCamera::new(vec![frame(1), frame(2)], &journal);
        let window = ScriptedWindow::new(vec![key('q'), key('x')], &journal);
        let settings = LoopSettings {
            quit_key: 'x',
            ..Default::default()
        };

        let stats = CaptureLoop::new(camera, window, Grayscale, settings).run().unwrap();

        assert_eq!(stats.frames_displayed, 2);
        assert_eq!(stats.stop_reason, Some(StopReason::QuitKey));
    }

    #[test]
    fn test_contour_variant_displays_color_frames() {
        let journal = Journal::default();
        let camera = ScriptedCamera::new(vec![frame(90)], &journal);
        let window = ScriptedWindow::new(vec![key('q')], &journal);
        let shown = window.shown.clone();

        CaptureLoop::new(camera, window, ContourFill::default(), LoopSettings::default())
            .run()
            .unwrap();

        let shown = shown.borrow();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].format, PixelFormat::Rgb);
        assert_eq!(shown[0].data, vec![90; 48]);
    }
}
