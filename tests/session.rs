// This is free and unencumbered software released into the public domain.

use camera_session::shared::{
    drivers::synthetic::{SyntheticProvider, test_pattern},
    *,
};
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    thread::ThreadId,
    time::Duration,
};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct RecordingHost {
    granted: bool,
    viewport: Size,
    permission_requests: Vec<(Vec<Permission>, RequestCode)>,
    provider_requests: usize,
    dialogs: Vec<AlertDialog>,
    capturing: Vec<bool>,
    finishes: usize,
    rendered: Arc<AtomicUsize>,
}

impl RecordingHost {
    fn granted() -> Self {
        Self {
            granted: true,
            viewport: Size::new(1080, 1920),
            ..Default::default()
        }
    }

    fn ungranted() -> Self {
        Self {
            granted: false,
            viewport: Size::new(1080, 1920),
            ..Default::default()
        }
    }
}

impl Host for RecordingHost {
    fn check_permission(&self, _permission: &Permission) -> PermissionStatus {
        if self.granted {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        }
    }

    fn request_permissions(&mut self, permissions: &[Permission], request_code: RequestCode) {
        self.permission_requests
            .push((permissions.to_vec(), request_code));
    }

    fn request_provider(&mut self) {
        self.provider_requests += 1;
    }

    fn viewport(&self) -> Size {
        self.viewport
    }

    fn preview_surface(&self) -> FrameSink {
        let rendered = Arc::clone(&self.rendered);
        Arc::new(move |_| {
            rendered.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn show_dialog(&mut self, dialog: &AlertDialog) {
        self.dialogs.push(dialog.clone());
    }

    fn set_capturing(&mut self, capturing: bool) {
        self.capturing.push(capturing);
    }

    fn finish(&mut self) {
        self.finishes += 1;
    }
}

type Session = SessionController<RecordingHost>;

fn permission_result(request_code: RequestCode, status: PermissionStatus) -> SessionEvent {
    SessionEvent::PermissionResult {
        request_code,
        permissions: vec![Permission::Camera],
        grant_results: vec![status],
    }
}

fn provider_ready(provider: &SyntheticProvider) -> SessionEvent {
    SessionEvent::ProviderReady(Ok(Box::new(provider.clone())))
}

fn previewing(session: &mut Session) -> SyntheticProvider {
    session.handle(SessionEvent::Created).unwrap();
    assert_eq!(session.phase(), SessionPhase::AwaitingProvider);
    let provider = SyntheticProvider::new();
    session.handle(provider_ready(&provider)).unwrap();
    assert_eq!(session.phase(), SessionPhase::Previewing);
    provider
}

fn frame() -> Frame {
    test_pattern(Size::new(4, 4), 0)
}

#[test]
fn granted_permission_binds_exactly_one_preview() {
    let mut session = Session::new(RecordingHost::granted(), SessionConfig::default()).unwrap();
    let provider = previewing(&mut session);

    assert!(session.host().permission_requests.is_empty());
    assert_eq!(session.host().provider_requests, 1);
    assert_eq!(provider.bound().len(), 1);
    assert_eq!(provider.bind_count(), 1);
    assert_eq!(provider.max_concurrent_previews(), 1);

    let preview = session.preview().unwrap();
    assert_eq!(preview.target_resolution(), Size::new(1080, 1920));
    assert_eq!(
        provider.selector_of(preview.id()),
        Some(CameraSelector::DEFAULT_BACK_CAMERA)
    );

    provider.emit(frame());
    assert_eq!(session.host().rendered.load(Ordering::SeqCst), 1);

    // A late duplicate provider is not bound a second time.
    let late = SyntheticProvider::new();
    session.handle(provider_ready(&late)).unwrap();
    assert_eq!(late.bind_count(), 0);
    assert_eq!(provider.max_concurrent_previews(), 1);
}

#[test]
fn missing_permission_keeps_one_request_outstanding() {
    let mut session = Session::new(RecordingHost::ungranted(), SessionConfig::default()).unwrap();

    session.handle(SessionEvent::Created).unwrap();
    session.handle(SessionEvent::Created).unwrap();

    assert_eq!(session.phase(), SessionPhase::Unpermitted);
    assert_eq!(
        session.host().permission_requests,
        vec![(vec![Permission::Camera], session.request_code())]
    );
    assert_eq!(session.host().provider_requests, 0);
}

#[test]
fn granted_callback_acquires_the_provider() {
    let mut session = Session::new(RecordingHost::ungranted(), SessionConfig::default()).unwrap();
    session.handle(SessionEvent::Created).unwrap();

    let code = session.request_code();
    session
        .handle(permission_result(code, PermissionStatus::Granted))
        .unwrap();
    assert_eq!(session.phase(), SessionPhase::AwaitingProvider);
    assert_eq!(session.host().provider_requests, 1);

    let provider = SyntheticProvider::new();
    session.handle(provider_ready(&provider)).unwrap();
    assert_eq!(session.phase(), SessionPhase::Previewing);
    assert_eq!(provider.bound().len(), 1);
}

#[test]
fn denied_permission_is_fatal_and_binds_nothing() {
    let mut session = Session::new(RecordingHost::ungranted(), SessionConfig::default()).unwrap();
    session.handle(SessionEvent::Created).unwrap();
    let code = session.request_code();

    let err = session
        .handle(permission_result(code, PermissionStatus::Denied))
        .unwrap_err();
    assert!(matches!(err, CameraError::PermissionDenied));
    assert_eq!(session.phase(), SessionPhase::PermissionDenied);

    // No retry within the session, and nothing can be bound.
    session
        .handle(permission_result(code, PermissionStatus::Denied))
        .unwrap();
    session.handle(SessionEvent::Created).unwrap();
    let provider = SyntheticProvider::new();
    session.handle(provider_ready(&provider)).unwrap();
    session.handle(SessionEvent::TogglePressed).unwrap();

    assert_eq!(session.phase(), SessionPhase::PermissionDenied);
    assert_eq!(provider.bind_count(), 0);
    assert_eq!(session.host().permission_requests.len(), 1);
    assert_eq!(session.host().dialogs, vec![AlertDialog::permission_required()]);
    assert_eq!(session.dialogs_shown(), 1);
    assert_eq!(session.host().finishes, 0);

    session.handle(SessionEvent::DialogAcknowledged).unwrap();
    assert_eq!(session.host().finishes, 1);
}

#[test]
fn mismatched_permission_results_are_ignored() {
    let mut session = Session::new(RecordingHost::ungranted(), SessionConfig::default()).unwrap();
    session.handle(SessionEvent::Created).unwrap();
    let foreign = RequestCode(session.request_code().0.wrapping_add(1));

    session
        .handle(permission_result(foreign, PermissionStatus::Granted))
        .unwrap();
    session
        .handle(permission_result(foreign, PermissionStatus::Denied))
        .unwrap();
    session
        .handle(SessionEvent::PermissionResult {
            request_code: session.request_code(),
            permissions: vec![Permission::Other("android.permission.RECORD_AUDIO".into())],
            grant_results: vec![PermissionStatus::Denied],
        })
        .unwrap();

    assert_eq!(session.phase(), SessionPhase::Unpermitted);
    assert_eq!(session.host().provider_requests, 0);
    assert!(session.host().dialogs.is_empty());
}

#[test]
fn cancelled_permission_request_can_be_issued_again() {
    let mut session = Session::new(RecordingHost::ungranted(), SessionConfig::default()).unwrap();
    session.handle(SessionEvent::Created).unwrap();

    session
        .handle(SessionEvent::PermissionResult {
            request_code: session.request_code(),
            permissions: vec![Permission::Camera],
            grant_results: vec![],
        })
        .unwrap();
    assert_eq!(session.phase(), SessionPhase::Unpermitted);

    session.handle(SessionEvent::Created).unwrap();
    assert_eq!(session.host().permission_requests.len(), 2);
    assert!(session.host().dialogs.is_empty());
}

#[test]
fn analysis_is_active_iff_toggle_count_is_odd() {
    let mut session = Session::new(RecordingHost::granted(), SessionConfig::default()).unwrap();
    let provider = previewing(&mut session);
    assert!(session.active_analysis().is_none());

    for presses in 1..=7 {
        session.handle(SessionEvent::TogglePressed).unwrap();
        let odd = presses % 2 == 1;
        assert_eq!(session.active_analysis().is_some(), odd, "after {presses} presses");
        assert_eq!(session.is_capturing(), odd);
        assert_eq!(provider.bound().len(), if odd { 2 } else { 1 });
    }

    assert_eq!(
        session.host().capturing,
        vec![true, false, true, false, true, false, true]
    );
    assert_eq!(provider.max_concurrent_previews(), 1);
}

#[test]
fn restarting_analysis_builds_a_new_use_case() {
    let mut session = Session::new(RecordingHost::granted(), SessionConfig::default()).unwrap();
    let provider = previewing(&mut session);

    session.handle(SessionEvent::TogglePressed).unwrap();
    let first = session.active_analysis().unwrap().clone();
    session.handle(SessionEvent::TogglePressed).unwrap();
    session.handle(SessionEvent::TogglePressed).unwrap();
    let second = session.active_analysis().unwrap().clone();

    assert_ne!(first.id(), second.id());
    assert!(!first.is_open());
    assert!(second.is_open());
    assert_eq!(second.backpressure(), Backpressure::KeepOnlyLatest);
    assert_eq!(second.target_resolution(), Size::new(1080, 1920));
    assert_eq!(provider.bind_count(), 3);
    assert_eq!(
        provider.bound(),
        vec![session.preview().unwrap().id(), second.id()]
    );
}

#[test]
fn frames_are_analyzed_on_the_worker_thread() {
    let (tx, rx) = mpsc::channel::<(ThreadId, usize)>();
    let tx = Mutex::new(tx);
    let analyzer = move |image: ImageProxy| {
        let _ = tx
            .lock()
            .unwrap()
            .send((std::thread::current().id(), image.planes.len()));
        image.close();
    };

    let mut session = Session::with_analyzer(
        RecordingHost::granted(),
        SessionConfig::default(),
        Arc::new(analyzer),
    )
    .unwrap();
    let provider = previewing(&mut session);
    session.handle(SessionEvent::TogglePressed).unwrap();

    assert_eq!(provider.emit(frame()), 2);
    let (thread, planes) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(thread, session.executor().worker_thread());
    assert_ne!(thread, std::thread::current().id());
    assert_eq!(planes, 3);
}

#[test]
fn stopped_analysis_receives_no_more_frames() {
    let (tx, rx) = mpsc::channel::<u64>();
    let tx = Mutex::new(tx);
    let analyzer = move |image: ImageProxy| {
        let _ = tx.lock().unwrap().send(image.timestamp_ns);
    };

    let mut session = Session::with_analyzer(
        RecordingHost::granted(),
        SessionConfig::default(),
        Arc::new(analyzer),
    )
    .unwrap();
    let provider = previewing(&mut session);

    session.handle(SessionEvent::TogglePressed).unwrap();
    provider.emit(frame().with_timestamp_ns(1));
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 1);

    session.handle(SessionEvent::TogglePressed).unwrap();
    assert_eq!(provider.emit(frame().with_timestamp_ns(2)), 1);
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(session.host().rendered.load(Ordering::SeqCst), 2);
}

#[test]
fn destroy_shuts_the_worker_down_once_from_every_phase() {
    type Setup = fn(&mut Session);
    let setups: [(SessionPhase, Setup); 6] = [
        (SessionPhase::Unpermitted, |_: &mut Session| {}),
        (SessionPhase::Unpermitted, |s: &mut Session| {
            s.host_mut().granted = false;
            s.handle(SessionEvent::Created).unwrap();
        }),
        (SessionPhase::AwaitingProvider, |s: &mut Session| {
            s.handle(SessionEvent::Created).unwrap();
        }),
        (SessionPhase::Previewing, |s: &mut Session| {
            previewing(s);
        }),
        (SessionPhase::Analyzing, |s: &mut Session| {
            previewing(s);
            s.handle(SessionEvent::TogglePressed).unwrap();
        }),
        (SessionPhase::PermissionDenied, |s: &mut Session| {
            s.host_mut().granted = false;
            s.handle(SessionEvent::Created).unwrap();
            let code = s.request_code();
            s.handle(permission_result(code, PermissionStatus::Denied))
                .unwrap_err();
        }),
    ];

    for (phase, setup) in setups {
        let mut session =
            Session::new(RecordingHost::granted(), SessionConfig::default()).unwrap();
        setup(&mut session);
        assert_eq!(session.phase(), phase);

        session.handle(SessionEvent::Destroyed).unwrap();
        session.handle(SessionEvent::Destroyed).unwrap();

        assert_eq!(session.phase(), SessionPhase::Destroyed);
        assert!(session.executor().is_shutdown());
        assert_eq!(session.executor().shutdown_count(), 1, "from {phase}");
        assert!(session.provider().is_none());
    }
}

#[test]
fn destroy_unbinds_every_use_case() {
    let mut session = Session::new(RecordingHost::granted(), SessionConfig::default()).unwrap();
    let provider = previewing(&mut session);
    session.handle(SessionEvent::TogglePressed).unwrap();
    let analysis = session.active_analysis().unwrap().clone();

    session.handle(SessionEvent::Destroyed).unwrap();
    assert!(provider.bound().is_empty());
    assert!(!analysis.is_open());

    // Nothing reacts after destruction.
    session.handle(SessionEvent::Created).unwrap();
    session.handle(SessionEvent::TogglePressed).unwrap();
    assert_eq!(session.phase(), SessionPhase::Destroyed);
    assert_eq!(session.host().provider_requests, 1);
}

#[test]
fn failed_analysis_stop_clears_capture_flag() {
    let mut session = Session::new(RecordingHost::granted(), SessionConfig::default()).unwrap();
    let provider = previewing(&mut session);
    session.handle(SessionEvent::TogglePressed).unwrap();
    let analysis = session.active_analysis().unwrap().clone();
    provider.fail_next_unbind("device lost");

    let err = session.handle(SessionEvent::TogglePressed).unwrap_err();
    assert!(matches!(err, CameraError::DriverError { .. }));
    assert_eq!(session.phase(), SessionPhase::Failed);
    assert!(!session.is_capturing());
    assert_eq!(session.host().capturing, vec![true, false]);
    assert_eq!(session.host().dialogs.len(), 1);
    assert!(provider.bound().is_empty());
    assert!(!analysis.is_open());
}

#[test]
fn provider_failure_is_fatal() {
    let mut session = Session::new(RecordingHost::granted(), SessionConfig::default()).unwrap();
    session.handle(SessionEvent::Created).unwrap();

    let err = session
        .handle(SessionEvent::ProviderReady(Err(CameraError::NoDriver)))
        .unwrap_err();
    assert!(matches!(err, CameraError::NoDriver));
    assert_eq!(session.phase(), SessionPhase::Failed);
    assert_eq!(
        session.host().dialogs,
        vec![AlertDialog::session_failed(&CameraError::NoDriver)]
    );

    session.handle(SessionEvent::DialogAcknowledged).unwrap();
    assert_eq!(session.host().finishes, 1);
}

#[test]
fn analysis_bind_failure_releases_the_camera() {
    let mut session = Session::new(RecordingHost::granted(), SessionConfig::default()).unwrap();
    let provider = previewing(&mut session);
    provider.fail_next_bind("camera in use");

    let err = session.handle(SessionEvent::TogglePressed).unwrap_err();
    assert!(matches!(err, CameraError::DriverError { .. }));
    assert_eq!(session.phase(), SessionPhase::Failed);
    assert!(!session.is_capturing());
    assert!(provider.bound().is_empty());
    assert!(session.host().capturing.is_empty());
    assert_eq!(session.dialogs_shown(), 1);
}

#[test]
fn toggle_before_preview_is_ignored() {
    let mut session = Session::new(RecordingHost::granted(), SessionConfig::default()).unwrap();
    session.handle(SessionEvent::TogglePressed).unwrap();
    session.handle(SessionEvent::Created).unwrap();
    session.handle(SessionEvent::TogglePressed).unwrap();

    assert_eq!(session.phase(), SessionPhase::AwaitingProvider);
    assert!(session.host().capturing.is_empty());
}

#[test]
fn finish_and_back_ask_the_host_to_close() {
    let mut session = Session::new(RecordingHost::granted(), SessionConfig::default()).unwrap();
    previewing(&mut session);

    session.handle(SessionEvent::FinishPressed).unwrap();
    session.handle(SessionEvent::BackPressed).unwrap();
    assert_eq!(session.host().finishes, 2);
    assert_eq!(session.phase(), SessionPhase::Previewing);

    // Acknowledging with no dialog up does nothing.
    session.handle(SessionEvent::DialogAcknowledged).unwrap();
    assert_eq!(session.host().finishes, 2);
}

#[test]
fn front_lens_and_fallback_viewport_are_honoured() {
    let host = RecordingHost {
        granted: true,
        viewport: Size::default(),
        ..Default::default()
    };
    let config = SessionConfig::new(LensFacing::Front).with_fallback_viewport(Size::new(320, 240));
    let mut session = Session::new(host, config).unwrap();
    let provider = previewing(&mut session);

    let preview = session.preview().unwrap();
    assert_eq!(preview.target_resolution(), Size::new(320, 240));
    assert_eq!(session.selector(), Some(CameraSelector::DEFAULT_FRONT_CAMERA));
    assert_eq!(
        provider.selector_of(preview.id()),
        Some(CameraSelector::DEFAULT_FRONT_CAMERA)
    );
}
