// This is free and unencumbered software released into the public domain.

use crate::shared::{
    CameraBackend, CameraConfig, CameraError, CameraProvider, CameraSelector, Frame, UseCase,
    UseCaseId,
};
use alloc::borrow::Cow;
use bytes::Bytes;
use std::{
    env,
    io::Read,
    process::{Child, Command, Stdio},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

type Bound = Arc<Mutex<Vec<UseCase>>>;

/// Desktop provider reading raw RGB frames from an `ffmpeg` child process.
///
/// The child runs only while at least one use-case is bound. Desktop
/// devices have a single lens, so the selector is recorded but not used.
pub struct FfmpegProvider {
    config: CameraConfig,
    bound: Bound,
    child: Option<Child>,
    stop: Arc<AtomicBool>,
    reader_join: Option<JoinHandle<()>>,
}

impl core::fmt::Debug for FfmpegProvider {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FfmpegProvider")
            .field("config", &self.config)
            .field("child", &self.child.as_ref().map(|_| "<child>"))
            .finish()
    }
}

impl FfmpegProvider {
    pub fn new(config: CameraConfig) -> Result<Self, CameraError> {
        if config.width == 0 || config.height == 0 {
            return Err(CameraError::invalid_config(format!(
                "frame size {}x{}",
                config.width, config.height
            )));
        }
        Ok(Self {
            config,
            bound: Arc::default(),
            child: None,
            stop: Arc::new(AtomicBool::new(false)),
            reader_join: None,
        })
    }

    #[inline]
    fn now_ns_best_effort() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<UseCase>> {
        self.bound.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn start(&mut self) -> Result<(), CameraError> {
        if self.child.is_some() {
            return Ok(());
        }

        self.stop.store(false, Ordering::Relaxed);

        let mut child = spawn_reader(&self.config)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CameraError::other("ffmpeg stdout not piped"))?;

        let width = self.config.width;
        let height = self.config.height;
        let stride = width.saturating_mul(3);
        let frame_size = (stride as usize).saturating_mul(height as usize);

        let stop = Arc::clone(&self.stop);
        let bound = Arc::clone(&self.bound);

        let join = std::thread::spawn(move || {
            let mut reader = std::io::BufReader::new(stdout);

            while !stop.load(Ordering::Relaxed) {
                let mut buf = vec![0u8; frame_size];
                match reader.read_exact(&mut buf) {
                    Ok(()) => {
                        let frame = Frame::new_rgb8(Bytes::from(buf), width, height, stride)
                            .with_timestamp_ns(FfmpegProvider::now_ns_best_effort());
                        let use_cases = bound.lock().unwrap_or_else(|p| p.into_inner()).clone();
                        for use_case in use_cases {
                            use_case.deliver(frame.clone());
                        }
                    },
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                    Err(e) => {
                        warn!("ffmpeg read failed: {e}");
                        break;
                    },
                }
            }
        });

        self.reader_join = Some(join);
        self.child = Some(child);
        debug!("ffmpeg capture started");

        Ok(())
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.stop_child();
        if let Some(j) = self.reader_join.take() {
            let _ = j.join();
        }
    }

    fn stop_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            #[cfg(unix)]
            {
                unsafe {
                    let _ = libc::kill(child.id() as i32, libc::SIGTERM);
                }
                let start = std::time::Instant::now();
                while start.elapsed() < Duration::from_millis(900) {
                    if let Ok(Some(_)) = child.try_wait() {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
            }
            let _ = child.kill();
            let _ = child.wait();
            debug!("ffmpeg capture stopped");
        }
    }
}

impl dogma::Named for FfmpegProvider {
    fn name(&self) -> Cow<'_, str> {
        "ffmpeg".into()
    }
}

impl CameraProvider for FfmpegProvider {
    fn backend(&self) -> CameraBackend {
        CameraBackend::Ffmpeg
    }

    fn bind(&mut self, selector: &CameraSelector, use_case: &UseCase) -> Result<(), CameraError> {
        {
            let mut bound = self.lock();
            if bound.iter().any(|u| u.id() == use_case.id()) {
                return Err(CameraError::AlreadyBound(use_case.id().get()));
            }
            bound.push(use_case.clone());
        }
        debug!(
            "bound use case #{} ({} lens requested)",
            use_case.id(),
            selector.lens_facing
        );
        if let Err(err) = self.start() {
            self.lock().retain(|u| u.id() != use_case.id());
            return Err(err);
        }
        Ok(())
    }

    fn unbind(&mut self, use_case: &UseCase) -> Result<(), CameraError> {
        let now_empty = {
            let mut bound = self.lock();
            let Some(index) = bound.iter().position(|u| u.id() == use_case.id()) else {
                return Err(CameraError::NotBound(use_case.id().get()));
            };
            bound.remove(index).detach();
            bound.is_empty()
        };
        if now_empty {
            self.stop();
        }
        Ok(())
    }

    fn unbind_all(&mut self) {
        let removed: Vec<UseCase> = self.lock().drain(..).collect();
        for use_case in removed {
            use_case.detach();
        }
        self.stop();
    }

    fn bound(&self) -> Vec<UseCaseId> {
        self.lock().iter().map(|u| u.id()).collect()
    }

}

impl Drop for FfmpegProvider {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_reader(config: &CameraConfig) -> Result<Child, CameraError> {
    let device = config.device.as_deref().unwrap_or("").trim();
    let input_device = get_input_device(device);

    let framerate = if config.fps > 0.0 { config.fps.round() as u32 } else { 30 };

    let mut ffargs: Vec<String> = vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-nostats".into(),
        "-f".into(),
        ffmpeg_format().into(),
        "-loglevel".into(),
        "error".into(),
        "-video_size".into(),
        format!("{}x{}", config.width, config.height),
        "-framerate".into(),
        framerate.to_string(),
    ];

    #[cfg(target_os = "macos")]
    {
        ffargs.push("-pixel_format".into());
        ffargs.push("0rgb".into());
    }

    ffargs.extend([
        "-i".into(),
        input_device,
        "-pix_fmt".into(),
        "rgb24".into(),
        "-f".into(),
        "rawvideo".into(),
        "pipe:1".into(),
    ]);

    let stderr = if config.diagnostics || env::var_os("CAMERA_SESSION_FFMPEG_STDERR").is_some() {
        Stdio::inherit()
    } else {
        Stdio::null()
    };

    Command::new("ffmpeg")
        .args(&ffargs)
        .stdout(Stdio::piped())
        .stderr(stderr)
        .spawn()
        .map_err(|e| CameraError::driver("spawning ffmpeg", e))
}

#[cfg(target_os = "macos")]
fn ffmpeg_format() -> &'static str {
    "avfoundation"
}

#[cfg(target_os = "windows")]
fn ffmpeg_format() -> &'static str {
    "dshow"
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn ffmpeg_format() -> &'static str {
    "v4l2"
}

#[cfg(target_os = "macos")]
fn get_input_device(device: &str) -> String {
    let d = device.strip_prefix("avf:").unwrap_or(device);
    if d.is_empty() { "0".into() } else { d.to_string() }
}

#[cfg(target_os = "windows")]
fn get_input_device(device: &str) -> String {
    let d = device.strip_prefix("dshow:").unwrap_or(device);
    if d.is_empty() { "video=default".into() } else { d.to_string() }
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn get_input_device(device: &str) -> String {
    let d = device.strip_prefix("file:").unwrap_or(device);
    if d.is_empty() {
        "/dev/video0".to_string()
    } else if d.chars().all(|c| c.is_ascii_digit()) {
        format!("/dev/video{d}")
    } else {
        d.to_string()
    }
}
