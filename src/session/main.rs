// This is free and unencumbered software released into the public domain.

#[cfg(not(feature = "std"))]
compile_error!("camera-session requires the 'std' feature");

use asimov_module::SysexitsError::{self, *};
use camera_session::{
    cli,
    shared::{
        AlertDialog, CameraBackend, CameraConfig, CameraError, FrameSink, Host, ImageProxy,
        LensFacing, Permission, PermissionStatus, RequestCode, SessionConfig, SessionController,
        SessionEvent, SessionPhase, Size, bootstrap,
    },
};
use clap::Parser;
use clientele::StandardOptions;
use serde_json::json;
use std::{
    error::Error as StdError,
    io::{self, BufRead, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::{Sender, channel},
    },
    time::Duration,
};

#[derive(Debug, Parser)]
struct Options {
    #[clap(flatten)]
    flags: StandardOptions,

    /// Camera backend [default: ffmpeg when built with it, else synthetic]
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,

    #[arg(long)]
    device: Option<String>,

    #[arg(short, long = "size", value_parser = parse_dimensions, default_value = "640x480")]
    size: (u32, u32),

    #[arg(short, long, value_parser = parse_frequency, default_value = "30")]
    frequency: f64,

    #[arg(long, value_enum, default_value = "back")]
    lens: LensArg,

    /// Simulated permission state: already granted, granted on request, or denied on request
    #[arg(long, value_enum, default_value = "granted")]
    permission: PermissionArg,

    /// Start analysis as soon as the preview is up
    #[arg(long)]
    analyze: bool,

    /// Finish the session after this many seconds
    #[arg(long, value_parser = parse_duration)]
    duration: Option<Duration>,

    #[arg(
        value_name = "FORMAT",
        short = 'o',
        long = "output",
        value_enum,
        default_value = "text"
    )]
    output: OutputFormat,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum BackendArg {
    Synthetic,
    Ffmpeg,
}

impl From<BackendArg> for CameraBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Synthetic => CameraBackend::Synthetic,
            BackendArg::Ffmpeg => CameraBackend::Ffmpeg,
        }
    }
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum LensArg {
    Back,
    Front,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum PermissionArg {
    Granted,
    Grant,
    Deny,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Jsonl,
}

pub fn main() -> Result<SysexitsError, Box<dyn StdError>> {
    asimov_module::dotenv().ok();
    let args = asimov_module::args_os()?;
    let options = Options::parse_from(args);

    if options.flags.version {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(EX_OK);
    }

    if options.flags.license {
        print!("{}", include_str!("../../UNLICENSE"));
        return Ok(EX_OK);
    }

    let backend = options
        .backend
        .map(CameraBackend::from)
        .unwrap_or_else(bootstrap::default_backend);
    if let Err(err) = cli::on_process_start(&options.flags, backend) {
        return Ok(cli::handle_error(&err, &options.flags));
    }

    let exit_code = match run_session(&options) {
        Ok(code) => code,
        Err(err) => cli::handle_error(&err, &options.flags),
    };

    Ok(exit_code)
}

fn run_session(opts: &Options) -> Result<SysexitsError, CameraError> {
    cli::info_user(&opts.flags, "starting camera session");

    let (tx, rx) = channel::<SessionEvent>();
    {
        let tx = tx.clone();
        ctrlc::set_handler(move || {
            let _ = tx.send(SessionEvent::Destroyed);
        })
        .map_err(|e| CameraError::other(format!("{e}")))?;
    }
    let stdin_closed = Arc::new(AtomicBool::new(false));
    spawn_stdin_reader(tx.clone(), Arc::clone(&stdin_closed));
    if let Some(duration) = opts.duration {
        let tx = tx.clone();
        std::thread::spawn(move || {
            std::thread::sleep(duration);
            let _ = tx.send(SessionEvent::FinishPressed);
        });
    }

    let (width, height) = opts.size;
    let mut camera = CameraConfig::new(width, height, opts.frequency)
        .with_diagnostics(opts.flags.debug || opts.flags.verbose >= 3);
    if let Some(device) = &opts.device {
        camera = camera.with_device(device.clone());
    }

    let lens = match opts.lens {
        LensArg::Back => LensFacing::Back,
        LensArg::Front => LensFacing::Front,
    };
    let config = SessionConfig::new(lens)
        .with_fallback_viewport(Size::new(width, height));

    let host = ConsoleHost::new(opts, camera, tx.clone());
    let rendered = Arc::clone(&host.rendered);
    let output = opts.output;
    let analyzer = move |image: ImageProxy| {
        if output == OutputFormat::Jsonl {
            let planes: Vec<usize> = image.planes.iter().map(|p| p.len()).collect();
            let line = json!({
                "use_case": image.use_case().get(),
                "timestamp_ns": image.timestamp_ns,
                "width": image.width,
                "height": image.height,
                "format": image.pixel_format.to_string(),
                "planes": planes,
            });
            let mut out = io::stdout().lock();
            let _ = writeln!(&mut out, "{line}");
        }
        image.close();
    };

    let mut session = SessionController::with_analyzer(host, config, Arc::new(analyzer))?;
    let mut exit_code = EX_OK;
    let mut auto_analyze = opts.analyze;
    let mut acknowledged = false;

    tx.send(SessionEvent::Created)
        .map_err(|e| CameraError::other(format!("{e}")))?;

    for event in rx.iter() {
        let destroyed = matches!(event, SessionEvent::Destroyed);
        if let Err(err) = session.handle(event) {
            exit_code = cli::handle_error(&err, &opts.flags);
        }
        if auto_analyze && session.phase() == SessionPhase::Previewing {
            auto_analyze = false;
            if let Err(err) = session.handle(SessionEvent::TogglePressed) {
                exit_code = cli::handle_error(&err, &opts.flags);
            }
        }
        if !acknowledged && awaits_unattended_ack(session.phase(), &stdin_closed) {
            acknowledged = true;
            let _ = session.handle(SessionEvent::DialogAcknowledged);
        }
        if destroyed {
            break;
        }
    }
    cli::info_user(
        &opts.flags,
        &format!(
            "session ended: {} preview frames rendered",
            rendered.load(Ordering::Relaxed)
        ),
    );

    Ok(exit_code)
}

/// Maps stdin lines to UI events: `t` toggles analysis, `q` finishes, `b`
/// goes back, an empty line acknowledges a dialog. EOF raises `closed`,
/// so a dialog shown later is acknowledged by the event loop.
fn spawn_stdin_reader(tx: Sender<SessionEvent>, closed: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let event = match line.trim() {
                "t" | "toggle" => SessionEvent::TogglePressed,
                "q" | "quit" | "finish" => SessionEvent::FinishPressed,
                "b" | "back" => SessionEvent::BackPressed,
                "" => SessionEvent::DialogAcknowledged,
                other => {
                    eprintln!("WARN: unknown command: {other}");
                    continue;
                },
            };
            if tx.send(event).is_err() {
                return;
            }
        }
        closed.store(true, Ordering::Release);
        let _ = tx.send(SessionEvent::DialogAcknowledged);
    });
}

struct ConsoleHost {
    verbose: bool,
    permission: PermissionArg,
    granted: bool,
    camera: CameraConfig,
    events: Sender<SessionEvent>,
    rendered: Arc<AtomicU64>,
    finished: bool,
}

impl ConsoleHost {
    fn new(opts: &Options, camera: CameraConfig, events: Sender<SessionEvent>) -> Self {
        Self {
            verbose: opts.flags.debug || opts.flags.verbose >= 1,
            permission: opts.permission,
            granted: opts.permission == PermissionArg::Granted,
            camera,
            events,
            rendered: Arc::new(AtomicU64::new(0)),
            finished: false,
        }
    }
}

impl Host for ConsoleHost {
    fn check_permission(&self, _permission: &Permission) -> PermissionStatus {
        if self.granted {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        }
    }

    fn request_permissions(&mut self, permissions: &[Permission], request_code: RequestCode) {
        let status = match self.permission {
            PermissionArg::Deny => PermissionStatus::Denied,
            PermissionArg::Granted | PermissionArg::Grant => PermissionStatus::Granted,
        };
        self.granted = status.is_granted();
        let _ = self.events.send(SessionEvent::PermissionResult {
            request_code,
            permissions: permissions.to_vec(),
            grant_results: vec![status; permissions.len()],
        });
    }

    fn request_provider(&mut self) {
        let events = self.events.clone();
        let config = self.camera.clone();
        std::thread::spawn(move || {
            let _ = events.send(SessionEvent::ProviderReady(bootstrap::open_provider(config)));
        });
    }

    fn viewport(&self) -> Size {
        self.camera.size()
    }

    fn preview_surface(&self) -> FrameSink {
        let rendered = Arc::clone(&self.rendered);
        Arc::new(move |_frame| {
            rendered.fetch_add(1, Ordering::Relaxed);
        })
    }

    fn show_dialog(&mut self, dialog: &AlertDialog) {
        eprintln!("{}: {}", dialog.title, dialog.message);
        eprintln!("[Enter] {}", dialog.positive_button);
    }

    fn set_capturing(&mut self, capturing: bool) {
        if self.verbose {
            eprintln!(
                "INFO: analysis {}",
                if capturing { "started" } else { "stopped" }
            );
        }
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            let _ = self.events.send(SessionEvent::Destroyed);
        }
    }
}

fn parse_dimensions(s: &str) -> Result<(u32, u32), String> {
    let s = s.trim().replace('×', "x");
    let parts: Vec<&str> = s.split('x').map(|t| t.trim()).collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(format!("Invalid format '{s}'. Use WxH (e.g., 1920x1080)"));
    }

    let width: u32 = parts[0].parse().map_err(|_| format!("Invalid width: {}", parts[0]))?;
    let height: u32 = parts[1].parse().map_err(|_| format!("Invalid height: {}", parts[1]))?;

    if !(160..=7680).contains(&width) {
        return Err(format!("Width {width} is out of reasonable range (160-7680)"));
    }
    if !(120..=4320).contains(&height) {
        return Err(format!("Height {height} is out of reasonable range (120-4320)"));
    }

    Ok((width, height))
}

fn parse_frequency(s: &str) -> Result<f64, String> {
    let freq: f64 = s.parse().map_err(|_| format!("Invalid frequency: {s}"))?;

    if freq <= 0.0 {
        return Err("Frequency must be positive".to_string());
    }
    if freq > 240.0 {
        return Err(format!("Frequency {freq} Hz exceeds reasonable maximum (240 Hz)"));
    }

    Ok(freq)
}

/// Nobody is left to acknowledge a fatal dialog once stdin is gone.
fn awaits_unattended_ack(phase: SessionPhase, stdin_closed: &AtomicBool) -> bool {
    stdin_closed.load(Ordering::Acquire)
        && matches!(phase, SessionPhase::PermissionDenied | SessionPhase::Failed)
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|_| format!("Invalid duration: {s}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("Invalid duration {s}: {e}"))
}
