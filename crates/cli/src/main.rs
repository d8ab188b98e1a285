use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand, ValueEnum};

use maskguard_core::capture::infrastructure::ffmpeg_camera_source::FfmpegCameraSource;
use maskguard_core::capture::infrastructure::jpeg_frame_encoder::JpegFrameEncoder;
use maskguard_core::capture::infrastructure::refresh_ticker::RefreshTicker;
use maskguard_core::detection::domain::throttle_gate::ThrottleGate;
use maskguard_core::detection::infrastructure::http_detector_client::HttpDetectorClient;
use maskguard_core::pipeline::capture_loop_controller::CaptureLoopController;
use maskguard_core::pipeline::detect_image_use_case::DetectImageUseCase;
use maskguard_core::pipeline::detection_request_pipeline::DetectionRequestPipeline;
use maskguard_core::pipeline::live_feed::{LiveFeed, LiveFeedError, LiveFeedMode};
use maskguard_core::pipeline::session_logger::{SharedSessionLogger, StdoutSessionLogger};
use maskguard_core::presentation::infrastructure::file_display_surface::FileDisplaySurface;
use maskguard_core::shared::constants::IMAGE_EXTENSIONS;
use maskguard_core::shared::detection_result::DetectionResult;
use maskguard_core::shared::result_store::ResultStore;
use maskguard_core::shared::settings::Settings;
use maskguard_core::streaming::infrastructure::socketio_connector::SocketIoConnector;
use maskguard_core::streaming::push_stream_session::PushStreamSession;

const CONSOLE_HELP: &str = "Commands: poll | stream | off | debug | coordinator | status | help | quit";

/// Face mask detection against a remote detector, live or on still images.
#[derive(Parser)]
#[command(name = "maskguard", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Detection endpoint (HTTP POST).
    #[arg(long, global = true)]
    detector_url: Option<String>,

    /// Push-streaming service (Socket.IO).
    #[arg(long, global = true)]
    stream_url: Option<String>,

    /// Camera device path or name.
    #[arg(long, global = true)]
    camera: Option<String>,

    /// ffmpeg input driver for the camera (v4l2, avfoundation, dshow).
    #[arg(long, global = true)]
    camera_driver: Option<String>,

    /// JPEG quality for uploaded frames (1-100).
    #[arg(long, global = true)]
    jpeg_quality: Option<u8>,

    /// Only every Nth frame is eligible for detection.
    #[arg(long, global = true)]
    frame_stride: Option<u64>,

    /// Minimum milliseconds between two detection requests.
    #[arg(long, global = true)]
    min_interval_ms: Option<u64>,

    /// Refresh rate that paces the capture loop.
    #[arg(long, global = true)]
    refresh_hz: Option<f64>,

    /// Detector request timeout in milliseconds.
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Where the latest annotated frame is written.
    #[arg(long, short, global = true)]
    output: Option<PathBuf>,

    /// Persist the effective settings as the new defaults.
    #[arg(long, global = true)]
    save_settings: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive live feed driven by line commands on stdin.
    Live {
        /// Mode to enter right away.
        #[arg(long, value_enum)]
        start: Option<StartMode>,
    },
    /// Detect masks in a single image file.
    Detect {
        /// Image to upload.
        image: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StartMode {
    Poll,
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsoleCommand {
    Poll,
    Stream,
    Off,
    Debug,
    Coordinator,
    Status,
    Help,
    Quit,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = apply_overrides(Settings::load(), &cli);
    settings.validate()?;

    if cli.save_settings {
        let path = settings.save()?;
        log::info!("Settings saved to {}", path.display());
    }

    match cli.command {
        Command::Detect { image } => run_detect(&settings, &image),
        Command::Live { start } => run_live(&settings, start),
    }
}

fn apply_overrides(mut settings: Settings, cli: &Cli) -> Settings {
    if let Some(url) = &cli.detector_url {
        settings.detector_url = url.clone();
    }
    if let Some(url) = &cli.stream_url {
        settings.stream_url = url.clone();
    }
    if let Some(device) = &cli.camera {
        settings.camera.device = device.clone();
    }
    if let Some(driver) = &cli.camera_driver {
        settings.camera.driver = driver.clone();
    }
    if let Some(quality) = cli.jpeg_quality {
        settings.jpeg_quality = quality;
    }
    if let Some(stride) = cli.frame_stride {
        settings.frame_stride = stride;
    }
    if let Some(ms) = cli.min_interval_ms {
        settings.min_submit_interval_ms = ms;
    }
    if let Some(hz) = cli.refresh_hz {
        settings.refresh_hz = hz;
    }
    if let Some(ms) = cli.timeout_ms {
        settings.request_timeout_ms = ms;
    }
    if let Some(output) = &cli.output {
        settings.output = output.clone();
    }
    settings
}

fn build_pipeline(
    settings: &Settings,
    results: Arc<ResultStore>,
    logger: SharedSessionLogger,
) -> Result<Arc<DetectionRequestPipeline>, Box<dyn std::error::Error>> {
    let endpoint = HttpDetectorClient::new(&settings.detector_url, settings.request_timeout())?;
    let gate = ThrottleGate::new(settings.frame_stride, settings.min_submit_interval())?;
    Ok(Arc::new(DetectionRequestPipeline::new(
        Arc::new(endpoint),
        gate,
        results,
        logger,
    )))
}

fn run_detect(settings: &Settings, image: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if !is_image(image) {
        return Err(format!(
            "Expected an image ({}), got {}",
            IMAGE_EXTENSIONS.join(", "),
            image.display()
        )
        .into());
    }

    let surface = Arc::new(FileDisplaySurface::new(&settings.output));
    let results = Arc::new(ResultStore::new(surface));
    let logger: SharedSessionLogger = Arc::new(Mutex::new(StdoutSessionLogger::new()));
    let pipeline = build_pipeline(settings, results, logger)?;

    let result = DetectImageUseCase::new(pipeline).execute(image)?;
    print_result(&result);
    if result.annotated_image.is_some() {
        println!("Annotated image written to {}", settings.output.display());
    }
    Ok(())
}

fn run_live(settings: &Settings, start: Option<StartMode>) -> Result<(), Box<dyn std::error::Error>> {
    let surface = Arc::new(FileDisplaySurface::new(&settings.output));
    let results = Arc::new(ResultStore::new(surface));
    let logger: SharedSessionLogger = Arc::new(Mutex::new(StdoutSessionLogger::new()));
    let pipeline = build_pipeline(settings, results.clone(), logger.clone())?;

    let capture = CaptureLoopController::new(
        Box::new(FfmpegCameraSource::new(settings.camera.clone())),
        Box::new(RefreshTicker::new(settings.refresh_period())),
        Arc::new(JpegFrameEncoder::new(settings.jpeg_quality)),
        pipeline,
        logger,
    );
    let stream = PushStreamSession::new(
        Box::new(SocketIoConnector::new(&settings.stream_url)),
        results,
    );
    let mut feed = LiveFeed::new(capture, stream);

    eprintln!("{CONSOLE_HELP}");
    eprintln!("Annotated frames are written to {}", settings.output.display());
    match start {
        Some(StartMode::Poll) => execute(&mut feed, ConsoleCommand::Poll),
        Some(StartMode::Stream) => execute(&mut feed, ConsoleCommand::Stream),
        None => {}
    }

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_command(&line) {
            Some(ConsoleCommand::Quit) => break,
            Some(command) => execute(&mut feed, command),
            None => eprintln!("Unknown command '{}'. {CONSOLE_HELP}", line.trim()),
        }
        io::stderr().flush()?;
    }

    feed.stop();
    Ok(())
}

fn parse_command(line: &str) -> Option<ConsoleCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "poll" | "p" => Some(ConsoleCommand::Poll),
        "stream" | "s" => Some(ConsoleCommand::Stream),
        "off" | "stop" => Some(ConsoleCommand::Off),
        "debug" | "d" => Some(ConsoleCommand::Debug),
        "coordinator" | "c" => Some(ConsoleCommand::Coordinator),
        "status" => Some(ConsoleCommand::Status),
        "help" | "?" => Some(ConsoleCommand::Help),
        "quit" | "q" | "exit" => Some(ConsoleCommand::Quit),
        _ => None,
    }
}

/// Failures here are reported and the console keeps running.
fn execute(feed: &mut LiveFeed, command: ConsoleCommand) {
    match command {
        ConsoleCommand::Poll => match feed.start_polling() {
            Ok(()) => eprintln!("Polling: local camera -> detector"),
            Err(LiveFeedError::Capture(e)) => eprintln!("Error accessing camera: {e}"),
            Err(e) => eprintln!("Error: {e}"),
        },
        ConsoleCommand::Stream => match feed.start_streaming() {
            Ok(()) => eprintln!("Streaming: server-rendered frames"),
            Err(e) => eprintln!("Error: {e}"),
        },
        ConsoleCommand::Off => {
            feed.stop();
            eprintln!("Feed off");
        }
        ConsoleCommand::Debug => {
            let on = feed.toggle_debug();
            eprintln!("Debug mode: {}", if on { "ON" } else { "OFF" });
        }
        ConsoleCommand::Coordinator => {
            let coordinator = feed.toggle_coordinator();
            eprintln!("Using: {coordinator}");
        }
        ConsoleCommand::Status => print_status(feed),
        ConsoleCommand::Help => eprintln!("{CONSOLE_HELP}"),
        ConsoleCommand::Quit => {}
    }
}

fn print_status(feed: &LiveFeed) {
    let mode = match feed.mode() {
        LiveFeedMode::Off => "off",
        LiveFeedMode::Polling => "polling",
        LiveFeedMode::Streaming => "streaming",
    };
    eprintln!("Mode: {mode} ({})", feed.intent());
    match feed.stream().results().current() {
        Some(result) => print_result(&result),
        None => eprintln!("No detection result yet"),
    }
}

fn print_result(result: &DetectionResult) {
    if result.detections.is_empty() {
        println!("No faces detected");
        return;
    }
    println!("Detection results ({} faces):", result.detections.len());
    for (i, detection) in result.detections.iter().enumerate() {
        println!("  {}. {}", i + 1, detection.describe());
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::poll("poll", Some(ConsoleCommand::Poll))]
    #[case::short_stream(" s ", Some(ConsoleCommand::Stream))]
    #[case::uppercase("OFF", Some(ConsoleCommand::Off))]
    #[case::coordinator("coordinator", Some(ConsoleCommand::Coordinator))]
    #[case::exit("exit", Some(ConsoleCommand::Quit))]
    #[case::unknown("dance", None)]
    fn test_parse_command(#[case] line: &str, #[case] expected: Option<ConsoleCommand>) {
        assert_eq!(parse_command(line), expected);
    }

    #[test]
    fn test_overrides_replace_only_given_fields() {
        let cli = Cli::parse_from([
            "maskguard",
            "--detector-url",
            "http://10.0.0.2:5000/webcam",
            "--frame-stride",
            "5",
            "detect",
            "face.jpg",
        ]);
        let settings = apply_overrides(Settings::default(), &cli);

        assert_eq!(settings.detector_url, "http://10.0.0.2:5000/webcam");
        assert_eq!(settings.frame_stride, 5);
        assert_eq!(settings.stream_url, Settings::default().stream_url);
    }

    #[test]
    fn test_global_flags_accepted_after_subcommand() {
        let cli = Cli::parse_from(["maskguard", "live", "--start", "stream", "--refresh-hz", "30"]);
        let settings = apply_overrides(Settings::default(), &cli);
        assert!(matches!(cli.command, Command::Live { start: Some(StartMode::Stream) }));
        assert_eq!(settings.refresh_hz, 30.0);
    }

    #[rstest]
    #[case::jpeg("face.JPG", true)]
    #[case::png("dir/face.png", true)]
    #[case::video("clip.mp4", false)]
    #[case::none("face", false)]
    fn test_is_image(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(is_image(Path::new(path)), expected);
    }
}
