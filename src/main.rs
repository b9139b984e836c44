use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use camrelay::receiver::mirror_to_file;
use camrelay::{
    CaptureDevice, FrameReceiver, FrameStore, Pipeline, PixelFormat, RelayConfig, ReplayDevice,
    TransmitSettings, UdpSink, V4l2Device, WebServer,
};

/// Latest-frame-wins camera relay over UDP
#[derive(Parser, Debug)]
#[command(name = "camrelay")]
#[command(version, about = "Capture camera frames and relay the latest one over UDP")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture frames and send them to the destination
    Push {
        /// YAML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Capture device node
        #[arg(long)]
        device: Option<PathBuf>,

        #[command(flatten)]
        format: FormatArgs,

        /// Destination address
        #[arg(long)]
        destination: Option<SocketAddr>,

        /// Milliseconds between send attempts
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Replay frame files from this directory instead of a camera
        #[arg(long)]
        replay: Option<PathBuf>,

        /// Replay rate in frames per second
        #[arg(long, default_value_t = 30.0, requires = "replay")]
        fps: f64,

        /// Restart the replay when it reaches the end
        #[arg(long = "loop", requires = "replay")]
        looping: bool,
    },

    /// Receive frames, serve them over HTTP and/or mirror them to a file
    Receive {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0:8888")]
        bind: SocketAddr,

        /// Serve an MJPEG stream on this address (e.g. 0.0.0.0:8080)
        #[arg(long)]
        http: Option<SocketAddr>,

        /// File replaced with each new frame
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Milliseconds between checks for a new frame
        #[arg(long, default_value_t = 20)]
        poll_ms: u64,
    },
}

/// Capture format overrides
#[derive(clap::Args, Debug)]
struct FormatArgs {
    /// Frame width
    #[arg(long)]
    width: Option<u32>,

    /// Frame height
    #[arg(long)]
    height: Option<u32>,

    /// Pixel format: mjpeg, h264 or yuyv
    #[arg(long)]
    pixel_format: Option<PixelFormat>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry().with(fmt::layer().with_target(false)).with(filter).init();

    let result = match cli.command {
        Command::Push {
            config,
            device,
            format,
            destination,
            interval_ms,
            replay,
            fps,
            looping,
        } => {
            let overrides = Overrides { device, format, destination, interval_ms };
            push(config, overrides, replay, fps, looping).await
        }
        Command::Receive { bind, http, output, poll_ms } => {
            receive(bind, http, output, Duration::from_millis(poll_ms.max(1))).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Command-line settings that win over the configuration file
struct Overrides {
    device: Option<PathBuf>,
    format: FormatArgs,
    destination: Option<SocketAddr>,
    interval_ms: Option<u64>,
}

impl Overrides {
    fn apply(self, config: &mut RelayConfig) {
        let capture = &mut config.capture;
        capture.device = self.device.unwrap_or_else(|| capture.device.clone());
        capture.width = self.format.width.unwrap_or(capture.width);
        capture.height = self.format.height.unwrap_or(capture.height);
        capture.pixel_format = self.format.pixel_format.unwrap_or(capture.pixel_format);

        let transmit = &mut config.transmit;
        transmit.destination = self.destination.unwrap_or(transmit.destination);
        transmit.interval_ms = self.interval_ms.unwrap_or(transmit.interval_ms);
    }
}

async fn push(
    config_path: Option<PathBuf>,
    overrides: Overrides,
    replay: Option<PathBuf>,
    fps: f64,
    looping: bool,
) -> anyhow::Result<()> {
    let mut config = match &config_path {
        Some(path) => RelayConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => RelayConfig::default(),
    };
    overrides.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let sink = UdpSink::bind(config.transmit.destination)
        .await
        .with_context(|| format!("opening socket for {}", config.transmit.destination))?;
    let settings = TransmitSettings::from(&config.transmit);

    match replay {
        Some(dir) => {
            let device = ReplayDevice::open(&dir, fps, looping)
                .with_context(|| format!("loading replay frames from {}", dir.display()))?;
            run_pipeline(device, sink, settings).await
        }
        None => {
            let device = V4l2Device::from_config(&config.capture).with_context(|| {
                format!("opening capture device {}", config.capture.device.display())
            })?;
            run_pipeline(device, sink, settings).await
        }
    }
}

async fn run_pipeline<D: CaptureDevice>(
    device: D,
    sink: UdpSink,
    settings: TransmitSettings,
) -> anyhow::Result<()> {
    let pipeline = Pipeline::new(device, sink, settings);
    cancel_on_ctrl_c(pipeline.cancel_token());

    let report = pipeline.run().await.context("capture pipeline failed")?;
    if report.exhausted {
        info!("Capture source exhausted");
    }
    info!(
        "Sent {} of {} captured frames ({} send failures, {} oversized)",
        report.stats.frames_sent,
        report.stats.frames_captured,
        report.stats.send_failures,
        report.stats.oversized_frames
    );
    Ok(())
}

async fn receive(
    bind: SocketAddr,
    http: Option<SocketAddr>,
    output: Option<PathBuf>,
    poll: Duration,
) -> anyhow::Result<()> {
    let receiver = FrameReceiver::bind(bind).await.context("starting receiver")?;
    let web = match http {
        Some(addr) => Some(WebServer::bind(addr).await.context("starting web server")?),
        None => None,
    };

    let store = Arc::new(FrameStore::new());
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let web_task =
        web.map(|web| tokio::spawn(web.run(Arc::clone(&store), poll, cancel.clone())));
    if let Some(path) = output {
        tokio::spawn(mirror_to_file(Arc::clone(&store), path, poll, cancel.clone()));
    }

    let received = receiver.run(store, cancel.clone()).await;
    info!("Received {} frames", received);

    if let Some(task) = web_task {
        task.await.context("web server task")?.context("web server failed")?;
    }
    Ok(())
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                cancel.cancel();
            }
            Err(e) => warn!("Failed to listen for interrupt: {}", e),
        }
    });
}
