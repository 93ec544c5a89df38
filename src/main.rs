use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use nao_bridge::Config;
use nao_bridge::api::{BodyServer, BodyState};
use nao_bridge::brain::{Conversation, rms};
use nao_bridge::capture::{
    CaptureBuffer, CaptureController, CaptureDevice, MicrophoneDevice, ReplayDevice,
};
use nao_bridge::client::{BodyClient, ListeningSession, PullRate};
use nao_bridge::voice::speaker_from_config;

/// NAO bridge - speech and listening loop for a NAO robot
#[derive(Parser)]
#[command(name = "nao-bridge", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/nao-bridge/config.toml)
    #[arg(short, long, env = "NAO_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the robot side: microphone capture and speech output
    Body {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Replay a 16 kHz mono WAV file instead of using the microphone
        #[arg(long)]
        replay: Option<PathBuf>,
    },
    /// Run the conversation loop against a body
    Brain {
        /// Body base URL
        #[arg(long)]
        body_url: Option<String>,
    },
    /// Stream audio from a body and report pull statistics
    Listen {
        /// Body base URL
        #[arg(long)]
        body_url: Option<String>,
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Have the body say something
    Say {
        /// Body base URL
        #[arg(long)]
        body_url: Option<String>,
        /// Text to speak
        #[arg(default_value = "Hello! I am NAO.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,nao_bridge=info",
        1 => "info,nao_bridge=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Command::Body { host, port, replay } => {
            if let Some(host) = host {
                config.body.host = host;
            }
            if let Some(port) = port {
                config.body.port = port;
            }
            if replay.is_some() {
                config.body.replay_file = replay;
            }
            run_body(&config).await
        }
        Command::Brain { body_url } => {
            if let Some(url) = body_url {
                config.stream.body_url = url;
            }
            run_brain(&config).await
        }
        Command::Listen { body_url, duration } => {
            if let Some(url) = body_url {
                config.stream.body_url = url;
            }
            listen(&config, duration).await
        }
        Command::Say { body_url, text } => {
            if let Some(url) = body_url {
                config.stream.body_url = url;
            }
            BodyClient::new(config.stream.body_url.clone())?
                .talk(&text)
                .await?;
            Ok(())
        }
    }
}

/// Cancel the returned token on Ctrl-C
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        tracing::info!("interrupt received");
        trigger.cancel();
    });
    token
}

async fn run_body(config: &Config) -> anyhow::Result<()> {
    let device: Arc<dyn CaptureDevice> = match &config.body.replay_file {
        Some(path) => Arc::new(ReplayDevice::from_wav(path, config.stream.samples_per_chunk)?),
        None => Arc::new(MicrophoneDevice::open()?),
    };

    tracing::info!(
        device = device.name(),
        capacity = ?config.body.limits.capacity,
        fetch_timeout_ms = config.body.fetch_timeout.map(|t| t.as_millis()),
        "starting body"
    );

    let buffer = Arc::new(CaptureBuffer::new(config.body.limits));
    let capture = CaptureController::new(device, buffer);
    let speaker = speaker_from_config(config.api_keys.openai.clone(), &config.speech);
    let state = Arc::new(
        BodyState::new(capture, speaker).with_fetch_timeout(config.body.fetch_timeout),
    );

    BodyServer::new(state, config.body.host.clone(), config.body.port)
        .run(shutdown_on_ctrl_c())
        .await?;

    Ok(())
}

async fn run_brain(config: &Config) -> anyhow::Result<()> {
    let mut conversation = Conversation::from_config(config)?;
    conversation.run(shutdown_on_ctrl_c()).await?;
    Ok(())
}

/// Pull audio for `duration` seconds and print per-second statistics
async fn listen(config: &Config, duration: u64) -> anyhow::Result<()> {
    let client = BodyClient::new(config.stream.body_url.clone())?;
    let rate = PullRate::from(&config.stream);

    println!("Listening to {} for {duration} seconds...", client.base_url());
    println!("Nominal pull interval: {:?}", rate.nominal());
    println!("---");

    let mut session = ListeningSession::open(client.clone(), rate).await?;
    let start = Instant::now();

    for second in 1..=duration {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        let mut chunks = 0usize;
        let mut samples: Vec<i16> = Vec::new();

        loop {
            let chunk = tokio::select! {
                () = tokio::time::sleep_until(deadline) => break,
                chunk = session.stream().read() => chunk,
            };
            if chunk.is_empty() {
                break;
            }
            chunks += 1;
            samples.extend(
                chunk
                    .chunks_exact(2)
                    .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
            );
        }

        let depth = client.buffer_length().await.unwrap_or_default();
        println!(
            "[{second:2}s] chunks: {chunks:3} | samples: {:6} | RMS: {:8.1} | backlog: {depth}",
            samples.len(),
            rms(&samples)
        );

        if session.stream().is_finished() {
            println!("Body ended the stream");
            break;
        }
    }

    session.close().await?;

    println!("---");
    println!(
        "Listened for {:.1}s; at {} Hz expect about {} samples per second",
        start.elapsed().as_secs_f64(),
        config.stream.sample_rate,
        config.stream.sample_rate
    );

    Ok(())
}
