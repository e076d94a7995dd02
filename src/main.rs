use anyhow::anyhow;
use clap::{Parser, Subcommand};

use voicelink::audio::{input_device_names, output_device_names};
use voicelink::{MicInput, RealtimeTransport, Session, SessionConfig, SpeakerOutput, Voice};

/// Voicelink - real-time duplex voice conversation client
#[derive(Parser, Debug)]
#[command(name = "voicelink")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Model to use
    #[arg(short = 'm', long, value_name = "MODEL")]
    model: Option<String>,

    /// Voice for synthesized replies
    #[arg(short = 'v', long, value_name = "VOICE")]
    voice: Option<String>,

    /// System instructions for the assistant
    #[arg(short = 'i', long, value_name = "TEXT")]
    instructions: Option<String>,

    /// Input device name (default: system default)
    #[arg(long, value_name = "NAME")]
    input_device: Option<String>,

    /// Output device name (default: system default)
    #[arg(long, value_name = "NAME")]
    output_device: Option<String>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available audio devices
    Devices,

    /// List available voices
    Voices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Handle subcommands
    if let Some(command) = cli.command {
        match command {
            Commands::Devices => {
                for name in input_device_names() {
                    println!("input:  {name}");
                }
                for name in output_device_names() {
                    println!("output: {name}");
                }
                return Ok(());
            }
            Commands::Voices => {
                for voice in Voice::all() {
                    println!("{voice}");
                }
                return Ok(());
            }
        }
    }

    let mut config = SessionConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;
    if let Some(model) = cli.model {
        config.model = model;
    }
    if let Some(voice) = cli.voice {
        config.voice = Voice::from_str_or_default(&voice);
    }
    if let Some(instructions) = cli.instructions {
        config.instructions = instructions;
    }
    if cli.input_device.is_some() {
        config.input_device = cli.input_device;
    }
    if cli.output_device.is_some() {
        config.output_device = cli.output_device;
    }

    let input = MicInput::new(&config);
    let output = SpeakerOutput::new(&config);
    let mut session = Session::new(
        config,
        Box::new(RealtimeTransport),
        Box::new(input),
        Box::new(output),
    );

    // Ctrl-C stops the session; the library core stays signal-free.
    let stop = session.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nstopping...");
            stop.cancel();
        }
    });

    // Print each utterance as it completes.
    let mut utterances = session.utterances();
    let printer = tokio::spawn(async move {
        while let Some(utterance) = utterances.recv().await {
            if !utterance.is_empty() {
                println!("assistant: {utterance}");
            }
        }
    });

    println!("listening (press Ctrl-C to stop)");
    let report = session.run().await;
    let _ = printer.await;

    if let Some(error) = report.error {
        return Err(error.into());
    }
    Ok(())
}
