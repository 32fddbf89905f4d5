use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use fluentnow::capture::{Capture, MicCapture};
use fluentnow::playback::{AudioSink, PlaybackQueue, SpeakerSink};
use fluentnow::session::{SessionController, SessionState};
use fluentnow::{Config, Connection, ConnectionEvent, Error};

/// FluentNow - voice conversation practice with your AI coach
#[derive(Parser)]
#[command(name = "fluentnow", version, about)]
struct Cli {
    /// Backend WebSocket base URL (e.g. ws://127.0.0.1:8000)
    #[arg(long, env = "FLUENTNOW_BACKEND_URL")]
    backend_url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,fluentnow=info",
        1 => "info,fluentnow=debug",
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

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker(),
        };
    }

    let mut config = Config::load();
    if let Some(url) = cli.backend_url {
        config.backend_url = url;
    }

    run_session(&config).await
}

/// Run the interactive practice session until interrupted
#[allow(clippy::future_not_send)]
async fn run_session(config: &Config) -> anyhow::Result<()> {
    let url = config.conversation_url();
    tracing::info!(
        url = %url,
        chunk_interval_ms = u64::try_from(config.chunk_interval.as_millis()).unwrap_or(u64::MAX),
        "starting conversation session"
    );

    let playback = PlaybackQueue::new();
    let (conn, mut events) = Connection::spawn(url, playback.clone());
    let mut session = SessionController::new(conn, Box::new(MicCapture::new(config.chunk_interval)));

    println!("FluentNow - conversation practice");
    println!("Press Enter to start or stop speaking, Ctrl-C to quit.\n");
    print_status(&session);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                if let ConnectionEvent::Transcript(line) = &event {
                    println!("  {line}");
                }
                let before = session.state();
                session.handle_event(event);
                if session.state() != before {
                    print_status(&session);
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(_)) => {
                        toggle(&mut session);
                        print_status(&session);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed");
                        break;
                    }
                }
            }
        }
    }

    session.stop();
    playback.release();
    Ok(())
}

/// Flip the speaking turn, surfacing start failures to the user
fn toggle(session: &mut SessionController) {
    if session.state() == SessionState::Recording {
        session.stop();
        return;
    }

    match session.start() {
        Ok(()) => {}
        Err(Error::NotReady(msg)) => println!("Coach not ready yet ({msg})."),
        Err(e) => {
            println!("Could not access the microphone: {e}");
            println!("Check that a mic is connected and permission is granted.");
        }
    }
}

fn print_status(session: &SessionController) {
    let state = session.state();
    println!("{} {}", state.coach_affect(), state.coach_line());
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = MicCapture::new(Duration::from_millis(300));
    capture.acquire()?;
    println!("Sample rate: {} Hz", fluentnow::capture::SAMPLE_RATE);
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.peek_samples();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0_f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        capture.clear_samples();
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working.");
    println!("If RMS stayed near 0, check that the mic is plugged in and not muted.");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let mut sink = SpeakerSink::acquire()?;

    let sample_rate = 24_000_f32;
    let frequency = 440.0_f32;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let num_samples = (sample_rate * 2.0) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    println!("Playing {} samples...", samples.len());
    sink.play(&samples)?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working.");

    Ok(())
}
