//! actuatorctl - Actuator Controller Console
//!
//! Connects to an actuator controller through a serial-over-TCP bridge and
//! sends commands in any of its wire encodings, either one at a time from
//! the command line or interactively.

mod error;
mod line;

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use actuator_protocol::{CommandRegistry, Frame, Mode};
use actuator_session::{ConnectionState, Reply, Session, SessionConfig, SessionEvent};
use clap::{Parser, Subcommand};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::ConsoleError;
use crate::line::{parse_line, ConsoleLine, HELP};

#[derive(Parser, Debug)]
#[command(name = "actuatorctl", version)]
#[command(about = "Send commands to an actuator controller")]
struct Cli {
    /// YAML session configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Controller address, e.g. tcp://127.0.0.1:4000
    #[arg(short, long, global = true)]
    endpoint: Option<String>,

    /// Encoding the controller speaks on connect (human, binary, simplefoc)
    #[arg(short, long, global = true)]
    mode: Option<Mode>,

    /// Reply timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Skip the cmd_mode handshake on connect
    #[arg(long, global = true)]
    no_handshake: bool,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the commands the controller understands
    Commands,

    /// Send one command and print the reply
    Send {
        /// Command name, e.g. set_position
        name: String,
        /// Argument for commands that take one
        #[arg(allow_negative_numbers = true)]
        value: Option<f64>,
    },

    /// Send text in SimpleFOC passthrough mode
    Raw {
        /// Text to send; a newline is appended
        text: String,
    },

    /// Switch the controller's wire encoding
    Switch {
        /// Target mode
        mode: Mode,
    },

    /// Read position, velocity, torque and phase currents
    Status,

    /// Print unsolicited frames such as broadcast telemetry
    Watch {
        /// Enable broadcasts at this rate for the duration
        #[arg(long)]
        hz: Option<f64>,
        /// How long to watch
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },

    /// Interactive prompt
    Repl,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn build_config(cli: &Cli) -> Result<SessionConfig, ConsoleError> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = Some(endpoint.clone());
    }
    if let Some(mode) = cli.mode {
        config.default_mode = mode;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.response_timeout_ms = timeout_ms;
    }
    if cli.no_handshake {
        config.handshake = false;
    }
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<(), ConsoleError> {
    if let Commands::Commands = cli.command {
        print_commands(&CommandRegistry::standard());
        return Ok(());
    }

    let config = build_config(&cli)?;
    let session = Session::new(config)?;
    session.connect().await?;
    debug!("connected in {} mode", session.mode());

    let result = execute(&session, cli.command).await;
    session.disconnect().await;
    result
}

async fn execute(session: &Session, command: Commands) -> Result<(), ConsoleError> {
    match command {
        Commands::Commands => print_commands(session.registry()),
        Commands::Send { name, value } => {
            let reply = session.send_named(&name, value).await?;
            print_reply(&reply);
        }
        Commands::Raw { text } => {
            let reply = session.send_raw(format!("{}\n", text)).await?;
            print_reply(&reply);
        }
        Commands::Switch { mode } => {
            session.switch_mode(mode).await?;
            println!("mode: {}", session.mode());
        }
        Commands::Status => print_status(session).await?,
        Commands::Watch { hz, seconds } => watch(session, hz, Duration::from_secs(seconds)).await?,
        Commands::Repl => repl(session).await,
    }
    Ok(())
}

fn print_commands(registry: &CommandRegistry) {
    println!("{:<6} {:<24} {:<8} {:<8} kind", "id", "name", "arg", "reply");
    for command in registry.all() {
        let id = if command.text_only {
            "text".to_string()
        } else {
            format!("0x{:02X}", command.id)
        };
        println!(
            "{:<6} {:<24} {:<8} {:<8} {}",
            id,
            command.name,
            command.argument_shape.as_str(),
            command.reply_shape.as_str(),
            command.kind.as_str()
        );
    }
}

fn print_reply(reply: &Reply) {
    let text = match &reply.frame {
        Frame::Opaque(data) => String::from_utf8_lossy(data).trim_end().to_string(),
        frame => frame.describe(),
    };
    if reply.saturated {
        println!("{}  (argument saturated)  [{:?}]", text, reply.latency);
    } else {
        println!("{}  [{:?}]", text, reply.latency);
    }
}

async fn print_status(session: &Session) -> Result<(), ConsoleError> {
    let position = session.get_position().await?;
    let velocity = session.get_velocity().await?;
    let torque = session.get_torque().await?;
    let [a, b, c] = session.get_phase_currents().await?;
    println!("mode:     {}", session.mode());
    println!("power:    {:?}", session.power_state());
    println!("position: {}", position);
    println!("velocity: {}", velocity);
    println!("torque:   {}", torque);
    println!("currents: {} / {} / {}", a, b, c);
    Ok(())
}

async fn watch(session: &Session, hz: Option<f64>, duration: Duration) -> Result<(), ConsoleError> {
    let mut events = session.subscribe();
    if let Some(hz) = hz {
        session.set_broadcast_frequency(hz).await?;
    }

    let deadline = tokio::time::Instant::now() + duration;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Err(_) => break,
            Ok(Ok(SessionEvent::Unsolicited(frame))) => println!("{}", frame.describe()),
            Ok(Ok(SessionEvent::FrameError(error))) => {
                warn!("undecodable input: {:?}", error.raw_lossy())
            }
            Ok(Ok(SessionEvent::StateChanged(ConnectionState::Disconnected))) => break,
            Ok(Ok(_)) => {}
            Ok(Err(broadcast::error::RecvError::Lagged(missed))) => {
                warn!("{} events dropped", missed)
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => break,
        }
    }

    if hz.is_some() && session.state() == ConnectionState::Connected {
        session.set_broadcast_frequency(0.0).await?;
    }
    Ok(())
}

async fn repl(session: &Session) {
    // A plain thread so a pending stdin read never holds up runtime shutdown.
    let (lines_tx, mut lines) = mpsc::channel::<String>(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if lines_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("connected to {}; :help for help", session.name());
    prompt(session);
    while let Some(line) = lines.recv().await {
        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleLine::Quit)) => break,
            Ok(Some(parsed)) => {
                if let Err(e) = execute_line(session, parsed).await {
                    eprintln!("error: {}", e);
                }
            }
            Err(e) => eprintln!("error: {}", e),
        }
        if session.state() != ConnectionState::Connected {
            eprintln!("link lost");
            break;
        }
        prompt(session);
    }
}

async fn execute_line(session: &Session, line: ConsoleLine) -> Result<(), ConsoleError> {
    match line {
        ConsoleLine::Command { name, value } => print_reply(&session.send_named(&name, value).await?),
        ConsoleLine::Mode(mode) => session.switch_mode(mode).await?,
        ConsoleLine::Raw(text) => print_reply(&session.send_raw(format!("{}\n", text)).await?),
        ConsoleLine::Status => print_status(session).await?,
        ConsoleLine::Confirm => {
            let cleared = session.confirm_ambiguous();
            if cleared.is_empty() {
                println!("nothing to confirm");
            } else {
                println!("unblocked: {}", cleared.join(", "));
            }
        }
        ConsoleLine::Help => println!("{}", HELP),
        ConsoleLine::Quit => {}
    }
    Ok(())
}

fn prompt(session: &Session) {
    print!("{}> ", session.mode());
    let _ = std::io::stdout().flush();
}
