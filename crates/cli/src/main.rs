mod commands;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use commands::{Command, HELP};
use peerlink::{InputKeys, InputSnapshot, Session, SessionConfig};

#[derive(Parser)]
#[command(name = "peerlink")]
#[command(about = "Headless peer-to-peer session driver with copy-paste signaling")]
struct Args {
    #[arg(short, long, help = "Player name shown to other peers")]
    name: Option<String>,

    #[arg(short, long, help = "Simulation ticks per second")]
    tick_rate: Option<u32>,

    #[arg(short, long, help = "Local address for data-channel sockets")]
    bind: Option<SocketAddr>,

    #[arg(long = "candidate", help = "Address to advertise as a host candidate (repeatable)")]
    candidates: Vec<IpAddr>,

    #[arg(short, long, help = "JSON session config file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Print an invite as soon as the session starts")]
    host: bool,

    #[arg(long, help = "Walk the local player in a circle")]
    wander: bool,
}

fn load_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            SessionConfig::from_json(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => SessionConfig::default(),
    };

    if let Some(name) = &args.name {
        config.player_name = name.clone();
    }
    if let Some(tick_rate) = args.tick_rate {
        config.tick_rate = tick_rate.max(1);
    }
    if let Some(bind) = args.bind {
        config.transport.bind_addr = bind;
    }
    if !args.candidates.is_empty() {
        config.transport.candidate_hosts = args.candidates.clone();
    }

    Ok(config)
}

fn wander_input() -> InputSnapshot {
    let mut input = InputSnapshot::new(InputKeys::FORWARD);
    input.mouse.dx = 0.01;
    input
}

/// Returns false when the loop should stop.
fn execute(session: &mut Session, command: Command) -> bool {
    match command {
        Command::Invite => match session.host_invite() {
            Ok(offer) => {
                println!("{}", offer);
                log::info!("Send the offer above to your guest, then paste their answer");
            }
            Err(e) => log::error!("Cannot create invite: {}", e),
        },
        Command::Offer(offer) => match session.join(&offer) {
            Ok(answer) => {
                println!("{}", answer);
                log::info!("Send the answer above back to the host");
            }
            Err(e) => log::error!("Cannot join: {}", e),
        },
        Command::Answer(answer) => match session.complete_invite(&answer) {
            Ok(peer_id) => log::info!("Connecting to guest {}", peer_id),
            Err(e) => log::error!("Cannot complete invite: {}", e),
        },
        Command::Chat(text) => session.send_chat(&text),
        Command::Status => println!("{}", session.debug_snapshot().to_json()),
        Command::Disconnect => session.disconnect(),
        Command::Help => println!("{}", HELP),
        Command::Quit => return false,
    }
    true
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let tick_interval = Duration::from_secs_f64(1.0 / config.tick_rate.max(1) as f64);

    let mut session = Session::new(config);
    log::info!(
        "Started as {} ({} entities), type 'help' for commands",
        session.config().player_name,
        session.world().entity_count()
    );

    if args.host && !execute(&mut session, Command::Invite) {
        return Ok(());
    }

    let (tx, mut rx) = mpsc::channel::<String>(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });

    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_failure: Option<String> = None;
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let input = args.wander.then(wander_input);
                session.tick(input.as_ref());

                let failure = session.last_connection_failure().map(str::to_string);
                if failure.is_some() && failure != last_failure {
                    log::warn!("{}", failure.as_deref().unwrap_or_default());
                }
                last_failure = failure;
            }
            line = rx.recv(), if stdin_open => {
                let Some(line) = line else {
                    log::info!("stdin closed, running until interrupted");
                    stdin_open = false;
                    continue;
                };
                match Command::parse(&line) {
                    Ok(Some(command)) => {
                        if !execute(&mut session, command) {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => log::warn!("{}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted");
                break;
            }
        }
    }

    session.disconnect();
    log::info!("Shutting down");
    Ok(())
}
