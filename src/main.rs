use anyhow::{Context, Result};
use clap::Parser;
use stockmarket::{
    ChannelListener, MarketError, MarketNotification, MarketSimulation, SchedulerKind,
    SimulationConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "stockmarket", about = "Toy stock market simulation")]
struct Args {
    /// Path to a TOML config file (default: ./market.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Fixed RNG seed for a reproducible run
    #[arg(long)]
    seed: Option<u64>,

    /// Do not start the schedulers on launch
    #[arg(long)]
    no_autostart: bool,
}

#[derive(Debug, PartialEq)]
enum Flow {
    Continue,
    Quit,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = SimulationConfig::load(args.config.as_deref())
        .context("Failed to load simulation config")?;
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    setup_logging(&config.log_filter);

    tracing::info!("🚀 Stock market simulation starting");

    // Notifications are marshalled to this task, which owns stdout
    let (listener, mut notifications) = ChannelListener::new();
    let sim = MarketSimulation::new(&config, Arc::new(listener))
        .context("Failed to build market")?;

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Price updates: every {}s", config.price.interval_secs);
    tracing::info!(
        "  Market events: {} x every {}s",
        config.events.count,
        config.events.spacing_secs
    );
    tracing::info!(
        "  Volume drift: after {}s, then every {}s",
        config.volume.initial_delay_secs,
        config.volume.interval_secs
    );
    tracing::info!("  Trade cooldown: {}s", config.trading.cooldown_secs);

    render_market(&sim);
    print_help();

    if !args.no_autostart {
        sim.start_all();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
                break;
            }
            Some(notification) = notifications.recv() => {
                handle_notification(&sim, notification);
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        if handle_command(&sim, &line) == Flow::Quit {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::info!("stdin closed - running until Ctrl+C");
                        stdin_open = false;
                    }
                    Err(e) => {
                        tracing::error!("Failed to read stdin: {}", e);
                        stdin_open = false;
                    }
                }
            }
        }
    }

    sim.stop_all();
    tracing::info!("👋 Stock market simulation stopped");
    Ok(())
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ============================================================================
// Display
// ============================================================================

fn handle_notification(sim: &MarketSimulation, notification: MarketNotification) {
    match notification {
        MarketNotification::DisplayChanged => render_market(sim),
        MarketNotification::Status { kind, text } => {
            println!("[{:>7}] {}", kind.to_string().to_uppercase(), text);
        }
        MarketNotification::CooldownStarted(duration) => {
            println!(
                "[{:>7}] Trading disabled for {}s",
                SchedulerKind::Trading.to_string().to_uppercase(),
                duration.as_secs()
            );
        }
    }
}

fn render_market(sim: &MarketSimulation) {
    println!("\n{:<8} {:<12} {:>12} {:>12}", "Symbol", "Name", "Price", "Volume");
    println!("{}", "-".repeat(47));
    for record in sim.store().snapshot() {
        println!(
            "{:<8} {:<12} {:>12} {:>12}",
            record.symbol(),
            record.name(),
            format!("${:.2}", record.price()),
            record.volume()
        );
    }
    println!();
}

fn print_status(sim: &MarketSimulation) {
    let running = |flag: bool| if flag { "RUNNING" } else { "STOPPED" };

    println!(
        "Price:   {} ({}s)",
        running(sim.price.is_running()),
        sim.price.seconds_running()
    );
    println!(
        "Events:  {} ({} fired, next in {}s)",
        running(sim.events.is_running()),
        sim.events.events_fired(),
        sim.events.seconds_to_next_event()
    );
    if let Some(event) = sim.events.last_event() {
        println!("         last: {} - {}", event.kind.name, event.kind.rationale);
    }
    println!(
        "Volume:  {} (next in {}s)",
        running(sim.volume.is_running()),
        sim.volume.seconds_to_next_update()
    );

    let sequencer = sim.desk.sequencer();
    match sequencer.phase() {
        Some(phase) => println!("Trading: {:?}", phase),
        None if sim.desk.can_trade() => println!("Trading: READY"),
        None => println!(
            "Trading: cooldown ({}s)",
            sim.desk.cooldown_remaining().as_secs()
        ),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  trade <volume>                      submit a signed trade volume");
    println!("  abort                               abort the trade in progress");
    println!("  start|stop <price|events|volume|all>");
    println!("  status                              scheduler summary");
    println!("  snapshot                            market data as JSON");
    println!("  help | quit");
}

// ============================================================================
// Commands
// ============================================================================

fn handle_command(sim: &MarketSimulation, line: &str) -> Flow {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return Flow::Continue;
    };
    let argument = parts.next();

    match command {
        "trade" => match argument {
            Some(input) => submit_trade(sim, input),
            None => println!("Usage: trade <volume>"),
        },
        "abort" => {
            if !sim.desk.abort() {
                println!("No trade in progress");
            }
        }
        "start" | "stop" => toggle(sim, command == "start", argument.unwrap_or("all")),
        "status" => print_status(sim),
        "snapshot" => match serde_json::to_string_pretty(&sim.store().snapshot()) {
            Ok(json) => println!("{}", json),
            Err(e) => tracing::error!("Failed to serialize snapshot: {}", e),
        },
        "help" => print_help(),
        "quit" | "exit" => return Flow::Quit,
        other => println!("Unknown command: {} (try 'help')", other),
    }

    Flow::Continue
}

fn submit_trade(sim: &MarketSimulation, input: &str) {
    match sim.desk.submit_input(input) {
        Ok(id) => println!("Trade {} accepted", id),
        Err(MarketError::InvalidInput(raw)) => {
            println!("Error: '{}' is not a whole number of shares", raw)
        }
        Err(e) => println!("Trade rejected: {}", e),
    }
}

fn toggle(sim: &MarketSimulation, start: bool, target: &str) {
    match (target, start) {
        ("price", true) => {
            sim.price.start();
        }
        ("price", false) => {
            sim.price.stop();
        }
        ("events", true) => {
            sim.events.start();
        }
        ("events", false) => {
            sim.events.stop();
        }
        ("volume", true) => {
            sim.volume.start();
        }
        ("volume", false) => {
            sim.volume.stop();
        }
        ("all", true) => sim.start_all(),
        ("all", false) => sim.stop_all(),
        (other, _) => println!("Unknown scheduler: {}", other),
    }
}
