use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deq2496::commands::{ContrastTarget, Dispatcher, ScreenTarget};
use deq2496::config::{self, Config};
use deq2496::display;
use deq2496::midi::{self, DeviceSession, DryRunTransport, MidiTransport, Transport};
use deq2496::protocol::SysExCodec;
use deq2496::state::{self, SaveStatus, State};

#[derive(Parser)]
#[command(
    name = "deq",
    about = "CLI tool for the Behringer DEQ2496",
    arg_required_else_help = true
)]
struct Cli {
    /// Config file (default: <config dir>/deq2496/deq2496.yml)
    #[arg(long, global = true, env = "DEQ2496_CONFIG")]
    config: Option<PathBuf>,

    /// State file (default: ~/.deq2496)
    #[arg(long, global = true, env = "DEQ2496_STATE")]
    state: Option<PathBuf>,

    /// Print the SysEx that would be sent instead of talking to the device
    #[arg(long, global = true)]
    dry_run: bool,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Select a display screen, or step to the next one
    Screen {
        /// rta, vu, peak or rotate
        target: ScreenTarget,
    },

    /// Set the display contrast, or step through min/mid/max
    Contrast {
        /// 0-15 or rotate
        target: ContrastTarget,
    },

    /// Query the device
    Get {
        #[command(subcommand)]
        what: GetWhat,
    },

    /// Print the device's display as text art
    Print {
        #[command(subcommand)]
        what: PrintWhat,
    },

    /// Render the device's display as an image
    Plot {
        #[command(subcommand)]
        what: PlotWhat,
    },

    /// Apply the default screen and contrast from the config file
    Restore,

    /// List MIDI ports, marking the one matching the config
    Ports,

    /// Generate shell completions
    Completions {
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum GetWhat {
    /// Identify the device and show the last known state
    State {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum PrintWhat {
    /// Dump the screen to stdout
    Screen,
}

#[derive(Subcommand)]
enum PlotWhat {
    /// Dump the screen to a PNG and open it
    Screen {
        /// Output file (default: deq2496-screen.png in the temp dir)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Pixel size in the image
        #[arg(long, default_value_t = 4)]
        scale: u32,

        /// Only write the file
        #[arg(long)]
        no_open: bool,
    },
}

impl Commands {
    /// Verbs that wait for a reply from the unit.
    fn reads_device(&self) -> bool {
        matches!(self, Commands::Get { .. } | Commands::Print { .. } | Commands::Plot { .. })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let state_path = cli.state.clone().unwrap_or_else(state::default_state_path);

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "deq", &mut std::io::stdout());
        return Ok(());
    }

    let config = Config::load_or_default(&config_path);

    if let Commands::Ports = cli.command {
        return cmd_ports(&config);
    }

    let mut state = State::load_or_default(&state_path);
    let codec = SysExCodec::new(config.device_id);

    if cli.dry_run {
        if cli.command.reads_device() {
            anyhow::bail!("this command needs replies from the device; not available with --dry-run");
        }
        let mut session = DeviceSession::new(DryRunTransport, codec, config.response_timeout());
        return run(&cli.command, &mut session, &config, &mut state).await;
    }

    let transport = MidiTransport::open(&config.midi_device)?;
    let mut session = DeviceSession::new(transport, codec, config.response_timeout());
    run(&cli.command, &mut session, &config, &mut state).await?;

    match state.save(&state_path) {
        saved @ SaveStatus::Saved(_) => println!("{}", saved),
        failed @ SaveStatus::Failed(_) => display::print_warning(failed),
    }
    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn run<T: Transport>(
    command: &Commands,
    session: &mut DeviceSession<T>,
    config: &Config,
    state: &mut State,
) -> Result<()> {
    let mut dispatcher = Dispatcher::new(session, config, state);

    match command {
        Commands::Screen { target } => {
            let screen = dispatcher.screen(*target).await?;
            display::print_status("screen", screen);
        }
        Commands::Contrast { target } => {
            let level = dispatcher.contrast(*target).await?;
            display::print_status("contrast", level);
        }
        Commands::Restore => {
            let (screen, level) = dispatcher.restore().await?;
            display::print_status("screen", screen);
            display::print_status("contrast", level);
        }
        Commands::Get {
            what: GetWhat::State { json },
        } => {
            dispatcher
                .query_identity()
                .await
                .context("Failed to identify the device")?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&*state)?);
            } else {
                display::print_state(state);
            }
        }
        Commands::Print {
            what: PrintWhat::Screen,
        } => {
            let dump = dispatcher.dump_screen().await.context("Failed to fetch screen dump")?;
            print!("{}", dump.to_text());
        }
        Commands::Plot {
            what: PlotWhat::Screen {
                output,
                scale,
                no_open,
            },
        } => {
            let dump = dispatcher.dump_screen().await.context("Failed to fetch screen dump")?;
            let path = output
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join("deq2496-screen.png"));
            display::save_png(&dump.to_grid(), &path, *scale)?;
            display::print_status("plot", path.display());
            if !*no_open {
                display::open_viewer(&path)?;
            }
        }
        // answered in main without a device
        Commands::Ports | Commands::Completions { .. } => {}
    }

    Ok(())
}

fn cmd_ports(config: &Config) -> Result<()> {
    let (inputs, outputs) = midi::list_ports()?;

    for (label, names) in [("Inputs", inputs), ("Outputs", outputs)] {
        println!("  {}:", label);
        let selected = midi::select_port(&names, &config.midi_device);
        for (i, name) in names.iter().enumerate() {
            let marker = if Some(i) == selected { "*" } else { " " };
            println!("    {} {}", marker, name);
        }
        if names.is_empty() {
            println!("    (none)");
        }
    }

    if config.midi_device.is_empty() {
        println!();
        println!("No midi_device configured; the first port would be used.");
    }
    Ok(())
}
