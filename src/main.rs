//! Entry point: loads preferences, connects to the supply, and runs until the cell is spent.
mod cli;

use anyhow::{ Context, Result };
use clap::Parser;
use tokio::io::{ AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin };
use tracing::{ error, info };
use tracing_subscriber::{ fmt, prelude::*, EnvFilter };
use arcs_er::{
    config::Prefs,
    datalog::CsvLog,
    devices::{ InstrumentPort, PowerSupply },
    sequencer::{ Phase, PhaseGate, RunState, Sequencer },
    sim::SimulatedSupply,
    units::Volt,
};
use cli::Args;

/// Holds every phase until the operator presses enter
struct Confirm
{
    lines: Lines<BufReader<Stdin>>,
}

impl PhaseGate for Confirm
{
    async fn enter(&mut self, phase: &Phase) -> arcs_er::Result<()>
    {
        let mut out = tokio::io::stdout();
        out.write_all(format!("next: {}\npress enter to continue ", phase).as_bytes()).await?;
        out.flush().await?;

        self.lines.next_line().await?;
        Ok(())
    }
}

fn init_logging()
{
    // RUST_LOG first, info otherwise
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()>
{
    init_logging();
    let args = Args::parse();

    let prefs = Prefs::load_from(&args.config)
        .with_context(|| format!("loading preferences from {}", args.config.display()))?;

    if args.shell {
        return shell(&prefs).await;
    }

    let log = CsvLog::new(prefs.log_paths());

    let state = if args.simulate {
        info!("running against a simulated cell");
        let mut psu = SimulatedSupply::electrolytic_cell();
        psu.set_voltage(Volt::from_f64_base(prefs.max_psu_voltage)).await?;
        run(psu, log, prefs, &args).await?
    }
    else {
        let settings = prefs.supply_settings();
        let psu = PowerSupply::connect(&settings)
            .await
            .with_context(|| format!("connecting to supply at {}:{}", settings.address, settings.port))?;
        run(psu, log, prefs, &args).await?
    };

    info!(
        cycles = state.cycles,
        last_current = %state.refining_current,
        last_back_emf = ?state.last_back_emf_voltage.map(|volts| volts.as_f64_base()),
        "run ended"
    );

    Ok(())
}

async fn run<P>(psu: P, log: CsvLog, prefs: Prefs, args: &Args) -> Result<RunState>
    where P: InstrumentPort
{
    let sequencer = Sequencer::new(psu, log, prefs).reload_from(args.config.clone());

    let state = if args.debug {
        let gate = Confirm { lines: BufReader::new(tokio::io::stdin()).lines() };
        sequencer.gate(gate).run().await
    }
    else {
        let mut sequencer = sequencer;
        sequencer.run().await
    };

    state.context("run stopped on an error")
}

/// Raw command passthrough, one command per line until `exit` or end of input
async fn shell(prefs: &Prefs) -> Result<()>
{
    let settings = prefs.supply_settings();
    let mut psu = PowerSupply::connect(&settings)
        .await
        .with_context(|| format!("connecting to supply at {}:{}", settings.address, settings.port))?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut out = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();

        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }

        match psu.raw(line).await {
            Ok(reply) => {
                out.write_all(format!("{}\n", reply).as_bytes()).await?;
                out.flush().await?;
            },
            Err(err) if err.is_transport() => return Err(err).context("supply went away"),
            Err(err) => error!(error = %err, "command failed"),
        }
    }

    Ok(())
}
