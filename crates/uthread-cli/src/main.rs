//! uthread demo tool
//!
//! Runs small green-thread scenarios and prints what happened, followed by
//! the scheduler statistics of the session.

mod logger;
mod scenarios;

use clap::{Args, Parser, Subcommand};
use scenarios::Report;
use uthread::SchedulerConfig;

#[derive(Parser)]
#[command(name = "uthread")]
#[command(about = "User-level green thread demos", long_about = None)]
#[command(version)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Color log output: auto, always, never
    #[arg(long, default_value = "auto", global = true)]
    color: String,

    #[command(flatten)]
    session: SessionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SessionArgs {
    /// Stack size per thread, in KiB
    #[arg(long, default_value_t = 256, global = true)]
    stack_kib: usize,

    /// Preemption ticks per second of CPU time
    #[arg(long, default_value_t = uthread::config::DEFAULT_PREEMPT_HZ, global = true)]
    hz: u32,

    /// Arm the preemption timer
    #[arg(long, global = true)]
    preempt: bool,
}

impl SessionArgs {
    fn config(&self) -> SchedulerConfig {
        SchedulerConfig::default()
            .with_preempt(self.preempt)
            .with_preempt_hz(self.hz)
            .with_stack_size(self.stack_kib.saturating_mul(1024))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create two threads and collect their exit values
    Hello,

    /// Round-robin several yielding threads
    Rotate {
        /// Number of threads
        #[arg(short, long, default_value_t = 3)]
        threads: u16,
        /// Turns per thread
        #[arg(short, long, default_value_t = 3)]
        rounds: u32,
    },

    /// Nested create/join, with one thread left for main to collect
    Tree,

    /// Keep a never-yielding thread from starving the others
    Preempt,
}

fn print_report(name: &str, report: &Report) {
    println!("== {name} ==");
    for line in &report.lines {
        println!("{line}");
    }
    let stats = &report.stats;
    println!(
        "-- created {}, collected {}, switches {}, preemptions {}",
        stats.threads_created, stats.threads_collected, stats.context_switches, stats.preemptions
    );
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logger::init(cli.verbose, &cli.color)?;

    let config = cli.session.config();
    config.validate()?;

    let (name, report) = match cli.command {
        Commands::Hello => ("hello", scenarios::hello(config)?),
        Commands::Rotate { threads, rounds } => ("rotate", scenarios::rotate(config, threads, rounds)?),
        Commands::Tree => ("tree", scenarios::tree(config)?),
        Commands::Preempt => ("preempt", scenarios::preempt(config)?),
    };

    print_report(name, &report);
    Ok(())
}
