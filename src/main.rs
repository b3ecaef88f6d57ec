use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quasar::cmd::{apply, plan, status, validate};
use quasar::config::RunPaths;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "quasar")]
#[command(version, about = "DAG-driven multi-phase LLM agent orchestration engine")]
pub struct Cli {
    /// Run directory. Defaults to the current directory.
    #[arg(long, global = true)]
    pub run_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a run directory's manifest and phase specs.
    Validate,
    /// Print the wave grouping and resolved execution for every phase.
    Plan,
    /// Execute the run.
    Apply {
        /// Never prompt; accept every phase outcome automatically.
        #[arg(long)]
        auto: bool,
        #[arg(long)]
        max_workers: Option<u32>,
        /// Render checkpoints to output but never block on a gate.
        #[arg(long)]
        watch: bool,
        /// Resume from existing checkpoints where valid.
        #[arg(long)]
        resume: bool,
        /// Force auto-routing on regardless of the manifest.
        #[arg(long)]
        routing: bool,
        /// Command to invoke for each agent call.
        #[arg(long, default_value = "true")]
        agent_cmd: String,
        /// Command to run as the lint/test filter.
        #[arg(long)]
        lint_cmd: Option<String>,
    },
    /// Show each phase's recorded fabric state.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::try_init().ok();

    let cli = Cli::parse();
    let run_dir = match cli.run_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("getting current directory")?,
    };
    let paths = RunPaths::new(&run_dir);

    match cli.command {
        Commands::Validate => {
            let report = validate::run(&paths)?;
            println!(
                "{} phases across {} waves",
                report.phase_count, report.wave_count
            );
            for warning in &report.warnings {
                println!("warning: {warning}");
            }
        }
        Commands::Plan => {
            let waves = plan::run(&paths)?;
            print!("{}", plan::render(&waves));
        }
        Commands::Apply {
            auto,
            max_workers,
            watch,
            resume,
            routing,
            agent_cmd,
            lint_cmd,
        } => {
            let spinner = indicatif::ProgressBar::new_spinner();
            spinner.set_style(
                indicatif::ProgressStyle::with_template("{spinner} {elapsed} {msg}")
                    .unwrap_or_else(|_| indicatif::ProgressStyle::default_spinner()),
            );
            spinner.enable_steady_tick(std::time::Duration::from_millis(120));
            spinner.set_message("running phases...");

            let summary = apply::run(
                &run_dir,
                &paths,
                apply::ApplyOptions {
                    auto,
                    max_workers,
                    watch,
                    resume,
                    routing,
                    agent_cmd,
                    lint_cmd,
                },
            )
            .await?;
            spinner.finish_and_clear();
            println!(
                "completed={} failed={} skipped={}",
                summary.completed.len(),
                summary.failed.len(),
                summary.skipped.len()
            );
            if !summary.failed.is_empty() {
                std::process::exit(1);
            }
        }
        Commands::Status => {
            let report = status::run(&paths)?;
            print!("{}", status::render(&report));
        }
    }

    Ok(())
}
