//! CLI command definitions for narps-runner.
//!
//! `run` reproduces the analysis of one team over a cohort of subjects (or
//! only reports which of its outputs are missing), `teams` lists the known
//! team keys.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgGroup, Parser};
use serde::Serialize;
use tracing::info;

use crate::cohort::CohortSelection;
use crate::config::Configuration;
use crate::participants::ParticipantTable;
use crate::pipeline::{ExecutionScope, PipelineRegistry};
use crate::runner::{OutputAudit, PipelineRunner};

/// Runner for the NARPS open pipelines.
#[derive(Parser)]
#[command(name = "narps-runner")]
#[command(about = "Run NARPS team pipelines over a cohort of subjects")]
#[command(version)]
#[command(
    long_about = "narps-runner reproduces the analysis pipelines of the NARPS teams.\n\nExample usage:\n  narps-runner run -t 2T6S -n 4 -f\n  narps-runner run -t 2T6S -s 1 2 3 -c"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the pipeline of a team, or check its outputs.
    Run(RunArgs),

    /// List the known team keys.
    Teams(TeamsArgs),
}

/// Arguments for `narps-runner run`.
#[derive(Parser, Debug)]
#[command(group(
    ArgGroup::new("selection")
        .required(true)
        .args(["subjects", "rsubjects", "nsubjects"])
))]
pub struct RunArgs {
    /// Team key of the pipeline to run.
    #[arg(short = 't', long)]
    pub team: String,

    /// Explicit list of subject ids.
    #[arg(short = 's', long, num_args = 1..)]
    pub subjects: Vec<String>,

    /// Number of subjects drawn at random.
    #[arg(short = 'r', long)]
    pub rsubjects: Option<usize>,

    /// Number of subjects taken from the fixed subset.
    #[arg(short = 'n', long)]
    pub nsubjects: Option<usize>,

    /// Run the first level stages only.
    #[arg(short = 'f', long = "first")]
    pub first_level_only: bool,

    /// Run the group level stage only.
    #[arg(short = 'g', long = "group")]
    pub group_level_only: bool,

    /// Only report missing outputs, do not run anything.
    #[arg(short = 'c', long)]
    pub check: bool,

    /// Path to a YAML configuration file.
    #[arg(long, env = "NARPS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

impl RunArgs {
    /// The cohort requested on the command line.
    pub fn selection(&self) -> CohortSelection {
        match (self.rsubjects, self.nsubjects) {
            (Some(count), _) => CohortSelection::Random(count),
            (None, Some(count)) => CohortSelection::Subset(count),
            (None, None) => CohortSelection::Explicit(self.subjects.clone()),
        }
    }
}

/// Arguments for `narps-runner teams`.
#[derive(Parser, Debug)]
pub struct TeamsArgs {
    /// Only list teams with an implemented pipeline.
    #[arg(long)]
    pub implemented: bool,

    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_pipeline_command(args).await,
        Commands::Teams(args) => run_teams_command(args),
    }
}

// ============================================================================
// Run Command Implementation
// ============================================================================

#[derive(Serialize)]
struct RunOutput<'a> {
    team_id: &'a str,
    subjects: Vec<&'a str>,
    scope: ExecutionScope,
    stages_run: usize,
    units_run: usize,
    elapsed_secs: f64,
}

async fn run_pipeline_command(args: RunArgs) -> anyhow::Result<()> {
    let scope = ExecutionScope::from_flags(args.first_level_only, args.group_level_only)?;
    let config = Configuration::load(args.config.as_deref())?;

    let participants = ParticipantTable::from_dataset(&config.directories.dataset)?
        .with_exclusion_map(&config.participants.exclusions);
    info!(
        "Loaded {} participants from {}",
        participants.len(),
        config.directories.dataset.display()
    );

    let mut runner = PipelineRunner::from_configuration(&config, Arc::new(participants));
    runner.assign_team(&args.team)?;
    runner.apply_configuration(&config)?;
    runner.select(&args.selection())?;

    if args.check {
        let audit = runner.missing_outputs(scope)?;
        print_audit(&audit, args.json)?;
        return Ok(());
    }

    let summary = runner.start(scope).await?;

    if args.json {
        let output = RunOutput {
            team_id: &args.team,
            subjects: runner.subjects().iter().map(|s| s.as_str()).collect(),
            scope,
            stages_run: summary.stages_run,
            units_run: summary.units_run,
            elapsed_secs: summary.elapsed_secs,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("\n=== Run Results ===");
        println!("Team:        {}", args.team);
        println!("Subjects:    {}", runner.subjects().len());
        println!("Scope:       {}", scope);
        println!("Stages run:  {}", summary.stages_run);
        println!("Units run:   {}", summary.units_run);
        println!("Duration:    {:.1}s", summary.elapsed_secs);
    }

    Ok(())
}

fn print_audit(audit: &OutputAudit, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(audit)?);
        return Ok(());
    }

    if let Some(missing) = &audit.first_level {
        println!("Missing files for team {} after first level:", audit.team_id);
        for path in missing {
            println!("  {}", path.display());
        }
    }

    if let Some(missing) = &audit.group_level {
        println!("Missing files for team {} after group level:", audit.team_id);
        for path in missing {
            println!("  {}", path.display());
        }
    }

    if audit.is_complete() {
        println!("All expected outputs of team {} are present.", audit.team_id);
    }

    Ok(())
}

// ============================================================================
// Teams Command Implementation
// ============================================================================

fn run_teams_command(args: TeamsArgs) -> anyhow::Result<()> {
    let teams: Vec<_> = PipelineRegistry::builtin()
        .teams()
        .into_iter()
        .filter(|entry| !args.implemented || entry.implemented)
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&teams)?);
        return Ok(());
    }

    for entry in &teams {
        let status = if entry.implemented {
            "implemented"
        } else {
            "not implemented"
        };
        println!("{}  {}", entry.team_id, status);
    }

    Ok(())
}
