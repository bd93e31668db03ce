use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use stepwise::config::Config;
use stepwise::engine::Engine;
use stepwise::guidance::GuidanceBus;
use stepwise::logging;
use stepwise::program::loader::load_program;
use stepwise::program::{IssueSeverity, Program, StepStatus};
use stepwise::simulate::{run_scenario, Scenario};
use stepwise::world::sim::SimulatedWorld;

#[derive(Parser)]
#[command(name = "stepwise")]
#[command(about = "Run and check guided step-by-step procedures")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a program definition for structural errors
    Validate {
        /// Program file (json, yaml or toml)
        program: PathBuf,

        /// Also check object references against a scenario's scene
        #[arg(short, long)]
        scene: Option<PathBuf>,
    },

    /// Print the module / task group / step tree of a program
    Inspect {
        /// Program file (json, yaml or toml)
        program: PathBuf,
    },

    /// Replay a scripted scenario against a simulated world
    Simulate {
        /// Scenario file (json, yaml or toml)
        scenario: PathBuf,

        /// Write the full run report as JSON
        #[arg(short, long)]
        report: Option<PathBuf>,

        /// Stop after this many ticks
        #[arg(short, long)]
        max_ticks: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first (needed for logging setup)
    let config = Config::load(cli.config.as_deref())?;
    let logging_handle = logging::init_logging(&config, cli.debug)?;

    let result = match cli.command {
        Commands::Validate { program, scene } => cmd_validate(&config, &program, scene.as_deref()),
        Commands::Inspect { program } => cmd_inspect(&program),
        Commands::Simulate {
            scenario,
            report,
            max_ticks,
        } => cmd_simulate(&config, &scenario, report.as_deref(), max_ticks),
    };

    if let Some(log_path) = logging_handle.log_file_path {
        if log_path.exists() {
            eprintln!("Session log: {}", log_path.display());
        }
    }

    result
}

fn scenario_dir(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new("."))
}

fn cmd_validate(config: &Config, program_path: &Path, scene: Option<&Path>) -> Result<()> {
    let program = load_program(program_path)?;

    let issues = match scene {
        Some(scene_path) => {
            let scenario = Scenario::load(scene_path)?;
            let world = scenario.build_world()?;
            let engine = Engine::from_config(&config.engine, GuidanceBus::new());
            engine.preflight(&program, &world)
        }
        None => program.validate(),
    };

    let errors = issues
        .iter()
        .filter(|i| i.severity == IssueSeverity::Error)
        .count();
    for issue in &issues {
        println!("{issue}");
    }

    if errors > 0 {
        bail!("{} has {errors} error(s)", program_path.display());
    }
    println!(
        "{}: ok ({} warning(s))",
        program_path.display(),
        issues.len() - errors
    );
    Ok(())
}

fn status_glyph(status: StepStatus) -> &'static str {
    match status {
        StepStatus::NotStarted => " ",
        StepStatus::Active => "~",
        StepStatus::Completed => "x",
    }
}

fn print_tree(program: &Program) {
    println!("{}", program.name);
    if !program.description.is_empty() {
        println!("  {}", program.description);
    }
    for (m, module) in program.modules.iter().enumerate() {
        println!("{m}. {}", module.name);
        for (g, group) in module.task_groups.iter().enumerate() {
            println!("  {m}.{g} {}", group.name);
            for (s, step) in group.steps.iter().enumerate() {
                let mut flags = Vec::new();
                if step.optional {
                    flags.push("optional");
                }
                if step.allow_parallel {
                    flags.push("parallel");
                }
                let flags = if flags.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", flags.join(", "))
                };
                println!(
                    "    [{}] {m}.{g}.{s} {} <{}>{flags}",
                    status_glyph(step.status()),
                    step.name,
                    step.kind()
                );
                for (role, reference) in step.references() {
                    println!("          {role}: {reference}");
                }
            }
        }
    }
}

fn cmd_inspect(program_path: &Path) -> Result<()> {
    let program = load_program(program_path)?;
    print_tree(&program);

    let progress = program.progress();
    println!();
    println!("Steps:  {} ({} required)", progress.total, progress.required_total);
    println!("Digest: {}", program.digest());
    Ok(())
}

fn cmd_simulate(
    config: &Config,
    scenario_path: &Path,
    report_path: Option<&Path>,
    max_ticks: Option<usize>,
) -> Result<()> {
    let scenario = Scenario::load(scenario_path)?;
    let report = run_scenario(
        &scenario,
        scenario_dir(scenario_path),
        &config.engine,
        max_ticks,
    )
    .with_context(|| format!("Simulation of {} failed", scenario_path.display()))?;

    print!("{}", report.summary());

    if let Some(path) = report_path {
        report.save(path)?;
        println!("Report written to {}", path.display());
    }

    if !report.completed() {
        bail!("Sequence did not complete (state: {})", report.final_state);
    }
    Ok(())
}
