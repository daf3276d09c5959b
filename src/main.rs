use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use ui_trail::config;
use ui_trail::narrative::llm::check_health;
use ui_trail::{
    AutomationAgent, DriverAgent, DriverConfig, LlmConfig, LlmNarrator, NarrativeGenerator,
    RunConfig, ScriptedAgent, TaskOrchestrator, TaskRun, TaskStatus, TemplateNarrator,
    cleanup_old_runs, list_runs, logging,
};

/// UI Trail - record how an automation agent completes a web task
#[derive(Parser, Debug)]
#[command(
    name = "ui-trail",
    about = "Drive a browser automation agent and record its steps as a tutorial dataset",
    after_help = "ENVIRONMENT VARIABLES:\n\
        UI_TRAIL_OUTPUT_DIR          Base directory for run artifacts\n\
        UI_TRAIL_MAX_STEPS           Default iteration budget\n\
        UI_TRAIL_DRIVER              Browser driver command line\n\
        UI_TRAIL_LLM_ENDPOINT        Chat completions endpoint for walkthroughs\n\
        UI_TRAIL_LLM_MODEL           Model name\n\
        OPENAI_API_KEY               Bearer token for the endpoint\n\
        RUST_LOG                     Log filter (default: ui_trail=info)"
)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a task and record the steps
    Run {
        /// Natural language task for the agent
        #[arg(short, long)]
        task: String,

        /// Maximum loop iterations before the run times out
        #[arg(short, long)]
        max_steps: Option<usize>,

        /// Base directory for run artifacts
        #[arg(short, long, env = "UI_TRAIL_OUTPUT_DIR")]
        output: Option<PathBuf>,

        /// Driver command line, e.g. "node drivers/playwright.js" (default: UI_TRAIL_DRIVER)
        #[arg(long, conflicts_with = "script")]
        driver: Option<String>,

        /// Replay a JSON script of frames instead of driving a browser
        #[arg(long)]
        script: Option<PathBuf>,

        /// Write the walkthrough from templates only
        #[arg(long)]
        no_llm: bool,

        /// Output the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// List recorded runs
    List {
        /// Base directory for run artifacts
        #[arg(short, long, env = "UI_TRAIL_OUTPUT_DIR")]
        output: Option<PathBuf>,
    },

    /// Delete runs older than a given age
    Clean {
        /// Age threshold in hours
        #[arg(long, default_value = "24")]
        older_than_hours: u64,

        /// Base directory for run artifacts
        #[arg(short, long, env = "UI_TRAIL_OUTPUT_DIR")]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    logging::init();
    let args = Args::parse();

    match args.command {
        Commands::Run {
            task,
            max_steps,
            output,
            driver,
            script,
            no_llm,
            json,
        } => {
            let mut run_config = RunConfig::default();
            if let Some(max_steps) = max_steps {
                run_config.max_steps = max_steps;
            }
            if let Some(output) = output {
                run_config.output_dir = output;
            }

            let agent = build_agent(driver.as_deref(), script.as_deref())?;
            let narrator = build_narrator(no_llm, json);

            let mut orchestrator = TaskOrchestrator::new(agent, narrator, run_config);
            let outcome = orchestrator.run(&task)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                let run = &outcome.task_run;
                println!("Run {}: {}", run.task_id, run.status);
                println!("  Steps: {}", run.total_steps);
                println!("  Artifacts: {}", outcome.artifact_dir.display());
                match (&outcome.tutorial_path, &outcome.narrative_error) {
                    (Some(path), _) => println!("  Tutorial: {}", path.display()),
                    (None, Some(e)) => println!("  Tutorial: not written ({})", e),
                    (None, None) => {}
                }
                if let Some(failure) = &outcome.failure {
                    println!("  Failure: {}", failure);
                }
            }

            let code = match outcome.task_run.status {
                TaskStatus::Success => 0,
                TaskStatus::Timeout => 2,
                TaskStatus::Failure | TaskStatus::InProgress => 1,
            };
            if code != 0 {
                std::process::exit(code);
            }
        }

        Commands::List { output } => {
            let base = output.unwrap_or_else(config::output_dir);
            let runs = list_runs(&base)?;
            if runs.is_empty() {
                println!("No runs in {}", base.display());
            }
            for dir in runs {
                match read_metadata(&dir) {
                    Some(run) => println!(
                        "{}  {:<8} {:>3} steps  {}",
                        dir.display(),
                        run.status.as_str(),
                        run.total_steps,
                        run.task_instruction
                    ),
                    None => println!("{}  (unreadable metadata)", dir.display()),
                }
            }
        }

        Commands::Clean {
            older_than_hours,
            output,
        } => {
            let base = output.unwrap_or_else(config::output_dir);
            let removed = cleanup_old_runs(&base, Duration::from_secs(older_than_hours * 3600))?;
            println!("Removed {} run(s) from {}", removed, base.display());
        }
    }

    Ok(())
}

fn build_agent(
    driver: Option<&str>,
    script: Option<&Path>,
) -> Result<Box<dyn AutomationAgent>, Box<dyn Error>> {
    if let Some(path) = script {
        return Ok(Box::new(ScriptedAgent::from_file(path)?));
    }

    let command = driver
        .map(str::to_string)
        .or_else(|| config::get().driver.command.clone())
        .ok_or("No automation backend: pass --driver, --script or set UI_TRAIL_DRIVER")?;
    let mut driver_config = DriverConfig::from_command_line(&command)
        .ok_or_else(|| format!("Invalid driver command '{}'", command))?;
    if let Some(timeout) = config::get().driver.response_timeout {
        driver_config = driver_config.response_timeout(timeout);
    }
    Ok(Box::new(DriverAgent::new(driver_config)))
}

fn build_narrator(no_llm: bool, quiet: bool) -> Box<dyn NarrativeGenerator> {
    if no_llm {
        return Box::new(TemplateNarrator::new());
    }

    let llm_config = LlmConfig::default();
    match check_health(&llm_config.endpoint, llm_config.connection_timeout) {
        Ok(true) => Box::new(LlmNarrator::new(llm_config)),
        Ok(false) | Err(_) => {
            warn!(endpoint = %llm_config.endpoint, "LLM endpoint not responding");
            if !quiet {
                eprintln!("Warning: LLM endpoint not responding at {}", llm_config.endpoint);
                eprintln!("Writing the walkthrough from templates instead.");
            }
            Box::new(TemplateNarrator::new())
        }
    }
}

fn read_metadata(dir: &Path) -> Option<TaskRun> {
    let data = std::fs::read_to_string(dir.join(ui_trail::store::METADATA_FILE)).ok()?;
    serde_json::from_str(&data).ok()
}
