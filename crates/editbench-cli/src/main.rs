use clap::{Parser, Subcommand};
use editbench_core::config::BenchConfig;
use editbench_core::harness::Harness;
use editbench_core::report::{csv, json, summary, workspace, Collector};
use editbench_core::scheduler::Scheduler;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const EXIT_OK: i32 = 0;
const EXIT_CONFIG: i32 = 2;
const EXIT_RUN: i32 = 1;

#[derive(Parser)]
#[command(name = "editbench", version, about = "Benchmark code-editing strategies for LLMs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the benchmark described by a config file.
    Run {
        /// Path to the YAML config.
        config: PathBuf,
        /// Override the worker pool size.
        #[arg(long)]
        parallel: Option<usize>,
        /// Override the output directory.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Parse the config, load the corpus and print the trial matrix
    /// without calling any provider.
    Plan {
        config: PathBuf,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run {
            config,
            parallel,
            output_dir,
        } => run(&config, parallel, output_dir).await,
        Command::Plan { config } => plan(&config),
    };
    std::process::exit(code);
}

fn config_root(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn plan(config_path: &Path) -> i32 {
    let result = (|| -> anyhow::Result<()> {
        let config = BenchConfig::from_file(config_path)?;
        let plan = config.into_plan(&config_root(config_path))?;
        let trials = plan.expand();
        println!(
            "{} trials ({} models x {} files, mode {})",
            trials.len(),
            plan.models.len(),
            plan.files.len(),
            plan.mode.as_str()
        );
        for t in &trials {
            println!("  {}", t.trial_id());
        }
        Ok(())
    })();
    match result {
        Ok(()) => EXIT_OK,
        Err(e) => {
            eprintln!("error: {e:?}");
            EXIT_CONFIG
        }
    }
}

async fn run(config_path: &Path, parallel: Option<usize>, output_dir: Option<PathBuf>) -> i32 {
    let prepared = (|| -> anyhow::Result<_> {
        let config = BenchConfig::from_file(config_path)?;
        let mut plan = config.into_plan(&config_root(config_path))?;
        if let Some(p) = parallel {
            plan.parallel = p.max(1);
        }
        let out_dir = output_dir.unwrap_or_else(|| PathBuf::from(&config.output_dir));
        let harness = Arc::new(Harness::from_config(&config)?);
        Ok((plan, out_dir, harness))
    })();
    let (plan, out_dir, harness) = match prepared {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {e:?}");
            return EXIT_CONFIG;
        }
    };

    let scheduler = Scheduler::new(plan, harness.resolver(), harness.verifier());
    let collector = Collector::new();
    let artifacts = match scheduler.run(Some(collector.sink())).await {
        Ok(a) => a,
        Err(e) => {
            eprintln!("error: {e:?}");
            return EXIT_RUN;
        }
    };

    if let Err(e) = write_artifacts(&artifacts, &out_dir) {
        eprintln!("error writing artifacts: {e:?}");
        return EXIT_RUN;
    }

    let run_summary = summary::summarize(&artifacts);
    print!("{}", summary::render_text(&run_summary));
    println!("\nartifacts written to {}", out_dir.display());
    EXIT_OK
}

fn write_artifacts(
    artifacts: &editbench_core::report::BenchArtifacts,
    out_dir: &Path,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(out_dir)?;
    csv::write_csv(artifacts, &out_dir.join("results.csv"))?;
    json::write_json(artifacts, &out_dir.join("detail.json"))?;
    summary::write_summary(&summary::summarize(artifacts), &out_dir.join("summary.json"))?;
    let written = workspace::write_workspace(artifacts, out_dir)?;
    tracing::info!(files = written, "workspace snapshots written");
    Ok(())
}
