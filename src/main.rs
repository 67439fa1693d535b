//! Informality Model CLI
//!
//! Solve, simulate, estimate and run counterfactuals from a JSON run configuration

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::warn;

use informality_model::counterfactual::loss_aversion_table;
use informality_model::report::{
    apply_parameter_rows, moment_table, parameter_table, policy_table, read_parameter_rows_from_path,
    write_rows_to_path,
};
use informality_model::{
    CancelToken, CounterfactualRunner, MomentCalculator, Model, ModelWarning, Panel, RunConfig, Simulator,
    SmmEstimator, TargetSet,
};

#[derive(Parser)]
#[command(name = "informality-model")]
#[command(version)]
#[command(about = "Lifecycle model of formal/informal sector choice under sector-specific borrowing limits")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON run configuration; defaults apply to every omitted field
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for CSV outputs
    #[arg(short, long, global = true, default_value = "output")]
    output_dir: PathBuf,

    /// Override the simulation seed
    #[arg(long, global = true)]
    seed: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve the model and write the policy table
    Solve,

    /// Solve, simulate a cohort and write the panel and its moments
    Simulate,

    /// Estimate theta by SMM against target moments
    Estimate {
        /// Target moments CSV (schema_version,moment,estimate,std_error)
        #[arg(short, long)]
        targets: PathBuf,

        /// Empirical panel CSV, required for bootstrap standard errors
        #[arg(short, long)]
        panel: Option<PathBuf>,

        /// Number of bootstrap replications
        #[arg(short, long)]
        bootstrap: Option<usize>,

        /// Wall-clock budget for the optimizer and the bootstrap, in seconds
        #[arg(long)]
        max_seconds: Option<f64>,
    },

    /// Run the configured counterfactual experiments
    Counterfactual {
        /// Parameter table from a previous estimate (parameters.csv); overrides the configured parameters
        #[arg(short, long)]
        parameters: Option<PathBuf>,
    },
}

fn load_config(cli: &Cli) -> Result<RunConfig> {
    let mut config = match &cli.config {
        Some(path) => RunConfig::from_json_path(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => RunConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config.simulation.seed = seed;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn output_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}

/// Cancel `token` on Ctrl-C. The search stops at its next check and the
/// best point so far is still reported.
fn cancel_on_interrupt(token: CancelToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting the signal handler")?;
    std::thread::spawn(move || {
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after the current evaluation");
                token.cancel();
            }
        });
    });
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let mut config = load_config(&cli)?;
    fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("creating output directory {}", cli.output_dir.display()))?;
    let out = cli.output_dir.as_path();
    let start = Instant::now();

    match &cli.command {
        Commands::Solve => {
            let model = Model::build(config.parameters.clone(), &config.grid)?;
            let solution = model.solve().context("solving the model")?;
            let path = output_path(out, "policy.csv");
            write_rows_to_path(&policy_table(&solution), &path)?;
            println!("Solved {} ages x {} states in {:?}", solution.periods(), model.grid.n_states(), start.elapsed());
            println!("Policy table written to {}", path.display());
        }

        Commands::Simulate => {
            let model = Model::build(config.parameters.clone(), &config.grid)?;
            let solution = model.solve().context("solving the model")?;
            let sim = Simulator::new(&model, &solution, &config.simulation).simulate()?;
            let moments = MomentCalculator::with_borrowing_limits(config.moments.clone(), &model.params)
                .compute(&sim.panel);

            let panel_path = output_path(out, "panel.csv");
            let file = fs::File::create(&panel_path)
                .with_context(|| format!("creating {}", panel_path.display()))?;
            sim.panel.write_csv(file)?;
            write_rows_to_path(&moment_table(&moments), output_path(out, "moments.csv"))?;

            println!(
                "Simulated {} agents ({} observations, {} consumption-floor hits) in {:?}",
                sim.panel.n_persons(),
                sim.panel.n_observations(),
                sim.floor_hits,
                start.elapsed()
            );
            for (moment, value) in moments.iter() {
                match value {
                    Ok(v) => println!("  {:<36} {:>12.6}", moment.to_string(), v),
                    Err(e) => println!("  {:<36} {:>12} ({})", moment.to_string(), "missing", e.reason),
                }
            }
        }

        Commands::Estimate { targets, panel, bootstrap, max_seconds } => {
            if let Some(b) = bootstrap {
                config.estimation.bootstrap_replications = *b;
            }
            if max_seconds.is_some() {
                config.estimation.max_seconds = *max_seconds;
            }
            config.validate().context("invalid configuration")?;
            if config.estimation.bootstrap_replications > 0 && panel.is_none() {
                bail!("bootstrap standard errors need the empirical panel (--panel)");
            }

            let targets = TargetSet::from_csv_path(targets)
                .with_context(|| format!("loading targets from {}", targets.display()))?;
            println!("Loaded {} target moments", targets.len());

            let cancel = CancelToken::new();
            cancel_on_interrupt(cancel.clone())?;
            let estimator = SmmEstimator::new(&config).with_cancel_token(cancel);
            let estimate = estimator.estimate(&targets).context("estimating theta")?;
            println!(
                "Estimate: b_formal={:.4} b_informal={:.4} kappa={:.4} sigma_pref={:.4} Q={:.6e} ({:?})",
                estimate.theta.b_formal,
                estimate.theta.b_informal,
                estimate.theta.kappa,
                estimate.theta.sigma_pref,
                estimate.q,
                estimate.status
            );
            for warning in &estimate.warnings {
                if let ModelWarning::WeakIdentification { spread, tolerance } = warning {
                    println!("WARNING: weak identification, restarts differ by {:.4} (tolerance {:.4})", spread, tolerance);
                }
            }

            let mut std_errors = None;
            if let Some(panel_path) = panel.as_ref().filter(|_| config.estimation.bootstrap_replications > 0) {
                let empirical = Panel::from_csv_path(panel_path)
                    .with_context(|| format!("loading panel from {}", panel_path.display()))?;
                let calculator = estimator.empirical_calculator(&estimate);
                let boot = estimator.bootstrap(&empirical, &calculator, &targets, &estimate)?;
                println!(
                    "Bootstrap: {} replications ({:?}), {} dropped targets",
                    boot.replications.len(),
                    boot.status,
                    boot.dropped_targets
                );
                if boot.std_errors.is_none() {
                    warn!("fewer than two bootstrap replications completed, no standard errors");
                }
                std_errors = boot.std_errors;
            }

            write_rows_to_path(&parameter_table(&estimate.params, std_errors.as_ref()), output_path(out, "parameters.csv"))?;
            write_rows_to_path(&estimate.fit, output_path(out, "moment_fit.csv"))?;
            println!("Estimation finished in {:?}; tables written to {}", start.elapsed(), out.display());
        }

        Commands::Counterfactual { parameters } => {
            if let Some(path) = parameters {
                let rows = read_parameter_rows_from_path(path)
                    .with_context(|| format!("loading parameters from {}", path.display()))?;
                config.parameters = apply_parameter_rows(&config.parameters, &rows)?;
                config.validate().context("invalid configuration")?;
                println!("Loaded {} parameters from {}", rows.len(), path.display());
            }
            let model = Model::build(config.parameters.clone(), &config.grid)?;
            let runner = CounterfactualRunner::new(&model, &config.simulation, &config.counterfactual);
            let tables = runner.run_all().context("running counterfactuals")?;
            for table in &tables {
                let path = output_path(out, &format!("counterfactual_{}.csv", table.experiment.name()));
                write_rows_to_path(&table.rows, &path)?;
                if let Some(pooled) = table.rows.iter().find(|r| r.sector == "pooled") {
                    println!(
                        "{:<24} pooled Var(dln C) {:?} -> {:?}, reduction {:?}%",
                        table.experiment.name(),
                        pooled.baseline_variance,
                        pooled.counterfactual_variance,
                        pooled.variance_reduction_pct
                    );
                }
            }
            let loss_aversion = loss_aversion_table(&config.counterfactual.loss_aversion);
            if !loss_aversion.is_empty() {
                write_rows_to_path(&loss_aversion, output_path(out, "loss_aversion.csv"))?;
            }
            println!("{} experiments finished in {:?}", tables.len(), start.elapsed());
        }
    }

    Ok(())
}
