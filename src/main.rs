use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use fairsim::config::EngineConfig;
use fairsim::error::ServiceError;
use fairsim::logging;
use fairsim::params::{ParameterInput, SimulationParameters};
use fairsim::service::{FairService, RunOutcome, RunRequest, SimulationDetail};
use fairsim::stats::{Histogram, SimulationSummary};
use fairsim::store::{ListQuery, Page, StoredSimulation};
use fairsim::types::SimulationId;

const USAGE: &str = "\
usage: fairsim [--db PATH] [--json] [--quiet] <command> [options]

commands:
  run      --asset-value V --tef-min A --tef-max B --vuln PERCENT
           --primary-min A --primary-max B --secondary-min A --secondary-max B
           [--iterations N] [--notes TEXT] [--tags a,b] [--seed N] [--parallel]
  list     [--page N] [--limit N] [--search TEXT] [--tag TAG]
  show     ID
  compare  ID ID [ID]
  export   ID [--output PATH]
  delete   ID";

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}\n\n{USAGE}")]
    Usage(String),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("cannot encode output: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    fn usage(msg: impl Into<String>) -> Self {
        CliError::Usage(msg.into())
    }
}

enum Command {
    Run(RunRequest),
    List(ListQuery),
    Show(SimulationId),
    Compare(Vec<SimulationId>),
    Export { id: SimulationId, output: Option<PathBuf> },
    Delete(SimulationId),
}

struct Cli {
    db: Option<PathBuf>,
    seed: Option<u64>,
    json: bool,
    quiet: bool,
    command: Command,
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") || args.is_empty() {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }

    match parse_and_run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn parse_and_run(args: &[String]) -> Result<(), CliError> {
    let mut config = EngineConfig::from_env().map_err(ServiceError::from)?;
    let cli = parse_args(args, &config)?;
    logging::init_tracing(cli.quiet);

    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    let mut service = FairService::open(config)?;

    match cli.command {
        Command::Run(request) => {
            let outcome = service.run(&request)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else if !cli.quiet {
                print_outcome(&outcome);
            }
        }
        Command::List(query) => {
            let page = service.list(&query)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&page)?);
            } else {
                print_page(&page);
            }
        }
        Command::Show(id) => {
            let detail = service.detail(id)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&detail)?);
            } else {
                print_detail(&detail);
            }
        }
        Command::Compare(ids) => {
            let details = service.compare(&ids)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&details)?);
            } else {
                print_comparison(&details);
            }
        }
        Command::Export { id, output } => {
            let path = service.export_to_file(id, output.as_deref())?;
            if !cli.quiet {
                println!("Exported simulation {id} -> {}", path.display());
            }
        }
        Command::Delete(id) => {
            service.delete(id)?;
            if !cli.quiet {
                println!("Simulation {id} deleted");
            }
        }
    }
    Ok(())
}

fn parse_args(args: &[String], config: &EngineConfig) -> Result<Cli, CliError> {
    let mut db = None;
    let mut seed = None;
    let mut json = false;
    let mut quiet = false;
    let mut rest: Vec<&str> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--db" => {
                i += 1;
                db = Some(PathBuf::from(value_at(args, i, "--db")?));
            }
            "--seed" => {
                i += 1;
                seed = Some(number(value_at(args, i, "--seed")?, "--seed")?);
            }
            "--json" => json = true,
            "--quiet" => quiet = true,
            other => rest.push(other),
        }
        i += 1;
    }

    let Some((name, options)) = rest.split_first() else {
        return Err(CliError::usage("missing command"));
    };
    let command = match *name {
        "run" => Command::Run(parse_run(options)?),
        "list" => Command::List(parse_list(options, config)?),
        "show" => Command::Show(single_id(options, "show")?),
        "compare" => Command::Compare(
            options.iter().map(|raw| parse_id(raw)).collect::<Result<Vec<_>, _>>()?,
        ),
        "export" => parse_export(options)?,
        "delete" => Command::Delete(single_id(options, "delete")?),
        other => return Err(CliError::usage(format!("unknown command `{other}`"))),
    };

    Ok(Cli { db, seed, json, quiet, command })
}

fn parse_run(options: &[&str]) -> Result<RunRequest, CliError> {
    let mut asset_value = None;
    let mut tef_min = None;
    let mut tef_max = None;
    let mut vuln = None;
    let mut primary_min = None;
    let mut primary_max = None;
    let mut secondary_min = None;
    let mut secondary_max = None;
    let mut iterations = None;
    let mut notes = String::new();
    let mut tags = String::new();
    let mut parallel = false;

    let mut i = 0;
    while i < options.len() {
        let flag = options[i];
        if flag == "--parallel" {
            parallel = true;
            i += 1;
            continue;
        }
        let value = options
            .get(i + 1)
            .copied()
            .ok_or_else(|| CliError::usage(format!("{flag} requires a value")))?;
        match flag {
            "--asset-value" => asset_value = Some(number(value, flag)?),
            "--tef-min" => tef_min = Some(number(value, flag)?),
            "--tef-max" => tef_max = Some(number(value, flag)?),
            "--vuln" => vuln = Some(number(value, flag)?),
            "--primary-min" => primary_min = Some(number(value, flag)?),
            "--primary-max" => primary_max = Some(number(value, flag)?),
            "--secondary-min" => secondary_min = Some(number(value, flag)?),
            "--secondary-max" => secondary_max = Some(number(value, flag)?),
            "--iterations" => iterations = Some(number(value, flag)?),
            "--notes" => notes = value.to_string(),
            "--tags" => tags = value.to_string(),
            _ => return Err(CliError::usage(format!("unknown run option `{flag}`"))),
        }
        i += 2;
    }

    let required = |v: Option<f64>, flag: &str| {
        v.ok_or_else(|| CliError::usage(format!("run requires {flag}")))
    };
    let input = ParameterInput {
        asset_value: required(asset_value, "--asset-value")?,
        tef_min: required(tef_min, "--tef-min")?,
        tef_max: required(tef_max, "--tef-max")?,
        vulnerability_percent: required(vuln, "--vuln")?,
        primary_loss_min: required(primary_min, "--primary-min")?,
        primary_loss_max: required(primary_max, "--primary-max")?,
        secondary_loss_min: required(secondary_min, "--secondary-min")?,
        secondary_loss_max: required(secondary_max, "--secondary-max")?,
        iterations,
    };
    Ok(RunRequest { input, notes, tags, parallel })
}

fn parse_list(options: &[&str], config: &EngineConfig) -> Result<ListQuery, CliError> {
    let mut query = ListQuery::new(config);
    let mut i = 0;
    while i < options.len() {
        let flag = options[i];
        let value = options
            .get(i + 1)
            .copied()
            .ok_or_else(|| CliError::usage(format!("{flag} requires a value")))?;
        match flag {
            "--page" => query.page = number(value, flag)?,
            "--limit" => query.limit = number(value, flag)?,
            "--search" => query.search = Some(value.to_string()),
            "--tag" => query.tag = Some(value.to_string()),
            _ => return Err(CliError::usage(format!("unknown list option `{flag}`"))),
        }
        i += 2;
    }
    Ok(query)
}

fn parse_export(options: &[&str]) -> Result<Command, CliError> {
    match options {
        [id] => Ok(Command::Export { id: parse_id(id)?, output: None }),
        [id, "--output", path] | ["--output", path, id] => {
            Ok(Command::Export { id: parse_id(id)?, output: Some(PathBuf::from(path)) })
        }
        _ => Err(CliError::usage("export takes ID [--output PATH]")),
    }
}

fn single_id(options: &[&str], command: &str) -> Result<SimulationId, CliError> {
    match options {
        [id] => parse_id(id),
        _ => Err(CliError::usage(format!("{command} takes exactly one ID"))),
    }
}

fn parse_id(raw: &str) -> Result<SimulationId, CliError> {
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(SimulationId(id)),
        _ => Err(CliError::usage(format!("invalid simulation ID `{raw}`"))),
    }
}

fn value_at<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, CliError> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| CliError::usage(format!("{flag} requires a value")))
}

fn number<T: FromStr>(raw: &str, flag: &str) -> Result<T, CliError> {
    raw.parse().map_err(|_| CliError::usage(format!("{flag}: `{raw}` is not a valid number")))
}

// ── Rendering ────────────────────────────────────────────────────────────────

fn print_outcome(outcome: &RunOutcome) {
    println!(
        "Simulation {} saved ({} iterations, seed {})",
        outcome.id,
        outcome.params.iterations(),
        outcome.seed
    );
    print_exposure(&outcome.params);
    print_summary(&outcome.summary);
    print_histogram(&outcome.histogram);
}

fn print_exposure(params: &SimulationParameters) {
    println!("  Expected loss    {:>16}", money(params.expected_annual_loss()));
    println!("  Worst case       {:>16}", money(params.max_annual_loss()));
}

fn print_summary(s: &SimulationSummary) {
    println!("\n=== Annualized loss ===");
    for (label, value) in [
        ("Mean", s.mean),
        ("Median", s.median),
        ("Min", s.min),
        ("Max", s.max),
        ("90th percentile", s.p90),
        ("95th percentile", s.p95),
        ("99th percentile", s.p99),
    ] {
        println!("  {label:<16} {:>16}", money(value));
    }
}

fn print_histogram(h: &Histogram) {
    const BAR_WIDTH: u64 = 40;
    if h.is_empty() {
        return;
    }
    let peak = h.counts.iter().copied().max().unwrap_or(0).max(1);
    println!("\n=== Distribution ({} bins) ===", h.bin_count());
    for (label, &count) in h.labels.iter().zip(&h.counts) {
        let bar = "#".repeat((count * BAR_WIDTH / peak) as usize);
        println!("  {label:>14} | {count:>6} {bar}");
    }
}

fn print_detail(detail: &SimulationDetail) {
    let sim = &detail.simulation;
    let p = &sim.params;
    println!("=== Simulation {} ({}) ===", sim.id, sim.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Asset value      {:>16}", money(p.asset_value()));
    println!("  TEF              {:>7} - {}", p.tef().min, p.tef().max);
    println!("  Vulnerability    {:>7}%", p.vulnerability_percent());
    println!("  Primary loss     {} - {}", money(p.primary_loss().min), money(p.primary_loss().max));
    println!("  Secondary loss   {} - {}", money(p.secondary_loss().min), money(p.secondary_loss().max));
    println!("  Iterations       {:>7}", p.iterations());
    print_exposure(p);
    if !sim.notes.is_empty() {
        println!("  Notes            {}", sim.notes);
    }
    if !sim.tags.is_empty() {
        println!("  Tags             {}", sim.tag_list().join(", "));
    }
    print_summary(&sim.summary);
    print_histogram(&detail.histogram);
}

fn print_page(page: &Page<StoredSimulation>) {
    println!(
        "=== Simulations (page {}/{}, {} total) ===",
        page.page,
        page.pages.max(1),
        page.total
    );
    println!(
        "{:>6} | {:>19} | {:>10} | {:>14} | {:>14} | {:>14} | {}",
        "ID", "Created", "Iterations", "Mean", "P95", "P99", "Tags"
    );
    println!("{}", "-".repeat(100));
    for sim in &page.items {
        println!(
            "{:>6} | {:>19} | {:>10} | {:>14} | {:>14} | {:>14} | {}",
            sim.id.to_string(),
            sim.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            sim.params.iterations(),
            money(sim.summary.mean),
            money(sim.summary.p95),
            money(sim.summary.p99),
            sim.tags,
        );
    }
}

fn print_comparison(details: &[SimulationDetail]) {
    println!("=== Simulation comparison ===");
    println!(
        "{:>12} | {:>14} | {:>14} | {:>14} | {:>14} | {:>14}",
        "Simulation", "Mean", "Median", "P90", "P95", "P99"
    );
    println!("{}", "-".repeat(95));
    for d in details {
        let s = &d.simulation.summary;
        println!(
            "{:>12} | {:>14} | {:>14} | {:>14} | {:>14} | {:>14}",
            d.simulation.id.to_string(),
            money(s.mean),
            money(s.median),
            money(s.p90),
            money(s.p95),
            money(s.p99),
        );
    }
}

fn money(value: f64) -> String {
    format!("${}", fairsim::stats::format_amount(value))
}
