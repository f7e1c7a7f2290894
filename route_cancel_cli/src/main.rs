use std::collections::BTreeMap;
use std::fs;
use std::fs::File;
use std::io::{self, Write};
use std::panic;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Local, NaiveDate, NaiveDateTime};
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use ordered_float::OrderedFloat;
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};
use rayon::prelude::*;
use route_cancel::{
    day_start, parse_trips, simulate, summarize_routes, Checkpoints, Metric, MetricPair,
    Scenario, ScenarioLog, SimConfig, SimulationOutput, TripRecord,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const CLI_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_COMMIT_HASH"), ")");

#[derive(Parser, Debug)]
#[command(author, version = CLI_VERSION, about = "Route cancellation simulation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Simulate cancelling routes and write cumulative curves, CSV and plots
    Simulate(SimulateArgs),
    /// Evaluate several cancellation scenarios side by side
    Compare(CompareArgs),
    /// Report per-route trip counts and cancellable volume
    Routes(RoutesArgs),
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Trip table CSV files to ingest
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Optional JSON config (markers, lead time, targets)
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Evaluation time, also the settled/forecast cutover (defaults to the local clock)
    #[arg(long)]
    now: Option<String>,

    /// Explicit start of the check window
    #[arg(long)]
    check_start: Option<String>,

    /// Explicit end of the check window
    #[arg(long)]
    check_end: Option<String>,

    /// Hours between now and the check window
    #[arg(long)]
    lead_hours: Option<i64>,

    /// Check window length in hours
    #[arg(long)]
    window_hours: Option<i64>,

    /// Period GMV target
    #[arg(long)]
    gmv_target: Option<f64>,

    /// Period cash target
    #[arg(long)]
    cash_target: Option<f64>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct SimulateArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Routes to cancel (comma separated route ids)
    #[arg(long)]
    cancel: Option<String>,

    /// Scenario label
    #[arg(long, default_value = "simulation")]
    label: String,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "simulation.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Optional CSV for the diluted target series
    #[arg(long, value_hint = ValueHint::FilePath)]
    targets_output: Option<PathBuf>,

    /// Optional JSON snapshot of the scenario outputs
    #[arg(long, value_hint = ValueHint::FilePath)]
    snapshot: Option<PathBuf>,

    /// Output PNG figure path (one file per metric; defaults next to CSV)
    #[arg(long, value_hint = ValueHint::FilePath)]
    png: Option<PathBuf>,

    /// Output SVG figure path (one file per metric)
    #[arg(long, value_hint = ValueHint::FilePath)]
    svg: Option<PathBuf>,

    /// Disable plot generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,

    /// Profile major stages with timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,
}

#[derive(Parser, Debug)]
struct CompareArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Scenario as `label=R1,R2` (repeatable; `label=` is the no-cancellation case)
    #[arg(long = "scenario", required = true)]
    scenarios: Vec<String>,

    /// Output comparison CSV path (`-` for stdout)
    #[arg(short, long, default_value = "comparison.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Optional JSON export of the scenario log
    #[arg(long, value_hint = ValueHint::FilePath)]
    log_output: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct RoutesArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Output report path (`-` for stdout)
    #[arg(short, long, default_value = "routes.txt", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Only list the first N routes
    #[arg(long)]
    top: Option<usize>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Simulate(args) => args.input.verbose,
        Command::Compare(args) => args.input.verbose,
        Command::Routes(args) => args.input.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Simulate(args) => handle_simulate(args),
        Command::Compare(args) => handle_compare(args),
        Command::Routes(args) => handle_routes(args),
    }
}

fn handle_simulate(args: SimulateArgs) -> Result<()> {
    let t_parse = Instant::now();
    let trips = load_trips(&args.input.inputs)?;
    if args.profile || args.input.verbose {
        info!(
            "Parse stage: {:.1} ms ({} trips)",
            t_parse.elapsed().as_secs_f64() * 1000.0,
            trips.len()
        );
    }

    let (checkpoints, targets) = resolve_run(&args.input)?;
    let routes = args
        .cancel
        .as_deref()
        .map(parse_route_list)
        .unwrap_or_default();
    warn_unknown_routes(&trips, &routes);
    let scenario = Scenario::new(args.label.clone(), routes, Local::now().naive_local());

    let t_compute = Instant::now();
    let output = simulate(&trips, &checkpoints, targets, &scenario);
    if args.profile || args.input.verbose {
        info!(
            "Compute stage: {:.1} ms ({} dates)",
            t_compute.elapsed().as_secs_f64() * 1000.0,
            output.baseline.len()
        );
    }
    log_summary(&output);

    if args.output.as_os_str() == "-" {
        let stdout = io::stdout();
        let mut writer = csv::Writer::from_writer(stdout.lock());
        write_result_rows(&output, &mut writer)?;
    } else {
        let t_csv = Instant::now();
        let file = File::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        write_result_rows(&output, &mut writer)?;
        if args.profile || args.input.verbose {
            info!(
                "CSV stage: {:.1} ms ({} rows)",
                t_csv.elapsed().as_secs_f64() * 1000.0,
                output.baseline.len()
            );
        }
        info!("Wrote simulation CSV: {}", args.output.display());
    }

    if let Some(path) = args.targets_output.as_ref() {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        write_target_rows(&output, &mut writer)?;
        info!("Wrote target CSV: {}", path.display());
    }

    if let Some(path) = args.snapshot.as_ref() {
        let mut log = ScenarioLog::new();
        log.record(&output);
        let json = log.to_json()?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote scenario snapshot: {}", path.display());
    }

    if !args.no_plot {
        let t_plot = Instant::now();
        let mut charts: Vec<(PathBuf, ChartKind)> = Vec::new();
        if let Some(path) = args.png.as_ref() {
            charts.push((path.clone(), ChartKind::Png));
        } else if args.output.as_os_str() != "-" {
            let mut png_path = args.output.clone();
            png_path.set_extension("png");
            charts.push((png_path, ChartKind::Png));
        }
        if let Some(path) = args.svg.as_ref() {
            charts.push((path.clone(), ChartKind::Svg));
        }
        for (base, kind) in charts {
            for metric in Metric::ALL {
                let path = derive_metric_path(&base, metric);
                if let Err(err) = render_chart_guard(&output, metric, &path, kind) {
                    warn!("Skipping plot ({}): {}", path.display(), err);
                } else {
                    info!("Wrote plot: {}", path.display());
                }
            }
        }
        if args.profile || args.input.verbose {
            info!(
                "Plot stage: {:.1} ms",
                t_plot.elapsed().as_secs_f64() * 1000.0
            );
        }
    }

    Ok(())
}

fn handle_compare(args: CompareArgs) -> Result<()> {
    let trips = load_trips(&args.input.inputs)?;
    let (checkpoints, targets) = resolve_run(&args.input)?;

    let created_at = Local::now().naive_local();
    let scenarios = args
        .scenarios
        .iter()
        .enumerate()
        .map(|(idx, spec)| -> Result<Scenario> {
            let (label, routes) = parse_scenario_spec(spec, idx)?;
            warn_unknown_routes(&trips, &routes);
            Ok(Scenario::new(label, routes, created_at))
        })
        .collect::<Result<Vec<_>>>()?;

    let t_compute = Instant::now();
    let outputs: Vec<SimulationOutput> = scenarios
        .par_iter()
        .map(|scenario| simulate(&trips, &checkpoints, targets, scenario))
        .collect();
    debug!(
        "Evaluated {} scenarios in {:.1} ms",
        outputs.len(),
        t_compute.elapsed().as_secs_f64() * 1000.0
    );

    let mut log = ScenarioLog::new();
    for output in &outputs {
        log.record(output);
        log_summary(output);
    }
    for (index, first) in duplicate_scenarios(&log) {
        warn!(
            "Scenario {} cancels the same routes as scenario {}",
            index, first
        );
    }

    if args.output.as_os_str() == "-" {
        let stdout = io::stdout();
        let mut writer = csv::Writer::from_writer(stdout.lock());
        write_comparison_rows(&log, &mut writer)?;
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        write_comparison_rows(&log, &mut writer)?;
        info!("Wrote comparison CSV: {}", args.output.display());
    }

    if let Some(path) = args.log_output.as_ref() {
        fs::write(path, log.to_json()?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote scenario log: {}", path.display());
    }
    Ok(())
}

fn handle_routes(args: RoutesArgs) -> Result<()> {
    let trips = load_trips(&args.input.inputs)?;
    let (checkpoints, _) = resolve_run(&args.input)?;

    let mut summaries = summarize_routes(&trips, checkpoints.cutover());
    summaries.sort_by_key(|s| std::cmp::Reverse(OrderedFloat(s.future_baseline.gmv)));

    let mut report = String::new();
    report.push_str(&format!("CUTOVER: {}\n", checkpoints.cutover()));
    report.push_str(&format!(
        "CHECK WINDOW: {} .. {}\n",
        checkpoints.check_start, checkpoints.check_end
    ));
    report.push_str(&format!("ROUTES: {}\n", summaries.len()));
    let limit = args.top.unwrap_or(summaries.len());
    for summary in summaries.iter().take(limit) {
        report.push_str(&format!(
            "  - {}: trips={} future={} span={}..{} settled_gmv={:.2} settled_cash={:.2} future_gmv={:.2} future_cash={:.2}\n",
            summary.route_id,
            summary.trips,
            summary.future_trips,
            summary.first_date,
            summary.last_date,
            summary.settled_actual.gmv,
            summary.settled_actual.cash,
            summary.future_baseline.gmv,
            summary.future_baseline.cash
        ));
    }

    if args.output.as_os_str() == "-" {
        io::stdout().write_all(report.as_bytes())?;
    } else {
        fs::write(&args.output, report)
            .with_context(|| format!("failed to write {}", args.output.display()))?;
        info!("Route report written: {}", args.output.display());
    }
    Ok(())
}

fn load_trips(inputs: &[PathBuf]) -> Result<Vec<TripRecord>> {
    if inputs.is_empty() {
        return Err(anyhow!("no input files supplied"));
    }
    let parsed: Vec<Vec<TripRecord>> = inputs
        .par_iter()
        .map(|path| -> Result<Vec<TripRecord>> {
            let data =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            parse_trips(&data).with_context(|| format!("failed to parse {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    let trips: Vec<TripRecord> = parsed.into_iter().flatten().collect();
    debug!("Loaded {} trips from {} files", trips.len(), inputs.len());
    if trips.is_empty() {
        warn!("Trip table is empty; all series will be empty");
    }
    Ok(trips)
}

fn resolve_run(args: &InputArgs) -> Result<(Checkpoints, MetricPair<f64>)> {
    let mut config = match args.config.as_ref() {
        Some(path) => load_config(path)?,
        None => SimConfig::default(),
    };
    if let Some(text) = args.now.as_deref() {
        config.now = Some(parse_timestamp(text)?);
    }
    if let Some(text) = args.check_start.as_deref() {
        config.check_start = Some(parse_timestamp(text)?);
    }
    if let Some(text) = args.check_end.as_deref() {
        config.check_end = Some(parse_timestamp(text)?);
    }
    if let Some(hours) = args.lead_hours {
        config.lead_hours = hours;
    }
    if let Some(hours) = args.window_hours {
        config.window_hours = hours;
    }
    if let Some(value) = args.gmv_target {
        config.gmv_target = value;
    }
    if let Some(value) = args.cash_target {
        config.cash_target = value;
    }

    let checkpoints = config.checkpoints_at(Local::now().naive_local())?;
    let targets = config.targets()?;
    debug!(
        "Checkpoints: now={} check_start={} check_end={}",
        checkpoints.now, checkpoints.check_start, checkpoints.check_end
    );
    Ok((checkpoints, targets))
}

fn load_config(path: &Path) -> Result<SimConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not a valid config", path.display()))
}

fn parse_timestamp(input: &str) -> Result<NaiveDateTime> {
    let text = input.trim();
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(ts);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map(day_start)
        .with_context(|| format!("invalid timestamp '{}': expected YYYY-MM-DD[ HH:MM[:SS]]", text))
}

fn parse_route_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_scenario_spec(input: &str, idx: usize) -> Result<(String, Vec<String>)> {
    let (label, routes) = match input.split_once('=') {
        Some((label, routes)) => (label.trim().to_string(), parse_route_list(routes)),
        None => (String::new(), parse_route_list(input)),
    };
    let label = if label.is_empty() {
        format!("scenario-{}", idx + 1)
    } else {
        label
    };
    if label.contains(',') {
        return Err(anyhow!("invalid scenario '{}': label may not contain ','", input));
    }
    Ok((label, routes))
}

/// `(index, first index)` for every entry whose cancellation set already
/// appeared earlier in the log.
fn duplicate_scenarios(log: &ScenarioLog) -> Vec<(usize, usize)> {
    log.iter()
        .filter_map(|snapshot| {
            log.with_fingerprint(&snapshot.fingerprint)
                .next()
                .filter(|first| first.index != snapshot.index)
                .map(|first| (snapshot.index, first.index))
        })
        .collect()
}

fn warn_unknown_routes(trips: &[TripRecord], routes: &[String]) {
    for route in routes {
        if !trips.iter().any(|t| &t.route_id == route) {
            warn!("Route {} does not appear in the trip table", route);
        }
    }
}

fn log_summary(output: &SimulationOutput) {
    let summary = output.summary();
    let scenario = &output.scenario;
    let parts: Vec<String> = Metric::ALL
        .iter()
        .map(|&metric| {
            let s = summary.get(metric);
            format!(
                "{} final {} (baseline {}, divergence {}, target {})",
                metric,
                fmt_opt(s.displayed_final),
                fmt_opt(s.baseline_final),
                fmt_opt(s.divergence_final),
                fmt_opt(s.target_final)
            )
        })
        .collect();
    info!(
        "Scenario '{}' ({} cancelled routes): {}",
        scenario.label,
        scenario.cancelled_routes.len(),
        parts.join("; ")
    );
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_default()
}

fn write_result_rows<W: Write>(output: &SimulationOutput, writer: &mut csv::Writer<W>) -> Result<()> {
    let mut header = vec!["date".to_string(), "segment".to_string()];
    for metric in Metric::ALL {
        for column in [
            "daily",
            "cumulative",
            "simulated",
            "displayed",
            "divergence",
            "raw_divergence",
            "target_cumulative",
            "baseline_reference",
        ] {
            header.push(format!("{}_{}", metric.id(), column));
        }
    }
    writer.write_record(&header)?;

    let lookups = MetricPair::from_fn(|metric| {
        let alignment = output.alignment.get(metric);
        let displayed: BTreeMap<NaiveDate, f64> = alignment.displayed_points().into_iter().collect();
        let divergence: BTreeMap<NaiveDate, f64> =
            alignment.divergence_points().into_iter().collect();
        let raw: BTreeMap<NaiveDate, f64> = output
            .raw_divergence
            .get(metric)
            .iter()
            .filter_map(|p| p.divergence.map(|d| (p.date, d)))
            .collect();
        (displayed, divergence, raw)
    });
    let targets: BTreeMap<NaiveDate, &route_cancel::TargetRow> =
        output.targets.rows.iter().map(|r| (r.date, r)).collect();

    for row in &output.baseline.rows {
        let segment = if route_cancel::is_before(row.date, output.checkpoints.cutover()) {
            "settled"
        } else {
            "forecast"
        };
        let mut record = vec![row.date.to_string(), segment.to_string()];
        for metric in Metric::ALL {
            let (displayed, divergence, raw) = lookups.get(metric);
            let target = targets.get(&row.date);
            record.push(format!("{:.2}", row.daily.get(metric)));
            record.push(format!("{:.2}", row.cumulative.get(metric)));
            record.push(fmt_opt(output.simulated.value_at(row.date, metric)));
            record.push(fmt_opt(displayed.get(&row.date).copied()));
            record.push(fmt_opt(divergence.get(&row.date).copied()));
            record.push(fmt_opt(raw.get(&row.date).copied()));
            record.push(fmt_opt(target.map(|t| *t.cumulative_target.get(metric))));
            record.push(fmt_opt(target.map(|t| *t.baseline_cumulative.get(metric))));
        }
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

fn write_target_rows<W: Write>(output: &SimulationOutput, writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record([
        "date",
        "gmv_weight",
        "gmv_diluted",
        "gmv_target_cumulative",
        "gmv_baseline_cumulative",
        "cash_weight",
        "cash_diluted",
        "cash_target_cumulative",
        "cash_baseline_cumulative",
    ])?;
    for row in &output.targets.rows {
        writer.write_record([
            row.date.to_string(),
            format!("{:.6}", row.weight.gmv),
            format!("{:.2}", row.diluted.gmv),
            format!("{:.2}", row.cumulative_target.gmv),
            format!("{:.2}", row.baseline_cumulative.gmv),
            format!("{:.6}", row.weight.cash),
            format!("{:.2}", row.diluted.cash),
            format!("{:.2}", row.cumulative_target.cash),
            format!("{:.2}", row.baseline_cumulative.cash),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_comparison_rows<W: Write>(log: &ScenarioLog, writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record([
        "scenario",
        "label",
        "fingerprint",
        "cancelled_routes",
        "date",
        "gmv_displayed",
        "gmv_divergence",
        "cash_displayed",
        "cash_divergence",
    ])?;
    for snapshot in log.iter() {
        let routes: Vec<&str> = snapshot
            .scenario
            .cancelled_routes
            .iter()
            .map(String::as_str)
            .collect();
        let routes = routes.join(";");
        let divergence = MetricPair::from_fn(|metric| {
            snapshot
                .divergence
                .get(metric)
                .iter()
                .filter_map(|p| p.divergence.map(|d| (p.date, d)))
                .collect::<BTreeMap<NaiveDate, f64>>()
        });
        for (idx, point) in snapshot.displayed.gmv.iter().enumerate() {
            let cash = snapshot.displayed.cash.get(idx);
            writer.write_record([
                snapshot.index.to_string(),
                snapshot.scenario.label.clone(),
                snapshot.fingerprint[..12].to_string(),
                routes.clone(),
                point.date.to_string(),
                format!("{:.2}", point.displayed),
                fmt_opt(divergence.gmv.get(&point.date).copied()),
                fmt_opt(cash.map(|p| p.displayed)),
                fmt_opt(divergence.cash.get(&point.date).copied()),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

#[derive(Clone, Copy, Debug)]
enum ChartKind {
    Png,
    Svg,
}

fn derive_metric_path(base: &Path, metric: Metric) -> PathBuf {
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("simulation");
    let ext = base.extension().and_then(|s| s.to_str()).unwrap_or("png");
    base.with_file_name(format!("{}_{}.{}", stem, metric.id(), ext))
}

fn render_chart_guard(
    output: &SimulationOutput,
    metric: Metric,
    path: &Path,
    kind: ChartKind,
) -> Result<(), String> {
    let render = || -> Result<(), String> {
        let drawn = match kind {
            ChartKind::Png => {
                let root = BitMapBackend::new(path, (1280, 720)).into_drawing_area();
                draw_metric_chart(root, output, metric)
            }
            ChartKind::Svg => {
                let root = SVGBackend::new(path, (1280, 720)).into_drawing_area();
                draw_metric_chart(root, output, metric)
            }
        };
        drawn.map_err(|e| format!("plotting error: {}", e))
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn day_offset(origin: NaiveDate, ts: NaiveDateTime) -> f64 {
    (ts - day_start(origin)).num_seconds() as f64 / 86_400.0
}

fn draw_metric_chart<DB>(
    root: DrawingArea<DB, plotters::coord::Shift>,
    output: &SimulationOutput,
    metric: Metric,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let (origin, last) = match (output.baseline.first(), output.baseline.last()) {
        (Some(first), Some(last)) => (first.date, last.date),
        _ => return Ok(()),
    };
    let to_x = |date: NaiveDate| (date - origin).num_days() as f64;

    let alignment = output.alignment.get(metric);
    let segments = output.segments.get(metric);
    let series: Vec<(&str, Vec<(f64, f64)>)> = vec![
        (
            "Historical baseline",
            output
                .targets
                .baseline_points(metric)
                .into_iter()
                .map(|(d, v)| (to_x(d), v))
                .collect(),
        ),
        (
            "Diluted target",
            output
                .targets
                .points(metric)
                .into_iter()
                .map(|(d, v)| (to_x(d), v))
                .collect(),
        ),
        (
            "Settled",
            segments.settled.iter().map(|&(d, v)| (to_x(d), v)).collect(),
        ),
        (
            "Forecast",
            segments.forecast.iter().map(|&(d, v)| (to_x(d), v)).collect(),
        ),
        (
            "Simulation",
            alignment
                .displayed_points()
                .into_iter()
                .map(|(d, v)| (to_x(d), v))
                .collect(),
        ),
        (
            "Divergence",
            alignment
                .divergence_points()
                .into_iter()
                .map(|(d, v)| (to_x(d), v))
                .collect(),
        ),
    ];

    let values = series.iter().flat_map(|(_, pts)| pts.iter().map(|p| p.1));
    let (mut y_min, mut y_max) = values.fold((0.0f64, 0.0f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let pad = ((y_max - y_min) * 0.05).max(1.0);
    y_min -= pad;
    y_max += pad;

    let check_start = day_offset(origin, output.checkpoints.check_start);
    let check_end = day_offset(origin, output.checkpoints.check_end);
    let now = day_offset(origin, output.checkpoints.now);
    let x_min = now.min(0.0) - 0.5;
    let x_max = to_x(last).max(check_end) + 0.5;

    let area = root;
    area.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&area)
        .margin(25)
        .caption(
            format!("Cumulative {} - baseline vs. simulation", metric.name()),
            ("sans-serif", 24),
        )
        .set_label_area_size(LabelAreaPosition::Left, 80)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    let date_label = |v: &f64| (origin + Duration::days(v.round() as i64)).format("%m-%d").to_string();
    chart
        .configure_mesh()
        .x_label_formatter(&date_label)
        .y_label_formatter(&|v| format!("{:.0}", v))
        .x_desc("Date")
        .y_desc(format!("Cumulative {}", metric.name()))
        .label_style(FontDesc::new(FontFamily::SansSerif, 16.0, FontStyle::Normal))
        .draw()?;

    let band = RGBColor(128, 128, 128).mix(0.2);
    chart
        .draw_series(std::iter::once(Rectangle::new(
            [(check_start, y_min), (check_end, y_max)],
            band.filled(),
        )))?
        .label("Check window")
        .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 30, y + 5)], band.filled()));

    chart
        .draw_series(DashedLineSeries::new(
            vec![(now, y_min), (now, y_max)],
            6,
            4,
            BLACK.stroke_width(1),
        ))?
        .label("Now")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], BLACK));

    let navy = RGBColor(0, 0, 139);
    let styles: [(RGBColor, u32, bool); 6] = [
        (RGBColor(128, 128, 128), 1, true),
        (RGBColor(34, 139, 34), 2, true),
        (navy, 3, false),
        (navy, 3, true),
        (RGBColor(220, 20, 60), 3, false),
        (RGBColor(220, 20, 60), 1, true),
    ];
    for ((label, points), (color, width, dashed)) in series.into_iter().zip(styles) {
        if points.is_empty() {
            continue;
        }
        let style = color.stroke_width(width);
        let anno = if dashed {
            chart.draw_series(DashedLineSeries::new(points, 8, 5, style))?
        } else {
            chart.draw_series(LineSeries::new(points, style))?
        };
        anno.label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], color.stroke_width(width)));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.7))
        .border_style(BLACK.mix(0.3))
        .position(SeriesLabelPosition::UpperLeft)
        .draw()?;

    area.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn sample_output(cancel: &[&str]) -> SimulationOutput {
        let mut trips = Vec::new();
        for d in 1..=4 {
            for route in ["A", "B"] {
                trips.push(TripRecord::new(
                    NaiveDate::from_ymd_opt(2024, 3, d).unwrap(),
                    route,
                    MetricPair::new(100.0, 10.0),
                    MetricPair::new(100.0, 10.0),
                ));
            }
        }
        let checkpoints = Checkpoints::new(ts(3, 0), ts(3, 0), ts(4, 0)).unwrap();
        let scenario = Scenario::new("test", cancel.iter().copied(), ts(1, 0));
        simulate(&trips, &checkpoints, MetricPair::new(800.0, 80.0), &scenario)
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(parse_timestamp("2024-03-02").unwrap(), ts(2, 0));
        assert_eq!(parse_timestamp("2024-03-02 07:00").unwrap(), ts(2, 7));
        assert_eq!(parse_timestamp("2024-03-02T07:00:00").unwrap(), ts(2, 7));
        assert!(parse_timestamp("tomorrow").is_err());
    }

    #[test]
    fn test_parse_scenario_spec() {
        let (label, routes) = parse_scenario_spec("north=R1, R2,", 0).unwrap();
        assert_eq!(label, "north");
        assert_eq!(routes, vec!["R1".to_string(), "R2".to_string()]);

        let (label, routes) = parse_scenario_spec("R9", 2).unwrap();
        assert_eq!(label, "scenario-3");
        assert_eq!(routes, vec!["R9".to_string()]);

        let (label, routes) = parse_scenario_spec("keep-all=", 0).unwrap();
        assert_eq!(label, "keep-all");
        assert!(routes.is_empty());
    }

    #[test]
    fn test_derive_metric_path() {
        let path = derive_metric_path(Path::new("out/sim.png"), Metric::Cash);
        assert_eq!(path, PathBuf::from("out/sim_cash.png"));
        let svg = derive_metric_path(Path::new("chart.svg"), Metric::Gmv);
        assert_eq!(svg, PathBuf::from("chart_gmv.svg"));
    }

    #[test]
    fn test_result_rows_leave_gaps_empty() {
        let output = sample_output(&["B"]);
        let mut writer = csv::Writer::from_writer(Vec::new());
        write_result_rows(&output, &mut writer).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("date,segment,gmv_daily,gmv_cumulative"));
        let day1: Vec<&str> = lines[1].split(',').collect();
        assert_eq!(day1[1], "settled");
        assert_eq!(day1[5], "");
        let day3: Vec<&str> = lines[3].split(',').collect();
        assert_eq!(day3[1], "forecast");
        assert_eq!(day3[5], "400.00");
        assert_eq!(day3[6], "-200.00");
    }

    #[test]
    fn test_duplicate_cancellation_sets_are_reported() {
        let mut log = ScenarioLog::new();
        log.record(&sample_output(&["A"]));
        log.record(&sample_output(&[]));
        log.record(&sample_output(&["A"]));
        log.record(&sample_output(&[]));
        assert_eq!(duplicate_scenarios(&log), vec![(2, 0), (3, 1)]);
    }

    #[test]
    fn test_segment_splits_at_start_of_today() {
        let mut trips = Vec::new();
        for d in 2..=4 {
            trips.push(TripRecord::new(
                NaiveDate::from_ymd_opt(2024, 3, d).unwrap(),
                "A",
                MetricPair::new(100.0, 10.0),
                MetricPair::zero(),
            ));
        }
        let checkpoints = Checkpoints::new(ts(3, 15), ts(4, 15), ts(5, 15)).unwrap();
        let scenario = Scenario::new("keep", Vec::<String>::new(), ts(1, 0));
        let output = simulate(&trips, &checkpoints, MetricPair::zero(), &scenario);
        let mut writer = csv::Writer::from_writer(Vec::new());
        write_result_rows(&output, &mut writer).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let segments: Vec<&str> = text
            .lines()
            .skip(1)
            .map(|line| line.split(',').nth(1).unwrap())
            .collect();
        assert_eq!(segments, vec!["settled", "forecast", "forecast"]);
        let day3: Vec<&str> = text.lines().nth(2).unwrap().split(',').collect();
        assert_eq!(day3[2], "100.00");
    }

    #[test]
    fn test_comparison_rows_follow_log_order() {
        let mut log = ScenarioLog::new();
        log.record(&sample_output(&[]));
        log.record(&sample_output(&["A"]));
        let mut writer = csv::Writer::from_writer(Vec::new());
        write_comparison_rows(&log, &mut writer).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1 + 2 + 2);
        assert!(lines[1].starts_with("0,test,"));
        assert!(lines[3].starts_with("1,test,"));
        assert!(lines[4].ends_with(",50.00,-30.00"));
    }
}
