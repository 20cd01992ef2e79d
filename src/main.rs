use chrono::NaiveDate;
use clap::Parser;
use climatescope::{
    Aggregation, ExtremeSet, PipelineConfig, PipelineError, QueryEngine, QuerySpec,
    SimpleLogger, Summary, load_dataset, metrics, write_csv, write_extremes_csv,
    write_extremes_json, write_json, write_parquet, write_summary,
};
use log::debug;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

static LOGGER: SimpleLogger = SimpleLogger;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input weather observations (.csv or .parquet)
    #[arg(short, long, required_unless_present = "list_metrics")]
    input_file: Option<PathBuf>,

    /// Output base name (will create dir containing .csv, .json, and .parquet files)
    #[arg(short, long, default_value = "output")]
    output: String,

    /// Countries to filter by (e.g., Peru,Chile). If not specified, queries all countries.
    #[arg(short, long, value_delimiter = ',')]
    countries: Vec<String>,

    /// First day (YYYY-MM-DD, inclusive). Defaults to the earliest observation.
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// Last day (YYYY-MM-DD, inclusive). Defaults to the latest observation.
    #[arg(long)]
    end_date: Option<NaiveDate>,

    /// Metric key to query (see --list-metrics)
    #[arg(short, long, default_value = "temperature_celsius")]
    metric: String,

    /// Time aggregation of the result
    #[arg(short, long, default_value = "daily")]
    aggregation: Aggregation,

    /// Percentile at which extreme-event thresholds are placed (clamped to 0-100)
    #[arg(long, default_value_t = PipelineConfig::default().percentile)]
    percentile: f64,

    /// Print the metric registry and exit
    #[arg(long, default_value_t = false)]
    list_metrics: bool,

    /// Log level for output
    #[arg(long, default_value = "false")]
    debug: bool,
}

fn print_metrics() {
    println!("Available metrics:");
    for d in metrics::registry() {
        println!("  {:<22}{}", d.key, d.label);
    }
}

fn main() -> Result<(), PipelineError> {
    let total_start = Instant::now();
    if log::set_logger(&LOGGER).is_err() {
        eprintln!("Logger already installed");
    }

    let args = Args::parse();
    if args.debug {
        log::set_max_level(log::LevelFilter::Debug);
    } else {
        log::set_max_level(log::LevelFilter::Info);
    }
    if args.list_metrics {
        print_metrics();
        return Ok(());
    }

    let Some(input_file) = args.input_file else {
        return Err(PipelineError::DataLoad("No input file given".to_string()));
    };

    println!("ClimateScope! Weather Observation Query Engine");
    let config = PipelineConfig::with_percentile(args.percentile);
    debug!("Input file: {} | {:?}", input_file.display(), config);

    // Load once; everything below borrows the frozen dataset
    let load_start = Instant::now();
    let dataset = load_dataset(&input_file)?;
    let engine = QueryEngine::new(&dataset);
    println!(
        "Loaded {} observations from {} countries in {:.2?}",
        dataset.len(),
        engine.countries().len(),
        load_start.elapsed()
    );

    let Some((first_ts, last_ts)) = engine.time_range() else {
        println!("Dataset is empty after cleaning, nothing to query");
        return Ok(());
    };
    println!("Observations span {} to {}", first_ts, last_ts);

    let extremes = ExtremeSet::detect(&dataset, &config);
    let thresholds = extremes.thresholds();
    println!(
        "Extreme thresholds (p{}): temperature >= {:?} | wind >= {:?} | {} extreme events",
        thresholds.percentile,
        thresholds.temperature_celsius,
        thresholds.wind_kph,
        extremes.len()
    );

    let start = args.start_date.unwrap_or(first_ts.date());
    let end = args.end_date.unwrap_or(last_ts.date());
    let countries_display = if args.countries.is_empty() {
        "ALL".to_string()
    } else {
        args.countries.join(",")
    };
    println!(
        "Querying {} ({}) for {} from {} to {}",
        args.metric, args.aggregation, countries_display, start, end
    );
    let spec = QuerySpec::for_dates(args.countries, start, end, args.metric, args.aggregation);

    let query_start = Instant::now();
    let view = engine.execute(&spec).inspect_err(|e| {
        if !e.is_fatal() {
            print_metrics();
        }
    })?;
    let statistics = engine.statistics(&spec)?;
    let correlation = engine.correlation(&spec)?;
    let query_time = query_start.elapsed();
    println!(
        "Query completed in {:.2?} | {} result rows",
        query_time,
        view.len()
    );
    for s in &statistics {
        debug!(
            "{}: n={} mean={:.2} min={:.2} median={:.2} max={:.2}",
            s.country, s.count, s.mean, s.min, s.median, s.max
        );
    }

    // Create output directory
    let output_dir = PathBuf::from(format!("./output/{}", args.output));
    fs::create_dir_all(&output_dir)?;
    let output_name = args
        .output
        .split(['/', '\\'])
        .next_back()
        .unwrap_or(&args.output);
    let path = |suffix: &str| output_dir.join(format!("{}{}", output_name, suffix));

    let io_start = Instant::now();
    write_csv(&view, &path(".csv"))?;
    write_json(&view, &path(".json"))?;
    write_parquet(&view, &path(".parquet"))?;
    write_extremes_csv(&extremes, &dataset, &path("_extremes.csv"))?;
    write_extremes_json(&extremes, &path("_extremes.json"))?;
    write_summary(
        &Summary {
            rows: dataset.len(),
            countries: engine.countries().len(),
            thresholds,
            extreme_events: extremes.len(),
            extreme_frequency: extremes.frequency_by_country(),
            statistics: &statistics,
            correlation: &correlation,
        },
        &path("_summary.json"),
    )?;
    println!("All files took {:.2?}", io_start.elapsed());
    println!("\nWrote files to directory: {}", output_dir.display());

    println!("\nTotal runtime: {:.2?}", total_start.elapsed());
    Ok(())
}
