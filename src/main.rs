use clap::Parser;
use lib::{
    DisasterThresholds, Feature, Granularity, Imputation, ModelStatus, PipelineConfig,
    PipelineError, Session, SimpleLogger, Thresholds, YearlyTrend, build_report, write_csv,
    write_dataset_csv, write_json, write_parquet, write_summary,
};
use log::{debug, warn};
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

static LOGGER: SimpleLogger = SimpleLogger;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// input CSV file with Year, Month, Temperature, Rainfall, CO2 columns
    #[arg(short, long)]
    input_file: PathBuf,

    /// Output base name (will create dir containing .csv, .json, .parquet and .txt files)
    #[arg(short, long, default_value = "output")]
    output: String,

    /// User id recorded in performance logs
    #[arg(long, default_value_t = 1)]
    user_id: i64,

    /// Start year (inclusive) for filtering (optional)
    #[arg(long)]
    start_year: Option<i32>,

    /// End year (inclusive) for filtering (optional)
    #[arg(long)]
    end_year: Option<i32>,

    /// Time bucket for the aggregate report
    #[arg(long, default_value = "year-month")]
    granularity: Granularity,

    /// Fill policy for missing metric values
    #[arg(long, default_value = "mean")]
    imputation: Imputation,

    /// Temperature anomaly threshold (z-score)
    #[arg(long, default_value_t = 2.0)]
    temp_threshold: f64,

    /// Rainfall anomaly threshold (z-score)
    #[arg(long, default_value_t = 2.0)]
    rain_threshold: f64,

    /// CO2 anomaly threshold (z-score)
    #[arg(long, default_value_t = 2.0)]
    co2_threshold: f64,

    /// Heatwave temperature threshold
    #[arg(long, default_value_t = 36.0)]
    heatwave: f64,

    /// Flood rainfall threshold
    #[arg(long, default_value_t = 30.0)]
    flood: f64,

    /// Seed for the train/test split
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Feature overrides for the prediction, e.g. year=2030,month=7
    #[arg(long, value_delimiter = ',')]
    predict: Vec<String>,

    /// Log level for output
    #[arg(long, default_value = "false")]
    debug: bool,
}

fn parse_override(raw: &str) -> Result<(Feature, f64), PipelineError> {
    let (name, value) = raw.split_once('=').ok_or_else(|| {
        PipelineError::InvalidFeatureVector(format!("expected feature=value, got '{}'", raw))
    })?;
    let feature: Feature = name.parse()?;
    let value: f64 = value.trim().parse().map_err(|_| {
        PipelineError::InvalidFeatureVector(format!("'{}' is not a number for {}", value, feature))
    })?;
    Ok((feature, value))
}

/// Year requested through `--predict year=...`, if any. Only whole years
/// within `i32` are accepted.
fn year_override(overrides: &[(Feature, f64)]) -> Result<Option<i32>, PipelineError> {
    let Some(&(_, value)) = overrides.iter().find(|(f, _)| *f == Feature::Year) else {
        return Ok(None);
    };
    if !value.is_finite()
        || value.fract() != 0.0
        || value < i32::MIN as f64
        || value > i32::MAX as f64
    {
        return Err(PipelineError::InvalidFeatureVector(format!(
            "Year must be a whole number, got {}",
            value
        )));
    }
    Ok(Some(value as i32))
}

fn main() -> Result<(), PipelineError> {
    // Initialize timer and logger
    let total_start = Instant::now();
    log::set_logger(&LOGGER).map_err(|e| PipelineError::Data(e.to_string()))?;

    // Acquire CLI args
    let args = Args::parse();
    if args.debug {
        log::set_max_level(log::LevelFilter::Debug);
    } else {
        log::set_max_level(log::LevelFilter::Info);
    }
    let overrides = args
        .predict
        .iter()
        .map(|raw| parse_override(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let requested_year = year_override(&overrides)?;

    println!("EarthScape climate pipeline");
    debug!(
        "Input file: {} | Granularity: {:?} | Imputation: {:?}",
        args.input_file.display(),
        args.granularity,
        args.imputation
    );

    let config = PipelineConfig {
        thresholds: Thresholds {
            temperature: args.temp_threshold,
            rainfall: args.rain_threshold,
            co2: args.co2_threshold,
        },
        disaster: DisasterThresholds {
            heatwave: args.heatwave,
            flood: args.flood,
        },
        granularity: args.granularity,
        imputation: args.imputation,
        seed: args.seed,
        ..PipelineConfig::default()
    };
    debug!("Pipeline configuration: {:?}", config);
    let mut session = Session::new(args.user_id, config);

    // Clean
    println!("Cleaning {}...", args.input_file.display());
    let dataset_name = args
        .input_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.output.clone());
    let csv_text = fs::read_to_string(&args.input_file)?;
    let processing_start = Instant::now();
    let cleaned = session.upload(&dataset_name, &csv_text)?;
    let fingerprint = cleaned.fingerprint();
    println!(
        "Cleaned {} records ({}-{}) in {:.2?}",
        cleaned.len(),
        fingerprint.min_year,
        fingerprint.max_year,
        processing_start.elapsed()
    );

    // Dashboard over the requested year range
    let start_year = args.start_year.unwrap_or(fingerprint.min_year);
    let end_year = args.end_year.unwrap_or(fingerprint.max_year);
    let dashboard = session.dashboard(Some((start_year, end_year)))?;
    println!(
        "Years {}-{}: {} rows, {} anomalies (Temperature={}, Rainfall={}, CO2={})",
        dashboard.start_year,
        dashboard.end_year,
        dashboard.summary.rows,
        dashboard.anomalies.anomalies.len(),
        dashboard.anomalies.temperature_alerts,
        dashboard.anomalies.rainfall_alerts,
        dashboard.anomalies.co2_alerts
    );
    if dashboard.disasters.is_clear() {
        println!("No disaster risk alerts at the current thresholds.");
    } else {
        println!(
            "Disaster risk: {} heatwave record(s) with Temperature > {:.1}, {} flood record(s) with Rainfall > {:.1}",
            dashboard.disasters.heatwave_count(),
            args.heatwave,
            dashboard.disasters.flood_count(),
            args.flood
        );
    }

    // Model
    let training_start = Instant::now();
    match session.train(false)? {
        ModelStatus::Trained(model) => {
            let metrics = model.metrics();
            println!(
                "Model trained in {:.2?} | MAE={:.3} RMSE={:.3} R2={}",
                training_start.elapsed(),
                metrics.mae,
                metrics.rmse,
                metrics
                    .r2
                    .map(|r2| format!("{:.3}", r2))
                    .unwrap_or_else(|| "n/a".to_string())
            );
            let mut features = *model.feature_defaults();
            for (feature, value) in &overrides {
                features.set(*feature, *value);
            }
            let prediction = session.predict(&features)?;
            println!("Predicted temperature for {:?}: {:.2}", features, prediction);
        }
        ModelStatus::Unavailable { valid_rows } => {
            warn!(
                "Multivariate model unavailable ({} valid rows), falling back to yearly trend",
                valid_rows
            );
            let active = session.active().ok_or(PipelineError::NoActiveDataset)?;
            match YearlyTrend::fit(&active.data) {
                Some(trend) => {
                    let year = requested_year.unwrap_or_else(|| trend.next_year());
                    println!(
                        "Yearly trend: {:+.4}/year (R2={:.3}); predicted average temperature for {}: {:.2}",
                        trend.slope(),
                        trend.r_squared(),
                        year,
                        trend.predict_year(year)?
                    );
                }
                None => warn!("Not enough yearly data to train model. Need at least 2 years."),
            }
        }
    }

    // Report for the same year range as the dashboard
    let active = session.active().ok_or(PipelineError::NoActiveDataset)?;
    let filtered = active
        .data
        .filter_years(start_year, end_year)
        .ok_or(PipelineError::EmptyYearRange(start_year, end_year))?;
    let report = build_report(&active.name, &filtered, args.granularity);

    // Create output directory
    let output_dir = PathBuf::from(format!("./output/{}", args.output));
    fs::create_dir_all(&output_dir)?;
    println!(
        "Created output directory: {} | Writing output files...",
        output_dir.display()
    );
    let io_start = Instant::now();

    // Extract just the directory name for the file names (remove path separators)
    let output_name = args
        .output
        .split(['/', '\\'])
        .next_back()
        .unwrap_or(&args.output);
    let csv_path = output_dir.join(format!("{}.csv", output_name));
    let json_path = output_dir.join(format!("{}.json", output_name));
    let parquet_path = output_dir.join(format!("{}.parquet", output_name));
    let summary_path = output_dir.join(format!("{}_summary.txt", output_name));
    let cleaned_path = output_dir.join(format!("{}_cleaned.csv", output_name));

    let csv_start = Instant::now();
    write_csv(&report.rows, &csv_path)?;
    println!("CSV write took {:.2?}", csv_start.elapsed());

    let json_start = Instant::now();
    write_json(&report, &json_path)?;
    println!("JSON write took {:.2?}", json_start.elapsed());

    let parquet_start = Instant::now();
    write_parquet(&report.rows, &parquet_path)?;
    println!("Parquet write took {:.2?}", parquet_start.elapsed());

    write_summary(&report, &summary_path)?;
    write_dataset_csv(&filtered, &cleaned_path)?;

    let io_time = io_start.elapsed();
    println!("All files took {:.2?}", io_time);
    println!("\nWrote files to directory: {}", output_dir.display());
    debug!("  - {}", csv_path.display());
    debug!("  - {}", json_path.display());
    debug!("  - {}", parquet_path.display());
    debug!("  - {}", summary_path.display());
    debug!("  - {}", cleaned_path.display());

    println!("\n{}", report.summary_text());
    for action in session.log().summary() {
        debug!(
            "{}: {} call(s), avg {:.3} ms",
            action.action_name, action.count, action.avg_execution_time_ms
        );
    }

    println!("\nTotal runtime: {:.2?}", total_start.elapsed());
    Ok(())
}
