//! afolu CLI - carbon potential analysis of a drawn area

use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use afolu::analysis::indices::{EVI, LAI, NDVI};
use afolu::collect::anthropic::AnthropicClient;
use afolu::collect::earth_engine::EarthEngineCollect;
use afolu::collect::global_variables::DEFAULT_ANALYSIS_DAYS;
use afolu::commons::basic_functions::{fmt_opt, fmt_opt_unit};
use afolu::pipeline::{AnalysisParams, RunOptions, Session};
use afolu::report::assembler::{ReportAssembler, ReportInput};
use afolu::report::export::{write_report, write_results, SavedResults};
use afolu::report::narrative::{NarrativeService, NarrativeText};
use afolu::{AnalysisConfig, AreaOfInterest};

#[derive(Parser)]
#[command(name = "afolu")]
#[command(author, version, about = "AFOLU carbon potential analysis from satellite imagery", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch imagery, estimate carbon and write the report
    Analyze(AnalyzeArgs),
    /// Render a report offline from saved results
    Report {
        /// Results JSON written by `analyze`
        #[arg(long)]
        stats: PathBuf,
        /// Narrative text to embed
        #[arg(long)]
        narrative: Option<PathBuf>,
        /// Config file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Reference price in USD/tCO2
        #[arg(long)]
        price: Option<f64>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config {
        /// Config file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Area of interest (GeoJSON); defaults to a 10 km buffer in the Peruvian Amazon
    #[arg(long)]
    aoi: Option<PathBuf>,
    /// First day of imagery (YYYY-MM-DD); defaults to one year before --end
    #[arg(long)]
    start: Option<NaiveDate>,
    /// Day after the last day of imagery (YYYY-MM-DD); defaults to today
    #[arg(long)]
    end: Option<NaiveDate>,
    /// Maximum scene cloud cover in percent
    #[arg(long)]
    cloud: Option<u8>,
    /// Reduction resolution in metres
    #[arg(long)]
    scale: Option<f64>,
    /// Pixel ceiling for reductions
    #[arg(long)]
    max_pixels: Option<u64>,
    /// Reference price in USD/tCO2
    #[arg(long)]
    price: Option<f64>,
    /// Config file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Land-cover years to compare, e.g. 2020,2021
    #[arg(long, value_delimiter = ',', num_args = 2)]
    change_years: Option<Vec<i32>>,
    /// Skip the land-cover change branch
    #[arg(long)]
    no_land_cover: bool,
    /// Skip the AI narrative
    #[arg(long)]
    no_narrative: bool,
}

fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    pb
}

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    AnalysisConfig::load(path)
}

fn analyze(args: AnalyzeArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(cloud) = args.cloud {
        config.cloud_cover_ceiling = cloud;
    }
    if let Some(scale) = args.scale {
        config.scale = scale;
    }
    if let Some(max_pixels) = args.max_pixels {
        config.max_pixels = max_pixels;
    }
    if let Some(price) = args.price {
        config.report.reference_price = price;
    }
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if args.no_narrative {
        config.narrative.enabled = false;
    }
    if let Some(years) = args.change_years.as_deref() {
        if let [before, after] = years {
            config.imagery.change_years = (*before, *after);
        }
    }
    config.validate()?;

    let aoi = match &args.aoi {
        Some(path) => AreaOfInterest::from_geojson_file(path)?,
        None => {
            warn!("No area of interest given, using the default 10 km buffer around (-75.5, -8.5)");
            AreaOfInterest::default_fallback()?
        }
    };
    info!("Area of interest: {:.2} ha", aoi.area_hectares());

    let end = args.end.unwrap_or_else(|| Local::now().date_naive());
    let start = args.start.unwrap_or(end - Duration::days(DEFAULT_ANALYSIS_DAYS));
    let params = AnalysisParams::new(aoi, start, end, config.cloud_cover_ceiling);

    let catalog = Arc::new(EarthEngineCollect::from_env(&config.imagery, config.retry)?);
    let narrator: Option<Arc<dyn NarrativeService>> = if config.narrative.enabled {
        Some(Arc::new(AnthropicClient::from_env(config.narrative.api_url.clone(), config.retry)?))
    } else {
        None
    };

    let mut options = RunOptions::new(Local::now());
    if !args.no_land_cover {
        options = options.with_land_cover(config.imagery.change_years);
    }

    let output_dir = config.output_dir.clone();
    let session = Session::new(config, catalog, narrator);
    let pb = spinner("Starting analysis...");
    let result = session.run_observed(params, &options, &|stage| pb.set_message(stage.to_string()));
    pb.finish_and_clear();
    let ctx = result.context("Analysis failed")?;

    let report = ctx.report.as_ref().context("Run finished without a report")?;
    let files = write_report(report, &output_dir)?;

    let results = SavedResults::from_context(&ctx, session.config());
    let stats_path = write_results(&results, &report.generated_at, &output_dir)?;

    println!("NDVI: {}", fmt_opt(results.indices.get(NDVI), 4));
    println!("EVI:  {}", fmt_opt(results.indices.get(EVI), 4));
    println!("LAI:  {}", fmt_opt(results.indices.get(LAI), 2));
    println!("CO2:  {}", fmt_opt_unit(results.carbon.map(|c| c.co2), 2, "tCO2/ha/yr"));
    if let Some(change) = ctx.land_cover.change() {
        println!(
            "Land cover change {}-{}: {} pixel(s)",
            change.year_before, change.year_after, change.changed_pixels
        );
    }
    println!("Report: {}", files.text_path.display());
    println!("Table:  {}", files.table_path.display());
    println!("Stats:  {}", stats_path.display());
    Ok(())
}

fn report(
    stats: &Path,
    narrative: Option<&Path>,
    config: Option<&Path>,
    price: Option<f64>,
    output_dir: Option<PathBuf>,
) -> Result<()> {
    let mut config = load_config(config)?;
    if let Some(price) = price {
        config.report.reference_price = price;
    }
    config.validate()?;

    let results = SavedResults::from_file(stats)?;
    let narrative = match narrative {
        Some(path) => NarrativeText::Generated(
            std::fs::read_to_string(path).context(format!("Failed to read narrative file: {:?}", path))?,
        ),
        None => NarrativeText::Unavailable,
    };

    let assembler = ReportAssembler::new(config.report.clone(), config.imagery.mission.bands.clone());
    let input = ReportInput {
        indices: &results.indices,
        carbon: results.carbon.as_ref(),
        metadata: &results.metadata,
        narrative: &narrative,
        land_cover: results.land_cover.as_ref(),
        area_hectares: results.area_hectares,
    };
    let rendered = assembler.render(&input, Local::now());
    let files = write_report(&rendered, &output_dir.unwrap_or(config.output_dir))?;

    println!("Report: {}", files.text_path.display());
    println!("Table:  {}", files.table_path.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Analyze(args) => analyze(args),
        Commands::Report {
            stats,
            narrative,
            config,
            price,
            output_dir,
        } => report(&stats, narrative.as_deref(), config.as_deref(), price, output_dir),
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            let json = serde_json::to_string_pretty(&config).context("Failed to serialize configuration")?;
            println!("{}", json);
            Ok(())
        }
    }
}
