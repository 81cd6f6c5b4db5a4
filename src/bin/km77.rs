use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;

use km77::filter::TrimQuery;
use km77::parser;
use km77::pipeline::Crawler;
use km77::scraper::WebScraper;
use km77::store::Store;
use km77::types::{Record, Value};

#[derive(Parser)]
#[command(name = "km77")]
#[command(about = "A km77.com car catalogue scraper and parser", long_about = None)]
struct Cli {
    #[arg(
        short = 'l',
        long = "log-level",
        value_enum,
        default_value = "info",
        global = true,
        help = "Set the logging level"
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the make/model/trim hierarchy and extract specs and options
    Crawl {
        #[arg(
            long,
            value_name = "PATH",
            default_value = "km77.db",
            help = "SQLite database file"
        )]
        db: PathBuf,

        #[arg(
            long,
            help = "Also flatten record fields into one column per field name"
        )]
        flatten: bool,
    },
    /// Fetch a single trim page and print its parsed specs and options
    Specops {
        #[arg(help = "URL of the trim page to fetch")]
        url: String,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
    /// Query the trims of an already-crawled database
    Filter {
        #[arg(
            long,
            value_name = "PATH",
            default_value = "km77.db",
            help = "SQLite database file"
        )]
        db: PathBuf,

        #[arg(
            long,
            value_name = "KEY=VALUE",
            help = "Keep trims whose field equals the given value"
        )]
        field: Vec<String>,

        #[arg(long, value_name = "CV", help = "Minimum engine power")]
        min_power: Option<f64>,

        #[arg(long, value_name = "SECONDS", help = "Maximum 0-100 km/h time")]
        max_accel: Option<f64>,

        #[arg(long, help = "Require disc brakes on both axles")]
        disc_brakes: bool,

        #[arg(long, value_name = "L/100KM", help = "Maximum combined consumption")]
        max_consumption: Option<f64>,

        #[arg(long, value_name = "MM", help = "Minimum body height")]
        min_height: Option<f64>,

        #[arg(
            long,
            value_name = "TEXT",
            help = "Keep trims with any field name containing the text"
        )]
        key_contains: Vec<String>,

        #[arg(long, value_name = "YEAR", help = "Minimum production start year")]
        produced_since: Option<i32>,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
}

fn serialize_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            log::error!("Error serializing to JSON: {}", e);
            process::exit(1);
        }
    }
}

fn print_records(title: &str, records: &[Record]) {
    println!("\n=== {} ({}) ===", title, records.len());
    for record in records {
        println!("\n[{}]", record.caption);
        for (key, value) in &record.data {
            match value {
                Value::Text(text) => println!("  {}: {}", key, text),
                Value::Section(entries) => {
                    println!("  {}:", key);
                    for (sub_key, sub_value) in entries {
                        println!("    {}: {}", sub_key, sub_value);
                    }
                }
                Value::Package { price, addons } => {
                    println!("  {}: {}", key, price);
                    for addon in addons {
                        println!("    + {}", addon);
                    }
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level.clone().into())
        .init();

    match cli.command {
        Commands::Crawl { db, flatten } => {
            let store = Store::open(&db).unwrap_or_else(|e| {
                log::error!("Error opening the database: {}", e);
                process::exit(1);
            });
            let scraper = WebScraper::new().unwrap_or_else(|e| {
                log::error!("Error creating scraper: {}", e);
                process::exit(1);
            });
            let crawler = Crawler::new(scraper, store, flatten);

            log::info!("Scraping the km77 website...");
            tokio::select! {
                result = crawler.run() => {
                    if let Err(e) = result {
                        log::error!("Crawl failed: {}", e);
                        process::exit(1);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    // Committed entities are already durable; only the
                    // in-flight entity is abandoned.
                    log::info!("User interrupted the program.");
                }
            }
        }

        Commands::Specops { url, format } => {
            let scraper = WebScraper::new().unwrap_or_else(|e| {
                log::error!("Error creating scraper: {}", e);
                process::exit(1);
            });

            log::info!("Fetching trim page {}...", url);
            let html = scraper.fetch_trim_source(&url).await.unwrap_or_else(|e| {
                log::error!("Error fetching {}: {}", url, e);
                process::exit(1);
            });

            let specops = parser::parse_specops(&html);
            match format {
                OutputFormat::Json => serialize_json(&specops),
                OutputFormat::Text => {
                    print_records("SPECS", &specops.specs);
                    print_records("OPTIONS", &specops.options);
                }
            }
        }

        Commands::Filter {
            db,
            field,
            min_power,
            max_accel,
            disc_brakes,
            max_consumption,
            min_height,
            key_contains,
            produced_since,
            format,
        } => {
            let store = Store::open(&db).unwrap_or_else(|e| {
                log::error!("Error opening the database: {}", e);
                process::exit(1);
            });
            let makes = store.load_makes().unwrap_or_else(|e| {
                log::error!("Error loading the database: {}", e);
                process::exit(1);
            });

            let mut query = TrimQuery::new(&makes);
            println!("Trims: {}", query.len());

            for spec in &field {
                let Some((key, value)) = spec.split_once('=') else {
                    log::error!("Invalid --field '{}', expected KEY=VALUE", spec);
                    process::exit(1);
                };
                query = query.with_field(key, value);
                println!("{}: {}", key, query.len());
            }
            if let Some(cv) = min_power {
                query = query.min_power_cv(cv);
                println!("Power: {}", query.len());
            }
            if let Some(seconds) = max_accel {
                query = query.max_accel_s(seconds);
                println!("Acceleration: {}", query.len());
            }
            if disc_brakes {
                query = query.disc_brakes();
                println!("Brakes: {}", query.len());
            }
            if let Some(litres) = max_consumption {
                query = query.max_consumption_l(litres);
                println!("Fuel consumption: {}", query.len());
            }
            if let Some(mm) = min_height {
                query = query.min_height_mm(mm);
                println!("Height: {}", query.len());
            }
            for needle in &key_contains {
                query = query.key_contains(needle);
                println!("{}: {}", needle, query.len());
            }
            if let Some(year) = produced_since {
                query = query.produced_since(year);
                println!("Production: {}", query.len());
            }

            let results = query.results();
            match format {
                OutputFormat::Json => serialize_json(&results),
                OutputFormat::Text => {
                    println!("\nResults:");
                    for trim in results {
                        println!(
                            "{}\n\t{}\n\t{}\n",
                            trim.name, trim.production, trim.children_url
                        );
                    }
                }
            }
        }
    }
}
