extern crate clap;

use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colored::Colorize;
use log::{debug, info, warn};
use proxy_speed::errors::{exit_codes, format_error_for_display, SpeedTestError};
use proxy_speed::proxy::config::{collect_sources, ConfigDocument, ProxyFilter};
use proxy_speed::proxy::ProxyDirectory;
use proxy_speed::report::{render_table, summary};
use proxy_speed::results::{ProxyResult, RunReport};
use proxy_speed::scoring::{
    mb_per_second, rank, rank_by_latency, reachable, Thresholds,
};
use proxy_speed::speedtest::{
    SpeedTester, TestConfig, DEFAULT_CONCURRENCY, DEFAULT_DOWNLOAD_SIZE,
    DEFAULT_LATENCY_SAMPLES, DEFAULT_PROBE_INTERVAL, DEFAULT_SERVER_URL,
    DEFAULT_UPLOAD_SIZE,
};
use std::path::Path;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config documents: comma-separated files, directories or http(s) URLs
    #[arg(short, long)]
    config: String,

    /// Only test proxies whose name matches this regex
    #[arg(short, long, default_value = ".+")]
    filter: String,

    /// Skip proxies whose name contains one of these `|`-separated keywords
    #[arg(short, long, default_value = "")]
    block: String,

    /// Comma-separated path prefixes to leave out when walking directories
    #[arg(long, default_value = "")]
    skip_paths: String,

    /// Speed-test server answering /__down and /__up
    #[arg(long, default_value = DEFAULT_SERVER_URL)]
    server_url: String,

    /// Bytes downloaded per proxy, split over the concurrent transfers
    #[arg(long, default_value_t = DEFAULT_DOWNLOAD_SIZE)]
    download_size: u64,

    /// Bytes uploaded per proxy, split over the concurrent transfers
    #[arg(long, default_value_t = DEFAULT_UPLOAD_SIZE)]
    upload_size: u64,

    /// Deadline of every single probe, in seconds
    #[arg(long, default_value_t = 5.0)]
    timeout: f64,

    /// Parallel transfers per throughput phase
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrent: usize,

    /// Where to save usable proxies that are not good
    #[arg(long, default_value = "./usable.yaml")]
    output: String,

    /// Where to save good proxies; when empty they go to --output too
    #[arg(long, default_value = "./good.yaml")]
    good_output: String,

    /// Drop proxies slower than this, in milliseconds (0 disables)
    #[arg(long, default_value_t = 800)]
    max_latency: u64,

    /// Minimum download speed of a usable proxy, in MB/s
    #[arg(long, default_value_t = 0.1)]
    min_speed: f64,

    /// Minimum open speed of the must-reach URLs, in MB/s
    #[arg(long, default_value_t = 0.01)]
    open_speed_threshold: f64,

    /// Download speed of a good proxy, in MB/s
    #[arg(long, default_value_t = 1.0)]
    good_download_speed_threshold: f64,

    /// Open speed of the must-reach URLs for a good proxy, in MB/s
    #[arg(long, default_value_t = 0.03)]
    good_open_speed_threshold: f64,

    /// URLs every proxy must reach, comma separated
    #[arg(long, default_value = "")]
    extra_connect_url: String,

    /// File downloaded once through every proxy
    #[arg(long)]
    extra_download_url: Option<String>,

    /// Only measure latency
    #[arg(long)]
    fast: bool,

    /// Print a JSON report instead of the table
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    verbose: Verbosity<WarnLevel>,
}

impl Cli {
    fn test_config(&self) -> Result<TestConfig, SpeedTestError> {
        let timeout = Duration::try_from_secs_f64(self.timeout).map_err(|e| {
            SpeedTestError::config(format!("invalid timeout {}", self.timeout))
                .with_source(e)
        })?;

        Ok(TestConfig {
            server_url: self.server_url.clone(),
            download_size: self.download_size,
            upload_size: self.upload_size,
            timeout,
            concurrent: self.concurrent,
            latency_samples: DEFAULT_LATENCY_SAMPLES,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            extra_connect_urls: split_list(&self.extra_connect_url),
            extra_download_url: self
                .extra_download_url
                .clone()
                .filter(|url| !url.trim().is_empty()),
            fast_mode: self.fast,
        })
    }

    fn thresholds(&self, config: &TestConfig) -> Thresholds {
        Thresholds {
            max_latency: Duration::from_millis(self.max_latency),
            min_download_speed: mb_per_second(self.min_speed),
            open_speed: mb_per_second(self.open_speed_threshold),
            good_download_speed: mb_per_second(
                self.good_download_speed_threshold,
            ),
            good_open_speed: mb_per_second(self.good_open_speed_threshold),
            extra_connect_configured: !config.extra_connect_urls.is_empty(),
            extra_download_configured: config.extra_download_url.is_some(),
        }
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[tokio::main]
async fn main() {
    let cli: Cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .parse_default_env()
        .init();
    debug!(
        "{} {} ({})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        option_env!("PROXYSPEED_BUILD_GIT_HASH").unwrap_or("unknown revision")
    );

    let code = match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", format_error_for_display(&e));
            e.exit_code()
        }
    };

    std::process::exit(code);
}

async fn run(cli: &Cli) -> Result<i32, SpeedTestError> {
    let config = cli.test_config()?;
    let thresholds = cli.thresholds(&config);
    let filter = ProxyFilter::new(&cli.filter, &cli.block)?;
    let tester = SpeedTester::new(config)?;

    let sources = collect_sources(&cli.config, &cli.skip_paths)?;
    if sources.is_empty() {
        return Err(SpeedTestError::config(format!(
            "no config documents found in {}",
            cli.config
        ))
        .with_suggestion("Pass .yaml, .yml or .json files, directories or URLs with -c."));
    }

    let mut documents = Vec::with_capacity(sources.len());
    for source in &sources {
        match ConfigDocument::load(source).await {
            Ok(document) => documents.push(document),
            Err(e) => warn!("Skipping {}: {}", source, e),
        }
    }

    let directory = ProxyDirectory::new();
    let proxies = directory.resolve_documents(&documents, &filter);
    if proxies.is_empty() {
        warn!("No testable proxies in {} documents", documents.len());
        return Ok(exit_codes::PARTIAL_FAILURE);
    }
    info!("Testing {} proxies", proxies.len());

    let total = proxies.len();
    let mut results: Vec<ProxyResult> = Vec::with_capacity(total);
    let progress = tester.test_proxies(&proxies, |result| {
        if !cli.json {
            eprintln!(
                "{} {} {}",
                format!("[{}/{}]", results.len() + 1, total)
                    .as_str()
                    .bright_blue(),
                result.proxy_name.as_str().bold(),
                result.format_latency()
            );
        }
        results.push(result);
    });

    tokio::select! {
        _ = progress => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, reporting the proxies tested so far");
        }
    }

    let fast_mode = tester.config().fast_mode;
    let (mut kept, dropped): (Vec<ProxyResult>, Vec<ProxyResult>) =
        results.into_iter().partition(|result| {
            if fast_mode {
                reachable(result, &thresholds)
            } else {
                thresholds.usable(result)
            }
        });

    if fast_mode {
        rank_by_latency(&mut kept);
    } else {
        rank(&mut kept, &thresholds);
    }
    let good = if fast_mode {
        0
    } else {
        kept.iter().filter(|result| thresholds.good(result)).count()
    };
    let usable = kept.len();

    for result in &dropped {
        info!("{} is not usable ({:?})", result.proxy_name, result.status);
    }

    if cli.json {
        let mut all = kept.clone();
        all.extend(dropped);
        let report = RunReport::new(
            tester.config().server_url.clone(),
            fast_mode,
            all,
            usable,
            good,
        );
        let text = serde_json::to_string_pretty(&report).map_err(|e| {
            SpeedTestError::config(format!("cannot encode report: {}", e))
                .with_source(e)
        })?;
        println!("{}", text);
    } else {
        println!();
        println!("{}", render_table(&kept, &thresholds, fast_mode));
        println!();
        println!("{}", summary(usable + dropped.len(), usable, good));
    }

    if kept.is_empty() {
        warn!("No usable proxy found");
        return Ok(exit_codes::PARTIAL_FAILURE);
    }

    save(cli, &kept[..good], &kept[good..]).await?;

    Ok(exit_codes::SUCCESS)
}

/// Good results go to `--good-output`, the rest to `--output`. Without a
/// good output everything lands in `--output`.
async fn save(
    cli: &Cli,
    good: &[ProxyResult],
    rest: &[ProxyResult],
) -> Result<(), SpeedTestError> {
    let mut remaining = rest.to_vec();

    if cli.good_output.is_empty() {
        remaining.splice(0..0, good.iter().cloned());
    } else {
        write_document(&cli.good_output, good).await?;
    }

    if !cli.output.is_empty() {
        write_document(&cli.output, &remaining).await?;
    }

    Ok(())
}

async fn write_document(
    path: &str,
    results: &[ProxyResult],
) -> Result<(), SpeedTestError> {
    if results.is_empty() {
        warn!("Nothing to save to {}", path);
        return Ok(());
    }

    ConfigDocument::from_results(results).save(Path::new(path)).await
}
