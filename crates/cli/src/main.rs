mod echo;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, bail};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use owo_colors::OwoColorize;
use scrapbook_core::siteconfig;
use scrapbook_core::{
    Bookmark, Extractor, HttpClient, JsonFileStore, Settings, State, fetch_file, fetch_stdin, parse_search, run_job,
    standard_processors,
};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Output format for extracted content
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Html,
    Text,
    Json,
}

/// Extract, archive and search saved web pages
#[derive(Parser, Debug)]
#[command(name = "scrapbook")]
#[command(version, about = "Extract and archive web pages", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract the content of a page
    Fetch(FetchArgs),
    /// Show the merged site rules for a host
    Resolve(ResolveArgs),
    /// Parse a search query and print its terms as JSON
    Search {
        /// Search query, e.g. `title:"long read" cats`
        query: String,
    },
    /// Generate a shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(clap::Args, Debug)]
struct SettingsArgs {
    /// Settings file (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Site rules folder, searched before the configured ones
    #[arg(long = "site-config", value_name = "DIR")]
    site_config: Vec<PathBuf>,

    /// Do not search the default site rules folders
    #[arg(long)]
    no_default_sites: bool,
}

impl SettingsArgs {
    fn load(&self) -> anyhow::Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load(path).context("Failed to load settings")?,
            None => Settings::default(),
        };
        let configured = std::mem::take(&mut settings.site_config.folders);
        settings.site_config.folders = self.site_config.iter().cloned().chain(configured).collect();
        if self.no_default_sites {
            settings.site_config.defaults = Some(false);
        }
        tracing::debug!(config = ?self.config, folders = ?settings.site_config.folders, "settings loaded");
        Ok(settings)
    }
}

#[derive(clap::Args, Debug)]
struct FetchArgs {
    /// URL of the page
    #[arg(value_name = "URL")]
    url: String,

    /// Use this HTML file for the first page instead of fetching it ("-" for stdin)
    #[arg(long, value_name = "FILE")]
    html: Option<String>,

    /// Save the bookmark and its archive in this directory
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Refuse destinations in this network (CIDR), may be repeated
    #[arg(long = "denied-ip", value_name = "CIDR")]
    denied_ips: Vec<String>,

    #[command(flatten)]
    settings: SettingsArgs,
}

#[derive(clap::Args, Debug)]
struct ResolveArgs {
    /// Host name, e.g. `www.example.net`
    #[arg(value_name = "HOST")]
    host: String,

    #[command(flatten)]
    settings: SettingsArgs,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).with_target(false).init();
}

fn read_html(source: &str) -> anyhow::Result<String> {
    if source == "-" {
        fetch_stdin().context("Failed to read from stdin")
    } else {
        fetch_file(source).with_context(|| format!("Failed to read file: {source}"))
    }
}

async fn fetch(args: FetchArgs, verbose: bool) -> anyhow::Result<()> {
    if verbose {
        echo::print_step(1, 3, "Loading settings");
    }
    let mut settings = args.settings.load()?;
    settings.fetch.denied_ips.extend(args.denied_ips);
    let mut config = settings.job_config()?;

    let html = args.html.as_deref().map(read_html).transpose()?;
    if verbose && let Some(html) = &html {
        eprintln!("  {} {}", "Supplied HTML:".dimmed(), echo::format_size(html.len()).bright_white());
    }

    if verbose {
        echo::print_step(2, 3, &format!("Extracting {}", args.url.bright_white().underline()));
    }
    let started = Instant::now();

    if let Some(dir) = args.output {
        config.storage_dir = dir.clone();
        let store = JsonFileStore::new(&dir);
        let b = run_job(Bookmark::new(&args.url), html, &config, &store).await;
        if verbose {
            echo::print_timing("Extraction", started.elapsed());
            echo::print_step(3, 3, "Writing output");
        }
        return print_bookmark(&b, &config.container_path(&b), args.format);
    }

    let client = HttpClient::new(config.fetch.clone())?;
    let mut ex = Extractor::with_client(&args.url, client)?;
    let has_html = html.as_deref().is_some_and(|h| !h.is_empty());
    if let Some(html) = html.filter(|h| !h.is_empty()) {
        ex = ex.with_html(html);
    }
    ex.add_processors(standard_processors(Arc::clone(&config.site_config), has_html));
    ex.run().await;

    if verbose {
        echo::print_timing("Extraction", started.elapsed());
        echo::print_step(3, 3, "Writing output");
    }
    if let Some(reason) = ex.aborted() {
        bail!("Extraction failed: {reason}");
    }
    for err in ex.errors() {
        echo::print_warning(err);
    }

    match args.format {
        OutputFormat::Html => print!("{}", ex.html()),
        OutputFormat::Text => println!("{}", ex.text()),
        OutputFormat::Json => {
            let value = serde_json::json!({
                "url": ex.url().as_str(),
                "drops": ex.drops(),
                "html": ex.html(),
                "text": ex.text(),
                "errors": ex.errors(),
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }
    Ok(())
}

fn print_bookmark(b: &Bookmark, container: &std::path::Path, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(b)?),
        OutputFormat::Text => println!("{}", b.text),
        OutputFormat::Html => {
            eprintln!("{}", "HTML output is only available without --output, printing a summary".dimmed());
            println!("{} {}", b.uid, b.title);
        }
    }

    if b.state == State::Error {
        bail!("Extraction failed: {}", b.errors.join("; "));
    }
    for err in &b.errors {
        echo::print_warning(err);
    }
    echo::print_success(&format!("Saved {} to {}", b.uid.bright_white(), container.display().bright_white()));
    Ok(())
}

fn resolve(args: ResolveArgs) -> anyhow::Result<()> {
    let settings = args.settings.load()?;
    let config = siteconfig::resolve(&args.host, &settings.site_config_folders())
        .with_context(|| format!("Failed to resolve site rules for {}", args.host))?;
    if config.files.is_empty() {
        echo::print_warning(&format!("No site rules found for {}", args.host));
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Fetch(args) => fetch(args, cli.verbose).await,
        Command::Resolve(args) => resolve(args),
        Command::Search { query } => {
            let terms = parse_search(&query)?;
            println!("{}", serde_json::to_string_pretty(&terms)?);
            Ok(())
        }
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "scrapbook", &mut io::stdout());
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if cli.verbose {
        echo::print_banner();
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            echo::print_error(&format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}
