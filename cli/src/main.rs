use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use dnarecon_core::{
    classify_file, expand_probes, parse_custom_headers, print_snapshot, run_campaign,
    save_results, validate_url, Analyzer, AttackResult, Behavior, ConfigStore, ExecutionMode,
    LlmAnnotator, ProbeEventSink, ReconConfig, ResponseCache, Scenario, SinkRef, StepOutcome,
    RESULTS_FILE,
};

#[derive(Parser, Debug)]
#[command(
    name = "DNARecon",
    version,
    about = "Behavioural reconnaissance for web applications",
    after_help = "\x1b[1;36mEXAMPLES:\x1b[0m
  Payload campaign:               dnarecon analyze http://target.com/
  Cooperative mode, no cache:     dnarecon analyze http://target.com/ --async --no-cache
  Custom headers:                 dnarecon analyze http://target.com/ -H \"Cookie: sess=abc\"
  List payload URLs only:         dnarecon analyze http://target.com/ --dry-run
  Single request:                 dnarecon probe http://target.com/
  Classify saved results:         dnarecon classify dna_results.json
  LLM annotations:                dnarecon llm-tag dna_results.json
  Scripted scenario:              dnarecon run scenario.yaml"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Configuration file (default ~/.dnarecon/config.json)")]
    pub config: Option<PathBuf>,

    #[arg(short = 'v', long, global = true, default_value_t = false, help = "Debug logging and full response bodies")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the payload catalog against a target and save the results
    Analyze(AnalyzeArgs),
    /// Send a single request and print the response
    Probe(ProbeArgs),
    /// Classify a saved results file
    Classify { file: PathBuf },
    /// Annotate a results file with an LLM
    LlmTag { file: PathBuf },
    /// Execute a YAML scenario
    Run {
        file: PathBuf,
        #[arg(short = 'o', long, default_value = RESULTS_FILE, help = "Results file used by analyze/classify steps")]
        output: PathBuf,
    },
    /// Show or edit the stored configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args, Debug)]
pub struct ModeArgs {
    #[arg(long = "async", conflicts_with = "sync", help = "Cooperative execution (overrides the config)")]
    pub async_mode: bool,

    #[arg(long, help = "Blocking execution (overrides the config)")]
    pub sync: bool,

    #[arg(long, help = "Bypass the response cache")]
    pub no_cache: bool,

    #[arg(short = 'H', long = "header", help = "Custom header (e.g. \"Authorization: Bearer TOKEN\")")]
    pub headers: Vec<String>,
}

impl ModeArgs {
    fn apply(&self, config: &mut ReconConfig) {
        if self.async_mode {
            config.async_mode = true;
        } else if self.sync {
            config.async_mode = false;
        }
    }
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    #[arg(help = "Target URL (defaults to `target` from the configuration)")]
    pub url: Option<String>,

    #[command(flatten)]
    pub mode: ModeArgs,

    #[arg(short = 'o', long, default_value = RESULTS_FILE, help = "Output file path for results")]
    pub output: PathBuf,

    #[arg(long, help = "List the payload URLs without sending requests")]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    #[arg(help = "Target URL (defaults to `target` from the configuration)")]
    pub url: Option<String>,

    #[command(flatten)]
    pub mode: ModeArgs,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Set a key, dotted for nested sections (e.g. rate_limit.requests_per_second)
    Set { key: String, value: String },
    /// Restore the defaults
    Reset,
}

#[tokio::main]
async fn main() {
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(ConfigStore::default_path);

    let log_level = ConfigStore::read(&config_path)
        .map(|c| c.log_level)
        .unwrap_or_else(|| ReconConfig::default().log_level);
    init_logging(&log_level, cli.verbose);

    print_banner();
    let store = ConfigStore::open(config_path);

    if let Err(e) = dispatch(cli, store).await {
        eprint!("{}\r\n", format!("[!] {:#}", e).red().bold());
        process::exit(1);
    }
}

fn init_logging(level: &str, verbose: bool) {
    let env = env_logger::Env::default().default_filter_or(level);
    let mut builder = env_logger::Builder::from_env(env);
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.format_timestamp(None).init();
}

fn print_banner() {
    let banner = r#"
    ____  _   _____    ____
   / __ \/ | / /   |  / __ \___  _________  ____
  / / / /  |/ / /| | / /_/ / _ \/ ___/ __ \/ __ \
 / /_/ / /|  / ___ |/ _, _/  __/ /__/ /_/ / / / /
/_____/_/ |_/_/  |_/_/ |_|\___/\___/\____/_/ /_/
    "#;
    print!("{}\r\n", banner.bright_cyan().bold());
    print!("{}\r\n", "──────────────────────────────────────────────────".dimmed());
    std::io::stdout().flush().ok();
}

async fn dispatch(cli: Cli, mut store: ConfigStore) -> anyhow::Result<()> {
    let verbose = cli.verbose;
    match cli.command {
        Commands::Analyze(args) => run_analyze(store.config(), args, verbose).await,
        Commands::Probe(args) => run_probe(store.config(), args).await,
        Commands::Classify { file } => run_classify(&file),
        Commands::LlmTag { file } => run_llm_tag(store.config(), &file).await,
        Commands::Run { file, output } => run_scenario(store.config(), &file, &output, verbose).await,
        Commands::Config { action } => run_config(&mut store, action),
    }
}

/// Renders campaign events on a progress bar.
struct ProgressSink {
    bar: ProgressBar,
    verbose: bool,
}

impl ProgressSink {
    fn new_ref(verbose: bool) -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);
        Arc::new(Self { bar, verbose })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProbeEventSink for ProgressSink {
    fn on_log(&self, level: &str, message: &str) {
        let line = match level {
            "error" => message.red().to_string(),
            "phase" => message.bright_cyan().bold().to_string(),
            _ => message.to_string(),
        };
        self.bar.println(line);
    }

    fn on_result(&self, result: &AttackResult) {
        self.bar.set_message(format!("{} -> {}", result.attack, result.status));
        if self.verbose {
            self.bar.println(format!("    {} {}", result.status, result.url).dimmed().to_string());
        }
    }

    fn on_progress(&self, current: usize, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(current as u64);
    }
}

fn print_run_config(target: &str, config: &ReconConfig, use_cache: bool, output: &Path) {
    let mode_label = match config.execution_mode() {
        ExecutionMode::Cooperative => "Cooperative (async)",
        ExecutionMode::Blocking => "Blocking (worker threads)",
    };

    print!("{}\r\n", format!("[+] Target:     {}", target).green().bold());
    print!("{}\r\n", format!("[+] Mode:       {}", mode_label).magenta().bold());
    print!("{}\r\n", format!("[+] Timeout:    {}s", config.timeout).blue());
    print!("{}\r\n", format!("[+] Retries:    {}", config.max_retries).blue());
    print!("{}\r\n", format!("[+] Rate Limit: {} req/s", config.rate_limit.requests_per_second).blue());
    print!("{}\r\n", format!("[+] Cache:      {}", if use_cache { "ON" } else { "OFF" }).blue());
    print!("{}\r\n", format!("[+] Output:     {}", output.display()).blue());
    if let Some(proxy) = config.proxy_ref() {
        print!("{}\r\n", format!("[+] Proxy:      {}", proxy).yellow());
    }
    print!("{}\r\n", "──────────────────────────────────────────────────".dimmed());
    std::io::stdout().flush().ok();
}

fn print_results(results: &[AttackResult], verbose: bool) {
    for result in results {
        let line = format!("[{}] {:<4} {}", result.status, result.attack, result.url);
        let line = match result.status.code() {
            None => line.red(),
            Some(code) if code >= 400 => line.yellow(),
            Some(_) => line.green(),
        };
        print!("{}\r\n", line);
        if verbose {
            print!("{}\r\n", format!("      {}", result.display_body()).dimmed());
        }
    }

    let failed = results.iter().filter(|r| r.status.is_error()).count();
    print!(
        "{}\r\n",
        format!("[*] {} payload(s) sent, {} failed", results.len(), failed).bright_white().bold()
    );
    std::io::stdout().flush().ok();
}

/// The URL given on the command line, else the configured `target`.
fn resolve_target(url: Option<&str>, config: &ReconConfig) -> anyhow::Result<String> {
    [url, Some(config.target.as_str())]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            anyhow::anyhow!("no target given: pass a URL or set `target` in the configuration")
        })
}

async fn run_analyze(config: &ReconConfig, args: AnalyzeArgs, verbose: bool) -> anyhow::Result<()> {
    let target = resolve_target(args.url.as_deref(), config)?;
    validate_url(&target)?;

    if args.dry_run {
        for probe in expand_probes(&target) {
            println!("[DRY RUN] Would probe {} ({})", probe.url, probe.kind);
        }
        return Ok(());
    }

    let mut config = config.clone();
    args.mode.apply(&mut config);
    let use_cache = !args.mode.no_cache;
    print_run_config(&target, &config, use_cache, &args.output);

    let sink = ProgressSink::new_ref(verbose);
    let results = run_campaign(
        &config,
        &target,
        parse_custom_headers(&args.mode.headers),
        use_cache,
        sink.clone() as SinkRef,
    )
    .await;
    sink.finish();
    let results = results?;

    print_results(&results, verbose);
    save_results(&args.output, &results)
        .with_context(|| format!("saving results to {}", args.output.display()))?;
    print!(
        "{}\r\n",
        format!("[+] Results saved to {}", args.output.display()).green().bold()
    );
    Ok(())
}

async fn run_probe(config: &ReconConfig, args: ProbeArgs) -> anyhow::Result<()> {
    let target = resolve_target(args.url.as_deref(), config)?;
    let mut config = config.clone();
    args.mode.apply(&mut config);

    let cache = Arc::new(ResponseCache::from_config(&config));
    let analyzer = Analyzer::from_config(&config, cache)?;
    let snapshot = analyzer
        .run(
            &target,
            &parse_custom_headers(&args.mode.headers),
            config.execution_mode(),
            !args.mode.no_cache,
        )
        .await?;

    print_snapshot(&target, &snapshot);
    Ok(())
}

fn print_classified(rows: &[(AttackResult, Behavior)]) {
    for (result, behavior) in rows {
        let line = format!("{} {} - {} ({})", behavior.prefix(), behavior, result.url, result.attack);
        let line = match behavior {
            Behavior::Vulnerable => line.red().bold(),
            Behavior::Strict => line.green(),
            Behavior::Flexible => line.yellow(),
        };
        print!("{}\r\n", line);
    }
    std::io::stdout().flush().ok();
}

fn run_classify(file: &Path) -> anyhow::Result<()> {
    let rows = classify_file(file).with_context(|| format!("classifying {}", file.display()))?;
    print!(
        "{}\r\n",
        format!("[*] Classifying {} result(s) from {}", rows.len(), file.display()).bright_cyan().bold()
    );
    print_classified(&rows);
    Ok(())
}

async fn run_llm_tag(config: &ReconConfig, file: &Path) -> anyhow::Result<()> {
    let annotator = LlmAnnotator::from_env(config)?;
    print!(
        "{}\r\n",
        format!("[*] Sending {} for LLM analysis...", file.display()).bright_cyan().bold()
    );
    let out = annotator.annotate_file(file).await?;
    print!("{}\r\n", format!("[+] Annotations saved to {}", out.display()).green().bold());
    Ok(())
}

async fn run_scenario(config: &ReconConfig, file: &Path, output: &Path, verbose: bool) -> anyhow::Result<()> {
    let scenario = Scenario::load(file).with_context(|| format!("loading scenario {}", file.display()))?;
    print!(
        "{}\r\n",
        format!("[*] Scenario {} ({} step(s))", file.display(), scenario.steps.len()).bright_cyan().bold()
    );

    let sink = ProgressSink::new_ref(verbose);
    let outcomes = scenario.run(config, output, sink.clone() as SinkRef).await;
    sink.finish();

    for outcome in outcomes? {
        match outcome {
            StepOutcome::Analyzed { results, saved_to } => {
                print_results(&results, verbose);
                print!("{}\r\n", format!("[+] Results saved to {}", saved_to.display()).green().bold());
            }
            StepOutcome::Classified(rows) => print_classified(&rows),
            StepOutcome::Skipped(name) => {
                print!("{}\r\n", format!("[~] Skipped unknown step '{}'", name).yellow());
            }
        }
    }
    Ok(())
}

/// `a.b` with `value` becomes `{"a": {"b": value}}`. Values that parse as JSON
/// keep their type, anything else is stored as a string.
fn dotted_patch(key: &str, value: &str) -> Value {
    let leaf = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    key.rsplit('.').fold(leaf, |inner, part| {
        let mut map = serde_json::Map::new();
        map.insert(part.to_string(), inner);
        Value::Object(map)
    })
}

fn run_config(store: &mut ConfigStore, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {}
        ConfigAction::Set { key, value } => {
            store.merge(dotted_patch(&key, &value))?;
            print!("{}\r\n", format!("[+] {} updated", key).green().bold());
        }
        ConfigAction::Reset => {
            store.reset()?;
            print!("{}\r\n", "[+] Configuration reset to defaults".green().bold());
        }
    }
    println!("{}", serde_json::to_string_pretty(store.config())?);
    println!("{}", format!("({})", store.path().display()).dimmed());
    Ok(())
}
