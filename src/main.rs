use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use jweave::config::AgentConfig;
use jweave::coverage::CoverageInstrumentationFilter;
use jweave::csi::CallSites;
use jweave::ipc::{MatchingStore, SignalServer, TcpSignalClientFactory};
use jweave::matcher::CodeOwners;
use jweave::matching::{ClassMatchingCache, NoClassMatchingCache, ParentClassMatchingCache};
use jweave::scan::{instrument_inputs, match_inputs, sorted_classpath};
use jweave::tooling::{CombiningTransformer, ModuleRegistry, TypePool};

const LOG_ENV: &str = "JWEAVE_LOG";

/// CLI arguments for jweave execution.
#[derive(Parser, Debug)]
#[command(
    name = "jweave",
    about = "Class matching, call-site substitution and coverage weaving for JVM class files and JAR files.",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
    #[arg(long, global = true)]
    timing: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rewrite classes and write them to a directory or JAR.
    Instrument(InstrumentArgs),
    /// Print the instrumenters matching each class as JSON.
    Match(MatchArgs),
    /// Run the coordinator keeping class matching results across processes.
    Serve(ServeArgs),
    /// Print the owners of each path according to a CODEOWNERS file.
    Codeowners(CodeownersArgs),
}

#[derive(Args, Debug)]
struct ModuleArgs {
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    #[arg(long, value_name = "PATH")]
    classpath: Vec<PathBuf>,
    /// JSON module manifest.
    #[arg(long, value_name = "PATH")]
    modules: Option<PathBuf>,
    /// JSON agent configuration, overridden by `JWEAVE_*` variables.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct InstrumentArgs {
    #[command(flatten)]
    common: ModuleArgs,
    #[arg(long, value_name = "PATH")]
    output: PathBuf,
    /// Add coverage probes to classes accepted by the coverage includes/excludes.
    #[arg(long)]
    coverage: bool,
    /// JSON list of call-site declarations.
    #[arg(long, value_name = "PATH")]
    call_sites: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct MatchArgs {
    #[command(flatten)]
    common: ModuleArgs,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, value_name = "ADDR", default_value = "127.0.0.1:7777")]
    listen: String,
    /// Store loaded on start and saved after every connection.
    #[arg(long, value_name = "PATH")]
    snapshot: Option<PathBuf>,
    /// Stop after this many connections.
    #[arg(long)]
    rounds: Option<usize>,
}

#[derive(Args, Debug)]
struct CodeownersArgs {
    #[arg(long, value_name = "PATH")]
    file: PathBuf,
    #[arg(required = true)]
    paths: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();
    run(cli)
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let started_at = Instant::now();
    match cli.command {
        Command::Instrument(args) => instrument(args)?,
        Command::Match(args) => match_classes(args)?,
        Command::Serve(args) => serve(args)?,
        Command::Codeowners(args) => codeowners(args)?,
    }
    if cli.timing {
        info!(total_ms = started_at.elapsed().as_millis() as u64, "timing");
    }
    Ok(())
}

/// Transformer shared by `instrument` and `match`, with the cache it reports to.
struct Session {
    transformer: CombiningTransformer,
    cache: Arc<dyn ClassMatchingCache>,
    config: AgentConfig,
}

impl Session {
    fn open(args: &ModuleArgs) -> Result<Self> {
        if !args.input.exists() {
            anyhow::bail!("input not found: {}", args.input.display());
        }
        for entry in &args.classpath {
            if !entry.exists() {
                anyhow::bail!("classpath entry not found: {}", entry.display());
            }
        }

        let config = AgentConfig::load(args.config.as_deref())?;
        let mut registry = ModuleRegistry::new();
        if let Some(path) = &args.modules {
            let manifest = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            registry
                .register_manifest(&manifest)
                .with_context(|| format!("failed to load modules from {}", path.display()))?;
        }
        let modules = registry.resolve(&config);
        info!(registered = registry.len(), enabled = modules.len(), "modules resolved");

        // A lone class file has no siblings to resolve super types from.
        let mut classpath = Vec::new();
        if args.input.extension().is_none_or(|ext| ext != "class") {
            classpath.push(args.input.clone());
        }
        classpath.extend(sorted_classpath(&args.classpath));
        let type_pool = TypePool::new(&classpath, config.type_cache_capacity)?;

        let cache: Arc<dyn ClassMatchingCache> = match &config.signal_server {
            Some(address) => Arc::new(ParentClassMatchingCache::with_jrt_policy(
                Arc::new(TcpSignalClientFactory::new(address.as_str())),
                config.jrt_policy,
            )),
            None => Arc::new(NoClassMatchingCache),
        };
        let transformer = CombiningTransformer::new(&modules, type_pool, cache.clone())
            .context("failed to compile module matchers")?
            .with_excludes(&config.excludes);
        Ok(Self {
            transformer,
            cache,
            config,
        })
    }
}

fn instrument(args: InstrumentArgs) -> Result<()> {
    let mut session = Session::open(&args.common)?;
    if let Some(path) = &args.call_sites {
        let json =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let call_sites = CallSites::from_json(&json)
            .with_context(|| format!("failed to load call sites from {}", path.display()))?;
        session.transformer = session.transformer.with_call_sites(&call_sites);
    }
    if args.coverage {
        let filter = CoverageInstrumentationFilter::new(
            &session.config.coverage_includes,
            &session.config.coverage_excludes,
        );
        session.transformer = session.transformer.with_coverage(filter);
    }

    let summary = instrument_inputs(&args.common.input, &args.output, &session.transformer)?;
    session.cache.shutdown();
    info!(
        classes = summary.class_count,
        transformed = summary.transformed,
        rejected = summary.rejected,
        output = %args.output.display(),
        "instrumentation finished"
    );
    for helper in &summary.helpers {
        info!(helper = %helper, "helper class required");
    }
    Ok(())
}

fn match_classes(args: MatchArgs) -> Result<()> {
    let session = Session::open(&args.common)?;
    let results = match_inputs(&args.common.input, &session.transformer)?;
    session.cache.shutdown();

    let mut writer = output_writer(args.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &results)
        .context("failed to serialize match output")?;
    writer
        .write_all(b"\n")
        .context("failed to write match output")?;
    Ok(())
}

fn serve(args: ServeArgs) -> Result<()> {
    let store = MatchingStore::new();
    if let Some(path) = args.snapshot.as_deref().filter(|path| path.exists()) {
        let loaded = store.load(path)?;
        info!(entries = loaded, snapshot = %path.display(), "snapshot loaded");
    }
    let server = SignalServer::bind(&args.listen, store)
        .with_context(|| format!("failed to listen on {}", args.listen))?;

    let mut served = 0;
    while args.rounds.is_none_or(|rounds| served < rounds) {
        server.serve(Some(1))?;
        served += 1;
        if let Some(path) = &args.snapshot {
            server.store().save(path)?;
        }
    }
    info!(connections = served, entries = server.store().len(), "signal server stopped");
    Ok(())
}

fn codeowners(args: CodeownersArgs) -> Result<()> {
    let content = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let owners = CodeOwners::parse(&content)
        .with_context(|| format!("failed to parse {}", args.file.display()))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for path in &args.paths {
        let line = match owners.owners(path) {
            Some(owners) if !owners.is_empty() => owners.join(" "),
            Some(_) => "(unowned)".to_string(),
            None => "(no rule)".to_string(),
        };
        writeln!(out, "{path}\t{line}").context("failed to write owners")?;
    }
    Ok(())
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}
