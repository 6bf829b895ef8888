use anyhow::{Context, bail};
use blueprint::config::{Config, DEFAULT_CONFIG_FILE};
use blueprint::diagnostics::Severity;
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "blueprint",
    version,
    about = "Compile application blueprints into a runtime artifact, a Postgres schema and a TypeScript SDK"
)]
struct Args {
    /// Blueprint source files, compiled together as one unit
    #[arg(required = true, value_name = "FILE")]
    inputs: Vec<PathBuf>,

    /// Output directory
    #[arg(short, long, default_value = "out")]
    out_dir: PathBuf,

    /// Config file (default: ./blueprint.toml when present)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Report paths whose root is not a declared entity
    #[arg(long)]
    strict: bool,

    /// Override the SDK API prefix
    #[arg(long, value_name = "PREFIX")]
    api_prefix: Option<String>,

    /// Only report diagnostics; write nothing
    #[arg(long)]
    check: bool,
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            Config::load(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => Config::default(),
    };
    if args.strict {
        config.compile.strict_paths = true;
    }
    if let Some(prefix) = &args.api_prefix {
        config.sdk.api_prefix = prefix.clone();
    }
    Ok(config)
}

fn read_sources(inputs: &[PathBuf]) -> anyhow::Result<String> {
    let mut source = String::new();
    for path in inputs {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        source.push_str(&text);
        if !text.ends_with('\n') {
            source.push('\n');
        }
    }
    Ok(source)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blueprint=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let source = read_sources(&args.inputs)?;

    let compilation = blueprint::compile(&source, &config);
    for diagnostic in compilation.diagnostics.iter() {
        eprintln!("{}", diagnostic.render(&source));
    }

    let Some(output) = compilation.output else {
        bail!(
            "compilation failed with {} error(s)",
            compilation.diagnostics.error_count()
        );
    };

    let warnings = compilation
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Warning)
        .count();
    tracing::info!(warnings, "compiled {} file(s)", args.inputs.len());

    if args.check {
        return Ok(());
    }

    for (name, contents) in output.files() {
        let path = args.out_dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))?;
        println!("wrote {}", path.display());
    }

    Ok(())
}
