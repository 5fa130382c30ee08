use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tanglegram::config::Settings;
use tanglegram::figure::{FigureConfig, TreeCache, build_tanglegram};
use tanglegram::untangle::{CanonicalOrder, Untangler};
use tanglegram::{CanvasLayout, TanglegramError};
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Build cophylogeny (tanglegram) tables comparing two timed trees of the
/// same samples: connector anchors for every matched leaf and the clades both
/// trees share.
#[derive(Parser, Debug)]
#[command(name = "tanglegram", version, about = "Tanglegram tables for two timed trees")]
struct Args {
    /// Figure to build, or `all`
    #[arg(required_unless_present = "list")]
    figure: Option<String>,

    /// Settings file (TOML)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Untangling program, overriding the settings file
    #[arg(long = "oracle", env = "TANGLEGRAM_ORACLE")]
    oracle: Option<PathBuf>,

    /// Order leaves in-process (canonical order) instead of running the oracle
    #[arg(long = "in-process", default_value_t = false)]
    in_process: bool,

    /// Output directory, overriding the settings file
    #[arg(short = 'o', long = "output-dir")]
    output_dir: Option<PathBuf>,

    /// Gzip-compress the output tables
    #[arg(long = "gzip", default_value_t = false)]
    gzip: bool,

    /// List the known figures and exit
    #[arg(long = "list", default_value_t = false)]
    list: bool,

    /// Verbosity: -v info, -vv debug, -vvv trace
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();
    setup_logging(args.verbose);

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            ExitCode::from(2)
        }
    }
}

/// Returns whether every requested figure was built.
fn run(args: &Args) -> Result<bool, TanglegramError> {
    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(program) = &args.oracle {
        settings.oracle.program = program.clone();
    }
    if let Some(dir) = &args.output_dir {
        settings.output_dir = dir.clone();
    }
    let registry = settings.registry();

    if args.list {
        for figure in registry.iter() {
            println!("{}\t{}", figure.name, figure.day0);
        }
        return Ok(true);
    }

    let requested = args.figure.as_deref().unwrap_or("all");
    let figures: Vec<&FigureConfig> = if requested == "all" {
        registry.iter().collect()
    } else {
        let figure = registry.get(requested).ok_or_else(|| {
            TanglegramError::Config(format!(
                "unknown figure {requested:?}; known: {}",
                registry.names().join(", ")
            ))
        })?;
        vec![figure]
    };

    std::fs::create_dir_all(&settings.output_dir).map_err(|e| {
        TanglegramError::io(format!("create {}", settings.output_dir.display()), e)
    })?;

    let oracle = settings.oracle.dendroscope();
    let untangler: &dyn Untangler = if args.in_process {
        &CanonicalOrder
    } else {
        &oracle
    };

    let mut cache = TreeCache::new(&settings.data_dir);
    let mut failed = 0usize;
    for figure in &figures {
        let t0 = Instant::now();
        let built = build_one(
            figure,
            &mut cache,
            untangler,
            &settings.layout,
            &settings.output_dir,
            args.gzip,
        );
        match built {
            Ok(()) => info!("{} done in {:.3}s", figure.name, t0.elapsed().as_secs_f64()),
            Err(e) => {
                failed += 1;
                error!("{} failed: {e}", figure.name);
            }
        }
    }
    if failed > 0 {
        eprintln!("{failed} of {} figures failed", figures.len());
    }
    Ok(failed == 0)
}

fn build_one(
    figure: &FigureConfig,
    cache: &mut TreeCache,
    untangler: &dyn Untangler,
    layout: &CanvasLayout,
    output_dir: &Path,
    gzip: bool,
) -> Result<(), TanglegramError> {
    let tanglegram = build_tanglegram(figure, cache, untangler, layout)?;
    let (anchors, splits) = tanglegram.write_tables(output_dir, gzip)?;
    println!("{}: {} {}", figure.name, anchors.display(), splits.display());
    Ok(())
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    // RUST_LOG, when set, refines the level chosen with -v
    let env_filter = EnvFilter::builder()
        .with_default_directive(filter.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_env_filter(env_filter)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    // https://docs.rs/clap/latest/clap/_derive/_tutorial/index.html#testing
    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_args() {
        let args =
            Args::try_parse_from(["tanglegram", "-vv", "--in-process", "--gzip", "all"]).unwrap();
        assert_eq!(args.verbose, 2);
        assert!(args.in_process && args.gzip);
        assert_eq!(args.figure.as_deref(), Some("all"));
        assert!(Args::try_parse_from(["tanglegram", "--list"]).is_ok());
        assert!(Args::try_parse_from(["tanglegram"]).is_err());
    }
}
