use std::env;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use tooie_shelf::config::{self, Config};
use tooie_shelf::error_codes::{find_icon_error, ErrorEnvelope};
use tooie_shelf::extract::IconExtractor;
use tooie_shelf::icon_cache::{IconCache, ICONS_DIR};
use tooie_shelf::icon_sources::IconLoader;
use tooie_shelf::launch::Launcher;
use tooie_shelf::resolver::{IdentityResolver, ResolverCache};
use tooie_shelf::shell;
use tooie_shelf::sixel::render_icon;
use tooie_shelf::system::{AndroidShell, PackageShell};
use tooie_shelf::terminal::CellPixels;

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("TOOIE_GIT_HASH"), ")");

#[derive(Debug, Parser)]
#[command(name = "tooie-shelf")]
#[command(version = VERSION)]
#[command(about = "App launcher grid that draws icons as sixel bitmaps")]
struct Cli {
    /// Directory holding config.yaml and the icon caches.
    #[arg(long = "root", global = true)]
    root: Option<PathBuf>,
    /// Config file; defaults to <root>/config.yaml.
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,
    #[arg(short = 'v', long = "verbose", global = true, default_value_t = false)]
    verbose: bool,
    /// Write logs here instead of stderr.
    #[arg(long = "log-file", global = true)]
    log_file: Option<PathBuf>,
    /// Print results and errors as JSON.
    #[arg(long = "json", global = true, default_value_t = false)]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show the interactive grid (default).
    Run,
    /// Load and validate the config.
    Check,
    /// Print one app's icon as a sixel block.
    Render {
        app: String,
        #[arg(long = "width", default_value_t = 8)]
        width_cells: u32,
        #[arg(long = "height", default_value_t = 4)]
        height_cells: u32,
        #[arg(long = "cell-width", default_value_t = 10)]
        cell_width: u32,
        #[arg(long = "cell-height", default_value_t = 20)]
        cell_height: u32,
    },
    /// Resolve an app name to its package and launcher entry point.
    Resolve { name: String },
    /// Extract a package's icon into the cache.
    Extract {
        package: String,
        /// Also write the decoded icon here.
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
    /// Manage the on-disk caches.
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
}

#[derive(Debug, Subcommand)]
enum CacheCommand {
    /// Remove decoded icons and resource path hints.
    Clear,
}

struct Runtime {
    root: PathBuf,
    config_path: PathBuf,
    resolver: IdentityResolver,
    loader: IconLoader,
}

impl Runtime {
    fn new(cli: &Cli) -> Result<Self> {
        let root = cli.root.clone().unwrap_or_else(config::config_root);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| root.join(config::CONFIG_FILE));
        let shell: Arc<dyn PackageShell> = Arc::new(AndroidShell::new());
        let resolver = IdentityResolver::new(Arc::clone(&shell), Arc::new(ResolverCache::new()));
        let extractor = IconExtractor::new(shell, IconCache::new(&root));
        Ok(Self {
            root,
            config_path,
            resolver,
            loader: IconLoader::new(extractor)?,
        })
    }

    fn load_config(&self) -> Result<Config> {
        config::load(&self.config_path, Some(&self.resolver))
            .with_context(|| format!("failed to load config {}", self.config_path.display()))
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(error) = init_logging(&cli) {
        eprintln!("Warning: {error:#}");
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            report_error(&error, cli.json);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let debug = cli.verbose || env::var("TOOIE_DEBUG").is_ok_and(|value| value == "1");
    let default_filter = if debug {
        "tooie_shelf=debug"
    } else {
        "tooie_shelf=warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let file = cli
        .log_file
        .as_deref()
        .map(|path| {
            File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))
        })
        .transpose()?;
    let stderr_layer = file
        .is_none()
        .then(|| fmt::layer().with_writer(io::stderr).with_target(false));
    let file_layer = file.map(|file| fmt::layer().with_writer(Mutex::new(file)).with_ansi(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install log subscriber")
}

fn report_error(error: &anyhow::Error, as_json: bool) {
    if !as_json {
        eprintln!("Error: {error:#}");
        return;
    }
    let envelope = find_icon_error(error)
        .map(|icon_error| {
            let mut envelope = icon_error.envelope();
            envelope.error.message = format!("{error:#}");
            envelope
        })
        .unwrap_or_else(|| ErrorEnvelope::generic(error));
    match serde_json::to_string(&envelope) {
        Ok(line) => eprintln!("{line}"),
        Err(_) => eprintln!("Error: {error:#}"),
    }
}

fn run(cli: &Cli) -> Result<()> {
    let runtime = Runtime::new(cli)?;
    match cli.command.as_ref().unwrap_or(&Commands::Run) {
        Commands::Run => run_grid(&runtime),
        Commands::Check => run_check(&runtime, cli.json),
        Commands::Render {
            app,
            width_cells,
            height_cells,
            cell_width,
            cell_height,
        } => run_render(
            &runtime,
            app,
            *width_cells,
            *height_cells,
            CellPixels {
                width: *cell_width,
                height: *cell_height,
            },
        ),
        Commands::Resolve { name } => run_resolve(&runtime, name, cli.json),
        Commands::Extract { package, output } => {
            run_extract(&runtime, package, output.as_deref(), cli.json)
        }
        Commands::Cache {
            action: CacheCommand::Clear,
        } => run_cache_clear(&runtime, cli.json),
    }
}

fn run_grid(runtime: &Runtime) -> Result<()> {
    if let Err(error) = fs::create_dir_all(runtime.root.join(ICONS_DIR)) {
        warn!(%error, "could not create icon cache directory");
    }
    let config = runtime.load_config()?;
    let icons = runtime.loader.load_icons(&config.display_apps());
    let launcher = Launcher::new();
    shell::run(config, icons, &launcher)
}

fn run_check(runtime: &Runtime, as_json: bool) -> Result<()> {
    let config = runtime.load_config()?;
    let apps = config.display_apps();
    if as_json {
        let report = json!({
            "ok": true,
            "config": runtime.config_path.display().to_string(),
            "grid": { "rows": config.grid.rows, "columns": config.grid.columns },
            "apps": apps.iter().map(|app| json!({
                "name": app.name,
                "package": app.package(),
                "activity": app.activity(),
                "command": app.command,
                "scale": config.effective_scale(app),
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "OK: {} ({}x{} grid)",
        runtime.config_path.display(),
        config.grid.rows,
        config.grid.columns
    );
    println!("Apps: {}", apps.len());
    Ok(())
}

fn run_render(
    runtime: &Runtime,
    name: &str,
    width_cells: u32,
    height_cells: u32,
    cell: CellPixels,
) -> Result<()> {
    let config = runtime.load_config()?;
    let app = config
        .apps
        .iter()
        .find(|app| app.name == name)
        .ok_or_else(|| anyhow!("no app named '{name}' in {}", runtime.config_path.display()))?;

    let icon = runtime.loader.load_single_icon(app);
    let bitmap = render_icon(&icon, width_cells, height_cells, cell);
    let mut stdout = io::stdout().lock();
    stdout.write_all(bitmap.encoded.as_bytes())?;
    writeln!(stdout)?;
    Ok(())
}

fn run_resolve(runtime: &Runtime, name: &str, as_json: bool) -> Result<()> {
    let (package, activity) = runtime
        .resolver
        .resolve_app(name)
        .with_context(|| format!("could not resolve '{name}'"))?;
    if as_json {
        let report = json!({ "ok": true, "name": name, "package": package, "activity": activity });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{package}/{activity}");
    }
    Ok(())
}

fn run_extract(
    runtime: &Runtime,
    package: &str,
    output: Option<&Path>,
    as_json: bool,
) -> Result<()> {
    let found = runtime
        .loader
        .extractor()
        .extract(package)
        .with_context(|| format!("could not extract icon for {package}"))?;
    if let Some(output) = output {
        found
            .image
            .save(output)
            .with_context(|| format!("failed to write {}", output.display()))?;
    }

    let (width, height) = found.image.dimensions();
    if as_json {
        let report = json!({
            "ok": true,
            "package": package,
            "strategy": found.strategy.as_str(),
            "source": found.source_path,
            "width": width,
            "height": height,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{package}: {width}x{height} via {} ({})",
            found.strategy, found.source_path
        );
    }
    Ok(())
}

fn run_cache_clear(runtime: &Runtime, as_json: bool) -> Result<()> {
    let cache = runtime.loader.extractor().cache();
    cache
        .clear()
        .with_context(|| format!("failed to clear caches under {}", cache.root().display()))?;
    runtime.resolver.cache().clear();
    if as_json {
        println!("{}", json!({ "ok": true, "root": cache.root().display().to_string() }));
    } else {
        println!("Cleared caches under {}", cache.root().display());
    }
    Ok(())
}
