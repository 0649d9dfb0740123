use clap::{Parser, Subcommand};
use hatgen::credentials::mask_key;
use hatgen::logger::{self, LoggerConfig};
use hatgen::{
    AvatarCompositor, CompositorOptions, Config, CredentialResolver, CredentialStore,
    FileCredentialStore, HatError, ImageAsset, KeySource, Session,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "hatgen", version, about = "Put a Santa hat on a portrait")]
struct Cli {
    /// Debug logging with file locations.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a hatted avatar and save it as a PNG.
    Generate(GenerateArgs),
    /// Only pad the image for a circular avatar. No network access.
    Prepare(PrepareArgs),
    /// Manage the stored API key.
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
}

#[derive(Parser, Debug)]
struct GenerateArgs {
    /// Portrait to edit (PNG, JPEG, WebP, ...).
    input: PathBuf,

    /// API key for this run; overrides the stored key and the environment.
    #[arg(long)]
    api_key: Option<String>,

    /// Send the image as-is instead of padding it for an avatar.
    #[arg(long, default_value_t = false)]
    no_optimize: bool,

    /// Directory the result is written to.
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct PrepareArgs {
    input: PathBuf,

    /// Output path. Defaults to `<input stem>-padded.<ext>` next to the input.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Output mime type, e.g. image/png. Defaults to the input's type.
    #[arg(long)]
    mime: Option<String>,
}

#[derive(Subcommand, Debug)]
enum KeyAction {
    /// Store a key for later runs.
    Set { key: String },
    /// Remove the stored key.
    Clear,
    /// Show the key that would be used, masked.
    Show,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let dotenv_loaded = dotenv::dotenv().is_ok();

    let installed = if cli.verbose {
        logger::init_with_config(LoggerConfig::development())
    } else {
        logger::init()
    };
    if let Err(e) = installed {
        eprintln!("{}", e);
    }
    if dotenv_loaded {
        log::debug!("✅ .env file loaded");
    }

    let config = Config::from_env();
    logger::log_config_info(&config);

    let outcome = match cli.cmd {
        Command::Generate(args) => cmd_generate(config, args).await,
        Command::Prepare(args) => cmd_prepare(args).await,
        Command::Key { action } => cmd_key(&config, action),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

async fn cmd_generate(config: Config, args: GenerateArgs) -> hatgen::Result<()> {
    let mut config = config;
    if args.no_optimize {
        config = config.with_optimize_for_avatar(false);
    }
    if let Some(dir) = args.output_dir {
        config = config.with_output_dir(dir);
    }

    let image = ImageAsset::load(&args.input).await?;
    log::info!(
        "🖼️  Loaded {} ({} {}x{})",
        args.input.display(),
        image.mime_type(),
        image.width(),
        image.height()
    );

    let mut session = Session::from_config(&config)?;
    session.select_image(image);

    session.generate(args.api_key.as_deref()).await;
    let result = session.into_result()?;

    let path = result.save_to_dir(&config.output_dir).await?;
    log::info!("💾 Saved {}", path.display());
    println!("{}", path.display());
    Ok(())
}

async fn cmd_prepare(args: PrepareArgs) -> hatgen::Result<()> {
    let image = ImageAsset::load(&args.input).await?;

    let mut options = CompositorOptions::default();
    if let Some(mime) = args.mime {
        options = options.with_output_mime(mime);
    }
    let compositor = AvatarCompositor::new(options);

    let padded = tokio::task::spawn_blocking(move || compositor.composite(&image))
        .await
        .map_err(|e| HatError::Validation(format!("compositor task failed: {}", e)))??;

    let output = args.output.unwrap_or_else(|| {
        let stem = args
            .input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("avatar");
        let ext = padded.mime_type().trim_start_matches("image/");
        args.input.with_file_name(format!("{}-padded.{}", stem, ext))
    });
    tokio::fs::write(&output, padded.bytes()).await?;

    log::info!(
        "📐 Padded to {}x{} ({})",
        padded.width(),
        padded.height(),
        padded.mime_type()
    );
    println!("{}", output.display());
    Ok(())
}

fn cmd_key(config: &Config, action: KeyAction) -> hatgen::Result<()> {
    let store = FileCredentialStore::new(&config.credential_file);
    match action {
        KeyAction::Set { key } => {
            if key.trim().is_empty() {
                return Err(HatError::Validation("refusing to store an empty key".into()));
            }
            store.save(&key)?;
            println!("Stored {} in {}", mask_key(key.trim()), store.path().display());
        }
        KeyAction::Clear => {
            store.clear()?;
            println!("Cleared stored key");
        }
        KeyAction::Show => {
            let stored = store.load()?.unwrap_or_default();
            let resolver = CredentialResolver::new(config.credential_sources.clone());
            let (key, source) = resolver.resolve_source_with(&stored, |name| std::env::var(name).ok());
            match source {
                KeySource::Explicit => {
                    println!("{} (stored in {})", mask_key(&key), store.path().display())
                }
                KeySource::Env(name) => println!("{} (from ${})", mask_key(&key), name),
                KeySource::None => println!("No API key configured"),
            }
        }
    }
    Ok(())
}

fn report(err: &HatError) {
    log::error!("❌ {}", err);
    if err.needs_configuration() {
        eprintln!("Fix your key with `hatgen key set <KEY>`, `--api-key`, or the API_KEY environment variable.");
    } else if err.is_retryable() {
        eprintln!("This is usually transient. Run the same command again to retry.");
    }
}
