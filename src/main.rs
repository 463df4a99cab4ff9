use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use watchcast::{ChannelSink, Pipeline, Settings};

#[derive(Parser)]
#[command(name = "watchcast")]
#[command(about = "Watch directories and stream debounced file-change notifications")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration
    Config,

    /// Watch one or more directories, printing notifications as JSON lines
    Watch {
        /// Directories to watch
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Scope tag attached to every notification from these watches
        #[arg(short, long)]
        scope: Option<String>,

        /// Watch only the top level of each directory
        #[arg(long)]
        no_recursive: bool,

        /// Debounce window in milliseconds (overrides config)
        #[arg(long)]
        debounce_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = Settings::load().unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        eprintln!("Using default configuration.");
        Settings::default()
    });

    match cli.command {
        Commands::Init { force } => match Settings::init_config_file(force) {
            Ok(path) => println!("Created configuration at: {}", path.display()),
            Err(e) => {
                eprintln!("Failed to initialize configuration: {e}");
                std::process::exit(1);
            }
        },

        Commands::Config => match toml::to_string_pretty(&settings) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => {
                eprintln!("Failed to render configuration: {e}");
                std::process::exit(1);
            }
        },

        Commands::Watch {
            paths,
            scope,
            no_recursive,
            debounce_ms,
        } => {
            watchcast::logging::init_with_config(&settings.logging);
            run_watch(settings, paths, scope, no_recursive, debounce_ms).await;
        }
    }
}

async fn run_watch(
    settings: Settings,
    paths: Vec<PathBuf>,
    scope: Option<String>,
    no_recursive: bool,
    debounce_ms: Option<u64>,
) {
    let channel_capacity = settings.pipeline.channel_capacity;
    let pipeline = Pipeline::new(settings);

    let (sink, mut lines) = ChannelSink::new(channel_capacity);
    pipeline.subscribe(Arc::new(sink), scope.clone());
    let printer = tokio::spawn(async move {
        while let Some(line) = lines.recv().await {
            println!("{line}");
        }
    });

    pipeline.start();

    for path in &paths {
        let mut descriptor = pipeline.watch_descriptor(path).scope(scope.clone());
        if no_recursive {
            descriptor = descriptor.recursive(false);
        }
        if let Some(ms) = debounce_ms {
            descriptor = descriptor.debounce_window(std::time::Duration::from_millis(ms));
        }
        if let Err(e) = pipeline.request_watch(descriptor) {
            eprintln!("Cannot watch {}: {e}", path.display());
            pipeline.shutdown().await;
            std::process::exit(1);
        }
        eprintln!("Watching: {}", path.display());
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("Failed to listen for shutdown signal: {e}");
    }
    eprintln!("Shutting down...");
    pipeline.shutdown().await;
    printer.abort();
}
