use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "texbot")]
#[command(about = "Discord bot that typesets LaTeX code blocks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, a default config file and the render directory.
    Init {
        /// Config file path (default: TEXBOT_CONFIG_PATH or ~/.texbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Connect to Discord and render `tex!c` code blocks. The token is read from DISCORD_TOKEN
    /// (the environment or a `.env` file).
    Run {
        /// Config file path (default: TEXBOT_CONFIG_PATH or ~/.texbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Directory for the timestamped log file (default from config or ./logs)
        #[arg(long, value_name = "DIR")]
        log_dir: Option<PathBuf>,
    },
}

/// Writes every log record to stderr and to the session log file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stderr().flush()?;
        self.file.flush()
    }
}

/// Initialise env_logger (default level info, RUST_LOG overrides). With `log_dir`, output is
/// also written to `<log_dir>/<YYYYmmdd-HHMMSS>.log`.
fn init_logging(log_dir: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{}: [{}] - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.args()
        )
    });
    let mut log_path = None;
    if let Some(dir) = log_dir {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.log", chrono::Local::now().format("%Y%m%d-%H%M%S")));
        let file = File::create(&path)?;
        builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
        log_path = Some(path);
    }
    builder.init();
    Ok(log_path)
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("texbot {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            let _ = init_logging(None);
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run { config, log_dir }) => {
            if let Err(e) = run(config, log_dir).await {
                log::error!("texbot failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(texbot::config::default_config_path);
    let dir = texbot::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run(config_path: Option<PathBuf>, log_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let env_file = texbot::config::load_env_file(None);
    let loaded = texbot::config::load_config(config_path);
    let log_dir = match (&log_dir, &loaded) {
        (Some(dir), _) => dir.clone(),
        (None, Ok((config, _))) => config.logging.directory.clone(),
        (None, Err(_)) => PathBuf::from("logs"),
    };
    match init_logging(Some(&log_dir)) {
        Ok(Some(path)) => log::info!("logging to {}", path.display()),
        Ok(None) => {}
        Err(e) => {
            let _ = init_logging(None);
            log::warn!("could not open log file in {}: {}", log_dir.display(), e);
        }
    }
    match env_file {
        Ok(Some(path)) => log::info!("loaded environment from {}", path.display()),
        Ok(None) => {}
        Err(e) => log::warn!("{:#}", e),
    }
    let (config, path) = loaded?;
    log::info!("starting texbot {}", env!("CARGO_PKG_VERSION"));
    texbot::bot::run_bot(config, path).await
}
