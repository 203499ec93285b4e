use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use qrkeep::export::DEFAULT_FILENAME;
use qrkeep::logging::init_logger;
use qrkeep::{encode, App, Color, Config, EcLevel, SaveOutcome, Settings};

#[derive(Debug, Parser)]
#[command(name = "qrkeep", version, about = "Render, export and keep QR codes")]
struct Cli {
    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file to use instead of the default location.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Render a symbol and export it as PNG.
    Generate {
        content: String,
        #[arg(long)]
        size: Option<u32>,
        #[command(flatten)]
        style: StyleArgs,
        #[arg(long)]
        level: Option<EcLevel>,
        #[arg(short, long, default_value = DEFAULT_FILENAME)]
        output: PathBuf,
        /// Also print the symbol to the terminal.
        #[arg(long)]
        preview: bool,
    },
    /// Add a symbol to the saved library.
    Save {
        content: String,
        #[command(flatten)]
        style: StyleArgs,
    },
    /// List saved symbols, newest first.
    List,
    /// Delete the saved symbol at an index shown by `list`.
    Delete { index: usize },
    /// Remove every saved symbol.
    Clear,
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    Show,
    /// Change stored defaults.
    Set(StyleArgs),
    Reset,
    /// Delete the stored defaults and every saved symbol.
    ClearAll,
}

#[derive(Debug, Args)]
struct StyleArgs {
    /// Dark module color, e.g. #000000.
    #[arg(long)]
    fg: Option<Color>,
    /// Light module color, e.g. #ffffff.
    #[arg(long)]
    bg: Option<Color>,
    /// Watermark URL, file path or data URI. Pass "" to clear.
    #[arg(long)]
    watermark: Option<String>,
}

impl StyleArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(fg) = self.fg {
            config.dark = fg;
        }
        if let Some(bg) = self.bg {
            config.light = bg;
        }
        if let Some(watermark) = &self.watermark {
            config.watermark = watermark.clone();
        }
    }

    fn over(&self, config: &Config) -> Config {
        let mut config = config.clone();
        self.apply(&mut config);
        config
    }
}

fn print_config(config: &Config) {
    println!("fg        {}", config.dark);
    println!("bg        {}", config.light);
    println!(
        "watermark {}",
        if config.watermark.is_empty() { "(none)" } else { config.watermark.as_str() }
    );
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::load(cli.settings.as_deref()).context("failed to load settings")?;
    let app = App::new(settings)?;

    match cli.command {
        Command::Generate {
            content,
            size,
            style,
            level,
            output,
            preview,
        } => {
            let config = style.over(&app.preferences().load_or_default().await);
            let mut request = app.request(content, &config);
            if let Some(size) = size {
                request = request.with_size(size);
            }
            if let Some(level) = level {
                request = request.with_level(level);
            }
            if preview {
                print!("{}", encode(&request.content, request.level)?.to_text(2));
            }
            if app.generate_to_file(request, &output).await?.is_none() {
                bail!("nothing was rendered");
            }
            println!("wrote {}", output.display());
        }
        Command::Save { content, style } => {
            let config = style.over(&app.preferences().load_or_default().await);
            let request = app.request(content, &config);
            match app.save(&request).await? {
                SaveOutcome::Saved => println!("saved"),
                SaveOutcome::Exists => println!("exists"),
                SaveOutcome::Ignored => println!("busy"),
            }
        }
        Command::List => {
            let entries = app.library().list().await?;
            if entries.is_empty() {
                println!("no saved codes");
            }
            for (index, entry) in entries.iter().enumerate() {
                let when = entry
                    .created_at()
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                let watermark = if entry.watermark.is_empty() { "" } else { " +watermark" };
                println!(
                    "{index:>3}  {when}  {} on {}{watermark}  {}",
                    entry.dark, entry.light, entry.content
                );
            }
        }
        Command::Delete { index } => {
            let removed = app.library().delete(index).await?;
            println!("deleted {}", removed.content);
        }
        Command::Clear => {
            app.library().clear().await?;
            println!("cleared saved codes");
        }
        Command::Config(ConfigCommand::Show) => print_config(&app.preferences().load().await?),
        Command::Config(ConfigCommand::Set(style)) => {
            let config = app.preferences().update(|c| style.apply(c)).await?;
            print_config(&config);
        }
        Command::Config(ConfigCommand::Reset) => print_config(&app.preferences().reset().await?),
        Command::Config(ConfigCommand::ClearAll) => {
            app.preferences().clear_all_data().await?;
            println!("cleared all data");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose);
    tracing::debug!(?cli, "parsed arguments");
    run(cli).await
}
