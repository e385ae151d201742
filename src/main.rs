use anyhow::Result;
use bookbuilder::{
    cleanup, convert_all, default_output_dir, load_config, Book, BookConfig, BuildOptions,
    ChromeRenderer, OutputFormat,
};
use clap::{Args as ClapArgs, Parser, Subcommand};
use colored::*;
use serde_json::Map;
use std::path::{Path, PathBuf};
use std::process;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "bookbuilder")]
#[command(about = "CLI utility to assemble markdown and PDF sources into a single book with a table of contents")]
#[command(version = "0.1.0")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(ClapArgs, Clone)]
struct Common {
    /// Root directory containing source files (defaults to current directory)
    #[arg(short = 'r', long = "root")]
    root: Option<PathBuf>,

    /// Output directory for converted PDFs (defaults to <root>/bookbuilder-output)
    #[arg(short = 'd', long = "output-dir")]
    output_dir: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

impl Common {
    fn root(&self) -> Result<PathBuf> {
        let root = match &self.root {
            Some(root) if root.is_absolute() => root.clone(),
            Some(root) => std::env::current_dir()?.join(root),
            None => std::env::current_dir()?,
        };
        Ok(root)
    }

    fn output_dir(&self, root: &Path) -> Result<PathBuf> {
        Ok(match &self.output_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => std::env::current_dir()?.join(dir),
            None => default_output_dir(root),
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build a book from an order file (pdf, epub, docx or html)
    Build {
        #[command(flatten)]
        common: Common,

        /// Path to the order JSON file
        #[arg(short = 'o', long = "order")]
        order: PathBuf,

        /// Output filename for the book (overrides the order file)
        #[arg(short = 'O', long = "output")]
        output: Option<String>,

        /// Output format
        #[arg(short = 'F', long = "format", value_enum, default_value_t = OutputFormat::Pdf)]
        format: OutputFormat,

        /// Configuration file layered over the built-in defaults. A relative
        /// path missing from the working directory is looked up in the root
        #[arg(short = 'C', long = "config")]
        config: Option<PathBuf>,

        /// Reconvert every markdown file, ignoring cached PDFs
        #[arg(short = 'f', long = "force")]
        force: bool,

        /// Delete the output directory after building
        #[arg(short = 'c', long = "cleanup")]
        cleanup: bool,
    },
    /// Convert every markdown file under the root to PDF
    Convert {
        #[command(flatten)]
        common: Common,

        /// Reconvert every markdown file, ignoring cached PDFs
        #[arg(short = 'f', long = "force")]
        force: bool,
    },
    /// Delete the output directory (dry run unless --confirm is given)
    Cleanup {
        #[command(flatten)]
        common: Common,

        /// Actually delete instead of reporting what would be deleted
        #[arg(long = "confirm")]
        confirm: bool,
    },
}

impl Commands {
    fn quiet(&self) -> bool {
        match self {
            Commands::Build { common, .. }
            | Commands::Convert { common, .. }
            | Commands::Cleanup { common, .. } => common.quiet,
        }
    }
}

async fn build(
    common: Common,
    order: PathBuf,
    output: Option<String>,
    format: OutputFormat,
    config: Option<PathBuf>,
    force: bool,
    cleanup_after: bool,
) -> Result<()> {
    let book = Book::load(BuildOptions {
        order,
        root: common.root,
        output_dir: common.output_dir,
        output,
        format,
        config,
        force,
    })?;

    info!("Building {} ({})", book.title().green(), format.as_str().to_uppercase());
    let report = book.build(Box::new(ChromeRenderer::default())).await?;

    if cleanup_after {
        if report.output.starts_with(book.output_dir()) {
            warn!(
                "{} is inside the output directory and is removed with it",
                report.output.display()
            );
        }
        cleanup(book.output_dir(), false).await?;
    } else {
        info!(
            "Intermediate files cached in: {} (use --cleanup to delete after build)",
            book.output_dir().display().to_string().blue()
        );
    }

    info!("{}", format!("Build complete: {}", report.output.display()).green());
    Ok(())
}

async fn convert(common: Common, force: bool) -> Result<()> {
    let root = common.root()?;
    let output_dir = common.output_dir(&root)?;
    let config = BookConfig::resolve(load_config(None)?, &Map::new())?;

    let report = convert_all(
        Box::new(ChromeRenderer::default()),
        &root,
        &output_dir,
        config,
        force,
    )
    .await?;

    if report.failed > 0 {
        return Err(anyhow::anyhow!("{} file(s) failed to convert", report.failed));
    }
    Ok(())
}

async fn clean(common: Common, confirm: bool) -> Result<()> {
    let root = common.root()?;
    let output_dir = common.output_dir(&root)?;
    cleanup(&output_dir, !confirm).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Set up logging with chromiumoxide errors suppressed
    let level = if args.command.quiet() { "bookbuilder=warn" } else { "bookbuilder=info" };
    let filter = EnvFilter::from_default_env()
        .add_directive("chromiumoxide::conn=off".parse().unwrap())
        .add_directive("chromiumoxide::handler=off".parse().unwrap())
        .add_directive(level.parse().unwrap());

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let result = match args.command {
        Commands::Build { common, order, output, format, config, force, cleanup } => {
            build(common, order, output, format, config, force, cleanup).await
        }
        Commands::Convert { common, force } => convert(common, force).await,
        Commands::Cleanup { common, confirm } => clean(common, confirm).await,
    };

    if let Err(e) = result {
        error!("{}", format!("Error: {:#}", e).red());
        process::exit(1);
    }
}
