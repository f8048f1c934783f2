use std::path::{Path, PathBuf};

use clap::Parser;
use toolmat_jsonl::{convert, load_config, ConvertConfig, ConvertError, Settings, DEFAULT_CONFIG};

#[derive(Parser)]
#[command(
    name = "toolmat2jsonl",
    version,
    about = "Convert paired tool material OCR pages into one JSON object per material"
)]
struct Cli {
    /// Directory holding 001.txt, 002.txt, ... (default: ocr)
    #[arg(short, long)]
    input: Option<PathBuf>,
    /// Output JSONL file (default: tool_materials.jsonl)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// YAML config file (default: toolmat.yaml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Write the output in place instead of via temp file + rename.
    /// A failed run then leaves a partial file behind.
    #[arg(long)]
    no_atomic: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let settings = match resolve_settings(&cli) {
        Ok(s) => s,
        Err(e) => fail("load_config", &e),
    };

    match convert(&settings) {
        Ok(summary) => {
            tracing::info!(tool = "convert", records = summary.records, output = %summary.output, "done");
            println!("{}", serde_json::json!(summary));
        }
        Err(e) => fail("convert", &e),
    }
}

/// CLI flags win over the config file, which wins over built-in defaults.
fn resolve_settings(cli: &Cli) -> Result<Settings, ConvertError> {
    let config_path = cli.config.clone().or_else(|| {
        let default = Path::new(DEFAULT_CONFIG);
        default.is_file().then(|| default.to_path_buf())
    });
    let cfg = match config_path {
        Some(path) => {
            let cfg = load_config(&path)?;
            tracing::info!(tool = "load_config", file = %path.display(), status = "ok");
            cfg
        }
        None => ConvertConfig::default(),
    };

    Ok(Settings {
        input_dir: cli.input.clone().unwrap_or_else(|| PathBuf::from(cfg.input_dir())),
        output: cli.output.clone().unwrap_or_else(|| PathBuf::from(cfg.output())),
        atomic: !cli.no_atomic && cfg.atomic(),
        layout: cfg.layout,
    })
}

fn fail(tool: &str, e: &ConvertError) -> ! {
    tracing::error!(tool, error = %e);
    eprintln!("{}", serde_json::json!({ "tool": tool, "error": e.to_string(), "error_code": e.exit_code() }));
    std::process::exit(e.exit_code());
}
