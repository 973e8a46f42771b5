//! Dry-run preview of a configuration file.
//!
//! Compiles the file and prints the operations as JSON without talking to
//! any driver. Reads standard input when the file is `-`.
//!
//! ```bash
//! devconf-preview site.conf
//! ```

use std::env;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use devconf::EngineConfig;

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("devconf-preview: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => EngineConfig::default(),
    };
    if let Ok(level) = config.log_level(None) {
        devconf::config::init_logging(level);
    }

    let Some(file) = args.file else {
        Args::print_help();
        return ExitCode::FAILURE;
    };

    let text = if file.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text).map(|_| text)
    } else {
        std::fs::read_to_string(&file)
    };
    let text = match text {
        Ok(text) => text,
        Err(e) => {
            eprintln!("devconf-preview: {}: {e}", file.display());
            return ExitCode::FAILURE;
        }
    };

    match devconf::compiler::marshalled(&text) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("devconf-preview: {}: {e}", file.display());
            ExitCode::FAILURE
        }
    }
}

struct Args {
    config: Option<PathBuf>,
    file: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut config = None;
        let mut file = None;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" | "-c" => {
                    i += 1;
                    if i < args.len() {
                        config = Some(PathBuf::from(&args[i]));
                    }
                }
                "--help" | "-h" => {
                    Self::print_help();
                    std::process::exit(0);
                }
                other if file.is_none() => file = Some(PathBuf::from(other)),
                other => eprintln!("Unknown argument: {other}"),
            }
            i += 1;
        }

        Self { config, file }
    }

    fn print_help() {
        println!(
            r#"devconf-preview

USAGE:
    devconf-preview [OPTIONS] <FILE>

ARGS:
    <FILE>                    Configuration file, or - for stdin

OPTIONS:
    -c, --config <PATH>       Engine config file (TOML), for log settings
    -h, --help                Print this help message
"#
        );
    }
}
