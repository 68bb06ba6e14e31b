//! ext-server - serve an extensions directory on a loopback port
//!
//! Usage:
//!   ext-server --root <dir> [--prefix <name>] [--port <n>] [--log-dir <dir>]
//!
//! The server prints the base URL once it is listening and runs until
//! interrupted with Ctrl+C.

use std::path::PathBuf;

use anyhow::Context;
use ext_server::extensions::{ExtServerConfig, ExtensionFileServer, DEFAULT_MOUNT_PREFIX};
use ext_server::logging::{init_logging, LogFormat, LogOutput, LoggingConfig};

/// Command line arguments
#[derive(Debug)]
struct Args {
    /// Directory to serve
    root: PathBuf,
    /// Mount prefix in request URLs
    prefix: String,
    /// Port to bind to (0 = ephemeral)
    port: u16,
    /// Emit JSON logs
    json_logs: bool,
    /// Enable verbose logging
    verbose: bool,
    /// Also write rolling log files here
    log_dir: Option<PathBuf>,
}

/// What the command line asked for
#[derive(Debug)]
enum Command {
    Serve(Args),
    Help,
}

impl Args {
    fn parse() -> Result<Command, String> {
        Self::parse_from(std::env::args().skip(1))
    }

    fn parse_from(mut args: impl Iterator<Item = String>) -> Result<Command, String> {
        let mut root = None;
        let mut prefix = DEFAULT_MOUNT_PREFIX.to_string();
        let mut port = 0u16;
        let mut json_logs = false;
        let mut verbose = false;
        let mut log_dir = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--root" | "-r" => {
                    root = Some(PathBuf::from(args.next().ok_or("--root requires a value")?));
                }
                "--prefix" | "-p" => {
                    prefix = args.next().ok_or("--prefix requires a value")?;
                }
                "--port" => {
                    let val = args.next().ok_or("--port requires a value")?;
                    port = val.parse().map_err(|_| format!("Invalid port value: {}", val))?;
                }
                "--log-dir" => {
                    log_dir = Some(PathBuf::from(args.next().ok_or("--log-dir requires a value")?));
                }
                "--json-logs" => {
                    json_logs = true;
                }
                "--verbose" | "-v" => {
                    verbose = true;
                }
                "--help" | "-h" => {
                    return Ok(Command::Help);
                }
                _ => {
                    return Err(format!("Unknown argument: {}", arg));
                }
            }
        }

        let root = root.ok_or("--root is required")?;

        Ok(Command::Serve(Self {
            root,
            prefix,
            port,
            json_logs,
            verbose,
            log_dir,
        }))
    }

    /// Logging configuration selected by the flags
    fn logging_config(&self) -> LoggingConfig {
        let mut config = if self.verbose {
            LoggingConfig::development()
        } else {
            LoggingConfig::new()
        };

        if self.json_logs {
            config = config.with_format(LogFormat::Json);
        }

        if let Some(dir) = &self.log_dir {
            config = config
                .with_output(LogOutput::Both)
                .with_log_directory(dir.clone());
        }

        config
    }
}

fn print_help() {
    println!(
        r#"ext-server - Sandboxed extension file server

USAGE:
    ext-server [OPTIONS] --root <DIR>

OPTIONS:
    -r, --root <DIR>         Extensions directory to serve (required, must exist)
    -p, --prefix <NAME>      URL mount prefix (default: Extensions)
        --port <N>           Loopback port to bind (default: 0, OS-assigned)
        --log-dir <DIR>      Also write daily rolling log files to DIR
        --json-logs          Emit structured JSON logs
    -v, --verbose            Enable debug logging with thread and source info
    -h, --help               Print this help message

DESCRIPTION:
    Serves GET <prefix>/<path> from the extensions directory on 127.0.0.1.
    Requests that try to leave the directory are answered with 500,
    missing files with 404.
"#
    );
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = ExtServerConfig::with_root(args.root)
        .with_mount_prefix(args.prefix)
        .with_port(args.port);
    let server = ExtensionFileServer::with_config(config);

    let handle = server
        .start(|addr| println!("http://{}/", addr))
        .await
        .context("failed to start extension server")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    handle.stop().await.context("extension server failed")?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = match Args::parse() {
        Ok(Command::Serve(args)) => args,
        Ok(Command::Help) => {
            print_help();
            return;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    let _logging = match init_logging(args.logging_config()) {
        Ok(system) => system,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(args).await {
        tracing::error!("ext-server failed: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ext_server::logging::LogLevel;

    fn parse(args: &[&str]) -> Result<Command, String> {
        Args::parse_from(args.iter().map(|a| a.to_string()))
    }

    fn serve(args: &[&str]) -> Args {
        match parse(args) {
            Ok(Command::Serve(args)) => args,
            other => panic!("expected serve arguments, got {:?}", other),
        }
    }

    #[test]
    fn test_defaults_with_root_only() {
        let args = serve(&["--root", "/srv/ext"]);
        assert_eq!(args.root, PathBuf::from("/srv/ext"));
        assert_eq!(args.prefix, DEFAULT_MOUNT_PREFIX);
        assert_eq!(args.port, 0);
        assert!(!args.json_logs);
        assert!(!args.verbose);
        assert!(args.log_dir.is_none());
    }

    #[test]
    fn test_all_flags() {
        let args = serve(&[
            "-r", "/srv/ext", "-p", "assets", "--port", "8123", "--json-logs", "-v", "--log-dir", "/var/log/ext",
        ]);
        assert_eq!(args.prefix, "assets");
        assert_eq!(args.port, 8123);
        assert!(args.json_logs);
        assert!(args.verbose);
        assert_eq!(args.log_dir, Some(PathBuf::from("/var/log/ext")));
    }

    #[test]
    fn test_missing_values_are_errors() {
        assert_eq!(parse(&["--root"]).unwrap_err(), "--root requires a value");
        assert_eq!(parse(&["--root", "/srv/ext", "--port"]).unwrap_err(), "--port requires a value");
        assert_eq!(parse(&["--root", "/srv/ext", "--prefix"]).unwrap_err(), "--prefix requires a value");
        assert_eq!(parse(&["--root", "/srv/ext", "--log-dir"]).unwrap_err(), "--log-dir requires a value");
    }

    #[test]
    fn test_root_is_required() {
        assert_eq!(parse(&["--port", "80"]).unwrap_err(), "--root is required");
        assert_eq!(parse(&[]).unwrap_err(), "--root is required");
    }

    #[test]
    fn test_invalid_port_and_unknown_argument() {
        assert!(parse(&["--root", "/srv/ext", "--port", "http"]).unwrap_err().contains("Invalid port"));
        assert!(parse(&["--root", "/srv/ext", "--port", "70000"]).is_err());
        assert_eq!(parse(&["--bogus"]).unwrap_err(), "Unknown argument: --bogus");
    }

    #[test]
    fn test_help_short_circuits() {
        assert!(matches!(parse(&["--help"]), Ok(Command::Help)));
        assert!(matches!(parse(&["-h", "--bogus"]), Ok(Command::Help)));
    }

    #[test]
    fn test_logging_config_follows_flags() {
        let quiet = serve(&["--root", "/srv/ext"]).logging_config();
        assert_eq!(quiet.level, LogLevel::Info);
        assert_eq!(quiet.format, LogFormat::Text);
        assert_eq!(quiet.output, LogOutput::Console);

        let verbose = serve(&["--root", "/srv/ext", "-v", "--json-logs", "--log-dir", "/var/log/ext"]).logging_config();
        assert_eq!(verbose.level, LogLevel::Debug);
        assert!(verbose.include_file_info);
        assert_eq!(verbose.format, LogFormat::Json);
        assert_eq!(verbose.output, LogOutput::Both);
        assert_eq!(verbose.log_directory, Some(PathBuf::from("/var/log/ext")));
    }
}
