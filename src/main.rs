mod commands;
mod config;
mod db;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use forgetasks::{Connection, HttpTransport};

#[derive(Parser, Debug)]
#[command(name = "forgetasks")]
#[command(about = "Command-line access to project hosting sites without an API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/forgetasks/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Project to work on
  #[arg(short, long)]
  project: Option<String>,

  /// Log debug output
  #[arg(short, long)]
  verbose: bool,

  /// Print JSON where a command supports it
  #[arg(long)]
  json: bool,

  /// Command to run (see `forgetasks help`)
  command: String,

  /// Command arguments
  #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
  args: Vec<String>,
}

/// Set up logging. FORGETASKS_LOG takes precedence over `-v`.
fn init_logging(verbose: bool, file: Option<&PathBuf>) -> Result<Option<WorkerGuard>> {
  let default = if verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_env("FORGETASKS_LOG").unwrap_or_else(|_| EnvFilter::new(default));

  match file {
    Some(path) => {
      let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("log.file {} has no file name", path.display()))?;
      std::fs::create_dir_all(&directory)?;

      let appender = tracing_appender::rolling::never(directory, file_name);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      Ok(None)
    }
  }
}

fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let mut stdout = std::io::stdout().lock();

  if commands::find(&args.command).is_some_and(|cmd| cmd.name == "help") {
    return commands::print_help(&mut stdout);
  }

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = init_logging(args.verbose, config.log.file.as_ref())?;

  let password = config::Config::get_password().ok();
  let mut transport = HttpTransport::new(config.timeout())?;
  if let (Some(user), Some(password)) = (config.site.username.as_deref(), password.as_deref()) {
    transport = transport.with_credentials(user, password);
  }

  let connection = Connection::new(
    transport,
    config.site.url.clone(),
    config.project_settings(),
    config.site.username.clone(),
  );

  // `login` always talks to the site; everything else reuses a known-good password.
  if args.command != "login" && connection.username().is_some() {
    if let Some(password) = password.as_deref() {
      let store = db::CredentialStore::open()?;
      commands::authenticate(&connection, &store, password)?;
    }
  }

  let mut ctx = commands::Context {
    connection: &connection,
    project: args.project.or(config.default_project),
    password,
    json: args.json,
    out: &mut stdout,
  };
  commands::dispatch(&mut ctx, &args.command, &args.args)?;
  stdout.flush()?;

  Ok(())
}
