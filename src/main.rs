//! keel entry point
//!
//! Holds the process-level plumbing: logging, the instance lock, and
//! the two tasks the install runs as. The install itself and an
//! OS-signal listener execute independently; the main flow blocks on
//! whichever reports first. A signal cancels the run with a telemetry
//! record and no rollback of in-flight disk work.

use anyhow::Context;
use clap::Parser;
use keel::cli::Cli;
use keel::content::SwupdClient;
use keel::controller::{self, InstallContext};
use keel::lockfile::LockFile;
use keel::model::InstallDescription;
use keel::telemetry::{Telemetry, SEV_ERROR};
use keel::InstallerError;
use log::{info, LevelFilter};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc;
use std::thread;

/// What ended the wait: the install finishing, or a signal.
enum Outcome {
    Finished(keel::Result<()>),
    Interrupted(i32),
}

fn init_logging(path: &Path, verbose: u8) -> anyhow::Result<()> {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open log file {}", path.display()))?;

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}:{}] {}",
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();

    Ok(())
}

fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(&cli.log_file, cli.verbose)?;

    let mut desc = InstallDescription::load(&cli.config)?;
    cli.apply_overrides(&mut desc);

    if cli.validate_only {
        return match desc.validate() {
            Ok(()) => {
                println!("{}: valid install description", cli.config.display());
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                eprintln!("{}", e);
                Ok(ExitCode::FAILURE)
            }
        };
    }

    let lock = LockFile::acquire(&cli.lock_file)?;

    if cli.auto && desc.target_medias.is_empty() {
        controller::auto_plan(&mut desc, cli.destructive)?;
    }

    let root = match &cli.root {
        Some(root) => root.clone(),
        None => PathBuf::from(format!("/tmp/keel-install-{}", std::process::id())),
    };
    let mut ctx = InstallContext::new(root);
    ctx.ephemeral_root = cli.root.is_none();
    ctx.config_path = Some(cli.config.clone());
    ctx.log_path = Some(cli.log_file.clone());

    let telemetry = Telemetry::from(&desc.telemetry);
    let (tx, rx) = mpsc::channel();

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])
        .context("cannot install signal handlers")?;
    let signal_tx = tx.clone();
    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            let _ = signal_tx.send(Outcome::Interrupted(sig));
        }
    });

    let install_telemetry = telemetry.clone();
    thread::spawn(move || {
        let client = SwupdClient::new(&ctx.root, desc.swupd_mirror.as_deref());
        let result = controller::install(&mut desc, &mut ctx, &client, &install_telemetry);
        let _ = tx.send(Outcome::Finished(result));
    });

    // Completion and interruption race; take whichever lands first.
    let outcome = rx.recv().context("install flow vanished")?;
    match outcome {
        Outcome::Finished(Ok(())) => {
            drop(lock);
            if cli.reboot {
                info!("rebooting into the installed system");
                keel::cmdio::run_and_log("reboot", &["reboot"])?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Outcome::Finished(Err(e)) => {
            drop(lock);
            report_failure(&e, &cli.log_file);
            Ok(ExitCode::FAILURE)
        }
        Outcome::Interrupted(sig) => {
            telemetry.log_record("signaled", SEV_ERROR, &format!("interrupted by signal {}", sig));
            eprintln!("interrupted; the target disk may be partially written");
            drop(lock);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn report_failure(err: &InstallerError, log_file: &Path) {
    if err.is_validation() {
        eprintln!("{}", err);
    } else {
        eprintln!("installation failed: {}", err);
        eprintln!(
            "please report this problem and attach the log at {}",
            log_file.display()
        );
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
