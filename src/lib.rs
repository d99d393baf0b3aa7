//! rust-sqlcmd: a sqlcmd-compatible client for SQL Server
//!
//! This library scans sqlcmd scripts into T-SQL batches and meta-commands,
//! runs the batches against a server and renders the results the way the
//! classic sqlcmd tool does.

pub mod cli;
pub mod db;
pub mod error;
pub mod sqlcmd;
pub mod util;

use std::fs::File;
use std::io::{self, BufWriter, IsTerminal};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

pub use cli::Args;
pub use error::SqlcmdError;
pub use sqlcmd::Sqlcmd;

use db::MssqlConnector;
use sqlcmd::{ErrorPolicy, LineSource, ReaderSource, ReadlineConsole, SqlcmdFormatter};

/// Run a sqlcmd session for the parsed command line and return its exit code
pub fn run(args: &Args) -> Result<i32> {
    let vars = args.to_variables();
    let interactive = args.wants_console() && io::stdin().is_terminal();
    let line_source: Box<dyn LineSource> = if interactive {
        Box::new(ReadlineConsole::new()?)
    } else {
        Box::new(ReaderSource::stdin())
    };

    let runtime = Arc::new(
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?,
    );
    let connector = MssqlConnector::new(Arc::clone(&runtime));

    let mut s = Sqlcmd::new(line_source, vars, Box::new(connector));
    s.set_formatter(Box::new(SqlcmdFormatter::new(args.remove_trailing_spaces)));
    s.set_connect_settings(args.connect_settings());
    s.set_echo_input(args.echo_input);
    if args.exit_on_error {
        s.set_error_policy(ErrorPolicy::ExitOnError);
    }
    if let Some(terminator) = &args.batch_terminator {
        s.set_batch_terminator(terminator)?;
    }

    let interrupt = s.interrupt_handle();
    runtime.spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            interrupt.store(true, Ordering::SeqCst);
        }
    });

    if let Some(path) = &args.output_file {
        let file = File::create(path).map_err(|e| SqlcmdError::file(path, e))?;
        s.set_output(Some(Box::new(BufWriter::new(file))));
    }

    s.connect_db("", "", args.password.as_deref().unwrap_or_default(), false)?;
    debug!("Connected as {}", s.vars().sqlcmd_user());

    let startup = s.vars().startup_script().to_string();
    if !startup.is_empty() {
        run_file(&mut s, Path::new(&startup))?;
    }

    if s.exit_requested() {
        return Ok(finish(&mut s));
    }

    if let Some(query) = &args.query {
        s.set_query(query.as_str());
        report_run(&mut s, |s| s.run(true, false))?;
    } else {
        if let Some(query) = &args.initial_query {
            s.set_query(query.as_str());
        }
        if args.input_files.is_empty() {
            report_run(&mut s, |s| s.run(false, !interactive))?;
        } else {
            for path in &args.input_files {
                if !run_file(&mut s, path)? || s.exit_requested() {
                    break;
                }
            }
        }
    }

    Ok(finish(&mut s))
}

/// Run a script file; false when the user interrupted it
fn run_file(s: &mut Sqlcmd, path: &Path) -> Result<bool> {
    match s.include_file(path, true) {
        Ok(()) => Ok(true),
        Err(SqlcmdError::Interrupted) => {
            s.interrupt_handle().store(false, Ordering::SeqCst);
            s.write_output(&format!("{}{}", SqlcmdError::Interrupted, sqlcmd::SQLCMD_EOL))?;
            Ok(false)
        }
        Err(err @ SqlcmdError::FileError { .. }) | Err(err @ SqlcmdError::InputError { .. }) => {
            Err(err.into())
        }
        Err(err) => {
            debug!("Script {} ended with: {}", path.display(), err);
            Ok(true)
        }
    }
}

/// Errors from the run loop were already written; only input failures are fatal
fn report_run<F>(s: &mut Sqlcmd, run: F) -> Result<()>
where
    F: FnOnce(&mut Sqlcmd) -> std::result::Result<(), SqlcmdError>,
{
    match run(s) {
        Err(err @ SqlcmdError::InputError { .. }) => Err(err.into()),
        Err(err) => {
            debug!("Session ended with: {}", err);
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

fn finish(s: &mut Sqlcmd) -> i32 {
    s.set_output(None);
    s.set_error(None);
    s.exit_code
}
