//! The sqlcmd engine
//!
//! [`Sqlcmd`] owns the session state: the batch being scanned, the command
//! table, scripting variables, the open connection and the output streams.
//! [`Sqlcmd::run`] drives the read/dispatch loop until input ends or a command
//! asks to exit.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};
use url::Url;

use super::batch::{Batch, ScanState};
use super::commands::{CommandMatcher, Commands, MatchedCommand};
use super::console::{LineSource, ReaderSource};
use super::format::{Formatter, Sink, SqlcmdFormatter};
use super::include::read_script;
use super::parse::read_variable_reference;
use super::variables::{self, Variables};
use super::SQLCMD_EOL;
use crate::db::{ConnectTarget, Connector, Database, DbError, Rows};
use crate::error::SqlcmdError;
use crate::util::{current_user_name, split_server};

/// Severity at or above which `:ON ERROR EXIT` ends the session
const MIN_FATAL_SEVERITY: i32 = 11;

/// Errors raised with this state end the session with the error number as exit code
const EXIT_STATE: u8 = 127;

const RETCODE_NO_ROWS: i32 = -101;
const RETCODE_ERROR: i32 = -100;
const RETCODE_NOT_NUMERIC: i32 = -102;

/// What happens after a command or batch fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    #[default]
    Continue,
    ExitOnError,
}

/// Connection related switches that are not scripting variables
#[derive(Debug, Clone, Default)]
pub struct ConnectSettings {
    pub use_trusted_connection: bool,
    pub trust_server_certificate: bool,
    /// Never resolve `$(name)` from the process environment
    pub disable_environment_variables: bool,
    /// Leave `$(name)` text untouched
    pub disable_variable_substitution: bool,
    /// `-V`: minimum severity that sets the exit code
    pub error_severity_level: u8,
    pub application_name: String,
}

/// A sqlcmd session
pub struct Sqlcmd {
    pub(crate) batch: Batch,
    commands: Commands,
    pub(crate) vars: Variables,
    formatter: Box<dyn Formatter>,
    line_source: Box<dyn LineSource>,
    connector: Box<dyn Connector>,
    db: Option<Box<dyn Database>>,
    out: Option<Box<dyn Write>>,
    err: Option<Box<dyn Write>>,
    stdout: io::Stdout,
    stderr: io::Stderr,
    /// Query run by the next `GO` instead of the batch buffer
    pub(crate) query: String,
    pub exit_code: i32,
    connect: ConnectSettings,
    pub(crate) error_policy: ErrorPolicy,
    pub(crate) echo_input: bool,
    errors: Vec<String>,
    interrupt: Arc<AtomicBool>,
    exit_requested: bool,
    include_stack: Vec<PathBuf>,
}

impl Sqlcmd {
    pub fn new(
        line_source: Box<dyn LineSource>,
        vars: Variables,
        connector: Box<dyn Connector>,
    ) -> Self {
        Self {
            batch: Batch::new(),
            commands: Commands::new(),
            vars,
            formatter: Box::new(SqlcmdFormatter::new(false)),
            line_source,
            connector,
            db: None,
            out: None,
            err: None,
            stdout: io::stdout(),
            stderr: io::stderr(),
            query: String::new(),
            exit_code: 0,
            connect: ConnectSettings::default(),
            error_policy: ErrorPolicy::Continue,
            echo_input: false,
            errors: Vec::new(),
            interrupt: Arc::new(AtomicBool::new(false)),
            exit_requested: false,
            include_stack: Vec::new(),
        }
    }

    pub fn set_formatter(&mut self, formatter: Box<dyn Formatter>) {
        self.formatter = formatter;
    }

    pub fn set_batch_terminator(&mut self, terminator: &str) -> Result<(), SqlcmdError> {
        self.commands.set_batch_terminator(terminator)
    }

    pub fn connect_settings(&self) -> &ConnectSettings {
        &self.connect
    }

    pub fn set_connect_settings(&mut self, settings: ConnectSettings) {
        self.batch
            .set_parse_variables(!settings.disable_variable_substitution);
        self.connect = settings;
    }

    pub fn set_error_policy(&mut self, policy: ErrorPolicy) {
        self.error_policy = policy;
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        self.error_policy
    }

    /// Echo each batch before running it (`-e`)
    pub fn set_echo_input(&mut self, echo: bool) {
        self.echo_input = echo;
    }

    pub fn vars(&self) -> &Variables {
        &self.vars
    }

    pub fn vars_mut(&mut self) -> &mut Variables {
        &mut self.vars
    }

    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    /// Messages of the errors reported so far
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Run `query` at the next `GO` in place of the batch buffer
    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
    }

    /// Use an already open connection
    pub fn set_database(&mut self, db: Box<dyn Database>) {
        self.db = Some(db);
    }

    pub fn is_connected(&self) -> bool {
        self.db.is_some()
    }

    /// Flag that stops the session when set, typically from a CTRL+C handler
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Whether `EXIT`, `QUIT` or an error policy ended the session
    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    /// Redirect results; `None` restores stdout. The previous writer is flushed and closed.
    pub fn set_output(&mut self, writer: Option<Box<dyn Write>>) {
        if let Some(mut previous) = std::mem::replace(&mut self.out, writer) {
            let _ = previous.flush();
        }
    }

    /// Redirect errors; `None` restores stderr. The previous writer is flushed and closed.
    pub fn set_error(&mut self, writer: Option<Box<dyn Write>>) {
        if let Some(mut previous) = std::mem::replace(&mut self.err, writer) {
            let _ = previous.flush();
        }
    }

    pub(crate) fn write_output(&mut self, text: &str) -> Result<(), SqlcmdError> {
        let out = writer(&mut self.out, &mut self.stdout);
        out.write_all(text.as_bytes())
            .map_err(|source| SqlcmdError::OutputError { source })?;
        out.flush()
            .map_err(|source| SqlcmdError::OutputError { source })
    }

    fn write_error(&mut self, text: &str) {
        let err = writer(&mut self.err, &mut self.stderr);
        let _ = err.write_all(text.as_bytes());
        let _ = err.flush();
    }

    /// Prompt for the next interactive line
    pub fn prompt(&self) -> String {
        self.batch.prompt()
    }

    pub(crate) fn batch_text(&self) -> String {
        self.batch.text()
    }

    pub(crate) fn reset_batch(&mut self) {
        self.batch.reset(None);
    }

    /// The batch buffer with every recorded `$(name)` replaced by its value.
    ///
    /// Undefined variables are reported and left in place.
    pub(crate) fn runnable_batch_text(&mut self) -> String {
        let text = self.batch.text();
        let references = self.batch.variable_references().clone();
        self.substitute_references(&text, &references)
    }

    /// A one-shot query scanned the way typed input is, then substituted.
    ///
    /// References inside comments are left alone; a malformed reference is
    /// a syntax error.
    pub(crate) fn runnable_query_text(&mut self, query: &str) -> Result<String, SqlcmdError> {
        let mut batch = Batch::new();
        batch.set_parse_variables(!self.connect.disable_variable_substitution);
        let mut source = ReaderSource::from_text(query.to_string());
        loop {
            match batch.next(&mut source, &NoCommands) {
                Ok(_) => {}
                Err(SqlcmdError::EndOfInput) => break,
                Err(err) => return Err(err),
            }
        }
        let text = batch.text();
        let references = batch.variable_references().clone();
        Ok(self.substitute_references(&text, &references))
    }

    fn substitute_references(&mut self, text: &str, references: &BTreeMap<usize, String>) -> String {
        if self.connect.disable_variable_substitution || references.is_empty() {
            return text.to_string();
        }

        let text: Vec<char> = text.chars().collect();
        let mut result = String::with_capacity(text.len());
        let mut last = 0;
        for (&offset, name) in references {
            let end = (offset + name.chars().count() + 3).min(text.len());
            if offset < last || offset > text.len() {
                continue;
            }
            result.extend(&text[last..offset]);
            match self.resolve_variable(name) {
                Some(value) => result.push_str(&value),
                None => {
                    let err = SqlcmdError::UndefinedVariable { name: name.clone() };
                    self.report_error(&err);
                    result.extend(&text[offset..end]);
                }
            }
            last = end;
        }
        result.extend(&text[last..]);
        result
    }

    /// Substitute `$(name)` references in a command argument.
    pub(crate) fn resolve_argument_variables(
        &mut self,
        arg: &str,
        fail_on_undefined: bool,
    ) -> Result<String, SqlcmdError> {
        if self.connect.disable_variable_substitution || !arg.contains("$(") {
            return Ok(arg.to_string());
        }

        let chars: Vec<char> = arg.chars().collect();
        let mut result = String::with_capacity(arg.len());
        let mut i = 0;
        while i < chars.len() {
            if chars[i] == '$' && chars.get(i + 1) == Some(&'(') {
                if let Some(close) = read_variable_reference(&chars, i + 2) {
                    let name: String = chars[i + 2..close].iter().collect();
                    match self.resolve_variable(&name) {
                        Some(value) => result.push_str(&value),
                        None if fail_on_undefined => {
                            return Err(SqlcmdError::UndefinedVariable { name });
                        }
                        None => {
                            self.report_error(&SqlcmdError::UndefinedVariable { name });
                            result.extend(&chars[i..=close]);
                        }
                    }
                    i = close + 1;
                    continue;
                }
            }
            result.push(chars[i]);
            i += 1;
        }
        Ok(result)
    }

    fn resolve_variable(&self, name: &str) -> Option<String> {
        if let Some(value) = self.vars.get(name) {
            return Some(value.to_string());
        }
        if self.connect.disable_environment_variables {
            return None;
        }
        std::env::var(name).ok()
    }

    /// URL form of the current connection settings, for display and logging
    pub fn connection_string(&self) -> Result<String, SqlcmdError> {
        let (host, instance, port) = self.vars.sqlcmd_server()?;
        let host = if host.is_empty() { "." } else { host.as_str() };
        let mut url = Url::parse(&format!("sqlserver://{}", host))
            .map_err(|_| SqlcmdError::InvalidServerName)?;

        if !self.uses_trusted_connection() {
            url.set_username(self.vars.sqlcmd_user())
                .map_err(|_| SqlcmdError::InvalidServerName)?;
            url.set_password(Some(self.vars.password()))
                .map_err(|_| SqlcmdError::InvalidServerName)?;
        }
        if port > 0 {
            url.set_port(Some(port))
                .map_err(|_| SqlcmdError::InvalidServerName)?;
        }
        if !instance.is_empty() {
            url.set_path(&format!("/{}", instance));
        }

        let database = self.vars.sqlcmd_database();
        if !database.is_empty() || self.connect.trust_server_certificate {
            let mut query = url.query_pairs_mut();
            if !database.is_empty() {
                query.append_pair("database", database);
            }
            if self.connect.trust_server_certificate {
                query.append_pair("trustservercertificate", "true");
            }
        }
        Ok(url.to_string())
    }

    fn uses_trusted_connection(&self) -> bool {
        self.connect.use_trusted_connection
            || (self.vars.sqlcmd_user().is_empty() && !self.vars.use_aad())
    }

    /// Open a connection, replacing the current one on success.
    ///
    /// Empty arguments fall back to the scripting variables. A SQL login
    /// without a password prompts for one unless `nopw` is set.
    pub fn connect_db(
        &mut self,
        server: &str,
        user: &str,
        password: &str,
        nopw: bool,
    ) -> Result<(), SqlcmdError> {
        let (host, instance, port) = if server.is_empty() {
            self.vars.sqlcmd_server()?
        } else {
            split_server(server)?
        };

        let trusted = user.is_empty() && self.uses_trusted_connection();
        let user_name = if user.is_empty() {
            self.vars.sqlcmd_user().to_string()
        } else {
            user.to_string()
        };
        let mut secret = if password.is_empty() {
            self.vars.password().to_string()
        } else {
            password.to_string()
        };
        if !trusted && !user_name.is_empty() && secret.is_empty() && !nopw {
            secret = self
                .line_source
                .read_password("Password: ")
                .ok_or(SqlcmdError::NeedPassword)?;
        }

        let login_timeout = match self.vars.login_timeout_seconds() {
            secs if secs > 0 => Some(Duration::from_secs(secs as u64)),
            _ => None,
        };
        let target = ConnectTarget {
            host,
            instance,
            port,
            user: if trusted { String::new() } else { user_name },
            password: if trusted { String::new() } else { secret },
            database: self.vars.sqlcmd_database().to_string(),
            trusted,
            trust_server_certificate: self.connect.trust_server_certificate,
            login_timeout,
            packet_size: u32::try_from(self.vars.packet_size()).unwrap_or(4096),
            workstation: self.vars.workstation().to_string(),
            application_name: self.connect.application_name.clone(),
        };

        debug!("Connecting to {}", target.display_name());
        let db = self.connector.connect(&target)?;
        self.db = Some(db);

        if !server.is_empty() {
            self.vars.set(variables::SQLCMDSERVER, server);
        }
        if !user.is_empty() {
            self.vars.set(variables::SQLCMDUSER, user);
            self.connect.use_trusted_connection = false;
            if !password.is_empty() {
                self.vars.set(variables::SQLCMDPASSWORD, password);
            }
        } else if self.vars.sqlcmd_user().is_empty() {
            self.connect.use_trusted_connection = true;
            self.vars.set(variables::SQLCMDUSER, &current_user_name());
        }
        if !target.database.is_empty() {
            self.vars.set(variables::SQLCMDDBNAME, &target.database);
        }
        self.batch.set_batch_line(1);
        Ok(())
    }

    /// Send `query` to the server and render its results.
    ///
    /// Returns the value of the first column of the last row when it is an
    /// integer, 0 when that column is empty, -102 when it is not numeric,
    /// -101 when no rows came back and -100 when the server reported an error.
    pub fn run_query(&mut self, query: &str) -> Result<i32, SqlcmdError> {
        let timeout = match self.vars.query_timeout_seconds() {
            secs if secs > 0 => Some(Duration::from_secs(secs as u64)),
            _ => None,
        };

        let mut retcode = RETCODE_NO_ROWS;
        let mut failures = Vec::new();
        {
            let Sqlcmd {
                db,
                formatter,
                vars,
                out,
                err,
                stdout,
                stderr,
                ..
            } = self;
            let db = db.as_mut().ok_or(SqlcmdError::NotConnected)?;
            let mut sink = Sink {
                out: writer(out, stdout),
                err: writer(err, stderr),
                vars,
            };

            trace!("Running query: {}", query);
            formatter.begin_batch(query, &mut sink);
            match db.query(query, timeout) {
                Err(error) => {
                    formatter.add_error(&error, &mut sink);
                    retcode = RETCODE_ERROR;
                    failures.push(error);
                }
                Ok(mut rows) => {
                    let rows = rows.as_mut();
                    let formatter = formatter.as_mut();
                    if report_pending(rows, formatter, &mut sink, &mut failures) {
                        retcode = RETCODE_ERROR;
                    }
                    while rows.next_result_set() {
                        let columns = rows.columns().to_vec();
                        formatter.begin_result_set(&columns, &mut sink);
                        let mut first_column = None;
                        while let Some(row) = rows.next_row() {
                            first_column = Some(formatter.add_row(&row, &mut sink));
                        }
                        formatter.end_result_set(&mut sink);
                        if let Some(text) = first_column {
                            retcode = return_code(&text);
                        }
                        if report_pending(rows, formatter, &mut sink, &mut failures) {
                            retcode = RETCODE_ERROR;
                        }
                    }
                    if report_pending(rows, formatter, &mut sink, &mut failures) {
                        retcode = RETCODE_ERROR;
                    }
                }
            }
            formatter.end_batch(&mut sink);
            let _ = sink.out.flush();
            let _ = sink.err.flush();
        }

        for failure in &failures {
            self.handle_error(failure, &mut retcode)?;
        }
        Ok(retcode)
    }

    fn handle_error(&mut self, error: &DbError, retcode: &mut i32) -> Result<(), SqlcmdError> {
        let (number, class, state) = error
            .server_error()
            .map(|e| (e.number as i32, e.class as i32, e.state))
            .unwrap_or((0, MIN_FATAL_SEVERITY, 0));

        if state == EXIT_STATE {
            *retcode = number;
            self.exit_code = number;
            self.exit_requested = true;
            return Err(SqlcmdError::ExitRequested);
        }

        let min_severity = match self.connect.error_severity_level {
            0 => MIN_FATAL_SEVERITY,
            level => level as i32,
        };
        if self.error_policy == ErrorPolicy::ExitOnError && class >= min_severity {
            self.exit_code = if self.connect.error_severity_level > 0 {
                class
            } else {
                1
            };
            self.exit_requested = true;
            return Err(SqlcmdError::ExitRequested);
        }
        Ok(())
    }

    /// Write `err` to the error stream and remember it
    fn report_error(&mut self, err: &SqlcmdError) {
        debug!("Reporting error: {}", err);
        let message = err.to_string();
        self.write_error(&format!("{}{}", message, SQLCMD_EOL));
        self.errors.push(message);
    }

    fn report_interrupt(&mut self) {
        let notice = format!("{}{}", SqlcmdError::Interrupted, SQLCMD_EOL);
        let _ = self.write_output(&notice);
    }

    fn close_writers(&mut self) {
        self.set_output(None);
        self.set_error(None);
    }

    /// Read and dispatch input until it ends or a command asks to stop.
    ///
    /// With `once`, stop after the first command. With `process_all`, text
    /// left in the batch at end of input runs as if followed by `GO`.
    /// Returns the last error reported, if any.
    pub fn run(&mut self, once: bool, process_all: bool) -> Result<(), SqlcmdError> {
        let mut once = once;
        let mut last_error = None;
        loop {
            if self.interrupt.load(Ordering::SeqCst) {
                if !self.include_stack.is_empty() {
                    return Err(SqlcmdError::Interrupted);
                }
                self.interrupt.store(false, Ordering::SeqCst);
                self.report_interrupt();
                return Ok(());
            }
            if self.line_source.is_interactive() {
                let prompt = self.prompt();
                self.line_source.set_prompt(&prompt);
            }

            let next = if !self.query.is_empty() {
                Ok(Some(self.commands.go()))
            } else {
                self.batch
                    .next(self.line_source.as_mut(), &self.commands)
            };
            let command = match next {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(SqlcmdError::Interrupted) => {
                    self.interrupt.store(true, Ordering::SeqCst);
                    continue;
                }
                Err(SqlcmdError::EndOfInput) => {
                    if self.batch.is_empty() || !process_all {
                        break;
                    }
                    if let ScanState::InString(_) = self.batch.scan_state() {
                        let err = SqlcmdError::SyntaxError {
                            line: self.batch.line_count(),
                        };
                        self.report_error(&err);
                        self.batch.reset(None);
                        if self.error_policy == ErrorPolicy::ExitOnError {
                            self.stop_on_error();
                        }
                        last_error = Some(err);
                        break;
                    }
                    once = true;
                    self.commands.go()
                }
                Err(err @ SqlcmdError::InputError { .. }) => return Err(err),
                Err(err) => {
                    self.report_error(&err);
                    let stop = self.error_policy == ErrorPolicy::ExitOnError;
                    last_error = Some(err);
                    if stop {
                        self.stop_on_error();
                        break;
                    }
                    continue;
                }
            };

            let line = self.batch.line_count();
            trace!("Dispatching {} at line {}", command.name, line);
            match (command.action)(self, &command.args, line) {
                Ok(()) => {
                    if once || self.exit_requested {
                        self.finish();
                        break;
                    }
                }
                Err(SqlcmdError::ExitRequested) => {
                    self.exit_requested = true;
                    self.finish();
                    break;
                }
                Err(SqlcmdError::Interrupted) => {
                    self.interrupt.store(true, Ordering::SeqCst);
                }
                Err(err @ SqlcmdError::InputError { .. }) => return Err(err),
                Err(err) => {
                    self.report_error(&err);
                    let stop = self.error_policy == ErrorPolicy::ExitOnError;
                    last_error = Some(err);
                    if stop {
                        self.stop_on_error();
                        break;
                    }
                    if once {
                        self.finish();
                        break;
                    }
                }
            }
        }

        match last_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn stop_on_error(&mut self) {
        if self.exit_code == 0 {
            self.exit_code = 1;
        }
        self.exit_requested = true;
        self.finish();
    }

    /// Close redirected streams unless this run is nested in `:R`
    fn finish(&mut self) {
        if self.include_stack.is_empty() {
            self.close_writers();
        }
    }

    /// Run the commands in a script file through the current session.
    ///
    /// The batch buffer is shared, so text left unterminated at the end of the
    /// file stays pending unless `process_all` is set.
    pub fn include_file(&mut self, path: &Path, process_all: bool) -> Result<(), SqlcmdError> {
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if self.include_stack.contains(&key) {
            let chain = self
                .include_stack
                .iter()
                .chain(std::iter::once(&key))
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(SqlcmdError::CircularInclude {
                path: path.to_path_buf(),
                chain,
            });
        }

        let text = read_script(path)?;
        debug!("Including {}", path.display());
        let source: Box<dyn LineSource> = Box::new(ReaderSource::from_text(text));
        let previous = std::mem::replace(&mut self.line_source, source);
        self.include_stack.push(key);
        let result = self.run(false, process_all);
        self.include_stack.pop();
        self.line_source = previous;

        match result {
            Err(err @ SqlcmdError::Interrupted) | Err(err @ SqlcmdError::InputError { .. }) => {
                Err(err)
            }
            // errors inside the file were reported as they happened
            _ => {
                if self.exit_requested && self.include_stack.is_empty() {
                    self.close_writers();
                }
                Ok(())
            }
        }
    }
}

/// Matches nothing, so every line is scanned as SQL text
struct NoCommands;

impl CommandMatcher for NoCommands {
    fn match_command(&self, _line: &str) -> Option<MatchedCommand> {
        None
    }
}

fn writer<'a>(
    redirect: &'a mut Option<Box<dyn Write>>,
    default: &'a mut dyn Write,
) -> &'a mut dyn Write {
    match redirect {
        Some(w) => w.as_mut(),
        None => default,
    }
}

/// Hand the messages and errors queued at the current position to the
/// formatter. Returns whether any error was reported.
fn report_pending(
    rows: &mut dyn Rows,
    formatter: &mut dyn Formatter,
    sink: &mut Sink<'_>,
    failures: &mut Vec<DbError>,
) -> bool {
    for message in rows.take_messages() {
        formatter.add_message(&message, sink);
    }
    let mut failed = false;
    while let Some(error) = rows.take_error() {
        formatter.add_error(&error, sink);
        failures.push(error);
        failed = true;
    }
    failed
}

fn return_code(first_column: &str) -> i32 {
    let text = first_column.trim();
    if text.is_empty() {
        0
    } else {
        text.parse().unwrap_or(RETCODE_NOT_NUMERIC)
    }
}
