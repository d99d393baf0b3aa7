//! sqlcmd meta-commands
//!
//! Each command is a case-insensitive regex anchored at the start of a line
//! plus the action that runs when it matches. The list order is the match
//! precedence.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::engine::{ErrorPolicy, Sqlcmd};
use super::parse::{parse_variable_value, remove_comments, split_setvar_arguments};
use super::variables::{builtin_default, is_builtin};
use super::SQLCMD_EOL;
use crate::error::SqlcmdError;

/// The function bound to a command: engine, arguments, current input line
pub type CommandAction = fn(&mut Sqlcmd, &[String], u64) -> Result<(), SqlcmdError>;

pub const DEFAULT_BATCH_TERMINATOR: &str = "GO";

static EXIT_PATTERN: LazyLock<Regex> = LazyLock::new(|| command_regex(r"^[\t ]*?:?EXIT([\( \t]+.*\)*$|$)"));
static QUIT_PATTERN: LazyLock<Regex> = LazyLock::new(|| command_regex(r"^[\t ]*?:?QUIT(?:[ \t]+(.*$)|$)"));
static GO_PATTERN: LazyLock<Regex> = LazyLock::new(|| command_regex(r"^[\t ]*?GO(?:[ ]+(.*$)|$)"));
static OUT_PATTERN: LazyLock<Regex> = LazyLock::new(|| command_regex(r"^[ \t]*:OUT(?:[ \t]+(.*$)|$)"));
static ERROR_PATTERN: LazyLock<Regex> = LazyLock::new(|| command_regex(r"^[ \t]*:ERROR(?:[ \t]+(.*$)|$)"));
static READFILE_PATTERN: LazyLock<Regex> = LazyLock::new(|| command_regex(r"^[ \t]*:R(?:[ \t]+(.*$)|$)"));
static SETVAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| command_regex(r"^[ \t]*:SETVAR(?:[ \t]+(.*$)|$)"));
static LISTVAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| command_regex(r"^[\t ]*:LISTVAR(?:[ \t]+(.*$)|$)"));
static RESET_PATTERN: LazyLock<Regex> = LazyLock::new(|| command_regex(r"^[ \t]*?:?RESET(?:[ \t]+(.*$)|$)"));
static LIST_PATTERN: LazyLock<Regex> = LazyLock::new(|| command_regex(r"^[ \t]*:LIST(?:[ \t]+(.*$)|$)"));
static ONERROR_PATTERN: LazyLock<Regex> = LazyLock::new(|| command_regex(r"^[ \t]*?:?ON ERROR(?:[ \t]+(.*$)|$)"));
static HELP_PATTERN: LazyLock<Regex> = LazyLock::new(|| command_regex(r"^[ \t]*:HELP(?:[ \t]+(.*$)|$)"));

fn command_regex(pattern: &str) -> Regex {
    Regex::new(&format!("(?im){}", pattern)).expect("built-in command pattern must compile")
}

fn terminator_regex(terminator: &str) -> Result<Regex, SqlcmdError> {
    Regex::new(&format!(
        r"(?im)^[\t ]*?{}(?:[ ]+(.*$)|$)",
        regex::escape(terminator)
    ))
    .map_err(|_| SqlcmdError::InvalidBatchTerminator {
        terminator: terminator.to_string(),
    })
}

/// A named command
pub struct Command {
    name: &'static str,
    regex: Regex,
    action: CommandAction,
}

impl Command {
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn matches(&self, line: &str) -> Option<Vec<String>> {
        let caps = self.regex.captures(line)?;
        let args: Vec<String> = (1..caps.len())
            .map(|i| caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default())
            .collect();
        Some(remove_comments(args))
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("regex", &self.regex.as_str())
            .finish()
    }
}

/// A command recognized on an input line, ready to run
#[derive(Debug, Clone)]
pub struct MatchedCommand {
    pub name: &'static str,
    pub action: CommandAction,
    pub args: Vec<String>,
}

/// Recognizes commands for the batch scanner
pub trait CommandMatcher {
    /// Match a whole line; the first matching command wins
    fn match_command(&self, line: &str) -> Option<MatchedCommand>;
}

/// The command registry of a session
#[derive(Debug)]
pub struct Commands {
    commands: Vec<Command>,
    batch_terminator: String,
}

impl Default for Commands {
    fn default() -> Self {
        Self::new()
    }
}

impl Commands {
    pub fn new() -> Self {
        let fixed = |name: &'static str, pattern: &LazyLock<Regex>, action: CommandAction| Command {
            name,
            regex: Regex::clone(pattern),
            action,
        };
        let commands = vec![
            fixed("EXIT", &EXIT_PATTERN, exit_command),
            fixed("QUIT", &QUIT_PATTERN, quit_command),
            fixed("GO", &GO_PATTERN, go_command),
            fixed("OUT", &OUT_PATTERN, out_command),
            fixed("ERROR", &ERROR_PATTERN, error_command),
            fixed("READFILE", &READFILE_PATTERN, read_file_command),
            fixed("SETVAR", &SETVAR_PATTERN, setvar_command),
            fixed("LISTVAR", &LISTVAR_PATTERN, listvar_command),
            fixed("RESET", &RESET_PATTERN, reset_command),
            fixed("LIST", &LIST_PATTERN, list_command),
            fixed("ONERROR", &ONERROR_PATTERN, on_error_command),
            fixed("HELP", &HELP_PATTERN, help_command),
        ];
        Self {
            commands,
            batch_terminator: DEFAULT_BATCH_TERMINATOR.to_string(),
        }
    }

    /// Replace the text that ends a batch. On failure the previous terminator stays.
    pub fn set_batch_terminator(&mut self, terminator: &str) -> Result<(), SqlcmdError> {
        if terminator.is_empty() || terminator.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(SqlcmdError::InvalidBatchTerminator {
                terminator: terminator.to_string(),
            });
        }
        let regex = terminator_regex(terminator)?;
        if let Some(go) = self.commands.iter_mut().find(|c| c.name == "GO") {
            go.regex = regex;
        }
        self.batch_terminator = terminator.to_string();
        debug!("Batch terminator set to '{}'", terminator);
        Ok(())
    }

    pub fn batch_terminator(&self) -> &str {
        &self.batch_terminator
    }

    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Command names in precedence order
    pub fn names(&self) -> Vec<&'static str> {
        self.commands.iter().map(|c| c.name).collect()
    }

    /// A `GO` with no arguments, as if the terminator had been typed
    pub fn go(&self) -> MatchedCommand {
        MatchedCommand {
            name: "GO",
            action: go_command,
            args: Vec::new(),
        }
    }
}

impl CommandMatcher for Commands {
    fn match_command(&self, line: &str) -> Option<MatchedCommand> {
        self.commands.iter().find_map(|cmd| {
            cmd.matches(line).map(|args| MatchedCommand {
                name: cmd.name,
                action: cmd.action,
                args,
            })
        })
    }
}

fn first_arg(args: &[String]) -> &str {
    args.first().map(|a| a.trim()).unwrap_or_default()
}

/// `EXIT`, `EXIT()` or `EXIT(query)`
fn exit_command(s: &mut Sqlcmd, args: &[String], line: u64) -> Result<(), SqlcmdError> {
    let params = first_arg(args);
    if params.is_empty() {
        return Err(SqlcmdError::ExitRequested);
    }
    if !params.starts_with('(') || !params.ends_with(')') {
        return Err(SqlcmdError::InvalidCommand {
            command: "EXIT".to_string(),
            line,
        });
    }

    let buffered = s.runnable_batch_text();
    let inner = params[1..params.len() - 1].trim().to_string();
    let inner = s.resolve_argument_variables(&inner, false)?;
    let query = [buffered.as_str(), inner.as_str()]
        .iter()
        .filter(|q| !q.trim().is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(SQLCMD_EOL);
    if !query.is_empty() {
        s.exit_code = s.run_query(&query)?;
    }
    Err(SqlcmdError::ExitRequested)
}

/// `QUIT` ends the session without running the batch
fn quit_command(_s: &mut Sqlcmd, args: &[String], line: u64) -> Result<(), SqlcmdError> {
    if !first_arg(args).is_empty() {
        return Err(SqlcmdError::InvalidCommand {
            command: "QUIT".to_string(),
            line,
        });
    }
    Err(SqlcmdError::ExitRequested)
}

/// `GO [count]` runs the batch `count` times
fn go_command(s: &mut Sqlcmd, args: &[String], line: u64) -> Result<(), SqlcmdError> {
    let invalid = || SqlcmdError::InvalidCommand {
        command: "GO".to_string(),
        line,
    };
    let mut count: i64 = 1;
    let arg = first_arg(args);
    if !arg.is_empty() {
        let arg = s.resolve_argument_variables(arg, true)?;
        count = arg.trim().parse().map_err(|_| invalid())?;
    }
    if count < 1 {
        return Err(invalid());
    }

    if s.echo_input {
        list_command(s, &[], line)?;
    }

    let one_shot = std::mem::take(&mut s.query);
    let query = if !one_shot.is_empty() {
        s.runnable_query_text(&one_shot)?
    } else {
        s.runnable_batch_text()
    };
    if query.is_empty() {
        s.reset_batch();
        return Ok(());
    }

    debug!("Running batch {} time(s)", count);
    for _ in 0..count {
        if let Err(err) = s.run_query(&query) {
            s.reset_batch();
            return Err(err);
        }
    }
    s.reset_batch();
    Ok(())
}

/// `:OUT stdout|stderr|file`
fn out_command(s: &mut Sqlcmd, args: &[String], line: u64) -> Result<(), SqlcmdError> {
    let target = redirect_target(s, args, "OUT", line)?;
    match target {
        Redirect::Stdout => s.set_output(None),
        Redirect::Stderr => s.set_output(Some(Box::new(std::io::stderr()))),
        Redirect::File(writer) => s.set_output(Some(writer)),
    }
    Ok(())
}

/// `:ERROR stdout|stderr|file`
fn error_command(s: &mut Sqlcmd, args: &[String], line: u64) -> Result<(), SqlcmdError> {
    let target = redirect_target(s, args, "ERROR", line)?;
    match target {
        Redirect::Stdout => s.set_error(Some(Box::new(std::io::stdout()))),
        Redirect::Stderr => s.set_error(None),
        Redirect::File(writer) => s.set_error(Some(writer)),
    }
    Ok(())
}

enum Redirect {
    Stdout,
    Stderr,
    File(Box<dyn Write>),
}

fn redirect_target(
    s: &mut Sqlcmd,
    args: &[String],
    command: &str,
    line: u64,
) -> Result<Redirect, SqlcmdError> {
    let arg = first_arg(args);
    if arg.is_empty() {
        return Err(SqlcmdError::InvalidCommand {
            command: command.to_string(),
            line,
        });
    }
    let target = s.resolve_argument_variables(arg, true)?;
    let target = target.trim().trim_matches('"');
    if target.eq_ignore_ascii_case("stdout") {
        return Ok(Redirect::Stdout);
    }
    if target.eq_ignore_ascii_case("stderr") {
        return Ok(Redirect::Stderr);
    }
    debug!("Redirecting {} to {}", command, target);
    let file = File::create(target).map_err(|e| SqlcmdError::file(target, e))?;
    Ok(Redirect::File(Box::new(std::io::BufWriter::new(file))))
}

/// `:R file` runs the file's contents in this session
fn read_file_command(s: &mut Sqlcmd, args: &[String], line: u64) -> Result<(), SqlcmdError> {
    let arg = first_arg(args);
    if arg.is_empty() {
        return Err(SqlcmdError::InvalidCommand {
            command: ":R".to_string(),
            line,
        });
    }
    let path = s.resolve_argument_variables(arg, false)?;
    let path = path.trim().trim_matches('"').to_string();
    s.include_file(Path::new(&path), false)
}

/// `:SETVAR name [value]`; without a value the variable is removed,
/// or restored to its default for built-in variables
fn setvar_command(s: &mut Sqlcmd, args: &[String], line: u64) -> Result<(), SqlcmdError> {
    let arg = first_arg(args);
    if arg.is_empty() {
        return Err(SqlcmdError::InvalidCommand {
            command: ":SETVAR".to_string(),
            line,
        });
    }
    let (name, raw_value) = split_setvar_arguments(arg);
    if raw_value.is_empty() {
        if is_builtin(name) {
            let default = builtin_default(name).unwrap_or_default();
            return s.vars.setvar(name, default);
        }
        if !super::variables::valid_identifier(name) {
            return Err(SqlcmdError::InvalidIdentifier {
                name: name.to_string(),
            });
        }
        s.vars.unset(name);
        return Ok(());
    }
    let value = parse_variable_value(raw_value)?;
    s.vars.setvar(name, &value)
}

/// `:LISTVAR` prints built-in variables first, then the rest sorted by name
fn listvar_command(s: &mut Sqlcmd, args: &[String], line: u64) -> Result<(), SqlcmdError> {
    if !first_arg(args).is_empty() {
        return Err(SqlcmdError::InvalidCommand {
            command: "LISTVAR".to_string(),
            line,
        });
    }
    let mut builtins: Vec<(&String, &String)> = Vec::new();
    let mut user: Vec<(&String, &String)> = Vec::new();
    for (name, value) in s.vars.all() {
        if is_builtin(name) {
            builtins.push((name, value));
        } else {
            user.push((name, value));
        }
    }
    builtins.sort();
    user.sort();
    let mut text = String::new();
    for (name, value) in builtins.into_iter().chain(user) {
        text.push_str(&format!("{} = \"{}\"{}", name, value, SQLCMD_EOL));
    }
    s.write_output(&text)
}

/// `:RESET` discards the batch
fn reset_command(s: &mut Sqlcmd, _args: &[String], _line: u64) -> Result<(), SqlcmdError> {
    s.reset_batch();
    Ok(())
}

/// `:LIST` prints the batch; an empty batch prints nothing
fn list_command(s: &mut Sqlcmd, _args: &[String], _line: u64) -> Result<(), SqlcmdError> {
    let text = s.batch_text();
    if text.is_empty() {
        return Ok(());
    }
    s.write_output(&format!("{}{}", text, SQLCMD_EOL))
}

/// `:ON ERROR exit|ignore`
fn on_error_command(s: &mut Sqlcmd, args: &[String], line: u64) -> Result<(), SqlcmdError> {
    let arg = first_arg(args);
    if arg.eq_ignore_ascii_case("exit") {
        s.error_policy = ErrorPolicy::ExitOnError;
    } else if arg.eq_ignore_ascii_case("ignore") {
        s.error_policy = ErrorPolicy::Continue;
    } else {
        return Err(SqlcmdError::InvalidCommand {
            command: "ON ERROR".to_string(),
            line,
        });
    }
    Ok(())
}

const HELP_TEXT: &[(&str, &str)] = &[
    ("GO [count]", "Run the batch count times"),
    (":EXIT[(statement)]", "Run the batch, optionally with a final statement, and quit"),
    (":QUIT", "Quit without running the batch"),
    (":ERROR <dest>", "Send error output to a file, stderr or stdout"),
    (":OUT <dest>", "Send query results to a file, stderr or stdout"),
    (":R <filename>", "Run the statements of a file"),
    (":SETVAR <var> [\"value\"]", "Set a scripting variable"),
    (":LISTVAR", "List the scripting variables"),
    (":RESET", "Discard the batch"),
    (":LIST", "Print the batch"),
    (":ON ERROR [exit|ignore]", "Choose what happens when an error occurs"),
    (":HELP", "Show this list"),
];

/// `:HELP`
fn help_command(s: &mut Sqlcmd, _args: &[String], _line: u64) -> Result<(), SqlcmdError> {
    let mut text = String::new();
    for (syntax, description) in HELP_TEXT {
        text.push_str(&format!("{:<28}{}{}", syntax, description, SQLCMD_EOL));
    }
    s.write_output(&text)
}
