//! Error types for rust-sqlcmd

use std::path::PathBuf;
use thiserror::Error;

use crate::db::DbError;

/// Errors raised while scanning input, running commands or talking to the server.
///
/// `ExitRequested`, `Interrupted` and `EndOfInput` are control-flow signals
/// rather than failures; the run loop handles them before anything is reported.
#[derive(Error, Debug)]
pub enum SqlcmdError {
    #[error("Sqlcmd: Error: Syntax error at line {line} near command '{command}'.")]
    InvalidCommand { command: String, line: u64 },

    #[error("Sqlcmd: Error: Syntax error at line {line}")]
    SyntaxError { line: u64 },

    #[error("Sqlcmd: Error: The scripting variable: '{name}' is read-only")]
    ReadOnlyVariable { name: String },

    #[error("'{name}' scripting variable not defined.")]
    UndefinedVariable { name: String },

    #[error("Sqlcmd: Error: Invalid variable identifier {name}")]
    InvalidIdentifier { name: String },

    #[error("Sqlcmd: Error: Invalid variable value {value}")]
    InvalidVariableValue { value: String },

    #[error("Sqlcmd: Error: server must be of the form [tcp]:server[[/instance]|[,port]]")]
    InvalidServerName,

    #[error("Sqlcmd: Error: Invalid batch terminator '{terminator}'")]
    InvalidBatchTerminator { terminator: String },

    #[error("Sqlcmd: Error: Error occurred while opening or operating on file {} (Reason: {source}).", path.display())]
    FileError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Sqlcmd: Error: Circular :R include detected: {} (include chain: {chain})", path.display())]
    CircularInclude { path: PathBuf, chain: String },

    #[error("Sqlcmd: Error: Failed to read input: {source}")]
    InputError {
        #[source]
        source: std::io::Error,
    },

    #[error("Sqlcmd: Error: Failed to write output: {source}")]
    OutputError {
        #[source]
        source: std::io::Error,
    },

    #[error("Sqlcmd: Error: A password is required to connect")]
    NeedPassword,

    #[error("Sqlcmd: Error: No connection to the server is open")]
    NotConnected,

    #[error(transparent)]
    Database(#[from] DbError),

    #[error("Sqlcmd: Warning: The last operation was terminated because the user pressed CTRL+C")]
    Interrupted,

    #[error("exit requested")]
    ExitRequested,

    #[error("end of input")]
    EndOfInput,
}

impl SqlcmdError {
    pub(crate) fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SqlcmdError::FileError {
            path: path.into(),
            source,
        }
    }
}
