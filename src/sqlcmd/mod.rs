//! The sqlcmd session: batch scanning, commands, variables and output
//!
//! Input lines flow through [`batch::Batch`], which separates SQL text from
//! sqlcmd commands. The [`Sqlcmd`] engine dispatches each command and sends
//! finished batches to the server, rendering results with a
//! [`format::Formatter`].

pub mod batch;
pub mod commands;
pub mod console;
pub mod engine;
pub mod format;
pub mod include;
pub mod parse;
pub mod variables;

pub use batch::{Batch, ScanState};
pub use commands::{CommandMatcher, Commands, MatchedCommand, DEFAULT_BATCH_TERMINATOR};
pub use console::{LineError, LineSource, ReaderSource, ReadlineConsole};
pub use engine::{ConnectSettings, ErrorPolicy, Sqlcmd};
pub use format::{Formatter, Sink, SqlcmdFormatter};
pub use variables::Variables;

/// Line terminator written after every line of output
#[cfg(windows)]
pub const SQLCMD_EOL: &str = "\r\n";

/// Line terminator written after every line of output
#[cfg(not(windows))]
pub const SQLCMD_EOL: &str = "\n";
