//! Database abstraction used by the sqlcmd engine
//!
//! The engine only ever talks to a [`Database`] through [`Rows`]; the
//! SQL Server implementation lives in [`mssql`], tests plug in their own.

pub mod mssql;

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub use mssql::{MssqlConnector, MssqlDatabase};

/// Errors reported by a database connection
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    /// An error raised by the server while running a batch
    #[error("{}", .0.message)]
    Server(ServerError),

    #[error("Sqlcmd: Error: Failed to connect to {server}: {message}")]
    Connection { server: String, message: String },

    #[error("Sqlcmd: Error: Login timeout expired connecting to {server}")]
    LoginTimeout { server: String },

    #[error("Sqlcmd: Error: Query timeout expired")]
    QueryTimeout,

    #[error("Sqlcmd: Error: Integrated authentication is not supported; supply a user name with -U")]
    IntegratedAuthUnsupported,

    #[error("{message}")]
    Driver { message: String },
}

impl DbError {
    /// Server error details when the server raised this error
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            DbError::Server(err) => Some(err),
            _ => None,
        }
    }
}

/// Error details carried in a SQL Server error token
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServerError {
    pub number: u32,
    pub class: u8,
    pub state: u8,
    pub server: String,
    pub procedure: String,
    pub line: u32,
    pub message: String,
}

/// Everything needed to open a connection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnectTarget {
    pub host: String,
    pub instance: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub trusted: bool,
    pub trust_server_certificate: bool,
    pub login_timeout: Option<Duration>,
    pub packet_size: u32,
    pub workstation: String,
    pub application_name: String,
}

impl ConnectTarget {
    /// `host[/instance][,port]` for messages
    pub fn display_name(&self) -> String {
        let mut name = self.host.clone();
        if !self.instance.is_empty() {
            name.push('/');
            name.push_str(&self.instance);
        }
        if self.port > 0 {
            name.push_str(&format!(",{}", self.port));
        }
        name
    }
}

/// Opens database connections
pub trait Connector {
    fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn Database>, DbError>;
}

/// An open connection able to run batches
pub trait Database {
    /// Run a batch of T-SQL. `timeout` bounds the whole execution when set.
    fn query(&mut self, text: &str, timeout: Option<Duration>) -> Result<Box<dyn Rows>, DbError>;
}

/// Results of a batch: zero or more result sets plus errors and messages.
///
/// Iteration starts before the first result set; call
/// [`Rows::next_result_set`] to advance. Errors and messages taken before
/// the first advance are the ones the server sent ahead of any result set.
pub trait Rows {
    fn next_result_set(&mut self) -> bool;
    fn columns(&self) -> &[Column];
    fn next_row(&mut self) -> Option<Row>;
    /// Next error raised after the current result set, or after the last one.
    /// Call until `None`; a batch may report several.
    fn take_error(&mut self) -> Option<DbError>;
    /// Informational messages for the current result set, such as row counts
    fn take_messages(&mut self) -> Vec<String>;
}

/// SQL Server column type families that drive display widths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Bit,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Real,
    Float,
    SmallMoney,
    Money,
    Decimal,
    Date,
    Time,
    SmallDateTime,
    DateTime,
    DateTime2,
    DateTimeOffset,
    UniqueIdentifier,
    Char,
    VarChar,
    NChar,
    NVarChar,
    Text,
    NText,
    Binary,
    VarBinary,
    Image,
    Xml,
    Variant,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    /// Declared length in characters or bytes, when the driver reports one
    pub length: Option<usize>,
    /// Declared precision for decimal columns
    pub precision: Option<u8>,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            length: None,
            precision: None,
        }
    }
}

/// A single column value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Binary(Vec<u8>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", if *b { "1" } else { "0" }),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
            Value::Binary(bytes) => write!(f, "0x{}", hex::encode_upper(bytes)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }
}

#[derive(Debug, Default)]
struct ResultSet {
    columns: Vec<Column>,
    rows: VecDeque<Row>,
    messages: Vec<String>,
    errors: VecDeque<DbError>,
}

/// Fully materialized batch results.
///
/// Drivers fill this while draining the server's response, then hand it to
/// the engine as a [`Rows`]. Messages and errors belong to the result set
/// that precedes them, so they come back in the order the server sent them.
#[derive(Debug, Default)]
pub struct BufferedRows {
    sets: VecDeque<ResultSet>,
    current: Option<ResultSet>,
    leading_messages: Vec<String>,
    leading_errors: VecDeque<DbError>,
    trailing_errors: VecDeque<DbError>,
    started: bool,
}

impl BufferedRows {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new result set with the given columns
    pub fn push_result_set(&mut self, columns: Vec<Column>) {
        self.sets.push_back(ResultSet {
            columns,
            ..ResultSet::default()
        });
    }

    /// Append a row to the most recent result set
    pub fn push_row(&mut self, row: Row) {
        if let Some(set) = self.sets.back_mut() {
            set.rows.push_back(row);
        }
    }

    /// Attach a message to the most recent result set, or ahead of the first one
    pub fn push_message(&mut self, message: impl Into<String>) {
        match self.sets.back_mut() {
            Some(set) => set.messages.push(message.into()),
            None => self.leading_messages.push(message.into()),
        }
    }

    /// Record a statement error. Later result sets are still delivered.
    pub fn push_set_error(&mut self, error: DbError) {
        match self.sets.back_mut() {
            Some(set) => set.errors.push_back(error),
            None => self.leading_errors.push_back(error),
        }
    }

    /// Record an error that ended the batch after the last result set
    pub fn push_error(&mut self, error: DbError) {
        self.trailing_errors.push_back(error);
    }

    /// Number of rows in the most recent result set
    pub fn last_set_len(&self) -> usize {
        self.sets.back().map(|set| set.rows.len()).unwrap_or(0)
    }

    /// Shorthand for a single result set
    pub fn single(columns: Vec<Column>, rows: Vec<Row>) -> Self {
        let mut buffered = Self::new();
        buffered.push_result_set(columns);
        for row in rows {
            buffered.push_row(row);
        }
        buffered
    }
}

impl Rows for BufferedRows {
    fn next_result_set(&mut self) -> bool {
        self.started = true;
        self.current = self.sets.pop_front();
        self.current.is_some()
    }

    fn columns(&self) -> &[Column] {
        self.current.as_ref().map(|set| set.columns.as_slice()).unwrap_or(&[])
    }

    fn next_row(&mut self) -> Option<Row> {
        self.current.as_mut().and_then(|set| set.rows.pop_front())
    }

    fn take_error(&mut self) -> Option<DbError> {
        if !self.started {
            return self.leading_errors.pop_front();
        }
        match self.current.as_mut() {
            Some(set) => set.errors.pop_front(),
            None => self.trailing_errors.pop_front(),
        }
    }

    fn take_messages(&mut self) -> Vec<String> {
        if !self.started {
            return std::mem::take(&mut self.leading_messages);
        }
        match self.current.as_mut() {
            Some(set) => std::mem::take(&mut set.messages),
            None => Vec::new(),
        }
    }
}
