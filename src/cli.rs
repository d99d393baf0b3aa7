//! Command line arguments
//!
//! The legacy sqlcmd switches. `-h` sets the header interval and `-V` the
//! error severity level, so help and version are long options only.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::sqlcmd::variables::{self, Variables};
use crate::sqlcmd::ConnectSettings;

#[derive(Parser, Debug, Default)]
#[command(name = "rust-sqlcmd")]
#[command(author, version, about = "Run T-SQL statements and scripts against SQL Server")]
#[command(disable_help_flag = true, disable_version_flag = true)]
pub struct Args {
    /// Server to connect to: [tcp:]server[\instance|/instance][,port]
    #[arg(short = 'S')]
    pub server: Option<String>,

    /// SQL login name
    #[arg(short = 'U')]
    pub user: Option<String>,

    /// Password for the SQL login
    #[arg(short = 'P')]
    pub password: Option<String>,

    /// Database to use after connecting
    #[arg(short = 'd')]
    pub database: Option<String>,

    /// Use a trusted connection instead of a SQL login
    #[arg(short = 'E')]
    pub trusted: bool,

    /// Trust the server certificate without validation
    #[arg(short = 'C')]
    pub trust_server_certificate: bool,

    /// Run a query and exit
    #[arg(short = 'Q', conflicts_with = "initial_query")]
    pub query: Option<String>,

    /// Run a query at startup, then keep reading input
    #[arg(short = 'q')]
    pub initial_query: Option<String>,

    /// Script files to run, in order
    #[arg(short = 'i', value_delimiter = ',', num_args = 1..)]
    pub input_files: Vec<PathBuf>,

    /// Write results to this file
    #[arg(short = 'o')]
    pub output_file: Option<PathBuf>,

    /// Batch terminator to use instead of GO
    #[arg(short = 'c')]
    pub batch_terminator: Option<String>,

    /// Scripting variables as name=value pairs
    #[arg(short = 'v', value_parser = parse_variable, num_args = 1..)]
    pub variables: Vec<(String, String)>,

    /// Login timeout in seconds
    #[arg(short = 'l')]
    pub login_timeout: Option<u32>,

    /// Network packet size
    #[arg(short = 'a')]
    pub packet_size: Option<u32>,

    /// Workstation name sent to the server
    #[arg(short = 'H')]
    pub workstation: Option<String>,

    /// Rows between column headings; -1 prints none
    #[arg(short = 'h', allow_negative_numbers = true)]
    pub headers: Option<i64>,

    /// Column separator
    #[arg(short = 's')]
    pub column_separator: Option<String>,

    /// Screen width for output
    #[arg(short = 'w')]
    pub screen_width: Option<u32>,

    /// Display width limit for variable length types
    #[arg(short = 'y')]
    pub max_var_type_width: Option<u32>,

    /// Display width limit for fixed length types
    #[arg(short = 'Y')]
    pub max_fixed_type_width: Option<u32>,

    /// Minimum severity of errors that are printed
    #[arg(short = 'm', allow_negative_numbers = true)]
    pub error_level: Option<i32>,

    /// Exit when an error occurs
    #[arg(short = 'b')]
    pub exit_on_error: bool,

    /// Minimum severity that sets the exit code
    #[arg(short = 'V')]
    pub error_severity_level: Option<u8>,

    /// Do not substitute scripting variables
    #[arg(short = 'x')]
    pub disable_variable_substitution: bool,

    /// Query timeout in seconds
    #[arg(short = 't')]
    pub query_timeout: Option<u32>,

    /// Remove trailing spaces from output columns
    #[arg(short = 'W')]
    pub remove_trailing_spaces: bool,

    /// Echo each batch before running it
    #[arg(short = 'e')]
    pub echo_input: bool,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    pub help: Option<bool>,

    /// Print version
    #[arg(long, action = ArgAction::Version)]
    pub version: Option<bool>,
}

fn parse_variable(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("'{}' is not of the form name=value", s))?;
    let name = name.trim();
    if !variables::valid_identifier(name) {
        return Err(format!("Invalid variable identifier {}", name));
    }
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    Ok((name.to_string(), value.to_string()))
}

impl Args {
    /// Scripting variables seeded from the environment, then the switches
    pub fn to_variables(&self) -> Variables {
        let mut vars = Variables::from_environment();
        self.apply_to(&mut vars);
        vars
    }

    /// Copy switch values into `vars`. Switches that were not given leave
    /// the current values alone.
    pub fn apply_to(&self, vars: &mut Variables) {
        let mut set = |name: &str, value: Option<String>| {
            if let Some(value) = value {
                vars.set(name, &value);
            }
        };
        set(variables::SQLCMDSERVER, self.server.clone());
        set(variables::SQLCMDDBNAME, self.database.clone());
        if !self.trusted {
            set(variables::SQLCMDUSER, self.user.clone());
        }
        set(
            variables::SQLCMDLOGINTIMEOUT,
            self.login_timeout.map(|v| v.to_string()),
        );
        set(
            variables::SQLCMDSTATTIMEOUT,
            self.query_timeout.map(|v| v.to_string()),
        );
        set(
            variables::SQLCMDPACKETSIZE,
            self.packet_size.map(|v| v.to_string()),
        );
        set(variables::SQLCMDWORKSTATION, self.workstation.clone());
        set(variables::SQLCMDHEADERS, self.headers.map(|v| v.to_string()));
        set(variables::SQLCMDCOLSEP, self.column_separator.clone());
        set(
            variables::SQLCMDCOLWIDTH,
            self.screen_width.map(|v| v.to_string()),
        );
        set(
            variables::SQLCMDMAXVARTYPEWIDTH,
            self.max_var_type_width.map(|v| v.to_string()),
        );
        set(
            variables::SQLCMDMAXFIXEDTYPEWIDTH,
            self.max_fixed_type_width.map(|v| v.to_string()),
        );
        set(
            variables::SQLCMDERRORLEVEL,
            self.error_level.map(|v| v.to_string()),
        );
        for (name, value) in &self.variables {
            vars.set(name, value);
        }
    }

    pub fn connect_settings(&self) -> ConnectSettings {
        ConnectSettings {
            use_trusted_connection: self.trusted,
            trust_server_certificate: self.trust_server_certificate,
            disable_environment_variables: false,
            disable_variable_substitution: self.disable_variable_substitution,
            error_severity_level: self.error_severity_level.unwrap_or(0),
            application_name: "rust-sqlcmd".to_string(),
        }
    }

    /// Whether input comes from the terminal rather than -Q or -i
    pub fn wants_console(&self) -> bool {
        self.query.is_none() && self.input_files.is_empty()
    }
}
