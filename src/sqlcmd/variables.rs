//! Scripting variables
//!
//! Names are case insensitive and stored uppercase. Built-in variables carry
//! defaults; a subset of them is read-only for `:SETVAR`.

use std::collections::HashMap;

use crate::error::SqlcmdError;
use crate::util::{local_hostname, split_server};

pub const SQLCMDCOLSEP: &str = "SQLCMDCOLSEP";
pub const SQLCMDCOLWIDTH: &str = "SQLCMDCOLWIDTH";
pub const SQLCMDDBNAME: &str = "SQLCMDDBNAME";
pub const SQLCMDEDITOR: &str = "SQLCMDEDITOR";
pub const SQLCMDERRORLEVEL: &str = "SQLCMDERRORLEVEL";
pub const SQLCMDHEADERS: &str = "SQLCMDHEADERS";
pub const SQLCMDINI: &str = "SQLCMDINI";
pub const SQLCMDLOGINTIMEOUT: &str = "SQLCMDLOGINTIMEOUT";
pub const SQLCMDMAXFIXEDTYPEWIDTH: &str = "SQLCMDMAXFIXEDTYPEWIDTH";
pub const SQLCMDMAXVARTYPEWIDTH: &str = "SQLCMDMAXVARTYPEWIDTH";
pub const SQLCMDPACKETSIZE: &str = "SQLCMDPACKETSIZE";
pub const SQLCMDPASSWORD: &str = "SQLCMDPASSWORD";
pub const SQLCMDSERVER: &str = "SQLCMDSERVER";
pub const SQLCMDSTATTIMEOUT: &str = "SQLCMDSTATTIMEOUT";
pub const SQLCMDUSEAAD: &str = "SQLCMDUSEAAD";
pub const SQLCMDUSER: &str = "SQLCMDUSER";
pub const SQLCMDWORKSTATION: &str = "SQLCMDWORKSTATION";

/// Built-in variables and their defaults. The workstation default is filled in at startup.
const BUILTIN_DEFAULTS: &[(&str, &str)] = &[
    (SQLCMDCOLSEP, " "),
    (SQLCMDCOLWIDTH, "0"),
    (SQLCMDDBNAME, ""),
    (SQLCMDEDITOR, "edit.com"),
    (SQLCMDERRORLEVEL, "0"),
    (SQLCMDHEADERS, "0"),
    (SQLCMDINI, ""),
    (SQLCMDLOGINTIMEOUT, "30"),
    (SQLCMDMAXFIXEDTYPEWIDTH, "0"),
    (SQLCMDMAXVARTYPEWIDTH, "256"),
    (SQLCMDPACKETSIZE, "4096"),
    (SQLCMDSERVER, ""),
    (SQLCMDSTATTIMEOUT, "0"),
    (SQLCMDUSEAAD, ""),
    (SQLCMDUSER, ""),
    (SQLCMDPASSWORD, ""),
    (SQLCMDWORKSTATION, ""),
];

const READ_ONLY: &[&str] = &[
    SQLCMDDBNAME,
    SQLCMDINI,
    SQLCMDPACKETSIZE,
    SQLCMDPASSWORD,
    SQLCMDSERVER,
    SQLCMDUSER,
    SQLCMDWORKSTATION,
];

/// Whether `name` is one of the built-in variables
pub fn is_builtin(name: &str) -> bool {
    let upper = name.to_uppercase();
    BUILTIN_DEFAULTS.iter().any(|(n, _)| *n == upper)
}

/// Default value of a built-in variable
pub fn builtin_default(name: &str) -> Option<&'static str> {
    let upper = name.to_uppercase();
    BUILTIN_DEFAULTS
        .iter()
        .find(|(n, _)| *n == upper)
        .map(|(_, v)| *v)
}

/// Whether `:SETVAR` must refuse to change a non-empty `name`
pub fn is_read_only(name: &str) -> bool {
    let upper = name.to_uppercase();
    READ_ONLY.contains(&upper.as_str())
}

/// Identifiers must not begin with `$(` or contain quotes, whitespace or control characters.
pub fn valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with("$(")
        && !name
            .chars()
            .any(|c| c == '\'' || c == '"' || c.is_whitespace() || c.is_control())
}

/// The scripting variables of one session
#[derive(Debug, Clone, PartialEq)]
pub struct Variables {
    values: HashMap<String, String>,
}

impl Default for Variables {
    fn default() -> Self {
        Self::new()
    }
}

impl Variables {
    /// Built-in defaults only, with the workstation set to this machine's name
    pub fn new() -> Self {
        let mut values: HashMap<String, String> = BUILTIN_DEFAULTS
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        values.insert(SQLCMDWORKSTATION.to_string(), local_hostname());
        Self { values }
    }

    /// Defaults overlaid with any built-in variables set in the process environment
    pub fn from_environment() -> Self {
        Self::with_environment(|name| std::env::var(name).ok())
    }

    /// Defaults overlaid from `lookup`. Only built-in names are consulted.
    pub fn with_environment<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut vars = Self::new();
        for (name, _) in BUILTIN_DEFAULTS.iter().copied() {
            if let Some(value) = lookup(name) {
                vars.set(name, &value);
            }
        }
        vars
    }

    /// Store a value without any checks
    pub fn set(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_uppercase(), value.to_string());
    }

    /// Store a value on behalf of a user, enforcing identifier rules and read-only variables
    pub fn setvar(&mut self, name: &str, value: &str) -> Result<(), SqlcmdError> {
        if !valid_identifier(name) {
            return Err(SqlcmdError::InvalidIdentifier {
                name: name.to_string(),
            });
        }
        if is_read_only(name) && !self.get(name).unwrap_or_default().is_empty() {
            return Err(SqlcmdError::ReadOnlyVariable {
                name: name.to_uppercase(),
            });
        }
        self.set(name, value);
        Ok(())
    }

    pub fn unset(&mut self, name: &str) {
        self.values.remove(&name.to_uppercase());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(&name.to_uppercase()).map(String::as_str)
    }

    /// All variables, keyed by uppercase name
    pub fn all(&self) -> &HashMap<String, String> {
        &self.values
    }

    fn value(&self, name: &str) -> &str {
        self.get(name).unwrap_or_default()
    }

    /// Integer value of a built-in, falling back to its default when unset or not a number
    fn int_value(&self, name: &str) -> i64 {
        self.value(name)
            .trim()
            .parse()
            .ok()
            .or_else(|| builtin_default(name).and_then(|d| d.parse().ok()))
            .unwrap_or(0)
    }

    /// `SQLCMDSERVER` split into `(host, instance, port)`
    pub fn sqlcmd_server(&self) -> Result<(String, String, u16), SqlcmdError> {
        split_server(self.value(SQLCMDSERVER))
    }

    pub fn sqlcmd_user(&self) -> &str {
        self.value(SQLCMDUSER)
    }

    pub fn sqlcmd_database(&self) -> &str {
        self.value(SQLCMDDBNAME)
    }

    pub fn password(&self) -> &str {
        self.value(SQLCMDPASSWORD)
    }

    pub fn workstation(&self) -> &str {
        self.value(SQLCMDWORKSTATION)
    }

    pub fn startup_script(&self) -> &str {
        self.value(SQLCMDINI)
    }

    /// True when Azure AD authentication was requested
    pub fn use_aad(&self) -> bool {
        self.value(SQLCMDUSEAAD).eq_ignore_ascii_case("true")
    }

    pub fn login_timeout_seconds(&self) -> i64 {
        self.int_value(SQLCMDLOGINTIMEOUT)
    }

    pub fn query_timeout_seconds(&self) -> i64 {
        self.int_value(SQLCMDSTATTIMEOUT)
    }

    pub fn packet_size(&self) -> i64 {
        self.int_value(SQLCMDPACKETSIZE)
    }

    /// Screen width used to wrap output, 0 when unbounded
    pub fn screen_width(&self) -> i64 {
        self.int_value(SQLCMDCOLWIDTH)
    }

    /// Minimum severity of server errors that get printed
    pub fn error_level(&self) -> i64 {
        self.int_value(SQLCMDERRORLEVEL)
    }

    /// Only the first character of `SQLCMDCOLSEP` is used
    pub fn column_separator(&self) -> String {
        self.value(SQLCMDCOLSEP)
            .chars()
            .next()
            .map(String::from)
            .unwrap_or_default()
    }

    pub fn max_fixed_column_width(&self) -> i64 {
        self.int_value(SQLCMDMAXFIXEDTYPEWIDTH)
    }

    pub fn max_var_column_width(&self) -> i64 {
        self.int_value(SQLCMDMAXVARTYPEWIDTH)
    }

    /// Rows printed between column headings; -1 means headings are never printed
    pub fn rows_between_headers(&self) -> i64 {
        if self.max_var_column_width() == 0 {
            return -1;
        }
        self.int_value(SQLCMDHEADERS)
    }
}
