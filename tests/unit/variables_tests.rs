//! Unit tests for scripting variables and server names

use std::collections::HashMap;

use rust_sqlcmd::sqlcmd::variables::{
    self, Variables, SQLCMDCOLSEP, SQLCMDDBNAME, SQLCMDHEADERS, SQLCMDMAXVARTYPEWIDTH,
    SQLCMDPASSWORD, SQLCMDSERVER, SQLCMDUSER,
};
use rust_sqlcmd::util::split_server;
use rust_sqlcmd::SqlcmdError;

// ============================================================================
// Read-only Variables
// ============================================================================

#[test]
fn test_read_only_variable_rejects_setvar_once_set() {
    let mut vars = Variables::new();
    vars.set(SQLCMDDBNAME, "master");
    let err = vars.setvar(SQLCMDDBNAME, "other").unwrap_err();
    assert!(matches!(err, SqlcmdError::ReadOnlyVariable { .. }));
    assert_eq!(vars.sqlcmd_database(), "master");
}

#[test]
fn test_empty_read_only_variable_accepts_setvar() {
    let mut vars = Variables::new();
    assert_eq!(vars.sqlcmd_user(), "");
    vars.setvar("sqlcmduser", "someone").unwrap();
    assert_eq!(vars.sqlcmd_user(), "someone");
}

#[test]
fn test_privileged_set_bypasses_read_only() {
    let mut vars = Variables::new();
    vars.set(SQLCMDSERVER, "first");
    vars.set(SQLCMDSERVER, "second");
    assert_eq!(vars.get(SQLCMDSERVER), Some("second"));
}

#[test]
fn test_names_are_case_insensitive() {
    let mut vars = Variables::new();
    vars.setvar("MixedCase", "1").unwrap();
    assert_eq!(vars.get("mixedcase"), Some("1"));
    assert!(vars.all().contains_key("MIXEDCASE"));
    vars.unset("MIXEDcase");
    assert_eq!(vars.get("MixedCase"), None);
}

#[test]
fn test_invalid_identifiers() {
    let mut vars = Variables::new();
    for name in ["$(x", "has space", "quo'te", "dq\"", "tab\tname", ""] {
        assert!(
            matches!(vars.setvar(name, "v"), Err(SqlcmdError::InvalidIdentifier { .. })),
            "{:?} should be rejected",
            name
        );
    }
    assert!(variables::valid_identifier("a-b_c1"));
}

// ============================================================================
// Initialization and Accessors
// ============================================================================

#[test]
fn test_defaults() {
    let vars = Variables::new();
    assert_eq!(vars.column_separator(), " ");
    assert_eq!(vars.screen_width(), 0);
    assert_eq!(vars.login_timeout_seconds(), 30);
    assert_eq!(vars.packet_size(), 4096);
    assert_eq!(vars.max_var_column_width(), 256);
    assert_eq!(vars.rows_between_headers(), 0);
}

#[test]
fn test_environment_overlay_only_known_names() {
    let env: HashMap<&str, &str> = [
        (SQLCMDPASSWORD, "secret"),
        (SQLCMDSERVER, "envserver"),
        ("NOT_A_SQLCMD_VARIABLE", "x"),
    ]
    .into_iter()
    .collect();
    let vars = Variables::with_environment(|name| env.get(name).map(|v| v.to_string()));
    assert_eq!(vars.password(), "secret");
    assert_eq!(vars.get(SQLCMDSERVER), Some("envserver"));
    assert_eq!(vars.get("NOT_A_SQLCMD_VARIABLE"), None);
}

#[test]
fn test_column_separator_uses_first_character() {
    let mut vars = Variables::new();
    vars.set(SQLCMDCOLSEP, "|;");
    assert_eq!(vars.column_separator(), "|");
}

#[test]
fn test_headers_disabled_by_unlimited_var_width() {
    let mut vars = Variables::new();
    vars.set(SQLCMDHEADERS, "5");
    assert_eq!(vars.rows_between_headers(), 5);
    vars.set(SQLCMDMAXVARTYPEWIDTH, "0");
    assert_eq!(vars.rows_between_headers(), -1);
}

#[test]
fn test_server_accessor_splits() {
    let mut vars = Variables::new();
    vars.set(SQLCMDSERVER, "tcp:host,1500");
    assert_eq!(
        vars.sqlcmd_server().unwrap(),
        ("host".to_string(), String::new(), 1500)
    );
    vars.set(SQLCMDUSER, "u");
    assert_eq!(vars.sqlcmd_user(), "u");
}

// ============================================================================
// Server Names
// ============================================================================

#[test]
fn test_split_server_forms() {
    assert_eq!(
        split_server("tcp:someserver/someinstance").unwrap(),
        ("someserver".to_string(), "someinstance".to_string(), 0)
    );
    assert_eq!(
        split_server("tcp:someserver,1111").unwrap(),
        ("someserver".to_string(), String::new(), 1111)
    );
    assert_eq!(
        split_server("plain").unwrap(),
        ("plain".to_string(), String::new(), 0)
    );
}

#[test]
fn test_split_server_rejects_port_with_instance() {
    assert!(matches!(
        split_server("tcp:someserver/someinstance,1111"),
        Err(SqlcmdError::InvalidServerName)
    ));
    assert!(split_server("host,notaport").is_err());
}
