//! End-to-end tests against SQL Server
//!
//! Environment variables (with defaults):
//! - SQL_SERVER_HOST (default: localhost)
//! - SQL_SERVER_PORT (default: 1433)
//! - SQL_SERVER_USER (default: sa)
//! - SQL_SERVER_PASSWORD (default: Password1)
//!
//! Run with: cargo test --test e2e_tests -- --ignored

use std::sync::{Arc, LazyLock};

use rust_sqlcmd::db::MssqlConnector;
use rust_sqlcmd::sqlcmd::variables::SQLCMDMAXVARTYPEWIDTH;
use rust_sqlcmd::sqlcmd::{ConnectSettings, ReaderSource, Variables};
use rust_sqlcmd::Sqlcmd;
use tokio::runtime::Runtime;

use crate::common::{eol, SharedBuffer};

/// Load environment variables from .env file (if present)
fn load_env() {
    let _ = dotenvy::dotenv();
}

static SQL_CONFIG: LazyLock<SqlServerConfig> = LazyLock::new(|| {
    load_env();
    SqlServerConfig {
        host: std::env::var("SQL_SERVER_HOST").unwrap_or_else(|_| "localhost".to_string()),
        port: std::env::var("SQL_SERVER_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(1433),
        user: std::env::var("SQL_SERVER_USER").unwrap_or_else(|_| "sa".to_string()),
        password: std::env::var("SQL_SERVER_PASSWORD").unwrap_or_else(|_| "Password1".to_string()),
    }
});

struct SqlServerConfig {
    host: String,
    port: u16,
    user: String,
    password: String,
}

struct LiveSession {
    sqlcmd: Sqlcmd,
    out: SharedBuffer,
    err: SharedBuffer,
}

/// A session connected to the test server, reading `script`
fn connect(script: &str) -> LiveSession {
    let runtime = Arc::new(Runtime::new().unwrap());
    let mut vars = Variables::new();
    vars.set(SQLCMDMAXVARTYPEWIDTH, "0");
    let mut sqlcmd = Sqlcmd::new(
        Box::new(ReaderSource::from_text(script.to_string())),
        vars,
        Box::new(MssqlConnector::new(runtime)),
    );
    sqlcmd.set_connect_settings(ConnectSettings {
        trust_server_certificate: true,
        application_name: "rust-sqlcmd-e2e".to_string(),
        ..Default::default()
    });

    let server = format!("{},{}", SQL_CONFIG.host, SQL_CONFIG.port);
    sqlcmd
        .connect_db(&server, &SQL_CONFIG.user, &SQL_CONFIG.password, true)
        .expect("Failed to connect to SQL Server");

    let out = SharedBuffer::default();
    let err = SharedBuffer::default();
    sqlcmd.set_output(Some(Box::new(out.clone())));
    sqlcmd.set_error(Some(Box::new(err.clone())));
    LiveSession { sqlcmd, out, err }
}

#[test]
#[ignore = "Requires SQL Server"]
fn test_select_prints_value() {
    let mut s = connect("select 100\nGO");
    s.sqlcmd.run(false, false).unwrap();
    let out = s.out.text();
    assert!(out.starts_with(&format!("100{eol}{eol}", eol = eol())), "got: {}", out);
    assert!(out.contains("(1 row affected)"));
    assert_eq!(s.err.text(), "");
}

#[test]
#[ignore = "Requires SQL Server"]
fn test_exit_code_from_query() {
    let mut s = connect("EXIT(select 42)");
    s.sqlcmd.run(false, false).unwrap();
    assert_eq!(s.sqlcmd.exit_code, 42);
}

#[test]
#[ignore = "Requires SQL Server"]
fn test_server_error_is_formatted() {
    let mut s = connect("select 1/0\nGO");
    s.sqlcmd.run(false, false).unwrap();
    let err = s.err.text();
    assert!(err.starts_with("Msg 8134, Level 16, State 1"), "got: {}", err);
    assert!(err.contains("Divide by zero"));
}

#[test]
#[ignore = "Requires SQL Server"]
fn test_raiserror_state_127_sets_exit_code() {
    let mut s = connect("raiserror(50001, 16, 127)\nGO\nselect 1\nGO");
    s.sqlcmd.run(false, false).unwrap();
    assert_eq!(s.sqlcmd.exit_code, 50001);
}

#[test]
#[ignore = "Requires SQL Server"]
fn test_variables_substituted_on_server() {
    let mut s = connect(":setvar db master\nuse [$(db)]\nselect db_name()\nGO");
    s.sqlcmd.run(false, false).unwrap();
    assert!(s.out.text().contains("master"));
}

#[test]
#[ignore = "Requires SQL Server"]
fn test_login_sets_variables() {
    let s = connect("");
    assert_eq!(s.sqlcmd.vars().sqlcmd_user(), SQL_CONFIG.user);
    assert!(s.sqlcmd.is_connected());
}
