//! Integration tests for sqlcmd commands

use std::fs;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use crate::common::{eol, TestSession};

// ============================================================================
// EXIT and QUIT
// ============================================================================

#[test]
fn test_exit_with_query_sets_exit_code() {
    let mut t = TestSession::new("select 1\nEXIT(select 5)\nselect 9\nGO");
    t.sqlcmd.run(false, false).unwrap();
    assert_eq!(t.queries(), vec![format!("select 1{}select 5", eol())]);
    assert_eq!(t.sqlcmd.exit_code, 5);
    assert!(t.sqlcmd.exit_requested());
}

#[test]
fn test_exit_with_text_result_is_not_numeric() {
    let mut t = TestSession::new(":EXIT(select 'abc')");
    t.sqlcmd.run(false, false).unwrap();
    assert_eq!(t.sqlcmd.exit_code, -102);
}

#[test]
fn test_exit_with_empty_parentheses_runs_buffer() {
    let mut t = TestSession::new("select 3\nexit()");
    t.sqlcmd.run(false, false).unwrap();
    assert_eq!(t.queries(), vec!["select 3".to_string()]);
    assert_eq!(t.sqlcmd.exit_code, 3);
}

#[test]
fn test_plain_exit_discards_buffer() {
    let mut t = TestSession::new("select 3\nexit\nselect 4\nGO");
    t.sqlcmd.run(false, false).unwrap();
    assert!(t.queries().is_empty());
    assert_eq!(t.sqlcmd.exit_code, 0);
}

// ============================================================================
// Output Redirection
// ============================================================================

#[test]
fn test_out_redirects_results_to_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("results.txt");
    let script = format!(":OUT {}\nselect 7\nGO\nquit", path.display());

    let mut t = TestSession::new(&script);
    t.sqlcmd.run(false, false).unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), format!("7{eol}{eol}", eol = eol()));
    assert_eq!(t.out.text(), "");
}

#[test]
fn test_error_redirects_errors_to_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("errors.txt");
    let script = format!(":ERROR {}\nraiserror(50000, 16, 1)\nGO\nquit", path.display());

    let mut t = TestSession::new(&script);
    t.sqlcmd.run(false, false).unwrap();

    let errors = fs::read_to_string(&path).unwrap();
    assert!(errors.starts_with("Msg 50000, Level 16, State 1"));
    assert_eq!(t.err.text(), "");
}

#[test]
fn test_out_to_missing_directory_is_file_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("missing").join("out.txt");
    let mut t = TestSession::new(&format!(":OUT {}\nselect 1\nGO", path.display()));
    t.sqlcmd.run(false, false).unwrap_err();
    assert!(t.err.text().contains("Error occurred while opening or operating on file"));
    assert_eq!(t.out.text(), format!("1{eol}{eol}", eol = eol()));
}

// ============================================================================
// Variables
// ============================================================================

#[test]
fn test_setvar_quoted_value() {
    let mut t = TestSession::new(":setvar greeting \"say \"\"hi\"\"\"");
    t.sqlcmd.run(false, false).unwrap();
    assert_eq!(t.sqlcmd.vars().get("GREETING"), Some("say \"hi\""));
}

#[test]
fn test_setvar_without_value_removes_variable() {
    let mut t = TestSession::new(":setvar temp 1\n:setvar temp");
    t.sqlcmd.run(false, false).unwrap();
    assert_eq!(t.sqlcmd.vars().get("TEMP"), None);
}

#[test]
fn test_setvar_without_value_restores_builtin_default() {
    let mut t = TestSession::new(":setvar SQLCMDCOLSEP |\n:setvar SQLCMDCOLSEP");
    t.sqlcmd.run(false, false).unwrap();
    assert_eq!(t.sqlcmd.vars().column_separator(), " ");
}

#[test]
fn test_setvar_read_only_is_reported() {
    let mut t = TestSession::new(":setvar SQLCMDSERVER other");
    t.sqlcmd.vars_mut().set("SQLCMDSERVER", "server");
    t.sqlcmd.run(false, false).unwrap_err();
    assert!(t.err.text().contains("'SQLCMDSERVER' is read-only"));
    assert_eq!(t.sqlcmd.vars().get("SQLCMDSERVER"), Some("server"));
}

#[test]
fn test_listvar_builtins_first() {
    let mut t = TestSession::new(":setvar AAA 1\n:listvar");
    t.sqlcmd.run(false, false).unwrap();
    let out = t.out.text();
    let user = out.find("AAA = \"1\"").unwrap();
    let builtin = out.find("SQLCMDCOLSEP = \" \"").unwrap();
    assert!(builtin < user);
}

#[test]
fn test_listvar_rejects_arguments() {
    let mut t = TestSession::new(":listvar extra");
    t.sqlcmd.run(false, false).unwrap_err();
    assert!(t.err.text().contains("near command 'LISTVAR'"));
    assert_eq!(t.out.text(), "");
}

// ============================================================================
// Batch Commands
// ============================================================================

#[test]
fn test_reset_discards_batch() {
    let mut t = TestSession::new("select 1\n:reset\nselect 2\nGO");
    t.sqlcmd.run(false, false).unwrap();
    assert_eq!(t.queries(), vec!["select 2".to_string()]);
}

#[test]
fn test_list_prints_batch() {
    let mut t = TestSession::new("select 1\nfrom t\n:list");
    t.sqlcmd.run(false, false).unwrap();
    assert_eq!(t.out.text(), format!("select 1\nfrom t{}", eol()));
}

#[test]
fn test_list_of_empty_batch_prints_nothing() {
    let mut t = TestSession::new(":list\nGO");
    t.sqlcmd.set_echo_input(true);
    t.sqlcmd.run(false, false).unwrap();
    assert_eq!(t.out.text(), "");
}

#[test]
fn test_echo_input_lists_batch_before_running() {
    let mut t = TestSession::new("select 1\nGO");
    t.sqlcmd.set_echo_input(true);
    t.sqlcmd.run(false, false).unwrap();
    assert_eq!(t.out.text(), format!("select 1{eol}1{eol}{eol}", eol = eol()));
}

#[test]
fn test_custom_batch_terminator() {
    let mut t = TestSession::new("select 1\nGO\nrun");
    t.sqlcmd.set_batch_terminator("run").unwrap();
    t.sqlcmd.run(false, false).unwrap();
    assert_eq!(t.queries(), vec!["select 1\nGO".to_string()]);
}

#[test]
fn test_on_error_exit_command() {
    let mut t = TestSession::new(":on error exit\nraiserror(50000, 16, 1)\nGO\nselect 1\nGO");
    t.sqlcmd.run(false, false).unwrap();
    assert_eq!(t.queries().len(), 1);
    assert_eq!(t.sqlcmd.exit_code, 1);
}

#[test]
fn test_on_error_exit_stops_on_command_error() {
    let mut t = TestSession::new(":on error exit\nGO -1\nselect 1\nGO");
    t.sqlcmd.run(false, false).unwrap_err();
    assert!(t.queries().is_empty());
    assert_eq!(t.sqlcmd.exit_code, 1);
}

#[test]
fn test_help_lists_commands() {
    let mut t = TestSession::new(":help");
    t.sqlcmd.run(false, false).unwrap();
    let out = t.out.text();
    assert!(out.contains(":SETVAR"));
    assert!(out.contains("GO [count]"));
}

// ============================================================================
// Include Files
// ============================================================================

#[test]
fn test_read_file_runs_its_batches() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("included.sql");
    fs::write(&path, "select 1\nGO\nselect 2\n").unwrap();

    let mut t = TestSession::new(&format!(":r {}\nGO", path.display()));
    t.sqlcmd.run(false, false).unwrap();
    assert_eq!(t.queries(), vec!["select 1".to_string(), "select 2".to_string()]);
}

#[test]
fn test_read_file_shares_variables() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("vars.sql");
    fs::write(&path, ":setvar fromfile 8\n").unwrap();

    let mut t = TestSession::new(&format!(":r {}\nselect $(fromfile)\nGO", path.display()));
    t.sqlcmd.run(false, false).unwrap();
    assert_eq!(t.queries(), vec!["select 8".to_string()]);
}

#[test]
fn test_read_missing_file_is_reported() {
    let mut t = TestSession::new(":r /no/such/dir/script.sql\nselect 1\nGO");
    t.sqlcmd.run(false, false).unwrap_err();
    assert!(t.err.text().contains("/no/such/dir/script.sql"));
    assert_eq!(t.queries(), vec!["select 1".to_string()]);
}

#[test]
fn test_circular_include_is_detected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("loop.sql");
    fs::write(&path, format!("select 1\nGO\n:r {}\n", path.display())).unwrap();

    let mut t = TestSession::new(&format!(":r {}", path.display()));
    t.sqlcmd.run(false, false).unwrap();
    assert_eq!(t.queries(), vec!["select 1".to_string()]);
    assert!(t.err.text().contains("Circular :R include detected"));
}

#[test]
fn test_include_file_processes_trailing_batch() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("script.sql");
    fs::write(&path, "select 4").unwrap();

    let mut t = TestSession::new("");
    t.sqlcmd.include_file(&path, true).unwrap();
    assert_eq!(t.queries(), vec!["select 4".to_string()]);
}
