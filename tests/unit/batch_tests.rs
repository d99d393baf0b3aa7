//! Unit tests for the batch scanner
//!
//! These tests feed scripts line by line through the real command table.

use rust_sqlcmd::sqlcmd::{Batch, Commands, LineError, LineSource};
use rust_sqlcmd::SqlcmdError;

struct Lines(std::vec::IntoIter<String>);

impl Lines {
    fn new(text: &str) -> Self {
        let lines: Vec<String> = text.split('\n').map(str::to_string).collect();
        Self(lines.into_iter())
    }
}

impl LineSource for Lines {
    fn read_line(&mut self) -> Result<String, LineError> {
        self.0.next().ok_or(LineError::Eof)
    }
}

struct Scan {
    statements: Vec<String>,
    commands: Vec<&'static str>,
    state: char,
}

/// Scan `text` to the end. Text left in the buffer at end of input counts
/// as a statement, the way the engine runs it.
fn scan(text: &str) -> Scan {
    let commands = Commands::new();
    let mut batch = Batch::new();
    let mut source = Lines::new(text);
    let mut statements = Vec::new();
    let mut names = Vec::new();
    loop {
        match batch.next(&mut source, &commands) {
            Ok(Some(cmd)) => names.push(cmd.name),
            Ok(None) => {}
            Err(SqlcmdError::EndOfInput) => {
                if !batch.is_empty() {
                    statements.push(batch.text());
                }
                break;
            }
            Err(err) => panic!("{} did not expect error, got: {}", text, err),
        }
    }
    Scan {
        statements,
        commands: names,
        state: batch.state(),
    }
}

// ============================================================================
// Statement and Command Separation
// ============================================================================

#[test]
fn test_batch_next_table() {
    let cases: &[(&str, &[&str], &[&str], char)] = &[
        ("", &[], &[], '='),
        ("select 1", &["select 1"], &[], '-'),
        ("select $(x)\nquit", &["select $(x)"], &["QUIT"], '-'),
        ("select '$ (X' \nquite", &["select '$ (X' \nquite"], &[], '-'),
        (":list\n:reset\n", &[], &["LIST", "RESET"], '='),
        ("select 1\n:list\nselect 2", &["select 1\nselect 2"], &["LIST"], '-'),
        ("select '1\n", &["select '1\n"], &[], '\''),
        ("select 1 /* comment\nGO", &["select 1 /* comment\nGO"], &[], '*'),
        (
            "select '1\n00' \n/* comm\nent*/\nGO 4",
            &["select '1\n00' \n/* comm\nent*/"],
            &["GO"],
            '-',
        ),
        ("$(x) $(y) 100\nquit", &["$(x) $(y) 100"], &["QUIT"], '-'),
        ("select 1\n:list", &["select 1"], &["LIST"], '-'),
        ("select 1\n:reset", &["select 1"], &["RESET"], '-'),
        ("select 1\n:exit()", &["select 1"], &["EXIT"], '-'),
        ("select 1\n:exit (select 10)", &["select 1"], &["EXIT"], '-'),
        ("select 1\n:exit", &["select 1"], &["EXIT"], '-'),
    ];

    for (text, statements, commands, state) in cases {
        let result = scan(text);
        assert_eq!(&result.statements, statements, "Statements for {:?}", text);
        assert_eq!(&result.commands, commands, "Commands for {:?}", text);
        assert_eq!(result.state, *state, "State for {:?}", text);
    }
}

#[test]
fn test_balanced_text_reproduced() {
    let text = "create table t (\n  a int, -- 'comment\n  b nvarchar(10) default N'x''y'\n)";
    let result = scan(&format!("    {}", text));
    assert_eq!(result.statements, vec![text.to_string()]);
}

#[test]
fn test_tab_separated_command_arguments() {
    let commands = Commands::new();
    let mut batch = Batch::new();
    let mut source = Lines::new(":setvar\tname\tvalue");
    let cmd = batch.next(&mut source, &commands).unwrap().unwrap();
    assert_eq!(cmd.name, "SETVAR");
    assert_eq!(cmd.args, vec!["name\tvalue".to_string()]);
    assert!(batch.is_empty());
}

#[test]
fn test_custom_terminator_replaces_go() {
    let mut commands = Commands::new();
    commands.set_batch_terminator("me!").unwrap();
    let mut batch = Batch::new();
    let mut source = Lines::new("  me! 5 \nGO");

    let cmd = batch.next(&mut source, &commands).unwrap().unwrap();
    assert_eq!(cmd.name, "GO");
    assert_eq!(cmd.args[0].trim(), "5");

    assert!(batch.next(&mut source, &commands).unwrap().is_none());
    assert_eq!(batch.text(), "GO");
}

// ============================================================================
// Variable Reference Errors
// ============================================================================

#[test]
fn test_invalid_variable_reference_is_syntax_error() {
    for text in ["select $(x", "$((x", "alter $( x)"] {
        let commands = Commands::new();
        let mut batch = Batch::new();
        let mut source = Lines::new(text);
        let err = batch.next(&mut source, &commands).unwrap_err();
        assert!(
            matches!(err, SqlcmdError::SyntaxError { line: 1 }),
            "expected syntax error for {}, got {:?}",
            text,
            err
        );
        assert_eq!(batch.line_count(), 1);
        assert!(batch.is_empty());
    }
}

#[test]
fn test_scanning_continues_after_syntax_error() {
    let commands = Commands::new();
    let mut batch = Batch::new();
    let mut source = Lines::new("select $(x\nselect 2\nGO");
    assert!(batch.next(&mut source, &commands).is_err());
    assert!(batch.next(&mut source, &commands).unwrap().is_none());
    let cmd = batch.next(&mut source, &commands).unwrap().unwrap();
    assert_eq!(cmd.name, "GO");
    assert_eq!(batch.text(), "select 2");
}
