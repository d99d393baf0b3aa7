//! Result rendering
//!
//! The [`Formatter`] receives a batch's results piece by piece and writes them
//! to the session's output and error streams. [`SqlcmdFormatter`] produces the
//! classic sqlcmd layout: padded columns under dashed headings.

use std::io::Write;

use super::variables::Variables;
use super::SQLCMD_EOL;
use crate::db::{Column, ColumnKind, DbError, Row, Value};

const REAL_DEFAULT_WIDTH: i64 = 14;
const FLOAT_DEFAULT_WIDTH: i64 = 24;
const DEFAULT_MAX_DISPLAY_WIDTH: i64 = 1024 * 1024;
const MAX_PAD_WIDTH: i64 = 8000;

/// Where a formatter writes, plus the variables that shape its output
pub struct Sink<'a> {
    pub out: &'a mut dyn Write,
    pub err: &'a mut dyn Write,
    pub vars: &'a Variables,
}

impl Sink<'_> {
    fn write_out(&mut self, text: &str) {
        let _ = self.out.write_all(text.as_bytes());
    }

    fn write_err(&mut self, text: &str) {
        let _ = self.err.write_all(text.as_bytes());
    }
}

/// Receives query results and renders them
pub trait Formatter {
    fn begin_batch(&mut self, query: &str, sink: &mut Sink<'_>);
    fn end_batch(&mut self, sink: &mut Sink<'_>);
    fn begin_result_set(&mut self, columns: &[Column], sink: &mut Sink<'_>);
    fn end_result_set(&mut self, sink: &mut Sink<'_>);
    /// Render a row; returns the text of its first column
    fn add_row(&mut self, row: &Row, sink: &mut Sink<'_>) -> String;
    fn add_message(&mut self, message: &str, sink: &mut Sink<'_>);
    fn add_error(&mut self, error: &DbError, sink: &mut Sink<'_>);
}

#[derive(Debug, Clone)]
struct ColumnDetail {
    column: Column,
    display_width: i64,
    left_justify: bool,
}

/// The default sqlcmd formatter
#[derive(Debug, Default)]
pub struct SqlcmdFormatter {
    remove_trailing_spaces: bool,
    columns: Vec<ColumnDetail>,
    row_count: i64,
    /// Characters written on the current output line, for wrapping
    write_pos: i64,
}

impl SqlcmdFormatter {
    pub fn new(remove_trailing_spaces: bool) -> Self {
        Self {
            remove_trailing_spaces,
            ..Self::default()
        }
    }

    /// Write `text`, wrapping at the screen width when one is set
    fn write_wrapped(&mut self, text: &str, sink: &mut Sink<'_>) {
        let width = sink.vars.screen_width();
        if width <= 0 {
            sink.write_out(text);
            return;
        }
        let mut line = String::with_capacity(text.len());
        for c in text.chars() {
            if self.write_pos == width && c != '\r' && c != '\n' {
                sink.write_out(&line);
                sink.write_out(SQLCMD_EOL);
                line.clear();
                self.write_pos = 0;
            }
            if c == '\r' || c == '\n' {
                self.write_pos = 0;
            } else {
                self.write_pos += 1;
            }
            line.push(c);
        }
        sink.write_out(&line);
    }

    fn print_column_headings(&mut self, sink: &mut Sink<'_>) {
        let colsep = sink.vars.column_separator();
        let mut names = String::new();
        let mut dashes = String::new();
        let last = self.columns.len().saturating_sub(1);
        for (i, detail) in self.columns.iter().enumerate() {
            let name: Vec<char> = detail.column.name.chars().collect();
            let name_len = name.len() as i64;
            let mut right_pad = 0;
            if self.remove_trailing_spaces {
                if name_len == 0 {
                    right_pad = 1;
                    dashes.push('-');
                } else {
                    dashes.push_str(&"-".repeat(name_len as usize));
                }
            } else {
                let length = detail.display_width.min(MAX_PAD_WIDTH);
                if name_len < length {
                    right_pad = length - name_len;
                }
                dashes.push_str(&"-".repeat(length.max(0) as usize));
            }
            let shown = name_len.min(detail.display_width.max(0)) as usize;
            let shown = if self.remove_trailing_spaces { name.len() } else { shown };
            names.extend(name[..shown].iter());
            names.push_str(&" ".repeat(right_pad as usize));
            if i != last {
                names.push_str(&colsep);
                dashes.push_str(&colsep);
            }
        }
        names.push_str(SQLCMD_EOL);
        dashes.push_str(SQLCMD_EOL);
        let width = sink.vars.screen_width();
        sink.write_out(&fit_to_screen(&names, width));
        sink.write_out(&fit_to_screen(&dashes, width));
    }

    fn print_column_value(&mut self, value: &Value, col: usize, sink: &mut Sink<'_>) {
        let Some(detail) = self.columns.get(col).cloned() else {
            return;
        };
        let mut text = value.to_string();
        if !self.remove_trailing_spaces
            && (sink.vars.max_var_column_width() != 0 || !is_large_variable_type(&detail.column))
        {
            let len = text.chars().count() as i64;
            let padding = detail.display_width - detail.display_width.min(len);
            if padding > 0 {
                let pad = " ".repeat(padding as usize);
                if detail.left_justify {
                    text.push_str(&pad);
                } else {
                    text.insert_str(0, &pad);
                }
            }
        }
        if detail.display_width > 0 && text.chars().count() as i64 > detail.display_width {
            text = text.chars().take(detail.display_width as usize).collect();
        }
        self.write_wrapped(&text, sink);
    }
}

impl Formatter for SqlcmdFormatter {
    fn begin_batch(&mut self, _query: &str, _sink: &mut Sink<'_>) {
        self.write_pos = 0;
    }

    fn end_batch(&mut self, sink: &mut Sink<'_>) {
        let _ = sink.out.flush();
        let _ = sink.err.flush();
    }

    fn begin_result_set(&mut self, columns: &[Column], sink: &mut Sink<'_>) {
        self.row_count = 0;
        self.columns = calc_column_details(
            columns,
            sink.vars.max_fixed_column_width(),
            sink.vars.max_var_column_width(),
        );
        if sink.vars.rows_between_headers() > -1 {
            self.print_column_headings(sink);
        }
    }

    fn end_result_set(&mut self, sink: &mut Sink<'_>) {
        self.write_wrapped(SQLCMD_EOL, sink);
    }

    fn add_row(&mut self, row: &Row, sink: &mut Sink<'_>) -> String {
        let first = row.values.first().map(Value::to_string).unwrap_or_default();
        let colsep = sink.vars.column_separator();
        let mut line_start = true;
        for (i, value) in row.values.iter().enumerate() {
            if !line_start {
                self.write_wrapped(&colsep, sink);
            }
            line_start = false;
            self.print_column_value(value, i, sink);
        }
        self.row_count += 1;
        let gap = sink.vars.rows_between_headers();
        if gap > 0 && self.row_count % gap == 0 {
            self.write_wrapped(SQLCMD_EOL, sink);
            self.print_column_headings(sink);
        }
        self.write_wrapped(SQLCMD_EOL, sink);
        first
    }

    fn add_message(&mut self, message: &str, sink: &mut Sink<'_>) {
        sink.write_out(&format!("{}{}", message, SQLCMD_EOL));
    }

    fn add_error(&mut self, error: &DbError, sink: &mut Sink<'_>) {
        let mut text = String::new();
        match error.server_error() {
            Some(e) => {
                let level = sink.vars.error_level();
                if level > 0 && (e.class as i64) < level {
                    return;
                }
                if e.procedure.is_empty() {
                    text.push_str(&format!(
                        "Msg {}, Level {}, State {}, Server {}, Line {}{}",
                        e.number, e.class, e.state, e.server, e.line, SQLCMD_EOL
                    ));
                } else {
                    text.push_str(&format!(
                        "Msg {}, Level {}, State {}, Server {}, Procedure {}, Line {}{}",
                        e.number, e.class, e.state, e.server, e.procedure, e.line, SQLCMD_EOL
                    ));
                }
                text.push_str(&e.message);
            }
            None => text.push_str(&error.to_string()),
        }
        text.push_str(SQLCMD_EOL);
        sink.write_err(&fit_to_screen(&text, sink.vars.screen_width()));
    }
}

/// Wrap `s` every `width` characters; `width` 0 leaves it unchanged
pub fn fit_to_screen(s: &str, width: i64) -> String {
    let chars: Vec<char> = s.chars().collect();
    if width <= 0 || (chars.len() as i64) < width {
        return s.to_string();
    }
    let mut line = String::with_capacity(s.len() + s.len() / width as usize);
    let mut count = 0;
    for &c in &chars {
        if count == width && c != '\n' && c != '\r' {
            line.push_str(SQLCMD_EOL);
            count = 0;
        }
        line.push(c);
        if c == '\n' || c == '\r' {
            count = 0;
        } else {
            count += 1;
        }
    }
    line
}

fn is_large_variable_type(column: &Column) -> bool {
    match column.kind {
        ColumnKind::VarChar | ColumnKind::VarBinary => column.length.map_or(true, |l| l > 8000),
        ColumnKind::NVarChar => column.length.map_or(true, |l| l > 4000),
        ColumnKind::Xml | ColumnKind::Text | ColumnKind::NText | ColumnKind::Image => true,
        _ => false,
    }
}

/// Display width and justification of each column, bounded by the
/// fixed and variable width limits. A variable limit of 0 means unlimited.
fn calc_column_details(columns: &[Column], fixed: i64, variable: i64) -> Vec<ColumnDetail> {
    columns
        .iter()
        .map(|column| {
            let name_len = column.name.chars().count() as i64;
            let declared = column.length.map(|l| l as i64);
            let bounded = |length: i64| if fixed > 0 { fixed.min(length) } else { length };
            let (width, left_justify) = match column.kind {
                ColumnKind::Bit => (name_len.max(1), false),
                ColumnKind::TinyInt => (name_len.max(3), false),
                ColumnKind::SmallInt => (name_len.max(6), false),
                ColumnKind::Int => (name_len.max(11), false),
                ColumnKind::BigInt => (name_len.max(21), false),
                ColumnKind::Real | ColumnKind::SmallMoney => (name_len.max(REAL_DEFAULT_WIDTH), false),
                ColumnKind::Float | ColumnKind::Money => (name_len.max(FLOAT_DEFAULT_WIDTH), false),
                ColumnKind::Decimal => {
                    let digits = column.precision.map(i64::from).unwrap_or(24);
                    (name_len.max(digits + 2), false)
                }
                ColumnKind::Date => (name_len.max(16), false),
                ColumnKind::DateTime => (name_len.max(23), false),
                ColumnKind::SmallDateTime => (name_len.max(19), false),
                ColumnKind::DateTime2 => (name_len.max(38), false),
                ColumnKind::Time => (name_len.max(16), false),
                ColumnKind::DateTimeOffset => (name_len.max(45), false),
                ColumnKind::UniqueIdentifier => (name_len.max(36), true),
                ColumnKind::VarChar | ColumnKind::VarBinary => match declared {
                    Some(length) if length <= 8000 => (name_len.max(bounded(length)), true),
                    _ => (variable, true),
                },
                ColumnKind::NVarChar => match declared {
                    Some(length) if length <= 4000 => (name_len.max(bounded(length)), true),
                    _ => (variable, true),
                },
                ColumnKind::Variant => (if fixed > 0 { fixed.min(8000) } else { 8000 }, true),
                ColumnKind::Char | ColumnKind::NChar | ColumnKind::Binary => match declared {
                    Some(length) => (name_len.max(bounded(length)), true),
                    None => (variable, true),
                },
                ColumnKind::Xml | ColumnKind::Text | ColumnKind::NText | ColumnKind::Image => {
                    (variable, true)
                }
                ColumnKind::Other => (declared.unwrap_or(DEFAULT_MAX_DISPLAY_WIDTH), true),
            };
            ColumnDetail {
                column: column.clone(),
                display_width: if variable == 0 { 0 } else { width },
                left_justify,
            }
        })
        .collect()
}
