// Copyright 2024 Cornell University
// released under MIT License
// author: Nikil Shyamunder <nvs26@cornell.edu>
// author: Kevin Laeufer <laeufer@cornell.edu>
// author: Francis Pham <fdp25@cornell.edu>

use std::io::Write;

use clap::ColorChoice;
use codespan_reporting::diagnostic::{
    Diagnostic as CodespanDiagnostic, Label as CodespanLabel, LabelStyle, Severity,
};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{Buffer, Color, ColorSpec, WriteColor};
use pest::iterators::Pair;
use pest::RuleType;

/// Severity of diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Error,
    Warning,
}

/// A label representing a part of the source code
#[derive(Debug, Clone, PartialEq, Eq)]
struct Label {
    message: Option<String>,
    range: (usize, usize),
}

impl Label {
    fn to_codespan_label(&self, fileid: usize) -> CodespanLabel<usize> {
        CodespanLabel::new(LabelStyle::Primary, fileid, self.range.0..self.range.1)
            .with_message(self.message.clone().unwrap_or_default())
    }
}

/// Diagnostic of a particular part of source code
struct Diagnostic {
    title: String,
    message: String,
    level: Level,
    location: Option<(usize, Label)>,
}

impl Diagnostic {
    pub fn emit(&self, buffer: &mut Buffer, files: &SimpleFiles<String, String>) {
        if let Some((fileid, label)) = &self.location {
            let severity = match self.level {
                Level::Error => Severity::Error,
                Level::Warning => Severity::Warning,
            };

            let diagnostic = CodespanDiagnostic::new(severity)
                .with_message(&self.message)
                .with_labels(vec![label.to_codespan_label(*fileid)]);

            let config = term::Config::default();
            term::emit(buffer, &config, files, &diagnostic).expect("Failed to write diagnostic");
        } else {
            let color = match self.level {
                Level::Error => Color::Red,
                Level::Warning => Color::Yellow,
            };

            buffer
                .set_color(ColorSpec::new().set_bold(true).set_fg(Some(color)))
                .expect("Failed to set color");
            write!(buffer, "{}", self.title).expect("Failed to write title");
            buffer
                .set_color(&ColorSpec::new())
                .expect("Failed to reset color");
            writeln!(buffer, ": {}", self.message).expect("Failed to write message");
        }
    }
}

/// Collects source files and renders diagnostics against them. Every
/// rendered diagnostic goes to stderr and is also kept in `error_string`.
pub struct DiagnosticHandler {
    files: SimpleFiles<String, String>,
    error_string: String,
    error_count: usize,
    /// `color_choice` indicates whether to emit error messages w/ ANSI colors
    color_choice: ColorChoice,
}

impl Default for DiagnosticHandler {
    /// Default `DiagnosticHandler` does not emit colored error messages
    fn default() -> Self {
        Self::new(ColorChoice::Never)
    }
}

impl DiagnosticHandler {
    pub fn new(color_choice: ColorChoice) -> Self {
        Self {
            files: SimpleFiles::new(),
            error_string: String::new(),
            error_count: 0,
            color_choice,
        }
    }

    /// Creates a buffer for error diagnostics
    /// (different buffers are created based on whether we want colors or not)
    fn create_buffer(&self) -> Buffer {
        if self.color_choice == ColorChoice::Never {
            Buffer::no_color()
        } else {
            Buffer::ansi()
        }
    }

    pub fn add_file(&mut self, name: String, content: String) -> usize {
        self.files.add(name, content)
    }

    pub fn error_string(&self) -> &str {
        &self.error_string
    }

    /// Number of diagnostics emitted at `Level::Error`
    pub fn error_count(&self) -> usize {
        self.error_count
    }

    /// Parametric over any pest `RuleType`, so every grammar can report
    /// against the `Pair` it is looking at
    pub fn emit_diagnostic_parsing<R: RuleType>(
        &mut self,
        message: &str,
        fileid: usize,
        pair: &Pair<'_, R>,
        level: Level,
    ) {
        let span = pair.as_span();
        self.emit_diagnostic_span(message, fileid, span.start(), span.end(), level);
    }

    pub fn emit_diagnostic_span(
        &mut self,
        message: &str,
        fileid: usize,
        start: usize,
        end: usize,
        level: Level,
    ) {
        let label = Label {
            message: Some(message.to_string()),
            range: (start, end),
        };
        self.emit(Diagnostic {
            title: format!("{:?} in file {}", level, fileid),
            message: message.to_string(),
            level,
            location: Some((fileid, label)),
        });
    }

    pub fn emit_general_message(&mut self, message: &str, level: Level) {
        self.emit(Diagnostic {
            title: format!("{:?}", level),
            message: message.to_string(),
            level,
            location: None,
        });
    }

    fn emit(&mut self, diagnostic: Diagnostic) {
        if diagnostic.level == Level::Error {
            self.error_count += 1;
        }
        let buffer = &mut self.create_buffer();
        diagnostic.emit(buffer, &self.files);
        let error_msg = String::from_utf8_lossy(buffer.as_slice());
        self.error_string.push_str(&error_msg);
        eprint!("{}", error_msg);
    }
}

#[cfg(test)]
mod tests {
    use strip_ansi_escapes::strip_str;

    use super::*;

    #[test]
    fn span_diagnostics_point_at_the_source() {
        let mut handler = DiagnosticHandler::new(ColorChoice::Always);
        let file_id = handler.add_file(
            "pair.cfsm".to_string(),
            "alphabet Req;\nmachine m {\n    states A;\n    initial B;\n}\n".to_string(),
        );
        handler.emit_diagnostic_span("state `B` is not declared", file_id, 52, 53, Level::Error);
        handler.emit_diagnostic_span("unused key", file_id, 9, 12, Level::Warning);

        let content = strip_str(handler.error_string());
        assert!(content.contains("error: state `B` is not declared"));
        assert!(content.contains("pair.cfsm:4:13"));
        assert!(content.contains("warning: unused key"));
        assert!(content.contains("pair.cfsm:1:10"));
        assert_eq!(handler.error_count(), 1);
    }

    #[test]
    fn general_messages_have_no_location() {
        let mut handler = DiagnosticHandler::default();
        handler.emit_general_message("expected exactly two machines, found 1", Level::Error);
        assert_eq!(
            handler.error_string(),
            "Error: expected exactly two machines, found 1\n"
        );
    }
}
