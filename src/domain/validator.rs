//! Static safety validation of compiled program text.
//!
//! The validator never executes anything. It tokenizes the artifact's source
//! and rejects forbidden constructs (I/O, process control, dynamic loading,
//! reflection, loops, string literals), calls outside the registered
//! primitives and references to undeclared names. A lexically clean source is
//! then parsed, and the result must equal the artifact's `Program` and
//! `FeedIndex` exactly, so the text that was inspected is the logic that runs.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use super::compiler::CompiledArtifact;
use super::indicator::IndicatorField;
use super::program::{self, SOURCE_FIELD};

/// Primitives a program may call.
pub const ALLOWED_CALLS: [&str; 15] = [
    "SMA",
    "EMA",
    "RSI",
    "MACD",
    "BBANDS",
    "ALL",
    "GT",
    "LT",
    "GE",
    "LE",
    "EQ",
    "TRAILING_STOP",
    "TAKE_PROFIT",
    "PROFIT_TARGET",
    "STOP_LOSS",
];

pub const STATEMENTS: [&str; 3] = ["series", "entry", "exit"];

const ALLOWED_PUNCTUATION: [char; 6] = ['(', ')', ',', '.', '=', '-'];

const FILESYSTEM: &[&str] = &[
    "open", "file", "fopen", "read", "write", "readfile", "writefile", "fs", "path", "pathlib",
    "shutil", "glob", "remove", "unlink", "rmdir", "mkdir", "chmod", "chown", "rename", "io",
    "stdin", "stdout", "stderr",
];

const NETWORK: &[&str] = &[
    "socket", "http", "https", "url", "urllib", "urlopen", "requests", "connect", "fetch",
    "curl", "wget", "tcp", "udp", "dns", "net", "download", "upload", "send", "recv", "smtp",
    "ftp",
];

const PROCESS: &[&str] = &[
    "subprocess", "system", "popen", "spawn", "fork", "kill", "shell", "sh", "bash", "cmd",
    "command", "process", "os", "signal_handler", "thread", "threading", "multiprocessing",
];

const DYNAMIC_IMPORT: &[&str] = &[
    "import", "importlib", "use", "require", "include", "load", "eval", "exec", "compile",
    "dlopen", "extern", "crate", "mod", "from",
];

const REFLECTION: &[&str] = &[
    "getattr", "setattr", "delattr", "hasattr", "globals", "locals", "vars", "dir", "type",
    "reflect", "builtins", "self", "super", "object", "class",
];

const UNBOUNDED_LOOP: &[&str] = &[
    "while", "loop", "for", "goto", "repeat", "until", "do", "recurse", "recursion", "lambda",
    "def", "fn", "jump", "yield",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCategory {
    FileSystem,
    Network,
    Process,
    DynamicImport,
    Reflection,
    UnboundedLoop,
    StringLiteral,
    DisallowedCharacter,
    UnknownStatement,
    UnregisteredCall,
    UndeclaredReference,
    Syntax,
    ProgramMismatch,
    FeedIndexMismatch,
}

impl ViolationCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationCategory::FileSystem => "file_system",
            ViolationCategory::Network => "network",
            ViolationCategory::Process => "process",
            ViolationCategory::DynamicImport => "dynamic_import",
            ViolationCategory::Reflection => "reflection",
            ViolationCategory::UnboundedLoop => "unbounded_loop",
            ViolationCategory::StringLiteral => "string_literal",
            ViolationCategory::DisallowedCharacter => "disallowed_character",
            ViolationCategory::UnknownStatement => "unknown_statement",
            ViolationCategory::UnregisteredCall => "unregistered_call",
            ViolationCategory::UndeclaredReference => "undeclared_reference",
            ViolationCategory::Syntax => "syntax",
            ViolationCategory::ProgramMismatch => "program_mismatch",
            ViolationCategory::FeedIndexMismatch => "feed_index_mismatch",
        }
    }
}

impl fmt::Display for ViolationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{line}:{column}: {category} `{token}`: {message}")]
pub struct Violation {
    pub line: usize,
    pub column: usize,
    pub token: String,
    pub category: ViolationCategory,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Pass,
    Rejected(Vec<Violation>),
}

impl ValidationResult {
    pub fn is_pass(&self) -> bool {
        matches!(self, ValidationResult::Pass)
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            ValidationResult::Pass => &[],
            ValidationResult::Rejected(v) => v,
        }
    }
}

pub fn validate(artifact: &CompiledArtifact) -> ValidationResult {
    let source = artifact.source();
    let mut violations = lexical_violations(source);

    if violations.is_empty() {
        violations.extend(structural_violations(artifact));
    }

    if violations.is_empty() {
        ValidationResult::Pass
    } else {
        ValidationResult::Rejected(violations)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident,
    Number,
    Punct(char),
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    text: String,
    line: usize,
    column: usize,
}

fn violation(
    line: usize,
    column: usize,
    token: &str,
    category: ViolationCategory,
    message: impl Into<String>,
) -> Violation {
    Violation {
        line,
        column,
        token: token.to_string(),
        category,
        message: message.into(),
    }
}

/// Split source into tokens, reporting string literals and characters
/// outside the program alphabet as violations.
fn tokenize(source: &str) -> (Vec<Token>, Vec<Violation>) {
    let mut tokens = Vec::new();
    let mut violations = Vec::new();

    for (line_idx, line) in source.lines().enumerate() {
        let line_no = line_idx + 1;
        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let ch = chars[i];
            let column = i + 1;
            if ch == '#' {
                break;
            } else if ch.is_whitespace() {
                i += 1;
            } else if ch.is_ascii_alphabetic() || ch == '_' {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Ident,
                    text: chars[start..i].iter().collect(),
                    line: line_no,
                    column,
                });
            } else if ch.is_ascii_digit() {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Number,
                    text: chars[start..i].iter().collect(),
                    line: line_no,
                    column,
                });
            } else if ch == '"' || ch == '\'' || ch == '`' {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i] != ch {
                    i += 1;
                }
                i = (i + 1).min(chars.len());
                let text: String = chars[start..i].iter().collect();
                violations.push(violation(
                    line_no,
                    column,
                    &text,
                    ViolationCategory::StringLiteral,
                    "string literals are not permitted",
                ));
            } else if ALLOWED_PUNCTUATION.contains(&ch) {
                tokens.push(Token {
                    kind: TokenKind::Punct(ch),
                    text: ch.to_string(),
                    line: line_no,
                    column,
                });
                i += 1;
            } else {
                violations.push(violation(
                    line_no,
                    column,
                    &ch.to_string(),
                    ViolationCategory::DisallowedCharacter,
                    format!("character '{}' is not part of the program language", ch),
                ));
                i += 1;
            }
        }
    }

    (tokens, violations)
}

fn forbidden_category(ident: &str) -> Option<ViolationCategory> {
    let lower = ident.to_ascii_lowercase();
    if lower.starts_with("__") || lower.ends_with("__") {
        return Some(ViolationCategory::Reflection);
    }
    let lists: [(&[&str], ViolationCategory); 6] = [
        (FILESYSTEM, ViolationCategory::FileSystem),
        (NETWORK, ViolationCategory::Network),
        (PROCESS, ViolationCategory::Process),
        (DYNAMIC_IMPORT, ViolationCategory::DynamicImport),
        (REFLECTION, ViolationCategory::Reflection),
        (UNBOUNDED_LOOP, ViolationCategory::UnboundedLoop),
    ];
    lists
        .iter()
        .find(|(words, _)| words.contains(&lower.as_str()))
        .map(|(_, category)| *category)
}

fn lexical_violations(source: &str) -> Vec<Violation> {
    let (tokens, mut violations) = tokenize(source);
    let mut declared: BTreeSet<String> = BTreeSet::new();

    for (i, token) in tokens.iter().enumerate() {
        let prev = i.checked_sub(1).map(|p| &tokens[p]);
        let next = tokens.get(i + 1);
        let line_start = prev.is_none_or(|p| p.line != token.line);

        if token.kind == TokenKind::Ident {
            if let Some(category) = forbidden_category(&token.text) {
                violations.push(violation(
                    token.line,
                    token.column,
                    &token.text,
                    category,
                    format!("'{}' is forbidden ({})", token.text, category),
                ));
                continue;
            }
        }

        if line_start {
            if !(token.kind == TokenKind::Ident && STATEMENTS.contains(&token.text.as_str())) {
                violations.push(violation(
                    token.line,
                    token.column,
                    &token.text,
                    ViolationCategory::UnknownStatement,
                    "statements must start with 'series', 'entry' or 'exit'",
                ));
            }
            continue;
        }

        if token.kind != TokenKind::Ident {
            continue;
        }
        let text = token.text.as_str();

        let is_call = next.is_some_and(|n| n.kind == TokenKind::Punct('(') && n.line == token.line);
        let is_attribute = prev.is_some_and(|p| p.kind == TokenKind::Punct('.'));
        let is_declaration = i >= 1
            && tokens[i - 1].text == "series"
            && tokens[i - 1].line == token.line
            && (i < 2 || tokens[i - 2].line != token.line);

        if is_call {
            if !ALLOWED_CALLS.contains(&text) {
                violations.push(violation(
                    token.line,
                    token.column,
                    text,
                    ViolationCategory::UnregisteredCall,
                    format!("'{}' is not a registered primitive", text),
                ));
            }
        } else if is_attribute {
            if !IndicatorField::ATTRIBUTES.contains(&text) {
                violations.push(violation(
                    token.line,
                    token.column,
                    text,
                    ViolationCategory::Reflection,
                    format!("attribute '{}' is not an indicator output", text),
                ));
            }
        } else if is_declaration {
            declared.insert(text.to_string());
        } else if text != SOURCE_FIELD && !declared.contains(text) {
            violations.push(violation(
                token.line,
                token.column,
                text,
                ViolationCategory::UndeclaredReference,
                format!("'{}' is not a declared series", text),
            ));
        }
    }

    violations
}

/// Parse the source and prove it denotes exactly the artifact's program and
/// feed index.
fn structural_violations(artifact: &CompiledArtifact) -> Vec<Violation> {
    let source = artifact.source();
    let parsed = match program::parse(source) {
        Ok(p) => p,
        Err(e) => {
            let (line, column) = e.line_col(source);
            let token = source
                .lines()
                .nth(line - 1)
                .and_then(|l| l.get(column - 1..))
                .and_then(|rest| rest.split_whitespace().next())
                .unwrap_or("")
                .to_string();
            return vec![violation(
                line,
                column,
                &token,
                ViolationCategory::Syntax,
                e.message,
            )];
        }
    };

    let mut violations = Vec::new();
    if &parsed != artifact.program() {
        violations.push(violation(
            1,
            1,
            "",
            ViolationCategory::ProgramMismatch,
            "source text does not denote the program scheduled to run",
        ));
    }

    let expected = parsed.feed_index();
    if &expected != artifact.feed_index() {
        let missing: Vec<&str> = expected
            .names()
            .filter(|n| !artifact.feed_index().names().any(|m| m == *n))
            .collect();
        violations.push(violation(
            1,
            1,
            &missing.join(","),
            ViolationCategory::FeedIndexMismatch,
            "feed index does not match the columns the program reads",
        ));
    }

    for (idx, decl) in parsed.series.iter().enumerate() {
        if !parsed.columns.iter().any(|c| c.series == idx) {
            let (line, column) = declaration_position(source, &decl.name);
            violations.push(violation(
                line,
                column,
                &decl.name,
                ViolationCategory::FeedIndexMismatch,
                "declared series has no feed index column",
            ));
        }
    }

    violations
}

fn declaration_position(source: &str, name: &str) -> (usize, usize) {
    source
        .lines()
        .enumerate()
        .find_map(|(i, line)| {
            let rest = line.trim_start().strip_prefix("series")?;
            let col = line.find(name)?;
            rest.trim_start().starts_with(name).then_some((i + 1, col + 1))
        })
        .unwrap_or((1, 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::compiler::compile;
    use crate::domain::document::StrategyDocument;

    fn artifact() -> CompiledArtifact {
        let doc: StrategyDocument = serde_json::from_value(serde_json::json!({
            "name": "t",
            "universe": ["AAPL"],
            "timeframe": {"start": "2020-01-01", "end": "2020-12-31"},
            "entry": [
                {"type": "indicator", "ind": "SMA", "period": 50, "op": ">", "rhs": {"ind": "SMA", "period": 200}},
                {"type": "indicator", "ind": "MACD", "op": ">", "rhs": {"ind": "MACD", "field": "signal"}}
            ],
            "exit": [{"type": "stop_loss", "percent": 0.05}],
            "position": {"sizing": "percent_cash", "value": 0.5},
            "costs": {"commission_per_share": 0.0}
        }))
        .unwrap();
        compile(&doc).unwrap()
    }

    fn with_source(source: &str) -> CompiledArtifact {
        let base = artifact();
        CompiledArtifact::new(
            source.to_string(),
            base.program().clone(),
            base.feed_index().clone(),
            base.params().clone(),
        )
    }

    fn categories(result: &ValidationResult) -> Vec<ViolationCategory> {
        result.violations().iter().map(|v| v.category).collect()
    }

    #[test]
    fn compiled_artifact_passes() {
        assert_eq!(validate(&artifact()), ValidationResult::Pass);
    }

    #[test]
    fn unregistered_io_call_is_rejected() {
        let mut source = artifact().source().to_string();
        source.push_str("exit socket(0.1)\n");
        let result = validate(&with_source(&source));
        assert!(!result.is_pass());
        let v = &result.violations()[0];
        assert_eq!(v.category, ViolationCategory::Network);
        assert_eq!(v.token, "socket");
        assert_eq!(v.line, 7);
        assert_eq!(v.column, 6);
    }

    #[test]
    fn unknown_call_is_unregistered() {
        let source = artifact().source().replace("STOP_LOSS", "DELETE_ALL");
        let result = validate(&with_source(&source));
        assert_eq!(categories(&result), vec![ViolationCategory::UnregisteredCall]);
    }

    #[test]
    fn forbidden_categories() {
        let cases = [
            ("import os", ViolationCategory::DynamicImport),
            ("while GT(sma_50, 1)", ViolationCategory::UnboundedLoop),
            ("exit subprocess(1)", ViolationCategory::Process),
            ("exit open(1)", ViolationCategory::FileSystem),
            ("exit sma_50.__class__", ViolationCategory::Reflection),
            ("exit getattr(sma_50)", ViolationCategory::Reflection),
            ("exit eval(1)", ViolationCategory::DynamicImport),
        ];
        for (line, category) in cases {
            let source = format!("{}{}\n", artifact().source(), line);
            let result = validate(&with_source(&source));
            assert!(
                categories(&result).contains(&category),
                "{line}: {:?}",
                result.violations()
            );
        }
    }

    #[test]
    fn string_literals_are_rejected() {
        let source = format!("{}exit STOP_LOSS(\"/etc/passwd\")\n", artifact().source());
        let result = validate(&with_source(&source));
        assert!(categories(&result).contains(&ViolationCategory::StringLiteral));
    }

    #[test]
    fn disallowed_characters_are_rejected() {
        let source = format!("{}exit STOP_LOSS(0.1); exit STOP_LOSS(0.2)\n", artifact().source());
        let result = validate(&with_source(&source));
        assert!(categories(&result).contains(&ViolationCategory::DisallowedCharacter));
    }

    #[test]
    fn unknown_attribute_is_reflection() {
        let source = artifact().source().replace("macd_12_26_9.signal", "macd_12_26_9.fields");
        let result = validate(&with_source(&source));
        assert_eq!(categories(&result), vec![ViolationCategory::Reflection]);
    }

    #[test]
    fn undeclared_reference() {
        let source = artifact().source().replace("GT(sma_50, sma_200)", "GT(sma_50, ema_9)");
        let result = validate(&with_source(&source));
        assert_eq!(categories(&result), vec![ViolationCategory::UndeclaredReference]);
        assert_eq!(result.violations()[0].token, "ema_9");
    }

    #[test]
    fn unknown_statement() {
        let source = format!("{}print(sma_50)\n", artifact().source());
        let result = validate(&with_source(&source));
        assert_eq!(categories(&result)[0], ViolationCategory::UnknownStatement);
    }

    #[test]
    fn text_and_program_must_agree() {
        let source = artifact().source().replace("STOP_LOSS(0.05)", "STOP_LOSS(0.5)");
        let result = validate(&with_source(&source));
        assert_eq!(categories(&result), vec![ViolationCategory::ProgramMismatch]);
    }

    #[test]
    fn feed_index_must_agree() {
        let base = artifact();
        let mut feed = base.feed_index().clone();
        feed.columns.pop();
        let tampered = CompiledArtifact::new(
            base.source().to_string(),
            base.program().clone(),
            feed,
            base.params().clone(),
        );
        let result = validate(&tampered);
        assert_eq!(categories(&result), vec![ViolationCategory::FeedIndexMismatch]);
        assert_eq!(result.violations()[0].token, "macd_12_26_9_signal");
    }

    #[test]
    fn unused_series_is_rejected() {
        let source = artifact().source().replace(
            "series sma_200 = SMA(close, 200)\n",
            "series sma_200 = SMA(close, 200)\nseries rsi_3 = RSI(close, 3)\n",
        );
        let result = validate(&with_source(&source));
        let cats = categories(&result);
        assert!(cats.contains(&ViolationCategory::ProgramMismatch));
        assert!(cats.contains(&ViolationCategory::FeedIndexMismatch));
    }

    #[test]
    fn syntax_errors_are_violations() {
        let source = artifact().source().replace("STOP_LOSS(0.05)", "STOP_LOSS(0.05");
        let result = validate(&with_source(&source));
        assert_eq!(categories(&result), vec![ViolationCategory::Syntax]);
    }

    #[test]
    fn comments_are_ignored() {
        let source = format!("# import os while open\n{}", artifact().source());
        assert!(validate(&with_source(&source)).is_pass());
    }

    #[test]
    fn violation_display() {
        let v = violation(3, 7, "socket", ViolationCategory::Network, "'socket' is forbidden (network)");
        assert_eq!(v.to_string(), "3:7: network `socket`: 'socket' is forbidden (network)");
    }
}
