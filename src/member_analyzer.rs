//! Member extraction and method rendering for class bodies
//!
//! Declared members are computed on demand as [`MemberSet`] values: properties are the
//! attributes assigned through the initializer's receiver, methods are the function
//! definitions directly in the class body.
//!
//! Rendering goes through [`render_method`], which regenerates a method from the model
//! and falls back to slicing the original text when the model cannot be regenerated.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::source::{string_continuation_lines, strip_indent};
use crate::syntax::{
    gap_before, join_lines, ClassDef, CodeKind, CodeStmt, FunctionDef, Module, Origin,
    ParamKind, Stmt, INDENT,
};

/// Methods whose names never take part in member bookkeeping
pub const SPECIAL_METHODS: &[&str] = &["__init__", "__del__", "__new__"];

pub fn is_special(name: &str) -> bool {
    SPECIAL_METHODS.contains(&name)
}

/// Declared properties and methods of a class
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemberSet {
    pub properties: BTreeSet<String>,
    pub methods: BTreeSet<String>,
}

impl MemberSet {
    pub fn of(class: &ClassDef) -> Self {
        MemberSet {
            properties: declared_properties(class),
            methods: declared_methods(class),
        }
    }

    /// Members that a mapping must account for
    pub fn without_specials(mut self) -> Self {
        self.methods.retain(|m| !is_special(m));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains(name) || self.methods.contains(name)
    }

    pub fn len(&self) -> usize {
        self.properties.len() + self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.methods.is_empty()
    }
}

/// The class initializer, if it defines one
pub fn initializer(class: &ClassDef) -> Option<&FunctionDef> {
    class.methods().find(|m| m.name == "__init__")
}

/// Attribute names assigned through the initializer's receiver
pub fn declared_properties(class: &ClassDef) -> BTreeSet<String> {
    let Some(init) = initializer(class) else {
        return BTreeSet::new();
    };
    let receiver = init.receiver().unwrap_or("self");
    init.body
        .iter()
        .filter_map(Stmt::as_code)
        .flat_map(|stmt| stmt.attrs_assigned_on(receiver))
        .map(str::to_string)
        .collect()
}

/// Names of function definitions directly in the class body
pub fn declared_methods(class: &ClassDef) -> BTreeSet<String> {
    class.methods().map(|m| m.name.clone()).collect()
}

/// Every definition with this name, in body order (a property and its setter share one)
pub fn methods_named<'a>(class: &'a ClassDef, name: &'a str) -> impl Iterator<Item = &'a FunctionDef> {
    class.methods().filter(move |m| m.name == name)
}

pub fn find_method<'a>(class: &'a ClassDef, name: &str) -> Option<&'a FunctionDef> {
    class.methods().find(|m| m.name == name)
}

/// Initializer statements assigning any of `properties` through `receiver`
pub fn assignments_to<'a>(
    init: &'a FunctionDef,
    properties: &'a BTreeSet<String>,
) -> impl Iterator<Item = &'a CodeStmt> {
    let receiver = init.receiver().unwrap_or("self");
    init.body
        .iter()
        .filter_map(Stmt::as_code)
        .filter(move |c| c.attrs_assigned_on(receiver).any(|a| properties.contains(a)))
}

/// Per-method facts used when redistributing members
#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub name: String,
    /// Attributes read or written as `self.<name>` inside the method
    pub self_reads: BTreeSet<String>,
}

/// Collects [`MethodInfo`] for every method of a class
pub struct ClassAnalyzer<'a> {
    source: &'a str,
    methods: Vec<MethodInfo>,
}

impl<'a> ClassAnalyzer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            methods: Vec::new(),
        }
    }

    pub fn analyze(&mut self, class: &ClassDef) {
        for method in class.methods() {
            let text = render_method(method, "", self.source);
            let receiver = method.receiver().unwrap_or("self");
            self.methods.push(MethodInfo {
                name: method.name.clone(),
                self_reads: self_attribute_reads(&text, receiver),
            });
        }
    }

    pub fn methods(&self) -> &[MethodInfo] {
        &self.methods
    }

    /// Attributes referenced by any analyzed method not in `excluded`
    pub fn reads_outside(&self, excluded: &BTreeSet<String>) -> BTreeSet<String> {
        self.methods
            .iter()
            .filter(|m| !excluded.contains(&m.name))
            .flat_map(|m| m.self_reads.iter().cloned())
            .collect()
    }
}

static ATTRIBUTE_ACCESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\w.])([A-Za-z_]\w*)\.([A-Za-z_]\w*)").unwrap());

/// Attribute names referenced as `<receiver>.<name>` in a fragment of code
pub fn self_attribute_reads(text: &str, receiver: &str) -> BTreeSet<String> {
    ATTRIBUTE_ACCESS
        .captures_iter(text)
        .filter(|cap| &cap[1] == receiver)
        .map(|cap| cap[2].to_string())
        .collect()
}

/// Argument list that forwards a call with the same parameters
///
/// The receiver is dropped when `skip_receiver` is set. Parameters after `*` or
/// `*args` are passed by keyword.
pub fn call_arguments(func: &FunctionDef, skip_receiver: bool) -> String {
    let mut args = Vec::new();
    let mut keyword_only = false;
    let skip = if skip_receiver && func.receiver().is_some() { 1 } else { 0 };
    for param in func.params.iter().skip(skip) {
        match param.kind {
            ParamKind::Regular if keyword_only => args.push(format!("{0}={0}", param.name)),
            ParamKind::Regular => args.push(param.name.clone()),
            ParamKind::VarPositional => {
                args.push(format!("*{}", param.name));
                keyword_only = true;
            }
            ParamKind::KeywordSeparator => keyword_only = true,
            ParamKind::PositionalSeparator => {}
            ParamKind::VarKeyword => args.push(format!("**{}", param.name)),
        }
    }
    args.join(", ")
}

/// The body's leading string literal statement, if any
pub fn docstring_stmt(body: &[Stmt]) -> Option<&CodeStmt> {
    body.iter()
        .find(|s| !matches!(s, Stmt::Comment(_)))
        .and_then(Stmt::as_code)
        .filter(|c| c.kind == CodeKind::StringLiteral)
}

/// Value of the body's docstring, quotes and prefixes removed
pub fn docstring(body: &[Stmt]) -> Option<String> {
    docstring_stmt(body).and_then(|c| string_literal_value(&c.text))
}

/// Contents of the first string literal in `text`
pub fn string_literal_value(text: &str) -> Option<String> {
    let text = text.trim_start();
    let body = text.trim_start_matches(|c: char| "rRuUbBfF".contains(c));
    let quote = ["\"\"\"", "'''", "\"", "'"]
        .into_iter()
        .find(|q| body.starts_with(q))?;
    let rest = &body[quote.len()..];
    let mut escaped = false;
    for (i, c) in rest.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
            continue;
        }
        if rest[i..].starts_with(quote) {
            return Some(rest[..i].to_string());
        }
    }
    None
}

/// Normalise a docstring the way `inspect.cleandoc` does, then trim it
pub fn clean_docstring(doc: &str) -> String {
    let expanded = doc.replace('\t', "        ");
    let lines: Vec<&str> = expanded.lines().collect();
    let Some((first, rest)) = lines.split_first() else {
        return String::new();
    };
    let margin = rest
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    let mut cleaned: Vec<String> = vec![first.trim_start().to_string()];
    cleaned.extend(
        rest.iter()
            .map(|l| strip_indent(l, margin).trim_end().to_string()),
    );
    cleaned.join("\n").trim().to_string()
}

fn leading_ws(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Re-indent a block relative to its first non-blank line
///
/// Lines continuing a multi-line string are kept byte for byte.
pub fn reindent(text: &str, indent: &str) -> String {
    let base = text
        .lines()
        .find(|l| !l.trim().is_empty())
        .map(leading_ws)
        .unwrap_or(0);
    let dedented: Vec<&str> = text
        .split('\n')
        .map(|line| &line[leading_ws(line).min(base)..])
        .collect();
    let in_string = string_continuation_lines(&dedented.join("\n"));
    let mut lines: Vec<String> = text
        .split('\n')
        .zip(dedented)
        .enumerate()
        .map(|(i, (original, line))| {
            if in_string.contains(&i) {
                original.trim_end_matches('\r').to_string()
            } else if line.trim().is_empty() {
                String::new()
            } else {
                format!("{}{}", indent, line.trim_end_matches('\r'))
            }
        })
        .collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    while lines.first().is_some_and(|l| l.is_empty()) {
        lines.remove(0);
    }
    lines.join("\n")
}

fn is_def_line(line: &str, name: Option<&str>) -> bool {
    let trimmed = line.trim_start();
    let rest = trimmed
        .strip_prefix("async ")
        .map(str::trim_start)
        .unwrap_or(trimmed);
    match rest.strip_prefix("def ") {
        Some(after) => match name {
            Some(name) => after
                .trim_start()
                .strip_prefix(name)
                .is_some_and(|tail| tail.trim_start().starts_with('(')),
            None => true,
        },
        None => false,
    }
}

fn bracket_delta(line: &str) -> i32 {
    line.chars()
        .map(|c| match c {
            '(' | '[' | '{' => 1,
            ')' | ']' | '}' => -1,
            _ => 0,
        })
        .sum()
}

/// Slice a method out of the original text by indentation tracking
///
/// Parsed methods start at their recorded row; synthesized ones are located by a
/// `def <name>(` search, pulling in decorator lines directly above.
pub fn slice_method_text(source: &str, method: &FunctionDef) -> Option<String> {
    let lines: Vec<&str> = source.lines().collect();
    let start = match method.origin {
        Origin::Parsed(span) => span.start_row,
        Origin::Synthesized => {
            let def_row = lines
                .iter()
                .position(|l| is_def_line(l, Some(&method.name)))?;
            let indent = leading_ws(lines[def_row]);
            let mut start = def_row;
            while start > 0 {
                let above = lines[start - 1];
                if above.trim_start().starts_with('@') && leading_ws(above) == indent {
                    start -= 1;
                } else {
                    break;
                }
            }
            start
        }
    };
    let own_indent = leading_ws(lines.get(start)?);
    let def_row = (start..lines.len()).find(|&r| is_def_line(lines[r], None))?;

    // The header may span several lines inside brackets
    let mut header_end = def_row;
    let mut depth = bracket_delta(lines[def_row]);
    while depth > 0 && header_end + 1 < lines.len() {
        header_end += 1;
        depth += bracket_delta(lines[header_end]);
    }

    let mut end = header_end;
    for (row, line) in lines.iter().enumerate().skip(header_end + 1) {
        if line.trim().is_empty() {
            continue;
        }
        if leading_ws(line) <= own_indent {
            break;
        }
        end = row;
    }
    Some(lines[start..=end].join("\n"))
}

/// Render a method at the requested indentation
///
/// Structural regeneration is tried first; lines continuing a multi-line string keep
/// their original bytes. When regeneration fails, the method is sliced out of `source`
/// (by span for parsed methods, by name for synthesized ones). An empty string is
/// returned when neither path yields any content.
pub fn render_method(method: &FunctionDef, indent: &str, source: &str) -> String {
    if let Some(lines) = method.unparse_lines() {
        let text = join_lines(lines.into_iter().map(|line| line.indented(indent)));
        if !text.trim().is_empty() {
            return text;
        }
    }
    match method.origin {
        Origin::Parsed(_) => debug!("structural rendering of '{}' failed, slicing by span", method.name),
        Origin::Synthesized => debug!("structural rendering of '{}' failed, slicing by name", method.name),
    }
    match slice_method_text(source, method) {
        Some(text) if !text.trim().is_empty() => reindent(&text, indent),
        _ => {
            warn!("method '{}' could not be rendered and is dropped", method.name);
            String::new()
        }
    }
}

/// Regenerates whole modules from the statement model
pub struct CodeGenerator<'a> {
    source: &'a str,
}

impl<'a> CodeGenerator<'a> {
    /// `source` is the text the parsed nodes were read from
    pub fn new(source: &'a str) -> Self {
        Self { source }
    }

    pub fn module(&self, module: &Module) -> String {
        let mut lines = Vec::new();
        self.body(&module.body, 0, true, &mut lines);
        while lines.last().is_some_and(|l: &String| l.is_empty()) {
            lines.pop();
        }
        if lines.is_empty() {
            return String::new();
        }
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }

    pub fn class(&self, class: &ClassDef, depth: usize) -> String {
        let indent = INDENT.repeat(depth);
        let mut lines: Vec<String> = class
            .decorators
            .iter()
            .map(|d| format!("{}{}", indent, d))
            .collect();
        lines.push(format!("{}{}", indent, class.header()));
        self.body(&class.body, depth + 1, false, &mut lines);
        lines.join("\n")
    }

    fn body(&self, stmts: &[Stmt], depth: usize, top_level: bool, lines: &mut Vec<String>) {
        let indent = INDENT.repeat(depth);
        let mut emitted_real = false;
        for (i, stmt) in stmts.iter().enumerate() {
            let text = match stmt {
                Stmt::Class(class) => self.class(class, depth),
                Stmt::Function(func) => render_method(func, &indent, self.source),
                Stmt::Comment(comment) => format!("{}{}", indent, comment.text),
                Stmt::Code(code) => code.render(&indent),
            };
            if text.trim().is_empty() {
                continue;
            }
            for _ in 0..gap_before(stmts, i, top_level) {
                lines.push(String::new());
            }
            lines.extend(text.lines().map(str::to_string));
            if !matches!(stmt, Stmt::Comment(_)) {
                emitted_real = true;
            }
        }
        if !emitted_real && depth > 0 {
            lines.push(format!("{}pass", indent));
        }
    }
}
