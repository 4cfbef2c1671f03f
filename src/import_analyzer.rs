//! Import statement analysis and generation for split packages

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;

static IMPORT_STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(from[ \t]+[\w.]+[ \t]+)?import[ \t]+(\([^)]*\)|[^\n#;]*)").unwrap()
});

/// Names bound by the import statements in `text`
///
/// `import a.b` binds `a`, `import a.b as c` binds `c`, `from m import x as y` binds `y`.
/// Star imports bind nothing that can be named.
pub fn import_bindings(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    for cap in IMPORT_STATEMENT.captures_iter(text) {
        let is_from = cap.get(1).is_some();
        let list = cap[2].trim().trim_start_matches('(').trim_end_matches(')');
        for item in list.split(',') {
            let item = item.trim().trim_end_matches('\\').trim();
            if item.is_empty() || item == "*" {
                continue;
            }
            let bound = match item.split_once(" as ") {
                Some((_, alias)) => alias.trim(),
                None if is_from => item,
                None => item.split('.').next().unwrap_or(item),
            };
            let bound = bound.split_whitespace().next().unwrap_or(bound);
            if !bound.is_empty() && !names.iter().any(|n| n == bound) {
                names.push(bound.to_string());
            }
        }
    }
    names
}

fn string_prefix_len(bytes: &[u8], i: usize) -> Option<(usize, bool)> {
    let mut j = i;
    let mut formatted = false;
    while j < bytes.len() && j - i < 2 && b"rRbBuUfF".contains(&bytes[j]) {
        formatted |= bytes[j] == b'f' || bytes[j] == b'F';
        j += 1;
    }
    if j < bytes.len() && (bytes[j] == b'"' || bytes[j] == b'\'') {
        Some((j - i, formatted))
    } else {
        None
    }
}

/// Identifiers used as bare names in code, ignoring comments, string contents and
/// attribute accesses (`obj.name` yields `obj` only)
///
/// f-string contents are scanned, since their replacement fields are code.
pub fn referenced_names(text: &str) -> BTreeSet<String> {
    let bytes = text.as_bytes();
    let mut names = BTreeSet::new();
    let mut i = 0;
    let mut prev_significant = b' ';
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'#' {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if c.is_ascii_alphabetic() || c == b'_' {
            if prev_significant != b'.' {
                if let Some((prefix, formatted)) = string_prefix_len(bytes, i) {
                    let end = skip_string(bytes, i + prefix);
                    if formatted {
                        names.extend(replacement_field_names(&text[i + prefix..end]));
                    }
                    i = end;
                    prev_significant = b'"';
                    continue;
                }
            }
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            if prev_significant != b'.' {
                names.insert(text[start..i].to_string());
            }
            prev_significant = b'a';
            continue;
        }
        if c == b'"' || c == b'\'' {
            i = skip_string(bytes, i);
            prev_significant = b'"';
            continue;
        }
        if !c.is_ascii_whitespace() {
            prev_significant = c;
        }
        i += 1;
    }
    names
}

/// Names used inside the `{...}` fields of an f-string literal
fn replacement_field_names(literal: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let mut depth = 0usize;
    let mut field = String::new();
    let mut chars = literal.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if depth == 0 && chars.peek() == Some(&'{') => {
                chars.next();
            }
            '{' => {
                if depth > 0 {
                    field.push(c);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    let expr = field.split(['!', ':']).next().unwrap_or("");
                    names.extend(referenced_names(expr));
                    field.clear();
                } else {
                    field.push(c);
                }
            }
            _ if depth > 0 => field.push(c),
            _ => {}
        }
    }
    names
}

/// Index just past the string literal whose opening quote is at `start`
fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let triple = bytes.len() >= start + 3 && bytes[start + 1] == quote && bytes[start + 2] == quote;
    let mut i = if triple { start + 3 } else { start + 1 };
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' if !triple => return i,
            c if c == quote => {
                if !triple {
                    return i + 1;
                }
                if bytes.len() >= i + 3 && bytes[i + 1] == quote && bytes[i + 2] == quote {
                    return i + 3;
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Tracks which generated module defines each name and writes the imports between them
#[derive(Debug, Default)]
pub struct ImportAnalyzer {
    /// Defined name -> module that defines it
    definitions: HashMap<String, String>,
}

impl ImportAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `module` defines `name`; the first registration wins
    pub fn register(&mut self, module: &str, name: &str) {
        self.definitions
            .entry(name.to_string())
            .or_insert_with(|| module.to_string());
    }

    pub fn module_of(&self, name: &str) -> Option<&str> {
        self.definitions.get(name).map(String::as_str)
    }

    /// Names `module` uses from other generated modules, grouped by defining module
    pub fn dependencies(&self, module: &str, code: &str) -> BTreeMap<String, BTreeSet<String>> {
        let mut needed: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for name in referenced_names(code) {
            if let Some(owner) = self.definitions.get(&name) {
                if owner != module {
                    needed.entry(owner.clone()).or_default().insert(name);
                }
            }
        }
        needed
    }

    /// Relative import statements `module` needs for the names it references in `code`
    pub fn generate_imports(&self, module: &str, code: &str) -> Vec<String> {
        self.dependencies(module, code)
            .into_iter()
            .map(|(owner, names)| {
                let names: Vec<String> = names.into_iter().collect();
                format!("from .{} import {}", owner, names.join(", "))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_bindings_forms() {
        assert_eq!(import_bindings("import os"), vec!["os"]);
        assert_eq!(import_bindings("import os.path as osp, sys"), vec!["osp", "sys"]);
        assert_eq!(import_bindings("import xml.etree.ElementTree"), vec!["xml"]);
        assert_eq!(
            import_bindings("from .models import (\n    User,\n    Group as G,\n)"),
            vec!["User", "G"]
        );
        assert!(import_bindings("from typing import *").is_empty());
        assert_eq!(
            import_bindings("try:\n    import ujson as json\nexcept ImportError:\n    import json"),
            vec!["json"]
        );
    }

    #[test]
    fn test_referenced_names_skip_strings_comments_attributes() {
        let code = "def f(user):\n    \"\"\"Return a Group.\"\"\"\n    # Helper is unused\n    x = user.Group\n    return Widget(x, 'Helper', f\"{Thing}\")\n";
        let names = referenced_names(code);
        assert!(names.contains("Widget"));
        assert!(names.contains("Thing"));
        assert!(names.contains("user"));
        assert!(!names.contains("Group"));
        assert!(!names.contains("Helper"));
    }

    #[test]
    fn test_generate_imports_groups_by_module() {
        let mut analyzer = ImportAnalyzer::new();
        analyzer.register("models", "User");
        analyzer.register("models", "Group");
        analyzer.register("services", "notify");
        analyzer.register("_common", "LIMIT");

        let code = "def notify(user: User, group: Group):\n    return len(LIMIT)\n";
        assert_eq!(
            analyzer.generate_imports("services", code),
            vec![
                "from ._common import LIMIT".to_string(),
                "from .models import Group, User".to_string(),
            ]
        );
        assert_eq!(analyzer.module_of("notify"), Some("services"));
    }
}
