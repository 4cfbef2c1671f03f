//! Source loading and the comment-preserving parser
//!
//! Parsing runs in two passes:
//!
//! 1. tree-sitter builds the concrete tree, which is converted into the statement
//!    model of [`crate::syntax`].
//! 2. Every comment that starts its own line is turned into a [`Comment`] placeholder
//!    and inserted into the innermost body that owns it, right before the statement it
//!    precedes. If this pass fails the structural model is kept without the comments.
//!
//! Classes are looked up through a [`ClassIndex`] built once per load and rebuilt after
//! every mutation that renames, adds or removes a top-level class.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use tree_sitter::{Node, Parser, Tree};

use crate::error::{RefactorError, Result};
use crate::member_analyzer::CodeGenerator;
use crate::syntax::{
    AttrTarget, ClassDef, CodeKind, CodeStmt, Comment, FunctionDef, Module, Origin, Param,
    ParamKind, Span, Stmt,
};

/// A loaded Python file and its statement model
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub text: String,
    pub module: Module,
    index: ClassIndex,
}

impl SourceFile {
    /// Read and parse a file
    ///
    /// Fails with [`RefactorError::FileSystem`] when the path does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RefactorError::file_system(path, "file not found"));
        }
        let text = fs::read_to_string(path).map_err(|e| RefactorError::io(path, e))?;
        Self::parse_str(path, text)
    }

    /// Parse in-memory text as if it had been read from `path`
    pub fn parse_str(path: impl Into<PathBuf>, text: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let text = text.into();
        let module = parse_module(&path, &text)?;
        let index = ClassIndex::build(&module);
        Ok(SourceFile {
            path,
            text,
            module,
            index,
        })
    }

    /// Rebuild the class index after the module body changed
    pub fn reindex(&mut self) {
        self.index = ClassIndex::build(&self.module);
    }

    pub fn class(&self, name: &str) -> Option<&ClassDef> {
        self.index
            .position(name)
            .and_then(|i| self.module.body.get(i))
            .and_then(Stmt::as_class)
    }

    pub fn class_mut(&mut self, name: &str) -> Option<&mut ClassDef> {
        let position = self.index.position(name)?;
        match self.module.body.get_mut(position) {
            Some(Stmt::Class(class)) => Some(class),
            _ => None,
        }
    }

    /// Position of a class in the module body
    pub fn class_position(&self, name: &str) -> Option<usize> {
        self.index.position(name)
    }

    /// Top-level class names in file order
    pub fn class_names(&self) -> Vec<&str> {
        self.module
            .body
            .iter()
            .filter_map(Stmt::as_class)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// First top-level function with this name
    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.module
            .body
            .iter()
            .filter_map(Stmt::as_function)
            .find(|f| f.name == name)
    }

    /// Regenerate source text from the current model
    pub fn render(&self) -> String {
        CodeGenerator::new(&self.text).module(&self.module)
    }
}

/// Name to body-position lookup for top-level classes; the first class wins
#[derive(Debug, Clone, Default)]
pub struct ClassIndex {
    positions: HashMap<String, usize>,
}

impl ClassIndex {
    pub fn build(module: &Module) -> Self {
        let mut positions = HashMap::new();
        for (i, stmt) in module.body.iter().enumerate() {
            if let Stmt::Class(class) = stmt {
                positions.entry(class.name.clone()).or_insert(i);
            }
        }
        ClassIndex { positions }
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

fn python_tree(path: &Path, text: &str) -> Result<Tree> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| RefactorError::Parse {
            path: path.to_path_buf(),
            line: 0,
            message: format!("cannot load Python grammar: {e}"),
        })?;
    parser.parse(text, None).ok_or_else(|| RefactorError::Parse {
        path: path.to_path_buf(),
        line: 0,
        message: "parser produced no tree".to_string(),
    })
}

/// Parse Python text into the statement model, comments included
pub fn parse_module(path: &Path, text: &str) -> Result<Module> {
    let tree = python_tree(path, text)?;
    let root = tree.root_node();
    if root.has_error() {
        let line = first_error_row(root).map(|r| r + 1).unwrap_or(0);
        return Err(RefactorError::Parse {
            path: path.to_path_buf(),
            line,
            message: "invalid or incomplete statement".to_string(),
        });
    }

    let converter = Converter::new(text);
    let mut module = Module {
        body: converter.block(root),
    };

    let comments = standalone_comments(root, text);
    if !comments.is_empty() {
        let mut body = module.body.clone();
        match attach_comments(&mut body, comments) {
            Ok(()) => module.body = body,
            Err(reason) => warn!(
                "{}: comments dropped, placement failed: {}",
                path.display(),
                reason
            ),
        }
    }
    Ok(module)
}

/// Whether `text` parses as Python, with the first offending line when it does not
pub fn syntax_error_line(text: &str) -> Option<usize> {
    let tree = python_tree(Path::new("<memory>"), text).ok()?;
    let root = tree.root_node();
    if root.has_error() {
        Some(first_error_row(root).map(|r| r + 1).unwrap_or(0))
    } else {
        None
    }
}

/// Tree of a code fragment (one or more statements at column zero), `None` on errors
fn fragment_tree(text: &str) -> Option<Tree> {
    let tree = python_tree(Path::new("<fragment>"), text).ok()?;
    (!tree.root_node().has_error()).then_some(tree)
}

/// The only statement of a fragment, trailing comments aside
fn only_statement(root: Node) -> Option<Node> {
    match code_children(root).as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}

/// Parse a single rewritten or generated statement
///
/// Kind, assignment targets and string lines are derived as for loaded code; the
/// result is synthesized. `None` when the text is not exactly one valid statement.
pub fn parse_statement(text: &str) -> Option<CodeStmt> {
    let tree = fragment_tree(text)?;
    let node = only_statement(tree.root_node())?;
    let mut code = Converter::new(text).code(node);
    code.origin = Origin::Synthesized;
    Some(code)
}

/// Rewrite references to the names in `renames`
///
/// Only identifier nodes change: the attribute part of `a.b`, keyword argument names
/// and string contents keep their text. `None` when the text does not parse.
pub fn rename_identifiers(text: &str, renames: &BTreeMap<String, String>) -> Option<String> {
    if renames.is_empty() {
        return Some(text.to_string());
    }
    let tree = fragment_tree(text)?;
    let mut edits = Vec::new();
    collect_renames(tree.root_node(), text, renames, &mut edits);
    let mut out = text.to_string();
    for (range, to) in edits.into_iter().rev() {
        out.replace_range(range, to);
    }
    Some(out)
}

fn collect_renames<'r>(
    node: Node,
    text: &str,
    renames: &'r BTreeMap<String, String>,
    edits: &mut Vec<(Range<usize>, &'r str)>,
) {
    if node.kind() == "identifier" {
        if let Some(to) = renames.get(&text[node.byte_range()]) {
            let is_label = node.parent().is_some_and(|parent| match parent.kind() {
                "attribute" => parent.child_by_field_name("attribute") == Some(node),
                "keyword_argument" => parent.child_by_field_name("name") == Some(node),
                _ => false,
            });
            if !is_label {
                edits.push((node.byte_range(), to.as_str()));
            }
        }
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_renames(child, text, renames, edits);
    }
}

/// `(target, value)` texts of a parallel assignment such as `a, b = x, y`
///
/// `None` for anything else, including starred unpacking and annotated assignments.
pub fn parallel_assignment(text: &str) -> Option<Vec<(String, String)>> {
    let tree = fragment_tree(text)?;
    let stmt = only_statement(tree.root_node())?;
    if stmt.kind() != "expression_statement" {
        return None;
    }
    let assignment = only_statement(stmt).filter(|n| n.kind() == "assignment")?;
    if assignment.child_by_field_name("type").is_some() {
        return None;
    }
    let left = assignment.child_by_field_name("left")?;
    let right = assignment.child_by_field_name("right")?;
    if !matches!(left.kind(), "pattern_list" | "tuple_pattern")
        || !matches!(right.kind(), "expression_list" | "tuple")
    {
        return None;
    }
    let targets = code_children(left);
    let values = code_children(right);
    let starred = |n: &Node| matches!(n.kind(), "list_splat" | "list_splat_pattern");
    if targets.len() != values.len() || targets.iter().chain(values.iter()).any(starred) {
        return None;
    }
    Some(
        targets
            .iter()
            .zip(values.iter())
            .map(|(t, v)| (text[t.byte_range()].to_string(), text[v.byte_range()].to_string()))
            .collect(),
    )
}

/// Every relative `from` import one package level deeper
///
/// `from .x import y` becomes `from ..x import y` wherever it appears in the fragment,
/// including inside `try` and `if` blocks. `None` when the text does not parse.
pub fn deepen_relative_imports(text: &str) -> Option<String> {
    let tree = fragment_tree(text)?;
    let mut at = Vec::new();
    relative_import_starts(tree.root_node(), &mut at);
    let mut out = text.to_string();
    for start in at.into_iter().rev() {
        out.insert(start, '.');
    }
    Some(out)
}

fn relative_import_starts(node: Node, out: &mut Vec<usize>) {
    if node.kind() == "import_from_statement" {
        if let Some(module) = node.child_by_field_name("module_name") {
            if module.kind() == "relative_import" {
                out.push(module.start_byte());
            }
        }
        return;
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        relative_import_starts(child, out);
    }
}

fn code_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|n| n.kind() != "comment")
        .collect()
}

fn first_error_row(node: Node) -> Option<usize> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_position().row);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() || child.is_missing() {
            if let Some(row) = first_error_row(child) {
                return Some(row);
            }
        }
    }
    None
}

/// Converts tree-sitter nodes into model statements
struct Converter<'a> {
    text: &'a str,
    lines: Vec<&'a str>,
}

impl<'a> Converter<'a> {
    fn new(text: &'a str) -> Self {
        Converter {
            text,
            lines: text.lines().collect(),
        }
    }

    fn node_text(&self, node: Node) -> &'a str {
        &self.text[node.byte_range()]
    }

    fn span(&self, node: Node) -> Span {
        let start = node.start_position();
        Span {
            start_row: start.row,
            end_row: node.end_position().row,
            start_col: start.column,
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            blank_before: self.blank_lines_above(start.row),
        }
    }

    fn blank_lines_above(&self, row: usize) -> usize {
        (0..row)
            .rev()
            .take_while(|r| self.lines.get(*r).map(|l| l.trim().is_empty()).unwrap_or(false))
            .count()
    }

    /// Statements of a `module` or `block` node
    fn block(&self, node: Node) -> Vec<Stmt> {
        let mut stmts: Vec<Stmt> = Vec::new();
        let mut last_code_row: Option<usize> = None;
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "comment" => {}
                "class_definition" => {
                    stmts.push(Stmt::Class(self.class(child, child, Vec::new())));
                    last_code_row = None;
                }
                "function_definition" | "async_function_definition" => {
                    stmts.push(Stmt::Function(self.function(child, child, Vec::new())));
                    last_code_row = None;
                }
                "decorated_definition" => {
                    if let Some(stmt) = self.decorated(child) {
                        stmts.push(stmt);
                    }
                    last_code_row = None;
                }
                _ => {
                    let row = child.start_position().row;
                    if last_code_row.is_some_and(|end| row <= end) {
                        // Same physical line as the previous statement (`a = 1; b = 2`)
                        if let Some(Stmt::Code(prev)) = stmts.last_mut() {
                            let extra = self.code(child);
                            prev.attr_targets.extend(extra.attr_targets);
                            prev.name_targets.extend(extra.name_targets);
                            continue;
                        }
                    }
                    last_code_row = Some(child.end_position().row);
                    stmts.push(Stmt::Code(self.code(child)));
                }
            }
        }
        stmts
    }

    fn decorated(&self, node: Node) -> Option<Stmt> {
        let mut decorators = Vec::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() == "decorator" {
                decorators.push(self.node_text(child).trim().to_string());
            }
        }
        let definition = node.child_by_field_name("definition")?;
        match definition.kind() {
            "class_definition" => Some(Stmt::Class(self.class(node, definition, decorators))),
            _ => Some(Stmt::Function(self.function(node, definition, decorators))),
        }
    }

    fn class(&self, outer: Node, node: Node, decorators: Vec<String>) -> ClassDef {
        let name = node
            .child_by_field_name("name")
            .map(|n| self.node_text(n).to_string())
            .unwrap_or_default();
        let mut bases = Vec::new();
        let mut keywords = Vec::new();
        if let Some(args) = node.child_by_field_name("superclasses") {
            let mut cursor = args.walk();
            for arg in args.named_children(&mut cursor) {
                match arg.kind() {
                    "comment" => {}
                    "keyword_argument" | "dictionary_splat" => {
                        keywords.push(flatten(self.node_text(arg)))
                    }
                    _ => bases.push(flatten(self.node_text(arg))),
                }
            }
        }
        let body = node
            .child_by_field_name("body")
            .map(|b| self.block(b))
            .unwrap_or_default();
        ClassDef {
            name,
            bases,
            keywords,
            decorators,
            body,
            origin: Origin::Parsed(self.span(outer)),
        }
    }

    fn function(&self, outer: Node, node: Node, decorators: Vec<String>) -> FunctionDef {
        let name = node
            .child_by_field_name("name")
            .map(|n| self.node_text(n).to_string())
            .unwrap_or_default();
        let is_async = node.kind() == "async_function_definition"
            || node.child(0).map(|c| c.kind() == "async").unwrap_or(false);
        let params = node
            .child_by_field_name("parameters")
            .map(|p| self.parameters(p))
            .unwrap_or_default();
        let returns = node
            .child_by_field_name("return_type")
            .map(|r| flatten(self.node_text(r)));
        let body = node
            .child_by_field_name("body")
            .map(|b| self.block(b))
            .unwrap_or_default();
        FunctionDef {
            name,
            is_async,
            decorators,
            params,
            returns,
            body,
            origin: Origin::Parsed(self.span(outer)),
        }
    }

    fn parameters(&self, node: Node) -> Vec<Param> {
        let mut params = Vec::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            let text = self.node_text(child).to_string();
            let param = match child.kind() {
                "identifier" => Param {
                    name: text.clone(),
                    text,
                    kind: ParamKind::Regular,
                    has_default: false,
                },
                "default_parameter" | "typed_default_parameter" => Param {
                    name: child
                        .child_by_field_name("name")
                        .map(|n| self.node_text(n).to_string())
                        .unwrap_or_default(),
                    text,
                    kind: ParamKind::Regular,
                    has_default: true,
                },
                "typed_parameter" => {
                    let mut kind = ParamKind::Regular;
                    let mut name = String::new();
                    let mut inner = child.walk();
                    for part in child.named_children(&mut inner) {
                        match part.kind() {
                            "identifier" if name.is_empty() => {
                                name = self.node_text(part).to_string();
                            }
                            "list_splat_pattern" => {
                                kind = ParamKind::VarPositional;
                                name = splat_name(self.node_text(part));
                            }
                            "dictionary_splat_pattern" => {
                                kind = ParamKind::VarKeyword;
                                name = splat_name(self.node_text(part));
                            }
                            _ => {}
                        }
                    }
                    Param {
                        name,
                        text,
                        kind,
                        has_default: false,
                    }
                }
                "list_splat_pattern" => Param {
                    name: splat_name(&text),
                    text,
                    kind: ParamKind::VarPositional,
                    has_default: false,
                },
                "dictionary_splat_pattern" => Param {
                    name: splat_name(&text),
                    text,
                    kind: ParamKind::VarKeyword,
                    has_default: false,
                },
                "keyword_separator" => Param {
                    name: String::new(),
                    text: "*".to_string(),
                    kind: ParamKind::KeywordSeparator,
                    has_default: false,
                },
                "positional_separator" => Param {
                    name: String::new(),
                    text: "/".to_string(),
                    kind: ParamKind::PositionalSeparator,
                    has_default: false,
                },
                _ => continue,
            };
            params.push(param);
        }
        params
    }

    fn code(&self, node: Node) -> CodeStmt {
        let start = node.start_byte();
        let end = self.text[node.end_byte()..]
            .find('\n')
            .map(|i| node.end_byte() + i)
            .unwrap_or(self.text.len());
        let col = node.start_position().column;
        let raw = &self.text[start..end];

        let mut strings = Vec::new();
        multiline_strings(node, &mut strings);
        let mut verbatim_lines = BTreeSet::new();
        let mut lines = Vec::new();
        let mut offset = start;
        for (i, line) in raw.split('\n').enumerate() {
            let inside = strings.iter().any(|r| r.start < offset && offset < r.end);
            let trimmed = line.trim_end_matches('\r');
            if i == 0 {
                lines.push(trimmed);
            } else if inside {
                verbatim_lines.insert(i);
                lines.push(trimmed);
            } else {
                lines.push(strip_indent(trimmed, col));
            }
            offset += line.len() + 1;
        }
        let text = lines.join("\n").trim_end().to_string();

        let mut attr_targets = Vec::new();
        let mut name_targets = Vec::new();
        self.collect_targets(node, &mut attr_targets, &mut name_targets);

        CodeStmt {
            text,
            kind: self.code_kind(node),
            attr_targets,
            name_targets,
            verbatim_lines,
            origin: Origin::Parsed(self.span(node)),
        }
    }

    fn code_kind(&self, node: Node) -> CodeKind {
        match node.kind() {
            "import_statement" | "import_from_statement" | "future_import_statement" => {
                CodeKind::Import
            }
            "pass_statement" => CodeKind::Pass,
            "expression_statement" => {
                let only_child = node.named_child(0).filter(|_| node.named_child_count() == 1);
                match only_child.map(|c| c.kind()) {
                    Some("string") | Some("concatenated_string") => CodeKind::StringLiteral,
                    _ => CodeKind::Other,
                }
            }
            "if_statement" | "try_statement" if contains_import(node) => CodeKind::Import,
            _ => CodeKind::Other,
        }
    }

    /// Assignment targets anywhere in the statement, nested scopes excluded
    fn collect_targets(&self, node: Node, attrs: &mut Vec<AttrTarget>, names: &mut Vec<String>) {
        match node.kind() {
            "function_definition" | "class_definition" | "lambda" | "decorated_definition" => {
                return
            }
            "assignment" | "augmented_assignment" => {
                if let Some(left) = node.child_by_field_name("left") {
                    self.collect_pattern(left, attrs, names);
                }
            }
            _ => {}
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.collect_targets(child, attrs, names);
        }
    }

    fn collect_pattern(&self, node: Node, attrs: &mut Vec<AttrTarget>, names: &mut Vec<String>) {
        match node.kind() {
            "identifier" => {
                let name = self.node_text(node).to_string();
                if !names.contains(&name) {
                    names.push(name);
                }
            }
            "attribute" => {
                let object = node.child_by_field_name("object");
                let attr = node.child_by_field_name("attribute");
                if let (Some(object), Some(attr)) = (object, attr) {
                    if object.kind() == "identifier" {
                        let target = AttrTarget {
                            object: self.node_text(object).to_string(),
                            attr: self.node_text(attr).to_string(),
                        };
                        if !attrs.contains(&target) {
                            attrs.push(target);
                        }
                    }
                }
            }
            "pattern_list" | "tuple_pattern" | "list_pattern" | "parenthesized_expression"
            | "list_splat_pattern" | "expression_list" | "tuple" | "list" => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    self.collect_pattern(child, attrs, names);
                }
            }
            _ => {}
        }
    }
}

/// Indices of the lines of `text` that begin inside a multi-line string literal
///
/// Parsing is best effort: a fragment with syntax errors still reports the strings
/// tree-sitter recovered.
pub fn string_continuation_lines(text: &str) -> BTreeSet<usize> {
    let Ok(tree) = python_tree(Path::new("<fragment>"), text) else {
        return BTreeSet::new();
    };
    let mut strings = Vec::new();
    multiline_strings(tree.root_node(), &mut strings);
    let mut inside = BTreeSet::new();
    let mut offset = 0;
    for (i, line) in text.split('\n').enumerate() {
        if strings.iter().any(|r| r.start < offset && offset < r.end) {
            inside.insert(i);
        }
        offset += line.len() + 1;
    }
    inside
}

/// Byte ranges of string literals spanning more than one line
fn multiline_strings(node: Node, out: &mut Vec<Range<usize>>) {
    if node.kind() == "string" {
        if node.start_position().row != node.end_position().row {
            out.push(node.byte_range());
        }
        return;
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        multiline_strings(child, out);
    }
}

fn contains_import(node: Node) -> bool {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "import_statement" | "import_from_statement" => return true,
            "function_definition" | "class_definition" | "decorated_definition" => {}
            _ => {
                if contains_import(child) {
                    return true;
                }
            }
        }
    }
    false
}

fn splat_name(text: &str) -> String {
    text.trim_start_matches('*').trim().to_string()
}

fn flatten(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Remove at most `width` leading whitespace characters
pub(crate) fn strip_indent(line: &str, width: usize) -> &str {
    let available = line.len() - line.trim_start().len();
    &line[available.min(width)..]
}

/// A comment that is the first token on its line
#[derive(Debug, Clone)]
struct SourceComment {
    row: usize,
    col: usize,
    text: String,
    blank_before: usize,
    start_byte: usize,
    end_byte: usize,
}

impl SourceComment {
    fn into_stmt(self) -> Stmt {
        Stmt::Comment(Comment {
            text: self.text,
            origin: Origin::Parsed(Span {
                start_row: self.row,
                end_row: self.row,
                start_col: self.col,
                start_byte: self.start_byte,
                end_byte: self.end_byte,
                blank_before: self.blank_before,
            }),
        })
    }
}

fn standalone_comments(root: Node, text: &str) -> Vec<SourceComment> {
    let lines: Vec<&str> = text.lines().collect();
    let mut found = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.kind() == "comment" {
            let pos = node.start_position();
            let line = lines.get(pos.row).copied().unwrap_or("");
            let prefix = line.get(..pos.column).unwrap_or("");
            if prefix.trim().is_empty() {
                let blank_before = (0..pos.row)
                    .rev()
                    .take_while(|r| lines.get(*r).map(|l| l.trim().is_empty()).unwrap_or(false))
                    .count();
                found.push(SourceComment {
                    row: pos.row,
                    col: pos.column,
                    text: text[node.byte_range()].trim_end().to_string(),
                    blank_before,
                    start_byte: node.start_byte(),
                    end_byte: node.end_byte(),
                });
            }
            continue;
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            stack.push(child);
        }
    }
    found.sort_by_key(|c| c.row);
    found
}

enum Placement {
    Insert(usize),
    Delegate(usize),
    Skip,
}

/// Insert comment placeholders into the innermost owning body
fn attach_comments(body: &mut Vec<Stmt>, comments: Vec<SourceComment>) -> std::result::Result<(), String> {
    let mut inserts: Vec<(usize, SourceComment)> = Vec::new();
    let mut delegated: HashMap<usize, Vec<SourceComment>> = HashMap::new();

    for comment in comments {
        match place_comment(body, &comment)? {
            Placement::Insert(at) => inserts.push((at, comment)),
            Placement::Delegate(owner) => delegated.entry(owner).or_default().push(comment),
            Placement::Skip => debug!("comment on line {} kept inside its statement", comment.row + 1),
        }
    }

    for (owner, comments) in delegated {
        match body.get_mut(owner) {
            Some(Stmt::Class(class)) => attach_comments(&mut class.body, comments)?,
            Some(Stmt::Function(func)) => attach_comments(&mut func.body, comments)?,
            _ => return Err(format!("statement {owner} cannot own comments")),
        }
    }

    // Reverse order keeps earlier insertion points valid; equal points keep source order
    inserts.sort_by_key(|(at, c)| (*at, c.row));
    for (at, comment) in inserts.into_iter().rev() {
        if at > body.len() {
            return Err(format!("insertion point {at} past end of body"));
        }
        body.insert(at, comment.into_stmt());
    }
    Ok(())
}

fn place_comment(body: &[Stmt], comment: &SourceComment) -> std::result::Result<Placement, String> {
    let mut next = body.len();
    for (i, stmt) in body.iter().enumerate() {
        let span = stmt
            .origin()
            .span()
            .ok_or_else(|| "synthesized statement in freshly parsed body".to_string())?;
        if span.start_row > comment.row {
            next = i;
            break;
        }
    }
    if next == 0 {
        return Ok(Placement::Insert(0));
    }
    let prev_index = next - 1;
    let prev = &body[prev_index];
    let Some(prev_span) = prev.origin().span() else {
        return Ok(Placement::Insert(next));
    };

    let (decorator_count, is_scope) = match prev {
        Stmt::Class(c) => (c.decorators.len(), true),
        Stmt::Function(f) => (f.decorators.len(), true),
        _ => (0, false),
    };

    if is_scope {
        if comment.col > prev_span.start_col {
            return Ok(Placement::Delegate(prev_index));
        }
        if comment.row <= prev_span.start_row + decorator_count {
            // Between decorators and the header line
            return Ok(Placement::Insert(prev_index));
        }
        return Ok(Placement::Insert(next));
    }

    if matches!(prev, Stmt::Code(_)) && comment.row <= prev_span.end_row {
        return Ok(Placement::Skip);
    }
    Ok(Placement::Insert(next))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> SourceFile {
        SourceFile::parse_str("test.py", text).unwrap()
    }

    #[test]
    fn test_class_and_members_are_modelled() {
        let source = parse(
            r#"import os


@dataclass_like
class User(Base, metaclass=Meta):
    """A user."""

    kind = "user"

    def __init__(self, name: str, age=0, *args, key, **extra):
        self.name = name
        self.age: int = age
        self.a, self.b = 1, 2

    async def load(self) -> "User":
        return self
"#,
        );
        assert_eq!(source.class_names(), vec!["User"]);
        let user = source.class("User").unwrap();
        assert_eq!(user.bases, vec!["Base".to_string()]);
        assert_eq!(user.keywords, vec!["metaclass=Meta".to_string()]);
        assert_eq!(user.decorators, vec!["@dataclass_like".to_string()]);

        let init = user.methods().find(|m| m.name == "__init__").unwrap();
        let names: Vec<String> = init.params.iter().map(|p| p.signature_name()).collect();
        assert_eq!(names, vec!["self", "name", "age", "*args", "key", "**extra"]);
        let attrs: Vec<&str> = init
            .body
            .iter()
            .filter_map(Stmt::as_code)
            .flat_map(|c| c.attrs_assigned_on("self"))
            .collect();
        assert_eq!(attrs, vec!["name", "age", "a", "b"]);

        let load = user.methods().find(|m| m.name == "load").unwrap();
        assert!(load.is_async);
        assert_eq!(load.returns.as_deref(), Some("\"User\""));
    }

    #[test]
    fn test_syntax_error_is_reported_with_line() {
        let err = SourceFile::parse_str("bad.py", "class A:\n    def f(self)\n        pass\n")
            .unwrap_err();
        match err {
            RefactorError::Parse { line, .. } => assert!(line >= 1),
            other => panic!("unexpected error: {other}"),
        }
        assert!(syntax_error_line("x = (1,\n").is_some());
        assert!(syntax_error_line("x = 1\n").is_none());
    }

    #[test]
    fn test_comments_become_placeholders_in_owning_body() {
        let source = parse(
            "# module header\nclass A:\n    # about m\n    def m(self):\n        # inside m\n        return 1  # trailing\n",
        );
        assert!(matches!(&source.module.body[0], Stmt::Comment(c) if c.text == "# module header"));
        let class = source.class("A").unwrap();
        assert!(matches!(&class.body[0], Stmt::Comment(c) if c.text == "# about m"));
        let m = class.methods().next().unwrap();
        assert!(matches!(&m.body[0], Stmt::Comment(c) if c.text == "# inside m"));
        let ret = m.body[1].as_code().unwrap();
        assert_eq!(ret.text, "return 1  # trailing");
    }

    #[test]
    fn test_multiline_statement_is_dedented() {
        let source = parse("class A:\n    def m(self):\n        data = {\n            'k': 1,\n        }\n        return data\n");
        let m = source.class("A").unwrap().methods().next().unwrap();
        assert_eq!(
            m.body[0].as_code().unwrap().text,
            "data = {\n    'k': 1,\n}"
        );
    }

    #[test]
    fn test_render_round_trip_keeps_structure() {
        let text = "import os\n\n\nclass A:\n    \"\"\"Doc.\"\"\"\n\n    def m(self):\n        return os.getcwd()\n\n\ndef helper():\n    return 1\n";
        let source = parse(text);
        assert_eq!(source.render(), text);
    }

    #[test]
    fn test_multiline_strings_survive_rendering() {
        let text = "class A:\n    def q(self):\n        return \"\"\"\nSELECT *\n\n  FROM t\n\"\"\"\n\n    X = \"\"\"a\nb\"\"\"\n";
        let source = parse(text);
        assert_eq!(source.render(), text);

        let q = source.class("A").unwrap().methods().next().unwrap();
        let ret = q.body[0].as_code().unwrap();
        assert_eq!(ret.text, "return \"\"\"\nSELECT *\n\n  FROM t\n\"\"\"");
        assert_eq!(ret.verbatim_lines.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_backslash_continued_literal_is_kept() {
        let text = "def f():\n    msg = \"first \\\n    second\"\n    total = 1 + \\\n        2\n    return msg, total\n";
        let source = parse(text);
        let f = source.function("f").unwrap();
        let msg = f.body[0].as_code().unwrap();
        assert_eq!(msg.text, "msg = \"first \\\n    second\"");
        let total = f.body[1].as_code().unwrap();
        assert!(total.verbatim_lines.is_empty());
        assert_eq!(total.text, "total = 1 + \\\n    2");
        assert_eq!(source.render(), text);
    }

    #[test]
    fn test_guarded_relative_imports_are_deepened() {
        let text = "try:\n    from .speedups import fast\nexcept ImportError:\n    fast = None";
        assert_eq!(
            deepen_relative_imports(text).unwrap(),
            "try:\n    from ..speedups import fast\nexcept ImportError:\n    fast = None"
        );
        let text = "if TYPE_CHECKING:\n    from . import models\n    from ..base import Model\n    import os";
        assert_eq!(
            deepen_relative_imports(text).unwrap(),
            "if TYPE_CHECKING:\n    from .. import models\n    from ...base import Model\n    import os"
        );
        assert_eq!(deepen_relative_imports("from os import path").unwrap(), "from os import path");
    }

    #[test]
    fn test_rename_touches_identifiers_only() {
        let renames = BTreeMap::from([("this".to_string(), "self".to_string())]);
        let text = "this.label = fmt(\"this.x\", this=this, other=withthis.this)";
        assert_eq!(
            rename_identifiers(text, &renames).unwrap(),
            "self.label = fmt(\"this.x\", this=self, other=withthis.this)"
        );
    }

    #[test]
    fn test_parallel_assignment_pairs() {
        assert_eq!(
            parallel_assignment("self.a, self.b = x, y + 1").unwrap(),
            vec![
                ("self.a".to_string(), "x".to_string()),
                ("self.b".to_string(), "y + 1".to_string())
            ]
        );
        assert!(parallel_assignment("self.a, self.b = pair").is_none());
        assert!(parallel_assignment("self.a, *rest = x, y, z").is_none());
        assert!(parallel_assignment("self.a = self.b = x").is_none());
    }

    #[test]
    fn test_moved_method_keeps_string_value() {
        let text = "class A:\n    def q(self):\n        return \"\"\"x\n    y\"\"\"\n";
        let source = parse(text);
        let q = source.class("A").unwrap().methods().next().unwrap();
        let top = crate::member_analyzer::render_method(q, "", &source.text);
        assert_eq!(top, "def q(self):\n    return \"\"\"x\n    y\"\"\"");
        let deeper = crate::member_analyzer::render_method(q, "        ", &source.text);
        assert!(deeper.ends_with("return \"\"\"x\n    y\"\"\""));
    }

    #[test]
    fn test_first_class_wins_in_index() {
        let source = parse("class A:\n    x = 1\n\n\nclass A:\n    y = 2\n");
        assert_eq!(source.class_position("A"), Some(0));
        let a = source.class("A").unwrap();
        assert_eq!(a.body[0].as_code().unwrap().text, "x = 1");
    }

    #[test]
    fn test_load_missing_file_is_filesystem_error() {
        let err = SourceFile::load(Path::new("/definitely/not/here.py")).unwrap_err();
        assert!(matches!(err, RefactorError::FileSystem { .. }));
    }
}
