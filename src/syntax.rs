//! Statement model for Python modules
//!
//! The tree-sitter tree is converted into this model by [`crate::source`]. The model
//! only gives structure to what the refactorings touch: classes, functions and their
//! parameters. Every other statement is kept as dedented source text in a [`CodeStmt`].
//!
//! Each node records its [`Origin`]. Parsed nodes carry the [`Span`] they were read
//! from; synthesized nodes, built by an operation, carry none. Rendering dispatches on
//! that provenance (see [`crate::member_analyzer::render_method`]).

use std::collections::BTreeSet;

/// One level of indentation in generated code
pub const INDENT: &str = "    ";

/// Location of a parsed node in the text it was loaded from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start_row: usize,
    pub end_row: usize,
    pub start_col: usize,
    pub start_byte: usize,
    pub end_byte: usize,
    /// Blank lines directly above the node in the original text
    pub blank_before: usize,
}

/// Provenance of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Parsed(Span),
    Synthesized,
}

impl Origin {
    pub fn span(&self) -> Option<Span> {
        match self {
            Origin::Parsed(span) => Some(*span),
            Origin::Synthesized => None,
        }
    }

    fn blank_before(&self) -> usize {
        self.span().map(|s| s.blank_before).unwrap_or(0)
    }
}

/// A parsed Python module
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Class(ClassDef),
    Function(FunctionDef),
    Comment(Comment),
    Code(CodeStmt),
}

impl Stmt {
    pub fn origin(&self) -> Origin {
        match self {
            Stmt::Class(c) => c.origin,
            Stmt::Function(f) => f.origin,
            Stmt::Comment(c) => c.origin,
            Stmt::Code(c) => c.origin,
        }
    }

    /// Names this statement binds in the enclosing scope
    pub fn bound_names(&self) -> Vec<String> {
        match self {
            Stmt::Class(c) => vec![c.name.clone()],
            Stmt::Function(f) => vec![f.name.clone()],
            Stmt::Comment(_) => Vec::new(),
            Stmt::Code(c) => c.name_targets.clone(),
        }
    }

    pub fn is_definition(&self) -> bool {
        matches!(self, Stmt::Class(_) | Stmt::Function(_))
    }

    pub fn as_class(&self) -> Option<&ClassDef> {
        match self {
            Stmt::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionDef> {
        match self {
            Stmt::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_code(&self) -> Option<&CodeStmt> {
        match self {
            Stmt::Code(c) => Some(c),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    pub name: String,
    /// Positional base expressions, as written
    pub bases: Vec<String>,
    /// Keyword arguments of the class header (`metaclass=...`)
    pub keywords: Vec<String>,
    /// Decorator lines including the leading `@`
    pub decorators: Vec<String>,
    pub body: Vec<Stmt>,
    pub origin: Origin,
}

impl ClassDef {
    pub fn synthesized(name: impl Into<String>, bases: Vec<String>, body: Vec<Stmt>) -> Self {
        ClassDef {
            name: name.into(),
            bases,
            keywords: Vec::new(),
            decorators: Vec::new(),
            body,
            origin: Origin::Synthesized,
        }
    }

    /// `class Name(bases):` without decorators
    pub fn header(&self) -> String {
        let args: Vec<&str> = self
            .bases
            .iter()
            .chain(self.keywords.iter())
            .map(String::as_str)
            .collect();
        if args.is_empty() {
            format!("class {}:", self.name)
        } else {
            format!("class {}({}):", self.name, args.join(", "))
        }
    }

    pub fn methods(&self) -> impl Iterator<Item = &FunctionDef> {
        self.body.iter().filter_map(Stmt::as_function)
    }

    /// Structural rendering at column zero
    pub fn unparse(&self) -> Option<String> {
        self.unparse_lines().map(join_lines)
    }

    pub fn unparse_lines(&self) -> Option<Vec<Line>> {
        if self.name.is_empty() {
            return None;
        }
        let mut lines: Vec<Line> = self.decorators.iter().map(Line::code).collect();
        lines.push(Line::code(self.header()));
        lines.extend(unparse_body(&self.body, INDENT)?);
        Some(lines)
    }
}

/// Kind of a function parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Regular,
    /// `*args`
    VarPositional,
    /// bare `*`
    KeywordSeparator,
    /// bare `/`
    PositionalSeparator,
    /// `**kwargs`
    VarKeyword,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Bound name, empty for separators
    pub name: String,
    /// Full parameter text (annotation and default included)
    pub text: String,
    pub kind: ParamKind,
    pub has_default: bool,
}

impl Param {
    pub fn regular(name: impl Into<String>) -> Self {
        let name = name.into();
        Param {
            text: name.clone(),
            name,
            kind: ParamKind::Regular,
            has_default: false,
        }
    }

    /// Name as it appears in a signature comparison: `x`, `*args`, `**kw`, `*`, `/`
    pub fn signature_name(&self) -> String {
        match self.kind {
            ParamKind::Regular => self.name.clone(),
            ParamKind::VarPositional => format!("*{}", self.name),
            ParamKind::KeywordSeparator => "*".to_string(),
            ParamKind::PositionalSeparator => "/".to_string(),
            ParamKind::VarKeyword => format!("**{}", self.name),
        }
    }

    /// Parameter text on a single line
    pub fn flat_text(&self) -> String {
        if self.text.contains('\n') {
            self.text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        } else {
            self.text.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub is_async: bool,
    pub decorators: Vec<String>,
    pub params: Vec<Param>,
    /// Return annotation text, without the arrow
    pub returns: Option<String>,
    pub body: Vec<Stmt>,
    pub origin: Origin,
}

impl FunctionDef {
    pub fn synthesized(name: impl Into<String>, params: Vec<Param>, body: Vec<Stmt>) -> Self {
        FunctionDef {
            name: name.into(),
            is_async: false,
            decorators: Vec::new(),
            params,
            returns: None,
            body,
            origin: Origin::Synthesized,
        }
    }

    /// `def name(params) -> returns:` without decorators
    pub fn header(&self) -> String {
        let params: Vec<String> = self.params.iter().map(Param::flat_text).collect();
        let mut header = String::new();
        if self.is_async {
            header.push_str("async ");
        }
        header.push_str(&format!("def {}({})", self.name, params.join(", ")));
        if let Some(returns) = &self.returns {
            header.push_str(&format!(" -> {}", returns));
        }
        header.push(':');
        header
    }

    /// Name of the implicit receiver parameter, if the function has one
    pub fn receiver(&self) -> Option<&str> {
        self.params
            .first()
            .filter(|p| p.kind == ParamKind::Regular)
            .map(|p| p.name.as_str())
    }

    pub fn has_decorator(&self, name: &str) -> bool {
        self.decorators
            .iter()
            .any(|d| d.trim_start_matches('@').trim() == name)
    }

    /// Parameter names and return annotation, used for compatibility checks
    pub fn signature(&self) -> (Vec<String>, Option<String>) {
        let names = self.params.iter().map(Param::signature_name).collect();
        let returns = self
            .returns
            .as_ref()
            .map(|r| r.split_whitespace().collect::<Vec<_>>().join(" "));
        (names, returns)
    }

    /// Structural rendering at column zero
    pub fn unparse(&self) -> Option<String> {
        self.unparse_lines().map(join_lines)
    }

    pub fn unparse_lines(&self) -> Option<Vec<Line>> {
        if self.name.is_empty() {
            return None;
        }
        let mut lines: Vec<Line> = self.decorators.iter().map(Line::code).collect();
        lines.push(Line::code(self.header()));
        lines.extend(unparse_body(&self.body, INDENT)?);
        Some(lines)
    }
}

/// A standalone comment, re-emitted as a `#` line
#[derive(Debug, Clone)]
pub struct Comment {
    /// Comment text including the leading `#`
    pub text: String,
    pub origin: Origin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    /// A bare string literal (a docstring when it opens a body)
    StringLiteral,
    /// An import, or a compound statement guarding imports
    Import,
    Pass,
    Other,
}

/// An `object.attribute` assignment target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrTarget {
    pub object: String,
    pub attr: String,
}

/// Any statement that is not a class or function definition
#[derive(Debug, Clone)]
pub struct CodeStmt {
    /// Source text with the statement's own indentation removed
    pub text: String,
    pub kind: CodeKind,
    pub attr_targets: Vec<AttrTarget>,
    pub name_targets: Vec<String>,
    /// Indices of `text` lines that start inside a multi-line string literal; they are
    /// kept byte for byte and never re-indented
    pub verbatim_lines: BTreeSet<usize>,
    pub origin: Origin,
}

impl CodeStmt {
    pub fn synthesized(text: impl Into<String>) -> Self {
        let text = text.into();
        let trimmed = text.trim_start();
        let kind = if trimmed == "pass" {
            CodeKind::Pass
        } else if trimmed.starts_with("import ") || trimmed.starts_with("from ") {
            CodeKind::Import
        } else if trimmed.starts_with('"') || trimmed.starts_with('\'') {
            CodeKind::StringLiteral
        } else {
            CodeKind::Other
        };
        CodeStmt {
            text,
            kind,
            attr_targets: Vec::new(),
            name_targets: Vec::new(),
            verbatim_lines: BTreeSet::new(),
            origin: Origin::Synthesized,
        }
    }

    pub fn pass() -> Self {
        CodeStmt::synthesized("pass")
    }

    /// Attributes assigned through `receiver`
    pub fn attrs_assigned_on<'a>(&'a self, receiver: &'a str) -> impl Iterator<Item = &'a str> {
        self.attr_targets
            .iter()
            .filter(move |t| t.object == receiver)
            .map(|t| t.attr.as_str())
    }

    /// Lines of the statement at column zero
    pub fn lines(&self) -> Vec<Line> {
        self.text
            .split('\n')
            .enumerate()
            .map(|(i, text)| Line {
                text: text.to_string(),
                verbatim: self.verbatim_lines.contains(&i),
            })
            .collect()
    }

    pub fn render(&self, indent: &str) -> String {
        join_lines(self.lines().into_iter().map(|line| line.indented(indent)))
    }
}

/// One line of generated code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub text: String,
    /// Continuation of a multi-line string literal
    pub verbatim: bool,
}

impl Line {
    pub fn code(text: impl Into<String>) -> Self {
        Line {
            text: text.into(),
            verbatim: false,
        }
    }

    /// Shift right by `indent`; verbatim lines are left alone and blank lines stay empty
    pub fn indented(self, indent: &str) -> Line {
        if self.verbatim {
            self
        } else if self.text.trim().is_empty() {
            Line::code(String::new())
        } else {
            Line::code(format!("{}{}", indent, self.text))
        }
    }
}

pub fn join_lines(lines: impl IntoIterator<Item = Line>) -> String {
    lines
        .into_iter()
        .map(|line| line.text)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Blank lines to emit before `stmts[index]`
pub(crate) fn gap_before(stmts: &[Stmt], index: usize, top_level: bool) -> usize {
    if index == 0 {
        return 0;
    }
    let max_gap = if top_level { 2 } else { 1 };
    let original = stmts[index].origin().blank_before().min(max_gap);
    let prev = &stmts[index - 1];
    if matches!(prev, Stmt::Comment(_)) {
        return original;
    }
    let starts_definition = stmts[index..]
        .iter()
        .find(|s| !matches!(s, Stmt::Comment(_)))
        .map(Stmt::is_definition)
        .unwrap_or(false);
    if prev.is_definition() || starts_definition {
        max_gap
    } else {
        original
    }
}

/// Render a nested body, appending `pass` when it holds no statements
pub(crate) fn unparse_body(body: &[Stmt], indent: &str) -> Option<Vec<Line>> {
    let mut lines: Vec<Line> = Vec::new();
    for (i, stmt) in body.iter().enumerate() {
        for _ in 0..gap_before(body, i, false) {
            lines.push(Line::code(String::new()));
        }
        let rendered = match stmt {
            Stmt::Class(c) => c.unparse_lines()?,
            Stmt::Function(f) => f.unparse_lines()?,
            Stmt::Comment(c) => vec![Line::code(c.text.clone())],
            Stmt::Code(c) => {
                if c.text.trim().is_empty() {
                    return None;
                }
                c.lines()
            }
        };
        lines.extend(rendered.into_iter().map(|line| line.indented(indent)));
    }
    if !body.iter().any(|s| !matches!(s, Stmt::Comment(_))) {
        lines.push(Line::code(format!("{}pass", indent)));
    }
    Some(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(text: &str) -> Stmt {
        Stmt::Code(CodeStmt::synthesized(text))
    }

    #[test]
    fn test_function_header_with_everything() {
        let mut func = FunctionDef::synthesized(
            "fetch",
            vec![
                Param::regular("self"),
                Param {
                    name: "url".into(),
                    text: "url: str".into(),
                    kind: ParamKind::Regular,
                    has_default: false,
                },
                Param {
                    name: "kwargs".into(),
                    text: "**kwargs".into(),
                    kind: ParamKind::VarKeyword,
                    has_default: false,
                },
            ],
            vec![code("return None")],
        );
        func.is_async = true;
        func.returns = Some("Response".into());
        assert_eq!(
            func.header(),
            "async def fetch(self, url: str, **kwargs) -> Response:"
        );
        assert_eq!(
            func.signature().0,
            vec!["self".to_string(), "url".to_string(), "**kwargs".to_string()]
        );
    }

    #[test]
    fn test_unparse_empty_body_gets_pass() {
        let class = ClassDef::synthesized("Empty", vec!["Base".into()], Vec::new());
        assert_eq!(class.unparse().unwrap(), "class Empty(Base):\n    pass");
    }

    #[test]
    fn test_unparse_comment_only_body_gets_pass() {
        let func = FunctionDef::synthesized(
            "todo",
            vec![Param::regular("self")],
            vec![Stmt::Comment(Comment {
                text: "# later".into(),
                origin: Origin::Synthesized,
            })],
        );
        assert_eq!(
            func.unparse().unwrap(),
            "def todo(self):\n    # later\n    pass"
        );
    }

    #[test]
    fn test_methods_are_separated_by_blank_line() {
        let class = ClassDef::synthesized(
            "A",
            Vec::new(),
            vec![
                code("x = 1"),
                Stmt::Function(FunctionDef::synthesized(
                    "m",
                    vec![Param::regular("self")],
                    vec![code("return self.x")],
                )),
            ],
        );
        assert_eq!(
            class.unparse().unwrap(),
            "class A:\n    x = 1\n\n    def m(self):\n        return self.x"
        );
    }

    #[test]
    fn test_multiline_param_is_flattened() {
        let param = Param {
            name: "options".into(),
            text: "options={\n    'a': 1,\n}".into(),
            kind: ParamKind::Regular,
            has_default: true,
        };
        assert_eq!(param.flat_text(), "options={ 'a': 1, }");
    }
}
