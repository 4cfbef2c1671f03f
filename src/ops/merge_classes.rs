//! Merge several classes into one
//!
//! The first declaration wins throughout: the first source declaring a method owns it,
//! the first initializer statement assigning a property is the one kept, and the
//! docstring comes from the first source that has one.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::debug;

use crate::config::Config;
use crate::error::{RefactorError, Result};
use crate::mapping::MergeClassesConfig;
use crate::member_analyzer::{docstring_stmt, initializer, is_special, MemberSet};
use crate::ops::{
    expect_docstring, expect_method_docstring, insertion_point, OutputFile, Refactoring,
    Transformation,
};
use crate::source::{parallel_assignment, parse_statement, rename_identifiers, SourceFile};
use crate::syntax::{ClassDef, CodeKind, CodeStmt, FunctionDef, Param, ParamKind, Stmt};
use crate::validators::{check_merge_config, DocOwner, MemberExpectation, Report};

fn is_super_init(code: &CodeStmt) -> bool {
    let text = code.text.trim_start();
    text.starts_with("super().__init__(") || text.starts_with("super(") && text.contains(".__init__(")
}

/// Union of the initializer parameters
///
/// The first initializer's parameters are kept as written. Parameters that only later
/// initializers declare become keyword-only, defaulting to `None` when they had no
/// default of their own.
fn merge_params(inits: &[&FunctionDef]) -> Vec<Param> {
    let Some((first, rest)) = inits.split_first() else {
        return vec![Param::regular("self")];
    };
    let mut params = first.params.clone();
    let has = |params: &[Param], kind: ParamKind| params.iter().any(|p| p.kind == kind);

    for init in rest {
        for param in init.params.iter().skip(1) {
            match param.kind {
                ParamKind::Regular => {
                    if params.iter().any(|p| p.name == param.name) {
                        continue;
                    }
                    if !has(&params, ParamKind::VarPositional) && !has(&params, ParamKind::KeywordSeparator) {
                        let at = params
                            .iter()
                            .position(|p| p.kind == ParamKind::VarKeyword)
                            .unwrap_or(params.len());
                        params.insert(
                            at,
                            Param {
                                name: String::new(),
                                text: "*".to_string(),
                                kind: ParamKind::KeywordSeparator,
                                has_default: false,
                            },
                        );
                    }
                    let mut added = param.clone();
                    if !added.has_default {
                        let spacing = if added.text.contains(':') { " = " } else { "=" };
                        added.text = format!("{}{}None", added.flat_text(), spacing);
                        added.has_default = true;
                    }
                    let at = params
                        .iter()
                        .position(|p| p.kind == ParamKind::VarKeyword)
                        .unwrap_or(params.len());
                    params.insert(at, added);
                }
                ParamKind::VarPositional if !has(&params, ParamKind::VarPositional) => {
                    match params.iter().position(|p| p.kind == ParamKind::KeywordSeparator) {
                        Some(at) => params[at] = param.clone(),
                        None => {
                            let at = params
                                .iter()
                                .position(|p| p.kind == ParamKind::VarKeyword)
                                .unwrap_or(params.len());
                            params.insert(at, param.clone());
                        }
                    }
                }
                ParamKind::VarKeyword if !has(&params, ParamKind::VarKeyword) => {
                    params.push(param.clone());
                }
                _ => {}
            }
        }
    }
    params
}

/// Names an initializer must refer to differently once merged: its receiver, and
/// `*args`/`**kwargs` names that the merged signature spells another way
fn init_renames(init: &FunctionDef, receiver: &str, merged: &[Param]) -> BTreeMap<String, String> {
    let mut renames = BTreeMap::new();
    if let Some(own) = init.receiver() {
        if own != receiver {
            renames.insert(own.to_string(), receiver.to_string());
        }
    }
    for param in &init.params {
        if !matches!(param.kind, ParamKind::VarPositional | ParamKind::VarKeyword) {
            continue;
        }
        if let Some(kept) = merged.iter().find(|p| p.kind == param.kind) {
            if kept.name != param.name {
                renames.insert(param.name.clone(), kept.name.clone());
            }
        }
    }
    renames
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

/// Keep only the parts of a parallel assignment whose receiver attributes `keep` admits
fn narrow_assignment(
    file: &Path,
    code: &CodeStmt,
    receiver: &str,
    keep: impl Fn(&str) -> bool,
) -> Result<CodeStmt> {
    let refuse = || {
        RefactorError::structural(
            file,
            format!(
                "cannot merge `{}`: it assigns properties that are already set or excluded together with ones that are kept",
                first_line(&code.text)
            ),
        )
    };
    let pairs = parallel_assignment(&code.text).ok_or_else(refuse)?;
    let prefix = format!("{}.", receiver);
    let kept: Vec<&(String, String)> = pairs
        .iter()
        .filter(|(target, _)| match target.strip_prefix(&prefix) {
            Some(attr) if attr.chars().all(|c| c.is_alphanumeric() || c == '_') => keep(attr),
            _ => true,
        })
        .collect();
    let targets: Vec<&str> = kept.iter().map(|(t, _)| t.as_str()).collect();
    let values: Vec<&str> = kept.iter().map(|(_, v)| v.as_str()).collect();
    let text = format!("{} = {}", targets.join(", "), values.join(", "));
    debug!("narrowed `{}` to `{}`", first_line(&code.text), text);
    let mut narrowed = parse_statement(&text).ok_or_else(refuse)?;
    narrowed.origin = code.origin;
    Ok(narrowed)
}

/// Apply `renames` to a statement copied from another initializer
fn renamed(file: &Path, code: &CodeStmt, renames: &BTreeMap<String, String>) -> Result<CodeStmt> {
    if renames.is_empty() {
        return Ok(code.clone());
    }
    let text = rename_identifiers(&code.text, renames).ok_or_else(|| {
        RefactorError::structural(
            file,
            format!("cannot rewrite `{}` for the merged initializer", first_line(&code.text)),
        )
    })?;
    let mut rewritten = code.clone();
    rewritten.text = text;
    for target in &mut rewritten.attr_targets {
        if let Some(to) = renames.get(&target.object) {
            target.object = to.clone();
        }
    }
    for name in &mut rewritten.name_targets {
        if let Some(to) = renames.get(name.as_str()) {
            *name = to.clone();
        }
    }
    Ok(rewritten)
}

/// Initializer statements, first assignment of each property wins
///
/// A parallel assignment mixing kept properties with ones already assigned (or not
/// allowed) is narrowed to the kept targets; any other mixed statement is refused.
fn merge_init_body(
    file: &Path,
    inits: &[&FunctionDef],
    params: &[Param],
    allowed: Option<&BTreeSet<String>>,
) -> Result<Vec<Stmt>> {
    let receiver = inits
        .first()
        .and_then(|i| i.receiver())
        .unwrap_or("self")
        .to_string();
    let mut body: Vec<Stmt> = Vec::new();
    let mut assigned: BTreeSet<String> = BTreeSet::new();
    let mut seen_text: BTreeSet<String> = BTreeSet::new();
    let mut have_docstring = false;
    let mut have_super = false;

    for init in inits {
        let own_receiver = init.receiver().unwrap_or("self");
        let renames = init_renames(init, &receiver, params);
        let doc = docstring_stmt(&init.body).map(|d| d.text.clone());
        let mut pending = Vec::new();
        for stmt in &init.body {
            let kept: Option<Stmt> = match stmt {
                Stmt::Comment(_) => {
                    pending.push(stmt.clone());
                    continue;
                }
                Stmt::Code(code) if Some(&code.text) == doc.as_ref() => {
                    let first = !have_docstring;
                    have_docstring = true;
                    first.then(|| stmt.clone())
                }
                Stmt::Code(code) if is_super_init(code) => {
                    let first = !have_super;
                    have_super = true;
                    if first {
                        Some(Stmt::Code(renamed(file, code, &renames)?))
                    } else {
                        None
                    }
                }
                Stmt::Code(code) => {
                    let targets: Vec<String> =
                        code.attrs_assigned_on(own_receiver).map(str::to_string).collect();
                    let wanted: BTreeSet<String> = targets
                        .iter()
                        .filter(|t| !assigned.contains(*t) && allows(allowed, t))
                        .cloned()
                        .collect();
                    assigned.extend(targets.iter().cloned());
                    if targets.is_empty() {
                        let code = renamed(file, code, &renames)?;
                        seen_text.insert(code.text.clone()).then_some(Stmt::Code(code))
                    } else if wanted.is_empty() {
                        None
                    } else if wanted.len() < targets.len() {
                        let narrowed =
                            narrow_assignment(file, code, own_receiver, |attr| wanted.contains(attr))?;
                        Some(Stmt::Code(renamed(file, &narrowed, &renames)?))
                    } else {
                        Some(Stmt::Code(renamed(file, code, &renames)?))
                    }
                }
                _ => Some(stmt.clone()),
            };
            match kept {
                Some(stmt) => {
                    body.append(&mut pending);
                    body.push(stmt);
                }
                None => pending.clear(),
            }
        }
        body.append(&mut pending);
    }
    Ok(body)
}

/// An absent allow-list admits every name
fn allows(list: Option<&BTreeSet<String>>, name: &str) -> bool {
    list.map_or(true, |set| set.contains(name))
}

/// `Alias = Target` statement for an old class name
fn alias(source: &str, target: &str) -> Stmt {
    let mut code = CodeStmt::synthesized(format!("{} = {}", source, target));
    code.name_targets = vec![source.to_string()];
    Stmt::Code(code)
}

pub struct MergeClasses;

impl Refactoring for MergeClasses {
    type Mapping = MergeClassesConfig;
    const NAME: &'static str = "merge-classes";

    fn validate(&self, source: &SourceFile, mapping: &MergeClassesConfig, _config: &Config) -> Result<()> {
        let mut report = Report::new(&source.path);
        check_merge_config(&mut report, |name| source.class(name), mapping);
        report.into_result()
    }

    fn transform(
        &self,
        mut source: SourceFile,
        mapping: &MergeClassesConfig,
        _config: &Config,
    ) -> Result<Transformation> {
        let file = source.path.clone();
        let target = mapping.target_class.clone();
        let classes: Vec<ClassDef> = mapping
            .source_classes
            .iter()
            .map(|name| {
                source.class(name).cloned().ok_or_else(|| {
                    RefactorError::structural(&file, format!("class '{}' not found", name))
                })
            })
            .collect::<Result<_>>()?;
        let allowed_methods: Option<BTreeSet<String>> =
            mapping.methods.as_ref().map(|m| m.iter().cloned().collect());
        let allowed_props: Option<BTreeSet<String>> =
            mapping.properties.as_ref().map(|p| p.iter().cloned().collect());

        // First declaring source owns each method name
        let mut owners: BTreeMap<String, usize> = BTreeMap::new();
        for (i, class) in classes.iter().enumerate() {
            for method in class.methods() {
                owners.entry(method.name.clone()).or_insert(i);
            }
        }
        let method_allowed =
            |name: &str| name == "__init__" || allows(allowed_methods.as_ref(), name);

        let inits: Vec<&FunctionDef> = classes.iter().filter_map(initializer).collect();
        let merged_init = match inits.first() {
            Some(first) => {
                let params = merge_params(&inits);
                let body = merge_init_body(&file, &inits, &params, allowed_props.as_ref())?;
                let mut init = FunctionDef::synthesized("__init__", params, body);
                init.returns = first.returns.clone();
                Some(init)
            }
            None => None,
        };

        let doc_source = classes.iter().find(|c| docstring_stmt(&c.body).is_some());
        let mut body: Vec<Stmt> = Vec::new();
        if let Some(doc) = doc_source.and_then(|c| docstring_stmt(&c.body)) {
            body.push(Stmt::Code(doc.clone()));
        }

        let mut seen_names: BTreeSet<String> = BTreeSet::new();
        let mut seen_text: BTreeSet<String> = BTreeSet::new();
        let mut init_emitted = false;
        let mut merged_methods: Vec<(String, usize)> = Vec::new();
        for (i, class) in classes.iter().enumerate() {
            let doc = docstring_stmt(&class.body).map(|d| d.text.clone());
            let mut pending = Vec::new();
            for stmt in &class.body {
                let keep = match stmt {
                    Stmt::Comment(_) => {
                        pending.push(stmt.clone());
                        continue;
                    }
                    Stmt::Code(code) if Some(&code.text) == doc.as_ref() => false,
                    Stmt::Code(code) if code.kind == CodeKind::Pass => false,
                    Stmt::Code(code) if code.name_targets.is_empty() => seen_text.insert(code.text.clone()),
                    Stmt::Code(code) => {
                        let fresh = code.name_targets.iter().any(|n| !seen_names.contains(n));
                        seen_names.extend(code.name_targets.iter().cloned());
                        fresh
                    }
                    Stmt::Function(func) if func.name == "__init__" => {
                        if init_emitted {
                            false
                        } else {
                            init_emitted = true;
                            body.append(&mut pending);
                            if let Some(init) = &merged_init {
                                body.push(Stmt::Function(init.clone()));
                            }
                            continue;
                        }
                    }
                    Stmt::Function(func) => {
                        let owned = owners.get(&func.name) == Some(&i) && method_allowed(&func.name);
                        if owned && !merged_methods.iter().any(|(m, _)| m == &func.name) {
                            merged_methods.push((func.name.clone(), i));
                        }
                        owned
                    }
                    Stmt::Class(_) => true,
                };
                if keep {
                    body.append(&mut pending);
                    body.push(stmt.clone());
                } else {
                    pending.clear();
                }
            }
            body.append(&mut pending);
            debug!("merged {} into {}", class.name, target);
        }

        let source_names: BTreeSet<&str> = mapping.source_classes.iter().map(String::as_str).collect();
        let mut bases: Vec<String> = Vec::new();
        let mut keywords: Vec<String> = Vec::new();
        let mut decorators: Vec<String> = Vec::new();
        for class in &classes {
            for base in &class.bases {
                if !source_names.contains(base.as_str()) && !bases.contains(base) {
                    bases.push(base.clone());
                }
            }
            for keyword in &class.keywords {
                if !keywords.contains(keyword) {
                    keywords.push(keyword.clone());
                }
            }
            for decorator in &class.decorators {
                if !decorators.contains(decorator) {
                    decorators.push(decorator.clone());
                }
            }
        }
        if bases.len() > 1 {
            bases.retain(|b| b != "object");
        }
        let mut merged = ClassDef::synthesized(target.clone(), bases, body);
        merged.keywords = keywords;
        merged.decorators = decorators;

        // Expectations come from the sources before the module changes
        let mut properties: BTreeSet<String> = BTreeSet::new();
        for class in &classes {
            properties.extend(MemberSet::of(class).properties);
        }
        if let Some(allowed) = &allowed_props {
            properties.retain(|p| allowed.contains(p));
        }
        let mut members = vec![MemberExpectation::Class {
            file: file.clone(),
            class: target.clone(),
            properties: properties.into_iter().collect(),
            methods: merged_methods
                .iter()
                .map(|(m, _)| m.clone())
                .filter(|m| !is_special(m))
                .collect(),
            inherits: None,
        }];
        let mut docstrings = Vec::new();
        if let Some(class) = doc_source {
            docstrings.extend(expect_docstring(&file, DocOwner::Class(target.clone()), &class.body));
        }
        for (method, owner) in &merged_methods {
            docstrings.extend(expect_method_docstring(&file, &classes[*owner], method, &target));
        }
        for name in &mapping.source_classes {
            members.push(MemberExpectation::ClassAbsent {
                file: file.clone(),
                class: name.clone(),
            });
            if mapping.keep_aliases {
                members.push(MemberExpectation::Binding {
                    file: file.clone(),
                    name: name.clone(),
                });
            }
        }

        // Merged class at the first source's place, the other sources and their
        // leading comments removed
        let mut positions: Vec<usize> = mapping
            .source_classes
            .iter()
            .filter_map(|name| source.class_position(name))
            .collect();
        positions.sort_unstable();
        let Some((&first, rest)) = positions.split_first() else {
            return Err(RefactorError::structural(&file, "no source class found"));
        };
        for &position in rest.iter().rev() {
            let start = insertion_point(&source.module.body, position);
            source.module.body.drain(start..=position);
        }
        source.module.body[first] = Stmt::Class(merged);
        if mapping.keep_aliases {
            let aliases: Vec<Stmt> = mapping
                .source_classes
                .iter()
                .map(|name| alias(name, &target))
                .collect();
            source.module.body.splice(first + 1..first + 1, aliases);
        }
        source.reindex();

        Ok(Transformation {
            outputs: vec![OutputFile {
                path: file.clone(),
                text: source.render(),
            }],
            members,
            docstrings,
            import_target: file,
            summary: format!(
                "merged {} into {}",
                mapping.source_classes.join(", "),
                target
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPES: &str = r#"class Reader:
    """Reads things."""

    mode = "r"

    def __init__(self, path, encoding="utf-8"):
        self.path = path
        self.encoding = encoding

    def read(self):
        """Read all."""
        return open(self.path).read()


# Writes things
class Writer:
    mode = "w"

    def __init__(self, path, backup):
        self.path = path.strip()
        self.backup = backup

    def read(self):
        return None

    def write(self, data):
        """Write data."""
        open(self.path, "w").write(data)
"#;

    fn mapping() -> MergeClassesConfig {
        MergeClassesConfig {
            source_classes: vec!["Reader".into(), "Writer".into()],
            target_class: "FileHandle".into(),
            methods: None,
            properties: None,
            keep_aliases: false,
        }
    }

    #[test]
    fn test_merge_first_declaration_wins() {
        let source = SourceFile::parse_str("io.py", SHAPES).unwrap();
        let config = Config::offline();
        let mapping = mapping();
        MergeClasses.validate(&source, &mapping, &config).unwrap();
        let result = MergeClasses.transform(source, &mapping, &config).unwrap();
        let text = &result.outputs[0].text;

        assert!(text.starts_with("class FileHandle:\n    \"\"\"Reads things.\"\"\"\n"));
        assert!(text.contains(
            "    def __init__(self, path, encoding=\"utf-8\", *, backup=None):\n        self.path = path\n        self.encoding = encoding\n        self.backup = backup\n"
        ));
        assert!(text.contains("return open(self.path).read()"));
        assert!(!text.contains("return None"));
        assert!(!text.contains("mode = \"w\""));
        assert!(!text.contains("class Reader"));
        assert!(!text.contains("class Writer"));
        assert!(!text.contains("# Writes things"));

        let reparsed = SourceFile::parse_str("io.py", text.as_str()).unwrap();
        let members = MemberSet::of(reparsed.class("FileHandle").unwrap());
        for name in ["read", "write", "path", "encoding", "backup"] {
            assert!(members.contains(name), "{}", name);
        }
    }

    #[test]
    fn test_merge_with_aliases_and_allow_list() {
        let source = SourceFile::parse_str("io.py", SHAPES).unwrap();
        let config = Config::offline();
        let mapping = MergeClassesConfig {
            methods: Some(vec!["write".into()]),
            keep_aliases: true,
            ..mapping()
        };
        MergeClasses.validate(&source, &mapping, &config).unwrap();
        let result = MergeClasses.transform(source, &mapping, &config).unwrap();
        let text = &result.outputs[0].text;
        assert!(text.contains("\nReader = FileHandle\nWriter = FileHandle\n"));
        assert!(text.contains("def write(self, data):"));
        assert!(!text.contains("def read(self)"));
        assert!(result
            .members
            .contains(&MemberExpectation::Binding {
                file: "io.py".into(),
                name: "Writer".into()
            }));
    }

    const PAIRS: &str = r#"class A:
    def __init__(self, x, y):
        self.a = x
        self.c = y


class B:
    def __init__(self, x, y):
        self.a, self.b = x, y
        self.c, self.d = y, x
"#;

    fn pair_mapping(properties: Option<Vec<String>>) -> MergeClassesConfig {
        MergeClassesConfig {
            source_classes: vec!["A".into(), "B".into()],
            target_class: "AB".into(),
            methods: None,
            properties,
            keep_aliases: false,
        }
    }

    #[test]
    fn test_parallel_assignment_keeps_first_declaration() {
        let source = SourceFile::parse_str("ab.py", PAIRS).unwrap();
        let result = MergeClasses
            .transform(source, &pair_mapping(None), &Config::offline())
            .unwrap();
        assert!(result.outputs[0].text.contains(
            "    def __init__(self, x, y):\n        self.a = x\n        self.c = y\n        self.b = y\n        self.d = x\n"
        ));
    }

    #[test]
    fn test_parallel_assignment_respects_allow_list() {
        let source = SourceFile::parse_str("ab.py", PAIRS).unwrap();
        let mapping = pair_mapping(Some(vec!["a".into(), "c".into(), "d".into()]));
        let result = MergeClasses
            .transform(source, &mapping, &Config::offline())
            .unwrap();
        let text = &result.outputs[0].text;
        assert!(text.contains("        self.c = y\n        self.d = x\n"));
        assert!(!text.contains("self.b"));
    }

    #[test]
    fn test_chained_assignment_mixing_old_and_new_is_refused() {
        let text = "class A:\n    def __init__(self, x):\n        self.a = x\n\n\nclass B:\n    def __init__(self, x):\n        self.a = self.b = x\n";
        let source = SourceFile::parse_str("ab.py", text).unwrap();
        let err = MergeClasses
            .transform(source, &pair_mapping(None), &Config::offline())
            .unwrap_err();
        assert!(matches!(err, RefactorError::Structural { .. }));
        assert!(err.to_string().contains("cannot merge `self.a = self.b = x`"));
    }

    #[test]
    fn test_receiver_and_varargs_are_renamed() {
        let text = r#"class A:
    def __init__(self, x, *args):
        self.x = x
        self.args = args


class B:
    def __init__(this, y, *rest, **options):
        this.y = y
        this.extra = rest
        this.options = options
        this.note = "this.name"
        this.total = len(withthis.items)
        log(this, "rest", rest=rest)
"#;
        let source = SourceFile::parse_str("ab.py", text).unwrap();
        let result = MergeClasses
            .transform(source, &pair_mapping(None), &Config::offline())
            .unwrap();
        assert!(result.outputs[0].text.contains(
            "    def __init__(self, x, *args, y=None, **options):\n        self.x = x\n        self.args = args\n        self.y = y\n        self.extra = args\n        self.options = options\n        self.note = \"this.name\"\n        self.total = len(withthis.items)\n        log(self, \"rest\", rest=args)\n"
        ));
    }

    #[test]
    fn test_merge_needs_two_sources() {
        let source = SourceFile::parse_str("io.py", SHAPES).unwrap();
        let mapping = MergeClassesConfig {
            source_classes: vec!["Reader".into()],
            ..mapping()
        };
        let err = MergeClasses
            .validate(&source, &mapping, &Config::offline())
            .unwrap_err();
        assert!(matches!(err, RefactorError::Configuration { .. }));
    }
}
