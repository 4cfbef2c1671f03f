//! Pre- and post-transform validation
//!
//! Pre-transform checks are pure. They take a class lookup closure instead of a
//! [`SourceFile`], record every problem they find in a [`Report`], and turn into one
//! `Configuration` or `Structural` error listing all of them.
//!
//! Post-transform checks run against the written output. They receive the expectations
//! the transform emitted ([`MemberExpectation`], [`DocstringExpectation`]) and fail with
//! a `Regeneration` error naming the first element that did not survive.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::ToolSettings;
use crate::error::{Check, RefactorError, Result};
use crate::import_analyzer::import_bindings;
use crate::mapping::{
    ExtractSuperclassConfig, MergeClassesConfig, SplitClassConfig, SplitFileConfig,
};
use crate::member_analyzer::{
    clean_docstring, docstring, find_method, initializer, is_special, MemberSet,
};
use crate::source::{syntax_error_line, SourceFile};
use crate::syntax::{ClassDef, CodeKind, FunctionDef, Stmt};
use crate::tools::{check_import, check_syntax_external, ToolOutcome};

/// Python keywords that cannot be used as identifiers
pub const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class", "continue",
    "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if", "import",
    "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try", "while",
    "with", "yield",
];

/// Module name reserved for unmapped module-level bindings in a package split
pub const COMMON_MODULE: &str = "_common";

/// Validate that a string is a valid Python identifier
///
/// # Returns
///
/// The reason the name is rejected, if it is
pub fn validate_identifier(name: &str) -> std::result::Result<(), String> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err("name cannot be empty".to_string());
    };
    if !first.is_alphabetic() && first != '_' {
        return Err("must start with letter or underscore".to_string());
    }
    if let Some(ch) = chars.find(|ch| !ch.is_alphanumeric() && *ch != '_') {
        return Err(format!("invalid character: '{}'", ch));
    }
    if PYTHON_KEYWORDS.contains(&name) {
        return Err("cannot use Python keyword as identifier".to_string());
    }
    Ok(())
}

/// Problems collected by the pre-transform checks
#[derive(Debug)]
pub struct Report {
    file: PathBuf,
    configuration: Vec<String>,
    structural: Vec<String>,
}

impl Report {
    pub fn new(file: &Path) -> Self {
        Self {
            file: file.to_path_buf(),
            configuration: Vec::new(),
            structural: Vec::new(),
        }
    }

    pub fn configuration(&mut self, problem: impl Into<String>) {
        self.configuration.push(problem.into());
    }

    pub fn structural(&mut self, problem: impl Into<String>) {
        self.structural.push(problem.into());
    }

    pub fn is_clean(&self) -> bool {
        self.configuration.is_empty() && self.structural.is_empty()
    }

    /// Structural problems win: a mapping cannot be judged against a missing class
    pub fn into_result(self) -> Result<()> {
        if !self.structural.is_empty() {
            return Err(RefactorError::Structural {
                file: self.file,
                message: self.structural.join("; "),
            });
        }
        if !self.configuration.is_empty() {
            return Err(RefactorError::Configuration {
                file: self.file,
                problems: self.configuration,
            });
        }
        Ok(())
    }
}

fn check_name(report: &mut Report, what: &str, name: &str) {
    if let Err(reason) = validate_identifier(name) {
        report.configuration(format!("invalid {} name '{}': {}", what, name, reason));
    }
}

fn require_class<'a, F>(report: &mut Report, lookup: &F, name: &str) -> Option<&'a ClassDef>
where
    F: Fn(&str) -> Option<&'a ClassDef>,
{
    let class = lookup(name);
    if class.is_none() {
        report.structural(format!("class '{}' not found", name));
    }
    class
}

/// Every non-special member of the source class goes to exactly one destination
pub fn check_split_config<'a, F>(report: &mut Report, lookup: F, config: &SplitClassConfig)
where
    F: Fn(&str) -> Option<&'a ClassDef>,
{
    let Some(source) = require_class(report, &lookup, &config.source_class) else {
        return;
    };
    let source_name = &config.source_class;
    if config.destinations.is_empty() {
        report.configuration("no destination classes given");
        return;
    }

    let declared = MemberSet::of(source);
    let members = declared.clone().without_specials();
    let mut attribute_names: BTreeMap<String, &str> = BTreeMap::new();
    for (dest, assignment) in &config.destinations {
        check_name(report, "destination class", dest);
        if dest == source_name {
            report.configuration(format!("destination '{}' is the source class", dest));
        } else if lookup(dest).is_some() {
            report.configuration(format!("destination class '{}' already exists", dest));
        }
        let attribute = dest.to_lowercase();
        if declared.contains(&attribute) {
            report.configuration(format!(
                "attribute '{}' for destination '{}' collides with a member of {}",
                attribute, dest, source_name
            ));
        }
        if let Some(other) = attribute_names.insert(attribute.clone(), dest.as_str()) {
            report.configuration(format!(
                "destinations '{}' and '{}' share the attribute name '{}'",
                other, dest, attribute
            ));
        }
        if assignment.is_empty() {
            report.configuration(format!("destination '{}' receives no members", dest));
        }
    }

    let mut owners: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (dest, assignment) in &config.destinations {
        for prop in &assignment.properties {
            if !members.properties.contains(prop) {
                report.configuration(format!(
                    "extra: {}.{} is not a declared property of {}",
                    dest, prop, source_name
                ));
            }
            owners.entry(prop.as_str()).or_default().push(dest.as_str());
        }
        for method in &assignment.methods {
            if is_special(method) {
                report.configuration(format!("special method '{}' cannot be moved", method));
            } else if !members.methods.contains(method) {
                report.configuration(format!(
                    "extra: {}.{} is not a declared method of {}",
                    dest, method, source_name
                ));
            }
            owners.entry(method.as_str()).or_default().push(dest.as_str());
        }
    }
    for (member, dests) in &owners {
        if dests.len() > 1 {
            report.configuration(format!(
                "duplicate: {}.{} assigned to {}",
                source_name,
                member,
                dests.join(", ")
            ));
        }
    }
    for member in members.properties.iter().chain(members.methods.iter()) {
        if !owners.contains_key(member.as_str()) {
            report.configuration(format!("missing: {}.{}", source_name, member));
        }
    }
}

/// The extracted names, their children and the abstract list agree
pub fn check_extract_config<'a, F>(report: &mut Report, lookup: F, config: &ExtractSuperclassConfig)
where
    F: Fn(&str) -> Option<&'a ClassDef>,
{
    check_name(report, "base class", &config.base_class);
    if lookup(&config.base_class).is_some() {
        report.configuration(format!("base class '{}' already exists", config.base_class));
    }
    if config.child_classes.is_empty() {
        report.configuration("no child classes given");
    }
    let mut seen = BTreeSet::new();
    for child in &config.child_classes {
        if !seen.insert(child) {
            report.configuration(format!("child class '{}' listed twice", child));
        }
        if child == &config.base_class {
            report.configuration(format!("'{}' is both base and child", child));
        }
    }
    for name in config.extract_from.keys() {
        if !config.child_classes.contains(name) {
            report.configuration(format!(
                "extract_from names '{}', which is not a listed child class",
                name
            ));
        }
    }

    let extracted_props: BTreeSet<&str> = config
        .extract_from
        .values()
        .flat_map(|a| a.properties.iter().map(String::as_str))
        .collect();
    let extracted_methods: BTreeSet<&str> = config
        .extract_from
        .values()
        .flat_map(|a| a.methods.iter().map(String::as_str))
        .collect();
    if extracted_props.is_empty() && extracted_methods.is_empty() {
        report.configuration("nothing to extract");
    }
    for method in &extracted_methods {
        if is_special(method) {
            report.configuration(format!("special method '{}' cannot be extracted", method));
        }
    }
    for name in &config.abstract_methods {
        if !extracted_methods.contains(name.as_str()) {
            report.configuration(format!("abstract method '{}' is not extracted", name));
        }
    }

    for child in &config.child_classes {
        let Some(class) = require_class(report, &lookup, child) else {
            continue;
        };
        let members = MemberSet::of(class);
        let listed = config.extract_from.get(child);
        for (kind, names, declared) in [
            ("property", &extracted_props, &members.properties),
            ("method", &extracted_methods, &members.methods),
        ] {
            for name in names.iter() {
                let is_listed = listed.is_some_and(|a| {
                    let list = if kind == "property" { &a.properties } else { &a.methods };
                    list.iter().any(|n| n == name)
                });
                if !declared.contains(*name) {
                    report.configuration(format!(
                        "missing: {}.{} ({} is not declared on {})",
                        child, name, kind, child
                    ));
                } else if !is_listed {
                    report.configuration(format!(
                        "missing: {}.{} ({} is extracted but not listed for {})",
                        child, name, kind, child
                    ));
                }
            }
        }
    }
}

/// Children must not already inherit from anything but `object`
pub fn check_inheritance_conflicts<'a, F>(report: &mut Report, lookup: F, children: &[String])
where
    F: Fn(&str) -> Option<&'a ClassDef>,
{
    for child in children {
        let Some(class) = lookup(child) else {
            continue;
        };
        let bases: Vec<&String> = class.bases.iter().filter(|b| *b != "object").collect();
        if !bases.is_empty() {
            report.structural(format!(
                "inheritance conflict: {} already inherits from {}",
                child,
                bases
                    .iter()
                    .map(|b| b.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
    }
}

fn describe_signature(func: &FunctionDef) -> String {
    let (params, returns) = func.signature();
    match returns {
        Some(returns) => format!("({}) -> {}", params.join(", "), returns),
        None => format!("({})", params.join(", ")),
    }
}

/// Extracted methods agree on parameters and return annotation across children
///
/// Extracted properties additionally require identical initializer parameters, since
/// the base initializer receives the children's arguments unchanged.
pub fn check_signature_compatibility<'a, F>(
    report: &mut Report,
    lookup: F,
    config: &ExtractSuperclassConfig,
) where
    F: Fn(&str) -> Option<&'a ClassDef>,
{
    let methods: BTreeSet<&str> = config
        .extract_from
        .values()
        .flat_map(|a| a.methods.iter().map(String::as_str))
        .collect();
    for method in methods {
        let mut reference: Option<(&str, &FunctionDef)> = None;
        for child in &config.child_classes {
            let Some(func) = lookup(child).and_then(|c| find_method(c, method)) else {
                continue;
            };
            match reference {
                None => reference = Some((child.as_str(), func)),
                Some((first, expected)) => {
                    if expected.signature() != func.signature() {
                        report.structural(format!(
                            "signature mismatch for '{}': {}{} vs {}{}",
                            method,
                            first,
                            describe_signature(expected),
                            child,
                            describe_signature(func)
                        ));
                    }
                }
            }
        }
    }

    let has_props = config.extract_from.values().any(|a| !a.properties.is_empty());
    if !has_props {
        return;
    }
    let mut reference: Option<(&str, Vec<String>)> = None;
    for child in &config.child_classes {
        let Some(class) = lookup(child) else {
            continue;
        };
        let Some(init) = initializer(class) else {
            report.structural(format!("{} has no initializer to extract properties from", child));
            continue;
        };
        let params = init.signature().0;
        match &reference {
            None => reference = Some((child.as_str(), params)),
            Some((first, expected)) => {
                if expected != &params {
                    report.structural(format!(
                        "initializer mismatch: {}({}) vs {}({})",
                        first,
                        expected.join(", "),
                        child,
                        params.join(", ")
                    ));
                }
            }
        }
    }
}

/// Sources exist, the target name is free and the allow-lists name real members
pub fn check_merge_config<'a, F>(report: &mut Report, lookup: F, config: &MergeClassesConfig)
where
    F: Fn(&str) -> Option<&'a ClassDef>,
{
    if config.source_classes.len() < 2 {
        report.configuration("merging needs at least two source classes");
    }
    check_name(report, "target class", &config.target_class);
    if lookup(&config.target_class).is_some() {
        report.configuration(format!(
            "target class '{}' already exists",
            config.target_class
        ));
    }

    let mut union = MemberSet::default();
    let mut seen = BTreeSet::new();
    for name in &config.source_classes {
        if !seen.insert(name) {
            report.configuration(format!("source class '{}' listed twice", name));
            continue;
        }
        if let Some(class) = require_class(report, &lookup, name) {
            let members = MemberSet::of(class);
            union.properties.extend(members.properties);
            union.methods.extend(members.methods);
        }
    }
    if !report.structural.is_empty() {
        return;
    }
    for method in config.methods.iter().flatten() {
        if !union.methods.contains(method) {
            report.configuration(format!(
                "extra: method '{}' is not declared on any source class",
                method
            ));
        }
    }
    for prop in config.properties.iter().flatten() {
        if !union.properties.contains(prop) {
            report.configuration(format!(
                "extra: property '{}' is not declared on any source class",
                prop
            ));
        }
    }
}

/// Every top-level class and function is mapped once, lifted methods exist
pub fn check_split_file_config(
    report: &mut Report,
    source: &SourceFile,
    config: &SplitFileConfig,
    package_dir: &Path,
) {
    if config.modules.is_empty() {
        report.configuration("no modules given");
    }
    if let Some(name) = package_dir.file_name().map(|n| n.to_string_lossy().to_string()) {
        check_name(report, "package", &name);
    }
    if package_dir.exists() {
        report.configuration(format!(
            "package directory '{}' already exists",
            package_dir.display()
        ));
    }

    let mut top_level: BTreeSet<String> = BTreeSet::new();
    let mut definitions: Vec<String> = Vec::new();
    for stmt in &source.module.body {
        match stmt {
            Stmt::Class(c) => definitions.push(c.name.clone()),
            Stmt::Function(f) => definitions.push(f.name.clone()),
            Stmt::Code(c) if c.kind != CodeKind::Import => top_level.extend(c.name_targets.clone()),
            _ => {}
        }
    }
    top_level.extend(definitions.iter().cloned());

    let mut placed: BTreeMap<&str, &str> = BTreeMap::new();
    let mut lifted_names: BTreeMap<(&str, &str), &str> = BTreeMap::new();
    for (module, entities) in &config.modules {
        check_name(report, "module", module);
        if module == "__init__" || module == COMMON_MODULE {
            report.configuration(format!("module name '{}' is reserved", module));
        }
        if entities.is_empty() {
            report.configuration(format!("module '{}' receives no entities", module));
        }
        for entity in entities {
            if let Some(previous) = placed.insert(entity.as_str(), module.as_str()) {
                report.configuration(format!(
                    "duplicate: '{}' mapped to {} and {}",
                    entity, previous, module
                ));
            }
            match entity.split_once('.') {
                Some((class_name, method)) => {
                    let Some(class) = source.class(class_name) else {
                        report.structural(format!("class '{}' not found", class_name));
                        continue;
                    };
                    if is_special(method) {
                        report.configuration(format!(
                            "special method '{}' cannot be lifted",
                            entity
                        ));
                    } else if find_method(class, method).is_none() {
                        report.configuration(format!(
                            "extra: {} is not a declared method of {}",
                            entity, class_name
                        ));
                    } else if top_level.contains(method) {
                        report.configuration(format!(
                            "lifted method '{}' would shadow top-level name '{}'",
                            entity, method
                        ));
                    }
                    if let Some(other) = lifted_names.insert((module.as_str(), method), entity) {
                        report.configuration(format!(
                            "lifted methods {} and {} collide in module '{}'",
                            other, entity, module
                        ));
                    }
                }
                None => {
                    if !top_level.contains(entity) {
                        report.configuration(format!(
                            "extra: '{}' is not a top-level name of {}",
                            entity,
                            source.path.display()
                        ));
                    }
                }
            }
        }
    }
    for name in &definitions {
        if !placed.contains_key(name.as_str()) {
            report.configuration(format!("missing: {}", name));
        }
    }
}

/// Syntax of one written file: internal re-parse, then the external checker
///
/// # Returns
///
/// Advisory warnings (checker unavailable or timed out while not required)
pub fn check_syntax(path: &Path, text: &str, checker: &ToolSettings) -> Result<Vec<String>> {
    if let Some(line) = syntax_error_line(text) {
        let excerpt = text
            .lines()
            .nth(line.saturating_sub(1))
            .unwrap_or("")
            .trim();
        return Err(RefactorError::regeneration(
            path,
            Check::Syntax,
            format!("line {} does not parse: `{}`", line, excerpt),
        ));
    }
    let mut warnings = Vec::new();
    match check_syntax_external(checker, path) {
        ToolOutcome::Success | ToolOutcome::Disabled => {}
        ToolOutcome::Failed { stderr, .. } => {
            return Err(RefactorError::regeneration(
                path,
                Check::Syntax,
                format!("external checker rejected the file: {}", stderr.trim()),
            ))
        }
        outcome => {
            if checker.required {
                return Err(RefactorError::regeneration(
                    path,
                    Check::Syntax,
                    format!("required syntax checker: {}", outcome),
                ));
            }
            let warning = format!("syntax checker skipped for {}: {}", path.display(), outcome);
            warn!("{}", warning);
            warnings.push(warning);
        }
    }
    Ok(warnings)
}

/// What a transform promises to leave in its output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberExpectation {
    /// A class holding these members; a property is also satisfied by a same-named
    /// accessor method
    Class {
        file: PathBuf,
        class: String,
        properties: Vec<String>,
        methods: Vec<String>,
        inherits: Option<String>,
    },
    ClassAbsent { file: PathBuf, class: String },
    Function { file: PathBuf, name: String },
    /// A module-level name, bound by any statement including imports
    Binding { file: PathBuf, name: String },
}

fn module_bindings(source: &SourceFile) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for stmt in &source.module.body {
        match stmt {
            Stmt::Code(code) if code.kind == CodeKind::Import => {
                names.extend(import_bindings(&code.text))
            }
            _ => names.extend(stmt.bound_names()),
        }
    }
    names
}

/// Re-parsed output contains every member the transform promised
pub fn check_completeness<'a, F>(expectations: &[MemberExpectation], files: F) -> Result<()>
where
    F: Fn(&Path) -> Option<&'a SourceFile>,
{
    for expectation in expectations {
        let fail = |file: &Path, message: String| {
            Err(RefactorError::regeneration(file, Check::Completeness, message))
        };
        match expectation {
            MemberExpectation::Class {
                file,
                class,
                properties,
                methods,
                inherits,
            } => {
                let Some(found) = files(file).and_then(|s| s.class(class)) else {
                    return fail(file, format!("class {} is missing", class));
                };
                let members = MemberSet::of(found);
                for prop in properties {
                    if !members.properties.contains(prop) && !members.methods.contains(prop) {
                        return fail(file, format!("property {}.{} is missing", class, prop));
                    }
                }
                for method in methods {
                    if !members.methods.contains(method) {
                        return fail(file, format!("method {}.{} is missing", class, method));
                    }
                }
                if let Some(base) = inherits {
                    if !found.bases.iter().any(|b| b == base) {
                        return fail(file, format!("class {} does not inherit from {}", class, base));
                    }
                }
                debug!("{} complete in {}", class, file.display());
            }
            MemberExpectation::ClassAbsent { file, class } => {
                if files(file).and_then(|s| s.class(class)).is_some() {
                    return fail(file, format!("class {} should have been removed", class));
                }
            }
            MemberExpectation::Function { file, name } => {
                if files(file).and_then(|s| s.function(name)).is_none() {
                    return fail(file, format!("function {} is missing", name));
                }
            }
            MemberExpectation::Binding { file, name } => {
                let bound = files(file).map(module_bindings).unwrap_or_default();
                if !bound.contains(name) {
                    return fail(file, format!("name {} is no longer bound", name));
                }
            }
        }
    }
    Ok(())
}

/// Where a docstring is expected after the transform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocOwner {
    Module,
    Class(String),
    Method { class: String, method: String },
    Function(String),
}

impl DocOwner {
    fn describe(&self) -> String {
        match self {
            DocOwner::Module => "module".to_string(),
            DocOwner::Class(class) => format!("class {}", class),
            DocOwner::Method { class, method } => format!("method {}.{}", class, method),
            DocOwner::Function(name) => format!("function {}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocstringExpectation {
    pub file: PathBuf,
    pub owner: DocOwner,
    /// Cleaned docstring text
    pub expected: String,
}

fn excerpt(text: &str) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > 60 {
        format!("{}...", flat.chars().take(60).collect::<String>())
    } else {
        flat
    }
}

fn owner_docstring(source: &SourceFile, owner: &DocOwner) -> Option<String> {
    let body = match owner {
        DocOwner::Module => &source.module.body,
        DocOwner::Class(class) => &source.class(class)?.body,
        DocOwner::Method { class, method } => {
            // A property and its setter share a name; any of them may carry the docstring
            return source
                .class(class)?
                .methods()
                .filter(|m| &m.name == method)
                .find_map(|m| docstring(&m.body));
        }
        DocOwner::Function(name) => &source.function(name)?.body,
    };
    docstring(body)
}

/// Every recorded docstring is present and equal (after cleaning) at its new place
pub fn check_docstrings<'a, F>(expectations: &[DocstringExpectation], files: F) -> Result<()>
where
    F: Fn(&Path) -> Option<&'a SourceFile>,
{
    for expectation in expectations {
        let found = files(&expectation.file).and_then(|s| owner_docstring(s, &expectation.owner));
        let owner = expectation.owner.describe();
        match found.map(|doc| clean_docstring(&doc)) {
            None => {
                return Err(RefactorError::regeneration(
                    &expectation.file,
                    Check::Docstring,
                    format!(
                        "docstring of {} lost: expected \"{}\", found none",
                        owner,
                        excerpt(&expectation.expected)
                    ),
                ))
            }
            Some(doc) if doc != expectation.expected => {
                return Err(RefactorError::regeneration(
                    &expectation.file,
                    Check::Docstring,
                    format!(
                        "docstring of {} changed: expected \"{}\", found \"{}\"",
                        owner,
                        excerpt(&expectation.expected),
                        excerpt(&doc)
                    ),
                ))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Try importing the result; problems are warnings only
pub fn check_importable(checker: &ToolSettings, target: &Path) -> Vec<String> {
    match check_import(checker, target) {
        ToolOutcome::Success | ToolOutcome::Disabled => Vec::new(),
        outcome => {
            let warning = format!("import check for {}: {}", target.display(), outcome);
            warn!("{}", warning);
            vec![warning]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MemberAssignment;

    const PEOPLE: &str = r#"class Person:
    """A person."""

    def __init__(self, name, age):
        self.name = name
        self.age = age

    def greet(self):
        return "hi " + self.name

    def birthday(self):
        self.age += 1


class X:
    def shared(self, a) -> int:
        return a


class Y(Mixin):
    def shared(self, b) -> int:
        return b
"#;

    fn people() -> SourceFile {
        SourceFile::parse_str("people.py", PEOPLE).unwrap()
    }

    fn assignment(properties: &[&str], methods: &[&str]) -> MemberAssignment {
        MemberAssignment {
            properties: properties.iter().map(|s| s.to_string()).collect(),
            methods: methods.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn problems(report: Report) -> Vec<String> {
        match report.into_result() {
            Err(RefactorError::Configuration { problems, .. }) => problems,
            Err(RefactorError::Structural { message, .. }) => vec![message],
            Err(other) => panic!("unexpected error: {other}"),
            Ok(()) => Vec::new(),
        }
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("Pricing").is_ok());
        assert!(validate_identifier("_x1").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("a-b").is_err());
        assert!(validate_identifier("class").is_err());
    }

    #[test]
    fn test_split_config_reports_missing_extra_and_duplicates() {
        let source = people();
        let mut destinations = BTreeMap::new();
        destinations.insert("Identity".to_string(), assignment(&["name", "nick"], &["greet"]));
        destinations.insert("Ageing".to_string(), assignment(&["name"], &[]));
        let config = SplitClassConfig {
            source_class: "Person".into(),
            destinations,
        };
        let mut report = Report::new(&source.path);
        check_split_config(&mut report, |n| source.class(n), &config);
        let problems = problems(report);
        assert!(problems.iter().any(|p| p.contains("extra: Identity.nick")));
        assert!(problems.iter().any(|p| p == "duplicate: Person.name assigned to Ageing, Identity"));
        assert!(problems.iter().any(|p| p == "missing: Person.age"));
        assert!(problems.iter().any(|p| p == "missing: Person.birthday"));
    }

    #[test]
    fn test_split_config_accepts_complete_mapping() {
        let source = people();
        let mut destinations = BTreeMap::new();
        destinations.insert("Identity".to_string(), assignment(&["name"], &["greet"]));
        destinations.insert("Ageing".to_string(), assignment(&["age"], &["birthday"]));
        let config = SplitClassConfig {
            source_class: "Person".into(),
            destinations,
        };
        let mut report = Report::new(&source.path);
        check_split_config(&mut report, |n| source.class(n), &config);
        assert!(report.is_clean(), "{:?}", report);
    }

    #[test]
    fn test_split_config_unknown_class_is_structural() {
        let source = people();
        let config = SplitClassConfig {
            source_class: "Nobody".into(),
            destinations: BTreeMap::new(),
        };
        let mut report = Report::new(&source.path);
        check_split_config(&mut report, |n| source.class(n), &config);
        assert!(matches!(
            report.into_result(),
            Err(RefactorError::Structural { .. })
        ));
    }

    #[test]
    fn test_signature_mismatch_is_reported_per_class() {
        let source = people();
        let mut extract_from = BTreeMap::new();
        extract_from.insert("X".to_string(), assignment(&[], &["shared"]));
        extract_from.insert("Y".to_string(), assignment(&[], &["shared"]));
        let config = ExtractSuperclassConfig {
            base_class: "Base".into(),
            child_classes: vec!["X".into(), "Y".into()],
            extract_from,
            abstract_methods: Vec::new(),
        };
        let mut report = Report::new(&source.path);
        check_signature_compatibility(&mut report, |n| source.class(n), &config);
        check_inheritance_conflicts(&mut report, |n| source.class(n), &config.child_classes);
        let message = problems(report).join("\n");
        assert!(message.contains("signature mismatch for 'shared': X(self, a) -> int vs Y(self, b) -> int"));
        assert!(message.contains("inheritance conflict: Y already inherits from Mixin"));
    }

    #[test]
    fn test_object_base_is_not_a_conflict() {
        let source = SourceFile::parse_str("o.py", "class A(object):\n    pass\n").unwrap();
        let mut report = Report::new(&source.path);
        check_inheritance_conflicts(&mut report, |n| source.class(n), &["A".to_string()]);
        assert!(report.is_clean());
    }

    #[test]
    fn test_merge_config_requires_free_target() {
        let source = people();
        let config = MergeClassesConfig {
            source_classes: vec!["X".into(), "Y".into()],
            target_class: "Person".into(),
            methods: Some(vec!["shared".into(), "nope".into()]),
            properties: None,
            keep_aliases: false,
        };
        let mut report = Report::new(&source.path);
        check_merge_config(&mut report, |n| source.class(n), &config);
        let problems = problems(report);
        assert!(problems.contains(&"target class 'Person' already exists".to_string()));
        assert!(problems.iter().any(|p| p.contains("method 'nope'")));
    }

    #[test]
    fn test_completeness_accepts_accessor_for_property() {
        let written = SourceFile::parse_str(
            "out.py",
            "class A:\n    @property\n    def p(self):\n        return self.inner.p\n",
        )
        .unwrap();
        let expectation = MemberExpectation::Class {
            file: PathBuf::from("out.py"),
            class: "A".into(),
            properties: vec!["p".into()],
            methods: Vec::new(),
            inherits: None,
        };
        let lookup = |_: &Path| Some(&written);
        assert!(check_completeness(&[expectation], lookup).is_ok());

        let missing = MemberExpectation::Class {
            file: PathBuf::from("out.py"),
            class: "A".into(),
            properties: Vec::new(),
            methods: vec!["q".into()],
            inherits: None,
        };
        let err = check_completeness(&[missing], lookup).unwrap_err();
        assert_eq!(err.to_string(), "out.py: completeness check failed: method A.q is missing");
    }

    #[test]
    fn test_binding_expectation_sees_imports() {
        let facade = SourceFile::parse_str(
            "pkg/__init__.py",
            "from .models import User as User, Group\nimport os.path\n",
        )
        .unwrap();
        let lookup = |_: &Path| Some(&facade);
        for name in ["User", "Group", "os"] {
            let expectation = MemberExpectation::Binding {
                file: PathBuf::from("pkg/__init__.py"),
                name: name.into(),
            };
            assert!(check_completeness(&[expectation], lookup).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_docstring_mismatch_names_both_excerpts() {
        let written = SourceFile::parse_str(
            "out.py",
            "class A:\n    \"\"\"Something else.\"\"\"\n",
        )
        .unwrap();
        let expectation = DocstringExpectation {
            file: PathBuf::from("out.py"),
            owner: DocOwner::Class("A".into()),
            expected: "The original text.".into(),
        };
        let err = check_docstrings(&[expectation], |_: &Path| Some(&written)).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("The original text."));
        assert!(message.contains("Something else."));
    }

    #[test]
    fn test_internal_syntax_check_fails_closed() {
        let offline = ToolSettings {
            enabled: false,
            ..ToolSettings::default()
        };
        let err = check_syntax(Path::new("bad.py"), "def f(:\n", &offline).unwrap_err();
        assert!(matches!(
            err,
            RefactorError::Regeneration {
                check: Check::Syntax,
                ..
            }
        ));
        assert!(check_syntax(Path::new("ok.py"), "x = 1\n", &offline)
            .unwrap()
            .is_empty());
    }
}
