//! Extract a common base class from sibling classes

use std::collections::BTreeSet;

use tracing::debug;

use crate::config::Config;
use crate::error::{RefactorError, Result};
use crate::import_analyzer::import_bindings;
use crate::mapping::ExtractSuperclassConfig;
use crate::member_analyzer::{call_arguments, docstring_stmt, initializer, methods_named, MemberSet};
use crate::ops::{
    after_docstring, assignment_block, assigns_only, expect_docstring, expect_method_docstring,
    insertion_point, OutputFile, Refactoring, Transformation,
};
use crate::source::SourceFile;
use crate::syntax::{ClassDef, CodeKind, CodeStmt, FunctionDef, Origin, Stmt};
use crate::validators::{
    check_extract_config, check_inheritance_conflicts, check_signature_compatibility, DocOwner,
    MemberExpectation, Report,
};

/// Extracted property or method names in first-seen order across the children
fn ordered_names(config: &ExtractSuperclassConfig, properties: bool) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for child in &config.child_classes {
        let Some(assignment) = config.extract_from.get(child) else {
            continue;
        };
        let list = if properties {
            &assignment.properties
        } else {
            &assignment.methods
        };
        for name in list {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
    }
    names
}

/// Abstract stub: same signature and docstring, body raises
fn abstract_stub(method: &FunctionDef) -> FunctionDef {
    let mut stub = method.clone();
    if !stub.has_decorator("abstractmethod") && !stub.has_decorator("abc.abstractmethod") {
        stub.decorators.push("@abstractmethod".to_string());
    }
    let mut body = Vec::new();
    if let Some(doc) = docstring_stmt(&method.body) {
        body.push(Stmt::Code(doc.clone()));
    }
    body.push(Stmt::Code(CodeStmt::synthesized("raise NotImplementedError")));
    stub.body = body;
    stub.origin = Origin::Synthesized;
    stub
}

/// Add `from abc import ...` above `base_at` for whichever names are not bound there yet
///
/// Only imports above the base class count: a binding further down the module does not
/// exist yet when the class statement runs.
fn ensure_abc_import(module_body: &mut Vec<Stmt>, base_at: usize) {
    let above = &module_body[..base_at.min(module_body.len())];
    let bound: BTreeSet<String> = above
        .iter()
        .filter_map(Stmt::as_code)
        .filter(|c| c.kind == CodeKind::Import)
        .flat_map(|c| import_bindings(&c.text))
        .collect();
    let missing: Vec<&str> = ["ABC", "abstractmethod"]
        .into_iter()
        .filter(|name| !bound.contains(*name))
        .collect();
    if missing.is_empty() {
        return;
    }
    let at = above
        .iter()
        .rposition(|s| s.as_code().is_some_and(|c| c.kind == CodeKind::Import))
        .map(|i| i + 1)
        .unwrap_or_else(|| after_docstring(above))
        .min(above.len());
    let import = CodeStmt::synthesized(format!("from abc import {}", missing.join(", ")));
    module_body.insert(at, Stmt::Code(import));
}

/// Child body with the concrete extracted methods removed and the initializer chained
/// to the base
fn rewrite_child(
    child: &ClassDef,
    base: &str,
    removed_methods: &BTreeSet<String>,
    extracted_props: &BTreeSet<String>,
    base_has_init: bool,
) -> ClassDef {
    let mut body = Vec::new();
    let mut pending_comments = Vec::new();
    for stmt in &child.body {
        match stmt {
            Stmt::Comment(_) => pending_comments.push(stmt.clone()),
            Stmt::Function(func) if removed_methods.contains(&func.name) => {
                // Comments directly above a removed method go with it
                pending_comments.clear();
            }
            Stmt::Function(func) if func.name == "__init__" && base_has_init => {
                body.append(&mut pending_comments);
                let receiver = func.receiver().unwrap_or("self").to_string();
                let mut init = func.clone();
                init.body.retain(|s| {
                    !s.as_code()
                        .is_some_and(|c| assigns_only(c, &receiver, extracted_props))
                });
                let at = after_docstring(&init.body);
                let call = format!("super().__init__({})", call_arguments(func, true));
                init.body.insert(at, Stmt::Code(CodeStmt::synthesized(call)));
                body.push(Stmt::Function(init));
            }
            _ => {
                body.append(&mut pending_comments);
                body.push(stmt.clone());
            }
        }
    }
    body.append(&mut pending_comments);

    let mut rewritten = child.clone();
    rewritten.bases = std::iter::once(base.to_string())
        .chain(child.bases.iter().filter(|b| *b != "object").cloned())
        .collect();
    rewritten.body = body;
    rewritten
}

pub struct ExtractSuperclass;

impl Refactoring for ExtractSuperclass {
    type Mapping = ExtractSuperclassConfig;
    const NAME: &'static str = "extract-superclass";

    fn validate(
        &self,
        source: &SourceFile,
        mapping: &ExtractSuperclassConfig,
        _config: &Config,
    ) -> Result<()> {
        let lookup = |name: &str| source.class(name);
        let mut report = Report::new(&source.path);
        check_extract_config(&mut report, lookup, mapping);
        check_inheritance_conflicts(&mut report, lookup, &mapping.child_classes);
        check_signature_compatibility(&mut report, lookup, mapping);
        report.into_result()
    }

    fn transform(
        &self,
        mut source: SourceFile,
        mapping: &ExtractSuperclassConfig,
        _config: &Config,
    ) -> Result<Transformation> {
        let file = source.path.clone();
        let base_name = mapping.base_class.clone();
        let children: Vec<ClassDef> = mapping
            .child_classes
            .iter()
            .map(|name| {
                source.class(name).cloned().ok_or_else(|| {
                    RefactorError::structural(&file, format!("class '{}' not found", name))
                })
            })
            .collect::<Result<_>>()?;

        let props = ordered_names(mapping, true);
        let methods = ordered_names(mapping, false);
        let prop_set: BTreeSet<String> = props.iter().cloned().collect();
        let abstract_set: BTreeSet<String> = mapping.abstract_methods.iter().cloned().collect();
        let concrete: BTreeSet<String> = methods
            .iter()
            .filter(|m| !abstract_set.contains(*m))
            .cloned()
            .collect();

        // Base initializer from the first child that assigns the properties
        let mut base_body: Vec<Stmt> = Vec::new();
        let base_init = children
            .iter()
            .filter_map(initializer)
            .next()
            .filter(|_| !prop_set.is_empty());
        if let Some(init) = base_init {
            let block = assignment_block(init, &prop_set);
            base_body.push(Stmt::Function(FunctionDef::synthesized(
                "__init__",
                init.params.clone(),
                block,
            )));
        }

        // Each method comes from the first child that declares it
        let mut method_sources: Vec<(&str, &ClassDef)> = Vec::new();
        for method in &methods {
            let Some(owner) = children.iter().find(|c| methods_named(c, method).next().is_some())
            else {
                continue;
            };
            debug!("{}.{} -> {}", owner.name, method, base_name);
            method_sources.push((method.as_str(), owner));
            for def in methods_named(owner, method) {
                let def = if abstract_set.contains(method) {
                    abstract_stub(def)
                } else {
                    def.clone()
                };
                base_body.push(Stmt::Function(def));
            }
        }

        let bases = if abstract_set.is_empty() {
            Vec::new()
        } else {
            vec!["ABC".to_string()]
        };
        let base = ClassDef::synthesized(base_name.clone(), bases, base_body);

        let mut members = Vec::new();
        let mut docstrings = Vec::new();
        for child in &children {
            let original = MemberSet::of(child);
            let rewritten = rewrite_child(child, &base_name, &concrete, &prop_set, base_init.is_some());
            let position = source.class_position(&child.name).ok_or_else(|| {
                RefactorError::structural(&file, format!("class '{}' not found", child.name))
            })?;
            source.module.body[position] = Stmt::Class(rewritten);

            members.push(MemberExpectation::Class {
                file: file.clone(),
                class: child.name.clone(),
                properties: original
                    .properties
                    .iter()
                    .filter(|p| !prop_set.contains(*p))
                    .cloned()
                    .collect(),
                methods: original
                    .methods
                    .iter()
                    .filter(|m| !concrete.contains(*m))
                    .cloned()
                    .collect(),
                inherits: Some(base_name.clone()),
            });
            docstrings.extend(expect_docstring(
                &file,
                DocOwner::Class(child.name.clone()),
                &child.body,
            ));
            docstrings.extend(
                original
                    .methods
                    .iter()
                    .filter(|m| !concrete.contains(*m))
                    .filter_map(|m| expect_method_docstring(&file, child, m, &child.name)),
            );
        }
        members.push(MemberExpectation::Class {
            file: file.clone(),
            class: base_name.clone(),
            properties: props.clone(),
            methods: methods.clone(),
            inherits: None,
        });
        docstrings.extend(
            method_sources
                .iter()
                .filter_map(|(method, owner)| expect_method_docstring(&file, owner, method, &base_name)),
        );

        let first_child = mapping
            .child_classes
            .iter()
            .filter_map(|name| source.class_position(name))
            .min()
            .unwrap_or(source.module.body.len());
        let at = insertion_point(&source.module.body, first_child);
        source.module.body.insert(at, Stmt::Class(base));
        if !abstract_set.is_empty() {
            ensure_abc_import(&mut source.module.body, at);
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
                "extracted {} from {}",
                base_name,
                mapping.child_classes.join(", ")
            ),
        })
    }
}
