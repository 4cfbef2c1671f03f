//! Split one class into composed destination classes
//!
//! Each destination receives its assigned properties (through an initializer with the
//! source initializer's parameters) and methods. The source class keeps one composed
//! attribute per destination, named after the lower-cased destination, and a one-line
//! forwarder for every moved method.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::config::Config;
use crate::error::{RefactorError, Result};
use crate::mapping::SplitClassConfig;
use crate::member_analyzer::{
    call_arguments, docstring_stmt, initializer, self_attribute_reads, ClassAnalyzer, MemberSet,
};
use crate::ops::{
    after_docstring, assignment_block, assigns_only, expect_docstring, expect_method_docstring,
    insertion_point, OutputFile, Refactoring, Transformation,
};
use crate::source::SourceFile;
use crate::syntax::{ClassDef, CodeStmt, FunctionDef, Param, Stmt};
use crate::validators::{check_split_config, DocOwner, MemberExpectation, Report};

/// Decorators that keep their meaning on a forwarder
fn is_descriptor_decorator(decorator: &str) -> bool {
    let name = decorator.trim_start_matches('@').trim();
    matches!(name, "staticmethod" | "classmethod" | "property")
        || name.ends_with(".setter")
        || name.ends_with(".deleter")
}

fn is_property_getter(func: &FunctionDef) -> bool {
    func.has_decorator("property")
        || func.has_decorator("functools.cached_property")
        || func.has_decorator("cached_property")
}

fn accessor_kind<'a>(func: &'a FunctionDef) -> Option<&'a str> {
    func.decorators.iter().find_map(|d| {
        let name = d.trim_start_matches('@').trim();
        if name.ends_with(".setter") {
            Some("setter")
        } else if name.ends_with(".deleter") {
            Some("deleter")
        } else {
            None
        }
    })
}

/// One-line method delegating to the same member on a composed attribute
fn forwarder(method: &FunctionDef, dest: &str, attribute: &str) -> FunctionDef {
    let receiver = method.receiver().unwrap_or("self");
    let target = format!("{}.{}", receiver, attribute);
    let call = if method.has_decorator("staticmethod") {
        format!("return {}.{}({})", dest, method.name, call_arguments(method, false))
    } else if method.has_decorator("classmethod") {
        format!("return {}.{}({})", dest, method.name, call_arguments(method, true))
    } else if is_property_getter(method) {
        format!("return {}.{}", target, method.name)
    } else if accessor_kind(method) == Some("setter") {
        let value = method
            .params
            .get(1)
            .map(|p| p.name.as_str())
            .unwrap_or("value");
        format!("{}.{} = {}", target, method.name, value)
    } else if accessor_kind(method) == Some("deleter") {
        format!("del {}.{}", target, method.name)
    } else if method.is_async {
        format!("return await {}.{}({})", target, method.name, call_arguments(method, true))
    } else {
        format!("return {}.{}({})", target, method.name, call_arguments(method, true))
    };

    let mut body = Vec::new();
    if let Some(doc) = docstring_stmt(&method.body) {
        body.push(Stmt::Code(doc.clone()));
    }
    body.push(Stmt::Code(CodeStmt::synthesized(call)));

    let mut forwarded = FunctionDef::synthesized(method.name.clone(), method.params.clone(), body);
    forwarded.is_async = method.is_async;
    forwarded.returns = method.returns.clone();
    forwarded.decorators = method
        .decorators
        .iter()
        .filter(|d| is_descriptor_decorator(d))
        .cloned()
        .collect();
    forwarded
}

/// Property and setter reading through the composed attribute
fn delegating_accessors(prop: &str, attribute: &str) -> Vec<Stmt> {
    let mut getter = FunctionDef::synthesized(
        prop,
        vec![Param::regular("self")],
        vec![Stmt::Code(CodeStmt::synthesized(format!(
            "return self.{}.{}",
            attribute, prop
        )))],
    );
    getter.decorators = vec!["@property".to_string()];

    let mut setter = FunctionDef::synthesized(
        prop,
        vec![Param::regular("self"), Param::regular("value")],
        vec![Stmt::Code(CodeStmt::synthesized(format!(
            "self.{}.{} = value",
            attribute, prop
        )))],
    );
    setter.decorators = vec![format!("@{}.setter", prop)];
    vec![Stmt::Function(getter), Stmt::Function(setter)]
}

pub struct SplitClass;

impl Refactoring for SplitClass {
    type Mapping = SplitClassConfig;
    const NAME: &'static str = "split-class";

    fn validate(&self, source: &SourceFile, mapping: &SplitClassConfig, _config: &Config) -> Result<()> {
        let mut report = Report::new(&source.path);
        check_split_config(&mut report, |name| source.class(name), mapping);
        report.into_result()
    }

    fn transform(
        &self,
        mut source: SourceFile,
        mapping: &SplitClassConfig,
        _config: &Config,
    ) -> Result<Transformation> {
        let file = source.path.clone();
        let class_name = mapping.source_class.clone();
        let class = source
            .class(&class_name)
            .cloned()
            .ok_or_else(|| RefactorError::structural(&file, format!("class '{}' not found", class_name)))?;
        let position = source.class_position(&class_name).unwrap_or(0);
        let original_members = MemberSet::of(&class);

        let mut method_owner: BTreeMap<&str, &str> = BTreeMap::new();
        let mut prop_owner: BTreeMap<&str, &str> = BTreeMap::new();
        for (dest, assignment) in &mapping.destinations {
            for method in &assignment.methods {
                method_owner.insert(method, dest);
            }
            for prop in &assignment.properties {
                prop_owner.insert(prop, dest);
            }
        }
        let moved_props: BTreeSet<String> = prop_owner.keys().map(|p| p.to_string()).collect();
        let init = initializer(&class).cloned();
        let receiver = init
            .as_ref()
            .and_then(|i| i.receiver())
            .unwrap_or("self")
            .to_string();

        // Destination classes, members in source order with their leading comments
        let mut dest_bodies: BTreeMap<&str, Vec<Stmt>> = BTreeMap::new();
        let mut dest_has_init: BTreeSet<&str> = BTreeSet::new();
        for (dest, assignment) in &mapping.destinations {
            let mut body = Vec::new();
            if !assignment.properties.is_empty() {
                if let Some(init) = &init {
                    let props: BTreeSet<String> = assignment.properties.iter().cloned().collect();
                    let dest_init = FunctionDef::synthesized(
                        "__init__",
                        init.params.clone(),
                        assignment_block(init, &props),
                    );
                    body.push(Stmt::Function(dest_init));
                    dest_has_init.insert(dest);
                }
            }
            dest_bodies.insert(dest, body);
        }

        let mut remaining: Vec<Stmt> = Vec::new();
        let mut pending_comments: Vec<Stmt> = Vec::new();
        for stmt in &class.body {
            match stmt {
                Stmt::Comment(_) => pending_comments.push(stmt.clone()),
                Stmt::Function(func) => match method_owner.get(func.name.as_str()) {
                    Some(dest) => {
                        let attribute = dest.to_lowercase();
                        if let Some(body) = dest_bodies.get_mut(dest) {
                            body.append(&mut pending_comments);
                            body.push(stmt.clone());
                        }
                        debug!("{}.{} -> {}", class_name, func.name, dest);
                        remaining.push(Stmt::Function(forwarder(func, dest, &attribute)));
                    }
                    None => {
                        remaining.append(&mut pending_comments);
                        remaining.push(stmt.clone());
                    }
                },
                _ => {
                    remaining.append(&mut pending_comments);
                    remaining.push(stmt.clone());
                }
            }
        }
        remaining.append(&mut pending_comments);

        // Initializer: composition first, then what was not moved
        let composition: Vec<Stmt> = mapping
            .destinations
            .keys()
            .map(|dest| {
                let args = match (&init, dest_has_init.contains(dest.as_str())) {
                    (Some(init), true) => call_arguments(init, true),
                    _ => String::new(),
                };
                Stmt::Code(CodeStmt::synthesized(format!(
                    "{}.{} = {}({})",
                    receiver,
                    dest.to_lowercase(),
                    dest,
                    args
                )))
            })
            .collect();

        let new_init = match &init {
            Some(init) => {
                let mut body: Vec<Stmt> = init
                    .body
                    .iter()
                    .filter(|s| {
                        !s.as_code()
                            .is_some_and(|c| assigns_only(c, &receiver, &moved_props))
                    })
                    .cloned()
                    .collect();
                let at = after_docstring(&body);
                body.splice(at..at, composition);
                let mut rewritten = init.clone();
                rewritten.body = body;
                rewritten
            }
            None => FunctionDef::synthesized("__init__", vec![Param::regular("self")], composition),
        };

        // Moved properties still read by what stays get delegating accessors
        let mut analyzer = ClassAnalyzer::new(&source.text);
        analyzer.analyze(&class);
        let mut excluded: BTreeSet<String> = method_owner.keys().map(|m| m.to_string()).collect();
        excluded.insert("__init__".to_string());
        let mut reads = analyzer.reads_outside(&excluded);
        for stmt in new_init.body.iter().filter_map(Stmt::as_code) {
            reads.extend(self_attribute_reads(&stmt.text, &receiver));
        }
        let mut accessors = Vec::new();
        let mut accessor_props = Vec::new();
        for (prop, dest) in &prop_owner {
            if reads.contains(*prop) && !original_members.methods.contains(*prop) {
                accessors.extend(delegating_accessors(prop, &dest.to_lowercase()));
                accessor_props.push(prop.to_string());
            }
        }

        match remaining
            .iter()
            .position(|s| s.as_function().is_some_and(|f| f.name == "__init__"))
        {
            Some(i) => {
                remaining[i] = Stmt::Function(new_init);
                remaining.splice(i + 1..i + 1, accessors);
            }
            None => {
                let at = remaining
                    .iter()
                    .position(Stmt::is_definition)
                    .unwrap_or(remaining.len());
                let mut block = vec![Stmt::Function(new_init)];
                block.extend(accessors);
                remaining.splice(at..at, block);
            }
        }

        let mut rewritten = class.clone();
        rewritten.body = remaining;

        let dest_classes: Vec<Stmt> = dest_bodies
            .into_iter()
            .map(|(dest, body)| Stmt::Class(ClassDef::synthesized(dest, Vec::new(), body)))
            .collect();
        source.module.body[position] = Stmt::Class(rewritten);
        let at = insertion_point(&source.module.body, position);
        source.module.body.splice(at..at, dest_classes);
        source.reindex();

        // What the checks must find afterwards
        let mut members = Vec::new();
        let mut docstrings = Vec::new();
        for (dest, assignment) in &mapping.destinations {
            members.push(MemberExpectation::Class {
                file: file.clone(),
                class: dest.clone(),
                properties: assignment.properties.clone(),
                methods: assignment.methods.clone(),
                inherits: None,
            });
            docstrings.extend(
                assignment
                    .methods
                    .iter()
                    .filter_map(|m| expect_method_docstring(&file, &class, m, dest)),
            );
        }
        let mut kept_props: Vec<String> = original_members
            .properties
            .iter()
            .filter(|p| !moved_props.contains(*p))
            .cloned()
            .collect();
        kept_props.extend(accessor_props);
        members.push(MemberExpectation::Class {
            file: file.clone(),
            class: class_name.clone(),
            properties: kept_props,
            methods: original_members.methods.iter().cloned().collect(),
            inherits: None,
        });
        docstrings.extend(expect_docstring(
            &file,
            DocOwner::Class(class_name.clone()),
            &class.body,
        ));
        docstrings.extend(
            original_members
                .methods
                .iter()
                .filter_map(|m| expect_method_docstring(&file, &class, m, &class_name)),
        );

        let destinations: Vec<&str> = mapping.destinations.keys().map(String::as_str).collect();
        Ok(Transformation {
            outputs: vec![OutputFile {
                path: file.clone(),
                text: source.render(),
            }],
            members,
            docstrings,
            import_target: file,
            summary: format!("split {} into {}", class_name, destinations.join(", ")),
        })
    }
}
