//! Split one module into a package
//!
//! Layout produced for `shapes.py` split into `geometry` and `render`:
//!
//! ```text
//! shapes.py                  # shim re-exporting everything from the package
//! shapes_pre_split.py.bak    # untouched copy of the original
//! shapes_pkg/__init__.py     # facade: imports every name, reattaches lifted methods
//! shapes_pkg/geometry.py
//! shapes_pkg/render.py
//! shapes_pkg/_common.py      # unmapped module-level bindings, only when there are any
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{RefactorError, Result};
use crate::import_analyzer::{import_bindings, ImportAnalyzer};
use crate::mapping::SplitFileConfig;
use crate::member_analyzer::{clean_docstring, docstring, CodeGenerator, MemberSet};
use crate::ops::{expect_docstring, OutputFile, Refactoring, Transformation};
use crate::source::{deepen_relative_imports, SourceFile};
use crate::syntax::{ClassDef, CodeKind, CodeStmt, Module, Stmt};
use crate::validators::{
    check_split_file_config, DocOwner, DocstringExpectation, MemberExpectation, Report,
    COMMON_MODULE,
};

/// Longest generated import line before it is wrapped in parentheses
const MAX_LINE: usize = 79;

/// Package directory an operation on `path` creates
pub fn package_dir(path: &Path, mapping: &SplitFileConfig, config: &Config) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let name = mapping.package_name.clone().unwrap_or_else(|| {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        format!("{}{}", stem, config.engine.package_suffix)
    });
    parent.join(name)
}

/// Where the original text is archived, next to the file
fn archive_path(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut candidate = parent.join(format!("{}_pre_split.py.bak", stem));
    let mut counter = 1;
    while candidate.exists() {
        candidate = parent.join(format!("{}_pre_split_{}.py.bak", stem, counter));
        counter += 1;
    }
    candidate
}

fn import_line(module: &str, names: &[String]) -> String {
    let line = format!("from {} import {}", module, names.join(", "));
    if line.len() <= MAX_LINE {
        return line;
    }
    let mut wrapped = format!("from {} import (\n", module);
    for name in names {
        wrapped.push_str(&format!("    {},\n", name));
    }
    wrapped.push(')');
    wrapped
}

fn all_assignment(names: &[String]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("\"{}\"", n)).collect();
    let line = format!("__all__ = [{}]", quoted.join(", "));
    if line.len() <= MAX_LINE {
        return line;
    }
    let mut wrapped = String::from("__all__ = [\n");
    for name in quoted {
        wrapped.push_str(&format!("    {},\n", name));
    }
    wrapped.push(']');
    wrapped
}

/// One level deeper: `from .x import y` becomes `from ..x import y`, guarded imports too
fn deepen_relative_import(code: &CodeStmt) -> CodeStmt {
    let mut moved = code.clone();
    match deepen_relative_imports(&code.text) {
        Some(text) => moved.text = text,
        None => warn!("relative imports in `{}` left as written", code.text),
    }
    moved
}

fn code(text: impl Into<String>) -> Stmt {
    Stmt::Code(CodeStmt::synthesized(text))
}

/// Remove every definition of `method` from `class`, with the comments right above
/// each one
fn take_method(class: &mut ClassDef, method: &str) -> Vec<Stmt> {
    let mut taken = Vec::new();
    let mut kept = Vec::new();
    let mut pending = Vec::new();
    for stmt in class.body.drain(..) {
        if matches!(stmt, Stmt::Comment(_)) {
            pending.push(stmt);
        } else if matches!(&stmt, Stmt::Function(f) if f.name == method) {
            taken.append(&mut pending);
            taken.push(stmt);
        } else {
            kept.append(&mut pending);
            kept.push(stmt);
        }
    }
    kept.append(&mut pending);
    class.body = kept;
    taken
}

/// Statements and exported names destined for one generated module
#[derive(Debug, Default)]
struct ModulePlan {
    body: Vec<Stmt>,
    names: Vec<String>,
    /// `(class, method)` pairs lifted into this module
    lifted: Vec<(String, String)>,
}

pub struct SplitFile;

impl Refactoring for SplitFile {
    type Mapping = SplitFileConfig;
    const NAME: &'static str = "split-file";

    fn validate(&self, source: &SourceFile, mapping: &SplitFileConfig, config: &Config) -> Result<()> {
        let mut report = Report::new(&source.path);
        let dir = package_dir(&source.path, mapping, config);
        check_split_file_config(&mut report, source, mapping, &dir);
        report.into_result()
    }

    fn transform(
        &self,
        source: SourceFile,
        mapping: &SplitFileConfig,
        config: &Config,
    ) -> Result<Transformation> {
        let file = source.path.clone();
        let pkg_dir = package_dir(&file, mapping, config);
        let pkg_name = pkg_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| RefactorError::structural(&file, "package has no name"))?;
        let parent = file.parent().unwrap_or_else(|| Path::new("")).to_path_buf();

        let mut placed: HashMap<&str, &str> = HashMap::new();
        let mut lifts: BTreeMap<&str, Vec<(&str, &str)>> = BTreeMap::new();
        for (module, entities) in &mapping.modules {
            for entity in entities {
                match entity.split_once('.') {
                    Some((class, method)) => lifts.entry(class).or_default().push((method, module.as_str())),
                    None => {
                        placed.insert(entity.as_str(), module.as_str());
                    }
                }
            }
        }

        let mut plans: BTreeMap<String, ModulePlan> = mapping
            .modules
            .keys()
            .map(|m| (m.clone(), ModulePlan::default()))
            .collect();
        plans.insert(COMMON_MODULE.to_string(), ModulePlan::default());

        let doc_index = source
            .module
            .body
            .iter()
            .position(|s| !matches!(s, Stmt::Comment(_)))
            .filter(|_| docstring(&source.module.body).is_some());
        let mut head: Vec<Stmt> = Vec::new();
        let mut future: Vec<Stmt> = Vec::new();
        let mut imports: Vec<Stmt> = Vec::new();
        let mut tail: Vec<Stmt> = Vec::new();
        let mut exported: Vec<String> = Vec::new();
        let mut pending: Vec<Stmt> = Vec::new();
        // Comments above `__all__`, which is regenerated in the shim
        let mut all_comments: Vec<Stmt> = Vec::new();

        for (i, stmt) in source.module.body.iter().enumerate() {
            let destination = match stmt {
                Stmt::Comment(_) => {
                    pending.push(stmt.clone());
                    continue;
                }
                Stmt::Code(_) if Some(i) == doc_index => {
                    head.append(&mut pending);
                    head.push(stmt.clone());
                    continue;
                }
                Stmt::Code(c) if c.kind == CodeKind::Import => {
                    let group = if c.text.contains("__future__") {
                        &mut future
                    } else {
                        &mut imports
                    };
                    group.append(&mut pending);
                    group.push(stmt.clone());
                    continue;
                }
                Stmt::Class(class) => {
                    let module = placed.get(class.name.as_str()).copied().unwrap_or(COMMON_MODULE);
                    let mut class = class.clone();
                    for (method, target) in lifts.get(class.name.as_str()).into_iter().flatten() {
                        let taken = take_method(&mut class, method);
                        debug!("lifting {}.{} into {}", class.name, method, target);
                        if let Some(plan) = plans.get_mut(*target) {
                            plan.body.extend(taken);
                            plan.lifted.push((class.name.clone(), method.to_string()));
                        }
                    }
                    exported.push(class.name.clone());
                    let plan = plans.entry(module.to_string()).or_default();
                    plan.names.push(class.name.clone());
                    plan.body.append(&mut pending);
                    plan.body.push(Stmt::Class(class));
                    continue;
                }
                Stmt::Function(f) => {
                    let module = placed.get(f.name.as_str()).copied().unwrap_or(COMMON_MODULE);
                    exported.push(f.name.clone());
                    plans.entry(module.to_string()).or_default().names.push(f.name.clone());
                    module
                }
                Stmt::Code(c) if c.text.starts_with("if __name__") => {
                    tail.append(&mut pending);
                    tail.push(stmt.clone());
                    continue;
                }
                Stmt::Code(c) if !c.name_targets.is_empty() => {
                    if c.name_targets.iter().all(|n| n == "__all__") {
                        all_comments.append(&mut pending);
                        continue;
                    }
                    let module = c
                        .name_targets
                        .iter()
                        .find_map(|n| placed.get(n.as_str()).copied())
                        .unwrap_or(COMMON_MODULE);
                    let plan = plans.entry(module.to_string()).or_default();
                    for name in &c.name_targets {
                        if !plan.names.contains(name) {
                            plan.names.push(name.clone());
                        }
                        if !exported.contains(name) {
                            exported.push(name.clone());
                        }
                    }
                    module
                }
                // Guarded imports (`try: import x ...`) travel with the imports
                Stmt::Code(c) if !import_bindings(&c.text).is_empty() => {
                    imports.append(&mut pending);
                    imports.push(stmt.clone());
                    continue;
                }
                Stmt::Code(_) => {
                    tail.append(&mut pending);
                    tail.push(stmt.clone());
                    continue;
                }
            };
            let plan = plans.entry(destination.to_string()).or_default();
            plan.body.append(&mut pending);
            plan.body.push(stmt.clone());
        }
        tail.append(&mut pending);

        let mut analyzer = ImportAnalyzer::new();
        for (module, plan) in &plans {
            for name in &plan.names {
                analyzer.register(module, name);
            }
        }

        let generator = CodeGenerator::new(&source.text);
        let module_imports: Vec<Stmt> = future
            .iter()
            .cloned()
            .chain(imports.iter().map(|s| match s {
                Stmt::Code(c) => Stmt::Code(deepen_relative_import(c)),
                other => other.clone(),
            }))
            .collect();

        let mut outputs = Vec::new();
        let mut members = Vec::new();
        let mut docstrings: Vec<DocstringExpectation> = Vec::new();
        let mut facade: Vec<String> = Vec::new();
        let mut lifted_bindings: Vec<String> = Vec::new();

        for (module, plan) in &plans {
            if plan.body.is_empty() {
                continue;
            }
            let path = pkg_dir.join(format!("{}.py", module));
            let entities = generator.module(&Module {
                body: plan.body.clone(),
            });
            let mut body = module_imports.clone();
            body.extend(
                analyzer
                    .generate_imports(module, &entities)
                    .into_iter()
                    .map(code),
            );
            body.extend(plan.body.iter().cloned());
            outputs.push(OutputFile {
                path: path.clone(),
                text: generator.module(&Module { body }),
            });

            for stmt in &plan.body {
                match stmt {
                    Stmt::Class(class) => {
                        let found = MemberSet::of(class);
                        members.push(MemberExpectation::Class {
                            file: path.clone(),
                            class: class.name.clone(),
                            properties: found.properties.into_iter().collect(),
                            methods: found.methods.into_iter().collect(),
                            inherits: None,
                        });
                        docstrings.extend(expect_docstring(
                            &path,
                            DocOwner::Class(class.name.clone()),
                            &class.body,
                        ));
                        for method in class.methods() {
                            if let Some(doc) = docstring(&method.body) {
                                docstrings.push(DocstringExpectation {
                                    file: path.clone(),
                                    owner: DocOwner::Method {
                                        class: class.name.clone(),
                                        method: method.name.clone(),
                                    },
                                    expected: clean_docstring(&doc),
                                });
                            }
                        }
                    }
                    Stmt::Function(func) => {
                        members.push(MemberExpectation::Function {
                            file: path.clone(),
                            name: func.name.clone(),
                        });
                        docstrings.extend(expect_docstring(
                            &path,
                            DocOwner::Function(func.name.clone()),
                            &func.body,
                        ));
                    }
                    Stmt::Code(c) => {
                        for name in &c.name_targets {
                            members.push(MemberExpectation::Binding {
                                file: path.clone(),
                                name: name.clone(),
                            });
                        }
                    }
                    Stmt::Comment(_) => {}
                }
            }

            if !plan.names.is_empty() {
                facade.push(import_line(&format!(".{}", module), &plan.names));
            }
            for (class, method) in &plan.lifted {
                let alias = format!("_{}_{}", class, method);
                facade.push(format!("from .{} import {} as {}", module, method, alias));
                lifted_bindings.push(format!("{}.{} = {}", class, method, alias));
            }
        }

        let public: Vec<String> = exported
            .iter()
            .filter(|n| !n.starts_with('_'))
            .cloned()
            .collect();
        let init_path = pkg_dir.join("__init__.py");
        let mut facade_text = facade.join("\n");
        if !lifted_bindings.is_empty() {
            facade_text.push_str("\n\n");
            facade_text.push_str(&lifted_bindings.join("\n"));
        }
        facade_text.push_str("\n\n");
        facade_text.push_str(&all_assignment(&public));
        facade_text.push('\n');
        outputs.push(OutputFile {
            path: init_path.clone(),
            text: facade_text,
        });

        // The original path keeps working through a re-exporting shim
        let from = if parent.join("__init__.py").is_file() {
            format!(".{}", pkg_name)
        } else {
            pkg_name.clone()
        };
        let mut shim_body = head;
        shim_body.extend(future);
        shim_body.push(code(import_line(&from, &exported)));
        shim_body.extend(all_comments);
        shim_body.push(code(all_assignment(&public)));
        if !tail.is_empty() {
            shim_body.extend(imports);
            shim_body.extend(tail);
        }
        outputs.push(OutputFile {
            path: file.clone(),
            text: generator.module(&Module { body: shim_body }),
        });
        outputs.push(OutputFile {
            path: archive_path(&file),
            text: source.text.clone(),
        });

        for name in &exported {
            for target in [&init_path, &file] {
                members.push(MemberExpectation::Binding {
                    file: target.clone(),
                    name: name.clone(),
                });
            }
        }
        docstrings.extend(expect_docstring(&file, DocOwner::Module, &source.module.body));

        let module_count = plans.values().filter(|p| !p.body.is_empty()).count();
        Ok(Transformation {
            outputs,
            members,
            docstrings,
            import_target: pkg_dir.clone(),
            summary: format!(
                "split {} into package {} ({} modules)",
                file.display(),
                pkg_dir.display(),
                module_count
            ),
        })
    }
}
