//! Refactoring operations and the pipeline that runs them
//!
//! Every operation goes through the same state machine:
//!
//! ```text
//! BackedUp -> Loaded -> ConfigValid -> Transformed -> Committed
//!     \__________\___________\______________\______> RolledBack
//! ```
//!
//! An operation only describes *what* changes ([`Refactoring::validate`],
//! [`Refactoring::transform`]). [`Pipeline`] owns the backup, the writes, the formatter
//! call, the post-transform checks and the rollback.

pub mod extract_superclass;
pub mod merge_classes;
pub mod split_class;
pub mod split_file;

pub use extract_superclass::ExtractSuperclass;
pub use merge_classes::MergeClasses;
pub use split_class::SplitClass;
pub use split_file::SplitFile;

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backup::{BackupManager, BackupRecord};
use crate::config::Config;
use crate::error::{Check, RefactorError, Result};
use crate::import_analyzer::referenced_names;
use crate::member_analyzer::{clean_docstring, docstring, docstring_stmt};
use crate::source::SourceFile;
use crate::syntax::{ClassDef, CodeStmt, FunctionDef, Stmt};
use crate::tools::{format_file, ToolOutcome};
use crate::validators::{
    check_completeness, check_docstrings, check_importable, check_syntax, DocOwner,
    DocstringExpectation, MemberExpectation,
};

/// Pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    BackedUp,
    Loaded,
    ConfigValid,
    Transformed,
    Committed,
    RolledBack,
}

/// Outcome of one operation call
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
    pub details: Option<OperationDetails>,
    /// Regenerated text of a preview run
    pub preview: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationDetails {
    pub operation: String,
    pub file: PathBuf,
    /// Last phase reached; `None` when the path check failed
    pub phase: Option<Phase>,
    pub backup: Option<PathBuf>,
    pub files_written: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

/// A file the transform wants written
#[derive(Debug, Clone)]
pub struct OutputFile {
    pub path: PathBuf,
    pub text: String,
}

impl OutputFile {
    pub fn is_python(&self) -> bool {
        self.path.extension().is_some_and(|ext| ext == "py")
    }
}

/// In-memory result of a transform, with what the checks must find afterwards
#[derive(Debug, Clone)]
pub struct Transformation {
    pub outputs: Vec<OutputFile>,
    pub members: Vec<MemberExpectation>,
    pub docstrings: Vec<DocstringExpectation>,
    /// Module file or package directory the import check imports
    pub import_target: PathBuf,
    pub summary: String,
}

/// One of the four refactorings
pub trait Refactoring {
    type Mapping;

    /// Name used in messages and logs
    const NAME: &'static str;

    /// Pre-transform checks; must not touch the file system beyond reads
    fn validate(&self, source: &SourceFile, mapping: &Self::Mapping, config: &Config) -> Result<()>;

    /// Rewrite in memory
    fn transform(
        &self,
        source: SourceFile,
        mapping: &Self::Mapping,
        config: &Config,
    ) -> Result<Transformation>;
}

/// Bookkeeping for one pipeline run
struct Run {
    operation: &'static str,
    file: PathBuf,
    phase: Option<Phase>,
    backup: Option<BackupRecord>,
    created_files: Vec<PathBuf>,
    created_dirs: Vec<PathBuf>,
    written: Vec<PathBuf>,
    warnings: Vec<String>,
}

impl Run {
    fn new(operation: &'static str, file: &Path) -> Self {
        Self {
            operation,
            file: file.to_path_buf(),
            phase: None,
            backup: None,
            created_files: Vec::new(),
            created_dirs: Vec::new(),
            written: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn enter(&mut self, phase: Phase) {
        info!("{} {}: {:?}", self.operation, self.file.display(), phase);
        self.phase = Some(phase);
    }

    fn details(&self) -> OperationDetails {
        OperationDetails {
            operation: self.operation.to_string(),
            file: self.file.clone(),
            phase: self.phase,
            backup: self.backup.as_ref().map(|b| b.backup.clone()),
            files_written: self.written.clone(),
            warnings: self.warnings.clone(),
        }
    }

    fn success(self, summary: String) -> OperationResult {
        OperationResult {
            success: true,
            message: summary,
            details: Some(self.details()),
            preview: None,
        }
    }

    fn failure(self, error: RefactorError) -> OperationResult {
        let mut message = format!("{} failed during {}: {}", self.operation, error.phase_label(), error);
        if self.phase == Some(Phase::RolledBack) {
            message.push_str(" (original file restored)");
        }
        OperationResult {
            success: false,
            message,
            details: Some(self.details()),
            preview: None,
        }
    }
}

/// Drives operations through backup, transform, verification and rollback
pub struct Pipeline<'a> {
    config: &'a Config,
    backups: BackupManager,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            backups: BackupManager::new(config.engine.backup_dir.clone()),
        }
    }

    /// Run `op` against the file at `path`
    pub fn execute<R: Refactoring>(&self, op: &R, path: &Path, mapping: &R::Mapping) -> OperationResult {
        let mut run = Run::new(R::NAME, path);
        match self.run(op, path, mapping, &mut run) {
            Ok(summary) => run.success(summary),
            Err(error) => {
                warn!("{}", error);
                run.failure(error)
            }
        }
    }

    fn run<R: Refactoring>(
        &self,
        op: &R,
        path: &Path,
        mapping: &R::Mapping,
        run: &mut Run,
    ) -> Result<String> {
        check_target(path)?;

        run.backup = Some(self.backups.create_backup(path)?);
        run.enter(Phase::BackedUp);

        let source = SourceFile::load(path)?;
        run.enter(Phase::Loaded);

        // Nothing has been written yet, so a rejection leaves the file untouched
        op.validate(&source, mapping, self.config)?;
        run.enter(Phase::ConfigValid);

        let transformation = op.transform(source, mapping, self.config)?;

        let verified = self
            .write(&transformation, run)
            .and_then(|()| {
                run.enter(Phase::Transformed);
                self.format(run);
                self.verify(&transformation, run)
            });
        if let Err(error) = verified {
            self.rollback(run);
            return Err(error);
        }
        run.enter(Phase::Committed);

        if self.config.engine.import_check {
            let warnings = check_importable(
                &self.config.tools.import_checker,
                &transformation.import_target,
            );
            run.warnings.extend(warnings);
        }
        Ok(transformation.summary)
    }

    fn write(&self, transformation: &Transformation, run: &mut Run) -> Result<()> {
        for output in &transformation.outputs {
            if let Some(parent) = output.path.parent() {
                let mut missing = Vec::new();
                let mut dir = parent.to_path_buf();
                while !dir.as_os_str().is_empty() && !dir.exists() {
                    missing.push(dir.clone());
                    if !dir.pop() {
                        break;
                    }
                }
                if !missing.is_empty() {
                    fs::create_dir_all(parent).map_err(|e| RefactorError::io(parent, e))?;
                    run.created_dirs.extend(missing.into_iter().rev());
                }
            }
            if !output.path.exists() {
                run.created_files.push(output.path.clone());
            }
            fs::write(&output.path, &output.text).map_err(|e| RefactorError::io(&output.path, e))?;
            debug!("wrote {}", output.path.display());
            run.written.push(output.path.clone());
        }
        Ok(())
    }

    fn format(&self, run: &mut Run) {
        let formatter = &self.config.tools.formatter;
        for path in run.written.iter().filter(|p| p.extension().is_some_and(|e| e == "py")) {
            match format_file(formatter, path) {
                ToolOutcome::Success | ToolOutcome::Disabled => {}
                outcome => {
                    let warning = format!("formatter on {}: {}", path.display(), outcome);
                    warn!("{}", warning);
                    run.warnings.push(warning);
                }
            }
        }
    }

    /// Syntax of every file first, then completeness, then docstrings
    fn verify(&self, transformation: &Transformation, run: &mut Run) -> Result<()> {
        let mut parsed: HashMap<PathBuf, SourceFile> = HashMap::new();
        for output in transformation.outputs.iter().filter(|o| o.is_python()) {
            let text =
                fs::read_to_string(&output.path).map_err(|e| RefactorError::io(&output.path, e))?;
            let warnings = check_syntax(&output.path, &text, &self.config.tools.syntax_checker)?;
            run.warnings.extend(warnings);
            let reparsed = SourceFile::parse_str(&output.path, text).map_err(|e| {
                RefactorError::regeneration(&output.path, Check::Syntax, e.to_string())
            })?;
            parsed.insert(output.path.clone(), reparsed);
        }
        check_completeness(&transformation.members, |path| parsed.get(path))?;
        check_docstrings(&transformation.docstrings, |path| parsed.get(path))?;
        Ok(())
    }

    fn rollback(&self, run: &mut Run) {
        if let Some(record) = &run.backup {
            if let Err(e) = self.backups.restore(record) {
                let warning = format!("restore from {} failed: {}", record.backup.display(), e);
                warn!("{}", warning);
                run.warnings.push(warning);
            }
        }
        for file in run.created_files.iter().rev() {
            if let Err(e) = fs::remove_file(file) {
                debug!("could not remove {}: {}", file.display(), e);
            }
        }
        for dir in run.created_dirs.iter().rev() {
            if let Err(e) = fs::remove_dir_all(dir) {
                debug!("could not remove {}: {}", dir.display(), e);
            }
        }
        run.written.clear();
        run.enter(Phase::RolledBack);
    }

    /// Run `op` on a scratch copy and return the regenerated text
    ///
    /// The real file is never written. For package splits the preview holds every
    /// generated module, each preceded by a `# --- <relative path> ---` header.
    pub fn preview<R: Refactoring>(&self, op: &R, path: &Path, mapping: &R::Mapping) -> OperationResult {
        let mut run = Run::new(R::NAME, path);
        match self.preview_in_scratch(op, path, mapping) {
            Ok(result) => result,
            Err(error) => {
                run.phase = None;
                run.failure(error)
            }
        }
    }

    fn preview_in_scratch<R: Refactoring>(
        &self,
        op: &R,
        path: &Path,
        mapping: &R::Mapping,
    ) -> Result<OperationResult> {
        check_target(path)?;
        let scratch = tempfile::tempdir().map_err(|e| RefactorError::io(path, e))?;
        let file_name = path
            .file_name()
            .ok_or_else(|| RefactorError::file_system(path, "not a file"))?;
        let copy = scratch.path().join(file_name);
        fs::copy(path, &copy).map_err(|e| RefactorError::io(&copy, e))?;

        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        if parent.join("__init__.py").is_file() {
            let marker = scratch.path().join("__init__.py");
            fs::write(&marker, "").map_err(|e| RefactorError::io(&marker, e))?;
        }

        let mut config = self.config.clone();
        config.engine.import_check = false;
        let result = Pipeline::new(&config).execute(op, &copy, mapping);

        let scratch_prefix = scratch.path().to_string_lossy().to_string();
        let shown_prefix = parent.to_string_lossy().to_string();
        let relocate = |p: &Path| -> PathBuf {
            p.strip_prefix(scratch.path())
                .map(|rel| parent.join(rel))
                .unwrap_or_else(|_| p.to_path_buf())
        };

        let mut details = result.details.unwrap_or_else(|| Run::new(R::NAME, path).details());
        let written: Vec<PathBuf> = details.files_written.clone();
        details.file = path.to_path_buf();
        details.backup = None;
        details.files_written = written.iter().map(|p| relocate(p)).collect();

        if !result.success {
            return Ok(OperationResult {
                success: false,
                message: result.message.replace(&scratch_prefix, &shown_prefix),
                details: Some(details),
                preview: None,
            });
        }

        let python: Vec<&PathBuf> = written
            .iter()
            .filter(|p| p.extension().is_some_and(|e| e == "py"))
            .collect();
        let mut preview = String::new();
        if let [only] = python.as_slice() {
            preview = fs::read_to_string(only).map_err(|e| RefactorError::io(only, e))?;
        } else {
            for file in &python {
                let text = fs::read_to_string(file).map_err(|e| RefactorError::io(file, e))?;
                let rel = file.strip_prefix(scratch.path()).unwrap_or(file.as_path());
                if !preview.is_empty() {
                    preview.push('\n');
                }
                preview.push_str(&format!("# --- {} ---\n", rel.display()));
                preview.push_str(&text);
            }
        }

        Ok(OperationResult {
            success: true,
            message: format!("preview: {}", result.message),
            details: Some(details),
            preview: Some(preview),
        })
    }
}

/// File-system checks that run before any backup is taken
pub fn check_target(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(RefactorError::file_system(path, "file not found"));
    }
    if !path.is_file() {
        return Err(RefactorError::file_system(path, "not a file"));
    }
    if !path.extension().is_some_and(|ext| ext == "py") {
        return Err(RefactorError::file_system(
            path,
            "not a Python source file (.py)",
        ));
    }
    Ok(())
}

/// Cleaned docstring expectation for a body, if it has a docstring
pub(crate) fn expect_docstring(
    file: &Path,
    owner: DocOwner,
    body: &[Stmt],
) -> Option<DocstringExpectation> {
    docstring(body).map(|doc| DocstringExpectation {
        file: file.to_path_buf(),
        owner,
        expected: clean_docstring(&doc),
    })
}

/// Docstring of the first definition named `method` that has one
pub(crate) fn expect_method_docstring(
    file: &Path,
    origin: &ClassDef,
    method: &str,
    new_class: &str,
) -> Option<DocstringExpectation> {
    origin
        .methods()
        .filter(|m| m.name == method)
        .find_map(|m| docstring(&m.body))
        .map(|doc| DocstringExpectation {
            file: file.to_path_buf(),
            owner: DocOwner::Method {
                class: new_class.to_string(),
                method: method.to_string(),
            },
            expected: clean_docstring(&doc),
        })
}

/// Position to insert a new top-level statement before `index`, keeping the comments
/// that precede `index` attached to it
pub(crate) fn insertion_point(body: &[Stmt], index: usize) -> usize {
    let mut start = index;
    while start > 0 && matches!(body[start - 1], Stmt::Comment(_)) {
        start -= 1;
    }
    start
}

/// Position right after a body's docstring, where setup statements go
pub(crate) fn after_docstring(body: &[Stmt]) -> usize {
    match body.iter().position(|s| !matches!(s, Stmt::Comment(_))) {
        Some(i) if docstring_stmt(body).is_some() => i + 1,
        _ => 0,
    }
}

/// Initializer statements needed to assign `properties` in a new initializer
///
/// Besides the assignments themselves, plain local bindings that the assignments read
/// are carried along, in their original order.
pub(crate) fn assignment_block(init: &FunctionDef, properties: &BTreeSet<String>) -> Vec<Stmt> {
    let receiver = init.receiver().unwrap_or("self");
    let assigns = |stmt: &Stmt| {
        stmt.as_code()
            .is_some_and(|c| c.attrs_assigned_on(receiver).any(|a| properties.contains(a)))
    };

    let mut needed: BTreeSet<String> = BTreeSet::new();
    let mut keep = vec![false; init.body.len()];
    for (i, stmt) in init.body.iter().enumerate().rev() {
        let Some(code) = stmt.as_code() else {
            continue;
        };
        let binds_needed = code.attr_targets.is_empty()
            && code.name_targets.iter().any(|n| needed.contains(n));
        if assigns(stmt) || binds_needed {
            keep[i] = true;
            needed.extend(referenced_names(&code.text));
        }
    }
    init.body
        .iter()
        .zip(keep)
        .filter(|(_, keep)| *keep)
        .map(|(stmt, _)| stmt.clone())
        .collect()
}

/// Whether every receiver attribute a statement assigns is in `properties`
pub(crate) fn assigns_only(code: &CodeStmt, receiver: &str, properties: &BTreeSet<String>) -> bool {
    let mut targets = code.attrs_assigned_on(receiver).peekable();
    targets.peek().is_some() && targets.all(|a| properties.contains(a))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_check_target_rejects_before_backup() {
        let dir = TempDir::new().unwrap();
        let text_file = dir.path().join("notes.txt");
        fs::write(&text_file, "hello").unwrap();
        for path in [dir.path().join("missing.py"), text_file, dir.path().to_path_buf()] {
            let err = check_target(&path).unwrap_err();
            assert!(matches!(err, RefactorError::FileSystem { .. }), "{}", path.display());
        }
        assert!(!dir.path().join(".classforge_backups").exists());
    }

    #[test]
    fn test_assignment_block_carries_local_bindings() {
        let source = SourceFile::parse_str(
            "a.py",
            "class A:\n    def __init__(self, raw):\n        cleaned = raw.strip()\n        unused = 1\n        self.value = cleaned\n        self.other = raw\n",
        )
        .unwrap();
        let init = source.class("A").unwrap().methods().next().unwrap();
        let props: BTreeSet<String> = ["value".to_string()].into_iter().collect();
        let block: Vec<String> = assignment_block(init, &props)
            .iter()
            .filter_map(Stmt::as_code)
            .map(|c| c.text.clone())
            .collect();
        assert_eq!(block, vec!["cleaned = raw.strip()", "self.value = cleaned"]);
    }

    #[test]
    fn test_insertion_point_skips_leading_comments() {
        let source =
            SourceFile::parse_str("a.py", "x = 1\n\n# about A\n# more\nclass A:\n    pass\n")
                .unwrap();
        let position = source.class_position("A").unwrap();
        assert_eq!(position, 3);
        assert_eq!(insertion_point(&source.module.body, position), 1);
    }
}
