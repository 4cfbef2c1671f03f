//! End-to-end runs of the four operations through the pipeline

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use classforge::mapping::{
    ExtractSuperclassConfig, MemberAssignment, MergeClassesConfig, SplitClassConfig,
    SplitFileConfig,
};
use classforge::member_analyzer::{clean_docstring, docstring};
use classforge::ops::Transformation;
use classforge::{
    Config, ExtractSuperclass, MemberSet, MergeClasses, Phase, Pipeline, Refactoring, SourceFile,
    SplitClass, SplitFile,
};
use tempfile::TempDir;

fn write_fixture(dir: &TempDir, name: &str, text: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, text).unwrap();
    path
}

fn assignment(properties: &[&str], methods: &[&str]) -> MemberAssignment {
    MemberAssignment {
        properties: properties.iter().map(|s| s.to_string()).collect(),
        methods: methods.iter().map(|s| s.to_string()).collect(),
    }
}

fn reachable_members(path: &Path) -> MemberSet {
    let source = SourceFile::load(path).unwrap();
    let mut all = MemberSet::default();
    for name in source.class_names() {
        let members = MemberSet::of(source.class(name).unwrap());
        all.properties.extend(members.properties);
        all.methods.extend(members.methods);
    }
    all
}

const SPLIT_SOURCE: &str = r#"class Source:
    """Holds two things."""

    def __init__(self, p1, p2):
        self.p1 = p1
        self.p2 = p2

    # first accessor
    def m1(self):
        """Return the first thing."""
        return self.p1

    def m2(self, x):
        return self.p2 + x
"#;

fn split_mapping() -> SplitClassConfig {
    let mut destinations = BTreeMap::new();
    destinations.insert("A".to_string(), assignment(&["p1"], &["m1"]));
    destinations.insert("B".to_string(), assignment(&["p2"], &["m2"]));
    SplitClassConfig {
        source_class: "Source".into(),
        destinations,
    }
}

#[test]
fn test_split_class_scenario() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(&dir, "things.py", SPLIT_SOURCE);
    let config = Config::offline();

    let result = Pipeline::new(&config).execute(&SplitClass, &file, &split_mapping());
    assert!(result.success, "{}", result.message);
    let details = result.details.unwrap();
    assert_eq!(details.phase, Some(Phase::Committed));
    assert!(details.backup.unwrap().exists());

    let text = fs::read_to_string(&file).unwrap();
    assert!(text.contains("class A:"));
    assert!(text.contains("class B:"));
    assert!(text.contains("        self.a = A(p1, p2)\n        self.b = B(p1, p2)\n"));
    assert!(text.contains("        return self.a.m1()\n"));
    assert!(text.contains("        return self.b.m2(x)\n"));
    assert!(text.contains("    # first accessor\n    def m1(self):"));

    let reachable = reachable_members(&file);
    for name in ["p1", "p2", "m1", "m2"] {
        assert!(reachable.contains(name), "{} not reachable", name);
    }

    // The docstring follows the method and stays on the forwarder
    let source = SourceFile::load(&file).unwrap();
    for class in ["A", "Source"] {
        let m1 = source
            .class(class)
            .unwrap()
            .methods()
            .find(|m| m.name == "m1")
            .unwrap();
        assert_eq!(
            docstring(&m1.body).as_deref(),
            Some("Return the first thing.")
        );
    }
}

#[test]
fn test_configuration_error_leaves_file_untouched() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(&dir, "things.py", SPLIT_SOURCE);
    let before = fs::read(&file).unwrap();

    let mut mapping = split_mapping();
    mapping.destinations.get_mut("B").unwrap().methods.clear();
    let config = Config::offline();
    let result = Pipeline::new(&config).execute(&SplitClass, &file, &mapping);

    assert!(!result.success);
    assert!(result.message.contains("missing: Source.m2"), "{}", result.message);
    assert_eq!(fs::read(&file).unwrap(), before);
}

const SIBLINGS: &str = r#"class X:
    def shared(self, value):
        """Shared behaviour."""
        return value * 2


class Y:
    """The other one."""

    def shared(self, value):
        """Shared behaviour."""
        return value * 2

    def own(self):
        return 1
"#;

#[test]
fn test_extract_superclass_scenario() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(&dir, "siblings.py", SIBLINGS);
    let mut extract_from = BTreeMap::new();
    extract_from.insert("X".to_string(), assignment(&[], &["shared"]));
    extract_from.insert("Y".to_string(), assignment(&[], &["shared"]));
    let mapping = ExtractSuperclassConfig {
        base_class: "Base".into(),
        child_classes: vec!["X".into(), "Y".into()],
        extract_from,
        abstract_methods: Vec::new(),
    };
    let config = Config::offline();

    let result = Pipeline::new(&config).execute(&ExtractSuperclass, &file, &mapping);
    assert!(result.success, "{}", result.message);

    let source = SourceFile::load(&file).unwrap();
    let base = MemberSet::of(source.class("Base").unwrap());
    assert!(base.methods.contains("shared"));
    for child in ["X", "Y"] {
        let class = source.class(child).unwrap();
        assert_eq!(class.bases, vec!["Base".to_string()]);
        assert!(!MemberSet::of(class).methods.contains("shared"));
    }
    let text = fs::read_to_string(&file).unwrap();
    assert!(text.contains("class X(Base):\n    pass\n"));
    assert!(text.contains("class Y(Base):\n    \"\"\"The other one.\"\"\"\n"));
}

#[test]
fn test_extract_missing_child_method_is_configuration_error() {
    let dir = TempDir::new().unwrap();
    let text = "class X:\n    def shared(self):\n        return 1\n\n\nclass Y:\n    def other(self):\n        return 2\n";
    let file = write_fixture(&dir, "siblings.py", text);
    let mut extract_from = BTreeMap::new();
    extract_from.insert("X".to_string(), assignment(&[], &["shared"]));
    let mapping = ExtractSuperclassConfig {
        base_class: "Base".into(),
        child_classes: vec!["X".into(), "Y".into()],
        extract_from,
        abstract_methods: Vec::new(),
    };
    let config = Config::offline();

    let result = Pipeline::new(&config).execute(&ExtractSuperclass, &file, &mapping);
    assert!(!result.success);
    assert!(result.message.contains("missing: Y.shared"), "{}", result.message);
    assert_eq!(fs::read_to_string(&file).unwrap(), text);
}

#[test]
fn test_merge_classes_scenario() {
    let dir = TempDir::new().unwrap();
    let text = r#"class Source1:
    def __init__(self, prop1):
        self.prop1 = prop1

    def method1(self):
        return self.prop1


class Source2:
    def __init__(self, prop3):
        self.prop3 = prop3

    def method3(self):
        return self.prop3
"#;
    let file = write_fixture(&dir, "sources.py", text);
    let mapping = MergeClassesConfig {
        source_classes: vec!["Source1".into(), "Source2".into()],
        target_class: "Merged".into(),
        methods: None,
        properties: None,
        keep_aliases: false,
    };
    let config = Config::offline();

    let result = Pipeline::new(&config).execute(&MergeClasses, &file, &mapping);
    assert!(result.success, "{}", result.message);

    let source = SourceFile::load(&file).unwrap();
    assert_eq!(source.class_names(), vec!["Merged"]);
    let merged = MemberSet::of(source.class("Merged").unwrap());
    for name in ["prop1", "prop3", "method1", "method3"] {
        assert!(merged.contains(name), "{} missing", name);
    }
    let written = fs::read_to_string(&file).unwrap();
    assert!(written.contains("def __init__(self, prop1, *, prop3=None):"));
}

const SHAPES: &str = r#""""Shapes."""

import math

RATIO = 2


class Circle:
    def __init__(self, r):
        self.r = r

    def area(self):
        """Area."""
        return math.pi * self.r ** 2

    def scaled(self):
        return Circle(self.r * RATIO)


def describe(shape):
    return type(shape).__name__
"#;

fn shapes_mapping() -> SplitFileConfig {
    let mut modules = BTreeMap::new();
    modules.insert("circle".to_string(), vec!["Circle".to_string()]);
    modules.insert(
        "helpers".to_string(),
        vec!["describe".to_string(), "Circle.area".to_string()],
    );
    SplitFileConfig {
        package_name: None,
        modules,
    }
}

#[test]
fn test_split_file_writes_package() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(&dir, "shapes.py", SHAPES);
    let config = Config::offline();

    let result = Pipeline::new(&config).execute(&SplitFile, &file, &shapes_mapping());
    assert!(result.success, "{}", result.message);

    let pkg = dir.path().join("shapes_pkg");
    for name in ["__init__.py", "circle.py", "helpers.py", "_common.py"] {
        assert!(pkg.join(name).is_file(), "{} missing", name);
    }
    assert_eq!(
        fs::read_to_string(dir.path().join("shapes_pre_split.py.bak")).unwrap(),
        SHAPES
    );

    let circle = fs::read_to_string(pkg.join("circle.py")).unwrap();
    assert!(circle.contains("from ._common import RATIO\n"));
    assert!(!circle.contains("def area"));

    let helpers = fs::read_to_string(pkg.join("helpers.py")).unwrap();
    assert!(helpers.contains("def area(self):\n    \"\"\"Area.\"\"\"\n"));

    let facade = fs::read_to_string(pkg.join("__init__.py")).unwrap();
    assert!(facade.contains("Circle.area = _Circle_area\n"));

    let shim = fs::read_to_string(&file).unwrap();
    assert!(shim.starts_with("\"\"\"Shapes.\"\"\"\n"));
    assert!(shim.contains("from shapes_pkg import RATIO, Circle, describe\n"));
}

#[cfg(unix)]
#[test]
fn test_rejected_output_is_rolled_back() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(&dir, "shapes.py", SHAPES);
    let mut config = Config::offline();
    config.tools.syntax_checker.enabled = true;
    config.tools.syntax_checker.command = vec!["false".to_string()];

    let result = Pipeline::new(&config).execute(&SplitFile, &file, &shapes_mapping());
    assert!(!result.success);
    assert!(result.message.contains("original file restored"), "{}", result.message);
    assert_eq!(result.details.unwrap().phase, Some(Phase::RolledBack));

    assert_eq!(fs::read_to_string(&file).unwrap(), SHAPES);
    assert!(!dir.path().join("shapes_pkg").exists());
    assert!(!dir.path().join("shapes_pre_split.py.bak").exists());
    assert!(SourceFile::load(&file).is_ok());
}

#[test]
fn test_preview_does_not_write() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(&dir, "things.py", SPLIT_SOURCE);
    let config = Config::offline();

    let result = Pipeline::new(&config).preview(&SplitClass, &file, &split_mapping());
    assert!(result.success, "{}", result.message);
    let preview = result.preview.unwrap();
    assert!(preview.contains("class A:"));
    assert_eq!(fs::read_to_string(&file).unwrap(), SPLIT_SOURCE);
    assert!(!dir.path().join(".classforge_backups").exists());
}

#[test]
fn test_preview_of_package_split_lists_every_module() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(&dir, "shapes.py", SHAPES);
    let config = Config::offline();

    let result = Pipeline::new(&config).preview(&SplitFile, &file, &shapes_mapping());
    assert!(result.success, "{}", result.message);
    let preview = result.preview.unwrap();
    assert!(preview.contains("# --- shapes_pkg/circle.py ---\n"));
    assert!(preview.contains("# --- shapes.py ---\n"));
    assert!(!dir.path().join("shapes_pkg").exists());
}

#[test]
fn test_missing_file_is_rejected_before_backup() {
    let dir = TempDir::new().unwrap();
    let config = Config::offline();
    let result =
        Pipeline::new(&config).execute(&SplitClass, &dir.path().join("absent.py"), &split_mapping());
    assert!(!result.success);
    assert!(result.message.contains("file not found"));
    assert_eq!(result.details.unwrap().phase, None);
    assert!(!dir.path().join(".classforge_backups").exists());
}

const REPORT: &str = r#"class Report:
    def __init__(self, table, limit):
        self.table = table
        self.limit = limit

    def query(self):
        """Query text."""
        return f"""
SELECT *
    FROM {self.table}
  WHERE id > 0
"""

    def size(self):
        return self.limit
"#;

fn report_mapping() -> SplitClassConfig {
    let mut destinations = BTreeMap::new();
    destinations.insert("Sql".to_string(), assignment(&["table"], &["query"]));
    destinations.insert("Paging".to_string(), assignment(&["limit"], &["size"]));
    SplitClassConfig {
        source_class: "Report".into(),
        destinations,
    }
}

#[test]
fn test_split_class_keeps_multiline_string_value() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(&dir, "report.py", REPORT);
    let config = Config::offline();

    let result = Pipeline::new(&config).execute(&SplitClass, &file, &report_mapping());
    assert!(result.success, "{}", result.message);

    let text = fs::read_to_string(&file).unwrap();
    assert!(text.contains(
        "        return f\"\"\"\nSELECT *\n    FROM {self.table}\n  WHERE id > 0\n\"\"\"\n"
    ));
    assert!(text.contains("class Sql:"));
    assert!(text.contains("        return self.sql.query()\n"));
}

/// Split class whose output is edited before the post-write checks see it
struct Tampered<F> {
    edit: F,
}

impl<F: Fn(&str) -> String> Refactoring for Tampered<F> {
    type Mapping = SplitClassConfig;
    const NAME: &'static str = "split-class";

    fn validate(
        &self,
        source: &SourceFile,
        mapping: &SplitClassConfig,
        config: &Config,
    ) -> classforge::Result<()> {
        SplitClass.validate(source, mapping, config)
    }

    fn transform(
        &self,
        source: SourceFile,
        mapping: &SplitClassConfig,
        config: &Config,
    ) -> classforge::Result<Transformation> {
        let mut transformation = SplitClass.transform(source, mapping, config)?;
        for output in &mut transformation.outputs {
            output.text = (self.edit)(&output.text);
        }
        Ok(transformation)
    }
}

#[test]
fn test_lost_method_is_rolled_back() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(&dir, "things.py", SPLIT_SOURCE);
    let config = Config::offline();
    let op = Tampered {
        edit: |text: &str| text.replace("def m2(self, x):", "def m2_old(self, x):"),
    };

    let result = Pipeline::new(&config).execute(&op, &file, &split_mapping());
    assert!(!result.success);
    assert!(result.message.contains("completeness check failed"), "{}", result.message);
    assert!(result.message.contains("original file restored"), "{}", result.message);
    assert_eq!(result.details.unwrap().phase, Some(Phase::RolledBack));
    assert_eq!(fs::read_to_string(&file).unwrap(), SPLIT_SOURCE);
}

#[test]
fn test_changed_docstring_is_rolled_back() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(&dir, "things.py", SPLIT_SOURCE);
    let config = Config::offline();
    let op = Tampered {
        edit: |text: &str| text.replace("Return the first thing.", "Return something."),
    };

    let result = Pipeline::new(&config).execute(&op, &file, &split_mapping());
    assert!(!result.success);
    assert!(result.message.contains("docstring check failed"), "{}", result.message);
    assert!(result.message.contains("Return the first thing."), "{}", result.message);
    assert_eq!(result.details.unwrap().phase, Some(Phase::RolledBack));
    assert_eq!(fs::read_to_string(&file).unwrap(), SPLIT_SOURCE);
}

#[test]
fn test_merge_keeps_docstrings() {
    let dir = TempDir::new().unwrap();
    let text = r#"class Reader:
    """Reads records.

    Keeps its own cursor.
    """

    def __init__(self, path):
        self.path = path

    def read(self):
        """Return the next record."""
        return self.path


class Writer:
    """Writes records."""

    def __init__(self, path):
        self.path = path

    def write(self, record):
        """Append one record.

        Flushes after every call.
        """
        return record
"#;
    let file = write_fixture(&dir, "records.py", text);
    let mapping = MergeClassesConfig {
        source_classes: vec!["Reader".into(), "Writer".into()],
        target_class: "Records".into(),
        methods: None,
        properties: None,
        keep_aliases: false,
    };
    let config = Config::offline();

    let result = Pipeline::new(&config).execute(&MergeClasses, &file, &mapping);
    assert!(result.success, "{}", result.message);

    let source = SourceFile::load(&file).unwrap();
    let merged = source.class("Records").unwrap();
    assert_eq!(
        docstring(&merged.body).map(|d| clean_docstring(&d)).as_deref(),
        Some("Reads records.\n\nKeeps its own cursor.")
    );
    let method_doc = |name: &str| {
        merged
            .methods()
            .find(|m| m.name == name)
            .and_then(|m| docstring(&m.body))
            .map(|d| clean_docstring(&d))
    };
    assert_eq!(method_doc("read").as_deref(), Some("Return the next record."));
    assert_eq!(
        method_doc("write").as_deref(),
        Some("Append one record.\n\nFlushes after every call.")
    );
}
