//! Static screening of candidate Python scripts.
//!
//! The checks are name-based: a deny-listed module import, a call to a
//! deny-listed builtin, or a call to a deny-listed attribute. This catches
//! accidental or naive destructive code in generated solutions. It does not
//! stop deliberate obfuscation (`getattr(__builtins__, "ev" + "al")` passes);
//! the process limits in [`super::runner`] are the second layer.

use std::collections::BTreeSet;

use tree_sitter::{Node, Parser};

use crate::error::ValidationError;

/// Names rejected by the validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenyList {
    /// Top-level module names.
    pub modules: BTreeSet<String>,
    /// Bare callee names.
    pub builtins: BTreeSet<String>,
    /// Attribute names when called, e.g. `os.remove(..)` or `path.open(..)`.
    pub attributes: BTreeSet<String>,
}

impl DenyList {
    pub fn standard() -> Self {
        let set = |names: &[&str]| names.iter().map(|n| n.to_string()).collect();
        Self {
            modules: set(&[
                "os",
                "sys",
                "subprocess",
                "shutil",
                "pickle",
                "socket",
                "urllib",
                "requests",
                "http",
                "ftplib",
            ]),
            builtins: set(&["eval", "exec", "compile", "__import__"]),
            attributes: set(&["open", "remove", "rmdir", "mkdir"]),
        }
    }
}

impl Default for DenyList {
    fn default() -> Self {
        Self::standard()
    }
}

/// Tree-sitter based validator for Python sources.
#[derive(Debug, Clone, Default)]
pub struct StaticValidator {
    deny: DenyList,
}

impl StaticValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deny_list(deny: DenyList) -> Self {
        Self { deny }
    }

    /// Accept `source` or report the first syntax error or unsafe construct.
    pub fn validate(&self, source: &str) -> Result<(), ValidationError> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| ValidationError::Parser(e.to_string()))?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| ValidationError::Parser("parse was cancelled".to_string()))?;
        let root = tree.root_node();

        if root.has_error() {
            return Err(syntax_error(&root, source));
        }

        let mut cursor = root.walk();
        loop {
            let node = cursor.node();
            match node.kind() {
                "import_statement" => self.check_import(&node, source)?,
                "import_from_statement" => self.check_import_from(&node, source)?,
                "call" => self.check_call(&node, source)?,
                _ => {}
            }

            if cursor.goto_first_child() {
                continue;
            }
            while !cursor.goto_next_sibling() {
                if !cursor.goto_parent() {
                    return Ok(());
                }
            }
        }
    }

    fn check_import(&self, node: &Node, source: &str) -> Result<(), ValidationError> {
        let mut cursor = node.walk();
        for name in node.children_by_field_name("name", &mut cursor) {
            // `import a.b as c` wraps the dotted name.
            let dotted = match name.kind() {
                "aliased_import" => name.child_by_field_name("name").unwrap_or(name),
                _ => name,
            };
            self.check_module(text(&dotted, source), node)?;
        }
        Ok(())
    }

    fn check_import_from(&self, node: &Node, source: &str) -> Result<(), ValidationError> {
        let Some(module) = node.child_by_field_name("module_name") else {
            return Ok(());
        };
        let dotted = if module.kind() == "relative_import" {
            // `from . import x` names no module; `from .os import x` does.
            let mut cursor = module.walk();
            let found = module
                .named_children(&mut cursor)
                .find(|c| c.kind() == "dotted_name");
            match found {
                Some(d) => d,
                None => return Ok(()),
            }
        } else {
            module
        };
        self.check_module(text(&dotted, source), node)
    }

    fn check_module(&self, dotted: &str, node: &Node) -> Result<(), ValidationError> {
        let top = dotted.split('.').next().unwrap_or(dotted).trim();
        if self.deny.modules.contains(top) {
            return Err(ValidationError::Unsafe(format!(
                "forbidden import `{top}` at line {}",
                node.start_position().row + 1
            )));
        }
        Ok(())
    }

    fn check_call(&self, node: &Node, source: &str) -> Result<(), ValidationError> {
        let Some(callee) = node.child_by_field_name("function") else {
            return Ok(());
        };
        let line = node.start_position().row + 1;
        match callee.kind() {
            "identifier" => {
                let name = text(&callee, source);
                if self.deny.builtins.contains(name) {
                    return Err(ValidationError::Unsafe(format!(
                        "forbidden call `{name}()` at line {line}"
                    )));
                }
            }
            "attribute" => {
                if let Some(attr) = callee.child_by_field_name("attribute") {
                    let name = text(&attr, source);
                    if self.deny.attributes.contains(name) {
                        return Err(ValidationError::Unsafe(format!(
                            "forbidden method call `.{name}()` at line {line}"
                        )));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn text<'a>(node: &Node, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// Locate the first ERROR or MISSING node for the report.
fn syntax_error(root: &Node, source: &str) -> ValidationError {
    let mut cursor = root.walk();
    let mut culprit = *root;
    loop {
        let node = cursor.node();
        if node.is_error() || node.is_missing() {
            culprit = node;
            break;
        }
        // Only descend into subtrees that contain the error.
        if node.has_error() && cursor.goto_first_child() {
            continue;
        }
        let mut advanced = false;
        while !advanced {
            if cursor.goto_next_sibling() {
                advanced = true;
            } else if !cursor.goto_parent() {
                break;
            }
        }
        if !advanced {
            break;
        }
    }

    let pos = culprit.start_position();
    let line_text = source.lines().nth(pos.row).unwrap_or("").trim();
    let snippet: String = line_text.chars().take(80).collect();
    ValidationError::Syntax {
        line: pos.row + 1,
        column: pos.column + 1,
        snippet,
    }
}
