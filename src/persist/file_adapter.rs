use std::path::{Path, PathBuf};

use kdl::{KdlDocument, KdlNode};

use crate::errors::AuthzError;
use crate::model::Model;
use crate::persist::{load_policy_line, policy_lines, Adapter};

/// Policy rules stored as KDL, one node per rule:
///
/// ```kdl
/// p "alice" "data1" "read"
/// p "data2_admin" "data2" "write"
/// g "alice" "data2_admin"
/// ```
///
/// `path` may name a single file or a directory; a directory is read as
/// every `.kdl` file in it, in file-name order. Saving always writes a
/// single file.
#[derive(Debug, Clone)]
pub struct KdlFileAdapter {
    path: PathBuf,
}

impl KdlFileAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn files(&self) -> Result<Vec<PathBuf>, AuthzError> {
        if !self.path.is_dir() {
            return Ok(vec![self.path.clone()]);
        }
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.path)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|ext| ext == "kdl").unwrap_or(false))
            .collect();
        files.sort();
        Ok(files)
    }
}

/// Parse a KDL document into `[ptype, field, ...]` lines.
pub fn parse_policy_document(source: &str) -> Result<Vec<Vec<String>>, AuthzError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| AuthzError::KdlParse(e.to_string()))?;

    let mut lines = Vec::new();
    for node in doc.nodes() {
        let ptype = node.name().value();
        if !ptype.starts_with('p') && !ptype.starts_with('g') {
            tracing::warn!("ignoring unknown top-level KDL node `{ptype}`");
            continue;
        }
        let mut line = vec![ptype.to_string()];
        line.extend(node_fields(node)?);
        lines.push(line);
    }
    Ok(lines)
}

/// Positional arguments of a rule node, as strings.
fn node_fields(node: &KdlNode) -> Result<Vec<String>, AuthzError> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .map(|e| {
            let value = e.value();
            value
                .as_string()
                .map(str::to_string)
                .or_else(|| value.as_integer().map(|i| i.to_string()))
                .ok_or_else(|| {
                    AuthzError::KdlParse(format!(
                        "`{}` rule fields must be strings or integers, got {value}",
                        node.name().value()
                    ))
                })
        })
        .collect()
}

fn quote(field: &str) -> String {
    let mut out = String::with_capacity(field.len() + 2);
    out.push('"');
    for c in field.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Render `[ptype, field, ...]` lines as a KDL document.
pub fn render_policy_document(lines: &[Vec<String>]) -> String {
    let mut out = String::new();
    for line in lines {
        let Some((ptype, fields)) = line.split_first() else {
            continue;
        };
        out.push_str(ptype);
        for field in fields {
            out.push(' ');
            out.push_str(&quote(field));
        }
        out.push('\n');
    }
    out
}

impl Adapter for KdlFileAdapter {
    fn load_policy(&self, model: &Model) -> Result<(), AuthzError> {
        let files = self.files()?;
        let mut rules = 0;
        for path in &files {
            let contents =
                std::fs::read_to_string(path).map_err(|source| AuthzError::PolicyLoadError {
                    path: path.display().to_string(),
                    source,
                })?;
            for line in parse_policy_document(&contents)? {
                load_policy_line(&line, model)?;
                rules += 1;
            }
        }
        tracing::info!(
            files = files.len(),
            rules,
            path = %self.path.display(),
            "Loaded policy rules"
        );
        Ok(())
    }

    fn save_policy(&self, model: &Model) -> Result<(), AuthzError> {
        if self.path.is_dir() {
            return Err(AuthzError::Adapter(format!(
                "cannot save policy into directory `{}`; point the adapter at a file",
                self.path.display()
            )));
        }
        let lines = policy_lines(model);
        std::fs::write(&self.path, render_policy_document(&lines))?;
        tracing::info!(rules = lines.len(), path = %self.path.display(), "Saved policy rules");
        Ok(())
    }
}
