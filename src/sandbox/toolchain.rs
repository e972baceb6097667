//! Language tag -> compile/run capability lookup.
//!
//! A toolchain is data: the source file name, an optional compile command and a
//! run command. Commands are shell-word templates expanded per invocation, so
//! registering a new language is a config entry rather than code.
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

const CLASS_PLACEHOLDER: &str = "{class}";
const DEFAULT_JAVA_CLASS: &str = "Main";
const DEFAULT_STEM: &str = "snippet";

/// How snippet text becomes a compilable source file.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourcePrep {
    #[default]
    Verbatim,
    /// Name the file after the public class; wrap bare statements in `Main.main`.
    JavaMain,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ToolchainSpec {
    /// File name inside the scope; `{class}` expands to the detected class name.
    pub source_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile: Option<String>,
    pub run: String,
    #[serde(default)]
    pub prepare: SourcePrep,
}

/// Source text ready to be written into a sandbox scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSource {
    pub file_name: String,
    pub stem: String,
    pub text: String,
}

/// Placeholder values for one invocation.
pub struct TemplateVars<'a> {
    pub source: &'a Path,
    pub dir: &'a Path,
    pub stem: &'a str,
}

pub fn default_toolchains() -> BTreeMap<String, ToolchainSpec> {
    let mut toolchains = BTreeMap::new();
    toolchains.insert(
        "java".to_string(),
        ToolchainSpec {
            source_file: "{class}.java".to_string(),
            compile: Some("javac -d {dir} {source}".to_string()),
            run: "java -cp {dir} {stem}".to_string(),
            prepare: SourcePrep::JavaMain,
        },
    );
    toolchains
}

impl ToolchainSpec {
    pub fn prepare_source(&self, body: &str) -> PreparedSource {
        let (class, text) = match self.prepare {
            SourcePrep::Verbatim => (DEFAULT_STEM.to_string(), body.to_string()),
            SourcePrep::JavaMain => prepare_java(body),
        };
        let file_name = self.source_file.replace(CLASS_PLACEHOLDER, &class);
        let stem = Path::new(&file_name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or(class);
        PreparedSource {
            file_name,
            stem,
            text,
        }
    }

    pub fn compile_argv(&self, vars: &TemplateVars<'_>) -> Result<Option<Vec<String>>> {
        self.compile
            .as_deref()
            .map(|template| expand_template(template, vars))
            .transpose()
    }

    pub fn run_argv(&self, vars: &TemplateVars<'_>) -> Result<Vec<String>> {
        expand_template(&self.run, vars)
    }

    /// Programs that must be on PATH before anything runs. Programs produced by
    /// the compile step (templated paths) are not checked.
    pub fn required_programs(&self) -> Result<Vec<String>> {
        let mut programs = Vec::new();
        for template in self.compile.iter().chain(std::iter::once(&self.run)) {
            let words = shell_words::split(template)
                .with_context(|| format!("parse command template {template:?}"))?;
            let program = words
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("command template is empty"))?;
            if !program.contains('{') && !programs.contains(&program) {
                programs.push(program);
            }
        }
        Ok(programs)
    }

    pub fn validate(&self, language: &str) -> Result<()> {
        if self.source_file.trim().is_empty() {
            return Err(anyhow!("toolchain {language:?}: source_file must be non-empty"));
        }
        if self.source_file.contains('/') || self.source_file.contains('\\') {
            return Err(anyhow!(
                "toolchain {language:?}: source_file must be a bare file name"
            ));
        }
        self.required_programs()
            .with_context(|| format!("toolchain {language:?}"))?;
        Ok(())
    }
}

fn expand_template(template: &str, vars: &TemplateVars<'_>) -> Result<Vec<String>> {
    let words = shell_words::split(template)
        .with_context(|| format!("parse command template {template:?}"))?;
    if words.is_empty() {
        return Err(anyhow!("command template {template:?} is empty"));
    }
    let source = vars.source.to_string_lossy();
    let dir = vars.dir.to_string_lossy();
    Ok(words
        .into_iter()
        .map(|word| {
            word.replace("{source}", &source)
                .replace("{dir}", &dir)
                .replace("{stem}", vars.stem)
        })
        .collect())
}

fn java_type_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:class|interface|enum|record)\s+([A-Za-z_$][A-Za-z0-9_$]*)")
            .expect("valid java type regex")
    })
}

fn java_public_type_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^\s*public\s+(?:(?:final|abstract|sealed|non-sealed|static|strictfp)\s+)*(?:class|interface|enum|record)\s+([A-Za-z_$][A-Za-z0-9_$]*)",
        )
        .expect("valid java public type regex")
    })
}

fn prepare_java(body: &str) -> (String, String) {
    let code = strip_java_comments_and_literals(body);
    if let Some(caps) = java_public_type_regex().captures(&code) {
        return (caps[1].to_string(), body.to_string());
    }
    if java_type_regex().is_match(&code) {
        // No public type: launch the type declared closest before `main`.
        let class = code
            .find("static void main")
            .and_then(|main_at| {
                java_type_regex()
                    .captures_iter(&code)
                    .filter_map(|caps| caps.get(1))
                    .filter(|name| name.start() < main_at)
                    .last()
                    .map(|name| name.as_str().to_string())
            })
            .unwrap_or_else(|| DEFAULT_JAVA_CLASS.to_string());
        return (class, body.to_string());
    }
    (DEFAULT_JAVA_CLASS.to_string(), wrap_java_statements(body))
}

/// Blank out comments plus string, text-block and char literals, keeping line
/// structure, so declaration matching only sees code.
fn strip_java_comments_and_literals(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    while let Some(ch) = rest.chars().next() {
        let (end, keep_newlines) = if rest.starts_with("//") {
            (rest.find('\n').unwrap_or(rest.len()), false)
        } else if rest.starts_with("/*") {
            (rest[2..].find("*/").map_or(rest.len(), |idx| idx + 4), true)
        } else if rest.starts_with("\"\"\"") {
            (rest[3..].find("\"\"\"").map_or(rest.len(), |idx| idx + 6), true)
        } else if ch == '"' || ch == '\'' {
            (quoted_literal_len(rest, ch), false)
        } else {
            out.push(ch);
            rest = &rest[ch.len_utf8()..];
            continue;
        };
        out.push(' ');
        if keep_newlines {
            out.extend(rest[..end].chars().filter(|c| *c == '\n'));
        }
        rest = &rest[end..];
    }
    out
}

/// Byte length of a `"..."` or `'.'` literal starting at `text`, stopping at
/// the end of the line when it is unterminated.
fn quoted_literal_len(text: &str, quote: char) -> usize {
    let mut escaped = false;
    for (idx, ch) in text.char_indices().skip(1) {
        match ch {
            '\n' => return idx,
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            _ if ch == quote => return idx + ch.len_utf8(),
            _ => {}
        }
    }
    text.len()
}

fn wrap_java_statements(body: &str) -> String {
    let mut imports = String::new();
    let mut statements = String::new();
    for line in body.lines() {
        if line.trim_start().starts_with("import ") {
            imports.push_str(line.trim());
            imports.push('\n');
        } else {
            statements.push_str("        ");
            statements.push_str(line);
            statements.push('\n');
        }
    }
    format!(
        "{imports}\npublic class {DEFAULT_JAVA_CLASS} {{\n    public static void main(String[] args) throws Exception {{\n{statements}    }}\n}}\n"
    )
}
