//! Pair executable code blocks with the output block that follows them.
use crate::config::Normalization;
use crate::extract::CodeBlock;
use serde::Serialize;
use std::collections::BTreeSet;

const NORMALIZE_ATTR: &str = "normalize=";

#[derive(Debug, Clone)]
pub struct PairingRules {
    pub executable: BTreeSet<String>,
    pub output: BTreeSet<String>,
    pub normalization: Normalization,
}

impl PairingRules {
    pub fn is_executable(&self, block: &CodeBlock) -> bool {
        !block.skip && !block.is_empty() && self.executable.contains(&block.language)
    }

    fn is_output(&self, block: &CodeBlock) -> bool {
        !block.skip && !self.is_executable(block) && self.output.contains(&block.language)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpectedOutput {
    pub document: String,
    /// Index of the code block this output belongs to.
    pub code_block: usize,
    /// Index of the output block itself.
    pub source_block: usize,
    pub text: String,
    pub normalization: Normalization,
}

/// Unit of execution: one executable block and its optional expected output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snippet {
    pub document: String,
    pub ordinal: usize,
    pub block: CodeBlock,
    pub expected: Option<ExpectedOutput>,
}

/// Lightweight snippet identity carried by results and verdicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnippetRef {
    pub document: String,
    pub block_index: usize,
    pub line: usize,
    pub language: String,
}

impl From<&Snippet> for SnippetRef {
    fn from(snippet: &Snippet) -> Self {
        Self {
            document: snippet.document.clone(),
            block_index: snippet.block.index,
            line: snippet.block.line,
            language: snippet.block.language.clone(),
        }
    }
}

/// Build snippets for one document's blocks, in block order.
///
/// Each executable block takes the first output block after it, provided no
/// other executable block comes first. Non-executable blocks never become
/// snippets.
pub fn pair_snippets(blocks: &[CodeBlock], rules: &PairingRules) -> Vec<Snippet> {
    let mut snippets = Vec::new();
    for (position, block) in blocks.iter().enumerate() {
        if !rules.is_executable(block) {
            continue;
        }
        let expected = blocks[position + 1..]
            .iter()
            .take_while(|candidate| !rules.is_executable(candidate))
            .find(|candidate| rules.is_output(candidate))
            .map(|output| ExpectedOutput {
                document: output.document.clone(),
                code_block: block.index,
                source_block: output.index,
                text: output.body.clone(),
                normalization: block_normalization(output, rules.normalization),
            });
        snippets.push(Snippet {
            document: block.document.clone(),
            ordinal: snippets.len(),
            block: block.clone(),
            expected,
        });
    }
    snippets
}

fn block_normalization(block: &CodeBlock, default: Normalization) -> Normalization {
    let Some(value) = block
        .attributes()
        .find_map(|attr| attr.strip_prefix(NORMALIZE_ATTR))
    else {
        return default;
    };
    Normalization::parse(value).unwrap_or_else(|| {
        tracing::warn!(
            document = %block.document,
            line = block.line,
            value,
            "unknown normalization attribute; using default"
        );
        default
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::extract::collect_blocks;

    fn rules() -> PairingRules {
        PairingRules {
            executable: BTreeSet::from(["java".to_string()]),
            output: ["yaml", "sql", "css", "less", "makefile", "text"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            normalization: Normalization::Trimmed,
        }
    }

    fn snippets(text: &str) -> Vec<Snippet> {
        let document = Document::new("dates.md", text);
        pair_snippets(&collect_blocks(&document), &rules())
    }

    #[test]
    fn output_block_directly_after_code_is_paired() {
        let found = snippets(
            "```java\nSystem.out.println(\"Hello\");\n```\nOutput:\n```yaml\nHello\n```\n",
        );
        assert_eq!(found.len(), 1);
        let expected = found[0].expected.as_ref().unwrap();
        assert_eq!(expected.text, "Hello\n");
        assert_eq!(expected.code_block, 0);
        assert_eq!(expected.source_block, 1);
        assert_eq!(expected.normalization, Normalization::Trimmed);
    }

    #[test]
    fn only_first_output_block_counts() {
        let found = snippets("```java\na();\n```\n```sql\nfirst\n```\n```css\nsecond\n```\n");
        assert_eq!(found[0].expected.as_ref().unwrap().text, "first\n");
    }

    #[test]
    fn next_executable_block_ends_the_search() {
        let found = snippets("```java\na();\n```\n```java\nb();\n```\n```text\nB\n```\n");
        assert_eq!(found.len(), 2);
        assert!(found[0].expected.is_none());
        assert_eq!(found[1].expected.as_ref().unwrap().text, "B\n");
        assert_eq!(found[1].ordinal, 1);
    }

    #[test]
    fn unrelated_blocks_are_passed_over() {
        let found = snippets("```java\na();\n```\n```bash\njava Main\n```\n```makefile\nA\n```\n");
        assert_eq!(found[0].expected.as_ref().unwrap().text, "A\n");
    }

    #[test]
    fn empty_and_skipped_code_blocks_are_not_snippets() {
        let found = snippets(
            "```java\n\n```\n<!-- snipcheck:skip -->\n```java\nx();\n```\n```text\nout\n```\n",
        );
        assert!(found.is_empty());
    }

    #[test]
    fn empty_executable_block_does_not_end_the_search() {
        let found = snippets("```java\na();\n```\n```java\n```\n```text\nA\n```\n");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].expected.as_ref().unwrap().text, "A\n");
    }

    #[test]
    fn normalize_attribute_overrides_default() {
        let found = snippets(
            "```java\na();\n```\n```text normalize=ordered-lines\nb\na\n```\n```java\nb();\n```\n```text normalize=bogus\nx\n```\n",
        );
        assert_eq!(
            found[0].expected.as_ref().unwrap().normalization,
            Normalization::OrderedLines
        );
        assert_eq!(
            found[1].expected.as_ref().unwrap().normalization,
            Normalization::Trimmed
        );
    }

    #[test]
    fn no_blocks_no_snippets() {
        assert!(snippets("# Just prose\n").is_empty());
    }
}
