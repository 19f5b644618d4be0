//! Prompt assembly (§4.7). A pure function with no I/O: given instructions
//! and a gathered file list, renders one deterministic string shared
//! read-only by every model unit.

use crate::context::FileRecord;

const DEFAULT_TEMPLATE: &str = "## {path}\n\n{content}\n";

pub struct PromptStitcher;

impl PromptStitcher {
    pub fn stitch(instructions: &str, files: &[FileRecord], format: &str) -> String {
        let template = if format.is_empty() { DEFAULT_TEMPLATE } else { format };

        let mut out = String::new();
        out.push_str(instructions);

        for file in files {
            out.push_str("\n\n");
            out.push_str(&render(template, file));
        }

        out
    }
}

fn render(template: &str, file: &FileRecord) -> String {
    template.replace("{path}", &file.path).replace("{content}", &file.content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, content: &str) -> FileRecord {
        FileRecord { path: path.to_string(), content: content.to_string() }
    }

    #[test]
    fn default_template_renders_heading_per_file() {
        let files = vec![file("src/lib.rs", "fn main() {}")];
        let result = PromptStitcher::stitch("Summarize this.", &files, "");
        assert!(result.starts_with("Summarize this."));
        assert!(result.contains("## src/lib.rs"));
        assert!(result.contains("fn main() {}"));
    }

    #[test]
    fn custom_template_substitutes_both_placeholders() {
        let files = vec![file("a.txt", "hello")];
        let result = PromptStitcher::stitch("", &files, "FILE[{path}]={content}");
        assert!(result.contains("FILE[a.txt]=hello"));
    }

    #[test]
    fn empty_file_list_returns_instructions_unchanged() {
        let result = PromptStitcher::stitch("just instructions", &[], "");
        assert_eq!(result, "just instructions");
    }

    #[test]
    fn is_deterministic_for_identical_inputs() {
        let files = vec![file("a.txt", "x"), file("b.txt", "y")];
        let first = PromptStitcher::stitch("go", &files, "");
        let second = PromptStitcher::stitch("go", &files, "");
        assert_eq!(first, second);
    }
}
