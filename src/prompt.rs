//! Prompt assembly for diff and codebase reviews.

use std::fmt::Write as _;

use crate::rules::{Rules, build_rules_prompt_section};
use crate::types::Threshold;

const SYSTEM_PROMPT: &str = r#"You are a strict, expert code reviewer. Your job is to review code diffs and produce structured findings in JSON format.

Rules:
1. Only review the changes shown in the diff. Do not comment on unchanged code.
2. Focus on bugs, security issues, performance problems, and correctness. Avoid bikeshedding on style unless it impacts readability significantly.
3. Be concise and actionable. Every finding must include a concrete suggestion.
4. Reference line numbers from the diff hunks.
5. Rate severity as "low", "medium", or "high".
6. Rate your confidence from 0.0 to 1.0.
7. Categorize each finding as one of: bug, security, performance, correctness, style, maintainability, testing, docs.

You MUST respond with ONLY a JSON array of findings. No markdown, no explanation, no preamble. Just the JSON array.

Each finding must have this exact structure:
{
  "severity": "low|medium|high",
  "category": "bug|security|performance|correctness|style|maintainability|testing|docs",
  "title": "Short descriptive title",
  "message": "What is wrong and why it matters",
  "suggestion": "How to fix it, with code if helpful",
  "confidence": 0.0-1.0,
  "path": "relative/file/path",
  "startLine": 1,
  "endLine": 1,
  "tags": ["optional", "tags"]
}

If there are no issues, respond with an empty array: []"#;

const CODEBASE_SYSTEM_PROMPT: &str = r#"You are a strict, expert code reviewer. Your job is to review complete source files and produce structured findings in JSON format.

Rules:
1. Review the full source files provided. Look for bugs, security issues, performance problems, correctness issues, design flaws, and maintainability concerns.
2. Be concise and actionable. Every finding must include a concrete suggestion.
3. Reference line numbers from the source files.
4. Rate severity as "low", "medium", or "high".
5. Rate your confidence from 0.0 to 1.0.
6. Categorize each finding as one of: bug, security, performance, correctness, style, maintainability, testing, docs.

You MUST respond with ONLY a JSON array of findings. No markdown, no explanation, no preamble. Just the JSON array.

Each finding must have this exact structure:
{
  "severity": "low|medium|high",
  "category": "bug|security|performance|correctness|style|maintainability|testing|docs",
  "title": "Short descriptive title",
  "message": "What is wrong and why it matters",
  "suggestion": "How to fix it, with code if helpful",
  "confidence": 0.0-1.0,
  "path": "relative/file/path",
  "startLine": 1,
  "endLine": 1,
  "tags": ["optional", "tags"]
}

If there are no issues, respond with an empty array: []"#;

/// The system prompt for diff review.
pub fn system_prompt() -> &'static str {
    SYSTEM_PROMPT
}

/// The system prompt for full-source codebase review.
pub fn codebase_system_prompt() -> &'static str {
    CODEBASE_SYSTEM_PROMPT
}

/// Constructs the user prompt from diff content and review options.
pub fn build_user_prompt(
    diff: &str,
    files: &[String],
    max_findings: usize,
    fail_on: Threshold,
    rules: Option<&Rules>,
) -> String {
    let mut prompt = String::from("Review the following code diff.\n\n");

    if max_findings > 0 {
        let _ = writeln!(prompt, "Return at most {max_findings} findings.");
    }
    if fail_on != Threshold::None {
        let _ = writeln!(
            prompt,
            "Focus especially on findings with severity {fail_on} or above."
        );
    }

    let langs = detect_languages(files);
    if !langs.is_empty() {
        let _ = writeln!(prompt, "Languages: {}", langs.join(", "));
    }

    prompt.push_str(&build_rules_prompt_section(rules));

    prompt.push_str("\n--- BEGIN DIFF ---\n");
    prompt.push_str(diff);
    prompt.push_str("\n--- END DIFF ---\n");

    prompt
}

/// Constructs the user prompt for codebase review, with an additional
/// per-file findings cap.
pub fn build_codebase_user_prompt(
    source: &str,
    files: &[String],
    max_findings: usize,
    max_findings_per_file: usize,
    fail_on: Threshold,
    rules: Option<&Rules>,
) -> String {
    let mut prompt = String::from("Review the following complete source files.\n\n");

    if max_findings > 0 {
        let _ = writeln!(prompt, "Return at most {max_findings} findings total.");
    }
    if max_findings_per_file > 0 {
        let _ = writeln!(prompt, "Return at most {max_findings_per_file} findings per file.");
    }
    if fail_on != Threshold::None {
        let _ = writeln!(
            prompt,
            "Focus especially on findings with severity {fail_on} or above."
        );
    }

    let langs = detect_languages(files);
    if !langs.is_empty() {
        let _ = writeln!(prompt, "Languages: {}", langs.join(", "));
    }

    prompt.push_str(&build_rules_prompt_section(rules));

    prompt.push_str("\n--- BEGIN SOURCE FILES ---\n");
    prompt.push_str(source);
    prompt.push_str("\n--- END SOURCE FILES ---\n");

    prompt
}

const LANGUAGE_EXTENSIONS: &[(&str, &str)] = &[
    (".go", "Go"),
    (".py", "Python"),
    (".js", "JavaScript"),
    (".ts", "TypeScript"),
    (".tsx", "TypeScript/React"),
    (".jsx", "JavaScript/React"),
    (".rs", "Rust"),
    (".java", "Java"),
    (".rb", "Ruby"),
    (".cpp", "C++"),
    (".c", "C"),
    (".h", "C/C++"),
    (".cs", "C#"),
    (".php", "PHP"),
    (".swift", "Swift"),
    (".kt", "Kotlin"),
    (".sql", "SQL"),
    (".sh", "Shell"),
    (".yaml", "YAML"),
    (".yml", "YAML"),
    (".json", "JSON"),
    (".tf", "Terraform"),
];

fn detect_languages(files: &[String]) -> Vec<&'static str> {
    let mut langs = Vec::new();
    for file in files {
        for (ext, lang) in LANGUAGE_EXTENSIONS {
            if file.ends_with(ext) && !langs.contains(lang) {
                langs.push(*lang);
            }
        }
    }
    langs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Severity};

    #[test]
    fn test_system_prompt_demands_json_array() {
        let prompt = system_prompt();
        assert!(prompt.contains("ONLY a JSON array"));
        assert!(prompt.contains("\"severity\": \"low|medium|high\""));
        assert!(prompt.contains("startLine"));
    }

    #[test]
    fn test_user_prompt_envelope() {
        let prompt = build_user_prompt("diff body here", &[], 0, Threshold::None, None);
        assert!(prompt.starts_with("Review the following code diff."));
        assert!(prompt.contains("--- BEGIN DIFF ---\ndiff body here\n--- END DIFF ---"));
        assert!(!prompt.contains("Return at most"));
        assert!(!prompt.contains("Focus especially"));
    }

    #[test]
    fn test_user_prompt_max_findings_and_fail_on() {
        let prompt = build_user_prompt("d", &[], 25, Threshold::High, None);
        assert!(prompt.contains("Return at most 25 findings."));
        assert!(prompt.contains("Focus especially on findings with severity high or above."));
    }

    #[test]
    fn test_user_prompt_language_hints() {
        let files = vec![
            "src/main.rs".to_string(),
            "scripts/build.sh".to_string(),
            "src/lib.rs".to_string(),
        ];
        let prompt = build_user_prompt("d", &files, 0, Threshold::None, None);
        assert!(prompt.contains("Languages: Rust, Shell"));
    }

    #[test]
    fn test_user_prompt_includes_rules_section() {
        let rules = Rules {
            focus: vec!["security".to_string()],
            severity_overrides: [(Category::Security, Severity::High)].into_iter().collect(),
            required: Vec::new(),
        };
        let prompt = build_user_prompt("d", &[], 0, Threshold::None, Some(&rules));
        assert!(prompt.contains("Focus areas: security"));
        assert!(prompt.contains("security findings should be rated as high severity"));
    }

    #[test]
    fn test_codebase_prompt_per_file_cap() {
        let prompt = build_codebase_user_prompt("src", &[], 50, 5, Threshold::Medium, None);
        assert!(prompt.starts_with("Review the following complete source files."));
        assert!(prompt.contains("Return at most 50 findings total."));
        assert!(prompt.contains("Return at most 5 findings per file."));
        assert!(prompt.contains("--- BEGIN SOURCE FILES ---"));
    }

    #[test]
    fn test_detect_languages_dedupes() {
        let files = vec![
            "a.py".to_string(),
            "b.py".to_string(),
            "conf.yaml".to_string(),
            "conf.yml".to_string(),
        ];
        assert_eq!(detect_languages(&files), vec!["Python", "YAML"]);
    }
}
