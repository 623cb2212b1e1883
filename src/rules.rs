//! Rules packs: caller-supplied focus areas, severity overrides, and
//! required checks that shape the prompt and post-process findings.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::{Category, Finding, Severity, generate_finding_id};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rules {
    /// Categories to prioritize, injected into the user prompt.
    pub focus: Vec<String>,
    /// Category-to-severity reassignments applied after parsing.
    pub severity_overrides: BTreeMap<Category, Severity>,
    /// Policy checks that must always be evaluated.
    pub required: Vec<RequiredCheck>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RequiredCheck {
    pub id: String,
    pub text: String,
}

/// Loads a rules file from disk. `None` path means no rules.
pub fn load_rules(path: Option<&Path>) -> Result<Option<Rules>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let data = std::fs::read_to_string(path)
        .map_err(|e| Error::Rules(format!("reading {}: {e}", path.display())))?;
    let rules: Rules = serde_json::from_str(&data)
        .map_err(|e| Error::Rules(format!("parsing {}: {e}", path.display())))?;
    Ok(Some(rules))
}

/// Renders the additional prompt instructions derived from rules.
pub fn build_rules_prompt_section(rules: Option<&Rules>) -> String {
    let Some(rules) = rules else {
        return String::new();
    };

    let mut section = String::new();

    if !rules.focus.is_empty() {
        let _ = writeln!(
            section,
            "\nFocus areas: {}. Prioritize findings in these areas.",
            rules.focus.join(", ")
        );
    }

    if !rules.severity_overrides.is_empty() {
        section.push_str("\nSeverity policy:\n");
        for (category, severity) in &rules.severity_overrides {
            let _ = writeln!(
                section,
                "- {} findings should be rated as {severity} severity.",
                category_name(*category)
            );
        }
    }

    if !rules.required.is_empty() {
        section.push_str("\nRequired checks (always evaluate these):\n");
        for check in &rules.required {
            let _ = writeln!(section, "- [{}] {}", check.id, check.text);
        }
    }

    section
}

/// Reassigns finding severities per the rules. Each overridden finding gets
/// a regenerated id; everything else passes through untouched.
pub fn apply_severity_overrides(mut findings: Vec<Finding>, rules: Option<&Rules>) -> Vec<Finding> {
    let Some(rules) = rules else {
        return findings;
    };
    if rules.severity_overrides.is_empty() {
        return findings;
    }
    for finding in &mut findings {
        if let Some(severity) = rules.severity_overrides.get(&finding.category) {
            finding.severity = *severity;
            finding.id = generate_finding_id(finding);
        }
    }
    findings
}

fn category_name(category: Category) -> &'static str {
    match category {
        Category::Bug => "bug",
        Category::Security => "security",
        Category::Performance => "performance",
        Category::Correctness => "correctness",
        Category::Style => "style",
        Category::Maintainability => "maintainability",
        Category::Testing => "testing",
        Category::Docs => "docs",
    }
}
