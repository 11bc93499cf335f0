// Source policy checks run on every build.
//
// The build fails when a crate source file contains an underscore-prefixed
// binding, an #[allow(dead_code)] attribute, or a comment that is shouting,
// carries change-log words, or uses ** emphasis outside doc comments.

use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Directories holding the crate's own Rust sources.
const SOURCE_DIRS: [&str; 6] = ["cli", "regress", "sampler", "report", "tests", "benches"];

const CHANGELOG_WORDS: &str =
    "FIXED|CORRECTED|FIXES|FIX|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE";

/// One policy: a line regex, a filter over matched lines, and how to explain a hit.
struct Rule {
    pattern: String,
    accept: fn(&str) -> bool,
    headline: &'static str,
    advice: &'static str,
}

/// Collects the matched lines of one file that the rule's filter accepts.
struct LineCollector {
    accept: fn(&str) -> bool,
    violations: Vec<String>,
}

impl Sink for LineCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if (self.accept)(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with("//")
}

fn is_doc_comment(line: &str) -> bool {
    line.trim_start().starts_with("///")
}

/// Text after the comment marker, or None for code lines.
fn comment_body(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix("///") {
        return Some(rest.trim());
    }
    if let Some(rest) = trimmed.strip_prefix("//") {
        return Some(rest.trim_start_matches('!').trim());
    }
    line.find("//").map(|idx| line[idx + 2..].trim())
}

/// An underscore identifier in code, outside comments and string literals.
fn underscore_in_code(line: &str) -> bool {
    if is_comment(line) {
        return false;
    }
    let in_string = line
        .split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'));
    !in_string
}

fn changelog_word_in_comment(line: &str) -> bool {
    comment_body(line).is_some()
}

fn stars_outside_doc_comment(line: &str) -> bool {
    !is_doc_comment(line)
}

fn shouting_comment(line: &str) -> bool {
    match comment_body(line) {
        Some(body) => {
            let letters: Vec<char> = body.chars().filter(|c| c.is_alphabetic()).collect();
            !letters.is_empty() && letters.iter().all(|c| c.is_uppercase())
        }
        None => false,
    }
}

fn any_line(_: &str) -> bool {
    true
}

fn rules() -> Vec<Rule> {
    vec![
        Rule {
            pattern: r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            accept: underscore_in_code,
            headline: "underscore-prefixed variables",
            advice: "Either use the variable (removing the underscore) or remove it completely.",
        },
        Rule {
            pattern: format!(r"//.*\b(?:{CHANGELOG_WORDS})\b"),
            accept: changelog_word_in_comment,
            headline: "change-log words in comments",
            advice: "Comments describe the code as it is, not how it got there.",
        },
        Rule {
            pattern: r"//.*\*\*".to_string(),
            accept: stars_outside_doc_comment,
            headline: "** emphasis in non-doc comments",
            advice: "Please remove these patterns before committing.",
        },
        Rule {
            pattern: r"//.*".to_string(),
            accept: shouting_comment,
            headline: "comments with all uppercase alphabetic characters",
            advice: "Strongly consider deleting the comment completely.",
        },
        Rule {
            pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
            accept: any_line,
            headline: "#[allow(dead_code)] attributes",
            advice: "Either use the code (removing the attribute) or remove it completely.",
        },
    ]
}

fn source_files() -> Vec<PathBuf> {
    SOURCE_DIRS
        .iter()
        .map(Path::new)
        .filter(|dir| dir.is_dir())
        .flat_map(|dir| {
            WalkDir::new(dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
                .map(|e| e.into_path())
        })
        .collect()
}

fn check(rule: &Rule, files: &[PathBuf]) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(&rule.pattern)?;
    let mut searcher = Searcher::new();

    for path in files {
        let mut collector = LineCollector {
            accept: rule.accept,
            violations: Vec::new(),
        };
        searcher.search_path(&matcher, path, &mut collector)?;

        if !collector.violations.is_empty() {
            let mut message = format!(
                "\n❌ ERROR: Found {} {} in {}:\n",
                collector.violations.len(),
                rule.headline,
                path.display()
            );
            for violation in &collector.violations {
                message.push_str(&format!("   {violation}\n"));
            }
            message.push_str(&format!("\n⚠️ {}\n", rule.advice));
            return Err(message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    let files = source_files();
    for rule in rules() {
        if let Err(e) = check(&rule, &files) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
