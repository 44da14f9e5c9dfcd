use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Only the crate's own sources are checked.
const SOURCE_DIRS: [&str; 3] = ["analysis", "cli", "tests"];

// Words that may not appear in any comment.
const FORBIDDEN_WORDS: [&str; 14] = [
    "FIXED",
    "CORRECTED",
    "FIX",
    "FIXES",
    "NEW",
    "CHANGED",
    "CHANGES",
    "CHANGE",
    "MODIFIED",
    "MODIFIES",
    "MODIFY",
    "UPDATED",
    "UPDATES",
    "UPDATE",
];

// Which policy a collector enforces; selects the error text.
#[derive(Clone, Copy)]
enum Rule {
    UnderscorePrefix,
    ForbiddenComment,
    AllowDeadCode,
}

impl Rule {
    fn pattern(self) -> String {
        match self {
            Rule::UnderscorePrefix => r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            Rule::ForbiddenComment => {
                format!(r"(//|/\*).*(?:{}|\*\*)", FORBIDDEN_WORDS.join("|"))
            }
            Rule::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
        }
    }

    fn explanation(self) -> &'static str {
        match self {
            Rule::UnderscorePrefix => {
                "Underscore-prefixed bindings are not allowed: use the value or remove it."
            }
            Rule::ForbiddenComment => {
                "Comments may not contain edit markers such as 'FIX' or 'UPDATE', and '**' is only allowed in doc comments."
            }
            Rule::AllowDeadCode => {
                "#[allow(dead_code)] is not allowed: use the code or remove it."
            }
        }
    }
}

// Collects the matching lines of one file that break a rule.
struct ViolationCollector {
    rule: Rule,
    violations: Vec<String>,
    file_path: PathBuf,
}

impl ViolationCollector {
    fn new(rule: Rule, file_path: &Path) -> Self {
        Self {
            rule,
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
        }
    }

    fn check_and_get_error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }

        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} source policy violations in {}:\n",
            self.violations.len(),
            file_name
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!("\n⚠️ {}\n", self.rule.explanation()));
        Some(error_msg)
    }

    fn is_exempt(&self, line_text: &str) -> bool {
        let trimmed = line_text.trim_start();
        match self.rule {
            Rule::UnderscorePrefix => {
                // Comments and string literals may mention such names.
                let is_comment = trimmed.starts_with("//");
                let in_string = line_text
                    .split('"')
                    .enumerate()
                    .any(|(i, part)| i % 2 == 1 && part.contains('_'));
                is_comment || in_string
            }
            Rule::ForbiddenComment => {
                let is_doc = trimmed.starts_with("///") || trimmed.starts_with("//!");
                let has_word = FORBIDDEN_WORDS.iter().any(|w| line_text.contains(w));
                is_doc && !has_word
            }
            Rule::AllowDeadCode => false,
        }
    }
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if !self.is_exempt(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn source_files() -> impl Iterator<Item = PathBuf> {
    SOURCE_DIRS.into_iter().flat_map(|dir| {
        WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
            .map(|e| e.into_path())
    })
}

fn scan(rule: Rule) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(&rule.pattern())?;
    let mut searcher = Searcher::new();
    for path in source_files() {
        let mut collector = ViolationCollector::new(rule, &path);
        searcher.search_path(&matcher, &path, &mut collector)?;
        if let Some(error_message) = collector.check_and_get_error_message() {
            return Err(error_message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    for rule in [Rule::UnderscorePrefix, Rule::ForbiddenComment, Rule::AllowDeadCode] {
        if let Err(e) = scan(rule) {
            // The error text must reach cargo's output before the build fails.
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
