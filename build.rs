use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

// Directories under the manifest root that are linted.
const SCANNED_DIRS: &[&str] = &["src", "tests", "benches"];

struct LintRule {
    name: &'static str,
    pattern: &'static str,
    hint: &'static str,
}

const RULES: &[LintRule] = &[
    LintRule {
        name: "allow(dead_code)",
        pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        hint: "Remove the unused code instead of silencing the warning.",
    },
    LintRule {
        name: "#[ignore]",
        pattern: r"#\s*\[\s*ignore\s*\]",
        hint: "Fix or delete the test; ignored tests rot.",
    },
    LintRule {
        name: "debug_assert!",
        pattern: r"\bdebug_assert!\s*\(",
        hint: "Return a BfgsError or use assert! in tests.",
    },
];

// Collects every matching line of a single file.
struct ViolationCollector {
    violations: Vec<String>,
    file_path: PathBuf,
}

impl ViolationCollector {
    fn new(file_path: &Path) -> Self {
        Self {
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
        }
    }

    fn check_and_get_error_message(&self, rule: &LintRule) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let mut message = format!(
            "\n❌ {} found in {}:\n",
            rule.name,
            self.file_path.display()
        );
        for line in &self.violations {
            message.push_str(&format!("   {line}\n"));
        }
        message.push_str(&format!("⚠️ {}\n", rule.hint));
        Some(message)
    }
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        self.violations.push(format!("{line_number}:{line_text}"));
        Ok(true)
    }
}

fn is_in_ignored_directory(path: &Path) -> bool {
    path.components().any(|component| match component {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            name.starts_with('.') || name == "target"
        }
        _ => false,
    })
}

fn rust_sources(root: &Path) -> Vec<PathBuf> {
    SCANNED_DIRS
        .iter()
        .map(|dir| root.join(dir))
        .filter(|dir| dir.is_dir())
        .flat_map(|dir| {
            WalkDir::new(dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| {
                    let relative = e.path().strip_prefix(root).unwrap_or(e.path());
                    !is_in_ignored_directory(relative)
                })
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
                .map(|e| e.into_path())
                .collect::<Vec<_>>()
        })
        .collect()
}

fn scan(rule: &LintRule, files: &[PathBuf]) -> Vec<String> {
    let matcher = match RegexMatcher::new_line_matcher(rule.pattern) {
        Ok(matcher) => matcher,
        Err(e) => return vec![format!("Error creating {} matcher: {e}", rule.name)],
    };
    let mut searcher = Searcher::new();
    let mut violations = Vec::new();
    for path in files {
        let mut collector = ViolationCollector::new(path);
        if searcher.search_path(&matcher, path, &mut collector).is_err() {
            continue;
        }
        if let Some(message) = collector.check_and_get_error_message(rule) {
            violations.push(message);
        }
    }
    violations
}

fn main() {
    let root = std::env::var_os("CARGO_MANIFEST_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    println!("cargo:rerun-if-changed=build.rs");
    // Missing paths would force a rerun on every build.
    for dir in SCANNED_DIRS.iter().filter(|dir| root.join(dir).is_dir()) {
        println!("cargo:rerun-if-changed={dir}");
    }

    if std::env::var("DOGLEG_BFGS_SKIP_LINT_CHECKS").is_ok() || std::env::var("DOCS_RS").is_ok() {
        return;
    }

    let files = rust_sources(&root);

    let violations: Vec<String> = RULES.iter().flat_map(|rule| scan(rule, &files)).collect();
    if !violations.is_empty() {
        for violation in &violations {
            eprintln!("{violation}");
        }
        eprintln!(
            "\nLint checks failed ({} files). Set DOGLEG_BFGS_SKIP_LINT_CHECKS=1 to bypass.",
            violations.len()
        );
        std::process::exit(1);
    }
}
