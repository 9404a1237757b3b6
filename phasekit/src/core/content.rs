//! Placeholder detection for generated file content.
//!
//! Each language family gets its own [`ContentCheck`]; adding an extension
//! means adding (or extending) one check without touching the others.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ValidationError;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)
        this\s+file\s+(will|would|should|is\s+going\s+to)\s+(contain|include|hold|have|implement|handle)
        | (will|to)\s+be\s+(implemented|added|written|filled\s+in)(\s+(later|here|soon))?
        | \bTODO\b
        | \bpending\b
        | \bplaceholder\b
        | (code|content|implementation|logic)\s+goes\s+here
        | your\s+code\s+here
        | insert\s+.{0,40}\s+here
        | este\s+archivo\s+(contendr[aá]|se\s+encargar[aá]|tendr[aá])
        ",
    )
    .expect("placeholder regex")
});

static CODE_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \b(import|export|from|class|interface|function|def|fn|struct|enum|impl|trait
          |const|let|var|type|module|package|use|pub|public|private|protected
          |async|return|require|namespace|func)\b
        | ^\#(include|import|define|pragma)\b
        | @[A-Za-z_]\w*\s*\(
        | =>
        ",
    )
    .expect("code token regex")
});

static DIRECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#(include|import|define|undef|pragma|if|ifdef|ifndef|elif|else|endif)\b")
        .expect("directive regex")
});

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[A-Za-z][\w:.-]*(\s[^<>]*)?/?>").expect("tag regex"));

static STYLE_RULE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)[^{}\s][^{}]*\{[^{}]*\}").expect("style rule regex"));

static BLOCK_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("block comment regex"));

static MARKUP_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("markup comment regex"));

/// One language family's notion of "real content".
pub trait ContentCheck: Sync {
    /// Family label used in error messages.
    fn family(&self) -> &'static str;
    /// Lowercase extensions (without dot) owned by this family.
    fn extensions(&self) -> &'static [&'static str];
    /// True when the content contains at least one real construct.
    fn has_substance(&self, content: &str) -> bool;
}

pub struct CodeCheck;

impl ContentCheck for CodeCheck {
    fn family(&self) -> &'static str {
        "code"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[
            "ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "rs", "go", "java", "kt", "swift", "rb",
            "php", "cs", "c", "cc", "cpp", "h", "hpp",
        ]
    }

    fn has_substance(&self, content: &str) -> bool {
        let stripped = BLOCK_COMMENT_RE.replace_all(content, "");
        stripped
            .lines()
            .map(str::trim)
            .filter(|line| !is_line_comment(line))
            .any(|line| CODE_TOKEN_RE.is_match(line))
    }
}

pub struct MarkupCheck;

impl ContentCheck for MarkupCheck {
    fn family(&self) -> &'static str {
        "markup"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["html", "htm", "xml", "svg", "vue"]
    }

    fn has_substance(&self, content: &str) -> bool {
        TAG_RE.is_match(&MARKUP_COMMENT_RE.replace_all(content, ""))
    }
}

pub struct StyleCheck;

impl ContentCheck for StyleCheck {
    fn family(&self) -> &'static str {
        "style"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["css", "scss", "less"]
    }

    fn has_substance(&self, content: &str) -> bool {
        let stripped = BLOCK_COMMENT_RE.replace_all(content, "");
        let without_line_comments: String = stripped
            .lines()
            .filter(|line| !line.trim_start().starts_with("//"))
            .collect::<Vec<_>>()
            .join("\n");
        STYLE_RULE_RE.is_match(&without_line_comments)
    }
}

static CHECKS: [&dyn ContentCheck; 3] = [&CodeCheck, &MarkupCheck, &StyleCheck];

/// Pick the check owning `path`'s extension, if any.
pub fn check_for(path: &str) -> Option<&'static dyn ContentCheck> {
    let ext = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())?
        .to_ascii_lowercase();
    CHECKS
        .iter()
        .copied()
        .find(|check| check.extensions().contains(&ext.as_str()))
}

/// Reject empty, placeholder-only, or substance-free file content.
///
/// Placeholder prose lines are removed before a family looks for substance,
/// so keywords inside a sentence never make it count as code.
pub fn validate_content(path: &str, content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::new(format!("{path}: content is empty")));
    }

    if let Some(check) = check_for(path) {
        if check.has_substance(&without_placeholder_prose(content)) {
            return Ok(());
        }
        let hint = if PLACEHOLDER_RE.is_match(content) {
            " (placeholder text instead of real content)"
        } else {
            ""
        };
        return Err(ValidationError::new(format!(
            "{path}: {} content has no real construct{hint}",
            check.family()
        )));
    }

    if is_placeholder_only(content) {
        return Err(ValidationError::new(format!(
            "{path}: content is placeholder text"
        )));
    }
    Ok(())
}

/// True when every non-blank line is a comment or a placeholder phrase, and at
/// least one line actually matches a placeholder phrase.
pub fn is_placeholder_only(content: &str) -> bool {
    let mut saw_placeholder = false;
    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if PLACEHOLDER_RE.is_match(line) {
            saw_placeholder = true;
            continue;
        }
        if is_line_comment(line) || line.trim_matches('.').is_empty() {
            continue;
        }
        return false;
    }
    saw_placeholder
}

/// A line matching a placeholder phrase with no code punctuation in it.
fn is_placeholder_prose(line: &str) -> bool {
    PLACEHOLDER_RE.is_match(line) && !line.contains(|c: char| ";{}()[]=<>".contains(c))
}

fn without_placeholder_prose(content: &str) -> String {
    content
        .lines()
        .filter(|line| !is_placeholder_prose(line.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_line_comment(line: &str) -> bool {
    line.starts_with("//")
        || (line.starts_with('#')
            && !line.starts_with("#[")
            && !line.starts_with("#!")
            && !DIRECTIVE_RE.is_match(line))
        || line.starts_with("<!--")
        || line.starts_with('*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_with_header_comment_and_declaration_passes() {
        let content = "// Main component\nimport { Component } from '@angular/core';\n\n@Component({selector: 'app-root'})\nexport class AppComponent {}\n";
        validate_content("src/app/app.component.ts", content).expect("valid");
    }

    #[test]
    fn comment_only_code_is_rejected() {
        let err = validate_content(
            "src/app/contact.component.ts",
            "// This file will contain the contact form",
        )
        .expect_err("placeholder");
        assert!(err.message().contains("placeholder"));
    }

    #[test]
    fn commented_out_keyword_does_not_count() {
        assert!(!CodeCheck.has_substance("// export class Later {}\n/* import x */"));
    }

    #[test]
    fn markup_comment_only_is_rejected() {
        validate_content("src/app/app.html", "<!-- This file will contain the markup -->")
            .expect_err("no tag");
        validate_content("src/app/app.html", "<h1>Header</h1>").expect("tag");
    }

    #[test]
    fn style_needs_a_rule() {
        validate_content("src/styles.scss", "/* styles go here later */").expect_err("no rule");
        validate_content("src/styles.scss", ".card { padding: 4px; }").expect("rule");
        validate_content("src/styles.scss", ".a {\n  .b { color: red; }\n}\n").expect("nested");
    }

    #[test]
    fn unknown_family_only_rejects_placeholder_prose() {
        validate_content("README.md", "TODO").expect_err("placeholder");
        validate_content("README.md", "# Demo\n\nRun `npm start`.\n").expect("prose is fine");
        validate_content("notes.txt", "   \n").expect_err("empty");
    }

    #[test]
    fn real_code_mentioning_pending_is_accepted() {
        validate_content("src/app/state.ts", "export const status = 'pending';\n").expect("valid");
    }

    #[test]
    fn placeholder_prose_with_keywords_is_rejected() {
        for content in [
            "This file will contain the logic to return the user list.",
            "TODO: export the data once the API is ready",
            "Placeholder - the form component will use the shared service",
        ] {
            let err = validate_content("src/app/users.ts", content).expect_err(content);
            assert!(err.message().contains("placeholder"), "{content}");
        }
    }

    #[test]
    fn placeholder_prose_does_not_hide_real_code() {
        let content = "// TODO: paging\nTODO: wire up the API later\nexport const users = [];\n";
        validate_content("src/app/users.ts", content).expect("declaration remains");
        validate_content("src/app/app.html", "<input placeholder=\"Name\">").expect("tag");
    }

    #[test]
    fn c_header_with_directives_is_accepted() {
        let content = "#include <stdint.h>\n#define MAX 10\nint add(int a, int b);\n";
        validate_content("include/util.h", content).expect("header");
        assert!(!is_line_comment("#include <stdio.h>"));
        assert!(is_line_comment("# includes the helpers"));
        assert!(is_line_comment("# import os later"));
    }

    #[test]
    fn check_for_is_case_insensitive() {
        assert_eq!(check_for("INDEX.HTML").map(|c| c.family()), Some("markup"));
        assert!(check_for("Makefile").is_none());
    }
}
