//! Shell metacharacter injection detection.

use std::sync::LazyLock;

use regex::Regex;

struct InjectionPattern {
    label: &'static str,
    regex: Regex,
}

// Order matters: the more specific forms are reported before `|` and `>`.
static PATTERNS: LazyLock<Vec<InjectionPattern>> = LazyLock::new(|| {
    [
        ("command chaining (;)", r";"),
        ("newline chaining", r"[\r\n]"),
        ("logical and (&&)", r"&&"),
        ("logical or (||)", r"\|\|"),
        ("pipe (|)", r"\|"),
        ("backtick substitution", r"`"),
        ("subshell substitution ($()", r"\$\("),
        ("process substitution", r"[<>]\("),
        ("redirection to an absolute path", r">>?\s*/"),
        ("background execution (&)", r"&\s*$"),
    ]
    .into_iter()
    .filter_map(|(label, pattern)| {
        // Literal patterns above always compile.
        Regex::new(pattern)
            .ok()
            .map(|regex| InjectionPattern { label, regex })
    })
    .collect()
});

/// Return a description of the first injection pattern found in `invocation`.
#[must_use]
pub fn detect_injection(invocation: &str) -> Option<&'static str> {
    PATTERNS
        .iter()
        .find(|p| p.regex.is_match(invocation))
        .map(|p| p.label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_each_form() {
        let cases = [
            ("ls; rm -rf ~", "command chaining (;)"),
            ("ls\nrm x", "newline chaining"),
            ("make && make install", "logical and (&&)"),
            ("test -f x || touch x", "logical or (||)"),
            ("cat x | sh", "pipe (|)"),
            ("echo `id`", "backtick substitution"),
            ("echo $(id)", "subshell substitution ($()"),
            ("diff <(ls a) <(ls b)", "process substitution"),
            ("echo x > /etc/passwd", "redirection to an absolute path"),
            ("echo x >>/etc/passwd", "redirection to an absolute path"),
            ("sleep 100 &", "background execution (&)"),
        ];
        for (input, expected) in cases {
            assert_eq!(detect_injection(input), Some(expected), "input: {input}");
        }
    }

    #[test]
    fn test_clean_invocations() {
        for input in ["ls -la ./src", "git log --oneline -n 5", "echo hello > out.txt"] {
            assert_eq!(detect_injection(input), None, "input: {input}");
        }
    }
}
