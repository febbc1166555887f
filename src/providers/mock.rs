//! Deterministic terminal analyzer.
//!
//! Classifies the raw error text against an ordered pattern table, first
//! match wins. Runs entirely in process, so the cascade can always fall
//! back to it when every remote provider fails.

use chrono::Utc;
use regex::Regex;

use crate::analysis::{AnalysisResult, AnalyzeRequest, Complexity, ErrorCategory};
use crate::language::Language;

pub const MOCK_PROVIDER: &str = "mock";
pub const MOCK_MODEL: &str = "pattern-table";

enum Matcher {
    /// Case-insensitive substring match against any of the needles.
    AnyOf(&'static [&'static str]),
    /// For shapes a substring cannot pin down, like messages with
    /// embedded numbers or needles that need word boundaries.
    Pattern(Regex),
}

impl Matcher {
    fn matches(&self, lowered: &str) -> bool {
        match self {
            Matcher::AnyOf(needles) => needles.iter().any(|needle| lowered.contains(needle)),
            Matcher::Pattern(re) => re.is_match(lowered),
        }
    }
}

struct ErrorPattern {
    matcher: Matcher,
    category: ErrorCategory,
    complexity: Complexity,
    confidence: f32,
    tags: &'static [&'static str],
    explanation: &'static str,
    solution: &'static str,
    code_example: Option<&'static str>,
    prevention: &'static [&'static str],
}

pub struct MockAnalyzer {
    patterns: Vec<ErrorPattern>,
    fallback: ErrorPattern,
}

impl MockAnalyzer {
    pub fn new() -> Self {
        Self {
            patterns: pattern_table(),
            fallback: fallback_pattern(),
        }
    }

    /// Category the pattern table assigns to an error. Used to seed
    /// remote payloads that omit their own category.
    pub fn category_for(&self, error_message: &str) -> ErrorCategory {
        self.classify(error_message).category
    }

    /// Produce a canned analysis for the request. Never fails.
    pub fn analyze(&self, request: &AnalyzeRequest, language: Option<Language>) -> AnalysisResult {
        let pattern = self.classify(&request.error_message);

        let mut tags: Vec<String> = pattern.tags.iter().map(|t| t.to_string()).collect();
        if let Some(lang) = language {
            let tag = lang.as_str().to_string();
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }

        AnalysisResult {
            explanation: pattern.explanation.to_string(),
            solution: pattern.solution.to_string(),
            code_example: pattern.code_example.map(|s| s.to_string()),
            category: pattern.category,
            tags,
            confidence: pattern.confidence,
            domain_knowledge: None,
            prevention_tips: pattern.prevention.iter().map(|t| t.to_string()).collect(),
            complexity: pattern.complexity,
            provider: MOCK_PROVIDER.to_string(),
            model: MOCK_MODEL.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn classify(&self, error_message: &str) -> &ErrorPattern {
        let lowered = error_message.to_lowercase();
        self.patterns
            .iter()
            .find(|pattern| pattern.matcher.matches(&lowered))
            .unwrap_or(&self.fallback)
    }
}

impl Default for MockAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn pattern_table() -> Vec<ErrorPattern> {
    vec![
        ErrorPattern {
            matcher: Matcher::AnyOf(&[
                "typeerror",
                "cannot read propert",
                "is not a function",
                "unsupported operand",
                "cannot convert",
            ]),
            category: ErrorCategory::TypeError,
            complexity: Complexity::Beginner,
            confidence: 0.92,
            tags: &["type-mismatch"],
            explanation: "A value was used as a type it does not have, most often by \
                          accessing a property or calling a method on undefined or on a \
                          value of the wrong type.",
            solution: "Check the value right before the failing line. Guard the access \
                       with a null/undefined check or fix the earlier step that produced \
                       the wrong type.",
            code_example: Some(
                "// guard the access before using it\nif (user && user.profile) {\n  render(user.profile.name);\n}",
            ),
            prevention: &[
                "Validate inputs at the boundary where they enter your code.",
                "Prefer optional chaining or explicit type checks over assuming shape.",
            ],
        },
        ErrorPattern {
            matcher: Matcher::AnyOf(&[
                "referenceerror",
                "is not defined",
                "nameerror",
                "undeclared identifier",
                "cannot find symbol",
            ]),
            category: ErrorCategory::ReferenceError,
            complexity: Complexity::Beginner,
            confidence: 0.91,
            tags: &["undefined-name"],
            explanation: "The code refers to a name that does not exist in the current \
                          scope, usually a typo, a missing import, or a variable used \
                          before it is declared.",
            solution: "Compare the spelling at the failing line with the declaration. \
                       If the name lives in another module, import it explicitly.",
            code_example: None,
            prevention: &["Let your editor or linter flag unresolved names before running."],
        },
        ErrorPattern {
            matcher: Matcher::AnyOf(&[
                "nullpointerexception",
                "null pointer",
                "of null",
                "nonetype",
                "nil pointer",
            ]),
            category: ErrorCategory::NullReference,
            complexity: Complexity::Intermediate,
            confidence: 0.91,
            tags: &["null-value"],
            explanation: "Something dereferenced a null (or None/nil) value. A lookup or \
                          call earlier in the flow returned nothing and the result was \
                          used without checking.",
            solution: "Trace the null back to where it was produced and handle the empty \
                       case there, rather than where it finally blew up.",
            code_example: Some(
                "value = lookup(key)\nif value is None:\n    return default\nprocess(value)",
            ),
            prevention: &[
                "Make functions return early on missing data instead of passing null along.",
            ],
        },
        ErrorPattern {
            // Index messages embed the offending numbers, so substrings
            // alone cannot cover the common runtimes.
            matcher: Matcher::Pattern(pattern_regex(
                r"index(error)?.{0,40}out of (range|bounds)|list index out of range|len is \d+ but the index is \d+|arrayindexoutofbounds",
            )),
            category: ErrorCategory::IndexError,
            complexity: Complexity::Beginner,
            confidence: 0.9,
            tags: &["bounds-check"],
            explanation: "An index outside the collection's bounds was used. The \
                          collection is shorter than the code assumes, or the index is \
                          computed off by one.",
            solution: "Print the collection length and the index at the failing line, \
                       then fix the loop bound or the code that built the collection.",
            code_example: None,
            prevention: &[
                "Iterate over elements instead of raw indices where possible.",
                "Check emptiness before indexing position 0.",
            ],
        },
        ErrorPattern {
            matcher: Matcher::AnyOf(&["keyerror", "key not found", "no such key", "missing key"]),
            category: ErrorCategory::KeyError,
            complexity: Complexity::Beginner,
            confidence: 0.9,
            tags: &["missing-key"],
            explanation: "A dictionary or map lookup used a key that is not present. \
                          Either the key is misspelled or the data never contained it.",
            solution: "Log the available keys at the failing line. Use a defaulting \
                       lookup when absence is a legal state.",
            code_example: None,
            prevention: &["Validate external data against the fields you require on ingest."],
        },
        ErrorPattern {
            matcher: Matcher::AnyOf(&[
                "attributeerror",
                "has no attribute",
                "undefined method",
                "no method named",
                "does not contain a definition for",
            ]),
            category: ErrorCategory::AttributeError,
            complexity: Complexity::Intermediate,
            confidence: 0.9,
            tags: &["missing-member"],
            explanation: "The object at the failing line does not have the attribute or \
                          method being accessed, which usually means it is a different \
                          type than the code expects.",
            solution: "Inspect the object's actual type right before the access. The fix \
                       is normally upstream where the wrong object was produced.",
            code_example: None,
            prevention: &["Keep function return types consistent across all branches."],
        },
        ErrorPattern {
            matcher: Matcher::AnyOf(&[
                "division by zero",
                "divide by zero",
                "zerodivisionerror",
                "divided by 0",
                "attempt to divide by zero",
            ]),
            category: ErrorCategory::DivisionByZero,
            complexity: Complexity::Beginner,
            confidence: 0.93,
            tags: &["arithmetic"],
            explanation: "A division ran with a zero divisor. The denominator came from \
                          data or a computation that can legitimately be zero.",
            solution: "Guard the division and decide what the correct result is for the \
                       zero case, often zero, a default, or skipping the record.",
            code_example: Some("let rate = if total == 0 { 0.0 } else { hits as f64 / total as f64 };"),
            prevention: &["Treat divisors derived from counts or sums as zero until proven otherwise."],
        },
        ErrorPattern {
            matcher: Matcher::AnyOf(&[
                "syntaxerror",
                "unexpected token",
                "unexpected eof",
                "parse error",
                "invalid syntax",
            ]),
            category: ErrorCategory::SyntaxError,
            complexity: Complexity::Beginner,
            confidence: 0.92,
            tags: &["parse"],
            explanation: "The runtime or compiler could not parse the file. The reported \
                          position is where parsing gave up, the actual mistake is at or \
                          shortly before it.",
            solution: "Look a few lines above the reported position for an unclosed \
                       bracket, quote, or block.",
            code_example: None,
            prevention: &["Format the file with the language's standard formatter to surface imbalances."],
        },
        ErrorPattern {
            matcher: Matcher::AnyOf(&[
                "importerror",
                "modulenotfounderror",
                "cannot find module",
                "no module named",
                "package does not exist",
                "unresolved import",
            ]),
            category: ErrorCategory::ImportError,
            complexity: Complexity::Beginner,
            confidence: 0.92,
            tags: &["dependency"],
            explanation: "A module or package could not be resolved. It is not installed \
                          in the active environment, or the import path does not match \
                          the file layout.",
            solution: "Install the package into the environment the program actually \
                       runs in, and verify the import path against the package name.",
            code_example: Some("pip install requests\n# or for a local module\nfrom app.services import mailer"),
            prevention: &[
                "Pin dependencies in a manifest and install from it.",
                "Run the program with the same interpreter the packages were installed into.",
            ],
        },
        ErrorPattern {
            matcher: Matcher::AnyOf(&[
                "stack overflow",
                "stackoverflowerror",
                "maximum recursion depth",
                "maximum call stack",
            ]),
            category: ErrorCategory::StackOverflow,
            complexity: Complexity::Advanced,
            confidence: 0.94,
            tags: &["recursion"],
            explanation: "The call stack ran out, almost always runaway recursion whose \
                          base case is wrong or never reached for this input.",
            solution: "Find the recursive cycle in the stack trace and verify the base \
                       case actually terminates for the failing input. Convert to \
                       iteration if depth is unbounded by design.",
            code_example: None,
            prevention: &["Assert progress toward the base case on every recursive call."],
        },
        ErrorPattern {
            // `oom` needs word boundaries, it is a substring of ordinary
            // words like `room`.
            matcher: Matcher::Pattern(pattern_regex(
                r"\boom\b|out of memory|memoryerror|heap (space|limit)|cannot allocate",
            )),
            category: ErrorCategory::OutOfMemory,
            complexity: Complexity::Advanced,
            confidence: 0.9,
            tags: &["memory"],
            explanation: "The process exhausted the memory available to it, either from \
                          an unbounded accumulation or from loading more data at once \
                          than the host can hold.",
            solution: "Profile allocations around the failing operation. Stream or chunk \
                       large inputs instead of materializing them, and cap caches.",
            code_example: None,
            prevention: &["Set explicit size limits on anything that grows with input."],
        },
        ErrorPattern {
            matcher: Matcher::AnyOf(&["timeout", "timed out", "deadline exceeded", "etimedout"]),
            category: ErrorCategory::Timeout,
            complexity: Complexity::Intermediate,
            confidence: 0.9,
            tags: &["latency"],
            explanation: "An operation exceeded its time budget. The remote side is \
                          slow, unreachable, or the budget is too small for the work \
                          being done.",
            solution: "Check whether the target service is healthy and reachable, then \
                       size the timeout to the operation's realistic latency.",
            code_example: None,
            prevention: &["Add retries with backoff for operations that can be safely repeated."],
        },
        ErrorPattern {
            matcher: Matcher::AnyOf(&[
                "econnrefused",
                "connection refused",
                "connection reset",
                "getaddrinfo",
                "network unreachable",
                "socket hang up",
                "fetch failed",
                "certificate",
            ]),
            category: ErrorCategory::Network,
            complexity: Complexity::Intermediate,
            confidence: 0.9,
            tags: &["connectivity"],
            explanation: "The connection to a remote host failed before or during the \
                          request. The target is down, the address is wrong, or \
                          something between refuses the connection.",
            solution: "Verify host, port, and scheme, then test reachability from the \
                       machine the code runs on rather than your workstation.",
            code_example: None,
            prevention: &["Make connection targets configuration, not hardcoded values."],
        },
        ErrorPattern {
            matcher: Matcher::AnyOf(&[
                "permission denied",
                "eacces",
                "access denied",
                "operation not permitted",
                "forbidden",
                "unauthorized",
            ]),
            category: ErrorCategory::Permission,
            complexity: Complexity::Intermediate,
            confidence: 0.9,
            tags: &["access"],
            explanation: "The operation was refused by an access control, file \
                          permissions, an API credential, or an OS policy.",
            solution: "Identify which principal the code runs as and grant that \
                       principal the specific permission, or fix the credential being \
                       presented.",
            code_example: None,
            prevention: &["Fail fast at startup when required credentials are missing."],
        },
    ]
}

fn fallback_pattern() -> ErrorPattern {
    ErrorPattern {
        matcher: Matcher::AnyOf(&[]),
        category: ErrorCategory::Runtime,
        complexity: Complexity::Intermediate,
        confidence: 0.5,
        tags: &["general"],
        explanation: "The error did not match a known signature. It reports a runtime \
                      failure in the operation named in the message.",
        solution: "Read the first line of the error and the innermost frame of the \
                   stack trace together, they name the operation and the value that \
                   broke it.",
        code_example: None,
        prevention: &[],
    }
}

fn pattern_regex(pattern: &str) -> Regex {
    // Patterns are matched against lowercased text.
    Regex::new(pattern).expect("invalid classifier pattern")
}
