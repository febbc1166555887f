//! Best-effort language and script detection.
//!
//! Used for tagging results, picking mock answers and steering prompt
//! wording. Wrong guesses on ambiguous snippets are acceptable; nothing
//! downstream depends on this being right.

/// Programming languages the heuristics can recognize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    JavaScript,
    TypeScript,
    Python,
    Java,
    CSharp,
    Cpp,
    C,
    Rust,
    Go,
    Ruby,
    Php,
    Kotlin,
    Swift,
    Sql,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Python => "python",
            Language::Java => "java",
            Language::CSharp => "csharp",
            Language::Cpp => "cpp",
            Language::C => "c",
            Language::Rust => "rust",
            Language::Go => "go",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Kotlin => "kotlin",
            Language::Swift => "swift",
            Language::Sql => "sql",
        }
    }

    /// Parse a client-declared language name, tolerating common aliases
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "javascript" | "js" | "node" | "nodejs" => Some(Language::JavaScript),
            "typescript" | "ts" => Some(Language::TypeScript),
            "python" | "python3" | "py" => Some(Language::Python),
            "java" => Some(Language::Java),
            "c#" | "csharp" | "cs" | "dotnet" => Some(Language::CSharp),
            "c++" | "cpp" => Some(Language::Cpp),
            "c" => Some(Language::C),
            "rust" | "rs" => Some(Language::Rust),
            "go" | "golang" => Some(Language::Go),
            "ruby" | "rb" => Some(Language::Ruby),
            "php" => Some(Language::Php),
            "kotlin" | "kt" => Some(Language::Kotlin),
            "swift" => Some(Language::Swift),
            "sql" | "mysql" | "postgres" | "postgresql" | "sqlite" => Some(Language::Sql),
            _ => None,
        }
    }
}

/// Ordered detection rules; first match wins, so narrow signatures must
/// outrank generic ones
const DETECTION_RULES: &[(Language, &[&str])] = &[
    (
        Language::TypeScript,
        &["error ts", ".tsx", ".ts(", "typescript"],
    ),
    (
        Language::Python,
        &[
            "traceback (most recent call last)",
            "indentationerror",
            "modulenotfounderror",
            "zerodivisionerror",
            ".py\", line",
            "def ",
        ],
    ),
    (
        Language::Rust,
        &["error[e0", "panicked at", "cannot borrow", ".rs:"],
    ),
    (
        Language::Java,
        &[
            "exception in thread",
            "java.lang.",
            ".java:",
            "classnotfoundexception",
        ],
    ),
    (
        Language::CSharp,
        &[
            "system.nullreferenceexception",
            "system.invalidoperationexception",
            ".cs:line",
        ],
    ),
    (
        Language::Go,
        &["goroutine", "nil pointer dereference", ".go:", "func main()"],
    ),
    (Language::Kotlin, &["kotlin.", ".kt:"]),
    (Language::Swift, &["unexpectedly found nil", ".swift"]),
    (
        Language::Ruby,
        &["nomethoderror", "undefined method", ".rb:", "gemfile"],
    ),
    (
        Language::Php,
        &["php fatal error", "php warning", ".php", "undefined index"],
    ),
    (
        Language::Cpp,
        &["segmentation fault", "std::", ".cpp", "undefined reference to"],
    ),
    (Language::C, &["dereferencing null pointer", ".c:", "malloc"]),
    (
        Language::Sql,
        &["syntax error at or near", "sqlstate", "ora-", "duplicate key value"],
    ),
    (
        Language::JavaScript,
        &[
            "cannot read propert",
            "is not a function",
            "referenceerror",
            "undefined is not",
            ".js:",
            "node_modules",
        ],
    ),
];

/// Guess the programming language from the error text and code snippet
pub fn detect_language(error_message: &str, code_snippet: Option<&str>) -> Option<Language> {
    let mut haystack = error_message.to_lowercase();
    if let Some(code) = code_snippet {
        haystack.push('\n');
        haystack.push_str(&code.to_lowercase());
    }

    for (language, markers) in DETECTION_RULES {
        if markers.iter().any(|marker| haystack.contains(marker)) {
            return Some(*language);
        }
    }
    None
}

/// Writing systems the prompt builder distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Latin,
    Cyrillic,
    Arabic,
    Devanagari,
    Bengali,
    Gujarati,
    Tamil,
    Telugu,
    Kannada,
    Cjk,
}

impl Script {
    pub fn as_str(&self) -> &'static str {
        match self {
            Script::Latin => "latin",
            Script::Cyrillic => "cyrillic",
            Script::Arabic => "arabic",
            Script::Devanagari => "devanagari",
            Script::Bengali => "bengali",
            Script::Gujarati => "gujarati",
            Script::Tamil => "tamil",
            Script::Telugu => "telugu",
            Script::Kannada => "kannada",
            Script::Cjk => "cjk",
        }
    }
}

/// Majority non-Latin script of the text, or Latin when none dominates.
/// Code is mostly ASCII, so any non-Latin presence usually means the human
/// description around the error is in that script.
pub fn detect_script(text: &str) -> Script {
    let mut tallies: [(Script, usize); 9] = [
        (Script::Cyrillic, 0),
        (Script::Arabic, 0),
        (Script::Devanagari, 0),
        (Script::Bengali, 0),
        (Script::Gujarati, 0),
        (Script::Tamil, 0),
        (Script::Telugu, 0),
        (Script::Kannada, 0),
        (Script::Cjk, 0),
    ];

    for c in text.chars() {
        let idx = match c as u32 {
            0x0400..=0x04FF => 0,
            0x0600..=0x06FF => 1,
            0x0900..=0x097F => 2,
            0x0980..=0x09FF => 3,
            0x0A80..=0x0AFF => 4,
            0x0B80..=0x0BFF => 5,
            0x0C00..=0x0C7F => 6,
            0x0C80..=0x0CFF => 7,
            0x3040..=0x30FF | 0x4E00..=0x9FFF => 8,
            _ => continue,
        };
        tallies[idx].1 += 1;
    }

    tallies
        .iter()
        .max_by_key(|(_, count)| *count)
        .filter(|(_, count)| *count > 0)
        .map(|(script, _)| *script)
        .unwrap_or(Script::Latin)
}
