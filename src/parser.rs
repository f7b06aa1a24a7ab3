use anyhow::{anyhow, Result};

/// A shell token that can be quoted or unquoted
#[derive(Debug, Clone, PartialEq)]
pub enum ShellToken {
    /// Unquoted token
    Unquoted(String),
    /// Single-quoted token (literal, no expansion)
    SingleQuoted(String),
    /// Double-quoted token (allows variable expansion)
    DoubleQuoted(String),
    /// Operator token (|, &&, ||, ;, etc.)
    Operator(String),
}

impl ShellToken {
    /// Check if this token is quoted
    pub fn is_quoted(&self) -> bool {
        matches!(self, ShellToken::SingleQuoted(_) | ShellToken::DoubleQuoted(_))
    }

    /// Get the raw text content of the token
    pub fn content(&self) -> &str {
        match self {
            ShellToken::Unquoted(s) => s,
            ShellToken::SingleQuoted(s) => s,
            ShellToken::DoubleQuoted(s) => s,
            ShellToken::Operator(s) => s,
        }
    }
}

/// Simple quote-aware shell parser used for first-token extraction and
/// pipeline segmentation. Splitting a line on `|` with plain string
/// methods would break `echo "a | b"`, so all segmentation goes through
/// this parser.
#[derive(Debug, Clone, Default)]
pub struct ShellParser;

impl ShellParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a command line into tokens, respecting quotes
    pub fn parse(&self, command: &str) -> Result<Vec<ShellToken>> {
        let mut tokens = Vec::new();
        let mut current_token = String::new();
        let mut chars = command.chars().peekable();
        let mut in_single_quote = false;
        let mut in_double_quote = false;
        let mut escaped = false;

        while let Some(ch) = chars.next() {
            match ch {
                '\\' if !escaped && !in_single_quote => {
                    escaped = true;
                    current_token.push(ch);
                    continue;
                }
                '\'' if !escaped && !in_double_quote => {
                    if in_single_quote {
                        tokens.push(ShellToken::SingleQuoted(current_token.clone()));
                        current_token.clear();
                        in_single_quote = false;
                    } else {
                        if !current_token.is_empty() {
                            tokens.push(ShellToken::Unquoted(current_token.clone()));
                            current_token.clear();
                        }
                        in_single_quote = true;
                    }
                }
                '"' if !escaped && !in_single_quote => {
                    if in_double_quote {
                        tokens.push(ShellToken::DoubleQuoted(current_token.clone()));
                        current_token.clear();
                        in_double_quote = false;
                    } else {
                        if !current_token.is_empty() {
                            tokens.push(ShellToken::Unquoted(current_token.clone()));
                            current_token.clear();
                        }
                        in_double_quote = true;
                    }
                }
                ' ' | '\t' | '\n' if !in_single_quote && !in_double_quote && !escaped => {
                    if !current_token.is_empty() {
                        tokens.push(ShellToken::Unquoted(current_token.clone()));
                        current_token.clear();
                    }
                }
                '|' | '&' | ';' | '>' | '<' if !in_single_quote && !in_double_quote && !escaped => {
                    if !current_token.is_empty() {
                        tokens.push(ShellToken::Unquoted(current_token.clone()));
                        current_token.clear();
                    }

                    // Look ahead for multi-character operators
                    let mut operator = ch.to_string();
                    if let Some(&next_ch) = chars.peek() {
                        match (ch, next_ch) {
                            ('|', '|') | ('&', '&') | ('>', '>') | ('<', '<') => {
                                operator.push(chars.next().unwrap());
                            }
                            _ => {}
                        }
                    }
                    tokens.push(ShellToken::Operator(operator));
                }
                _ => {
                    current_token.push(ch);
                }
            }
            escaped = false;
        }

        if !current_token.is_empty() {
            if in_single_quote {
                return Err(anyhow!("Unclosed single quote"));
            } else if in_double_quote {
                return Err(anyhow!("Unclosed double quote"));
            } else {
                tokens.push(ShellToken::Unquoted(current_token));
            }
        }

        Ok(tokens)
    }

    /// Extract the first whitespace-delimited token of a line, lower-cased.
    ///
    /// Quoted first tokens keep their content (`"ls"` classifies as `ls`);
    /// an empty or unparseable line yields `None`.
    pub fn first_token(&self, command: &str) -> Option<String> {
        let tokens = self.parse(command).ok()?;
        tokens
            .iter()
            .find(|t| !matches!(t, ShellToken::Operator(_)))
            .map(|t| t.content().trim().to_lowercase())
            .filter(|t| !t.is_empty())
    }

    /// Split a line into pipeline segments on unquoted single `|`.
    ///
    /// `||` is a sequencing operator, not a pipe, and never splits.
    /// Returns the original line as a single segment when no pipe is
    /// present. Unparseable lines fall back to one unsplit segment so the
    /// tier machinery still sees them.
    pub fn split_pipeline(&self, command: &str) -> Vec<String> {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = command.chars().peekable();
        let mut in_single_quote = false;
        let mut in_double_quote = false;
        let mut escaped = false;

        while let Some(ch) = chars.next() {
            if escaped {
                current.push(ch);
                escaped = false;
                continue;
            }
            match ch {
                '\\' if !in_single_quote => {
                    escaped = true;
                    current.push(ch);
                }
                '\'' if !in_double_quote => {
                    in_single_quote = !in_single_quote;
                    current.push(ch);
                }
                '"' if !in_single_quote => {
                    in_double_quote = !in_double_quote;
                    current.push(ch);
                }
                '|' if !in_single_quote && !in_double_quote => {
                    if chars.peek() == Some(&'|') {
                        chars.next();
                        current.push_str("||");
                    } else {
                        segments.push(current.trim().to_string());
                        current.clear();
                    }
                }
                _ => current.push(ch),
            }
        }
        segments.push(current.trim().to_string());
        segments
    }

    /// Whether the line contains at least one unquoted single `|`.
    pub fn contains_pipe(&self, command: &str) -> bool {
        self.split_pipeline(command).len() > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_token_lowercased() {
        let parser = ShellParser::new();
        assert_eq!(parser.first_token("LS -la"), Some("ls".to_string()));
        assert_eq!(parser.first_token("  git status"), Some("git".to_string()));
        assert_eq!(parser.first_token(""), None);
        assert_eq!(parser.first_token("   "), None);
    }

    #[test]
    fn test_quoted_pipe_is_not_a_split_point() {
        let parser = ShellParser::new();
        let segments = parser.split_pipeline(r#"echo "a | b""#);
        assert_eq!(segments.len(), 1);
        assert!(!parser.contains_pipe(r#"grep 'x|y' file"#));
    }

    #[test]
    fn test_pipeline_split() {
        let parser = ShellParser::new();
        let segments = parser.split_pipeline("cat log.txt | grep error | wc -l");
        assert_eq!(segments, vec!["cat log.txt", "grep error", "wc -l"]);
    }

    #[test]
    fn test_logical_or_does_not_split() {
        let parser = ShellParser::new();
        let segments = parser.split_pipeline("make || echo failed");
        assert_eq!(segments.len(), 1);
        assert!(!parser.contains_pipe("make || echo failed"));
    }

    #[test]
    fn test_unclosed_quote_is_an_error() {
        let parser = ShellParser::new();
        assert!(parser.parse("echo 'oops").is_err());
        assert!(parser.parse("echo \"oops").is_err());
    }

    #[test]
    fn test_operator_tokens() {
        let parser = ShellParser::new();
        let tokens = parser.parse("ls && pwd").unwrap();
        assert!(tokens.contains(&ShellToken::Operator("&&".to_string())));
    }
}
