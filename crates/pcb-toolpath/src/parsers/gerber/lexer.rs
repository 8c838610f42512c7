/// Tokens produced by the Gerber lexer.
#[derive(Debug, Clone, PartialEq)]
pub enum GerberToken {
    /// Extended command block (contents between `%` delimiters).
    /// Example: `"FSLAX24Y24"`, `"ADD10C,0.020"`, `"LPD"`
    Extended(String),
    /// A word command terminated by `*`.
    /// Example: `"D10"`, `"X100Y200D01"`, `"G01"`, `"M02"`
    Word(String),
}

impl GerberToken {
    pub fn text(&self) -> &str {
        match self {
            GerberToken::Extended(s) | GerberToken::Word(s) => s,
        }
    }
}

/// A token and the 1-based line it starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexed {
    pub token: GerberToken,
    pub line: usize,
}

/// Character stream that knows which line it is on.
struct Cursor<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }
}

/// Tokenize a Gerber file into a sequence of tokens.
///
/// Gerber uses `*` as a statement terminator and `%...*%` for extended commands.
/// Comments start with `G04` and end with `*`.
pub fn tokenize(input: &str) -> Vec<Lexed> {
    let mut tokens = Vec::new();
    let mut cur = Cursor {
        chars: input.chars().peekable(),
        line: 1,
    };

    while let Some(ch) = cur.peek() {
        match ch {
            '%' => {
                cur.bump();
                // Read until closing '%', collecting extended command blocks
                let mut block = String::new();
                let mut start_line = cur.line;
                loop {
                    match cur.peek() {
                        Some('%') => {
                            cur.bump();
                            push_token(&mut tokens, &block, start_line, GerberToken::Extended);
                            break;
                        }
                        Some('*') => {
                            cur.bump();
                            // End of one extended command within the block
                            push_token(&mut tokens, &block, start_line, GerberToken::Extended);
                            block.clear();
                            start_line = cur.line;
                        }
                        Some(c) => {
                            cur.bump();
                            if c != '\n' && c != '\r' {
                                if block.trim().is_empty() {
                                    start_line = cur.line;
                                }
                                block.push(c);
                            }
                        }
                        None => break, // EOF inside extended block
                    }
                }
            }
            '\n' | '\r' | ' ' | '\t' => {
                cur.bump();
            }
            _ => {
                // Read a word command until '*'
                let start_line = cur.line;
                let mut word = String::new();
                while let Some(c) = cur.peek() {
                    if c == '*' {
                        cur.bump();
                        break;
                    }
                    if c == '%' {
                        break; // don't consume, let outer loop handle
                    }
                    cur.bump();
                    if c != '\n' && c != '\r' {
                        word.push(c);
                    }
                }
                push_token(&mut tokens, &word, start_line, GerberToken::Word);
            }
        }
    }

    tokens
}

fn push_token(
    tokens: &mut Vec<Lexed>,
    raw: &str,
    line: usize,
    make: fn(String) -> GerberToken,
) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() && !is_comment(trimmed) {
        tokens.push(Lexed {
            token: make(trimmed.to_string()),
            line,
        });
    }
}

/// Check if a command is a G04 comment.
fn is_comment(s: &str) -> bool {
    s.starts_with("G04") || (s.starts_with("G4") && !s[2..].starts_with(|c: char| c.is_ascii_digit()))
}
