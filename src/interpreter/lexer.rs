use super::{ErrorKind, ProgramError, Result};

/// Token payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    /// Identifier or keyword.
    Name(String),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// String literal with escapes already processed.
    Str(String),
    /// f-string body (escapes processed, braces untouched).
    FStr(String),
    /// Operator or delimiter.
    Op(&'static str),
    /// End of a logical line.
    Newline,
    /// Block opened by deeper indentation.
    Indent,
    /// Block closed by shallower indentation.
    Dedent,
    /// End of input.
    Eof,
}

/// Token with the line it was found on.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Payload.
    pub tok: Tok,
    /// 1-based line number.
    pub line: usize,
}

// Longest spellings first so that greedy matching works.
const OPERATORS: &[&str] = &[
    "**=", "//=", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "->", "+",
    "-", "*", "/", "%", "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";",
];

const TAB_WIDTH: usize = 4;

/// Open brackets allowed at once, as in CPython's tokenizer.
pub const MAX_BRACKET_DEPTH: usize = 200;

/// Tokenize `source` into a flat stream terminated by [`Tok::Eof`].
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    index: usize,
    line: usize,
    indents: Vec<usize>,
    depth: usize,
    at_line_start: bool,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            index: 0,
            line: 1,
            indents: vec![0],
            depth: 0,
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.index + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
        });
    }

    fn run(mut self) -> Result<Vec<Token>> {
        loop {
            if self.at_line_start && self.depth == 0 {
                if !self.handle_indentation()? {
                    break;
                }
                continue;
            }

            let Some(ch) = self.current() else {
                break;
            };

            match ch {
                '\n' => {
                    if self.depth == 0 {
                        self.push(Tok::Newline);
                        self.at_line_start = true;
                    }
                    self.index += 1;
                    self.line += 1;
                }
                ' ' | '\t' | '\r' => self.index += 1,
                '#' => self.skip_comment(),
                '\\' if self.peek(1) == Some('\n') => {
                    self.index += 2;
                    self.line += 1;
                }
                '\\' if self.peek(1) == Some('\r') && self.peek(2) == Some('\n') => {
                    self.index += 3;
                    self.line += 1;
                }
                '"' | '\'' => {
                    let text = self.lex_string()?;
                    self.push(Tok::Str(text));
                }
                c if c.is_ascii_digit() => self.lex_number()?,
                '.' if self.peek(1).is_some_and(|c| c.is_ascii_digit()) => self.lex_number()?,
                c if c.is_alphabetic() || c == '_' => self.lex_name()?,
                _ => self.lex_operator()?,
            }
        }

        if !matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline) | Some(Tok::Dedent)
        ) {
            self.push(Tok::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(self.tokens)
    }

    /// Measure indentation at the start of a line and emit INDENT/DEDENT.
    /// Returns `false` at end of input.
    fn handle_indentation(&mut self) -> Result<bool> {
        let mut column = 0;
        while let Some(ch) = self.current() {
            match ch {
                ' ' => column += 1,
                '\t' => column += TAB_WIDTH,
                '\r' | '\x0c' => {}
                _ => break,
            }
            self.index += 1;
        }

        match self.current() {
            None => return Ok(false),
            Some('\n') => {
                self.index += 1;
                self.line += 1;
                return Ok(true);
            }
            Some('#') => {
                self.skip_comment();
                return Ok(true);
            }
            Some(_) => {}
        }

        let top = self.indents.last().copied().unwrap_or(0);
        if column > top {
            if self.tokens.is_empty() {
                return Err(self.indentation_error("unexpected indent"));
            }
            self.indents.push(column);
            self.push(Tok::Indent);
        } else if column < top {
            while self.indents.last().is_some_and(|&level| level > column) {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            if self.indents.last().copied() != Some(column) {
                return Err(self.indentation_error(
                    "unindent does not match any outer indentation level",
                ));
            }
        }
        self.at_line_start = false;
        Ok(true)
    }

    fn indentation_error(&self, message: &str) -> ProgramError {
        ProgramError::new(ErrorKind::IndentationError, message).at_line(self.line)
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.current() {
            if ch == '\n' {
                break;
            }
            self.index += 1;
        }
    }

    fn lex_name(&mut self) -> Result<()> {
        let start = self.index;
        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' {
                self.index += 1;
            } else {
                break;
            }
        }
        let name: String = self.chars[start..self.index].iter().collect();

        if matches!(self.current(), Some('"') | Some('\'')) {
            match name.as_str() {
                "f" | "F" => {
                    let body = self.lex_string()?;
                    self.push(Tok::FStr(body));
                    return Ok(());
                }
                "r" | "R" => {
                    let body = self.lex_raw_string()?;
                    self.push(Tok::Str(body));
                    return Ok(());
                }
                _ => {}
            }
        }

        self.push(Tok::Name(name));
        Ok(())
    }

    fn lex_number(&mut self) -> Result<()> {
        let start_line = self.line;
        let mut text = String::new();
        let mut is_float = false;

        let take_digits = |lexer: &mut Lexer, text: &mut String| {
            while let Some(ch) = lexer.current() {
                if ch.is_ascii_digit() {
                    text.push(ch);
                    lexer.index += 1;
                } else if ch == '_' && lexer.peek(1).is_some_and(|c| c.is_ascii_digit()) {
                    lexer.index += 1;
                } else {
                    break;
                }
            }
        };

        take_digits(self, &mut text);
        if self.current() == Some('.') {
            is_float = true;
            text.push('.');
            self.index += 1;
            take_digits(self, &mut text);
        }
        if matches!(self.current(), Some('e') | Some('E')) {
            let sign = self.peek(1);
            let digit_at = if matches!(sign, Some('+') | Some('-')) { 2 } else { 1 };
            if self.peek(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                text.push('e');
                self.index += 1;
                if digit_at == 2 {
                    text.push(sign.unwrap_or('+'));
                    self.index += 1;
                }
                take_digits(self, &mut text);
            }
        }
        if self
            .current()
            .is_some_and(|c| c.is_alphabetic() || c == '_')
        {
            return Err(ProgramError::syntax("invalid decimal literal", start_line));
        }

        let tok = if is_float {
            Tok::Float(
                text.parse::<f64>()
                    .map_err(|_| ProgramError::syntax("invalid float literal", start_line))?,
            )
        } else {
            Tok::Int(text.parse::<i64>().map_err(|_| {
                ProgramError::new(ErrorKind::OverflowError, "integer literal too large")
                    .at_line(start_line)
            })?)
        };
        self.push(tok);
        Ok(())
    }

    /// Lex a quoted string starting at the current quote, processing escapes.
    fn lex_string(&mut self) -> Result<String> {
        let (quote, triple) = self.open_quote();
        let start_line = self.line;
        let mut buf = String::new();

        loop {
            let Some(ch) = self.current() else {
                let message = if triple {
                    "EOF while scanning triple-quoted string literal"
                } else {
                    "EOL while scanning string literal"
                };
                return Err(ProgramError::syntax(message, start_line));
            };

            if ch == quote && self.closes(quote, triple) {
                return Ok(buf);
            }

            match ch {
                '\n' if !triple => {
                    return Err(ProgramError::syntax(
                        "EOL while scanning string literal",
                        start_line,
                    ));
                }
                '\n' => {
                    buf.push('\n');
                    self.index += 1;
                    self.line += 1;
                }
                '\\' => {
                    self.index += 1;
                    let Some(escaped) = self.current() else {
                        continue;
                    };
                    self.index += 1;
                    match escaped {
                        'n' => buf.push('\n'),
                        't' => buf.push('\t'),
                        'r' => buf.push('\r'),
                        '0' => buf.push('\0'),
                        '\\' => buf.push('\\'),
                        '\'' => buf.push('\''),
                        '"' => buf.push('"'),
                        '\n' => self.line += 1,
                        other => {
                            buf.push('\\');
                            buf.push(other);
                        }
                    }
                }
                _ => {
                    buf.push(ch);
                    self.index += 1;
                }
            }
        }
    }

    fn lex_raw_string(&mut self) -> Result<String> {
        let (quote, triple) = self.open_quote();
        let start_line = self.line;
        let mut buf = String::new();
        loop {
            let Some(ch) = self.current() else {
                return Err(ProgramError::syntax(
                    "EOL while scanning string literal",
                    start_line,
                ));
            };
            if ch == quote && self.closes(quote, triple) {
                return Ok(buf);
            }
            if ch == '\n' {
                if !triple {
                    return Err(ProgramError::syntax(
                        "EOL while scanning string literal",
                        start_line,
                    ));
                }
                self.line += 1;
            }
            buf.push(ch);
            self.index += 1;
        }
    }

    /// Consume an opening quote (single or triple) and report which it was.
    fn open_quote(&mut self) -> (char, bool) {
        let quote = self.current().unwrap_or('"');
        if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
            self.index += 3;
            (quote, true)
        } else {
            self.index += 1;
            (quote, false)
        }
    }

    /// If the quote at the cursor terminates the literal, consume it.
    fn closes(&mut self, quote: char, triple: bool) -> bool {
        if !triple {
            self.index += 1;
            return true;
        }
        if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
            self.index += 3;
            return true;
        }
        false
    }

    fn lex_operator(&mut self) -> Result<()> {
        for op in OPERATORS {
            let matches = op
                .chars()
                .enumerate()
                .all(|(offset, expected)| self.peek(offset) == Some(expected));
            if matches {
                match *op {
                    "(" | "[" | "{" if self.depth >= MAX_BRACKET_DEPTH => {
                        return Err(ProgramError::syntax("too many nested parentheses", self.line));
                    }
                    _ => {}
                }
                self.index += op.chars().count();
                match *op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                self.push(Tok::Op(op));
                return Ok(());
            }
        }
        let ch = self.current().unwrap_or('?');
        Err(ProgramError::syntax(
            format!("invalid character '{}'", ch),
            self.line,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Tok> {
        tokenize(source)
            .expect("tokenize")
            .into_iter()
            .map(|t| t.tok)
            .collect()
    }

    #[test]
    fn bracket_nesting_is_capped() {
        let nested = |depth: usize| format!("x = {}1{}\n", "(".repeat(depth), ")".repeat(depth));
        assert!(tokenize(&nested(MAX_BRACKET_DEPTH)).is_ok());
        let err = tokenize(&nested(MAX_BRACKET_DEPTH + 1)).unwrap_err();
        assert_eq!(err.to_string(), "SyntaxError: too many nested parentheses on line 1");
    }

    #[test]
    fn emits_indent_and_dedent() {
        let toks = kinds("if x:\n    y = 1\nz\n");
        assert_eq!(
            toks,
            vec![
                Tok::Name("if".into()),
                Tok::Name("x".into()),
                Tok::Op(":"),
                Tok::Newline,
                Tok::Indent,
                Tok::Name("y".into()),
                Tok::Op("="),
                Tok::Int(1),
                Tok::Newline,
                Tok::Dedent,
                Tok::Name("z".into()),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn joins_lines_inside_brackets() {
        let toks = kinds("x = [1,\n     2]\n");
        assert!(!toks[..toks.len() - 2].contains(&Tok::Newline));
        assert!(!toks.contains(&Tok::Indent));
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        let toks = kinds("# heading\n\nprint(1)  # trailing\n\n");
        assert_eq!(toks[0], Tok::Name("print".into()));
        assert_eq!(toks.last(), Some(&Tok::Eof));
    }

    #[test]
    fn processes_escapes_and_triple_quotes() {
        let toks = kinds("s = 'a\\tb'\nt = \"\"\"one\ntwo\"\"\"\n");
        assert!(toks.contains(&Tok::Str("a\tb".into())));
        assert!(toks.contains(&Tok::Str("one\ntwo".into())));
    }

    #[test]
    fn recognises_fstrings_and_numbers() {
        let toks = kinds("f'{x:.2f}' 1_000 2.5 1e3");
        assert_eq!(toks[0], Tok::FStr("{x:.2f}".into()));
        assert_eq!(toks[1], Tok::Int(1000));
        assert_eq!(toks[2], Tok::Float(2.5));
        assert_eq!(toks[3], Tok::Float(1000.0));
    }

    #[test]
    fn rejects_inconsistent_dedent() {
        let err = tokenize("if x:\n    a\n  b\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::IndentationError);
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn rejects_unterminated_string() {
        let err = tokenize("print('oops)\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::SyntaxError);
        assert_eq!(err.line, Some(1));
    }
}
