//! The lexer.

use derive_more::Display;
use regex::Regex;

/// Tokens in the program.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("kind: '{kind}', part of input: '{text}'")]
pub struct Token<'src> {
    /// What token class this token belongs to.
    pub kind: TokenKind,
    /// What part of the input this token carries.
    pub text: &'src str,
    /// Byte offset into the source this token started at.
    pub pos: usize,
}

/// Token classes, mirroring the original's `LexerRegex` capture groups.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum TokenKind {
    #[display("int")]
    Int,
    #[display("string")]
    Str,
    #[display("eval")]
    Eval,
    #[display("asm")]
    Asm,
    #[display("ident")]
    Ident,
    #[display("assign-op")]
    AssignOp,
    #[display("op")]
    Operator,
    #[display("punct")]
    Punct,
}

pub struct LexError(pub usize, pub char);

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lexer error: unexpected character {:?} at {}", self.1, self.0)
    }
}

impl std::fmt::Debug for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lexer error: unexpected character {:?} at {}", self.1, self.0)
    }
}

pub struct Lexer<'input> {
    input: &'input str,
    pos: usize,
    whitespace: Regex,
    matchers: Vec<(Regex, TokenKind)>,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        Lexer {
            input,
            pos: 0,
            whitespace: Regex::new(r"\A(?:[ \t\f\r\n\v])*").unwrap(),
            matchers: vec![
                (Regex::new(r#"\A"(?:[^"\\]|\\.)*""#).unwrap(), TokenKind::Str),
                (Regex::new(r"\A(?:0[xX][0-9a-fA-F]+|[0-9]+)").unwrap(), TokenKind::Int),
                (Regex::new(r"(?s)\A\[.*?\]").unwrap(), TokenKind::Eval),
                (Regex::new(r"(?s)\A_asm\s*\{.*?\}").unwrap(), TokenKind::Asm),
                (Regex::new(r"\A[a-zA-Z_$][a-zA-Z0-9_$.]*").unwrap(), TokenKind::Ident),
                (Regex::new(r"\A(?:\+=|-=|\*=|/=|%=|=)").unwrap(), TokenKind::AssignOp),
                (
                    Regex::new(r"\A(?:==|!=|<=|>=|<<|>>|\+|-|<|>|\*|/|%)").unwrap(),
                    TokenKind::Operator,
                ),
            ],
        }
    }

    /// Has the lexer reached the end of input?
    pub fn end_of_input(&self) -> bool {
        self.pos == self.input.len()
    }

    // Skip whitespace (comments are already stripped by the preprocessor).
    fn skip_whitespace(&mut self) {
        if let Some(m) = self.whitespace.find(&self.input[self.pos..]) {
            self.pos += m.end()
        }
    }

    /// Get the next token if possible.
    ///
    /// The return type distinguishes between end-of-input and lexer error.
    pub fn next(&mut self) -> Result<Option<Token<'input>>, LexError> {
        self.skip_whitespace();

        if self.end_of_input() {
            return Ok(None);
        }

        let start = self.pos;
        let rest = &self.input[self.pos..];

        for (re, kind) in &self.matchers {
            if let Some(m) = re.find(rest) {
                if m.start() == 0 {
                    self.pos += m.end();
                    return Ok(Some(Token { kind: *kind, text: &rest[..m.end()], pos: start }));
                }
            }
        }

        // Anything left over is a single-character punctuation token: one of
        // `( ) { } ; , @`.
        let c = rest.chars().next().ok_or(LexError(start, '\0'))?;
        let len = c.len_utf8();
        self.pos += len;
        Ok(Some(Token { kind: TokenKind::Punct, text: &rest[..len], pos: start }))
    }

    /// Lex the entire input eagerly into owned (kind, text, pos) triples.
    pub fn tokenize(mut self) -> Result<Vec<(TokenKind, String, usize)>, LexError> {
        let mut out = Vec::new();
        while let Some(tok) = self.next()? {
            out.push((tok.kind, tok.text.to_string(), tok.pos));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_function_signature() {
        let toks = Lexer::new("func word add(word a, word b) {").tokenize().unwrap();
        let kinds: Vec<_> = toks.iter().map(|(k, t, _)| (*k, t.as_str())).collect();
        assert_eq!(
            kinds,
            vec![
                (TokenKind::Ident, "func"),
                (TokenKind::Ident, "word"),
                (TokenKind::Ident, "add"),
                (TokenKind::Punct, "("),
                (TokenKind::Ident, "word"),
                (TokenKind::Ident, "a"),
                (TokenKind::Punct, ","),
                (TokenKind::Ident, "word"),
                (TokenKind::Ident, "b"),
                (TokenKind::Punct, ")"),
                (TokenKind::Punct, "{"),
            ]
        );
    }

    #[test]
    fn lexes_eval_and_asm_blocks() {
        let toks = Lexer::new("if [a < b] { _asm { HALT } }").tokenize().unwrap();
        assert_eq!(toks[1].0, TokenKind::Eval);
        assert_eq!(toks[1].1, "[a < b]");
        assert!(toks.iter().any(|(k, t, _)| *k == TokenKind::Asm && t.contains("HALT")));
    }

    #[test]
    fn lexes_dotted_identifier() {
        let toks = Lexer::new("s.field").tokenize().unwrap();
        assert_eq!(toks, vec![(TokenKind::Ident, "s.field".to_string(), 0)]);
    }
}
