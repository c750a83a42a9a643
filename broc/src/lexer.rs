use crate::token::{Token, TokenKind};

/// Scans BroLang source into tokens. Whitespace is skipped; unknown
/// characters become `Invalid` tokens rather than aborting the scan.
pub struct Lexer<'a> {
  src: &'a [u8],
  pos: usize,
}

impl<'a> Lexer<'a> {
  pub fn new(source: &'a str) -> Self {
    Lexer { src: source.as_bytes(), pos: 0 }
  }

  /// Runs the scanner over the whole input, excluding the EndOfFile marker.
  pub fn tokenize(source: &str) -> Vec<Token> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
      let token = lexer.next_token();
      if token.kind == TokenKind::EndOfFile {
        break;
      }
      tokens.push(token);
    }
    tokens
  }

  /// Returns the next token and advances past it.
  pub fn next_token(&mut self) -> Token {
    self.skip_whitespace();

    let c = self.peek();
    if c == 0 {
      return Token::new(TokenKind::EndOfFile, "");
    }

    match c {
      b'+' => self.single(TokenKind::Plus, "+"),
      b'-' => self.single(TokenKind::Minus, "-"),
      b'*' => self.single(TokenKind::Star, "*"),
      b'/' => self.single(TokenKind::Slash, "/"),
      b';' => self.single(TokenKind::Semicolon, ";"),
      b'(' => self.single(TokenKind::LParen, "("),
      b')' => self.single(TokenKind::RParen, ")"),
      b'{' => self.single(TokenKind::LBrace, "{"),
      b'}' => self.single(TokenKind::RBrace, "}"),
      b'>' => self.single(TokenKind::Greater, ">"),
      b'<' => self.single(TokenKind::Less, "<"),
      b'=' => {
        self.advance();
        if self.match_char(b'=') {
          Token::new(TokenKind::Equal, "==")
        } else {
          Token::new(TokenKind::Assign, "=")
        }
      }
      c if c.is_ascii_digit() => self.number(),
      c if c.is_ascii_alphabetic() => self.identifier_or_keyword(),
      c => {
        self.advance();
        Token::new(TokenKind::Invalid, (c as char).to_string())
      }
    }
  }

  fn peek(&self) -> u8 {
    if self.pos < self.src.len() { self.src[self.pos] } else { 0 }
  }

  fn advance(&mut self) -> u8 {
    let c = self.peek();
    if c != 0 {
      self.pos += 1;
    }
    c
  }

  fn match_char(&mut self, expected: u8) -> bool {
    if self.peek() == expected {
      self.pos += 1;
      return true;
    }
    false
  }

  fn single(&mut self, kind: TokenKind, text: &str) -> Token {
    self.advance();
    Token::new(kind, text)
  }

  fn skip_whitespace(&mut self) {
    while self.peek().is_ascii_whitespace() {
      self.advance();
    }
  }

  fn identifier_or_keyword(&mut self) -> Token {
    let start = self.pos;
    while self.peek().is_ascii_alphanumeric() {
      self.advance();
    }
    let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or_default();

    let kind = match text {
      "letbro" => TokenKind::LetBro,
      "ifbro" => TokenKind::IfBro,
      "elsebro" => TokenKind::ElseBro,
      "whilebro" => TokenKind::WhileBro,
      "printbro" => TokenKind::PrintBro,
      _ => TokenKind::Identifier,
    };
    Token::new(kind, text)
  }

  fn number(&mut self) -> Token {
    let start = self.pos;
    while self.peek().is_ascii_digit() {
      self.advance();
    }
    let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or_default();
    Token::new(TokenKind::Number, text)
  }
}
