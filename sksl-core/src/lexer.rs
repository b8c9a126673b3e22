use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_until, take_while, take_while1},
    character::complete::{anychar, char, digit0, digit1, hex_digit1, multispace1, one_of},
    combinator::{map, opt, recognize, value},
    sequence::{pair, preceded, tuple},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    EndOfFile,
    Identifier,
    IntLiteral,
    FloatLiteral,
    TrueLiteral,
    FalseLiteral,

    // Keywords
    If,
    Else,
    For,
    While,
    Do,
    Switch,
    Case,
    Default,
    Break,
    Continue,
    Discard,
    Return,
    In,
    Out,
    Inout,
    Uniform,
    Const,
    Flat,
    Noperspective,
    Inline,
    Noinline,
    Pure,
    Workgroup,
    Readonly,
    Writeonly,
    Buffer,
    Highp,
    Mediump,
    Lowp,
    Struct,
    Layout,
    Reserved,

    /// `#version`, `#extension` or any other `#word`.
    Directive,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Dot,
    Comma,
    Semicolon,
    Question,
    Colon,

    // Operators
    PlusPlus,
    MinusMinus,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Shl,
    Shr,
    BitwiseOr,
    BitwiseXor,
    BitwiseAnd,
    BitwiseNot,
    LogicalOr,
    LogicalXor,
    LogicalAnd,
    LogicalNot,
    Eq,
    EqEq,
    Neq,
    Gt,
    Lt,
    GtEq,
    LtEq,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    ShlEq,
    ShrEq,
    BitwiseOrEq,
    BitwiseXorEq,
    BitwiseAndEq,

    // Trivia; kept as tokens so that directives can look for newlines.
    Whitespace,
    LineComment,
    BlockComment,

    Invalid,
}

impl TokenKind {
    pub fn is_trivia(self) -> bool {
        matches!(
            self,
            TokenKind::Whitespace | TokenKind::LineComment | TokenKind::BlockComment
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: u32,
    pub length: u32,
}

impl Token {
    pub fn new(kind: TokenKind, offset: usize, length: usize) -> Self {
        Token {
            kind,
            offset: offset as u32,
            length: length as u32,
        }
    }

    pub fn end(&self) -> usize {
        (self.offset + self.length) as usize
    }
}

/// GLSL words that are reserved but have no meaning in this dialect.
const RESERVED_WORDS: &[&str] = &[
    "attribute", "varying", "precision", "invariant", "asm", "class", "union", "enum", "typedef",
    "template", "this", "packed", "goto", "volatile", "public", "static", "extern", "external",
    "interface", "long", "double", "fixed", "unsigned", "superp", "input", "output", "hvec2",
    "hvec3", "hvec4", "dvec2", "dvec3", "dvec4", "fvec2", "fvec3", "fvec4", "sampler3DRect",
    "sizeof", "cast", "namespace", "using", "resource", "smooth", "centroid", "subroutine",
    "coherent", "restrict", "patch", "sample", "shared", "atomic_uint",
];

fn keyword_kind(text: &str) -> TokenKind {
    match text {
        "true" => TokenKind::TrueLiteral,
        "false" => TokenKind::FalseLiteral,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "for" => TokenKind::For,
        "while" => TokenKind::While,
        "do" => TokenKind::Do,
        "switch" => TokenKind::Switch,
        "case" => TokenKind::Case,
        "default" => TokenKind::Default,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "discard" => TokenKind::Discard,
        "return" => TokenKind::Return,
        "in" => TokenKind::In,
        "out" => TokenKind::Out,
        "inout" => TokenKind::Inout,
        "uniform" => TokenKind::Uniform,
        "const" => TokenKind::Const,
        "flat" => TokenKind::Flat,
        "noperspective" => TokenKind::Noperspective,
        "inline" => TokenKind::Inline,
        "noinline" => TokenKind::Noinline,
        "$pure" => TokenKind::Pure,
        "workgroup" => TokenKind::Workgroup,
        "readonly" => TokenKind::Readonly,
        "writeonly" => TokenKind::Writeonly,
        "buffer" => TokenKind::Buffer,
        "highp" => TokenKind::Highp,
        "mediump" => TokenKind::Mediump,
        "lowp" => TokenKind::Lowp,
        "struct" => TokenKind::Struct,
        "layout" => TokenKind::Layout,
        _ if RESERVED_WORDS.contains(&text) => TokenKind::Reserved,
        _ => TokenKind::Identifier,
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

fn parse_word(input: &str) -> IResult<&str, TokenKind> {
    map(
        recognize(pair(
            take_while1(is_ident_start),
            take_while(is_ident_continue),
        )),
        keyword_kind,
    )(input)
}

fn parse_directive(input: &str) -> IResult<&str, TokenKind> {
    value(
        TokenKind::Directive,
        recognize(pair(char('#'), take_while1(is_ident_continue))),
    )(input)
}

fn exponent(input: &str) -> IResult<&str, &str> {
    recognize(tuple((one_of("eE"), opt(one_of("+-")), digit1)))(input)
}

fn parse_float(input: &str) -> IResult<&str, TokenKind> {
    let fractional = alt((
        // 1.  1.5  1.5e3
        recognize(tuple((digit1, char('.'), digit0, opt(exponent)))),
        // .5  .5e3
        recognize(tuple((char('.'), digit1, opt(exponent)))),
        // 1e3
        recognize(pair(digit1, exponent)),
    ));
    value(
        TokenKind::FloatLiteral,
        recognize(pair(fractional, opt(one_of("fF")))),
    )(input)
}

fn parse_int(input: &str) -> IResult<&str, TokenKind> {
    let digits = alt((recognize(preceded(tag_no_case("0x"), hex_digit1)), digit1));
    value(
        TokenKind::IntLiteral,
        recognize(pair(digits, opt(one_of("uU")))),
    )(input)
}

fn parse_trivia(input: &str) -> IResult<&str, TokenKind> {
    alt((
        value(TokenKind::Whitespace, multispace1),
        value(
            TokenKind::LineComment,
            recognize(pair(tag("//"), take_while(|c: char| c != '\n'))),
        ),
        value(
            TokenKind::BlockComment,
            recognize(tuple((tag("/*"), take_until("*/"), tag("*/")))),
        ),
    ))(input)
}

fn parse_operator(input: &str) -> IResult<&str, TokenKind> {
    alt((
        alt((
            value(TokenKind::ShlEq, tag("<<=")),
            value(TokenKind::ShrEq, tag(">>=")),
            value(TokenKind::PlusPlus, tag("++")),
            value(TokenKind::MinusMinus, tag("--")),
            value(TokenKind::Shl, tag("<<")),
            value(TokenKind::Shr, tag(">>")),
            value(TokenKind::LogicalOr, tag("||")),
            value(TokenKind::LogicalXor, tag("^^")),
            value(TokenKind::LogicalAnd, tag("&&")),
            value(TokenKind::EqEq, tag("==")),
            value(TokenKind::Neq, tag("!=")),
            value(TokenKind::GtEq, tag(">=")),
            value(TokenKind::LtEq, tag("<=")),
            value(TokenKind::PlusEq, tag("+=")),
            value(TokenKind::MinusEq, tag("-=")),
            value(TokenKind::StarEq, tag("*=")),
            value(TokenKind::SlashEq, tag("/=")),
            value(TokenKind::PercentEq, tag("%=")),
            value(TokenKind::BitwiseOrEq, tag("|=")),
            value(TokenKind::BitwiseXorEq, tag("^=")),
            value(TokenKind::BitwiseAndEq, tag("&=")),
        )),
        alt((
            value(TokenKind::LParen, char('(')),
            value(TokenKind::RParen, char(')')),
            value(TokenKind::LBrace, char('{')),
            value(TokenKind::RBrace, char('}')),
            value(TokenKind::LBracket, char('[')),
            value(TokenKind::RBracket, char(']')),
            value(TokenKind::Dot, char('.')),
            value(TokenKind::Comma, char(',')),
            value(TokenKind::Semicolon, char(';')),
            value(TokenKind::Question, char('?')),
            value(TokenKind::Colon, char(':')),
            value(TokenKind::Plus, char('+')),
            value(TokenKind::Minus, char('-')),
            value(TokenKind::Star, char('*')),
            value(TokenKind::Slash, char('/')),
            value(TokenKind::Percent, char('%')),
            value(TokenKind::BitwiseOr, char('|')),
            value(TokenKind::BitwiseXor, char('^')),
            value(TokenKind::BitwiseAnd, char('&')),
            value(TokenKind::BitwiseNot, char('~')),
            value(TokenKind::LogicalNot, char('!')),
        )),
        alt((
            value(TokenKind::Eq, char('=')),
            value(TokenKind::Gt, char('>')),
            value(TokenKind::Lt, char('<')),
        )),
    ))(input)
}

fn parse_token(input: &str) -> IResult<&str, TokenKind> {
    alt((
        parse_trivia,
        parse_float,
        parse_int,
        parse_word,
        parse_directive,
        parse_operator,
        // An unterminated block comment swallows the rest of the input.
        value(TokenKind::Invalid, recognize(pair(tag("/*"), take_while(|_: char| true)))),
        value(TokenKind::Invalid, recognize(anychar)),
    ))(input)
}

/// An on-demand tokenizer over a source string. Tokens are produced one at a
/// time; the lexer position can be saved and restored for backtracking.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    source: &'a str,
    offset: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer { source, offset: 0 }
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    pub fn next(&mut self) -> Token {
        let remaining = &self.source[self.offset..];
        if remaining.is_empty() {
            return Token::new(TokenKind::EndOfFile, self.offset, 0);
        }
        let start = self.offset;
        let (rest, kind) = match parse_token(remaining) {
            Ok(result) => result,
            // `anychar` always matches non-empty input.
            Err(_) => (&remaining[remaining.len()..], TokenKind::Invalid),
        };
        self.offset = self.source.len() - rest.len();
        Token::new(kind, start, self.offset - start)
    }

    pub fn text(&self, token: Token) -> &'a str {
        let start = (token.offset as usize).min(self.source.len());
        let end = token.end().min(self.source.len());
        &self.source[start..end]
    }

    pub fn checkpoint(&self) -> usize {
        self.offset
    }

    pub fn rewind_to(&mut self, offset: usize) {
        self.offset = offset;
    }
}

/// Tokenizes the whole input, dropping trivia.
pub fn tokenize(input: &str) -> Vec<(TokenKind, &str)> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next();
        if token.kind == TokenKind::EndOfFile {
            break;
        }
        if !token.kind.is_trivia() {
            tokens.push((token.kind, lexer.text(token)));
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use TokenKind::*;

    #[test]
    fn test_tokenize_keywords() {
        let tokens = tokenize("if else for uniform const");
        assert_eq!(
            tokens,
            vec![(If, "if"), (Else, "else"), (For, "for"), (Uniform, "uniform"), (Const, "const")]
        );
    }

    #[test]
    fn test_keyword_prefix_is_identifier() {
        let tokens = tokenize("iffy format constant");
        assert_eq!(
            tokens,
            vec![(Identifier, "iffy"), (Identifier, "format"), (Identifier, "constant")]
        );
    }

    #[test]
    fn test_tokenize_numbers() {
        let tokens = tokenize("1 1.5 .25 3e2 2.f 0x1F 7u 1.0e-3");
        assert_eq!(
            tokens,
            vec![
                (IntLiteral, "1"),
                (FloatLiteral, "1.5"),
                (FloatLiteral, ".25"),
                (FloatLiteral, "3e2"),
                (FloatLiteral, "2.f"),
                (IntLiteral, "0x1F"),
                (IntLiteral, "7u"),
                (FloatLiteral, "1.0e-3"),
            ]
        );
    }

    #[test]
    fn test_tokenize_operators() {
        let tokens = tokenize("a <<= b >> c != d ^^ e");
        let kinds: Vec<_> = tokens.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            kinds,
            vec![Identifier, ShlEq, Identifier, Shr, Identifier, Neq, Identifier, LogicalXor, Identifier]
        );
    }

    #[test]
    fn test_swizzle_after_dot() {
        let tokens = tokenize("v.xy");
        assert_eq!(tokens, vec![(Identifier, "v"), (Dot, "."), (Identifier, "xy")]);
    }

    #[test]
    fn test_comments_and_directives() {
        let tokens = tokenize("#version 300 // trailing\n/* block */ x");
        assert_eq!(
            tokens,
            vec![(Directive, "#version"), (IntLiteral, "300"), (Identifier, "x")]
        );
    }

    #[test]
    fn test_trivia_is_kept_by_lexer() {
        let mut lexer = Lexer::new("a \n b");
        let kinds: Vec<_> = std::iter::from_fn(|| {
            let t = lexer.next();
            (t.kind != EndOfFile).then_some(t.kind)
        })
        .collect();
        assert_eq!(kinds, vec![Identifier, Whitespace, Identifier]);
    }

    #[test]
    fn test_reserved_and_invalid() {
        let tokens = tokenize("goto @");
        assert_eq!(tokens, vec![(Reserved, "goto"), (Invalid, "@")]);
    }

    #[test]
    fn test_checkpoint_rewind() {
        let mut lexer = Lexer::new("a b");
        let cp = lexer.checkpoint();
        let first = lexer.next();
        lexer.next();
        lexer.rewind_to(cp);
        assert_eq!(lexer.next(), first);
    }
}
