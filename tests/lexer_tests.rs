//! Lexer tests

use initsafe::lexer::{TokenKind, lex};

#[test]
fn test_lex_empty() {
    let tokens = lex("").unwrap();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].kind, TokenKind::Eof);
}

#[test]
fn test_lex_whitespace_and_comments() {
    let tokens = lex("  // line\n /* block */ \t").unwrap();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].kind, TokenKind::Eof);
}

#[test]
fn test_lex_field() {
    let tokens = lex("val x = 42").unwrap();
    assert_eq!(tokens[0].kind, TokenKind::Val);
    assert_eq!(tokens[1].kind, TokenKind::Ident);
    assert_eq!(tokens[1].text, "x");
    assert_eq!(tokens[2].kind, TokenKind::Eq);
    assert_eq!(tokens[3].kind, TokenKind::IntLit);
    assert_eq!(tokens[3].text, "42");
}

#[test]
fn test_lex_keywords() {
    let source = "class extends val var def new this super if else while try catch finally return";
    let tokens = lex(source).unwrap();
    let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();

    assert_eq!(
        kinds,
        vec![
            TokenKind::Class,
            TokenKind::Extends,
            TokenKind::Val,
            TokenKind::Var,
            TokenKind::Def,
            TokenKind::New,
            TokenKind::This,
            TokenKind::Super,
            TokenKind::If,
            TokenKind::Else,
            TokenKind::While,
            TokenKind::Try,
            TokenKind::Catch,
            TokenKind::Finally,
            TokenKind::Return,
            TokenKind::Eof,
        ]
    );
    assert!(tokens[..15].iter().all(|t| t.kind.is_keyword()));
}

#[test]
fn test_lex_modifiers() {
    let tokens = lex("final private override abstract lazy @init @partial").unwrap();
    assert_eq!(tokens[0].kind, TokenKind::Final);
    assert_eq!(tokens[5].kind, TokenKind::AtInit);
    assert_eq!(tokens[6].kind, TokenKind::AtPartial);
    assert!(tokens[..7].iter().all(|t| t.kind.is_modifier()));
}

#[test]
fn test_lex_keyword_prefix_is_ident() {
    let tokens = lex("classes value newer").unwrap();
    assert!(tokens[..3].iter().all(|t| t.kind == TokenKind::Ident));
}

#[test]
fn test_lex_operators() {
    let tokens = lex("== != <= >= && || | = ! .").unwrap();
    assert_eq!(tokens[0].kind, TokenKind::EqEq);
    assert_eq!(tokens[1].kind, TokenKind::Ne);
    assert_eq!(tokens[2].kind, TokenKind::Le);
    assert_eq!(tokens[3].kind, TokenKind::Ge);
    assert_eq!(tokens[4].kind, TokenKind::AmpAmp);
    assert_eq!(tokens[5].kind, TokenKind::PipePipe);
    assert_eq!(tokens[6].kind, TokenKind::Pipe);
    assert_eq!(tokens[7].kind, TokenKind::Eq);
    assert_eq!(tokens[8].kind, TokenKind::Bang);
    assert_eq!(tokens[9].kind, TokenKind::Dot);
}

#[test]
fn test_lex_string_literal() {
    let tokens = lex(r#""hello \"world\"""#).unwrap();
    assert_eq!(tokens[0].kind, TokenKind::StringLit);
    assert_eq!(tokens[0].text, r#""hello \"world\"""#);
}

#[test]
fn test_lex_spans() {
    let tokens = lex("class A").unwrap();
    assert_eq!(tokens[0].span.start, 0);
    assert_eq!(tokens[0].span.end, 5);
    assert_eq!(tokens[1].span.start, 6);
    assert_eq!(tokens[2].span.start, 7);
}

#[test]
fn test_lex_invalid_token() {
    assert!(lex("val x = #").is_err());
}
