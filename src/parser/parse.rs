use std::fmt;

use crate::parser::{Grammar, LrAction, ParseTables, StateId, EOF};
use crate::Error;

/// A lexed token: a type tag matching a grammar terminal, the matched
/// text and its position in the input.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Token {
    /// Type tag, matched against grammar terminals.
    pub kind: String,
    /// The matched text payload.
    pub text: String,
    /// Position of the token as reported by the lexer.
    pub position: u32,
}

impl Token {
    pub fn new(kind: &str, text: &str, position: u32) -> Self {
        Self {
            kind: kind.to_string(),
            text: text.to_string(),
            position,
        }
    }

    /// The end-of-input token.
    pub fn eof(position: u32) -> Self {
        Self::new(EOF, "", position)
    }

    pub fn is_eof(&self) -> bool {
        self.kind == EOF
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.text)
    }
}

/// The lexer contract of the parser driver.
///
/// End of input is reported as a token whose kind is [`EOF`], repeatedly
/// if polled again.
pub trait Lexer {
    fn next_token(&mut self) -> Token;
}

/// A ready-made [`Lexer`] over an owned token vector.
///
/// Yields [`EOF`] tokens forever once the vector is exhausted, so drivers
/// never see a truncated stream.
#[derive(Debug)]
pub struct TokenStream {
    tokens: std::vec::IntoIter<Token>,
    end: u32,
}

impl TokenStream {
    pub fn new(tokens: Vec<Token>) -> Self {
        let end = tokens.last().map(|token| token.position + 1).unwrap_or(0);
        Self {
            tokens: tokens.into_iter(),
            end,
        }
    }
}

impl Lexer for TokenStream {
    fn next_token(&mut self) -> Token {
        self.tokens.next().unwrap_or_else(|| Token::eof(self.end))
    }
}

/// A value on the semantic stack: the token itself for terminals, the
/// result of a production's action for nonterminals.
#[derive(Debug)]
pub enum SemValue<V> {
    Token(Token),
    Reduced(Option<V>),
}

/// The table-driven LR automaton.
///
/// Holds the read-only tables plus a reference to the grammar whose
/// productions supply reduction arities and semantic actions.
pub struct LrParser<'g, V> {
    grammar: &'g Grammar<V>,
    tables: ParseTables,
}

impl<'g, V> LrParser<'g, V> {
    pub fn new(grammar: &'g Grammar<V>, tables: ParseTables) -> Self {
        Self { grammar, tables }
    }

    /// Builds the tables for `grammar` and wraps them in a parser.
    pub fn generate(grammar: &'g Grammar<V>) -> Result<Self, Error> {
        let tables = grammar.build()?;
        Ok(Self::new(grammar, tables))
    }

    pub fn tables(&self) -> &ParseTables {
        &self.tables
    }

    /// Parses a token stream into the semantic value of the start symbol.
    ///
    /// The parse stack holds `(symbol, state)` pairs over the implicit
    /// initial state; the semantic stack runs in lock-step with it. There
    /// is no error recovery: the first missing action aborts the parse.
    pub fn parse(&self, lexer: &mut dyn Lexer) -> Result<Option<V>, Error> {
        let mut parse_stack: Vec<(String, StateId)> = Vec::new();
        let mut sem_stack: Vec<SemValue<V>> = Vec::new();
        let mut look_ahead = lexer.next_token();
        loop {
            let state = top_state(&parse_stack);
            let action = self
                .tables
                .actions
                .get(&(state, look_ahead.kind.clone()))
                .copied()
                .ok_or_else(|| Error::Parse {
                    position: look_ahead.position,
                    token: look_ahead.to_string(),
                })?;
            match action {
                LrAction::Shift(next) => {
                    parse_stack.push((look_ahead.kind.clone(), next));
                    sem_stack.push(SemValue::Token(look_ahead));
                    look_ahead = lexer.next_token();
                }
                LrAction::Reduce(rule) => {
                    let value = self.reduce(rule, &mut parse_stack, &mut sem_stack);
                    let lhs = &self.grammar.productions()[rule].lhs;
                    let state = top_state(&parse_stack);
                    let goto = self
                        .tables
                        .gotos
                        .get(&(state, lhs.clone()))
                        .copied()
                        .expect(
                            "a reduce action implies a goto entry for its \
                             left-hand side in the uncovered state; qed",
                        );
                    parse_stack.push((lhs.clone(), goto));
                    sem_stack.push(SemValue::Reduced(value));
                }
                LrAction::Accept(rule) => {
                    let value = self.reduce(rule, &mut parse_stack, &mut sem_stack);
                    return Ok(value);
                }
            }
        }
    }

    /// Pops one `(symbol, state)` pair and one semantic value per
    /// right-hand-side symbol, reverses the values into source order and
    /// applies the production's semantic action.
    fn reduce(
        &self,
        rule: usize,
        parse_stack: &mut Vec<(String, StateId)>,
        sem_stack: &mut Vec<SemValue<V>>,
    ) -> Option<V> {
        let production = &self.grammar.productions()[rule];
        let arity = production.symbols.len();
        let mut args = Vec::with_capacity(arity);
        for _ in 0..arity {
            parse_stack
                .pop()
                .expect("parse and semantic stacks mirror the traced derivation; qed");
            args.push(
                sem_stack
                    .pop()
                    .expect("parse and semantic stacks mirror the traced derivation; qed"),
            );
        }
        args.reverse();
        production.action.as_ref().and_then(|action| action(args))
    }
}

fn top_state(parse_stack: &[(String, StateId)]) -> StateId {
    parse_stack
        .last()
        .map(|(_, state)| *state)
        .unwrap_or(StateId::INITIAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    /// The arithmetic grammar of the table builder tests, with actions
    /// that evaluate the expression over i64.
    fn calculator() -> Grammar<i64> {
        fn value(arg: &SemValue<i64>) -> i64 {
            match arg {
                SemValue::Token(token) => token.text.parse().unwrap(),
                SemValue::Reduced(value) => value.unwrap(),
            }
        }

        let mut grammar = Grammar::new(["+", "*", "(", ")", "id"], "E");
        grammar.add_production(
            "E",
            &["E", "+", "T"],
            Some(Box::new(|args| Some(value(&args[0]) + value(&args[2])))),
        );
        grammar.add_production("E", &["T"], Some(Box::new(|args| Some(value(&args[0])))));
        grammar.add_production(
            "T",
            &["T", "*", "F"],
            Some(Box::new(|args| Some(value(&args[0]) * value(&args[2])))),
        );
        grammar.add_production("T", &["F"], Some(Box::new(|args| Some(value(&args[0])))));
        grammar.add_production(
            "F",
            &["(", "E", ")"],
            Some(Box::new(|args| Some(value(&args[1])))),
        );
        grammar.add_production("F", &["id"], Some(Box::new(|args| Some(value(&args[0])))));
        grammar
    }

    fn tokens(input: &[(&str, &str)]) -> TokenStream {
        TokenStream::new(
            input
                .iter()
                .enumerate()
                .map(|(position, (kind, text))| Token::new(kind, text, position as u32))
                .collect(),
        )
    }

    #[test]
    fn parses_and_evaluates_with_precedence() {
        let grammar = calculator();
        let parser = LrParser::generate(&grammar).unwrap();
        let mut lexer = tokens(&[
            ("id", "1"),
            ("+", "+"),
            ("id", "2"),
            ("*", "*"),
            ("id", "3"),
        ]);
        let result = parser.parse(&mut lexer).unwrap();
        assert_eq!(result, Some(7));
    }

    #[test]
    fn parenthesized_subexpression() {
        let grammar = calculator();
        let parser = LrParser::generate(&grammar).unwrap();
        let mut lexer = tokens(&[
            ("(", "("),
            ("id", "1"),
            ("+", "+"),
            ("id", "2"),
            (")", ")"),
            ("*", "*"),
            ("id", "3"),
        ]);
        assert_eq!(parser.parse(&mut lexer).unwrap(), Some(9));
    }

    #[test]
    fn stray_token_is_a_parse_error() {
        let grammar = calculator();
        let parser = LrParser::generate(&grammar).unwrap();
        let mut lexer = tokens(&[("id", "1"), ("+", "+"), ("+", "+")]);
        assert_matches!(
            parser.parse(&mut lexer),
            Err(Error::Parse { position: 2, ref token }) if token.contains('+')
        );
    }

    #[test]
    fn premature_eof_is_a_parse_error() {
        let grammar = calculator();
        let parser = LrParser::generate(&grammar).unwrap();
        let mut lexer = tokens(&[("id", "1"), ("+", "+")]);
        assert_matches!(parser.parse(&mut lexer), Err(Error::Parse { .. }));
    }

    #[test]
    fn productions_without_actions_reduce_to_none() {
        let mut grammar = Grammar::<i64>::new(["x"], "S");
        grammar.add_production("S", &["x"], None);
        let parser = LrParser::generate(&grammar).unwrap();
        let mut lexer = tokens(&[("x", "x")]);
        assert_eq!(parser.parse(&mut lexer).unwrap(), None);
    }

    #[test]
    fn token_stream_repeats_eof() {
        let mut lexer = tokens(&[("x", "x")]);
        assert_eq!(lexer.next_token().kind, "x");
        assert!(lexer.next_token().is_eof());
        assert!(lexer.next_token().is_eof());
    }
}
