use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::parser::{ParseTables, SemValue, TableBuilder};
use crate::Error;

/// Sentinel terminal reported by lexers at end of input.
pub const EOF: &str = "EOF";

/// Sentinel terminal denoting the empty string.
pub const EPS: &str = "EPS";

/// A semantic action attached to a production.
///
/// Invoked on reduction with one [`SemValue`] per right-hand-side symbol,
/// in left-to-right order. Returning `None` leaves the reduced nonterminal
/// without a semantic value.
pub type SemanticAction<V> = Box<dyn Fn(Vec<SemValue<V>>) -> Option<V>>;

/// A single production of a context-free grammar.
///
/// The left-hand side is a nonterminal; the right-hand side is an ordered
/// sequence of terminal and nonterminal names. An empty right-hand side
/// denotes an epsilon production.
pub struct Production<V> {
    /// The nonterminal this production reduces to.
    pub lhs: String,
    /// Right-hand-side symbols, terminals and nonterminals mixed.
    pub symbols: Vec<String>,
    /// Optional semantic action, arity equal to `symbols.len()`.
    pub action: Option<SemanticAction<V>>,
}

impl<V> fmt::Display for Production<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.lhs, self.symbols.join(" "))
    }
}

impl<V> fmt::Debug for Production<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Production({self})")
    }
}

/// A context-free grammar over string-named symbols.
///
/// Terminals are declared up front and matched against token type tags;
/// nonterminals are implied by the left-hand sides of productions. The
/// sentinels [`EOF`] and [`EPS`] belong to neither set.
///
/// Grammars are immutable once table construction starts: [`Grammar::build`]
/// takes `&self` and all derived data (first sets, item sets, tables) is
/// owned by the result.
pub struct Grammar<V> {
    terminals: BTreeSet<String>,
    start: String,
    productions: Vec<Production<V>>,
    by_lhs: BTreeMap<String, Vec<usize>>,
}

impl<V> Grammar<V> {
    /// Creates an empty grammar with the given terminal set and start symbol.
    pub fn new<I, S>(terminals: I, start: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            terminals: terminals.into_iter().map(Into::into).collect(),
            start: start.to_string(),
            productions: Vec::new(),
            by_lhs: BTreeMap::new(),
        }
    }

    /// Appends a production for `lhs`.
    ///
    /// An empty `symbols` slice declares an epsilon production.
    pub fn add_production(
        &mut self,
        lhs: &str,
        symbols: &[&str],
        action: Option<SemanticAction<V>>,
    ) {
        let index = self.productions.len();
        self.productions.push(Production {
            lhs: lhs.to_string(),
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            action,
        });
        self.by_lhs.entry(lhs.to_string()).or_default().push(index);
    }

    /// The grammar's start symbol.
    pub fn start_symbol(&self) -> &str {
        &self.start
    }

    /// All productions in declaration order.
    pub fn productions(&self) -> &[Production<V>] {
        &self.productions
    }

    /// Indices of the productions whose left-hand side is `name`.
    pub fn productions_for(&self, name: &str) -> &[usize] {
        self.by_lhs.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The declared terminals, excluding the [`EOF`]/[`EPS`] sentinels.
    pub fn terminals(&self) -> impl Iterator<Item = &str> {
        self.terminals.iter().map(String::as_str)
    }

    /// The nonterminals, i.e. every symbol with at least one production.
    pub fn nonterminals(&self) -> impl Iterator<Item = &str> {
        self.by_lhs.keys().map(String::as_str)
    }

    /// The symbol universe: terminals followed by nonterminals.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.terminals().chain(self.nonterminals())
    }

    pub fn is_terminal(&self, symbol: &str) -> bool {
        self.terminals.contains(symbol)
    }

    pub fn is_nonterminal(&self, symbol: &str) -> bool {
        self.by_lhs.contains_key(symbol)
    }

    /// Checks that the start symbol can be derived and that every symbol
    /// occurring on a right-hand side is declared.
    pub(crate) fn check_symbols(&self) -> Result<(), Error> {
        if self.productions_for(&self.start).is_empty() {
            return Err(Error::Grammar(format!(
                "start symbol '{}' has no productions",
                self.start
            )));
        }
        for production in &self.productions {
            for symbol in &production.symbols {
                if !self.is_terminal(symbol) && !self.is_nonterminal(symbol) {
                    return Err(Error::Grammar(format!(
                        "undeclared symbol '{symbol}' in production '{production}'"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Builds the LALR(1) action and goto tables for this grammar.
    pub fn build(&self) -> Result<ParseTables, Error> {
        TableBuilder::new(self)?.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn undeclared_symbol_is_rejected() {
        let mut grammar = Grammar::<()>::new(["x"], "S");
        grammar.add_production("S", &["x", "y"], None);
        assert_matches!(
            grammar.check_symbols(),
            Err(Error::Grammar(message)) if message.contains("'y'")
        );
    }

    #[test]
    fn missing_start_is_rejected() {
        let mut grammar = Grammar::<()>::new(["x"], "S");
        grammar.add_production("A", &["x"], None);
        assert_matches!(
            grammar.check_symbols(),
            Err(Error::Grammar(message)) if message.contains("start symbol")
        );
    }

    #[test]
    fn symbol_universe_is_partitioned() {
        let mut grammar = Grammar::<()>::new(["a", "b"], "S");
        grammar.add_production("S", &["A", "b"], None);
        grammar.add_production("A", &["a"], None);
        assert!(grammar.is_terminal("a"));
        assert!(grammar.is_nonterminal("A"));
        assert!(!grammar.is_terminal("A"));
        assert_eq!(grammar.symbols().count(), 4);
    }
}
