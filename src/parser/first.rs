use std::collections::{BTreeMap, BTreeSet};

use crate::parser::{Grammar, EOF, EPS};
use crate::Error;

/// Per-symbol FIRST sets with nullability flags.
///
/// `FIRST(X)` is the set of terminals that may begin a string derivable
/// from `X`; `nullable(X)` records whether `X` derives the empty string.
/// Terminals, including the [`EOF`] and [`EPS`] sentinels, have themselves
/// as their only FIRST entry and are never nullable.
#[derive(Debug)]
pub struct FirstSets {
    first: BTreeMap<String, BTreeSet<String>>,
    nullable: BTreeMap<String, bool>,
}

impl FirstSets {
    /// Computes the FIRST sets of `grammar` by fixed-point iteration.
    ///
    /// The iteration terminates because both the sets and the flags only
    /// ever grow within a finite lattice.
    pub fn of<V>(grammar: &Grammar<V>) -> Result<Self, Error> {
        let mut first: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut nullable: BTreeMap<String, bool> = BTreeMap::new();
        for terminal in grammar.terminals().chain([EOF, EPS]) {
            first.insert(terminal.to_string(), BTreeSet::from([terminal.to_string()]));
            nullable.insert(terminal.to_string(), false);
        }
        for nonterminal in grammar.nonterminals() {
            first.insert(nonterminal.to_string(), BTreeSet::new());
            nullable.insert(nonterminal.to_string(), false);
        }

        loop {
            let mut changed = false;
            for production in grammar.productions() {
                let all_nullable = production
                    .symbols
                    .iter()
                    .map(|symbol| is_nullable(&nullable, symbol, production))
                    .collect::<Result<Vec<_>, _>>()?
                    .into_iter()
                    .all(|flag| flag);
                if all_nullable && !nullable[&production.lhs] {
                    nullable.insert(production.lhs.clone(), true);
                    changed = true;
                }

                for symbol in &production.symbols {
                    let symbol_nullable = is_nullable(&nullable, symbol, production)?;
                    let mut merged: BTreeSet<String> = first[symbol].clone();
                    if symbol_nullable {
                        merged.remove(EPS);
                    }
                    let target = first.get_mut(&production.lhs).expect(
                        "every nonterminal was seeded with an empty FIRST set above; qed",
                    );
                    let before = target.len();
                    target.extend(merged);
                    if target.len() != before {
                        changed = true;
                    }
                    if !symbol_nullable {
                        break;
                    }
                }
            }
            if !changed {
                return Ok(Self { first, nullable });
            }
        }
    }

    /// Returns `FIRST(symbol)`.
    ///
    /// # Panics
    ///
    /// If `symbol` was not part of the grammar the sets were computed for.
    pub fn first(&self, symbol: &str) -> &BTreeSet<String> {
        &self.first[symbol]
    }

    /// Returns whether `symbol` derives the empty string.
    pub fn is_nullable(&self, symbol: &str) -> bool {
        self.nullable.get(symbol).copied().unwrap_or(false)
    }
}

fn is_nullable<V>(
    nullable: &BTreeMap<String, bool>,
    symbol: &str,
    production: &crate::parser::Production<V>,
) -> Result<bool, Error> {
    nullable.get(symbol).copied().ok_or_else(|| {
        Error::Grammar(format!(
            "undeclared symbol '{symbol}' in production '{production}'"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grammar() -> Grammar<()> {
        // S -> A B x ; A -> a | eps ; B -> b | eps
        let mut grammar = Grammar::new(["a", "b", "x"], "S");
        grammar.add_production("S", &["A", "B", "x"], None);
        grammar.add_production("A", &["a"], None);
        grammar.add_production("A", &[], None);
        grammar.add_production("B", &["b"], None);
        grammar.add_production("B", &[], None);
        grammar
    }

    #[test]
    fn nullable_chain_reaches_through_prefix() {
        let grammar = grammar();
        let sets = FirstSets::of(&grammar).unwrap();
        assert!(sets.is_nullable("A"));
        assert!(sets.is_nullable("B"));
        assert!(!sets.is_nullable("S"));
        let first_s: Vec<_> = sets.first("S").iter().map(String::as_str).collect();
        assert_eq!(first_s, ["a", "b", "x"]);
    }

    #[test]
    fn first_of_terminal_is_itself() {
        let grammar = grammar();
        let sets = FirstSets::of(&grammar).unwrap();
        assert_eq!(sets.first("x").len(), 1);
        assert!(sets.first("x").contains("x"));
        assert!(!sets.is_nullable("x"));
    }

    #[test]
    fn first_subset_law_holds_per_production() {
        // FIRST(beta) \ {EPS} is a subset of FIRST(N) for N -> beta.
        let grammar = grammar();
        let sets = FirstSets::of(&grammar).unwrap();
        for production in grammar.productions() {
            if let Some(head) = production.symbols.first() {
                let mut lead = sets.first(head).clone();
                lead.remove(EPS);
                assert!(
                    lead.is_subset(sets.first(&production.lhs)),
                    "FIRST({head}) not folded into FIRST({})",
                    production.lhs
                );
            }
        }
    }
}
