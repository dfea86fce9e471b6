use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use log::debug;

use crate::parser::{FirstSets, Grammar, Item, ItemSet, EOF, EPS};
use crate::Error;

/// A dense index identifying one LR state of the canonical collection.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct StateId(u32);

impl StateId {
    /// The initial state every parse starts in.
    pub const INITIAL: Self = Self(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One action of the LR automaton.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LrAction {
    /// Shift the look-ahead and enter the given state.
    Shift(StateId),
    /// Reduce by the production with the given index.
    Reduce(usize),
    /// Reduce by the given start production and stop successfully.
    Accept(usize),
}

impl LrAction {
    /// The production behind a reduce-kind action, if any.
    fn rule(&self) -> Option<usize> {
        match self {
            Self::Shift(_) => None,
            Self::Reduce(rule) | Self::Accept(rule) => Some(*rule),
        }
    }
}

impl fmt::Display for LrAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shift(state) => write!(f, "Shift({state})"),
            Self::Reduce(rule) => write!(f, "Reduce({rule})"),
            Self::Accept(rule) => write!(f, "Accept({rule})"),
        }
    }
}

/// Mapping `(state, terminal) -> action`.
pub type ActionTable = BTreeMap<(StateId, String), LrAction>;

/// Mapping `(state, nonterminal) -> successor state`.
pub type GotoTable = BTreeMap<(StateId, String), StateId>;

/// The finished, read-only parse tables of a grammar.
#[derive(Debug)]
pub struct ParseTables {
    pub actions: ActionTable,
    pub gotos: GotoTable,
    pub start_symbol: String,
    /// Number of states in the canonical collection.
    pub state_count: usize,
}

/// Interns item sets behind dense [`StateId`]s.
///
/// Structural equality of closures is what makes a state id unique, so the
/// interner keys a map by the full sorted item set.
#[derive(Debug, Default)]
struct StateInterner {
    set2id: BTreeMap<ItemSet, StateId>,
    sets: Vec<ItemSet>,
}

impl StateInterner {
    /// Interns `set`, returning its id and whether it was newly added.
    fn intern(&mut self, set: ItemSet) -> (StateId, bool) {
        match self.set2id.get(&set) {
            Some(id) => (*id, false),
            None => {
                let id = StateId(self.sets.len() as u32);
                self.set2id.insert(set.clone(), id);
                self.sets.push(set);
                (id, true)
            }
        }
    }

    fn get(&self, id: StateId) -> &ItemSet {
        &self.sets[id.index()]
    }

    fn len(&self) -> usize {
        self.sets.len()
    }
}

/// Constructs LALR(1) action and goto tables from a grammar.
pub struct TableBuilder<'g, V> {
    grammar: &'g Grammar<V>,
    first: FirstSets,
}

impl<'g, V> TableBuilder<'g, V> {
    /// Checks the grammar and computes its FIRST sets.
    pub fn new(grammar: &'g Grammar<V>) -> Result<Self, Error> {
        grammar.check_symbols()?;
        let first = FirstSets::of(grammar)?;
        Ok(Self { grammar, first })
    }

    /// Expands `items` to its LR(1) closure under epsilon moves.
    pub fn closure(&self, items: BTreeSet<Item>) -> ItemSet {
        let mut closed = items;
        let mut worklist: VecDeque<Item> = closed.iter().cloned().collect();
        while let Some(item) = worklist.pop_front() {
            let symbols = &self.grammar.productions()[item.production].symbols;
            let Some(next) = item.next(symbols) else {
                continue;
            };
            if !self.grammar.is_nonterminal(next) {
                continue;
            }
            let look_aheads = self.follow_candidates(&item, symbols);
            for &production in self.grammar.productions_for(next) {
                for look_ahead in &look_aheads {
                    let candidate = Item::new(production, 0, look_ahead.clone());
                    if closed.insert(candidate.clone()) {
                        worklist.push_back(candidate);
                    }
                }
            }
        }
        closed.into_iter().collect()
    }

    /// Look-ahead terminals for items derived from `item`.
    ///
    /// This is `FIRST` of the symbol directly after the nonterminal under
    /// the dot; an [`EPS`] entry stands for "nothing follows" and is
    /// replaced by the item's own inherited look-ahead.
    fn follow_candidates(&self, item: &Item, symbols: &[String]) -> BTreeSet<String> {
        let mut candidates = self.first.first(item.next_next(symbols)).clone();
        if candidates.remove(EPS) {
            candidates.insert(item.look_ahead.clone());
        }
        candidates
    }

    /// The closure of the start items `[S -> .gamma, EOF]`.
    pub fn initial_item_set(&self) -> ItemSet {
        let items = self
            .grammar
            .productions_for(self.grammar.start_symbol())
            .iter()
            .map(|&production| Item::new(production, 0, EOF))
            .collect();
        self.closure(items)
    }

    /// `GOTO(items, symbol)`: shift every applicable item and close.
    pub fn next_item_set(&self, items: &ItemSet, symbol: &str) -> ItemSet {
        let shifted = items
            .iter()
            .filter(|item| {
                let symbols = &self.grammar.productions()[item.production].symbols;
                item.can_shift_over(symbol, symbols)
            })
            .map(Item::shifted)
            .collect();
        self.closure(shifted)
    }

    /// Enumerates the canonical collection breadth-first, interning each
    /// discovered item set and recording all transitions.
    fn canonical_collection(&self) -> (StateInterner, BTreeMap<(StateId, String), StateId>) {
        let mut interner = StateInterner::default();
        let mut transitions = BTreeMap::new();
        let mut worklist = VecDeque::new();

        let (initial, _) = interner.intern(self.initial_item_set());
        worklist.push_back(initial);
        while let Some(state) = worklist.pop_front() {
            let items = interner.get(state).clone();
            for symbol in self.grammar.symbols() {
                let successor = self.next_item_set(&items, symbol);
                if successor.is_empty() {
                    continue;
                }
                let (successor_id, fresh) = interner.intern(successor);
                if fresh {
                    worklist.push_back(successor_id);
                }
                transitions.insert((state, symbol.to_string()), successor_id);
            }
        }
        (interner, transitions)
    }

    /// Emits the action and goto tables.
    pub fn build(&self) -> Result<ParseTables, Error> {
        let (states, transitions) = self.canonical_collection();
        debug!("canonical collection has {} states", states.len());

        let mut actions = ActionTable::new();
        let mut gotos = GotoTable::new();
        for (index, items) in states.sets.iter().enumerate() {
            let state = StateId(index as u32);
            for item in items.iter() {
                let production = &self.grammar.productions()[item.production];
                if let Some(next) = item.next(&production.symbols) {
                    if self.grammar.is_terminal(next) {
                        let successor = transitions[&(state, next.to_string())];
                        self.set_action(
                            &mut actions,
                            state,
                            next,
                            LrAction::Shift(successor),
                        )?;
                    }
                } else {
                    let action = if production.lhs == self.grammar.start_symbol()
                        && item.look_ahead == EOF
                    {
                        LrAction::Accept(item.production)
                    } else {
                        LrAction::Reduce(item.production)
                    };
                    self.set_action(&mut actions, state, &item.look_ahead, action)?;
                }
            }
            for nonterminal in self.grammar.nonterminals() {
                let key = (state, nonterminal.to_string());
                if let Some(&successor) = transitions.get(&key) {
                    gotos.insert(key, successor);
                }
            }
        }

        debug!(
            "emitted {} actions and {} gotos",
            actions.len(),
            gotos.len()
        );
        Ok(ParseTables {
            actions,
            gotos,
            start_symbol: self.grammar.start_symbol().to_string(),
            state_count: states.len(),
        })
    }

    /// Writes `action` into the table, resolving shift/reduce collisions in
    /// favor of the shift and failing on anything else.
    fn set_action(
        &self,
        actions: &mut ActionTable,
        state: StateId,
        terminal: &str,
        action: LrAction,
    ) -> Result<(), Error> {
        use LrAction::{Reduce, Shift};

        let key = (state, terminal.to_string());
        let Some(&existing) = actions.get(&key) else {
            actions.insert(key, action);
            return Ok(());
        };
        if existing == action {
            return Ok(());
        }
        match (existing, action) {
            // Default shift preference, in either arrival order.
            (Reduce(_) | LrAction::Accept(_), Shift(_)) => {
                actions.insert(key, action);
                Ok(())
            }
            (Shift(_), Reduce(_) | LrAction::Accept(_)) => Ok(()),
            _ => Err(Error::GrammarConflict {
                first: action,
                second: existing,
                production_a: self.render_rule(action, terminal),
                production_b: self.render_rule(existing, terminal),
            }),
        }
    }

    fn render_rule(&self, action: LrAction, terminal: &str) -> String {
        match action.rule() {
            Some(rule) => self.grammar.productions()[rule].to_string(),
            None => format!("shift on '{terminal}'"),
        }
    }
}
