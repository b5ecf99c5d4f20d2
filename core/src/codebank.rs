// codebank.rs — Read-only atom pool (§7.2).
//
// The source of donor statements for `append`/`swap`/`replace_subatom`
// mutations: every traceable statement body drawn from the original
// program's own statement map, indexed so a mutation can cheaply pick
// "any atom" or "an atom compatible with this one's surrounding scope."
//
// Preconditions: `map` is the pristine `StatementMap` produced by
// `instrument::number_statements` for the program under repair.
// Postconditions: `Codebank` never mutates after construction — every
// accessor borrows.
// Failure modes: none.
// Side effects: none.

use crate::ast::StmtKind;
use crate::id::Sid;
use crate::instrument::StatementMap;

/// An immutable pool of candidate statement bodies, keyed by the `Sid`
/// they were originally numbered as. Genetic-search mutations draw
/// replacement/insertion material from here rather than synthesizing new
/// code, per §7.2's "atoms are always real statements from the program
/// under repair."
pub struct Codebank {
    atoms: Vec<(Sid, StmtKind)>,
}

impl Codebank {
    pub fn from_statement_map(map: &StatementMap) -> Self {
        Self {
            atoms: map.iter().map(|(&sid, kind)| (sid, kind.clone())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn get(&self, sid: Sid) -> Option<&StmtKind> {
        self.atoms.iter().find(|(s, _)| *s == sid).map(|(_, k)| k)
    }

    /// All atoms in ascending `Sid` order — the deterministic iteration
    /// order genetic-search mutation selection relies on once a random
    /// index has been chosen by the caller (§7.2; this crate does not
    /// itself own a source of randomness, see DESIGN.md).
    pub fn atoms(&self) -> impl Iterator<Item = (Sid, &StmtKind)> {
        self.atoms.iter().map(|(s, k)| (*s, k))
    }

    /// The atom at position `index` in ascending-`Sid` order, used by a
    /// caller that has already picked an index (e.g. `index % len()`).
    pub fn nth(&self, index: usize) -> Option<(Sid, &StmtKind)> {
        self.atoms.get(index).map(|(s, k)| (*s, k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;

    fn map() -> StatementMap {
        let mut m = StatementMap::new();
        m.insert(Sid(1), StmtKind::Return(Some(Expr::IntLit(1))));
        m.insert(Sid(2), StmtKind::Return(Some(Expr::IntLit(2))));
        m
    }

    #[test]
    fn iterates_in_ascending_sid_order() {
        let bank = Codebank::from_statement_map(&map());
        let sids: Vec<_> = bank.atoms().map(|(s, _)| s).collect();
        assert_eq!(sids, vec![Sid(1), Sid(2)]);
    }

    #[test]
    fn get_and_nth_agree() {
        let bank = Codebank::from_statement_map(&map());
        assert_eq!(bank.get(Sid(2)), bank.nth(1).map(|(_, k)| k));
        assert_eq!(bank.len(), 2);
        assert!(!bank.is_empty());
    }
}
