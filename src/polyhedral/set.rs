//! Integer sets and relations.
//!
//! An [`IntegerSet`] is a finite union of constraint systems over a space.
//! Sets over a map space are relations: the first `n_in` variables are the
//! domain, the remaining ones the range.

use crate::polyhedral::constraint::{Constraint, ConstraintSystem};
use crate::polyhedral::expr::AffineExpr;
use crate::polyhedral::map::AffineMap;
use crate::polyhedral::operations::{eliminate_vars, is_system_empty};
use crate::polyhedral::space::{Param, Space};
use crate::polyhedral::Int;
use log::debug;
use std::collections::BTreeSet;
use std::fmt;

/// A union of integer polyhedra over a space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IntegerSet {
    /// Space of the set
    pub space: Space,
    /// Disjuncts of the union
    pub pieces: Vec<ConstraintSystem>,
}

impl IntegerSet {
    /// The set of all points of a space.
    pub fn universe(space: Space) -> Self {
        let n = space.dim();
        Self { space, pieces: vec![ConstraintSystem::new(n)] }
    }

    /// The empty set of a space.
    pub fn empty(space: Space) -> Self {
        Self { space, pieces: Vec::new() }
    }

    /// A set described by a single conjunction.
    pub fn from_system(space: Space, system: ConstraintSystem) -> Self {
        assert_eq!(space.dim(), system.n_var, "system does not match space {}", space);
        let mut set = Self { space, pieces: vec![system] };
        set.drop_empty_pieces();
        set
    }

    /// A set described by a conjunction of constraints.
    pub fn from_constraints(space: Space, constraints: impl IntoIterator<Item = Constraint>) -> Self {
        let n = space.dim();
        Self::from_system(space, ConstraintSystem::from_constraints(n, constraints))
    }

    /// Number of set dimensions.
    pub fn dim(&self) -> usize {
        self.space.dim()
    }

    /// Reinterpret the set in another space of the same dimension.
    pub fn with_space(mut self, space: Space) -> Self {
        assert_eq!(self.dim(), space.dim(), "cannot move set {} to space {}", self.space, space);
        self.space = space;
        self
    }

    fn drop_empty_pieces(&mut self) {
        self.pieces.retain(|p| !is_system_empty(p));
    }

    /// Add a constraint to every piece.
    pub fn add_constraint(&mut self, constraint: Constraint) {
        for piece in &mut self.pieces {
            piece.add(constraint.clone());
        }
        self.drop_empty_pieces();
    }

    /// Intersection with another set of the same dimension.
    pub fn intersect(&self, other: &IntegerSet) -> IntegerSet {
        assert_eq!(self.dim(), other.dim(), "intersecting {} with {}", self.space, other.space);
        let mut pieces = Vec::new();
        for a in &self.pieces {
            for b in &other.pieces {
                let piece = a.intersect(b);
                if !is_system_empty(&piece) {
                    pieces.push(piece);
                }
            }
        }
        IntegerSet { space: self.space.clone(), pieces }
    }

    /// Intersection with a single conjunction.
    pub fn intersect_system(&self, system: &ConstraintSystem) -> IntegerSet {
        let n = self.dim();
        self.intersect(&IntegerSet { space: Space::set_of_dim(n), pieces: vec![system.clone()] })
    }

    /// Union with another set of the same dimension.
    pub fn union(&self, other: &IntegerSet) -> IntegerSet {
        assert_eq!(self.dim(), other.dim(), "union of {} and {}", self.space, other.space);
        let mut result = self.clone();
        for piece in &other.pieces {
            if !result.pieces.contains(piece) {
                result.pieces.push(piece.clone());
            }
        }
        result
    }

    /// Set difference.
    pub fn subtract(&self, other: &IntegerSet) -> IntegerSet {
        assert_eq!(self.dim(), other.dim());
        let mut remaining = self.pieces.clone();
        for b in &other.pieces {
            let mut next = Vec::new();
            for a in remaining {
                if is_system_empty(&a.intersect(b)) {
                    next.push(a);
                    continue;
                }
                // a \ b = union over k of (a, c_1, .., c_{k-1}, not c_k)
                let mut prefix = a;
                for c in &b.constraints {
                    for alternative in c.negate() {
                        let mut piece = prefix.clone();
                        piece.add(alternative);
                        if !is_system_empty(&piece) {
                            next.push(piece);
                        }
                    }
                    prefix.add(c.clone());
                }
            }
            remaining = next;
        }
        IntegerSet { space: self.space.clone(), pieces: remaining }
    }

    /// The complement within the space.
    pub fn complement(&self) -> IntegerSet {
        IntegerSet::universe(self.space.clone()).subtract(self)
    }

    /// Is the set provably empty?
    pub fn is_empty(&self) -> bool {
        self.pieces.iter().all(is_system_empty)
    }

    /// Is every point of `self` provably in `other`?
    pub fn is_subset(&self, other: &IntegerSet) -> bool {
        self.subtract(other).is_empty()
    }

    /// Do the two sets contain the same points?
    pub fn is_equal(&self, other: &IntegerSet) -> bool {
        self.is_subset(other) && other.is_subset(self)
    }

    /// Is the set the whole space?
    pub fn is_universe(&self) -> bool {
        self.pieces.iter().any(ConstraintSystem::is_universe)
    }

    /// Membership test; points whose parameters have no value are not members.
    pub fn contains(&self, point: &[Int], params: &dyn Fn(&Param) -> Option<Int>) -> bool {
        self.pieces.iter().any(|p| p.is_satisfied(point, params) == Some(true))
    }

    /// Membership test for sets without parameters.
    pub fn contains_point(&self, point: &[Int]) -> bool {
        self.contains(point, &|_| None)
    }

    /// The set of points `x` such that `map(x)` is in `self`.
    pub fn preimage(&self, map: &AffineMap) -> IntegerSet {
        assert_eq!(map.n_out(), self.dim(), "preimage of {} under map to {}", self.space, map.space);
        let n_in = map.n_in();
        let pieces = self.pieces.iter().map(|p| p.pullback(&map.outputs, n_in)).collect();
        let mut result = IntegerSet { space: map.domain_space(), pieces };
        result.drop_empty_pieces();
        result
    }

    /// Insert `n` unconstrained variables before position `pos`.
    pub fn insert_dims(&self, pos: usize, n: usize, space: Space) -> IntegerSet {
        assert_eq!(space.dim(), self.dim() + n);
        let map = AffineMap::drop_dims(space, pos, n, self.space.clone());
        self.preimage(&map)
    }

    /// Project out the variables `first..first + n`, returning `None` if the
    /// projection cannot be computed exactly.
    pub fn project_out_exact(&self, first: usize, n: usize, space: Space) -> Option<IntegerSet> {
        assert_eq!(space.dim() + n, self.dim());
        let mut pieces = Vec::new();
        for piece in &self.pieces {
            let elimination = eliminate_vars(piece, first, n);
            if !elimination.exact {
                return None;
            }
            pieces.push(elimination.system);
        }
        let mut result = IntegerSet { space, pieces };
        result.drop_empty_pieces();
        Some(result)
    }

    /// Project out the variables `first..first + n`.  When the projection
    /// cannot be computed exactly, the result over-approximates it.
    pub fn project_out(&self, first: usize, n: usize, space: Space) -> IntegerSet {
        assert_eq!(space.dim() + n, self.dim());
        let mut pieces = Vec::new();
        let mut exact = true;
        for piece in &self.pieces {
            let elimination = eliminate_vars(piece, first, n);
            exact &= elimination.exact;
            pieces.push(elimination.system);
        }
        if !exact {
            debug!("projection of {} over-approximated", self.space);
        }
        let mut result = IntegerSet { space, pieces };
        result.drop_empty_pieces();
        result
    }

    /// Domain of a relation.
    pub fn domain(&self) -> IntegerSet {
        let n_in = self.space.n_in();
        self.project_out(n_in, self.space.n_out(), self.space.domain_space())
    }

    /// Range of a relation (or the set itself).
    pub fn range(&self) -> IntegerSet {
        let n_in = self.space.n_in();
        self.project_out(0, n_in, self.space.range_space())
    }

    /// Turn a relation into a set over the wrapped space.
    pub fn wrap(self) -> IntegerSet {
        let space = self.space.wrap();
        self.with_space(space)
    }

    /// Turn a set over a wrapped space back into a relation.
    pub fn unwrap(self) -> IntegerSet {
        let space = self.space.unwrap().expect("unwrapping a set that does not wrap a relation");
        self.with_space(space)
    }

    /// Relation from a set over `domain` to the points of `self`.
    pub fn from_domain_and_range(domain: &IntegerSet, range: &IntegerSet) -> IntegerSet {
        let space = Space::map_from_sets(&domain.space, &range.space);
        let n_in = domain.dim();
        let n_out = range.dim();
        let d = domain.insert_dims(n_in, n_out, space.clone());
        let r = range.insert_dims(0, n_in, space);
        d.intersect(&r)
    }

    /// Intersect the domain of a relation with a set.
    pub fn intersect_domain(&self, domain: &IntegerSet) -> IntegerSet {
        let extended = domain.insert_dims(self.space.n_in(), self.space.n_out(), self.space.clone());
        self.intersect(&extended)
    }

    /// Substitute a parameter by an expression over the set variables.
    pub fn substitute_param(&self, param: &Param, value: &AffineExpr) -> IntegerSet {
        let pieces = self.pieces.iter().map(|p| p.substitute_param(param, value)).collect();
        let mut result = IntegerSet { space: self.space.clone(), pieces };
        result.drop_empty_pieces();
        result
    }

    /// Drop every constraint involving a parameter satisfying `pred`.
    pub fn drop_constraints_involving(&self, pred: &dyn Fn(&Param) -> bool) -> IntegerSet {
        let pieces = self.pieces.iter()
            .map(|p| p.drop_constraints_where(|c| c.expr.involves_param_where(pred)))
            .collect();
        IntegerSet { space: self.space.clone(), pieces }
    }

    /// Does a parameter satisfying `pred` occur in any disjunct?
    pub fn involves_param_where(&self, pred: &dyn Fn(&Param) -> bool) -> bool {
        self.pieces.iter().any(|p| p.involves_param_where(pred))
    }

    /// Add the parameters of every disjunct to `out`.
    pub fn collect_params(&self, out: &mut BTreeSet<Param>) {
        for piece in &self.pieces {
            piece.collect_params(out);
        }
    }

    /// Simplify the set assuming `context` holds: pieces disjoint from the
    /// context are dropped together with constraints the context implies.
    pub fn gist(&self, context: &IntegerSet) -> IntegerSet {
        assert_eq!(self.dim(), context.dim());
        let mut pieces = Vec::new();
        for piece in &self.pieces {
            if context.intersect_system(piece).is_empty() {
                continue;
            }
            let mut kept: Vec<Constraint> = piece.constraints.clone();
            let mut i = 0;
            while i < kept.len() {
                let others = ConstraintSystem::from_constraints(
                    piece.n_var,
                    kept.iter().enumerate().filter(|(j, _)| *j != i).map(|(_, c)| c.clone()),
                );
                let implied = context.pieces.iter().all(|cp| {
                    let base = cp.intersect(&others);
                    kept[i].negate().into_iter().all(|alt| {
                        let mut test = base.clone();
                        test.add(alt);
                        is_system_empty(&test)
                    })
                });
                if implied {
                    kept.remove(i);
                } else {
                    i += 1;
                }
            }
            let simplified = ConstraintSystem::from_constraints(piece.n_var, kept);
            if !pieces.contains(&simplified) {
                pieces.push(simplified);
            }
        }
        IntegerSet { space: self.space.clone(), pieces }
    }

    /// Remove duplicate pieces and pieces contained in another piece.
    pub fn coalesce(&self) -> IntegerSet {
        let mut pieces: Vec<ConstraintSystem> = Vec::new();
        for piece in &self.pieces {
            if is_system_empty(piece) || pieces.contains(piece) {
                continue;
            }
            pieces.push(piece.clone());
        }
        let space = self.space.clone();
        let single = |p: &ConstraintSystem| IntegerSet { space: space.clone(), pieces: vec![p.clone()] };
        let mut i = 0;
        while i < pieces.len() {
            let redundant = (0..pieces.len())
                .any(|j| j != i && single(&pieces[i]).is_subset(&single(&pieces[j])));
            if redundant {
                pieces.remove(i);
            } else {
                i += 1;
            }
        }
        IntegerSet { space: self.space.clone(), pieces }
    }

    /// Convert to string with given variable names.
    pub fn to_string_with_names(&self, var_names: &[String]) -> String {
        let mut out = format!("{{ {}", self.space);
        if self.pieces.is_empty() {
            out.push_str(" : false");
        } else if !self.is_universe() {
            out.push_str(" : ");
            let pieces: Vec<String> = self.pieces.iter()
                .map(|p| {
                    p.constraints.iter()
                        .map(|c| c.to_string_with_names(var_names))
                        .collect::<Vec<_>>()
                        .join(" and ")
                })
                .collect();
            out.push_str(&pieces.join(" or "));
        }
        out.push_str(" }");
        out
    }
}

impl fmt::Display for IntegerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let var_names: Vec<String> = (0..self.dim()).map(|i| format!("i{}", i)).collect();
        write!(f, "{}", self.to_string_with_names(&var_names))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polyhedral::space::Tuple;
    use crate::utils::Symbol;

    fn var(i: usize, n: usize) -> AffineExpr {
        AffineExpr::var(i, n)
    }

    /// `{ [i] : lo <= i <= hi }`
    fn interval(lo: Int, hi: Int) -> IntegerSet {
        IntegerSet::from_constraints(Space::set_of_dim(1), [
            Constraint::lower_bound(0, lo, 1),
            Constraint::upper_bound(0, hi, 1),
        ])
    }

    #[test]
    fn test_from_constraints() {
        // { [i, j] : 0 <= j <= i < 10 }
        let set = IntegerSet::from_constraints(Space::set_of_dim(2), [
            Constraint::lower_bound(1, 0, 2),
            Constraint::le(var(1, 2), var(0, 2)),
            Constraint::upper_bound(0, 9, 2),
        ]);
        assert!(set.contains_point(&[0, 0]));
        assert!(set.contains_point(&[9, 9]));
        assert!(!set.contains_point(&[3, 4]));
        assert!(!set.contains_point(&[10, 0]));
    }

    #[test]
    fn test_subtract_and_subset() {
        let big = interval(0, 9);
        let small = interval(0, 4);
        assert!(small.is_subset(&big));
        assert!(!big.is_subset(&small));

        let rest = big.subtract(&small);
        assert!(rest.contains_point(&[7]));
        assert!(!rest.contains_point(&[3]));
        assert!(rest.union(&small).is_equal(&big));
    }

    #[test]
    fn test_complement_of_equality() {
        let space = Space::set_of_dim(1);
        let point = IntegerSet::from_constraints(space, [Constraint::eq(var(0, 1), AffineExpr::constant(3, 1))]);
        let rest = point.complement();
        assert!(rest.contains_point(&[2]));
        assert!(rest.contains_point(&[4]));
        assert!(!rest.contains_point(&[3]));
    }

    #[test]
    fn test_relation_domain_and_range() {
        // { [i] -> A[j] : j = i + 1 and 0 <= i < 4 }
        let space = Space::map(Tuple::anonymous(1), Tuple::named(Symbol::new("A"), 1));
        let rel = IntegerSet::from_constraints(space, [
            Constraint::eq(var(1, 2), var(0, 2).add_constant(1)),
            Constraint::lower_bound(0, 0, 2),
            Constraint::upper_bound(0, 3, 2),
        ]);
        let range = rel.range();
        assert!(range.contains_point(&[1]));
        assert!(range.contains_point(&[4]));
        assert!(!range.contains_point(&[0]));
        assert!(rel.domain().is_equal(&interval(0, 3)));
    }

    #[test]
    fn test_preimage() {
        // { [x] : 0 <= x < 10 } under x = 2i gives 0 <= i <= 4
        let set = interval(0, 9);
        let map = AffineMap::new(Space::set_of_dim(1), Space::set_of_dim(1), vec![var(0, 1).scale(2)]);
        let pre = set.preimage(&map);
        assert!(pre.contains_point(&[4]));
        assert!(!pre.contains_point(&[5]));
    }

    #[test]
    fn test_gist_drops_implied_constraints() {
        let set = IntegerSet::from_constraints(Space::set_of_dim(1), [
            Constraint::lower_bound(0, 0, 1),
            Constraint::upper_bound(0, 5, 1),
        ]);
        let context = interval(0, 99);
        let simplified = set.gist(&context);
        assert_eq!(simplified.pieces.len(), 1);
        assert_eq!(simplified.pieces[0].len(), 1);

        let disjoint = IntegerSet::from_constraints(Space::set_of_dim(1), [Constraint::lower_bound(0, 200, 1)]);
        assert!(disjoint.gist(&context).pieces.is_empty());
    }

    #[test]
    fn test_substitute_param() {
        let n = Param::named("N");
        // i < N with N := 3
        let set = IntegerSet::from_constraints(Space::set_of_dim(1), [
            Constraint::lt(var(0, 1), AffineExpr::param(n.clone(), 1)),
        ]);
        let fixed = set.substitute_param(&n, &AffineExpr::constant(3, 1));
        assert!(fixed.contains_point(&[2]));
        assert!(!fixed.contains_point(&[3]));
    }
}
