//! Analyzed expressions.
//!
//! Every node here has a resolved type. Column references are `Var`s that
//! point into the range table by index; operators and functions are
//! resolved to catalog ids. Location fields are kept for error reporting
//! but never take part in structural comparisons or fingerprints.

use serde::Serialize;

use crate::catalog::{Catalog, Volatility, types};
use crate::error::Location;
use crate::nodes::query::Query;
use crate::nodes::raw::BoolOp;
use crate::nodes::{AttrNumber, INVALID_OID, Index, Oid};

/// A column of a range-table entry, possibly of an enclosing query level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Var {
    pub varno: Index,
    pub varattno: AttrNumber,
    pub vartype: Oid,
    pub vartypmod: i32,
    pub varcollid: Oid,
    /// 0 for the current query level, 1 for the parent, and so on.
    pub varlevelsup: u32,
    #[serde(skip_serializing)]
    pub location: Location,
}

impl Var {
    pub fn new(varno: Index, varattno: AttrNumber, vartype: Oid, vartypmod: i32, varcollid: Oid) -> Self {
        Var {
            varno,
            varattno,
            vartype,
            vartypmod,
            varcollid,
            varlevelsup: 0,
            location: None,
        }
    }
}

/// Value of a constant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConstValue {
    Null,
    Bool(bool),
    Int(i64),
    /// Textual form of every other type (numeric, text, unknown literals).
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Const {
    pub consttype: Oid,
    pub consttypmod: i32,
    pub constcollid: Oid,
    pub value: ConstValue,
    #[serde(skip_serializing)]
    pub location: Location,
}

impl Const {
    pub fn is_null(&self) -> bool {
        self.value == ConstValue::Null
    }
}

/// An external parameter `$n`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Param {
    pub paramid: usize,
    pub paramtype: Oid,
    pub paramtypmod: i32,
    pub paramcollid: Oid,
    #[serde(skip_serializing)]
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpExpr {
    pub opno: Oid,
    pub opfuncid: Oid,
    pub opresulttype: Oid,
    pub opretset: bool,
    pub opcollid: Oid,
    pub inputcollid: Oid,
    pub args: Vec<Expr>,
    #[serde(skip_serializing)]
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuncExpr {
    pub funcid: Oid,
    pub funcresulttype: Oid,
    pub funcretset: bool,
    pub funccollid: Oid,
    pub inputcollid: Oid,
    pub args: Vec<Expr>,
    #[serde(skip_serializing)]
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggref {
    pub aggfnoid: Oid,
    pub aggtype: Oid,
    pub aggcollid: Oid,
    pub inputcollid: Oid,
    pub args: Vec<Expr>,
    pub aggstar: bool,
    pub aggdistinct: bool,
    pub agglevelsup: u32,
    #[serde(skip_serializing)]
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowFunc {
    pub winfnoid: Oid,
    pub wintype: Oid,
    pub wincollid: Oid,
    pub inputcollid: Oid,
    pub args: Vec<Expr>,
    /// 1-based index into the query's window clause list.
    pub winref: Index,
    pub winstar: bool,
    /// True when a plain aggregate is used as a window function.
    pub winagg: bool,
    #[serde(skip_serializing)]
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoolExpr {
    pub boolop: BoolOp,
    pub args: Vec<Expr>,
    #[serde(skip_serializing)]
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubLinkType {
    Exists,
    Any,
    Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubLink {
    pub sub_link_type: SubLinkType,
    /// Left-hand side of `ANY`.
    pub testexpr: Option<Box<Expr>>,
    /// Comparison operator of `ANY`.
    pub opno: Option<Oid>,
    pub subselect: Box<Query>,
    #[serde(skip_serializing)]
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowExpr {
    pub args: Vec<Expr>,
    pub row_typeid: Oid,
    #[serde(skip_serializing)]
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CoercionForm {
    /// Inserted by the analyzer.
    Implicit,
    /// Written by the user as a cast.
    Explicit,
}

/// A type coercion. Covers both binary-compatible relabeling and
/// conversions that need a cast function.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoerceExpr {
    pub arg: Box<Expr>,
    pub resulttype: Oid,
    pub resulttypmod: i32,
    pub resultcollid: Oid,
    pub form: CoercionForm,
    #[serde(skip_serializing)]
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NullTest {
    pub arg: Box<Expr>,
    pub is_null: bool,
    #[serde(skip_serializing)]
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollateExpr {
    pub arg: Box<Expr>,
    pub coll_oid: Oid,
    #[serde(skip_serializing)]
    pub location: Location,
}

/// The ROWNUM pseudo-column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RownumExpr {
    #[serde(skip_serializing)]
    pub location: Location,
}

/// A column reference carrying the `(+)` outer-join marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnRefJoin {
    pub var: Var,
    #[serde(skip_serializing)]
    pub location: Location,
}

/// `DEFAULT` in a value position. Also used as the placeholder column of
/// an internal set-operation node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetToDefault {
    pub type_id: Oid,
    pub typmod: i32,
    pub collation: Oid,
    #[serde(skip_serializing)]
    pub location: Location,
}

/// An analyzed expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr {
    Var(Var),
    Const(Const),
    Param(Param),
    Op(OpExpr),
    Func(FuncExpr),
    Aggref(Aggref),
    WindowFunc(WindowFunc),
    Bool(BoolExpr),
    SubLink(SubLink),
    Row(RowExpr),
    Coerce(CoerceExpr),
    NullTest(NullTest),
    Collate(CollateExpr),
    Rownum(RownumExpr),
    OuterJoinMarker(ColumnRefJoin),
    SetToDefault(SetToDefault),
}

/// Walker verdict for [`Expr::search`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Search {
    /// Stop: the search succeeded.
    Found,
    /// Do not look below this node.
    Prune,
    /// Keep going into the children.
    Descend,
}

impl Expr {
    // ── Type information ───────────────────────────────────────────────

    pub fn type_oid(&self) -> Oid {
        match self {
            Expr::Var(v) => v.vartype,
            Expr::Const(c) => c.consttype,
            Expr::Param(p) => p.paramtype,
            Expr::Op(o) => o.opresulttype,
            Expr::Func(f) => f.funcresulttype,
            Expr::Aggref(a) => a.aggtype,
            Expr::WindowFunc(w) => w.wintype,
            Expr::Bool(_) | Expr::NullTest(_) => types::BOOL,
            Expr::SubLink(s) => match s.sub_link_type {
                SubLinkType::Expr => s
                    .subselect
                    .target_list
                    .iter()
                    .find(|t| !t.resjunk)
                    .map(|t| t.expr.type_oid())
                    .unwrap_or(INVALID_OID),
                SubLinkType::Exists | SubLinkType::Any => types::BOOL,
            },
            Expr::Row(r) => r.row_typeid,
            Expr::Coerce(c) => c.resulttype,
            Expr::Collate(c) => c.arg.type_oid(),
            Expr::Rownum(_) => types::INT8,
            Expr::OuterJoinMarker(m) => m.var.vartype,
            Expr::SetToDefault(d) => d.type_id,
        }
    }

    pub fn typmod(&self) -> i32 {
        match self {
            Expr::Var(v) => v.vartypmod,
            Expr::Const(c) => c.consttypmod,
            Expr::Param(p) => p.paramtypmod,
            Expr::Coerce(c) => c.resulttypmod,
            Expr::Collate(c) => c.arg.typmod(),
            Expr::OuterJoinMarker(m) => m.var.vartypmod,
            Expr::SetToDefault(d) => d.typmod,
            Expr::SubLink(s) if s.sub_link_type == SubLinkType::Expr => s
                .subselect
                .target_list
                .iter()
                .find(|t| !t.resjunk)
                .map(|t| t.expr.typmod())
                .unwrap_or(-1),
            _ => -1,
        }
    }

    /// Result collation of the expression, `INVALID_OID` when the type is
    /// not collatable or no collation could be derived.
    pub fn collation(&self) -> Oid {
        match self {
            Expr::Var(v) => v.varcollid,
            Expr::Const(c) => c.constcollid,
            Expr::Param(p) => p.paramcollid,
            Expr::Op(o) => o.opcollid,
            Expr::Func(f) => f.funccollid,
            Expr::Aggref(a) => a.aggcollid,
            Expr::WindowFunc(w) => w.wincollid,
            Expr::Coerce(c) => c.resultcollid,
            Expr::Collate(c) => c.coll_oid,
            Expr::OuterJoinMarker(m) => m.var.varcollid,
            Expr::SetToDefault(d) => d.collation,
            Expr::SubLink(s) if s.sub_link_type == SubLinkType::Expr => s
                .subselect
                .target_list
                .iter()
                .find(|t| !t.resjunk)
                .map(|t| t.expr.collation())
                .unwrap_or(INVALID_OID),
            _ => INVALID_OID,
        }
    }

    pub fn location(&self) -> Location {
        match self {
            Expr::Var(v) => v.location,
            Expr::Const(c) => c.location,
            Expr::Param(p) => p.location,
            Expr::Op(o) => o.location,
            Expr::Func(f) => f.location,
            Expr::Aggref(a) => a.location,
            Expr::WindowFunc(w) => w.location,
            Expr::Bool(b) => b.location,
            Expr::SubLink(s) => s.location,
            Expr::Row(r) => r.location,
            Expr::Coerce(c) => c.location.or_else(|| c.arg.location()),
            Expr::NullTest(n) => n.location,
            Expr::Collate(c) => c.location,
            Expr::Rownum(r) => r.location,
            Expr::OuterJoinMarker(m) => m.location,
            Expr::SetToDefault(d) => d.location,
        }
    }

    fn location_mut(&mut self) -> &mut Location {
        match self {
            Expr::Var(v) => &mut v.location,
            Expr::Const(c) => &mut c.location,
            Expr::Param(p) => &mut p.location,
            Expr::Op(o) => &mut o.location,
            Expr::Func(f) => &mut f.location,
            Expr::Aggref(a) => &mut a.location,
            Expr::WindowFunc(w) => &mut w.location,
            Expr::Bool(b) => &mut b.location,
            Expr::SubLink(s) => &mut s.location,
            Expr::Row(r) => &mut r.location,
            Expr::Coerce(c) => &mut c.location,
            Expr::NullTest(n) => &mut n.location,
            Expr::Collate(c) => &mut c.location,
            Expr::Rownum(r) => &mut r.location,
            Expr::OuterJoinMarker(m) => &mut m.location,
            Expr::SetToDefault(d) => &mut d.location,
        }
    }

    // ── Constructors ───────────────────────────────────────────────────

    pub fn int8_const(value: i64) -> Expr {
        Expr::Const(Const {
            consttype: types::INT8,
            consttypmod: -1,
            constcollid: INVALID_OID,
            value: ConstValue::Int(value),
            location: None,
        })
    }

    pub fn bool_const(value: bool) -> Expr {
        Expr::Const(Const {
            consttype: types::BOOL,
            consttypmod: -1,
            constcollid: INVALID_OID,
            value: ConstValue::Bool(value),
            location: None,
        })
    }

    /// AND the given conjuncts together: `None` for an empty list, the sole
    /// element for a singleton.
    pub fn and_of(mut conjuncts: Vec<Expr>) -> Option<Expr> {
        match conjuncts.len() {
            0 => None,
            1 => conjuncts.pop(),
            _ => Some(Expr::Bool(BoolExpr {
                boolop: BoolOp::And,
                args: conjuncts,
                location: None,
            })),
        }
    }

    /// Flatten nested ANDs into a conjunct list.
    pub fn into_conjuncts(self) -> Vec<Expr> {
        match self {
            Expr::Bool(BoolExpr {
                boolop: BoolOp::And,
                args,
                ..
            }) => args.into_iter().flat_map(Expr::into_conjuncts).collect(),
            other => vec![other],
        }
    }

    // ── Traversal ──────────────────────────────────────────────────────

    /// Direct sub-expressions. Sub-queries of sub-links are not included.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Var(_)
            | Expr::Const(_)
            | Expr::Param(_)
            | Expr::Rownum(_)
            | Expr::OuterJoinMarker(_)
            | Expr::SetToDefault(_) => Vec::new(),
            Expr::Op(o) => o.args.iter().collect(),
            Expr::Func(f) => f.args.iter().collect(),
            Expr::Aggref(a) => a.args.iter().collect(),
            Expr::WindowFunc(w) => w.args.iter().collect(),
            Expr::Bool(b) => b.args.iter().collect(),
            Expr::Row(r) => r.args.iter().collect(),
            Expr::SubLink(s) => s.testexpr.iter().map(|e| e.as_ref()).collect(),
            Expr::Coerce(c) => vec![c.arg.as_ref()],
            Expr::NullTest(n) => vec![n.arg.as_ref()],
            Expr::Collate(c) => vec![c.arg.as_ref()],
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Expr::Var(_)
            | Expr::Const(_)
            | Expr::Param(_)
            | Expr::Rownum(_)
            | Expr::OuterJoinMarker(_)
            | Expr::SetToDefault(_) => Vec::new(),
            Expr::Op(o) => o.args.iter_mut().collect(),
            Expr::Func(f) => f.args.iter_mut().collect(),
            Expr::Aggref(a) => a.args.iter_mut().collect(),
            Expr::WindowFunc(w) => w.args.iter_mut().collect(),
            Expr::Bool(b) => b.args.iter_mut().collect(),
            Expr::Row(r) => r.args.iter_mut().collect(),
            Expr::SubLink(s) => s.testexpr.iter_mut().map(|e| e.as_mut()).collect(),
            Expr::Coerce(c) => vec![c.arg.as_mut()],
            Expr::NullTest(n) => vec![n.arg.as_mut()],
            Expr::Collate(c) => vec![c.arg.as_mut()],
        }
    }

    /// Pre-order search with pruning. Returns true once `f` reports
    /// [`Search::Found`].
    pub fn search(&self, f: &mut dyn FnMut(&Expr) -> Search) -> bool {
        match f(self) {
            Search::Found => true,
            Search::Prune => false,
            Search::Descend => self.children().into_iter().any(|c| c.search(f)),
        }
    }

    /// True if `pred` holds for this node or any descendant.
    pub fn any(&self, pred: &mut dyn FnMut(&Expr) -> bool) -> bool {
        self.search(&mut |e| if pred(e) { Search::Found } else { Search::Descend })
    }

    /// Post-order in-place rewrite.
    pub fn walk_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        for child in self.children_mut() {
            child.walk_mut(f);
        }
        f(self);
    }

    /// A copy with every location cleared, for structural comparison.
    pub fn without_locations(&self) -> Expr {
        let mut copy = self.clone();
        copy.walk_mut(&mut |e| *e.location_mut() = None);
        copy
    }

    /// Structural equality that ignores source positions.
    pub fn equal_ignoring_location(&self, other: &Expr) -> bool {
        self.without_locations() == other.without_locations()
    }

    /// Remove every `(+)` marker, leaving the wrapped `Var`.
    pub fn strip_outer_join_markers(&mut self) {
        self.walk_mut(&mut |e| {
            if let Expr::OuterJoinMarker(m) = e {
                let var = m.var.clone();
                *e = Expr::Var(var);
            }
        });
    }

    pub fn as_var(&self) -> Option<&Var> {
        match self {
            Expr::Var(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_unknown_literal(&self) -> bool {
        matches!(self, Expr::Const(_) | Expr::Param(_)) && self.type_oid() == types::UNKNOWN
    }
}

// ── Predicates over expression trees ───────────────────────────────────────

/// Walk `expr` and every query nested below it, passing each node and its
/// query depth relative to `expr`.
pub fn search_with_depth(expr: &Expr, depth: u32, f: &mut dyn FnMut(&Expr, u32) -> bool) -> bool {
    expr.search(&mut |e| {
        if f(e, depth) {
            return Search::Found;
        }
        if let Expr::SubLink(s) = e {
            if s.subselect.any_expr_with_depth(depth + 1, &mut *f) {
                return Search::Found;
            }
        }
        Search::Descend
    })
}

/// True if `expr` references a `Var` of the given query level.
pub fn contain_vars_of_level(expr: &Expr, levelsup: u32) -> bool {
    search_with_depth(expr, 0, &mut |e, depth| match e {
        Expr::Var(v) => v.varlevelsup == levelsup + depth,
        Expr::OuterJoinMarker(m) => m.var.varlevelsup == levelsup + depth,
        _ => false,
    })
}

/// Location of the first `Var` of the given level, for error cursors.
pub fn locate_var_of_level(expr: &Expr, levelsup: u32) -> Location {
    let mut found = None;
    search_with_depth(expr, 0, &mut |e, depth| match e {
        Expr::Var(v) if v.varlevelsup == levelsup + depth => {
            found = v.location;
            true
        }
        _ => false,
    });
    found
}

/// True if the ROWNUM pseudo-column appears at this query level.
pub fn contain_rownum(expr: &Expr) -> bool {
    expr.any(&mut |e| matches!(e, Expr::Rownum(_)))
}

pub fn contain_outer_join_marker(expr: &Expr) -> bool {
    expr.any(&mut |e| matches!(e, Expr::OuterJoinMarker(_)))
}

/// True if an aggregate of the current level appears.
pub fn contain_aggs(expr: &Expr) -> bool {
    expr.any(&mut |e| matches!(e, Expr::Aggref(a) if a.agglevelsup == 0))
}

pub fn contain_window_funcs(expr: &Expr) -> bool {
    expr.any(&mut |e| matches!(e, Expr::WindowFunc(_)))
}

/// True if evaluating `expr` can return a set. Arguments of aggregates and
/// window functions do not count.
pub fn expression_returns_set(expr: &Expr) -> bool {
    expr.search(&mut |e| match e {
        Expr::Func(f) if f.funcretset => Search::Found,
        Expr::Op(o) if o.opretset => Search::Found,
        Expr::Aggref(_) | Expr::WindowFunc(_) | Expr::SubLink(_) => Search::Prune,
        _ => Search::Descend,
    })
}

/// True if any function or operator in `expr` is not immutable.
pub fn contain_mutable_functions(expr: &Expr, catalog: &dyn Catalog) -> bool {
    let volatile = |funcid: Oid| {
        catalog
            .function(funcid)
            .map(|f| f.volatility != Volatility::Immutable)
            .unwrap_or(true)
    };
    expr.search(&mut |e| match e {
        Expr::Func(f) if volatile(f.funcid) => Search::Found,
        Expr::Op(o) if volatile(o.opfuncid) => Search::Found,
        Expr::Aggref(a) if volatile(a.aggfnoid) => Search::Found,
        Expr::WindowFunc(w) if volatile(w.winfnoid) => Search::Found,
        Expr::Rownum(_) => Search::Found,
        Expr::SubLink(_) => Search::Found,
        _ => Search::Descend,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(varno: Index, attno: AttrNumber) -> Expr {
        Expr::Var(Var::new(varno, attno, types::INT4, -1, INVALID_OID))
    }

    fn op(args: Vec<Expr>) -> Expr {
        Expr::Op(OpExpr {
            opno: 96,
            opfuncid: 65,
            opresulttype: types::BOOL,
            opretset: false,
            opcollid: INVALID_OID,
            inputcollid: INVALID_OID,
            args,
            location: None,
        })
    }

    #[test]
    fn test_and_of_shapes() {
        assert!(Expr::and_of(vec![]).is_none());
        assert_eq!(Expr::and_of(vec![var(1, 1)]), Some(var(1, 1)));
        let both = Expr::and_of(vec![var(1, 1), var(1, 2)]).unwrap();
        assert!(matches!(both, Expr::Bool(ref b) if b.args.len() == 2));
    }

    #[test]
    fn test_into_conjuncts_flattens() {
        let nested = Expr::Bool(BoolExpr {
            boolop: BoolOp::And,
            args: vec![
                var(1, 1),
                Expr::and_of(vec![var(1, 2), var(1, 3)]).unwrap(),
            ],
            location: None,
        });
        assert_eq!(nested.into_conjuncts().len(), 3);
    }

    #[test]
    fn test_equal_ignoring_location() {
        let mut a = var(1, 1);
        if let Expr::Var(v) = &mut a {
            v.location = Some(10);
        }
        let b = var(1, 1);
        assert_ne!(a, b);
        assert!(a.equal_ignoring_location(&b));
    }

    #[test]
    fn test_strip_outer_join_markers() {
        let marker = Expr::OuterJoinMarker(ColumnRefJoin {
            var: Var::new(2, 1, types::INT4, -1, INVALID_OID),
            location: Some(5),
        });
        let mut e = op(vec![var(1, 1), marker]);
        assert!(contain_outer_join_marker(&e));
        e.strip_outer_join_markers();
        assert!(!contain_outer_join_marker(&e));
        assert_eq!(e, op(vec![var(1, 1), var(2, 1)]));
    }

    #[test]
    fn test_contain_vars_of_level() {
        let mut outer = Var::new(1, 1, types::INT4, -1, INVALID_OID);
        outer.varlevelsup = 1;
        let e = op(vec![Expr::Var(outer), Expr::int8_const(1)]);
        assert!(contain_vars_of_level(&e, 1));
        assert!(!contain_vars_of_level(&e, 0));
    }

    #[test]
    fn test_expression_returns_set_ignores_aggregate_args() {
        let srf = Expr::Func(FuncExpr {
            funcid: 1,
            funcresulttype: types::INT4,
            funcretset: true,
            funccollid: INVALID_OID,
            inputcollid: INVALID_OID,
            args: vec![],
            location: None,
        });
        assert!(expression_returns_set(&srf));
        let agg = Expr::Aggref(Aggref {
            aggfnoid: 2,
            aggtype: types::INT8,
            aggcollid: INVALID_OID,
            inputcollid: INVALID_OID,
            args: vec![srf],
            aggstar: false,
            aggdistinct: false,
            agglevelsup: 0,
            location: None,
        });
        assert!(!expression_returns_set(&agg));
        assert!(contain_aggs(&agg));
    }

    #[test]
    fn test_rownum_type_is_int8() {
        let r = Expr::Rownum(RownumExpr { location: None });
        assert_eq!(r.type_oid(), types::INT8);
        assert!(contain_rownum(&op(vec![r, Expr::int8_const(3)])));
    }
}
