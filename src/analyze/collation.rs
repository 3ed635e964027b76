//! Collation derivation.
//!
//! Every collatable expression carries a collation and a strength:
//! explicit (a `COLLATE` clause), implicit (a column or anything derived
//! from one), or the database default. When expressions are combined the
//! strongest wins; two different explicit collations are always an error,
//! two different implicit ones only when the caller needs an answer.

use crate::analyze::parse_state::ParseState;
use crate::catalog::collations;
use crate::error::{AnalyzeError, AnalyzeResult, Location};
use crate::nodes::primnodes::Expr;
use crate::nodes::query::Query;
use crate::nodes::{INVALID_OID, Oid};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Strength {
    None,
    Default,
    Implicit,
    Explicit,
}

pub(crate) fn collation_name(coll: Oid) -> String {
    match coll {
        collations::DEFAULT => "default".to_string(),
        collations::C => "C".to_string(),
        collations::POSIX => "POSIX".to_string(),
        other => other.to_string(),
    }
}

fn derive(expr: &Expr) -> (Oid, Strength) {
    if let Expr::Collate(c) = expr {
        return (c.coll_oid, Strength::Explicit);
    }
    let coll = expr.collation();
    if coll == INVALID_OID {
        return (INVALID_OID, Strength::None);
    }
    let inherited_explicit = expr
        .children()
        .into_iter()
        .any(|c| derive(c) == (coll, Strength::Explicit));
    if inherited_explicit {
        (coll, Strength::Explicit)
    } else if coll == collations::DEFAULT {
        (coll, Strength::Default)
    } else {
        (coll, Strength::Implicit)
    }
}

/// Choose the collation a set of expressions is combined under. With
/// `none_ok`, conflicting implicit collations yield `INVALID_OID` instead
/// of an error.
pub(crate) fn select_common_collation(exprs: &[&Expr], none_ok: bool) -> AnalyzeResult<Oid> {
    let mut current = (INVALID_OID, Strength::None);
    let mut current_location: Location = None;
    let mut conflict: Option<(Oid, Oid, Location)> = None;

    for expr in exprs {
        let (coll, strength) = derive(expr);
        if strength == Strength::None {
            continue;
        }
        if strength > current.1 {
            current = (coll, strength);
            current_location = expr.location();
            if strength == Strength::Explicit {
                conflict = None;
            }
            continue;
        }
        if strength < current.1 || coll == current.0 {
            continue;
        }
        match strength {
            Strength::Explicit => {
                return Err(AnalyzeError::collation_mismatch(format!(
                    "collation mismatch between explicit collations \"{}\" and \"{}\"",
                    collation_name(current.0),
                    collation_name(coll)
                ))
                .at(expr.location()));
            }
            Strength::Implicit => {
                conflict.get_or_insert((current.0, coll, expr.location().or(current_location)));
            }
            Strength::Default | Strength::None => {}
        }
    }

    match conflict {
        Some(_) if none_ok => Ok(INVALID_OID),
        Some((a, b, location)) => Err(AnalyzeError::collation_mismatch(format!(
            "collation mismatch between implicit collations \"{}\" and \"{}\"",
            collation_name(a),
            collation_name(b)
        ))
        .with_hint("You can choose the collation by applying the COLLATE clause to one or both expressions.")
        .at(location)),
        None => Ok(current.0),
    }
}

fn result_collation(pstate: &ParseState<'_>, result_type: Oid, args: &[Expr], common: Oid) -> Oid {
    let collatable = pstate
        .catalog()
        .type_info(result_type)
        .is_some_and(|t| t.collatable);
    if !collatable {
        INVALID_OID
    } else if common != INVALID_OID {
        common
    } else if args.iter().all(|a| a.collation() == INVALID_OID) {
        collations::DEFAULT
    } else {
        INVALID_OID
    }
}

/// Set the input and result collations of a single operator, function,
/// aggregate or window call from its already-resolved arguments.
pub(crate) fn finish_node_collation(pstate: &ParseState<'_>, expr: &mut Expr) -> AnalyzeResult<()> {
    let (args, result_type) = match expr {
        Expr::Op(o) => (&o.args, o.opresulttype),
        Expr::Func(f) => (&f.args, f.funcresulttype),
        Expr::Aggref(a) => (&a.args, a.aggtype),
        Expr::WindowFunc(w) => (&w.args, w.wintype),
        _ => return Ok(()),
    };
    let refs: Vec<&Expr> = args.iter().collect();
    let input = select_common_collation(&refs, true)?;
    let result = result_collation(pstate, result_type, args, input);
    match expr {
        Expr::Op(o) => (o.inputcollid, o.opcollid) = (input, result),
        Expr::Func(f) => (f.inputcollid, f.funccollid) = (input, result),
        Expr::Aggref(a) => (a.inputcollid, a.aggcollid) = (input, result),
        Expr::WindowFunc(w) => (w.inputcollid, w.wincollid) = (input, result),
        _ => {}
    }
    Ok(())
}

/// Collations for a free-standing expression list, such as one INSERT
/// VALUES row. Each expression is handled on its own.
pub(crate) fn assign_list_collations(pstate: &ParseState<'_>, exprs: &mut [Expr]) -> AnalyzeResult<()> {
    let mut first_error = None;
    for e in exprs.iter_mut() {
        e.walk_mut(&mut |node| {
            if first_error.is_none() {
                if let Err(err) = finish_node_collation(pstate, node) {
                    first_error = Some(err);
                }
            }
        });
    }
    first_error.map_or(Ok(()), Err)
}

/// Re-derive collations bottom-up over every expression of `query`'s own
/// level.
pub(crate) fn assign_query_collations(pstate: &ParseState<'_>, query: &mut Query) -> AnalyzeResult<()> {
    let mut first_error = None;
    query.for_each_expr_mut(&mut |e| {
        e.walk_mut(&mut |node| {
            if first_error.is_none() {
                if let Err(err) = finish_node_collation(pstate, node) {
                    first_error = Some(err);
                }
            }
        })
    });
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::types;
    use crate::nodes::primnodes::{CollateExpr, Var};

    fn text_var(coll: Oid, location: usize) -> Expr {
        let mut v = Var::new(1, 1, types::TEXT, -1, coll);
        v.location = Some(location);
        Expr::Var(v)
    }

    fn collate(arg: Expr, coll: Oid) -> Expr {
        Expr::Collate(CollateExpr {
            arg: Box::new(arg),
            coll_oid: coll,
            location: None,
        })
    }

    #[test]
    fn test_implicit_beats_default() {
        let a = text_var(collations::DEFAULT, 0);
        let b = text_var(collations::C, 5);
        assert_eq!(select_common_collation(&[&a, &b], false).unwrap(), collations::C);
    }

    #[test]
    fn test_implicit_conflict() {
        let a = text_var(collations::C, 0);
        let b = text_var(collations::POSIX, 9);
        assert_eq!(select_common_collation(&[&a, &b], true).unwrap(), INVALID_OID);
        let err = select_common_collation(&[&a, &b], false).unwrap_err();
        assert_eq!(
            err.message(),
            "collation mismatch between implicit collations \"C\" and \"POSIX\""
        );
        assert_eq!(err.location(), Some(9));
    }

    #[test]
    fn test_explicit_resolves_implicit_conflict() {
        let a = text_var(collations::C, 0);
        let b = text_var(collations::POSIX, 9);
        let c = collate(text_var(collations::DEFAULT, 2), collations::DEFAULT);
        assert_eq!(select_common_collation(&[&a, &b, &c], false).unwrap(), collations::DEFAULT);
    }

    #[test]
    fn test_explicit_conflict_always_fails() {
        let a = collate(text_var(collations::DEFAULT, 0), collations::C);
        let b = collate(text_var(collations::DEFAULT, 0), collations::POSIX);
        assert!(select_common_collation(&[&a, &b], true).is_err());
    }

    #[test]
    fn test_non_collatable_ignored() {
        let a = Expr::int8_const(1);
        assert_eq!(select_common_collation(&[&a], false).unwrap(), INVALID_OID);
    }
}
