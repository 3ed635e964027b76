//! Type coercion and overload resolution.
//!
//! Values only convert along casts the catalog allows for the requested
//! [`CoercionContext`]. Untyped string literals and `$n` parameters of
//! unknown type are the exception: they take whatever type the context
//! asks for. Literals are folded to a constant of the new type on the
//! spot; parameters record the deduced type when parameter types are
//! variable.

use crate::analyze::collation::finish_node_collation;
use crate::analyze::parse_state::{ParamTypes, ParseState};
use crate::analyze::relation::type_name;
use crate::catalog::{CoercionContext, FunctionInfo, OperatorInfo, TypeCategory, collations, types};
use crate::error::{AnalyzeError, AnalyzeResult, Location};
use crate::nodes::primnodes::{CoerceExpr, CoercionForm, Const, ConstValue, Expr, OpExpr, Param};
use crate::nodes::{INVALID_OID, Oid};

// ── Literals ───────────────────────────────────────────────────────────────

fn input_syntax_error(pstate: &ParseState<'_>, target: Oid, text: &str, location: Location) -> AnalyzeError {
    AnalyzeError::invalid_text_representation(format!(
        "invalid input syntax for type {}: \"{text}\"",
        type_name(pstate, target)
    ))
    .at(location)
}

fn int_range(target: Oid) -> (i64, i64) {
    match target {
        types::INT2 => (i16::MIN.into(), i16::MAX.into()),
        types::INT4 => (i32::MIN.into(), i32::MAX.into()),
        types::OID => (0, u32::MAX.into()),
        _ => (i64::MIN, i64::MAX),
    }
}

fn check_int_range(pstate: &ParseState<'_>, target: Oid, v: i64, location: Location) -> AnalyzeResult<i64> {
    let (lo, hi) = int_range(target);
    if v < lo || v > hi {
        return Err(AnalyzeError::invalid_text_representation(format!(
            "value \"{v}\" is out of range for type {}",
            type_name(pstate, target)
        ))
        .at(location));
    }
    Ok(v)
}

/// Convert the textual value of an unknown literal to `target`.
fn fold_unknown_literal(pstate: &ParseState<'_>, value: &ConstValue, target: Oid, location: Location) -> AnalyzeResult<ConstValue> {
    let text = match value {
        ConstValue::Null => return Ok(ConstValue::Null),
        ConstValue::Text(t) => t.as_str(),
        other => return Ok(other.clone()),
    };
    let trimmed = text.trim();
    match target {
        types::BOOL => match trimmed.to_ascii_lowercase().as_str() {
            "t" | "true" | "y" | "yes" | "on" | "1" => Ok(ConstValue::Bool(true)),
            "f" | "false" | "n" | "no" | "off" | "0" => Ok(ConstValue::Bool(false)),
            _ => Err(input_syntax_error(pstate, target, text, location)),
        },
        types::INT2 | types::INT4 | types::INT8 | types::OID => {
            let v: i64 = trimmed
                .parse()
                .map_err(|_| input_syntax_error(pstate, target, text, location))?;
            Ok(ConstValue::Int(check_int_range(pstate, target, v, location)?))
        }
        types::NUMERIC | types::FLOAT4 | types::FLOAT8 => {
            trimmed
                .parse::<f64>()
                .map_err(|_| input_syntax_error(pstate, target, text, location))?;
            Ok(ConstValue::Text(trimmed.to_string()))
        }
        _ => Ok(ConstValue::Text(text.to_string())),
    }
}

fn default_collation(pstate: &ParseState<'_>, type_oid: Oid) -> Oid {
    match pstate.catalog().type_info(type_oid) {
        Some(t) if t.collatable => collations::DEFAULT,
        _ => INVALID_OID,
    }
}

/// A constant of the given type with the type's default collation.
pub(crate) fn make_const(pstate: &ParseState<'_>, type_oid: Oid, value: ConstValue, location: Location) -> Expr {
    Expr::Const(Const {
        consttype: type_oid,
        consttypmod: -1,
        constcollid: default_collation(pstate, type_oid),
        value,
        location,
    })
}

// ── Parameters ─────────────────────────────────────────────────────────────

/// Record that parameter `$n` is used as `target`.
fn deduce_param_type(pstate: &ParseState<'_>, param: &Param, target: Oid) -> AnalyzeResult<()> {
    let mut params = pstate.params.borrow_mut();
    let ParamTypes::Variable(list) = &mut *params else {
        return Ok(());
    };
    let Some(slot) = param.paramid.checked_sub(1).and_then(|i| list.get_mut(i)) else {
        return Err(AnalyzeError::undefined_parameter(format!("there is no parameter ${}", param.paramid)).at(param.location));
    };
    if *slot == types::UNKNOWN {
        *slot = target;
    } else if *slot != target {
        return Err(AnalyzeError::datatype_mismatch(format!(
            "inconsistent types deduced for parameter ${}",
            param.paramid
        ))
        .with_detail(format!(
            "{} versus {}",
            type_name(pstate, *slot),
            type_name(pstate, target)
        ))
        .at(param.location));
    }
    Ok(())
}

// ── Coercion ───────────────────────────────────────────────────────────────

/// Whether `from` may be coerced to `to` in `ctx`.
pub(crate) fn can_coerce_type(pstate: &ParseState<'_>, from: Oid, to: Oid, ctx: CoercionContext) -> bool {
    from == to || to == types::ANY || from == types::UNKNOWN || pstate.catalog().can_coerce(from, to, ctx)
}

/// Convert `expr` to `target`. The caller has already checked that the
/// coercion is allowed.
pub(crate) fn coerce_type(
    pstate: &ParseState<'_>,
    expr: Expr,
    target: Oid,
    typmod: i32,
    form: CoercionForm,
    location: Location,
) -> AnalyzeResult<Expr> {
    let source = expr.type_oid();
    if target == types::ANY || (source == target && (typmod < 0 || typmod == expr.typmod())) {
        return Ok(expr);
    }
    match expr {
        Expr::Const(c) if c.consttype == types::UNKNOWN => {
            let value = fold_unknown_literal(pstate, &c.value, target, c.location)?;
            Ok(Expr::Const(Const {
                consttype: target,
                consttypmod: typmod,
                constcollid: default_collation(pstate, target),
                value,
                location: c.location,
            }))
        }
        Expr::Const(Const {
            consttype,
            value: ConstValue::Int(v),
            location: loc,
            ..
        }) if types::is_integer(consttype) && (types::is_integer(target) || target == types::OID) && form == CoercionForm::Implicit => {
            let v = check_int_range(pstate, target, v, loc)?;
            Ok(Expr::Const(Const {
                consttype: target,
                consttypmod: typmod,
                constcollid: INVALID_OID,
                value: ConstValue::Int(v),
                location: loc,
            }))
        }
        Expr::Const(Const {
            consttype,
            value: ConstValue::Int(v),
            location: loc,
            ..
        }) if types::is_integer(consttype) && matches!(target, types::NUMERIC | types::FLOAT4 | types::FLOAT8) => {
            Ok(Expr::Const(Const {
                consttype: target,
                consttypmod: typmod,
                constcollid: INVALID_OID,
                value: ConstValue::Text(v.to_string()),
                location: loc,
            }))
        }
        Expr::Param(mut p) if p.paramtype == types::UNKNOWN => {
            deduce_param_type(pstate, &p, target)?;
            p.paramtype = target;
            p.paramtypmod = typmod;
            p.paramcollid = default_collation(pstate, target);
            Ok(Expr::Param(p))
        }
        Expr::SetToDefault(mut d) => {
            d.type_id = target;
            d.typmod = typmod;
            d.collation = default_collation(pstate, target);
            Ok(Expr::SetToDefault(d))
        }
        other => {
            let resultcollid = if default_collation(pstate, target) == INVALID_OID {
                INVALID_OID
            } else if other.collation() != INVALID_OID {
                other.collation()
            } else {
                collations::DEFAULT
            };
            Ok(Expr::Coerce(CoerceExpr {
                arg: Box::new(other),
                resulttype: target,
                resulttypmod: typmod,
                resultcollid,
                form,
                location,
            }))
        }
    }
}

/// Coerce `expr` to `target` in `ctx`, or `None` when no such coercion
/// exists.
pub(crate) fn coerce_to_target_type(
    pstate: &ParseState<'_>,
    expr: Expr,
    target: Oid,
    typmod: i32,
    ctx: CoercionContext,
    location: Location,
) -> AnalyzeResult<Option<Expr>> {
    if !can_coerce_type(pstate, expr.type_oid(), target, ctx) {
        return Ok(None);
    }
    let form = if ctx == CoercionContext::Explicit {
        CoercionForm::Explicit
    } else {
        CoercionForm::Implicit
    };
    coerce_type(pstate, expr, target, typmod, form, location).map(Some)
}

/// Coerce a condition to boolean, for `construct` (WHERE, HAVING, AND, ...).
pub(crate) fn coerce_to_boolean(pstate: &ParseState<'_>, expr: Expr, construct: &str) -> AnalyzeResult<Expr> {
    let source = expr.type_oid();
    if source == types::BOOL {
        return Ok(expr);
    }
    let location = expr.location();
    match coerce_to_target_type(pstate, expr, types::BOOL, -1, CoercionContext::Assignment, location)? {
        Some(e) => Ok(e),
        None => Err(AnalyzeError::datatype_mismatch(format!(
            "argument of {construct} must be type boolean, not type {}",
            type_name(pstate, source)
        ))
        .at(location)),
    }
}

/// Coerce to exactly `target`, for clauses such as LIMIT.
pub(crate) fn coerce_to_specific_type(pstate: &ParseState<'_>, expr: Expr, target: Oid, construct: &str) -> AnalyzeResult<Expr> {
    let source = expr.type_oid();
    if source == target {
        return Ok(expr);
    }
    let location = expr.location();
    match coerce_to_target_type(pstate, expr, target, -1, CoercionContext::Assignment, location)? {
        Some(e) => Ok(e),
        None => Err(AnalyzeError::datatype_mismatch(format!(
            "argument of {construct} must be type {}, not type {}",
            type_name(pstate, target),
            type_name(pstate, source)
        ))
        .at(location)),
    }
}

fn category(pstate: &ParseState<'_>, t: Oid) -> (TypeCategory, bool) {
    pstate
        .catalog()
        .type_info(t)
        .map(|i| (i.category, i.preferred))
        .unwrap_or((TypeCategory::User, false))
}

/// Pick the type a set of expressions resolves to, for `context` (UNION,
/// VALUES, JOIN/USING, ...).
pub(crate) fn select_common_type(pstate: &ParseState<'_>, exprs: &[&Expr], context: &str) -> AnalyzeResult<Oid> {
    let Some(first) = exprs.first() else {
        return Ok(types::TEXT);
    };
    let mut ptype = first.type_oid();
    if exprs.iter().all(|e| e.type_oid() == ptype) && ptype != types::UNKNOWN {
        return Ok(ptype);
    }
    let (mut pcategory, mut ppreferred) = category(pstate, ptype);
    for expr in &exprs[1..] {
        let ntype = expr.type_oid();
        if ntype == types::UNKNOWN || ntype == ptype {
            continue;
        }
        if ptype == types::UNKNOWN {
            ptype = ntype;
            (pcategory, ppreferred) = category(pstate, ntype);
            continue;
        }
        let (ncategory, npreferred) = category(pstate, ntype);
        if ncategory != pcategory {
            return Err(AnalyzeError::datatype_mismatch(format!(
                "{context} types {} and {} cannot be matched",
                type_name(pstate, ptype),
                type_name(pstate, ntype)
            ))
            .at(expr.location()));
        }
        if !ppreferred
            && pstate.catalog().can_coerce(ptype, ntype, CoercionContext::Implicit)
            && !pstate.catalog().can_coerce(ntype, ptype, CoercionContext::Implicit)
        {
            ptype = ntype;
            pcategory = ncategory;
            ppreferred = npreferred;
        }
    }
    if ptype == types::UNKNOWN {
        ptype = types::TEXT;
    }
    Ok(ptype)
}

/// Coerce one member of a set to the type [`select_common_type`] chose.
pub(crate) fn coerce_to_common_type(pstate: &ParseState<'_>, expr: Expr, target: Oid, context: &str) -> AnalyzeResult<Expr> {
    let source = expr.type_oid();
    if source == target {
        return Ok(expr);
    }
    let location = expr.location();
    match coerce_to_target_type(pstate, expr, target, -1, CoercionContext::Implicit, location)? {
        Some(e) => Ok(e),
        None => Err(AnalyzeError::datatype_mismatch(format!(
            "{context} could not convert type {} to {}",
            type_name(pstate, source),
            type_name(pstate, target)
        ))
        .at(location)),
    }
}

// ── Overload resolution ────────────────────────────────────────────────────

/// Narrow `candidates` (each a list of declared argument types) for the
/// actual argument types. Returns the indexes of the survivors.
fn best_candidates(pstate: &ParseState<'_>, candidates: &[Vec<Oid>], actual: &[Oid]) -> Vec<usize> {
    let matches_exact = |decl: &[Oid]| decl.iter().zip(actual).all(|(d, a)| d == a || *d == types::ANY);
    if let Some(i) = candidates.iter().position(|c| matches_exact(c)) {
        return vec![i];
    }

    // One unknown side of a binary operator: assume it has the other side's type.
    if actual.len() == 2 {
        let known = match (actual[0], actual[1]) {
            (types::UNKNOWN, t) | (t, types::UNKNOWN) if t != types::UNKNOWN => Some(t),
            _ => None,
        };
        if let Some(t) = known {
            if let Some(i) = candidates.iter().position(|c| c[0] == t && c[1] == t) {
                return vec![i];
            }
        }
    }

    let mut survivors: Vec<usize> = (0..candidates.len())
        .filter(|&i| {
            candidates[i]
                .iter()
                .zip(actual)
                .all(|(d, a)| can_coerce_type(pstate, *a, *d, CoercionContext::Implicit))
        })
        .collect();
    if survivors.len() <= 1 {
        return survivors;
    }

    let exact_count = |i: usize| candidates[i].iter().zip(actual).filter(|(d, a)| d == a).count();
    let best = survivors.iter().map(|&i| exact_count(i)).max().unwrap_or(0);
    survivors.retain(|&i| exact_count(i) == best);
    if survivors.len() <= 1 {
        return survivors;
    }

    let preferred_count = |i: usize| {
        candidates[i]
            .iter()
            .zip(actual)
            .filter(|(d, a)| **a != types::UNKNOWN && category(pstate, **d).1)
            .count()
    };
    let best = survivors.iter().map(|&i| preferred_count(i)).max().unwrap_or(0);
    survivors.retain(|&i| preferred_count(i) == best);
    if survivors.len() <= 1 {
        return survivors;
    }

    // Unknown inputs lean towards the string category.
    for (pos, a) in actual.iter().enumerate() {
        if *a != types::UNKNOWN {
            continue;
        }
        let stringy: Vec<usize> = survivors
            .iter()
            .copied()
            .filter(|&i| category(pstate, candidates[i][pos]).0 == TypeCategory::String)
            .collect();
        if !stringy.is_empty() {
            survivors = stringy;
        }
    }
    survivors
}

fn op_signature(pstate: &ParseState<'_>, name: &str, left: Option<Oid>, right: Oid) -> String {
    match left {
        Some(l) => format!("{} {name} {}", type_name(pstate, l), type_name(pstate, right)),
        None => format!("{name} {}", type_name(pstate, right)),
    }
}

/// Resolve an operator by name and argument types.
pub(crate) fn resolve_operator(
    pstate: &ParseState<'_>,
    name: &str,
    left: Option<Oid>,
    right: Oid,
    location: Location,
) -> AnalyzeResult<OperatorInfo> {
    let candidates: Vec<OperatorInfo> = pstate
        .catalog()
        .operator_candidates(name)
        .into_iter()
        .filter(|o| (o.left == INVALID_OID) == left.is_none())
        .collect();
    let decls: Vec<Vec<Oid>> = candidates
        .iter()
        .map(|o| match left {
            Some(_) => vec![o.left, o.right],
            None => vec![o.right],
        })
        .collect();
    let actual: Vec<Oid> = left.into_iter().chain(std::iter::once(right)).collect();
    let best = best_candidates(pstate, &decls, &actual);
    match best.as_slice() {
        [i] => Ok(candidates[*i].clone()),
        [] => Err(AnalyzeError::undefined_function(format!(
            "operator does not exist: {}",
            op_signature(pstate, name, left, right)
        ))
        .with_hint("No operator matches the given name and argument type(s). You might need to add explicit type casts.")
        .at(location)),
        _ => Err(AnalyzeError::undefined_function(format!(
            "operator is not unique: {}",
            op_signature(pstate, name, left, right)
        ))
        .with_hint("Could not choose a best candidate operator. You might need to add explicit type casts.")
        .at(location)),
    }
}

/// Build an operator expression, coercing the arguments to the operator's
/// declared input types.
pub(crate) fn make_op(
    pstate: &ParseState<'_>,
    name: &str,
    left: Option<Expr>,
    right: Expr,
    location: Location,
) -> AnalyzeResult<Expr> {
    let op = resolve_operator(pstate, name, left.as_ref().map(Expr::type_oid), right.type_oid(), location)?;
    let mut args = Vec::with_capacity(2);
    if let Some(l) = left {
        let loc = l.location();
        args.push(coerce_type(pstate, l, op.left, -1, CoercionForm::Implicit, loc)?);
    }
    let loc = right.location();
    args.push(coerce_type(pstate, right, op.right, -1, CoercionForm::Implicit, loc)?);
    let retset = pstate.catalog().function(op.funcid).is_some_and(|f| f.retset);
    let mut expr = Expr::Op(OpExpr {
        opno: op.oid,
        opfuncid: op.funcid,
        opresulttype: op.result,
        opretset: retset,
        opcollid: INVALID_OID,
        inputcollid: INVALID_OID,
        args,
        location,
    });
    finish_node_collation(pstate, &mut expr)?;
    Ok(expr)
}

/// Resolve a function by name and argument types.
pub(crate) fn resolve_function(
    pstate: &ParseState<'_>,
    name: &str,
    arg_types: &[Oid],
    location: Location,
) -> AnalyzeResult<FunctionInfo> {
    let candidates: Vec<FunctionInfo> = pstate
        .catalog()
        .function_candidates(name)
        .into_iter()
        .filter(|f| f.arg_types.len() == arg_types.len())
        .collect();
    let decls: Vec<Vec<Oid>> = candidates.iter().map(|f| f.arg_types.clone()).collect();
    let best = best_candidates(pstate, &decls, arg_types);
    let signature = || {
        let args: Vec<String> = arg_types.iter().map(|t| type_name(pstate, *t)).collect();
        format!("{name}({})", args.join(", "))
    };
    match best.as_slice() {
        [i] => Ok(candidates[*i].clone()),
        [] => Err(AnalyzeError::undefined_function(format!("function {} does not exist", signature()))
            .with_hint("No function matches the given name and argument types. You might need to add explicit type casts.")
            .at(location)),
        _ => Err(AnalyzeError::undefined_function(format!("function {} is not unique", signature()))
            .with_hint("Could not choose a best candidate function. You might need to add explicit type casts.")
            .at(location)),
    }
}

/// Coerce call arguments to the declared types of the chosen function.
pub(crate) fn coerce_function_args(pstate: &ParseState<'_>, args: Vec<Expr>, declared: &[Oid]) -> AnalyzeResult<Vec<Expr>> {
    args.into_iter()
        .zip(declared)
        .map(|(arg, decl)| {
            let loc = arg.location();
            coerce_type(pstate, arg, *decl, -1, CoercionForm::Implicit, loc)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::AnalyzeEnv;
    use crate::catalog::MemoryCatalog;
    use crate::config::{AnalyzerConfig, Grammar};
    use crate::session::Session;

    fn with_pstate(params: ParamTypes, f: impl FnOnce(&ParseState<'_>)) {
        let catalog = MemoryCatalog::new();
        let config = AnalyzerConfig::default();
        let session = Session::default();
        let env = AnalyzeEnv::new(&catalog, &config, &session);
        let ps = ParseState::new(env, "", params, Grammar::Postgres);
        f(&ps);
    }

    fn unknown(text: &str) -> Expr {
        Expr::Const(Const {
            consttype: types::UNKNOWN,
            consttypmod: -1,
            constcollid: INVALID_OID,
            value: ConstValue::Text(text.to_string()),
            location: Some(3),
        })
    }

    #[test]
    fn test_unknown_literal_folds() {
        with_pstate(ParamTypes::Fixed(vec![]), |ps| {
            let e = coerce_type(ps, unknown(" 42 "), types::INT4, -1, CoercionForm::Implicit, None).unwrap();
            assert!(matches!(e, Expr::Const(Const { consttype: types::INT4, value: ConstValue::Int(42), .. })));
            let err = coerce_type(ps, unknown("abc"), types::INT4, -1, CoercionForm::Implicit, None).unwrap_err();
            assert_eq!(err.message(), "invalid input syntax for type integer: \"abc\"");
            assert_eq!(err.location(), Some(3));
            let b = coerce_type(ps, unknown("yes"), types::BOOL, -1, CoercionForm::Implicit, None).unwrap();
            assert_eq!(b.type_oid(), types::BOOL);
        });
    }

    #[test]
    fn test_select_common_type() {
        with_pstate(ParamTypes::Fixed(vec![]), |ps| {
            let one = make_const(ps, types::INT4, ConstValue::Int(1), None);
            let two = make_const(ps, types::NUMERIC, ConstValue::Text("2.0".into()), None);
            assert_eq!(select_common_type(ps, &[&one, &two], "UNION").unwrap(), types::NUMERIC);
            assert_eq!(select_common_type(ps, &[&unknown("a"), &unknown("b")], "UNION").unwrap(), types::TEXT);
            let text = make_const(ps, types::TEXT, ConstValue::Text("x".into()), None);
            let err = select_common_type(ps, &[&one, &text], "UNION").unwrap_err();
            assert_eq!(err.message(), "UNION types integer and text cannot be matched");
        });
    }

    #[test]
    fn test_operator_resolution() {
        with_pstate(ParamTypes::Fixed(vec![]), |ps| {
            let op = resolve_operator(ps, "=", Some(types::INT4), types::INT8, None).unwrap();
            assert_eq!((op.left, op.right), (types::INT8, types::INT8));
            let op = resolve_operator(ps, "=", Some(types::INT4), types::UNKNOWN, None).unwrap();
            assert_eq!((op.left, op.right), (types::INT4, types::INT4));
            let err = resolve_operator(ps, "=", Some(types::INT4), types::TEXT, None).unwrap_err();
            assert_eq!(err.message(), "operator does not exist: integer = text");
        });
    }

    #[test]
    fn test_function_resolution() {
        with_pstate(ParamTypes::Fixed(vec![]), |ps| {
            let f = resolve_function(ps, "sum", &[types::INT4], None).unwrap();
            assert_eq!(f.result_type, types::INT8);
            let f = resolve_function(ps, "length", &[types::VARCHAR], None).unwrap();
            assert_eq!(f.arg_types, vec![types::TEXT]);
            let err = resolve_function(ps, "nosuch", &[], None).unwrap_err();
            assert_eq!(err.message(), "function nosuch() does not exist");
        });
    }

    #[test]
    fn test_variable_param_deduction() {
        with_pstate(ParamTypes::Variable(vec![types::UNKNOWN]), |ps| {
            let p = Expr::Param(Param {
                paramid: 1,
                paramtype: types::UNKNOWN,
                paramtypmod: -1,
                paramcollid: INVALID_OID,
                location: None,
            });
            let e = coerce_type(ps, p.clone(), types::INT4, -1, CoercionForm::Implicit, None).unwrap();
            assert_eq!(e.type_oid(), types::INT4);
            assert_eq!(ps.param_types(), vec![types::INT4]);
            let err = coerce_type(ps, p, types::TEXT, -1, CoercionForm::Implicit, None).unwrap_err();
            assert_eq!(err.message(), "inconsistent types deduced for parameter $1");
        });
    }
}
