//! Expression transformation: raw expressions to typed [`Expr`] trees.

use crate::analyze::coerce::{
    coerce_function_args, coerce_to_boolean, coerce_type, make_const, make_op, resolve_function,
    resolve_operator,
};
use crate::analyze::collation::finish_node_collation;
use crate::analyze::parse_state::{ExprKind, ParamTypes, ParseState};
use crate::analyze::relation::{
    col_name_to_var, error_missing_column, error_missing_rte, make_var, refname_range_table_entry,
    scan_rte_for_column, type_name,
};
use crate::analyze::sub_analyze_select;
use crate::catalog::{CoercionContext, FunctionKind, types};
use crate::config::Grammar;
use crate::error::{AnalyzeError, AnalyzeResult, Location};
use crate::nodes::primnodes::{
    Aggref, BoolExpr, CoercionForm, CollateExpr, ColumnRefJoin, Expr, FuncExpr, NullTest, Param,
    RowExpr, RownumExpr, SetToDefault, SubLink, SubLinkType, Var, WindowFunc, contain_aggs,
    contain_window_funcs,
};
use crate::nodes::query::{AclMode, RteKind};
use crate::nodes::raw::{BoolOp, ColumnField, RawExpr, RawSubLinkKind, RawValue, WindowDef};
use crate::nodes::{INVALID_OID, Index};

/// Transform `raw` for the clause named by `kind`.
pub(crate) fn transform_expr(pstate: &mut ParseState<'_>, raw: &RawExpr, kind: ExprKind) -> AnalyzeResult<Expr> {
    pstate.with_expr_kind(kind, |ps| transform_expr_recurse(ps, raw))
}

pub(crate) fn transform_expr_recurse(pstate: &mut ParseState<'_>, raw: &RawExpr) -> AnalyzeResult<Expr> {
    match raw {
        RawExpr::ColumnRef { fields, location } => transform_column_ref(pstate, fields, *location),
        RawExpr::OuterJoinMarker { column, location } => transform_outer_join_marker(pstate, column, *location),
        RawExpr::Const { value, location } => Ok(make_literal(pstate, value, *location)),
        RawExpr::Param { number, location } => transform_param(pstate, *number, *location),
        RawExpr::Op {
            name,
            left,
            right,
            location,
        } => {
            let left = left
                .as_deref()
                .map(|l| transform_expr_recurse(pstate, l))
                .transpose()?;
            let right = transform_expr_recurse(pstate, right)?;
            let name = if name == "!=" { "<>" } else { name.as_str() };
            make_op(pstate, name, left, right, *location)
        }
        RawExpr::Bool { op, args, location } => {
            let construct = match op {
                BoolOp::And => "AND",
                BoolOp::Or => "OR",
                BoolOp::Not => "NOT",
            };
            let mut out = Vec::with_capacity(args.len());
            for arg in args {
                let e = transform_expr_recurse(pstate, arg)?;
                out.push(coerce_to_boolean(pstate, e, construct)?);
            }
            Ok(Expr::Bool(BoolExpr {
                boolop: *op,
                args: out,
                location: *location,
            }))
        }
        RawExpr::FuncCall {
            name,
            args,
            agg_star,
            agg_distinct,
            over,
            location,
        } => transform_func_call(pstate, name, args, *agg_star, *agg_distinct, over.as_deref(), *location),
        RawExpr::TypeCast {
            arg,
            type_name: tname,
            location,
        } => {
            let target = pstate.catalog().type_by_name(tname).ok_or_else(|| {
                AnalyzeError::undefined_object(format!("type \"{tname}\" does not exist")).at(*location)
            })?;
            let arg = transform_expr_recurse(pstate, arg)?;
            let source = arg.type_oid();
            if !pstate.catalog().can_coerce(source, target.oid, CoercionContext::Explicit) {
                return Err(AnalyzeError::datatype_mismatch(format!(
                    "cannot cast type {} to {}",
                    type_name(pstate, source),
                    target.name
                ))
                .at(*location));
            }
            coerce_type(pstate, arg, target.oid, -1, CoercionForm::Explicit, *location)
        }
        RawExpr::Collate {
            arg,
            collation,
            location,
        } => {
            let arg = transform_expr_recurse(pstate, arg)?;
            let coll_oid = pstate.catalog().collation_by_name(collation).ok_or_else(|| {
                AnalyzeError::undefined_object(format!(
                    "collation \"{collation}\" for encoding \"UTF8\" does not exist"
                ))
                .at(*location)
            })?;
            let collatable = pstate
                .catalog()
                .type_info(arg.type_oid())
                .is_some_and(|t| t.collatable);
            if !collatable && arg.type_oid() != types::UNKNOWN {
                return Err(AnalyzeError::datatype_mismatch(format!(
                    "collations are not supported by type {}",
                    type_name(pstate, arg.type_oid())
                ))
                .at(*location));
            }
            let arg = if arg.type_oid() == types::UNKNOWN {
                coerce_type(pstate, arg, types::TEXT, -1, CoercionForm::Implicit, *location)?
            } else {
                arg
            };
            Ok(Expr::Collate(CollateExpr {
                arg: Box::new(arg),
                coll_oid,
                location: *location,
            }))
        }
        RawExpr::SubLink {
            kind,
            testexpr,
            subselect,
            location,
        } => transform_sub_link(pstate, kind, testexpr.as_deref(), subselect, *location),
        RawExpr::Row { args, location } => {
            let args = args
                .iter()
                .map(|a| transform_expr_recurse(pstate, a))
                .collect::<AnalyzeResult<Vec<_>>>()?;
            Ok(Expr::Row(RowExpr {
                args,
                row_typeid: types::RECORD,
                location: *location,
            }))
        }
        RawExpr::NullTest { arg, is_null, location } => {
            let arg = transform_expr_recurse(pstate, arg)?;
            Ok(Expr::NullTest(NullTest {
                arg: Box::new(arg),
                is_null: *is_null,
                location: *location,
            }))
        }
        RawExpr::Default { location } => {
            if !matches!(
                pstate.expr_kind,
                ExprKind::InsertTarget | ExprKind::UpdateSource | ExprKind::Values | ExprKind::ValuesSingle
            ) {
                return Err(AnalyzeError::syntax("DEFAULT is not allowed in this context").at(*location));
            }
            Ok(Expr::SetToDefault(SetToDefault {
                type_id: INVALID_OID,
                typmod: -1,
                collation: INVALID_OID,
                location: *location,
            }))
        }
        RawExpr::Rownum { location } => match pstate.grammar() {
            Grammar::Oracle => Ok(Expr::Rownum(RownumExpr { location: *location })),
            Grammar::Postgres => {
                transform_column_ref(pstate, &[ColumnField::Name("rownum".to_string())], *location)
            }
        },
    }
}

// ── Leaves ─────────────────────────────────────────────────────────────────

fn make_literal(pstate: &ParseState<'_>, value: &RawValue, location: Location) -> Expr {
    use crate::nodes::primnodes::{Const, ConstValue};
    let unknown = |value| {
        Expr::Const(Const {
            consttype: types::UNKNOWN,
            consttypmod: -1,
            constcollid: INVALID_OID,
            value,
            location,
        })
    };
    match value {
        RawValue::Integer(v) => {
            let t = if i32::try_from(*v).is_ok() { types::INT4 } else { types::INT8 };
            make_const(pstate, t, ConstValue::Int(*v), location)
        }
        RawValue::Numeric(text) => make_const(pstate, types::NUMERIC, ConstValue::Text(text.clone()), location),
        RawValue::Bool(b) => make_const(pstate, types::BOOL, ConstValue::Bool(*b), location),
        RawValue::String(s) => unknown(ConstValue::Text(s.clone())),
        RawValue::Null => unknown(ConstValue::Null),
    }
}

fn transform_param(pstate: &ParseState<'_>, number: usize, location: Location) -> AnalyzeResult<Expr> {
    let missing = || AnalyzeError::undefined_parameter(format!("there is no parameter ${number}")).at(location);
    if number == 0 {
        return Err(missing());
    }
    let paramtype = {
        let mut params = pstate.params.borrow_mut();
        match &mut *params {
            ParamTypes::Fixed(list) => *list.get(number - 1).ok_or_else(missing)?,
            ParamTypes::Variable(list) => {
                if list.len() < number {
                    list.resize(number, types::UNKNOWN);
                }
                list[number - 1]
            }
        }
    };
    let paramcollid = match pstate.catalog().type_info(paramtype) {
        Some(t) if t.collatable => crate::catalog::collations::DEFAULT,
        _ => INVALID_OID,
    };
    Ok(Expr::Param(Param {
        paramid: number,
        paramtype,
        paramtypmod: -1,
        paramcollid,
        location,
    }))
}

/// Record that the query reads the column behind `expr`.
pub(crate) fn mark_var_for_select_priv(pstate: &mut ParseState<'_>, expr: &Expr) -> AnalyzeResult<()> {
    let Expr::Var(var) = expr else {
        return Ok(());
    };
    if var.varlevelsup != 0 {
        return Ok(());
    }
    let rte = pstate.rte_mut(var.varno)?;
    let aliased = match &rte.kind {
        RteKind::Relation { .. } | RteKind::Subquery { .. } => {
            rte.required_perms |= AclMode::SELECT;
            return Ok(());
        }
        RteKind::Join { joinaliasvars, .. } => match usize::try_from(var.varattno) {
            Ok(0) => joinaliasvars.clone(),
            Ok(n) => joinaliasvars.get(n - 1).cloned().into_iter().collect(),
            Err(_) => Vec::new(),
        },
        _ => return Ok(()),
    };
    for e in &aliased {
        mark_var_for_select_priv(pstate, e)?;
    }
    Ok(())
}

fn whole_row_var(rtindex: Index, levelsup: u32, location: Location) -> Expr {
    let mut var = Var::new(rtindex, 0, types::RECORD, -1, INVALID_OID);
    var.varlevelsup = levelsup;
    var.location = location;
    Expr::Var(var)
}

/// Resolve `rel.col` against the entry found for `rel`.
fn qualified_column(
    pstate: &ParseState<'_>,
    schema: Option<&str>,
    relname: &str,
    colname: &str,
    location: Location,
) -> AnalyzeResult<Expr> {
    let (rtindex, levelsup) = refname_range_table_entry(pstate, schema, relname, location)?
        .ok_or_else(|| error_missing_rte(pstate, relname, location))?;
    let rte = pstate.rte_at_level(rtindex, levelsup)?;
    match scan_rte_for_column(pstate, rte, colname, location)? {
        Some(attnum) => make_var(pstate, rtindex, attnum, levelsup, location),
        None => Err(error_missing_column(pstate, Some(relname), colname, location)),
    }
}

fn transform_column_ref(pstate: &mut ParseState<'_>, fields: &[ColumnField], location: Location) -> AnalyzeResult<Expr> {
    use ColumnField::{Name, Star};
    let expr = match fields {
        [Name(col)] => match col_name_to_var(pstate, col, location)? {
            Some((var, _)) => var,
            None => {
                // A bare relation name stands for its whole row.
                match refname_range_table_entry(pstate, None, col, location)? {
                    Some((rtindex, levelsup)) => whole_row_var(rtindex, levelsup, location),
                    None => return Err(error_missing_column(pstate, None, col, location)),
                }
            }
        },
        [Name(rel), Name(col)] => qualified_column(pstate, None, rel, col, location)?,
        [Name(schema), Name(rel), Name(col)] => qualified_column(pstate, Some(schema), rel, col, location)?,
        [Name(rel), Star] => {
            let (rtindex, levelsup) = refname_range_table_entry(pstate, None, rel, location)?
                .ok_or_else(|| error_missing_rte(pstate, rel, location))?;
            whole_row_var(rtindex, levelsup, location)
        }
        [Star] => {
            return Err(
                AnalyzeError::feature_not_supported("row expansion via \"*\" is not supported here").at(location),
            );
        }
        _ => {
            let dotted: Vec<&str> = fields
                .iter()
                .map(|f| match f {
                    Name(n) => n.as_str(),
                    Star => "*",
                })
                .collect();
            return Err(AnalyzeError::syntax(format!(
                "improper qualified name (too many dotted names): {}",
                dotted.join(".")
            ))
            .at(location));
        }
    };
    mark_var_for_select_priv(pstate, &expr)?;
    Ok(expr)
}

fn transform_outer_join_marker(pstate: &mut ParseState<'_>, column: &RawExpr, location: Location) -> AnalyzeResult<Expr> {
    if pstate.grammar() != Grammar::Oracle {
        return Err(AnalyzeError::syntax("syntax error at or near \"(+)\"").at(location));
    }
    if !matches!(pstate.expr_kind, ExprKind::Where | ExprKind::JoinOn) {
        return Err(AnalyzeError::syntax(format!(
            "the outer join operator \"(+)\" is not allowed in {}",
            pstate.expr_kind.as_str()
        ))
        .at(location));
    }
    let inner = transform_expr_recurse(pstate, column)?;
    match inner {
        Expr::Var(var) if var.varlevelsup == 0 && var.varattno != 0 => {
            Ok(Expr::OuterJoinMarker(ColumnRefJoin { var, location }))
        }
        _ => Err(AnalyzeError::syntax(
            "the outer join operator \"(+)\" can only be applied to a column of the current query level",
        )
        .at(location)),
    }
}

// ── Function calls ─────────────────────────────────────────────────────────

fn transform_func_call(
    pstate: &mut ParseState<'_>,
    name: &str,
    raw_args: &[RawExpr],
    agg_star: bool,
    agg_distinct: bool,
    over: Option<&WindowDef>,
    location: Location,
) -> AnalyzeResult<Expr> {
    let mut args = Vec::with_capacity(raw_args.len());
    for a in raw_args {
        args.push(transform_expr_recurse(pstate, a)?);
    }
    let arg_types: Vec<_> = args.iter().map(Expr::type_oid).collect();
    let func = resolve_function(pstate, name, &arg_types, location)?;
    let args = coerce_function_args(pstate, args, &func.arg_types)?;
    let kind = pstate.expr_kind;

    if func.kind != FunctionKind::Aggregate {
        if agg_star {
            return Err(AnalyzeError::syntax(format!(
                "{name}(*) specified, but {name} is not an aggregate function"
            ))
            .at(location));
        }
        if agg_distinct {
            return Err(AnalyzeError::syntax(format!(
                "DISTINCT specified, but {name} is not an aggregate function"
            ))
            .at(location));
        }
    }

    match (func.kind, over) {
        (FunctionKind::Normal, Some(_)) => Err(AnalyzeError::windowing(format!(
            "OVER specified, but {name} is not a window function nor an aggregate function"
        ))
        .at(location)),
        (FunctionKind::Window, None) => {
            Err(AnalyzeError::windowing(format!("window function {name} requires an OVER clause")).at(location))
        }
        (FunctionKind::Normal, None) => {
            if func.retset && !kind.allows_set_returning() {
                return Err(AnalyzeError::feature_not_supported(format!(
                    "set-returning functions are not allowed in {}",
                    kind.as_str()
                ))
                .at(location));
            }
            let mut expr = Expr::Func(FuncExpr {
                funcid: func.oid,
                funcresulttype: func.result_type,
                funcretset: func.retset,
                funccollid: INVALID_OID,
                inputcollid: INVALID_OID,
                args,
                location,
            });
            finish_node_collation(pstate, &mut expr)?;
            Ok(expr)
        }
        (FunctionKind::Aggregate, None) => {
            if !kind.allows_aggregates() {
                return Err(AnalyzeError::grouping(format!(
                    "aggregate functions are not allowed in {}",
                    kind.as_str()
                ))
                .at(location));
            }
            if args.iter().any(contain_aggs) {
                return Err(AnalyzeError::grouping(
                    "aggregate function calls cannot contain aggregate function calls",
                )
                .at(location));
            }
            if args.iter().any(contain_window_funcs) {
                return Err(AnalyzeError::grouping(
                    "aggregate function calls cannot contain window function calls",
                )
                .at(location));
            }
            pstate.has_aggs = true;
            let mut expr = Expr::Aggref(Aggref {
                aggfnoid: func.oid,
                aggtype: func.result_type,
                aggcollid: INVALID_OID,
                inputcollid: INVALID_OID,
                args,
                aggstar: agg_star,
                aggdistinct: agg_distinct,
                agglevelsup: 0,
                location,
            });
            finish_node_collation(pstate, &mut expr)?;
            Ok(expr)
        }
        (FunctionKind::Window | FunctionKind::Aggregate, Some(def)) => {
            if !kind.allows_window_functions() {
                return Err(AnalyzeError::windowing(format!(
                    "window functions are not allowed in {}",
                    kind.as_str()
                ))
                .at(location));
            }
            if args.iter().any(contain_window_funcs) {
                return Err(AnalyzeError::windowing("window function calls cannot be nested").at(location));
            }
            if agg_distinct {
                return Err(AnalyzeError::feature_not_supported(
                    "DISTINCT is not implemented for window functions",
                )
                .at(location));
            }
            let winref = window_reference(pstate, def, location)?;
            pstate.has_window_funcs = true;
            let mut expr = Expr::WindowFunc(WindowFunc {
                winfnoid: func.oid,
                wintype: func.result_type,
                wincollid: INVALID_OID,
                inputcollid: INVALID_OID,
                args,
                winref,
                winstar: agg_star,
                winagg: func.kind == FunctionKind::Aggregate,
                location,
            });
            finish_node_collation(pstate, &mut expr)?;
            Ok(expr)
        }
    }
}

/// Find or register the window a call's `OVER` names, returning its
/// 1-based reference.
fn window_reference(pstate: &mut ParseState<'_>, def: &WindowDef, location: Location) -> AnalyzeResult<Index> {
    let is_plain_name = def.refname.is_none() && def.partition_clause.is_empty() && def.order_clause.is_empty();
    if let (Some(name), true) = (&def.name, is_plain_name) {
        return pstate
            .window_defs
            .iter()
            .position(|w| w.name.as_deref() == Some(name.as_str()))
            .map(|i| i + 1)
            .ok_or_else(|| AnalyzeError::windowing(format!("window \"{name}\" does not exist")).at(location));
    }
    let mut inline = def.clone();
    inline.name = None;
    pstate.window_defs.push(inline);
    Ok(pstate.window_defs.len())
}

// ── Sub-links ──────────────────────────────────────────────────────────────

fn transform_sub_link(
    pstate: &mut ParseState<'_>,
    kind: &RawSubLinkKind,
    testexpr: Option<&RawExpr>,
    subselect: &crate::nodes::raw::SelectStmt,
    location: Location,
) -> AnalyzeResult<Expr> {
    let query = sub_analyze_select(subselect, pstate, None, false)?;
    pstate.has_sub_links = true;
    let columns: Vec<&Expr> = query
        .target_list
        .iter()
        .filter(|t| !t.resjunk)
        .map(|t| &t.expr)
        .collect();

    match kind {
        RawSubLinkKind::Exists => Ok(Expr::SubLink(SubLink {
            sub_link_type: SubLinkType::Exists,
            testexpr: None,
            opno: None,
            subselect: Box::new(query),
            location,
        })),
        RawSubLinkKind::Expr => {
            if columns.len() != 1 {
                return Err(AnalyzeError::syntax("subquery must return only one column").at(location));
            }
            Ok(Expr::SubLink(SubLink {
                sub_link_type: SubLinkType::Expr,
                testexpr: None,
                opno: None,
                subselect: Box::new(query),
                location,
            }))
        }
        RawSubLinkKind::Any { op } => {
            let raw_test = testexpr.ok_or_else(|| AnalyzeError::internal("ANY sub-link without a test expression"))?;
            match columns.len() {
                0 => return Err(AnalyzeError::syntax("subquery has too few columns").at(location)),
                1 => {}
                _ => return Err(AnalyzeError::syntax("subquery has too many columns").at(location)),
            }
            let sub_type = columns[0].type_oid();
            let test = transform_expr_recurse(pstate, raw_test)?;
            let operator = resolve_operator(pstate, op, Some(test.type_oid()), sub_type, location)?;
            if operator.result != types::BOOL {
                return Err(AnalyzeError::datatype_mismatch(format!(
                    "operator {op} must return type boolean, not type {}",
                    type_name(pstate, operator.result)
                ))
                .at(location));
            }
            let test_loc = test.location();
            let test = coerce_type(pstate, test, operator.left, -1, CoercionForm::Implicit, test_loc)?;
            Ok(Expr::SubLink(SubLink {
                sub_link_type: SubLinkType::Any,
                testexpr: Some(Box::new(test)),
                opno: Some(operator.oid),
                subselect: Box::new(query),
                location,
            }))
        }
    }
}
