//! Raw parse tree.
//!
//! This is the grammar's output and the analyzer's input. Names are still
//! strings, literals are still untyped, and nothing has been looked up in
//! the catalog. The constructors at the bottom of this file are what tests
//! and callers without a grammar use to build trees by hand.

use serde::Serialize;

use crate::error::Location;
use crate::nodes::query::LockClauseStrength;

/// One top-level statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RawStmt {
    Select(Box<SelectStmt>),
    Insert(Box<InsertStmt>),
    Update(Box<UpdateStmt>),
    Delete(Box<DeleteStmt>),
    DeclareCursor(Box<DeclareCursorStmt>),
    Explain(Box<ExplainStmt>),
    CreateTableAs(Box<CreateTableAsStmt>),
    ExecDirect(Box<ExecDirectStmt>),
    /// Any statement the analyzer passes through untouched.
    Utility(UtilityStmt),
}

impl RawStmt {
    /// The command tag, as shown to clients.
    pub fn tag(&self) -> &'static str {
        match self {
            RawStmt::Select(s) if !s.values_lists.is_empty() => "VALUES",
            RawStmt::Select(_) => "SELECT",
            RawStmt::Insert(_) => "INSERT",
            RawStmt::Update(_) => "UPDATE",
            RawStmt::Delete(_) => "DELETE",
            RawStmt::DeclareCursor(_) => "DECLARE CURSOR",
            RawStmt::Explain(_) => "EXPLAIN",
            RawStmt::CreateTableAs(c) if c.relkind == ObjectKind::MatView => {
                "CREATE MATERIALIZED VIEW"
            }
            RawStmt::CreateTableAs(c) if c.is_select_into => "SELECT",
            RawStmt::CreateTableAs(_) => "CREATE TABLE AS",
            RawStmt::ExecDirect(_) => "EXECUTE DIRECT",
            RawStmt::Utility(u) => u.tag(),
        }
    }

    pub fn is_data_modifying(&self) -> bool {
        matches!(
            self,
            RawStmt::Insert(_) | RawStmt::Update(_) | RawStmt::Delete(_)
        )
    }
}

// ── Statements ─────────────────────────────────────────────────────────────

/// Set operator of a `SELECT`. `None` for a plain SELECT or VALUES.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SetOpKind {
    #[default]
    None,
    Union,
    Intersect,
    Except,
}

impl SetOpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetOpKind::None => "NONE",
            SetOpKind::Union => "UNION",
            SetOpKind::Intersect => "INTERSECT",
            SetOpKind::Except => "EXCEPT",
        }
    }
}

/// `DISTINCT` or `DISTINCT ON (...)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DistinctClause {
    All,
    On(Vec<RawExpr>),
}

/// A SELECT, a VALUES list, or a set operation over two SELECTs.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SelectStmt {
    pub distinct_clause: Option<DistinctClause>,
    pub into_clause: Option<IntoClause>,
    pub target_list: Vec<ResTarget>,
    pub from_clause: Vec<FromItem>,
    pub where_clause: Option<RawExpr>,
    pub group_clause: Vec<RawExpr>,
    pub having_clause: Option<RawExpr>,
    pub window_clause: Vec<WindowDef>,
    /// Non-empty for `VALUES (...), (...)`.
    pub values_lists: Vec<Vec<RawExpr>>,
    pub sort_clause: Vec<SortBy>,
    pub limit_offset: Option<RawExpr>,
    pub limit_count: Option<RawExpr>,
    pub locking_clause: Vec<LockingClause>,
    pub with_clause: Option<WithClause>,
    pub op: SetOpKind,
    pub all: bool,
    pub larg: Option<Box<SelectStmt>>,
    pub rarg: Option<Box<SelectStmt>>,
    pub location: Location,
}

/// `INSERT INTO relation [(cols)] { select | DEFAULT VALUES } [RETURNING]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsertStmt {
    pub relation: RangeVar,
    /// Column names, with `val` unset.
    pub cols: Vec<ResTarget>,
    /// `None` means `DEFAULT VALUES`.
    pub select: Option<Box<SelectStmt>>,
    pub returning_list: Vec<ResTarget>,
    pub with_clause: Option<WithClause>,
}

/// `UPDATE relation SET ... [FROM ...] [WHERE ...] [RETURNING ...]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateStmt {
    pub relation: RangeVar,
    /// `name = val` assignments.
    pub target_list: Vec<ResTarget>,
    pub where_clause: Option<RawExpr>,
    pub from_clause: Vec<FromItem>,
    pub returning_list: Vec<ResTarget>,
    pub with_clause: Option<WithClause>,
}

/// `DELETE FROM relation [USING ...] [WHERE ...] [RETURNING ...]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteStmt {
    pub relation: RangeVar,
    pub using_clause: Vec<FromItem>,
    pub where_clause: Option<RawExpr>,
    pub returning_list: Vec<ResTarget>,
    pub with_clause: Option<WithClause>,
}

/// Cursor options as written in `DECLARE ... CURSOR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CursorOptions {
    pub binary: bool,
    pub scroll: bool,
    pub no_scroll: bool,
    pub insensitive: bool,
    pub hold: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeclareCursorStmt {
    pub portal_name: String,
    pub options: CursorOptions,
    pub query: Box<RawStmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplainStmt {
    pub query: Box<RawStmt>,
    pub options: Vec<String>,
}

/// What `CREATE ... AS` creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ObjectKind {
    Table,
    MatView,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateTableAsStmt {
    pub query: Box<RawStmt>,
    pub into: IntoClause,
    pub relkind: ObjectKind,
    /// Set when produced by the SELECT INTO lift.
    pub is_select_into: bool,
}

/// `EXECUTE DIRECT ON (node [, ...]) 'query'`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecDirectStmt {
    pub node_names: Vec<String>,
    pub query: String,
}

/// Statements the analyzer does not look inside.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum UtilityStmt {
    CreateTableSpace { name: String, location: String },
    DropTableSpace { name: String, missing_ok: bool },
    /// Anything else, identified by its command tag.
    Other { tag: String },
}

impl UtilityStmt {
    pub fn tag(&self) -> &'static str {
        match self {
            UtilityStmt::CreateTableSpace { .. } => "CREATE TABLESPACE",
            UtilityStmt::DropTableSpace { .. } => "DROP TABLESPACE",
            UtilityStmt::Other { .. } => "UTILITY",
        }
    }
}

// ── Clauses ────────────────────────────────────────────────────────────────

/// Table persistence requested by `CREATE [TEMP | UNLOGGED] TABLE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Persistence {
    #[default]
    Permanent,
    Unlogged,
    Temp,
}

/// Target of `SELECT ... INTO` and `CREATE TABLE ... AS`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntoClause {
    pub rel: RangeVar,
    pub col_names: Vec<String>,
    pub persistence: Persistence,
    pub location: Location,
}

/// A possibly-qualified relation name in FROM or as a DML target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeVar {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub relname: String,
    /// False for `ONLY name`.
    pub inh: bool,
    pub alias: Option<Alias>,
    pub location: Location,
}

/// `AS name (col, ...)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alias {
    pub aliasname: String,
    pub colnames: Vec<String>,
}

impl Alias {
    pub fn new(name: impl Into<String>) -> Self {
        Alias {
            aliasname: name.into(),
            colnames: Vec::new(),
        }
    }

    pub fn with_columns(name: impl Into<String>, cols: &[&str]) -> Self {
        Alias {
            aliasname: name.into(),
            colnames: cols.iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RawJoinType {
    Cross,
    Inner,
    Left,
    Right,
    Full,
}

/// One item of a FROM list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FromItem {
    Relation(RangeVar),
    Subselect {
        lateral: bool,
        subquery: Box<SelectStmt>,
        alias: Option<Alias>,
        location: Location,
    },
    Function {
        lateral: bool,
        /// Must be a [`RawExpr::FuncCall`].
        call: RawExpr,
        alias: Option<Alias>,
        location: Location,
    },
    Join(Box<JoinItem>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinItem {
    pub join_type: RawJoinType,
    pub is_natural: bool,
    pub larg: FromItem,
    pub rarg: FromItem,
    pub using: Vec<String>,
    pub quals: Option<RawExpr>,
    pub alias: Option<Alias>,
    pub location: Location,
}

/// `name [(cols)] AS (query)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawCte {
    pub name: String,
    pub aliascolnames: Vec<String>,
    pub query: Box<RawStmt>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WithClause {
    pub ctes: Vec<RawCte>,
    pub recursive: bool,
    pub location: Location,
}

/// `FOR UPDATE [OF rel, ...] [NOWAIT]` and friends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockingClause {
    pub locked_rels: Vec<RangeVar>,
    pub strength: LockClauseStrength,
    pub no_wait: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SortDir {
    #[default]
    Default,
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum NullsOrder {
    #[default]
    Default,
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortBy {
    pub node: RawExpr,
    pub dir: SortDir,
    pub nulls: NullsOrder,
    pub location: Location,
}

/// A window specification, either in `WINDOW name AS (...)` or inline in
/// `OVER (...)`.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct WindowDef {
    pub name: Option<String>,
    pub refname: Option<String>,
    pub partition_clause: Vec<RawExpr>,
    pub order_clause: Vec<SortBy>,
    pub location: Location,
}

/// An item in a target list, a column list, a SET list or RETURNING.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResTarget {
    pub name: Option<String>,
    /// Subscripts or field selections following `name` in an assignment.
    pub indirection: Vec<String>,
    pub val: Option<RawExpr>,
    pub location: Location,
}

// ── Expressions ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ColumnField {
    Name(String),
    Star,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RawValue {
    Integer(i64),
    /// Decimal literal kept as text.
    Numeric(String),
    String(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BoolOp {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RawSubLinkKind {
    Exists,
    /// `testexpr op ANY (subselect)`, also `IN`.
    Any { op: String },
    /// Scalar sub-select.
    Expr,
}

/// A raw expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RawExpr {
    ColumnRef {
        fields: Vec<ColumnField>,
        location: Location,
    },
    /// `column(+)`: marks the column's table as the nullable side of an
    /// implied outer join.
    OuterJoinMarker {
        column: Box<RawExpr>,
        location: Location,
    },
    Const {
        value: RawValue,
        location: Location,
    },
    /// `$n`.
    Param {
        number: usize,
        location: Location,
    },
    /// Binary operator, or prefix operator when `left` is `None`.
    Op {
        name: String,
        left: Option<Box<RawExpr>>,
        right: Box<RawExpr>,
        location: Location,
    },
    Bool {
        op: BoolOp,
        args: Vec<RawExpr>,
        location: Location,
    },
    FuncCall {
        name: String,
        args: Vec<RawExpr>,
        agg_star: bool,
        agg_distinct: bool,
        over: Option<Box<WindowDef>>,
        location: Location,
    },
    TypeCast {
        arg: Box<RawExpr>,
        type_name: String,
        location: Location,
    },
    Collate {
        arg: Box<RawExpr>,
        collation: String,
        location: Location,
    },
    SubLink {
        kind: RawSubLinkKind,
        testexpr: Option<Box<RawExpr>>,
        subselect: Box<SelectStmt>,
        location: Location,
    },
    Row {
        args: Vec<RawExpr>,
        location: Location,
    },
    NullTest {
        arg: Box<RawExpr>,
        is_null: bool,
        location: Location,
    },
    /// `DEFAULT` in an INSERT or UPDATE value position.
    Default { location: Location },
    /// The pseudo-column `ROWNUM`.
    Rownum { location: Location },
}

impl RawExpr {
    pub fn location(&self) -> Location {
        match self {
            RawExpr::ColumnRef { location, .. }
            | RawExpr::OuterJoinMarker { location, .. }
            | RawExpr::Const { location, .. }
            | RawExpr::Param { location, .. }
            | RawExpr::Op { location, .. }
            | RawExpr::Bool { location, .. }
            | RawExpr::FuncCall { location, .. }
            | RawExpr::TypeCast { location, .. }
            | RawExpr::Collate { location, .. }
            | RawExpr::SubLink { location, .. }
            | RawExpr::Row { location, .. }
            | RawExpr::NullTest { location, .. }
            | RawExpr::Default { location }
            | RawExpr::Rownum { location } => *location,
        }
    }

    /// Set the source position, returning `self` for chaining.
    pub fn at(mut self, loc: usize) -> Self {
        match &mut self {
            RawExpr::ColumnRef { location, .. }
            | RawExpr::OuterJoinMarker { location, .. }
            | RawExpr::Const { location, .. }
            | RawExpr::Param { location, .. }
            | RawExpr::Op { location, .. }
            | RawExpr::Bool { location, .. }
            | RawExpr::FuncCall { location, .. }
            | RawExpr::TypeCast { location, .. }
            | RawExpr::Collate { location, .. }
            | RawExpr::SubLink { location, .. }
            | RawExpr::Row { location, .. }
            | RawExpr::NullTest { location, .. }
            | RawExpr::Default { location }
            | RawExpr::Rownum { location } => *location = Some(loc),
        }
        self
    }

    // ── Constructors ───────────────────────────────────────────────────

    /// Unqualified or dotted column reference: `col("a")`, `col("t.a")`.
    pub fn col(dotted: &str) -> Self {
        RawExpr::ColumnRef {
            fields: dotted
                .split('.')
                .map(|f| {
                    if f == "*" {
                        ColumnField::Star
                    } else {
                        ColumnField::Name(f.to_string())
                    }
                })
                .collect(),
            location: None,
        }
    }

    /// `*` in a target list.
    pub fn star() -> Self {
        RawExpr::ColumnRef {
            fields: vec![ColumnField::Star],
            location: None,
        }
    }

    pub fn int(v: i64) -> Self {
        RawExpr::Const {
            value: RawValue::Integer(v),
            location: None,
        }
    }

    pub fn numeric(text: &str) -> Self {
        RawExpr::Const {
            value: RawValue::Numeric(text.to_string()),
            location: None,
        }
    }

    pub fn string(text: &str) -> Self {
        RawExpr::Const {
            value: RawValue::String(text.to_string()),
            location: None,
        }
    }

    pub fn boolean(v: bool) -> Self {
        RawExpr::Const {
            value: RawValue::Bool(v),
            location: None,
        }
    }

    pub fn null() -> Self {
        RawExpr::Const {
            value: RawValue::Null,
            location: None,
        }
    }

    pub fn param(number: usize) -> Self {
        RawExpr::Param {
            number,
            location: None,
        }
    }

    pub fn op(name: &str, left: RawExpr, right: RawExpr) -> Self {
        RawExpr::Op {
            name: name.to_string(),
            left: Some(Box::new(left)),
            right: Box::new(right),
            location: None,
        }
    }

    pub fn prefix_op(name: &str, arg: RawExpr) -> Self {
        RawExpr::Op {
            name: name.to_string(),
            left: None,
            right: Box::new(arg),
            location: None,
        }
    }

    pub fn and(args: Vec<RawExpr>) -> Self {
        RawExpr::Bool {
            op: BoolOp::And,
            args,
            location: None,
        }
    }

    pub fn or(args: Vec<RawExpr>) -> Self {
        RawExpr::Bool {
            op: BoolOp::Or,
            args,
            location: None,
        }
    }

    pub fn not(arg: RawExpr) -> Self {
        RawExpr::Bool {
            op: BoolOp::Not,
            args: vec![arg],
            location: None,
        }
    }

    pub fn func(name: &str, args: Vec<RawExpr>) -> Self {
        RawExpr::FuncCall {
            name: name.to_string(),
            args,
            agg_star: false,
            agg_distinct: false,
            over: None,
            location: None,
        }
    }

    /// `count(*)`.
    pub fn count_star() -> Self {
        RawExpr::FuncCall {
            name: "count".to_string(),
            args: Vec::new(),
            agg_star: true,
            agg_distinct: false,
            over: None,
            location: None,
        }
    }

    /// Turn a function call into a window call with the given `OVER`.
    pub fn over(self, window: WindowDef) -> Self {
        match self {
            RawExpr::FuncCall {
                name,
                args,
                agg_star,
                agg_distinct,
                location,
                ..
            } => RawExpr::FuncCall {
                name,
                args,
                agg_star,
                agg_distinct,
                over: Some(Box::new(window)),
                location,
            },
            other => other,
        }
    }

    /// `column(+)`.
    pub fn outer(column: RawExpr) -> Self {
        RawExpr::OuterJoinMarker {
            column: Box::new(column),
            location: None,
        }
    }

    pub fn rownum() -> Self {
        RawExpr::Rownum { location: None }
    }

    pub fn cast(arg: RawExpr, type_name: &str) -> Self {
        RawExpr::TypeCast {
            arg: Box::new(arg),
            type_name: type_name.to_string(),
            location: None,
        }
    }

    pub fn collate(arg: RawExpr, collation: &str) -> Self {
        RawExpr::Collate {
            arg: Box::new(arg),
            collation: collation.to_string(),
            location: None,
        }
    }

    pub fn row(args: Vec<RawExpr>) -> Self {
        RawExpr::Row {
            args,
            location: None,
        }
    }

    pub fn is_null(arg: RawExpr) -> Self {
        RawExpr::NullTest {
            arg: Box::new(arg),
            is_null: true,
            location: None,
        }
    }

    pub fn default_value() -> Self {
        RawExpr::Default { location: None }
    }

    pub fn exists(subselect: SelectStmt) -> Self {
        RawExpr::SubLink {
            kind: RawSubLinkKind::Exists,
            testexpr: None,
            subselect: Box::new(subselect),
            location: None,
        }
    }

    pub fn scalar_subquery(subselect: SelectStmt) -> Self {
        RawExpr::SubLink {
            kind: RawSubLinkKind::Expr,
            testexpr: None,
            subselect: Box::new(subselect),
            location: None,
        }
    }

    /// `testexpr IN (subselect)`.
    pub fn in_subquery(testexpr: RawExpr, subselect: SelectStmt) -> Self {
        RawExpr::SubLink {
            kind: RawSubLinkKind::Any {
                op: "=".to_string(),
            },
            testexpr: Some(Box::new(testexpr)),
            subselect: Box::new(subselect),
            location: None,
        }
    }
}

impl ResTarget {
    /// An unnamed output expression.
    pub fn expr(val: RawExpr) -> Self {
        ResTarget {
            name: None,
            indirection: Vec::new(),
            val: Some(val),
            location: None,
        }
    }

    /// `val AS name`, or `name = val` in an UPDATE SET list.
    pub fn named(val: RawExpr, name: &str) -> Self {
        ResTarget {
            name: Some(name.to_string()),
            indirection: Vec::new(),
            val: Some(val),
            location: None,
        }
    }

    /// A bare column name, as in an INSERT column list.
    pub fn column(name: &str) -> Self {
        ResTarget {
            name: Some(name.to_string()),
            indirection: Vec::new(),
            val: None,
            location: None,
        }
    }
}

impl RangeVar {
    /// Parse `name` or `schema.name` (or `catalog.schema.name`).
    pub fn new(dotted: &str) -> Self {
        let mut parts: Vec<&str> = dotted.split('.').collect();
        let relname = parts.pop().unwrap_or_default().to_string();
        let schema = parts.pop().map(str::to_string);
        let catalog = parts.pop().map(str::to_string);
        RangeVar {
            catalog,
            schema,
            relname,
            inh: true,
            alias: None,
            location: None,
        }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(Alias::new(alias));
        self
    }

    /// `ONLY name`.
    pub fn only(mut self) -> Self {
        self.inh = false;
        self
    }

    /// The name the entry is referenced by: the alias if any, else the
    /// relation name.
    pub fn refname(&self) -> &str {
        self.alias
            .as_ref()
            .map(|a| a.aliasname.as_str())
            .unwrap_or(&self.relname)
    }

    pub fn is_qualified(&self) -> bool {
        self.catalog.is_some() || self.schema.is_some()
    }
}

impl FromItem {
    pub fn table(dotted: &str) -> Self {
        FromItem::Relation(RangeVar::new(dotted))
    }

    pub fn table_as(dotted: &str, alias: &str) -> Self {
        FromItem::Relation(RangeVar::new(dotted).with_alias(alias))
    }

    pub fn subselect(subquery: SelectStmt, alias: &str) -> Self {
        FromItem::Subselect {
            lateral: false,
            subquery: Box::new(subquery),
            alias: Some(Alias::new(alias)),
            location: None,
        }
    }

    pub fn lateral(subquery: SelectStmt, alias: &str) -> Self {
        FromItem::Subselect {
            lateral: true,
            subquery: Box::new(subquery),
            alias: Some(Alias::new(alias)),
            location: None,
        }
    }

    pub fn function(call: RawExpr, alias: Option<&str>) -> Self {
        FromItem::Function {
            lateral: false,
            call,
            alias: alias.map(Alias::new),
            location: None,
        }
    }

    pub fn join(join_type: RawJoinType, larg: FromItem, rarg: FromItem, quals: Option<RawExpr>) -> Self {
        FromItem::Join(Box::new(JoinItem {
            join_type,
            is_natural: false,
            larg,
            rarg,
            using: Vec::new(),
            quals,
            alias: None,
            location: None,
        }))
    }

    pub fn join_using(join_type: RawJoinType, larg: FromItem, rarg: FromItem, using: &[&str]) -> Self {
        FromItem::Join(Box::new(JoinItem {
            join_type,
            is_natural: false,
            larg,
            rarg,
            using: using.iter().map(|c| c.to_string()).collect(),
            quals: None,
            alias: None,
            location: None,
        }))
    }
}

impl SortBy {
    pub fn asc(node: RawExpr) -> Self {
        SortBy {
            node,
            dir: SortDir::Default,
            nulls: NullsOrder::Default,
            location: None,
        }
    }

    pub fn desc(node: RawExpr) -> Self {
        SortBy {
            node,
            dir: SortDir::Desc,
            nulls: NullsOrder::Default,
            location: None,
        }
    }
}

impl LockingClause {
    pub fn new(strength: LockClauseStrength) -> Self {
        LockingClause {
            locked_rels: Vec::new(),
            strength,
            no_wait: false,
        }
    }

    pub fn of(mut self, rels: &[&str]) -> Self {
        self.locked_rels = rels.iter().map(|r| RangeVar::new(r)).collect();
        self
    }

    pub fn nowait(mut self) -> Self {
        self.no_wait = true;
        self
    }
}

impl SelectStmt {
    /// `SELECT targets`.
    pub fn select(targets: Vec<ResTarget>) -> Self {
        SelectStmt {
            target_list: targets,
            ..Default::default()
        }
    }

    /// `VALUES (row), (row), ...`.
    pub fn values(rows: Vec<Vec<RawExpr>>) -> Self {
        SelectStmt {
            values_lists: rows,
            ..Default::default()
        }
    }

    /// `larg op [ALL] rarg`.
    pub fn set_op(op: SetOpKind, all: bool, larg: SelectStmt, rarg: SelectStmt) -> Self {
        SelectStmt {
            op,
            all,
            larg: Some(Box::new(larg)),
            rarg: Some(Box::new(rarg)),
            ..Default::default()
        }
    }

    pub fn from(mut self, item: FromItem) -> Self {
        self.from_clause.push(item);
        self
    }

    pub fn filter(mut self, qual: RawExpr) -> Self {
        self.where_clause = Some(qual);
        self
    }

    pub fn group_by(mut self, exprs: Vec<RawExpr>) -> Self {
        self.group_clause = exprs;
        self
    }

    pub fn having(mut self, qual: RawExpr) -> Self {
        self.having_clause = Some(qual);
        self
    }

    pub fn order_by(mut self, sorts: Vec<SortBy>) -> Self {
        self.sort_clause = sorts;
        self
    }

    pub fn limit(mut self, count: RawExpr) -> Self {
        self.limit_count = Some(count);
        self
    }

    pub fn offset(mut self, offset: RawExpr) -> Self {
        self.limit_offset = Some(offset);
        self
    }

    pub fn lock(mut self, clause: LockingClause) -> Self {
        self.locking_clause.push(clause);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct_clause = Some(DistinctClause::All);
        self
    }

    pub fn distinct_on(mut self, exprs: Vec<RawExpr>) -> Self {
        self.distinct_clause = Some(DistinctClause::On(exprs));
        self
    }

    pub fn into_table(mut self, rel: &str) -> Self {
        self.into_clause = Some(IntoClause {
            rel: RangeVar::new(rel),
            col_names: Vec::new(),
            persistence: Persistence::Permanent,
            location: None,
        });
        self
    }

    pub fn with(mut self, with: WithClause) -> Self {
        self.with_clause = Some(with);
        self
    }

    pub fn window(mut self, def: WindowDef) -> Self {
        self.window_clause.push(def);
        self
    }

    pub fn into_stmt(self) -> RawStmt {
        RawStmt::Select(Box::new(self))
    }
}

impl WithClause {
    pub fn new(recursive: bool, ctes: Vec<RawCte>) -> Self {
        WithClause {
            ctes,
            recursive,
            location: None,
        }
    }
}

impl RawCte {
    pub fn new(name: &str, query: RawStmt) -> Self {
        RawCte {
            name: name.to_string(),
            aliascolnames: Vec::new(),
            query: Box::new(query),
            location: None,
        }
    }

    pub fn with_columns(mut self, cols: &[&str]) -> Self {
        self.aliascolnames = cols.iter().map(|c| c.to_string()).collect();
        self
    }
}

impl InsertStmt {
    pub fn new(relation: &str, select: Option<SelectStmt>) -> Self {
        InsertStmt {
            relation: RangeVar::new(relation),
            cols: Vec::new(),
            select: select.map(Box::new),
            returning_list: Vec::new(),
            with_clause: None,
        }
    }

    pub fn columns(mut self, cols: &[&str]) -> Self {
        self.cols = cols.iter().map(|c| ResTarget::column(c)).collect();
        self
    }

    pub fn returning(mut self, targets: Vec<ResTarget>) -> Self {
        self.returning_list = targets;
        self
    }

    pub fn into_stmt(self) -> RawStmt {
        RawStmt::Insert(Box::new(self))
    }
}

impl UpdateStmt {
    pub fn new(relation: &str, assignments: Vec<ResTarget>) -> Self {
        UpdateStmt {
            relation: RangeVar::new(relation),
            target_list: assignments,
            where_clause: None,
            from_clause: Vec::new(),
            returning_list: Vec::new(),
            with_clause: None,
        }
    }

    pub fn filter(mut self, qual: RawExpr) -> Self {
        self.where_clause = Some(qual);
        self
    }

    pub fn into_stmt(self) -> RawStmt {
        RawStmt::Update(Box::new(self))
    }
}

impl DeleteStmt {
    pub fn new(relation: &str) -> Self {
        DeleteStmt {
            relation: RangeVar::new(relation),
            using_clause: Vec::new(),
            where_clause: None,
            returning_list: Vec::new(),
            with_clause: None,
        }
    }

    pub fn using(mut self, item: FromItem) -> Self {
        self.using_clause.push(item);
        self
    }

    pub fn filter(mut self, qual: RawExpr) -> Self {
        self.where_clause = Some(qual);
        self
    }

    pub fn into_stmt(self) -> RawStmt {
        RawStmt::Delete(Box::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_col_splits_dotted_name() {
        match RawExpr::col("t.a") {
            RawExpr::ColumnRef { fields, .. } => assert_eq!(
                fields,
                vec![ColumnField::Name("t".into()), ColumnField::Name("a".into())]
            ),
            other => panic!("unexpected {other:?}"),
        }
        match RawExpr::col("t.*") {
            RawExpr::ColumnRef { fields, .. } => assert_eq!(fields[1], ColumnField::Star),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_range_var_parsing() {
        let rv = RangeVar::new("s.t").with_alias("x");
        assert_eq!(rv.schema.as_deref(), Some("s"));
        assert_eq!(rv.relname, "t");
        assert_eq!(rv.refname(), "x");
        assert!(rv.is_qualified());
        assert!(!RangeVar::new("t").is_qualified());
        assert!(!RangeVar::new("t").only().inh);
    }

    #[test]
    fn test_tags() {
        assert_eq!(SelectStmt::default().into_stmt().tag(), "SELECT");
        assert_eq!(SelectStmt::values(vec![vec![RawExpr::int(1)]]).into_stmt().tag(), "VALUES");
        assert_eq!(DeleteStmt::new("t").into_stmt().tag(), "DELETE");
        assert!(DeleteStmt::new("t").into_stmt().is_data_modifying());
    }

    #[test]
    fn test_at_sets_location() {
        assert_eq!(RawExpr::int(1).at(7).location(), Some(7));
    }
}
