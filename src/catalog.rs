//! Catalog layer: relation, type, operator and function metadata.
//!
//! The analyzer never reads system tables directly; every lookup goes
//! through the [`Catalog`] trait so the same analysis runs against a live
//! server's caches or against [`MemoryCatalog`], the in-memory catalog used
//! by tests, benchmarks and embedders without a backing database.
//!
//! Everything reachable through the trait is read-only at the analyzer's
//! altitude. The only side effect is lock acquisition in
//! [`Catalog::relation_open`], which [`MemoryCatalog`] records so callers can
//! check lock ordering.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde::Serialize;

use crate::error::{AnalyzeError, AnalyzeResult};
use crate::nodes::query::RelKind;
use crate::nodes::raw::{Persistence, RangeVar};
use crate::nodes::{AttrNumber, INVALID_OID, Oid};

/// Builtin type identifiers.
pub mod types {
    use crate::nodes::Oid;

    pub const BOOL: Oid = 16;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const OID: Oid = 26;
    pub const TID: Oid = 27;
    pub const XID: Oid = 28;
    pub const CID: Oid = 29;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const UNKNOWN: Oid = 705;
    pub const VARCHAR: Oid = 1043;
    pub const DATE: Oid = 1082;
    pub const TIMESTAMP: Oid = 1114;
    pub const NUMERIC: Oid = 1700;
    pub const RECORD: Oid = 2249;
    /// Pseudo-type accepted by any argument position.
    pub const ANY: Oid = 2276;

    pub fn is_integer(t: Oid) -> bool {
        matches!(t, INT2 | INT4 | INT8)
    }
}

/// Builtin collation identifiers.
pub mod collations {
    use crate::nodes::Oid;

    pub const DEFAULT: Oid = 100;
    pub const C: Oid = 950;
    pub const POSIX: Oid = 951;
}

/// Table-level lock requested when a relation is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum LockMode {
    AccessShare,
    RowShare,
    RowExclusive,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub attnum: AttrNumber,
    pub type_oid: Oid,
    pub typmod: i32,
    pub collation: Oid,
    pub is_dropped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationInfo {
    pub oid: Oid,
    pub schema: String,
    pub name: String,
    pub relkind: RelKind,
    pub persistence: Persistence,
    /// User columns, `attnum` 1..=n in order.
    pub columns: Vec<ColumnInfo>,
}

const SYSTEM_COLUMNS: [(&str, AttrNumber, Oid); 6] = [
    ("ctid", -1, types::TID),
    ("xmin", -3, types::XID),
    ("cmin", -4, types::CID),
    ("xmax", -5, types::XID),
    ("cmax", -6, types::CID),
    ("tableoid", -7, types::OID),
];

impl RelationInfo {
    /// Number of attributes, dropped ones included.
    pub fn natts(&self) -> usize {
        self.columns.len()
    }

    /// Look up a user or system column by name. Dropped columns are
    /// invisible.
    pub fn column(&self, name: &str) -> Option<ColumnInfo> {
        if let Some(c) = self.columns.iter().find(|c| !c.is_dropped && c.name == name) {
            return Some(c.clone());
        }
        SYSTEM_COLUMNS
            .iter()
            .find(|(n, _, _)| *n == name)
            .map(|(n, attnum, t)| ColumnInfo {
                name: n.to_string(),
                attnum: *attnum,
                type_oid: *t,
                typmod: -1,
                collation: INVALID_OID,
                is_dropped: false,
            })
    }

    pub fn column_by_attnum(&self, attnum: AttrNumber) -> Option<&ColumnInfo> {
        usize::try_from(attnum)
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| self.columns.get(i))
    }

    /// System column with a negative attribute number.
    pub fn system_column_by_attnum(&self, attnum: AttrNumber) -> Option<ColumnInfo> {
        SYSTEM_COLUMNS
            .iter()
            .find(|(_, a, _)| *a == attnum)
            .and_then(|(n, ..)| self.column(n))
    }

    pub fn is_temp(&self) -> bool {
        self.persistence == Persistence::Temp
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// Type category, following the Postgres resolution rules: values convert
/// implicitly only within a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TypeCategory {
    Boolean,
    Numeric,
    String,
    DateTime,
    Pseudo,
    Unknown,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeInfo {
    pub oid: Oid,
    pub name: String,
    pub category: TypeCategory,
    pub preferred: bool,
    pub collatable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Volatility {
    Immutable,
    Stable,
    Volatile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FunctionKind {
    Normal,
    Aggregate,
    Window,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionInfo {
    pub oid: Oid,
    pub name: String,
    /// `types::ANY` matches any argument.
    pub arg_types: Vec<Oid>,
    pub result_type: Oid,
    pub retset: bool,
    pub kind: FunctionKind,
    pub volatility: Volatility,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorInfo {
    pub oid: Oid,
    pub name: String,
    /// `INVALID_OID` for a prefix operator.
    pub left: Oid,
    pub right: Oid,
    pub result: Oid,
    pub funcid: Oid,
    pub commutator: Oid,
}

/// Result of [`Catalog::get_sort_group_operators`]. Zero means "not
/// requested and not available".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortGroupOperators {
    pub lt_op: Oid,
    pub eq_op: Oid,
    pub gt_op: Oid,
    pub hashable: bool,
}

/// How far a coercion is allowed to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum CoercionContext {
    Implicit,
    Assignment,
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeKind {
    Coordinator,
    Datanode,
}

/// A member of the cluster, as known to the node catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterNode {
    pub oid: Oid,
    pub name: String,
    pub kind: NodeKind,
    /// Position among nodes of the same kind.
    pub index: usize,
}

/// Catalog access used by the analyzer.
pub trait Catalog {
    /// Resolve and lock a relation. Unqualified names are looked up along
    /// `search_path`.
    fn relation_open(
        &self,
        name: &RangeVar,
        search_path: &[String],
        lock: LockMode,
    ) -> AnalyzeResult<RelationInfo>;

    fn relation(&self, relid: Oid) -> Option<RelationInfo>;

    /// Attribute number of a column, `None` when there is no such column.
    fn attribute_number(&self, relid: Oid, column: &str) -> Option<AttrNumber> {
        self.relation(relid)
            .and_then(|r| r.column(column))
            .map(|c| c.attnum)
    }

    fn has_subclass(&self, relid: Oid) -> bool;

    /// Direct children of an inheritance parent, in creation order.
    fn inheritance_children(&self, parent: Oid) -> Vec<Oid>;

    /// Ordering and equality operators of a type. Requested operators that
    /// do not exist raise `UNDEFINED_FUNCTION`.
    fn get_sort_group_operators(
        &self,
        type_oid: Oid,
        need_lt: bool,
        need_eq: bool,
        need_gt: bool,
    ) -> AnalyzeResult<SortGroupOperators>;

    /// The operator implemented by a function, if any.
    fn get_operator_for_function(&self, funcid: Oid) -> Option<Oid>;

    fn get_commutator(&self, opno: Oid) -> Option<Oid>;

    fn get_opname(&self, opno: Oid) -> Option<String> {
        self.operator(opno).map(|o| o.name)
    }

    fn type_info(&self, type_oid: Oid) -> Option<TypeInfo>;

    fn type_by_name(&self, name: &str) -> Option<TypeInfo>;

    fn collation_by_name(&self, name: &str) -> Option<Oid>;

    fn operator(&self, opno: Oid) -> Option<OperatorInfo>;

    fn operator_candidates(&self, name: &str) -> Vec<OperatorInfo>;

    fn function(&self, funcid: Oid) -> Option<FunctionInfo>;

    fn function_candidates(&self, name: &str) -> Vec<FunctionInfo>;

    /// Whether a value of type `from` may be converted to `to` in `ctx`.
    fn can_coerce(&self, from: Oid, to: Oid, ctx: CoercionContext) -> bool;

    fn cluster_node(&self, name: &str) -> Option<ClusterNode>;
}

/// True if `child` inherits, directly or transitively, from `parent`.
pub fn is_relation_child(catalog: &dyn Catalog, child: Oid, parent: Oid) -> bool {
    if !catalog.has_subclass(parent) {
        return false;
    }
    catalog
        .inheritance_children(parent)
        .into_iter()
        .any(|c| c == child || is_relation_child(catalog, child, c))
}

/// Display name of a type for error messages.
pub fn format_type(catalog: &dyn Catalog, type_oid: Oid) -> String {
    catalog
        .type_info(type_oid)
        .map(|t| t.name)
        .unwrap_or_else(|| format!("type {type_oid}"))
}

// ── In-memory catalog ──────────────────────────────────────────────────────

/// A lock taken through [`Catalog::relation_open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    pub relid: Oid,
    pub relname: String,
    pub mode: LockMode,
}

const FIRST_USER_OID: Oid = 16384;
const FIRST_BUILTIN_OID: Oid = 5000;

/// Self-contained catalog pre-loaded with builtin types, operators,
/// functions and casts.
#[derive(Debug)]
pub struct MemoryCatalog {
    types: BTreeMap<Oid, TypeInfo>,
    type_names: HashMap<String, Oid>,
    collations: HashMap<String, Oid>,
    relations: BTreeMap<Oid, RelationInfo>,
    /// `(child, parent)` pairs in creation order.
    inherits: Vec<(Oid, Oid)>,
    operators: BTreeMap<Oid, OperatorInfo>,
    functions: BTreeMap<Oid, FunctionInfo>,
    casts: HashMap<(Oid, Oid), CoercionContext>,
    nodes: Vec<ClusterNode>,
    next_builtin_oid: Oid,
    next_user_oid: Oid,
    lock_log: Mutex<Vec<LockRequest>>,
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        let mut cat = MemoryCatalog {
            types: BTreeMap::new(),
            type_names: HashMap::new(),
            collations: HashMap::new(),
            relations: BTreeMap::new(),
            inherits: Vec::new(),
            operators: BTreeMap::new(),
            functions: BTreeMap::new(),
            casts: HashMap::new(),
            nodes: Vec::new(),
            next_builtin_oid: FIRST_BUILTIN_OID,
            next_user_oid: FIRST_USER_OID,
            lock_log: Mutex::new(Vec::new()),
        };
        cat.load_types();
        cat.load_casts();
        cat.load_operators();
        cat.load_functions();
        cat
    }

    // ── Builder API ────────────────────────────────────────────────────

    /// Add a permanent table. `name` may be schema-qualified; the default
    /// schema is `public`.
    pub fn add_table(&mut self, name: &str, columns: &[(&str, Oid)]) -> Oid {
        self.add_relation(name, RelKind::Table, Persistence::Permanent, columns)
    }

    /// Add a temporary table, visible through the `pg_temp` schema.
    pub fn add_temp_table(&mut self, name: &str, columns: &[(&str, Oid)]) -> Oid {
        self.add_relation(name, RelKind::Table, Persistence::Temp, columns)
    }

    pub fn add_relation(
        &mut self,
        name: &str,
        relkind: RelKind,
        persistence: Persistence,
        columns: &[(&str, Oid)],
    ) -> Oid {
        let (schema, relname) = match name.split_once('.') {
            Some((s, n)) => (s.to_string(), n.to_string()),
            None if persistence == Persistence::Temp => ("pg_temp".to_string(), name.to_string()),
            None => ("public".to_string(), name.to_string()),
        };
        let oid = self.next_user_oid;
        self.next_user_oid += 1;
        let columns = columns
            .iter()
            .enumerate()
            .map(|(i, (col, t))| ColumnInfo {
                name: col.to_string(),
                attnum: AttrNumber::try_from(i + 1).unwrap_or(AttrNumber::MAX),
                type_oid: *t,
                typmod: -1,
                collation: self.default_collation_for(*t),
                is_dropped: false,
            })
            .collect();
        self.relations.insert(
            oid,
            RelationInfo {
                oid,
                schema,
                name: relname,
                relkind,
                persistence,
                columns,
            },
        );
        oid
    }

    /// Mark a column as dropped; it keeps its attnum but disappears from
    /// name lookup and `*` expansion.
    pub fn drop_column(&mut self, relid: Oid, column: &str) {
        if let Some(rel) = self.relations.get_mut(&relid) {
            if let Some(c) = rel.columns.iter_mut().find(|c| c.name == column) {
                c.is_dropped = true;
            }
        }
    }

    pub fn add_inheritance(&mut self, child: Oid, parent: Oid) {
        self.inherits.push((child, parent));
    }

    pub fn add_node(&mut self, name: &str, kind: NodeKind) -> ClusterNode {
        let index = self.nodes.iter().filter(|n| n.kind == kind).count();
        let node = ClusterNode {
            oid: self.next_user_oid,
            name: name.to_string(),
            kind,
            index,
        };
        self.next_user_oid += 1;
        self.nodes.push(node.clone());
        node
    }

    /// Locks taken so far, in acquisition order.
    pub fn acquired_locks(&self) -> Vec<LockRequest> {
        self.lock_log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn clear_locks(&self) {
        if let Ok(mut log) = self.lock_log.lock() {
            log.clear();
        }
    }

    /// Find an operator by name and exact argument types.
    pub fn find_operator(&self, name: &str, left: Oid, right: Oid) -> Option<OperatorInfo> {
        self.operators
            .values()
            .find(|o| o.name == name && o.left == left && o.right == right)
            .cloned()
    }

    pub fn find_function(&self, name: &str, arg_types: &[Oid]) -> Option<FunctionInfo> {
        self.functions
            .values()
            .find(|f| f.name == name && f.arg_types == arg_types)
            .cloned()
    }

    // ── Builtins ───────────────────────────────────────────────────────

    fn alloc_builtin(&mut self) -> Oid {
        let oid = self.next_builtin_oid;
        self.next_builtin_oid += 1;
        oid
    }

    fn default_collation_for(&self, t: Oid) -> Oid {
        match self.types.get(&t) {
            Some(info) if info.collatable => collations::DEFAULT,
            _ => INVALID_OID,
        }
    }

    fn load_types(&mut self) {
        use TypeCategory::*;
        let builtin: [(Oid, &str, TypeCategory, bool, bool, &[&str]); 18] = [
            (types::BOOL, "boolean", Boolean, true, false, &["bool"]),
            (types::INT2, "smallint", Numeric, false, false, &["int2"]),
            (types::INT4, "integer", Numeric, false, false, &["int4", "int"]),
            (types::INT8, "bigint", Numeric, false, false, &["int8"]),
            (types::NUMERIC, "numeric", Numeric, false, false, &["decimal"]),
            (types::FLOAT4, "real", Numeric, false, false, &["float4"]),
            (types::FLOAT8, "double precision", Numeric, true, false, &["float8", "float"]),
            (types::OID, "oid", Numeric, false, false, &[]),
            (types::TEXT, "text", String, true, true, &[]),
            (types::VARCHAR, "character varying", String, false, true, &["varchar"]),
            (types::DATE, "date", DateTime, false, false, &[]),
            (types::TIMESTAMP, "timestamp without time zone", DateTime, true, false, &["timestamp"]),
            (types::TID, "tid", User, false, false, &[]),
            (types::XID, "xid", User, false, false, &[]),
            (types::CID, "cid", User, false, false, &[]),
            (types::UNKNOWN, "unknown", Unknown, false, false, &[]),
            (types::RECORD, "record", Pseudo, false, false, &[]),
            (types::ANY, "\"any\"", Pseudo, false, false, &["any"]),
        ];
        for (oid, name, category, preferred, collatable, aliases) in builtin {
            self.types.insert(
                oid,
                TypeInfo {
                    oid,
                    name: name.to_string(),
                    category,
                    preferred,
                    collatable,
                },
            );
            self.type_names.insert(name.to_string(), oid);
            for alias in aliases {
                self.type_names.insert(alias.to_string(), oid);
            }
        }
        self.collations.insert("default".to_string(), collations::DEFAULT);
        self.collations.insert("C".to_string(), collations::C);
        self.collations.insert("POSIX".to_string(), collations::POSIX);
    }

    fn load_casts(&mut self) {
        use CoercionContext::*;
        use types::*;
        let implicit_widening: [(Oid, &[Oid]); 7] = [
            (INT2, &[INT4, INT8, NUMERIC, FLOAT4, FLOAT8]),
            (INT4, &[INT8, NUMERIC, FLOAT4, FLOAT8, OID]),
            (INT8, &[NUMERIC, FLOAT4, FLOAT8]),
            (NUMERIC, &[FLOAT4, FLOAT8]),
            (FLOAT4, &[FLOAT8]),
            (VARCHAR, &[TEXT]),
            (DATE, &[TIMESTAMP]),
        ];
        for (from, tos) in implicit_widening {
            for to in tos {
                self.casts.insert((from, *to), Implicit);
            }
        }
        self.casts.insert((TEXT, VARCHAR), Implicit);

        let narrowing: [(Oid, &[Oid]); 6] = [
            (INT4, &[INT2]),
            (INT8, &[INT2, INT4]),
            (NUMERIC, &[INT2, INT4, INT8]),
            (FLOAT4, &[INT2, INT4, INT8, NUMERIC]),
            (FLOAT8, &[INT2, INT4, INT8, NUMERIC, FLOAT4]),
            (TIMESTAMP, &[DATE]),
        ];
        for (from, tos) in narrowing {
            for to in tos {
                self.casts.insert((from, *to), Assignment);
            }
        }

        // I/O conversions: anything to text is an assignment cast, text to
        // anything is explicit.
        let io_types = [BOOL, INT2, INT4, INT8, NUMERIC, FLOAT4, FLOAT8, OID, DATE, TIMESTAMP];
        for t in io_types {
            self.casts.entry((t, TEXT)).or_insert(Assignment);
            self.casts.entry((t, VARCHAR)).or_insert(Assignment);
            self.casts.entry((TEXT, t)).or_insert(Explicit);
            self.casts.entry((VARCHAR, t)).or_insert(Explicit);
        }
        self.casts.insert((INT4, BOOL), Explicit);
        self.casts.insert((BOOL, INT4), Explicit);
    }

    fn add_operator(&mut self, name: &str, left: Oid, right: Oid, result: Oid) -> Oid {
        let funcid = self.alloc_builtin();
        let fname = format!("{}_{}", operator_func_name(name), self.type_short_name(left.max(right)));
        self.functions.insert(
            funcid,
            FunctionInfo {
                oid: funcid,
                name: fname,
                arg_types: if left == INVALID_OID {
                    vec![right]
                } else {
                    vec![left, right]
                },
                result_type: result,
                retset: false,
                kind: FunctionKind::Normal,
                volatility: Volatility::Immutable,
            },
        );
        let oid = self.alloc_builtin();
        self.operators.insert(
            oid,
            OperatorInfo {
                oid,
                name: name.to_string(),
                left,
                right,
                result,
                funcid,
                commutator: INVALID_OID,
            },
        );
        oid
    }

    fn type_short_name(&self, t: Oid) -> String {
        self.type_names
            .iter()
            .filter(|(_, oid)| **oid == t)
            .map(|(n, _)| n.clone())
            .min_by_key(|n| n.len())
            .unwrap_or_else(|| t.to_string())
    }

    fn load_operators(&mut self) {
        use types::*;
        let comparable = [
            BOOL, INT2, INT4, INT8, NUMERIC, FLOAT4, FLOAT8, OID, TEXT, DATE, TIMESTAMP,
        ];
        for t in comparable {
            let mut by_name = HashMap::new();
            for name in ["=", "<>", "<", "<=", ">", ">="] {
                by_name.insert(name, self.add_operator(name, t, t, BOOL));
            }
            for (a, b) in [("=", "="), ("<>", "<>"), ("<", ">"), ("<=", ">="), (">", "<"), (">=", "<=")] {
                let (op, commutator) = (by_name[a], by_name[b]);
                if let Some(info) = self.operators.get_mut(&op) {
                    info.commutator = commutator;
                }
            }
        }
        for t in [INT2, INT4, INT8, NUMERIC, FLOAT4, FLOAT8] {
            for name in ["+", "-", "*", "/"] {
                let op = self.add_operator(name, t, t, t);
                if matches!(name, "+" | "*") {
                    if let Some(info) = self.operators.get_mut(&op) {
                        info.commutator = op;
                    }
                }
            }
            self.add_operator("-", INVALID_OID, t, t);
        }
        self.add_operator("||", TEXT, TEXT, TEXT);
        self.add_operator("~~", TEXT, TEXT, BOOL);
    }

    fn add_function(
        &mut self,
        name: &str,
        arg_types: &[Oid],
        result_type: Oid,
        kind: FunctionKind,
        volatility: Volatility,
        retset: bool,
    ) -> Oid {
        let oid = self.alloc_builtin();
        self.functions.insert(
            oid,
            FunctionInfo {
                oid,
                name: name.to_string(),
                arg_types: arg_types.to_vec(),
                result_type,
                retset,
                kind,
                volatility,
            },
        );
        oid
    }

    fn load_functions(&mut self) {
        use FunctionKind::*;
        use Volatility::*;
        use types::*;

        self.add_function("count", &[], INT8, Aggregate, Immutable, false);
        self.add_function("count", &[ANY], INT8, Aggregate, Immutable, false);
        for (arg, res) in [(INT2, INT8), (INT4, INT8), (INT8, NUMERIC), (NUMERIC, NUMERIC), (FLOAT4, FLOAT4), (FLOAT8, FLOAT8)] {
            self.add_function("sum", &[arg], res, Aggregate, Immutable, false);
        }
        for (arg, res) in [(INT2, NUMERIC), (INT4, NUMERIC), (INT8, NUMERIC), (NUMERIC, NUMERIC), (FLOAT8, FLOAT8)] {
            self.add_function("avg", &[arg], res, Aggregate, Immutable, false);
        }
        for t in [INT2, INT4, INT8, NUMERIC, FLOAT4, FLOAT8, TEXT, DATE, TIMESTAMP] {
            self.add_function("min", &[t], t, Aggregate, Immutable, false);
            self.add_function("max", &[t], t, Aggregate, Immutable, false);
        }
        self.add_function("row_number", &[], INT8, Window, Immutable, false);
        self.add_function("rank", &[], INT8, Window, Immutable, false);
        self.add_function("dense_rank", &[], INT8, Window, Immutable, false);

        self.add_function("generate_series", &[INT4, INT4], INT4, Normal, Immutable, true);
        self.add_function("generate_series", &[INT8, INT8], INT8, Normal, Immutable, true);
        self.add_function("random", &[], FLOAT8, Normal, Volatile, false);
        self.add_function("now", &[], TIMESTAMP, Normal, Stable, false);
        self.add_function("lower", &[TEXT], TEXT, Normal, Immutable, false);
        self.add_function("upper", &[TEXT], TEXT, Normal, Immutable, false);
        self.add_function("length", &[TEXT], INT4, Normal, Immutable, false);
        for t in [INT4, INT8, NUMERIC, FLOAT8] {
            self.add_function("abs", &[t], t, Normal, Immutable, false);
        }
    }
}

fn operator_func_name(op: &str) -> &'static str {
    match op {
        "=" => "eq",
        "<>" => "ne",
        "<" => "lt",
        "<=" => "le",
        ">" => "gt",
        ">=" => "ge",
        "+" => "pl",
        "-" => "mi",
        "*" => "mul",
        "/" => "div",
        "||" => "cat",
        "~~" => "like",
        _ => "op",
    }
}

impl Catalog for MemoryCatalog {
    fn relation_open(
        &self,
        name: &RangeVar,
        search_path: &[String],
        lock: LockMode,
    ) -> AnalyzeResult<RelationInfo> {
        let found = match &name.schema {
            Some(schema) => self
                .relations
                .values()
                .find(|r| &r.schema == schema && r.name == name.relname),
            None => std::iter::once("pg_temp")
                .chain(search_path.iter().map(String::as_str))
                .find_map(|schema| {
                    self.relations
                        .values()
                        .find(|r| r.schema == schema && r.name == name.relname)
                }),
        };
        let rel = found.cloned().ok_or_else(|| {
            let display = match &name.schema {
                Some(s) => format!("{s}.{}", name.relname),
                None => name.relname.clone(),
            };
            AnalyzeError::undefined_table(format!("relation \"{display}\" does not exist"))
                .at(name.location)
        })?;
        tracing::trace!(relation = %rel.qualified_name(), ?lock, "relation_open");
        if let Ok(mut log) = self.lock_log.lock() {
            log.push(LockRequest {
                relid: rel.oid,
                relname: rel.name.clone(),
                mode: lock,
            });
        }
        Ok(rel)
    }

    fn relation(&self, relid: Oid) -> Option<RelationInfo> {
        self.relations.get(&relid).cloned()
    }

    fn has_subclass(&self, relid: Oid) -> bool {
        self.inherits.iter().any(|(_, p)| *p == relid)
    }

    fn inheritance_children(&self, parent: Oid) -> Vec<Oid> {
        self.inherits
            .iter()
            .filter(|(_, p)| *p == parent)
            .map(|(c, _)| *c)
            .collect()
    }

    fn get_sort_group_operators(
        &self,
        type_oid: Oid,
        need_lt: bool,
        need_eq: bool,
        need_gt: bool,
    ) -> AnalyzeResult<SortGroupOperators> {
        // Binary-compatible types sort with their base type's operators.
        let base = if type_oid == types::VARCHAR {
            types::TEXT
        } else {
            type_oid
        };
        let find = |name: &str| {
            self.find_operator(name, base, base)
                .map(|o| o.oid)
                .unwrap_or(INVALID_OID)
        };
        let ops = SortGroupOperators {
            lt_op: find("<"),
            eq_op: find("="),
            gt_op: find(">"),
            hashable: self
                .types
                .get(&base)
                .is_some_and(|t| t.category != TypeCategory::Pseudo),
        };
        let type_name = format_type(self, type_oid);
        if (need_lt && ops.lt_op == INVALID_OID) || (need_gt && ops.gt_op == INVALID_OID) {
            return Err(AnalyzeError::undefined_function(format!(
                "could not identify an ordering operator for type {type_name}"
            ))
            .with_hint("Use an explicit ordering operator or modify the query."));
        }
        if need_eq && ops.eq_op == INVALID_OID {
            return Err(AnalyzeError::undefined_function(format!(
                "could not identify an equality operator for type {type_name}"
            )));
        }
        Ok(ops)
    }

    fn get_operator_for_function(&self, funcid: Oid) -> Option<Oid> {
        self.operators
            .values()
            .find(|o| o.funcid == funcid)
            .map(|o| o.oid)
    }

    fn get_commutator(&self, opno: Oid) -> Option<Oid> {
        self.operators
            .get(&opno)
            .map(|o| o.commutator)
            .filter(|c| *c != INVALID_OID)
    }

    fn type_info(&self, type_oid: Oid) -> Option<TypeInfo> {
        self.types.get(&type_oid).cloned()
    }

    fn type_by_name(&self, name: &str) -> Option<TypeInfo> {
        self.type_names
            .get(&name.to_lowercase())
            .and_then(|oid| self.types.get(oid))
            .cloned()
    }

    fn collation_by_name(&self, name: &str) -> Option<Oid> {
        self.collations.get(name).copied()
    }

    fn operator(&self, opno: Oid) -> Option<OperatorInfo> {
        self.operators.get(&opno).cloned()
    }

    fn operator_candidates(&self, name: &str) -> Vec<OperatorInfo> {
        self.operators
            .values()
            .filter(|o| o.name == name)
            .cloned()
            .collect()
    }

    fn function(&self, funcid: Oid) -> Option<FunctionInfo> {
        self.functions.get(&funcid).cloned()
    }

    fn function_candidates(&self, name: &str) -> Vec<FunctionInfo> {
        let lname = name.to_lowercase();
        self.functions
            .values()
            .filter(|f| f.name == lname)
            .cloned()
            .collect()
    }

    fn can_coerce(&self, from: Oid, to: Oid, ctx: CoercionContext) -> bool {
        if from == to || from == types::UNKNOWN || to == types::ANY {
            return true;
        }
        self.casts
            .get(&(from, to))
            .is_some_and(|needed| *needed <= ctx)
    }

    fn cluster_node(&self, name: &str) -> Option<ClusterNode> {
        self.nodes.iter().find(|n| n.name == name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_open_search_path() {
        let mut cat = MemoryCatalog::new();
        let t = cat.add_table("t", &[("a", types::INT4)]);
        let o = cat.add_table("oracle.t", &[("a", types::TEXT)]);
        let path = vec!["public".to_string()];
        assert_eq!(cat.relation_open(&RangeVar::new("t"), &path, LockMode::AccessShare).unwrap().oid, t);
        let oracle_path = vec!["oracle".to_string(), "public".to_string()];
        assert_eq!(
            cat.relation_open(&RangeVar::new("t"), &oracle_path, LockMode::AccessShare).unwrap().oid,
            o
        );
        let err = cat
            .relation_open(&RangeVar::new("missing"), &path, LockMode::AccessShare)
            .unwrap_err();
        assert_eq!(err.message(), "relation \"missing\" does not exist");
        assert_eq!(err.sqlstate(), "42P01");
    }

    #[test]
    fn test_lock_log_records_order() {
        let mut cat = MemoryCatalog::new();
        cat.add_table("t", &[("a", types::INT4)]);
        let path = vec!["public".to_string()];
        cat.relation_open(&RangeVar::new("t"), &path, LockMode::RowExclusive).unwrap();
        cat.relation_open(&RangeVar::new("t"), &path, LockMode::AccessShare).unwrap();
        let modes: Vec<LockMode> = cat.acquired_locks().iter().map(|l| l.mode).collect();
        assert_eq!(modes, vec![LockMode::RowExclusive, LockMode::AccessShare]);
    }

    #[test]
    fn test_attribute_numbers() {
        let mut cat = MemoryCatalog::new();
        let t = cat.add_table("t", &[("a", types::INT4), ("b", types::TEXT)]);
        assert_eq!(cat.attribute_number(t, "b"), Some(2));
        assert_eq!(cat.attribute_number(t, "ctid"), Some(-1));
        assert_eq!(cat.attribute_number(t, "zz"), None);
        cat.drop_column(t, "a");
        assert_eq!(cat.attribute_number(t, "a"), None);
        let rel = cat.relation(t).unwrap();
        assert_eq!(rel.column("b").unwrap().collation, collations::DEFAULT);
    }

    #[test]
    fn test_inheritance() {
        let mut cat = MemoryCatalog::new();
        let p = cat.add_table("p", &[("a", types::INT4)]);
        let c = cat.add_table("c", &[("a", types::INT4)]);
        let g = cat.add_table("g", &[("a", types::INT4)]);
        cat.add_inheritance(c, p);
        cat.add_inheritance(g, c);
        assert!(cat.has_subclass(p));
        assert_eq!(cat.inheritance_children(p), vec![c]);
        assert!(is_relation_child(&cat, g, p));
        assert!(!is_relation_child(&cat, p, g));
    }

    #[test]
    fn test_sort_group_operators() {
        let cat = MemoryCatalog::new();
        let ops = cat.get_sort_group_operators(types::NUMERIC, true, true, false).unwrap();
        assert_eq!(cat.get_opname(ops.eq_op).as_deref(), Some("="));
        assert_eq!(cat.get_opname(ops.lt_op).as_deref(), Some("<"));
        assert!(ops.hashable);
        let err = cat.get_sort_group_operators(types::TID, true, false, false).unwrap_err();
        assert!(err.message().contains("could not identify an ordering operator for type tid"));
    }

    #[test]
    fn test_commutator_and_function_lookup() {
        let cat = MemoryCatalog::new();
        let le = cat.find_operator("<=", types::INT8, types::INT8).unwrap();
        let ge = cat.get_commutator(le.oid).unwrap();
        assert_eq!(cat.get_opname(ge).as_deref(), Some(">="));
        assert_eq!(cat.get_operator_for_function(le.funcid), Some(le.oid));
        let minus = cat.find_operator("-", types::INT8, types::INT8).unwrap();
        assert_eq!(cat.get_commutator(minus.oid), None);
    }

    #[test]
    fn test_can_coerce_contexts() {
        let cat = MemoryCatalog::new();
        assert!(cat.can_coerce(types::INT4, types::NUMERIC, CoercionContext::Implicit));
        assert!(!cat.can_coerce(types::NUMERIC, types::INT4, CoercionContext::Implicit));
        assert!(cat.can_coerce(types::NUMERIC, types::INT4, CoercionContext::Assignment));
        assert!(!cat.can_coerce(types::TEXT, types::INT4, CoercionContext::Assignment));
        assert!(cat.can_coerce(types::TEXT, types::INT4, CoercionContext::Explicit));
        assert!(cat.can_coerce(types::UNKNOWN, types::DATE, CoercionContext::Implicit));
    }

    #[test]
    fn test_cluster_nodes() {
        let mut cat = MemoryCatalog::new();
        cat.add_node("coord1", NodeKind::Coordinator);
        cat.add_node("dn1", NodeKind::Datanode);
        let dn2 = cat.add_node("dn2", NodeKind::Datanode);
        assert_eq!(dn2.index, 1);
        assert_eq!(cat.cluster_node("coord1").unwrap().kind, NodeKind::Coordinator);
        assert!(cat.cluster_node("nope").is_none());
    }

    #[test]
    fn test_type_lookup_by_alias() {
        let cat = MemoryCatalog::new();
        assert_eq!(cat.type_by_name("INT").unwrap().oid, types::INT4);
        assert_eq!(cat.type_by_name("varchar").unwrap().oid, types::VARCHAR);
        assert_eq!(format_type(&cat, types::FLOAT8), "double precision");
    }
}
