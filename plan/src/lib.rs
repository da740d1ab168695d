//! The planned relational tree as handed over by the front-end.
//!
//! Expressions are a closed tagged variant over a fixed set of node kinds;
//! consumers use explicit `match`, never open-ended hierarchies. Only the
//! tree's shape is defined here; building it from SQL is the front-end's
//! concern.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use std::collections::BTreeSet;

use data_types::{AggKind, Datum, SqlType};

/// Binary operator kinds, arithmetic through logical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOpKind {
    Plus,
    Minus,
    Times,
    Divide,
    Modulo,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOpKind {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
        )
    }

    pub fn is_logic(&self) -> bool {
        matches!(self, Self::And | Self::Or)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UOpKind {
    Not,
    Minus,
    IsNull,
    /// CAST to the expression's annotated type.
    Cast,
}

/// Fields EXTRACT can pull out of a time-typed operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractField {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    DayOfWeek,
    DayOfYear,
    Epoch,
}

/// A scalar expression node of the planned tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    ColumnRef {
        table_id: i32,
        column_id: i32,
        ty: SqlType,
        nullable: bool,
    },
    Literal {
        value: Datum,
        ty: SqlType,
    },
    BinOp {
        op: BinOpKind,
        ty: SqlType,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    UOp {
        op: UOpKind,
        ty: SqlType,
        arg: Box<Expr>,
    },
    /// Branches evaluate in order; the first true predicate selects its
    /// value, the else expression is the tail.
    Case {
        branches: Vec<(Expr, Expr)>,
        else_expr: Option<Box<Expr>>,
        ty: SqlType,
    },
    Extract {
        field: ExtractField,
        arg: Box<Expr>,
    },
    Like {
        arg: Box<Expr>,
        pattern: Box<Expr>,
        escape: Option<char>,
        case_insensitive: bool,
    },
    InValues {
        arg: Box<Expr>,
        values: Vec<Datum>,
    },
}

impl Expr {
    /// The expression's result type.
    pub fn ty(&self) -> SqlType {
        match self {
            Self::ColumnRef { ty, .. }
            | Self::Literal { ty, .. }
            | Self::BinOp { ty, .. }
            | Self::UOp { ty, .. }
            | Self::Case { ty, .. } => *ty,
            Self::Extract { .. } => SqlType::BigInt,
            Self::Like { .. } | Self::InValues { .. } => SqlType::Boolean,
        }
    }

    /// Whether the expression can produce the null sentinel.
    pub fn nullable(&self) -> bool {
        match self {
            Self::ColumnRef { nullable, .. } => *nullable,
            Self::Literal { value, .. } => value.is_null(),
            Self::BinOp { lhs, rhs, .. } => lhs.nullable() || rhs.nullable(),
            Self::UOp { op: UOpKind::IsNull, .. } => false,
            Self::UOp { arg, .. } => arg.nullable(),
            Self::Case {
                branches,
                else_expr,
                ..
            } => {
                else_expr.is_none()
                    || branches.iter().any(|(_, v)| v.nullable())
                    || else_expr.as_ref().is_some_and(|e| e.nullable())
            }
            Self::Extract { arg, .. } => arg.nullable(),
            Self::Like { arg, .. } => arg.nullable(),
            Self::InValues { arg, .. } => arg.nullable(),
        }
    }

    /// Collect every column id referenced under this expression.
    pub fn collect_columns(&self, out: &mut BTreeSet<i32>) {
        match self {
            Self::ColumnRef { column_id, .. } => {
                out.insert(*column_id);
            }
            Self::Literal { .. } => {}
            Self::BinOp { lhs, rhs, .. } => {
                lhs.collect_columns(out);
                rhs.collect_columns(out);
            }
            Self::UOp { arg, .. } => arg.collect_columns(out),
            Self::Case {
                branches,
                else_expr,
                ..
            } => {
                for (p, v) in branches {
                    p.collect_columns(out);
                    v.collect_columns(out);
                }
                if let Some(e) = else_expr {
                    e.collect_columns(out);
                }
            }
            Self::Extract { arg, .. } => arg.collect_columns(out),
            Self::Like { arg, pattern, .. } => {
                arg.collect_columns(out);
                pattern.collect_columns(out);
            }
            Self::InValues { arg, .. } => arg.collect_columns(out),
        }
    }
}

/// One output target: a plain projection or an aggregate over an optional
/// argument (`COUNT(*)` has none).
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Projection(Expr),
    Aggregate {
        kind: AggKind,
        arg: Option<Expr>,
        distinct: bool,
    },
}

impl Target {
    /// The surfaced SQL type of this target.
    pub fn sql_type(&self) -> SqlType {
        match self {
            Self::Projection(e) => e.ty(),
            Self::Aggregate { kind, arg, .. } => match kind {
                AggKind::Count => SqlType::BigInt,
                AggKind::Avg => SqlType::Double,
                _ => arg.as_ref().map_or(SqlType::BigInt, Expr::ty),
            },
        }
    }

    pub fn collect_columns(&self, out: &mut BTreeSet<i32>) {
        match self {
            Self::Projection(e) => e.collect_columns(out),
            Self::Aggregate { arg, .. } => {
                if let Some(a) = arg {
                    a.collect_columns(out);
                }
            }
        }
    }
}

/// The scan of one table with its qualifiers and target list.
///
/// `simple_quals` holds the `col op const` conjuncts usable for fragment
/// skipping; `quals` the rest. Both must hold for a row to pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPlan {
    pub db_id: i32,
    pub table_id: i32,
    pub simple_quals: Vec<Expr>,
    pub quals: Vec<Expr>,
    pub targets: Vec<Target>,
}

impl ScanPlan {
    /// Every column id the scan touches, in id order.
    pub fn columns(&self) -> BTreeSet<i32> {
        let mut out = BTreeSet::new();
        for q in self.simple_quals.iter().chain(self.quals.iter()) {
            q.collect_columns(&mut out);
        }
        for t in &self.targets {
            t.collect_columns(&mut out);
        }
        out
    }
}

/// Grouped aggregation over a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct AggPlan {
    pub scan: ScanPlan,
    pub groupby_exprs: Vec<Expr>,
    pub targets: Vec<Target>,
}

/// One ORDER BY entry: a zero-based output column and a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderEntry {
    pub target_no: usize,
    pub desc: bool,
}

/// A planned SELECT tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Scan(ScanPlan),
    Agg(AggPlan),
    Sort {
        child: Box<Plan>,
        order: Vec<OrderEntry>,
    },
}

impl Plan {
    /// The scan at the bottom of the tree.
    pub fn scan(&self) -> &ScanPlan {
        match self {
            Self::Scan(s) => s,
            Self::Agg(a) => &a.scan,
            Self::Sort { child, .. } => child.scan(),
        }
    }

    /// The aggregation stage, when the plan has one.
    pub fn agg(&self) -> Option<&AggPlan> {
        match self {
            Self::Scan(_) => None,
            Self::Agg(a) => Some(a),
            Self::Sort { child, .. } => child.agg(),
        }
    }

    /// The output targets the caller observes.
    pub fn output_targets(&self) -> &[Target] {
        match self {
            Self::Scan(s) => &s.targets,
            Self::Agg(a) => &a.targets,
            Self::Sort { child, .. } => child.output_targets(),
        }
    }
}

/// Literal rows bound for an INSERT: one datum per column, in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertValues {
    pub db_id: i32,
    pub table_id: i32,
    pub column_ids: Vec<i32>,
    pub values: Vec<Datum>,
}

/// The root of a planned statement.
#[derive(Debug, Clone, PartialEq)]
pub enum RootPlan {
    Select {
        plan: Plan,
        limit: Option<usize>,
        offset: usize,
    },
    Insert(InsertValues),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(id: i32) -> Expr {
        Expr::ColumnRef {
            table_id: 1,
            column_id: id,
            ty: SqlType::Int,
            nullable: false,
        }
    }

    #[test]
    fn scan_collects_columns_across_quals_and_targets() {
        let scan = ScanPlan {
            db_id: 1,
            table_id: 1,
            simple_quals: vec![Expr::BinOp {
                op: BinOpKind::Gt,
                ty: SqlType::Boolean,
                lhs: Box::new(col(3)),
                rhs: Box::new(Expr::Literal {
                    value: Datum::Int(41),
                    ty: SqlType::Int,
                }),
            }],
            quals: vec![],
            targets: vec![
                Target::Projection(col(1)),
                Target::Aggregate {
                    kind: AggKind::Sum,
                    arg: Some(col(2)),
                    distinct: false,
                },
            ],
        };
        let cols: Vec<i32> = scan.columns().into_iter().collect();
        assert_eq!(cols, vec![1, 2, 3]);
    }

    #[test]
    fn case_without_else_is_nullable() {
        let case = Expr::Case {
            branches: vec![(col(1), col(2))],
            else_expr: None,
            ty: SqlType::Int,
        };
        assert!(case.nullable());

        let closed = Expr::Case {
            branches: vec![(col(1), col(2))],
            else_expr: Some(Box::new(col(3))),
            ty: SqlType::Int,
        };
        assert!(!closed.nullable());
    }

    #[test]
    fn target_types() {
        let count = Target::Aggregate {
            kind: AggKind::Count,
            arg: None,
            distinct: false,
        };
        assert_eq!(count.sql_type(), SqlType::BigInt);
        let avg = Target::Aggregate {
            kind: AggKind::Avg,
            arg: Some(col(1)),
            distinct: false,
        };
        assert_eq!(avg.sql_type(), SqlType::Double);
    }
}
