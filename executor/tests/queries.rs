//! End-to-end query scenarios over a real on-disk store.
use std::path::Path;
use std::sync::Arc;

use data_types::{AggKind, ColumnInfo, Datum, SqlType, TableInfo};
use executor::{
    skip_fragment, ExecutionContext, ExecutionResult, Executor, ExecutorConfig, Fragmenter,
    FragmenterConfig, InsertData, InsertOrderFragmenter,
};
use kernel_compiler::OptLevel;
use plan::{
    AggPlan, BinOpKind, Expr, InsertValues, OrderEntry, Plan, RootPlan, ScanPlan, Target,
};
use result_set::ScalarValue;

const TABLE_ID: i32 = 1;

fn col(column_id: i32, ty: SqlType) -> Expr {
    Expr::ColumnRef {
        table_id: TABLE_ID,
        column_id,
        ty,
        nullable: false,
    }
}

fn int_lit(v: i64) -> Expr {
    Expr::Literal {
        value: Datum::Int(v),
        ty: SqlType::Int,
    }
}

fn scan(simple_quals: Vec<Expr>, targets: Vec<Target>, db_id: i32) -> ScanPlan {
    ScanPlan {
        db_id,
        table_id: TABLE_ID,
        simple_quals,
        quals: vec![],
        targets,
    }
}

struct Db {
    executor: Arc<Executor>,
    ctx: ExecutionContext,
    fragmenter: Arc<InsertOrderFragmenter>,
}

fn setup(dir: &Path, db_id: i32, columns: Vec<ColumnInfo>, rows_per_fragment: usize) -> Db {
    let store = page_store::PageStore::open(dir.join("data")).unwrap();
    let fragmenter = InsertOrderFragmenter::new(
        store.clone(),
        FragmenterConfig {
            max_rows_per_fragment: rows_per_fragment,
            page_size: 65_536,
        },
    );
    fragmenter
        .register_table(TableInfo {
            db_id,
            table_id: TABLE_ID,
            name: "test".into(),
            columns,
        })
        .unwrap();
    let ctx = ExecutionContext {
        store,
        fragmenter: Arc::clone(&fragmenter) as Arc<dyn Fragmenter>,
        dict_dir: dir.to_path_buf(),
    };
    let executor = Executor::get(db_id, ExecutorConfig::default());
    Db {
        executor,
        ctx,
        fragmenter,
    }
}

fn load_ints(db: &Db, db_id: i32, columns: &[(i32, Vec<i32>)]) {
    let num_rows = columns[0].1.len();
    let insert = InsertData {
        db_id,
        table_id: TABLE_ID,
        columns: columns
            .iter()
            .map(|(id, vals)| {
                (
                    *id,
                    vals.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<u8>>(),
                )
            })
            .collect(),
        num_rows,
    };
    db.fragmenter.insert_data(&insert).unwrap();
    db.ctx.store.checkpoint().unwrap();
}

fn run_select(db: &Db, plan: Plan, limit: Option<usize>) -> executor::Result<ExecutionResult> {
    run_select_at(db, plan, limit, 0)
}

fn run_select_at(
    db: &Db,
    plan: Plan,
    limit: Option<usize>,
    offset: usize,
) -> executor::Result<ExecutionResult> {
    db.executor.execute(
        &RootPlan::Select {
            plan,
            limit,
            offset,
        },
        &db.ctx,
        true,
        executor::DeviceType::Auto,
        OptLevel::Default,
    )
}

fn rows(result: ExecutionResult) -> result_set::ResultSet {
    match result {
        ExecutionResult::Rows(rows) => rows,
        other => panic!("expected rows, got {other:?}"),
    }
}

#[test]
fn count_with_filter_skips_refuted_fragments() {
    test_helpers::maybe_start_logging();
    let dir = test_helpers::tmp_dir().unwrap();
    let db_id = 101;
    let db = setup(
        dir.path(),
        db_id,
        vec![ColumnInfo::raw(1, "x", SqlType::Int)],
        1000,
    );
    // fragment 0 spans [0, 41], fragments 1 and 2 sit entirely above 41
    let mut x = Vec::new();
    x.extend((0..1000).map(|i| i % 42));
    x.extend((0..1000).map(|i| 42 + i % 58));
    x.extend((0..1000).map(|i| 100 + i % 100));
    load_ints(&db, db_id, &[(1, x)]);

    let quals = vec![Expr::BinOp {
        op: BinOpKind::Gt,
        ty: SqlType::Boolean,
        lhs: Box::new(col(1, SqlType::Int)),
        rhs: Box::new(int_lit(41)),
    }];

    // the first fragment is refuted by its statistics alone
    let fragments = db.fragmenter.fragments_for_query(TABLE_ID);
    assert_eq!(fragments.len(), 3);
    assert!(skip_fragment(&fragments[0], &quals));
    assert!(!skip_fragment(&fragments[1], &quals));
    assert!(!skip_fragment(&fragments[2], &quals));

    let plan = Plan::Agg(AggPlan {
        scan: scan(
            quals,
            vec![Target::Aggregate {
                kind: AggKind::Count,
                arg: None,
                distinct: false,
            }],
            db_id,
        ),
        groupby_exprs: vec![],
        targets: vec![Target::Aggregate {
            kind: AggKind::Count,
            arg: None,
            distinct: false,
        }],
    });
    let set = rows(run_select(&db, plan, None).unwrap());
    assert_eq!(set.row_count(), 1);
    assert_eq!(set.value_at(0, 0, false, None), ScalarValue::Int(2000));
}

#[test]
fn avg_is_deterministic_across_task_completion_order() {
    test_helpers::maybe_start_logging();
    let dir = test_helpers::tmp_dir().unwrap();
    let db_id = 102;
    let db = setup(
        dir.path(),
        db_id,
        vec![ColumnInfo::raw(1, "x", SqlType::Int)],
        1000,
    );
    // two fragments with different partial sums
    let x: Vec<i32> = (1..=2000).collect();
    load_ints(&db, db_id, &[(1, x)]);

    let make_plan = || {
        Plan::Agg(AggPlan {
            scan: scan(vec![], vec![], db_id),
            groupby_exprs: vec![],
            targets: vec![Target::Aggregate {
                kind: AggKind::Avg,
                arg: Some(col(1, SqlType::Int)),
                distinct: false,
            }],
        })
    };
    // AVG = (s1 + s2) / (n1 + n2), however the two tasks finish
    for _ in 0..4 {
        let set = rows(run_select(&db, make_plan(), None).unwrap());
        assert_eq!(set.value_at(0, 0, false, None), ScalarValue::Double(1000.5));
    }
}

#[test]
fn division_by_zero_fails_the_whole_query() {
    test_helpers::maybe_start_logging();
    let dir = test_helpers::tmp_dir().unwrap();
    let db_id = 103;
    let db = setup(
        dir.path(),
        db_id,
        vec![
            ColumnInfo::raw(1, "a", SqlType::Int),
            ColumnInfo::raw(2, "b", SqlType::Int),
        ],
        1000,
    );
    load_ints(&db, db_id, &[(1, vec![10, 20, 30]), (2, vec![2, 0, 3])]);

    let plan = Plan::Scan(scan(
        vec![],
        vec![Target::Projection(Expr::BinOp {
            op: BinOpKind::Divide,
            ty: SqlType::Int,
            lhs: Box::new(col(1, SqlType::Int)),
            rhs: Box::new(col(2, SqlType::Int)),
        })],
        db_id,
    ));
    let err = run_select(&db, plan, None).unwrap_err();
    assert!(matches!(err, executor::Error::DivByZero));
}

#[test]
fn group_by_with_sort_and_limit() {
    test_helpers::maybe_start_logging();
    let dir = test_helpers::tmp_dir().unwrap();
    let db_id = 104;
    let db = setup(
        dir.path(),
        db_id,
        vec![
            ColumnInfo::raw(1, "x", SqlType::Int),
            ColumnInfo::raw(2, "y", SqlType::Int),
        ],
        1000,
    );
    load_ints(
        &db,
        db_id,
        &[(1, vec![1, 1, 2, 3]), (2, vec![10, 20, 5, 100])],
    );

    let agg = AggPlan {
        scan: scan(vec![], vec![], db_id),
        groupby_exprs: vec![col(1, SqlType::Int)],
        targets: vec![
            Target::Projection(col(1, SqlType::Int)),
            Target::Aggregate {
                kind: AggKind::Sum,
                arg: Some(col(2, SqlType::Int)),
                distinct: false,
            },
        ],
    };
    let plan = Plan::Sort {
        child: Box::new(Plan::Agg(agg)),
        order: vec![OrderEntry {
            target_no: 1,
            desc: true,
        }],
    };
    let set = rows(run_select(&db, plan, Some(2)).unwrap());
    assert_eq!(set.row_count(), 2);
    assert_eq!(set.value_at(0, 0, false, None), ScalarValue::Int(3));
    assert_eq!(set.value_at(0, 1, false, None), ScalarValue::Int(100));
    assert_eq!(set.value_at(1, 0, false, None), ScalarValue::Int(1));
    assert_eq!(set.value_at(1, 1, false, None), ScalarValue::Int(30));
}

#[test]
fn insert_dictionary_strings_and_query_them_back() {
    test_helpers::maybe_start_logging();
    let dir = test_helpers::tmp_dir().unwrap();
    let db_id = 105;
    let name_type = SqlType::Text { dict_id: Some(7) };
    let db = setup(
        dir.path(),
        db_id,
        vec![ColumnInfo::raw(1, "name", name_type)],
        1000,
    );

    for name in ["alice", "bob", "anna"] {
        let result = db
            .executor
            .execute(
                &RootPlan::Insert(InsertValues {
                    db_id,
                    table_id: TABLE_ID,
                    column_ids: vec![1],
                    values: vec![Datum::Str(name.into())],
                }),
                &db.ctx,
                true,
                executor::DeviceType::Auto,
                OptLevel::Default,
            )
            .unwrap();
        assert!(matches!(result, ExecutionResult::Inserted(1)));
    }
    // inserts are checkpointed and dictionary-encoded on disk
    assert!(dir.path().join("dict_7").exists());

    let projection = Plan::Scan(scan(
        vec![],
        vec![Target::Projection(col(1, name_type))],
        db_id,
    ));
    let set = rows(run_select(&db, projection, None).unwrap());
    assert_eq!(set.row_count(), 3);
    let resolver = ExecResolver { db: &db };
    let names: Vec<ScalarValue> = (0..3)
        .map(|r| set.value_at(r, 0, true, Some(&resolver)))
        .collect();
    assert_eq!(
        names,
        vec![
            ScalarValue::Str("alice".into()),
            ScalarValue::Str("bob".into()),
            ScalarValue::Str("anna".into()),
        ]
    );

    // LIKE forces the CPU path and filters by decoded string
    let like_count = Plan::Agg(AggPlan {
        scan: scan(
            vec![],
            vec![],
            db_id,
        ),
        groupby_exprs: vec![],
        targets: vec![Target::Aggregate {
            kind: AggKind::Count,
            arg: None,
            distinct: false,
        }],
    });
    let mut like_plan = like_count;
    if let Plan::Agg(agg) = &mut like_plan {
        agg.scan.quals.push(Expr::Like {
            arg: Box::new(col(1, name_type)),
            pattern: Box::new(Expr::Literal {
                value: Datum::Str("a%".into()),
                ty: SqlType::Text { dict_id: None },
            }),
            escape: None,
            case_insensitive: false,
        });
    }
    let set = rows(run_select(&db, like_plan, None).unwrap());
    assert_eq!(set.value_at(0, 0, false, None), ScalarValue::Int(2));
}

struct ExecResolver<'a> {
    db: &'a Db,
}

impl result_set::DictResolver for ExecResolver<'_> {
    fn lookup(&self, dict_id: i32, string_id: i32) -> Option<String> {
        self.db
            .executor
            .string_dictionary(&self.db.ctx, dict_id)
            .ok()
            .and_then(|d| d.get_string(string_id))
    }
}

#[test]
fn group_buffer_overflow_retries_with_sized_buffer() {
    test_helpers::maybe_start_logging();
    let dir = test_helpers::tmp_dir().unwrap();
    let db_id = 106;
    let db = setup(
        dir.path(),
        db_id,
        vec![ColumnInfo::raw(1, "x", SqlType::Int)],
        5000,
    );
    // a value span too wide for the dense layout and more distinct keys
    // than the guessed buffers hold
    let x: Vec<i32> = (0..4000).map(|i| i * 1000).collect();
    load_ints(&db, db_id, &[(1, x)]);

    let plan = Plan::Agg(AggPlan {
        scan: scan(vec![], vec![], db_id),
        groupby_exprs: vec![col(1, SqlType::Int)],
        targets: vec![
            Target::Projection(col(1, SqlType::Int)),
            Target::Aggregate {
                kind: AggKind::Count,
                arg: None,
                distinct: false,
            },
        ],
    });
    let set = rows(run_select(&db, plan, None).unwrap());
    assert_eq!(set.row_count(), 4000);
    // every key occurs exactly once
    for row in 0..set.row_count() {
        assert_eq!(set.value_at(row, 1, false, None), ScalarValue::Int(1));
    }
}

#[test]
fn projection_with_limit_stops_the_scan_early() {
    test_helpers::maybe_start_logging();
    let dir = test_helpers::tmp_dir().unwrap();
    let db_id = 107;
    let db = setup(
        dir.path(),
        db_id,
        vec![ColumnInfo::raw(1, "x", SqlType::Int)],
        100,
    );
    let x: Vec<i32> = (0..1000).collect();
    load_ints(&db, db_id, &[(1, x)]);

    let plan = Plan::Scan(scan(
        vec![],
        vec![Target::Projection(col(1, SqlType::Int))],
        db_id,
    ));
    let set = rows(run_select(&db, plan, Some(42)).unwrap());
    assert_eq!(set.row_count(), 42);
    assert_eq!(set.value_at(0, 0, false, None), ScalarValue::Int(0));
    assert_eq!(set.value_at(41, 0, false, None), ScalarValue::Int(41));
}

#[test]
fn projection_limit_with_offset_surfaces_the_right_window() {
    test_helpers::maybe_start_logging();
    let dir = test_helpers::tmp_dir().unwrap();
    let db_id = 109;
    let db = setup(
        dir.path(),
        db_id,
        vec![ColumnInfo::raw(1, "x", SqlType::Int)],
        100,
    );
    let x: Vec<i32> = (0..1000).collect();
    load_ints(&db, db_id, &[(1, x)]);

    let plan = Plan::Scan(scan(
        vec![],
        vec![Target::Projection(col(1, SqlType::Int))],
        db_id,
    ));
    // the scan must budget for offset + limit rows, not just limit
    let set = rows(run_select_at(&db, plan, Some(3), 5).unwrap());
    assert_eq!(set.row_count(), 3);
    assert_eq!(set.value_at(0, 0, false, None), ScalarValue::Int(5));
    assert_eq!(set.value_at(1, 0, false, None), ScalarValue::Int(6));
    assert_eq!(set.value_at(2, 0, false, None), ScalarValue::Int(7));
}

#[test]
fn sorted_projection_with_limit_is_the_global_top_k() {
    test_helpers::maybe_start_logging();
    let dir = test_helpers::tmp_dir().unwrap();
    let db_id = 110;
    let db = setup(
        dir.path(),
        db_id,
        vec![ColumnInfo::raw(1, "x", SqlType::Int)],
        100,
    );
    // ascending values, so the largest ones live in the last fragment; an
    // early-exiting scan would sort only the first fragment's window
    let x: Vec<i32> = (0..1000).collect();
    load_ints(&db, db_id, &[(1, x)]);

    let plan = Plan::Sort {
        child: Box::new(Plan::Scan(scan(
            vec![],
            vec![Target::Projection(col(1, SqlType::Int))],
            db_id,
        ))),
        order: vec![OrderEntry {
            target_no: 0,
            desc: true,
        }],
    };
    let set = rows(run_select(&db, plan, Some(3)).unwrap());
    assert_eq!(set.row_count(), 3);
    assert_eq!(set.value_at(0, 0, false, None), ScalarValue::Int(999));
    assert_eq!(set.value_at(1, 0, false, None), ScalarValue::Int(998));
    assert_eq!(set.value_at(2, 0, false, None), ScalarValue::Int(997));
}

#[test]
fn insert_null_into_real_string_column_is_rejected() {
    test_helpers::maybe_start_logging();
    let dir = test_helpers::tmp_dir().unwrap();
    let db_id = 111;
    let db = setup(
        dir.path(),
        db_id,
        vec![ColumnInfo {
            column_id: 1,
            name: "s".into(),
            sql_type: SqlType::Text { dict_id: None },
            encoding: data_types::Encoding::Raw { width: 1 },
        }],
        100,
    );
    let err = db
        .executor
        .execute(
            &RootPlan::Insert(InsertValues {
                db_id,
                table_id: TABLE_ID,
                column_ids: vec![1],
                values: vec![Datum::Null],
            }),
            &db.ctx,
            true,
            executor::DeviceType::Auto,
            OptLevel::Default,
        )
        .unwrap_err();
    assert!(matches!(err, executor::Error::InvalidPlan { .. }));
}

#[test]
fn count_distinct_over_fragments() {
    test_helpers::maybe_start_logging();
    let dir = test_helpers::tmp_dir().unwrap();
    let db_id = 108;
    let db = setup(
        dir.path(),
        db_id,
        vec![ColumnInfo::raw(1, "x", SqlType::Int)],
        500,
    );
    // 1000 rows over two fragments, 100 distinct values shared by both
    let x: Vec<i32> = (0..1000).map(|i| i % 100).collect();
    load_ints(&db, db_id, &[(1, x)]);

    let plan = Plan::Agg(AggPlan {
        scan: scan(vec![], vec![], db_id),
        groupby_exprs: vec![],
        targets: vec![Target::Aggregate {
            kind: AggKind::Count,
            arg: Some(col(1, SqlType::Int)),
            distinct: true,
        }],
    });
    let set = rows(run_select(&db, plan, None).unwrap());
    assert_eq!(set.value_at(0, 0, false, None), ScalarValue::Int(100));
}
