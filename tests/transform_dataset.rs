use serde_json::json;

use celldb::{
    CellDbError, CellValue, Config, DatasetConfig, Engine, ErrorKind, OutputFormat,
    ProcedureConfig, QueryRequest, RunState,
};

const TS: i64 = 1_420_070_400_000;

fn setup_engine() -> Engine {
    let engine = Engine::new(Config::default()).unwrap();
    let ds = engine
        .create_dataset(DatasetConfig::sparse("test"))
        .unwrap();
    for (row, x, y, label) in [
        ("ex1", 0, 0, "cat"),
        ("ex2", 1, 1, "dog"),
        ("ex3", 1, 2, "cat"),
        ("ex4", 6, 6, "poil"),
    ] {
        ds.record_row(
            row,
            [
                ("x", CellValue::Integer(x), TS),
                ("y", CellValue::Integer(y), TS),
                ("label", CellValue::from(label), TS),
            ],
        )
        .unwrap();
    }
    ds.commit().unwrap();
    engine
}

fn transform_params(extra: serde_json::Value) -> serde_json::Value {
    let mut params = json!({
        "inputDataset": { "id": "test" },
        "outputDataset": { "id": "transformed", "type": "sparse.mutable" },
        "select": "x, y, x*10 AS z, y+6 AS q",
        "rowName": "rowName() + '_transformed'"
    });
    if let (Some(base), Some(extra)) = (params.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    params
}

fn read_back(engine: &Engine, order: bool) -> serde_json::Value {
    let mut req = QueryRequest::select("x,y,z,q").with_format(OutputFormat::Table);
    if order {
        req = req.with_order_by("rowName()");
    }
    engine.query("transformed", &req).unwrap()
}

#[test]
fn limit_without_order_returns_subset() {
    let engine = setup_engine();
    let procedure = engine
        .create_procedure(
            "transform_limit",
            ProcedureConfig::new("transform", transform_params(json!({ "limit": 3 }))),
        )
        .unwrap();
    let result = procedure.create_run("1", json!({})).unwrap();
    assert_eq!(result.status, RunState::Succeeded);
    assert_eq!(result.outputs["rowCount"], 3);

    let table = read_back(&engine, false);
    let table = table.as_array().unwrap();
    assert_eq!(table[0], json!(["_rowName", "x", "y", "z", "q"]));
    assert_eq!(table.len(), 4);

    let allowed = [
        json!([0, 0, 0, 6]),
        json!([1, 1, 10, 7]),
        json!([1, 2, 10, 8]),
        json!([6, 6, 60, 12]),
    ];
    for line in &table[1..] {
        let line = line.as_array().unwrap();
        assert!(line[0].as_str().unwrap().ends_with("_transformed"));
        let tuple = json!(line[1..].to_vec());
        assert!(allowed.contains(&tuple), "unexpected tuple {tuple}");
    }
}

#[test]
fn ordered_transform_reads_back_in_order() {
    let engine = setup_engine();
    engine
        .create_procedure(
            "transform_ordered",
            ProcedureConfig::new(
                "transform",
                transform_params(json!({ "orderBy": "rowName()" })),
            ),
        )
        .unwrap();
    engine
        .create_run("transform_ordered", "1", json!({}))
        .unwrap();

    assert_eq!(
        read_back(&engine, true),
        json!([
            ["_rowName", "x", "y", "z", "q"],
            ["ex1_transformed", 0, 0, 0, 6],
            ["ex2_transformed", 1, 1, 10, 7],
            ["ex3_transformed", 1, 2, 10, 8],
            ["ex4_transformed", 6, 6, 60, 12]
        ])
    );
}

#[test]
fn repeated_runs_are_identical() {
    let engine = setup_engine();
    let procedure = engine
        .create_procedure(
            "transform_repeat",
            ProcedureConfig::new(
                "transform",
                transform_params(json!({ "orderBy": "rowName()" })),
            ),
        )
        .unwrap();
    procedure.create_run("a", json!({})).unwrap();
    let first = read_back(&engine, true);
    procedure.create_run("b", json!({})).unwrap();
    let second = read_back(&engine, true);
    assert_eq!(first, second);
    assert_eq!(engine.dataset_info("transformed").unwrap().row_count, 4);
}

#[test]
fn run_params_override_procedure_params() {
    let engine = setup_engine();
    let procedure = engine
        .create_procedure(
            "transform_override",
            ProcedureConfig::new("transform", transform_params(json!({}))),
        )
        .unwrap();
    let result = procedure
        .create_run("1", json!({ "where": "label = 'cat'" }))
        .unwrap();
    assert_eq!(result.outputs["rowCount"], 2);
    let info = engine.dataset_info("transformed").unwrap();
    assert_eq!(info.row_count, 2);
}

#[test]
fn transform_reads_input_as_of() {
    let engine = setup_engine();
    let procedure = engine
        .create_procedure(
            "transform_as_of",
            ProcedureConfig::new("transform", transform_params(json!({ "asOf": "2015-01-01" }))),
        )
        .unwrap();
    let result = procedure.create_run("1", json!({})).unwrap();
    assert_eq!(result.outputs["rowCount"], 4);

    // the input's cells were all stamped after this instant
    let result = procedure
        .create_run("2", json!({ "asOf": TS - 1 }))
        .unwrap();
    assert_eq!(result.outputs["rowCount"], 0);
    assert_eq!(engine.dataset_info("transformed").unwrap().row_count, 0);

    let err = engine
        .create_procedure(
            "transform_bad_time",
            ProcedureConfig::new("transform", transform_params(json!({ "asOf": "never" }))),
        )
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn failed_run_publishes_nothing() {
    let engine = setup_engine();
    let procedure = engine
        .create_procedure(
            "transform_bad",
            ProcedureConfig::new(
                "transform",
                transform_params(json!({ "select": "label * 2 AS broken" })),
            ),
        )
        .unwrap();
    let err = procedure.create_run("1", json!({})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Evaluation);
    assert!(engine.dataset_info("transformed").is_err());

    let info = procedure.run_info("1").unwrap();
    assert_eq!(info.state, RunState::Failed);
    assert!(info.outputs.is_none());
}

#[test]
fn failed_rerun_keeps_previous_output() {
    let engine = setup_engine();
    let procedure = engine
        .create_procedure(
            "transform_keep",
            ProcedureConfig::new("transform", transform_params(json!({}))),
        )
        .unwrap();
    procedure.create_run("good", json!({})).unwrap();
    procedure
        .create_run("bad", json!({ "select": "label * 2 AS broken" }))
        .unwrap_err();
    assert_eq!(engine.dataset_info("transformed").unwrap().row_count, 4);
}

#[test]
fn open_output_dataset_conflicts() {
    let engine = setup_engine();
    engine
        .create_dataset(DatasetConfig::sparse("transformed"))
        .unwrap();
    let procedure = engine
        .create_procedure(
            "transform_conflict",
            ProcedureConfig::new("transform", transform_params(json!({}))),
        )
        .unwrap();
    match procedure.create_run("1", json!({})) {
        Err(CellDbError::Conflict { id }) => assert_eq!(id, "transformed"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn grouped_transform() {
    let engine = setup_engine();
    engine
        .create_procedure(
            "by_label",
            ProcedureConfig::new(
                "transform",
                json!({
                    "inputDataset": "test",
                    "outputDataset": "by_label",
                    "select": "label, count(*) AS n, sum(x) AS sx",
                    "groupBy": "label",
                    "having": "count(*) > 0",
                    "rowName": "label"
                }),
            ),
        )
        .unwrap();
    engine.create_run("by_label", "1", json!(null)).unwrap();
    let rows = engine
        .query(
            "by_label",
            &QueryRequest::select("n, sx")
                .with_order_by("rowName()")
                .with_format(OutputFormat::Table),
        )
        .unwrap();
    assert_eq!(
        rows,
        json!([["_rowName", "n", "sx"], ["cat", 2, 1], ["dog", 1, 1], ["poil", 1, 6]])
    );
}
