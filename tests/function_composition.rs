use std::sync::Arc;

use serde_json::json;

use celldb::sql::FunctionResolver;
use celldb::{
    CellDbError, CellValue, Config, DatasetConfig, Engine, ErrorKind, Function, FunctionConfig,
    OutputFormat, QueryRequest, Result, Row,
};

/// Weighted sum over `features.<name>` arguments, standing in for a trained
/// classifier loaded from an artifact.
#[derive(Debug)]
struct LinearScorer {
    id: String,
    weights: Vec<(String, f64)>,
}

impl Function for LinearScorer {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_tag(&self) -> &str {
        "classifier"
    }

    fn apply(&self, args: &Row, _resolver: &dyn FunctionResolver) -> Result<Row> {
        let mut score = 0.0;
        for (name, weight) in &self.weights {
            match args.get(&format!("features.{name}")) {
                Some(v) => match v.to_f64() {
                    Some(f) => score += weight * f,
                    None => {
                        return Err(CellDbError::execution(
                            &self.id,
                            format!("feature {name} is not numeric"),
                        ))
                    }
                },
                None => {}
            }
        }
        Ok(Row::from_pairs([("score", CellValue::Number(score))], 0))
    }
}

fn setup_engine() -> Engine {
    let engine = Engine::new(Config::default()).unwrap();
    engine.register_function_type(
        "classifier",
        Arc::new(
            |id: &str,
             params: &serde_json::Value,
             _: &celldb::function::FunctionRegistry|
             -> Result<Arc<dyn Function>> {
                let weights = params["weights"]
                    .as_object()
                    .ok_or_else(|| CellDbError::config(id, "missing weights"))?
                    .iter()
                    .map(|(k, v)| (k.clone(), v.as_f64().unwrap_or(0.0)))
                    .collect();
                Ok(Arc::new(LinearScorer {
                    id: id.to_string(),
                    weights,
                }))
            },
        ),
    );
    engine
        .register_function(
            "classifier",
            FunctionConfig::new(
                "classifier",
                json!({ "modelFileUrl": "file://tmp/cls.json", "weights": { "svd0": 2.0, "svd1": -1.0 } }),
            ),
        )
        .unwrap();

    let ds = engine
        .create_dataset(DatasetConfig::sparse("training"))
        .unwrap();
    for (row, svd0, svd1, label) in [
        ("u1", 1.0, 0.5, true),
        ("u2", 0.0, 1.0, false),
        ("u3", 0.25, 0.0, true),
    ] {
        ds.record_row(
            row,
            [
                ("svd0", CellValue::Number(svd0), 1),
                ("svd1", CellValue::Number(svd1), 1),
                ("adventuretime", CellValue::Bool(label), 1),
            ],
        )
        .unwrap();
    }
    ds.commit().unwrap();
    engine
}

fn register_pipeline(engine: &Engine) {
    engine
        .register_function(
            "pipeline",
            FunctionConfig::new(
                "serial",
                json!({ "steps": [
                    { "id": "classifier" },
                    { "id": "probabilizer", "type": "sql.expression",
                      "params": { "expression": "1 / (1 + exp(-\"classifier.score\")) AS prob" } }
                ]}),
            ),
        )
        .unwrap();
}

fn features(svd0: f64, svd1: f64) -> Row {
    Row::from_pairs(
        [
            ("features.svd0", CellValue::Number(svd0)),
            ("features.svd1", CellValue::Number(svd1)),
        ],
        0,
    )
}

#[test]
fn classifier_applies_in_queries() {
    let engine = setup_engine();
    let rows = engine
        .execute(
            "training",
            &QueryRequest::select(
                "classifier({{* EXCLUDING (adventuretime)} AS features})[score] AS score",
            )
            .with_order_by("rowName()"),
        )
        .unwrap();
    let scores: Vec<Option<f64>> = rows
        .iter()
        .map(|r| r.columns.get("score").and_then(CellValue::to_f64))
        .collect();
    assert_eq!(scores, vec![Some(1.5), Some(-1.0), Some(0.5)]);
}

#[test]
fn unextracted_output_is_spliced() {
    let engine = setup_engine();
    let rows = engine
        .execute(
            "training",
            &QueryRequest::select("classifier({{svd0, svd1} AS features})")
                .with_where("rowName() = 'u1'"),
        )
        .unwrap();
    assert_eq!(rows[0].columns.get("score"), Some(&CellValue::Number(1.5)));
}

#[test]
fn serial_steps_chain_outputs() {
    let engine = setup_engine();
    register_pipeline(&engine);
    let out = engine
        .function("pipeline")
        .unwrap()
        .invoke(&features(0.0, 0.0))
        .unwrap();
    assert_eq!(out.get("classifier.score"), Some(&CellValue::Number(0.0)));
    assert_eq!(out.get("probabilizer.prob"), Some(&CellValue::Number(0.5)));

    let out = engine.invoke_function("pipeline", &features(3.0, 0.0)).unwrap();
    let prob = out.get("probabilizer.prob").and_then(CellValue::to_f64).unwrap();
    assert!(prob > 0.99 && prob < 1.0);
}

#[test]
fn serial_pipeline_in_a_query() {
    let engine = setup_engine();
    register_pipeline(&engine);

    let rows = engine
        .execute(
            "training",
            &QueryRequest::select(
                "pipeline({{* EXCLUDING (adventuretime)} AS features})[probabilizer.prob] AS p",
            )
            .with_order_by("p DESC"),
        )
        .unwrap();
    let names: Vec<&str> = rows.iter().map(|r| r.row_name.as_str()).collect();
    assert_eq!(names, vec!["u1", "u3", "u2"]);
}

#[test]
fn failing_step_surfaces_its_error() {
    let engine = setup_engine();
    register_pipeline(&engine);
    match engine.invoke_function(
        "pipeline",
        &Row::from_pairs([("features.svd0", CellValue::from("oops"))], 0),
    ) {
        Err(CellDbError::StepFailed {
            function,
            step,
            source,
        }) => {
            assert_eq!(function, "pipeline");
            assert_eq!(step, "classifier");
            assert_eq!(source.kind(), ErrorKind::Execution);
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn second_step_failure_aborts_invocation() {
    let engine = setup_engine();
    engine
        .register_function(
            "fragile",
            FunctionConfig::new(
                "serial",
                json!({ "steps": [
                    { "id": "classifier" },
                    { "id": "check", "type": "sql.expression",
                      "params": { "expression": "\"classifier.score\" + true AS bad" } }
                ]}),
            ),
        )
        .unwrap();
    let err = engine
        .invoke_function("fragile", &features(1.0, 1.0))
        .unwrap_err();
    match &err {
        CellDbError::StepFailed { step, .. } => assert_eq!(step, "check"),
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::Evaluation);
}

#[test]
fn function_lifecycle() {
    let engine = setup_engine();
    let info = engine.function_info("classifier").unwrap();
    assert_eq!(info.type_tag, "classifier");
    assert_eq!(info.params["modelFileUrl"], "file://tmp/cls.json");

    let err = engine
        .register_function("classifier", FunctionConfig::expression("1 AS one"))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = engine
        .register_function("mystery", FunctionConfig::new("svd.embedRow", json!({})))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    engine.delete_function("classifier").unwrap();
    assert!(engine.list_functions().is_empty());
}

#[test]
fn tokensplit_dictionary_from_a_dataset() {
    let engine = Engine::new(Config::default()).unwrap();
    let dict = engine.create_dataset(DatasetConfig::sparse("emoticons")).unwrap();
    dict.record_rows([
        ("smile", vec![("token", CellValue::from(":-)"), 1)]),
        ("tongue", vec![("token", CellValue::from(":P"), 1)]),
    ])
    .unwrap();

    // the dictionary must be readable when the function is registered
    let config = FunctionConfig::new(
        "tokensplit",
        json!({ "dictionaryDataset": "emoticons", "select": "token" }),
    );
    let err = engine.register_function("split", config.clone()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::State);
    dict.commit().unwrap();
    engine.register_function("split", config).unwrap();

    let comments = engine.create_dataset(DatasetConfig::sparse("comments")).unwrap();
    comments
        .record_rows([
            ("c1", vec![("body", CellValue::from("nice:-)"), 3)]),
            ("c2", vec![("body", CellValue::from("meh :P,ok"), 3)]),
        ])
        .unwrap();
    comments.commit().unwrap();

    let out = engine
        .query(
            "comments",
            &QueryRequest::select("split({body AS text})[output] AS cleaned")
                .with_order_by("rowName()")
                .with_format(OutputFormat::Table),
        )
        .unwrap();
    assert_eq!(
        out,
        json!([["_rowName", "cleaned"], ["c1", "nice :-)"], ["c2", "meh :P,ok"]])
    );
}
