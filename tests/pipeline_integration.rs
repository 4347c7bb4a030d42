//! Integration tests for building and running pipelines
//!
//! These tests drive complete stage graphs through the public API:
//! - Linear, fan-out and merging graphs over synthetic points
//! - Chunk-size invariance of the results
//! - Construction and negotiation failures
//! - Text files in and out

mod common;

use common::builders::{memory, range, scale, script, settings, FauxBuilder};
use common::{assert_float_eq, column_values, write_csv};
use pointflow::pipeline::stages::{TextReader, TextWriter};
use pointflow::pipeline::{
    BuiltinStage, ErrorKind, PipelineBuilder, PipelineError, StageInstance, StagePhase,
};

#[test]
fn test_ten_thousand_points_scaled() {
    let mut builder = PipelineBuilder::with_settings(settings(100));
    let reader = builder.add_stage(None, FauxBuilder::new(10_000).build()).unwrap();
    let doubled = builder.add_stage(None, scale("X", 2.0)).unwrap();
    let out = builder.add_stage(Some("out"), memory()).unwrap();
    builder.connect(reader, doubled).unwrap();
    builder.connect(doubled, out).unwrap();

    let mut pipeline = builder.build().unwrap();
    let summary = pipeline.run().unwrap();

    assert_eq!(summary.points_read, 10_000);
    assert_eq!(summary.chunks, 100);
    assert_eq!(summary.committed, vec![("out".to_string(), 10_000)]);

    let points = pipeline.memory_output(out).unwrap();
    let xs = column_values(points, "X");
    let scaled = column_values(points, "Scaled");
    assert_eq!(xs.len(), 10_000);
    for (i, (x, s)) in xs.iter().zip(&scaled).enumerate() {
        assert_float_eq(*x, i as f64, 1e-9);
        assert_float_eq(*s, 2.0 * x, 1e-9);
    }
}

#[test]
fn test_results_do_not_depend_on_chunk_size() {
    let run = |chunk_size: usize| {
        let mut builder = PipelineBuilder::with_settings(settings(chunk_size));
        let reader = builder
            .add_stage(None, FauxBuilder::new(997).bounds(-50.0, 50.0).random(42).build())
            .unwrap();
        let keep = builder.add_stage(None, range("X", -10.0, 25.0)).unwrap();
        let out = builder.add_stage(None, memory()).unwrap();
        builder.connect(reader, keep).unwrap();
        builder.connect(keep, out).unwrap();

        let mut pipeline = builder.build().unwrap();
        pipeline.run().unwrap();
        let points = pipeline.memory_output(out).unwrap();
        (column_values(points, "X"), column_values(points, "Y"))
    };

    let reference = run(997);
    assert!(!reference.0.is_empty());
    for chunk_size in [1, 7, 64, 500, 4096] {
        assert_eq!(run(chunk_size), reference, "chunk size {}", chunk_size);
    }
}

#[test]
fn test_fan_out_to_filters_and_writer() {
    let mut builder = PipelineBuilder::with_settings(settings(32));
    let reader = builder.add_stage(None, FauxBuilder::new(200).build()).unwrap();
    let low = builder.add_stage(Some("low"), range("X", -0.5, 49.5)).unwrap();
    let high = builder.add_stage(Some("high"), range("X", 149.5, 199.5)).unwrap();
    let all = builder.add_stage(Some("all"), memory()).unwrap();
    let low_out = builder.add_stage(Some("low_out"), memory()).unwrap();
    let high_out = builder.add_stage(Some("high_out"), memory()).unwrap();
    builder.connect(reader, low).unwrap();
    builder.connect(reader, high).unwrap();
    builder.connect(reader, all).unwrap();
    builder.connect(low, low_out).unwrap();
    builder.connect(high, high_out).unwrap();

    let mut pipeline = builder.build().unwrap();
    let summary = pipeline.run().unwrap();

    assert_eq!(summary.total_committed(), 200 + 50 + 50);
    assert_eq!(pipeline.memory_output(all).unwrap().size(), 200);
    let highs = column_values(pipeline.memory_output(high_out).unwrap(), "X");
    assert_eq!(highs.len(), 50);
    assert_float_eq(highs[0], 150.0, 1e-9);
    assert_float_eq(highs[49], 199.0, 1e-9);
}

#[test]
fn test_merged_readers_keep_input_order() {
    let run = |chunk_size: usize| {
        let mut builder = PipelineBuilder::with_settings(settings(chunk_size));
        let low = builder.add_stage(None, FauxBuilder::new(10).build()).unwrap();
        let high = builder
            .add_stage(None, FauxBuilder::new(10).bounds(100.0, 109.0).build())
            .unwrap();
        let out = builder.add_stage(None, memory()).unwrap();
        builder.connect(low, out).unwrap();
        builder.connect(high, out).unwrap();

        let mut pipeline = builder.build().unwrap();
        let summary = pipeline.run().unwrap();
        assert_eq!(summary.total_committed(), 20);
        column_values(pipeline.memory_output(out).unwrap(), "X")
    };

    let expected: Vec<f64> = (0..10).chain(100..110).map(f64::from).collect();
    for chunk_size in [1, 3, 7, 10, 64] {
        let xs = run(chunk_size);
        assert_eq!(xs.len(), expected.len());
        for (x, e) in xs.iter().zip(&expected) {
            assert_float_eq(*x, *e, 1e-9);
        }
    }
}

#[test]
fn test_merge_follows_connection_order() {
    let mut builder = PipelineBuilder::with_settings(settings(4));
    let first = builder.add_stage(None, FauxBuilder::new(6).build()).unwrap();
    let second = builder
        .add_stage(None, FauxBuilder::new(6).bounds(50.0, 55.0).build())
        .unwrap();
    let out = builder.add_stage(None, memory()).unwrap();
    builder.connect(second, out).unwrap();
    builder.connect(first, out).unwrap();

    let mut pipeline = builder.build().unwrap();
    pipeline.run().unwrap();
    let xs = column_values(pipeline.memory_output(out).unwrap(), "X");
    assert_float_eq(xs[0], 50.0, 1e-9);
    assert_float_eq(xs[5], 55.0, 1e-9);
    assert_float_eq(xs[6], 0.0, 1e-9);
    assert_float_eq(xs[11], 5.0, 1e-9);
}

#[test]
fn test_split_and_rejoin_rejected() {
    let mut builder = PipelineBuilder::new();
    let reader = builder.add_stage(None, FauxBuilder::new(10).build()).unwrap();
    let low = builder.add_stage(None, range("X", 0.0, 4.5)).unwrap();
    let high = builder.add_stage(None, range("X", 4.5, 9.5)).unwrap();
    let out = builder.add_stage(None, memory()).unwrap();
    builder.connect(reader, low).unwrap();
    builder.connect(reader, high).unwrap();
    builder.connect(low, out).unwrap();
    builder.connect(high, out).unwrap();

    let err = builder.build().err().unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidPipeline);
}

#[test]
fn test_unusable_chunk_settings_rejected() {
    let build = |settings: pointflow::config::ExecutionConfig| {
        let mut builder = PipelineBuilder::with_settings(settings);
        let reader = builder.add_stage(None, FauxBuilder::new(3).build()).unwrap();
        let out = builder.add_stage(None, memory()).unwrap();
        builder.connect(reader, out).unwrap();
        builder.build().err().map(|e| e.kind())
    };

    assert_eq!(build(settings(0)), Some(ErrorKind::InvalidPipeline));

    let mut small = settings(100);
    small.max_buffer_points = 50;
    assert_eq!(build(small), Some(ErrorKind::InvalidPipeline));

    assert_eq!(build(settings(1)), None);
}

#[test]
fn test_cycle_rejected_at_construction() {
    let mut builder = PipelineBuilder::new();
    let reader = builder.add_stage(None, FauxBuilder::new(10).build()).unwrap();
    let a = builder.add_stage(None, scale("X", 2.0)).unwrap();
    let b = builder.add_stage(None, range("X", 0.0, 5.0)).unwrap();
    builder.connect(reader, a).unwrap();
    builder.connect(a, b).unwrap();
    builder.connect(b, a).unwrap();

    let err = builder.build().err().unwrap();
    assert!(matches!(err, PipelineError::CyclicPipeline));
    assert_eq!(err.kind(), ErrorKind::CyclicPipeline);
}

#[test]
fn test_missing_dimension_names_stage_and_phase() {
    let mut builder = PipelineBuilder::new();
    let reader = builder.add_stage(None, FauxBuilder::new(10).build()).unwrap();
    let filter = builder.add_stage(None, range("Height", 0.0, 1.0)).unwrap();
    let out = builder.add_stage(None, memory()).unwrap();
    builder.connect(reader, filter).unwrap();
    builder.connect(filter, out).unwrap();

    let mut pipeline = builder.build().unwrap();
    let err = pipeline.run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingDimension);
    assert_eq!(err.stage(), Some(("filters.range", StagePhase::Prepare)));
    assert_eq!(err.committed(), 0);
}

#[test]
fn test_script_adds_dimension() {
    let source = r#"
        fn process(ins) {
            let out = [];
            for x in ins.X {
                out.push(x * 3.0 + 1.0);
            }
            #{ Height: out }
        }
    "#;
    let mut builder = PipelineBuilder::with_settings(settings(16));
    let reader = builder.add_stage(None, FauxBuilder::new(40).build()).unwrap();
    let height = builder
        .add_stage(None, script(source, &["X"], &["Height:f32"]))
        .unwrap();
    let out = builder.add_stage(None, memory()).unwrap();
    builder.connect(reader, height).unwrap();
    builder.connect(height, out).unwrap();

    let mut pipeline = builder.build().unwrap();
    pipeline.run().unwrap();

    let points = pipeline.memory_output(out).unwrap();
    let dim = points.table().find("Height").unwrap();
    assert_eq!(
        points.table().dimension(dim).unwrap().data_type.to_string(),
        "f32"
    );
    for (x, h) in column_values(points, "X")
        .iter()
        .zip(column_values(points, "Height"))
    {
        assert_float_eq(h, x * 3.0 + 1.0, 1e-4);
    }
}

#[test]
fn test_text_round_trip() {
    let dir = tempfile::TempDir::new().unwrap();
    let input = write_csv(
        dir.path(),
        "in.csv",
        "X,Y,Z,Classification",
        &["1.5,2.0,10.0,2", "3.0,4.0,-1.0,6", "5.25,6.0,20.0,1"],
    );
    let output = dir.path().join("out.csv");

    let mut builder = PipelineBuilder::with_settings(settings(2));
    let reader = builder
        .add_stage(
            None,
            StageInstance::new(BuiltinStage::TextReader(TextReader::new()))
                .with_option("filename", input.to_str().unwrap())
                .unwrap(),
        )
        .unwrap();
    let keep = builder.add_stage(None, range("Z", 0.0, 100.0)).unwrap();
    let writer = builder
        .add_stage(
            None,
            StageInstance::new(BuiltinStage::TextWriter(TextWriter::new()))
                .with_option("filename", output.to_str().unwrap())
                .unwrap()
                .with_option("precision", 2i64)
                .unwrap(),
        )
        .unwrap();
    builder.connect(reader, keep).unwrap();
    builder.connect(keep, writer).unwrap();

    let mut pipeline = builder.build().unwrap();
    let summary = pipeline.run().unwrap();
    assert_eq!(summary.points_read, 3);
    assert_eq!(summary.total_committed(), 2);

    let written = std::fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(
        lines,
        vec!["X,Y,Z,Classification", "1.50,2.00,10.00,2", "5.25,6.00,20.00,1"]
    );
}

#[cfg(target_os = "linux")]
#[test]
fn test_full_device_reports_nothing_committed() {
    let mut builder = PipelineBuilder::with_settings(settings(4));
    let reader = builder.add_stage(None, FauxBuilder::new(10).build()).unwrap();
    let writer = builder
        .add_stage(
            None,
            StageInstance::new(BuiltinStage::TextWriter(TextWriter::new()))
                .with_option("filename", "/dev/full")
                .unwrap(),
        )
        .unwrap();
    builder.connect(reader, writer).unwrap();

    let mut pipeline = builder.build().unwrap();
    let err = pipeline.run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);
    assert_eq!(err.stage(), Some(("writers.text", StagePhase::Execute)));
    assert_eq!(err.committed(), 0);
}

#[test]
fn test_text_writer_commits_only_written_lines() {
    let dir = tempfile::TempDir::new().unwrap();
    let output = dir.path().join("out.csv");

    let mut builder = PipelineBuilder::with_settings(settings(3));
    let reader = builder.add_stage(None, FauxBuilder::new(10).build()).unwrap();
    let writer = builder
        .add_stage(
            Some("csv"),
            StageInstance::new(BuiltinStage::TextWriter(TextWriter::new()))
                .with_option("filename", output.to_str().unwrap())
                .unwrap(),
        )
        .unwrap();
    builder.connect(reader, writer).unwrap();

    let mut pipeline = builder.build().unwrap();
    let summary = pipeline.run().unwrap();
    assert_eq!(summary.committed, vec![("csv".to_string(), 10)]);
    let written = std::fs::read_to_string(&output).unwrap();
    assert_eq!(written.lines().count(), 11);
}

#[test]
fn test_unreadable_input_fails_in_initialize() {
    let mut builder = PipelineBuilder::new();
    let reader = builder
        .add_stage(
            None,
            StageInstance::new(BuiltinStage::TextReader(TextReader::new()))
                .with_option("filename", "/nonexistent/points.csv")
                .unwrap(),
        )
        .unwrap();
    let out = builder.add_stage(None, memory()).unwrap();
    builder.connect(reader, out).unwrap();

    let mut pipeline = builder.build().unwrap();
    let err = pipeline.run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);
    assert_eq!(err.stage(), Some(("readers.text", StagePhase::Initialize)));
}
