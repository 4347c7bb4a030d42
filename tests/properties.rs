//! Property tests for schema, buffer and graph invariants

mod common;

use common::builders::{memory, range, settings, FauxBuilder};
use common::column_values;
use pointflow::pipeline::{
    DimensionRegistry, PipelineBuilder, PipelineCompiler, PipelineError, PointBuffer, PointTable,
    StageKind,
};
use pointflow::types::DataType;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

const TYPES: [DataType; 10] = [
    DataType::I8,
    DataType::I16,
    DataType::I32,
    DataType::I64,
    DataType::U8,
    DataType::U16,
    DataType::U32,
    DataType::U64,
    DataType::F32,
    DataType::F64,
];

/// A reader followed by `filters` filters, each fed by at least one
/// earlier stage, plus extra forward edges.
fn dag() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (1usize..12).prop_flat_map(|filters| {
        let parents: Vec<_> = (1..=filters).map(|k| 0..k).collect();
        let extra = prop::collection::vec((0..=filters, 0..=filters), 0..20);
        (Just(filters), parents, extra).prop_map(|(filters, parents, extra)| {
            let mut edges = BTreeSet::new();
            for (k, parent) in parents.into_iter().enumerate() {
                edges.insert((parent, k + 1));
            }
            for (a, b) in extra {
                if a < b && b > 0 {
                    edges.insert((a, b));
                }
            }
            (filters, edges.into_iter().collect())
        })
    })
}

proptest! {
    #[test]
    fn registration_is_idempotent(name in "[A-Za-z][A-Za-z0-9_]{0,10}", t in 0usize..10, other in 0usize..10) {
        let registry = DimensionRegistry::new();
        let first = registry.register_type(&name, TYPES[t]).unwrap();
        let again = registry.register_type(&name.to_ascii_uppercase(), TYPES[t]).unwrap();
        prop_assert_eq!(first, again);
        prop_assert_eq!(registry.len(), 1);

        let conflict = registry.register_type(&name, TYPES[other]);
        if other == t {
            prop_assert_eq!(conflict.unwrap(), first);
        } else {
            let is_conflict = matches!(conflict, Err(PipelineError::DimensionConflict { .. }));
            prop_assert!(is_conflict);
        }
    }

    #[test]
    fn set_then_get_returns_written_value(points in prop::collection::vec((any::<i32>(), any::<u8>(), -1e9f64..1e9), 1..100)) {
        let mut table = PointTable::new(Arc::new(DimensionRegistry::new()));
        let a = table.add_dimension("A", DataType::I32).unwrap();
        let b = table.add_dimension("B", DataType::U8).unwrap();
        let c = table.add_dimension("C", DataType::F64).unwrap();
        let mut buffer = PointBuffer::new(Arc::new(table), 1);
        for (i, (va, vb, vc)) in points.iter().enumerate() {
            prop_assert_eq!(buffer.append_point().unwrap(), i);
            buffer.set(i, a, *va).unwrap();
            buffer.set(i, b, *vb).unwrap();
            buffer.set(i, c, *vc).unwrap();
        }
        for (i, (va, vb, vc)) in points.iter().enumerate() {
            prop_assert_eq!(buffer.get::<i32>(i, a).unwrap(), *va);
            prop_assert_eq!(buffer.get::<u8>(i, b).unwrap(), *vb);
            prop_assert_eq!(buffer.get::<f64>(i, c).unwrap(), *vc);
        }
    }

    #[test]
    fn retain_keeps_marked_points_in_order(values in prop::collection::vec(-1e6f64..1e6, 0..200), seed in any::<u64>()) {
        let mut table = PointTable::new(Arc::new(DimensionRegistry::with_defaults()));
        let x = table.add_dimension("X", DataType::F64).unwrap();
        let mut buffer = PointBuffer::new(Arc::new(table), values.len());
        for v in &values {
            let idx = buffer.append_point().unwrap();
            buffer.set(idx, x, *v).unwrap();
        }

        let keep: Vec<bool> = (0..values.len()).map(|i| (seed >> (i % 64)) & 1 == 1).collect();
        let kept = buffer.retain(&keep).unwrap();

        let expected: Vec<f64> = values
            .iter()
            .zip(&keep)
            .filter(|(_, k)| **k)
            .map(|(v, _)| *v)
            .collect();
        prop_assert_eq!(kept, expected.len());
        prop_assert_eq!(buffer.column::<f64>(x).unwrap(), expected.as_slice());
    }

    #[test]
    fn output_independent_of_chunk_size(count in 0i64..300, chunk in 1usize..64, lo in -20.0f64..0.0, hi in 0.0f64..20.0) {
        let run = |chunk_size: usize| {
            let mut builder = PipelineBuilder::with_settings(settings(chunk_size));
            let reader = builder
                .add_stage(None, FauxBuilder::new(count).bounds(-25.0, 25.0).random(7).build())
                .unwrap();
            let filter = builder.add_stage(None, range("Y", lo, hi)).unwrap();
            let out = builder.add_stage(None, memory()).unwrap();
            builder.connect(reader, filter).unwrap();
            builder.connect(filter, out).unwrap();
            let mut pipeline = builder.build().unwrap();
            let summary = pipeline.run().unwrap();
            let ys = pipeline
                .memory_output(out)
                .map(|points| column_values(points, "Y"))
                .unwrap_or_default();
            (summary.points_read, ys)
        };

        let whole = run(count.max(1) as usize);
        prop_assert_eq!(whole.0, count as u64);
        prop_assert_eq!(run(chunk), whole);
    }

    #[test]
    fn merged_output_independent_of_chunk_size(
        first in 0i64..80,
        second in 0i64..80,
        chunk in 1usize..32,
        reversed in any::<bool>(),
    ) {
        let run = |chunk_size: usize| {
            let mut builder = PipelineBuilder::with_settings(settings(chunk_size));
            let a = builder
                .add_stage(None, FauxBuilder::new(first).build())
                .unwrap();
            let high = FauxBuilder::new(second)
                .bounds(1000.0, 1000.0 + second as f64)
                .random(3)
                .build();
            let b = builder.add_stage(None, high).unwrap();
            let out = builder.add_stage(None, memory()).unwrap();
            let (x, y) = if reversed { (b, a) } else { (a, b) };
            builder.connect(x, out).unwrap();
            builder.connect(y, out).unwrap();
            let mut pipeline = builder.build().unwrap();
            pipeline.run().unwrap();
            pipeline
                .memory_output(out)
                .map(|points| column_values(points, "X"))
                .unwrap_or_default()
        };

        let whole = run((first + second).max(1) as usize);
        prop_assert_eq!(whole.len(), (first + second) as usize);
        // The first connected input arrives complete before the second
        let (head, tail) = if reversed { (second, first) } else { (first, second) };
        let split = head as usize;
        let from_b = |x: &f64| *x >= 1000.0;
        prop_assert!(whole[..split].iter().all(|x| from_b(x) == reversed));
        prop_assert!(whole[split..].iter().all(|x| from_b(x) != reversed));
        prop_assert_eq!(whole.len() - split, tail as usize);
        prop_assert_eq!(run(chunk), whole);
    }

    #[test]
    fn acyclic_graphs_compile((filters, edges) in dag(), back in any::<prop::sample::Index>()) {
        let mut kinds = vec![StageKind::Reader];
        kinds.extend(std::iter::repeat(StageKind::Filter).take(filters));

        let plan = PipelineCompiler::compile(&kinds, &edges).unwrap();
        prop_assert_eq!(plan.order.len(), kinds.len());
        for &(from, to) in &edges {
            prop_assert!(plan.position(from) < plan.position(to));
        }

        // Closing any path back onto itself is rejected.
        let (from, to) = edges[back.index(edges.len())];
        let mut cyclic = edges.clone();
        if from > 0 {
            cyclic.push((to, from));
            let result = PipelineCompiler::compile(&kinds, &cyclic);
            prop_assert!(matches!(result, Err(PipelineError::CyclicPipeline)));
        }
    }
}
