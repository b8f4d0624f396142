// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::time::Duration;

use pipeline_confgen::metrics::eval::PipelineEvaluator;
use pipeline_confgen::metrics::model::{
    labels, point, Metric, MetricData, Number, NANOS_PER_SECOND,
};
use pipeline_confgen::metrics::steps::{Aggregation, MetricTransform, Operation, TransformStep};
use proptest::prelude::*;

const MINUTE: u64 = 60 * NANOS_PER_SECOND;
const WINDOW: Duration = Duration::from_secs(60);

fn round_trip() -> PipelineEvaluator {
    PipelineEvaluator::new(vec![
        TransformStep::CumulativeToDelta { metrics: vec![] },
        TransformStep::Interval(WINDOW),
        TransformStep::AlignTimestamps(WINDOW),
        TransformStep::DeltaToCumulative,
    ])
}

fn cumulative(value: f64, time: u64) -> Metric {
    Metric::counter(
        "requests",
        vec![point(labels(&[("code", "200")]), 0, time, Number::Double(value))],
    )
}

fn only_value(out: &[Metric]) -> f64 {
    assert_eq!(out.len(), 1);
    let points = out[0].number_points();
    assert_eq!(points.len(), 1);
    points[0].value.as_f64()
}

proptest! {
    #[test]
    fn delta_cumulative_round_trip_reproduces_series(
        start in 0u32..1_000_000,
        windows in prop::collection::vec((0u32..10_000, any::<bool>()), 1..40),
    ) {
        let mut eval = round_trip();
        let mut value = f64::from(start);
        for (i, (increment, reported)) in (0u64..).zip(windows) {
            value += f64::from(increment);
            // A window without a batch contributes nothing.
            if !reported && i > 0 {
                continue;
            }
            let time = (i + 1) * MINUTE + 17;
            let out = eval
                .consume(vec![cumulative(value, time)], time + MINUTE / 2)
                .expect("round trip");
            prop_assert!((only_value(&out) - value).abs() < 1e-6);
        }
    }

    #[test]
    fn running_total_never_decreases(
        values in prop::collection::vec(0u32..1_000, 1..40),
    ) {
        let mut eval = round_trip();
        let mut previous = 0.0;
        for (i, v) in (0u64..).zip(values) {
            let time = (i + 1) * MINUTE;
            let out = eval
                .consume(vec![cumulative(f64::from(v), time)], time)
                .expect("round trip");
            let total = only_value(&out);
            prop_assert!(total >= previous);
            previous = total;
        }
    }

    #[test]
    fn aggregation_sums_collapsed_points(
        values in prop::collection::vec((0usize..3, 0usize..5, -1.0e6f64..1.0e6), 1..30),
    ) {
        let codes = ["200", "404", "500"];
        let mut expected: BTreeMap<&str, f64> = BTreeMap::new();
        let mut points = Vec::new();
        for (i, (code, method, value)) in values.into_iter().enumerate() {
            *expected.entry(codes[code]).or_default() += value;
            let method = method.to_string();
            let instance = i.to_string();
            points.push(point(
                labels(&[("code", codes[code]), ("method", &method), ("instance", &instance)]),
                0,
                MINUTE,
                Number::Double(value),
            ));
        }

        let mut eval = PipelineEvaluator::new(vec![TransformStep::Transform(vec![
            MetricTransform::update(
                "latency",
                vec![Operation::aggregate_labels(Aggregation::Sum, &["code"])],
            ),
        ])]);
        let out = eval
            .consume(vec![Metric::new("latency", "ms", MetricData::Gauge(points))], MINUTE)
            .expect("aggregates");

        let points = out[0].number_points();
        prop_assert_eq!(points.len(), expected.len());
        for p in points {
            let code = p.labels["code"].as_str();
            prop_assert_eq!(p.labels.len(), 1);
            prop_assert!((p.value.as_f64() - expected[code]).abs() < 1e-3);
        }
    }
}
