#![allow(dead_code)]

use ml_datasets::formats::idx::IdxArray;
use ndarray::{Array3, ArrayD, IxDyn};
use proptest::prelude::*;
use proptest::strategy::BoxedStrategy;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(64);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 1024;
    config
}

/// Shapes of rank 1 to 4 with small extents (zero allowed).
pub fn arb_shape() -> BoxedStrategy<Vec<usize>> {
    proptest::collection::vec(0usize..=5, 1..=4).boxed()
}

fn filled<T, S>(shape: Vec<usize>, element: S) -> BoxedStrategy<ArrayD<T>>
where
    T: std::fmt::Debug + Clone + 'static,
    S: Strategy<Value = T> + 'static,
{
    let len: usize = shape.iter().product();
    proptest::collection::vec(element, len..=len)
        .prop_map(move |data| {
            ArrayD::from_shape_vec(IxDyn(&shape), data).expect("length matches shape")
        })
        .boxed()
}

/// Tensors of every IDX element type. Floats are finite so equality holds.
pub fn arb_idx_array() -> BoxedStrategy<IdxArray> {
    arb_shape()
        .prop_flat_map(|shape| {
            prop_oneof![
                filled(shape.clone(), any::<u8>()).prop_map(IdxArray::U8),
                filled(shape.clone(), any::<i8>()).prop_map(IdxArray::I8),
                filled(shape.clone(), any::<i16>()).prop_map(IdxArray::I16),
                filled(shape.clone(), any::<i32>()).prop_map(IdxArray::I32),
                filled(shape.clone(), -1.0e6f32..1.0e6).prop_map(IdxArray::F32),
                filled(shape, -1.0e12f64..1.0e12).prop_map(IdxArray::F64),
            ]
        })
        .boxed()
}

/// A stack of small grayscale images `(N, H, W)`.
pub fn arb_image_stack() -> BoxedStrategy<Array3<u8>> {
    (0usize..=4, 1usize..=6, 1usize..=6)
        .prop_flat_map(|(n, h, w)| {
            proptest::collection::vec(any::<u8>(), n * h * w..=n * h * w).prop_map(move |data| {
                Array3::from_shape_vec((n, h, w), data).expect("length matches shape")
            })
        })
        .boxed()
}
