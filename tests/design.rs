use ndarray::array;

use sldsc::design::{
    BlockCrossProducts, assemble, block_cross_products, conditioned_ld, intercept_column,
    separators, target,
};
use sldsc::error::SldscError;
use sldsc::weights::{estimate_tau, regression_weights};

const TOL: f64 = 1e-9;

#[test]
fn separators_follow_integer_linspace() {
    assert_eq!(separators(10, 2), vec![0, 5, 10]);
    assert_eq!(separators(11, 2), vec![0, 5, 11]);
    assert_eq!(separators(10, 3), vec![0, 3, 6, 10]);
    assert_eq!(separators(10, 11), (0..=10).collect::<Vec<_>>());
    for seps in [separators(1234, 200), separators(7, 200)] {
        assert!(seps.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn conditioned_ld_scales_rows() {
    let ld = array![[0.1, 0.2, 0.3], [0.4, 0.5, 0.6], [0.7, 0.8, 0.9]];
    let weights = array![1.0, 0.9, 0.8];
    let n = array![1000.0, 2000.0, 3000.0];
    let x = conditioned_ld(ld.view(), weights.view(), n.view(), 2000.0).expect("conditioned");
    let expected = array![[0.05, 0.1, 0.15], [0.36, 0.45, 0.54], [0.84, 0.96, 1.08]];
    for (a, e) in x.iter().zip(expected.iter()) {
        assert!((a - e).abs() < TOL);
    }
}

#[test]
fn conditioned_ld_checks_lengths() {
    let ld = array![[0.1], [0.2]];
    let weights = array![1.0];
    let n = array![1.0, 2.0];
    assert!(matches!(
        conditioned_ld(ld.view(), weights.view(), n.view(), 1.5),
        Err(SldscError::InvalidArgument(_))
    ));
}

#[test]
fn intercept_and_target_are_weighted() {
    let weights = array![0.5, 0.25];
    let chisq = array![2.0, 4.0];
    assert_eq!(intercept_column(weights.view()), array![[0.5], [0.25]]);
    assert_eq!(target(chisq.view(), weights.view()).expect("target"), array![[1.0], [1.0]]);

    let x = assemble(&[
        array![[1.0], [2.0]].view(),
        array![[3.0], [4.0]].view(),
        intercept_column(weights.view()).view(),
    ])
    .expect("assemble");
    assert_eq!(x, array![[1.0, 3.0, 0.5], [2.0, 4.0, 0.25]]);
}

#[test]
fn block_cross_products_per_block() {
    let x1 = array![
        [0.1, 0.2, 0.3, 0.4],
        [0.5, 0.6, 0.7, 0.8],
        [0.9, 1.0, 1.1, 1.2],
        [1.3, 1.4, 1.5, 1.6]
    ];
    let x2 = array![
        [0.7, 1.1, 1.3, 1.7],
        [1.2, 0.8, 1.5, 1.9],
        [1.4, 1.6, 0.9, 2.1],
        [1.8, 2.0, 2.2, 1.0]
    ];
    let xtx = block_cross_products(x1.view(), x2.view(), &[0, 2, 4]).expect("cross products");
    assert_eq!(xtx.dim(), (2, 4, 4));

    let blocks = [
        ([0.67, 0.51, 0.88, 1.12], [0.19, 0.19, 0.28, 0.36]),
        ([3.6, 4.04, 3.67, 3.19], [0.32, 0.36, 0.31, 0.31]),
    ];
    for (b, (start, add)) in blocks.iter().enumerate() {
        for i in 0..4 {
            for j in 0..4 {
                let expected = start[j] + add[j] * i as f64;
                assert!(
                    (xtx[[b, i, j]] - expected).abs() < TOL,
                    "block {b} [{i}][{j}] = {} vs {expected}",
                    xtx[[b, i, j]]
                );
            }
        }
    }
}

#[test]
fn block_sums_equal_full_cross_product() {
    let x = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0], [7.0, 8.0], [9.0, 10.0]];
    let y = array![[1.0], [0.0], [2.0], [1.0], [3.0]];
    let cross = BlockCrossProducts::new(x.view(), y.view(), 3).expect("cross products");
    assert_eq!(cross.num_blocks(), 3);
    let full_xtx = x.t().dot(&x);
    let full_xty = x.t().dot(&y);
    let summed_xtx = cross.xtx.sum_axis(ndarray::Axis(0));
    let summed_xty = cross.xty.sum_axis(ndarray::Axis(0));
    for (a, e) in summed_xtx.iter().zip(full_xtx.iter()) {
        assert!((a - e).abs() < TOL);
    }
    for (a, e) in summed_xty.iter().zip(full_xty.iter()) {
        assert!((a - e).abs() < TOL);
    }
}

#[test]
fn separators_must_cover_rows() {
    let x = array![[1.0], [2.0], [3.0]];
    assert!(matches!(
        block_cross_products(x.view(), x.view(), &[0, 2]),
        Err(SldscError::InvalidArgument(_))
    ));
}

#[test]
fn weights_combine_heteroskedasticity_and_overcounting() {
    let ld = array![[0.1, 0.4, 0.7], [0.2, 0.5, 0.8], [0.3, 0.6, 0.9]];
    let n = array![1000.0, 2000.0, 3000.0];
    let chisq = array![1.5, 2.0, 2.5];
    let parameter_snps = array![500.0, 1000.0, 1500.0];
    let l_hm3 = array![
        (24.0f64 / 22.0).powi(2),
        (36.0f64 / 31.0).powi(2),
        (72.0f64 / 43.0).powi(2)
    ];

    let ld_sum = ld.sum_axis(ndarray::Axis(1));
    let tau = estimate_tau(ld_sum.view(), n.view(), chisq.view(), parameter_snps.view());
    assert!((tau - 1.0 / 3200.0).abs() < 1e-15);

    let w = regression_weights(
        ld.view(),
        l_hm3.view(),
        n.view(),
        chisq.view(),
        parameter_snps.view(),
    )
    .expect("weights");
    let expected = [1.0 / 2.0, 1.0 / 3.0, 1.0 / 6.0];
    for (a, e) in w.iter().zip(expected) {
        assert!((a - e).abs() < TOL, "{w:?}");
    }
    assert!((w.sum() - 1.0).abs() < TOL);
}

#[test]
fn tau_is_clipped() {
    let ld_sum = array![1.0, 1.0];
    let n = array![10.0, 10.0];
    let p = array![4.0];
    // Mean chi-square below one gives a negative rate.
    assert_eq!(estimate_tau(ld_sum.view(), n.view(), array![0.5, 0.5].view(), p.view()), 0.0);
    // A huge mean chi-square is capped at 1 / sum(p).
    assert_eq!(estimate_tau(ld_sum.view(), n.view(), array![1e6, 1e6].view(), p.view()), 0.25);
    // Zero LD gives a non-finite rate.
    let zero = array![0.0, 0.0];
    assert_eq!(estimate_tau(zero.view(), n.view(), array![2.0, 2.0].view(), p.view()), 0.0);
}

#[test]
fn weights_reject_bad_input() {
    let empty = ndarray::Array2::<f64>::zeros((0, 2));
    let none = ndarray::Array1::<f64>::zeros(0);
    assert!(matches!(
        regression_weights(empty.view(), none.view(), none.view(), none.view(), array![1.0, 1.0].view()),
        Err(SldscError::InvalidArgument(_))
    ));
    let ld = array![[1.0], [2.0]];
    assert!(matches!(
        regression_weights(
            ld.view(),
            array![1.0].view(),
            array![1.0, 1.0].view(),
            array![1.0, 1.0].view(),
            array![1.0].view()
        ),
        Err(SldscError::InvalidArgument(_))
    ));
}
