use std::collections::BTreeMap;

use ndarray::{Array1, Array2, array};

use sldsc::design::conditioned_ld;
use sldsc::inputs::PreparedCategory;
use sldsc::regression::{BaselineDesign, ResultRow, category_design, group_by_type};
use sldsc::types::{HeritabilityResult, PValue};

const TOL: f64 = 1e-12;

fn design_with(baseline_ld: &Array2<f64>, n: Array1<f64>, weights: Array1<f64>) -> BaselineDesign {
    let mean_n = n.mean().expect("non-empty");
    let baseline_x =
        conditioned_ld(baseline_ld.view(), weights.view(), n.view(), mean_n).expect("baseline x");
    let intercept = weights.clone().insert_axis(ndarray::Axis(1));
    let y = (&weights * 2.0).insert_axis(ndarray::Axis(1));
    BaselineDesign {
        dataset: "trait".to_string(),
        rows: (0..n.len()).collect(),
        n,
        mean_n,
        weights,
        baseline_x,
        intercept,
        y,
    }
}

#[test]
fn dropped_category_rows_keep_the_dataset_mean_sample_size() {
    let baseline_ld = array![[1.0], [2.0], [3.0], [4.0], [5.0]];
    // The two largest studies lack a category LD score.
    let n = array![1000.0, 1000.0, 1000.0, 6000.0, 6000.0];
    let weights = array![0.3, 0.2, 0.2, 0.2, 0.1];
    let design = design_with(&baseline_ld, n, weights.clone());
    assert_eq!(design.mean_n, 3000.0);

    // Same scores as the baseline where present.
    let category = PreparedCategory {
        variables: vec!["custom___annotation".to_string()],
        ld: array![[1.0], [2.0], [3.0], [f64::NAN], [f64::NAN]],
        parameter_snps: array![10.0],
    };
    let (x, y) = category_design(&design, &category).expect("category design");
    assert_eq!(x.dim(), (3, 3));
    assert_eq!(y.dim(), (3, 1));
    for i in 0..3 {
        assert!((x[[i, 1]] - x[[i, 0]]).abs() < TOL);
        let expected = baseline_ld[[i, 0]] * 1000.0 / 3000.0 * weights[i];
        assert!((x[[i, 1]] - expected).abs() < TOL);
        assert!((x[[i, 2]] - weights[i]).abs() < TOL);
        assert!((y[[i, 0]] - 2.0 * weights[i]).abs() < TOL);
    }
}

#[test]
fn complete_category_keeps_every_row() {
    let baseline_ld = array![[1.0], [2.0], [3.0]];
    let design = design_with(&baseline_ld, array![10.0, 20.0, 30.0], array![0.5, 0.25, 0.25]);
    let category = PreparedCategory {
        variables: vec!["tissue___Liver".to_string()],
        ld: array![[0.5], [0.5], [0.5]],
        parameter_snps: array![3.0],
    };
    let (x, _) = category_design(&design, &category).expect("category design");
    assert_eq!(x.nrows(), 3);
    assert!((x[[0, 1]] - 0.5 * 10.0 / 20.0 * 0.5).abs() < TOL);
}

fn row(variable: &str) -> ResultRow {
    ResultRow {
        phenotype: "trait".to_string(),
        ancestry: "EUR".to_string(),
        category: "annotation".to_string(),
        variable: variable.to_string(),
        result: HeritabilityResult {
            expected_heritability_proportion: 0.1,
            heritability: 0.2,
            heritability_se: 0.05,
            enrichment: 2.0,
            enrichment_se: 0.5,
            p_value: PValue::Na,
        },
    }
}

#[test]
fn results_group_by_variable_type() {
    let grouped: BTreeMap<String, Vec<ResultRow>> = group_by_type(vec![
        row("baseline___base"),
        row("custom___annotation"),
        row("baseline___enhancer"),
    ]);
    assert_eq!(grouped.keys().collect::<Vec<_>>(), vec!["baseline", "custom"]);
    assert_eq!(grouped["baseline"].len(), 2);
}
