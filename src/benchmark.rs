extern crate test;

use crate::{AnalyticGradient, Bfgs, StepStrategy};
use ndarray::Array1;
use test::Bencher;

fn separable_quadratic(x: &Array1<f64>) -> f64 {
    x.iter()
        .enumerate()
        .map(|(i, xi)| (1.0 + i as f64 * 0.01) * (xi - 1.0).powi(2))
        .sum()
}

fn separable_quadratic_gradient(x: &Array1<f64>, g: &mut Array1<f64>) {
    for (i, (gi, xi)) in g.iter_mut().zip(x.iter()).enumerate() {
        *gi = 2.0 * (1.0 + i as f64 * 0.01) * (xi - 1.0);
    }
}

#[bench]
fn bench_trust_region_quadratic_p_50(bencher: &mut Bencher) {
    let x0 = Array1::from_elem(50, 2.0);
    bencher.iter(|| {
        let result = Bfgs::new(x0.clone(), separable_quadratic)
            .with_gradient(AnalyticGradient(separable_quadratic_gradient))
            .run()
            .unwrap();
        assert!(
            result.final_gradient_norm < 1e-5,
            "Expected small gradient norm, got {}",
            result.final_gradient_norm
        );
    })
}

#[bench]
fn bench_central_difference_quadratic_p_50(bencher: &mut Bencher) {
    let x0 = Array1::from_elem(50, 2.0);
    bencher.iter(|| {
        let result = Bfgs::new(x0.clone(), separable_quadratic).run().unwrap();
        assert!(result.valid_solution);
    })
}

#[bench]
fn bench_line_search_quadratic_p_50(bencher: &mut Bencher) {
    let x0 = Array1::from_elem(50, 2.0);
    bencher.iter(|| {
        let result = Bfgs::new(x0.clone(), separable_quadratic)
            .with_gradient(AnalyticGradient(separable_quadratic_gradient))
            .with_step_strategy(StepStrategy::ParabolicLineSearch)
            .with_max_iterations(200)
            .run()
            .unwrap();
        assert!(result.final_value < 1e-6);
    })
}
