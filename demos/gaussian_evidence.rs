use std::f64::consts::PI;

use varaha::{
    uniform_prior, AdaptiveVolumeSampler, Backend, IntegrationOptions, ParameterSpace,
    SampleBatch,
};

fn main() {
    // The evidence of a narrow 2D Gaussian likelihood under a uniform prior on [-5, 5]^2
    // is 1/100, up to the mass outside of the box.
    let mut space = ParameterSpace::new();
    space
        .add_parameter("mu", Some(uniform_prior(-5., 5.)), -5., 5.)
        .unwrap();
    space
        .add_parameter("sigma", Some(uniform_prior(-5., 5.)), -5., 5.)
        .unwrap();

    let width = 0.1;
    let ln_l = move |batch: &SampleBatch| -> Vec<f64> {
        let ln_norm = -(2. * PI * width * width).ln();
        let mu = batch.column("mu").unwrap();
        let sigma = batch.column("sigma").unwrap();
        mu.iter()
            .zip(sigma)
            .map(|(x, y)| ln_norm - 0.5 * (x * x + y * y) / (width * width))
            .collect()
    };

    let sampler = AdaptiveVolumeSampler::new(space);
    let opts = IntegrationOptions::default()
        .with_neff(5000.)
        .with_nmax(10_000_000)
        .with_batch_size(50_000)
        .with_verbose(true)
        .with_backend(Backend::Parallel { threads: 4 });

    let result = sampler.integrate_log(&ln_l, &opts).unwrap();

    println!(
        "Evidence: {:.6} (expected {:.6}), ln Z = {:.4} ± {:.4}",
        result.integral(),
        0.01,
        result.log_integral,
        result.log_integral_error()
    );

    for c in &result.diagnostics.history {
        println!(
            "Cycle {:2}: V = {:.4e}, {} live samples in {} bins",
            c.cycle, c.volume, c.retained, c.occupied_bins
        );
    }

    if let Some(samples) = &result.samples {
        let mu = samples.column("mu").unwrap();
        let w: Vec<f64> = samples.log_weights().iter().map(|w| w.exp()).collect();
        let mean = mu.iter().zip(&w).map(|(x, w)| x * w).sum::<f64>() / w.iter().sum::<f64>();
        println!("Posterior mean of mu: {:.4}", mean);
    }
}
