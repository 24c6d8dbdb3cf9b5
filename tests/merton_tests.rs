use merton_lib::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use statrs::distribution::{ContinuousCDF, Normal};

mod test_utils;
use test_utils::*;

#[test]
fn test_baseline_end_to_end() {
    let firm = baseline_firm();
    let obs = firm.observables();
    println!(
        "Observables: E0={:.2}, sigma_E={:.6}",
        obs.equity_value, obs.equity_vol
    );
    assert!((obs.equity_value - 3_004_198.18).abs() < 0.01);
    assert!((obs.equity_vol - 0.79941).abs() < 1e-5);

    let estimation = estimate(obs, &create_test_config(), None).unwrap();
    let state = estimation.solver.state;
    println!(
        "Solved: V0={:.2}, sigma_v={:.6}, iterations={}, method={:?}",
        state.asset_value, state.asset_vol, estimation.solver.iterations, estimation.solver.method
    );

    assert!(estimation.solver.converged);
    assert_eq!(estimation.solver.method, SolveMethod::Joint);
    assert_eq!(estimation.solver.diagnostic, Diagnostic::Ok);
    assert!(estimation.solver.residual_norm <= 1e-6);
    assert!((state.asset_value / firm.asset_value - 1.0).abs() < 1e-5);
    assert!((state.asset_vol - firm.asset_vol).abs() < 1e-5);
    assert!((estimation.default.probability - 0.12660063626377663).abs() < 1e-5);
    assert!((estimation.default.d2 - 1.1426082647995548).abs() < 1e-4);
    assert!((estimation.metrics.default_probability - estimation.default.probability).abs() < 1e-15);
}

#[test]
fn test_rounded_observables_still_solve() {
    // Observables as usually quoted, rounded to cents and four decimals
    let obs = MarketObservables::new(3_004_198.18, 0.7994, 10_000_000.0, 1.0, 0.05).unwrap();
    let pd = estimate_default_probability(obs, &SolverConfig::default()).unwrap();
    assert!((pd.probability - 0.1266).abs() < 1e-3);
}

#[test]
fn test_fixture_firms_recovered_by_every_transform() {
    let firms = load_firms(&fixture_path()).unwrap();
    assert_eq!(firms.len(), 8);

    for transform in [TransformKind::Exp, TransformKind::None, TransformKind::Arctanh] {
        let config = SolverConfig {
            transform,
            ..create_test_config()
        };
        for firm in &firms {
            let result = solve_asset_state(firm.observables(), &config).unwrap();
            println!(
                "{:?} {:>14}: converged={} iterations={} residual={:.2e}",
                transform, firm.name, result.converged, result.iterations, result.residual_norm
            );
            assert!(result.converged, "{} did not converge", firm.name);
            assert!(result.state.is_valid());

            let expected = default_probability(
                firm.asset_value,
                firm.asset_vol,
                firm.debt_face,
                firm.maturity,
                firm.risk_free_rate,
            )
            .unwrap();
            let got = default_probability(
                result.state.asset_value,
                result.state.asset_vol,
                firm.debt_face,
                firm.maturity,
                firm.risk_free_rate,
            )
            .unwrap();
            assert!(
                (got.probability - expected.probability).abs() < 1e-5,
                "{}: pd {} vs {}",
                firm.name,
                got.probability,
                expected.probability
            );
        }
    }
}

#[test]
fn test_residual_matches_kernel_at_solution() {
    let firm = baseline_firm();
    let obs = firm.observables();
    let result = solve_asset_state(obs, &SolverConfig::production()).unwrap();
    assert!(result.converged);

    let residual = JointResidual::new(obs).residual(result.state).unwrap();
    let price = call_price(
        result.state.asset_value,
        obs.debt_face,
        obs.maturity,
        obs.risk_free_rate,
        result.state.asset_vol,
    );
    assert!((residual.f_price - (price - obs.equity_value)).abs() < 1e-6);
    assert!((residual.scaled(obs.equity_value).norm() - result.residual_norm).abs() < 1e-12);
    assert!(result.residual_norm <= 1e-10);
}

#[test]
fn test_sampled_firms_converge() {
    let mut rng = StdRng::seed_from_u64(3);
    let config = create_test_config();
    let debt = 1_000_000.0;

    for _ in 0..200 {
        let firm = FirmRow {
            name: "sampled".to_string(),
            asset_value: debt * rng.gen_range(1.1..4.0),
            asset_vol: rng.gen_range(0.1..0.5),
            debt_face: debt,
            maturity: rng.gen_range(0.5..5.0),
            risk_free_rate: rng.gen_range(0.0..0.06),
        };
        let obs = firm.observables();
        let estimation = estimate(obs, &config, None).unwrap();
        let truth = default_probability(
            firm.asset_value,
            firm.asset_vol,
            debt,
            firm.maturity,
            firm.risk_free_rate,
        )
        .unwrap();

        assert!(estimation.solver.converged);
        assert!((estimation.solver.state.asset_value / firm.asset_value - 1.0).abs() < 1e-5);
        assert!((estimation.solver.state.asset_vol - firm.asset_vol).abs() < 1e-5);
        assert!((estimation.default.probability - truth.probability).abs() < 1e-5);
    }
}

#[test]
fn test_call_price_monotone_in_assets_and_volatility() {
    let mut rng = StdRng::seed_from_u64(11);
    let d = 10_000_000.0;

    for _ in 0..500 {
        let v0 = d * rng.gen_range(0.5..3.0);
        let sigma = rng.gen_range(0.05..1.5);
        let t = rng.gen_range(0.1..10.0);
        let r = rng.gen_range(0.0..0.1);

        let base = call_price(v0, d, t, r, sigma);
        let bumped_assets = call_price(v0 * 1.001, d, t, r, sigma);
        let bumped_vol = call_price(v0, d, t, r, sigma * 1.001);
        // Deep in or out of the money the bump is below one ulp of the price
        let noise = 1e-12 * v0;
        assert!(
            bumped_assets >= base - noise,
            "price not increasing in V0 at {v0}, {sigma}"
        );
        assert!(
            bumped_vol >= base - noise,
            "price not increasing in sigma_v at {v0}, {sigma}"
        );

        // Call value bounds: intrinsic value below, asset value above
        let intrinsic = (v0 - d * (-r * t).exp()).max(0.0);
        assert!(base >= intrinsic - 1e-6 * v0);
        assert!(base <= v0);
    }
}

#[test]
fn test_norm_cdf_matches_statrs() {
    // statrs' normal CDF is only good to a few 1e-11 near |x| ~ 0.7, so it
    // bounds the comparison; exact digits are pinned in the next test.
    let normal = Normal::new(0.0, 1.0).unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..1000 {
        let x: f64 = rng.gen_range(-8.0..8.0);
        let ours = norm_cdf(x);
        let reference = normal.cdf(x);
        assert!(
            (ours - reference).abs() < 1e-10,
            "Φ({x}) = {ours}, statrs {reference}"
        );
    }
}

#[test]
fn test_norm_cdf_high_precision_points() {
    // Arbitrary-precision reference values, rounded to f64
    let points = [
        (-0.7275263014318583, 0.2334518046460068341),
        (-3.0, 0.0013498980316300945),
        (-1.0, 0.15865525393145705),
        (1.0, 0.8413447460685429),
        (2.0, 0.9772498680518208),
    ];
    for (x, expected) in points {
        let ours = norm_cdf(x);
        assert!(
            (ours - expected).abs() < 1e-15,
            "Φ({x}) = {ours}, expected {expected}"
        );
    }
}

#[test]
fn test_fallback_produces_decoupled_estimate() {
    // Raw coordinates with a two-step budget leave V0 accurate but the joint
    // residual above tolerance.
    let firm = baseline_firm();
    let config = SolverConfig {
        transform: TransformKind::None,
        max_iterations: 2,
        ..SolverConfig::default()
    };
    let estimation = estimate(firm.observables(), &config, None).unwrap();
    println!("Fallback: {:?}", estimation.solver);

    assert_eq!(estimation.solver.method, SolveMethod::Decoupled);
    assert!(estimation.solver.converged);
    assert!((estimation.solver.state.asset_value / firm.asset_value - 1.0).abs() < 1e-4);
    assert!((estimation.solver.state.asset_vol - firm.asset_vol).abs() < 1e-4);
    assert!((estimation.default.probability - 0.12660063626377663).abs() < 1e-4);

    // The fixed-V0 volatility identity holds at the reported state
    let obs = firm.observables();
    let sigma_e = implied_equity_volatility(
        estimation.solver.state.asset_value,
        obs.debt_face,
        obs.maturity,
        obs.risk_free_rate,
        estimation.solver.state.asset_vol,
        obs.equity_value,
    );
    assert!((sigma_e - obs.equity_vol).abs() <= config.tolerance_abs);
}

#[test]
fn test_failure_is_an_error_not_a_probability() {
    let config = SolverConfig {
        max_iterations: 0,
        ..SolverConfig::default()
    };
    let err = estimate_default_probability(baseline_firm().observables(), &config).unwrap_err();
    println!("Expected failure: {err}");
    match err {
        MertonError::SolverFailure {
            diagnostic,
            iterations,
            ..
        } => {
            assert_eq!(diagnostic, Diagnostic::MaxIterations);
            assert_eq!(iterations, 0);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_invalid_observables_rejected() {
    let obs = MarketObservables {
        equity_value: -1.0,
        equity_vol: 0.8,
        debt_face: 10_000_000.0,
        maturity: 1.0,
        risk_free_rate: 0.05,
    };
    assert!(matches!(
        estimate_default_probability(obs, &SolverConfig::default()),
        Err(MertonError::InvalidInput {
            field: "equity_value",
            ..
        })
    ));
    assert!(MarketObservables::new(1.0, 0.8, 1.0, 0.0, 0.05).is_err());
    assert!(MarketObservables::new(1.0, 0.8, 1.0, 1.0, f64::NAN).is_err());
}

#[test]
fn test_presets_agree_on_baseline() {
    let obs = baseline_firm().observables();
    let presets = [
        ("production", default_configs::production()),
        ("fast", default_configs::fast()),
        ("research", default_configs::research()),
        ("minimal", default_configs::minimal()),
    ];
    for (name, config) in presets {
        let pd = estimate_default_probability(obs, &config).unwrap();
        println!("{name}: pd={:.8}", pd.probability);
        assert!((pd.probability - 0.12660063626377663).abs() < 1e-3);
    }
}

#[test]
fn test_credit_metrics_with_physical_drift() {
    let obs = baseline_firm().observables();
    let estimation = estimate(obs, &create_test_config(), Some(0.10)).unwrap();
    let m = estimation.metrics;
    assert!(m.d1 > m.d2);
    assert!(m.credit_spread > 0.0);
    assert!(m.leverage > 0.0 && m.leverage < 1.0);
    assert!(m.physical_distance_to_default.unwrap() > m.d2);
    assert!(m.physical_default_probability.unwrap() < m.default_probability);
}

#[cfg(feature = "serde")]
#[test]
fn test_config_file_round_trip() {
    let dir = std::env::temp_dir().join(format!("merton-lib-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("solver.toml");
    std::fs::write(
        &path,
        "transform = \"exp\"\ntolerance_abs = 1e-9\nfallback_enabled = false\n",
    )
    .unwrap();

    let config = SolverConfig::from_toml_file(&path).unwrap();
    assert_eq!(config.tolerance_abs, 1e-9);
    assert!(!config.fallback_enabled);
    let pd = estimate_default_probability(baseline_firm().observables(), &config).unwrap();
    assert!((pd.probability - 0.12660063626377663).abs() < 1e-5);

    assert!(SolverConfig::from_toml_file(dir.join("missing.toml")).is_err());
    std::fs::remove_dir_all(&dir).unwrap();
}
