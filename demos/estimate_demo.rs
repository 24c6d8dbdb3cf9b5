use anyhow::Context;
use merton_lib::{
    default_configs, estimate, solve_asset_state, MarketObservables, SolverConfig, TransformKind,
};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // RUST_LOG=merton_lib=debug shows the solver phases
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("merton_lib=info")),
        )
        .init();

    println!("Merton Default Probability Demo");
    println!("===============================");

    let obs = MarketObservables::new(
        3_004_198.18, // equity value
        0.7994,       // equity volatility
        10_000_000.0, // face value of debt
        1.0,          // years to maturity
        0.05,         // risk-free rate
    )?;
    println!(
        "Equity: {:.2} @ {:.2}% vol, debt face {:.0}, T={}y, r={:.2}%\n",
        obs.equity_value,
        obs.equity_vol * 100.0,
        obs.debt_face,
        obs.maturity,
        obs.risk_free_rate * 100.0
    );

    // Optional TOML config as the first argument
    let config = match std::env::args().nth(1) {
        Some(path) => SolverConfig::from_toml_file(&path)
            .with_context(|| format!("loading solver config from {path}"))?,
        None => default_configs::production(),
    };

    let estimation = estimate(obs, &config, Some(0.08))?;
    let state = estimation.solver.state;
    let metrics = estimation.metrics;
    println!("Solution ({:?}):", estimation.solver.method);
    println!("   Asset value V0:       {:.2}", state.asset_value);
    println!("   Asset volatility:     {:.4}%", state.asset_vol * 100.0);
    println!("   Iterations:           {}", estimation.solver.iterations);
    println!("   Residual norm:        {:.2e}", estimation.solver.residual_norm);
    println!();
    println!("Credit metrics:");
    println!("   d2 (risk-neutral DD): {:.4}", estimation.default.d2);
    println!("   Default probability:  {:.4}%", estimation.default.probability * 100.0);
    println!("   Credit spread:        {:.1} bp", metrics.credit_spread * 10_000.0);
    println!("   Leverage:             {:.4}", metrics.leverage);
    if let (Some(dd), Some(pd)) = (
        metrics.physical_distance_to_default,
        metrics.physical_default_probability,
    ) {
        println!("   Physical DD (mu=8%):  {:.4}  PD {:.4}%", dd, pd * 100.0);
    }

    println!("\nTransform comparison:");
    for transform in [TransformKind::Exp, TransformKind::Arctanh, TransformKind::None] {
        let config = SolverConfig {
            transform,
            ..default_configs::fast()
        };
        let result = solve_asset_state(obs, &config)?;
        println!(
            "   {:<8?} converged={:<5} iterations={:<3} V0={:.2} sigma_v={:.6}",
            transform,
            result.converged,
            result.iterations,
            result.state.asset_value,
            result.state.asset_vol
        );
    }

    Ok(())
}
