#![allow(dead_code)]

use merton_lib::{
    call_price, implied_equity_volatility, AssetState, MarketObservables, SolverConfig,
};
use serde::Deserialize;

/// One firm in the fixture: the asset state that generates its observables.
#[derive(Debug, Clone, Deserialize)]
pub struct FirmRow {
    pub name: String,
    pub asset_value: f64,
    pub asset_vol: f64,
    pub debt_face: f64,
    pub maturity: f64,
    pub risk_free_rate: f64,
}

impl FirmRow {
    pub fn state(&self) -> AssetState {
        AssetState::new(self.asset_value, self.asset_vol).unwrap()
    }

    /// Equity value and volatility implied by the generating asset state.
    pub fn observables(&self) -> MarketObservables {
        let e0 = call_price(
            self.asset_value,
            self.debt_face,
            self.maturity,
            self.risk_free_rate,
            self.asset_vol,
        );
        let sigma_e = implied_equity_volatility(
            self.asset_value,
            self.debt_face,
            self.maturity,
            self.risk_free_rate,
            self.asset_vol,
            e0,
        );
        MarketObservables::new(
            e0,
            sigma_e,
            self.debt_face,
            self.maturity,
            self.risk_free_rate,
        )
        .unwrap()
    }
}

/// Load the firm fixture from CSV
pub fn load_firms(file_path: &str) -> Result<Vec<FirmRow>, Box<dyn std::error::Error>> {
    let mut reader = csv::Reader::from_path(file_path)?;
    let mut firms = Vec::new();
    for result in reader.deserialize() {
        let row: FirmRow = result?;
        firms.push(row);
    }
    Ok(firms)
}

pub fn fixture_path() -> String {
    format!("{}/tests/data/firms.csv", env!("CARGO_MANIFEST_DIR"))
}

/// The reference firm: V0 = 12.4m, sigma_v = 21.23%, D = 10m, T = 1, r = 5%
pub fn baseline_firm() -> FirmRow {
    FirmRow {
        name: "baseline".to_string(),
        asset_value: 12_400_000.0,
        asset_vol: 0.2123,
        debt_face: 10_000_000.0,
        maturity: 1.0,
        risk_free_rate: 0.05,
    }
}

/// Create default test configuration
pub fn create_test_config() -> SolverConfig {
    SolverConfig::fast()
}
