mod error;

use axum::{
    Router,
    extract::{Json, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, put},
};
use chrono::NaiveDate;
use clap::Parser;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::core::{
    Cadence, EarningsRecord, PeriodPair, PlanOutcome, PlanParameters, PlanSummary, PricePoint,
    run_plan,
};
use crate::store::{
    CompanyInfo, CompanyInfoPatch, EsppModel, EsppModelPatch, Mergeable, Snapshot, Store,
    StoreRegistry,
};

pub use error::ApiError;

const HUNDRED: Decimal = dec!(100);

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    period_start_date: Option<NaiveDate>,
    income: Option<Decimal>,
    contribution_percentage: Option<Decimal>,
    discount: Option<Decimal>,
    cadence_months: Option<u32>,
    lookback: Option<bool>,
    prices: Option<Vec<PricePoint>>,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "espp",
    about = "Employee stock purchase plan earnings over one plan year"
)]
struct Cli {
    #[arg(long, help = "JSON file holding an ascending [{date, close}] price series")]
    prices: Option<PathBuf>,
    #[arg(
        long,
        help = "First day of the plan year; defaults to the first date in the series"
    )]
    period_start_date: Option<NaiveDate>,
    #[arg(long, default_value = "100000", help = "Annual income")]
    income: Decimal,
    #[arg(long, default_value = "10", help = "Share of income contributed, in percent")]
    contribution_percentage: Decimal,
    #[arg(long, default_value = "15", help = "Purchase price discount, in percent")]
    discount: Decimal,
    #[arg(long, default_value_t = 6, help = "Months between purchases; must divide 12")]
    cadence_months: u32,
    #[arg(long, help = "Buy at the lower of the period start and end prices")]
    lookback: bool,
}

#[derive(Debug)]
struct ApiRequest {
    parameters: PlanParameters,
    prices: Vec<PricePoint>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    parameters: PlanParameters,
    periods: Vec<PeriodPair>,
    records: Vec<EarningsRecord>,
    summary: PlanSummary,
}

impl SimulateResponse {
    fn new(parameters: PlanParameters, outcome: PlanOutcome) -> Self {
        Self {
            parameters,
            periods: outcome.periods,
            records: outcome.records,
            summary: outcome.summary,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StateResponse {
    company_info: Snapshot<CompanyInfo>,
    espp_profits_model: Snapshot<EsppModel>,
}

struct AppState {
    stores: StoreRegistry,
}

/// Converts percent-based flags into validated plan parameters.
fn build_parameters(cli: &Cli, prices: &[PricePoint]) -> Result<PlanParameters, ApiError> {
    let cadence = Cadence::new(cli.cadence_months)?;

    if cli.contribution_percentage < Decimal::ZERO || cli.contribution_percentage > HUNDRED {
        return Err(ApiError::InvalidParameter(
            "--contribution-percentage must be between 0 and 100".to_string(),
        ));
    }
    if cli.discount < Decimal::ZERO || cli.discount >= HUNDRED {
        return Err(ApiError::InvalidParameter(
            "--discount must be >= 0 and < 100".to_string(),
        ));
    }
    if cli.income < Decimal::ZERO {
        return Err(ApiError::InvalidParameter("--income must be >= 0".to_string()));
    }

    let period_start_date = match cli.period_start_date {
        Some(date) => date,
        None => prices.first().map(|p| p.date).ok_or(ApiError::MissingPrices)?,
    };

    let parameters = PlanParameters {
        period_start_date,
        income: cli.income,
        lookback: cli.lookback,
        cadence,
        discount: cli.discount / HUNDRED,
        contribution_percentage: cli.contribution_percentage / HUNDRED,
    };
    parameters.validate()?;
    Ok(parameters)
}

fn load_prices(path: &Path) -> Result<Vec<PricePoint>, ApiError> {
    let raw = std::fs::read_to_string(path)?;
    let prices: Vec<PricePoint> = serde_json::from_str(&raw)?;
    debug!(path = %path.display(), days = prices.len(), "loaded price series");
    Ok(prices)
}

/// Runs one simulation from command-line flags and prints the JSON result.
pub fn run_cli() -> Result<(), ApiError> {
    let cli = Cli::parse();
    let path = cli
        .prices
        .clone()
        .ok_or_else(|| ApiError::InvalidParameter("--prices is required".to_string()))?;

    let prices = load_prices(&path)?;
    let parameters = build_parameters(&cli, &prices)?;
    let outcome = run_plan(&prices, &parameters)?;

    let response = SimulateResponse::new(parameters, outcome);
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/company", put(company_handler))
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route("/api/state", get(state_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let stores = StoreRegistry::new();
    log_updates(&stores.company_info);
    log_updates(&stores.espp_model);
    let state = Arc::new(AppState { stores });

    let listener = TcpListener::bind(addr).await?;
    info!("ESPP HTTP API listening on http://{addr}");

    axum::serve(listener, app(state)).await
}

fn log_updates<T: Mergeable>(store: &Store<T>) {
    let slot = store.name();
    store.subscribe(move |snapshot| {
        debug!(
            slot,
            loading = snapshot.loading,
            error = ?snapshot.error,
            "state updated"
        );
    });
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, serde_json::json!({ "status": "ok" }))
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn company_handler(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<CompanyInfoPatch>,
) -> Response {
    let snapshot = state.stores.company_info.sync_update(patch);
    json_response(StatusCode::OK, snapshot)
}

async fn state_handler(State(state): State<Arc<AppState>>) -> Response {
    json_response(
        StatusCode::OK,
        StateResponse {
            company_info: state.stores.company_info.current(),
            espp_profits_model: state.stores.espp_model.current(),
        },
    )
}

async fn simulate_get_handler(
    State(state): State<Arc<AppState>>,
    Query(payload): Query<SimulatePayload>,
) -> Response {
    simulate_handler_impl(&state, payload).await
}

async fn simulate_post_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SimulatePayload>,
) -> Response {
    simulate_handler_impl(&state, payload).await
}

async fn simulate_handler_impl(state: &AppState, payload: SimulatePayload) -> Response {
    let stores = &state.stores;
    let result = stores
        .espp_model
        .async_update(async {
            let request = api_request_from_payload(payload, stores)?;
            let outcome = run_plan(&request.prices, &request.parameters)?;
            Ok::<_, ApiError>(EsppModelPatch {
                parameters: Some(request.parameters),
                outcome: Some(outcome),
            })
        })
        .await;

    match result {
        Ok(snapshot) => match snapshot.data {
            Some(EsppModel {
                parameters: Some(parameters),
                outcome: Some(outcome),
            }) => json_response(StatusCode::OK, SimulateResponse::new(parameters, outcome)),
            _ => error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        },
        Err(err) => {
            warn!(error = %err, "simulation rejected");
            err.into_response()
        }
    }
}

#[cfg(test)]
fn api_request_from_json(json: &str, stores: &StoreRegistry) -> Result<ApiRequest, ApiError> {
    let payload = serde_json::from_str::<SimulatePayload>(json)?;
    api_request_from_payload(payload, stores)
}

/// Overlays the payload on the CLI defaults; prices fall back to the stored company series.
fn api_request_from_payload(
    payload: SimulatePayload,
    stores: &StoreRegistry,
) -> Result<ApiRequest, ApiError> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.period_start_date {
        cli.period_start_date = Some(v);
    }
    if let Some(v) = payload.income {
        cli.income = v;
    }
    if let Some(v) = payload.contribution_percentage {
        cli.contribution_percentage = v;
    }
    if let Some(v) = payload.discount {
        cli.discount = v;
    }
    if let Some(v) = payload.cadence_months {
        cli.cadence_months = v;
    }
    if let Some(v) = payload.lookback {
        cli.lookback = v;
    }

    let prices = match payload.prices {
        Some(prices) => prices,
        None => stores
            .company_info
            .current()
            .data
            .map(|info| info.prices)
            .filter(|prices| !prices.is_empty())
            .ok_or(ApiError::MissingPrices)?,
    };

    let parameters = build_parameters(&cli, &prices)?;
    Ok(ApiRequest { parameters, prices })
}

fn default_cli_for_api() -> Cli {
    Cli {
        prices: None,
        period_start_date: None,
        income: dec!(100000),
        contribution_percentage: dec!(10),
        discount: dec!(15),
        cadence_months: 6,
        lookback: false,
    }
}

pub(crate) fn no_store() -> HeaderValue {
    HeaderValue::from_static("no-store")
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, no_store());
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(status, serde_json::json!({ "error": msg }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ValidationError;
    use chrono::Days;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn daily_prices(start: NaiveDate, days: u64) -> Vec<PricePoint> {
        (0..days)
            .map(|i| PricePoint {
                date: start + Days::new(i),
                close: dec!(10) + Decimal::new(i as i64, 2),
            })
            .collect()
    }

    fn sample_cli() -> Cli {
        default_cli_for_api()
    }

    fn test_state() -> AppState {
        AppState {
            stores: StoreRegistry::new(),
        }
    }

    #[test]
    fn build_parameters_converts_percentages() {
        let prices = daily_prices(date(2017, 1, 2), 400);

        let params = build_parameters(&sample_cli(), &prices).expect("valid parameters");

        assert_eq!(params.contribution_percentage, dec!(0.1));
        assert_eq!(params.discount, dec!(0.15));
        assert_eq!(params.cadence.months(), 6);
        assert_eq!(params.period_start_date, date(2017, 1, 2));
    }

    #[test]
    fn build_parameters_rejects_cadence_that_does_not_divide_year() {
        let mut cli = sample_cli();
        cli.cadence_months = 5;
        let prices = daily_prices(date(2017, 1, 2), 400);

        let err = build_parameters(&cli, &prices).expect_err("must reject cadence");
        assert!(matches!(err, ApiError::Validation(ValidationError::Cadence(5))));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn build_parameters_rejects_out_of_range_rates() {
        let prices = daily_prices(date(2017, 1, 2), 400);

        let mut cli = sample_cli();
        cli.discount = dec!(100);
        let err = build_parameters(&cli, &prices).expect_err("must reject discount");
        assert!(err.to_string().contains("--discount"));

        let mut cli = sample_cli();
        cli.contribution_percentage = dec!(101);
        let err = build_parameters(&cli, &prices).expect_err("must reject contribution");
        assert!(err.to_string().contains("--contribution-percentage"));

        let mut cli = sample_cli();
        cli.income = dec!(-5);
        assert!(build_parameters(&cli, &prices).is_err());
    }

    #[test]
    fn build_parameters_without_start_date_needs_prices() {
        let err = build_parameters(&sample_cli(), &[]).expect_err("no prices");
        assert!(matches!(err, ApiError::MissingPrices));
    }

    #[test]
    fn api_request_from_json_parses_web_keys() {
        let stores = StoreRegistry::new();
        let json = r#"{
            "periodStartDate": "2017-01-03",
            "income": 80000,
            "contributionPercentage": "12.5",
            "discount": 10,
            "cadenceMonths": 3,
            "lookback": true,
            "prices": [
                { "date": "2017-01-03", "close": "10.25" },
                { "date": "2017-01-04", "close": "10.50" }
            ]
        }"#;

        let request = api_request_from_json(json, &stores).expect("valid request");

        assert_eq!(request.parameters.period_start_date, date(2017, 1, 3));
        assert_eq!(request.parameters.income, dec!(80000));
        assert_eq!(request.parameters.contribution_percentage, dec!(0.125));
        assert_eq!(request.parameters.discount, dec!(0.1));
        assert_eq!(request.parameters.cadence.periods_per_year(), 4);
        assert!(request.parameters.lookback);
        assert_eq!(request.prices.len(), 2);
        assert_eq!(request.prices[1].close, dec!(10.5));
    }

    #[test]
    fn api_request_falls_back_to_stored_prices() {
        let stores = StoreRegistry::new();
        assert!(matches!(
            api_request_from_json("{}", &stores),
            Err(ApiError::MissingPrices)
        ));

        stores.company_info.sync_update(CompanyInfoPatch {
            symbol: Some("ACME".to_string()),
            prices: Some(daily_prices(date(2018, 3, 1), 370)),
        });

        let request = api_request_from_json("{}", &stores).expect("uses stored prices");
        assert_eq!(request.prices.len(), 370);
        assert_eq!(request.parameters.period_start_date, date(2018, 3, 1));
    }

    #[test]
    fn api_request_rejects_unknown_cadence_type() {
        let stores = StoreRegistry::new();
        let err = api_request_from_json(r#"{"cadenceMonths": "six"}"#, &stores)
            .expect_err("must reject");
        assert!(matches!(err, ApiError::Json(_)));
    }

    #[tokio::test]
    async fn simulate_stores_outcome_on_success() {
        let state = test_state();
        let payload = SimulatePayload {
            period_start_date: Some(date(2017, 1, 2)),
            prices: Some(daily_prices(date(2017, 1, 2), 400)),
            ..SimulatePayload::default()
        };

        let response = simulate_handler_impl(&state, payload).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL),
            Some(&no_store())
        );
        let snapshot = state.stores.espp_model.current();
        assert!(!snapshot.loading);
        assert!(snapshot.error.is_none());
        let outcome = snapshot.data.and_then(|m| m.outcome).expect("stored outcome");
        assert_eq!(outcome.records.len(), 2);
    }

    #[tokio::test]
    async fn failed_simulation_keeps_previous_outcome() {
        let state = test_state();
        let good = SimulatePayload {
            prices: Some(daily_prices(date(2017, 1, 2), 400)),
            ..SimulatePayload::default()
        };
        let response = simulate_handler_impl(&state, good).await;
        assert_eq!(response.status(), StatusCode::OK);
        let before = state.stores.espp_model.current().data;

        let short = SimulatePayload {
            prices: Some(daily_prices(date(2017, 1, 2), 100)),
            ..SimulatePayload::default()
        };
        let response = simulate_handler_impl(&state, short).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let after = state.stores.espp_model.current();
        assert_eq!(after.data, before);
        assert!(!after.loading);
        assert!(
            after
                .error
                .as_deref()
                .is_some_and(|e| e.contains("one year after period start"))
        );
    }

    #[test]
    fn simulate_response_serialization_contains_expected_fields() {
        let prices = daily_prices(date(2017, 1, 2), 400);
        let params = build_parameters(&sample_cli(), &prices).unwrap();
        let outcome = run_plan(&prices, &params).unwrap();

        let value = serde_json::to_value(SimulateResponse::new(params, outcome)).unwrap();

        assert_eq!(value["parameters"]["cadence"], 6);
        assert_eq!(value["records"].as_array().map(Vec::len), Some(2));
        let record = &value["records"][0];
        for key in [
            "periodStart",
            "periodEnd",
            "saleReferencePrice",
            "buyReferencePrice",
            "contributionThisPeriod",
            "discountedPurchasePrice",
            "sharesBought",
            "moneyUsedToBuy",
            "unusedCash",
            "saleProceeds",
            "gain",
            "amountOwedToOperator",
            "cashInBankAfterSale",
            "employeeNetGain",
            "operatorNetGain",
        ] {
            assert!(record.get(key).is_some(), "missing {key}");
        }
        assert!(record["periodStart"].get("scheduledDate").is_some());
        assert_eq!(value["summary"]["periods"], 2);
    }
}
