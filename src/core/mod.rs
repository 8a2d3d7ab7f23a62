mod engine;
mod error;
mod segment;
mod types;

pub use engine::{
    ANNUAL_CONTRIBUTION_CAP, SHARE_PERCENTAGE, run_plan, simulate, summarize,
    validate_price_series,
};
pub use error::ValidationError;
pub use segment::{plan_year_end, segment};
pub use types::{
    Cadence, EarningsRecord, MONTHS_IN_YEAR, PeriodBoundary, PeriodPair, PlanOutcome,
    PlanParameters, PlanSummary, PricePoint,
};
