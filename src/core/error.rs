use chrono::NaiveDate;
use rust_decimal::Decimal;

/// Input rejected before or during a simulation run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("cadence of {0} months must be between 1 and 12 and divide 12")]
    Cadence(u32),

    #[error("discount must be in [0, 1), got {0}")]
    Discount(Decimal),

    #[error("contribution percentage must be in [0, 1], got {0}")]
    ContributionPercentage(Decimal),

    #[error("income must be >= 0, got {0}")]
    Income(Decimal),

    #[error("price series is empty")]
    EmptyPriceSeries,

    #[error("price series must be strictly ascending by date ({previous} then {next})")]
    UnorderedPriceSeries { previous: NaiveDate, next: NaiveDate },

    #[error("close price on {date} must be > 0, got {close}")]
    NonPositivePrice { date: NaiveDate, close: Decimal },

    #[error("price series starts {first} but must cover the period start {required}")]
    SeriesStartsAfterPeriodStart { first: NaiveDate, required: NaiveDate },

    #[error("price series ends {last} but must reach {required} (one year after period start)")]
    InsufficientHistory { last: NaiveDate, required: NaiveDate },

    #[error("discounted purchase price for period ending {date} must be > 0, got {price}")]
    NonPositivePurchasePrice { date: NaiveDate, price: Decimal },

    #[error("arithmetic overflow settling period ending {0}")]
    Overflow(NaiveDate),

    #[error("date {0} is out of the supported calendar range")]
    DateOutOfRange(NaiveDate),
}

pub type Result<T> = std::result::Result<T, ValidationError>;
