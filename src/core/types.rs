use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::ValidationError;

pub const MONTHS_IN_YEAR: u32 = 12;

/// One trading day's closing price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: Decimal,
}

/// A price point picked as a period boundary.
///
/// `scheduled_date` is the calendar boundary; `date` is the first trading day
/// on or after it, whose close is used for pricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodBoundary {
    pub scheduled_date: NaiveDate,
    pub date: NaiveDate,
    pub close: Decimal,
}

impl PeriodBoundary {
    pub fn new(scheduled_date: NaiveDate, point: PricePoint) -> Self {
        Self {
            scheduled_date,
            date: point.date,
            close: point.close,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodPair {
    pub period_start: PeriodBoundary,
    pub period_end: PeriodBoundary,
}

/// Months between purchase boundaries. Always divides a year evenly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Cadence(u32);

impl Cadence {
    pub fn new(months: u32) -> Result<Self, ValidationError> {
        if months == 0 || months > MONTHS_IN_YEAR || MONTHS_IN_YEAR % months != 0 {
            return Err(ValidationError::Cadence(months));
        }
        Ok(Self(months))
    }

    pub fn months(self) -> u32 {
        self.0
    }

    pub fn periods_per_year(self) -> u32 {
        MONTHS_IN_YEAR / self.0
    }
}

impl TryFrom<u32> for Cadence {
    type Error = ValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Cadence::new(value)
    }
}

impl From<Cadence> for u32 {
    fn from(value: Cadence) -> Self {
        value.0
    }
}

/// Plan inputs for one simulated plan year. Rates are fractions, not percent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanParameters {
    pub period_start_date: NaiveDate,
    pub income: Decimal,
    pub lookback: bool,
    pub cadence: Cadence,
    pub discount: Decimal,
    pub contribution_percentage: Decimal,
}

/// Settlement of a single purchase period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningsRecord {
    pub period_start: PeriodBoundary,
    pub period_end: PeriodBoundary,
    pub sale_reference_price: Decimal,
    pub buy_reference_price: Decimal,
    pub contribution_per_period: Decimal,
    pub contribution_this_period: Decimal,
    pub total_contributions: Decimal,
    pub discounted_purchase_price: Decimal,
    pub shares_bought: u64,
    pub money_used_to_buy: Decimal,
    pub unused_cash: Decimal,
    pub sale_proceeds: Decimal,
    pub gain: Decimal,
    pub amount_owed_to_operator: Decimal,
    pub cash_in_bank_after_sale: Decimal,
    pub employee_net_gain: Decimal,
    pub operator_net_gain: Decimal,
}

/// Totals across every period of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub periods: usize,
    pub total_contributions: Decimal,
    pub total_shares_bought: u64,
    pub total_money_used_to_buy: Decimal,
    pub total_sale_proceeds: Decimal,
    pub total_gain: Decimal,
    pub total_employee_net_gain: Decimal,
    pub total_operator_net_gain: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanOutcome {
    pub periods: Vec<PeriodPair>,
    pub records: Vec<EarningsRecord>,
    pub summary: PlanSummary,
}

impl PlanParameters {
    /// Checks the rate and income ranges a run depends on.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.discount < Decimal::ZERO || self.discount >= Decimal::ONE {
            return Err(ValidationError::Discount(self.discount));
        }
        if self.contribution_percentage < Decimal::ZERO
            || self.contribution_percentage > Decimal::ONE
        {
            return Err(ValidationError::ContributionPercentage(
                self.contribution_percentage,
            ));
        }
        if self.income < Decimal::ZERO {
            return Err(ValidationError::Income(self.income));
        }
        Ok(())
    }
}
