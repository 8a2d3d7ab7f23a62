use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info};

use super::error::{Result, ValidationError};
use super::segment::{plan_year_end, segment};
use super::types::{
    EarningsRecord, PeriodPair, PlanOutcome, PlanParameters, PlanSummary, PricePoint,
};

/// Operator's cut of the gain on each period's purchase.
pub const SHARE_PERCENTAGE: Decimal = dec!(0.5);

/// Maximum employee contribution per plan year.
pub const ANNUAL_CONTRIBUTION_CAP: Decimal = dec!(25000);

/// Running totals for a single simulation run.
#[derive(Debug, Default)]
struct RunState {
    total_contributions: Decimal,
}

impl RunState {
    /// Takes up to `per_period` from the remaining headroom under the cap.
    fn contribute(&mut self, per_period: Decimal) -> Decimal {
        let contribution = if self.total_contributions + per_period <= ANNUAL_CONTRIBUTION_CAP {
            per_period
        } else {
            (ANNUAL_CONTRIBUTION_CAP - self.total_contributions).max(Decimal::ZERO)
        };
        self.total_contributions += contribution;
        contribution
    }
}

/// Payroll deduction for one period.
fn contribution_per_period(params: &PlanParameters) -> Decimal {
    let periods = Decimal::from(params.cadence.periods_per_year());
    params.contribution_percentage * params.income / periods
}

/// Settles each period in order, carrying the contribution total forward.
pub fn simulate(pairs: &[PeriodPair], params: &PlanParameters) -> Result<Vec<EarningsRecord>> {
    params.validate()?;

    let per_period = contribution_per_period(params);
    let mut state = RunState::default();
    let mut records = Vec::with_capacity(pairs.len());

    for pair in pairs {
        let record = settle_period(pair, params, per_period, &mut state)?;
        debug!(
            period_end = %record.period_end.date,
            contribution = %record.contribution_this_period,
            shares = record.shares_bought,
            gain = %record.gain,
            "settled period"
        );
        records.push(record);
    }

    Ok(records)
}

fn settle_period(
    pair: &PeriodPair,
    params: &PlanParameters,
    per_period: Decimal,
    state: &mut RunState,
) -> Result<EarningsRecord> {
    let start = pair.period_start;
    let end = pair.period_end;

    let sale_reference_price = end.close;
    let buy_reference_price = if params.lookback {
        start.close.min(end.close)
    } else {
        end.close
    };

    let discounted_purchase_price = (Decimal::ONE - params.discount) * buy_reference_price;
    if discounted_purchase_price <= Decimal::ZERO {
        return Err(ValidationError::NonPositivePurchasePrice {
            date: end.date,
            price: discounted_purchase_price,
        });
    }

    let contribution_this_period = state.contribute(per_period);

    let mut shares_bought = contribution_this_period
        .checked_div(discounted_purchase_price)
        .and_then(|shares| shares.floor().to_u64())
        .ok_or(ValidationError::Overflow(end.date))?;
    let mut money_used_to_buy = Decimal::from(shares_bought)
        .checked_mul(discounted_purchase_price)
        .ok_or(ValidationError::Overflow(end.date))?;
    // A repeating contribution can round the quotient up onto a whole share.
    if money_used_to_buy > contribution_this_period && shares_bought > 0 {
        shares_bought -= 1;
        money_used_to_buy -= discounted_purchase_price;
    }
    let unused_cash = contribution_this_period - money_used_to_buy;
    let sale_proceeds = Decimal::from(shares_bought)
        .checked_mul(sale_reference_price)
        .ok_or(ValidationError::Overflow(end.date))?;
    let gain = sale_proceeds - money_used_to_buy;
    // Both net gains come from `gain` directly: with a repeating contribution,
    // `cash - owed` and `owed - contribution` would each round differently.
    let operator_net_gain = SHARE_PERCENTAGE * gain;
    let amount_owed_to_operator = contribution_this_period + operator_net_gain;
    let cash_in_bank_after_sale = sale_proceeds + unused_cash;
    let employee_net_gain = gain - operator_net_gain;

    Ok(EarningsRecord {
        period_start: start,
        period_end: end,
        sale_reference_price,
        buy_reference_price,
        contribution_per_period: per_period,
        contribution_this_period,
        total_contributions: state.total_contributions,
        discounted_purchase_price,
        shares_bought,
        money_used_to_buy,
        unused_cash,
        sale_proceeds,
        gain,
        amount_owed_to_operator,
        cash_in_bank_after_sale,
        employee_net_gain,
        operator_net_gain,
    })
}

/// Rejects series that are empty, out of order, non-positive, or that do not
/// cover the plan year from `period_start_date` onwards.
pub fn validate_price_series(prices: &[PricePoint], period_start_date: NaiveDate) -> Result<()> {
    let (Some(first), Some(last)) = (prices.first(), prices.last()) else {
        return Err(ValidationError::EmptyPriceSeries);
    };

    for point in prices {
        if point.close <= Decimal::ZERO {
            return Err(ValidationError::NonPositivePrice {
                date: point.date,
                close: point.close,
            });
        }
    }
    for window in prices.windows(2) {
        if window[1].date <= window[0].date {
            return Err(ValidationError::UnorderedPriceSeries {
                previous: window[0].date,
                next: window[1].date,
            });
        }
    }

    if first.date > period_start_date {
        return Err(ValidationError::SeriesStartsAfterPeriodStart {
            first: first.date,
            required: period_start_date,
        });
    }

    let required = plan_year_end(period_start_date)
        .ok_or(ValidationError::DateOutOfRange(period_start_date))?;
    if last.date < required {
        return Err(ValidationError::InsufficientHistory {
            last: last.date,
            required,
        });
    }
    Ok(())
}

pub fn summarize(records: &[EarningsRecord]) -> PlanSummary {
    records
        .iter()
        .fold(PlanSummary::default(), |mut summary, record| {
            summary.periods += 1;
            summary.total_contributions += record.contribution_this_period;
            summary.total_shares_bought += record.shares_bought;
            summary.total_money_used_to_buy += record.money_used_to_buy;
            summary.total_sale_proceeds += record.sale_proceeds;
            summary.total_gain += record.gain;
            summary.total_employee_net_gain += record.employee_net_gain;
            summary.total_operator_net_gain += record.operator_net_gain;
            summary
        })
}

/// Validates inputs, segments the series and settles every period of the plan year.
pub fn run_plan(prices: &[PricePoint], params: &PlanParameters) -> Result<PlanOutcome> {
    params.validate()?;
    validate_price_series(prices, params.period_start_date)?;

    let periods = segment(prices, params.period_start_date, params.cadence);
    let records = simulate(&periods, params)?;
    let summary = summarize(&records);

    info!(
        periods = summary.periods,
        contributions = %summary.total_contributions,
        shares = summary.total_shares_bought,
        gain = %summary.total_gain,
        "plan year simulated"
    );

    Ok(PlanOutcome {
        periods,
        records,
        summary,
    })
}
