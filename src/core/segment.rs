use chrono::{Months, NaiveDate};

use super::types::{Cadence, MONTHS_IN_YEAR, PeriodBoundary, PeriodPair, PricePoint};

/// Splits an ascending daily price series into contiguous purchase periods.
///
/// The scheduled boundary starts at `period_start_date` and moves forward by
/// `cadence` calendar months each time a trading day on or after it is found.
/// A series that ends early yields fewer pairs.
pub fn segment(
    prices: &[PricePoint],
    period_start_date: NaiveDate,
    cadence: Cadence,
) -> Vec<PeriodPair> {
    let wanted = cadence.periods_per_year() as usize + 1;
    let step = Months::new(cadence.months());

    let mut boundaries: Vec<PeriodBoundary> = Vec::with_capacity(wanted);
    let mut cursor = Some(period_start_date);

    for point in prices {
        if boundaries.len() >= wanted {
            break;
        }
        let Some(scheduled) = cursor else {
            break;
        };
        if point.date >= scheduled {
            boundaries.push(PeriodBoundary::new(scheduled, *point));
            cursor = scheduled.checked_add_months(step);
        }
    }

    boundaries
        .windows(2)
        .map(|pair| PeriodPair {
            period_start: pair[0],
            period_end: pair[1],
        })
        .collect()
}

/// The date a series must reach for a full plan year starting at `start`.
pub fn plan_year_end(start: NaiveDate) -> Option<NaiveDate> {
    start.checked_add_months(Months::new(MONTHS_IN_YEAR))
}
