use rust_decimal::Decimal;

use crate::limits::{MAX_PRICE, PRICE_SCALE};
use crate::model::StayRange;

use super::EngineError;

/// `price_per_night × nights`, exact, at two decimal places. Totals share the
/// NUMERIC(10, 2) bound of nightly prices.
pub fn quote(price_per_night: Decimal, stay: &StayRange) -> Result<Decimal, EngineError> {
    let nights = stay.nights();
    if nights <= 0 {
        return Err(EngineError::InvalidRange {
            stay: *stay,
            reason: "check-out date must be after check-in date",
        });
    }
    let mut total = price_per_night
        .checked_mul(Decimal::from(nights))
        .ok_or(EngineError::LimitExceeded("total price overflow"))?
        .round_dp(PRICE_SCALE);
    if total > MAX_PRICE {
        return Err(EngineError::LimitExceeded("total price exceeds 99999999.99"));
    }
    total.rescale(PRICE_SCALE);
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn stay(nights: i64) -> StayRange {
        let a = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        StayRange::new(a, a + chrono::Duration::days(nights))
    }

    #[test]
    fn three_nights_at_one_hundred() {
        let total = quote(dec!(100.00), &stay(3)).unwrap();
        assert_eq!(total, dec!(300.00));
        assert_eq!(total.to_string(), "300.00");
    }

    #[test]
    fn whole_number_price_gets_two_places() {
        assert_eq!(quote(dec!(80), &stay(2)).unwrap().to_string(), "160.00");
    }

    #[test]
    fn cents_are_exact() {
        assert_eq!(quote(dec!(33.33), &stay(3)).unwrap(), dec!(99.99));
        assert_eq!(quote(dec!(0.10), &stay(365)).unwrap(), dec!(36.50));
    }

    #[test]
    fn total_is_capped_like_nightly_price() {
        assert_eq!(quote(MAX_PRICE, &stay(1)).unwrap(), MAX_PRICE);
        assert!(matches!(
            quote(MAX_PRICE, &stay(2)),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            quote(dec!(300000), &stay(365)),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn empty_stay_is_rejected() {
        assert!(matches!(
            quote(dec!(100), &stay(0)),
            Err(EngineError::InvalidRange { .. })
        ));
    }
}
