use rust_decimal::Decimal;

/// Longest stay a single booking may cover, in nights.
pub const MAX_STAY_NIGHTS: i64 = 365;

pub const MIN_CAPACITY: u32 = 1;
pub const MAX_CAPACITY: u32 = 20;

/// Prices are stored as NUMERIC(10, 2).
pub const PRICE_SCALE: u32 = 2;
pub const MAX_PRICE: Decimal = Decimal::from_parts(1_410_065_407, 2, 0, false, 2);

pub const MAX_ROOM_NUMBER_LEN: usize = 50;
pub const MAX_DESCRIPTION_LEN: usize = 2000;
pub const MAX_USER_ID_LEN: usize = 150;

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 100_000;

pub const MAX_SQL_LEN: usize = 64 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_price_is_ten_digits_two_places() {
        assert_eq!(MAX_PRICE.to_string(), "99999999.99");
        assert_eq!(MAX_PRICE.scale(), PRICE_SCALE);
    }
}
