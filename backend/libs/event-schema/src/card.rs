//! Credit card data as it appears on the wire.
//!
//! The CVV travels inside `PaymentRequest` for the gateway call and is never
//! persisted; `payment_records` stores the masked number only.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditCard {
    pub card_number: String,
    /// Expiry in "MM/YY" format.
    pub expiry_date: String,
    pub cvv: String,
    pub card_holder_name: String,
}

impl CreditCard {
    /// Mask all but the first and last four digits: `4111********1111`.
    pub fn masked_number(&self) -> String {
        let digits: String = self.card_number.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() <= 8 {
            return "*".repeat(digits.len());
        }
        let head = &digits[..4];
        let tail = &digits[digits.len() - 4..];
        format!("{}{}{}", head, "*".repeat(digits.len() - 8), tail)
    }

    /// Parse the "MM/YY" expiry into (month, four-digit year).
    pub fn expiry(&self) -> Option<(u32, i32)> {
        let (month, year) = self.expiry_date.split_once('/')?;
        let month: u32 = month.parse().ok()?;
        let year: i32 = year.parse().ok()?;
        if !(1..=12).contains(&month) {
            return None;
        }
        Some((month, 2000 + year))
    }

    /// A card is expired once the month of `now` is past its expiry month.
    /// An unparseable expiry is treated as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry() {
            Some((month, year)) => {
                (year, month) < (now.year(), now.month())
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn card(number: &str, expiry: &str) -> CreditCard {
        CreditCard {
            card_number: number.to_string(),
            expiry_date: expiry.to_string(),
            cvv: "123".to_string(),
            card_holder_name: "Jo Customer".to_string(),
        }
    }

    #[test]
    fn test_masking_keeps_first_and_last_four() {
        assert_eq!(
            card("4111111111111111", "12/30").masked_number(),
            "4111********1111"
        );
    }

    #[test]
    fn test_masking_short_numbers_entirely() {
        assert_eq!(card("12345678", "12/30").masked_number(), "********");
    }

    #[test]
    fn test_expiry_parsing() {
        assert_eq!(card("4111", "09/27").expiry(), Some((9, 2027)));
        assert_eq!(card("4111", "13/27").expiry(), None);
        assert_eq!(card("4111", "banana").expiry(), None);
    }

    #[test]
    fn test_expired_when_month_has_passed() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        assert!(card("4111", "07/26").is_expired(now));
        assert!(!card("4111", "08/26").is_expired(now));
        assert!(!card("4111", "01/27").is_expired(now));
        assert!(card("4111", "junk").is_expired(now));
    }
}
