//! Recipient phone-number normalization.
//!
//! This is a best-effort heuristic tied to a single country's numbering plan
//! (Argentina by default: country code `54`, mobile indicator `9`, mobile
//! trunk prefix `15`, trunk prefix `0`). It is **not** an E.164 parser: a
//! foreign number that happens to begin with one of the domestic prefixes
//! (for example a North American `1 555 ...` number) is rewritten as if it
//! were domestic. Every rewrite converges on the `country code + mobile
//! indicator` form, so normalizing an already-normalized number is a no-op.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Shortest accepted normalized number.
pub const MIN_DIGITS: usize = 10;
/// Longest accepted normalized number.
pub const MAX_DIGITS: usize = 15;

/// Numbering-plan parameters for the normalizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PhonePlan {
    /// Country calling code, without `+`.
    pub country_code: String,
    /// Digit that marks a mobile number right after the country code.
    pub mobile_indicator: String,
    /// Domestic prefix dialled before mobile numbers.
    pub mobile_trunk_prefix: String,
    /// Domestic trunk prefix.
    pub trunk_prefix: String,
    /// Leading digits of area codes that identify a bare local number.
    pub area_leading_digits: Vec<char>,
}

impl Default for PhonePlan {
    fn default() -> Self {
        Self {
            country_code: "54".to_string(),
            mobile_indicator: "9".to_string(),
            mobile_trunk_prefix: "15".to_string(),
            trunk_prefix: "0".to_string(),
            area_leading_digits: vec!['2', '3'],
        }
    }
}

impl PhonePlan {
    /// Country code followed by the mobile indicator.
    #[must_use]
    pub fn mobile_prefix(&self) -> String {
        format!("{}{}", self.country_code, self.mobile_indicator)
    }

    /// Normalize a raw recipient into a digits-only international number.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidPhoneNumber`] when the result does not
    /// have between [`MIN_DIGITS`] and [`MAX_DIGITS`] digits.
    pub fn normalize(&self, raw: &str) -> Result<String, ValidationError> {
        // The leading '+' only marks the number as international; it never
        // survives into the normalized form.
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();

        let cc = self.country_code.as_str();
        let mobile = self.mobile_prefix();

        let rewritten = if digits.starts_with(cc) {
            digits
        } else if let Some(rest) = strip_nonempty_prefix(&digits, &self.mobile_trunk_prefix) {
            format!("{mobile}{rest}")
        } else if let Some(rest) = strip_nonempty_prefix(&digits, &self.trunk_prefix) {
            format!("{cc}{rest}")
        } else if digits.len() == 10 {
            format!("{cc}{digits}")
        } else if (8..=11).contains(&digits.len()) && self.starts_with_area_digit(&digits) {
            format!("{mobile}{digits}")
        } else {
            digits
        };

        let normalized = self.ensure_mobile_indicator(rewritten);

        if !(MIN_DIGITS..=MAX_DIGITS).contains(&normalized.len()) {
            return Err(ValidationError::InvalidPhoneNumber {
                digits: normalized.len(),
            });
        }

        tracing::debug!(normalized = %normalized, "normalized phone number");
        Ok(normalized)
    }

    /// Insert the mobile indicator after the country code when a two-digit
    /// area code follows without it.
    fn ensure_mobile_indicator(&self, number: String) -> String {
        let cc = self.country_code.as_str();
        if number.starts_with(cc)
            && !number.starts_with(&self.mobile_prefix())
            && number.len() >= cc.len() + 2
        {
            format!("{}{}", self.mobile_prefix(), &number[cc.len()..])
        } else {
            number
        }
    }

    fn starts_with_area_digit(&self, digits: &str) -> bool {
        digits
            .chars()
            .next()
            .is_some_and(|first| self.area_leading_digits.contains(&first))
    }
}

fn strip_nonempty_prefix<'a>(digits: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        None
    } else {
        digits.strip_prefix(prefix)
    }
}

/// Normalize with the default numbering plan.
///
/// # Errors
///
/// See [`PhonePlan::normalize`].
pub fn normalize(raw: &str) -> Result<String, ValidationError> {
    PhonePlan::default().normalize(raw)
}
