//! Password composition rules and temporary password generation.
//!
//! The same rules apply to user-chosen and system-generated passwords; only
//! the minimum length differs (8 vs 12). Violations are reported as a list so
//! clients can render every unmet rule at once.

use rand::{Rng, rngs::OsRng, seq::SliceRandom};
use serde::Serialize;

const USER_MIN_LENGTH: usize = 8;
const SYSTEM_MIN_LENGTH: usize = 12;
const MAX_LENGTH: usize = 128;
const TEMPORARY_PASSWORD_LENGTH: usize = 16;

const LOWERCASE: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
const UPPERCASE: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const DIGITS: &[u8] = b"23456789";
const SYMBOLS: &[u8] = b"!@#$%^&*-_=+?";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyViolation {
    MinLength,
    MaxLength,
    Lowercase,
    Uppercase,
    Digit,
    Symbol,
}

impl PolicyViolation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MinLength => "min_length",
            Self::MaxLength => "max_length",
            Self::Lowercase => "lowercase",
            Self::Uppercase => "uppercase",
            Self::Digit => "digit",
            Self::Symbol => "symbol",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PasswordPolicy {
    min_length: usize,
    max_length: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self::user()
    }
}

impl PasswordPolicy {
    /// Rules for passwords chosen by users.
    #[must_use]
    pub const fn user() -> Self {
        Self {
            min_length: USER_MIN_LENGTH,
            max_length: MAX_LENGTH,
        }
    }

    /// Rules for passwords the system generates on behalf of users.
    #[must_use]
    pub const fn system() -> Self {
        Self {
            min_length: SYSTEM_MIN_LENGTH,
            max_length: MAX_LENGTH,
        }
    }

    #[must_use]
    pub const fn min_length(&self) -> usize {
        self.min_length
    }

    /// Evaluate every rule. An empty list means the password is acceptable.
    #[must_use]
    pub fn violations(&self, password: &str) -> Vec<PolicyViolation> {
        let mut violations = Vec::new();
        let length = password.chars().count();
        if length < self.min_length {
            violations.push(PolicyViolation::MinLength);
        }
        if length > self.max_length {
            violations.push(PolicyViolation::MaxLength);
        }
        if !password.chars().any(char::is_lowercase) {
            violations.push(PolicyViolation::Lowercase);
        }
        if !password.chars().any(char::is_uppercase) {
            violations.push(PolicyViolation::Uppercase);
        }
        if !password.chars().any(|c| c.is_ascii_digit()) {
            violations.push(PolicyViolation::Digit);
        }
        if !password
            .chars()
            .any(|c| !c.is_alphanumeric() && !c.is_whitespace())
        {
            violations.push(PolicyViolation::Symbol);
        }
        violations
    }

    /// # Errors
    /// Returns the unmet rules when the password is rejected.
    pub fn validate(&self, password: &str) -> Result<(), Vec<PolicyViolation>> {
        let violations = self.violations(password);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

/// Generate a 16 character password that satisfies [`PasswordPolicy::system`].
///
/// One character is drawn from each class first, the rest from the union of
/// all classes, then the result is shuffled so class positions are not fixed.
/// Ambiguous glyphs (`0`, `O`, `1`, `l`, `I`) are excluded.
#[must_use]
pub fn generate_temporary_password() -> String {
    let mut rng = OsRng;
    let classes = [LOWERCASE, UPPERCASE, DIGITS, SYMBOLS];
    let mut chars: Vec<u8> = classes
        .iter()
        .map(|class| class[rng.gen_range(0..class.len())])
        .collect();

    let all: Vec<u8> = classes.concat();
    while chars.len() < TEMPORARY_PASSWORD_LENGTH {
        chars.push(all[rng.gen_range(0..all.len())]);
    }
    chars.shuffle(&mut rng);

    chars.into_iter().map(char::from).collect()
}
