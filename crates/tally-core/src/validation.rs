//! # Validation Module
//!
//! Input validation for Tally POS forms and payloads.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Form (UI)                                                     │
//! │  ├── Basic format checks (empty, length)                               │
//! │  └── Immediate inline feedback                                         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Store / Session service (Rust)                               │
//! │  └── THIS MODULE: field rules, run before any remote call              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Remote store                                                 │
//! │  └── Paths built from barcodes must be valid keys                      │
//! │                                                                         │
//! │  A value that fails here never reaches the remote store or the         │
//! │  offline queue.                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use tally_core::validation::{validate_barcode, validate_sale_quantity};
//!
//! assert_eq!(validate_barcode(" 5449000000996 ").unwrap(), "5449000000996");
//! validate_sale_quantity(2).unwrap();
//! assert!(validate_sale_quantity(0).is_err());
//! assert!(validate_sale_quantity(1_000).is_err());
//! ```

use crate::error::ValidationError;
use crate::types::{Product, StoreProfile};
use crate::{MAX_ITEM_QUANTITY, MAX_PRICE_CENTS, MAX_STOCK_QUANTITY, PIN_LENGTH};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest barcode we accept (GS1 DataMatrix payloads top out well below).
pub const MAX_BARCODE_LENGTH: usize = 64;

pub const MAX_NAME_LENGTH: usize = 100;

pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Characters that cannot appear in a remote key segment.
const FORBIDDEN_KEY_CHARS: [char; 6] = ['/', '.', '#', '$', '[', ']'];

// =============================================================================
// String Validators
// =============================================================================

/// Validates a barcode and returns it trimmed, as it is used for keys.
///
/// ## Rules
/// - Must not be empty (after trimming)
/// - At most 64 characters
/// - Must not contain `/ . # $ [ ]` since it becomes a key in `stock/{barcode}`
///
/// ## Example
/// ```rust
/// use tally_core::validation::validate_barcode;
///
/// assert_eq!(validate_barcode(" 4006381333931\n").unwrap(), "4006381333931");
/// assert!(validate_barcode("  ").is_err());
/// assert!(validate_barcode("12/34").is_err());
/// ```
pub fn validate_barcode(barcode: &str) -> ValidationResult<String> {
    validate_key_segment("barcode", barcode, MAX_BARCODE_LENGTH)
}

/// Validates a product name (required, at most 100 characters).
pub fn validate_product_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: MAX_NAME_LENGTH,
        });
    }

    Ok(())
}

/// Validates and normalizes a catalog search query.
///
/// Returns the trimmed, lowercased query. An empty query matches everything.
pub fn validate_search_query(query: &str) -> ValidationResult<String> {
    let query = query.trim();

    if query.chars().count() > MAX_BARCODE_LENGTH {
        return Err(ValidationError::TooLong {
            field: "search query".to_string(),
            max: MAX_BARCODE_LENGTH,
        });
    }

    Ok(query.to_lowercase())
}

fn validate_key_segment(field: &str, value: &str, max: usize) -> ValidationResult<String> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    if let Some(c) = value.chars().find(|c| FORBIDDEN_KEY_CHARS.contains(c)) {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: format!("must not contain '{}'", c),
        });
    }

    Ok(value.to_string())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a product price in cents.
///
/// ## Rules
/// - Must be greater than zero
/// - Must not exceed MAX_PRICE_CENTS ($1,000,000.00)
pub fn validate_price_cents(cents: i64) -> ValidationResult<()> {
    if cents <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "price".to_string(),
        });
    }
    if cents > MAX_PRICE_CENTS {
        return Err(out_of_range("price", 1, MAX_PRICE_CENTS));
    }
    Ok(())
}

/// Validates a stock quantity. Zero is allowed (out of stock), the ceiling
/// is MAX_STOCK_QUANTITY.
pub fn validate_stock_quantity(qty: i64) -> ValidationResult<()> {
    if qty < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "quantity".to_string(),
        });
    }
    if qty > MAX_STOCK_QUANTITY {
        return Err(out_of_range("quantity", 0, MAX_STOCK_QUANTITY));
    }
    Ok(())
}

/// Validates the quantity on one sale line.
///
/// ## Rules
/// - Must be at least 1
/// - Must not exceed MAX_ITEM_QUANTITY (999)
pub fn validate_sale_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }
    if qty > MAX_ITEM_QUANTITY {
        return Err(out_of_range("quantity", 1, MAX_ITEM_QUANTITY));
    }
    Ok(())
}

/// Validates a restock amount: at least 1, at most MAX_STOCK_QUANTITY.
pub fn validate_restock_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }
    if qty > MAX_STOCK_QUANTITY {
        return Err(out_of_range("quantity", 1, MAX_STOCK_QUANTITY));
    }
    Ok(())
}

/// Stock level after adding `added` units to `current`.
///
/// ## Example
/// ```rust
/// use tally_core::validation::stock_after_restock;
///
/// assert_eq!(stock_after_restock(10, 5).unwrap(), 15);
/// assert!(stock_after_restock(999_999, 2).is_err());
/// assert!(stock_after_restock(1, i64::MAX).is_err());
/// ```
pub fn stock_after_restock(current: i64, added: i64) -> ValidationResult<i64> {
    current
        .checked_add(added)
        .filter(|total| (0..=MAX_STOCK_QUANTITY).contains(total))
        .ok_or_else(|| out_of_range("quantity", 0, MAX_STOCK_QUANTITY))
}

fn out_of_range(field: &str, min: i64, max: i64) -> ValidationError {
    ValidationError::OutOfRange {
        field: field.to_string(),
        min,
        max,
    }
}

// =============================================================================
// Session Validators
// =============================================================================

/// Validates a session PIN: exactly four ASCII digits.
///
/// ## Example
/// ```rust
/// use tally_core::validation::validate_pin;
///
/// assert!(validate_pin("0420").is_ok());
/// assert!(validate_pin("123").is_err());
/// assert!(validate_pin("12a4").is_err());
/// ```
pub fn validate_pin(pin: &str) -> ValidationResult<()> {
    if pin.is_empty() {
        return Err(ValidationError::Required {
            field: "PIN".to_string(),
        });
    }

    if pin.len() != PIN_LENGTH || !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "PIN".to_string(),
            reason: format!("must be exactly {} digits", PIN_LENGTH),
        });
    }

    Ok(())
}

/// Validates an email address (shape only, the identity provider is the
/// authority).
pub fn validate_email(email: &str) -> ValidationResult<()> {
    let email = email.trim();

    if email.is_empty() {
        return Err(ValidationError::Required {
            field: "email".to_string(),
        });
    }

    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if !valid {
        return Err(ValidationError::InvalidFormat {
            field: "email".to_string(),
            reason: "must look like name@example.com".to_string(),
        });
    }

    Ok(())
}

pub fn validate_password(password: &str) -> ValidationResult<()> {
    if password.is_empty() {
        return Err(ValidationError::Required {
            field: "password".to_string(),
        });
    }

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ValidationError::InvalidFormat {
            field: "password".to_string(),
            reason: format!("must be at least {} characters", MIN_PASSWORD_LENGTH),
        });
    }

    Ok(())
}

// =============================================================================
// Record Validators
// =============================================================================

/// Validates a whole product as submitted from the stock form and returns
/// it with barcode and name trimmed.
pub fn validate_product(product: &Product) -> ValidationResult<Product> {
    let barcode = validate_barcode(&product.barcode)?;
    validate_product_name(&product.name)?;
    validate_price_cents(product.price_cents)?;
    validate_stock_quantity(product.quantity)?;

    Ok(Product {
        barcode,
        name: product.name.trim().to_string(),
        ..product.clone()
    })
}

/// Validates a store profile. Only the name is required.
pub fn validate_store_profile(profile: &StoreProfile) -> ValidationResult<()> {
    if profile.name.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "store name".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
