//! Schema checks for write inputs.
//!
//! Rules: name non-empty, price finite and non-negative, stock a
//! non-negative integer (enforced by its type), category optional where a
//! blank string counts as absent.

use crate::{CreateRecordInput, UpdateRecordInput, ValidationError};

/// Trim a category and map blank values to `None`.
pub fn normalize_category(category: Option<&str>) -> Option<String> {
    category
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

fn check_name(name: &str) -> Result<String, ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "name".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

fn check_price(price: f64) -> Result<f64, ValidationError> {
    if !price.is_finite() {
        return Err(ValidationError::invalid("price", "must be a number"));
    }
    if price < 0.0 {
        return Err(ValidationError::invalid("price", "must be non-negative"));
    }
    Ok(price)
}

/// Validate and normalize a create payload.
pub fn validate_create(input: &CreateRecordInput) -> Result<CreateRecordInput, ValidationError> {
    Ok(CreateRecordInput {
        name: check_name(&input.name)?,
        price: check_price(input.price)?,
        status: input.status,
        category: normalize_category(input.category.as_deref()),
        stock: input.stock,
    })
}

/// Validate and normalize an update payload.
///
/// A blank category is dropped from the update rather than clearing the
/// stored one; an update left with no fields is rejected.
pub fn validate_update(input: &UpdateRecordInput) -> Result<UpdateRecordInput, ValidationError> {
    let normalized = UpdateRecordInput {
        name: input.name.as_deref().map(check_name).transpose()?,
        price: input.price.map(check_price).transpose()?,
        status: input.status,
        category: normalize_category(input.category.as_deref()),
        stock: input.stock,
    };
    if normalized.is_empty() {
        return Err(ValidationError::EmptyUpdate);
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecordStatus;
    use proptest::prelude::*;

    #[test]
    fn test_create_requires_name() {
        let input = CreateRecordInput::new("   ", 1.0);
        assert_eq!(
            validate_create(&input),
            Err(ValidationError::RequiredFieldMissing {
                field: "name".to_string()
            })
        );
    }

    #[test]
    fn test_create_rejects_negative_and_nan_price() {
        assert!(validate_create(&CreateRecordInput::new("Widget", -0.01)).is_err());
        assert!(validate_create(&CreateRecordInput::new("Widget", f64::NAN)).is_err());
        assert!(validate_create(&CreateRecordInput::new("Widget", f64::INFINITY)).is_err());
    }

    #[test]
    fn test_create_normalizes_blank_category() {
        let input = CreateRecordInput::new(" Widget ", 9.99).with_category("  ");
        let normalized = validate_create(&input).unwrap();
        assert_eq!(normalized.name, "Widget");
        assert_eq!(normalized.category, None);
        assert_eq!(normalized.status, RecordStatus::Active);
    }

    #[test]
    fn test_update_rejects_empty() {
        assert_eq!(
            validate_update(&UpdateRecordInput::default()),
            Err(ValidationError::EmptyUpdate)
        );
        let only_blank_category = UpdateRecordInput {
            category: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(
            validate_update(&only_blank_category),
            Err(ValidationError::EmptyUpdate)
        );
    }

    #[test]
    fn test_update_checks_present_fields() {
        let bad_name = UpdateRecordInput {
            name: Some(String::new()),
            ..Default::default()
        };
        assert!(validate_update(&bad_name).is_err());

        let ok = UpdateRecordInput {
            status: Some(RecordStatus::Inactive),
            ..Default::default()
        };
        assert_eq!(validate_update(&ok).unwrap().status, Some(RecordStatus::Inactive));
    }

    proptest! {
        #[test]
        fn non_negative_prices_accepted(price in 0.0f64..1_000_000.0, name in "[a-zA-Z][a-zA-Z0-9 ]{0,20}") {
            let input = CreateRecordInput::new(name, price);
            prop_assert!(validate_create(&input).is_ok());
        }

        #[test]
        fn negative_prices_rejected(price in -1_000_000.0f64..-0.0001) {
            let input = CreateRecordInput::new("Widget", price);
            prop_assert!(validate_create(&input).is_err());
        }
    }
}
