use chrono::NaiveDateTime;
use serde::Deserialize;

use crate::{errors::Error, Result};

/// Pattern of the ledger timestamp column (local wall-clock, no zone).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Structured fields extracted from a free-text expense, not yet validated.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpenseCandidate {
    pub item: String,
    pub amount: f64,
    pub category: String,
    /// May be empty; resolved to the sender handle before persisting.
    pub payer: String,
}

/// Wire shape the model is instructed to return. All four keys are required;
/// `person` may be `null` when the message names no payer.
#[derive(Debug, Deserialize)]
struct ModelExpense {
    expense: String,
    amount: f64,
    category: String,
    #[serde(deserialize_with = "Option::deserialize")]
    person: Option<String>,
}

impl ExpenseCandidate {
    /// Decode the model's completion text.
    pub fn from_model_output(raw: &str) -> Result<Self> {
        let parsed: ModelExpense = serde_json::from_str(raw.trim())
            .map_err(|e| Error::MalformedModelOutput(e.to_string()))?;

        Ok(Self {
            item: parsed.expense,
            amount: parsed.amount,
            category: parsed.category,
            payer: parsed.person.unwrap_or_default(),
        })
    }
}

/// A candidate whose category passed registry membership.
///
/// Only [`crate::categories::CategoryRegistry::validate`] constructs this.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedExpense(ExpenseCandidate);

impl ValidatedExpense {
    pub(crate) fn new(candidate: ExpenseCandidate) -> Self {
        Self(candidate)
    }

    pub fn candidate(&self) -> &ExpenseCandidate {
        &self.0
    }
}

/// One persisted ledger row.
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerRow {
    pub timestamp: String,
    pub item: String,
    pub amount: f64,
    pub category: String,
    pub payer: String,
}

impl LedgerRow {
    /// Build the row, substituting `fallback_payer` when the model left the payer blank.
    pub fn new(expense: ValidatedExpense, fallback_payer: &str, now: NaiveDateTime) -> Self {
        let ExpenseCandidate {
            item,
            amount,
            category,
            payer,
        } = expense.0;

        let payer = if payer.trim().is_empty() {
            fallback_payer.to_string()
        } else {
            payer
        };

        Self {
            timestamp: now.format(TIMESTAMP_FORMAT).to_string(),
            item,
            amount,
            category,
            payer,
        }
    }

    /// Ordered `(timestamp, item, amount, category, payer)` cells.
    pub fn values(&self) -> Vec<serde_json::Value> {
        vec![
            serde_json::Value::from(self.timestamp.as_str()),
            serde_json::Value::from(self.item.as_str()),
            serde_json::Value::from(self.amount),
            serde_json::Value::from(self.category.as_str()),
            serde_json::Value::from(self.payer.as_str()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categories::CategoryRegistry;
    use chrono::NaiveDate;

    fn fixed_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 14)
            .unwrap()
            .and_hms_opt(9, 5, 7)
            .unwrap()
    }

    #[test]
    fn decodes_all_four_keys() {
        let c = ExpenseCandidate::from_model_output(
            r#"{"expense":"Coffee","amount":120,"category":"Miscellaneous","person":""}"#,
        )
        .unwrap();
        assert_eq!(c.item, "Coffee");
        assert_eq!(c.amount, 120.0);
        assert_eq!(c.category, "Miscellaneous");
        assert_eq!(c.payer, "");
    }

    #[test]
    fn null_person_decodes_as_blank_payer() {
        let c = ExpenseCandidate::from_model_output(
            r#"{"expense":"Coffee","amount":120,"category":"Miscellaneous","person":null}"#,
        )
        .unwrap();
        assert_eq!(c.item, "Coffee");
        assert_eq!(c.payer, "");
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        let c = ExpenseCandidate::from_model_output(
            "\n  {\"expense\":\"Tea\",\"amount\":12.5,\"category\":\"SIP\",\"person\":\"Ravi\"}\n",
        )
        .unwrap();
        assert_eq!(c.amount, 12.5);
        assert_eq!(c.payer, "Ravi");
    }

    #[test]
    fn rejects_non_json() {
        let err = ExpenseCandidate::from_model_output("I am not sure what you mean").unwrap_err();
        assert!(matches!(err, Error::MalformedModelOutput(_)));
    }

    #[test]
    fn rejects_missing_key() {
        let err = ExpenseCandidate::from_model_output(
            r#"{"expense":"Coffee","amount":120,"category":"Miscellaneous"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::MalformedModelOutput(m) if m.contains("person")));
    }

    #[test]
    fn rejects_amount_as_text() {
        let err = ExpenseCandidate::from_model_output(
            r#"{"expense":"Coffee","amount":"120","category":"Miscellaneous","person":""}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::MalformedModelOutput(_)));
    }

    #[test]
    fn row_substitutes_blank_payer_and_formats_timestamp() {
        let validated = CategoryRegistry::default()
            .validate(ExpenseCandidate {
                item: "Coffee".to_string(),
                amount: 120.0,
                category: "Miscellaneous".to_string(),
                payer: "  ".to_string(),
            })
            .unwrap();

        let row = LedgerRow::new(validated, "alice", fixed_time());
        assert_eq!(row.timestamp, "2026-03-14 09:05:07");
        assert_eq!(row.payer, "alice");
        assert_eq!(
            row.values(),
            vec![
                serde_json::json!("2026-03-14 09:05:07"),
                serde_json::json!("Coffee"),
                serde_json::json!(120.0),
                serde_json::json!("Miscellaneous"),
                serde_json::json!("alice"),
            ]
        );
    }

    #[test]
    fn row_keeps_named_payer() {
        let validated = CategoryRegistry::default()
            .validate(ExpenseCandidate {
                item: "Train".to_string(),
                amount: 45.0,
                category: "Travel".to_string(),
                payer: "Sam".to_string(),
            })
            .unwrap();
        assert_eq!(LedgerRow::new(validated, "alice", fixed_time()).payer, "Sam");
    }
}
