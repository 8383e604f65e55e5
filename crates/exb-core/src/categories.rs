use std::collections::BTreeSet;

use crate::{
    errors::Error,
    expense::{ExpenseCandidate, ValidatedExpense},
    Result,
};

/// Built-in allow-list. Canonical casing is Title case; matching is exact.
pub const DEFAULT_CATEGORIES: &[&str] = &[
    "Outside food",
    "Miscellaneous",
    "Household",
    "Travel",
    "Shopping",
    "Medical",
    "Credit Card",
    "SIP",
];

/// Fixed set of expense categories accepted into the ledger.
///
/// Built once at startup from configuration and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CategoryRegistry {
    // Insertion order is kept for the model instruction; the set backs lookups.
    ordered: Vec<String>,
    members: BTreeSet<String>,
}

impl CategoryRegistry {
    pub fn new<I, S>(categories: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ordered = Vec::new();
        let mut members = BTreeSet::new();
        for category in categories {
            let category = category.into().trim().to_string();
            if category.is_empty() {
                continue;
            }
            if members.insert(category.clone()) {
                ordered.push(category);
            }
        }

        if ordered.is_empty() {
            return Err(Error::Config(
                "expense category list must not be empty".to_string(),
            ));
        }

        Ok(Self { ordered, members })
    }

    pub fn contains(&self, category: &str) -> bool {
        self.members.contains(category)
    }

    pub fn categories(&self) -> &[String] {
        &self.ordered
    }

    /// Accept the candidate only when its category is an exact registry member.
    pub fn validate(&self, candidate: ExpenseCandidate) -> Result<ValidatedExpense> {
        if !self.contains(&candidate.category) {
            return Err(Error::CategoryNotAllowed(candidate.category));
        }
        Ok(ValidatedExpense::new(candidate))
    }
}

impl Default for CategoryRegistry {
    fn default() -> Self {
        let ordered: Vec<String> = DEFAULT_CATEGORIES.iter().map(|s| s.to_string()).collect();
        let members = ordered.iter().cloned().collect();
        Self { ordered, members }
    }
}
