use async_trait::async_trait;

use crate::{
    expense::{ExpenseCandidate, LedgerRow},
    Result,
};

/// Turns free text into a structured expense candidate.
///
/// Implementations call out to a language model; they must not cache results,
/// and must report transport problems as `Error::ServiceUnavailable` and
/// undecodable output as `Error::MalformedModelOutput`.
#[async_trait]
pub trait ExpenseParser: Send + Sync {
    async fn parse(&self, text: &str) -> Result<ExpenseCandidate>;
}

/// Append-only ledger backend.
///
/// One call appends exactly one row. Not transactional: on failure the caller
/// only learns that the append as a whole did not succeed.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn append_row(&self, row: &LedgerRow) -> Result<()>;
}
