//! LLM provider implementations.

use std::future::Future;

pub mod gemini;
pub mod shared;

pub use gemini::{GenerateContentRequest, GenerateContentResponse};
pub use shared::{ProviderError, ProviderErrorKind, ProviderResult};

/// Request/response seam between the turn pipeline and a completion service.
///
/// Implementations perform exactly one attempt; there is no retry policy.
pub trait CompletionClient: Send + Sync {
    fn complete(
        &self,
        request: &GenerateContentRequest,
    ) -> impl Future<Output = ProviderResult<GenerateContentResponse>> + Send;
}
