//! Credential pool and completion API client.

mod credentials;
mod dispatcher;
mod gemini;

pub use credentials::{Credential, CredentialPool, RotationRun, RotationState, RotationStrategy};
pub use dispatcher::{CompletionBackend, CompletionRequest, Dispatched, Dispatcher, RetryPolicy};
pub use gemini::GeminiClient;

#[cfg(test)]
pub(crate) use dispatcher::testing;
