//! Model invocation: the backend capability, fault classification, retry
//! and the Gemini adapter.

mod fault;
mod gemini;
mod invoker;
mod prompt;

pub use fault::{ClassificationTable, FaultClass, FaultCode, ModelFault};
pub use gemini::{GeminiInvoker, API_KEY_ENV};
pub use invoker::{InvokeError, ModelInvoker, ModelResponse, ResilientInvoker};
pub(crate) use prompt::format_row;
pub use prompt::format_input;
