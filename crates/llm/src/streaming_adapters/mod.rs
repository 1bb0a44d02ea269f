//! Provider-Specific Stream Adapters
//!
//! Each adapter handles the streaming wire format of one provider protocol.

pub mod openai;

pub use openai::OpenAIAdapter;
