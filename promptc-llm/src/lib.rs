//! Language model providers for promptc.
//!
//! Every supported model family is reached through an OpenAI-compatible
//! endpoint. [`ChatAdapter`] turns structured requests into chat messages
//! and back, [`OpenAiProvider`] does the HTTP, [`ProviderRoute`] picks the
//! endpoint for a model name and [`CachedModel`] memoizes responses.

#![warn(clippy::all)]
#![allow(clippy::uninlined_format_args)]

pub mod adapter;
pub mod cache;
pub mod openai;
pub mod routing;

pub use adapter::{ChatAdapter, ChatMessage, Role};
pub use cache::{CachedModel, DEFAULT_CACHE_CAPACITY};
pub use openai::{OpenAiBuilder, OpenAiProvider};
pub use routing::{build_embeddings, build_model, ProviderFamily, ProviderRoute};
