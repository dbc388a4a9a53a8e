//! # Trellis
//!
//! Grammar-constrained generation for autoregressive language models.
//!
//! Trellis keeps every generated token inside a grammar:
//! - **Regex and JSON schema constraints**: masks computed per step
//! - **Typed output**: parse the finished text into your own types
//! - **Streaming**: partial values while the JSON is still being written
//! - **Bring your own model**: anything implementing [`LanguageModel`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trellis::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Engine::builder()
//!         .model_dir("models/qwen2.5-0.5b")
//!         .model(my_model)
//!         .build()?;
//!
//!     let result = engine
//!         .generate("Today's date, ISO format:")
//!         .regex(r"\d{4}-\d{2}-\d{2}")
//!         .execute()
//!         .await?;
//!
//!     println!("{}", result.text);
//!     Ok(())
//! }
//! ```
//!
//! [`LanguageModel`]: trellis_core::model::LanguageModel

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Re-export core crate
pub use trellis_core::*;

mod engine;

pub use engine::{Engine, EngineBuilder, EngineConfig, GenerateRequest};

/// Commonly used types.
pub mod prelude {
    pub use crate::engine::{Engine, EngineBuilder, EngineConfig, GenerateRequest};
    pub use trellis_core::prelude::*;

    // Re-export useful external types
    pub use anyhow;
    pub use tokio;
    pub use tracing;
}
