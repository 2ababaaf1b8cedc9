//! convoy: agent tool-use orchestration for chat clients.
//!
//! The engine drives a multi-turn exchange between a model and a set of
//! callable tools. Destructive built-in tools wait for user confirmation,
//! file mutations are recorded for undo, and exact repetition of a tool-call
//! batch stops the loop.
//!
//! # Quick Start
//!
//! ```no_run
//! use convoy::prelude::*;
//!
//! # async fn example() -> convoy::error::Result<()> {
//! let engine = ChatEngine::new(ConvoyConfig::load()?);
//! let model: ModelRef = "openai:gpt-4o".parse()?;
//! let thread = engine.create_thread(Thread::new(model)).await?;
//! engine.send_message(thread, Message::user("Hello!")).await?;
//! let result = engine.wait(thread).await;
//! println!("{result:?}");
//! # Ok(())
//! # }
//! ```

pub mod agent_loop;
pub mod config;
pub mod engine;
pub mod error;
pub mod mcp;
pub mod prelude;
pub mod provider;
pub mod thread;
pub mod tools;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;
