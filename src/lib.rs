//! Causerie is a small terminal chat client for OpenAI-compatible APIs.
//!
//! Replies stream into the transcript token by token; tool calls announced
//! by the provider show up as structured entries in the same reply. The
//! crate splits into [`core`] (transcript, streaming, configuration),
//! [`ui`] (rendering and the event loop), [`api`] (wire types), and
//! [`cli`] (argument parsing and bootstrap).

pub mod api;
pub mod cli;
pub mod core;
pub mod ui;
pub mod utils;
