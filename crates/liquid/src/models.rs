//! These models represent the objects passed around between the UI, the
//! converter and the provider adapters
//!
//! There are several different related formats we need to interact with:
//! - vercel useChat messages/tools, sent from the interface to the server
//! - vercel data stream protocol lines, sent from the server to the interface
//! - openai, anthropic and gemini messages/tools, sent to the LLM
//!
//! We always immediately convert those formats into the canonical structs here.
//! A conversation is a list of [`message::ModelMessage`] turns, each made of
//! [`part::Part`]s.
pub mod args;
pub mod conversation;
pub mod message;
pub mod part;
pub mod tool;
