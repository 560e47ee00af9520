pub mod anthropic;
pub mod base;
pub mod configs;
pub mod factory;
pub mod gate;
pub mod gemini;
pub mod mock;
pub mod openai;
pub mod parts_manager;
pub mod utils;
