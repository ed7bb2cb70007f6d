pub mod args;
pub mod ast;
pub mod builtins;
pub mod context;
pub mod engine;
pub mod lexer;
pub mod parser;
pub mod registry;
pub mod render;
pub mod resolver;
