pub mod ast;
pub mod compiler;
pub mod environment;
pub mod lexer;
pub mod parser;
pub mod token;
