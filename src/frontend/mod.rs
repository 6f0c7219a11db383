pub mod lexer;
pub mod parser;
pub mod parser_error;
pub mod token;

pub use lexer::{Lexer, LexerError, tokenize};
pub use parser::Parser;
pub use parser_error::ParserError;
pub use token::{Token, TokenKind};
