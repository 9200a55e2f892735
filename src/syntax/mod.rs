//! Host-language syntax: tokens, the operator-merging scanner, the parser and
//! the printer.

pub mod lexer;
pub mod parser;
pub mod printer;
pub mod scanner;
pub mod token;

pub use parser::{
    parse_expression, parse_expression_at, parse_module, parse_statements, parse_statements_at,
};
pub use printer::{
    print_expr, print_module, print_module_with_comments, print_module_with_mappings, print_stmts,
    Mapping,
};
pub use scanner::{default_operators, tokenize, Assoc, OperatorDef, ScanOptions};
pub use token::{Token, TokenKind};
