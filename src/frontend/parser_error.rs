/// A parsing error with source location.
///
/// `line` and `col` are 1-based positions taken from the offending token.
/// For errors at end of input the EOF token's position is used, so locations
/// are never `0:0`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{line}:{col}: {message}")]
pub struct ParserError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}
