pub mod types;
pub mod filter;
pub mod filter_where;
pub mod filter_order;
pub mod error;

pub use types::*;
pub use filter::Filter;
pub use error::FilterError;

/// Bare SQL identifier: letters, digits and underscores, not starting with a digit
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
