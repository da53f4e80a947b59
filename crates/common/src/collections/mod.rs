//! Specialized data structures
//!
//! - **[`bounded_stack`]**: capacity-bounded LIFO that sheds its oldest half
//!   on overflow (backs the replay-nonce cache)

pub mod bounded_stack;

// Re-export commonly used types
pub use bounded_stack::BoundedStack;
