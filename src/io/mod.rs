pub mod atomic;

pub use atomic::{append_line, atomic_write};
