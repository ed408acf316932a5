// Persistence of small local state: SQLite meta.db and its key-value slots.

pub mod meta_db;
pub mod slots;

pub use slots::{Slot, SlotStore};
