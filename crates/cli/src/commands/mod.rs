pub mod migrate;
pub mod new;
pub mod renumber;
pub mod setup;
