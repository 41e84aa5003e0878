pub mod assembler;
pub mod classify;
pub mod export;
pub mod narrative;
