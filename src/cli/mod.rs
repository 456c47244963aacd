pub mod listen;
pub mod logs;
pub mod rates;
pub mod setup;
pub mod sync;
pub mod ui;
