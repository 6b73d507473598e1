pub mod event;
pub mod project;
pub mod span;
pub mod trace;
