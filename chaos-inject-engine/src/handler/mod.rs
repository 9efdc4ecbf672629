pub mod action;
pub mod dump;
pub mod fault;
pub mod rule;
pub mod selector;
