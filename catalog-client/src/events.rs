//! Event types for the console event loop.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    Input(String),
    InputClosed,
}
